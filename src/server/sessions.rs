use crate::application::CancelFlag;
use crate::domain::{Account, Session};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

const TOKEN_BYTES: usize = 32;

/// A logged-in client: who it is and the stop signals of its running batches.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    /// Log correlation id; never used for authentication.
    pub id: Uuid,
    pub session: Session,
    pub batches: Vec<CancelFlag>,
    pub created_at: DateTime<Utc>,
}

impl ActiveSession {
    fn cancel_batches(&self) -> usize {
        self.batches.iter().for_each(CancelFlag::cancel);
        self.batches.len()
    }
}

/// In-memory bearer-token registry. Sessions do not survive a restart.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ActiveSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session` and returns its token.
    pub async fn open(&self, session: Session) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        let id = Uuid::new_v4();
        debug!(session_id = %id, username = %session.username, role = ?session.role, "Session opened");
        self.sessions.write().await.insert(
            token.clone(),
            ActiveSession {
                id,
                session,
                batches: Vec::new(),
                created_at: Utc::now(),
            },
        );
        token
    }

    pub async fn get(&self, token: &str) -> Option<ActiveSession> {
        self.sessions.read().await.get(token).cloned()
    }

    /// Registers a fresh stop signal for a batch the session is starting.
    /// `None` once the session is gone.
    pub async fn begin_batch(&self, token: &str) -> Option<CancelFlag> {
        let mut sessions = self.sessions.write().await;
        let active = sessions.get_mut(token)?;
        let flag = CancelFlag::new();
        active.batches.retain(|f| !f.is_cancelled());
        active.batches.push(flag.clone());
        Some(flag)
    }

    pub async fn finish_batch(&self, token: &str, flag: &CancelFlag) {
        if let Some(active) = self.sessions.write().await.get_mut(token) {
            active.batches.retain(|f| !f.is_same(flag));
        }
    }

    /// Stops every batch the session is running. Returns how many were signalled.
    pub async fn cancel_batches(&self, token: &str) -> usize {
        match self.sessions.read().await.get(token) {
            Some(active) => active.cancel_batches(),
            None => 0,
        }
    }

    /// Ends the session and stops whatever batches it was running.
    pub async fn close(&self, token: &str) -> bool {
        match self.sessions.write().await.remove(token) {
            Some(active) => {
                active.cancel_batches();
                debug!(session_id = %active.id, "Session closed");
                true
            }
            None => false,
        }
    }

    /// Drops every session of `username`, e.g. after the account is deleted
    /// or renamed.
    pub async fn close_user(&self, username: &str) -> usize {
        let key = Account::key_for(username);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, active| {
            let keep = Account::key_for(&active.session.username) != key;
            if !keep {
                active.cancel_batches();
            }
            keep
        });
        before - sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tokens_are_unique_and_closable() {
        let registry = SessionRegistry::new();
        let first = registry.open(Session::user("ann")).await;
        let second = registry.open(Session::user("ann")).await;
        assert_ne!(first, second);
        assert_ne!(
            registry.get(&first).await.unwrap().id,
            registry.get(&second).await.unwrap().id
        );

        let active = registry.get(&first).await.unwrap();
        assert_eq!(active.session.username, "ann");
        let batch = registry.begin_batch(&first).await.unwrap();

        assert!(registry.close(&first).await);
        assert!(batch.is_cancelled());
        assert!(registry.begin_batch(&first).await.is_none());
        assert!(registry.get(&first).await.is_none());

        assert_eq!(registry.close_user("ANN").await, 1);
        assert!(registry.get(&second).await.is_none());
    }

    #[tokio::test]
    async fn close_user_folds_unicode_case() {
        let registry = SessionRegistry::new();
        let token = registry.open(Session::user("Анна")).await;
        let other = registry.open(Session::user("Борис")).await;
        let batch = registry.begin_batch(&token).await.unwrap();

        assert_eq!(registry.close_user("АННА").await, 1);
        assert!(registry.get(&token).await.is_none());
        assert!(batch.is_cancelled());
        assert!(registry.get(&other).await.is_some());
    }

    #[tokio::test]
    async fn each_batch_gets_its_own_flag() {
        let registry = SessionRegistry::new();
        let token = registry.open(Session::user("ann")).await;

        let first = registry.begin_batch(&token).await.unwrap();
        assert_eq!(registry.cancel_batches(&token).await, 1);
        assert!(first.is_cancelled());

        let second = registry.begin_batch(&token).await.unwrap();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.get(&token).await.unwrap().batches.len(), 1);

        let third = registry.begin_batch(&token).await.unwrap();
        registry.finish_batch(&token, &second).await;
        assert_eq!(registry.cancel_batches(&token).await, 1);
        assert!(third.is_cancelled());
        assert!(!second.is_cancelled());
    }
}
