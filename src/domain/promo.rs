use crate::domain::Account;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PROMO_CODE_LENGTH: usize = 16;
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Error, Debug, PartialEq)]
pub enum PromoError {
    #[error("Promo code already used by {0}")]
    AlreadyRedeemed(String),
}

/// One-time-per-user credit grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoCode {
    #[serde(default)]
    pub name: String,
    pub code: String,
    pub total_credits: u64,
    #[serde(default)]
    pub used_by: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PromoCode {
    pub fn new(code: String, name: String, total_credits: u64) -> Self {
        Self {
            name,
            code,
            total_credits,
            used_by: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Storage key; codes match case-insensitively.
    pub fn key_for(code: &str) -> String {
        code.trim().to_uppercase()
    }

    pub fn key(&self) -> String {
        Self::key_for(&self.code)
    }

    /// Matches redeemers the way accounts are keyed, so a case-only rename
    /// does not unlock a second redemption.
    pub fn has_redeemed(&self, username: &str) -> bool {
        let key = Account::key_for(username);
        self.used_by.iter().any(|u| Account::key_for(u) == key)
    }

    /// Records `username` as a redeemer and returns the credits granted.
    pub fn redeem(&mut self, username: &str) -> Result<u64, PromoError> {
        if self.has_redeemed(username) {
            return Err(PromoError::AlreadyRedeemed(username.to_string()));
        }
        self.used_by.push(username.to_string());
        Ok(self.total_credits)
    }

    /// Forgets a redemption by `username`. Returns whether one was recorded.
    pub fn release(&mut self, username: &str) -> bool {
        let key = Account::key_for(username);
        let before = self.used_by.len();
        self.used_by.retain(|u| Account::key_for(u) != key);
        self.used_by.len() != before
    }
}

/// Random uppercase alphanumeric string, used for promo codes and
/// generated passwords.
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeem_once_per_user() {
        let mut promo = PromoCode::new("ABC".to_string(), String::new(), 50);
        assert_eq!(promo.redeem("alice"), Ok(50));
        assert_eq!(
            promo.redeem("Alice"),
            Err(PromoError::AlreadyRedeemed("Alice".to_string()))
        );
        assert_eq!(promo.redeem("bob"), Ok(50));
        assert_eq!(promo.used_by, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn redeemers_match_across_unicode_case() {
        let mut promo = PromoCode::new("ABC".to_string(), String::new(), 50);
        assert_eq!(promo.redeem("Анна"), Ok(50));
        assert!(promo.has_redeemed("анна"));
        assert!(promo.has_redeemed("АННА"));
        assert_eq!(
            promo.redeem("анна"),
            Err(PromoError::AlreadyRedeemed("анна".to_string()))
        );
    }

    #[test]
    fn release_allows_a_fresh_redemption() {
        let mut promo = PromoCode::new("ABC".to_string(), String::new(), 50);
        promo.redeem("Анна").unwrap();
        promo.redeem("bob").unwrap();
        assert!(promo.release("АННА"));
        assert!(!promo.release("АННА"));
        assert_eq!(promo.used_by, vec!["bob".to_string()]);
        assert_eq!(promo.redeem("анна"), Ok(50));
    }

    #[test]
    fn generated_codes_use_alphabet() {
        let code = generate_code(PROMO_CODE_LENGTH);
        assert_eq!(code.len(), PROMO_CODE_LENGTH);
        assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn legacy_record_without_optional_fields_parses() {
        let promo: PromoCode =
            serde_json::from_str(r#"{"code":"XYZ","total_credits":5}"#).unwrap();
        assert!(promo.used_by.is_empty());
        assert_eq!(promo.key(), "XYZ");
    }
}
