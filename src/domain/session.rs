use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    User,
    Admin,
}

/// The active identity for a request, passed explicitly to every
/// account-scoped operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub role: SessionRole,
}

impl Session {
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: SessionRole::User,
        }
    }

    pub fn admin(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: SessionRole::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == SessionRole::Admin
    }
}
