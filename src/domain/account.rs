use crate::domain::Favorites;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Username of the built-in administrator account.
pub const ADMIN_USERNAME: &str = "SeTkaProject";
pub const ADMIN_STARTING_CREDITS: u64 = 999_999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    /// Salted digest, or a legacy plaintext value not yet upgraded.
    pub password: String,
    pub credits: u64,
    pub api_key: Option<String>,
    pub payment_method: PaymentMethod,
    pub favorites: Favorites,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[cfg_attr(feature = "server", derive(utoipa::ToSchema))]
pub enum PaymentMethod {
    #[default]
    #[serde(rename = "credits")]
    #[strum(serialize = "credits")]
    Credits,
    #[serde(rename = "apiKey")]
    #[strum(to_string = "apiKey", serialize = "api_key")]
    ApiKey,
}

impl Account {
    pub fn new(username: String, password_digest: String, credits: u64) -> Self {
        let now = Utc::now();
        Self {
            username,
            password: password_digest,
            credits,
            api_key: None,
            payment_method: PaymentMethod::Credits,
            favorites: Favorites::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Storage key for a username; lookups are case-insensitive.
    pub fn key_for(username: &str) -> String {
        username.to_lowercase()
    }

    pub fn key(&self) -> String {
        Self::key_for(&self.username)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Credits a generation of `images` costs under the current payment method.
    pub fn generation_cost(&self, images: u32) -> u64 {
        match self.payment_method {
            PaymentMethod::Credits => u64::from(images),
            PaymentMethod::ApiKey => 0,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn payment_method_uses_wire_names() {
        assert_eq!(PaymentMethod::ApiKey.to_string(), "apiKey");
        assert_eq!(PaymentMethod::from_str("credits").unwrap(), PaymentMethod::Credits);
        assert_eq!(PaymentMethod::from_str("api_key").unwrap(), PaymentMethod::ApiKey);
        assert_eq!(
            serde_json::to_string(&PaymentMethod::ApiKey).unwrap(),
            "\"apiKey\""
        );
    }

    #[test]
    fn generation_cost_is_free_with_own_key() {
        let mut account = Account::new("alice".to_string(), "pw".to_string(), 10);
        assert_eq!(account.generation_cost(3), 3);

        account.payment_method = PaymentMethod::ApiKey;
        assert_eq!(account.generation_cost(3), 0);
    }

    #[test]
    fn key_is_case_insensitive() {
        assert_eq!(Account::key_for("Alice"), Account::key_for("ALICE"));
    }
}
