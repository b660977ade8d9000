//! Persisted record layout and its one-shot upgrade.
//!
//! Schema 1 kept every account in one JSON array (`setka_users`) and every
//! promo code in another (`setka_promo_codes`), with favorites in several
//! historical shapes. Schema 2 stores one record per key. [`upgrade`] runs
//! once at start-up and moves a store from whatever version it is on to
//! [`CURRENT_SCHEMA`].

use crate::domain::{
    Account, Favorites, FavoritesCollection, Folder, PaymentMethod, PromoCode,
};
use crate::infrastructure::{
    hash_password, is_password_digest, KeyValueStore, RepositoryError, SecretsEncryption,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use std::collections::HashSet;
use tracing::{info, warn};

pub const SCHEMA_VERSION_KEY: &str = "schema_version";
pub const LEGACY_USERS_KEY: &str = "setka_users";
pub const LEGACY_PROMO_CODES_KEY: &str = "setka_promo_codes";
pub const ACCOUNT_PREFIX: &str = "accounts/";
pub const PROMO_CODE_PREFIX: &str = "promo_codes/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchemaVersion {
    V1 = 1,
    V2 = 2,
}

pub const CURRENT_SCHEMA: SchemaVersion = SchemaVersion::V2;

impl SchemaVersion {
    fn parse(raw: &str) -> Result<Self, RepositoryError> {
        match raw.trim() {
            "1" => Ok(SchemaVersion::V1),
            "2" => Ok(SchemaVersion::V2),
            other => Err(RepositoryError::InvalidData(format!(
                "Unsupported schema version: {}",
                other
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SchemaVersion::V1 => "1",
            SchemaVersion::V2 => "2",
        }
    }
}

pub fn account_key(username: &str) -> String {
    format!("{}{}", ACCOUNT_PREFIX, Account::key_for(username))
}

pub fn promo_code_key(code: &str) -> String {
    format!("{}{}", PROMO_CODE_PREFIX, PromoCode::key_for(code))
}

/// Schema 2 account record. The API key is sealed with [`SecretsEncryption`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub username: String,
    pub password: String,
    pub credits: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_encrypted: Option<ByteBuf>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub favorites: Favorites,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
    pub fn seal(account: &Account, encryption: &SecretsEncryption) -> Result<Self, RepositoryError> {
        let api_key_encrypted = match account.api_key.as_deref() {
            Some(key) if !key.is_empty() => Some(ByteBuf::from(encryption.encrypt(key)?)),
            _ => None,
        };

        Ok(Self {
            username: account.username.clone(),
            password: account.password.clone(),
            credits: account.credits,
            api_key_encrypted,
            payment_method: account.payment_method,
            favorites: account.favorites.clone(),
            created_at: account.created_at,
            updated_at: account.updated_at,
        })
    }

    pub fn open(self, encryption: &SecretsEncryption) -> Result<Account, RepositoryError> {
        let api_key = self
            .api_key_encrypted
            .map(|sealed| encryption.decrypt(&sealed))
            .transpose()?;

        Ok(Account {
            username: self.username,
            password: self.password,
            credits: self.credits,
            api_key,
            payment_method: self.payment_method,
            favorites: self.favorites,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Favorites as written by schema 1: absent, a flat list of photo
/// references, or the nested form with parts possibly missing.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyFavorites {
    Flat(Vec<String>),
    Nested(PartialFavorites),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialFavorites {
    #[serde(default)]
    pub photos: Option<PartialCollection>,
    #[serde(default)]
    pub avatars: Option<PartialCollection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PartialCollection {
    #[serde(default)]
    pub root: Option<Vec<String>>,
    #[serde(default)]
    pub folders: Option<Vec<Folder>>,
}

impl From<Option<PartialCollection>> for FavoritesCollection {
    fn from(partial: Option<PartialCollection>) -> Self {
        let partial = partial.unwrap_or_default();
        Self {
            root: partial.root.unwrap_or_default(),
            folders: partial.folders.unwrap_or_default(),
        }
    }
}

impl LegacyFavorites {
    /// Normalises to the current shape. Parts that are already present are
    /// kept as they are.
    pub fn normalize(favorites: Option<LegacyFavorites>) -> Favorites {
        match favorites {
            None => Favorites::default(),
            Some(LegacyFavorites::Flat(images)) => Favorites {
                photos: FavoritesCollection {
                    root: images,
                    folders: Vec::new(),
                },
                avatars: FavoritesCollection::default(),
            },
            Some(LegacyFavorites::Nested(partial)) => Favorites {
                photos: partial.photos.into(),
                avatars: partial.avatars.into(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyAccountRecord {
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub credits: i64,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub favorites: Option<LegacyFavorites>,
}

impl LegacyAccountRecord {
    fn into_account(self) -> Result<Account, RepositoryError> {
        let password = if is_password_digest(&self.password) {
            self.password
        } else {
            hash_password(&self.password)?
        };

        let mut account = Account::new(self.username, password, self.credits.max(0) as u64);
        account.api_key = self.api_key.filter(|k| !k.trim().is_empty());
        account.payment_method = self.payment_method.unwrap_or_default();
        account.favorites = LegacyFavorites::normalize(self.favorites);
        Ok(account)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyPromoCode {
    #[serde(default)]
    pub name: String,
    pub code: String,
    pub total_credits: u64,
    #[serde(default)]
    pub used_by: Option<Vec<String>>,
}

impl From<LegacyPromoCode> for PromoCode {
    fn from(legacy: LegacyPromoCode) -> Self {
        let mut promo = PromoCode::new(legacy.code, legacy.name, legacy.total_credits);
        promo.used_by = legacy.used_by.unwrap_or_default();
        promo
    }
}

/// What a store holds before the upgrade runs.
#[derive(Debug)]
pub enum StoredLayout {
    V1 {
        users: Vec<LegacyAccountRecord>,
        promo_codes: Vec<LegacyPromoCode>,
    },
    V2,
}

pub async fn detect_layout<S>(store: &S) -> Result<StoredLayout, RepositoryError>
where
    S: KeyValueStore + ?Sized,
{
    let version = match store.get(SCHEMA_VERSION_KEY).await? {
        Some(raw) => SchemaVersion::parse(&raw)?,
        None => SchemaVersion::V1,
    };

    match version {
        SchemaVersion::V2 => Ok(StoredLayout::V2),
        SchemaVersion::V1 => Ok(StoredLayout::V1 {
            users: read_legacy_array(store, LEGACY_USERS_KEY).await?,
            promo_codes: read_legacy_array(store, LEGACY_PROMO_CODES_KEY).await?,
        }),
    }
}

async fn read_legacy_array<S, T>(store: &S, key: &str) -> Result<Vec<T>, RepositoryError>
where
    S: KeyValueStore + ?Sized,
    T: serde::de::DeserializeOwned,
{
    match store.get(key).await? {
        None => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(&raw)
            .map_err(|e| RepositoryError::InvalidData(format!("{}: {}", key, e))),
    }
}

/// Brings the store to [`CURRENT_SCHEMA`] and returns the version it was on.
///
/// Records that already exist under their schema 2 key are never
/// overwritten; legacy keys are removed only after every record is written.
pub async fn upgrade<S>(
    store: &S,
    encryption: &SecretsEncryption,
) -> Result<SchemaVersion, RepositoryError>
where
    S: KeyValueStore + ?Sized,
{
    let (users, promo_codes) = match detect_layout(store).await? {
        StoredLayout::V2 => return Ok(SchemaVersion::V2),
        StoredLayout::V1 { users, promo_codes } => (users, promo_codes),
    };

    let mut seen = HashSet::new();
    let mut migrated_users = 0;
    for legacy in users {
        let key = account_key(&legacy.username);
        if !seen.insert(key.clone()) {
            warn!(username = %legacy.username, "Skipping duplicate legacy account");
            continue;
        }
        if store.get(&key).await?.is_some() {
            continue;
        }

        let record = AccountRecord::seal(&legacy.into_account()?, encryption)?;
        store.put(&key, &encode(&record)?).await?;
        migrated_users += 1;
    }

    let mut migrated_codes = 0;
    for legacy in promo_codes {
        let promo = PromoCode::from(legacy);
        let key = promo_code_key(&promo.code);
        if store.get(&key).await?.is_some() {
            continue;
        }
        store.put(&key, &encode(&promo)?).await?;
        migrated_codes += 1;
    }

    store
        .put(SCHEMA_VERSION_KEY, CURRENT_SCHEMA.as_str())
        .await?;
    store.delete(LEGACY_USERS_KEY).await?;
    store.delete(LEGACY_PROMO_CODES_KEY).await?;

    info!(
        accounts = migrated_users,
        promo_codes = migrated_codes,
        "Upgraded storage from schema 1 to schema 2"
    );
    Ok(SchemaVersion::V1)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string_pretty(value).map_err(|e| RepositoryError::InvalidData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_favorites(raw: &str) -> Favorites {
        let legacy: Option<LegacyFavorites> = serde_json::from_str(raw).unwrap();
        LegacyFavorites::normalize(legacy)
    }

    #[test]
    fn flat_list_moves_to_photo_root() {
        let favorites = parse_favorites(r#"["a", "b"]"#);
        assert_eq!(favorites.photos.root, vec!["a", "b"]);
        assert!(favorites.avatars.root.is_empty());
    }

    #[test]
    fn missing_parts_are_filled_in() {
        let favorites = parse_favorites(r#"{"photos": {"root": ["a"]}}"#);
        assert_eq!(favorites.photos.root, vec!["a"]);
        assert!(favorites.photos.folders.is_empty());
        assert_eq!(favorites.avatars, FavoritesCollection::default());

        assert_eq!(parse_favorites("null"), Favorites::default());
    }

    #[test]
    fn current_shape_is_left_untouched() {
        let raw = r#"{
            "photos": {"root": ["a"], "folders": [{"id": "folder_1", "name": "x", "images": ["b"]}]},
            "avatars": {"root": ["c"], "folders": []}
        }"#;
        let favorites = parse_favorites(raw);
        assert_eq!(favorites.photos.folders[0].images, vec!["b"]);
        assert_eq!(favorites.avatars.root, vec!["c"]);
    }

    #[test]
    fn legacy_account_gets_digest_and_defaults() {
        let legacy: LegacyAccountRecord = serde_json::from_str(
            r#"{"username": "Anna", "password": "secret", "credits": -3, "favorites": ["x"]}"#,
        )
        .unwrap();

        let account = legacy.into_account().unwrap();
        assert!(is_password_digest(&account.password));
        assert!(crate::infrastructure::verify_password(&account.password, "secret"));
        assert_eq!(account.credits, 0);
        assert_eq!(account.payment_method, PaymentMethod::Credits);
        assert!(account.favorites.contains("x"));
    }
}
