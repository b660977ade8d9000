use crate::domain::{Account, PromoCode};
use crate::infrastructure::schema::{account_key, encode, promo_code_key, AccountRecord};
use crate::infrastructure::{
    EncryptionError, KeyValueStore, SecretsEncryption, StorageError, ACCOUNT_PREFIX,
    PROMO_CODE_PREFIX,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    #[must_use]
    async fn create(&self, account: &Account) -> Result<(), RepositoryError>;
    #[must_use]
    async fn get_by_username(&self, username: &str) -> Result<Account, RepositoryError>;
    #[must_use]
    async fn exists(&self, username: &str) -> Result<bool, RepositoryError>;
    #[must_use]
    async fn list(&self) -> Result<Vec<Account>, RepositoryError>;
    /// Read-modify-write of one account, serialised against every other
    /// write through this repository. Nothing is written when `apply` fails.
    /// A changed username moves the record to its new key.
    #[must_use]
    async fn update<T, E, F>(&self, username: &str, apply: F) -> Result<T, E>
    where
        F: FnOnce(&mut Account) -> Result<T, E> + Send,
        T: Send,
        E: From<RepositoryError> + Send;
    #[must_use]
    async fn delete(&self, username: &str) -> Result<(), RepositoryError>;
    /// Atomically takes `amount` credits, returning (success, balance after).
    /// The balance is left untouched when it is lower than `amount`.
    #[must_use]
    async fn debit_credits(&self, username: &str, amount: u64)
        -> Result<(bool, u64), RepositoryError>;
    /// Adds credits and returns the new balance.
    #[must_use]
    async fn credit(&self, username: &str, amount: u64) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait PromoCodeRepository: Send + Sync {
    #[must_use]
    async fn create(&self, promo: &PromoCode) -> Result<(), RepositoryError>;
    #[must_use]
    async fn get(&self, code: &str) -> Result<PromoCode, RepositoryError>;
    #[must_use]
    async fn list(&self) -> Result<Vec<PromoCode>, RepositoryError>;
    #[must_use]
    async fn update<T, E, F>(&self, code: &str, apply: F) -> Result<T, E>
    where
        F: FnOnce(&mut PromoCode) -> Result<T, E> + Send,
        T: Send,
        E: From<RepositoryError> + Send;
    #[must_use]
    async fn delete(&self, code: &str) -> Result<(), RepositoryError>;
}

pub struct KvAccountRepository<S: KeyValueStore> {
    store: Arc<S>,
    encryption: Arc<SecretsEncryption>,
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> KvAccountRepository<S> {
    pub fn new(store: Arc<S>, encryption: Arc<SecretsEncryption>) -> Self {
        Self {
            store,
            encryption,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self, key: &str) -> Result<Option<Account>, RepositoryError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        let record: AccountRecord = serde_json::from_str(&raw)
            .map_err(|e| RepositoryError::InvalidData(format!("{}: {}", key, e)))?;
        Ok(Some(record.open(&self.encryption)?))
    }

    async fn load_existing(&self, username: &str) -> Result<Account, RepositoryError> {
        self.load(&account_key(username))
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("Account {}", username)))
    }

    async fn save(&self, account: &Account) -> Result<(), RepositoryError> {
        let record = AccountRecord::seal(account, &self.encryption)?;
        self.store
            .put(&account_key(&account.username), &encode(&record)?)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<S: KeyValueStore> AccountRepository for KvAccountRepository<S> {
    async fn create(&self, account: &Account) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        if self.load(&account_key(&account.username)).await?.is_some() {
            return Err(RepositoryError::AlreadyExists(format!(
                "Account {}",
                account.username
            )));
        }
        self.save(account).await?;
        debug!(username = %account.username, "Created account record");
        Ok(())
    }

    async fn get_by_username(&self, username: &str) -> Result<Account, RepositoryError> {
        self.load_existing(username).await
    }

    async fn exists(&self, username: &str) -> Result<bool, RepositoryError> {
        Ok(self.store.get(&account_key(username)).await?.is_some())
    }

    async fn list(&self) -> Result<Vec<Account>, RepositoryError> {
        let mut accounts = Vec::new();
        for key in self.store.keys_with_prefix(ACCOUNT_PREFIX).await? {
            if let Some(account) = self.load(&key).await? {
                accounts.push(account);
            }
        }
        Ok(accounts)
    }

    async fn update<T, E, F>(&self, username: &str, apply: F) -> Result<T, E>
    where
        F: FnOnce(&mut Account) -> Result<T, E> + Send,
        T: Send,
        E: From<RepositoryError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut account = self.load_existing(username).await?;
        let old_key = account.key();

        account.touch();
        let value = apply(&mut account)?;

        if account.key() != old_key {
            if self.load(&account_key(&account.username)).await?.is_some() {
                return Err(RepositoryError::AlreadyExists(format!(
                    "Account {}",
                    account.username
                ))
                .into());
            }
            self.save(&account).await?;
            self.store
                .delete(&account_key(username))
                .await
                .map_err(RepositoryError::from)?;
        } else {
            self.save(&account).await?;
        }

        Ok(value)
    }

    async fn delete(&self, username: &str) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        if !self.store.delete(&account_key(username)).await? {
            return Err(RepositoryError::NotFound(format!("Account {}", username)));
        }
        Ok(())
    }

    async fn debit_credits(
        &self,
        username: &str,
        amount: u64,
    ) -> Result<(bool, u64), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let mut account = self.load_existing(username).await?;
        if amount > account.credits {
            return Ok((false, account.credits));
        }

        account.credits -= amount;
        account.touch();
        self.save(&account).await?;
        Ok((true, account.credits))
    }

    async fn credit(&self, username: &str, amount: u64) -> Result<u64, RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let mut account = self.load_existing(username).await?;
        account.credits = account.credits.saturating_add(amount);
        account.touch();
        self.save(&account).await?;
        Ok(account.credits)
    }
}

pub struct KvPromoCodeRepository<S: KeyValueStore> {
    store: Arc<S>,
    write_lock: Mutex<()>,
}

impl<S: KeyValueStore> KvPromoCodeRepository<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self, key: &str) -> Result<Option<PromoCode>, RepositoryError> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| RepositoryError::InvalidData(format!("{}: {}", key, e)))
    }

    async fn load_existing(&self, code: &str) -> Result<PromoCode, RepositoryError> {
        self.load(&promo_code_key(code))
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("Promo code {}", code)))
    }
}

#[async_trait]
impl<S: KeyValueStore> PromoCodeRepository for KvPromoCodeRepository<S> {
    async fn create(&self, promo: &PromoCode) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let key = promo_code_key(&promo.code);
        if self.store.get(&key).await?.is_some() {
            return Err(RepositoryError::AlreadyExists(format!(
                "Promo code {}",
                promo.code
            )));
        }
        self.store.put(&key, &encode(promo)?).await?;
        Ok(())
    }

    async fn get(&self, code: &str) -> Result<PromoCode, RepositoryError> {
        self.load_existing(code).await
    }

    async fn list(&self) -> Result<Vec<PromoCode>, RepositoryError> {
        let mut codes = Vec::new();
        for key in self.store.keys_with_prefix(PROMO_CODE_PREFIX).await? {
            if let Some(promo) = self.load(&key).await? {
                codes.push(promo);
            }
        }
        codes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(codes)
    }

    async fn update<T, E, F>(&self, code: &str, apply: F) -> Result<T, E>
    where
        F: FnOnce(&mut PromoCode) -> Result<T, E> + Send,
        T: Send,
        E: From<RepositoryError> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut promo = self.load_existing(code).await?;
        let value = apply(&mut promo)?;
        self.store
            .put(&promo_code_key(&promo.code), &encode(&promo)?)
            .await
            .map_err(RepositoryError::from)?;
        Ok(value)
    }

    async fn delete(&self, code: &str) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        if !self.store.delete(&promo_code_key(code)).await? {
            return Err(RepositoryError::NotFound(format!("Promo code {}", code)));
        }
        Ok(())
    }
}
