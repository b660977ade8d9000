use crate::domain::{
    generate_code, Account, FavoritesError, PaymentMethod, PromoCode, PromoError, Session,
    ADMIN_STARTING_CREDITS, PROMO_CODE_LENGTH,
};
use crate::infrastructure::{
    hash_password, verify_password, AccountRepository, PromoCodeRepository, RepositoryError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Length of passwords generated for admin-provisioned users.
pub const GENERATED_PASSWORD_LENGTH: usize = 12;

#[derive(Error, Debug)]
pub enum AccountError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Username already taken: {0}")]
    UsernameTaken(String),
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: u64, available: u64 },
    #[error("Promo code not found: {0}")]
    PromoNotFound(String),
    #[error("Promo code {0} has already been used by this account")]
    PromoAlreadyUsed(String),
    #[error("The administrator account cannot be modified this way")]
    ProtectedAccount,
    #[error("Not permitted: {0}")]
    NotPermitted(String),
    #[error("Favorites error: {0}")]
    Favorites(#[from] FavoritesError),
}

impl AccountError {
    /// Turns a missing-record error into [`AccountError::UserNotFound`].
    pub(crate) fn for_user(self, username: &str) -> Self {
        match self {
            AccountError::Repository(RepositoryError::NotFound(_)) => {
                AccountError::UserNotFound(username.to_string())
            }
            other => other,
        }
    }
}

impl From<PromoError> for AccountError {
    fn from(e: PromoError) -> Self {
        match e {
            PromoError::AlreadyRedeemed(username) => AccountError::PromoAlreadyUsed(username),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

/// Fields an administrator may change on a user. `None` leaves a field as is;
/// an empty `api_key` clears the key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountUpdate {
    pub username: Option<String>,
    pub password: Option<String>,
    pub credits: Option<u64>,
    pub api_key: Option<String>,
    pub payment_method: Option<PaymentMethod>,
}

#[derive(Debug, Clone)]
pub struct CreatedUser {
    pub account: Account,
    /// Plaintext password, shown once.
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoCodeSummary {
    #[serde(flatten)]
    pub promo: PromoCode,
    pub used_count: usize,
}

pub struct AccountService<A, P>
where
    A: AccountRepository,
    P: PromoCodeRepository,
{
    accounts: Arc<A>,
    promo_codes: Arc<P>,
    admin: AdminCredentials,
}

impl<A, P> AccountService<A, P>
where
    A: AccountRepository,
    P: PromoCodeRepository,
{
    pub fn new(accounts: Arc<A>, promo_codes: Arc<P>, admin: AdminCredentials) -> Self {
        Self {
            accounts,
            promo_codes,
            admin,
        }
    }

    pub fn admin_username(&self) -> &str {
        &self.admin.username
    }

    fn is_admin_username(&self, username: &str) -> bool {
        Account::key_for(username) == Account::key_for(&self.admin.username)
    }

    /// Creates the administrator account on first start.
    pub async fn ensure_admin(&self) -> Result<(), AccountError> {
        if self.accounts.exists(&self.admin.username).await? {
            return Ok(());
        }

        let account = Account::new(
            self.admin.username.clone(),
            digest_password(&self.admin.password)?,
            ADMIN_STARTING_CREDITS,
        );
        self.accounts.create(&account).await?;
        info!(username = %account.username, "Created administrator account");
        Ok(())
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<Account, AccountError> {
        let username = normalize_username(username)?;
        if password.is_empty() {
            return Err(AccountError::InvalidInput(
                "Password must not be empty".to_string(),
            ));
        }
        self.create_account(username, password).await
    }

    pub async fn admin_create_user(&self, username: &str) -> Result<CreatedUser, AccountError> {
        let username = normalize_username(username)?;
        let password = generate_code(GENERATED_PASSWORD_LENGTH);
        let account = self.create_account(username, &password).await?;
        Ok(CreatedUser { account, password })
    }

    async fn create_account(&self, username: String, password: &str) -> Result<Account, AccountError> {
        let account = Account::new(username, digest_password(password)?, 0);
        match self.accounts.create(&account).await {
            Ok(()) => {
                info!(username = %account.username, "Account created");
                Ok(account)
            }
            Err(RepositoryError::AlreadyExists(_)) => {
                Err(AccountError::UsernameTaken(account.username))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, AccountError> {
        let account = match self.accounts.get_by_username(username.trim()).await {
            Ok(account) => account,
            Err(RepositoryError::NotFound(_)) => return Err(AccountError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        if !verify_password(&account.password, password) {
            warn!(username = %username, "Failed login attempt");
            return Err(AccountError::InvalidCredentials);
        }

        Ok(Session::user(account.username))
    }

    pub fn admin_login(&self, username: &str, password: &str) -> Result<Session, AccountError> {
        if username == self.admin.username && verify_password(&self.admin.password, password) {
            return Ok(Session::admin(self.admin.username.clone()));
        }
        warn!(username = %username, "Failed administrator login attempt");
        Err(AccountError::InvalidCredentials)
    }

    pub async fn current_account(&self, session: &Session) -> Result<Account, AccountError> {
        self.accounts
            .get_by_username(&session.username)
            .await
            .map_err(|e| AccountError::from(e).for_user(&session.username))
    }

    pub async fn admin_update_user(
        &self,
        username: &str,
        update: AccountUpdate,
    ) -> Result<Account, AccountError> {
        let new_username = match update.username.as_deref() {
            Some(name) => Some(normalize_username(name)?),
            None => None,
        };

        if let Some(name) = &new_username {
            let renaming = Account::key_for(name) != Account::key_for(username);
            if renaming && self.is_admin_username(username) {
                return Err(AccountError::ProtectedAccount);
            }
            if renaming && self.accounts.exists(name).await? {
                return Err(AccountError::UsernameTaken(name.clone()));
            }
        }

        let password_digest = update
            .password
            .as_deref()
            .map(digest_password)
            .transpose()?;

        self.accounts
            .update(username, |account| {
                if let Some(name) = new_username {
                    account.username = name;
                }
                if let Some(digest) = password_digest {
                    account.password = digest;
                }
                if let Some(credits) = update.credits {
                    account.credits = credits;
                }
                if let Some(key) = update.api_key {
                    account.api_key = Some(key.trim().to_string()).filter(|k| !k.is_empty());
                }
                if let Some(method) = update.payment_method {
                    account.payment_method = method;
                }
                Ok::<_, AccountError>(account.clone())
            })
            .await
            .map_err(|e| match e {
                AccountError::Repository(RepositoryError::AlreadyExists(name)) => {
                    AccountError::UsernameTaken(name)
                }
                other => other.for_user(username),
            })
    }

    pub async fn delete_user(&self, username: &str) -> Result<(), AccountError> {
        if self.is_admin_username(username) {
            return Err(AccountError::ProtectedAccount);
        }
        self.accounts
            .delete(username)
            .await
            .map_err(|e| AccountError::from(e).for_user(username))?;
        info!(username = %username, "Account deleted");
        Ok(())
    }

    /// Every account except the administrator's.
    pub async fn list_users(&self) -> Result<Vec<Account>, AccountError> {
        let mut accounts = self.accounts.list().await?;
        accounts.retain(|a| !self.is_admin_username(&a.username));
        Ok(accounts)
    }

    /// Takes `amount` credits and returns the remaining balance. An
    /// administrator session is never charged.
    pub async fn spend_credits(&self, session: &Session, amount: u64) -> Result<u64, AccountError> {
        if session.is_admin() {
            return Ok(ADMIN_STARTING_CREDITS);
        }

        let (success, balance) = self
            .accounts
            .debit_credits(&session.username, amount)
            .await
            .map_err(|e| AccountError::from(e).for_user(&session.username))?;

        if !success {
            return Err(AccountError::InsufficientCredits {
                required: amount,
                available: balance,
            });
        }
        Ok(balance)
    }

    /// Grants the code's credits to the session's account, once per account.
    /// Returns the credits granted.
    pub async fn redeem_promo(&self, session: &Session, code: &str) -> Result<u64, AccountError> {
        if session.is_admin() {
            return Err(AccountError::NotPermitted(
                "administrator sessions cannot redeem promo codes".to_string(),
            ));
        }

        let account = self.current_account(session).await?;
        let granted = self
            .promo_codes
            .update(code, |promo| {
                promo.redeem(&account.username).map_err(AccountError::from)
            })
            .await
            .map_err(|e| match e {
                AccountError::Repository(RepositoryError::NotFound(_)) => {
                    AccountError::PromoNotFound(code.to_string())
                }
                other => other,
            })?;

        let balance = match self.accounts.credit(&account.username, granted).await {
            Ok(balance) => balance,
            Err(e) => {
                self.release_promo(code, &account.username).await;
                return Err(AccountError::from(e).for_user(&account.username));
            }
        };

        info!(
            username = %account.username,
            code = %PromoCode::key_for(code),
            granted,
            balance,
            "Promo code redeemed"
        );
        Ok(granted)
    }

    /// Undoes a recorded redemption whose credit grant failed.
    async fn release_promo(&self, code: &str, username: &str) {
        let released = self
            .promo_codes
            .update(code, |promo| Ok::<_, RepositoryError>(promo.release(username)))
            .await;
        match released {
            Ok(_) => warn!(
                username,
                code = %PromoCode::key_for(code),
                "Promo redemption rolled back"
            ),
            Err(e) => error!(
                username,
                code = %PromoCode::key_for(code),
                error = %e,
                "Promo redemption could not be rolled back"
            ),
        }
    }

    pub async fn set_api_key(
        &self,
        session: &Session,
        api_key: Option<String>,
    ) -> Result<Account, AccountError> {
        self.reject_admin(session, "administrator sessions have no API key")?;
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        self.accounts
            .update(&session.username, |account| {
                account.api_key = api_key;
                Ok::<_, AccountError>(account.clone())
            })
            .await
            .map_err(|e| e.for_user(&session.username))
    }

    pub async fn set_payment_method(
        &self,
        session: &Session,
        method: PaymentMethod,
    ) -> Result<Account, AccountError> {
        self.reject_admin(session, "administrator sessions have no payment method")?;

        self.accounts
            .update(&session.username, |account| {
                account.payment_method = method;
                Ok::<_, AccountError>(account.clone())
            })
            .await
            .map_err(|e| e.for_user(&session.username))
    }

    pub async fn create_promo_code(
        &self,
        credits: u64,
        name: Option<String>,
    ) -> Result<PromoCode, AccountError> {
        if credits == 0 {
            return Err(AccountError::InvalidInput(
                "Promo code credits must be greater than zero".to_string(),
            ));
        }
        let name = name.unwrap_or_default().trim().to_string();

        loop {
            let promo = PromoCode::new(generate_code(PROMO_CODE_LENGTH), name.clone(), credits);
            match self.promo_codes.create(&promo).await {
                Ok(()) => {
                    info!(code = %promo.code, credits, "Promo code created");
                    return Ok(promo);
                }
                Err(RepositoryError::AlreadyExists(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn list_promo_codes(&self) -> Result<Vec<PromoCodeSummary>, AccountError> {
        Ok(self
            .promo_codes
            .list()
            .await?
            .into_iter()
            .map(|promo| PromoCodeSummary {
                used_count: promo.used_by.len(),
                promo,
            })
            .collect())
    }

    pub async fn delete_promo_code(&self, code: &str) -> Result<(), AccountError> {
        match self.promo_codes.delete(code).await {
            Ok(()) => Ok(()),
            Err(RepositoryError::NotFound(_)) => Err(AccountError::PromoNotFound(code.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn reject_admin(&self, session: &Session, reason: &str) -> Result<(), AccountError> {
        if session.is_admin() {
            return Err(AccountError::NotPermitted(reason.to_string()));
        }
        Ok(())
    }
}

fn digest_password(password: &str) -> Result<String, AccountError> {
    hash_password(password).map_err(|e| AccountError::Repository(e.into()))
}

fn normalize_username(username: &str) -> Result<String, AccountError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AccountError::InvalidInput(
            "Username must not be empty".to_string(),
        ));
    }
    if username.chars().any(|c| c.is_control() || c == '/') {
        return Err(AccountError::InvalidInput(format!(
            "Username contains invalid characters: {}",
            username
        )));
    }
    Ok(username.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{
        KvAccountRepository, KvPromoCodeRepository, MemoryStore, SecretsEncryption,
    };

    const TEST_KEY: &str = "YWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXoxMjM0NTY=";

    type Service = AccountService<KvAccountRepository<MemoryStore>, KvPromoCodeRepository<MemoryStore>>;

    async fn service() -> Service {
        let store = Arc::new(MemoryStore::new());
        let encryption = Arc::new(SecretsEncryption::new(TEST_KEY).unwrap());
        let service = AccountService::new(
            Arc::new(KvAccountRepository::new(store.clone(), encryption)),
            Arc::new(KvPromoCodeRepository::new(store)),
            AdminCredentials {
                username: "SeTkaProject".to_string(),
                password: "admin-pass".to_string(),
            },
        );
        service.ensure_admin().await.unwrap();
        service
    }

    #[tokio::test]
    async fn admin_is_provisioned_once_and_hidden_from_listing() {
        let service = service().await;
        service.ensure_admin().await.unwrap();

        let admin = service
            .current_account(&Session::user("SeTkaProject"))
            .await
            .unwrap();
        assert_eq!(admin.credits, ADMIN_STARTING_CREDITS);
        assert!(service.list_users().await.unwrap().is_empty());
        assert!(matches!(
            service.delete_user("setkaproject").await,
            Err(AccountError::ProtectedAccount)
        ));
    }

    #[tokio::test]
    async fn generated_password_logs_in() {
        let service = service().await;
        let created = service.admin_create_user("  nina ").await.unwrap();
        assert_eq!(created.account.username, "nina");
        assert_eq!(created.password.len(), GENERATED_PASSWORD_LENGTH);

        let session = service.login("NINA", &created.password).await.unwrap();
        assert_eq!(session, Session::user("nina"));
        assert!(matches!(
            service.login("nina", "wrong").await,
            Err(AccountError::InvalidCredentials)
        ));
        assert!(matches!(
            service.admin_create_user("Nina").await,
            Err(AccountError::UsernameTaken(_))
        ));
    }

    #[tokio::test]
    async fn admin_login_checks_configured_credentials() {
        let service = service().await;
        assert!(service
            .admin_login("SeTkaProject", "admin-pass")
            .unwrap()
            .is_admin());
        assert!(service.admin_login("SeTkaProject", "nope").is_err());
        assert!(service.admin_login("setkaproject", "admin-pass").is_err());
    }

    #[tokio::test]
    async fn admin_update_renames_and_rejects_collisions() {
        let service = service().await;
        service.register("olga", "pw").await.unwrap();
        service.register("pavel", "pw").await.unwrap();

        let err = service
            .admin_update_user(
                "olga",
                AccountUpdate {
                    username: Some("PAVEL".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AccountError::UsernameTaken(_)));

        let updated = service
            .admin_update_user(
                "olga",
                AccountUpdate {
                    username: Some("olga2".to_string()),
                    credits: Some(40),
                    password: Some("fresh".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.credits, 40);
        assert!(service.login("olga2", "fresh").await.is_ok());
        assert!(matches!(
            service.admin_update_user("olga", AccountUpdate::default()).await,
            Err(AccountError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn admin_session_spends_nothing_and_cannot_redeem() {
        let service = service().await;
        let admin = Session::admin("SeTkaProject");
        assert!(service.spend_credits(&admin, 10_000_000).await.is_ok());
        assert!(matches!(
            service.redeem_promo(&admin, "ANY").await,
            Err(AccountError::NotPermitted(_))
        ));
        assert!(matches!(
            service.set_api_key(&admin, Some("k".to_string())).await,
            Err(AccountError::NotPermitted(_))
        ));
    }

    #[tokio::test]
    async fn zero_credit_promo_is_rejected() {
        let service = service().await;
        assert!(matches!(
            service.create_promo_code(0, None).await,
            Err(AccountError::InvalidInput(_))
        ));
        assert!(matches!(
            service.delete_promo_code("MISSING").await,
            Err(AccountError::PromoNotFound(_))
        ));
    }
}
