use super::sessions::SessionRegistry;
use crate::application::{AccountService, AdminCredentials, FavoritesService, GenerationService};
use crate::infrastructure::{
    upgrade, AppConfig, FileStore, GeminiClient, KvAccountRepository, KvPromoCodeRepository,
    SecretsEncryption,
};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub type AccountRepo = KvAccountRepository<FileStore>;
pub type PromoCodeRepo = KvPromoCodeRepository<FileStore>;

pub type AccountServiceType = AccountService<AccountRepo, PromoCodeRepo>;
pub type FavoritesServiceType = FavoritesService<AccountRepo>;
pub type GenerationServiceType = GenerationService<AccountRepo, GeminiClient>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FileStore>,
    pub accounts: Arc<AccountServiceType>,
    pub favorites: Arc<FavoritesServiceType>,
    pub generation: Arc<GenerationServiceType>,
    pub sessions: Arc<SessionRegistry>,
}

/// Build full state from config + an already opened store.
///
/// Upgrades the stored layout if needed and makes sure the administrator
/// account exists.
pub async fn build_state_with_store(
    config: AppConfig,
    store: Arc<FileStore>,
) -> anyhow::Result<AppState> {
    let encryption = Arc::new(
        SecretsEncryption::new(&config.encryption_key).context("init encryption")?,
    );

    let from = upgrade(store.as_ref(), &encryption)
        .await
        .context("upgrade storage schema")?;
    info!(from = ?from, "Storage schema ready");

    let retry = config.retry_policy();
    let batch_delay = config.batch_delay();

    let generator = Arc::new(
        GeminiClient::new(
            config.gemini_base_url,
            config.gemini_api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
        .context("init image generation client")?,
    );

    let account_repo = Arc::new(KvAccountRepository::new(store.clone(), encryption));
    let promo_repo = Arc::new(KvPromoCodeRepository::new(store.clone()));

    let accounts = Arc::new(AccountService::new(
        account_repo.clone(),
        promo_repo,
        AdminCredentials {
            username: config.admin_username,
            password: config.admin_password,
        },
    ));
    accounts.ensure_admin().await.context("ensure admin account")?;

    let favorites = Arc::new(FavoritesService::new(account_repo.clone()));
    let generation = Arc::new(GenerationService::new(
        account_repo,
        generator,
        retry,
        batch_delay,
    ));

    Ok(AppState {
        store,
        accounts,
        favorites,
        generation,
        sessions: Arc::new(SessionRegistry::new()),
    })
}

/// Build state for the standalone server.
///
/// Opens the JSON record directory named by `data_dir` and wires services.
pub async fn build_state_from_env(config: AppConfig) -> anyhow::Result<AppState> {
    let store = FileStore::open(&config.data_dir)
        .await
        .context("open data directory")?;
    build_state_with_store(config, Arc::new(store)).await
}
