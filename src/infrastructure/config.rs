use crate::infrastructure::RetryPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Directory holding the JSON record files.
    pub data_dir: String,
    pub encryption_key: String,
    pub server_host: String,
    pub server_port: u16,

    // Image generation API
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub request_timeout_secs: u64,
    pub retry_max_retries: u32,
    pub retry_initial_delay_ms: u64,
    pub batch_delay_ms: u64,

    // Built-in administrator
    pub admin_username: String,
    pub admin_password: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("SETKA")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("data_dir", "data")?
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8080)?
            .set_default(
                "gemini_base_url",
                "https://generativelanguage.googleapis.com/v1beta",
            )?
            .set_default("request_timeout_secs", 120)?
            .set_default("retry_max_retries", 5)?
            .set_default("retry_initial_delay_ms", 2000)?
            .set_default("batch_delay_ms", 2500)?
            .set_default("admin_username", crate::domain::ADMIN_USERNAME)?
            .build()?;

        config.try_deserialize()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_retries,
            Duration::from_millis(self.retry_initial_delay_ms),
        )
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}
