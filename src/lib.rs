//! SeTka Studio
//!
//! Image generation studio backend: a retrying client for the Gemini and
//! Imagen image models, per-user credits and promo codes, and a favorites
//! tree with folders.
//!
//! ## Standalone
//!
//! Run the binary:
//! ```bash
//! setka-studio-server
//! ```
//!
//! ## Embedded (Axum)
//!
//! When the `server` feature is enabled, this crate can be embedded into a larger Axum app:
//! ```rust,ignore
//! use axum::Router;
//! use setka_studio::infrastructure::{AppConfig, FileStore};
//! use setka_studio::server::{build_state_with_store, router};
//! use std::sync::Arc;
//!
//! let cfg = AppConfig::from_env()?;
//! let store = Arc::new(FileStore::open(&cfg.data_dir).await?);
//! let state = build_state_with_store(cfg, store).await?;
//! let app = Router::new().nest("/studio", router(state));
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;

// Standalone + embedded HTTP server support (Axum).
// Enabled behind the `server` feature so the core library can be used without Axum.
#[cfg(feature = "server")]
pub mod server;

pub use application::*;
pub use domain::*;
pub use infrastructure::*;

#[cfg(feature = "server")]
pub use server::*;
