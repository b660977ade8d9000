pub mod config;
pub mod crypto;
pub mod gemini;
pub mod repository;
pub mod retry;
pub mod schema;
pub mod storage;

pub use config::*;
pub use crypto::*;
pub use gemini::*;
pub use repository::*;
pub use retry::*;
pub use schema::*;
pub use storage::*;
