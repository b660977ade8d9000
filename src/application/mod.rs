pub mod accounts;
pub mod favorites;
pub mod generation;

pub use accounts::*;
pub use favorites::*;
pub use generation::*;
