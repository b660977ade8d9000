pub mod account;
pub mod favorites;
pub mod generation;
pub mod promo;
pub mod session;

pub use account::*;
pub use favorites::*;
pub use generation::*;
pub use promo::*;
pub use session::*;
