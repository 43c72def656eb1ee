pub mod credential;
pub mod credential_store;
pub mod eco_passport;
pub mod error;
pub mod identity;
pub mod memory_store;
pub mod record_store;
pub mod registry;
pub mod resolver;

pub use error::{TrustError, TrustResult};
