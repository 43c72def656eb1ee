//! AgriTrust HTTP node: serves profile credentials, QR verification and
//! EcoPassports over a PostgreSQL or in-memory record store.

pub mod config;
pub mod pg_store;
pub mod routes;

pub use routes::{router, AppState};
