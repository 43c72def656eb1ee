//! Record store adapter.
//!
//! The core reaches persistent state only through [`RecordStore`]. Every
//! method is a single round trip; owner-key uniqueness for credentials and
//! EcoPassports is the adapter's job (unique column plus upsert-or-insert),
//! never a read-then-write in the caller.

use async_trait::async_trait;
use thiserror::Error;

use crate::credential::{Credential, CredentialPayload};
use crate::eco_passport::{EcoPassport, EcoPassportId, EcoPassportPatch, NewEcoPassport};
use crate::identity::{Profile, ProfileId, ProfilePatch, UserRole};

pub const PROFILES: &str = "profiles";
pub const CREDENTIALS: &str = "profile_qr_codes";
pub const ECO_PASSPORTS: &str = "eco_passports";

/// Adapter-level failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// Connectivity, pool exhaustion, timeouts.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A row could not be decoded into its record type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Unique key already taken (insert-only paths).
    #[error("{table}: key {key} already present")]
    Conflict { table: &'static str, key: String },

    /// Update addressed a primary key that does not exist.
    #[error("{table}: no row for key {key}")]
    Missing { table: &'static str, key: String },

    /// Row violates a store-side check constraint.
    #[error("rejected by store: {0}")]
    Rejected(String),

    /// Owner foreign key points at no profile.
    #[error("no profile {0}")]
    UnknownOwner(ProfileId),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RecordStore: Send + Sync {
    // ==================== Profiles ====================

    async fn get_profile(&self, id: &ProfileId) -> StoreResult<Option<Profile>>;

    /// All profiles, optionally filtered by role, ordered by creation time.
    async fn list_profiles(&self, role: Option<UserRole>) -> StoreResult<Vec<Profile>>;

    /// Insert a profile if its id is free. An existing row is returned
    /// unchanged; role, rating and the verified flag are never overwritten
    /// here.
    async fn register_profile(&self, profile: &Profile) -> StoreResult<Profile>;

    async fn update_profile(&self, id: &ProfileId, patch: &ProfilePatch) -> StoreResult<Profile>;

    /// Remove a profile together with its credential and EcoPassport.
    /// Returns whether a profile was removed.
    async fn delete_profile(&self, id: &ProfileId) -> StoreResult<bool>;

    // ==================== Credentials ====================

    async fn get_credential(&self, profile_id: &ProfileId) -> StoreResult<Option<Credential>>;

    /// Atomic upsert keyed by `profile_id`: creates the row or overwrites its
    /// payload in place, keeping `id` and `created_at`.
    async fn upsert_credential(
        &self,
        profile_id: &ProfileId,
        payload: &CredentialPayload,
    ) -> StoreResult<Credential>;

    /// Atomic insert-if-absent keyed by `profile_id`. When a credential
    /// already exists it is returned untouched and `payload` is discarded.
    async fn insert_credential(
        &self,
        profile_id: &ProfileId,
        payload: &CredentialPayload,
    ) -> StoreResult<Credential>;

    // ==================== EcoPassports ====================

    async fn get_eco_passport(&self, id: &EcoPassportId) -> StoreResult<Option<EcoPassport>>;

    async fn get_eco_passport_by_farmer(
        &self,
        farmer_id: &ProfileId,
    ) -> StoreResult<Option<EcoPassport>>;

    /// Insert-only; `Conflict` when the farmer already owns a record.
    async fn insert_eco_passport(&self, record: &NewEcoPassport) -> StoreResult<EcoPassport>;

    /// Merge the provided fields; `Missing` when `id` does not exist and
    /// `Rejected` when the merged row breaks a record rule.
    async fn update_eco_passport(
        &self,
        id: &EcoPassportId,
        patch: &EcoPassportPatch,
    ) -> StoreResult<EcoPassport>;
}
