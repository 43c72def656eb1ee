use thiserror::Error;

use crate::identity::ProfileId;
use crate::record_store::StoreError;

/// Failure kinds surfaced by the credential and EcoPassport core.
///
/// Expected absence (no credential yet, no EcoPassport yet) is modelled as
/// `Option::None` on the fetch operations; `NotFound` is only raised where a
/// caller addressed a record that must exist (e.g. updating by id).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrustError {
    /// Structurally invalid argument (malformed id, out-of-range field).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Scanned or typed input is neither a credential payload, a profile
    /// link, nor a bare profile id.
    #[error("not a valid code: {0}")]
    InvalidCredential(String),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// Well-formed credential pointing at a profile that no longer exists.
    #[error("profile {0} not found")]
    ProfileNotFound(ProfileId),

    #[error("{kind} already exists for {key}")]
    AlreadyExists { kind: &'static str, key: String },

    /// Transport or connectivity failure in the record store. Callers retry.
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),
}

pub type TrustResult<T> = Result<T, TrustError>;

impl TrustError {
    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidCredential(_) => "invalid_credential",
            Self::NotFound { .. } => "not_found",
            Self::ProfileNotFound(_) => "profile_not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_credential(msg: impl Into<String>) -> Self {
        Self::InvalidCredential(msg.into())
    }
}

impl From<StoreError> for TrustError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::Corrupt(msg) => Self::StoreUnavailable(format!("corrupt row: {msg}")),
            StoreError::Conflict { table, key } => Self::AlreadyExists { kind: table, key },
            StoreError::Missing { table, key } => Self::NotFound { kind: table, key },
            StoreError::Rejected(msg) => Self::InvalidArgument(msg),
            StoreError::UnknownOwner(owner) => Self::ProfileNotFound(owner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_distinct_kinds() {
        let owner = ProfileId::parse("u1").unwrap();
        let cases = [
            (StoreError::Unavailable("timeout".into()), "store_unavailable"),
            (StoreError::Corrupt("bad role".into()), "store_unavailable"),
            (
                StoreError::Conflict {
                    table: "eco_passports",
                    key: "f1".into(),
                },
                "already_exists",
            ),
            (
                StoreError::Missing {
                    table: "eco_passports",
                    key: "e1".into(),
                },
                "not_found",
            ),
            (StoreError::Rejected("score check".into()), "invalid_argument"),
            (StoreError::UnknownOwner(owner), "profile_not_found"),
        ];
        for (store_err, code) in cases {
            assert_eq!(TrustError::from(store_err).code(), code);
        }
    }

    #[test]
    fn only_store_unavailable_is_retryable() {
        assert!(TrustError::StoreUnavailable("down".into()).is_retryable());
        assert!(!TrustError::InvalidCredential("x".into()).is_retryable());
        assert!(!TrustError::ProfileNotFound(ProfileId::parse("u1").unwrap()).is_retryable());
    }
}
