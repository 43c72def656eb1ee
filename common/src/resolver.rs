//! Read path for scanned or typed credentials.
//!
//! Every piece of untrusted input (QR content, shared link, typed id) enters
//! through [`CredentialResolver::resolve`]. Input is classified and validated
//! by [`ScannedCode::parse`] before any store lookup happens.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::credential::{profile_id_from_link, CredentialPayload};
use crate::eco_passport::EcoPassport;
use crate::error::{TrustError, TrustResult};
use crate::identity::{Profile, ProfileId};
use crate::record_store::RecordStore;

/// QR codes top out around 3 KB; anything larger is not one of ours.
pub const MAX_INPUT_LEN: usize = 4096;

/// How the identifier reached the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryMode {
    /// Full JSON payload decoded from a QR code.
    Payload,
    /// Shared profile link (the payload's `viewUrl`).
    Link,
    /// Profile id typed in by hand.
    ManualId,
}

/// Classified, validated resolver input.
#[derive(Debug, Clone, PartialEq)]
pub enum ScannedCode {
    Payload(CredentialPayload),
    Link(ProfileId),
    ManualId(ProfileId),
}

impl ScannedCode {
    pub fn parse(raw: &str) -> TrustResult<Self> {
        if raw.len() > MAX_INPUT_LEN {
            return Err(TrustError::invalid_credential(format!(
                "input longer than {MAX_INPUT_LEN} bytes"
            )));
        }
        let input = raw.trim();
        if input.is_empty() {
            return Err(TrustError::invalid_credential("input is empty"));
        }

        if input.starts_with('{') {
            return CredentialPayload::decode(input).map(ScannedCode::Payload);
        }
        if input.starts_with("http://") || input.starts_with("https://") {
            return profile_id_from_link(input).map(ScannedCode::Link);
        }
        ProfileId::parse(input)
            .map(ScannedCode::ManualId)
            .map_err(|e| TrustError::invalid_credential(format!("not a payload, link, or id: {e}")))
    }

    pub fn profile_id(&self) -> &ProfileId {
        match self {
            ScannedCode::Payload(payload) => &payload.profile_id,
            ScannedCode::Link(id) | ScannedCode::ManualId(id) => id,
        }
    }

    pub fn entry_mode(&self) -> EntryMode {
        match self {
            ScannedCode::Payload(_) => EntryMode::Payload,
            ScannedCode::Link(_) => EntryMode::Link,
            ScannedCode::ManualId(_) => EntryMode::ManualId,
        }
    }

    /// Issuance time, only known for full payloads.
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        match self {
            ScannedCode::Payload(payload) => Some(payload.timestamp),
            _ => None,
        }
    }
}

/// What a verifier sees after scanning a code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub profile: Profile,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eco_passport: Option<EcoPassport>,
    /// Mirrors `profile.verified`; moderation owns this flag.
    pub trusted: bool,
    pub entry: EntryMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn RecordStore>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, raw_input: &str) -> TrustResult<VerificationResult> {
        let code = ScannedCode::parse(raw_input).inspect_err(|e| {
            warn!(error = %e, "rejected credential input");
        })?;
        let profile_id = code.profile_id();

        let profile = self
            .store
            .get_profile(profile_id)
            .await?
            .ok_or_else(|| TrustError::ProfileNotFound(profile_id.clone()))?;

        let eco_passport = if profile.is_farmer() {
            self.store.get_eco_passport_by_farmer(&profile.id).await?
        } else {
            None
        };

        debug!(
            %profile_id,
            entry = ?code.entry_mode(),
            trusted = profile.verified,
            has_passport = eco_passport.is_some(),
            "credential resolved"
        );

        Ok(VerificationResult {
            trusted: profile.verified,
            entry: code.entry_mode(),
            issued_at: code.issued_at(),
            profile,
            eco_passport,
        })
    }
}
