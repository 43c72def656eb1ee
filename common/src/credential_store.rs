use std::sync::Arc;

use tracing::{debug, info};

use crate::credential::{Credential, CredentialIssuer};
use crate::error::TrustResult;
use crate::identity::ProfileId;
use crate::record_store::RecordStore;

/// Owner-keyed credential persistence: at most one credential per profile.
#[derive(Clone)]
pub struct CredentialStore {
    store: Arc<dyn RecordStore>,
    issuer: CredentialIssuer,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn RecordStore>, issuer: CredentialIssuer) -> Self {
        Self { store, issuer }
    }

    pub fn issuer(&self) -> &CredentialIssuer {
        &self.issuer
    }

    /// `None` when the profile has no credential yet.
    pub async fn fetch(&self, profile_id: &ProfileId) -> TrustResult<Option<Credential>> {
        let credential = self.store.get_credential(profile_id).await?;
        debug!(%profile_id, found = credential.is_some(), "credential fetch");
        Ok(credential)
    }

    /// Issue a fresh payload and upsert it on the profile key. Concurrent
    /// calls for one profile race at the store; the last write wins.
    pub async fn regenerate(&self, profile_id: &ProfileId) -> TrustResult<Credential> {
        let payload = self.issuer.issue(profile_id);
        let credential = self.store.upsert_credential(profile_id, &payload).await?;
        info!(
            %profile_id,
            credential_id = %credential.id,
            issued_at = %payload.timestamp,
            "credential issued"
        );
        Ok(credential)
    }

    /// Get-or-create. An existing credential is returned unchanged without a
    /// write; concurrent callers that both miss settle on the first insert.
    pub async fn ensure(&self, profile_id: &ProfileId) -> TrustResult<Credential> {
        if let Some(existing) = self.fetch(profile_id).await? {
            return Ok(existing);
        }
        let payload = self.issuer.issue(profile_id);
        let credential = self.store.insert_credential(profile_id, &payload).await?;
        if credential.payload == payload {
            info!(%profile_id, credential_id = %credential.id, "credential issued");
        }
        Ok(credential)
    }
}
