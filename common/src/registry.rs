use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::eco_passport::{EcoPassport, EcoPassportDraft, EcoPassportId, EcoPassportPatch};
use crate::error::{TrustError, TrustResult};
use crate::identity::ProfileId;
use crate::record_store::{RecordStore, ECO_PASSPORTS};

/// Farmer-keyed EcoPassport lifecycle. One record per farmer, created with
/// defaults, edited by partial update.
#[derive(Clone)]
pub struct EcoPassportRegistry {
    store: Arc<dyn RecordStore>,
}

impl EcoPassportRegistry {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn fetch(&self, id: &EcoPassportId) -> TrustResult<Option<EcoPassport>> {
        Ok(self.store.get_eco_passport(id).await?)
    }

    pub async fn fetch_by_farmer(&self, farmer_id: &ProfileId) -> TrustResult<Option<EcoPassport>> {
        let passport = self.store.get_eco_passport_by_farmer(farmer_id).await?;
        debug!(%farmer_id, found = passport.is_some(), "eco passport fetch");
        Ok(passport)
    }

    /// Insert a new passport; fields missing from `overrides` take defaults.
    ///
    /// Fails with `AlreadyExists` when the farmer has one, leaving it as is.
    /// The owner must be an existing farmer profile.
    pub async fn create(
        &self,
        farmer_id: &ProfileId,
        overrides: EcoPassportDraft,
    ) -> TrustResult<EcoPassport> {
        let owner = self
            .store
            .get_profile(farmer_id)
            .await?
            .ok_or_else(|| TrustError::ProfileNotFound(farmer_id.clone()))?;
        if !owner.is_farmer() {
            return Err(TrustError::invalid_argument(format!(
                "profile {farmer_id} is a {}, only farmers hold an EcoPassport",
                owner.role
            )));
        }

        let record = overrides.into_record(farmer_id.clone(), Utc::now())?;
        let passport = self.store.insert_eco_passport(&record).await?;
        info!(%farmer_id, passport_id = %passport.id, "eco passport created");
        Ok(passport)
    }

    /// Get-or-create with defaults.
    ///
    /// A concurrent `ensure` that loses the insert race reads back the
    /// winner's record instead of failing.
    pub async fn ensure(&self, farmer_id: &ProfileId) -> TrustResult<EcoPassport> {
        if let Some(existing) = self.fetch_by_farmer(farmer_id).await? {
            return Ok(existing);
        }
        match self.create(farmer_id, EcoPassportDraft::default()).await {
            Err(TrustError::AlreadyExists { .. }) => self
                .fetch_by_farmer(farmer_id)
                .await?
                .ok_or_else(|| TrustError::NotFound {
                    kind: ECO_PASSPORTS,
                    key: farmer_id.to_string(),
                }),
            other => other,
        }
    }

    /// Merge the provided fields into an existing passport.
    pub async fn update(
        &self,
        id: &EcoPassportId,
        patch: &EcoPassportPatch,
    ) -> TrustResult<EcoPassport> {
        patch.validate_fields()?;
        if patch.harvest_date.is_some() != patch.expiry_date.is_some() {
            let current = self
                .store
                .get_eco_passport(id)
                .await?
                .ok_or_else(|| TrustError::NotFound {
                    kind: ECO_PASSPORTS,
                    key: id.to_string(),
                })?;
            patch.validate_against(&current)?;
        }
        let passport = self.store.update_eco_passport(id, patch).await?;
        info!(passport_id = %id, "eco passport updated");
        Ok(passport)
    }

    /// Attach the rendered QR image location. Kept apart from `update` since
    /// the QR issuance path calls it on its own.
    pub async fn link_qr_code(&self, id: &EcoPassportId, qr_url: &str) -> TrustResult<EcoPassport> {
        let qr_url = qr_url.trim();
        if qr_url.is_empty() {
            return Err(TrustError::invalid_argument("qr code url is empty"));
        }
        let passport = self
            .store
            .update_eco_passport(id, &EcoPassportPatch::qr_code(qr_url))
            .await?;
        info!(passport_id = %id, "qr code linked");
        Ok(passport)
    }
}
