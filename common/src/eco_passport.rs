use std::fmt;

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TrustError, TrustResult};
use crate::identity::ProfileId;

/// Certification every new passport starts with.
pub const DEFAULT_CERTIFICATION: &str = "Organic Farming";
pub const DEFAULT_SUSTAINABILITY_SCORE: f64 = 7.5;
/// kg CO2e.
pub const DEFAULT_CARBON_FOOTPRINT: f64 = 450.0;
/// Litres.
pub const DEFAULT_WATER_USAGE: f64 = 2500.0;
/// Kilometres.
pub const DEFAULT_TRANSPORT_DISTANCE: f64 = 75.0;
/// Months between harvest and expiry on a defaulted passport.
pub const DEFAULT_SHELF_LIFE_MONTHS: u32 = 12;

pub const MAX_SUSTAINABILITY_SCORE: f64 = 10.0;

/// Store-assigned EcoPassport identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EcoPassportId(pub String);

impl fmt::Display for EcoPassportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sustainability record owned by a farmer profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcoPassport {
    pub id: EcoPassportId,
    pub farmer_id: ProfileId,
    pub product_id: Option<String>,
    pub certifications: Vec<String>,
    /// 0 to 10.
    pub sustainability_score: f64,
    pub carbon_footprint: f64,
    pub water_usage: f64,
    pub transport_distance: f64,
    pub harvest_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub qr_code_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EcoPassport {
    /// Record rules a stored row must satisfy after any merge.
    pub fn validate(&self) -> TrustResult<()> {
        validate_certifications(&self.certifications)?;
        validate_score(self.sustainability_score)?;
        validate_metric("carbonFootprint", self.carbon_footprint)?;
        validate_metric("waterUsage", self.water_usage)?;
        validate_metric("transportDistance", self.transport_distance)?;
        validate_dates(self.harvest_date, self.expiry_date)
    }

    /// Merge a partial update. Fields absent from `patch` are untouched.
    pub fn apply(&mut self, patch: &EcoPassportPatch) {
        if let Some(product_id) = &patch.product_id {
            self.product_id = Some(product_id.clone());
        }
        if let Some(certifications) = &patch.certifications {
            self.certifications = certifications.clone();
        }
        if let Some(score) = patch.sustainability_score {
            self.sustainability_score = score;
        }
        if let Some(carbon) = patch.carbon_footprint {
            self.carbon_footprint = carbon;
        }
        if let Some(water) = patch.water_usage {
            self.water_usage = water;
        }
        if let Some(distance) = patch.transport_distance {
            self.transport_distance = distance;
        }
        if let Some(harvest) = patch.harvest_date {
            self.harvest_date = harvest;
        }
        if let Some(expiry) = patch.expiry_date {
            self.expiry_date = expiry;
        }
        if let Some(url) = &patch.qr_code_url {
            self.qr_code_url = Some(url.clone());
        }
    }
}

/// Caller-supplied overrides for a new passport. Anything left `None` gets
/// the documented default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct EcoPassportDraft {
    pub product_id: Option<String>,
    pub certifications: Option<Vec<String>>,
    pub sustainability_score: Option<f64>,
    pub carbon_footprint: Option<f64>,
    pub water_usage: Option<f64>,
    pub transport_distance: Option<f64>,
    pub harvest_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub qr_code_url: Option<String>,
}

impl EcoPassportDraft {
    /// Fill in defaults relative to `now` and validate the result.
    pub fn into_record(self, farmer_id: ProfileId, now: DateTime<Utc>) -> TrustResult<NewEcoPassport> {
        let harvest_date = self.harvest_date.unwrap_or(now);
        let expiry_date = self
            .expiry_date
            .unwrap_or_else(|| default_expiry(harvest_date.max(now)));
        let record = NewEcoPassport {
            farmer_id,
            product_id: self.product_id,
            certifications: self
                .certifications
                .unwrap_or_else(|| vec![DEFAULT_CERTIFICATION.to_string()]),
            sustainability_score: self
                .sustainability_score
                .unwrap_or(DEFAULT_SUSTAINABILITY_SCORE),
            carbon_footprint: self.carbon_footprint.unwrap_or(DEFAULT_CARBON_FOOTPRINT),
            water_usage: self.water_usage.unwrap_or(DEFAULT_WATER_USAGE),
            transport_distance: self
                .transport_distance
                .unwrap_or(DEFAULT_TRANSPORT_DISTANCE),
            harvest_date,
            expiry_date,
            qr_code_url: self.qr_code_url,
        };
        record.validate()?;
        Ok(record)
    }
}

fn default_expiry(from: DateTime<Utc>) -> DateTime<Utc> {
    from.checked_add_months(Months::new(DEFAULT_SHELF_LIFE_MONTHS))
        .unwrap_or(from + Duration::days(365))
}

/// A fully populated row ready for insertion; the store assigns `id` and
/// timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEcoPassport {
    pub farmer_id: ProfileId,
    pub product_id: Option<String>,
    pub certifications: Vec<String>,
    pub sustainability_score: f64,
    pub carbon_footprint: f64,
    pub water_usage: f64,
    pub transport_distance: f64,
    pub harvest_date: DateTime<Utc>,
    pub expiry_date: DateTime<Utc>,
    pub qr_code_url: Option<String>,
}

impl NewEcoPassport {
    pub fn validate(&self) -> TrustResult<()> {
        validate_certifications(&self.certifications)?;
        validate_score(self.sustainability_score)?;
        validate_metric("carbonFootprint", self.carbon_footprint)?;
        validate_metric("waterUsage", self.water_usage)?;
        validate_metric("transportDistance", self.transport_distance)?;
        validate_dates(self.harvest_date, self.expiry_date)
    }

    pub fn into_passport(self, id: EcoPassportId, now: DateTime<Utc>) -> EcoPassport {
        EcoPassport {
            id,
            farmer_id: self.farmer_id,
            product_id: self.product_id,
            certifications: self.certifications,
            sustainability_score: self.sustainability_score,
            carbon_footprint: self.carbon_footprint,
            water_usage: self.water_usage,
            transport_distance: self.transport_distance,
            harvest_date: self.harvest_date,
            expiry_date: self.expiry_date,
            qr_code_url: self.qr_code_url,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update. `None` means "leave as is".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct EcoPassportPatch {
    pub product_id: Option<String>,
    pub certifications: Option<Vec<String>>,
    pub sustainability_score: Option<f64>,
    pub carbon_footprint: Option<f64>,
    pub water_usage: Option<f64>,
    pub transport_distance: Option<f64>,
    pub harvest_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub qr_code_url: Option<String>,
}

impl EcoPassportPatch {
    pub fn qr_code(url: impl Into<String>) -> Self {
        Self {
            qr_code_url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn touches_dates(&self) -> bool {
        self.harvest_date.is_some() || self.expiry_date.is_some()
    }

    /// Per-field checks. Date ordering needs the stored record when only one
    /// side is provided, see [`EcoPassportPatch::validate_against`].
    pub fn validate_fields(&self) -> TrustResult<()> {
        if let Some(certifications) = &self.certifications {
            validate_certifications(certifications)?;
        }
        if let Some(score) = self.sustainability_score {
            validate_score(score)?;
        }
        if let Some(v) = self.carbon_footprint {
            validate_metric("carbonFootprint", v)?;
        }
        if let Some(v) = self.water_usage {
            validate_metric("waterUsage", v)?;
        }
        if let Some(v) = self.transport_distance {
            validate_metric("transportDistance", v)?;
        }
        if let Some(url) = &self.qr_code_url {
            if url.trim().is_empty() {
                return Err(TrustError::invalid_argument("qrCodeUrl must not be blank"));
            }
        }
        if let (Some(harvest), Some(expiry)) = (self.harvest_date, self.expiry_date) {
            validate_dates(harvest, expiry)?;
        }
        Ok(())
    }

    /// Check date ordering after merging with `current`.
    pub fn validate_against(&self, current: &EcoPassport) -> TrustResult<()> {
        validate_dates(
            self.harvest_date.unwrap_or(current.harvest_date),
            self.expiry_date.unwrap_or(current.expiry_date),
        )
    }
}

fn validate_certifications(certifications: &[String]) -> TrustResult<()> {
    if certifications.iter().any(|c| c.trim().is_empty()) {
        return Err(TrustError::invalid_argument(
            "certification names must not be blank",
        ));
    }
    Ok(())
}

fn validate_score(score: f64) -> TrustResult<()> {
    if !(0.0..=MAX_SUSTAINABILITY_SCORE).contains(&score) {
        return Err(TrustError::invalid_argument(format!(
            "sustainabilityScore {score} outside 0..={MAX_SUSTAINABILITY_SCORE}"
        )));
    }
    Ok(())
}

fn validate_metric(name: &str, value: f64) -> TrustResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(TrustError::invalid_argument(format!(
            "{name} must be a non-negative number, got {value}"
        )));
    }
    Ok(())
}

fn validate_dates(harvest: DateTime<Utc>, expiry: DateTime<Utc>) -> TrustResult<()> {
    if expiry < harvest {
        return Err(TrustError::invalid_argument(format!(
            "expiryDate {expiry} is before harvestDate {harvest}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn farmer() -> ProfileId {
        ProfileId::parse("f1").unwrap()
    }

    fn jan_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn empty_draft_gets_documented_defaults() {
        let record = EcoPassportDraft::default()
            .into_record(farmer(), jan_first())
            .unwrap();
        assert_eq!(record.certifications, vec!["Organic Farming".to_string()]);
        assert_eq!(record.sustainability_score, 7.5);
        assert_eq!(record.carbon_footprint, 450.0);
        assert_eq!(record.water_usage, 2500.0);
        assert_eq!(record.transport_distance, 75.0);
        assert_eq!(record.harvest_date, jan_first());
        assert_eq!(
            record.expiry_date,
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(record.qr_code_url, None);
    }

    #[test]
    fn zero_override_is_kept_not_defaulted() {
        let record = EcoPassportDraft {
            carbon_footprint: Some(0.0),
            certifications: Some(vec![]),
            ..Default::default()
        }
        .into_record(farmer(), jan_first())
        .unwrap();
        assert_eq!(record.carbon_footprint, 0.0);
        assert!(record.certifications.is_empty());
    }

    #[test]
    fn future_harvest_without_expiry_stays_ordered() {
        let harvest = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let record = EcoPassportDraft {
            harvest_date: Some(harvest),
            ..Default::default()
        }
        .into_record(farmer(), jan_first())
        .unwrap();
        assert!(record.expiry_date > record.harvest_date);
    }

    #[test]
    fn draft_validation_rejects_out_of_range_values() {
        let bad = [
            EcoPassportDraft {
                sustainability_score: Some(10.5),
                ..Default::default()
            },
            EcoPassportDraft {
                water_usage: Some(-1.0),
                ..Default::default()
            },
            EcoPassportDraft {
                transport_distance: Some(f64::NAN),
                ..Default::default()
            },
            EcoPassportDraft {
                harvest_date: Some(jan_first()),
                expiry_date: Some(jan_first() - Duration::days(1)),
                ..Default::default()
            },
            EcoPassportDraft {
                certifications: Some(vec!["Fair Trade".into(), " ".into()]),
                ..Default::default()
            },
        ];
        for draft in bad {
            let err = draft.clone().into_record(farmer(), jan_first()).unwrap_err();
            assert_eq!(err.code(), "invalid_argument", "draft {draft:?}");
        }
    }

    #[test]
    fn patch_merges_only_given_fields() {
        let mut passport = EcoPassportDraft::default()
            .into_record(farmer(), jan_first())
            .unwrap()
            .into_passport(EcoPassportId("e1".into()), jan_first());
        passport.apply(&EcoPassportPatch {
            sustainability_score: Some(9.0),
            ..Default::default()
        });
        assert_eq!(passport.sustainability_score, 9.0);
        assert_eq!(passport.water_usage, DEFAULT_WATER_USAGE);
        assert_eq!(passport.certifications, vec![DEFAULT_CERTIFICATION.to_string()]);
    }

    #[test]
    fn single_date_patch_is_checked_against_current() {
        let passport = EcoPassportDraft::default()
            .into_record(farmer(), jan_first())
            .unwrap()
            .into_passport(EcoPassportId("e1".into()), jan_first());
        let late_harvest = EcoPassportPatch {
            harvest_date: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(late_harvest.validate_fields().is_ok());
        assert!(late_harvest.validate_against(&passport).is_err());
    }

    #[test]
    fn patch_rejects_unknown_fields() {
        let parsed: Result<EcoPassportPatch, _> = serde_json::from_str(r#"{"farmerId":"f2"}"#);
        assert!(parsed.is_err());
        let parsed: EcoPassportPatch = serde_json::from_str(r#"{"waterUsage":1200}"#).unwrap();
        assert_eq!(parsed.water_usage, Some(1200.0));
    }
}
