use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TrustError, TrustResult};

/// Longest identifier accepted from callers or scanned input.
pub const MAX_ID_LEN: usize = 128;

/// A profile's identity, assigned by the identity provider at signup.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    /// Validate an untrusted identifier.
    ///
    /// Accepts 1..=128 characters from `[A-Za-z0-9_-]`, which covers the
    /// identity provider's UUIDs as well as short test ids.
    pub fn parse(raw: &str) -> TrustResult<Self> {
        if raw.is_empty() {
            return Err(TrustError::invalid_argument("profile id is empty"));
        }
        if raw.len() > MAX_ID_LEN {
            return Err(TrustError::invalid_argument(format!(
                "profile id longer than {MAX_ID_LEN} characters"
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(TrustError::invalid_argument(format!(
                "profile id contains {bad:?}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProfileId {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Role a user can have in the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Farmer,
    Consumer,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Farmer => "farmer",
            UserRole::Consumer => "consumer",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "farmer" => Ok(UserRole::Farmer),
            "consumer" => Ok(UserRole::Consumer),
            other => Err(TrustError::invalid_argument(format!("unknown role {other:?}"))),
        }
    }
}

/// Identity record for a farmer or consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub description: String,
    pub location: String,
    /// Only meaningful for farmers, stored for everyone.
    pub speciality: String,
    pub avatar_url: String,
    pub rating: f64,
    /// Set by moderation outside this crate.
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// A fresh, unverified profile with empty optional fields.
    pub fn new(id: ProfileId, name: impl Into<String>, email: impl Into<String>, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            email: email.into(),
            role,
            description: String::new(),
            location: String::new(),
            speciality: String::new(),
            avatar_url: String::new(),
            rating: 0.0,
            verified: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_farmer(&self) -> bool {
        self.role == UserRole::Farmer
    }

    /// Apply an owner edit in place.
    pub fn apply(&mut self, patch: &ProfilePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(location) = &patch.location {
            self.location = location.clone();
        }
        if let Some(speciality) = &patch.speciality {
            self.speciality = speciality.clone();
        }
        if let Some(avatar_url) = &patch.avatar_url {
            self.avatar_url = avatar_url.clone();
        }
    }
}

/// Fields a profile owner may edit. Role, email, rating and the verified
/// flag are managed elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub speciality: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.location.is_none()
            && self.speciality.is_none()
            && self.avatar_url.is_none()
    }

    pub fn validate(&self) -> TrustResult<()> {
        match &self.name {
            Some(name) if name.trim().is_empty() => {
                Err(TrustError::invalid_argument("profile name must not be blank"))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_uuid_and_short_ids() {
        assert!(ProfileId::parse("u1").is_ok());
        assert!(ProfileId::parse("3f2b8c1e-9a4d-4e6f-b1c2-0d9e8f7a6b5c").is_ok());
        assert!(ProfileId::parse("farmer_42").is_ok());
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        let long = "x".repeat(MAX_ID_LEN + 1);
        for raw in ["", "not json", "a/b", "{}", "é", long.as_str()] {
            let err = ProfileId::parse(raw).unwrap_err();
            assert_eq!(err.code(), "invalid_argument", "input {raw:?}");
        }
    }

    #[test]
    fn role_round_trips_through_text() {
        for role in [UserRole::Farmer, UserRole::Consumer] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        assert!("admin".parse::<UserRole>().is_err());
        assert_eq!(serde_json::to_string(&UserRole::Farmer).unwrap(), "\"farmer\"");
    }

    #[test]
    fn patch_only_touches_provided_fields() {
        let mut profile = Profile::new(ProfileId::parse("f1").unwrap(), "Green Acres", "g@x", UserRole::Farmer);
        profile.location = "Valley".into();
        profile.apply(&ProfilePatch {
            speciality: Some("Heirloom tomatoes".into()),
            ..Default::default()
        });
        assert_eq!(profile.speciality, "Heirloom tomatoes");
        assert_eq!(profile.location, "Valley");
        assert_eq!(profile.name, "Green Acres");
    }

    #[test]
    fn blank_name_patch_is_rejected() {
        let patch = ProfilePatch {
            name: Some("  ".into()),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
        assert!(ProfilePatch::default().is_empty());
    }
}
