use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TrustError, TrustResult};
use crate::identity::ProfileId;

/// Store-assigned credential identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialId(pub String);

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path segment that precedes the profile id in every view URL.
const PROFILE_PATH: &str = "/profile/";

/// Content of a profile QR code.
///
/// Serialized as `{"profileId", "timestamp", "viewUrl"}`; the JSON string is
/// exactly what the QR surface encodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPayload {
    pub profile_id: ProfileId,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub view_url: String,
}

fn serialize_timestamp<S: serde::Serializer>(
    ts: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Wire shape before validation. Every field is required.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPayload {
    profile_id: String,
    timestamp: String,
    view_url: String,
}

impl CredentialPayload {
    /// The exact string placed in the QR code.
    pub fn encode(&self) -> String {
        // Only strings and a timestamp; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse and validate an encoded payload.
    ///
    /// Missing or mistyped fields, a malformed id, a non-RFC 3339 timestamp,
    /// or a `viewUrl` that does not point at the same profile are all
    /// rejected as [`TrustError::InvalidCredential`].
    pub fn decode(raw: &str) -> TrustResult<Self> {
        let parsed: RawPayload = serde_json::from_str(raw)
            .map_err(|e| TrustError::invalid_credential(format!("payload: {e}")))?;

        let profile_id = ProfileId::parse(&parsed.profile_id)
            .map_err(|e| TrustError::invalid_credential(format!("profileId: {e}")))?;
        let timestamp = DateTime::parse_from_rfc3339(&parsed.timestamp)
            .map_err(|e| TrustError::invalid_credential(format!("timestamp: {e}")))?
            .with_timezone(&Utc);
        let linked = profile_id_from_link(&parsed.view_url)?;
        if linked != profile_id {
            return Err(TrustError::invalid_credential(format!(
                "viewUrl points at {linked}, payload names {profile_id}"
            )));
        }

        Ok(Self {
            profile_id,
            timestamp,
            view_url: parsed.view_url,
        })
    }
}

/// Extract the profile id from an absolute `http(s)://host/.../profile/{id}`
/// link. Query string and fragment are ignored.
pub fn profile_id_from_link(link: &str) -> TrustResult<ProfileId> {
    let rest = link
        .strip_prefix("https://")
        .or_else(|| link.strip_prefix("http://"))
        .ok_or_else(|| TrustError::invalid_credential("link is not an absolute http(s) URL"))?;
    let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
    if host.is_empty() {
        return Err(TrustError::invalid_credential("link has no host"));
    }
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = format!("/{path}");
    let (_, id) = path
        .rsplit_once(PROFILE_PATH)
        .ok_or_else(|| TrustError::invalid_credential("link is not a profile link"))?;
    ProfileId::parse(id.trim_end_matches('/'))
        .map_err(|e| TrustError::invalid_credential(format!("link: {e}")))
}

/// Persisted QR record, at most one per profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: CredentialId,
    pub profile_id: ProfileId,
    pub payload: CredentialPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Encoded payload, ready for QR rendering.
    pub fn qr_data(&self) -> String {
        self.payload.encode()
    }
}

/// Builds credential payloads against a configured public origin.
#[derive(Debug, Clone)]
pub struct CredentialIssuer {
    origin: String,
}

impl CredentialIssuer {
    /// `origin` must be an absolute http(s) URL such as
    /// `https://agritrust.example`; a trailing `/` is dropped.
    pub fn new(origin: impl Into<String>) -> TrustResult<Self> {
        let origin = origin.into();
        let trimmed = origin.trim().trim_end_matches('/');
        let host = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .ok_or_else(|| {
                TrustError::invalid_argument(format!("origin {origin:?} is not an http(s) URL"))
            })?;
        if host.is_empty() || host.starts_with('/') || host.contains(['?', '#', ' ']) {
            return Err(TrustError::invalid_argument(format!(
                "origin {origin:?} is malformed"
            )));
        }
        Ok(Self {
            origin: trimmed.to_string(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Public page for a profile.
    pub fn view_url(&self, profile_id: &ProfileId) -> String {
        format!("{}{PROFILE_PATH}{profile_id}", self.origin)
    }

    pub fn issue(&self, profile_id: &ProfileId) -> CredentialPayload {
        self.issue_at(profile_id, Utc::now())
    }

    pub fn issue_at(&self, profile_id: &ProfileId, at: DateTime<Utc>) -> CredentialPayload {
        CredentialPayload {
            profile_id: profile_id.clone(),
            timestamp: at,
            view_url: self.view_url(profile_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn issuer() -> CredentialIssuer {
        CredentialIssuer::new("https://agritrust.example/").unwrap()
    }

    fn pid(s: &str) -> ProfileId {
        ProfileId::parse(s).unwrap()
    }

    #[test]
    fn issue_builds_view_url_from_origin() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let payload = issuer().issue_at(&pid("u1"), at);
        assert_eq!(payload.view_url, "https://agritrust.example/profile/u1");
        assert_eq!(
            payload.encode(),
            r#"{"profileId":"u1","timestamp":"2024-01-01T00:00:00.000Z","viewUrl":"https://agritrust.example/profile/u1"}"#
        );
    }

    #[test]
    fn encoded_payload_decodes_to_same_profile() {
        let payload = issuer().issue(&pid("f1"));
        let decoded = CredentialPayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn decode_accepts_second_precision_timestamps() {
        let raw = r#"{"profileId":"u1","timestamp":"2024-01-01T00:00:00Z","viewUrl":"https://x/profile/u1"}"#;
        let payload = CredentialPayload::decode(raw).unwrap();
        assert_eq!(payload.profile_id, pid("u1"));
        assert_eq!(payload.timestamp, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn decode_rejects_missing_or_mistyped_fields() {
        let cases = [
            r#"{"profileId":"u1","timestamp":"2024-01-01T00:00:00Z"}"#,
            r#"{"profileId":7,"timestamp":"2024-01-01T00:00:00Z","viewUrl":"https://x/profile/7"}"#,
            r#"{"profileId":"u1","timestamp":"yesterday","viewUrl":"https://x/profile/u1"}"#,
            r#"{"profileId":"","timestamp":"2024-01-01T00:00:00Z","viewUrl":"https://x/profile/"}"#,
            r#"{"profileId":"u1","timestamp":"2024-01-01T00:00:00Z","viewUrl":"/profile/u1"}"#,
            r#"{"profileId":"u1","timestamp":"2024-01-01T00:00:00Z","viewUrl":"https://x/profile/u2"}"#,
            "[]",
        ];
        for raw in cases {
            let err = CredentialPayload::decode(raw).unwrap_err();
            assert_eq!(err.code(), "invalid_credential", "input {raw}");
        }
    }

    #[test]
    fn link_parsing_ignores_query_and_trailing_slash() {
        assert_eq!(
            profile_id_from_link("https://x.example/app/profile/u9/?ref=qr#top").unwrap(),
            pid("u9")
        );
        assert!(profile_id_from_link("https:///profile/u9").is_err());
        assert!(profile_id_from_link("https://x.example/farmers/u9").is_err());
        assert!(profile_id_from_link("ftp://x.example/profile/u9").is_err());
    }

    #[test]
    fn issuer_rejects_bad_origins() {
        for origin in ["", "agritrust.example", "https://", "https://x.example?a=1"] {
            assert!(CredentialIssuer::new(origin).is_err(), "origin {origin:?}");
        }
        assert_eq!(
            CredentialIssuer::new("http://localhost:8080").unwrap().origin(),
            "http://localhost:8080"
        );
    }
}
