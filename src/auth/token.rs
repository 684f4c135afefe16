//! Device token (JWT) and its decoded payload.

use base64::Engine;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::types::Provider;
use crate::{Error, Result};

/// Serde adapter for secrets that round-trip through a credential store.
pub(crate) mod secret_string {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(secret.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
        String::deserialize(deserializer).map(SecretString::from)
    }
}

/// Signed device token issued by the proxy backend.
///
/// Immutable once issued. Expiry is absolute, in epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireDeviceToken")]
pub struct DeviceToken {
    #[serde(with = "secret_string")]
    token: SecretString,
    expires_at: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDeviceToken {
    token: String,
    expires_at: i64,
}

impl TryFrom<WireDeviceToken> for DeviceToken {
    type Error = Error;

    fn try_from(wire: WireDeviceToken) -> Result<Self> {
        DeviceToken::new(wire.token, wire.expires_at)
    }
}

impl PartialEq for DeviceToken {
    fn eq(&self, other: &Self) -> bool {
        self.expires_at == other.expires_at
            && self.token.expose_secret() == other.token.expose_secret()
    }
}

impl Eq for DeviceToken {}

impl DeviceToken {
    /// Fails with [`Error::Config`] on an empty token or a non-positive expiry.
    pub fn new(token: impl Into<String>, expires_at_ms: i64) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(Error::config("device token is empty"));
        }
        if expires_at_ms <= 0 {
            return Err(Error::config(format!(
                "device token expiry must be positive, got {}",
                expires_at_ms
            )));
        }
        Ok(Self {
            token: SecretString::from(token),
            expires_at: expires_at_ms,
        })
    }

    /// The raw `header.payload.signature` string.
    pub fn as_str(&self) -> &str {
        self.token.expose_secret()
    }

    /// Absolute expiry in epoch milliseconds.
    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at
    }

    /// Absolute expiry as a timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expires_at)
    }

    /// Check if the token is expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }

    /// Expired strictly after `expires_at`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }

    /// Decode the embedded payload. The signature is not verified here.
    pub fn payload(&self) -> Result<TokenPayload> {
        TokenPayload::decode(self.token.expose_secret())
    }
}

/// Claims embedded in a [`DeviceToken`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    #[serde(with = "secret_string")]
    pub session_token: SecretString,
    #[serde(with = "secret_string")]
    pub partial_key: SecretString,
    #[serde(default)]
    pub service_id: String,
    pub provider: Provider,
    #[serde(default)]
    pub device_fingerprint: String,
    #[serde(default)]
    pub project_id: String,
    /// Issued-at, epoch seconds.
    #[serde(default)]
    pub iat: i64,
    /// Expiry, epoch seconds.
    pub exp: i64,
}

impl TokenPayload {
    /// Decode the middle segment of a `header.payload.signature` token.
    pub fn decode(token: &str) -> Result<Self> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(Error::config(format!(
                "device token must have 3 segments, found {}",
                segments.len()
            )));
        }

        let bytes = decode_segment(segments[1])?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::config(format!("device token payload is not valid JSON: {}", e)))
    }

    /// Session expiry in epoch milliseconds.
    pub fn expires_at_ms(&self) -> i64 {
        self.exp.saturating_mul(1000)
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    let engine = if segment.ends_with('=') {
        &URL_SAFE
    } else {
        &URL_SAFE_NO_PAD
    };
    engine
        .decode(segment)
        .map_err(|e| Error::config(format!("device token payload is not base64url: {}", e)))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn future_exp() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[test]
    fn test_decode_payload() {
        let token = device_token("openai", "sess-1", future_exp());
        let payload = token.payload().unwrap();
        assert_eq!(payload.session_token.expose_secret(), "sess-1");
        assert_eq!(payload.partial_key.expose_secret(), "pk-sess-1");
        assert_eq!(payload.provider, Provider::OpenAi);
        assert_eq!(payload.project_id, "proj-1");
    }

    #[test]
    fn test_padded_payload_segment() {
        let payload = URL_SAFE.encode(claims("groq", "s", future_exp()).to_string());
        let token = format!("h.{}.s", payload);
        assert!(TokenPayload::decode(&token).is_ok());
    }

    #[test]
    fn test_wrong_segment_count() {
        let err = TokenPayload::decode("only.two").unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("3 segments"));
    }

    #[test]
    fn test_invalid_base64() {
        let err = TokenPayload::decode("a.!!!.c").unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_undecodable_payload() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"hello":"world"}"#);
        let err = TokenPayload::decode(&format!("a.{}.c", payload)).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_expiry() {
        let token = DeviceToken::new("a.b.c", 1_000).unwrap();
        assert!(token.is_expired());
        assert!(!token.is_expired_at(1_000));
        assert!(token.is_expired_at(1_001));
    }

    #[test]
    fn test_rejects_non_positive_expiry() {
        assert!(DeviceToken::new("a.b.c", 0).is_err());
        assert!(DeviceToken::new("", 10).is_err());
    }

    #[test]
    fn test_wire_format() {
        let token: DeviceToken =
            serde_json::from_str(r#"{"token":"a.b.c","expiresAt":1893456000000}"#).unwrap();
        assert_eq!(token.expires_at_ms(), 1_893_456_000_000);
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["token"], "a.b.c");
        assert_eq!(serde_json::from_value::<DeviceToken>(json).unwrap(), token);
        assert!(serde_json::from_str::<DeviceToken>(r#"{"token":"a.b.c","expiresAt":0}"#).is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let token = device_token("openai", "super-secret", future_exp());
        let debug = format!("{:?}", token);
        assert!(!debug.contains(token.as_str()));
        let payload = format!("{:?}", token.payload().unwrap());
        assert!(!payload.contains("super-secret"));
        assert!(!payload.contains("pk-super-secret"));
    }
}
