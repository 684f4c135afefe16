//! Credential types derived from a device token.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use super::TokenPayload;
use super::token::secret_string;
use crate::types::Provider;
use crate::{Error, Result};

/// Provider endpoint configuration issued alongside a session.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    provider: Provider,
    service_url: String,
    partial_key: SecretString,
    service_id: String,
}

impl PartialEq for ServiceConfig {
    fn eq(&self, other: &Self) -> bool {
        self.provider == other.provider
            && self.service_url == other.service_url
            && self.service_id == other.service_id
            && self.partial_key.expose_secret() == other.partial_key.expose_secret()
    }
}

impl Eq for ServiceConfig {}

impl ServiceConfig {
    /// Fails with [`Error::Config`] when any field is empty or the URL does not parse.
    pub fn new(
        provider: impl Into<Provider>,
        service_url: impl Into<String>,
        partial_key: impl Into<SecretString>,
    ) -> Result<Self> {
        let provider = provider.into();
        let service_url = service_url.into();
        let partial_key = partial_key.into();

        if provider.is_empty() {
            return Err(Error::config("service config requires a provider"));
        }
        if service_url.is_empty() {
            return Err(Error::config("service config requires a service URL"));
        }
        if partial_key.expose_secret().is_empty() {
            return Err(Error::config("service config requires a partial key"));
        }
        let url = Url::parse(&service_url)
            .map_err(|e| Error::config(format!("invalid service URL {}: {}", service_url, e)))?;
        let service_id = parse_service_id(&url, &provider).unwrap_or_default();

        Ok(Self {
            provider,
            service_url,
            partial_key,
            service_id,
        })
    }

    /// Build from a decoded token for `service_url`.
    ///
    /// When the URL carries no `{provider}-{serviceId}` segment the token's own service
    /// identifier is used instead.
    pub fn from_payload(payload: &TokenPayload, service_url: &str) -> Result<Self> {
        let mut config = Self::new(
            payload.provider.clone(),
            service_url,
            payload.partial_key.clone(),
        )?;
        if config.service_id.is_empty() {
            config.service_id = payload.service_id.clone();
        }
        Ok(config)
    }

    /// Provider this endpoint fronts.
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Full proxy URL for the service.
    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    /// Client half of the split provider key, sent as `x-partial-key`.
    pub fn partial_key(&self) -> &str {
        self.partial_key.expose_secret()
    }

    /// Service identifier, empty if neither the URL nor the token carried one.
    pub fn service_id(&self) -> &str {
        &self.service_id
    }
}

/// Find the path segment shaped `{provider}-{serviceId}` and return `serviceId`.
fn parse_service_id(url: &Url, provider: &Provider) -> Option<String> {
    let prefix = format!("{}-", provider.as_str());
    url.path_segments()?
        .filter_map(|segment| segment.strip_prefix(&prefix))
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

/// Short-lived signed session. Only ever derived from a [`TokenPayload`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(with = "secret_string")]
    session_token: SecretString,
    /// Epoch milliseconds.
    expires_at: i64,
    provider: Provider,
    #[serde(rename = "serviceURL")]
    service_url: String,
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.expires_at == other.expires_at
            && self.provider == other.provider
            && self.service_url == other.service_url
            && self.session_token.expose_secret() == other.session_token.expose_secret()
    }
}

impl Eq for Session {}

impl Session {
    pub(crate) fn from_payload(payload: &TokenPayload, service_url: &str) -> Result<Self> {
        if payload.session_token.expose_secret().is_empty() {
            return Err(Error::config("device token carries an empty session token"));
        }
        if payload.exp <= 0 {
            return Err(Error::config("device token carries no session expiry"));
        }
        Ok(Self {
            session_token: payload.session_token.clone(),
            expires_at: payload.expires_at_ms(),
            provider: payload.provider.clone(),
            service_url: service_url.to_string(),
        })
    }

    /// Session token; doubles as the HMAC key for request signatures.
    pub fn session_token(&self) -> &str {
        self.session_token.expose_secret()
    }

    /// Absolute expiry in epoch milliseconds.
    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at
    }

    /// Absolute expiry as a timestamp.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expires_at)
    }

    /// Provider the session was issued for.
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Service URL the session is bound to.
    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    /// Check if the session is expired.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }

    /// Expired strictly after `expires_at`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at
    }
}

/// Service config and session as one unit. Both halves come from the same token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    service: ServiceConfig,
    session: Session,
}

impl Credentials {
    /// Derive both halves from one decoded token.
    pub fn from_payload(payload: &TokenPayload, service_url: &str) -> Result<Self> {
        Ok(Self {
            service: ServiceConfig::from_payload(payload, service_url)?,
            session: Session::from_payload(payload, service_url)?,
        })
    }

    /// Endpoint half.
    pub fn service_config(&self) -> &ServiceConfig {
        &self.service
    }

    /// Session half.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Split into the endpoint and session halves.
    pub fn into_parts(self) -> (ServiceConfig, Session) {
        (self.service, self.session)
    }

    /// Credentials expire with their session.
    pub fn is_expired(&self) -> bool {
        self.session.is_expired()
    }

    /// Signed time until expiry; negative once expired.
    pub fn time_until_expiry(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(
            self.session.expires_at - Utc::now().timestamp_millis(),
        )
    }
}
