//! Device token exchange with the proxy backend.

use async_trait::async_trait;
use serde::Serialize;

use super::{AuthConfig, DeviceToken};
use crate::client::ErrorBody;
use crate::{Error, Result};

/// Trait for obtaining a fresh device token for a service URL.
#[async_trait]
pub trait DeviceTokenFetcher: Send + Sync {
    /// Fetcher name for debugging.
    fn name(&self) -> &str;

    /// Perform one network exchange. Implementations never retry internally.
    async fn fetch(&self, service_url: &str) -> Result<DeviceToken>;
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    #[serde(rename = "serviceURL")]
    service_url: &'a str,
    #[serde(rename = "deviceFingerprint")]
    device_fingerprint: &'a str,
}

/// Fetches device tokens from the backend's device auth endpoint.
#[derive(Debug, Clone)]
pub struct HttpTokenFetcher {
    http: reqwest::Client,
    auth_url: String,
    device_fingerprint: String,
}

impl HttpTokenFetcher {
    /// Build a fetcher with its own HTTP client using the configured timeout.
    pub fn new(config: &AuthConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self::with_http(config, http))
    }

    /// Build a fetcher over an existing HTTP client.
    pub fn with_http(config: &AuthConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            auth_url: config.auth_url.clone(),
            device_fingerprint: config.device_fingerprint.clone(),
        }
    }
}

#[async_trait]
impl DeviceTokenFetcher for HttpTokenFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(&self, service_url: &str) -> Result<DeviceToken> {
        let body = TokenRequest {
            service_url,
            device_fingerprint: &self.device_fingerprint,
        };

        let response = self
            .http
            .post(&self.auth_url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let body = ErrorBody::from_bytes(&bytes);
            tracing::warn!(
                status = status.as_u16(),
                error_code = body.error_code.as_deref().unwrap_or(""),
                "device token request rejected"
            );
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_slice::<DeviceToken>(&bytes).map_err(|e| {
            if e.is_data() {
                Error::Decoding(format!("device token response: {}", e))
            } else {
                Error::InvalidResponse(format!("device token response is not JSON: {}", e))
            }
        })
    }
}
