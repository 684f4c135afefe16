//! HMAC request signing.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use url::Url;

use crate::auth::{AuthConfig, ServiceConfig, Session};
use crate::types::Provider;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_PARTIAL_KEY: &str = "x-partial-key";
pub const HEADER_SESSION_TOKEN: &str = "x-session-token";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_DEVICE_FINGERPRINT: &str = "x-device-fingerprint";
pub const HEADER_PROVIDER: &str = "x-provider";
pub const HEADER_SIGNATURE: &str = "x-signature";
pub const HEADER_ANTHROPIC_VERSION: &str = "anthropic-version";

/// A fully signed POST, ready to hand to the transport.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: reqwest::Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl SignedRequest {
    /// Value of header `name`, if set.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Turn into a POST on `http`, ready to send.
    pub fn into_reqwest(self, http: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut req = http.request(self.method, self.url);
        for (name, value) in self.headers {
            req = req.header(name, value);
        }
        req.body(self.body)
    }
}

/// Builds signed provider requests. Holds no per-request state.
#[derive(Debug, Clone)]
pub struct RequestSigner {
    device_fingerprint: String,
    anthropic_version: String,
}

impl RequestSigner {
    pub fn new(device_fingerprint: impl Into<String>, anthropic_version: impl Into<String>) -> Self {
        Self {
            device_fingerprint: device_fingerprint.into(),
            anthropic_version: anthropic_version.into(),
        }
    }

    /// Signer using the configured fingerprint and Anthropic version.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.device_fingerprint, &config.anthropic_version)
    }

    /// Sign a request to `endpoint` with the current time.
    pub fn build_request(
        &self,
        endpoint: &str,
        body: impl Into<Bytes>,
        session: &Session,
        service: &ServiceConfig,
    ) -> SignedRequest {
        self.build_request_at(endpoint, body, session, service, Utc::now().timestamp())
    }

    /// Same as [`build_request`](Self::build_request) with an explicit Unix timestamp.
    pub fn build_request_at(
        &self,
        endpoint: &str,
        body: impl Into<Bytes>,
        session: &Session,
        service: &ServiceConfig,
        timestamp: i64,
    ) -> SignedRequest {
        let body = body.into();
        let endpoint = normalize_endpoint(endpoint);
        let url = format!("{}{}", service.service_url().trim_end_matches('/'), endpoint);
        // ServiceConfig only holds URLs that already parsed.
        let url = Url::parse(&url).expect("service URL validated when ServiceConfig was built");

        let timestamp = timestamp.to_string();
        let signature = signature(
            &timestamp,
            service.provider(),
            service.service_id(),
            &endpoint,
            &body,
            session.session_token(),
        );

        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            (HEADER_PARTIAL_KEY.to_string(), service.partial_key().to_string()),
            (HEADER_SESSION_TOKEN.to_string(), session.session_token().to_string()),
            (HEADER_TIMESTAMP.to_string(), timestamp),
            (HEADER_DEVICE_FINGERPRINT.to_string(), self.device_fingerprint.clone()),
            (HEADER_PROVIDER.to_string(), service.provider().to_string()),
            (HEADER_SIGNATURE.to_string(), signature),
        ];
        if service.provider().requires_version_header() {
            headers.push((
                HEADER_ANTHROPIC_VERSION.to_string(),
                self.anthropic_version.clone(),
            ));
        }

        SignedRequest {
            method: reqwest::Method::POST,
            url,
            headers,
            body,
        }
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with('/') {
        endpoint.to_string()
    } else {
        format!("/{}", endpoint)
    }
}

/// Base64 HMAC-SHA256 over `{timestamp}:{provider}:{serviceId}:{endpoint}:{base64(body)}:{sessionToken}`,
/// keyed with the raw session token bytes.
pub fn signature(
    timestamp: &str,
    provider: &Provider,
    service_id: &str,
    endpoint: &str,
    body: &[u8],
    session_token: &str,
) -> String {
    let message = format!(
        "{}:{}:{}:{}:{}:{}",
        timestamp,
        provider,
        service_id,
        endpoint,
        STANDARD.encode(body),
        session_token
    );
    let mut mac = HmacSha256::new_from_slice(session_token.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(message.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}
