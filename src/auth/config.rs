//! Configuration for device authentication and request signing.

use std::time::Duration;

use crate::{Error, Result};

/// Default device token endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://api.aiproxy.com/v1/device/token";

/// Default `anthropic-version` header sent on Anthropic requests.
pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default timeout for the device token exchange.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// 401 error codes a fresh credential cannot fix.
pub const DEFAULT_NON_RECOVERABLE_CODES: &[&str] =
    &["device_mismatch", "signature_mismatch", "device_revoked"];

/// Configuration for device authentication.
/// All fields have defaults that can be overridden via environment variables or code.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Device token endpoint (POST).
    pub auth_url: String,
    /// Stable per-installation identifier, supplied by the caller.
    pub device_fingerprint: String,
    /// Timeout applied to the token exchange.
    pub timeout: Duration,
    /// Value of the `anthropic-version` header.
    pub anthropic_version: String,
    /// 401 error codes that end a request without spending the retry.
    pub non_recoverable_codes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.to_string(),
            device_fingerprint: String::new(),
            timeout: DEFAULT_AUTH_TIMEOUT,
            anthropic_version: DEFAULT_ANTHROPIC_VERSION.to_string(),
            non_recoverable_codes: DEFAULT_NON_RECOVERABLE_CODES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl AuthConfig {
    /// Create configuration with defaults, then apply environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("PROXY_AUTH_URL") {
            config.auth_url = url;
        }
        if let Ok(fingerprint) = std::env::var("PROXY_DEVICE_FINGERPRINT") {
            config.device_fingerprint = fingerprint;
        }
        if let Some(secs) = std::env::var("PROXY_AUTH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        if let Ok(version) = std::env::var("PROXY_ANTHROPIC_VERSION") {
            config.anthropic_version = version;
        }

        config
    }

    /// Create a builder for custom configuration.
    pub fn builder() -> AuthConfigBuilder {
        AuthConfigBuilder::default()
    }

    /// Check that the auth URL parses and a device fingerprint is set.
    pub fn validate(&self) -> Result<()> {
        if self.auth_url.trim().is_empty() {
            return Err(Error::config("auth URL is empty"));
        }
        url::Url::parse(&self.auth_url)
            .map_err(|e| Error::config(format!("invalid auth URL {}: {}", self.auth_url, e)))?;
        if self.device_fingerprint.trim().is_empty() {
            return Err(Error::config("device fingerprint is empty"));
        }
        Ok(())
    }
}

/// Builder for AuthConfig.
pub struct AuthConfigBuilder {
    config: AuthConfig,
}

impl Default for AuthConfigBuilder {
    fn default() -> Self {
        Self {
            config: AuthConfig::from_env(),
        }
    }
}

impl AuthConfigBuilder {
    /// Device token endpoint.
    pub fn auth_url(mut self, url: impl Into<String>) -> Self {
        self.config.auth_url = url.into();
        self
    }

    /// Stable per-install identifier sent with every token request and signed request.
    pub fn device_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.config.device_fingerprint = fingerprint.into();
        self
    }

    /// Timeout for the device token exchange.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Value of `anthropic-version` on Anthropic requests.
    pub fn anthropic_version(mut self, version: impl Into<String>) -> Self {
        self.config.anthropic_version = version.into();
        self
    }

    /// Set non-recoverable 401 codes (replaces the defaults).
    pub fn non_recoverable_codes(mut self, codes: Vec<String>) -> Self {
        self.config.non_recoverable_codes = codes;
        self
    }

    /// Add a single non-recoverable 401 code.
    pub fn add_non_recoverable_code(mut self, code: impl Into<String>) -> Self {
        self.config.non_recoverable_codes.push(code.into());
        self
    }

    pub fn build(self) -> AuthConfig {
        self.config
    }
}
