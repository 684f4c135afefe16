//! # proxy-auth
//!
//! Client-side credential and request-authentication core for a multi-provider AI API proxy.
//!
//! Application code never holds a real provider API key. Instead it obtains a short-lived
//! device token from the proxy backend, derives a signed session from it, and uses that
//! session to authorize every outbound provider request.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use proxy_auth::{AuthConfig, ProxyClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), proxy_auth::Error> {
//!     let config = AuthConfig::builder()
//!         .device_fingerprint("device-1234")
//!         .build();
//!     let client = ProxyClient::builder(config)
//!         .service_url("https://api.aiproxy.com/v1/openai-1a2b3c")
//!         .build()?;
//!
//!     let reply: serde_json::Value = client
//!         .send_json("/chat/completions", &json!({"model": "gpt-4o-mini", "messages": []}))
//!         .await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```
//!
//! ## Streaming
//!
//! ```rust,no_run
//! use proxy_auth::{AnthropicFormat, AuthConfig, ProxyClient};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), proxy_auth::Error> {
//! let client = ProxyClient::builder(AuthConfig::from_env())
//!     .service_url("https://api.aiproxy.com/v1/anthropic-9f8e7d")
//!     .build()?;
//! client
//!     .stream::<AnthropicFormat, _>("/v1/messages", &json!({"stream": true}), |delta| {
//!         if let Some(text) = delta.text() {
//!             print!("{text}");
//!         }
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod auth;
pub mod client;
pub mod types;

pub use auth::{
    AuthConfig, AuthConfigBuilder, CredentialManager, CredentialRegistry, CredentialStore,
    Credentials, DeviceToken, DeviceTokenFetcher, HttpTokenFetcher, MemoryStore, ServiceConfig,
    Session, TokenPayload,
};
#[cfg(feature = "file-store")]
pub use auth::FileStore;
pub use client::{
    AnthropicFormat, AuthRetryPolicy, DeltaStream, ErrorBody, Exchange, OpenAiFormat,
    ProxyClient, ProxyClientBuilder, RequestSigner, RetryOrchestrator, RetryState, SignedRequest,
    SseDecoder, StreamFormat, Unauthorized, decode_response, decode_stream,
};
pub use types::{AnthropicDelta, ChatCompletionChunk, ContentDelta, Provider};

/// Error type for proxy-auth operations.
///
/// Every variant is cheap to clone so a single coalesced token fetch can hand the same
/// failure to all of its waiters.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The transport returned something that is not a well-formed HTTP response.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Non-2xx response from the token endpoint or a provider endpoint.
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: ErrorBody },

    /// Payload shape did not match what was expected.
    #[error("Decoding failed: {0}")]
    Decoding(String),

    /// Missing or empty required field, or a malformed device token.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A 401 survived the single permitted retry or carried a non-recoverable code.
    #[error("Authentication failed after {attempts} attempt(s){}: {body}", code_suffix(.error_code))]
    AuthenticationExhausted {
        attempts: u32,
        error_code: Option<String>,
        body: ErrorBody,
    },

    /// Connection-level failure before any HTTP status was received.
    #[error("Network request failed: {0}")]
    Network(String),

    /// Credential store I/O failed.
    #[error("Credential store error: {0}")]
    Store(String),

    /// An in-flight token fetch was aborted by credential invalidation.
    #[error("Credential fetch cancelled")]
    Cancelled,
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_ref()
        .map(|code| format!(" [{}]", code))
        .unwrap_or_default()
}

/// Error category for unified error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Authorization failures (401, exhausted retries)
    Authorization,
    /// Configuration or malformed-token errors
    Configuration,
    /// Network or server errors that may succeed on a later attempt
    Transient,
    /// Response shape or protocol errors
    Protocol,
    /// Local persistence or cancellation
    Internal,
}

impl Error {
    /// Shorthand for [`Error::Config`].
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Coarse classification for callers that branch on failure kind.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::AuthenticationExhausted { .. } => ErrorCategory::Authorization,
            Error::Http { status: 401, .. } => ErrorCategory::Authorization,
            Error::Config(_) => ErrorCategory::Configuration,
            Error::Network(_) => ErrorCategory::Transient,
            Error::Http {
                status: 429 | 500..=599,
                ..
            } => ErrorCategory::Transient,
            Error::InvalidResponse(_) | Error::Decoding(_) | Error::Http { .. } => {
                ErrorCategory::Protocol
            }
            Error::Store(_) | Error::Cancelled => ErrorCategory::Internal,
        }
    }

    /// True for an authorization failure, retried or not.
    pub fn is_unauthorized(&self) -> bool {
        self.category() == ErrorCategory::Authorization
    }

    pub fn is_configuration_error(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// True for transient failures worth retrying at the caller.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// HTTP status, if this error came from one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::AuthenticationExhausted { .. } => Some(401),
            _ => None,
        }
    }

    /// Parsed error body, if this error came from an HTTP response.
    pub fn body(&self) -> Option<&ErrorBody> {
        match self {
            Error::Http { body, .. } | Error::AuthenticationExhausted { body, .. } => Some(body),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Decoding(err.to_string())
        } else if err.is_body() || err.is_redirect() {
            Error::InvalidResponse(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decoding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
