//! Device authentication and credential lifecycle.
//!
//! - **Device token**: a JWT issued by the proxy backend in exchange for the device fingerprint
//! - **Credentials**: service config and session, always derived together from one token
//! - **Manager**: per-service-URL cache with coalesced fetching and coupled invalidation
//! - **Stores**: optional persistence so credentials survive restarts

mod config;
mod credential;
mod fetcher;
pub(crate) mod manager;
mod registry;
mod storage;
pub(crate) mod token;

pub use config::{
    AuthConfig, AuthConfigBuilder, DEFAULT_ANTHROPIC_VERSION, DEFAULT_AUTH_TIMEOUT,
    DEFAULT_AUTH_URL, DEFAULT_NON_RECOVERABLE_CODES,
};
pub use credential::{Credentials, ServiceConfig, Session};
pub use fetcher::{DeviceTokenFetcher, HttpTokenFetcher};
pub use manager::CredentialManager;
pub use registry::CredentialRegistry;
pub(crate) use registry::default_store;
#[cfg(feature = "file-store")]
pub use storage::FileStore;
pub use storage::{CredentialStore, MemoryStore};
pub use token::{DeviceToken, TokenPayload};
