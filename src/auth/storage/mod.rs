//! Credential storage implementations.
//!
//! A store mirrors the in-memory cache so a device token survives process restarts.
//! A missing entry is `Ok(None)`, never an error.

#[cfg(feature = "file-store")]
mod file;
mod memory;

use async_trait::async_trait;

use super::{DeviceToken, Session};
use crate::Result;

#[cfg(feature = "file-store")]
pub use file::FileStore;
pub use memory::MemoryStore;

/// Durable key-value persistence for a device token and its session, keyed by service URL.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Store name for debugging.
    fn name(&self) -> &str;

    async fn load_token(&self, service_url: &str) -> Result<Option<DeviceToken>>;

    async fn save_token(&self, service_url: &str, token: &DeviceToken) -> Result<()>;

    async fn delete_token(&self, service_url: &str) -> Result<()>;

    async fn load_session(&self, service_url: &str) -> Result<Option<Session>>;

    async fn save_session(&self, service_url: &str, session: &Session) -> Result<()>;

    async fn delete_session(&self, service_url: &str) -> Result<()>;
}
