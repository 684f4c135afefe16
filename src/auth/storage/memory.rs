//! Process-local credential store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CredentialStore;
use crate::Result;
use crate::auth::{DeviceToken, Session};

#[derive(Default)]
struct Entry {
    token: Option<DeviceToken>,
    session: Option<Session>,
}

/// In-memory store. Entries live as long as the store value.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no service URL has a token or session stored.
    pub async fn is_empty(&self) -> bool {
        self.entries
            .read()
            .await
            .values()
            .all(|e| e.token.is_none() && e.session.is_none())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load_token(&self, service_url: &str) -> Result<Option<DeviceToken>> {
        let entries = self.entries.read().await;
        Ok(entries.get(service_url).and_then(|e| e.token.clone()))
    }

    async fn save_token(&self, service_url: &str, token: &DeviceToken) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.entry(service_url.to_string()).or_default().token = Some(token.clone());
        Ok(())
    }

    async fn delete_token(&self, service_url: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(service_url) {
            entry.token = None;
        }
        Ok(())
    }

    async fn load_session(&self, service_url: &str) -> Result<Option<Session>> {
        let entries = self.entries.read().await;
        Ok(entries.get(service_url).and_then(|e| e.session.clone()))
    }

    async fn save_session(&self, service_url: &str, session: &Session) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.entry(service_url.to_string()).or_default().session = Some(session.clone());
        Ok(())
    }

    async fn delete_session(&self, service_url: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(service_url) {
            entry.session = None;
        }
        Ok(())
    }
}
