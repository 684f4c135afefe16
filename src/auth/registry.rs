//! One credential manager per service URL.

use std::sync::Arc;

use dashmap::DashMap;

use super::{
    AuthConfig, CredentialManager, CredentialStore, DeviceTokenFetcher, HttpTokenFetcher,
    MemoryStore,
};
use crate::Result;

/// Hands out a shared [`CredentialManager`] per service URL so that every client
/// for the same URL coalesces its token fetches through the same cache.
pub struct CredentialRegistry {
    fetcher: Arc<dyn DeviceTokenFetcher>,
    store: Arc<dyn CredentialStore>,
    managers: DashMap<String, Arc<CredentialManager>>,
}

impl CredentialRegistry {
    /// Registry whose managers share one fetcher and one store.
    pub fn new(fetcher: Arc<dyn DeviceTokenFetcher>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            fetcher,
            store,
            managers: DashMap::new(),
        }
    }

    /// Registry backed by the HTTP fetcher and the default store for this build.
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let fetcher = Arc::new(HttpTokenFetcher::new(config)?);
        Ok(Self::new(fetcher, default_store()))
    }

    /// Manager for `service_url`, created on first use.
    pub fn manager(&self, service_url: &str) -> Arc<CredentialManager> {
        self.managers
            .entry(service_url.to_string())
            .or_insert_with(|| {
                tracing::debug!(service_url, store = self.store.name(), "creating credential manager");
                Arc::new(CredentialManager::new(
                    service_url,
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.store),
                ))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    /// Invalidate every manager this registry has handed out.
    pub async fn invalidate_all(&self) {
        let managers: Vec<_> = self.managers.iter().map(|m| Arc::clone(m.value())).collect();
        for manager in managers {
            manager.invalidate_credentials().await;
        }
    }
}

/// File store under the home directory when available, otherwise memory.
#[cfg(feature = "file-store")]
pub(crate) fn default_store() -> Arc<dyn CredentialStore> {
    match super::FileStore::default_location() {
        Some(store) => Arc::new(store),
        None => Arc::new(MemoryStore::new()),
    }
}

#[cfg(not(feature = "file-store"))]
pub(crate) fn default_store() -> Arc<dyn CredentialStore> {
    Arc::new(MemoryStore::new())
}
