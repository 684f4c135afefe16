//! Credential lifecycle for a single service URL.
//!
//! All cache state sits behind one async mutex, so only one operation at a time may
//! read-modify-write the token, the derived credentials or the in-flight fetch slot.
//! Concurrent callers that miss the cache share one outstanding fetch.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use super::{CredentialStore, Credentials, DeviceToken, DeviceTokenFetcher};
use crate::{Error, Result};

type SharedFetch = Shared<BoxFuture<'static, Result<DeviceToken>>>;

struct InFlightFetch {
    id: u64,
    fetch: SharedFetch,
    abort: AbortHandle,
}

#[derive(Default)]
struct CacheState {
    token: Option<DeviceToken>,
    credentials: Option<Credentials>,
    in_flight: Option<InFlightFetch>,
    next_fetch_id: u64,
}

impl CacheState {
    fn clear_fetch(&mut self, id: u64) -> bool {
        if self.in_flight.as_ref().is_some_and(|f| f.id == id) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }
}

/// Owns the device token and the credentials derived from it for one service URL.
pub struct CredentialManager {
    service_url: String,
    fetcher: Arc<dyn DeviceTokenFetcher>,
    store: Arc<dyn CredentialStore>,
    state: Arc<Mutex<CacheState>>,
}

impl std::fmt::Debug for CredentialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialManager")
            .field("service_url", &self.service_url)
            .field("fetcher", &self.fetcher.name())
            .field("store", &self.store.name())
            .finish()
    }
}

impl CredentialManager {
    /// Create a manager with an empty in-memory cache. Nothing is fetched or loaded yet.
    pub fn new(
        service_url: impl Into<String>,
        fetcher: Arc<dyn DeviceTokenFetcher>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            service_url: service_url.into(),
            fetcher,
            store,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    /// Service URL whose credentials this manager owns.
    pub fn service_url(&self) -> &str {
        &self.service_url
    }

    /// Return valid credentials, fetching a new device token when needed.
    ///
    /// Without `force_refresh`, non-expired cached credentials are returned with no I/O.
    pub async fn get_credentials(&self, force_refresh: bool) -> Result<Credentials> {
        if !force_refresh {
            let state = self.state.lock().await;
            if let Some(credentials) = state.credentials.as_ref().filter(|c| !c.is_expired()) {
                debug!(service_url = %self.service_url, "credentials cache hit");
                return Ok(credentials.clone());
            }
        }

        let token = self.get_valid_token(force_refresh).await?;
        let credentials = self.adopt(&token).await?;

        if credentials.is_expired() && !force_refresh {
            debug!(service_url = %self.service_url, "session expired before its device token");
            let token = self.get_valid_token(true).await?;
            return self.adopt(&token).await;
        }

        Ok(credentials)
    }

    /// Drop token and credentials from memory and store, and abandon any in-flight fetch.
    pub async fn invalidate_credentials(&self) {
        let mut state = self.state.lock().await;
        state.token = None;
        state.credentials = None;
        if let Some(in_flight) = state.in_flight.take() {
            debug!(service_url = %self.service_url, fetch_id = in_flight.id, "aborting in-flight token fetch");
            in_flight.abort.abort();
        }
        self.clear_store().await;
        info!(service_url = %self.service_url, "credentials invalidated");
    }

    /// Drop `rejected` from memory and store, but only while they are still the cached pair.
    ///
    /// Returns false if another caller already replaced or dropped them. A fetch in flight
    /// is left running so the caller can join it.
    pub async fn invalidate_if_current(&self, rejected: &Credentials) -> bool {
        let mut state = self.state.lock().await;
        let current = match (&state.credentials, &state.token) {
            (Some(credentials), _) => credentials == rejected,
            (None, Some(token)) => token.payload().map_or(true, |payload| {
                payload.session_token.expose_secret() == rejected.session().session_token()
            }),
            (None, None) => false,
        };
        if !current {
            debug!(service_url = %self.service_url, "rejected credentials already replaced");
            return false;
        }

        state.token = None;
        state.credentials = None;
        self.clear_store().await;
        info!(service_url = %self.service_url, "rejected credentials invalidated");
        true
    }

    /// True if a non-expired credential exists in memory or in the store. Never fetches.
    pub async fn has_valid_credentials(&self) -> bool {
        {
            let state = self.state.lock().await;
            if state.credentials.as_ref().is_some_and(|c| !c.is_expired())
                || state.token.as_ref().is_some_and(|t| !t.is_expired())
            {
                return true;
            }
        }
        self.load_stored_token().await.is_some()
    }

    /// Signed time until the cached credentials expire, if any valid ones are cached.
    pub async fn time_until_expiry(&self) -> Option<chrono::Duration> {
        let state = self.state.lock().await;
        state
            .credentials
            .as_ref()
            .filter(|c| !c.is_expired())
            .map(Credentials::time_until_expiry)
    }

    async fn get_valid_token(&self, force_refresh: bool) -> Result<DeviceToken> {
        match self.acquire_token(force_refresh).await {
            Err(Error::Cancelled) => {
                // The fetch was abandoned by an invalidation; join whatever replaced it.
                debug!(service_url = %self.service_url, "token fetch cancelled; rejoining");
                self.acquire_token(force_refresh).await
            }
            result => result,
        }
    }

    async fn acquire_token(&self, force_refresh: bool) -> Result<DeviceToken> {
        let fetch = {
            let mut state = self.state.lock().await;

            if !force_refresh {
                if let Some(token) = state.token.as_ref().filter(|t| !t.is_expired()) {
                    return Ok(token.clone());
                }
                if let Some(token) = self.load_stored_token().await {
                    debug!(service_url = %self.service_url, "adopted device token from store");
                    state.token = Some(token.clone());
                    state.credentials = None;
                    return Ok(token);
                }
            }

            match &state.in_flight {
                Some(in_flight) => {
                    debug!(service_url = %self.service_url, fetch_id = in_flight.id, "joining in-flight token fetch");
                    in_flight.fetch.clone()
                }
                None => self.start_fetch(&mut state),
            }
        };

        fetch.await
    }

    /// Register a new fetch in the in-flight slot. Caller holds the state lock.
    fn start_fetch(&self, state: &mut CacheState) -> SharedFetch {
        state.next_fetch_id += 1;
        let id = state.next_fetch_id;

        let fetcher = Arc::clone(&self.fetcher);
        let store = Arc::clone(&self.store);
        let shared_state = Arc::clone(&self.state);
        let service_url = self.service_url.clone();

        let task = tokio::spawn(async move {
            info!(service_url = %service_url, fetch_id = id, "fetching device token");
            let result = fetcher.fetch(&service_url).await;

            let mut state = shared_state.lock().await;
            if !state.clear_fetch(id) {
                debug!(service_url = %service_url, fetch_id = id, "discarding result of abandoned fetch");
                return result;
            }
            if let Ok(token) = &result {
                state.token = Some(token.clone());
                state.credentials = None;
                if let Err(e) = store.save_token(&service_url, token).await {
                    warn!(service_url = %service_url, error = %e, "failed to persist device token");
                }
            }
            result
        });

        let abort = task.abort_handle();
        let shared_state = Arc::clone(&self.state);
        let fetch = async move {
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(Error::Cancelled),
                Err(e) => {
                    shared_state.lock().await.clear_fetch(id);
                    Err(Error::Network(format!("device token fetch failed: {}", e)))
                }
            }
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlightFetch {
            id,
            fetch: fetch.clone(),
            abort,
        });
        fetch
    }

    /// Derive credentials from `token` and cache them if `token` is still current.
    async fn adopt(&self, token: &DeviceToken) -> Result<Credentials> {
        let credentials = match token
            .payload()
            .and_then(|payload| Credentials::from_payload(&payload, &self.service_url))
        {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(service_url = %self.service_url, error = %e, "discarding undecodable device token");
                self.discard(token).await;
                return Err(e);
            }
        };

        let mut state = self.state.lock().await;
        if state.token.as_ref() == Some(token) {
            state.credentials = Some(credentials.clone());
            if let Err(e) = self
                .store
                .save_session(&self.service_url, credentials.session())
                .await
            {
                warn!(service_url = %self.service_url, error = %e, "failed to persist session");
            }
        }
        Ok(credentials)
    }

    async fn discard(&self, token: &DeviceToken) {
        let mut state = self.state.lock().await;
        if state.token.as_ref() == Some(token) {
            state.token = None;
            state.credentials = None;
        }
        self.clear_store().await;
    }

    /// Delete token and session together. Caller holds the state lock.
    async fn clear_store(&self) {
        if let Err(e) = self.store.delete_token(&self.service_url).await {
            warn!(service_url = %self.service_url, error = %e, "failed to delete stored token");
        }
        if let Err(e) = self.store.delete_session(&self.service_url).await {
            warn!(service_url = %self.service_url, error = %e, "failed to delete stored session");
        }
    }

    #[cfg(test)]
    pub(crate) async fn fetch_in_flight(&self) -> bool {
        self.state.lock().await.in_flight.is_some()
    }

    async fn load_stored_token(&self) -> Option<DeviceToken> {
        match self.store.load_token(&self.service_url).await {
            Ok(Some(token)) if !token.is_expired() => Some(token),
            Ok(Some(_)) => {
                debug!(service_url = %self.service_url, "stored device token expired");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(service_url = %self.service_url, error = %e, "failed to read stored token");
                None
            }
        }
    }
}
