//! Signed, self-reauthenticating client for provider endpoints behind the proxy.

mod error;
mod retry;
mod signer;
mod streaming;

pub use error::ErrorBody;
pub use retry::{AuthRetryPolicy, Exchange, RetryOrchestrator, RetryState, Unauthorized};
pub use signer::{
    HEADER_ANTHROPIC_VERSION, HEADER_DEVICE_FINGERPRINT, HEADER_PARTIAL_KEY, HEADER_PROVIDER,
    HEADER_SESSION_TOKEN, HEADER_SIGNATURE, HEADER_TIMESTAMP, RequestSigner, SignedRequest,
    signature,
};
pub use streaming::{
    AnthropicFormat, DATA_PREFIX, DONE_SENTINEL, DeltaStream, LineOutcome, OpenAiFormat,
    SseDecoder, StreamFormat, decode_response, decode_stream,
};

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::auth::{
    AuthConfig, CredentialManager, CredentialStore, DeviceTokenFetcher, HttpTokenFetcher,
    default_store,
};
use crate::{Error, Result};

/// Client bound to one service URL.
///
/// Every request is signed with the current session and retried once with fresh
/// credentials if the provider answers 401 with a recoverable error code.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    http: reqwest::Client,
    signer: RequestSigner,
    retry: RetryOrchestrator,
}

impl ProxyClient {
    /// Start building a client from `config`.
    pub fn builder(config: AuthConfig) -> ProxyClientBuilder {
        ProxyClientBuilder::new(config)
    }

    /// Service URL every request is sent under.
    pub fn service_url(&self) -> &str {
        self.retry.manager().service_url()
    }

    /// Credential manager backing this client.
    pub fn manager(&self) -> &Arc<CredentialManager> {
        self.retry.manager()
    }

    /// Signer applied to every outgoing request.
    pub fn signer(&self) -> &RequestSigner {
        &self.signer
    }

    /// True if usable credentials are cached or stored. Never fetches.
    pub async fn has_valid_credentials(&self) -> bool {
        self.manager().has_valid_credentials().await
    }

    /// Drop cached and stored credentials; the next request fetches fresh ones.
    pub async fn invalidate_credentials(&self) {
        self.manager().invalidate_credentials().await
    }

    /// POST `body` to `endpoint` and return the successful response unread.
    pub async fn send_raw(&self, endpoint: &str, body: impl Into<Bytes>) -> Result<reqwest::Response> {
        let body = body.into();
        self.retry
            .execute(|credentials| {
                let request = self.signer.build_request(
                    endpoint,
                    body.clone(),
                    credentials.session(),
                    credentials.service_config(),
                );
                dispatch(&self.http, request)
            })
            .await
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn send_json<T, B>(&self, endpoint: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(body)?;
        let response = self.send_raw(endpoint, body).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            if e.is_data() {
                Error::Decoding(format!("{} response: {}", endpoint, e))
            } else {
                Error::InvalidResponse(format!("{} response is not JSON: {}", endpoint, e))
            }
        })
    }

    /// POST a streaming request and hand each decoded delta to `consumer`.
    pub async fn stream<F, B>(
        &self,
        endpoint: &str,
        body: &B,
        consumer: impl FnMut(F::Delta),
    ) -> Result<()>
    where
        F: StreamFormat,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(body)?;
        let response = self.send_raw(endpoint, body).await?;
        decode_response::<F, _>(response, consumer).await
    }

    /// POST a streaming request and return the deltas as a [`futures::Stream`].
    pub async fn stream_deltas<F, B>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<
        DeltaStream<
            impl futures::Stream<Item = std::result::Result<Bytes, reqwest::Error>>
            + Send
            + 'static
            + use<F, B>,
            F,
        >,
    >
    where
        F: StreamFormat,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(body)?;
        let response = self.send_raw(endpoint, body).await?;
        Ok(DeltaStream::new(response.bytes_stream()))
    }
}

/// Send one signed request and classify the status.
async fn dispatch(http: &reqwest::Client, request: SignedRequest) -> Result<Exchange<reqwest::Response>> {
    let endpoint = request.url.path().to_string();
    let response = request.into_reqwest(http).send().await?;
    let status = response.status();
    tracing::debug!(endpoint = %endpoint, status = status.as_u16(), "provider response");

    if status.is_success() {
        return Ok(Exchange::Completed(response));
    }

    let body = ErrorBody::from_bytes(&response.bytes().await.unwrap_or_default());
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Ok(Exchange::Unauthorized(Unauthorized::from_body(body)));
    }
    Err(Error::Http {
        status: status.as_u16(),
        body,
    })
}

/// Builder for [`ProxyClient`].
pub struct ProxyClientBuilder {
    config: AuthConfig,
    service_url: Option<String>,
    http: Option<reqwest::Client>,
    fetcher: Option<Arc<dyn DeviceTokenFetcher>>,
    store: Option<Arc<dyn CredentialStore>>,
    manager: Option<Arc<CredentialManager>>,
}

impl ProxyClientBuilder {
    /// Empty builder; see [`ProxyClient::builder`].
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            service_url: None,
            http: None,
            fetcher: None,
            store: None,
            manager: None,
        }
    }

    /// Service URL to bind the client to. Required unless a manager is supplied.
    pub fn service_url(mut self, url: impl Into<String>) -> Self {
        self.service_url = Some(url.into());
        self
    }

    /// HTTP client for provider requests.
    pub fn http(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Device token source. Defaults to [`HttpTokenFetcher`].
    pub fn fetcher(mut self, fetcher: Arc<dyn DeviceTokenFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Credential store. Defaults to the file store when enabled, else memory.
    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share an existing manager, e.g. one handed out by a
    /// [`CredentialRegistry`](crate::auth::CredentialRegistry). Overrides `service_url`,
    /// `fetcher` and `store`.
    pub fn manager(mut self, manager: Arc<CredentialManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Validate the configuration and build the client.
    pub fn build(self) -> Result<ProxyClient> {
        self.config.validate()?;

        let manager = match self.manager {
            Some(manager) => manager,
            None => {
                let service_url = self
                    .service_url
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| Error::config("service URL is required"))?;
                url::Url::parse(&service_url).map_err(|e| {
                    Error::config(format!("invalid service URL {}: {}", service_url, e))
                })?;

                let fetcher = match self.fetcher {
                    Some(fetcher) => fetcher,
                    None => Arc::new(HttpTokenFetcher::new(&self.config)?),
                };
                let store = self.store.unwrap_or_else(default_store);
                Arc::new(CredentialManager::new(service_url, fetcher, store))
            }
        };

        let http = match self.http {
            Some(http) => http,
            None => reqwest::Client::builder().build()?,
        };

        Ok(ProxyClient {
            http,
            signer: RequestSigner::from_config(&self.config),
            retry: RetryOrchestrator::new(manager, AuthRetryPolicy::from_config(&self.config)),
        })
    }
}
