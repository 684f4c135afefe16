//! One-shot re-authentication around a single logical request.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::ErrorBody;
use crate::auth::{AuthConfig, CredentialManager, Credentials, DEFAULT_NON_RECOVERABLE_CODES};
use crate::{Error, Result};

/// Position of one logical request in the re-authentication protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryState {
    #[default]
    Initial,
    RetriedOnce,
}

impl RetryState {
    /// Attempts made once this state is reached.
    pub fn attempts(self) -> u32 {
        match self {
            RetryState::Initial => 1,
            RetryState::RetriedOnce => 2,
        }
    }
}

/// A 401 from the provider endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Unauthorized {
    pub error_code: Option<String>,
    pub body: ErrorBody,
}

impl Unauthorized {
    /// Lift the error code out of a parsed 401 body.
    pub fn from_body(body: ErrorBody) -> Self {
        Self {
            error_code: body.error_code.clone(),
            body,
        }
    }
}

/// Outcome of one attempt as seen by the orchestrator.
#[derive(Debug)]
pub enum Exchange<T> {
    Completed(T),
    Unauthorized(Unauthorized),
}

/// Which 401 error codes end a request without spending the retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRetryPolicy {
    non_recoverable_codes: Vec<String>,
}

impl Default for AuthRetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_NON_RECOVERABLE_CODES.iter().map(|s| s.to_string()))
    }
}

impl AuthRetryPolicy {
    /// Policy with exactly `codes` as the denylist.
    pub fn new(codes: impl IntoIterator<Item = String>) -> Self {
        Self {
            non_recoverable_codes: codes.into_iter().collect(),
        }
    }

    /// Policy using the configured denylist.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.non_recoverable_codes.iter().cloned())
    }

    /// True if `code` is denylisted. A missing code is always recoverable.
    pub fn is_non_recoverable(&self, code: Option<&str>) -> bool {
        code.is_some_and(|code| self.non_recoverable_codes.iter().any(|c| c == code))
    }
}

/// Runs an exchange, re-authenticating at most once on a recoverable 401.
#[derive(Debug, Clone)]
pub struct RetryOrchestrator {
    manager: Arc<CredentialManager>,
    policy: AuthRetryPolicy,
}

impl RetryOrchestrator {
    pub fn new(manager: Arc<CredentialManager>, policy: AuthRetryPolicy) -> Self {
        Self { manager, policy }
    }

    /// Manager whose credentials each attempt uses.
    pub fn manager(&self) -> &Arc<CredentialManager> {
        &self.manager
    }

    pub fn policy(&self) -> &AuthRetryPolicy {
        &self.policy
    }

    /// Call `exchange` with current credentials until it completes, fails with a non-401
    /// error, or the retry is spent.
    ///
    /// A recoverable 401 invalidates the rejected credentials only if they are still cached,
    /// so concurrent requests that fail together share one refresh. The retry then sees
    /// whatever replaced them.
    pub async fn execute<T, F, Fut>(&self, mut exchange: F) -> Result<T>
    where
        F: FnMut(Credentials) -> Fut,
        Fut: Future<Output = Result<Exchange<T>>>,
    {
        let mut state = RetryState::Initial;

        loop {
            let credentials = self.manager.get_credentials(false).await?;

            let unauthorized = match exchange(credentials.clone()).await? {
                Exchange::Completed(value) => return Ok(value),
                Exchange::Unauthorized(unauthorized) => unauthorized,
            };

            if self.policy.is_non_recoverable(unauthorized.error_code.as_deref()) {
                warn!(
                    service_url = self.manager.service_url(),
                    error_code = unauthorized.error_code.as_deref().unwrap_or(""),
                    "non-recoverable authorization failure"
                );
                return Err(exhausted(state, unauthorized));
            }

            match state {
                RetryState::Initial => {
                    info!(
                        service_url = self.manager.service_url(),
                        "authorization failed; refreshing credentials"
                    );
                    self.manager.invalidate_if_current(&credentials).await;
                    state = RetryState::RetriedOnce;
                }
                RetryState::RetriedOnce => {
                    debug!(
                        service_url = self.manager.service_url(),
                        "authorization failed after refresh"
                    );
                    return Err(exhausted(state, unauthorized));
                }
            }
        }
    }
}

fn exhausted(state: RetryState, unauthorized: Unauthorized) -> Error {
    Error::AuthenticationExhausted {
        attempts: state.attempts(),
        error_code: unauthorized.error_code,
        body: unauthorized.body,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::auth::MemoryStore;
    use crate::auth::manager::testing::CountingFetcher;

    const URL: &str = "https://api.aiproxy.com/v1/openai-abc";

    fn orchestrator(fetcher: Arc<CountingFetcher>) -> RetryOrchestrator {
        let manager = CredentialManager::new(URL, fetcher, Arc::new(MemoryStore::new()));
        RetryOrchestrator::new(Arc::new(manager), AuthRetryPolicy::default())
    }

    fn unauthorized(code: Option<&str>) -> Exchange<&'static str> {
        let raw = match code {
            Some(code) => format!(r#"{{"errorCode":"{}"}}"#, code),
            None => String::new(),
        };
        Exchange::Unauthorized(Unauthorized::from_body(ErrorBody::parse(&raw)))
    }

    /// Replays scripted outcomes and records the session token seen on each attempt.
    struct Script {
        outcomes: Mutex<VecDeque<Result<Exchange<&'static str>>>>,
        sessions: Mutex<Vec<String>>,
    }

    impl Script {
        fn new(outcomes: Vec<Result<Exchange<&'static str>>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                sessions: Mutex::new(Vec::new()),
            }
        }

        async fn run(&self, orchestrator: &RetryOrchestrator) -> Result<&'static str> {
            orchestrator
                .execute(|creds| {
                    self.sessions
                        .lock()
                        .unwrap()
                        .push(creds.session().session_token().to_string());
                    let next = self.outcomes.lock().unwrap().pop_front().unwrap();
                    async move { next }
                })
                .await
        }

        fn sessions(&self) -> Vec<String> {
            self.sessions.lock().unwrap().clone()
        }
    }

    #[test]
    fn test_retry_state() {
        assert_eq!(RetryState::default(), RetryState::Initial);
        assert_eq!(RetryState::Initial.attempts(), 1);
        assert_eq!(RetryState::RetriedOnce.attempts(), 2);
    }

    #[test]
    fn test_policy() {
        let policy = AuthRetryPolicy::default();
        assert!(policy.is_non_recoverable(Some("device_mismatch")));
        assert!(policy.is_non_recoverable(Some("signature_mismatch")));
        assert!(!policy.is_non_recoverable(Some("token_expired")));
        assert!(!policy.is_non_recoverable(None));
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let fetcher = Arc::new(CountingFetcher::new("openai"));
        let orchestrator = orchestrator(fetcher.clone());
        let script = Script::new(vec![Ok(Exchange::Completed("ok"))]);

        assert_eq!(script.run(&orchestrator).await.unwrap(), "ok");
        assert_eq!(script.sessions(), vec!["sess-1"]);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_401_then_success_refreshes_once() {
        let fetcher = Arc::new(CountingFetcher::new("openai"));
        let orchestrator = orchestrator(fetcher.clone());
        let script = Script::new(vec![
            Ok(unauthorized(Some("token_expired"))),
            Ok(Exchange::Completed("ok")),
        ]);

        assert_eq!(script.run(&orchestrator).await.unwrap(), "ok");
        assert_eq!(script.sessions(), vec!["sess-1", "sess-2"]);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_401s_share_one_refresh() {
        let fetcher = Arc::new(
            CountingFetcher::new("openai").with_delay(std::time::Duration::from_millis(50)),
        );
        let orchestrator = orchestrator(fetcher.clone());
        let a = Script::new(vec![Ok(unauthorized(None)), Ok(Exchange::Completed("a"))]);
        let b = Script::new(vec![Ok(unauthorized(None)), Ok(Exchange::Completed("b"))]);

        let (ra, rb) = tokio::join!(a.run(&orchestrator), b.run(&orchestrator));

        assert_eq!(ra.unwrap(), "a");
        assert_eq!(rb.unwrap(), "b");
        assert_eq!(a.sessions(), vec!["sess-1", "sess-2"]);
        assert_eq!(b.sessions(), vec!["sess-1", "sess-2"]);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_late_401_reuses_refreshed_credentials() {
        let fetcher = Arc::new(CountingFetcher::new("openai"));
        let orchestrator = orchestrator(fetcher.clone());
        let manager = orchestrator.manager().clone();

        // Another request already replaced the credentials this one was rejected with.
        let script = Script::new(vec![Ok(unauthorized(None)), Ok(Exchange::Completed("ok"))]);
        let result = orchestrator
            .execute(|creds| {
                let manager = manager.clone();
                let next = script.outcomes.lock().unwrap().pop_front().unwrap();
                script
                    .sessions
                    .lock()
                    .unwrap()
                    .push(creds.session().session_token().to_string());
                async move {
                    if next.as_ref().is_ok_and(|e| matches!(e, Exchange::Unauthorized(_))) {
                        manager.get_credentials(true).await?;
                    }
                    next
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(script.sessions(), vec!["sess-1", "sess-2"]);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_401_twice_exhausts() {
        let fetcher = Arc::new(CountingFetcher::new("openai"));
        let orchestrator = orchestrator(fetcher.clone());
        let script = Script::new(vec![Ok(unauthorized(None)), Ok(unauthorized(None))]);

        let err = script.run(&orchestrator).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationExhausted { attempts: 2, .. }));
        assert!(err.is_unauthorized());
        assert_eq!(script.sessions().len(), 2);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_non_recoverable_code_skips_retry() {
        let fetcher = Arc::new(CountingFetcher::new("openai"));
        let orchestrator = orchestrator(fetcher.clone());
        let script = Script::new(vec![Ok(unauthorized(Some("device_mismatch")))]);

        let err = script.run(&orchestrator).await.unwrap_err();
        match err {
            Error::AuthenticationExhausted {
                attempts,
                error_code,
                ..
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(error_code.as_deref(), Some("device_mismatch"));
            }
            other => panic!("expected AuthenticationExhausted, got {:?}", other),
        }
        assert_eq!(fetcher.calls(), 1);
        // Credentials were not invalidated.
        assert!(orchestrator.manager().has_valid_credentials().await);
    }

    #[tokio::test]
    async fn test_other_errors_propagate_without_retry() {
        let fetcher = Arc::new(CountingFetcher::new("openai"));
        let orchestrator = orchestrator(fetcher.clone());
        let script = Script::new(vec![Err(Error::Http {
            status: 500,
            body: ErrorBody::parse("boom"),
        })]);

        let err = script.run(&orchestrator).await.unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(script.sessions().len(), 1);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_credential_failure_propagates() {
        let fetcher = Arc::new(CountingFetcher::new("openai"));
        fetcher.fail_with(Some(Error::Network("offline".into())));
        let orchestrator = orchestrator(fetcher.clone());
        let script = Script::new(vec![]);

        let err = script.run(&orchestrator).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
        assert!(script.sessions().is_empty());
    }
}
