//! Shared fixtures: a mock proxy backend that issues device tokens and serves provider endpoints.

#![allow(dead_code)]

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use proxy_auth::{AuthConfig, CredentialStore, MemoryStore, ProxyClient};
use serde_json::json;
use sha2::Sha256;
use wiremock::{MockServer, Request, ResponseTemplate};

pub const FINGERPRINT: &str = "fp-test";
pub const SERVICE_ID: &str = "abc";

pub fn service_url(server: &MockServer, provider: &str) -> String {
    format!("{}/v1/{}-{}", server.uri(), provider, SERVICE_ID)
}

pub fn service_path(provider: &str, endpoint: &str) -> String {
    format!("/v1/{}-{}{}", provider, SERVICE_ID, endpoint)
}

pub fn config(server: &MockServer) -> AuthConfig {
    AuthConfig::builder()
        .auth_url(format!("{}/device/token", server.uri()))
        .device_fingerprint(FINGERPRINT)
        .build()
}

/// Unsigned JWT carrying the claims the proxy backend issues.
pub fn jwt(provider: &str, session: &str, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = json!({
        "sessionToken": session,
        "partialKey": format!("pk-{}", session),
        "serviceId": SERVICE_ID,
        "provider": provider,
        "deviceFingerprint": FINGERPRINT,
        "projectId": "proj-1",
        "iat": exp - 3600,
        "exp": exp,
    });
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    format!("{}.{}.signature", header, payload)
}

/// 200 response from the device token endpoint.
pub fn token_response(provider: &str, session: &str) -> ResponseTemplate {
    let exp = Utc::now().timestamp() + 3600;
    ResponseTemplate::new(200).set_body_json(json!({
        "token": jwt(provider, session, exp),
        "expiresAt": exp * 1000,
    }))
}

/// Route library logs to the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn client_with_store(
    server: &MockServer,
    provider: &str,
    store: Arc<dyn CredentialStore>,
) -> ProxyClient {
    init_tracing();
    ProxyClient::builder(config(server))
        .service_url(service_url(server, provider))
        .store(store)
        .build()
        .unwrap()
}

pub fn client(server: &MockServer, provider: &str) -> ProxyClient {
    client_with_store(server, provider, Arc::new(MemoryStore::new()))
}

pub fn header<'a>(request: &'a Request, name: &str) -> &'a str {
    request
        .headers
        .get(name)
        .unwrap_or_else(|| panic!("missing header {}", name))
        .to_str()
        .unwrap()
}

/// Recompute the signature a provider request should carry.
pub fn expected_signature(request: &Request, provider: &str, endpoint: &str) -> String {
    let session = header(request, "x-session-token");
    let message = format!(
        "{}:{}:{}:{}:{}:{}",
        header(request, "x-timestamp"),
        provider,
        SERVICE_ID,
        endpoint,
        STANDARD.encode(&request.body),
        session
    );
    let mut mac = Hmac::<Sha256>::new_from_slice(session.as_bytes()).unwrap();
    mac.update(message.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}
