//! Fake OAuth provider shared by the integration tests
//!
//! Serves a token endpoint that records every request and replies with a
//! configurable status and body, plus a small resource API that echoes what
//! it received.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::IntoResponse,
    routing::{any, post},
};
use oauth2_client::oauth::ClientConfig;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;

/// One request seen by the token endpoint
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// Form parameters in wire order
    pub params: Vec<(String, String)>,
    /// `Authorization` header, if sent
    pub authorization: Option<String>,
    /// `Accept` header, if sent
    pub accept: Option<String>,
}

impl CapturedRequest {
    /// Parameters keyed by name
    pub fn param_map(&self) -> BTreeMap<&str, &str> {
        self.params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Value of one parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

struct ProviderState {
    requests: Mutex<Vec<CapturedRequest>>,
    response: Mutex<(u16, String)>,
    delay: Mutex<Duration>,
}

/// Running fake provider
pub struct FakeProvider {
    addr: SocketAddr,
    state: Arc<ProviderState>,
}

impl FakeProvider {
    /// Start on an ephemeral loopback port, answering with a one-hour token
    pub async fn start() -> Self {
        let state = Arc::new(ProviderState {
            requests: Mutex::new(Vec::new()),
            response: Mutex::new((200, token_json("access-1", Some("refresh-1"), Some(3600)))),
            delay: Mutex::new(Duration::ZERO),
        });

        let app = Router::new()
            .route("/token", post(token_endpoint))
            .route("/api/echo", any(echo))
            .route("/api/status/{code}", any(status))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    /// Absolute URL for `path`
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// Client config pointing at this provider
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new("client-1")
            .with_client_secret("s3cret")
            .with_token_url(self.url("/token"))
            .with_auth_url(self.url("/authorize"))
            .with_redirect_uri("http://127.0.0.1:8765/callback")
            .with_scope(["read", "write"])
    }

    /// Change what the token endpoint answers
    pub fn respond(&self, status: u16, body: impl Into<String>) {
        *self.state.response.lock() = (status, body.into());
    }

    /// Delay every token response
    pub fn delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    /// Token requests seen so far
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.state.requests.lock().clone()
    }

    /// Number of token requests seen so far
    pub fn hits(&self) -> usize {
        self.state.requests.lock().len()
    }

    /// The most recent token request
    pub fn last_request(&self) -> CapturedRequest {
        self.requests().pop().expect("no token request recorded")
    }
}

/// Standard token response body
pub fn token_json(access: &str, refresh: Option<&str>, expires_in: Option<u64>) -> String {
    let mut body = json!({
        "access_token": access,
        "token_type": "Bearer",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = json!(refresh);
    }
    if let Some(expires_in) = expires_in {
        body["expires_in"] = json!(expires_in);
    }
    body.to_string()
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn token_endpoint(
    State(state): State<Arc<ProviderState>>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    let params: Vec<(String, String)> = serde_urlencoded::from_str(&body).unwrap_or_default();
    state.requests.lock().push(CapturedRequest {
        params,
        authorization: header_value(&headers, header::AUTHORIZATION),
        accept: header_value(&headers, header::ACCEPT),
    });

    let delay = *state.delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let (status, body) = state.response.lock().clone();
    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
}

async fn echo(method: Method, headers: HeaderMap, body: String) -> Json<Value> {
    Json(json!({
        "method": method.as_str(),
        "authorization": header_value(&headers, header::AUTHORIZATION),
        "trace": header_value(&headers, header::HeaderName::from_static("x-trace-id")),
        "content_type": header_value(&headers, header::CONTENT_TYPE),
        "body": body,
    }))
}

async fn status(Path(code): Path<u16>) -> impl IntoResponse {
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        "resource says no",
    )
}
