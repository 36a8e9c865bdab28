//! Scripted collaborators for deterministic tests.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use reqwest::StatusCode;

use crate::api::{ApiRequest, ApiResponse, Transport, TransportError};
use crate::auth::{Collaborators, MemoryStorage, RefreshMode, SessionStore, TokenPair};
use crate::shell::{Navigator, Notice, Notifier, Route};

pub(crate) const TEST_BASE_URL: &str = "http://api.test";

type Handler = dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync;

/// Transport answering from a closure and recording every request it sees.
pub(crate) struct ScriptedTransport {
    handler: Box<Handler>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A transport that must never be called.
    pub(crate) fn unreachable() -> Arc<Self> {
        Self::new(|request| panic!("unexpected request to {}", request.url))
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        // Let other in-flight requests interleave, like real I/O would
        tokio::task::yield_now().await;
        (self.handler)(&request)
    }
}

/// Navigator and notifier that remember what they were asked to do.
#[derive(Default)]
pub(crate) struct RecordingShell {
    routes: Mutex<Vec<Route>>,
    notices: Mutex<Vec<Notice>>,
}

impl RecordingShell {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn routes(&self) -> Vec<Route> {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for RecordingShell {
    fn navigate(&self, route: Route) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(route);
    }
}

impl Notifier for RecordingShell {
    fn notify(&self, notice: Notice) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
    }
}

pub(crate) fn store_with(
    transport: Arc<ScriptedTransport>,
    storage: Arc<MemoryStorage>,
    shell: Arc<RecordingShell>,
    refresh_mode: RefreshMode,
) -> SessionStore {
    SessionStore::new(
        TEST_BASE_URL,
        refresh_mode,
        Collaborators {
            transport,
            storage,
            navigator: shell.clone(),
            notifier: shell,
        },
    )
}

/// Unsigned JWT carrying `claims` as its payload.
pub(crate) fn jwt_with_claims(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.signature", header, payload)
}

pub(crate) fn jwt_expiring_in(secs: i64) -> String {
    jwt_with_claims(serde_json::json!({
        "token_type": "access",
        "exp": Utc::now().timestamp() + secs,
        "user_id": 4,
    }))
}

pub(crate) fn fresh_pair() -> TokenPair {
    TokenPair::new(jwt_expiring_in(3600), "refresh-fresh")
}

pub(crate) fn expired_pair() -> TokenPair {
    TokenPair::new(jwt_expiring_in(-60), "refresh-stale")
}

pub(crate) fn json_response(status: StatusCode, body: serde_json::Value) -> ApiResponse {
    ApiResponse::new(status, body.to_string())
}
