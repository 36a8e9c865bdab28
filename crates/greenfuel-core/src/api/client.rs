//! HTTP client bound to the current session.
//!
//! Every request passes through two hooks:
//! - pre-send: require a session, attach the bearer token, refresh it first
//!   when it has expired
//! - post-receive: redirect on 401, notify on other failures, and hand the
//!   response back to the caller either way

use chrono::Utc;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error, warn};

use super::interceptor::{self, ResponseClass};
use super::{ApiError, ApiRequest, ApiResponse, TransportError};
use crate::auth::SessionStore;
use crate::shell::Route;

/// Authenticated client for the greenfuel API.
///
/// Cheap to build; construct one per use from the shared `SessionStore`.
#[derive(Clone)]
pub struct AuthenticatedClient {
    store: SessionStore,
    default_headers: HeaderMap,
}

impl AuthenticatedClient {
    /// The default Authorization header uses whatever token is known right
    /// now; the pre-send hook replaces it before anything is sent.
    pub fn new(store: &SessionStore) -> Self {
        let mut default_headers = HeaderMap::new();
        let tokens = store.tokens();
        if let Some(value) = tokens
            .as_ref()
            .and_then(|t| interceptor::bearer_value(&t.access).ok())
        {
            default_headers.insert(AUTHORIZATION, value);
        }
        debug!(
            base_url = %store.base_url(),
            has_token = tokens.is_some(),
            "Authenticated client created"
        );

        Self {
            store: store.clone(),
            default_headers,
        }
    }

    /// Send a request through both hooks.
    ///
    /// `Err` only when the pre-send hook aborted, in which case nothing was
    /// sent. Otherwise the response is returned whatever its status, or
    /// `None` when the transport produced no response.
    pub async fn send(&self, request: ApiRequest) -> Result<Option<ApiResponse>, ApiError> {
        let request = self.prepare(request).await?;
        let outcome = self.store.transport().execute(request).await;
        Ok(self.receive(outcome))
    }

    pub async fn get(&self, path: &str) -> Result<Option<ApiResponse>, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Option<ApiResponse>, ApiError> {
        self.send(ApiRequest::delete(path)).await
    }

    pub async fn post<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<ApiResponse>, ApiError> {
        self.send(ApiRequest::post(path).with_json(to_json(body)?))
            .await
    }

    pub async fn put<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<ApiResponse>, ApiError> {
        self.send(ApiRequest::put(path).with_json(to_json(body)?))
            .await
    }

    pub async fn patch<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<ApiResponse>, ApiError> {
        self.send(ApiRequest::patch(path).with_json(to_json(body)?))
            .await
    }

    /// GET and parse, treating any unusable payload as an error.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        usable_payload(self.get(path).await?)
    }

    /// POST and parse, treating any unusable payload as an error.
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        usable_payload(self.post(path, body).await?)
    }

    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        format!(
            "{}/{}",
            self.store.base_url().trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    }

    /// Pre-send hook.
    async fn prepare(&self, mut request: ApiRequest) -> Result<ApiRequest, ApiError> {
        request.url = self.resolve_url(&request.url);
        for (name, value) in &self.default_headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }

        let Some(tokens) = self.store.tokens() else {
            warn!(url = %request.url, "Request attempted without a session");
            self.store.navigator().navigate(Route::Landing);
            return Err(ApiError::NoSession);
        };

        interceptor::authorize(&mut request, &tokens)?;
        if !interceptor::needs_refresh(&tokens, Utc::now()) {
            return Ok(request);
        }

        debug!(url = %request.url, "Access token expired, refreshing before request");
        match self.store.refresh().await {
            Ok(fresh) => {
                interceptor::authorize(&mut request, &fresh)?;
                Ok(request)
            }
            Err(e) => {
                error!(error = %e, "Error refreshing token");
                // A racing request may already have stored a newer pair
                if self.store.invalidate_if(&tokens) || !self.store.is_authenticated() {
                    self.store.navigator().navigate(Route::Login);
                }
                Err(ApiError::RefreshFailed(Box::new(e)))
            }
        }
    }

    /// Post-receive hook.
    fn receive(&self, outcome: Result<ApiResponse, TransportError>) -> Option<ApiResponse> {
        let class = interceptor::classify(&outcome);
        match class {
            ResponseClass::Success => {}
            ResponseClass::SessionInvalid => {
                warn!("Server rejected the session, redirecting to login");
                self.store.invalidate();
                self.store.navigator().navigate(Route::Login);
            }
            ResponseClass::ErrorStatus(status) => {
                let body = outcome.as_ref().map(ApiResponse::text).unwrap_or_default();
                warn!(%status, error = %ApiError::from_status(status, &body), "Request failed");
            }
            ResponseClass::NetworkError => {
                if let Err(ref e) = outcome {
                    error!(error = %e, timed_out = e.is_timeout(), "Request failed without a response");
                }
            }
        }
        if let Some(notice) = interceptor::notice_for(class) {
            self.store.notifier().notify(notice);
        }
        outcome.ok()
    }
}

fn to_json<B: Serialize>(body: &B) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize request body: {}", e)))
}

fn usable_payload<T: DeserializeOwned>(response: Option<ApiResponse>) -> Result<T, ApiError> {
    let response = response.ok_or(ApiError::NoResponse)?;
    if !response.is_success() {
        return Err(ApiError::from_status(response.status, &response.text()));
    }
    response.json()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use reqwest::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::auth::storage::ACCESS_TOKEN_KEY;
    use crate::auth::{MemoryStorage, RefreshMode, SessionStorage, TokenPair};
    use crate::shell::Notice;
    use crate::test_support::{
        expired_pair, fresh_pair, json_response, jwt_expiring_in, store_with, RecordingShell,
        ScriptedTransport,
    };

    const REFRESH_URL: &str = "http://api.test/auth/token/refresh/";

    fn seeded_storage(tokens: &TokenPair) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set(ACCESS_TOKEN_KEY, &serde_json::to_string(tokens).expect("serialize"))
            .expect("seed");
        storage
    }

    #[tokio::test]
    async fn test_fresh_token_skips_refresh() {
        let tokens = fresh_pair();
        let transport = ScriptedTransport::new(|_| Ok(json_response(StatusCode::OK, json!([]))));
        let shell = RecordingShell::new();
        let store = store_with(transport.clone(), seeded_storage(&tokens), shell.clone(), RefreshMode::Independent);

        let response = AuthenticatedClient::new(&store)
            .get("/departments/")
            .await
            .expect("request sent");

        assert_eq!(response.map(|r| r.status), Some(StatusCode::OK));
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "http://api.test/departments/");
        assert_eq!(requests[0].bearer_token(), Some(tokens.access.as_str()));
        assert!(shell.routes().is_empty());
        assert!(shell.notices().is_empty());
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_before_request() {
        let new_access = jwt_expiring_in(3600);
        let refreshed = TokenPair::new(new_access.clone(), "refresh-2");
        let body = serde_json::to_value(&refreshed).expect("serialize");
        let transport = ScriptedTransport::new(move |request| {
            if request.url == REFRESH_URL {
                Ok(json_response(StatusCode::OK, body.clone()))
            } else {
                Ok(json_response(StatusCode::OK, json!({ "id": 1 })))
            }
        });
        let stale = expired_pair();
        let storage = seeded_storage(&stale);
        let store = store_with(transport.clone(), storage.clone(), RecordingShell::new(), RefreshMode::Independent);

        let response = AuthenticatedClient::new(&store)
            .get("/designations/1/")
            .await
            .expect("request sent");
        assert!(response.is_some());

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].url, REFRESH_URL);
        assert_eq!(requests[0].body, Some(json!({ "refresh": stale.refresh })));
        assert_eq!(requests[1].bearer_token(), Some(new_access.as_str()));

        assert_eq!(store.tokens(), Some(refreshed.clone()));
        assert_eq!(
            storage.get(ACCESS_TOKEN_KEY).expect("get"),
            Some(serde_json::to_string(&refreshed).expect("serialize"))
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_aborts_request() {
        let transport = ScriptedTransport::new(|request| {
            assert_eq!(request.url, REFRESH_URL, "resource request must not be sent");
            Ok(json_response(
                StatusCode::UNAUTHORIZED,
                json!({ "detail": "Token is invalid or expired" }),
            ))
        });
        let shell = RecordingShell::new();
        let storage = seeded_storage(&expired_pair());
        let store = store_with(transport.clone(), storage.clone(), shell.clone(), RefreshMode::Independent);

        let result = AuthenticatedClient::new(&store).get("/departments/").await;

        assert!(matches!(result, Err(ApiError::RefreshFailed(_))));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(shell.routes(), vec![Route::Login]);
        assert!(!store.is_authenticated());
        // Durable state is left for the next login to overwrite
        assert!(storage.get(ACCESS_TOKEN_KEY).expect("get").is_some());
    }

    #[tokio::test]
    async fn test_refresh_network_failure_aborts_request() {
        let transport = ScriptedTransport::new(|_| Err(TransportError::timeout("timed out")));
        let shell = RecordingShell::new();
        let store = store_with(transport.clone(), seeded_storage(&expired_pair()), shell.clone(), RefreshMode::Independent);

        let result = AuthenticatedClient::new(&store).get("/departments/").await;

        match result {
            Err(ApiError::RefreshFailed(inner)) => {
                assert!(matches!(*inner, ApiError::NetworkError(ref e) if e.is_timeout()))
            }
            other => panic!("expected refresh failure, got {:?}", other.map(|r| r.map(|r| r.status))),
        }
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(shell.routes(), vec![Route::Login]);
    }

    #[tokio::test]
    async fn test_no_session_never_reaches_transport() {
        let shell = RecordingShell::new();
        let transport = ScriptedTransport::unreachable();
        let store = store_with(transport.clone(), Arc::new(MemoryStorage::new()), shell.clone(), RefreshMode::Independent);

        let result = AuthenticatedClient::new(&store)
            .post("/forms/", &json!({ "title": "Daily report" }))
            .await;

        assert!(matches!(result, Err(ApiError::NoSession)));
        assert!(transport.requests().is_empty());
        assert_eq!(shell.routes(), vec![Route::Landing]);
    }

    #[tokio::test]
    async fn test_401_redirects_even_with_unexpired_token() {
        let transport = ScriptedTransport::new(|_| {
            Ok(json_response(StatusCode::UNAUTHORIZED, json!({ "detail": "revoked" })))
        });
        let shell = RecordingShell::new();
        let store = store_with(transport, seeded_storage(&fresh_pair()), shell.clone(), RefreshMode::Independent);

        let response = AuthenticatedClient::new(&store)
            .get("/dashboard/stats/")
            .await
            .expect("hook resolves");

        assert_eq!(response.map(|r| r.status), Some(StatusCode::UNAUTHORIZED));
        assert_eq!(shell.routes(), vec![Route::Login]);
        assert!(shell.notices().is_empty());
        assert!(!store.is_authenticated());
    }

    #[tokio::test]
    async fn test_error_status_notifies_and_resolves() {
        let transport = ScriptedTransport::new(|_| {
            Ok(json_response(StatusCode::INTERNAL_SERVER_ERROR, json!({ "detail": "boom" })))
        });
        let shell = RecordingShell::new();
        let store = store_with(transport, seeded_storage(&fresh_pair()), shell.clone(), RefreshMode::Independent);
        let client = AuthenticatedClient::new(&store);

        let response = client.get("/departments/").await.expect("hook resolves");
        assert_eq!(
            response.and_then(|r| r.detail()),
            Some("boom".to_string())
        );
        assert_eq!(shell.notices(), vec![Notice::error("An error occurred (500)")]);
        assert!(shell.routes().is_empty());
        assert!(store.is_authenticated());

        let parsed: Result<serde_json::Value, _> = client.get_json("/departments/").await;
        assert!(matches!(parsed, Err(ApiError::ServerError(_))));
    }

    #[tokio::test]
    async fn test_network_failure_notifies_and_yields_nothing() {
        let transport = ScriptedTransport::new(|_| Err(TransportError::new("connection refused")));
        let shell = RecordingShell::new();
        let store = store_with(transport, seeded_storage(&fresh_pair()), shell.clone(), RefreshMode::Independent);
        let client = AuthenticatedClient::new(&store);

        let response = client.delete("/departments/3/").await.expect("hook resolves");
        assert!(response.is_none());
        assert_eq!(shell.notices(), vec![Notice::error("Something went wrong")]);

        let parsed: Result<serde_json::Value, _> = client.get_json("/departments/").await;
        assert!(matches!(parsed, Err(ApiError::NoResponse)));
    }

    #[tokio::test]
    async fn test_get_json_parses_payload() {
        let transport = ScriptedTransport::new(|request| {
            assert_eq!(request.url, "https://other.test/health/");
            Ok(json_response(StatusCode::OK, json!({ "status": "ok" })))
        });
        let store = store_with(transport, seeded_storage(&fresh_pair()), RecordingShell::new(), RefreshMode::Independent);

        let health: serde_json::Value = AuthenticatedClient::new(&store)
            .get_json("https://other.test/health/")
            .await
            .expect("payload parses");
        assert_eq!(health["status"], "ok");
    }

    #[tokio::test]
    async fn test_write_verbs_send_json_bodies() {
        let transport = ScriptedTransport::new(|request| {
            Ok(json_response(StatusCode::OK, json!({ "id": 7, "method": request.method.as_str() })))
        });
        let tokens = fresh_pair();
        let store = store_with(transport.clone(), seeded_storage(&tokens), RecordingShell::new(), RefreshMode::Independent);
        let client = AuthenticatedClient::new(&store);

        let put = client
            .put("/departments/7/", &json!({ "name": "Boilers" }))
            .await
            .expect("put sent");
        let patch = client
            .patch("departments/7/", &json!({ "head": 4 }))
            .await
            .expect("patch sent");
        assert_eq!(put.map(|r| r.status), Some(StatusCode::OK));
        assert_eq!(patch.map(|r| r.status), Some(StatusCode::OK));

        #[derive(serde::Deserialize)]
        struct Created {
            id: i64,
            method: String,
        }
        let created: Created = client
            .post_json("/departments/", &json!({ "name": "Boilers" }))
            .await
            .expect("payload parses");
        assert_eq!(created.id, 7);
        assert_eq!(created.method, "POST");

        let requests = transport.requests();
        let sent: Vec<(&str, &str)> = requests
            .iter()
            .map(|r| (r.method.as_str(), r.url.as_str()))
            .collect();
        assert_eq!(
            sent,
            vec![
                ("PUT", "http://api.test/departments/7/"),
                ("PATCH", "http://api.test/departments/7/"),
                ("POST", "http://api.test/departments/"),
            ]
        );
        assert_eq!(requests[0].body, Some(json!({ "name": "Boilers" })));
        assert_eq!(requests[1].body, Some(json!({ "head": 4 })));
        for request in &requests {
            assert_eq!(request.bearer_token(), Some(tokens.access.as_str()));
        }
    }

    #[tokio::test]
    async fn test_post_json_rejects_error_status() {
        let transport = ScriptedTransport::new(|_| {
            Ok(json_response(StatusCode::NOT_FOUND, json!({ "detail": "Not found." })))
        });
        let shell = RecordingShell::new();
        let store = store_with(transport, seeded_storage(&fresh_pair()), shell.clone(), RefreshMode::Independent);

        let result: Result<serde_json::Value, _> = AuthenticatedClient::new(&store)
            .post_json("/forms/99/submit/", &json!({}))
            .await;

        assert!(matches!(result, Err(ApiError::NotFound(_))));
        assert_eq!(shell.notices(), vec![Notice::error("An error occurred (404)")]);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_pair_from_racing_refresh() {
        let refresh_calls = Arc::new(AtomicUsize::new(0));
        let calls = refresh_calls.clone();
        let transport = ScriptedTransport::new(move |request| {
            if request.url != REFRESH_URL {
                return Ok(json_response(StatusCode::OK, json!([])));
            }
            // Rotation: the stale refresh token is only accepted once
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(json_response(
                    StatusCode::OK,
                    json!({ "access": jwt_expiring_in(3600), "refresh": "rotated" }),
                ))
            } else {
                Ok(json_response(
                    StatusCode::UNAUTHORIZED,
                    json!({ "detail": "Token is blacklisted" }),
                ))
            }
        });
        let shell = RecordingShell::new();
        let store = store_with(transport.clone(), seeded_storage(&expired_pair()), shell.clone(), RefreshMode::Independent);
        let first = AuthenticatedClient::new(&store);
        let second = AuthenticatedClient::new(&store);

        let (a, b) = tokio::join!(first.get("/departments/"), second.get("/designations/"));

        let results = [a, b];
        assert_eq!(refresh_calls.load(Ordering::SeqCst), 2);
        assert_eq!(results.iter().filter(|r| matches!(r, Ok(Some(_)))).count(), 1);
        assert_eq!(
            results.iter().filter(|r| matches!(r, Err(ApiError::RefreshFailed(_)))).count(),
            1
        );
        assert_eq!(store.tokens().map(|t| t.refresh), Some("rotated".to_string()));
        assert!(shell.routes().is_empty());
    }

    async fn race_two_requests(mode: RefreshMode) -> (usize, Vec<ApiRequest>, SessionStore) {
        let transport = ScriptedTransport::new(|request| {
            if request.url == REFRESH_URL {
                Ok(json_response(
                    StatusCode::OK,
                    json!({ "access": jwt_expiring_in(3600), "refresh": "rotated" }),
                ))
            } else {
                Ok(json_response(StatusCode::OK, json!([])))
            }
        });
        let store = store_with(transport.clone(), seeded_storage(&expired_pair()), RecordingShell::new(), mode);
        let first = AuthenticatedClient::new(&store);
        let second = AuthenticatedClient::new(&store);

        let (a, b) = tokio::join!(first.get("/departments/"), second.get("/designations/"));
        assert!(a.expect("first sent").is_some());
        assert!(b.expect("second sent").is_some());

        let requests = transport.requests();
        let refreshes = requests.iter().filter(|r| r.url == REFRESH_URL).count();
        (refreshes, requests, store)
    }

    #[tokio::test]
    async fn test_racing_requests_refresh_independently() {
        let (refreshes, requests, store) = race_two_requests(RefreshMode::Independent).await;
        assert_eq!(refreshes, 2);
        assert_eq!(requests.len(), 4);
        assert_eq!(store.tokens().map(|t| t.refresh), Some("rotated".to_string()));
    }

    #[tokio::test]
    async fn test_racing_requests_share_refresh_when_coalescing() {
        let (refreshes, requests, store) = race_two_requests(RefreshMode::Coalesce).await;
        assert_eq!(refreshes, 1);
        assert_eq!(requests.len(), 3);

        let access = store.tokens().map(|t| t.access).expect("session kept");
        for request in requests.iter().filter(|r| r.url != REFRESH_URL) {
            assert_eq!(request.bearer_token(), Some(access.as_str()));
        }
    }
}
