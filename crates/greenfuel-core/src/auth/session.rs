//! The process-wide session: token pair, user profile, base URL.
//!
//! `SessionStore` is the only writer of session state. Every mutation goes
//! through its methods so that the token pair is always replaced as a whole
//! and memory and durable storage are updated together. Observers receive
//! changes through a `tokio::sync::watch` channel.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::storage::{
    Cookie, SessionStorage, ACCESS_TOKEN_KEY, USER_INFO_KEY, USER_ROLE_COOKIE,
};
use super::{TokenPair, UserProfile};
use crate::api::{ApiError, ApiRequest, ApiResponse, Transport};
use crate::shell::{Navigator, Notifier, Route};

const TOKEN_PATH: &str = "/auth/token/";
const REFRESH_PATH: &str = "/auth/token/refresh/";
const USER_PATH: &str = "/auth/user/";

const LOGIN_SUCCESS: &str = "Login successful";
const INVALID_CREDENTIALS: &str = "Invalid credentials";
const INVALID_EMAIL_OR_PASSWORD: &str = "Invalid email or password";
const ACCOUNT_INACTIVE: &str = "Your account is inactive";
const LOGIN_FAILED: &str = "Login failed. Please try again.";
const NETWORK_ERROR: &str = "Network error. Please check your connection.";

/// Snapshot of the session. `base_url` never changes after construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub tokens: Option<TokenPair>,
    pub user: Option<UserProfile>,
    pub base_url: String,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }
}

/// Result of a login attempt, shaped for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct LoginOutcome {
    pub success: bool,
    pub message: String,
}

impl LoginOutcome {
    fn success() -> Self {
        Self {
            success: true,
            message: LOGIN_SUCCESS.to_string(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// How concurrent refreshes of an expired token are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshMode {
    /// Every request that sees an expired token refreshes on its own.
    #[default]
    Independent,
    /// Requests racing on an expired token share one in-flight refresh.
    Coalesce,
}

/// Everything the session store talks to outside the process.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub storage: Arc<dyn SessionStorage>,
    pub navigator: Arc<dyn Navigator>,
    pub notifier: Arc<dyn Notifier>,
}

/// Refresh responses may omit the refresh token when the server does not
/// rotate it.
#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    refresh: Option<String>,
}

type SharedRefresh = Shared<BoxFuture<'static, Result<TokenPair, ApiError>>>;

struct Inner {
    state: watch::Sender<Session>,
    collaborators: Collaborators,
    refresh_mode: RefreshMode,
    pending_refresh: Mutex<Option<SharedRefresh>>,
}

/// Single source of truth for authentication state.
/// Clone is cheap and every clone sees the same session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<Inner>,
}

impl SessionStore {
    /// Create the store and hydrate it from durable storage. Missing or
    /// malformed stored values yield an empty session.
    pub fn new(
        base_url: impl Into<String>,
        refresh_mode: RefreshMode,
        collaborators: Collaborators,
    ) -> Self {
        let base_url: String = base_url.into();
        let storage = collaborators.storage.as_ref();
        let session = Session {
            tokens: load_json(storage, ACCESS_TOKEN_KEY),
            user: load_json(storage, USER_INFO_KEY),
            base_url: base_url.trim_end_matches('/').to_string(),
        };
        debug!(
            base_url = %session.base_url,
            has_tokens = session.tokens.is_some(),
            has_user = session.user.is_some(),
            ?refresh_mode,
            "Session hydrated"
        );

        let (state, _) = watch::channel(session);
        Self {
            inner: Arc::new(Inner {
                state,
                collaborators,
                refresh_mode,
                pending_refresh: Mutex::new(None),
            }),
        }
    }

    // ===== Read access =====

    pub fn snapshot(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.inner.state.borrow().tokens.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.inner.state.borrow().user.clone()
    }

    pub fn base_url(&self) -> String {
        self.inner.state.borrow().base_url.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.collaborators.transport
    }

    pub(crate) fn navigator(&self) -> &dyn Navigator {
        self.inner.collaborators.navigator.as_ref()
    }

    pub(crate) fn notifier(&self) -> &dyn Notifier {
        self.inner.collaborators.notifier.as_ref()
    }

    fn storage(&self) -> &dyn SessionStorage {
        self.inner.collaborators.storage.as_ref()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.inner.state.borrow().base_url, path)
    }

    // ===== Mutation =====

    /// Replace the token pair in memory and durable storage.
    pub fn set_tokens(&self, tokens: TokenPair) {
        persist_json(self.storage(), ACCESS_TOKEN_KEY, &tokens);
        self.inner.state.send_modify(|session| {
            session.tokens = Some(tokens);
        });
    }

    /// Replace the user profile in memory and durable storage.
    pub fn set_user(&self, user: UserProfile) {
        persist_json(self.storage(), USER_INFO_KEY, &user);
        self.inner.state.send_modify(|session| {
            session.user = Some(user);
        });
    }

    /// Drop the in-memory session after the server rejected it. Durable
    /// storage is left for the next login to overwrite.
    pub fn invalidate(&self) {
        let changed = self.inner.state.send_if_modified(clear_session);
        if changed {
            info!("Session invalidated");
        }
    }

    /// Like [`invalidate`](Self::invalidate), but only while the session
    /// still holds `stale`. A pair stored by a concurrent refresh survives.
    /// Returns true when the session was cleared.
    pub fn invalidate_if(&self, stale: &TokenPair) -> bool {
        let changed = self.inner.state.send_if_modified(|session| {
            if session.tokens.as_ref() != Some(stale) {
                return false;
            }
            clear_session(session)
        });
        if changed {
            info!("Session invalidated");
        }
        changed
    }

    /// Clear the session from memory and durable storage, then send the user
    /// to the login page. Safe to call when already logged out.
    pub fn logout(&self) {
        let was_authenticated = self.inner.state.send_if_modified(clear_session);

        let storage = self.storage();
        for key in [ACCESS_TOKEN_KEY, USER_INFO_KEY] {
            if let Err(e) = storage.remove(key) {
                warn!(key, error = %e, "Failed to remove stored session value");
            }
        }
        if let Err(e) = storage.remove_cookie(USER_ROLE_COOKIE) {
            warn!(error = %e, "Failed to remove role cookie");
        }

        if was_authenticated {
            info!("Logged out");
        }
        self.navigator().navigate(Route::Login);
    }

    // ===== Login =====

    /// Exchange credentials for a token pair and load the user profile.
    ///
    /// Never fails: every outcome, including transport failures, is reported
    /// through the returned message. The session is only touched once the
    /// token exchange succeeds.
    pub async fn login(&self, email: &str, password: &str) -> LoginOutcome {
        let request = ApiRequest::post(self.endpoint(TOKEN_PATH))
            .with_json(json!({ "email": email, "password": password }));

        let response = match self.transport().execute(request).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Login error");
                return LoginOutcome::failure(NETWORK_ERROR);
            }
        };

        match response.status.as_u16() {
            200 => self.complete_login(&response).await,
            400 => {
                let detail = response.detail();
                warn!(?detail, "Login rejected");
                LoginOutcome::failure(detail.unwrap_or_else(|| INVALID_CREDENTIALS.to_string()))
            }
            401 => {
                warn!("Login rejected: invalid email or password");
                LoginOutcome::failure(INVALID_EMAIL_OR_PASSWORD)
            }
            403 => {
                warn!("Login rejected: account inactive");
                LoginOutcome::failure(ACCOUNT_INACTIVE)
            }
            status => {
                warn!(status, "Unexpected login response");
                LoginOutcome::failure(response.detail().unwrap_or_else(|| LOGIN_FAILED.to_string()))
            }
        }
    }

    async fn complete_login(&self, response: &ApiResponse) -> LoginOutcome {
        let tokens: TokenPair = match response.json() {
            Ok(tokens) => tokens,
            Err(e) => {
                error!(error = %e, "Login succeeded but the token response was unusable");
                return LoginOutcome::failure(LOGIN_FAILED);
            }
        };
        self.set_tokens(tokens.clone());

        match self.fetch_user(&tokens).await {
            Ok(Some(user)) => {
                if let Some(role) = user.role() {
                    let cookie = Cookie::new(USER_ROLE_COOKIE, role);
                    if let Err(e) = self.storage().set_cookie(&cookie) {
                        warn!(error = %e, "Failed to set role cookie");
                    }
                }
                self.set_user(user);
            }
            Ok(None) => self.clear_user(),
            Err(e) => {
                error!(error = %e, "Login error while loading user profile");
                self.clear_user();
                return LoginOutcome::failure(NETWORK_ERROR);
            }
        }

        info!("Login successful");
        self.navigator().navigate(Route::Dashboard);
        LoginOutcome::success()
    }

    /// `Ok(None)` when the server answered with an error status; `Err` when
    /// there was no usable answer at all.
    async fn fetch_user(&self, tokens: &TokenPair) -> Result<Option<UserProfile>, ApiError> {
        let mut request = ApiRequest::get(self.endpoint(USER_PATH));
        crate::api::interceptor::authorize(&mut request, tokens)?;

        let response = self.transport().execute(request).await?;
        if !response.is_success() {
            warn!(
                error = %ApiError::from_status(response.status, &response.text()),
                "Failed to fetch user profile after login"
            );
            return Ok(None);
        }
        response.json().map(Some)
    }

    /// Drop any profile left over from an earlier login, so new tokens are
    /// never paired with another user's profile.
    fn clear_user(&self) {
        let storage = self.storage();
        if let Err(e) = storage.remove(USER_INFO_KEY) {
            warn!(key = USER_INFO_KEY, error = %e, "Failed to remove stored session value");
        }
        if let Err(e) = storage.remove_cookie(USER_ROLE_COOKIE) {
            warn!(error = %e, "Failed to remove role cookie");
        }
        self.inner.state.send_if_modified(|session| session.user.take().is_some());
    }

    // ===== Refresh =====

    /// Exchange the current refresh token for a new pair and store it.
    pub async fn refresh(&self) -> Result<TokenPair, ApiError> {
        let current = self.tokens().ok_or(ApiError::NoSession)?;

        let tokens = match self.inner.refresh_mode {
            RefreshMode::Independent => {
                request_refresh(self.transport().clone(), self.endpoint(REFRESH_PATH), current)
                    .await?
            }
            RefreshMode::Coalesce => self.coalesced_refresh(current).await?,
        };

        self.set_tokens(tokens.clone());
        debug!(expires_at = %tokens.expires_at(), "Access token refreshed");
        Ok(tokens)
    }

    async fn coalesced_refresh(&self, current: TokenPair) -> Result<TokenPair, ApiError> {
        let pending = {
            let mut slot = self
                .inner
                .pending_refresh
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!("Joining in-flight token refresh");
                    in_flight.clone()
                }
                None => {
                    let refresh = request_refresh(
                        self.transport().clone(),
                        self.endpoint(REFRESH_PATH),
                        current,
                    )
                    .boxed()
                    .shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        let result = pending.clone().await;

        let mut slot = self
            .inner
            .pending_refresh
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|in_flight| in_flight.ptr_eq(&pending)) {
            *slot = None;
        }
        result
    }
}

async fn request_refresh(
    transport: Arc<dyn Transport>,
    url: String,
    current: TokenPair,
) -> Result<TokenPair, ApiError> {
    let request = ApiRequest::post(url).with_json(json!({ "refresh": current.refresh }));
    let response = transport.execute(request).await?;
    if !response.is_success() {
        return Err(ApiError::from_status(response.status, &response.text()));
    }

    let refreshed: RefreshResponse = response.json()?;
    Ok(TokenPair {
        access: refreshed.access,
        refresh: refreshed.refresh.unwrap_or(current.refresh),
    })
}

fn clear_session(session: &mut Session) -> bool {
    let changed = session.tokens.is_some() || session.user.is_some();
    session.tokens = None;
    session.user = None;
    changed
}

fn load_json<T: DeserializeOwned>(storage: &dyn SessionStorage, key: &str) -> Option<T> {
    match storage.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Ignoring malformed stored session value");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(key, error = %e, "Failed to read stored session value");
            None
        }
    }
}

fn persist_json<T: Serialize>(storage: &dyn SessionStorage, key: &str, value: &T) {
    let result = serde_json::to_string(value)
        .map_err(super::StorageError::from)
        .and_then(|raw| storage.set(key, &raw));
    if let Err(e) = result {
        warn!(key, error = %e, "Failed to persist session value");
    }
}
