//! Request/response hooks, kept free of I/O so any transport can compose
//! them.
//!
//! `authorize` and `needs_refresh` make up the pre-send transform;
//! `classify` and `notice_for` make up the post-receive classifier.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;

use super::{ApiError, ApiRequest, ApiResponse, TransportError};
use crate::auth::TokenPair;
use crate::shell::Notice;

const NETWORK_FAILURE_NOTICE: &str = "Something went wrong";

/// What a completed request means for the session and the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// 401: the server no longer accepts the session.
    SessionInvalid,
    /// Any other non-2xx status.
    ErrorStatus(StatusCode),
    /// No response at all.
    NetworkError,
}

pub fn bearer_value(access: &str) -> Result<HeaderValue, ApiError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", access))
        .map_err(|e| ApiError::InvalidRequest(format!("Access token is not a valid header: {}", e)))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Attach the access token of `tokens` as the bearer credential, replacing
/// any previous Authorization header.
pub fn authorize(request: &mut ApiRequest, tokens: &TokenPair) -> Result<(), ApiError> {
    request
        .headers
        .insert(AUTHORIZATION, bearer_value(&tokens.access)?);
    Ok(())
}

pub fn needs_refresh(tokens: &TokenPair, now: DateTime<Utc>) -> bool {
    tokens.is_expired_at(now)
}

pub fn classify(outcome: &Result<ApiResponse, TransportError>) -> ResponseClass {
    match outcome {
        Ok(response) if response.is_success() => ResponseClass::Success,
        Ok(response) if response.status == StatusCode::UNAUTHORIZED => {
            ResponseClass::SessionInvalid
        }
        Ok(response) => ResponseClass::ErrorStatus(response.status),
        Err(_) => ResponseClass::NetworkError,
    }
}

/// The message to show for a class of response, if any. A rejected session
/// redirects instead of notifying.
pub fn notice_for(class: ResponseClass) -> Option<Notice> {
    match class {
        ResponseClass::Success | ResponseClass::SessionInvalid => None,
        ResponseClass::ErrorStatus(status) => Some(Notice::error(format!(
            "An error occurred ({})",
            status.as_u16()
        ))),
        ResponseClass::NetworkError => Some(Notice::error(NETWORK_FAILURE_NOTICE)),
    }
}
