use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// A token whose remaining lifetime is below this is treated as expired.
const EXPIRY_MARGIN_MS: i64 = 1;

/// Access/refresh token pair as issued by `/auth/token/`.
///
/// Always replaced as a whole; never patched field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Claims read from the access token payload. The signature is not checked;
/// the server does that.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessClaims {
    pub exp: Option<f64>,
    pub iat: Option<f64>,
    pub token_type: Option<String>,
    pub jti: Option<String>,
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("token has no payload segment")]
    MissingPayload,

    #[error("token payload is not base64url: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("token payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }

    pub fn access_claims(&self) -> Result<AccessClaims, TokenError> {
        decode_claims(&self.access)
    }

    /// When the access token stops being valid. A missing `exp` claim, or a
    /// token that cannot be decoded, counts as the Unix epoch.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let exp = match self.access_claims() {
            Ok(claims) => claims.exp,
            Err(e) => {
                warn!(error = %e, "Could not decode access token, treating it as expired");
                None
            }
        };
        exp.and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64))
            .unwrap_or_default()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() - now < Duration::milliseconds(EXPIRY_MARGIN_MS)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at() - Utc::now()
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        self.time_until_expiry().num_minutes().max(0)
    }
}

fn decode_claims(token: &str) -> Result<AccessClaims, TokenError> {
    let payload = token.split('.').nth(1).ok_or(TokenError::MissingPayload)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    Ok(serde_json::from_slice(&bytes)?)
}
