//! Core library for the greenfuel business API.
//!
//! Provides the process-wide [`SessionStore`] (token pair, user profile,
//! durable persistence) and the [`AuthenticatedClient`], which attaches a
//! fresh bearer token to every request and refreshes an expired access token
//! before the request leaves the process.
//!
//! The HTTP transport, durable storage, navigation and user notifications are
//! injected as trait objects so the same core runs against `reqwest` and the
//! OS keychain in the binary, and against scripted collaborators in tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod shell;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{
    ApiError, ApiRequest, ApiResponse, AuthenticatedClient, ReqwestTransport, ResponseClass,
    Transport, TransportError,
};
pub use auth::{
    Collaborators, FileStorage, KeyringStorage, LoginOutcome, MemoryStorage, OrgRef, RefreshMode,
    Session, SessionStorage, SessionStore, StorageError, TokenPair, UserProfile,
};
pub use config::{resolve_base_url, Config, Environment, StorageBackend};
pub use shell::{Navigator, Notice, Notifier, Route};
