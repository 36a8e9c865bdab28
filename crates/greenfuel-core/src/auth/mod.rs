//! Authentication state and its persistence.
//!
//! This module provides:
//! - `SessionStore`: the single owner of the session (tokens, profile, base URL)
//! - `TokenPair`: access/refresh tokens and access-token expiry
//! - `UserProfile`: the signed-in user
//! - `SessionStorage` backends: in-memory, JSON file, OS keychain

pub mod credentials;
pub mod profile;
pub mod session;
pub mod storage;
pub mod token;

pub use credentials::KeyringStorage;
pub use profile::{OrgRef, UserProfile};
pub use session::{Collaborators, LoginOutcome, RefreshMode, Session, SessionStore};
pub use storage::{Cookie, FileStorage, MemoryStorage, SessionStorage, StorageError};
pub use token::{AccessClaims, TokenError, TokenPair};
