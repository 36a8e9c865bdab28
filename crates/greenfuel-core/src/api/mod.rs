//! HTTP plumbing for the greenfuel REST API.
//!
//! - `transport`: the request/response types and the `Transport` seam, with a
//!   `reqwest` implementation
//! - `interceptor`: the pre-send and post-receive hook functions
//! - `client`: `AuthenticatedClient`, which composes the hooks around a
//!   transport for every request
//!
//! The API uses JWT bearer authentication; access tokens are refreshed
//! through `/auth/token/refresh/` when they expire.

pub mod client;
pub mod error;
pub mod interceptor;
pub mod transport;

pub use client::AuthenticatedClient;
pub use error::ApiError;
pub use interceptor::ResponseClass;
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport, TransportError};
