//! Boundary to the remote secret service.
//!
//! Everything the engine needs from the service goes through [`VaultApi`]:
//! login, token and lease renewal, and the two logical primitives (read,
//! write) that KV v2 and transit are built on. [`VaultHttpClient`] is the
//! production implementation; tests provide an in-memory one.
//!
//! [`VaultHttpClient`]: super::http::VaultHttpClient

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

use super::types::{Secret, SecretString};
use crate::errors::Result;

/// A login call: where to send it and what to send.
#[derive(Clone)]
pub struct LoginRequest {
    /// Logical path, e.g. `auth/approle/login`
    pub path: String,
    /// Request body; contains credentials and must never be logged
    pub body: Map<String, Value>,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("path", &self.path)
            .field("body", &format!("[{} fields REDACTED]", self.body.len()))
            .finish()
    }
}

/// Operations consumed from the remote secret service.
///
/// Implementations must be cheap to share behind an `Arc`; the renewal loop,
/// every lease watcher and the secret store all hold the same handle.
#[async_trait]
pub trait VaultApi: Send + Sync + fmt::Debug {
    /// Submit a login payload. `Ok(None)` means the call succeeded but the
    /// service returned no session.
    async fn login(&self, request: &LoginRequest) -> Result<Option<Secret>>;

    /// Replace the token used for all subsequent authenticated calls.
    async fn set_token(&self, token: SecretString);

    /// Extend the TTL of `token` by `increment`.
    async fn renew_token(&self, token: &SecretString, increment: Duration) -> Result<Secret>;

    /// Extend a lease by `increment`.
    async fn renew_lease(&self, lease_id: &str, increment: Duration) -> Result<Secret>;

    /// Logical read. `Ok(None)` means nothing is stored at `path`.
    async fn read(&self, path: &str) -> Result<Option<Secret>>;

    /// Logical write. `Ok(None)` means the service accepted the write
    /// without a response body.
    async fn write(&self, path: &str, data: &Map<String, Value>) -> Result<Option<Secret>>;
}
