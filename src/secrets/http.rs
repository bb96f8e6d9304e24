//! HTTP client for HashiCorp Vault / OpenBao.
//!
//! Implements [`VaultApi`] over the service's JSON API with `reqwest`.
//! The session token lives behind a lock inside the client so that the
//! renewal loop can swap it while store operations keep using the same
//! `Arc<VaultHttpClient>`.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::api::{LoginRequest, VaultApi};
use super::types::{Secret, SecretString};
use crate::config::VaultSettings;
use crate::errors::{Result, VaultError};

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";
const REQUEST_HEADER: &str = "X-Vault-Request";

/// Error body returned by the service on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    errors: Vec<String>,
}

/// Which token, if any, to attach to a request.
enum TokenSource<'a> {
    None,
    Current,
    Explicit(&'a SecretString),
}

/// Vault HTTP client.
pub struct VaultHttpClient {
    http: Client,
    address: String,
    namespace: Option<String>,
    token: RwLock<Option<SecretString>>,
}

impl std::fmt::Debug for VaultHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultHttpClient")
            .field("address", &self.address)
            .field("namespace", &self.namespace)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl VaultHttpClient {
    /// Create a client for the service at `address`.
    pub fn new(address: &str, namespace: Option<String>, timeout: Duration) -> Result<Self> {
        let http = ClientBuilder::new()
            .timeout(timeout)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| VaultError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            address: address.trim_end_matches('/').to_string(),
            namespace,
            token: RwLock::new(None),
        })
    }

    /// Create a client from validated settings.
    pub fn from_settings(settings: &VaultSettings) -> Result<Self> {
        Self::new(
            &settings.address,
            settings.namespace.clone(),
            Duration::from_secs(settings.timeout_seconds),
        )
    }

    /// Get the base address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether a session token has been installed.
    pub async fn has_token(&self) -> bool {
        self.token.read().await.is_some()
    }

    async fn execute(
        &self,
        operation: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
        token: TokenSource<'_>,
    ) -> Result<Option<Secret>> {
        let path = path.trim_start_matches('/');
        let url = format!("{}/v1/{}", self.address, path);

        let mut request =
            self.http.request(method.clone(), &url).header(REQUEST_HEADER, "true");

        match token {
            TokenSource::None => {}
            TokenSource::Current => {
                if let Some(token) = self.token.read().await.as_ref() {
                    request = request.header(TOKEN_HEADER, token.expose_secret());
                }
            }
            TokenSource::Explicit(token) => {
                request = request.header(TOKEN_HEADER, token.expose_secret());
            }
        }

        if let Some(ref namespace) = self.namespace {
            request = request.header(NAMESPACE_HEADER, namespace);
        }

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VaultError::io(operation, path, None, e.to_string()))?;

        let status = response.status();
        debug!(operation, path, status = status.as_u16(), "remote call completed");

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if status == StatusCode::NOT_FOUND && method == Method::GET {
            return Ok(None);
        }

        let text = response
            .text()
            .await
            .map_err(|e| VaultError::io(operation, path, Some(status.as_u16()), e.to_string()))?;

        if !status.is_success() {
            let errors: ErrorResponse = serde_json::from_str(&text).unwrap_or_default();
            let message = if errors.errors.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                errors.errors.join("; ")
            };
            return Err(VaultError::io(operation, path, Some(status.as_u16()), message));
        }

        if text.trim().is_empty() {
            return Ok(None);
        }

        let secret: Secret = serde_json::from_str(&text).map_err(|e| {
            VaultError::decode(format!("{} response from '{}'", operation, path), e.to_string())
        })?;

        Ok(Some(secret))
    }
}

#[async_trait]
impl VaultApi for VaultHttpClient {
    #[instrument(skip(self, request), fields(path = %request.path))]
    async fn login(&self, request: &LoginRequest) -> Result<Option<Secret>> {
        let body = Value::Object(request.body.clone());
        self.execute("login", Method::POST, &request.path, Some(&body), TokenSource::None).await
    }

    async fn set_token(&self, token: SecretString) {
        *self.token.write().await = Some(token);
    }

    #[instrument(skip(self, token))]
    async fn renew_token(&self, token: &SecretString, increment: Duration) -> Result<Secret> {
        let path = "auth/token/renew-self";
        let body = json!({ "increment": format!("{}s", increment.as_secs()) });
        self.execute("renew", Method::POST, path, Some(&body), TokenSource::Explicit(token))
            .await?
            .ok_or_else(|| VaultError::watcher("token renewal returned no data"))
    }

    #[instrument(skip(self))]
    async fn renew_lease(&self, lease_id: &str, increment: Duration) -> Result<Secret> {
        let path = "sys/leases/renew";
        let body = json!({ "lease_id": lease_id, "increment": increment.as_secs() });
        self.execute("renew", Method::PUT, path, Some(&body), TokenSource::Current)
            .await?
            .ok_or_else(|| VaultError::watcher("lease renewal returned no data"))
    }

    #[instrument(skip(self))]
    async fn read(&self, path: &str) -> Result<Option<Secret>> {
        self.execute("read", Method::GET, path, None, TokenSource::Current).await
    }

    #[instrument(skip(self, data))]
    async fn write(&self, path: &str, data: &Map<String, Value>) -> Result<Option<Secret>> {
        let body = Value::Object(data.clone());
        self.execute("write", Method::PUT, path, Some(&body), TokenSource::Current).await
    }
}
