//! Secret store facade: KV v2, generic logical paths and transit.
//!
//! Every operation takes the caller's [`CancellationToken`] and fails with
//! [`VaultError::Cancelled`] if it fires first. Operations run on the shared,
//! already-authenticated client and never touch the renewal loop's state.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::api::VaultApi;
use super::types::{KvSecret, KvVersionMetadata, Secret, TransitCiphertext};
use crate::errors::{Result, VaultError};

/// Transit paths used by [`SecretStore::encrypt`] and [`SecretStore::decrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitPaths {
    /// e.g. `transit/encrypt/my-key`
    pub encrypt: String,
    /// e.g. `transit/decrypt/my-key`
    pub decrypt: String,
}

impl TransitPaths {
    pub fn new(encrypt: impl Into<String>, decrypt: impl Into<String>) -> Self {
        Self { encrypt: encrypt.into(), decrypt: decrypt.into() }
    }
}

/// Facade over the remote secret service.
#[derive(Clone)]
pub struct SecretStore {
    api: Arc<dyn VaultApi>,
    transit: TransitPaths,
}

impl std::fmt::Debug for SecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretStore").field("api", &self.api).field("transit", &self.transit).finish()
    }
}

async fn cancellable<T, F>(ctx: &CancellationToken, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(VaultError::cancelled(operation)),
        result = call => result,
    }
}

fn kv_data_path(mount: &str, name: &str) -> String {
    format!("{}/data/{}", mount.trim_matches('/'), name.trim_start_matches('/'))
}

impl SecretStore {
    pub fn new(api: Arc<dyn VaultApi>, transit: TransitPaths) -> Self {
        Self { api, transit }
    }

    /// The underlying client handle, for building lease watchers.
    pub fn client(&self) -> &Arc<dyn VaultApi> {
        &self.api
    }

    pub fn transit_paths(&self) -> &TransitPaths {
        &self.transit
    }

    /// Read the latest version of a KV v2 entry.
    pub async fn get_kv(&self, ctx: &CancellationToken, mount: &str, name: &str) -> Result<KvSecret> {
        let path = kv_data_path(mount, name);
        let secret = cancellable(ctx, "get_kv", self.api.read(&path))
            .await?
            .ok_or_else(|| VaultError::not_found(&path))?;

        let data = match secret.get("data") {
            Some(Value::Object(map)) => map.clone(),
            // Deleted versions come back with a null payload.
            Some(Value::Null) | None => return Err(VaultError::not_found(&path)),
            Some(other) => {
                return Err(VaultError::decode(
                    format!("kv entry '{}'", path),
                    format!("expected an object, found {}", other),
                ))
            }
        };

        let metadata = match secret.get("metadata") {
            Some(value @ Value::Object(_)) => Some(
                serde_json::from_value::<KvVersionMetadata>(value.clone()).map_err(|e| {
                    VaultError::decode(format!("kv metadata '{}'", path), e.to_string())
                })?,
            ),
            _ => None,
        };

        debug!(path = %path, version = ?metadata.as_ref().map(|m| m.version), "read kv secret");
        Ok(KvSecret { data, metadata, raw: secret })
    }

    /// Write a new version of a KV v2 entry.
    pub async fn put_kv(
        &self,
        ctx: &CancellationToken,
        mount: &str,
        name: &str,
        data: Map<String, Value>,
    ) -> Result<()> {
        let path = kv_data_path(mount, name);
        let mut body = Map::new();
        body.insert("data".to_string(), Value::Object(data));

        cancellable(ctx, "put_kv", self.api.write(&path, &body)).await?;
        debug!(path = %path, "stored kv secret");
        Ok(())
    }

    /// Read an arbitrary logical path.
    ///
    /// Returns [`VaultError::NotFound`] when the call succeeds with nothing
    /// stored, and the transport error otherwise.
    pub async fn get_secret(&self, ctx: &CancellationToken, path: &str) -> Result<Secret> {
        cancellable(ctx, "get_secret", self.api.read(path))
            .await?
            .ok_or_else(|| VaultError::not_found(path))
    }

    /// Write an arbitrary logical path.
    pub async fn put_secret(
        &self,
        ctx: &CancellationToken,
        path: &str,
        data: Map<String, Value>,
    ) -> Result<Option<Secret>> {
        cancellable(ctx, "put_secret", self.api.write(path, &data)).await
    }

    /// Encrypt `data` with the transit engine at `path`.
    pub async fn transit_encrypt(
        &self,
        ctx: &CancellationToken,
        path: &str,
        data: &str,
    ) -> Result<TransitCiphertext> {
        let mut body = Map::new();
        body.insert("plaintext".to_string(), json!(BASE64.encode(data.as_bytes())));

        let secret = cancellable(ctx, "transit_encrypt", self.api.write(path, &body))
            .await?
            .ok_or_else(|| VaultError::io("transit_encrypt", path, None, "empty response"))?;

        let ciphertext = secret
            .get("ciphertext")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                VaultError::decode(format!("transit encrypt '{}'", path), "missing ciphertext")
            })?
            .to_string();
        let key_version = secret.get("key_version").and_then(Value::as_u64);

        Ok(TransitCiphertext { ciphertext, key_version, raw: secret })
    }

    /// Decrypt `ciphertext` with the transit engine at `path`.
    pub async fn transit_decrypt(
        &self,
        ctx: &CancellationToken,
        path: &str,
        ciphertext: &str,
    ) -> Result<String> {
        let mut body = Map::new();
        body.insert("ciphertext".to_string(), json!(ciphertext));

        let secret = cancellable(ctx, "transit_decrypt", self.api.write(path, &body))
            .await?
            .ok_or_else(|| VaultError::io("transit_decrypt", path, None, "empty response"))?;

        let context = format!("transit decrypt '{}'", path);
        let encoded = secret
            .get("plaintext")
            .and_then(Value::as_str)
            .ok_or_else(|| VaultError::decode(&context, "missing plaintext"))?;

        let bytes = BASE64.decode(encoded).map_err(|e| VaultError::decode(&context, e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| VaultError::decode(&context, e.to_string()))
    }

    /// Encrypt with the configured transit encrypt path.
    pub async fn encrypt(&self, ctx: &CancellationToken, data: &str) -> Result<TransitCiphertext> {
        self.transit_encrypt(ctx, &self.transit.encrypt, data).await
    }

    /// Decrypt with the configured transit decrypt path.
    pub async fn decrypt(&self, ctx: &CancellationToken, ciphertext: &str) -> Result<String> {
        self.transit_decrypt(ctx, &self.transit.decrypt, ciphertext).await
    }
}
