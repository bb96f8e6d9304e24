//! Common test utilities for all integration tests.
//!
//! Provides [`FakeVault`], an in-memory stand-in for the remote secret
//! service. Behaviour (login failures, renewal outcomes, delays) is scripted
//! per test; counters and recorded calls are exposed for assertions.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use leasewarden::errors::{Result, VaultError};
use leasewarden::secrets::{
    LoginRequest, Secret, SecretAuth, SecretString, TransitPaths, VaultApi, WatcherOptions,
};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

pub const TRANSIT_ENCRYPT: &str = "transit/encrypt/app";
pub const TRANSIT_DECRYPT: &str = "transit/decrypt/app";

/// Outcome of one renewal call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// Extend by this many seconds and stay renewable.
    Extend(u64),
    /// The service refuses to extend any further (TTL 0, not renewable).
    Exhausted,
    /// Transport failure.
    Fail,
}

#[derive(Debug)]
struct FakeState {
    logins: usize,
    login_paths: Vec<String>,
    login_bodies: Vec<Map<String, Value>>,
    fail_logins_after: Option<usize>,
    login_without_auth: bool,
    relogin_delay: Option<Duration>,
    login_ttl: u64,
    login_renewable: bool,
    token: Option<String>,
    renew_script: VecDeque<Renewal>,
    default_renewal: Renewal,
    renewed_tokens: Vec<String>,
    renewed_leases: Vec<String>,
    entries: HashMap<String, Map<String, Value>>,
    versions: HashMap<String, u64>,
    failing_paths: HashSet<String>,
}

/// In-memory remote secret service.
#[derive(Debug)]
pub struct FakeVault {
    state: Mutex<FakeState>,
}

impl FakeVault {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                logins: 0,
                login_paths: Vec::new(),
                login_bodies: Vec::new(),
                fail_logins_after: None,
                login_without_auth: false,
                relogin_delay: None,
                login_ttl: 3600,
                login_renewable: true,
                token: None,
                renew_script: VecDeque::new(),
                default_renewal: Renewal::Extend(3600),
                renewed_tokens: Vec::new(),
                renewed_leases: Vec::new(),
                entries: HashMap::new(),
                versions: HashMap::new(),
                failing_paths: HashSet::new(),
            }),
        })
    }

    pub fn api(self: &Arc<Self>) -> Arc<dyn VaultApi> {
        Arc::clone(self) as Arc<dyn VaultApi>
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    // -- scripting --

    /// Logins after the first `n` are rejected.
    pub fn fail_logins_after(&self, n: usize) {
        self.with(|s| s.fail_logins_after = Some(n));
    }

    /// Logins succeed but carry no `auth` block.
    pub fn login_without_auth(&self) {
        self.with(|s| s.login_without_auth = true);
    }

    /// Every login after the first sleeps for `delay` before answering.
    pub fn delay_relogin(&self, delay: Duration) {
        self.with(|s| s.relogin_delay = Some(delay));
    }

    pub fn set_login_ttl(&self, ttl: u64, renewable: bool) {
        self.with(|s| {
            s.login_ttl = ttl;
            s.login_renewable = renewable;
        });
    }

    /// Queue renewal outcomes; once drained, `default_renewal` applies.
    pub fn script_renewals(&self, outcomes: impl IntoIterator<Item = Renewal>) {
        self.with(|s| s.renew_script.extend(outcomes));
    }

    pub fn set_default_renewal(&self, outcome: Renewal) {
        self.with(|s| s.default_renewal = outcome);
    }

    pub fn seed(&self, path: &str, data: Value) {
        let map = data.as_object().cloned().unwrap_or_default();
        self.with(|s| s.entries.insert(path.to_string(), map));
    }

    pub fn fail_path(&self, path: &str) {
        self.with(|s| s.failing_paths.insert(path.to_string()));
    }

    // -- inspection --

    pub fn login_count(&self) -> usize {
        self.with(|s| s.logins)
    }

    pub fn login_paths(&self) -> Vec<String> {
        self.with(|s| s.login_paths.clone())
    }

    pub fn login_bodies(&self) -> Vec<Map<String, Value>> {
        self.with(|s| s.login_bodies.clone())
    }

    pub fn current_token(&self) -> Option<String> {
        self.with(|s| s.token.clone())
    }

    pub fn renewed_tokens(&self) -> Vec<String> {
        self.with(|s| s.renewed_tokens.clone())
    }

    pub fn renewed_leases(&self) -> Vec<String> {
        self.with(|s| s.renewed_leases.clone())
    }

    pub fn renew_count(&self) -> usize {
        self.with(|s| s.renewed_tokens.len() + s.renewed_leases.len())
    }

    pub fn entry(&self, path: &str) -> Option<Map<String, Value>> {
        self.with(|s| s.entries.get(path).cloned())
    }

    fn next_renewal(&self) -> Renewal {
        self.with(|s| s.renew_script.pop_front().unwrap_or(s.default_renewal))
    }

    fn transport_error(operation: &str, path: &str, status: u16, message: &str) -> VaultError {
        VaultError::io(operation, path, Some(status), message)
    }
}

/// A session as returned by login.
pub fn session(token: &str, ttl: u64, renewable: bool) -> Secret {
    Secret {
        request_id: format!("req-{}", token),
        auth: Some(SecretAuth {
            client_token: SecretString::new(token),
            accessor: format!("accessor-{}", token),
            policies: vec!["default".to_string()],
            token_policies: vec!["default".to_string()],
            metadata: None,
            lease_duration: ttl,
            renewable,
        }),
        ..Secret::default()
    }
}

/// A plain lease, as returned by a dynamic secrets engine.
pub fn leased(lease_id: &str, ttl: u64, renewable: bool) -> Secret {
    Secret {
        lease_id: lease_id.to_string(),
        lease_duration: ttl,
        renewable,
        data: Some(json!({"username": "v-app-xyz"}).as_object().cloned().unwrap_or_default()),
        ..Secret::default()
    }
}

pub fn transit_paths() -> TransitPaths {
    TransitPaths::new(TRANSIT_ENCRYPT, TRANSIT_DECRYPT)
}

/// Watcher options with a short retry interval so tests stay quick.
pub fn watcher_options() -> WatcherOptions {
    WatcherOptions { retry_interval: Duration::from_secs(1), ..WatcherOptions::default() }
}

pub fn token_of(secret: &Secret) -> String {
    secret.token().map(|t| t.expose_secret().to_string()).unwrap_or_default()
}

/// Wait until `rx` holds a value matching `predicate`, failing after `limit`.
pub async fn wait_until<T, F>(rx: &mut watch::Receiver<T>, limit: Duration, predicate: F) -> T
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    tokio::time::timeout(limit, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for value")
        .expect("sender dropped")
        .clone()
}

#[async_trait]
impl VaultApi for FakeVault {
    async fn login(&self, request: &LoginRequest) -> Result<Option<Secret>> {
        let (attempt, delay) = self.with(|s| {
            s.login_paths.push(request.path.clone());
            s.login_bodies.push(request.body.clone());
            let attempt = s.login_paths.len();
            let delay = if attempt > 1 { s.relogin_delay } else { None };
            (attempt, delay)
        });

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.with(|s| {
            if s.fail_logins_after.map(|n| attempt > n).unwrap_or(false) {
                return Err(Self::transport_error("login", &request.path, 400, "invalid credentials"));
            }
            if s.login_without_auth {
                return Ok(Some(Secret::default()));
            }
            s.logins += 1;
            let token = format!("token-{}", s.logins);
            Ok(Some(session(&token, s.login_ttl, s.login_renewable)))
        })
    }

    async fn set_token(&self, token: SecretString) {
        self.with(|s| s.token = Some(token.expose_secret().to_string()));
    }

    async fn renew_token(&self, token: &SecretString, _increment: Duration) -> Result<Secret> {
        let outcome = self.next_renewal();
        self.with(|s| s.renewed_tokens.push(token.expose_secret().to_string()));
        match outcome {
            Renewal::Extend(ttl) => Ok(session(token.expose_secret(), ttl, true)),
            Renewal::Exhausted => Ok(session(token.expose_secret(), 0, false)),
            Renewal::Fail => Err(Self::transport_error("renew", "auth/token/renew-self", 500, "internal error")),
        }
    }

    async fn renew_lease(&self, lease_id: &str, _increment: Duration) -> Result<Secret> {
        let outcome = self.next_renewal();
        self.with(|s| s.renewed_leases.push(lease_id.to_string()));
        match outcome {
            Renewal::Extend(ttl) => Ok(leased(lease_id, ttl, true)),
            Renewal::Exhausted => Ok(leased(lease_id, 0, false)),
            Renewal::Fail => Err(Self::transport_error("renew", "sys/leases/renew", 500, "internal error")),
        }
    }

    async fn read(&self, path: &str) -> Result<Option<Secret>> {
        self.with(|s| {
            if s.failing_paths.contains(path) {
                return Err(Self::transport_error("read", path, 503, "Vault is sealed"));
            }
            Ok(s.entries.get(path).map(|data| Secret {
                data: Some(data.clone()),
                ..Secret::default()
            }))
        })
    }

    async fn write(&self, path: &str, data: &Map<String, Value>) -> Result<Option<Secret>> {
        self.with(|s| {
            if s.failing_paths.contains(path) {
                return Err(Self::transport_error("write", path, 503, "Vault is sealed"));
            }

            if path.starts_with("transit/encrypt/") {
                let plaintext = data.get("plaintext").and_then(Value::as_str).unwrap_or_default();
                let ciphertext = format!("vault:v1:{}", plaintext);
                return Ok(Some(Secret {
                    data: json!({"ciphertext": ciphertext, "key_version": 1}).as_object().cloned(),
                    ..Secret::default()
                }));
            }

            if path.starts_with("transit/decrypt/") {
                let ciphertext = data.get("ciphertext").and_then(Value::as_str).unwrap_or_default();
                let Some(plaintext) = ciphertext.strip_prefix("vault:v1:") else {
                    return Err(Self::transport_error("write", path, 400, "invalid ciphertext"));
                };
                // Reject anything that is not valid base64, like the real engine.
                if BASE64.decode(plaintext).is_err() {
                    return Err(Self::transport_error("write", path, 400, "invalid base64"));
                }
                return Ok(Some(Secret {
                    data: json!({"plaintext": plaintext}).as_object().cloned(),
                    ..Secret::default()
                }));
            }

            if path.contains("/data/") {
                let version = {
                    let v = s.versions.entry(path.to_string()).or_insert(0);
                    *v += 1;
                    *v
                };
                let mut stored = Map::new();
                stored.insert("data".to_string(), data.get("data").cloned().unwrap_or(Value::Null));
                stored.insert(
                    "metadata".to_string(),
                    json!({
                        "version": version,
                        "created_time": "2024-05-01T10:00:00Z",
                        "deletion_time": "",
                        "destroyed": false
                    }),
                );
                s.entries.insert(path.to_string(), stored);
                return Ok(Some(Secret {
                    data: json!({"version": version}).as_object().cloned(),
                    ..Secret::default()
                }));
            }

            s.entries.insert(path.to_string(), data.clone());
            Ok(None)
        })
    }
}
