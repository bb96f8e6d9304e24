//! Authenticated backend: construction-time login plus a background
//! renewal loop.

use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::api::VaultApi;
use super::auth::{AppRoleCredentials, CredentialSource, Credentials, UserPassCredentials};
use super::http::VaultHttpClient;
use super::renewal::{LoopState, RenewalLoop};
use super::store::{SecretStore, TransitPaths};
use super::types::Secret;
use super::watcher::WatcherOptions;
use crate::config::VaultSettings;
use crate::errors::{Result, VaultError};

/// A logged-in session kept alive in the background.
///
/// Construction logs in synchronously and only then spawns the renewal loop,
/// so a returned backend always has a current [`Secret`]. Dropping the
/// backend cancels the loop.
pub struct AuthBackend<C> {
    method: &'static str,
    store: SecretStore,
    current: watch::Receiver<Arc<Secret>>,
    state: watch::Receiver<LoopState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
    _credentials: PhantomData<fn() -> C>,
}

/// Backend logging in with AppRole credentials.
pub type AppRoleBackend = AuthBackend<AppRoleCredentials>;

/// Backend logging in with username and password.
pub type UserPassBackend = AuthBackend<UserPassCredentials>;

impl<C: CredentialSource> AuthBackend<C> {
    /// Log in and start renewing.
    ///
    /// The loop stops when `cancel` (or the backend's own token) fires.
    #[instrument(skip_all, fields(method = credentials.method()))]
    pub async fn connect(
        api: Arc<dyn VaultApi>,
        credentials: C,
        options: WatcherOptions,
        transit: TransitPaths,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let method = credentials.method();
        let renewal = RenewalLoop::authenticate(Arc::clone(&api), credentials, options).await?;

        let current = renewal.subscribe();
        let state = renewal.watch_state();
        let cancel = cancel.child_token();
        let task = tokio::spawn(renewal.run(cancel.clone()));

        info!(method, "renewal loop started");

        Ok(Self {
            method,
            store: SecretStore::new(api, transit),
            current,
            state,
            cancel,
            task: Some(task),
            _credentials: PhantomData,
        })
    }

    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Store operating on the authenticated client.
    pub fn store(&self) -> &SecretStore {
        &self.store
    }

    /// The session currently held by the loop.
    pub fn current_secret(&self) -> Arc<Secret> {
        self.current.borrow().clone()
    }

    /// Receiver notified each time re-authentication replaces the session.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Secret>> {
        self.current.clone()
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.clone()
    }

    /// Whether the renewal loop task is still alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|task| !task.is_finished()).unwrap_or(false)
    }

    /// Wait for the renewal loop to end.
    ///
    /// Resolves to `Ok(())` after cancellation and to [`VaultError::Fatal`]
    /// when re-authentication failed. A second call returns `Ok(())`.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        match task.await {
            Ok(result) => result,
            Err(e) => Err(VaultError::fatal(VaultError::watcher(format!(
                "renewal loop task failed: {}",
                e
            )))),
        }
    }

    /// Cancel the renewal loop and wait for it to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        self.cancel.cancel();
        self.wait().await
    }
}

impl AuthBackend<Credentials> {
    /// Connect over HTTP with the auth method chosen in `settings`.
    pub async fn from_settings(settings: &VaultSettings, cancel: &CancellationToken) -> Result<Self> {
        let api: Arc<dyn VaultApi> = Arc::new(VaultHttpClient::from_settings(settings)?);
        Self::connect(
            api,
            settings.auth.credentials(),
            settings.renewal.watcher_options(),
            settings.transit.paths(),
            cancel,
        )
        .await
    }
}

impl<C> std::fmt::Debug for AuthBackend<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthBackend")
            .field("method", &self.method)
            .field("state", &*self.state.borrow())
            .field("store", &self.store)
            .finish()
    }
}

impl<C> Drop for AuthBackend<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
