//! The renewal loop.
//!
//! ```text
//!  Authenticating ──ok──► Active ──► Renewing ──expiring──► Expired
//!        ▲                  ▲          │  ▲                   │
//!        │                  │          └──┘ renewed           │
//!        │                  └──────────────────────────────────┤
//!        └─────────────────────────────────────────────────────┘
//!  login error ──► FatalStop          cancel (any state) ──► Terminated
//! ```
//!
//! The loop is the only writer of the current [`Secret`]. Readers observe it
//! through a `watch` channel, so every replacement is atomic for them.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::api::VaultApi;
use super::auth::{Authenticator, CredentialSource};
use super::types::Secret;
use super::watcher::{LeaseWatcher, WatchOutcome, WatcherOptions};
use crate::errors::{Result, VaultError};

/// Observable state of a [`RenewalLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Authenticating,
    Active,
    Renewing,
    Expired,
    Terminated,
    FatalStop,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authenticating => "authenticating",
            Self::Active => "active",
            Self::Renewing => "renewing",
            Self::Expired => "expired",
            Self::Terminated => "terminated",
            Self::FatalStop => "fatal_stop",
        }
    }

    /// Terminal states; the loop has returned.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Terminated | Self::FatalStop)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keeps one session alive for the lifetime of its owner.
pub struct RenewalLoop<C> {
    authenticator: Authenticator<C>,
    api: Arc<dyn VaultApi>,
    method: &'static str,
    options: WatcherOptions,
    current: watch::Sender<Arc<Secret>>,
    state: watch::Sender<LoopState>,
}

impl<C: CredentialSource> RenewalLoop<C> {
    /// Log in with `credentials` and build a loop around the new session.
    ///
    /// This is the construction-time login: a failure here is returned to the
    /// caller rather than escalated as fatal.
    pub async fn authenticate(
        api: Arc<dyn VaultApi>,
        credentials: C,
        options: WatcherOptions,
    ) -> Result<Self> {
        let authenticator = Authenticator::new(Arc::clone(&api), credentials);
        let initial = authenticator.login().await?;
        Ok(Self::from_parts(authenticator, api, options, initial))
    }

    /// Create a loop around an already authenticated `initial` session.
    pub fn new(
        api: Arc<dyn VaultApi>,
        credentials: C,
        options: WatcherOptions,
        initial: Secret,
    ) -> Self {
        let authenticator = Authenticator::new(Arc::clone(&api), credentials);
        Self::from_parts(authenticator, api, options, initial)
    }

    fn from_parts(
        authenticator: Authenticator<C>,
        api: Arc<dyn VaultApi>,
        options: WatcherOptions,
        initial: Secret,
    ) -> Self {
        let method = authenticator.credentials().method();
        let (current, _) = watch::channel(Arc::new(initial));
        let (state, _) = watch::channel(LoopState::Active);

        Self { authenticator, api, method, options, current, state }
    }

    pub fn current_secret(&self) -> Arc<Secret> {
        self.current.borrow().clone()
    }

    /// Receiver notified every time the current session is replaced.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Secret>> {
        self.current.subscribe()
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: LoopState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(method = self.method, from = %previous, to = %next, "renewal loop state changed");
        }
    }

    fn terminate(&self) -> Result<()> {
        debug!(method = self.method, "exit requested, stopping renewal loop");
        self.set_state(LoopState::Terminated);
        Ok(())
    }

    /// Run until `cancel` fires (`Ok`) or re-authentication fails
    /// ([`VaultError::Fatal`]).
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return self.terminate();
            }

            let secret = self.current_secret();
            let outcome = match LeaseWatcher::new(Arc::clone(&self.api), &secret, self.options.clone()) {
                Ok(watcher) => {
                    let mut watcher = watcher.with_name(self.method);
                    watcher.start();
                    self.set_state(LoopState::Renewing);
                    let outcome = watcher.monitor(&cancel).await;
                    watcher.stop();
                    outcome
                }
                Err(e) => {
                    warn!(method = self.method, error = %e, "unable to watch current session");
                    WatchOutcome::Expiring
                }
            };

            match outcome {
                WatchOutcome::Cancelled => return self.terminate(),
                WatchOutcome::Expiring => {
                    self.set_state(LoopState::Expired);
                    if cancel.is_cancelled() {
                        return self.terminate();
                    }
                    self.reauthenticate(&cancel).await?;
                    if self.state().is_finished() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn reauthenticate(&self, cancel: &CancellationToken) -> Result<()> {
        self.set_state(LoopState::Authenticating);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.authenticator.login() => Some(result),
        };

        match outcome {
            None => self.terminate(),
            Some(Ok(secret)) => {
                let ttl = secret.ttl();
                self.current.send_replace(Arc::new(secret));
                info!(method = self.method, ttl_secs = ttl.as_secs(), "re-authenticated with Vault");
                self.set_state(LoopState::Active);
                Ok(())
            }
            Some(Err(_)) if cancel.is_cancelled() => self.terminate(),
            Some(Err(e)) => {
                error!(method = self.method, error = %e, "unable to re-authenticate with Vault");
                self.set_state(LoopState::FatalStop);
                Err(VaultError::fatal(e))
            }
        }
    }
}
