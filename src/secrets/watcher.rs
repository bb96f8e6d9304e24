//! Lease lifetime watcher.
//!
//! A [`LeaseWatcher`] keeps one token (or lease) alive by renewing it from a
//! background task and reports what happened as discrete [`RenewalSignal`]s:
//!
//! ```text
//!   start() ──► renew ──► Renewed ──► sleep ⅔·ttl ──► renew ──► ...
//!                 │                                    │
//!                 └── permanent failure / ttl ≤ grace ─┴──► Expiring
//!   cancel token fired at any point ─────────────────────────► Cancelled
//! ```
//!
//! Timing follows the service's reference lifetime watcher: renew right
//! away, then sleep two thirds of the returned TTL plus a third of a
//! randomized grace period. Once the remaining TTL falls inside the grace
//! period (the service stopped extending it) the watch is done and the
//! owner has to log in again.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api::VaultApi;
use super::types::{Secret, SecretString};
use crate::errors::{Result, VaultError};

/// Renewal increment requested from the service.
pub const DEFAULT_RENEW_INCREMENT: Duration = Duration::from_secs(3600);

/// First retry delay after a failed renewal.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

const EVENT_BUFFER: usize = 16;

/// Upper bound applied to TTLs before any deadline arithmetic.
const MAX_WATCHED_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// How the watcher reacts to renewal failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewBehavior {
    /// Retry with backoff until the lease enters its grace period.
    #[default]
    IgnoreErrors,
    /// The first failed renewal ends the watch.
    ErrorOnErrors,
    /// Never renew; finish when the lease is about to expire.
    RenewDisabled,
}

impl RenewBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IgnoreErrors => "ignore_errors",
            Self::ErrorOnErrors => "error_on_errors",
            Self::RenewDisabled => "renew_disabled",
        }
    }
}

impl FromStr for RenewBehavior {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ignore_errors" => Ok(Self::IgnoreErrors),
            "error_on_errors" => Ok(Self::ErrorOnErrors),
            "renew_disabled" => Ok(Self::RenewDisabled),
            _ => Err(format!("Unknown renew behavior: {}", s)),
        }
    }
}

impl fmt::Display for RenewBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Watcher tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherOptions {
    pub increment: Duration,
    pub behavior: RenewBehavior,
    pub retry_interval: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            increment: DEFAULT_RENEW_INCREMENT,
            behavior: RenewBehavior::default(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Outcome of waiting on a watcher.
///
/// The three cases are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalSignal {
    /// A renewal succeeded; the lease is still being watched.
    Renewed,
    /// The lease expired, was revoked, or can no longer be renewed.
    Expiring,
    /// The owner's cancellation token fired.
    Cancelled,
}

impl fmt::Display for RenewalSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Renewed => write!(f, "renewed"),
            Self::Expiring => write!(f, "expiring"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How a monitoring cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// The lease is expiring; the owner has to log in again.
    Expiring,
    /// The owner's cancellation token fired.
    Cancelled,
}

impl From<WatchOutcome> for RenewalSignal {
    fn from(outcome: WatchOutcome) -> Self {
        match outcome {
            WatchOutcome::Expiring => Self::Expiring,
            WatchOutcome::Cancelled => Self::Cancelled,
        }
    }
}

impl fmt::Display for WatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", RenewalSignal::from(*self))
    }
}

/// A successful renewal.
#[derive(Debug, Clone)]
pub struct RenewOutput {
    pub renewed_at: DateTime<Utc>,
    pub secret: Secret,
}

#[derive(Debug)]
enum WatcherEvent {
    Renewed(RenewOutput),
    Done(Option<VaultError>),
}

#[derive(Clone)]
enum Target {
    Token(SecretString),
    Lease(String),
}

/// Watches and renews the lifetime of one [`Secret`].
///
/// The background task only runs between [`start`](Self::start) and
/// [`stop`](Self::stop); dropping the watcher stops it as well.
pub struct LeaseWatcher {
    name: String,
    api: Arc<dyn VaultApi>,
    target: Target,
    initial_ttl: Duration,
    renewable: bool,
    options: WatcherOptions,
    events_tx: Option<mpsc::Sender<WatcherEvent>>,
    events_rx: mpsc::Receiver<WatcherEvent>,
    stop: CancellationToken,
    task: Option<JoinHandle<()>>,
    last_renewal: Option<RenewOutput>,
}

impl fmt::Debug for LeaseWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseWatcher")
            .field("name", &self.name)
            .field("initial_ttl", &self.initial_ttl)
            .field("renewable", &self.renewable)
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish()
    }
}

impl LeaseWatcher {
    /// Create a watcher for `secret`.
    ///
    /// Sessions are renewed through their token; other secrets through
    /// their lease id. A secret with neither cannot be watched.
    pub fn new(api: Arc<dyn VaultApi>, secret: &Secret, options: WatcherOptions) -> Result<Self> {
        let target = match secret.token() {
            Some(token) => Target::Token(token.clone()),
            None if !secret.lease_id.is_empty() => Target::Lease(secret.lease_id.clone()),
            None => {
                return Err(VaultError::watcher("secret has neither an auth token nor a lease id"))
            }
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        Ok(Self {
            name: "lease".to_string(),
            api,
            target,
            initial_ttl: secret.ttl(),
            renewable: secret.is_renewable(),
            options,
            events_tx: Some(events_tx),
            events_rx,
            stop: CancellationToken::new(),
            task: None,
            last_renewal: None,
        })
    }

    /// Name used in log output.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Spawn the renewal task. Calling it again is a no-op.
    pub fn start(&mut self) {
        let Some(events) = self.events_tx.take() else {
            debug!(secret = %self.name, "lease watcher already started");
            return;
        };

        debug!(
            secret = %self.name,
            ttl_secs = self.initial_ttl.as_secs(),
            renewable = self.renewable,
            behavior = %self.options.behavior,
            "starting lease watcher"
        );

        let worker = RenewWorker {
            name: self.name.clone(),
            api: Arc::clone(&self.api),
            target: self.target.clone(),
            initial_ttl: self.initial_ttl,
            renewable: self.renewable,
            options: self.options.clone(),
            events,
        };
        self.task = Some(tokio::spawn(worker.run(self.stop.clone())));
    }

    /// Stop the renewal task. Safe to call any number of times.
    pub fn stop(&mut self) {
        self.stop.cancel();
        self.events_tx = None;
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(secret = %self.name, "lease watcher stopped");
        }
    }

    /// Whether the background task is still alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|task| !task.is_finished()).unwrap_or(false)
    }

    /// The most recent successful renewal, if any.
    pub fn last_renewal(&self) -> Option<&RenewOutput> {
        self.last_renewal.as_ref()
    }

    /// Wait for the next event, or for `cancel` to fire.
    ///
    /// Starts the watcher if it has not been started yet.
    pub async fn next_signal(&mut self, cancel: &CancellationToken) -> RenewalSignal {
        if self.task.is_none() && self.events_tx.is_some() {
            self.start();
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => RenewalSignal::Cancelled,
            event = self.events_rx.recv() => match event {
                Some(WatcherEvent::Renewed(output)) => {
                    info!(
                        secret = %self.name,
                        renewed_at = %output.renewed_at,
                        lease_duration_secs = output.secret.ttl().as_secs(),
                        "renewal successful"
                    );
                    self.last_renewal = Some(output);
                    RenewalSignal::Renewed
                }
                Some(WatcherEvent::Done(error)) => {
                    match error {
                        Some(e) => warn!(secret = %self.name, error = %e, "lease watcher finished with error"),
                        None => info!(secret = %self.name, "lease is expiring"),
                    }
                    RenewalSignal::Expiring
                }
                None => {
                    warn!(secret = %self.name, "lease watcher ended without reporting a result");
                    RenewalSignal::Expiring
                }
            },
        }
    }

    /// Run one monitoring cycle: wait until the lease is expiring or
    /// `cancel` fires. Successful renewals are logged and do not end the cycle.
    pub async fn monitor(&mut self, cancel: &CancellationToken) -> WatchOutcome {
        loop {
            match self.next_signal(cancel).await {
                RenewalSignal::Renewed => continue,
                RenewalSignal::Expiring => return WatchOutcome::Expiring,
                RenewalSignal::Cancelled => return WatchOutcome::Cancelled,
            }
        }
    }
}

impl Drop for LeaseWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved into the background renewal task.
struct RenewWorker {
    name: String,
    api: Arc<dyn VaultApi>,
    target: Target,
    initial_ttl: Duration,
    renewable: bool,
    options: WatcherOptions,
    events: mpsc::Sender<WatcherEvent>,
}

impl RenewWorker {
    async fn run(self, stop: CancellationToken) {
        // A zero TTL on a non-renewable session means it never expires.
        if self.initial_ttl.is_zero() && !self.renewable {
            debug!(secret = %self.name, "session does not expire, nothing to renew");
            stop.cancelled().await;
            return;
        }

        let outcome = tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            outcome = self.renew_until_done() => outcome,
        };

        let done = WatcherEvent::Done(outcome.err());
        tokio::select! {
            biased;
            _ = stop.cancelled() => {}
            _ = self.events.send(done) => {}
        }
    }

    async fn renew_until_done(&self) -> Result<()> {
        let increment = self.options.increment;
        let initial_ttl = self.initial_ttl.min(MAX_WATCHED_TTL);
        let mut expires_at = deadline_after(initial_ttl);
        let mut prior = initial_ttl;
        let mut grace = calculate_grace(prior, increment);
        let mut error_backoff: Option<ExponentialBackoff> = None;

        loop {
            let remaining = expires_at.saturating_duration_since(Instant::now());

            let lease = if !self.renewable || self.options.behavior == RenewBehavior::RenewDisabled {
                remaining
            } else {
                match self.renew_once().await {
                    Ok(renewal) => {
                        error_backoff = None;
                        let ttl = renewal.ttl().min(MAX_WATCHED_TTL);
                        let still_renewable = renewal.is_renewable();

                        let output = RenewOutput { renewed_at: Utc::now(), secret: renewal };
                        if self.events.try_send(WatcherEvent::Renewed(output)).is_err() {
                            debug!(secret = %self.name, "renewal notification dropped");
                        }

                        if !still_renewable && self.options.behavior == RenewBehavior::ErrorOnErrors {
                            return Err(VaultError::watcher("lease is no longer renewable"));
                        }

                        expires_at = deadline_after(ttl);
                        ttl
                    }
                    Err(e) => {
                        if self.options.behavior == RenewBehavior::ErrorOnErrors {
                            return Err(e);
                        }
                        warn!(
                            secret = %self.name,
                            error = %e,
                            remaining_secs = remaining.as_secs(),
                            "lease renewal failed, will retry"
                        );
                        error_backoff.get_or_insert_with(|| retry_backoff(self.options.retry_interval));
                        remaining
                    }
                }
            };

            // Grace only grows while the lease keeps extending.
            if lease > prior {
                grace = calculate_grace(lease, increment);
            }
            prior = lease;

            let sleep = match error_backoff.as_mut().and_then(|b| b.next_backoff()) {
                Some(delay) => delay,
                None => lease.mul_f64(2.0 / 3.0) + grace / 3,
            };

            if lease <= grace || lease.saturating_sub(sleep) <= grace {
                return Ok(());
            }

            tokio::time::sleep(sleep).await;
        }
    }

    async fn renew_once(&self) -> Result<Secret> {
        match &self.target {
            Target::Token(token) => {
                let renewal = self.api.renew_token(token, self.options.increment).await?;
                if renewal.auth.is_none() {
                    return Err(VaultError::watcher("token renewal returned no auth data"));
                }
                Ok(renewal)
            }
            Target::Lease(lease_id) => self.api.renew_lease(lease_id, self.options.increment).await,
        }
    }
}

fn deadline_after(ttl: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(ttl)
        .or_else(|| now.checked_add(MAX_WATCHED_TTL))
        .unwrap_or(now)
}

/// Randomized grace period: 10–20% of the smaller of lease and increment.
pub(crate) fn calculate_grace(lease: Duration, increment: Duration) -> Duration {
    if lease.is_zero() || increment.is_zero() {
        return Duration::ZERO;
    }
    let jitter_max = lease.min(increment).mul_f64(0.1);
    jitter_max + jitter_max.mul_f64(rand::random::<f64>())
}

fn retry_backoff(initial: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: initial,
        initial_interval: initial,
        max_interval: initial * 5,
        multiplier: 2.0,
        randomization_factor: 0.5,
        max_elapsed_time: None,
        ..Default::default()
    }
}
