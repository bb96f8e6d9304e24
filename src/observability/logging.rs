//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` wins over the
//! configured level when it is set.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ObservabilityConfig, VaultSettings};
use crate::errors::{Result, VaultError};

fn build_filter(config: &ObservabilityConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            VaultError::config(format!("Invalid log level '{}': {}", config.log_level, e))
        }),
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` when another subscriber is already installed. An
/// unparseable level is a [`VaultError::Config`].
pub fn init_logging(config: &ObservabilityConfig) -> Result<bool> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json_logging {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    Ok(installed.is_ok())
}

/// Log the effective settings at startup. Credentials are never included.
pub fn log_settings_info(settings: &VaultSettings) {
    tracing::info!(
        address = %settings.address,
        namespace = ?settings.namespace,
        auth_method = settings.auth.method(),
        timeout_secs = settings.timeout_seconds,
        renew_increment_secs = settings.renewal.increment_seconds,
        renew_behavior = %settings.renewal.behavior,
        "Vault connection settings"
    );
}
