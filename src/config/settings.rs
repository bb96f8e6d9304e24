//! # Configuration Settings
//!
//! Settings for the remote secret service connection, the renewal engine and
//! logging. Everything comes from environment variables; there is no config
//! file.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

use crate::errors::{Result, VaultError};
use crate::secrets::auth::{
    AppRoleCredentials, Credentials, UserPassCredentials, DEFAULT_APPROLE_MOUNT,
    DEFAULT_USERPASS_MOUNT,
};
use crate::secrets::store::TransitPaths;
use crate::secrets::types::SecretString;
use crate::secrets::watcher::{RenewBehavior, WatcherOptions, DEFAULT_RETRY_INTERVAL};

/// Prefix of every variable read by [`VaultSettings::from_env`].
pub const ENV_PREFIX: &str = "LEASEWARDEN_";

pub const DEFAULT_TRANSIT_ENCRYPT_PATH: &str = "transit/encrypt/leasewarden";
pub const DEFAULT_TRANSIT_DECRYPT_PATH: &str = "transit/decrypt/leasewarden";

fn lookup_var<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.trim().is_empty())
}

fn parse_var<T, F>(lookup: &F, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup_var(lookup, name) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            VaultError::config(format!("Invalid {}{}: {}", ENV_PREFIX, name, e))
        }),
        None => Ok(default),
    }
}

fn required_var<F>(lookup: &F, name: &str, method: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_var(lookup, name).ok_or_else(|| {
        VaultError::config(format!("{}{} is required for {} auth", ENV_PREFIX, name, method))
    })
}

/// Connection and renewal settings.
#[derive(Debug, Clone, Validate)]
pub struct VaultSettings {
    /// Service address, e.g. `https://vault.internal:8200`
    #[validate(url(message = "Vault address must be a valid URL"))]
    pub address: String,

    /// Enterprise namespace sent with every request
    pub namespace: Option<String>,

    /// HTTP timeout in seconds
    #[validate(range(min = 1, max = 600, message = "Timeout must be between 1 and 600 seconds"))]
    pub timeout_seconds: u64,

    pub auth: AuthSettings,

    #[validate(nested)]
    pub transit: TransitSettings,

    #[validate(nested)]
    pub renewal: RenewalSettings,
}

impl VaultSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = lookup_var(&lookup, "VAULT_ADDR")
            .or_else(|| lookup("VAULT_ADDR").filter(|v| !v.trim().is_empty()))
            .ok_or_else(|| {
                VaultError::config(format!("{}VAULT_ADDR or VAULT_ADDR must be set", ENV_PREFIX))
            })?;

        let namespace = lookup_var(&lookup, "VAULT_NAMESPACE")
            .or_else(|| lookup("VAULT_NAMESPACE").filter(|v| !v.trim().is_empty()));

        let settings = Self {
            address,
            namespace,
            timeout_seconds: parse_var(&lookup, "VAULT_TIMEOUT_SECONDS", 30)?,
            auth: AuthSettings::from_lookup(&lookup)?,
            transit: TransitSettings {
                encrypt_path: lookup_var(&lookup, "VAULT_TRANSIT_ENCRYPT_PATH")
                    .unwrap_or_else(|| DEFAULT_TRANSIT_ENCRYPT_PATH.to_string()),
                decrypt_path: lookup_var(&lookup, "VAULT_TRANSIT_DECRYPT_PATH")
                    .unwrap_or_else(|| DEFAULT_TRANSIT_DECRYPT_PATH.to_string()),
            },
            renewal: RenewalSettings {
                increment_seconds: parse_var(&lookup, "RENEW_INCREMENT_SECONDS", 3600)?,
                behavior: parse_var(&lookup, "RENEW_BEHAVIOR", RenewBehavior::default())?,
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| VaultError::config(e.to_string()))?;
        self.auth.validate()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Which auth method to log in with, and its credentials.
#[derive(Debug, Clone)]
pub enum AuthSettings {
    AppRole { mount: String, role_id: String, secret_id: SecretString },
    UserPass { mount: String, username: String, password: SecretString },
}

impl AuthSettings {
    fn from_lookup<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let method = lookup_var(lookup, "VAULT_AUTH_METHOD").unwrap_or_else(|| "approle".to_string());
        let mount = lookup_var(lookup, "VAULT_AUTH_MOUNT");

        match method.trim().to_ascii_lowercase().as_str() {
            "approle" => Ok(Self::AppRole {
                mount: mount.unwrap_or_else(|| DEFAULT_APPROLE_MOUNT.to_string()),
                role_id: required_var(lookup, "VAULT_ROLE_ID", "approle")?,
                secret_id: SecretString::new(required_var(lookup, "VAULT_SECRET_ID", "approle")?),
            }),
            "userpass" => Ok(Self::UserPass {
                mount: mount.unwrap_or_else(|| DEFAULT_USERPASS_MOUNT.to_string()),
                username: required_var(lookup, "VAULT_USERNAME", "userpass")?,
                password: SecretString::new(required_var(lookup, "VAULT_PASSWORD", "userpass")?),
            }),
            other => Err(VaultError::config(format!(
                "Unknown auth method '{}', expected 'approle' or 'userpass'",
                other
            ))),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::AppRole { .. } => "approle",
            Self::UserPass { .. } => "userpass",
        }
    }

    fn validate(&self) -> Result<()> {
        let (mount, id, secret) = match self {
            Self::AppRole { mount, role_id, secret_id } => (mount, role_id, secret_id),
            Self::UserPass { mount, username, password } => (mount, username, password),
        };

        if mount.trim_matches('/').is_empty() {
            return Err(VaultError::config("Auth mount cannot be empty"));
        }
        if id.trim().is_empty() || secret.is_empty() {
            return Err(VaultError::config(format!(
                "Credentials for {} auth cannot be empty",
                self.method()
            )));
        }
        if let Self::UserPass { username, .. } = self {
            if username.contains('/') {
                return Err(VaultError::config("Username cannot contain '/'"));
            }
        }
        Ok(())
    }

    /// Build the credential source for this method.
    pub fn credentials(&self) -> Credentials {
        match self {
            Self::AppRole { mount, role_id, secret_id } => Credentials::AppRole(
                AppRoleCredentials::new(role_id.clone(), secret_id.clone()).with_mount(mount.clone()),
            ),
            Self::UserPass { mount, username, password } => Credentials::UserPass(
                UserPassCredentials::new(username.clone(), password.clone()).with_mount(mount.clone()),
            ),
        }
    }
}

/// Transit engine paths
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransitSettings {
    #[validate(length(min = 1, message = "Transit encrypt path cannot be empty"))]
    pub encrypt_path: String,

    #[validate(length(min = 1, message = "Transit decrypt path cannot be empty"))]
    pub decrypt_path: String,
}

impl Default for TransitSettings {
    fn default() -> Self {
        Self {
            encrypt_path: DEFAULT_TRANSIT_ENCRYPT_PATH.to_string(),
            decrypt_path: DEFAULT_TRANSIT_DECRYPT_PATH.to_string(),
        }
    }
}

impl TransitSettings {
    pub fn paths(&self) -> TransitPaths {
        TransitPaths::new(self.encrypt_path.clone(), self.decrypt_path.clone())
    }
}

/// Lease renewal settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RenewalSettings {
    /// Increment requested on each renewal, in seconds
    #[validate(range(min = 1, message = "Renewal increment must be at least 1 second"))]
    pub increment_seconds: u64,

    pub behavior: RenewBehavior,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self { increment_seconds: 3600, behavior: RenewBehavior::default() }
    }
}

impl RenewalSettings {
    pub fn watcher_options(&self) -> WatcherOptions {
        WatcherOptions {
            increment: Duration::from_secs(self.increment_seconds),
            behavior: self.behavior,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Emit JSON lines instead of human readable output
    pub json_logging: bool,

    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            service_name: crate::APP_NAME.to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let json_logging = match lookup_var(&lookup, "LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("pretty") => false,
            Some("json") => true,
            Some(other) => {
                return Err(VaultError::config(format!(
                    "Invalid {}LOG_FORMAT '{}', expected 'json' or 'pretty'",
                    ENV_PREFIX, other
                )))
            }
        };

        let config = Self {
            log_level: lookup_var(&lookup, "LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logging,
            service_name: defaults.service_name,
        };

        Validate::validate(&config).map_err(|e| VaultError::config(e.to_string()))?;
        Ok(config)
    }
}
