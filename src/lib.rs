//! # Leasewarden
//!
//! Keeps a session with a HashiCorp Vault (or OpenBao) server alive for the
//! lifetime of a process. A backend logs in with AppRole or username and
//! password, renews its token in the background, and logs in again whenever
//! the token stops being renewable.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use leasewarden::{config::VaultSettings, secrets::AuthBackend, Result};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = VaultSettings::from_env()?;
//!     let cancel = CancellationToken::new();
//!     let mut backend = AuthBackend::from_settings(&settings, &cancel).await?;
//!
//!     let entry = backend.store().get_kv(&cancel, "secret", "app/config").await?;
//!     println!("{:?}", entry.get("db_host"));
//!
//!     backend.wait().await
//! }
//! ```

pub mod cli;
pub mod config;
pub mod errors;
pub mod observability;
pub mod secrets;

pub use config::{ObservabilityConfig, VaultSettings};
pub use errors::{Result, VaultError};
pub use secrets::{AuthBackend, Secret, SecretStore};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
