//! # Configuration Management
//!
//! Environment-driven settings. See [`VaultSettings::from_env`] for the
//! variables that are read.

pub mod settings;

pub use settings::{
    AuthSettings, ObservabilityConfig, RenewalSettings, TransitSettings, VaultSettings, ENV_PREFIX,
};
