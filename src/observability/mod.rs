//! # Observability Infrastructure
//!
//! Structured logging through `tracing`. Metrics and trace exporters are not
//! part of this crate.

pub mod logging;

pub use logging::{init_logging, log_settings_info};
