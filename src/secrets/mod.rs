//! Continuous credential-lease renewal.
//!
//! An [`AuthBackend`] logs in once at construction and then keeps the session
//! alive from a background [`RenewalLoop`]:
//!
//! ```text
//! AuthBackend::connect ──login──► Secret ──► RenewalLoop
//!                                              │
//!                         LeaseWatcher ◄───────┘ (one per session)
//!                           │ renewed  → keep watching
//!                           │ expiring → login again, swap Secret
//!                           │ cancel   → stop
//! ```
//!
//! All remote calls go through the [`VaultApi`] trait; [`VaultHttpClient`]
//! talks to the real service. [`SecretStore`] offers KV v2, raw logical
//! paths and transit on top of the same authenticated client.
//!
//! # Example
//!
//! ```rust,ignore
//! use leasewarden::secrets::{AuthBackend, AppRoleCredentials, SecretString};
//!
//! let cancel = CancellationToken::new();
//! let backend = AuthBackend::connect(
//!     api,
//!     AppRoleCredentials::new("role-id", SecretString::new("secret-id")),
//!     WatcherOptions::default(),
//!     TransitPaths::new("transit/encrypt/app", "transit/decrypt/app"),
//!     &cancel,
//! )
//! .await?;
//!
//! let config = backend.store().get_kv(&cancel, "secret", "app/config").await?;
//! ```

pub mod api;
pub mod auth;
pub mod backend;
pub mod http;
pub mod renewal;
pub mod store;
pub mod types;
pub mod watcher;

pub use api::{LoginRequest, VaultApi};
pub use auth::{
    AppRoleCredentials, Authenticator, CredentialSource, Credentials, UserPassCredentials,
};
pub use backend::{AppRoleBackend, AuthBackend, UserPassBackend};
pub use http::VaultHttpClient;
pub use renewal::{LoopState, RenewalLoop};
pub use store::{SecretStore, TransitPaths};
pub use types::{KvSecret, KvVersionMetadata, Secret, SecretAuth, SecretString, TransitCiphertext};
pub use watcher::{
    LeaseWatcher, RenewBehavior, RenewOutput, RenewalSignal, WatchOutcome, WatcherOptions,
};
