//! # Error Handling
//!
//! Error taxonomy for the lease renewal engine and the secret store facade,
//! built with `thiserror`.
//!
//! Callers of [`SecretStore`](crate::secrets::SecretStore) see ordinary typed
//! errors carrying the operation and path that failed. The only error that
//! leaves the background renewal loop is [`VaultError::Fatal`].

/// Result type for all leasewarden operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Errors produced while talking to the remote secret service.
#[derive(thiserror::Error, Debug)]
pub enum VaultError {
    /// Login was rejected, or succeeded without returning a session.
    #[error("Authentication failed: {message}")]
    Auth {
        message: String,
        #[source]
        source: Option<Box<VaultError>>,
    },

    /// The remote call succeeded but nothing is stored at the path.
    #[error("Secret not found: {path}")]
    NotFound { path: String },

    /// Transport or service failure.
    #[error("I/O error during {operation} on '{path}': {message}")]
    Io {
        operation: String,
        path: String,
        status: Option<u16>,
        message: String,
    },

    /// Malformed ciphertext, plaintext or response payload.
    #[error("Decode error ({context}): {message}")]
    Decode { context: String, message: String },

    /// Lease watcher could not be created or renewal failed permanently.
    #[error("Lease watcher error: {message}")]
    Watcher { message: String },

    /// Reauthentication inside the renewal loop failed.
    #[error("Reauthentication failed, credentials can no longer be renewed: {source}")]
    Fatal {
        #[source]
        source: Box<VaultError>,
    },

    /// The operation context was cancelled before the call completed.
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Invalid settings.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl VaultError {
    /// Create an authentication error.
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth { message: message.into(), source: None }
    }

    /// Create an authentication error wrapping the underlying failure.
    pub fn auth_with_source<S: Into<String>>(message: S, source: VaultError) -> Self {
        Self::Auth { message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create a not found error.
    pub fn not_found<S: Into<String>>(path: S) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create an I/O error for a failed remote call.
    pub fn io<O, P, M>(operation: O, path: P, status: Option<u16>, message: M) -> Self
    where
        O: Into<String>,
        P: Into<String>,
        M: Into<String>,
    {
        Self::Io { operation: operation.into(), path: path.into(), status, message: message.into() }
    }

    /// Create a decode error.
    pub fn decode<C: Into<String>, M: Into<String>>(context: C, message: M) -> Self {
        Self::Decode { context: context.into(), message: message.into() }
    }

    /// Create a lease watcher error.
    pub fn watcher<S: Into<String>>(message: S) -> Self {
        Self::Watcher { message: message.into() }
    }

    /// Wrap a reauthentication failure as fatal.
    pub fn fatal(source: VaultError) -> Self {
        Self::Fatal { source: Box::new(source) }
    }

    /// Create a cancellation error.
    pub fn cancelled<S: Into<String>>(operation: S) -> Self {
        Self::Cancelled { operation: operation.into() }
    }

    /// Create a configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// True when the remote call succeeded but returned nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for transport and service failures.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// True for login rejections.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// True when the renewal loop gave up on the credentials.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    /// HTTP status of the failed call, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Io { status, .. } => *status,
            _ => None,
        }
    }
}
