//! Credential sources and the login operation.
//!
//! The two supported auth methods differ only in how the login payload is
//! built, so each is a small [`CredentialSource`] and a single
//! [`Authenticator`] performs the login for either of them.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::api::{LoginRequest, VaultApi};
use super::types::{Secret, SecretString};
use crate::errors::{Result, VaultError};

/// Default mount path of the AppRole auth method.
pub const DEFAULT_APPROLE_MOUNT: &str = "approle";

/// Default mount path of the userpass auth method.
pub const DEFAULT_USERPASS_MOUNT: &str = "userpass";

/// Identity material able to produce a login payload.
///
/// Implementations are immutable after construction.
pub trait CredentialSource: Send + Sync + 'static {
    /// Auth method name, used in logs.
    fn method(&self) -> &'static str;

    /// Build the login call for these credentials.
    fn build_login_payload(&self) -> LoginRequest;
}

/// AppRole credentials: role id + secret id.
#[derive(Clone)]
pub struct AppRoleCredentials {
    mount: String,
    role_id: String,
    secret_id: SecretString,
}

impl AppRoleCredentials {
    pub fn new(role_id: impl Into<String>, secret_id: SecretString) -> Self {
        Self { mount: DEFAULT_APPROLE_MOUNT.to_string(), role_id: role_id.into(), secret_id }
    }

    /// Use a non-default mount path for the auth method.
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    pub fn role_id(&self) -> &str {
        &self.role_id
    }
}

impl std::fmt::Debug for AppRoleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRoleCredentials")
            .field("mount", &self.mount)
            .field("role_id", &self.role_id)
            .field("secret_id", &self.secret_id)
            .finish()
    }
}

impl CredentialSource for AppRoleCredentials {
    fn method(&self) -> &'static str {
        "approle"
    }

    fn build_login_payload(&self) -> LoginRequest {
        let mut body = Map::new();
        body.insert("role_id".to_string(), json!(self.role_id));
        body.insert("secret_id".to_string(), json!(self.secret_id.expose_secret()));
        LoginRequest { path: format!("auth/{}/login", self.mount.trim_matches('/')), body }
    }
}

/// Username + password credentials.
///
/// The service takes the username as the last path segment of the login
/// path and the password in the body.
#[derive(Clone)]
pub struct UserPassCredentials {
    mount: String,
    username: String,
    password: SecretString,
}

impl UserPassCredentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self { mount: DEFAULT_USERPASS_MOUNT.to_string(), username: username.into(), password }
    }

    /// Use a non-default mount path for the auth method.
    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for UserPassCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserPassCredentials")
            .field("mount", &self.mount)
            .field("username", &self.username)
            .field("password", &self.password)
            .finish()
    }
}

impl CredentialSource for UserPassCredentials {
    fn method(&self) -> &'static str {
        "userpass"
    }

    fn build_login_payload(&self) -> LoginRequest {
        let mut body = Map::new();
        body.insert("password".to_string(), Value::String(self.password.expose_secret().to_string()));
        LoginRequest {
            path: format!("auth/{}/login/{}", self.mount.trim_matches('/'), self.username),
            body,
        }
    }
}

/// Either credential source, chosen at runtime from settings.
#[derive(Debug, Clone)]
pub enum Credentials {
    AppRole(AppRoleCredentials),
    UserPass(UserPassCredentials),
}

impl CredentialSource for Credentials {
    fn method(&self) -> &'static str {
        match self {
            Self::AppRole(c) => c.method(),
            Self::UserPass(c) => c.method(),
        }
    }

    fn build_login_payload(&self) -> LoginRequest {
        match self {
            Self::AppRole(c) => c.build_login_payload(),
            Self::UserPass(c) => c.build_login_payload(),
        }
    }
}

/// Performs `login()` for one credential source against one client.
pub struct Authenticator<C> {
    api: Arc<dyn VaultApi>,
    credentials: C,
}

impl<C: CredentialSource> Authenticator<C> {
    pub fn new(api: Arc<dyn VaultApi>, credentials: C) -> Self {
        Self { api, credentials }
    }

    pub fn credentials(&self) -> &C {
        &self.credentials
    }

    /// Log in and install the new token on the shared client.
    ///
    /// A successful call that returns no session is an authentication
    /// failure, not a success.
    #[instrument(skip(self), fields(method = self.credentials.method()))]
    pub async fn login(&self) -> Result<Secret> {
        let request = self.credentials.build_login_payload();
        debug!(path = %request.path, "submitting login");

        let secret = self
            .api
            .login(&request)
            .await
            .map_err(|e| VaultError::auth_with_source("unable to authenticate with Vault", e))?
            .ok_or_else(|| VaultError::auth("no auth info was returned after login"))?;

        let auth = secret
            .auth
            .as_ref()
            .ok_or_else(|| VaultError::auth("no auth info was returned after login"))?;

        self.api.set_token(auth.client_token.clone()).await;

        info!(
            policies = ?auth.policies,
            lease_duration_secs = auth.lease_duration,
            renewable = auth.renewable,
            "authenticated with Vault"
        );

        Ok(secret)
    }
}
