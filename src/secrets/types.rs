//! Secure types and response models for the remote secret service.
//!
//! [`SecretString`] prevents accidental exposure of tokens and passwords
//! through logging, debugging, or error messages. [`Secret`] mirrors the
//! response envelope every remote call returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A string wrapper that redacts its contents in Debug, Display, and serialization.
///
/// - Debug output shows `SecretString([REDACTED])`
/// - Display output shows `[REDACTED]`
/// - Serialization outputs `"[REDACTED]"`, never the actual value
/// - Deserialization accepts the actual value
/// - Memory is zeroed when dropped
///
/// The value is only reachable through [`SecretString::expose_secret`].
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Ok(SecretString(value))
    }
}

impl SecretString {
    /// Creates a new SecretString from a string value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Exposes the underlying secret value. Never log the result.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Returns the length of the secret without exposing the value.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SecretString {}

/// Authentication block of a login or token-renewal response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretAuth {
    /// Session token (redacted in logs)
    pub client_token: SecretString,

    #[serde(default)]
    pub accessor: String,

    #[serde(default)]
    pub policies: Vec<String>,

    #[serde(default)]
    pub token_policies: Vec<String>,

    #[serde(default)]
    pub metadata: Option<HashMap<String, String>>,

    /// Token TTL in seconds
    #[serde(default)]
    pub lease_duration: u64,

    #[serde(default)]
    pub renewable: bool,
}

/// Response envelope returned by the remote service.
///
/// Login responses carry the session in `auth`; reads and writes carry
/// their payload in `data`. A `Secret` is never mutated after it has been
/// handed out; the renewal loop replaces it wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub request_id: String,

    #[serde(default)]
    pub lease_id: String,

    /// Lease TTL in seconds
    #[serde(default)]
    pub lease_duration: u64,

    #[serde(default)]
    pub renewable: bool,

    #[serde(default)]
    pub data: Option<Map<String, Value>>,

    #[serde(default)]
    pub warnings: Option<Vec<String>>,

    #[serde(default)]
    pub auth: Option<SecretAuth>,
}

impl Secret {
    /// Look up a key in the data payload.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.as_ref()?.get(key)
    }

    /// The session token, when this secret came from a login.
    pub fn token(&self) -> Option<&SecretString> {
        self.auth.as_ref().map(|auth| &auth.client_token)
    }

    /// Lifetime of whatever this secret represents: the token TTL for
    /// sessions, otherwise the lease TTL.
    pub fn ttl(&self) -> Duration {
        match &self.auth {
            Some(auth) => Duration::from_secs(auth.lease_duration),
            None => Duration::from_secs(self.lease_duration),
        }
    }

    /// Whether the token (or lease) may be extended.
    pub fn is_renewable(&self) -> bool {
        match &self.auth {
            Some(auth) => auth.renewable,
            None => self.renewable,
        }
    }

    /// True when the response contains neither payload nor session.
    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.auth.is_none()
    }
}

/// Version metadata attached to a KV v2 entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KvVersionMetadata {
    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub deletion_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub destroyed: bool,

    #[serde(default)]
    pub custom_metadata: Option<HashMap<String, String>>,
}

// The service reports "not deleted" as an empty string.
fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(value) => DateTime::parse_from_rfc3339(value)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
    }
}

/// A KV v2 entry: the stored mapping plus its version metadata.
#[derive(Debug, Clone)]
pub struct KvSecret {
    pub data: Map<String, Value>,
    pub metadata: Option<KvVersionMetadata>,
    /// The untouched response envelope
    pub raw: Secret,
}

impl KvSecret {
    /// Look up a key in the stored mapping.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Result of a transit encrypt call.
#[derive(Debug, Clone)]
pub struct TransitCiphertext {
    pub ciphertext: String,
    pub key_version: Option<u64>,
    /// The untouched response envelope, for any further metadata
    pub raw: Secret,
}
