//! Hub tokens and other credentials that must never reach the logs.
//!
//! Recipes are logged in full at startup, so any credential carried by a
//! recipe is wrapped in [`SecretString`]. Its `Debug`, `Display` and
//! `Serialize` output is a fixed placeholder.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const REDACTED: &str = "[REDACTED]";

/// A string whose content is redacted everywhere except [`expose_secret`].
///
/// ```
/// use reflex_core::SecretString;
///
/// let token = SecretString::new("hf_abc123");
/// assert_eq!(format!("{token:?}"), "SecretString([REDACTED])");
/// assert_eq!(token.expose_secret(), "hf_abc123");
/// ```
///
/// [`expose_secret`]: SecretString::expose_secret
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Borrow the raw secret. Keep the result out of logs.
    #[inline]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Check if the secret is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretString({REDACTED})")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// Serialized recipes end up in logs and launch manifests.
impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_and_display_redact() {
        let secret = SecretString::new("hf_token_value");
        assert_eq!(format!("{:?}", secret), "SecretString([REDACTED])");
        assert_eq!(secret.to_string(), "[REDACTED]");
    }

    #[test]
    fn test_serialize_redacts_but_deserialize_keeps_value() {
        let secret: SecretString = serde_json::from_str("\"hf_live\"").unwrap();
        assert_eq!(secret.expose_secret(), "hf_live");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"[REDACTED]\"");
    }

    #[test]
    fn test_empty() {
        assert!(SecretString::default().is_empty());
        assert!(!SecretString::from("x").is_empty());
    }
}
