//! Redacting string wrapper for resolved secret material
//!
//! Runtime config option values may come straight out of a Kubernetes
//! Secret. Wrapping them keeps `{:?}` and `{}` from leaking the value into
//! logs while still serializing the real value into the rendered document.

use std::fmt;

use serde::{Deserialize, Serialize};

const REDACTED: &str = "REDACTED";

/// A string whose `Debug` and `Display` output is always `REDACTED`
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a sensitive value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the sensitive value
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn formatting_is_redacted() {
        let s = SecretString::new("hunter2");
        assert_eq!(s.expose(), "hunter2");
        assert_eq!(format!("{s}"), "REDACTED");
        assert_eq!(format!("{s:?}"), "REDACTED");
    }

    #[test]
    fn nested_debug_is_redacted() {
        let mut map = BTreeMap::new();
        map.insert("password".to_string(), SecretString::new("hunter2"));
        let rendered = format!("{map:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("REDACTED"));
    }

    /// The rendered TOML document must carry the real value
    #[test]
    fn toml_serialization_is_plain_text() {
        let mut map = BTreeMap::new();
        map.insert("some_key".to_string(), SecretString::new("some_secret_value"));
        let rendered = toml::to_string(&map).unwrap();
        assert_eq!(rendered, "some_key = \"some_secret_value\"\n");
    }
}
