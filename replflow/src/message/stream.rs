//! Stream identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a logical stream by name and optional namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    /// The stream name.
    pub name: String,
    /// The stream namespace, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl StreamKey {
    /// Creates a key for a stream without a namespace.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}:{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(StreamKey::new("users").to_string(), "users");
        assert_eq!(
            StreamKey::new("users").with_namespace("public").to_string(),
            "public:users"
        );
    }

    #[test]
    fn test_namespace_distinguishes_keys() {
        let plain = StreamKey::new("users");
        let namespaced = StreamKey::new("users").with_namespace("public");
        assert_ne!(plain, namespaced);
    }
}
