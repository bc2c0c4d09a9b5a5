//! Scalar keys for request entries and aggregation owners

use serde::{Deserialize, Serialize};

/// A scalar key: either a position or a name
///
/// Keys label the entries of a request payload, the answers sliced back out
/// of a composite response, and the owners of aggregation results.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Index(i64),
    Name(String),
}

impl Key {
    /// Get the index if this is a positional key
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Self::Index(index) => Some(*index),
            Self::Name(_) => None,
        }
    }

    /// Get the name if this is a named key
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Index(_) => None,
            Self::Name(name) => Some(name),
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{}", index),
            Self::Name(name) => write!(f, "{}", name),
        }
    }
}

impl From<i64> for Key {
    fn from(index: i64) -> Self {
        Self::Index(index)
    }
}

impl From<i32> for Key {
    fn from(index: i32) -> Self {
        Self::Index(i64::from(index))
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index as i64)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_conversions() {
        assert_eq!(Key::from(3usize), Key::Index(3));
        assert_eq!(Key::from("name"), Key::Name("name".to_string()));
        assert_eq!(Key::from(2).as_index(), Some(2));
        assert_eq!(Key::from("x").as_name(), Some("x"));
        assert_eq!(Key::from("x").as_index(), None);
    }

    #[test]
    fn test_key_serde_untagged() {
        assert_eq!(serde_json::to_string(&Key::Index(4)).unwrap(), "4");
        assert_eq!(serde_json::to_string(&Key::from("age")).unwrap(), "\"age\"");

        let key: Key = serde_json::from_str("\"age\"").unwrap();
        assert_eq!(key, Key::from("age"));
        let key: Key = serde_json::from_str("12").unwrap();
        assert_eq!(key, Key::Index(12));
    }
}
