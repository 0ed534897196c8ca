use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally unique, load/save-stable node identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Gid(String);

impl Gid {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh identifier for a node created by an operation.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Gid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Gid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_gids_are_distinct() {
        let a = Gid::generate();
        let b = Gid::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn gid_serializes_as_plain_string() {
        let gid = Gid::new("cave-016");
        assert_eq!(serde_json::to_string(&gid).unwrap(), "\"cave-016\"");
    }
}
