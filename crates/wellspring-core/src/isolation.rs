//! Transaction isolation levels

use serde::{Deserialize, Serialize};

/// Transaction isolation level applied to physical connections at open.
///
/// `Default` leaves the driver's own default untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    None,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Default,
}

impl IsolationLevel {
    /// Parse a configuration string.
    ///
    /// Unrecognized input falls back to `Default` rather than failing;
    /// deployments routinely leave this unset or misspelled and the safe
    /// interpretation is "driver default".
    pub fn parse(s: &str) -> Self {
        match s {
            "none" => IsolationLevel::None,
            "read_uncommitted" => IsolationLevel::ReadUncommitted,
            "read_committed" => IsolationLevel::ReadCommitted,
            "repeatable_read" => IsolationLevel::RepeatableRead,
            "serializable" => IsolationLevel::Serializable,
            _ => IsolationLevel::Default,
        }
    }

    /// Configuration string for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::None => "none",
            IsolationLevel::ReadUncommitted => "read_uncommitted",
            IsolationLevel::ReadCommitted => "read_committed",
            IsolationLevel::RepeatableRead => "repeatable_read",
            IsolationLevel::Serializable => "serializable",
            IsolationLevel::Default => "default",
        }
    }
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::Default
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_levels() {
        assert_eq!(IsolationLevel::parse("serializable"), IsolationLevel::Serializable);
        assert_eq!(IsolationLevel::parse("none"), IsolationLevel::None);
        assert_eq!(IsolationLevel::parse("read_committed"), IsolationLevel::ReadCommitted);
        assert_eq!(
            IsolationLevel::parse("read_uncommitted"),
            IsolationLevel::ReadUncommitted
        );
        assert_eq!(IsolationLevel::parse("repeatable_read"), IsolationLevel::RepeatableRead);
    }

    #[test]
    fn test_parse_unknown_falls_back_to_default() {
        assert_eq!(IsolationLevel::parse("snapshot"), IsolationLevel::Default);
        assert_eq!(IsolationLevel::parse(""), IsolationLevel::Default);
    }

    #[test]
    fn test_round_trip() {
        for level in [
            IsolationLevel::None,
            IsolationLevel::ReadUncommitted,
            IsolationLevel::ReadCommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Serializable,
            IsolationLevel::Default,
        ] {
            assert_eq!(IsolationLevel::parse(level.as_str()), level);
        }
    }
}
