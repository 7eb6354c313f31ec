//! Feed descriptors
//!
//! A feed's nominal role decides its base priority; the registry may demote
//! a feed below its role when it keeps failing to reconnect.

use serde::{Deserialize, Serialize};

use crate::ids::FeedId;

/// Nominal role of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedRole {
    Primary,
    Secondary,
    Backup,
}

impl FeedRole {
    /// Base priority, lower is preferred.
    pub fn base_priority(&self) -> u8 {
        match self {
            FeedRole::Primary => 0,
            FeedRole::Secondary => 1,
            FeedRole::Backup => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FeedRole::Primary => "primary",
            FeedRole::Secondary => "secondary",
            FeedRole::Backup => "backup",
        }
    }
}

/// Transport-level connection state of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

/// Static configuration of a feed, supplied at configuration load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub id: FeedId,
    pub name: String,
    pub role: FeedRole,
}

impl FeedConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: FeedRole) -> Self {
        Self {
            id: FeedId::new(id),
            name: name.into(),
            role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_priority_order() {
        assert!(FeedRole::Primary.base_priority() < FeedRole::Secondary.base_priority());
        assert!(FeedRole::Secondary.base_priority() < FeedRole::Backup.base_priority());
    }

    #[test]
    fn test_feed_config_deserialize() {
        let json = r#"{"id":"a","name":"Feed A","role":"secondary"}"#;
        let cfg: FeedConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg, FeedConfig::new("a", "Feed A", FeedRole::Secondary));
    }

    #[test]
    fn test_connection_state_labels() {
        assert_eq!(ConnectionState::Connected.label(), "connected");
        let json = serde_json::to_string(&ConnectionState::Connecting).unwrap();
        assert_eq!(json, "\"connecting\"");
    }
}
