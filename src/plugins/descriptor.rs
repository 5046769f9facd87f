//! Plugin descriptors as published by the manifest feed

use std::fmt;

use serde::{Deserialize, Serialize};

/// Record identifying an installable plugin
///
/// Identity is `name@version`; the name doubles as the namespace the
/// plugin's routes are mounted under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    /// Plugin name, used as namespace
    pub name: String,
    /// Published version
    pub version: String,
    /// Location of the plugin's entry module
    #[serde(rename = "link")]
    pub location: String,
}

impl Descriptor {
    /// Create a descriptor
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            location: location.into(),
        }
    }

    /// Identity of this descriptor (`name@version`)
    #[must_use]
    pub fn identity(&self) -> PluginIdentity {
        PluginIdentity {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// Namespace this plugin is mounted under
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.name
    }
}

/// Unique identity of a plugin release
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginIdentity {
    /// Plugin name
    pub name: String,
    /// Plugin version
    pub version: String,
}

impl fmt::Display for PluginIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Body of a manifest feed response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedSnapshot {
    /// Every plugin currently published
    #[serde(default)]
    pub items: Vec<Descriptor>,
}

/// Kind of change announced on the change channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A plugin was published
    Add,
    /// A plugin got a new version
    Update,
    /// A plugin was withdrawn
    Remove,
}

impl ChangeKind {
    /// Map a channel message type to a change kind
    ///
    /// Returns `None` for message types that do not announce a change.
    #[must_use]
    pub fn from_message_type(kind: &str) -> Option<Self> {
        match kind {
            "add-pilet" => Some(Self::Add),
            "update-pilet" => Some(Self::Update),
            "remove-pilet" => Some(Self::Remove),
            _ => None,
        }
    }
}

/// Change notification received over the push channel
///
/// A trigger only: the diff is always recomputed from a full fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeNotification {
    /// Announced change
    pub kind: ChangeKind,
}

#[derive(Deserialize)]
struct ChannelMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl ChangeNotification {
    /// Parse a raw channel message
    ///
    /// Returns `None` for unparsable messages and for message types other
    /// than the three change kinds.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let message: ChannelMessage = serde_json::from_str(raw).ok()?;
        let kind = ChangeKind::from_message_type(message.kind.as_deref()?)?;
        Some(Self { kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_feed_snapshot() {
        let json = r#"{
            "items": [
                {"name": "calc", "version": "1.0.0", "link": "https://x/calc.rhai", "author": "me"},
                {"name": "notes", "version": "0.3.1", "link": "https://x/notes.rhai"}
            ]
        }"#;

        let snapshot: FeedSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.items.len(), 2);
        assert_eq!(snapshot.items[0].location, "https://x/calc.rhai");
        assert_eq!(snapshot.items[1].identity().to_string(), "notes@0.3.1");
        assert_eq!(snapshot.items[1].namespace(), "notes");
    }

    #[test]
    fn empty_feed_without_items() {
        let snapshot: FeedSnapshot = serde_json::from_str("{}").unwrap();
        assert!(snapshot.items.is_empty());
    }

    #[test]
    fn identity_differs_by_version() {
        let a = Descriptor::new("calc", "1.0.0", "https://x/a");
        let b = Descriptor::new("calc", "1.1.0", "https://x/a");
        assert_ne!(a.identity(), b.identity());
        assert_eq!(a.namespace(), b.namespace());
    }

    #[test]
    fn parse_change_notifications() {
        assert_eq!(
            ChangeNotification::parse(r#"{"type":"add-pilet","data":{}}"#),
            Some(ChangeNotification {
                kind: ChangeKind::Add
            })
        );
        assert_eq!(
            ChangeNotification::parse(r#"{"type":"update-pilet"}"#).map(|n| n.kind),
            Some(ChangeKind::Update)
        );
        assert_eq!(
            ChangeNotification::parse(r#"{"type":"remove-pilet"}"#).map(|n| n.kind),
            Some(ChangeKind::Remove)
        );
    }

    #[test]
    fn ignore_other_messages() {
        assert!(ChangeNotification::parse(r#"{"type":"ping"}"#).is_none());
        assert!(ChangeNotification::parse(r#"{"data":1}"#).is_none());
        assert!(ChangeNotification::parse("not json").is_none());
    }
}
