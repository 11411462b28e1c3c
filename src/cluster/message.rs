//! Inter-node signals and mailbox rows

use crate::cluster::node::validate_node_id;
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Separates channel from supplemental information on the wire
pub const DELIMITER: char = '~';

/// Broadcast marker: every node observes the message, nobody claims it
pub const ALL_NODES: &str = "ALL_NODES";

/// Competing-consumer marker: exactly one node claims the message
pub const ANY_NODE: &str = "ANY_NODE";

/// Lightweight signal: a channel name plus optional payload.
///
/// Encodes as `channel` or `channel~supplemental`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    channel: String,
    supplemental_information: Option<String>,
}

impl Message {
    /// The channel must not contain `DELIMITER`; the payload may.
    pub fn new(
        channel: impl Into<String>,
        supplemental_information: Option<String>,
    ) -> Result<Self> {
        let channel = channel.into();
        if channel.contains(DELIMITER) {
            return Err(Error::InvalidArgument(format!(
                "channel {:?} contains the reserved delimiter '{}'",
                channel, DELIMITER
            )));
        }
        Ok(Self {
            channel,
            supplemental_information,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn supplemental_information(&self) -> Option<&str> {
        self.supplemental_information.as_deref()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.supplemental_information {
            Some(info) => write!(f, "{}{}{}", self.channel, DELIMITER, info),
            None => f.write_str(&self.channel),
        }
    }
}

impl FromStr for Message {
    type Err = Infallible;

    /// Splits on the first delimiter; the payload itself may contain more.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (channel, supplemental_information) = match s.split_once(DELIMITER) {
            Some((channel, info)) => (channel, Some(info.to_string())),
            None => (s, None),
        };
        Ok(Message {
            channel: channel.to_string(),
            supplemental_information,
        })
    }
}

impl Serialize for Message {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Message::from_str(&raw).unwrap_or_else(|never| match never {}))
    }
}

/// Where a message is addressed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// One specific node id
    Node(String),
    /// Every node, never claimed
    AllNodes,
    /// Exactly one node, the first to read it
    AnyNode,
}

impl Destination {
    /// A single node; the markers are rejected so the row never re-parses
    /// as a broadcast or a claimable message
    pub fn node(node_id: impl Into<String>) -> Result<Self> {
        let node_id = node_id.into();
        validate_node_id(&node_id)?;
        Ok(Destination::Node(node_id))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Destination::Node(id) => id,
            Destination::AllNodes => ALL_NODES,
            Destination::AnyNode => ANY_NODE,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            ALL_NODES => Destination::AllNodes,
            ANY_NODE => Destination::AnyNode,
            id => Destination::Node(id.to_string()),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row in the shared mailbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMessage {
    /// Assigned by the store, strictly increasing
    pub id: u64,
    pub source_node_id: String,
    pub destination: String,
    /// Set once, for ANY_NODE rows only
    pub claimed_by_node_id: Option<String>,
    pub message: Message,
    /// Unix millis
    pub timestamp: u64,
}

impl ClusterMessage {
    pub fn destination(&self) -> Destination {
        Destination::parse(&self.destination)
    }

    /// Visible to `destination_id` when read from this row's sender.
    /// Unclaimed ANY_NODE rows count as visible; claiming is the store's job.
    pub fn is_visible_to(&self, destination_id: &str) -> bool {
        match self.destination() {
            Destination::Node(id) => id == destination_id,
            Destination::AllNodes => true,
            Destination::AnyNode => self.claimed_by_node_id.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_with_and_without_payload() {
        for message in [
            Message::new("Backup Index", None),
            Message::new("Task Cancel", Some("42".into())),
            Message::new("Task Cancel", Some(String::new())),
            Message::new("Plugin", Some("a~b~c".into())),
        ] {
            let message = message.unwrap();
            let parsed: Message = message.to_string().parse().unwrap();
            assert_eq!(parsed, message);
        }

        // a delimiter in the channel would split differently on the way back
        assert!(matches!(
            Message::new("Task~Cancel", Some("42".into())),
            Err(Error::InvalidArgument(_))
        ));
        assert!(Message::new("~", None).is_err());
    }

    #[test]
    fn test_wire_format() {
        assert_eq!(Message::new("chan", None).unwrap().to_string(), "chan");
        assert_eq!(
            Message::new("chan", Some("info".into())).unwrap().to_string(),
            "chan~info"
        );
        let parsed: Message = "chan~x~y".parse().unwrap();
        assert_eq!(parsed.channel(), "chan");
        assert_eq!(parsed.supplemental_information(), Some("x~y"));
    }

    #[test]
    fn test_equality_includes_supplemental() {
        let bare = Message::new("chan", None).unwrap();
        let empty = Message::new("chan", Some(String::new())).unwrap();
        let full = Message::new("chan", Some("1".into())).unwrap();
        assert_ne!(bare, empty);
        assert_ne!(bare, full);
        assert_ne!(empty, full);
        assert_eq!(full, Message::new("chan", Some("1".into())).unwrap());
        assert_ne!(full, Message::new("other", Some("1".into())).unwrap());
    }

    #[test]
    fn test_serde_uses_wire_format() {
        let json = serde_json::to_string(&Message::new("a", Some("b".into())).unwrap()).unwrap();
        assert_eq!(json, "\"a~b\"");
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Message::new("a", Some("b".into())).unwrap());
    }

    #[test]
    fn test_destination_markers() {
        assert_eq!(Destination::parse("ALL_NODES"), Destination::AllNodes);
        assert_eq!(Destination::parse("ANY_NODE"), Destination::AnyNode);
        assert_eq!(
            Destination::parse("node7"),
            Destination::node("node7").unwrap()
        );
        assert_eq!(Destination::AnyNode.to_string(), ANY_NODE);
    }

    #[test]
    fn test_node_destination_rejects_markers() {
        assert!(matches!(
            Destination::node(ALL_NODES),
            Err(Error::InvalidArgument(_))
        ));
        assert!(Destination::node(ANY_NODE).is_err());
        assert!(Destination::node(" ").is_err());
    }
}
