//! Discovery datagrams and peer descriptors

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Kind of discovery broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BroadcastKind {
    /// Ask every peer to announce itself
    Request,
    /// Announce this node
    Passive,
}

impl std::fmt::Display for BroadcastKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BroadcastKind::Request => write!(f, "REQUEST"),
            BroadcastKind::Passive => write!(f, "PASSIVE"),
        }
    }
}

/// One discovery datagram, JSON on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    pub kind: BroadcastKind,
    /// Node that sent the datagram
    pub sender_id: Uuid,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub cache_names: Vec<String>,
}

impl DiscoveryMessage {
    pub fn request(sender_id: Uuid, host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: BroadcastKind::Request,
            sender_id,
            host: host.into(),
            port,
            cache_names: Vec::new(),
        }
    }

    pub fn passive(sender_id: Uuid, host: impl Into<String>, port: u16, cache_names: Vec<String>) -> Self {
        Self {
            kind: BroadcastKind::Passive,
            sender_id,
            host: host.into(),
            port,
            cache_names,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(datagram: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(datagram)?)
    }
}

/// A peer as seen through its passive broadcasts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerDescriptor {
    pub host: String,
    pub port: u16,
    pub cache_names: BTreeSet<String>,
    pub last_seen: DateTime<Utc>,
}

impl PeerDescriptor {
    pub fn from_message(message: &DiscoveryMessage) -> Self {
        Self {
            host: message.host.clone(),
            port: message.port,
            cache_names: message.cache_names.iter().cloned().collect(),
            last_seen: Utc::now(),
        }
    }

    pub fn hosts(&self, cache_name: &str) -> bool {
        self.cache_names.contains(cache_name)
    }

    /// `host:port` of the peer's service endpoint
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passive_wire_format() {
        let id = Uuid::nil();
        let message = DiscoveryMessage::passive(id, "10.0.0.5", 1110, vec!["users".into()]);
        let json: serde_json::Value = serde_json::from_slice(&message.encode().unwrap()).unwrap();

        assert_eq!(json["kind"], "PASSIVE");
        assert_eq!(json["port"], 1110);
        assert_eq!(json["cache_names"][0], "users");
        assert_eq!(DiscoveryMessage::decode(&message.encode().unwrap()).unwrap(), message);
    }

    #[test]
    fn test_garbage_does_not_decode() {
        assert!(DiscoveryMessage::decode(b"\x00\x01").is_err());
    }

    #[test]
    fn test_descriptor_from_message() {
        let message = DiscoveryMessage::passive(Uuid::new_v4(), "peer", 1110, vec!["a".into(), "b".into()]);
        let peer = PeerDescriptor::from_message(&message);

        assert!(peer.hosts("a"));
        assert!(!peer.hosts("c"));
        assert_eq!(peer.endpoint(), "peer:1110");
    }
}
