//! Peer registry and discovery receiver
//!
//! The receiver turns inbound datagrams into [`PeerDescriptor`]s. Our own
//! datagrams are recognised by sender id and ignored; REQUEST broadcasts are
//! answered with a passive broadcast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::broadcaster::DiscoveryBroadcaster;
use super::message::{BroadcastKind, DiscoveryMessage, PeerDescriptor};

/// Largest datagram the receiver accepts
const MAX_DATAGRAM: usize = 64 * 1024;

/// Known peers keyed by service endpoint
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: DashMap<(String, u16), PeerDescriptor>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the sender of a passive broadcast; true for a new peer
    pub fn record(&self, message: &DiscoveryMessage) -> bool {
        let descriptor = PeerDescriptor::from_message(message);
        let is_new = self
            .peers
            .insert((message.host.clone(), message.port), descriptor)
            .is_none();
        if is_new {
            info!(host = %message.host, port = message.port, cache_names = ?message.cache_names, "Discovered peer");
        }
        is_new
    }

    /// Peers hosting `cache_name`
    pub fn peers_for(&self, cache_name: &str) -> Vec<PeerDescriptor> {
        self.peers
            .iter()
            .filter(|peer| peer.hosts(cache_name))
            .map(|peer| peer.value().clone())
            .collect()
    }

    pub fn peers(&self) -> Vec<PeerDescriptor> {
        self.peers.iter().map(|peer| peer.value().clone()).collect()
    }

    /// Drop peers last seen before `cutoff`; returns how many were dropped
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.peers.len();
        self.peers.retain(|(host, port), peer| {
            let keep = peer.last_seen >= cutoff;
            if !keep {
                debug!(host = %host, port = *port, "Evicting stale peer");
            }
            keep
        });
        before.saturating_sub(self.peers.len())
    }

    /// Drop peers not heard from within `max_age`
    pub fn evict_stale(&self, max_age: Duration) -> usize {
        // Ages beyond chrono's range evict nothing
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        match Utc::now().checked_sub_signed(max_age) {
            Some(cutoff) => self.evict_older_than(cutoff),
            None => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// What the receiver did with a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Sent by this node
    Own,
    /// Undecodable
    Dropped,
    /// REQUEST answered with a passive broadcast
    Answered,
    /// PASSIVE recorded in the registry
    Recorded,
}

/// Receiver counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub received: u64,
    pub ignored: u64,
    pub dropped: u64,
}

pub struct DiscoveryReceiver {
    sender_id: Uuid,
    registry: Arc<PeerRegistry>,
    broadcaster: Arc<DiscoveryBroadcaster>,
    received: AtomicU64,
    ignored: AtomicU64,
    dropped: AtomicU64,
}

impl DiscoveryReceiver {
    /// Receiver sharing the broadcaster's sender id
    pub fn new(registry: Arc<PeerRegistry>, broadcaster: Arc<DiscoveryBroadcaster>) -> Self {
        Self {
            sender_id: broadcaster.sender_id(),
            registry,
            broadcaster,
            received: AtomicU64::new(0),
            ignored: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Handle one datagram
    pub async fn handle_datagram(&self, datagram: &[u8]) -> ReceiveOutcome {
        self.received.fetch_add(1, Ordering::Relaxed);

        let message = match DiscoveryMessage::decode(datagram) {
            Ok(message) => message,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, bytes = datagram.len(), "Dropping undecodable discovery datagram");
                return ReceiveOutcome::Dropped;
            }
        };

        if message.sender_id == self.sender_id {
            self.ignored.fetch_add(1, Ordering::Relaxed);
            return ReceiveOutcome::Own;
        }

        match message.kind {
            BroadcastKind::Request => {
                debug!(host = %message.host, port = message.port, "Answering request broadcast");
                if let Err(e) = self.broadcaster.passive_broadcast().await {
                    warn!(error = %e, "Problem answering request broadcast");
                }
                ReceiveOutcome::Answered
            }
            BroadcastKind::Passive => {
                self.registry.record(&message);
                ReceiveOutcome::Recorded
            }
        }
    }

    /// Receive on `socket` until `shutdown` fires
    pub async fn run(&self, socket: UdpSocket, shutdown: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        info!("Discovery receiver started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        debug!(from = %from, bytes = len, "Discovery datagram received");
                        self.handle_datagram(&buf[..len]).await;
                    }
                    Err(e) => warn!(error = %e, "Discovery receive failed"),
                },
            }
        }

        info!("Discovery receiver stopped");
    }

    pub fn stats(&self) -> ReceiverStats {
        ReceiverStats {
            received: self.received.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::HostedCaches;
    use crate::config::DiscoveryConfig;
    use crate::discovery::broadcaster::tests::CapturingFactory;

    fn receiver() -> (Arc<CapturingFactory>, DiscoveryReceiver) {
        let factory = Arc::new(CapturingFactory::default());
        let hosted = HostedCaches::new();
        hosted.insert("users");
        let broadcaster = Arc::new(DiscoveryBroadcaster::new(
            DiscoveryConfig::default(),
            Uuid::new_v4(),
            hosted,
            factory.clone(),
        ));
        (factory, DiscoveryReceiver::new(Arc::new(PeerRegistry::new()), broadcaster))
    }

    fn passive(host: &str, names: &[&str]) -> Vec<u8> {
        DiscoveryMessage::passive(
            Uuid::new_v4(),
            host,
            1110,
            names.iter().map(|name| name.to_string()).collect(),
        )
        .encode()
        .unwrap()
    }

    #[tokio::test]
    async fn test_passive_recorded() {
        let (_, receiver) = receiver();
        let outcome = receiver.handle_datagram(&passive("peer-a", &["users"])).await;

        assert_eq!(outcome, ReceiveOutcome::Recorded);
        assert_eq!(receiver.registry().peers_for("users").len(), 1);
        assert!(receiver.registry().peers_for("orders").is_empty());
    }

    #[tokio::test]
    async fn test_repeat_passive_updates_same_peer() {
        let (_, receiver) = receiver();
        receiver.handle_datagram(&passive("peer-a", &["users"])).await;
        receiver.handle_datagram(&passive("peer-a", &["users", "orders"])).await;

        assert_eq!(receiver.registry().len(), 1);
        assert_eq!(receiver.registry().peers_for("orders").len(), 1);
    }

    #[tokio::test]
    async fn test_own_datagrams_ignored() {
        let (factory, receiver) = receiver();
        let own = DiscoveryMessage::request(receiver.sender_id, "me", 1110)
            .encode()
            .unwrap();

        assert_eq!(receiver.handle_datagram(&own).await, ReceiveOutcome::Own);
        assert!(factory.sent.lock().is_empty());
        assert_eq!(receiver.stats().ignored, 1);
    }

    #[tokio::test]
    async fn test_request_answered_with_passive() {
        let (factory, receiver) = receiver();
        let request = DiscoveryMessage::request(Uuid::new_v4(), "peer-b", 1110)
            .encode()
            .unwrap();

        assert_eq!(receiver.handle_datagram(&request).await, ReceiveOutcome::Answered);
        let sent = factory.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, BroadcastKind::Passive);
        assert_eq!(sent[0].cache_names, vec!["users"]);
        assert!(receiver.registry().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_dropped() {
        let (_, receiver) = receiver();
        assert_eq!(receiver.handle_datagram(b"{not json").await, ReceiveOutcome::Dropped);
        assert_eq!(receiver.stats().dropped, 1);
    }

    #[test]
    fn test_evict_stale_peers() {
        let registry = PeerRegistry::new();
        let message = DiscoveryMessage::passive(Uuid::new_v4(), "peer-a", 1110, vec![]);
        assert!(registry.record(&message));
        assert!(!registry.record(&message));

        assert_eq!(registry.evict_stale(Duration::from_secs(3600)), 0);
        let future = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(registry.evict_older_than(future), 1);
        assert!(registry.is_empty());
    }
}
