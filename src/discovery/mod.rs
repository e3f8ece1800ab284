//! Peer Discovery
//!
//! Nodes find each other through UDP datagrams on a shared multicast group.
//!
//! # Protocol
//!
//! ```text
//! node A (startup)  ── REQUEST ──▶  group  ──▶  node B answers with PASSIVE
//! every node        ── PASSIVE {host, port, cache names} every interval
//! receivers         ── PASSIVE ──▶ PeerRegistry (own datagrams ignored)
//! ```

mod broadcaster;
mod channel;
mod message;
mod registry;

pub use broadcaster::{BroadcasterStats, DiscoveryBroadcaster};
pub use channel::{bind_discovery_socket, ChannelFactory, DiscoveryChannel, UdpChannel, UdpChannelFactory};
pub use message::{BroadcastKind, DiscoveryMessage, PeerDescriptor};
pub use registry::{DiscoveryReceiver, PeerRegistry, ReceiveOutcome, ReceiverStats};
