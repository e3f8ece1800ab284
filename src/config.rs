//! Configuration for the auxiliary tiers
//!
//! Plain structs with defaults; the node binary fills them from CLI flags.

use std::time::Duration;

use crate::error::{Error, Result};

/// Default discovery multicast group
pub const DEFAULT_DISCOVERY_ADDRESS: &str = "228.5.6.7";

/// Default discovery UDP port
pub const DEFAULT_DISCOVERY_PORT: u16 = 6789;

/// Default interval between passive broadcasts
pub const DEFAULT_BROADCAST_INTERVAL: Duration = Duration::from_secs(15);

/// Broadcast intervals a peer may miss before it is evicted
pub const PEER_MAX_AGE_INTERVALS: u32 = 4;

// =============================================================================
// Event Queue
// =============================================================================

/// Configuration for a single-consumer event queue.
#[derive(Debug, Clone)]
pub struct EventQueueConfig {
    /// Attempts per task before the queue is destroyed
    pub max_failures: u32,

    /// Delay between attempts of a failing task
    pub wait_before_retry: Duration,
}

impl Default for EventQueueConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            wait_before_retry: Duration::from_millis(500),
        }
    }
}

// =============================================================================
// Disk Cache
// =============================================================================

/// Configuration for a write-behind disk cache.
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Region name this disk cache serves
    pub cache_name: String,

    /// Purgatory capacity; `None` leaves it unbounded
    pub max_purgatory_size: Option<usize>,

    /// Upper bound on waiting for a per-key lock
    pub lock_timeout: Duration,

    /// Event queue settings
    pub event_queue: EventQueueConfig,
}

impl DiskCacheConfig {
    /// Create a config for the named cache with default settings
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache_name.is_empty() {
            return Err(Error::Config("cache_name must not be empty".into()));
        }
        if self.max_purgatory_size == Some(0) {
            return Err(Error::Config("max_purgatory_size must be > 0".into()));
        }
        if self.event_queue.max_failures == 0 {
            return Err(Error::Config("max_failures must be > 0".into()));
        }
        Ok(())
    }
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            cache_name: "default".to_string(),
            max_purgatory_size: None,
            lock_timeout: Duration::from_secs(5),
            event_queue: EventQueueConfig::default(),
        }
    }
}

// =============================================================================
// Remote Listener
// =============================================================================

/// Role of the remote peer this node listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteType {
    /// Plain client of a remote server
    #[default]
    Local,
    /// Server-to-server cluster member
    Cluster,
}

/// Configuration for the remote update listener.
#[derive(Debug, Clone)]
pub struct RemoteListenerConfig {
    /// Invalidate instead of importing remote puts
    pub remove_upon_remote_put: bool,

    /// Host of the remote coordinator
    pub remote_host: String,

    /// Port of the remote coordinator
    pub remote_port: u16,

    /// Role of the remote peer
    pub remote_type: RemoteType,
}

impl Default for RemoteListenerConfig {
    fn default() -> Self {
        Self {
            remove_upon_remote_put: false,
            remote_host: "localhost".to_string(),
            remote_port: 1102,
            remote_type: RemoteType::Local,
        }
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Configuration for the discovery broadcaster and receiver.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Multicast group (or unicast peer) datagrams are sent to
    pub discovery_address: String,

    /// UDP port datagrams are sent to
    pub discovery_port: u16,

    /// Host this node advertises for its service endpoint
    pub service_host: String,

    /// Port this node advertises for its service endpoint
    pub service_port: u16,

    /// Interval between passive broadcasts
    pub broadcast_interval: Duration,

    /// Peers not heard from within this window are evicted
    pub peer_max_age: Duration,
}

impl DiscoveryConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.discovery_address.is_empty() {
            return Err(Error::Config("discovery_address must not be empty".into()));
        }
        if self.discovery_port == 0 {
            return Err(Error::Config("discovery_port must be > 0".into()));
        }
        if self.service_port == 0 {
            return Err(Error::Config("service_port must be > 0".into()));
        }
        if self.broadcast_interval.is_zero() {
            return Err(Error::Config("broadcast_interval must be > 0".into()));
        }
        if self.peer_max_age.is_zero() {
            return Err(Error::Config("peer_max_age must be > 0".into()));
        }
        if self.peer_max_age <= self.broadcast_interval {
            return Err(Error::Config(
                "peer_max_age must exceed broadcast_interval".into(),
            ));
        }
        Ok(())
    }

    /// Eviction window for a broadcast interval: four missed broadcasts
    pub fn peer_max_age_for(broadcast_interval: Duration) -> Duration {
        broadcast_interval.saturating_mul(PEER_MAX_AGE_INTERVALS)
    }

    /// Default config announcing every `broadcast_interval`, with the
    /// eviction window scaled to match
    pub fn with_broadcast_interval(broadcast_interval: Duration) -> Self {
        Self {
            broadcast_interval,
            peer_max_age: Self::peer_max_age_for(broadcast_interval),
            ..Default::default()
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_address: DEFAULT_DISCOVERY_ADDRESS.to_string(),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            service_host: "127.0.0.1".to_string(),
            service_port: 1110,
            broadcast_interval: DEFAULT_BROADCAST_INTERVAL,
            peer_max_age: Self::peer_max_age_for(DEFAULT_BROADCAST_INTERVAL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_config_defaults_are_valid() {
        assert!(DiskCacheConfig::new("session").validate().is_ok());
    }

    #[test]
    fn test_disk_config_rejects_zero_purgatory() {
        let config = DiskCacheConfig {
            max_purgatory_size: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_discovery_peer_age_follows_interval() {
        let config = DiscoveryConfig::with_broadcast_interval(Duration::from_secs(120));
        assert_eq!(config.peer_max_age, Duration::from_secs(480));
        assert!(config.peer_max_age > config.broadcast_interval);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_discovery_config_rejects_bad_peer_age() {
        let zero = DiscoveryConfig {
            peer_max_age: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let shorter = DiscoveryConfig {
            broadcast_interval: Duration::from_secs(120),
            peer_max_age: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(shorter.validate().is_err());
    }

    #[test]
    fn test_discovery_config_rejects_zero_port() {
        let config = DiscoveryConfig {
            discovery_port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
