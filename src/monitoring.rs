//! Prometheus export of cache and discovery statistics
//!
//! Gauges are refreshed from the live statistics right before each scrape,
//! so nothing on the cache path touches Prometheus types.

use prometheus::{Encoder, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::CacheHub;
use crate::discovery::{DiscoveryBroadcaster, PeerRegistry};
use crate::error::{Error, Result};

const NAMESPACE: &str = "auxcache";

/// Gauges for the disk tier, the event queues and discovery
pub struct CacheMetrics {
    registry: Registry,
    purgatory_hits: IntGaugeVec,
    purgatory_size: IntGaugeVec,
    queue_depth: IntGaugeVec,
    queue_failures: IntGaugeVec,
    queue_alive: IntGaugeVec,
    known_peers: IntGauge,
    passive_broadcasts: IntGauge,
    broadcast_failures: IntGauge,
}

impl CacheMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let per_cache = |name: &str, help: &str| -> Result<IntGaugeVec> {
            let gauge = IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["cache_name"])
                .map_err(prometheus_error)?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(prometheus_error)?;
            Ok(gauge)
        };
        let purgatory_hits = per_cache("purgatory_hits", "Reads served from purgatory")?;
        let purgatory_size = per_cache("purgatory_size", "Elements awaiting their disk write")?;
        let queue_depth = per_cache("event_queue_depth", "Tasks queued for the disk backend")?;
        let queue_failures = per_cache("event_queue_failures", "Failed event queue attempts")?;
        let queue_alive = per_cache("event_queue_alive", "1 while the event queue accepts tasks")?;

        let single = |name: &str, help: &str| -> Result<IntGauge> {
            let gauge = IntGauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))
                .map_err(prometheus_error)?;
            registry
                .register(Box::new(gauge.clone()))
                .map_err(prometheus_error)?;
            Ok(gauge)
        };
        let known_peers = single("discovery_known_peers", "Peers heard from")?;
        let passive_broadcasts = single("discovery_passive_broadcasts", "Passive broadcasts sent")?;
        let broadcast_failures = single("discovery_broadcast_failures", "Failed discovery sends")?;

        Ok(Self {
            registry,
            purgatory_hits,
            purgatory_size,
            queue_depth,
            queue_failures,
            queue_alive,
            known_peers,
            passive_broadcasts,
            broadcast_failures,
        })
    }

    /// Copy current disk tier statistics into the gauges
    pub fn refresh_caches(&self, hub: &CacheHub) {
        for disk in hub.disk_caches() {
            let stats = disk.stats();
            let labels = [stats.cache_name.as_str()];
            self.purgatory_hits
                .with_label_values(&labels)
                .set(stats.purgatory_hits as i64);
            self.purgatory_size
                .with_label_values(&labels)
                .set(stats.purgatory_size as i64);
            self.queue_depth
                .with_label_values(&labels)
                .set(stats.queue.pending as i64);
            self.queue_failures
                .with_label_values(&labels)
                .set(stats.queue.failures as i64);
            self.queue_alive
                .with_label_values(&labels)
                .set(i64::from(disk.event_queue().is_alive()));
        }
    }

    /// Copy discovery statistics into the gauges
    pub fn refresh_discovery(&self, peers: &PeerRegistry, broadcaster: &DiscoveryBroadcaster) {
        let stats = broadcaster.stats();
        self.known_peers.set(peers.len() as i64);
        self.passive_broadcasts.set(stats.passives_sent as i64);
        self.broadcast_failures.set(stats.failures as i64);
    }

    /// Text exposition of every gauge with its content type
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prometheus_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn prometheus_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {e}"))
}
