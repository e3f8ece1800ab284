//! Discovery Broadcaster
//!
//! Announces this node's service endpoint and hosted cache names.
//!
//! # Schedule
//!
//! ```text
//! start ──▶ REQUEST (once, best-effort)
//!   │
//!   └──▶ every broadcast_interval: fresh channel ──▶ PASSIVE {host, port, names}
//! ```
//!
//! A failed send is logged and counted; the next tick tries again with a new
//! channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::channel::ChannelFactory;
use super::message::DiscoveryMessage;
use crate::cache::HostedCaches;
use crate::config::DiscoveryConfig;
use crate::error::Result;

/// Broadcaster counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcasterStats {
    pub requests_sent: u64,
    pub passives_sent: u64,
    pub failures: u64,
}

pub struct DiscoveryBroadcaster {
    config: DiscoveryConfig,
    sender_id: Uuid,
    hosted: HostedCaches,
    channels: Arc<dyn ChannelFactory>,
    requests_sent: AtomicU64,
    passives_sent: AtomicU64,
    failures: AtomicU64,
}

impl DiscoveryBroadcaster {
    /// Create the broadcaster and send the startup REQUEST broadcast.
    ///
    /// A failed request is logged, never returned.
    pub async fn start(
        config: DiscoveryConfig,
        sender_id: Uuid,
        hosted: HostedCaches,
        channels: Arc<dyn ChannelFactory>,
    ) -> Self {
        let broadcaster = Self::new(config, sender_id, hosted, channels);
        if let Err(e) = broadcaster.request_broadcast().await {
            error!(error = %e, "Problem sending a request broadcast");
        }
        broadcaster
    }

    /// Create without broadcasting
    pub fn new(
        config: DiscoveryConfig,
        sender_id: Uuid,
        hosted: HostedCaches,
        channels: Arc<dyn ChannelFactory>,
    ) -> Self {
        debug!(
            discovery_address = %config.discovery_address,
            discovery_port = config.discovery_port,
            service_host = %config.service_host,
            service_port = config.service_port,
            "Creating discovery broadcaster"
        );
        Self {
            config,
            sender_id,
            hosted,
            channels,
            requests_sent: AtomicU64::new(0),
            passives_sent: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn sender_id(&self) -> Uuid {
        self.sender_id
    }

    /// Ask peers to announce themselves
    pub async fn request_broadcast(&self) -> Result<()> {
        let message = DiscoveryMessage::request(
            self.sender_id,
            self.config.service_host.clone(),
            self.config.service_port,
        );
        self.send(&message).await?;
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        debug!("Sent a request broadcast");
        Ok(())
    }

    /// Announce this node with a snapshot of the hosted cache names
    pub async fn passive_broadcast(&self) -> Result<()> {
        let message = DiscoveryMessage::passive(
            self.sender_id,
            self.config.service_host.clone(),
            self.config.service_port,
            self.hosted.snapshot(),
        );
        self.send(&message).await?;
        self.passives_sent.fetch_add(1, Ordering::Relaxed);
        debug!(cache_names = ?message.cache_names, "Sent a passive broadcast");
        Ok(())
    }

    /// One scheduled tick; failures are logged and counted
    pub async fn tick(&self) {
        if let Err(e) = self.passive_broadcast().await {
            error!(error = %e, "Problem sending a passive broadcast");
        }
    }

    /// Tick on `broadcast_interval` until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.broadcast_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_secs = self.config.broadcast_interval.as_secs(),
            "Discovery broadcaster started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        info!(passives_sent = self.passives_sent.load(Ordering::Relaxed), "Discovery broadcaster stopped");
    }

    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            passives_sent: self.passives_sent.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    async fn send(&self, message: &DiscoveryMessage) -> Result<()> {
        let result = match self.channels.open().await {
            Ok(channel) => channel.send(message).await,
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::discovery::channel::DiscoveryChannel;
    use crate::discovery::message::BroadcastKind;
    use crate::error::Error;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    /// Channel factory capturing sent messages; can be made to fail
    #[derive(Default)]
    pub(crate) struct CapturingFactory {
        pub sent: Arc<Mutex<Vec<DiscoveryMessage>>>,
        pub opened: AtomicU64,
        pub failing: AtomicBool,
    }

    struct CapturingChannel {
        sent: Arc<Mutex<Vec<DiscoveryMessage>>>,
    }

    #[async_trait]
    impl DiscoveryChannel for CapturingChannel {
        async fn send(&self, message: &DiscoveryMessage) -> Result<()> {
            self.sent.lock().push(message.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl ChannelFactory for CapturingFactory {
        async fn open(&self) -> Result<Box<dyn DiscoveryChannel>> {
            self.opened.fetch_add(1, Ordering::Relaxed);
            if self.failing.load(Ordering::Relaxed) {
                return Err(Error::Config("bad discovery address".into()));
            }
            Ok(Box::new(CapturingChannel {
                sent: self.sent.clone(),
            }))
        }
    }

    fn config() -> DiscoveryConfig {
        DiscoveryConfig {
            service_host: "10.0.0.1".into(),
            service_port: 1110,
            broadcast_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_sends_one_request() {
        let factory = Arc::new(CapturingFactory::default());
        let broadcaster =
            DiscoveryBroadcaster::start(config(), Uuid::new_v4(), HostedCaches::new(), factory.clone()).await;

        let sent = factory.sent.lock().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, BroadcastKind::Request);
        assert_eq!(broadcaster.stats().requests_sent, 1);
    }

    #[tokio::test]
    async fn test_failed_start_request_is_not_fatal() {
        let factory = Arc::new(CapturingFactory::default());
        factory.failing.store(true, Ordering::Relaxed);

        let broadcaster =
            DiscoveryBroadcaster::start(config(), Uuid::new_v4(), HostedCaches::new(), factory.clone()).await;

        assert_eq!(broadcaster.stats().failures, 1);
        assert_eq!(broadcaster.stats().requests_sent, 0);
    }

    #[tokio::test]
    async fn test_tick_carries_current_names_on_fresh_channel() {
        let factory = Arc::new(CapturingFactory::default());
        let hosted = HostedCaches::new();
        hosted.insert("users");
        let broadcaster = DiscoveryBroadcaster::new(config(), Uuid::new_v4(), hosted.clone(), factory.clone());

        broadcaster.tick().await;
        hosted.insert("orders");
        broadcaster.tick().await;

        let sent = factory.sent.lock().clone();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, BroadcastKind::Passive);
        assert_eq!(sent[0].cache_names, vec!["users"]);
        assert_eq!(sent[1].cache_names, vec!["orders", "users"]);
        assert_eq!(sent[1].host, "10.0.0.1");
        assert_eq!(sent[1].port, 1110);
        assert_eq!(factory.opened.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_failed_tick_does_not_stop_later_ticks() {
        let factory = Arc::new(CapturingFactory::default());
        let broadcaster = DiscoveryBroadcaster::new(config(), Uuid::new_v4(), HostedCaches::new(), factory.clone());

        factory.failing.store(true, Ordering::Relaxed);
        broadcaster.tick().await;
        factory.failing.store(false, Ordering::Relaxed);
        broadcaster.tick().await;

        let stats = broadcaster.stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.passives_sent, 1);
    }

    #[tokio::test]
    async fn test_run_ticks_until_shutdown() {
        let factory = Arc::new(CapturingFactory::default());
        let broadcaster = Arc::new(DiscoveryBroadcaster::new(
            config(),
            Uuid::new_v4(),
            HostedCaches::new(),
            factory.clone(),
        ));
        let shutdown = CancellationToken::new();

        let handle = {
            let broadcaster = broadcaster.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { broadcaster.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert!(broadcaster.stats().passives_sent >= 2);
    }
}
