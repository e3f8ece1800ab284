//! Remote Update Listener
//!
//! Applies put, remove and removeAll notifications from peers to the local
//! in-process caches through their local-apply entry points, so nothing
//! received here is sent back out.
//!
//! # Listener Id
//!
//! The id starts at 0. The remote coordinator assigns a non-zero id on
//! registration and tags requests with it; a request carrying our own id
//! originated here and is never re-applied. A reset to 0 means the
//! connection was lost and the listener must register again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{CacheManager, ElementPayload, ElementSerializer, LocalCache, StandardSerializer};
use crate::config::{RemoteListenerConfig, RemoteType};
use crate::error::{Error, Result};

/// Receiver of change notifications from peers
#[async_trait]
pub trait RemoteCacheListener: Send + Sync {
    async fn handle_put(&self, element: ElementPayload) -> Result<()>;

    async fn handle_remove(&self, cache_name: &str, key: &str) -> Result<bool>;

    async fn handle_remove_all(&self, cache_name: &str) -> Result<()>;

    async fn handle_dispose(&self, cache_name: &str) -> Result<()>;

    fn listener_id(&self) -> u64;

    fn set_listener_id(&self, id: u64);

    /// True when `requester_id` identifies this listener
    fn is_own_request(&self, requester_id: u64) -> bool {
        let id = self.listener_id();
        id != 0 && requester_id == id
    }
}

/// Listener counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerStats {
    pub listener_id: u64,
    pub puts: u64,
    pub removes: u64,
    pub dropped: u64,
}

/// Listener applying peer changes to caches resolved through a [`CacheManager`]
pub struct RemoteUpdateListener {
    listener_id: AtomicU64,
    config: RemoteListenerConfig,
    manager: RwLock<Option<Arc<dyn CacheManager>>>,
    serializer: Arc<dyn ElementSerializer>,
    puts: AtomicU64,
    removes: AtomicU64,
    dropped: AtomicU64,
}

impl RemoteUpdateListener {
    /// Listener bound to `manager`
    pub fn new(config: RemoteListenerConfig, manager: Arc<dyn CacheManager>) -> Self {
        let listener = Self::unbound(config);
        listener.set_cache_manager(manager);
        listener
    }

    /// Listener whose manager is supplied later via [`set_cache_manager`](Self::set_cache_manager)
    pub fn unbound(config: RemoteListenerConfig) -> Self {
        info!(
            remote_host = %config.remote_host,
            remote_port = config.remote_port,
            remote_type = ?config.remote_type,
            remove_upon_remote_put = config.remove_upon_remote_put,
            "Remote listener created"
        );
        Self {
            listener_id: AtomicU64::new(0),
            config,
            manager: RwLock::new(None),
            serializer: Arc::new(StandardSerializer::new()),
            puts: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Replace the payload decoder
    pub fn with_serializer(mut self, serializer: Arc<dyn ElementSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn set_cache_manager(&self, manager: Arc<dyn CacheManager>) {
        *self.manager.write() = Some(manager);
    }

    /// True until the coordinator assigns an id
    pub fn needs_registration(&self) -> bool {
        self.listener_id() == 0
    }

    pub fn remote_type(&self) -> RemoteType {
        self.config.remote_type
    }

    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            listener_id: self.listener_id(),
            puts: self.puts.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn local_cache(&self, cache_name: &str) -> Result<Arc<dyn LocalCache>> {
        let manager = self
            .manager
            .read()
            .clone()
            .ok_or(Error::CacheManagerMissing)?;
        manager.local_cache(cache_name)
    }
}

#[async_trait]
impl RemoteCacheListener for RemoteUpdateListener {
    async fn handle_put(&self, element: ElementPayload) -> Result<()> {
        let puts = self.puts.fetch_add(1, Ordering::Relaxed) + 1;
        if puts % 100 == 0 {
            info!(puts, "Remote puts received");
        }

        let cache_name = element.cache_name().to_string();
        let key = element.key().to_string();

        if self.config.remove_upon_remote_put {
            debug!(cache_name = %cache_name, key = %key, "Remote put, removing locally");
            self.local_cache(&cache_name)?.local_remove(&key).await?;
            return Ok(());
        }

        let element = match element {
            ElementPayload::Plain(element) => element,
            ElementPayload::Serialized(serialized) => match self.serializer.deserialize(&serialized) {
                Ok(element) => element,
                Err(e) if e.is_protocol_decode() => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(cache_name = %cache_name, key = %key, error = %e, "Dropping undecodable remote put");
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
        };

        debug!(cache_name = %cache_name, key = %key, "Applying remote put");
        self.local_cache(&cache_name)?.local_update(element).await
    }

    async fn handle_remove(&self, cache_name: &str, key: &str) -> Result<bool> {
        let removes = self.removes.fetch_add(1, Ordering::Relaxed) + 1;
        if removes % 100 == 0 {
            info!(removes, "Remote removes received");
        }

        debug!(cache_name, key, "Applying remote remove");
        self.local_cache(cache_name)?.local_remove(key).await
    }

    async fn handle_remove_all(&self, cache_name: &str) -> Result<()> {
        debug!(cache_name, "Applying remote remove_all");
        self.local_cache(cache_name)?.local_remove_all().await
    }

    async fn handle_dispose(&self, cache_name: &str) -> Result<()> {
        debug!(cache_name, "Ignoring remote dispose");
        Ok(())
    }

    fn listener_id(&self) -> u64 {
        self.listener_id.load(Ordering::Acquire)
    }

    fn set_listener_id(&self, id: u64) {
        let previous = self.listener_id.swap(id, Ordering::AcqRel);
        if id == 0 && previous != 0 {
            info!(previous, "Listener id reset, re-registration required");
        } else {
            info!(listener_id = id, "Listener id assigned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheElement, CacheHub, PayloadEncoding};
    use assert_matches::assert_matches;

    fn bound(config: RemoteListenerConfig) -> (Arc<CacheHub>, RemoteUpdateListener) {
        let hub = Arc::new(CacheHub::new());
        let listener = RemoteUpdateListener::new(config, hub.clone());
        (hub, listener)
    }

    #[tokio::test]
    async fn test_put_applies_locally() {
        let (hub, listener) = bound(RemoteListenerConfig::default());
        listener
            .handle_put(CacheElement::new("users", "A", "v1").into())
            .await
            .unwrap();

        let cache = hub.existing("users").unwrap();
        assert_eq!(cache.get("A").await.unwrap().value().as_ref(), b"v1");
        assert_eq!(listener.stats().puts, 1);
    }

    #[tokio::test]
    async fn test_remove_upon_remote_put_invalidates() {
        let (hub, listener) = bound(RemoteListenerConfig {
            remove_upon_remote_put: true,
            ..Default::default()
        });
        let cache = hub.get_cache("users").unwrap();
        cache.update(CacheElement::new("users", "A", "old")).await.unwrap();

        listener
            .handle_put(CacheElement::new("users", "A", "new").into())
            .await
            .unwrap();

        assert!(cache.get("A").await.is_none());
    }

    #[tokio::test]
    async fn test_serialized_put_is_decoded() {
        let (hub, listener) = bound(RemoteListenerConfig::default());
        let element = CacheElement::new("users", "A", vec![3u8; 2048]);
        let compacted = StandardSerializer::new()
            .serialize(&element, PayloadEncoding::Lz4)
            .unwrap();

        listener.handle_put(compacted.into()).await.unwrap();

        let found = hub.existing("users").unwrap().get("A").await.unwrap();
        assert_eq!(*found, element);
    }

    #[tokio::test]
    async fn test_unknown_payload_class_is_dropped() {
        let (hub, listener) = bound(RemoteListenerConfig::default());
        let mut compacted = StandardSerializer::new()
            .serialize(&CacheElement::new("users", "A", "v"), PayloadEncoding::Raw)
            .unwrap();
        compacted.encoding = "legacy".into();

        listener.handle_put(compacted.into()).await.unwrap();

        assert!(hub.existing("users").is_none());
        assert_eq!(listener.stats().dropped, 1);
    }

    #[tokio::test]
    async fn test_missing_manager_is_an_error() {
        let listener = RemoteUpdateListener::unbound(RemoteListenerConfig::default());
        let err = listener.handle_remove("users", "A").await.unwrap_err();
        assert_matches!(err, Error::CacheManagerMissing);

        listener.set_cache_manager(Arc::new(CacheHub::new()));
        assert!(!listener.handle_remove("users", "A").await.unwrap());
    }

    #[test]
    fn test_listener_id_and_own_requests() {
        let listener = RemoteUpdateListener::unbound(RemoteListenerConfig::default());
        assert!(listener.needs_registration());
        // Unregistered listeners never claim a request
        assert!(!listener.is_own_request(0));

        listener.set_listener_id(42);
        assert!(listener.is_own_request(42));
        assert!(!listener.is_own_request(7));

        listener.set_listener_id(0);
        assert!(listener.needs_registration());
    }

    #[tokio::test]
    async fn test_dispose_is_ignored() {
        let (hub, listener) = bound(RemoteListenerConfig::default());
        let cache = hub.get_cache("users").unwrap();
        listener.handle_dispose("users").await.unwrap();
        assert_eq!(cache.status(), crate::cache::CacheStatus::Alive);
    }
}
