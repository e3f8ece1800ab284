//! Remote cache service backed by the local hub
//!
//! Reads come straight from the hosted caches. Mutations go through the
//! remote listener, which applies them locally without re-propagating; a
//! mutation that originated on this node is skipped.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::listener::RemoteCacheListener;
use crate::cache::{CacheElement, CacheHub, ElementPayload};
use crate::error::Result;

/// Operations a request dispatcher can invoke
#[async_trait]
pub trait RemoteCacheService: Send + Sync {
    async fn get(
        &self,
        cache_name: &str,
        key: &str,
        requester_id: u64,
    ) -> Result<Option<Arc<CacheElement>>>;

    async fn get_multiple(
        &self,
        cache_name: &str,
        keys: &BTreeSet<String>,
        requester_id: u64,
    ) -> Result<HashMap<String, Arc<CacheElement>>>;

    async fn get_matching(
        &self,
        cache_name: &str,
        pattern: &str,
        requester_id: u64,
    ) -> Result<HashMap<String, Arc<CacheElement>>>;

    async fn remove(&self, cache_name: &str, key: &str, requester_id: u64) -> Result<()>;

    async fn remove_all(&self, cache_name: &str, requester_id: u64) -> Result<()>;

    async fn update(&self, element: ElementPayload, requester_id: u64) -> Result<()>;

    async fn get_group_keys(&self, cache_name: &str, group: &str) -> Result<BTreeSet<String>>;
}

/// Service over the caches hosted by a [`CacheHub`]
pub struct HubCacheService {
    hub: Arc<CacheHub>,
    listener: Arc<dyn RemoteCacheListener>,
}

impl HubCacheService {
    pub fn new(hub: Arc<CacheHub>, listener: Arc<dyn RemoteCacheListener>) -> Self {
        Self { hub, listener }
    }

    fn skip_own(&self, op: &'static str, cache_name: &str, requester_id: u64) -> bool {
        let own = self.listener.is_own_request(requester_id);
        if own {
            debug!(op, cache_name, requester_id, "Skipping request from this node");
        }
        own
    }
}

#[async_trait]
impl RemoteCacheService for HubCacheService {
    async fn get(
        &self,
        cache_name: &str,
        key: &str,
        _requester_id: u64,
    ) -> Result<Option<Arc<CacheElement>>> {
        match self.hub.existing(cache_name) {
            Some(cache) => Ok(cache.get(key).await),
            None => Ok(None),
        }
    }

    async fn get_multiple(
        &self,
        cache_name: &str,
        keys: &BTreeSet<String>,
        _requester_id: u64,
    ) -> Result<HashMap<String, Arc<CacheElement>>> {
        let mut found = HashMap::new();
        if let Some(cache) = self.hub.existing(cache_name) {
            for key in keys {
                if let Some(element) = cache.get(key).await {
                    found.insert(key.clone(), element);
                }
            }
        }
        Ok(found)
    }

    async fn get_matching(
        &self,
        cache_name: &str,
        pattern: &str,
        _requester_id: u64,
    ) -> Result<HashMap<String, Arc<CacheElement>>> {
        match self.hub.existing(cache_name) {
            Some(cache) => cache.get_matching(pattern).await,
            None => Ok(HashMap::new()),
        }
    }

    async fn remove(&self, cache_name: &str, key: &str, requester_id: u64) -> Result<()> {
        if self.skip_own("remove", cache_name, requester_id) {
            return Ok(());
        }
        self.listener.handle_remove(cache_name, key).await.map(|_| ())
    }

    async fn remove_all(&self, cache_name: &str, requester_id: u64) -> Result<()> {
        if self.skip_own("remove_all", cache_name, requester_id) {
            return Ok(());
        }
        self.listener.handle_remove_all(cache_name).await
    }

    async fn update(&self, element: ElementPayload, requester_id: u64) -> Result<()> {
        if self.skip_own("update", element.cache_name(), requester_id) {
            return Ok(());
        }
        self.listener.handle_put(element).await
    }

    async fn get_group_keys(&self, cache_name: &str, group: &str) -> Result<BTreeSet<String>> {
        match self.hub.existing(cache_name) {
            Some(cache) => Ok(cache.get_group_keys(group).await),
            None => Ok(BTreeSet::new()),
        }
    }
}
