//! Cache Hub - registry of in-process caches
//!
//! Creates named caches on demand, attaches a disk tier when configured and
//! tracks the set of hosted cache names advertised by discovery.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::info;

use super::composite::{CompositeCache, LocalCache};
use crate::config::DiskCacheConfig;
use crate::disk::{DiskBackend, DiskCache};
use crate::error::Result;

/// Produces the storage backend for a named disk cache
pub type BackendFactory = Arc<dyn Fn(&str) -> Arc<dyn DiskBackend> + Send + Sync>;

/// Resolves cache names to their local-apply entry points
pub trait CacheManager: Send + Sync {
    /// Local entry points for `cache_name`, creating the cache if needed
    fn local_cache(&self, cache_name: &str) -> Result<Arc<dyn LocalCache>>;
}

/// Shared set of hosted cache names.
///
/// Cloning shares the set; readers get copies.
#[derive(Debug, Clone, Default)]
pub struct HostedCaches {
    names: Arc<RwLock<BTreeSet<String>>>,
}

impl HostedCaches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the name was not already hosted
    pub fn insert(&self, cache_name: impl Into<String>) -> bool {
        self.names.write().insert(cache_name.into())
    }

    pub fn remove(&self, cache_name: &str) -> bool {
        self.names.write().remove(cache_name)
    }

    pub fn contains(&self, cache_name: &str) -> bool {
        self.names.read().contains(cache_name)
    }

    /// Point-in-time copy of the names
    pub fn snapshot(&self) -> Vec<String> {
        self.names.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.read().is_empty()
    }
}

/// Disk tier attached to every cache the hub creates
struct DiskTier {
    template: DiskCacheConfig,
    backends: BackendFactory,
}

/// Registry of in-process caches
pub struct CacheHub {
    caches: DashMap<String, Arc<CompositeCache>>,
    disks: DashMap<String, Arc<DiskCache>>,
    hosted: HostedCaches,
    disk_tier: Option<DiskTier>,
}

impl CacheHub {
    /// Hub creating memory-only caches
    pub fn new() -> Self {
        Self {
            caches: DashMap::new(),
            disks: DashMap::new(),
            hosted: HostedCaches::new(),
            disk_tier: None,
        }
    }

    /// Hub attaching a disk cache to every cache it creates.
    ///
    /// `template` supplies everything but the cache name.
    pub fn with_disk(template: DiskCacheConfig, backends: BackendFactory) -> Self {
        Self {
            disk_tier: Some(DiskTier { template, backends }),
            ..Self::new()
        }
    }

    /// The named cache, created on first use
    pub fn get_cache(&self, cache_name: &str) -> Result<Arc<CompositeCache>> {
        if let Some(cache) = self.caches.get(cache_name) {
            return Ok(cache.value().clone());
        }

        let cache = Arc::new(CompositeCache::new(cache_name));
        let disk = match &self.disk_tier {
            Some(tier) => {
                let config = DiskCacheConfig {
                    cache_name: cache_name.to_string(),
                    ..tier.template.clone()
                };
                let disk = Arc::new(DiskCache::new(config, (tier.backends)(cache_name))?);
                cache.add_auxiliary(disk.clone());
                Some(disk)
            }
            None => None,
        };

        // Lost races drop the spare cache; its disk queue is destroyed on drop
        let entry = self
            .caches
            .entry(cache_name.to_string())
            .or_insert_with(|| {
                if let Some(disk) = disk {
                    self.disks.insert(cache_name.to_string(), disk);
                }
                self.hosted.insert(cache_name);
                info!(cache_name, "Cache created");
                cache
            });
        Ok(entry.value().clone())
    }

    /// The named cache if it already exists
    pub fn existing(&self, cache_name: &str) -> Option<Arc<CompositeCache>> {
        self.caches.get(cache_name).map(|cache| cache.value().clone())
    }

    /// Disk tier of the named cache, if any
    pub fn disk_cache(&self, cache_name: &str) -> Option<Arc<DiskCache>> {
        self.disks.get(cache_name).map(|disk| disk.value().clone())
    }

    /// Every disk tier, for statistics
    pub fn disk_caches(&self) -> Vec<Arc<DiskCache>> {
        self.disks.iter().map(|disk| disk.value().clone()).collect()
    }

    /// Names of the caches hosted here, shared with discovery
    pub fn hosted(&self) -> HostedCaches {
        self.hosted.clone()
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.hosted.snapshot()
    }

    /// Dispose and forget one cache
    pub async fn free_cache(&self, cache_name: &str) -> bool {
        let Some((_, cache)) = self.caches.remove(cache_name) else {
            return false;
        };
        self.disks.remove(cache_name);
        self.hosted.remove(cache_name);
        cache.dispose().await;
        true
    }

    /// Dispose every cache
    pub async fn shutdown(&self) {
        let caches: Vec<_> = self
            .caches
            .iter()
            .map(|cache| cache.value().clone())
            .collect();
        for cache in caches {
            cache.dispose().await;
        }
        info!("Cache hub shut down");
    }
}

impl Default for CacheHub {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheManager for CacheHub {
    fn local_cache(&self, cache_name: &str) -> Result<Arc<dyn LocalCache>> {
        let cache: Arc<dyn LocalCache> = self.get_cache(cache_name)?;
        Ok(cache)
    }
}
