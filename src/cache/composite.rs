//! In-process Cache
//!
//! A named region: a memory store with its auxiliary tiers attached.
//!
//! # Propagation
//!
//! ```text
//!               update / remove            local_update / local_remove
//!                     │                               │
//!               memory store                    memory store
//!                     │                               │
//!     ┌───────────────┼───────────────┐               │
//!   disk           remote          lateral          disk only
//! ```
//!
//! Local entry points apply a peer's change without sending it back out.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{debug, info, warn};

use super::element::CacheElement;
use super::tier::{AuxiliaryCache, AuxiliaryKind, CacheStatus};
use crate::error::Result;

/// Local-apply entry points used when a change arrives from a peer.
///
/// Implementations update the local tiers only and never re-propagate.
#[async_trait]
pub trait LocalCache: Send + Sync {
    fn cache_name(&self) -> &str;

    async fn local_update(&self, element: CacheElement) -> Result<()>;

    async fn local_remove(&self, key: &str) -> Result<bool>;

    async fn local_remove_all(&self) -> Result<()>;
}

/// Snapshot of in-process cache counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeStats {
    pub cache_name: String,
    pub memory_size: usize,
    pub hits: u64,
    pub auxiliary_hits: u64,
    pub misses: u64,
}

/// Memory store plus attached auxiliary tiers
pub struct CompositeCache {
    cache_name: String,
    memory: DashMap<String, Arc<CacheElement>>,
    auxiliaries: RwLock<Vec<Arc<dyn AuxiliaryCache>>>,
    status: AtomicU8,
    hits: AtomicU64,
    auxiliary_hits: AtomicU64,
    misses: AtomicU64,
}

impl CompositeCache {
    pub fn new(cache_name: impl Into<String>) -> Self {
        Self {
            cache_name: cache_name.into(),
            memory: DashMap::new(),
            auxiliaries: RwLock::new(Vec::new()),
            status: AtomicU8::new(CacheStatus::Alive as u8),
            hits: AtomicU64::new(0),
            auxiliary_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Attach a tier behind the memory store
    pub fn add_auxiliary(&self, auxiliary: Arc<dyn AuxiliaryCache>) {
        debug!(
            cache_name = %self.cache_name,
            kind = %auxiliary.kind(),
            "Auxiliary attached"
        );
        self.auxiliaries.write().push(auxiliary);
    }

    /// Snapshot of the attached tiers
    pub fn auxiliaries(&self) -> Vec<Arc<dyn AuxiliaryCache>> {
        self.auxiliaries.read().clone()
    }

    pub fn status(&self) -> CacheStatus {
        CacheStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn is_alive(&self) -> bool {
        self.status() == CacheStatus::Alive
    }

    /// Store locally and send to every tier that accepts the element
    pub async fn update(&self, element: CacheElement) -> Result<()> {
        self.store(element, |_| true).await
    }

    /// Memory first, then each tier in attach order; tier hits are promoted
    pub async fn get(&self, key: &str) -> Option<Arc<CacheElement>> {
        if !self.is_alive() {
            return None;
        }

        if let Some(found) = self.memory.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(found.value().clone());
        }

        for auxiliary in self.auxiliaries() {
            match auxiliary.get(key).await {
                Ok(Some(found)) => {
                    self.auxiliary_hits.fetch_add(1, Ordering::Relaxed);
                    self.memory.insert(key.to_string(), found.clone());
                    return Some(found);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(cache_name = %self.cache_name, kind = %auxiliary.kind(), key, error = %e, "Auxiliary get failed");
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Elements whose key matches `pattern`, memory results winning
    pub async fn get_matching(&self, pattern: &str) -> Result<HashMap<String, Arc<CacheElement>>> {
        let regex = Regex::new(pattern)?;
        let mut found = HashMap::new();
        if !self.is_alive() {
            return Ok(found);
        }

        for auxiliary in self.auxiliaries() {
            match auxiliary.get_matching(pattern).await {
                Ok(matches) => found.extend(matches),
                Err(e) => {
                    warn!(cache_name = %self.cache_name, kind = %auxiliary.kind(), error = %e, "Auxiliary get_matching failed");
                }
            }
        }

        for entry in self.memory.iter().filter(|entry| regex.is_match(entry.key())) {
            found.insert(entry.key().clone(), entry.value().clone());
        }
        Ok(found)
    }

    /// Keys in `group` across memory and tiers
    pub async fn get_group_keys(&self, group: &str) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self
            .memory
            .iter()
            .filter(|entry| entry.value().group() == Some(group))
            .map(|entry| entry.key().clone())
            .collect();

        for auxiliary in self.auxiliaries() {
            match auxiliary.get_group_keys(group).await {
                Ok(found) => keys.extend(found),
                Err(e) => {
                    warn!(cache_name = %self.cache_name, kind = %auxiliary.kind(), error = %e, "Auxiliary get_group_keys failed");
                }
            }
        }
        keys
    }

    /// Remove everywhere, including peers
    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.evict(key, |_| true).await
    }

    /// Clear everywhere, including peers
    pub async fn remove_all(&self) -> Result<()> {
        self.clear(|_| true).await
    }

    /// Dispose every tier; the cache stops serving reads
    pub async fn dispose(&self) {
        let previous = self
            .status
            .swap(CacheStatus::Disposed as u8, Ordering::AcqRel);
        if CacheStatus::from_u8(previous) == CacheStatus::Disposed {
            return;
        }

        for auxiliary in self.auxiliaries() {
            if let Err(e) = auxiliary.dispose().await {
                warn!(cache_name = %self.cache_name, kind = %auxiliary.kind(), error = %e, "Auxiliary dispose failed");
            }
        }
        self.memory.clear();
        info!(cache_name = %self.cache_name, "Cache disposed");
    }

    /// Elements held in memory
    pub fn size(&self) -> usize {
        self.memory.len()
    }

    pub fn stats(&self) -> CompositeStats {
        CompositeStats {
            cache_name: self.cache_name.clone(),
            memory_size: self.memory.len(),
            hits: self.hits.load(Ordering::Relaxed),
            auxiliary_hits: self.auxiliary_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn store<F>(&self, element: CacheElement, include: F) -> Result<()>
    where
        F: Fn(AuxiliaryKind) -> bool,
    {
        if !self.is_alive() {
            return Ok(());
        }

        let element = Arc::new(element);
        self.memory
            .insert(element.key().to_string(), element.clone());

        for auxiliary in self.auxiliaries() {
            let kind = auxiliary.kind();
            if !include(kind) || !kind.accepts(&element) {
                continue;
            }
            if let Err(e) = auxiliary.update(element.clone()).await {
                warn!(cache_name = %self.cache_name, kind = %kind, key = element.key(), error = %e, "Auxiliary update failed");
            }
        }
        Ok(())
    }

    async fn evict<F>(&self, key: &str, include: F) -> Result<bool>
    where
        F: Fn(AuxiliaryKind) -> bool,
    {
        let mut removed = self.memory.remove(key).is_some();

        for auxiliary in self.auxiliaries() {
            let kind = auxiliary.kind();
            if !include(kind) {
                continue;
            }
            match auxiliary.remove(key).await {
                Ok(hit) => removed |= hit,
                Err(e) => {
                    warn!(cache_name = %self.cache_name, kind = %kind, key, error = %e, "Auxiliary remove failed");
                }
            }
        }
        Ok(removed)
    }

    async fn clear<F>(&self, include: F) -> Result<()>
    where
        F: Fn(AuxiliaryKind) -> bool,
    {
        self.memory.clear();

        for auxiliary in self.auxiliaries() {
            let kind = auxiliary.kind();
            if !include(kind) {
                continue;
            }
            if let Err(e) = auxiliary.remove_all().await {
                warn!(cache_name = %self.cache_name, kind = %kind, error = %e, "Auxiliary remove_all failed");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LocalCache for CompositeCache {
    fn cache_name(&self) -> &str {
        &self.cache_name
    }

    async fn local_update(&self, element: CacheElement) -> Result<()> {
        self.store(element, |kind| !kind.propagates()).await
    }

    async fn local_remove(&self, key: &str) -> Result<bool> {
        self.evict(key, |kind| !kind.propagates()).await
    }

    async fn local_remove_all(&self) -> Result<()> {
        self.clear(|kind| !kind.propagates()).await
    }
}
