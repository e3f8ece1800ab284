//! Write-behind Disk Cache
//!
//! Fronts a [`DiskBackend`] with a purgatory and a single-consumer event
//! queue so callers never wait on backend writes.
//!
//! # Write Path
//!
//! ```text
//! update(e) ──▶ purgatory[k] = e (spoolable) ──▶ queue: Put(e)
//!                                                   │
//!                    consumer, under lock(k) ◀──────┘
//!                    ├─ k gone from purgatory?  skip
//!                    ├─ e still spoolable?      backend.update(e)
//!                    └─ drop purgatory[k] if it is still e
//! ```
//!
//! `remove(k)` takes the same per-key lock and clears `spoolable`, so a Put
//! queued before the remove never lands once the remove has run.
//!
//! # Failure Handling
//!
//! Backend errors never reach callers. They are logged and the event queue
//! is destroyed, leaving a purgatory-only cache until restart.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, error, info, warn};

use super::backend::{BackendStats, DiskBackend};
use super::event_queue::{CacheListener, EventQueue, EventQueueStats};
use super::key_lock::{KeyLockGuard, KeyLockTable};
use super::purgatory::{Purgatory, PurgatoryElement};
use crate::cache::{AuxiliaryCache, AuxiliaryKind, CacheElement, CacheStatus};
use crate::config::DiskCacheConfig;
use crate::error::{Error, Result};

/// Disk cache statistics
#[derive(Debug, Clone)]
pub struct DiskCacheStats {
    pub cache_name: String,
    pub status: CacheStatus,
    /// Reads served from purgatory (approximate under concurrency)
    pub purgatory_hits: u64,
    /// Elements awaiting their write
    pub purgatory_size: usize,
    pub queue: EventQueueStats,
    pub backend: BackendStats,
}

/// State shared between callers and the queue consumer
struct DiskCacheCore {
    cache_name: String,
    config: DiskCacheConfig,
    purgatory: Purgatory,
    locks: KeyLockTable,
    backend: Arc<dyn DiskBackend>,
    status: AtomicU8,
}

impl DiskCacheCore {
    fn status(&self) -> CacheStatus {
        CacheStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn is_alive(&self) -> bool {
        self.status() == CacheStatus::Alive
    }

    /// Per-key lock; on timeout the caller proceeds without it.
    async fn lock_key(&self, key: &str, op: &'static str) -> Option<KeyLockGuard<'_>> {
        match self.locks.lock(key, self.config.lock_timeout).await {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(
                    cache_name = %self.cache_name,
                    op,
                    key,
                    error = %e,
                    "Proceeding without key lock"
                );
                None
            }
        }
    }
}

/// Queue consumer applying staged writes to the backend
struct DiskWriter {
    core: Arc<DiskCacheCore>,
}

#[async_trait]
impl CacheListener for DiskWriter {
    type Element = Arc<PurgatoryElement>;

    async fn handle_put(&self, staged: Arc<PurgatoryElement>) -> Result<()> {
        let core = &self.core;
        if !core.is_alive() {
            return Ok(());
        }

        let key = staged.key();
        let _guard = core.lock_key(key, "handle_put").await;

        // Cancelled between enqueue and dequeue
        let table = core.purgatory.current();
        if !table.contains(key) {
            debug!(cache_name = %core.cache_name, key, "Staged element already left purgatory");
            return Ok(());
        }

        if staged.is_spoolable() {
            core.backend
                .update(staged.element().clone())
                .await
                .map_err(|e| Error::backend(&core.cache_name, e))?;
            debug!(cache_name = %core.cache_name, key, "Element written to backend");
        }

        table.remove_if_same(key, &staged);
        Ok(())
    }

    // DiskCache applies removals inline under the key lock; these serve tasks
    // submitted straight to the queue, which stays a general task channel.
    async fn handle_remove(&self, _cache_name: &str, key: &str) -> Result<bool> {
        if !self.core.is_alive() {
            return Ok(false);
        }
        let removed = self.core.backend.remove(key).await?;
        if removed {
            debug!(cache_name = %self.core.cache_name, key, "Element removed");
        }
        Ok(removed)
    }

    async fn handle_remove_all(&self, _cache_name: &str) -> Result<()> {
        if !self.core.is_alive() {
            return Ok(());
        }
        self.core.backend.remove_all().await
    }

    async fn handle_dispose(&self, _cache_name: &str) -> Result<()> {
        if !self.core.is_alive() {
            return Ok(());
        }
        self.core.backend.dispose().await
    }
}

/// Write-behind disk cache for one region
pub struct DiskCache {
    core: Arc<DiskCacheCore>,
    queue: EventQueue<Arc<PurgatoryElement>>,
}

impl DiskCache {
    /// Create a disk cache over `backend`.
    ///
    /// Spawns the queue consumer, so it must run inside a tokio runtime.
    pub fn new(config: DiskCacheConfig, backend: Arc<dyn DiskBackend>) -> Result<Self> {
        config.validate()?;

        let core = Arc::new(DiskCacheCore {
            cache_name: config.cache_name.clone(),
            purgatory: Purgatory::new(config.max_purgatory_size),
            locks: KeyLockTable::new(),
            backend,
            status: AtomicU8::new(CacheStatus::Initializing as u8),
            config,
        });

        let writer = Arc::new(DiskWriter { core: core.clone() });
        let queue = EventQueue::new(
            core.cache_name.clone(),
            writer,
            core.config.event_queue.clone(),
        );

        core.status
            .store(CacheStatus::Alive as u8, Ordering::Release);
        info!(
            cache_name = %core.cache_name,
            max_purgatory_size = ?core.config.max_purgatory_size,
            "Disk cache initialized"
        );

        Ok(Self { core, queue })
    }

    /// Stage `element` and queue its write. Never waits on the backend.
    pub fn update(&self, element: Arc<CacheElement>) {
        let core = &self.core;
        if !core.is_alive() {
            debug!(cache_name = %core.cache_name, key = element.key(), "Ignoring update on disposed cache");
            return;
        }

        debug!(cache_name = %core.cache_name, key = element.key(), "Putting element in purgatory");

        let staged = Arc::new(PurgatoryElement::new(element));
        if let Some(evicted) = core.purgatory.current().insert(staged.clone()) {
            debug!(cache_name = %core.cache_name, key = evicted.key(), "Purgatory full, dropped staged element");
        }

        if let Err(e) = self.queue.add_put_event(staged) {
            error!(cache_name = %core.cache_name, error = %e, "Failed to queue put");
            self.queue.destroy();
        }
    }

    /// Look up `key`: purgatory first, then the backend.
    pub async fn get(&self, key: &str) -> Option<Arc<CacheElement>> {
        let core = &self.core;
        if !core.is_alive() {
            return None;
        }

        if let Some(staged) = core.purgatory.get(key) {
            let hits = core.purgatory.hits();
            if hits % 100 == 0 {
                debug!(cache_name = %core.cache_name, purgatory_hits = hits, "Purgatory hits");
            }
            return Some(staged.element().clone());
        }

        match core.backend.get(key).await {
            Ok(found) => found,
            Err(e) => {
                self.degrade("get", &e);
                None
            }
        }
    }

    /// Look up several keys; absent keys are simply missing from the map
    pub async fn get_multiple<'a, I>(&self, keys: I) -> HashMap<String, Arc<CacheElement>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut found = HashMap::new();
        for key in keys {
            if let Some(element) = self.get(key).await {
                found.insert(key.to_string(), element);
            }
        }
        found
    }

    /// Elements whose key matches `pattern`; staged elements win over stored ones.
    pub async fn get_matching(&self, pattern: &str) -> Result<HashMap<String, Arc<CacheElement>>> {
        let regex = Regex::new(pattern)?;
        let mut found = HashMap::new();
        if !self.core.is_alive() {
            return Ok(found);
        }

        match self.core.backend.keys().await {
            Ok(keys) => {
                for key in keys.iter().filter(|key| regex.is_match(key)) {
                    match self.core.backend.get(key).await {
                        Ok(Some(element)) => {
                            found.insert(key.clone(), element);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            self.degrade("get_matching", &e);
                            break;
                        }
                    }
                }
            }
            Err(e) => self.degrade("get_matching", &e),
        }

        for staged in self.core.purgatory.current().elements() {
            if regex.is_match(staged.key()) {
                found.insert(staged.key().to_string(), staged.element().clone());
            }
        }

        Ok(found)
    }

    /// Remove `key` from purgatory and the backend.
    pub async fn remove(&self, key: &str) -> bool {
        let core = &self.core;
        let _guard = core.lock_key(key, "remove").await;

        // No way to pull a Put back out of the queue; make sure it never lands
        let staged = core.purgatory.current().remove(key);
        if let Some(staged) = &staged {
            staged.set_spoolable(false);
        }

        match core.backend.remove(key).await {
            Ok(removed) => removed || staged.is_some(),
            Err(e) => {
                self.degrade("remove", &e);
                staged.is_some()
            }
        }
    }

    /// Drop every staged element and clear the backend.
    pub async fn remove_all(&self) {
        self.core.purgatory.regenerate();

        if let Err(e) = self.core.backend.remove_all().await {
            self.degrade("remove_all", &e);
        }
    }

    /// Stop the queue, tear down the backend and mark the cache disposed.
    ///
    /// Queued writes may be lost. Repeated calls are no-ops.
    pub async fn dispose(&self) {
        let core = &self.core;
        let previous = core
            .status
            .swap(CacheStatus::Disposed as u8, Ordering::AcqRel);
        if CacheStatus::from_u8(previous) == CacheStatus::Disposed {
            debug!(cache_name = %core.cache_name, "Disk cache already disposed");
            return;
        }

        self.queue.destroy();
        if let Err(e) = core.backend.dispose().await {
            warn!(cache_name = %core.cache_name, error = %e, "Backend dispose failed");
        }
        info!(cache_name = %core.cache_name, "Disk cache disposed");
    }

    /// Keys in `group`, staged or stored
    pub async fn get_group_keys(&self, group: &str) -> BTreeSet<String> {
        let mut keys = match self.core.backend.group_keys(group).await {
            Ok(keys) => keys,
            Err(e) => {
                self.degrade("get_group_keys", &e);
                BTreeSet::new()
            }
        };
        keys.extend(
            self.core
                .purgatory
                .current()
                .elements()
                .iter()
                .filter(|staged| staged.element().group() == Some(group))
                .map(|staged| staged.key().to_string()),
        );
        keys
    }

    /// Number of elements stored in the backend
    pub async fn size(&self) -> usize {
        match self.core.backend.size().await {
            Ok(size) => size,
            Err(e) => {
                self.degrade("size", &e);
                0
            }
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.core.cache_name
    }

    pub fn status(&self) -> CacheStatus {
        self.core.status()
    }

    /// The queue feeding the backend
    pub fn event_queue(&self) -> &EventQueue<Arc<PurgatoryElement>> {
        &self.queue
    }

    pub fn stats(&self) -> DiskCacheStats {
        DiskCacheStats {
            cache_name: self.core.cache_name.clone(),
            status: self.status(),
            purgatory_hits: self.core.purgatory.hits(),
            purgatory_size: self.core.purgatory.len(),
            queue: self.queue.stats(),
            backend: self.core.backend.stats(),
        }
    }

    fn degrade(&self, op: &'static str, e: &Error) {
        error!(
            cache_name = %self.core.cache_name,
            op,
            error = %e,
            "Backend failure, destroying event queue"
        );
        self.queue.destroy();
    }
}

#[async_trait]
impl AuxiliaryCache for DiskCache {
    fn cache_name(&self) -> &str {
        DiskCache::cache_name(self)
    }

    fn kind(&self) -> AuxiliaryKind {
        AuxiliaryKind::Disk
    }

    async fn update(&self, element: Arc<CacheElement>) -> Result<()> {
        DiskCache::update(self, element);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Arc<CacheElement>>> {
        Ok(DiskCache::get(self, key).await)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(DiskCache::remove(self, key).await)
    }

    async fn remove_all(&self) -> Result<()> {
        DiskCache::remove_all(self).await;
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        DiskCache::dispose(self).await;
        Ok(())
    }

    fn status(&self) -> CacheStatus {
        DiskCache::status(self)
    }

    async fn get_matching(&self, pattern: &str) -> Result<HashMap<String, Arc<CacheElement>>> {
        DiskCache::get_matching(self, pattern).await
    }

    async fn get_group_keys(&self, group: &str) -> Result<BTreeSet<String>> {
        Ok(DiskCache::get_group_keys(self, group).await)
    }
}

// =============================================================================
// Tests
// =============================================================================
