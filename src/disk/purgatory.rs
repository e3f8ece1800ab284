//! Purgatory - staging area for elements awaiting their disk write
//!
//! An element enters purgatory on `update` and leaves once the queue
//! consumer has written it (or skipped it after cancellation). While present
//! it is authoritative over the backend for reads.
//!
//! # Generations
//!
//! `regenerate` swaps in a fresh, empty table. Readers holding the old table
//! keep a consistent view of it; nobody ever observes a half-cleared table.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::cache::CacheElement;

/// Element staged for a disk write
#[derive(Debug)]
pub struct PurgatoryElement {
    element: Arc<CacheElement>,
    spoolable: AtomicBool,
}

impl PurgatoryElement {
    /// Wrap an element; new elements are eligible for spooling
    pub fn new(element: Arc<CacheElement>) -> Self {
        Self {
            element,
            spoolable: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn element(&self) -> &Arc<CacheElement> {
        &self.element
    }

    #[inline]
    pub fn key(&self) -> &str {
        self.element.key()
    }

    /// Still eligible to be written to the backend
    #[inline]
    pub fn is_spoolable(&self) -> bool {
        self.spoolable.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_spoolable(&self, spoolable: bool) {
        self.spoolable.store(spoolable, Ordering::Release);
    }
}

/// One generation of the purgatory map
pub struct PurgatoryTable {
    generation: u64,
    entries: Mutex<LruCache<String, Arc<PurgatoryElement>>>,
}

impl PurgatoryTable {
    fn new(generation: u64, capacity: Option<usize>) -> Self {
        let entries = capacity
            .and_then(NonZeroUsize::new)
            .map(LruCache::new)
            .unwrap_or_else(LruCache::unbounded);

        Self {
            generation,
            entries: Mutex::new(entries),
        }
    }

    /// Generation number of this table
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Insert, replacing any element for the same key.
    ///
    /// Returns the element pushed out by the capacity bound, if any.
    pub fn insert(&self, element: Arc<PurgatoryElement>) -> Option<Arc<PurgatoryElement>> {
        let key = element.key().to_string();
        let mut entries = self.entries.lock();
        match entries.push(key.clone(), element) {
            Some((evicted_key, evicted)) if evicted_key != key => Some(evicted),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<Arc<PurgatoryElement>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<PurgatoryElement>> {
        self.entries.lock().pop(key)
    }

    /// Remove `key` only while it still maps to `element`.
    pub fn remove_if_same(&self, key: &str, element: &Arc<PurgatoryElement>) -> bool {
        let mut entries = self.entries.lock();
        let same = entries
            .peek(key)
            .is_some_and(|current| Arc::ptr_eq(current, element));
        if same {
            entries.pop(key);
        }
        same
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of staged elements
    pub fn elements(&self) -> Vec<Arc<PurgatoryElement>> {
        self.entries
            .lock()
            .iter()
            .map(|(_, element)| element.clone())
            .collect()
    }
}

/// Purgatory with generation swapping and hit accounting
pub struct Purgatory {
    capacity: Option<usize>,
    current: RwLock<Arc<PurgatoryTable>>,
    next_generation: AtomicU64,
    hits: AtomicU64,
}

impl Purgatory {
    /// Create a purgatory; `capacity` bounds each generation
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            current: RwLock::new(Arc::new(PurgatoryTable::new(0, capacity))),
            next_generation: AtomicU64::new(1),
            hits: AtomicU64::new(0),
        }
    }

    /// The live generation
    pub fn current(&self) -> Arc<PurgatoryTable> {
        self.current.read().clone()
    }

    /// Replace the live generation with an empty one
    pub fn regenerate(&self) -> Arc<PurgatoryTable> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let fresh = Arc::new(PurgatoryTable::new(generation, self.capacity));
        let previous = std::mem::replace(&mut *self.current.write(), fresh);
        debug!(
            generation,
            discarded = previous.len(),
            "Purgatory regenerated"
        );
        previous
    }

    /// Look up a staged element, counting a hit when found
    pub fn get(&self, key: &str) -> Option<Arc<PurgatoryElement>> {
        let found = self.current().get(key);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Approximate number of reads served from purgatory
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
