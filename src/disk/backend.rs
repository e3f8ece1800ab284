//! Disk Storage Backend
//!
//! The persistence layer behind a [`DiskCache`](super::DiskCache). The core
//! depends only on this trait; file and index layout belong to the
//! implementation.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::cache::CacheElement;
use crate::error::Result;

/// Persistent store for one disk cache region
#[async_trait]
pub trait DiskBackend: Send + Sync {
    /// Read an element
    async fn get(&self, key: &str) -> Result<Option<Arc<CacheElement>>>;

    /// Write an element, replacing any previous value
    async fn update(&self, element: Arc<CacheElement>) -> Result<()>;

    /// Delete an element; true when something was removed
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Delete everything
    async fn remove_all(&self) -> Result<()>;

    /// Release backend resources
    async fn dispose(&self) -> Result<()>;

    /// Number of stored elements
    async fn size(&self) -> Result<usize>;

    /// All stored keys
    async fn keys(&self) -> Result<BTreeSet<String>>;

    /// Keys of stored elements belonging to `group`
    async fn group_keys(&self, group: &str) -> Result<BTreeSet<String>>;

    /// Operation counters
    fn stats(&self) -> BackendStats;
}

/// Backend operation counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Elements currently stored
    pub element_count: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

/// In-memory backend for tests and diskless nodes
/// Uses DashMap so the consumer and direct removes never share a lock
#[derive(Default)]
pub struct InMemoryDiskBackend {
    storage: DashMap<String, Arc<CacheElement>>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryDiskBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct probe bypassing the counters
    pub fn peek(&self, key: &str) -> Option<Arc<CacheElement>> {
        self.storage.get(key).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl DiskBackend for InMemoryDiskBackend {
    async fn get(&self, key: &str) -> Result<Option<Arc<CacheElement>>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.peek(key))
    }

    async fn update(&self, element: Arc<CacheElement>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.storage.insert(element.key().to_string(), element);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.remove(key).is_some())
    }

    async fn remove_all(&self) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.storage.clear();
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }

    async fn size(&self) -> Result<usize> {
        Ok(self.storage.len())
    }

    async fn keys(&self) -> Result<BTreeSet<String>> {
        Ok(self.storage.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn group_keys(&self, group: &str) -> Result<BTreeSet<String>> {
        Ok(self
            .storage
            .iter()
            .filter(|entry| entry.value().group() == Some(group))
            .map(|entry| entry.key().clone())
            .collect())
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            element_count: self.storage.len() as u64,
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ElementAttributes;

    fn element(key: &str, value: &'static str) -> Arc<CacheElement> {
        Arc::new(CacheElement::new("default", key, value))
    }

    #[tokio::test]
    async fn test_in_memory_backend_update_get() {
        let backend = InMemoryDiskBackend::new();
        backend.update(element("A", "v1")).await.unwrap();

        let found = backend.get("A").await.unwrap().unwrap();
        assert_eq!(found.value().as_ref(), b"v1");
        assert!(backend.get("B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_in_memory_backend_remove() {
        let backend = InMemoryDiskBackend::new();
        backend.update(element("A", "v1")).await.unwrap();

        assert!(backend.remove("A").await.unwrap());
        assert!(!backend.remove("A").await.unwrap());
        assert!(backend.peek("A").is_none());
    }

    #[tokio::test]
    async fn test_in_memory_backend_group_keys() {
        let backend = InMemoryDiskBackend::new();
        backend
            .update(Arc::new(CacheElement::with_attributes(
                "default",
                "user:1",
                "alice",
                ElementAttributes::in_group("users"),
            )))
            .await
            .unwrap();
        backend.update(element("other", "x")).await.unwrap();

        let keys = backend.group_keys("users").await.unwrap();
        assert_eq!(keys.into_iter().collect::<Vec<_>>(), vec!["user:1"]);
        assert_eq!(backend.keys().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_in_memory_backend_stats() {
        let backend = InMemoryDiskBackend::new();
        backend.update(element("A", "1")).await.unwrap();
        backend.update(element("B", "2")).await.unwrap();
        backend.get("A").await.unwrap();
        backend.remove("B").await.unwrap();

        let stats = backend.stats();
        assert_eq!(stats.element_count, 1);
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.deletes, 1);
    }
}
