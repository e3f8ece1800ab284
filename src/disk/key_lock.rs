//! Per-key lock table
//!
//! Serializes work on a single key while unrelated keys never contend.
//! Lock entries live only while someone holds or waits on them.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};

/// Table of async mutexes keyed by the string form of a cache key
#[derive(Debug, Default)]
pub struct KeyLockTable {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLockTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting at most `timeout`.
    pub async fn lock(&self, key: &str, timeout: Duration) -> Result<KeyLockGuard<'_>> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(KeyLockGuard {
                table: self,
                key: key.to_string(),
                guard: Some(guard),
            }),
            Err(_) => {
                self.reclaim(key);
                Err(Error::LockTimeout {
                    key: key.to_string(),
                })
            }
        }
    }

    /// Number of keys with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    // The map holds one reference; anything above that is a holder or waiter.
    fn reclaim(&self, key: &str) {
        self.locks
            .remove_if(key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Held lock on one key; released on drop
#[derive(Debug)]
pub struct KeyLockGuard<'a> {
    table: &'a KeyLockTable,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLockGuard<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.table.reclaim(&self.key);
    }
}
