//! Write-behind Disk Tier
//!
//! Overflow store for the in-process cache. Writes are staged in purgatory
//! and applied by a single consumer, so callers never wait on the backend.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                             DiskCache                                    │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  Purgatory (generations)  │  KeyLockTable       │  EventQueue            │
//! │  key → PurgatoryElement   │  key → async mutex  │  Put/Remove/...        │
//! │         │                 │         │           │        │               │
//! │         └─────────────────┴─────────┴───────────┴────────┘               │
//! │                                   │                                      │
//! │                          DiskBackend (trait)                             │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - A read sees a staged element before its write lands
//! - A remove or removeAll issued before the write lands prevents it
//! - Backend failures degrade to a purgatory-only cache, never to caller errors

mod backend;
mod cache;
mod event_queue;
mod key_lock;
mod purgatory;

pub use backend::{BackendStats, DiskBackend, InMemoryDiskBackend};
pub use cache::{DiskCache, DiskCacheStats};
pub use event_queue::{CacheListener, EventQueue, EventQueueStats, EventQueueTask, QueueState};
pub use key_lock::{KeyLockGuard, KeyLockTable};
pub use purgatory::{Purgatory, PurgatoryElement, PurgatoryTable};
