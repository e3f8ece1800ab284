//! In-process Cache Layer
//!
//! Elements, their transport form, the in-process cache with its auxiliary
//! tiers, and the hub that hosts named caches.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              CacheHub                                    │
//! │              name → CompositeCache        HostedCaches (names)           │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  CompositeCache                                                          │
//! │  ┌────────────────┐   ┌──────────────────────────────────────────────┐   │
//! │  │ Memory store   │──▶│ Auxiliaries: DiskCache │ remote │ lateral    │   │
//! │  └────────────────┘   └──────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

mod composite;
mod element;
mod hub;
mod tier;
pub mod serializer;

pub use composite::{CompositeCache, CompositeStats, LocalCache};
pub use element::{CacheElement, ElementAttributes, ElementPayload, SerializedCacheElement};
pub use hub::{BackendFactory, CacheHub, CacheManager, HostedCaches};
pub use serializer::{ElementSerializer, PayloadEncoding, StandardSerializer};
pub use tier::{AuxiliaryCache, AuxiliaryKind, CacheStatus};
