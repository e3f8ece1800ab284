//! Auxiliary tier abstraction
//!
//! Every tier attached behind an in-process cache (disk, remote, lateral)
//! implements [`AuxiliaryCache`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use super::element::CacheElement;
use crate::error::Result;

/// Lifecycle of a cache or tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CacheStatus {
    Initializing = 0,
    Alive = 1,
    Disposed = 2,
}

impl CacheStatus {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => CacheStatus::Initializing,
            1 => CacheStatus::Alive,
            _ => CacheStatus::Disposed,
        }
    }
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStatus::Initializing => write!(f, "initializing"),
            CacheStatus::Alive => write!(f, "alive"),
            CacheStatus::Disposed => write!(f, "disposed"),
        }
    }
}

/// Kind of auxiliary tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuxiliaryKind {
    /// Local overflow store
    Disk,
    /// Client of a remote cache server
    Remote,
    /// Peer-to-peer propagation
    Lateral,
}

impl AuxiliaryKind {
    /// Remote and lateral tiers forward to other nodes
    pub fn propagates(&self) -> bool {
        !matches!(self, AuxiliaryKind::Disk)
    }

    /// Whether an element with these attributes may be sent to this tier
    pub fn accepts(&self, element: &CacheElement) -> bool {
        let attributes = element.attributes();
        match self {
            AuxiliaryKind::Disk => attributes.is_spool,
            AuxiliaryKind::Remote => attributes.is_remote,
            AuxiliaryKind::Lateral => attributes.is_lateral,
        }
    }
}

impl std::fmt::Display for AuxiliaryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuxiliaryKind::Disk => write!(f, "disk"),
            AuxiliaryKind::Remote => write!(f, "remote"),
            AuxiliaryKind::Lateral => write!(f, "lateral"),
        }
    }
}

/// A tier attached behind an in-process cache
#[async_trait]
pub trait AuxiliaryCache: Send + Sync {
    fn cache_name(&self) -> &str;

    fn kind(&self) -> AuxiliaryKind;

    async fn update(&self, element: Arc<CacheElement>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Arc<CacheElement>>>;

    async fn remove(&self, key: &str) -> Result<bool>;

    async fn remove_all(&self) -> Result<()>;

    async fn dispose(&self) -> Result<()>;

    fn status(&self) -> CacheStatus;

    /// Elements whose key matches `pattern`
    async fn get_matching(&self, _pattern: &str) -> Result<HashMap<String, Arc<CacheElement>>> {
        Ok(HashMap::new())
    }

    /// Keys belonging to `group`
    async fn get_group_keys(&self, _group: &str) -> Result<BTreeSet<String>> {
        Ok(BTreeSet::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ElementAttributes;

    #[test]
    fn test_status_round_trip_through_u8() {
        for status in [CacheStatus::Initializing, CacheStatus::Alive, CacheStatus::Disposed] {
            assert_eq!(CacheStatus::from_u8(status as u8), status);
        }
    }

    #[test]
    fn test_kind_accepts_by_attribute() {
        let element = CacheElement::with_attributes(
            "default",
            "A",
            "v",
            ElementAttributes {
                is_spool: false,
                ..Default::default()
            },
        );
        assert!(!AuxiliaryKind::Disk.accepts(&element));
        assert!(AuxiliaryKind::Remote.accepts(&element));
        assert!(AuxiliaryKind::Lateral.propagates());
        assert!(!AuxiliaryKind::Disk.propagates());
    }
}
