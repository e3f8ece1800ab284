//! Cache Element Types
//!
//! Immutable payloads shared by reference between the in-process cache and
//! its auxiliary tiers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-element attributes carried alongside the value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementAttributes {
    /// Group the element belongs to, if any
    pub group: Option<String>,
    /// Allowed to spool to a disk tier
    pub is_spool: bool,
    /// Allowed to propagate to remote peers
    pub is_remote: bool,
    /// Allowed to propagate to lateral peers
    pub is_lateral: bool,
    /// Never expires
    pub is_eternal: bool,
    /// Maximum lifetime in seconds
    pub max_life_seconds: Option<u64>,
    /// Maximum idle time in seconds
    pub max_idle_seconds: Option<u64>,
    /// Caller-supplied version
    pub version: u64,
    /// Creation timestamp
    pub create_time: DateTime<Utc>,
}

impl Default for ElementAttributes {
    fn default() -> Self {
        Self {
            group: None,
            is_spool: true,
            is_remote: true,
            is_lateral: true,
            is_eternal: true,
            max_life_seconds: None,
            max_idle_seconds: None,
            version: 0,
            create_time: Utc::now(),
        }
    }
}

impl ElementAttributes {
    /// Attributes placing the element in a group
    pub fn in_group(group: impl Into<String>) -> Self {
        Self {
            group: Some(group.into()),
            ..Default::default()
        }
    }
}

/// A cached value with its region, key and attributes.
///
/// Never mutated after construction; tiers share it through `Arc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheElement {
    cache_name: String,
    key: String,
    value: Bytes,
    attributes: ElementAttributes,
}

impl CacheElement {
    /// Create an element with default attributes
    pub fn new(cache_name: impl Into<String>, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self::with_attributes(cache_name, key, value, ElementAttributes::default())
    }

    /// Create an element with explicit attributes
    pub fn with_attributes(
        cache_name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Bytes>,
        attributes: ElementAttributes,
    ) -> Self {
        Self {
            cache_name: cache_name.into(),
            key: key.into(),
            value: value.into(),
            attributes,
        }
    }

    #[inline]
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    #[inline]
    pub fn attributes(&self) -> &ElementAttributes {
        &self.attributes
    }

    /// Group this element belongs to
    #[inline]
    pub fn group(&self) -> Option<&str> {
        self.attributes.group.as_deref()
    }

    /// Value size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.value.len()
    }
}

/// Transport-compacted form of an element.
///
/// `encoding` names the payload class; receivers that do not know it drop
/// the element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedCacheElement {
    pub cache_name: String,
    pub key: String,
    pub serialized_value: Bytes,
    pub encoding: String,
    pub attributes: ElementAttributes,
}

/// Element as it arrives from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementPayload {
    /// Ready to apply
    Plain(CacheElement),
    /// Needs decoding first
    Serialized(SerializedCacheElement),
}

impl ElementPayload {
    pub fn cache_name(&self) -> &str {
        match self {
            ElementPayload::Plain(element) => element.cache_name(),
            ElementPayload::Serialized(element) => &element.cache_name,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            ElementPayload::Plain(element) => element.key(),
            ElementPayload::Serialized(element) => &element.key,
        }
    }
}

impl From<CacheElement> for ElementPayload {
    fn from(element: CacheElement) -> Self {
        ElementPayload::Plain(element)
    }
}

impl From<SerializedCacheElement> for ElementPayload {
    fn from(element: SerializedCacheElement) -> Self {
        ElementPayload::Serialized(element)
    }
}
