//! Element Serialization
//!
//! Converts elements to and from their transport-compacted form. Values are
//! either carried raw or LZ4-compressed; the encoding name travels with the
//! payload so the receiver can pick the matching decoder.
//!
//! # Example
//!
//! ```
//! use auxcache::cache::{CacheElement, ElementSerializer, PayloadEncoding, StandardSerializer};
//!
//! let serializer = StandardSerializer::new();
//! let element = CacheElement::new("default", "A", vec![7u8; 4096]);
//!
//! let compacted = serializer.serialize(&element, PayloadEncoding::Lz4).unwrap();
//! let restored = serializer.deserialize(&compacted).unwrap();
//! assert_eq!(restored, element);
//! ```

use bytes::Bytes;

use super::element::{CacheElement, SerializedCacheElement};
use crate::error::{Error, Result};

/// Payload encodings understood by [`StandardSerializer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadEncoding {
    /// Value bytes as-is
    Raw,
    /// LZ4 block with prepended size
    Lz4,
}

impl PayloadEncoding {
    /// Wire name of the encoding
    pub fn name(&self) -> &'static str {
        match self {
            PayloadEncoding::Raw => "raw",
            PayloadEncoding::Lz4 => "lz4",
        }
    }

    /// Look up an encoding by wire name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "raw" => Some(PayloadEncoding::Raw),
            "lz4" => Some(PayloadEncoding::Lz4),
            _ => None,
        }
    }
}

impl std::fmt::Display for PayloadEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Converts between elements and their compacted form
pub trait ElementSerializer: Send + Sync {
    /// Compact an element for transport
    fn serialize(
        &self,
        element: &CacheElement,
        encoding: PayloadEncoding,
    ) -> Result<SerializedCacheElement>;

    /// Restore an element; unknown encodings yield [`Error::UnknownPayloadClass`]
    fn deserialize(&self, serialized: &SerializedCacheElement) -> Result<CacheElement>;
}

/// Default serializer supporting raw and LZ4 payloads
#[derive(Debug, Clone)]
pub struct StandardSerializer {
    level: i32,
}

impl StandardSerializer {
    /// Create with the default LZ4 level
    pub fn new() -> Self {
        Self { level: 4 }
    }

    /// Create with a custom LZ4 level
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.level)),
            true,
        )
        .map_err(|e| Error::CompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4::block::decompress(data, None).map_err(|e| Error::DecompressionFailed {
            algorithm: "LZ4".into(),
            reason: e.to_string(),
        })
    }
}

impl Default for StandardSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementSerializer for StandardSerializer {
    fn serialize(
        &self,
        element: &CacheElement,
        encoding: PayloadEncoding,
    ) -> Result<SerializedCacheElement> {
        let serialized_value = match encoding {
            PayloadEncoding::Raw => element.value().clone(),
            PayloadEncoding::Lz4 => Bytes::from(self.compress(element.value())?),
        };

        Ok(SerializedCacheElement {
            cache_name: element.cache_name().to_string(),
            key: element.key().to_string(),
            serialized_value,
            encoding: encoding.name().to_string(),
            attributes: element.attributes().clone(),
        })
    }

    fn deserialize(&self, serialized: &SerializedCacheElement) -> Result<CacheElement> {
        let encoding = PayloadEncoding::from_name(&serialized.encoding)
            .ok_or_else(|| Error::UnknownPayloadClass(serialized.encoding.clone()))?;

        let value = match encoding {
            PayloadEncoding::Raw => serialized.serialized_value.clone(),
            PayloadEncoding::Lz4 => Bytes::from(self.decompress(&serialized.serialized_value)?),
        };

        Ok(CacheElement::with_attributes(
            serialized.cache_name.clone(),
            serialized.key.clone(),
            value,
            serialized.attributes.clone(),
        ))
    }
}
