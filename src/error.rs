//! Error types for the auxiliary cache tiers

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the auxiliary cache tiers
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Envelope or datagram (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Disk Tier Errors
    // =========================================================================
    /// Storage backend unreachable or a write failed
    #[error("Backend error in cache {cache_name}: {reason}")]
    Backend { cache_name: String, reason: String },

    /// Event queue no longer accepts tasks
    #[error("Event queue for cache {cache_name} is destroyed")]
    QueueDestroyed { cache_name: String },

    /// Per-key lock could not be acquired in time
    #[error("Timed out acquiring lock for key {key}")]
    LockTimeout { key: String },

    // =========================================================================
    // Remote Propagation Errors
    // =========================================================================
    /// Payload of a class this node cannot decode
    #[error("Unrecognized payload class: {0}")]
    UnknownPayloadClass(String),

    /// Compacted payload could not be decompressed
    #[error("Decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Compression of an outbound payload failed
    #[error("Compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Request envelope is missing a field its operation needs
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid GET_MATCHING pattern
    #[error("Invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Cache manager handle was never injected
    #[error("Cache manager is not configured")]
    CacheManagerMissing,

    // =========================================================================
    // Discovery / Configuration Errors
    // =========================================================================
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build a backend error for the named cache
    pub fn backend(cache_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::Backend {
            cache_name: cache_name.into(),
            reason: reason.to_string(),
        }
    }

    /// True for decode errors that drop a single operation
    pub fn is_protocol_decode(&self) -> bool {
        matches!(self, Error::UnknownPayloadClass(_))
    }
}
