//! auxcache - Auxiliary Tiers for a Distributed Cache
//!
//! Backs named in-process caches with a write-behind disk tier and keeps
//! peer nodes loosely consistent through asynchronous propagation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                               Cache Node                                 │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────────┐    ┌──────────────────────┐    │
//! │  │  CacheHub    │───▶│  DiskCache       │───▶│  DiskBackend         │    │
//! │  │  (in-process)│    │  purgatory+queue │    │  (trait)             │    │
//! │  └──────────────┘    └──────────────────┘    └──────────────────────┘    │
//! │         ▲                                                                │
//! │  ┌──────┴───────────────────────┐    ┌──────────────────────────────┐    │
//! │  │ RequestDispatcher            │    │ DiscoveryBroadcaster         │    │
//! │  │  → RemoteUpdateListener      │    │ DiscoveryReceiver → Peers    │    │
//! │  └──────────────────────────────┘    └──────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Elements, in-process caches and the cache hub
//! - [`disk`] - Write-behind disk tier
//! - [`remote`] - Remote update listener and request dispatch
//! - [`discovery`] - Peer discovery over UDP
//! - [`monitoring`] - Prometheus export
//! - [`config`] - Configuration structs
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod discovery;
pub mod disk;
pub mod error;
pub mod monitoring;
pub mod remote;

pub use error::{Error, Result};
