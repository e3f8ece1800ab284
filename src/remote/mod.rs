//! Remote Update Propagation
//!
//! Keeps peer nodes consistent without propagation loops.
//!
//! ```text
//! transport ──▶ RequestDispatcher ──▶ RemoteCacheService
//!                                        │ reads: CacheHub
//!                                        │ writes (requester ≠ own id)
//!                                        ▼
//!                                  RemoteUpdateListener ──▶ local_update / local_remove
//! ```

mod dispatcher;
mod listener;
mod request;
mod service;

pub use dispatcher::RequestDispatcher;
pub use listener::{ListenerStats, RemoteCacheListener, RemoteUpdateListener};
pub use request::{RemoteCacheRequest, RemoteCacheResponse, RequestType};
pub use service::{HubCacheService, RemoteCacheService};
