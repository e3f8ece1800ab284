//! Cache Event Queue
//!
//! Single-consumer FIFO channel between an auxiliary cache and its backend.
//! Callers enqueue and return immediately; one tokio task applies the tasks
//! in submission order through a [`CacheListener`].
//!
//! # Failure Handling
//!
//! A failing task is retried up to `max_failures` times. When it still
//! fails the queue moves to `Destroyed`: it stops accepting tasks and the
//! consumer exits. Protocol decode errors drop the single task instead.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::EventQueueConfig;
use crate::error::{Error, Result};

/// Work item consumed exactly once by the queue consumer
#[derive(Debug, Clone)]
pub enum EventQueueTask<E> {
    Put(E),
    Remove(String),
    RemoveAll,
    Dispose,
}

impl<E> EventQueueTask<E> {
    fn kind(&self) -> &'static str {
        match self {
            EventQueueTask::Put(_) => "put",
            EventQueueTask::Remove(_) => "remove",
            EventQueueTask::RemoveAll => "remove_all",
            EventQueueTask::Dispose => "dispose",
        }
    }
}

/// Receiver of dequeued tasks
#[async_trait]
pub trait CacheListener: Send + Sync + 'static {
    /// Element type carried by put tasks
    type Element: Clone + Send + Sync + 'static;

    async fn handle_put(&self, element: Self::Element) -> Result<()>;

    async fn handle_remove(&self, cache_name: &str, key: &str) -> Result<bool>;

    async fn handle_remove_all(&self, cache_name: &str) -> Result<()>;

    async fn handle_dispose(&self, cache_name: &str) -> Result<()>;
}

/// Queue lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Alive,
    Destroyed,
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueState::Alive => write!(f, "alive"),
            QueueState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Event queue statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQueueStats {
    pub cache_name: String,
    pub state: QueueState,
    /// Submitted tasks not yet completed
    pub pending: usize,
    /// Tasks completed (applied or dropped)
    pub processed: u64,
    /// Failed attempts across all tasks
    pub failures: u64,
}

struct QueueShared<E> {
    cache_name: String,
    alive: AtomicBool,
    sender: Mutex<Option<mpsc::UnboundedSender<EventQueueTask<E>>>>,
    cancel: CancellationToken,
    pending: AtomicUsize,
    processed: AtomicU64,
    failures: AtomicU64,
}

impl<E> QueueShared<E> {
    fn destroy(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            self.sender.lock().take();
            self.cancel.cancel();
            info!(
                cache_name = %self.cache_name,
                abandoned = self.pending.load(Ordering::Relaxed),
                "Event queue destroyed"
            );
        }
    }
}

/// Per-cache single-consumer task queue.
///
/// Must be created inside a tokio runtime; the consumer is spawned on it.
pub struct EventQueue<E> {
    shared: Arc<QueueShared<E>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E: Clone + Send + Sync + 'static> EventQueue<E> {
    /// Create the queue and spawn its consumer
    pub fn new<L>(cache_name: impl Into<String>, listener: Arc<L>, config: EventQueueConfig) -> Self
    where
        L: CacheListener<Element = E>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(QueueShared {
            cache_name: cache_name.into(),
            alive: AtomicBool::new(true),
            sender: Mutex::new(Some(tx)),
            cancel: CancellationToken::new(),
            pending: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        });

        let worker = tokio::spawn(run_consumer(listener, shared.clone(), config, rx));

        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue a write of `element`
    pub fn add_put_event(&self, element: E) -> Result<()> {
        self.submit(EventQueueTask::Put(element))
    }

    /// Queue removal of `key`
    pub fn add_remove_event(&self, key: impl Into<String>) -> Result<()> {
        self.submit(EventQueueTask::Remove(key.into()))
    }

    /// Queue removal of everything
    pub fn add_remove_all_event(&self) -> Result<()> {
        self.submit(EventQueueTask::RemoveAll)
    }

    /// Queue backend teardown; the consumer stops after applying it
    pub fn add_dispose_event(&self) -> Result<()> {
        self.submit(EventQueueTask::Dispose)
    }

    fn submit(&self, task: EventQueueTask<E>) -> Result<()> {
        let destroyed = || Error::QueueDestroyed {
            cache_name: self.shared.cache_name.clone(),
        };

        if !self.is_alive() {
            return Err(destroyed());
        }

        let sender = self.shared.sender.lock();
        let sender = sender.as_ref().ok_or_else(destroyed)?;

        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(task).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(destroyed());
        }
        Ok(())
    }

    /// Stop accepting tasks and stop the consumer.
    ///
    /// Tasks still queued may never run. Safe to call repeatedly.
    pub fn destroy(&self) {
        self.shared.destroy();
    }

    /// Wait for the consumer task to exit
    pub async fn join(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(cache_name = %self.shared.cache_name, error = %e, "Event queue consumer panicked");
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    pub fn state(&self) -> QueueState {
        if self.is_alive() {
            QueueState::Alive
        } else {
            QueueState::Destroyed
        }
    }

    /// Submitted tasks not yet completed
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    pub fn stats(&self) -> EventQueueStats {
        EventQueueStats {
            cache_name: self.shared.cache_name.clone(),
            state: self.state(),
            pending: self.pending(),
            processed: self.shared.processed.load(Ordering::Relaxed),
            failures: self.shared.failures.load(Ordering::Relaxed),
        }
    }
}

impl<E> Drop for EventQueue<E> {
    fn drop(&mut self) {
        self.shared.destroy();
    }
}

async fn run_consumer<L: CacheListener>(
    listener: Arc<L>,
    shared: Arc<QueueShared<L::Element>>,
    config: EventQueueConfig,
    mut rx: mpsc::UnboundedReceiver<EventQueueTask<L::Element>>,
) {
    debug!(cache_name = %shared.cache_name, "Event queue consumer started");

    loop {
        let task = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            task = rx.recv() => task,
        };
        let Some(task) = task else { break };

        let is_dispose = matches!(task, EventQueueTask::Dispose);
        let applied = process_with_retry(listener.as_ref(), &shared, &config, task).await;

        shared.processed.fetch_add(1, Ordering::Relaxed);
        shared.pending.fetch_sub(1, Ordering::AcqRel);

        if !applied || is_dispose {
            shared.destroy();
            break;
        }
    }

    debug!(cache_name = %shared.cache_name, "Event queue consumer stopped");
}

async fn process_with_retry<L: CacheListener>(
    listener: &L,
    shared: &QueueShared<L::Element>,
    config: &EventQueueConfig,
    task: EventQueueTask<L::Element>,
) -> bool {
    let kind = task.kind();
    let max_failures = config.max_failures.max(1);

    for attempt in 1..=max_failures {
        match apply(listener, &shared.cache_name, task.clone()).await {
            Ok(()) => return true,
            Err(e) if e.is_protocol_decode() => {
                warn!(cache_name = %shared.cache_name, task = kind, error = %e, "Dropping undecodable task");
                return true;
            }
            Err(e) => {
                shared.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    cache_name = %shared.cache_name,
                    task = kind,
                    attempt,
                    max_failures,
                    error = %e,
                    "Event queue task failed"
                );
                if attempt < max_failures {
                    tokio::select! {
                        _ = shared.cancel.cancelled() => return false,
                        _ = tokio::time::sleep(config.wait_before_retry) => {}
                    }
                }
            }
        }
    }

    error!(
        cache_name = %shared.cache_name,
        task = kind,
        "Event queue task exhausted retries, degrading queue"
    );
    false
}

async fn apply<L: CacheListener>(
    listener: &L,
    cache_name: &str,
    task: EventQueueTask<L::Element>,
) -> Result<()> {
    match task {
        EventQueueTask::Put(element) => listener.handle_put(element).await,
        EventQueueTask::Remove(key) => listener.handle_remove(cache_name, &key).await.map(|_| ()),
        EventQueueTask::RemoveAll => listener.handle_remove_all(cache_name).await,
        EventQueueTask::Dispose => listener.handle_dispose(cache_name).await,
    }
}

// =============================================================================
// Tests
// =============================================================================
