//! Progress events and their fan-out to observers
//!
//! Every published event gets a sequence number that increases strictly per
//! [`Broadcaster`]. Each observer reads through its own bounded window of
//! the channel: an observer that falls behind loses its oldest events and
//! never slows the publisher. Delivery is at-most-once.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, trace};

use crate::models::{CleanupTotals, ScanTotals};

/// Which kind of run an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Collection,
    Cleanup,
}

/// What a scan did with a processed thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Indexed,
    Protected,
    Excluded,
    Unattributed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProgressEvent {
    CollectionStarted {
        total_threads: usize,
    },
    ListingProgress {
        listed_threads: usize,
    },
    ThreadProcessed {
        thread_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        domain: Option<String>,
        subject: String,
        disposition: Disposition,
        processed_threads: usize,
        total_threads: usize,
        unique_domains: usize,
    },
    CollectionCompleted {
        processed_threads: usize,
        total_threads: usize,
        unique_domains: usize,
    },
    CleanupStarted {
        domains_count: usize,
        dry_run: bool,
        threads_to_process: usize,
    },
    ThreadAnalyzed {
        thread_id: String,
        subject: String,
        sender: String,
    },
    ThreadKept {
        thread_id: String,
        subject: String,
        sender: String,
        message_count: usize,
    },
    WouldDelete {
        thread_id: String,
        subject: String,
        sender: String,
        message_count: usize,
    },
    Deleted {
        thread_id: String,
        subject: String,
        sender: String,
        message_count: usize,
    },
    CleanupCompleted(CleanupTotals),
    Aborted {
        operation: Operation,
        #[serde(skip_serializing_if = "Option::is_none")]
        scan: Option<ScanTotals>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cleanup: Option<CleanupTotals>,
    },
    Error {
        message: String,
        /// Set when the error concerns a single thread and the run goes on
        #[serde(skip_serializing_if = "Option::is_none")]
        thread_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        scan: Option<ScanTotals>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cleanup: Option<CleanupTotals>,
    },
}

impl ProgressEvent {
    /// Wire name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::CollectionStarted { .. } => "collection_started",
            ProgressEvent::ListingProgress { .. } => "listing_progress",
            ProgressEvent::ThreadProcessed { .. } => "thread_processed",
            ProgressEvent::CollectionCompleted { .. } => "collection_completed",
            ProgressEvent::CleanupStarted { .. } => "cleanup_started",
            ProgressEvent::ThreadAnalyzed { .. } => "thread_analyzed",
            ProgressEvent::ThreadKept { .. } => "thread_kept",
            ProgressEvent::WouldDelete { .. } => "would_delete",
            ProgressEvent::Deleted { .. } => "deleted",
            ProgressEvent::CleanupCompleted(_) => "cleanup_completed",
            ProgressEvent::Aborted { .. } => "aborted",
            ProgressEvent::Error { .. } => "error",
        }
    }

    /// Whether this event ends a run
    pub fn is_terminal(&self) -> bool {
        match self {
            ProgressEvent::CollectionCompleted { .. }
            | ProgressEvent::CleanupCompleted(_)
            | ProgressEvent::Aborted { .. } => true,
            ProgressEvent::Error { thread_id, .. } => thread_id.is_none(),
            _ => false,
        }
    }

    pub(crate) fn item_error(thread_id: &str, message: String) -> Self {
        ProgressEvent::Error {
            message,
            thread_id: Some(thread_id.to_string()),
            scan: None,
            cleanup: None,
        }
    }
}

/// An event as delivered to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    #[serde(flatten)]
    pub event: ProgressEvent,
}

struct BroadcasterInner {
    sender: broadcast::Sender<Envelope>,
    next_seq: Mutex<u64>,
}

/// Fan-out of progress events to any number of observers
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<BroadcasterInner>,
}

impl Broadcaster {
    /// `observer_buffer` is how many undelivered events each observer may
    /// hold before its oldest ones are dropped
    pub fn new(observer_buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(observer_buffer.max(1));
        Self {
            inner: Arc::new(BroadcasterInner {
                sender,
                next_seq: Mutex::new(1),
            }),
        }
    }

    /// Publish an event to all current observers and return its sequence
    /// number. Never waits on observers.
    pub fn publish(&self, event: ProgressEvent) -> u64 {
        let mut next_seq = self
            .inner
            .next_seq
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let seq = *next_seq;
        *next_seq += 1;

        trace!(seq, kind = event.kind(), "Publishing progress event");
        // No observers is not an error
        let _ = self.inner.sender.send(Envelope { seq, event });
        seq
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
            dropped: 0,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// One observer's view of the event stream
pub struct Subscription {
    receiver: broadcast::Receiver<Envelope>,
    dropped: u64,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    debug!("Observer fell behind, dropped {} oldest events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is already buffered
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) => return Some(envelope),
                Err(TryRecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Drain everything currently buffered
    pub fn drain(&mut self) -> Vec<Envelope> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Events this observer lost by falling behind
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn into_stream(mut self) -> impl Stream<Item = Envelope> {
        async_stream::stream! {
            while let Some(envelope) = self.recv().await {
                yield envelope;
            }
        }
    }
}
