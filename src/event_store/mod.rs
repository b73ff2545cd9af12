//! Event Store Abstraction
//!
//! The event storage interface for the observability core: an append-only,
//! per-run sequenced log with live fan-out to subscribers.
//!
//! # Architecture
//!
//! ```text
//! Producer → Append → Event Log → LoadEvents / Query
//!                │
//!                └─ fan-out → Subscribers (bounded channels)
//! ```
//!
//! # Store Requirements
//!
//! 1. **Append-Only**: events are never updated; deletion only via pruning
//!    behind a snapshot checkpoint
//! 2. **Ordered**: per-run sequences are strictly increasing and dense
//! 3. **Atomic**: a multi-event append commits together or not at all
//! 4. **Live**: appended events reach every live subscriber for the run,
//!    in append order, without blocking the writer
//!
//! # Capabilities
//!
//! Backends must implement [`EventStore`]. The optional capabilities
//! ([`EventQuery`], [`SnapshotStore`], [`EventPruning`]) are discovered
//! through the `as_*` accessors, which return `None` on backends that do
//! not support them.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::EventStoreResult;
use crate::events::{Event, QueryOptions, Snapshot};

pub mod memory;

pub use memory::{InMemoryEventStore, MemoryStoreConfig};

/// Core event store contract
///
/// Implementations must be safe for concurrent use from multiple tasks.
/// Readers may run concurrently with appends and observe a consistent
/// prefix of the log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append events atomically
    ///
    /// All events in one call commit together or none do. For each event a
    /// nil id is replaced with a fresh one and a zero version becomes 1.
    /// Sequences are assigned densely per run, continuing from the current
    /// maximum, in argument order. Events with an empty or unknown type are
    /// rejected with `InvalidEvent` before anything commits.
    ///
    /// On success every appended event is delivered to each live subscriber
    /// for its run, preserving argument order. Delivery is best-effort: a
    /// full subscriber channel drops the event for that subscriber only.
    ///
    /// Returns the enriched events in argument order.
    async fn append(&self, events: Vec<Event>) -> EventStoreResult<Vec<Event>>;

    /// Load the full event list for a run, ascending by sequence
    ///
    /// A run with no events yields an empty list, not an error.
    async fn load_events(&self, run_id: &str) -> EventStoreResult<Vec<Event>>;

    /// Load events with `sequence >= from_seq`, ascending by sequence
    ///
    /// Enables incremental replay from a snapshot checkpoint.
    async fn load_events_from(&self, run_id: &str, from_seq: u64)
        -> EventStoreResult<Vec<Event>>;

    /// Open a live subscription for future events of a run
    ///
    /// Events appended after this call arrive on the returned channel in
    /// sequence order. Earlier events are not replayed; use
    /// [`load_events`](Self::load_events) to catch up first. Dropping the
    /// subscription cancels it and releases its registry slot.
    async fn subscribe(&self, run_id: &str) -> EventStoreResult<EventSubscription>;

    /// Filtered retrieval, when the backend supports it
    fn as_query(&self) -> Option<&dyn EventQuery> {
        None
    }

    /// Snapshotting, when the backend supports it
    fn as_snapshots(&self) -> Option<&dyn SnapshotStore> {
        None
    }

    /// Log pruning, when the backend supports it
    fn as_pruning(&self) -> Option<&dyn EventPruning> {
        None
    }
}

/// Optional capability: filtered retrieval and corpus introspection
#[async_trait]
pub trait EventQuery: Send + Sync {
    /// Filtered retrieval in ascending sequence order
    async fn query(&self, run_id: &str, options: &QueryOptions) -> EventStoreResult<Vec<Event>>;

    /// Number of stored events for a run
    async fn count_events(&self, run_id: &str) -> EventStoreResult<u64>;

    /// Distinct run ids with at least one stored event
    async fn list_runs(&self) -> EventStoreResult<Vec<String>>;
}

/// Optional capability: per-run snapshot checkpoints
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Upsert the snapshot for a run; a newer snapshot replaces the older
    async fn save_snapshot(&self, run_id: &str, sequence: u64, data: Vec<u8>)
        -> EventStoreResult<()>;

    /// Load the latest snapshot, or `SnapshotNotFound`
    async fn load_snapshot(&self, run_id: &str) -> EventStoreResult<Snapshot>;
}

/// Optional capability: deleting events behind a checkpoint
#[async_trait]
pub trait EventPruning: Send + Sync {
    /// Delete events with `sequence < before_seq`
    ///
    /// Returns the number of events removed. Typically invoked after
    /// saving a snapshot at `before_seq` to bound storage.
    async fn prune_events(&self, run_id: &str, before_seq: u64) -> EventStoreResult<u64>;
}

/// Live subscription to one run's future events
///
/// Wraps a bounded receiver plus the registry release hook. Dropping the
/// subscription (or calling [`close`](Self::close)) unregisters it; the
/// channel then yields `None`. This is the cancellation path: there is no
/// sentinel event.
pub struct EventSubscription {
    run_id: String,
    receiver: mpsc::Receiver<Event>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl EventSubscription {
    /// Wrap a receiver with an unsubscribe hook run exactly once on close
    pub fn new(
        run_id: impl Into<String>,
        receiver: mpsc::Receiver<Event>,
        unsubscribe: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            receiver,
            unsubscribe: Some(unsubscribe),
        }
    }

    /// Run this subscription observes
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Receive the next event; `None` once the subscription is closed
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Receive without waiting, if an event is already buffered
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Cancel the subscription and release its registry slot
    ///
    /// In-flight deliveries that already won their send complete; nothing
    /// further is delivered. Idempotent.
    pub fn close(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            debug!(run_id = %self.run_id, "closing event subscription");
            unsubscribe();
            self.receiver.close();
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("run_id", &self.run_id)
            .field("closed", &self.unsubscribe.is_none())
            .finish()
    }
}
