//! In-Memory Event Store
//!
//! Reference implementation of the event store contract, including every
//! optional capability. Backs tests, embedded deployments, and serves as
//! the behavioral baseline for durable backends.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::{EventStoreError, EventStoreResult};
use crate::event_store::{
    EventPruning, EventQuery, EventStore, EventSubscription, SnapshotStore,
};
use crate::events::{Event, QueryOptions, Snapshot};

/// Configuration for the in-memory store
#[derive(Debug, Clone)]
pub struct MemoryStoreConfig {
    /// Buffer capacity of each subscriber channel (default: 100)
    ///
    /// A subscriber that falls this many events behind starts losing
    /// events; the writer is never blocked.
    pub subscriber_capacity: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 100,
        }
    }
}

/// Per-run log state guarded by a single lock
#[derive(Default)]
struct LogState {
    /// Events per run, in sequence order
    events: HashMap<String, Vec<Event>>,

    /// Next sequence to assign per run; survives pruning
    next_sequence: HashMap<String, u64>,
}

struct Subscriber {
    id: Uuid,
    sender: mpsc::Sender<Event>,
}

type SubscriberRegistry = Arc<RwLock<HashMap<String, Vec<Subscriber>>>>;

/// In-memory event store with live subscriber fan-out
///
/// # Example
///
/// ```rust
/// use agent_observability::event_store::{EventStore, InMemoryEventStore};
/// use agent_observability::events::{Event, EventPayload, payload::RunStarted};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryEventStore::new();
///
///     let payload = EventPayload::RunStarted(RunStarted {
///         goal: "find open incidents".to_string(),
///         vars: None,
///     });
///     store.append(vec![Event::new("run-1", &payload)?]).await?;
///
///     let events = store.load_events("run-1").await?;
///     assert_eq!(events[0].sequence, 1);
///     Ok(())
/// }
/// ```
pub struct InMemoryEventStore {
    config: MemoryStoreConfig,
    log: RwLock<LogState>,
    snapshots: RwLock<HashMap<String, Snapshot>>,
    subscribers: SubscriberRegistry,
}

impl InMemoryEventStore {
    /// Create a store with the default configuration
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Create a store with custom configuration
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            log: RwLock::new(LogState::default()),
            snapshots: RwLock::new(HashMap::new()),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn validate(events: &[Event]) -> EventStoreResult<()> {
        for event in events {
            if event.run_id.is_empty() {
                return Err(EventStoreError::InvalidEvent(
                    "event run_id must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Deliver a batch to every live subscriber of its runs, in order
    ///
    /// Sends are non-blocking: a full channel drops that event for that
    /// subscriber and the append still succeeds.
    fn fan_out(&self, events: &[Event]) {
        let registry = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        for event in events {
            let Some(subs) = registry.get(&event.run_id) else {
                continue;
            };

            for sub in subs {
                match sub.sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            run_id = %event.run_id,
                            sequence = event.sequence,
                            subscriber = %sub.id,
                            "subscriber buffer full, dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {}
                }
            }
        }
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, mut events: Vec<Event>) -> EventStoreResult<Vec<Event>> {
        if events.is_empty() {
            return Ok(events);
        }

        Self::validate(&events)?;

        // The write lock spans sequencing, commit, and fan-out so a
        // concurrent append cannot interleave its batch into this one.
        let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);

        for event in events.iter_mut() {
            let existing_max = log
                .events
                .get(&event.run_id)
                .and_then(|events| events.last().map(|e| e.sequence))
                .unwrap_or(0);

            let next = log
                .next_sequence
                .entry(event.run_id.clone())
                .or_insert(existing_max + 1);

            event.sequence = *next;
            *next += 1;

            if event.id.is_nil() {
                event.id = Uuid::now_v7();
            }
            if event.version == 0 {
                event.version = 1;
            }

            log.events
                .entry(event.run_id.clone())
                .or_default()
                .push(event.clone());
        }

        debug!(count = events.len(), "appended events");

        self.fan_out(&events);
        drop(log);

        Ok(events)
    }

    async fn load_events(&self, run_id: &str) -> EventStoreResult<Vec<Event>> {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        Ok(log.events.get(run_id).cloned().unwrap_or_default())
    }

    async fn load_events_from(
        &self,
        run_id: &str,
        from_seq: u64,
    ) -> EventStoreResult<Vec<Event>> {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);

        let events = log
            .events
            .get(run_id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.sequence >= from_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(events)
    }

    async fn subscribe(&self, run_id: &str) -> EventStoreResult<EventSubscription> {
        let (sender, receiver) = mpsc::channel(self.config.subscriber_capacity);
        let id = Uuid::now_v7();

        {
            let mut registry = self
                .subscribers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            registry
                .entry(run_id.to_string())
                .or_default()
                .push(Subscriber {
                    id,
                    sender,
                });
        }

        info!(run_id = %run_id, subscriber = %id, "subscribed to run events");

        let registry = Arc::clone(&self.subscribers);
        let owner = run_id.to_string();
        let unsubscribe = Box::new(move || {
            let mut registry = registry.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(subs) = registry.get_mut(&owner) {
                subs.retain(|s| s.id != id);
                if subs.is_empty() {
                    registry.remove(&owner);
                }
            }
        });

        Ok(EventSubscription::new(run_id, receiver, unsubscribe))
    }

    fn as_query(&self) -> Option<&dyn EventQuery> {
        Some(self)
    }

    fn as_snapshots(&self) -> Option<&dyn SnapshotStore> {
        Some(self)
    }

    fn as_pruning(&self) -> Option<&dyn EventPruning> {
        Some(self)
    }
}

#[async_trait]
impl EventQuery for InMemoryEventStore {
    async fn query(&self, run_id: &str, options: &QueryOptions) -> EventStoreResult<Vec<Event>> {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);

        let Some(events) = log.events.get(run_id) else {
            return Ok(Vec::new());
        };

        let filtered = events
            .iter()
            .filter(|e| {
                options.event_types.is_empty() || options.event_types.contains(&e.event_type)
            })
            .filter(|e| options.from_time.map_or(true, |t| e.timestamp >= t))
            .filter(|e| options.to_time.map_or(true, |t| e.timestamp <= t))
            .skip(options.offset);

        let events = if options.limit > 0 {
            filtered.take(options.limit).cloned().collect()
        } else {
            filtered.cloned().collect()
        };

        Ok(events)
    }

    async fn count_events(&self, run_id: &str) -> EventStoreResult<u64> {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        Ok(log.events.get(run_id).map_or(0, |e| e.len() as u64))
    }

    async fn list_runs(&self) -> EventStoreResult<Vec<String>> {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);

        let mut runs: Vec<String> = log
            .events
            .iter()
            .filter(|(_, events)| !events.is_empty())
            .map(|(run_id, _)| run_id.clone())
            .collect();
        runs.sort();

        Ok(runs)
    }
}

#[async_trait]
impl SnapshotStore for InMemoryEventStore {
    async fn save_snapshot(
        &self,
        run_id: &str,
        sequence: u64,
        data: Vec<u8>,
    ) -> EventStoreResult<()> {
        let mut snapshots = self
            .snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        snapshots.insert(
            run_id.to_string(),
            Snapshot {
                run_id: run_id.to_string(),
                sequence,
                data,
                created_at: Utc::now(),
            },
        );

        info!(run_id = %run_id, sequence, "saved snapshot");
        Ok(())
    }

    async fn load_snapshot(&self, run_id: &str) -> EventStoreResult<Snapshot> {
        let snapshots = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        snapshots
            .get(run_id)
            .cloned()
            .ok_or_else(|| EventStoreError::SnapshotNotFound(run_id.to_string()))
    }
}

#[async_trait]
impl EventPruning for InMemoryEventStore {
    async fn prune_events(&self, run_id: &str, before_seq: u64) -> EventStoreResult<u64> {
        let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);

        let Some(events) = log.events.get_mut(run_id) else {
            return Ok(0);
        };

        let before = events.len();
        events.retain(|e| e.sequence >= before_seq);
        let removed = (before - events.len()) as u64;

        info!(run_id = %run_id, before_seq, removed, "pruned events");
        Ok(removed)
    }
}
