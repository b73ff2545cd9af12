//! Agent Run Events
//!
//! Events are the fundamental unit of the observability core. Every
//! externally meaningful occurrence inside a run is recorded as one
//! immutable event.
//!
//! # Principles
//!
//! 1. **Events are immutable**: once appended they never change
//! 2. **Events are ordered**: a per-run sequence, dense from 1
//! 3. **Events are typed**: the type set is closed and versioned
//! 4. **Payloads are opaque**: the core never rewrites payload bytes;
//!    [`payload`] is the canonical codec for typed access
//!
//! # Identity
//!
//! `(run_id, sequence)` is the canonical identity of an event; `id` is a
//! secondary handle assigned at append when the producer left it nil.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{EventStoreError, EventStoreResult};

pub mod payload;

pub use payload::EventPayload;

/// Closed set of event types recorded by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A run began executing
    #[serde(rename = "run.started")]
    RunStarted,
    /// A run finished successfully
    #[serde(rename = "run.completed")]
    RunCompleted,
    /// A run finished with an error
    #[serde(rename = "run.failed")]
    RunFailed,
    /// A run was suspended
    #[serde(rename = "run.paused")]
    RunPaused,
    /// A suspended run continued
    #[serde(rename = "run.resumed")]
    RunResumed,
    /// The agent moved between operational states
    #[serde(rename = "state.transitioned")]
    StateTransitioned,
    /// A tool invocation started
    #[serde(rename = "tool.called")]
    ToolCalled,
    /// A tool invocation returned successfully
    #[serde(rename = "tool.succeeded")]
    ToolSucceeded,
    /// A tool invocation returned an error
    #[serde(rename = "tool.failed")]
    ToolFailed,
    /// The agent committed to a decision
    #[serde(rename = "decision.made")]
    DecisionMade,
    /// Human consent was requested for a tool call
    #[serde(rename = "approval.requested")]
    ApprovalRequested,
    /// A pending approval was granted
    #[serde(rename = "approval.granted")]
    ApprovalGranted,
    /// A pending approval was denied
    #[serde(rename = "approval.denied")]
    ApprovalDenied,
    /// Units were charged against a named budget
    #[serde(rename = "budget.consumed")]
    BudgetConsumed,
    /// A named budget ran out
    #[serde(rename = "budget.exhausted")]
    BudgetExhausted,
    /// Evidence was attached to the run
    #[serde(rename = "evidence.added")]
    EvidenceAdded,
    /// A run variable was written
    #[serde(rename = "variable.set")]
    VariableSet,
}

impl EventType {
    /// All event types, in declaration order
    pub const ALL: [EventType; 17] = [
        EventType::RunStarted,
        EventType::RunCompleted,
        EventType::RunFailed,
        EventType::RunPaused,
        EventType::RunResumed,
        EventType::StateTransitioned,
        EventType::ToolCalled,
        EventType::ToolSucceeded,
        EventType::ToolFailed,
        EventType::DecisionMade,
        EventType::ApprovalRequested,
        EventType::ApprovalGranted,
        EventType::ApprovalDenied,
        EventType::BudgetConsumed,
        EventType::BudgetExhausted,
        EventType::EvidenceAdded,
        EventType::VariableSet,
    ];

    /// Canonical dotted name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RunStarted => "run.started",
            EventType::RunCompleted => "run.completed",
            EventType::RunFailed => "run.failed",
            EventType::RunPaused => "run.paused",
            EventType::RunResumed => "run.resumed",
            EventType::StateTransitioned => "state.transitioned",
            EventType::ToolCalled => "tool.called",
            EventType::ToolSucceeded => "tool.succeeded",
            EventType::ToolFailed => "tool.failed",
            EventType::DecisionMade => "decision.made",
            EventType::ApprovalRequested => "approval.requested",
            EventType::ApprovalGranted => "approval.granted",
            EventType::ApprovalDenied => "approval.denied",
            EventType::BudgetConsumed => "budget.consumed",
            EventType::BudgetExhausted => "budget.exhausted",
            EventType::EvidenceAdded => "evidence.added",
            EventType::VariableSet => "variable.set",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EventStoreError::InvalidEvent(format!("unknown event type: {s}")))
    }
}

/// One immutable record of an occurrence within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Secondary handle; assigned at append when nil
    pub id: Uuid,

    /// Owning run
    pub run_id: String,

    /// Event type discriminator
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Wall-clock instant the occurrence happened
    pub timestamp: DateTime<Utc>,

    /// Opaque payload; immutable after append
    pub payload: Value,

    /// Per-run position, dense from 1; assigned at append
    pub sequence: u64,

    /// Schema version; defaults to 1 at append
    pub version: u32,
}

impl Event {
    /// Build an event from a typed payload, stamped with the current time
    ///
    /// Sequence, and id when left nil, are assigned by the store at append.
    pub fn new(run_id: impl Into<String>, payload: &EventPayload) -> EventStoreResult<Self> {
        Ok(Self {
            id: Uuid::nil(),
            run_id: run_id.into(),
            event_type: payload.event_type(),
            timestamp: Utc::now(),
            payload: payload.to_value()?,
            sequence: 0,
            version: 0,
        })
    }

    /// Build an event from a typed payload with an explicit timestamp
    pub fn with_timestamp(
        run_id: impl Into<String>,
        payload: &EventPayload,
        timestamp: DateTime<Utc>,
    ) -> EventStoreResult<Self> {
        let mut event = Self::new(run_id, payload)?;
        event.timestamp = timestamp;
        Ok(event)
    }

    /// Build an event around a pre-encoded payload value
    pub fn from_value(
        run_id: impl Into<String>,
        event_type: EventType,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            run_id: run_id.into(),
            event_type,
            timestamp: Utc::now(),
            payload,
            sequence: 0,
            version: 0,
        }
    }

    /// Decode the opaque payload back to its typed form
    pub fn decoded_payload(&self) -> EventStoreResult<EventPayload> {
        EventPayload::from_value(self.event_type, &self.payload)
    }
}

/// Opaque checkpoint of aggregated run state at a given sequence
///
/// At most one snapshot exists per run; saving a newer one replaces the
/// older. Used with [`load_events_from`](crate::event_store::EventStore::load_events_from)
/// to bound replay cost, and with pruning to bound storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Run the snapshot belongs to
    pub run_id: String,

    /// Sequence the snapshot was taken at
    pub sequence: u64,

    /// Opaque snapshot bytes
    pub data: Vec<u8>,

    /// When the snapshot was saved
    pub created_at: DateTime<Utc>,
}

/// Options for filtered event retrieval
///
/// All dimensions are optional; zero values mean unbounded. Results are
/// always in ascending sequence order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Keep only these event types (empty = all)
    #[serde(default)]
    pub event_types: Vec<EventType>,

    /// Keep events at or after this instant
    #[serde(default)]
    pub from_time: Option<DateTime<Utc>>,

    /// Keep events at or before this instant
    #[serde(default)]
    pub to_time: Option<DateTime<Utc>>,

    /// Cap the result list (0 = unbounded)
    #[serde(default)]
    pub limit: usize,

    /// Skip this many matching events first
    #[serde(default)]
    pub offset: usize,
}
