//! Run Store Abstraction
//!
//! Runs are the aggregates of the observability core: one run per agent
//! execution, reconstructable from the event log and indexed here for
//! querying. The store holds full aggregates: updates are whole-value
//! replacements, never partial patches.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::errors::RunStoreResult;

pub mod memory;
pub mod replay;

pub use memory::InMemoryRunStore;

/// Well-known agent operational states
///
/// States travel as strings, so the runtime may introduce new vertices
/// without a schema change, but these names are the documented core of
/// the state machine.
pub mod states {
    /// Initial goal intake
    pub const INTAKE: &str = "Intake";
    /// Gathering information
    pub const EXPLORE: &str = "Explore";
    /// Choosing the next action
    pub const DECIDE: &str = "Decide";
    /// Executing a tool
    pub const ACT: &str = "Act";
    /// Checking results against the goal
    pub const VALIDATE: &str = "Validate";
    /// Terminal success
    pub const DONE: &str = "Done";
    /// Terminal failure
    pub const FAILED: &str = "Failed";
}

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created but not yet executing
    Pending,
    /// Actively executing
    Running,
    /// Suspended, resumable
    Paused,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl RunStatus {
    /// Whether the status ends the run lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Whether the lifecycle graph permits moving to `to`
    ///
    /// The graph: pending → running; running ↔ paused;
    /// running/paused → completed | failed.
    pub fn can_transition_to(&self, to: RunStatus) -> bool {
        matches!(
            (self, to),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Paused)
                | (RunStatus::Paused, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Paused, RunStatus::Completed)
                | (RunStatus::Paused, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Attempted status change not permitted by the lifecycle graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid status transition from {from} to {to}")]
pub struct InvalidTransition {
    /// Status the run was in
    pub from: RunStatus,
    /// Status the transition targeted
    pub to: RunStatus,
}

/// One structured evidence record attached to a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvidence {
    /// Evidence category
    #[serde(rename = "type")]
    pub kind: String,

    /// Where the evidence came from
    pub source: String,

    /// Opaque evidence content
    pub content: Value,

    /// When the evidence was collected
    pub timestamp: DateTime<Utc>,
}

/// One agent execution aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Caller-supplied identifier, non-empty
    pub id: String,

    /// Free-text goal the run pursues
    pub goal: String,

    /// Current vertex of the agent state machine
    pub current_state: String,

    /// Variable bindings accumulated during the run
    #[serde(default)]
    pub variables: HashMap<String, Value>,

    /// Ordered evidence records
    #[serde(default)]
    pub evidence: Vec<RunEvidence>,

    /// Lifecycle status
    pub status: RunStatus,

    /// When the run was created
    pub start_time: DateTime<Utc>,

    /// Set exactly when the status is terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Opaque result for completed runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error message for failed runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Run {
    /// Create a pending run in the intake state
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            current_state: states::INTAKE.to_string(),
            variables: HashMap::new(),
            evidence: Vec::new(),
            status: RunStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            result: None,
            error: None,
        }
    }

    fn transition(&mut self, to: RunStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }

    /// pending → running
    pub fn start(&mut self) -> Result<(), InvalidTransition> {
        self.transition(RunStatus::Running)
    }

    /// running → paused
    pub fn pause(&mut self) -> Result<(), InvalidTransition> {
        self.transition(RunStatus::Paused)
    }

    /// paused → running
    pub fn resume(&mut self) -> Result<(), InvalidTransition> {
        self.transition(RunStatus::Running)
    }

    /// running/paused → completed; records the result and end time
    pub fn complete(&mut self, result: Option<Value>) -> Result<(), InvalidTransition> {
        self.transition(RunStatus::Completed)?;
        self.current_state = states::DONE.to_string();
        self.result = result;
        Ok(())
    }

    /// running/paused → failed; records the error and end time
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(RunStatus::Failed)?;
        self.current_state = states::FAILED.to_string();
        self.error = Some(error.into());
        Ok(())
    }

    /// Wall-clock duration, available once the run is terminal
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_time.map(|end| end - self.start_time)
    }
}

/// Sort key for run listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOrder {
    /// Order by start time (the default)
    #[default]
    StartTime,
    /// Order by end time; unset end times sort first
    EndTime,
    /// Order by run id
    Id,
    /// Order by status name
    Status,
}

/// Filter dimensions for run listings
///
/// Every dimension is optional; the zero value matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFilter {
    /// Keep runs whose status is any of these (empty = all)
    #[serde(default)]
    pub statuses: Vec<RunStatus>,

    /// Keep runs whose current state is any of these (empty = all)
    #[serde(default)]
    pub states: Vec<String>,

    /// Keep runs started at or after this instant
    #[serde(default)]
    pub started_after: Option<DateTime<Utc>>,

    /// Keep runs started at or before this instant
    #[serde(default)]
    pub started_before: Option<DateTime<Utc>>,

    /// Keep runs whose goal contains this text, case-insensitively
    #[serde(default)]
    pub goal_contains: Option<String>,

    /// Cap the result list (0 = unbounded)
    #[serde(default)]
    pub limit: usize,

    /// Skip this many matching runs first
    #[serde(default)]
    pub offset: usize,

    /// Sort key
    #[serde(default)]
    pub order_by: RunOrder,

    /// Reverse the sort direction
    #[serde(default)]
    pub descending: bool,
}

impl RunFilter {
    /// Whether a run passes every filter dimension
    pub fn matches(&self, run: &Run) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&run.status) {
            return false;
        }
        if !self.states.is_empty() && !self.states.contains(&run.current_state) {
            return false;
        }
        if let Some(after) = self.started_after {
            if run.start_time < after {
                return false;
            }
        }
        if let Some(before) = self.started_before {
            if run.start_time > before {
                return false;
            }
        }
        if let Some(needle) = &self.goal_contains {
            if !run.goal.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Aggregate totals over a filtered run set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Runs matching the filter
    pub total: u64,

    /// Of those, completed
    pub completed: u64,

    /// Of those, failed
    pub failed: u64,

    /// Of those, currently running
    pub running: u64,

    /// Mean of end_time − start_time in nanoseconds, over runs with an
    /// end time; `None` when no run has finished
    #[serde(rename = "average_duration")]
    pub average_duration_ns: Option<i64>,
}

/// Run store contract
///
/// Implementations must be safe for concurrent use. Concurrent updates to
/// the same id are last-writer-wins; backends that detect conflicts may
/// surface `ConcurrentUpdate` instead.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new run
    ///
    /// An empty id fails with `InvalidRunId`; a duplicate id with
    /// `RunExists`.
    async fn save(&self, run: &Run) -> RunStoreResult<()>;

    /// Fetch a run by id, or `RunNotFound`
    async fn get(&self, id: &str) -> RunStoreResult<Run>;

    /// Replace a run wholesale by id, or `RunNotFound`
    async fn update(&self, run: &Run) -> RunStoreResult<()>;

    /// Remove a run by id, or `RunNotFound`
    async fn delete(&self, id: &str) -> RunStoreResult<()>;

    /// List runs matching the filter, sorted and paginated
    async fn list(&self, filter: &RunFilter) -> RunStoreResult<Vec<Run>>;

    /// Count runs matching the filter, ignoring limit and offset
    async fn count(&self, filter: &RunFilter) -> RunStoreResult<u64>;

    /// Summary aggregation, when the backend supports it
    fn as_summary(&self) -> Option<&dyn RunSummarizer> {
        None
    }
}

/// Optional capability: aggregate totals over a filtered run set
#[async_trait]
pub trait RunSummarizer: Send + Sync {
    /// Compute totals and the mean duration for matching runs
    async fn summarize(&self, filter: &RunFilter) -> RunStoreResult<RunSummary>;
}
