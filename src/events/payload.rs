//! Typed event payloads
//!
//! Every event type carries a canonical payload shape. At rest the payload
//! is an opaque JSON value on the [`Event`](super::Event) envelope; this
//! module is the codec between that value and the typed representation.
//! The envelope's `event_type` field is the discriminator; payload values
//! themselves carry no tag.
//!
//! Durations travel as integer nanoseconds, matching the reference wire
//! format.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{EventStoreError, EventStoreResult};
use crate::events::EventType;

/// Payload for `run.started`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStarted {
    /// Free-text goal the run is pursuing
    pub goal: String,

    /// Initial variable bindings, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vars: Option<HashMap<String, Value>>,
}

/// Payload for `run.completed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCompleted {
    /// Opaque result produced by the run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Wall-clock run duration in nanoseconds
    #[serde(rename = "duration")]
    pub duration_ns: i64,
}

/// Payload for `run.failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailed {
    /// Error message describing the failure
    pub error: String,

    /// Agent state at the time of failure
    pub state: String,

    /// Wall-clock run duration in nanoseconds
    #[serde(rename = "duration")]
    pub duration_ns: i64,
}

/// Payload for `run.paused`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunPaused {
    /// Why the run was paused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload for `run.resumed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResumed {
    /// Why the run was resumed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload for `state.transitioned`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransitioned {
    /// State the agent left
    pub from_state: String,

    /// State the agent entered
    pub to_state: String,

    /// Why the transition happened
    pub reason: String,
}

/// Payload for `tool.called`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCalled {
    /// Name of the invoked tool
    pub tool_name: String,

    /// Opaque tool input
    pub input: Value,

    /// Agent state at call time
    pub state: String,

    /// Why the tool was chosen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload for `tool.succeeded`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSucceeded {
    /// Name of the invoked tool
    pub tool_name: String,

    /// Opaque tool output
    pub output: Value,

    /// Execution duration in nanoseconds
    #[serde(rename = "duration")]
    pub duration_ns: i64,

    /// Whether the result was served from cache
    pub cached: bool,
}

/// Payload for `tool.failed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailed {
    /// Name of the invoked tool
    pub tool_name: String,

    /// Error message from the tool
    pub error: String,

    /// Execution duration in nanoseconds
    #[serde(rename = "duration")]
    pub duration_ns: i64,
}

/// Payload for `decision.made`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionMade {
    /// Kind of decision (tool selection, transition, ...)
    pub decision_type: String,

    /// Tool chosen, when the decision selects a tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Target state, when the decision transitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_state: Option<String>,

    /// Reasoning behind the decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Opaque decision input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// Payload for `approval.requested`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequested {
    /// Tool awaiting consent
    pub tool_name: String,

    /// Opaque tool input under review
    pub input: Value,

    /// Assessed risk level of the call
    pub risk_level: String,
}

/// Payload for `approval.granted`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalGranted {
    /// Tool that was approved
    pub tool_name: String,

    /// Who granted the approval
    pub approver: String,

    /// Optional justification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload for `approval.denied`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDenied {
    /// Tool that was denied
    pub tool_name: String,

    /// Who denied the approval
    pub approver: String,

    /// Optional justification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Payload for `budget.consumed`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConsumed {
    /// Named bounded resource
    pub budget_name: String,

    /// Units consumed by this charge
    pub amount: i64,

    /// Units remaining after this charge
    pub remaining: i64,
}

/// Payload for `budget.exhausted`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetExhausted {
    /// Named bounded resource that ran out
    pub budget_name: String,
}

/// Payload for `evidence.added`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceAdded {
    /// Evidence category
    #[serde(rename = "type")]
    pub kind: String,

    /// Where the evidence came from
    pub source: String,

    /// Opaque evidence content
    pub content: Value,
}

/// Payload for `variable.set`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSet {
    /// Variable name
    pub key: String,

    /// Opaque variable value
    pub value: Value,
}

/// Sum type over all event payloads
///
/// One variant per [`EventType`]. Encoding strips the variant; the event
/// envelope's type field is the discriminator used to decode.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    RunStarted(RunStarted),
    RunCompleted(RunCompleted),
    RunFailed(RunFailed),
    RunPaused(RunPaused),
    RunResumed(RunResumed),
    StateTransitioned(StateTransitioned),
    ToolCalled(ToolCalled),
    ToolSucceeded(ToolSucceeded),
    ToolFailed(ToolFailed),
    DecisionMade(DecisionMade),
    ApprovalRequested(ApprovalRequested),
    ApprovalGranted(ApprovalGranted),
    ApprovalDenied(ApprovalDenied),
    BudgetConsumed(BudgetConsumed),
    BudgetExhausted(BudgetExhausted),
    EvidenceAdded(EvidenceAdded),
    VariableSet(VariableSet),
}

impl EventPayload {
    /// Event type this payload belongs to
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::RunStarted(_) => EventType::RunStarted,
            EventPayload::RunCompleted(_) => EventType::RunCompleted,
            EventPayload::RunFailed(_) => EventType::RunFailed,
            EventPayload::RunPaused(_) => EventType::RunPaused,
            EventPayload::RunResumed(_) => EventType::RunResumed,
            EventPayload::StateTransitioned(_) => EventType::StateTransitioned,
            EventPayload::ToolCalled(_) => EventType::ToolCalled,
            EventPayload::ToolSucceeded(_) => EventType::ToolSucceeded,
            EventPayload::ToolFailed(_) => EventType::ToolFailed,
            EventPayload::DecisionMade(_) => EventType::DecisionMade,
            EventPayload::ApprovalRequested(_) => EventType::ApprovalRequested,
            EventPayload::ApprovalGranted(_) => EventType::ApprovalGranted,
            EventPayload::ApprovalDenied(_) => EventType::ApprovalDenied,
            EventPayload::BudgetConsumed(_) => EventType::BudgetConsumed,
            EventPayload::BudgetExhausted(_) => EventType::BudgetExhausted,
            EventPayload::EvidenceAdded(_) => EventType::EvidenceAdded,
            EventPayload::VariableSet(_) => EventType::VariableSet,
        }
    }

    /// Encode the payload to its opaque JSON form
    pub fn to_value(&self) -> EventStoreResult<Value> {
        let encoded = match self {
            EventPayload::RunStarted(p) => serde_json::to_value(p),
            EventPayload::RunCompleted(p) => serde_json::to_value(p),
            EventPayload::RunFailed(p) => serde_json::to_value(p),
            EventPayload::RunPaused(p) => serde_json::to_value(p),
            EventPayload::RunResumed(p) => serde_json::to_value(p),
            EventPayload::StateTransitioned(p) => serde_json::to_value(p),
            EventPayload::ToolCalled(p) => serde_json::to_value(p),
            EventPayload::ToolSucceeded(p) => serde_json::to_value(p),
            EventPayload::ToolFailed(p) => serde_json::to_value(p),
            EventPayload::DecisionMade(p) => serde_json::to_value(p),
            EventPayload::ApprovalRequested(p) => serde_json::to_value(p),
            EventPayload::ApprovalGranted(p) => serde_json::to_value(p),
            EventPayload::ApprovalDenied(p) => serde_json::to_value(p),
            EventPayload::BudgetConsumed(p) => serde_json::to_value(p),
            EventPayload::BudgetExhausted(p) => serde_json::to_value(p),
            EventPayload::EvidenceAdded(p) => serde_json::to_value(p),
            EventPayload::VariableSet(p) => serde_json::to_value(p),
        };

        encoded.map_err(|e| EventStoreError::InvalidEvent(e.to_string()))
    }

    /// Decode an opaque payload value for the given event type
    pub fn from_value(event_type: EventType, value: &Value) -> EventStoreResult<Self> {
        let decode = |e: serde_json::Error| EventStoreError::InvalidEvent(e.to_string());

        let payload = match event_type {
            EventType::RunStarted => {
                EventPayload::RunStarted(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::RunCompleted => {
                EventPayload::RunCompleted(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::RunFailed => {
                EventPayload::RunFailed(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::RunPaused => {
                EventPayload::RunPaused(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::RunResumed => {
                EventPayload::RunResumed(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::StateTransitioned => EventPayload::StateTransitioned(
                serde_json::from_value(value.clone()).map_err(decode)?,
            ),
            EventType::ToolCalled => {
                EventPayload::ToolCalled(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::ToolSucceeded => {
                EventPayload::ToolSucceeded(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::ToolFailed => {
                EventPayload::ToolFailed(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::DecisionMade => {
                EventPayload::DecisionMade(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::ApprovalRequested => EventPayload::ApprovalRequested(
                serde_json::from_value(value.clone()).map_err(decode)?,
            ),
            EventType::ApprovalGranted => EventPayload::ApprovalGranted(
                serde_json::from_value(value.clone()).map_err(decode)?,
            ),
            EventType::ApprovalDenied => {
                EventPayload::ApprovalDenied(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::BudgetConsumed => {
                EventPayload::BudgetConsumed(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::BudgetExhausted => EventPayload::BudgetExhausted(
                serde_json::from_value(value.clone()).map_err(decode)?,
            ),
            EventType::EvidenceAdded => {
                EventPayload::EvidenceAdded(serde_json::from_value(value.clone()).map_err(decode)?)
            }
            EventType::VariableSet => {
                EventPayload::VariableSet(serde_json::from_value(value.clone()).map_err(decode)?)
            }
        };

        Ok(payload)
    }
}
