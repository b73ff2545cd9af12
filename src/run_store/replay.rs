//! Run State Replay
//!
//! Rebuilds a [`Run`] aggregate from its event log. Application is a
//! pure fold, `(Run, Event) -> Run`, so replay is just running the fold
//! over the log, and snapshots compose naturally: restore the checkpoint
//! state, then fold the tail loaded with
//! [`load_events_from`](crate::event_store::EventStore::load_events_from).
//!
//! Replay is descriptive, not validating: whatever history the log
//! records is applied as-is, without re-checking lifecycle transitions.

use crate::errors::{EventStoreError, EventStoreResult};
use crate::events::{Event, EventPayload};
use crate::run_store::{states, Run, RunEvidence, RunStatus};

/// Apply one event to the aggregate
///
/// Events with no aggregate effect (tool calls, decisions, approvals,
/// budget charges) and events whose payload does not decode are skipped.
pub fn apply_event(mut run: Run, event: &Event) -> Run {
    let Ok(payload) = event.decoded_payload() else {
        return run;
    };

    match payload {
        EventPayload::RunStarted(p) => {
            run.goal = p.goal;
            if let Some(vars) = p.vars {
                run.variables.extend(vars);
            }
            run.status = RunStatus::Running;
            run.start_time = event.timestamp;
        }
        EventPayload::RunCompleted(p) => {
            run.status = RunStatus::Completed;
            run.current_state = states::DONE.to_string();
            run.result = p.result;
            run.end_time = Some(event.timestamp);
        }
        EventPayload::RunFailed(p) => {
            run.status = RunStatus::Failed;
            run.current_state = states::FAILED.to_string();
            run.error = Some(p.error);
            run.end_time = Some(event.timestamp);
        }
        EventPayload::RunPaused(_) => {
            run.status = RunStatus::Paused;
        }
        EventPayload::RunResumed(_) => {
            run.status = RunStatus::Running;
        }
        EventPayload::StateTransitioned(p) => {
            run.current_state = p.to_state;
        }
        EventPayload::VariableSet(p) => {
            run.variables.insert(p.key, p.value);
        }
        EventPayload::EvidenceAdded(p) => {
            run.evidence.push(RunEvidence {
                kind: p.kind,
                source: p.source,
                content: p.content,
                timestamp: event.timestamp,
            });
        }
        EventPayload::ToolCalled(_)
        | EventPayload::ToolSucceeded(_)
        | EventPayload::ToolFailed(_)
        | EventPayload::DecisionMade(_)
        | EventPayload::ApprovalRequested(_)
        | EventPayload::ApprovalGranted(_)
        | EventPayload::ApprovalDenied(_)
        | EventPayload::BudgetConsumed(_)
        | EventPayload::BudgetExhausted(_) => {}
    }

    run
}

/// Rebuild a run from its full event log
///
/// Returns `None` for an empty log; there is no state to reconstruct.
pub fn replay_run(run_id: &str, events: &[Event]) -> Option<Run> {
    let first = events.first()?;

    let mut run = Run::new(run_id, "");
    run.start_time = first.timestamp;
    Some(replay_from(run, events))
}

/// Fold a log tail onto an already-restored state
pub fn replay_from(run: Run, events: &[Event]) -> Run {
    events.iter().fold(run, apply_event)
}

/// Encode aggregate state for a snapshot checkpoint
pub fn encode_state(run: &Run) -> EventStoreResult<Vec<u8>> {
    serde_json::to_vec(run).map_err(|e| EventStoreError::InvalidEvent(e.to_string()))
}

/// Decode aggregate state from snapshot bytes
pub fn decode_state(data: &[u8]) -> EventStoreResult<Run> {
    serde_json::from_slice(data).map_err(|e| EventStoreError::InvalidEvent(e.to_string()))
}
