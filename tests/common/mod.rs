//! Shared helpers for the integration test suites
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Once;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use agent_observability::event_store::InMemoryEventStore;
use agent_observability::events::payload::{
    RunStarted, StateTransitioned, ToolCalled, ToolSucceeded,
};
use agent_observability::events::{Event, EventPayload};
use agent_observability::run_store::{InMemoryRunStore, Run, RunStore};

static INIT_TRACING: Once = Once::new();

/// Initialize test logging once; respects `RUST_LOG`
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Fresh in-memory store pair
pub fn stores() -> (Arc<InMemoryEventStore>, Arc<InMemoryRunStore>) {
    init_tracing();
    (
        Arc::new(InMemoryEventStore::new()),
        Arc::new(InMemoryRunStore::new()),
    )
}

/// Save a run with an explicit start time
pub async fn save_run(run_store: &InMemoryRunStore, run_id: &str, start_time: DateTime<Utc>) {
    let mut run = Run::new(run_id, format!("goal for {run_id}"));
    run.start_time = start_time;
    run_store.save(&run).await.unwrap();
}

pub fn run_started(run_id: &str, at: DateTime<Utc>) -> Event {
    Event::with_timestamp(
        run_id,
        &EventPayload::RunStarted(RunStarted {
            goal: format!("goal for {run_id}"),
            vars: None,
        }),
        at,
    )
    .unwrap()
}

pub fn state_transitioned(run_id: &str, from: &str, to: &str, at: DateTime<Utc>) -> Event {
    Event::with_timestamp(
        run_id,
        &EventPayload::StateTransitioned(StateTransitioned {
            from_state: from.to_string(),
            to_state: to.to_string(),
            reason: "test".to_string(),
        }),
        at,
    )
    .unwrap()
}

pub fn tool_called(run_id: &str, tool: &str, at: DateTime<Utc>) -> Event {
    Event::with_timestamp(
        run_id,
        &EventPayload::ToolCalled(ToolCalled {
            tool_name: tool.to_string(),
            input: json!({}),
            state: "Act".to_string(),
            reason: None,
        }),
        at,
    )
    .unwrap()
}

pub fn tool_succeeded(run_id: &str, tool: &str, at: DateTime<Utc>) -> Event {
    Event::with_timestamp(
        run_id,
        &EventPayload::ToolSucceeded(ToolSucceeded {
            tool_name: tool.to_string(),
            output: json!(null),
            duration_ns: Duration::seconds(1).num_nanoseconds().unwrap(),
            cached: false,
        }),
        at,
    )
    .unwrap()
}
