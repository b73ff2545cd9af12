//! Log-shape invariants
//!
//! For every run, however appends are batched, the stored log is
//! strictly increasing and dense from 1, and serde round trips preserve
//! events exactly.

use proptest::prelude::*;
use serde_json::json;

use agent_observability::event_store::{EventStore, InMemoryEventStore};
use agent_observability::events::payload::{ToolCalled, VariableSet};
use agent_observability::events::{Event, EventPayload};

/// Batch sizes for a sequence of append calls
fn batch_plan() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..5, 0..10)
}

fn tool_event(run_id: &str, tool_index: usize) -> Event {
    Event::new(
        run_id,
        &EventPayload::ToolCalled(ToolCalled {
            tool_name: format!("tool-{tool_index}"),
            input: json!({}),
            state: "Act".to_string(),
            reason: None,
        }),
    )
    .unwrap()
}

proptest! {
    /// Sequences are dense from 1 regardless of batching
    #[test]
    fn sequences_are_dense_for_any_batching(plan in batch_plan()) {
        tokio_test::block_on(async {
            let store = InMemoryEventStore::new();

            let mut appended_total = 0usize;
            for (batch_index, size) in plan.iter().enumerate() {
                let batch: Vec<Event> = (0..*size)
                    .map(|i| tool_event("run-1", batch_index * 10 + i))
                    .collect();
                store.append(batch).await.unwrap();
                appended_total += size;
            }

            let events = store.load_events("run-1").await.unwrap();
            prop_assert_eq!(events.len(), appended_total);
            for (i, event) in events.iter().enumerate() {
                prop_assert_eq!(event.sequence, i as u64 + 1);
            }
            Ok(())
        })?;
    }

    /// Batching across several runs keeps each run dense independently
    #[test]
    fn interleaved_runs_stay_independent(
        assignments in prop::collection::vec(0usize..3, 1..40)
    ) {
        tokio_test::block_on(async {
            let store = InMemoryEventStore::new();

            for (i, run_index) in assignments.iter().enumerate() {
                let run_id = format!("run-{run_index}");
                store.append(vec![tool_event(&run_id, i)]).await.unwrap();
            }

            for run_index in 0..3usize {
                let run_id = format!("run-{run_index}");
                let expected = assignments.iter().filter(|r| **r == run_index).count();
                let events = store.load_events(&run_id).await.unwrap();
                prop_assert_eq!(events.len(), expected);
                for (i, event) in events.iter().enumerate() {
                    prop_assert_eq!(event.sequence, i as u64 + 1);
                }
            }
            Ok(())
        })?;
    }

    /// Events round trip through JSON byte for byte
    #[test]
    fn events_round_trip_through_json(
        key in "[a-z]{1,12}",
        value in any::<i64>(),
        sequence in 1u64..10_000,
    ) {
        let mut event = Event::new(
            "run-1",
            &EventPayload::VariableSet(VariableSet {
                key,
                value: json!(value),
            }),
        )
        .unwrap();
        event.id = uuid::Uuid::now_v7();
        event.sequence = sequence;
        event.version = 1;

        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(&decoded, &event);
        prop_assert_eq!(
            decoded.decoded_payload().unwrap(),
            event.decoded_payload().unwrap()
        );
    }
}
