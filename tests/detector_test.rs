//! Detection pipeline integration tests
//!
//! End-to-end scenarios over the in-memory stores: corpora are appended
//! as events, runs are cataloged, and the detectors (individually and
//! through the composite) mine them.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};

use agent_observability::detectors::{
    CompositeDetector, CostAnomalyDetector, LoopConfig, LoopDetector, PatternDetector,
};
use agent_observability::event_store::EventStore;
use agent_observability::patterns::{DetectionOptions, PatternData, PatternType};
use common::{save_run, state_transitioned, stores, tool_called};

#[tokio::test]
async fn loop_scenario_three_runs_bouncing_explore_decide() {
    let (event_store, run_store) = stores();
    let base = Utc::now();

    for i in 0..3i64 {
        let run_id = format!("run-{i}");
        let start = base + Duration::minutes(i);
        save_run(&run_store, &run_id, start).await;

        let states = ["Explore", "Decide", "Explore", "Decide", "Done"];
        let mut previous = "Intake";
        let mut events = Vec::new();
        for (j, state) in states.iter().enumerate() {
            events.push(state_transitioned(
                &run_id,
                previous,
                state,
                start + Duration::seconds(j as i64),
            ));
            previous = state;
        }
        event_store.append(events).await.unwrap();
    }

    let detector = LoopDetector::with_config(
        event_store,
        run_store,
        LoopConfig {
            min_occurrences: 2,
            ..Default::default()
        },
    );
    let patterns = detector.detect(&DetectionOptions::default()).await.unwrap();

    let looped = patterns
        .iter()
        .find(|p| p.pattern_type == PatternType::StateLoop)
        .expect("state loop expected");

    match &looped.data {
        PatternData::StateLoop {
            states,
            iterations,
            exit_state,
        } => {
            assert_eq!(states, &["Explore", "Decide"]);
            assert!(*iterations >= 2);
            assert_eq!(exit_state, "Done");
        }
        other => panic!("unexpected data: {other:?}"),
    }
    assert_eq!(looped.frequency, 3);
    assert!(looped.confidence >= 0.5);
}

#[tokio::test]
async fn cost_scenario_one_heavy_run_among_uniform_ones() {
    let (event_store, run_store) = stores();
    let base = Utc::now();

    let counts = [10usize, 10, 10, 10, 10, 50];
    for (i, count) in counts.iter().enumerate() {
        let run_id = format!("run-{i}");
        let start = base + Duration::minutes(i as i64);
        save_run(&run_store, &run_id, start).await;

        let mut events = Vec::new();
        for j in 0..*count {
            events.push(tool_called(
                &run_id,
                "web_search",
                start + Duration::seconds(j as i64),
            ));
        }
        event_store.append(events).await.unwrap();
    }

    let detector = CostAnomalyDetector::new(event_store, run_store);
    let patterns = detector.detect(&DetectionOptions::default()).await.unwrap();

    assert_eq!(patterns.len(), 1);
    match &patterns[0].data {
        PatternData::CostAnomaly {
            cost_type,
            anomaly_count,
            anomaly_cost,
            average_cost,
            ..
        } => {
            assert_eq!(cost_type.to_string(), "tool_calls");
            assert!(*anomaly_count >= 1);
            assert!(anomaly_cost > average_cost);
        }
        other => panic!("unexpected data: {other:?}"),
    }
}

#[tokio::test]
async fn composite_over_a_mixed_corpus_ranks_by_confidence() {
    let (event_store, run_store) = stores();
    let base = Utc::now();

    // Seed a corpus that trips several detectors at once: recurring tool
    // sequences plus a state loop in every run.
    for i in 0..4i64 {
        let run_id = format!("run-{i}");
        let start = base + Duration::minutes(i);
        save_run(&run_store, &run_id, start).await;

        let mut events = vec![
            state_transitioned(&run_id, "Intake", "Explore", start),
            state_transitioned(&run_id, "Explore", "Decide", start + Duration::seconds(1)),
            state_transitioned(&run_id, "Decide", "Explore", start + Duration::seconds(2)),
            state_transitioned(&run_id, "Explore", "Decide", start + Duration::seconds(3)),
            state_transitioned(&run_id, "Decide", "Done", start + Duration::seconds(4)),
        ];
        for (j, tool) in ["search", "fetch", "summarize"].iter().enumerate() {
            events.push(tool_called(
                &run_id,
                tool,
                start + Duration::seconds(10 + j as i64),
            ));
        }
        event_store.append(events).await.unwrap();
    }

    let composite = CompositeDetector::with_default_detectors(event_store, run_store);
    let patterns = composite.detect(&DetectionOptions::default()).await.unwrap();

    assert!(!patterns.is_empty());
    for pair in patterns.windows(2) {
        assert!(
            pair[0].confidence > pair[1].confidence
                || (pair[0].confidence == pair[1].confidence
                    && pair[0].frequency >= pair[1].frequency)
        );
    }

    // Limit truncates after ranking
    let limited = composite
        .detect(&DetectionOptions {
            limit: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].name, patterns[0].name);
    assert_eq!(limited[1].name, patterns[1].name);
}

#[tokio::test]
async fn empty_corpus_is_silent_across_the_whole_pipeline() {
    let (event_store, run_store) = stores();

    let composite = CompositeDetector::with_default_detectors(event_store, run_store);
    assert_eq!(composite.len(), 9);

    let patterns = composite.detect(&DetectionOptions::default()).await.unwrap();
    assert!(patterns.is_empty());
}

#[tokio::test]
async fn detection_is_idempotent_on_an_unchanged_corpus() {
    let (event_store, run_store) = stores();
    let base = Utc::now();

    for i in 0..3i64 {
        let run_id = format!("run-{i}");
        let start = base + Duration::minutes(i);
        save_run(&run_store, &run_id, start).await;
        event_store
            .append(vec![
                tool_called(&run_id, "search", start),
                tool_called(&run_id, "fetch", start + Duration::seconds(1)),
            ])
            .await
            .unwrap();
    }

    let composite = CompositeDetector::with_default_detectors(event_store, run_store);
    let first = composite.detect(&DetectionOptions::default()).await.unwrap();
    let second = composite.detect(&DetectionOptions::default()).await.unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        // Ids are fresh every detection; finding identity is stable
        assert!(a.is_same_finding(b));
        assert_ne!(a.id, b.id);
    }
}

#[tokio::test]
async fn run_id_restriction_narrows_the_corpus() {
    let (event_store, run_store) = stores();
    let base = Utc::now();

    for i in 0..6i64 {
        let run_id = format!("run-{i}");
        let start = base + Duration::minutes(i);
        save_run(&run_store, &run_id, start).await;
        event_store
            .append(vec![
                tool_called(&run_id, "search", start),
                tool_called(&run_id, "fetch", start + Duration::seconds(1)),
            ])
            .await
            .unwrap();
    }

    let composite = CompositeDetector::with_default_detectors(event_store, run_store);

    let unrestricted = composite.detect(&DetectionOptions::default()).await.unwrap();
    assert!(unrestricted
        .iter()
        .any(|p| p.pattern_type == PatternType::ToolSequence));

    // Two runs cannot satisfy the sequence recurrence threshold of three
    let narrowed = composite
        .detect(&DetectionOptions {
            run_ids: vec!["run-0".to_string(), "run-1".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(narrowed
        .iter()
        .all(|p| p.pattern_type != PatternType::ToolSequence));
}

#[tokio::test]
async fn type_restriction_reaches_constituents() {
    let (event_store, run_store) = stores();
    let base = Utc::now();

    for i in 0..3i64 {
        let run_id = format!("run-{i}");
        let start = base + Duration::minutes(i);
        save_run(&run_store, &run_id, start).await;
        event_store
            .append(vec![
                tool_called(&run_id, "search", start),
                tool_called(&run_id, "fetch", start + Duration::seconds(1)),
            ])
            .await
            .unwrap();
    }

    let composite = CompositeDetector::with_default_detectors(event_store, run_store);
    let patterns = composite
        .detect(&DetectionOptions {
            pattern_types: vec![PatternType::StateLoop],
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(patterns.is_empty());
}

#[tokio::test]
async fn arc_sharing_allows_live_detection_while_appending() {
    let (event_store, run_store) = stores();
    let base = Utc::now();

    let composite = Arc::new(CompositeDetector::with_default_detectors(
        event_store.clone(),
        run_store.clone(),
    ));

    for i in 0..3i64 {
        let run_id = format!("run-{i}");
        save_run(&run_store, &run_id, base + Duration::minutes(i)).await;
        event_store
            .append(vec![tool_called(&run_id, "search", base + Duration::minutes(i))])
            .await
            .unwrap();
    }

    let detectors: Vec<_> = (0..4)
        .map(|_| {
            let composite = Arc::clone(&composite);
            tokio::spawn(async move {
                composite.detect(&DetectionOptions::default()).await.unwrap()
            })
        })
        .collect();

    for handle in detectors {
        handle.await.unwrap();
    }
}
