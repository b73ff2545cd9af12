//! Pattern and ranking invariants
//!
//! Evidence bookkeeping (frequency, run_ids, seen window), composite
//! ranking, and serde round trips for the remaining domain types.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;

use agent_observability::detectors::{CompositeDetector, PatternDetector};
use agent_observability::errors::PatternResult;
use agent_observability::patterns::{
    DetectionOptions, Pattern, PatternData, PatternType,
};
use agent_observability::run_store::{Run, RunStatus};

fn sample_data() -> PatternData {
    PatternData::ToolFailure {
        tool_name: "web_search".to_string(),
        error_type: "network".to_string(),
        error_count: 1,
    }
}

/// Evidence entries as (run index, minute offset)
fn evidence_plan() -> impl Strategy<Value = Vec<(usize, i64)>> {
    prop::collection::vec((0usize..5, 0i64..100_000), 1..50)
}

/// Fixed detector whose output is fully scripted
struct ScriptedDetector {
    patterns: Vec<Pattern>,
}

#[async_trait]
impl PatternDetector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn pattern_types(&self) -> Vec<PatternType> {
        vec![PatternType::ToolFailure]
    }

    async fn detect(&self, _options: &DetectionOptions) -> PatternResult<Vec<Pattern>> {
        Ok(self.patterns.clone())
    }
}

proptest! {
    /// frequency == evidence length, run_ids deduplicated, window ordered
    #[test]
    fn evidence_bookkeeping_holds(plan in evidence_plan()) {
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut pattern = Pattern::new("p", "d", sample_data());

        for (run_index, offset) in &plan {
            let timestamp = base + Duration::minutes(*offset);
            let old_first = pattern.first_seen;
            let old_last = pattern.last_seen;
            let had_evidence = !pattern.evidence.is_empty();

            pattern.add_evidence(format!("run-{run_index}"), timestamp, json!({}));

            if had_evidence {
                // first_seen never moves forward; last_seen only widens
                prop_assert!(pattern.first_seen <= old_first);
                prop_assert_eq!(pattern.last_seen, old_last.max(timestamp));
            }
        }

        prop_assert_eq!(pattern.frequency as usize, plan.len());
        prop_assert_eq!(pattern.frequency as usize, pattern.evidence.len());
        prop_assert!(pattern.first_seen <= pattern.last_seen);

        let mut seen = Vec::new();
        for run_id in &pattern.run_ids {
            prop_assert!(!seen.contains(run_id));
            seen.push(run_id.clone());
        }
        prop_assert!((0.0..=1.0).contains(&pattern.confidence));
    }

    /// Composite output is ordered by confidence, then frequency
    #[test]
    fn composite_ranking_is_monotone(
        scores in prop::collection::vec((0.0f64..1.0, 0u64..40), 1..20),
        limit in 0usize..10,
    ) {
        tokio_test::block_on(async {
            let patterns: Vec<Pattern> = scores
                .iter()
                .enumerate()
                .map(|(i, (confidence, frequency))| {
                    let mut pattern = Pattern::new(format!("p{i}"), "d", sample_data());
                    pattern.confidence = *confidence;
                    for j in 0..*frequency {
                        pattern.add_evidence(format!("run-{j}"), Utc::now(), json!({}));
                    }
                    pattern
                })
                .collect();

            let composite = CompositeDetector::new(vec![Arc::new(ScriptedDetector {
                patterns,
            })]);

            let options = DetectionOptions {
                limit,
                ..Default::default()
            };
            let ranked = composite.detect(&options).await.unwrap();

            if limit > 0 {
                prop_assert!(ranked.len() <= limit);
            } else {
                prop_assert_eq!(ranked.len(), scores.len());
            }

            for pair in ranked.windows(2) {
                prop_assert!(pair[0].confidence >= pair[1].confidence);
                if pair[0].confidence == pair[1].confidence {
                    prop_assert!(pair[0].frequency >= pair[1].frequency);
                }
            }
            Ok(())
        })?;
    }

    /// Detection options round trip through JSON
    #[test]
    fn detection_options_round_trip(
        min_confidence in 0.0f64..1.0,
        min_frequency in 0u64..100,
        limit in 0usize..100,
        runs in prop::collection::vec("[a-z0-9-]{1,16}", 0..5),
    ) {
        let options = DetectionOptions {
            run_ids: runs,
            min_confidence,
            min_frequency,
            limit,
            pattern_types: vec![PatternType::StateLoop, PatternType::Timeout],
            ..Default::default()
        };

        let encoded = serde_json::to_string(&options).unwrap();
        let decoded: DetectionOptions = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(decoded, options);
    }

    /// Runs round trip through JSON
    #[test]
    fn runs_round_trip(
        id in "[a-z0-9-]{1,24}",
        goal in ".{0,40}",
        complete in any::<bool>(),
    ) {
        let mut run = Run::new(id, goal);
        run.start().unwrap();
        if complete {
            run.complete(Some(json!({"ok": true}))).unwrap();
        }

        let encoded = serde_json::to_string(&run).unwrap();
        let decoded: Run = serde_json::from_str(&encoded).unwrap();
        prop_assert_eq!(&decoded, &run);
        if complete {
            prop_assert_eq!(decoded.status, RunStatus::Completed);
            prop_assert!(decoded.end_time.is_some());
        }
    }
}
