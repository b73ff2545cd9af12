//! Tool Sequence Detection
//!
//! Finds contiguous tool-call subsequences that recur across runs. A
//! sequence that shows up in enough distinct runs is a habit worth
//! naming, whether it is a productive pipeline or a rut.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::detectors::{
    apply_options, clamp_confidence, load_corpus, nanos_between, wants, PatternDetector,
};
use crate::errors::PatternResult;
use crate::event_store::EventStore;
use crate::events::{EventPayload, EventType};
use crate::patterns::{DetectionOptions, Pattern, PatternData, PatternType};
use crate::run_store::RunStore;

/// Thresholds for sequence detection
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    /// Shortest subsequence considered (default: 2)
    pub min_length: usize,

    /// Longest subsequence considered (default: 5)
    pub max_length: usize,

    /// Minimum distinct runs a sequence must recur in (default: 3)
    pub min_occurrences: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            min_length: 2,
            max_length: 5,
            min_occurrences: 3,
        }
    }
}

/// One matched window of a candidate sequence
struct Occurrence {
    run_id: String,
    started_at: DateTime<Utc>,
    gap_sum_ns: i64,
    gap_count: u64,
}

/// Detects recurring contiguous tool-call subsequences
pub struct SequenceDetector {
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    config: SequenceConfig,
}

impl SequenceDetector {
    /// Create a detector with default thresholds
    pub fn new(event_store: Arc<dyn EventStore>, run_store: Arc<dyn RunStore>) -> Self {
        Self::with_config(event_store, run_store, SequenceConfig::default())
    }

    /// Create a detector with custom thresholds
    pub fn with_config(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
        config: SequenceConfig,
    ) -> Self {
        Self {
            event_store,
            run_store,
            config,
        }
    }
}

#[async_trait]
impl PatternDetector for SequenceDetector {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn pattern_types(&self) -> Vec<PatternType> {
        vec![PatternType::ToolSequence]
    }

    async fn detect(&self, options: &DetectionOptions) -> PatternResult<Vec<Pattern>> {
        if !wants(options, PatternType::ToolSequence) {
            return Ok(Vec::new());
        }

        let corpus = load_corpus(self.event_store.as_ref(), self.run_store.as_ref(), options)
            .await?;

        // Candidate key → occurrences, in first-seen order
        let mut order: Vec<Vec<String>> = Vec::new();
        let mut occurrences: HashMap<Vec<String>, Vec<Occurrence>> = HashMap::new();

        for run in &corpus {
            let calls: Vec<(String, DateTime<Utc>)> = run
                .events
                .iter()
                .filter(|e| e.event_type == EventType::ToolCalled)
                .filter_map(|e| match e.decoded_payload() {
                    Ok(EventPayload::ToolCalled(p)) => Some((p.tool_name, e.timestamp)),
                    _ => None,
                })
                .collect();

            for length in self.config.min_length..=self.config.max_length {
                if calls.len() < length {
                    break;
                }

                for window in calls.windows(length) {
                    let key: Vec<String> = window.iter().map(|(name, _)| name.clone()).collect();

                    let mut gap_sum_ns = 0i64;
                    for pair in window.windows(2) {
                        gap_sum_ns = gap_sum_ns.saturating_add(nanos_between(pair[0].1, pair[1].1));
                    }

                    let entry = occurrences.entry(key.clone()).or_insert_with(|| {
                        order.push(key);
                        Vec::new()
                    });
                    entry.push(Occurrence {
                        run_id: run.run_id.clone(),
                        started_at: window[0].1,
                        gap_sum_ns,
                        gap_count: (length - 1) as u64,
                    });
                }
            }
        }

        let mut patterns = Vec::new();

        for key in order {
            let Some(found) = occurrences.get(&key) else {
                continue;
            };

            let mut distinct_runs: Vec<&str> = Vec::new();
            for occurrence in found {
                if !distinct_runs.contains(&occurrence.run_id.as_str()) {
                    distinct_runs.push(&occurrence.run_id);
                }
            }
            if distinct_runs.len() < self.config.min_occurrences {
                continue;
            }

            let total_gaps: u64 = found.iter().map(|o| o.gap_count).sum();
            let gap_sum: i64 = found.iter().map(|o| o.gap_sum_ns).sum();
            let average_gap_ns = if total_gaps > 0 {
                gap_sum / total_gaps as i64
            } else {
                0
            };

            let mut pattern = Pattern::new(
                format!("Tool sequence: {}", key.join(" → ")),
                format!(
                    "{} tools invoked back to back across {} runs",
                    key.len(),
                    distinct_runs.len()
                ),
                PatternData::ToolSequence {
                    sequence: key.clone(),
                    average_gap_ns,
                },
            );

            for occurrence in found {
                pattern.add_evidence(
                    occurrence.run_id.clone(),
                    occurrence.started_at,
                    json!({ "sequence": key }),
                );
            }

            pattern.confidence = clamp_confidence(0.5 + 0.1 * found.len() as f64);
            patterns.push(pattern);
        }

        debug!(patterns = patterns.len(), "sequence detection finished");
        Ok(apply_options(patterns, options))
    }
}
