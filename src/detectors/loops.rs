//! State Loop Detection
//!
//! Finds immediately repeating state subsequences: an agent bouncing
//! between the same states before it finally breaks out. Each occurrence
//! tracks how many consecutive iterations the loop ran and which state
//! the agent entered once it escaped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::detectors::{
    apply_options, clamp_confidence, load_corpus, mean, sample_std_dev, wants, PatternDetector,
};
use crate::errors::PatternResult;
use crate::event_store::EventStore;
use crate::events::{EventPayload, EventType};
use crate::patterns::{DetectionOptions, Pattern, PatternData, PatternType};
use crate::run_store::RunStore;

/// Thresholds for loop detection
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Shortest repeating block considered (default: 2)
    pub min_length: usize,

    /// Longest repeating block considered (default: 6)
    pub max_length: usize,

    /// Minimum occurrence sites across the corpus (default: 2)
    pub min_occurrences: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            min_length: 2,
            max_length: 6,
            min_occurrences: 2,
        }
    }
}

/// One repetition site found in one run
struct LoopSite {
    run_id: String,
    started_at: DateTime<Utc>,
    iterations: u64,
    exit_state: Option<String>,
}

/// Detects immediately repeating state subsequences
pub struct LoopDetector {
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    config: LoopConfig,
}

impl LoopDetector {
    /// Create a detector with default thresholds
    pub fn new(event_store: Arc<dyn EventStore>, run_store: Arc<dyn RunStore>) -> Self {
        Self::with_config(event_store, run_store, LoopConfig::default())
    }

    /// Create a detector with custom thresholds
    pub fn with_config(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
        config: LoopConfig,
    ) -> Self {
        Self {
            event_store,
            run_store,
            config,
        }
    }

    /// Scan one run's state path for repeating blocks of one length
    fn scan_path(
        &self,
        run_id: &str,
        path: &[(String, DateTime<Utc>)],
        length: usize,
        sites: &mut HashMap<Vec<String>, Vec<LoopSite>>,
        order: &mut Vec<Vec<String>>,
    ) {
        let mut i = 0;
        while i + 2 * length <= path.len() {
            let block: Vec<&str> = path[i..i + length].iter().map(|(s, _)| s.as_str()).collect();

            let mut iterations = 1;
            while i + (iterations + 1) * length <= path.len() {
                let next: Vec<&str> = path[i + iterations * length..i + (iterations + 1) * length]
                    .iter()
                    .map(|(s, _)| s.as_str())
                    .collect();
                if next != block {
                    break;
                }
                iterations += 1;
            }

            if iterations < 2 {
                i += 1;
                continue;
            }

            let key: Vec<String> = block.iter().map(|s| s.to_string()).collect();
            let exit_state = path.get(i + iterations * length).map(|(s, _)| s.clone());

            let entry = sites.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                Vec::new()
            });
            entry.push(LoopSite {
                run_id: run_id.to_string(),
                started_at: path[i].1,
                iterations: iterations as u64,
                exit_state,
            });

            i += iterations * length;
        }
    }
}

#[async_trait]
impl PatternDetector for LoopDetector {
    fn name(&self) -> &'static str {
        "loop"
    }

    fn pattern_types(&self) -> Vec<PatternType> {
        vec![PatternType::StateLoop]
    }

    async fn detect(&self, options: &DetectionOptions) -> PatternResult<Vec<Pattern>> {
        if !wants(options, PatternType::StateLoop) {
            return Ok(Vec::new());
        }

        let corpus = load_corpus(self.event_store.as_ref(), self.run_store.as_ref(), options)
            .await?;

        let mut order: Vec<Vec<String>> = Vec::new();
        let mut sites: HashMap<Vec<String>, Vec<LoopSite>> = HashMap::new();

        for run in &corpus {
            let path: Vec<(String, DateTime<Utc>)> = run
                .events
                .iter()
                .filter(|e| e.event_type == EventType::StateTransitioned)
                .filter_map(|e| match e.decoded_payload() {
                    Ok(EventPayload::StateTransitioned(p)) => Some((p.to_state, e.timestamp)),
                    _ => None,
                })
                .collect();

            for length in self.config.min_length..=self.config.max_length {
                self.scan_path(&run.run_id, &path, length, &mut sites, &mut order);
            }
        }

        let mut patterns = Vec::new();

        for key in order {
            let Some(found) = sites.get(&key) else {
                continue;
            };
            if found.len() < self.config.min_occurrences {
                continue;
            }

            let iteration_counts: Vec<f64> = found.iter().map(|s| s.iterations as f64).collect();
            let iterations = mean(&iteration_counts).round() as u64;

            // Most common exit state, first-seen tie-break
            let mut exit_order: Vec<&str> = Vec::new();
            let mut exit_counts: HashMap<&str, usize> = HashMap::new();
            for site in found {
                if let Some(exit) = &site.exit_state {
                    if !exit_counts.contains_key(exit.as_str()) {
                        exit_order.push(exit);
                    }
                    *exit_counts.entry(exit).or_insert(0) += 1;
                }
            }
            let mut exit_state = String::new();
            let mut best_count = 0;
            for state in &exit_order {
                let count = exit_counts.get(state).copied().unwrap_or(0);
                if count > best_count {
                    best_count = count;
                    exit_state = state.to_string();
                }
            }

            let mut pattern = Pattern::new(
                format!("State loop: {}", key.join(" → ")),
                format!(
                    "states repeating back to back at {} sites, typically {} iterations",
                    found.len(),
                    iterations
                ),
                PatternData::StateLoop {
                    states: key.clone(),
                    iterations,
                    exit_state,
                },
            );

            for site in found {
                pattern.add_evidence(
                    site.run_id.clone(),
                    site.started_at,
                    json!({
                        "iterations": site.iterations,
                        "exit_state": site.exit_state,
                    }),
                );
            }

            let penalty = 0.05 * sample_std_dev(&iteration_counts);
            pattern.confidence = clamp_confidence(0.5 + 0.1 * found.len() as f64 - penalty);
            patterns.push(pattern);
        }

        debug!(patterns = patterns.len(), "loop detection finished");
        Ok(apply_options(patterns, options))
    }
}
