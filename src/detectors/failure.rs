//! Failure Pattern Detection
//!
//! Groups tool failures by (tool, error class) and aggregates budget
//! exhaustion events across runs. Error classes are derived by matching
//! the error message against a fixed keyword table; anything unmatched
//! is `unknown`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::detectors::{
    apply_options, clamp_confidence, load_corpus, wants, PatternDetector,
};
use crate::errors::PatternResult;
use crate::event_store::EventStore;
use crate::events::{EventPayload, EventType};
use crate::patterns::{DetectionOptions, Pattern, PatternData, PatternType};
use crate::run_store::RunStore;

/// Ordered keyword table driving error classification
const ERROR_CLASSES: &[(&str, &[&str])] = &[
    ("timeout", &["timeout", "timed out", "deadline"]),
    (
        "network",
        &["connection", "network", "refused", "unreachable", "dns"],
    ),
    (
        "permission",
        &["permission", "unauthorized", "forbidden", "access denied"],
    ),
    ("not_found", &["not found", "404", "missing", "no such"]),
    (
        "validation",
        &["invalid", "validation", "malformed", "bad request"],
    ),
    (
        "rate_limit",
        &["rate limit", "too many requests", "429", "quota"],
    ),
];

/// Classify an error message into its failure class
pub fn classify_error(message: &str) -> &'static str {
    let lowered = message.to_lowercase();
    for (class, keywords) in ERROR_CLASSES {
        if keywords.iter().any(|k| lowered.contains(k)) {
            return class;
        }
    }
    "unknown"
}

/// Thresholds for failure detection
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Minimum occurrences before a failure group becomes a pattern
    /// (default: 3)
    pub min_occurrences: usize,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self { min_occurrences: 3 }
    }
}

/// Detects recurring tool failure classes and budget exhaustion
pub struct FailureDetector {
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    config: FailureConfig,
}

impl FailureDetector {
    /// Create a detector with default thresholds
    pub fn new(event_store: Arc<dyn EventStore>, run_store: Arc<dyn RunStore>) -> Self {
        Self::with_config(event_store, run_store, FailureConfig::default())
    }

    /// Create a detector with custom thresholds
    pub fn with_config(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
        config: FailureConfig,
    ) -> Self {
        Self {
            event_store,
            run_store,
            config,
        }
    }
}

#[async_trait]
impl PatternDetector for FailureDetector {
    fn name(&self) -> &'static str {
        "failure"
    }

    fn pattern_types(&self) -> Vec<PatternType> {
        vec![PatternType::ToolFailure, PatternType::BudgetExhaustion]
    }

    async fn detect(&self, options: &DetectionOptions) -> PatternResult<Vec<Pattern>> {
        if !wants(options, PatternType::ToolFailure)
            && !wants(options, PatternType::BudgetExhaustion)
        {
            return Ok(Vec::new());
        }

        let corpus = load_corpus(self.event_store.as_ref(), self.run_store.as_ref(), options)
            .await?;

        // (tool, class) → occurrences, in first-seen order
        let mut order: Vec<(String, &'static str)> = Vec::new();
        let mut failures: HashMap<(String, &'static str), Vec<(String, DateTime<Utc>, String)>> =
            HashMap::new();
        let mut exhaustions: Vec<(String, DateTime<Utc>, String)> = Vec::new();

        for run in &corpus {
            for event in &run.events {
                match event.event_type {
                    EventType::ToolFailed => {
                        if let Ok(EventPayload::ToolFailed(p)) = event.decoded_payload() {
                            let class = classify_error(&p.error);
                            let key = (p.tool_name.clone(), class);
                            let entry = failures.entry(key.clone()).or_insert_with(|| {
                                order.push(key);
                                Vec::new()
                            });
                            entry.push((run.run_id.clone(), event.timestamp, p.error));
                        }
                    }
                    EventType::BudgetExhausted => {
                        if let Ok(EventPayload::BudgetExhausted(p)) = event.decoded_payload() {
                            exhaustions.push((run.run_id.clone(), event.timestamp, p.budget_name));
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut patterns = Vec::new();

        if wants(options, PatternType::ToolFailure) {
            for key in &order {
                let Some(found) = failures.get(key) else {
                    continue;
                };
                if found.len() < self.config.min_occurrences {
                    continue;
                }

                let (tool_name, error_type) = key;
                let mut pattern = Pattern::new(
                    format!("{tool_name} {error_type} failures"),
                    format!(
                        "{} failed {} times with {} errors",
                        tool_name,
                        found.len(),
                        error_type
                    ),
                    PatternData::ToolFailure {
                        tool_name: tool_name.clone(),
                        error_type: error_type.to_string(),
                        error_count: found.len() as u64,
                    },
                );

                for (run_id, timestamp, error) in found {
                    pattern.add_evidence(run_id.clone(), *timestamp, json!({ "error": error }));
                }

                pattern.confidence = clamp_confidence(0.5 + 0.1 * found.len() as f64);
                patterns.push(pattern);
            }
        }

        if wants(options, PatternType::BudgetExhaustion)
            && exhaustions.len() >= self.config.min_occurrences
        {
            let mut pattern = Pattern::new(
                "Budget exhaustion",
                format!("budgets ran out {} times across runs", exhaustions.len()),
                PatternData::BudgetExhaustion {
                    budget_name: None,
                    exhaustion_count: exhaustions.len() as u64,
                    near_miss_count: 0,
                    total_runs: corpus.len() as u64,
                    exhaustion_rate: 0.0,
                    avg_usage_ratio: 0.0,
                    trend: None,
                    recommendation: None,
                },
            );

            for (run_id, timestamp, budget_name) in &exhaustions {
                pattern.add_evidence(
                    run_id.clone(),
                    *timestamp,
                    json!({ "budget_name": budget_name }),
                );
            }

            pattern.confidence = clamp_confidence(0.5 + 0.1 * exhaustions.len() as f64);
            patterns.push(pattern);
        }

        debug!(patterns = patterns.len(), "failure detection finished");
        Ok(apply_options(patterns, options))
    }
}
