//! Timeout Pattern Detection
//!
//! Finds tools whose failures cluster on timeouts. A tool only becomes a
//! pattern when both an absolute timeout count and a timeout rate
//! (timeouts over all calls) clear their thresholds; one slow afternoon
//! is not a pattern.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::detectors::{apply_options, load_corpus, wants, PatternDetector};
use crate::errors::PatternResult;
use crate::event_store::EventStore;
use crate::events::{EventPayload, EventType};
use crate::patterns::{DetectionOptions, Pattern, PatternData, PatternType};
use crate::run_store::RunStore;

/// Error fragments treated as timeouts, matched case-insensitively
const TIMEOUT_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline exceeded",
    "context deadline",
    "context canceled",
];

/// Whether an error message describes a timeout
pub fn is_timeout_error(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TIMEOUT_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Thresholds for timeout detection
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Minimum absolute timeout count per tool (default: 3)
    pub min_timeouts: usize,

    /// Minimum timeout rate, timeouts / total calls (default: 0.25)
    pub min_rate: f64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            min_timeouts: 3,
            min_rate: 0.25,
        }
    }
}

#[derive(Default)]
struct ToolStats {
    total_calls: u64,
    timeouts: Vec<(String, DateTime<Utc>, i64)>,
}

/// Detects tools that repeatedly fail on timeouts
pub struct TimeoutDetector {
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    config: TimeoutConfig,
}

impl TimeoutDetector {
    /// Create a detector with default thresholds
    pub fn new(event_store: Arc<dyn EventStore>, run_store: Arc<dyn RunStore>) -> Self {
        Self::with_config(event_store, run_store, TimeoutConfig::default())
    }

    /// Create a detector with custom thresholds
    pub fn with_config(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
        config: TimeoutConfig,
    ) -> Self {
        Self {
            event_store,
            run_store,
            config,
        }
    }
}

#[async_trait]
impl PatternDetector for TimeoutDetector {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn pattern_types(&self) -> Vec<PatternType> {
        vec![PatternType::Timeout]
    }

    async fn detect(&self, options: &DetectionOptions) -> PatternResult<Vec<Pattern>> {
        if !wants(options, PatternType::Timeout) {
            return Ok(Vec::new());
        }

        let corpus = load_corpus(self.event_store.as_ref(), self.run_store.as_ref(), options)
            .await?;

        let mut order: Vec<String> = Vec::new();
        let mut stats: HashMap<String, ToolStats> = HashMap::new();

        for run in &corpus {
            for event in &run.events {
                match event.event_type {
                    EventType::ToolCalled => {
                        if let Ok(EventPayload::ToolCalled(p)) = event.decoded_payload() {
                            let entry = stats.entry(p.tool_name.clone()).or_insert_with(|| {
                                order.push(p.tool_name);
                                ToolStats::default()
                            });
                            entry.total_calls += 1;
                        }
                    }
                    EventType::ToolFailed => {
                        if let Ok(EventPayload::ToolFailed(p)) = event.decoded_payload() {
                            if !is_timeout_error(&p.error) {
                                continue;
                            }
                            let entry = stats.entry(p.tool_name.clone()).or_insert_with(|| {
                                order.push(p.tool_name);
                                ToolStats::default()
                            });
                            entry.timeouts.push((
                                run.run_id.clone(),
                                event.timestamp,
                                p.duration_ns,
                            ));
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut patterns = Vec::new();

        for tool_name in &order {
            let Some(tool) = stats.get(tool_name) else {
                continue;
            };
            if tool.total_calls == 0 || tool.timeouts.len() < self.config.min_timeouts {
                continue;
            }

            let timeout_rate = tool.timeouts.len() as f64 / tool.total_calls as f64;
            if timeout_rate < self.config.min_rate {
                continue;
            }

            let avg_duration_ns = tool.timeouts.iter().map(|(_, _, d)| d).sum::<i64>()
                / tool.timeouts.len() as i64;

            let mut pattern = Pattern::new(
                format!("Timeouts: {tool_name}"),
                format!(
                    "{} of {} calls timed out",
                    tool.timeouts.len(),
                    tool.total_calls
                ),
                PatternData::Timeout {
                    tool_name: tool_name.clone(),
                    timeout_count: tool.timeouts.len() as u64,
                    total_calls: tool.total_calls,
                    timeout_rate,
                    avg_duration_ns,
                },
            );

            for (run_id, timestamp, duration_ns) in &tool.timeouts {
                pattern.add_evidence(
                    run_id.clone(),
                    *timestamp,
                    json!({ "duration": duration_ns }),
                );
            }

            let base = (0.5 + 0.02 * tool.total_calls as f64).min(0.8);
            pattern.confidence = (base + 0.2 * timeout_rate).clamp(0.3, 0.95);
            patterns.push(pattern);
        }

        debug!(patterns = patterns.len(), "timeout detection finished");
        Ok(apply_options(patterns, options))
    }
}
