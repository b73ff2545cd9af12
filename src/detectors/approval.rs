//! Approval Delay Detection
//!
//! Pairs approval requests with their grant or denial inside each run and
//! measures the wait. Requests are grouped by (tool, agent state at
//! request time); a group becomes a pattern once enough waits clear the
//! delay threshold. Requests that never resolve are counted as pending.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
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

/// Thresholds for approval delay detection
#[derive(Debug, Clone)]
pub struct ApprovalDelayConfig {
    /// Wait at or above which a resolution counts as delayed
    /// (default: 5 minutes)
    pub delay_threshold: Duration,

    /// Minimum delayed resolutions before a group becomes a pattern
    /// (default: 2)
    pub min_delays: usize,
}

impl Default for ApprovalDelayConfig {
    fn default() -> Self {
        Self {
            delay_threshold: Duration::minutes(5),
            min_delays: 2,
        }
    }
}

/// One resolved approval request
struct Resolution {
    run_id: String,
    resolved_at: DateTime<Utc>,
    wait_ns: i64,
    granted: bool,
}

#[derive(Default)]
struct GroupStats {
    resolutions: Vec<Resolution>,
    pending: u64,
}

/// Detects approvals that keep agents waiting
pub struct ApprovalDelayDetector {
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    config: ApprovalDelayConfig,
}

impl ApprovalDelayDetector {
    /// Create a detector with default thresholds
    pub fn new(event_store: Arc<dyn EventStore>, run_store: Arc<dyn RunStore>) -> Self {
        Self::with_config(event_store, run_store, ApprovalDelayConfig::default())
    }

    /// Create a detector with custom thresholds
    pub fn with_config(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
        config: ApprovalDelayConfig,
    ) -> Self {
        Self {
            event_store,
            run_store,
            config,
        }
    }
}

#[async_trait]
impl PatternDetector for ApprovalDelayDetector {
    fn name(&self) -> &'static str {
        "approval_delay"
    }

    fn pattern_types(&self) -> Vec<PatternType> {
        vec![PatternType::ApprovalDelay]
    }

    async fn detect(&self, options: &DetectionOptions) -> PatternResult<Vec<Pattern>> {
        if !wants(options, PatternType::ApprovalDelay) {
            return Ok(Vec::new());
        }

        let corpus = load_corpus(self.event_store.as_ref(), self.run_store.as_ref(), options)
            .await?;

        // (tool, state) → stats, in first-seen order
        let mut order: Vec<(String, String)> = Vec::new();
        let mut groups: HashMap<(String, String), GroupStats> = HashMap::new();

        for run in &corpus {
            let mut current_state = String::new();
            // Open requests per tool, FIFO: (state at request, requested at)
            let mut open: HashMap<String, VecDeque<(String, DateTime<Utc>)>> = HashMap::new();

            for event in &run.events {
                match event.event_type {
                    EventType::StateTransitioned => {
                        if let Ok(EventPayload::StateTransitioned(p)) = event.decoded_payload() {
                            current_state = p.to_state;
                        }
                    }
                    EventType::ApprovalRequested => {
                        if let Ok(EventPayload::ApprovalRequested(p)) = event.decoded_payload() {
                            open.entry(p.tool_name)
                                .or_default()
                                .push_back((current_state.clone(), event.timestamp));
                        }
                    }
                    EventType::ApprovalGranted | EventType::ApprovalDenied => {
                        let granted = event.event_type == EventType::ApprovalGranted;
                        let tool_name = match event.decoded_payload() {
                            Ok(EventPayload::ApprovalGranted(p)) => Some(p.tool_name),
                            Ok(EventPayload::ApprovalDenied(p)) => Some(p.tool_name),
                            _ => None,
                        };
                        let Some(tool_name) = tool_name else {
                            continue;
                        };
                        let Some((state, requested_at)) = open
                            .get_mut(&tool_name)
                            .and_then(|queue| queue.pop_front())
                        else {
                            continue;
                        };

                        let key = (tool_name, state);
                        let entry = groups.entry(key.clone()).or_insert_with(|| {
                            order.push(key);
                            GroupStats::default()
                        });
                        entry.resolutions.push(Resolution {
                            run_id: run.run_id.clone(),
                            resolved_at: event.timestamp,
                            wait_ns: nanos_between(requested_at, event.timestamp),
                            granted,
                        });
                    }
                    _ => {}
                }
            }

            // Whatever never resolved stays pending
            for (tool_name, queue) in open {
                for (state, _) in queue {
                    let key = (tool_name.clone(), state);
                    let entry = groups.entry(key.clone()).or_insert_with(|| {
                        order.push(key);
                        GroupStats::default()
                    });
                    entry.pending += 1;
                }
            }
        }

        let threshold_ns = self
            .config
            .delay_threshold
            .num_nanoseconds()
            .unwrap_or(i64::MAX);

        let mut patterns = Vec::new();

        for key in &order {
            let Some(group) = groups.get(key) else {
                continue;
            };
            if group.resolutions.is_empty() {
                continue;
            }

            let delayed: Vec<&Resolution> = group
                .resolutions
                .iter()
                .filter(|r| r.wait_ns >= threshold_ns)
                .collect();
            if delayed.len() < self.config.min_delays {
                continue;
            }

            let total = group.resolutions.len() as u64;
            let granted = group.resolutions.iter().filter(|r| r.granted).count() as u64;
            let average_wait_ns =
                group.resolutions.iter().map(|r| r.wait_ns).sum::<i64>() / total as i64;
            let max_wait_ns = group
                .resolutions
                .iter()
                .map(|r| r.wait_ns)
                .max()
                .unwrap_or(0);

            let (tool_name, state) = key;
            let mut pattern = Pattern::new(
                format!("Approval delays: {tool_name} in {state}"),
                format!(
                    "{} of {} approvals for {} waited past the threshold",
                    delayed.len(),
                    total,
                    tool_name
                ),
                PatternData::ApprovalDelay {
                    tool_name: tool_name.clone(),
                    state: state.clone(),
                    average_wait_ns,
                    max_wait_ns,
                    pending_count: group.pending,
                    total_approvals: total,
                    approval_rate: granted as f64 / total as f64,
                },
            );

            for resolution in &delayed {
                pattern.add_evidence(
                    resolution.run_id.clone(),
                    resolution.resolved_at,
                    json!({ "wait": resolution.wait_ns, "granted": resolution.granted }),
                );
            }

            let delay_rate = delayed.len() as f64 / total as f64;
            let mut confidence = 0.4 + 0.4 * delay_rate;
            if average_wait_ns > 2 * threshold_ns {
                confidence += 0.15;
            } else if average_wait_ns as f64 > 1.5 * threshold_ns as f64 {
                confidence += 0.10;
            }
            pattern.confidence = clamp_confidence(confidence);
            patterns.push(pattern);
        }

        debug!(patterns = patterns.len(), "approval delay detection finished");
        Ok(apply_options(patterns, options))
    }
}
