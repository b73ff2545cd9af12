//! Tool Preference Detection
//!
//! Compares each tool's call volume against a uniform baseline
//! (total calls spread evenly over the tool universe) and flags heavy
//! skew either way. With a known-tool registry configured, tools that
//! are never touched at all are flagged too.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::detectors::{apply_options, clamp_confidence, load_corpus, wants, PatternDetector};
use crate::errors::PatternResult;
use crate::event_store::EventStore;
use crate::events::{EventPayload, EventType};
use crate::patterns::{DetectionOptions, Pattern, PatternData, PatternType, PreferenceType};
use crate::run_store::RunStore;

/// Thresholds for tool preference detection
#[derive(Debug, Clone)]
pub struct ToolPreferenceConfig {
    /// Usage ratio at or above which a tool is overused (default: 2.0)
    pub overuse_threshold: f64,

    /// Usage ratio at or below which a tool is underused (default: 0.25)
    pub underuse_threshold: f64,

    /// Minimum total calls before skew is judged at all (default: 10)
    pub min_total_calls: u64,

    /// Registry of tools available to the agent; enables never-used
    /// detection (empty = judge only observed tools)
    pub known_tools: Vec<String>,
}

impl Default for ToolPreferenceConfig {
    fn default() -> Self {
        Self {
            overuse_threshold: 2.0,
            underuse_threshold: 0.25,
            min_total_calls: 10,
            known_tools: Vec::new(),
        }
    }
}

#[derive(Default)]
struct ToolUsage {
    calls: Vec<(String, DateTime<Utc>)>,
    succeeded: u64,
    failed: u64,
    states: Vec<String>,
}

/// Detects tool usage skew against a uniform baseline
pub struct ToolPreferenceDetector {
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    config: ToolPreferenceConfig,
}

impl ToolPreferenceDetector {
    /// Create a detector with default thresholds
    pub fn new(event_store: Arc<dyn EventStore>, run_store: Arc<dyn RunStore>) -> Self {
        Self::with_config(event_store, run_store, ToolPreferenceConfig::default())
    }

    /// Create a detector with custom thresholds
    pub fn with_config(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
        config: ToolPreferenceConfig,
    ) -> Self {
        Self {
            event_store,
            run_store,
            config,
        }
    }
}

#[async_trait]
impl PatternDetector for ToolPreferenceDetector {
    fn name(&self) -> &'static str {
        "tool_preference"
    }

    fn pattern_types(&self) -> Vec<PatternType> {
        vec![PatternType::ToolPreference]
    }

    async fn detect(&self, options: &DetectionOptions) -> PatternResult<Vec<Pattern>> {
        if !wants(options, PatternType::ToolPreference) {
            return Ok(Vec::new());
        }

        let corpus = load_corpus(self.event_store.as_ref(), self.run_store.as_ref(), options)
            .await?;

        // Tool universe in first-seen order, registry tools first
        let mut universe: Vec<String> = self.config.known_tools.clone();
        let mut usage: HashMap<String, ToolUsage> = universe
            .iter()
            .map(|tool| (tool.clone(), ToolUsage::default()))
            .collect();

        for run in &corpus {
            for event in &run.events {
                match event.event_type {
                    EventType::ToolCalled => {
                        if let Ok(EventPayload::ToolCalled(p)) = event.decoded_payload() {
                            let entry =
                                usage.entry(p.tool_name.clone()).or_insert_with(|| {
                                    universe.push(p.tool_name);
                                    ToolUsage::default()
                                });
                            entry.calls.push((run.run_id.clone(), event.timestamp));
                            if !entry.states.contains(&p.state) {
                                entry.states.push(p.state);
                            }
                        }
                    }
                    EventType::ToolSucceeded => {
                        if let Ok(EventPayload::ToolSucceeded(p)) = event.decoded_payload() {
                            usage.entry(p.tool_name).or_default().succeeded += 1;
                        }
                    }
                    EventType::ToolFailed => {
                        if let Ok(EventPayload::ToolFailed(p)) = event.decoded_payload() {
                            usage.entry(p.tool_name).or_default().failed += 1;
                        }
                    }
                    _ => {}
                }
            }
        }

        let total_calls: u64 = usage.values().map(|u| u.calls.len() as u64).sum();
        if total_calls < self.config.min_total_calls || universe.is_empty() {
            return Ok(Vec::new());
        }

        let expected = total_calls as f64 / universe.len() as f64;
        let mut patterns = Vec::new();

        for tool_name in &universe {
            let Some(tool) = usage.get(tool_name) else {
                continue;
            };

            let count = tool.calls.len() as u64;
            let ratio = count as f64 / expected;

            let preference = if ratio >= self.config.overuse_threshold {
                PreferenceType::Overused
            } else if ratio <= self.config.underuse_threshold {
                PreferenceType::Underused
            } else {
                continue;
            };

            let finished = tool.succeeded + tool.failed;
            let success_rate = if finished > 0 {
                tool.succeeded as f64 / finished as f64
            } else {
                0.0
            };

            let mut pattern = Pattern::new(
                format!(
                    "Tool {}: {tool_name}",
                    match preference {
                        PreferenceType::Overused => "overuse",
                        PreferenceType::Underused => "underuse",
                    }
                ),
                format!(
                    "{tool_name} was called {count} times against a uniform expectation of {expected:.1}"
                ),
                PatternData::ToolPreference {
                    tool_name: tool_name.clone(),
                    usage_count: count,
                    expected_usage: expected,
                    usage_ratio: ratio,
                    preference,
                    success_rate,
                    available_states: tool.states.clone(),
                },
            );

            for (run_id, timestamp) in &tool.calls {
                pattern.add_evidence(run_id.clone(), *timestamp, json!({ "tool": tool_name }));
            }

            let extremity = match preference {
                PreferenceType::Overused => ratio / self.config.overuse_threshold,
                PreferenceType::Underused => {
                    if ratio > 0.0 {
                        self.config.underuse_threshold / ratio
                    } else {
                        3.0
                    }
                }
            }
            .min(3.0);

            let volume_bonus = (0.01 * count as f64).min(0.2);
            pattern.confidence = clamp_confidence(0.3 + 0.1 * extremity + volume_bonus);
            patterns.push(pattern);
        }

        debug!(patterns = patterns.len(), "tool preference detection finished");
        Ok(apply_options(patterns, options))
    }
}
