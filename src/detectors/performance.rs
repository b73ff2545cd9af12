//! Performance Pattern Detection
//!
//! Two families: tool executions whose wall-clock span (terminal event
//! minus call event) exceeds a per-tool threshold, and whole runs whose
//! span (last event minus first event) exceeds the run threshold.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::debug;

use crate::detectors::{
    apply_options, clamp_confidence, load_corpus, nanos_between, percentile, wants,
    PatternDetector,
};
use crate::errors::PatternResult;
use crate::event_store::EventStore;
use crate::events::{EventPayload, EventType};
use crate::patterns::{DetectionOptions, Pattern, PatternData, PatternType};
use crate::run_store::RunStore;

/// Thresholds for performance detection
#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    /// Duration above which a tool execution counts as slow
    /// (default: 30 seconds)
    pub default_tool_threshold: Duration,

    /// Per-tool overrides of the slow threshold
    pub tool_thresholds: HashMap<String, Duration>,

    /// Duration above which a whole run counts as long
    /// (default: 30 minutes)
    pub run_threshold: Duration,

    /// Minimum slow executions before a tool becomes a pattern
    /// (default: 3)
    pub min_slow: usize,

    /// Minimum long runs before they become a pattern (default: 2)
    pub min_long_runs: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            default_tool_threshold: Duration::seconds(30),
            tool_thresholds: HashMap::new(),
            run_threshold: Duration::minutes(30),
            min_slow: 3,
            min_long_runs: 2,
        }
    }
}

impl PerformanceConfig {
    fn tool_threshold_ns(&self, tool: &str) -> i64 {
        self.tool_thresholds
            .get(tool)
            .unwrap_or(&self.default_tool_threshold)
            .num_nanoseconds()
            .unwrap_or(i64::MAX)
    }
}

/// One measured tool execution
struct Execution {
    run_id: String,
    called_at: DateTime<Utc>,
    duration_ns: i64,
}

/// Detects slow tools and long runs
pub struct PerformanceDetector {
    event_store: Arc<dyn EventStore>,
    run_store: Arc<dyn RunStore>,
    config: PerformanceConfig,
}

impl PerformanceDetector {
    /// Create a detector with default thresholds
    pub fn new(event_store: Arc<dyn EventStore>, run_store: Arc<dyn RunStore>) -> Self {
        Self::with_config(event_store, run_store, PerformanceConfig::default())
    }

    /// Create a detector with custom thresholds
    pub fn with_config(
        event_store: Arc<dyn EventStore>,
        run_store: Arc<dyn RunStore>,
        config: PerformanceConfig,
    ) -> Self {
        Self {
            event_store,
            run_store,
            config,
        }
    }
}

#[async_trait]
impl PatternDetector for PerformanceDetector {
    fn name(&self) -> &'static str {
        "performance"
    }

    fn pattern_types(&self) -> Vec<PatternType> {
        vec![PatternType::SlowTool, PatternType::LongRuns]
    }

    async fn detect(&self, options: &DetectionOptions) -> PatternResult<Vec<Pattern>> {
        if !wants(options, PatternType::SlowTool) && !wants(options, PatternType::LongRuns) {
            return Ok(Vec::new());
        }

        let corpus = load_corpus(self.event_store.as_ref(), self.run_store.as_ref(), options)
            .await?;

        // Tool → measured executions, in first-seen order
        let mut order: Vec<String> = Vec::new();
        let mut executions: HashMap<String, Vec<Execution>> = HashMap::new();
        let mut long_runs: Vec<(String, DateTime<Utc>, i64)> = Vec::new();

        for run in &corpus {
            // Pair each call with its next terminal event, FIFO per tool
            let mut pending: HashMap<String, VecDeque<DateTime<Utc>>> = HashMap::new();

            for event in &run.events {
                match event.event_type {
                    EventType::ToolCalled => {
                        if let Ok(EventPayload::ToolCalled(p)) = event.decoded_payload() {
                            pending
                                .entry(p.tool_name)
                                .or_default()
                                .push_back(event.timestamp);
                        }
                    }
                    EventType::ToolSucceeded | EventType::ToolFailed => {
                        let tool_name = match event.decoded_payload() {
                            Ok(EventPayload::ToolSucceeded(p)) => Some(p.tool_name),
                            Ok(EventPayload::ToolFailed(p)) => Some(p.tool_name),
                            _ => None,
                        };
                        let Some(tool_name) = tool_name else {
                            continue;
                        };
                        let Some(called_at) = pending
                            .get_mut(&tool_name)
                            .and_then(|queue| queue.pop_front())
                        else {
                            continue;
                        };

                        let entry = executions.entry(tool_name.clone()).or_insert_with(|| {
                            order.push(tool_name);
                            Vec::new()
                        });
                        entry.push(Execution {
                            run_id: run.run_id.clone(),
                            called_at,
                            duration_ns: nanos_between(called_at, event.timestamp),
                        });
                    }
                    _ => {}
                }
            }

            if run.events.len() >= 2 {
                let first = run.events[0].timestamp;
                let last = run.events[run.events.len() - 1].timestamp;
                let span_ns = nanos_between(first, last);
                if span_ns > self.config.run_threshold.num_nanoseconds().unwrap_or(i64::MAX) {
                    long_runs.push((run.run_id.clone(), first, span_ns));
                }
            }
        }

        let mut patterns = Vec::new();

        if wants(options, PatternType::SlowTool) {
            for tool_name in &order {
                let Some(measured) = executions.get(tool_name) else {
                    continue;
                };

                let threshold_ns = self.config.tool_threshold_ns(tool_name);
                let slow: Vec<&Execution> = measured
                    .iter()
                    .filter(|e| e.duration_ns > threshold_ns)
                    .collect();
                if slow.len() < self.config.min_slow {
                    continue;
                }

                let mut durations: Vec<i64> = measured.iter().map(|e| e.duration_ns).collect();
                durations.sort_unstable();
                let average_duration_ns =
                    durations.iter().sum::<i64>() / durations.len() as i64;
                let p90_duration_ns = percentile(&durations, 90.0);

                let mut pattern = Pattern::new(
                    format!("Slow tool: {tool_name}"),
                    format!(
                        "{} of {} executions exceeded the slow threshold",
                        slow.len(),
                        measured.len()
                    ),
                    PatternData::SlowTool {
                        tool_name: tool_name.clone(),
                        average_duration_ns,
                        p90_duration_ns,
                        slow_count: slow.len() as u64,
                    },
                );

                for execution in &slow {
                    pattern.add_evidence(
                        execution.run_id.clone(),
                        execution.called_at,
                        json!({ "duration": execution.duration_ns }),
                    );
                }

                let rate = slow.len() as f64 / measured.len() as f64;
                pattern.confidence =
                    clamp_confidence(0.5 + 0.3 * rate + 0.01 * measured.len() as f64);
                patterns.push(pattern);
            }
        }

        if wants(options, PatternType::LongRuns) && long_runs.len() >= self.config.min_long_runs {
            let average_duration_ns =
                long_runs.iter().map(|(_, _, d)| d).sum::<i64>() / long_runs.len() as i64;

            let mut pattern = Pattern::new(
                "Long runs",
                format!("{} runs exceeded the run duration threshold", long_runs.len()),
                PatternData::LongRuns {
                    average_duration_ns,
                    threshold_ns: self
                        .config
                        .run_threshold
                        .num_nanoseconds()
                        .unwrap_or(i64::MAX),
                    long_run_count: long_runs.len() as u64,
                },
            );

            for (run_id, started_at, duration_ns) in &long_runs {
                pattern.add_evidence(
                    run_id.clone(),
                    *started_at,
                    json!({ "duration": duration_ns }),
                );
            }

            let rate = long_runs.len() as f64 / corpus.len().max(1) as f64;
            pattern.confidence = clamp_confidence(0.5 + 0.3 * rate + 0.01 * corpus.len() as f64);
            patterns.push(pattern);
        }

        debug!(patterns = patterns.len(), "performance detection finished");
        Ok(apply_options(patterns, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::events::payload::{ToolCalled, ToolSucceeded};
    use crate::events::Event;
    use crate::run_store::{InMemoryRunStore, Run};

    fn called(run_id: &str, tool: &str, at: DateTime<Utc>) -> Event {
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

    fn succeeded(run_id: &str, tool: &str, at: DateTime<Utc>) -> Event {
        Event::with_timestamp(
            run_id,
            &EventPayload::ToolSucceeded(ToolSucceeded {
                tool_name: tool.to_string(),
                output: json!(null),
                duration_ns: 0,
                cached: false,
            }),
            at,
        )
        .unwrap()
    }

    async fn stores() -> (Arc<InMemoryEventStore>, Arc<InMemoryRunStore>) {
        (
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryRunStore::new()),
        )
    }

    #[tokio::test]
    async fn slow_executions_surface_with_percentiles() {
        let (event_store, run_store) = stores().await;
        let base = Utc::now();
        run_store.save(&Run::new("run-1", "goal")).await.unwrap();

        let mut events = Vec::new();
        // Three 60s executions (slow), seven 1s executions (fast)
        for i in 0..10 {
            let offset = base + Duration::minutes(2 * i);
            let span = if i < 3 {
                Duration::seconds(60)
            } else {
                Duration::seconds(1)
            };
            events.push(called("run-1", "web_search", offset));
            events.push(succeeded("run-1", "web_search", offset + span));
        }
        event_store.append(events).await.unwrap();

        let detector = PerformanceDetector::new(event_store, run_store);
        let patterns = detector.detect(&DetectionOptions::default()).await.unwrap();

        assert_eq!(patterns.len(), 1);
        match &patterns[0].data {
            PatternData::SlowTool {
                tool_name,
                slow_count,
                p90_duration_ns,
                average_duration_ns,
            } => {
                assert_eq!(tool_name, "web_search");
                assert_eq!(*slow_count, 3);
                assert_eq!(
                    *p90_duration_ns,
                    Duration::seconds(60).num_nanoseconds().unwrap()
                );
                assert!(*average_duration_ns > Duration::seconds(1).num_nanoseconds().unwrap());
            }
            other => panic!("unexpected data: {other:?}"),
        }
        assert_eq!(patterns[0].frequency, 3);
        // 0.5 + 0.3 * 0.3 + 0.01 * 10
        assert!((patterns[0].confidence - 0.69).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unpaired_calls_are_ignored() {
        let (event_store, run_store) = stores().await;
        let base = Utc::now();
        run_store.save(&Run::new("run-1", "goal")).await.unwrap();

        event_store
            .append(vec![
                called("run-1", "web_search", base),
                called("run-1", "web_search", base + Duration::seconds(5)),
                // Terminal pairs with the first call, FIFO
                succeeded("run-1", "web_search", base + Duration::seconds(120)),
            ])
            .await
            .unwrap();

        let detector = PerformanceDetector::new(event_store, run_store);
        let patterns = detector.detect(&DetectionOptions::default()).await.unwrap();

        // One slow execution, below min_slow
        assert!(patterns.is_empty());
    }

    #[tokio::test]
    async fn long_runs_aggregate_into_one_pattern() {
        let (event_store, run_store) = stores().await;
        let base = Utc::now();

        for i in 0..3 {
            let run_id = format!("run-{i}");
            let mut run = Run::new(&run_id, "goal");
            run.start_time = base + Duration::minutes(i);
            run_store.save(&run).await.unwrap();

            let span = if i < 2 {
                Duration::hours(1)
            } else {
                Duration::minutes(5)
            };
            event_store
                .append(vec![
                    called(&run_id, "web_search", run.start_time),
                    succeeded(&run_id, "web_search", run.start_time + span),
                ])
                .await
                .unwrap();
        }

        let detector = PerformanceDetector::new(event_store, run_store);
        let options = DetectionOptions {
            pattern_types: vec![PatternType::LongRuns],
            ..Default::default()
        };
        let patterns = detector.detect(&options).await.unwrap();

        assert_eq!(patterns.len(), 1);
        match &patterns[0].data {
            PatternData::LongRuns {
                long_run_count,
                threshold_ns,
                average_duration_ns,
            } => {
                assert_eq!(*long_run_count, 2);
                assert_eq!(
                    *threshold_ns,
                    Duration::minutes(30).num_nanoseconds().unwrap()
                );
                assert_eq!(
                    *average_duration_ns,
                    Duration::hours(1).num_nanoseconds().unwrap()
                );
            }
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[tokio::test]
    async fn single_event_runs_produce_no_long_run() {
        let (event_store, run_store) = stores().await;
        run_store.save(&Run::new("run-1", "goal")).await.unwrap();
        event_store
            .append(vec![called("run-1", "web_search", Utc::now())])
            .await
            .unwrap();

        let detector = PerformanceDetector::new(event_store, run_store);
        let patterns = detector.detect(&DetectionOptions::default()).await.unwrap();
        assert!(patterns.is_empty());
    }

    #[tokio::test]
    async fn per_tool_threshold_override_applies() {
        let (event_store, run_store) = stores().await;
        let base = Utc::now();
        run_store.save(&Run::new("run-1", "goal")).await.unwrap();

        let mut events = Vec::new();
        for i in 0..3 {
            let offset = base + Duration::minutes(i);
            events.push(called("run-1", "quick_math", offset));
            events.push(succeeded("run-1", "quick_math", offset + Duration::seconds(2)));
        }
        event_store.append(events).await.unwrap();

        let mut config = PerformanceConfig::default();
        config
            .tool_thresholds
            .insert("quick_math".to_string(), Duration::seconds(1));

        let detector = PerformanceDetector::with_config(event_store, run_store, config);
        let patterns = detector.detect(&DetectionOptions::default()).await.unwrap();

        assert_eq!(patterns.len(), 1);
        match &patterns[0].data {
            PatternData::SlowTool { slow_count, .. } => assert_eq!(*slow_count, 3),
            other => panic!("unexpected data: {other:?}"),
        }
    }
}
