//! Detected Behavioral Patterns
//!
//! Patterns are the output of the detection pipeline: descriptions of
//! recurring behavior across runs, each with a confidence score, an
//! occurrence count, and per-occurrence evidence.
//!
//! The type-specific payload is a closed union ([`PatternData`]), one
//! variant per [`PatternType`], so a pattern's data always has exactly
//! the shape its type mandates. The open `metadata` map is reserved for
//! caller-supplied tags.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::PatternError;

pub mod memory;
pub mod store;

pub use memory::InMemoryPatternStore;
pub use store::{PatternFilter, PatternOrder, PatternStore, PatternSummary};

/// Closed set of pattern types the pipeline can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Recurring contiguous tool-call subsequence
    ToolSequence,
    /// Immediately repeating state subsequence
    StateLoop,
    /// Recurring tool failure class
    ToolFailure,
    /// Budget exhaustion behavior
    BudgetExhaustion,
    /// Tool executions exceeding their duration threshold
    SlowTool,
    /// Whole-run durations exceeding the run threshold
    LongRuns,
    /// Tool calls failing on timeouts
    Timeout,
    /// Per-run cost outliers
    CostAnomaly,
    /// Approvals waiting longer than the delay threshold
    ApprovalDelay,
    /// Tool usage skew against a uniform baseline
    ToolPreference,
}

impl PatternType {
    /// All pattern types, in declaration order
    pub const ALL: [PatternType; 10] = [
        PatternType::ToolSequence,
        PatternType::StateLoop,
        PatternType::ToolFailure,
        PatternType::BudgetExhaustion,
        PatternType::SlowTool,
        PatternType::LongRuns,
        PatternType::Timeout,
        PatternType::CostAnomaly,
        PatternType::ApprovalDelay,
        PatternType::ToolPreference,
    ];

    /// Canonical snake_case name of the pattern type
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::ToolSequence => "tool_sequence",
            PatternType::StateLoop => "state_loop",
            PatternType::ToolFailure => "tool_failure",
            PatternType::BudgetExhaustion => "budget_exhaustion",
            PatternType::SlowTool => "slow_tool",
            PatternType::LongRuns => "long_runs",
            PatternType::Timeout => "timeout",
            PatternType::CostAnomaly => "cost_anomaly",
            PatternType::ApprovalDelay => "approval_delay",
            PatternType::ToolPreference => "tool_preference",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternType {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PatternType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| PatternError::InvalidPatternType(s.to_string()))
    }
}

/// Direction of a metric over the observation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    /// Metric is rising
    Increasing,
    /// Metric is falling
    Decreasing,
    /// No clear movement
    Stable,
}

/// Cost dimension analyzed by the cost anomaly detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostType {
    /// Number of tool invocations per run
    ToolCalls,
    /// Token units charged per run
    Tokens,
    /// API call units charged per run
    ApiCalls,
}

impl fmt::Display for CostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CostType::ToolCalls => "tool_calls",
            CostType::Tokens => "tokens",
            CostType::ApiCalls => "api_calls",
        };
        f.write_str(s)
    }
}

/// Usage skew classification for the tool preference detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferenceType {
    /// Used far more than the uniform expectation
    Overused,
    /// Used far less than the uniform expectation
    Underused,
}

/// Type-specific pattern payload, one variant per [`PatternType`]
///
/// Durations travel as integer nanoseconds, matching the event wire
/// format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PatternData {
    /// Recurring contiguous tool-call subsequence
    ToolSequence {
        /// Tool names in call order
        sequence: Vec<String>,
        /// Mean gap between consecutive calls, in nanoseconds
        #[serde(rename = "average_gap")]
        average_gap_ns: i64,
    },

    /// Immediately repeating state subsequence
    StateLoop {
        /// The repeating states, one iteration
        #[serde(rename = "loop")]
        states: Vec<String>,
        /// Typical consecutive repetitions per occurrence
        iterations: u64,
        /// State entered after the loop breaks
        exit_state: String,
    },

    /// Recurring tool failure class
    ToolFailure {
        /// Failing tool
        tool_name: String,
        /// Derived error class
        error_type: String,
        /// Failures observed in the class
        error_count: u64,
    },

    /// Budget exhaustion behavior
    ///
    /// The failure detector fills only `exhaustion_count`; the extended
    /// budget detector fills every field.
    BudgetExhaustion {
        /// Budget the statistics describe; absent for the aggregate form
        #[serde(default, skip_serializing_if = "Option::is_none")]
        budget_name: Option<String>,
        /// Exhaustion events observed
        exhaustion_count: u64,
        /// Runs that crossed the warning ratio without exhausting
        #[serde(default)]
        near_miss_count: u64,
        /// Runs considered
        #[serde(default)]
        total_runs: u64,
        /// Exhausted runs / total runs
        #[serde(default)]
        exhaustion_rate: f64,
        /// Mean final usage ratio across runs
        #[serde(default)]
        avg_usage_ratio: f64,
        /// Exhaustion frequency trend
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trend: Option<TrendDirection>,
        /// Operator-facing recommendation
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recommendation: Option<String>,
    },

    /// Tool executions exceeding their duration threshold
    SlowTool {
        /// Slow tool
        tool_name: String,
        /// Mean execution duration, in nanoseconds
        #[serde(rename = "average_duration")]
        average_duration_ns: i64,
        /// 90th percentile execution duration, in nanoseconds
        #[serde(rename = "p90_duration")]
        p90_duration_ns: i64,
        /// Executions over the threshold
        slow_count: u64,
    },

    /// Whole-run durations exceeding the run threshold
    LongRuns {
        /// Mean run duration, in nanoseconds
        #[serde(rename = "average_duration")]
        average_duration_ns: i64,
        /// Threshold the runs exceeded, in nanoseconds
        #[serde(rename = "threshold")]
        threshold_ns: i64,
        /// Runs over the threshold
        long_run_count: u64,
    },

    /// Tool calls failing on timeouts
    Timeout {
        /// Timing-out tool
        tool_name: String,
        /// Timeout failures observed
        timeout_count: u64,
        /// All calls of the tool
        total_calls: u64,
        /// timeout_count / total_calls
        timeout_rate: f64,
        /// Mean duration of the timed-out calls, in nanoseconds
        #[serde(rename = "avg_duration")]
        avg_duration_ns: i64,
    },

    /// Per-run cost outliers
    CostAnomaly {
        /// Dimension the statistics describe
        cost_type: CostType,
        /// Mean per-run cost
        average_cost: f64,
        /// Mean cost of the flagged runs
        anomaly_cost: f64,
        /// Mean |z-score| of the flagged runs
        deviation: f64,
        /// Flagged runs
        anomaly_count: u64,
        /// Cost trend across the window
        #[serde(rename = "trend_dir")]
        trend: TrendDirection,
    },

    /// Approvals waiting longer than the delay threshold
    ApprovalDelay {
        /// Tool awaiting consent
        tool_name: String,
        /// Agent state at request time
        state: String,
        /// Mean wait of resolved requests, in nanoseconds
        #[serde(rename = "average_wait_time")]
        average_wait_ns: i64,
        /// Longest wait of resolved requests, in nanoseconds
        #[serde(rename = "max_wait_time")]
        max_wait_ns: i64,
        /// Requests never resolved
        pending_count: u64,
        /// Resolved requests
        total_approvals: u64,
        /// Granted / resolved
        approval_rate: f64,
    },

    /// Tool usage skew against a uniform baseline
    ToolPreference {
        /// Skewed tool
        tool_name: String,
        /// Calls observed
        usage_count: u64,
        /// Calls expected under uniform usage
        expected_usage: f64,
        /// usage_count / expected_usage
        usage_ratio: f64,
        /// Direction of the skew
        #[serde(rename = "preference_type")]
        preference: PreferenceType,
        /// Successful calls / finished calls
        success_rate: f64,
        /// States the tool was called from
        available_states: Vec<String>,
    },
}

impl PatternData {
    /// Pattern type this payload belongs to
    pub fn pattern_type(&self) -> PatternType {
        match self {
            PatternData::ToolSequence { .. } => PatternType::ToolSequence,
            PatternData::StateLoop { .. } => PatternType::StateLoop,
            PatternData::ToolFailure { .. } => PatternType::ToolFailure,
            PatternData::BudgetExhaustion { .. } => PatternType::BudgetExhaustion,
            PatternData::SlowTool { .. } => PatternType::SlowTool,
            PatternData::LongRuns { .. } => PatternType::LongRuns,
            PatternData::Timeout { .. } => PatternType::Timeout,
            PatternData::CostAnomaly { .. } => PatternType::CostAnomaly,
            PatternData::ApprovalDelay { .. } => PatternType::ApprovalDelay,
            PatternData::ToolPreference { .. } => PatternType::ToolPreference,
        }
    }
}

/// One per-occurrence record backing a pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEvidence {
    /// Run the occurrence was observed in
    pub run_id: String,

    /// When the occurrence happened
    pub timestamp: DateTime<Utc>,

    /// Free-form occurrence detail
    pub details: Value,
}

/// A detected behavioral regularity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Synthetic handle, fresh per detection
    pub id: Uuid,

    /// Pattern type discriminator; always matches `data`
    #[serde(rename = "type")]
    pub pattern_type: PatternType,

    /// Human-readable name
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Detector confidence in [0, 1]
    pub confidence: f64,

    /// Occurrence count; always equals `evidence.len()`
    pub frequency: u64,

    /// Earliest observed occurrence
    pub first_seen: DateTime<Utc>,

    /// Latest observed occurrence
    pub last_seen: DateTime<Utc>,

    /// Distinct runs the pattern was observed in
    pub run_ids: Vec<String>,

    /// Per-occurrence evidence
    pub evidence: Vec<PatternEvidence>,

    /// Type-specific payload
    pub data: PatternData,

    /// Caller-supplied tags
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Pattern {
    /// Construct an empty pattern around a typed payload
    ///
    /// The type discriminator is derived from the payload, so the two can
    /// never disagree. Evidence starts empty; the seen window is stamped
    /// by the first [`add_evidence`](Self::add_evidence).
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        data: PatternData,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            pattern_type: data.pattern_type(),
            name: name.into(),
            description: description.into(),
            confidence: 0.0,
            frequency: 0,
            first_seen: now,
            last_seen: now,
            run_ids: Vec::new(),
            evidence: Vec::new(),
            data,
            metadata: HashMap::new(),
        }
    }

    /// Record one occurrence
    ///
    /// Frequency tracks the evidence length, `run_ids` stays deduplicated,
    /// and the seen window only widens: the first occurrence stamps both
    /// ends, later ones move `last_seen` forward without touching
    /// `first_seen` (unless the occurrence predates it).
    pub fn add_evidence(
        &mut self,
        run_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        details: Value,
    ) {
        let run_id = run_id.into();

        if self.evidence.is_empty() {
            self.first_seen = timestamp;
            self.last_seen = timestamp;
        } else {
            self.first_seen = self.first_seen.min(timestamp);
            self.last_seen = self.last_seen.max(timestamp);
        }

        if !self.run_ids.contains(&run_id) {
            self.run_ids.push(run_id.clone());
        }

        self.evidence.push(PatternEvidence {
            run_id,
            timestamp,
            details,
        });
        self.frequency = self.evidence.len() as u64;
    }

    /// Whether two patterns describe the same finding
    ///
    /// Ids are synthetic handles regenerated every detection; finding
    /// identity is type + name + description + data.
    pub fn is_same_finding(&self, other: &Pattern) -> bool {
        self.pattern_type == other.pattern_type
            && self.name == other.name
            && self.description == other.description
            && self.data == other.data
    }
}

/// Options uniformly recognized by every detector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionOptions {
    /// Restrict to these runs (empty = all); intersects the time filter
    #[serde(default)]
    pub run_ids: Vec<String>,

    /// Keep runs started at or after this instant
    #[serde(default)]
    pub from_time: Option<DateTime<Utc>>,

    /// Keep runs started at or before this instant
    #[serde(default)]
    pub to_time: Option<DateTime<Utc>>,

    /// Drop patterns below this confidence (0 = no filter)
    #[serde(default)]
    pub min_confidence: f64,

    /// Drop patterns below this frequency (0 = no filter)
    #[serde(default)]
    pub min_frequency: u64,

    /// Restrict which pattern types to compute (empty = all)
    #[serde(default)]
    pub pattern_types: Vec<PatternType>,

    /// Cap the returned list (0 = unbounded)
    #[serde(default)]
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn sample_data() -> PatternData {
        PatternData::ToolFailure {
            tool_name: "web_search".to_string(),
            error_type: "timeout".to_string(),
            error_count: 4,
        }
    }

    #[test]
    fn pattern_type_round_trips_through_str() {
        for pattern_type in PatternType::ALL {
            let parsed: PatternType = pattern_type.as_str().parse().unwrap();
            assert_eq!(parsed, pattern_type);
        }
    }

    #[test]
    fn unknown_pattern_type_is_rejected() {
        let result = "tool_meltdown".parse::<PatternType>();
        assert!(matches!(result, Err(PatternError::InvalidPatternType(_))));
    }

    #[test]
    fn new_pattern_derives_type_from_data() {
        let pattern = Pattern::new("web_search timeouts", "timeouts cluster", sample_data());
        assert_eq!(pattern.pattern_type, PatternType::ToolFailure);
        assert_eq!(pattern.frequency, 0);
        assert!(pattern.evidence.is_empty());
    }

    #[test]
    fn add_evidence_maintains_counters_and_window() {
        let mut pattern = Pattern::new("n", "d", sample_data());
        let base = Utc::now();

        pattern.add_evidence("run-1", base, json!({}));
        assert_eq!(pattern.first_seen, base);
        assert_eq!(pattern.last_seen, base);

        pattern.add_evidence("run-2", base + Duration::minutes(5), json!({}));
        pattern.add_evidence("run-1", base + Duration::minutes(2), json!({}));

        assert_eq!(pattern.frequency, 3);
        assert_eq!(pattern.evidence.len(), 3);
        assert_eq!(pattern.run_ids, vec!["run-1", "run-2"]);
        assert_eq!(pattern.first_seen, base);
        assert_eq!(pattern.last_seen, base + Duration::minutes(5));
    }

    #[test]
    fn finding_identity_ignores_ids_and_evidence() {
        let mut a = Pattern::new("n", "d", sample_data());
        let b = Pattern::new("n", "d", sample_data());
        a.add_evidence("run-1", Utc::now(), json!({}));

        assert_ne!(a.id, b.id);
        assert!(a.is_same_finding(&b));

        let c = Pattern::new("other", "d", sample_data());
        assert!(!a.is_same_finding(&c));
    }

    #[test]
    fn pattern_round_trips_through_json() {
        let mut pattern = Pattern::new(
            "slow web_search",
            "p90 over threshold",
            PatternData::SlowTool {
                tool_name: "web_search".to_string(),
                average_duration_ns: 2_000_000_000,
                p90_duration_ns: 5_000_000_000,
                slow_count: 7,
            },
        );
        pattern.add_evidence("run-1", Utc::now(), json!({"duration": 5_000_000_000i64}));
        pattern.confidence = 0.82;

        let encoded = serde_json::to_string(&pattern).unwrap();
        let decoded: Pattern = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, pattern);
    }

    #[test]
    fn detection_options_round_trip_through_json() {
        let options = DetectionOptions {
            run_ids: vec!["run-1".to_string()],
            min_confidence: 0.5,
            pattern_types: vec![PatternType::StateLoop, PatternType::CostAnomaly],
            limit: 10,
            ..Default::default()
        };

        let encoded = serde_json::to_string(&options).unwrap();
        let decoded: DetectionOptions = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, options);
    }
}
