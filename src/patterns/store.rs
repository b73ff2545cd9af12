//! Pattern Store Abstraction
//!
//! Optional persistence for detected patterns. Detection itself never
//! requires a pattern store, since detectors return patterns by value, but
//! dashboards and long-horizon analyses keep them here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::PatternResult;
use crate::patterns::{Pattern, PatternType};

/// Sort key for pattern listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternOrder {
    /// Order by earliest occurrence (the default)
    #[default]
    FirstSeen,
    /// Order by latest occurrence
    LastSeen,
    /// Order by occurrence count
    Frequency,
    /// Order by confidence
    Confidence,
}

/// Filter dimensions for pattern listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternFilter {
    /// Keep patterns of any of these types (empty = all)
    #[serde(default)]
    pub pattern_types: Vec<PatternType>,

    /// Keep patterns at or above this confidence (0 = no filter)
    #[serde(default)]
    pub min_confidence: f64,

    /// Keep patterns at or above this frequency (0 = no filter)
    #[serde(default)]
    pub min_frequency: u64,

    /// Keep patterns first seen at or after this instant
    #[serde(default)]
    pub from_time: Option<DateTime<Utc>>,

    /// Keep patterns first seen at or before this instant
    #[serde(default)]
    pub to_time: Option<DateTime<Utc>>,

    /// Keep patterns observed in this run
    #[serde(default)]
    pub run_id: Option<String>,

    /// Cap the result list (0 = unbounded)
    #[serde(default)]
    pub limit: usize,

    /// Skip this many matching patterns first
    #[serde(default)]
    pub offset: usize,

    /// Sort key
    #[serde(default)]
    pub order_by: PatternOrder,

    /// Reverse the sort direction
    #[serde(default)]
    pub descending: bool,
}

impl PatternFilter {
    /// Whether a pattern passes every filter dimension
    pub fn matches(&self, pattern: &Pattern) -> bool {
        if !self.pattern_types.is_empty() && !self.pattern_types.contains(&pattern.pattern_type)
        {
            return false;
        }
        if pattern.confidence < self.min_confidence {
            return false;
        }
        if pattern.frequency < self.min_frequency {
            return false;
        }
        if let Some(from) = self.from_time {
            if pattern.first_seen < from {
                return false;
            }
        }
        if let Some(to) = self.to_time {
            if pattern.first_seen > to {
                return false;
            }
        }
        if let Some(run_id) = &self.run_id {
            if !pattern.run_ids.contains(run_id) {
                return false;
            }
        }
        true
    }
}

/// Aggregate totals over a filtered pattern set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    /// Patterns matching the filter
    pub total: u64,

    /// Matching patterns per type, as (type, count) in type order
    pub by_type: Vec<(PatternType, u64)>,

    /// Mean confidence of matching patterns; `None` when empty
    pub average_confidence: Option<f64>,
}

/// Pattern store contract
#[async_trait]
pub trait PatternStore: Send + Sync {
    /// Insert a new pattern
    ///
    /// Empty name or out-of-range confidence fails with `InvalidPattern`;
    /// a duplicate id with `PatternExists`.
    async fn save(&self, pattern: &Pattern) -> PatternResult<()>;

    /// Fetch a pattern by id, or `PatternNotFound`
    async fn get(&self, id: &uuid::Uuid) -> PatternResult<Pattern>;

    /// Replace a pattern wholesale by id, or `PatternNotFound`
    async fn update(&self, pattern: &Pattern) -> PatternResult<()>;

    /// Remove a pattern by id, or `PatternNotFound`
    async fn delete(&self, id: &uuid::Uuid) -> PatternResult<()>;

    /// List patterns matching the filter, sorted and paginated
    async fn list(&self, filter: &PatternFilter) -> PatternResult<Vec<Pattern>>;

    /// Count patterns matching the filter, ignoring limit and offset
    async fn count(&self, filter: &PatternFilter) -> PatternResult<u64>;

    /// Summary aggregation, when the backend supports it
    fn as_summary(&self) -> Option<&dyn PatternSummarizer> {
        None
    }
}

/// Optional capability: aggregate totals over a filtered pattern set
#[async_trait]
pub trait PatternSummarizer: Send + Sync {
    /// Compute totals per type and the mean confidence
    async fn summarize(&self, filter: &PatternFilter) -> PatternResult<PatternSummary>;
}
