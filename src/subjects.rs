//! NATS subject hierarchy for live event streaming
//!
//! Defines the subject patterns the streaming adapter publishes run
//! events on.
//!
//! # Subject Pattern
//!
//! All run events follow the hierarchical pattern:
//!
//! ```text
//! agents.events.{run_id}.{event_type}
//! ```
//!
//! This allows for:
//! - Precise subscriptions (`agents.events.run-1.tool_called`)
//! - Run-level wildcards (`agents.events.run-1.>`)
//! - Global subscriptions (`agents.events.>`)
//!
//! Event type names keep their dotted form everywhere else in the crate;
//! on subjects the dot becomes an underscore so it cannot introduce an
//! extra hierarchy level. Run ids are sanitized the same way.

use crate::events::EventType;

/// Root namespace for all run event subjects
pub const EVENTS_ROOT: &str = "agents.events";

/// Subject token for an event type (`run.started` → `run_started`)
pub fn event_type_token(event_type: EventType) -> String {
    event_type.as_str().replace('.', "_")
}

/// Sanitize a run id into a single subject token
pub fn run_token(run_id: &str) -> String {
    run_id
        .chars()
        .map(|c| match c {
            '.' | ' ' | '*' | '>' => '_',
            other => other,
        })
        .collect()
}

/// Builder for run event subjects
#[derive(Debug, Clone, Default)]
pub struct SubjectBuilder {
    run_id: Option<String>,
    event_type: Option<EventType>,
}

impl SubjectBuilder {
    /// Create a new subject builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run id
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Set the event type
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Build the complete subject string
    ///
    /// Returns `None` unless both parts are set; partial subjects are
    /// only available as wildcards through
    /// [`build_wildcard`](Self::build_wildcard).
    pub fn build(self) -> Option<String> {
        let run_id = self.run_id?;
        let event_type = self.event_type?;
        Some(format!(
            "{}.{}.{}",
            EVENTS_ROOT,
            run_token(&run_id),
            event_type_token(event_type)
        ))
    }

    /// Build a wildcard subscription for every event of a run
    ///
    /// Returns `agents.events.{run_id}.>`; without a run id, the global
    /// `agents.events.>`.
    pub fn build_wildcard(self) -> String {
        match self.run_id {
            Some(run_id) => format!("{}.{}.>", EVENTS_ROOT, run_token(&run_id)),
            None => format!("{EVENTS_ROOT}.>"),
        }
    }
}

/// Subject for one concrete event
pub fn event_subject(run_id: &str, event_type: EventType) -> String {
    format!(
        "{}.{}.{}",
        EVENTS_ROOT,
        run_token(run_id),
        event_type_token(event_type)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_follow_the_hierarchy() {
        assert_eq!(
            event_subject("run-1", EventType::ToolCalled),
            "agents.events.run-1.tool_called"
        );

        let built = SubjectBuilder::new()
            .run_id("run-1")
            .event_type(EventType::RunStarted)
            .build();
        assert_eq!(built.as_deref(), Some("agents.events.run-1.run_started"));
    }

    #[test]
    fn wildcards_cover_run_and_global_scopes() {
        assert_eq!(
            SubjectBuilder::new().run_id("run-1").build_wildcard(),
            "agents.events.run-1.>"
        );
        assert_eq!(SubjectBuilder::new().build_wildcard(), "agents.events.>");
    }

    #[test]
    fn tokens_cannot_break_the_hierarchy() {
        assert_eq!(run_token("run.2024 batch*>"), "run_2024_batch__");
        assert_eq!(
            event_subject("run.1", EventType::StateTransitioned),
            "agents.events.run_1.state_transitioned"
        );
    }

    #[test]
    fn build_requires_both_parts() {
        assert!(SubjectBuilder::new().run_id("run-1").build().is_none());
        assert!(SubjectBuilder::new()
            .event_type(EventType::RunStarted)
            .build()
            .is_none());
    }
}
