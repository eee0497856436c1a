//! # Invocation Outcomes
//!
//! Every sweep phase and every event invocation ends with an
//! [`InvocationOutcome`] the surrounding system can alert on.
//!
//! ## Status Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Outcome Status                                      │
//! │                                                                         │
//! │  fatal error?                         → Failed                         │
//! │  failures, nothing processed          → Failed                         │
//! │  failures, something processed       → Partial                        │
//! │  nothing processed, no failures       → NoOp                           │
//! │  otherwise                            → Succeeded                      │
//! │                                                                         │
//! │  Skips (policy, not-yet-consistent) never change the status.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal status of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Succeeded,
    NoOp,
    Partial,
    Failed,
}

impl OutcomeStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, OutcomeStatus::Failed)
    }
}

/// An item that was intentionally left alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub id: String,
    pub reason: String,
}

/// An item whose processing failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub id: String,
    pub error: String,
}

/// Terminal report of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationOutcome {
    pub invocation_id: Uuid,
    pub operation: String,
    pub status: OutcomeStatus,
    pub processed: Vec<String>,
    pub skipped: Vec<SkippedItem>,
    pub failures: Vec<FailedItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl InvocationOutcome {
    /// Starts a new outcome for `operation`.
    pub fn new(operation: impl Into<String>) -> Self {
        InvocationOutcome {
            invocation_id: Uuid::new_v4(),
            operation: operation.into(),
            status: OutcomeStatus::NoOp,
            processed: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            message: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Records an id the invocation acted on.
    pub fn processed(&mut self, id: impl Into<String>) {
        self.processed.push(id.into());
    }

    pub fn skip(&mut self, id: impl Into<String>, reason: impl ToString) {
        self.skipped.push(SkippedItem {
            id: id.into(),
            reason: reason.to_string(),
        });
    }

    pub fn fail(&mut self, id: impl Into<String>, error: impl ToString) {
        self.failures.push(FailedItem {
            id: id.into(),
            error: error.to_string(),
        });
    }

    /// Resolves the status from the recorded items and stamps the end time.
    pub fn finish(mut self) -> Self {
        self.status = match (self.processed.is_empty(), self.failures.is_empty()) {
            (true, false) => OutcomeStatus::Failed,
            (false, false) => OutcomeStatus::Partial,
            (true, true) => OutcomeStatus::NoOp,
            (false, true) => OutcomeStatus::Succeeded,
        };
        self.finished_at = Some(Utc::now());
        self
    }

    /// Marks the invocation as aborted by a fatal error.
    pub fn failed(mut self, error: impl ToString) -> Self {
        self.status = OutcomeStatus::Failed;
        self.message = Some(error.to_string());
        self.finished_at = Some(Utc::now());
        self
    }

    /// Sets a human-readable summary.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_resolution() {
        let noop = InvocationOutcome::new("converge").finish();
        assert_eq!(noop.status, OutcomeStatus::NoOp);

        let mut ok = InvocationOutcome::new("converge");
        ok.processed("svc-1");
        ok.skip("grant-x", "unknown stage");
        assert_eq!(ok.finish().status, OutcomeStatus::Succeeded);

        let mut partial = InvocationOutcome::new("prune");
        partial.processed("a-1");
        partial.fail("a-2", "throttled");
        assert_eq!(partial.finish().status, OutcomeStatus::Partial);

        let mut failed = InvocationOutcome::new("prune");
        failed.fail("a-2", "throttled");
        assert_eq!(failed.finish().status, OutcomeStatus::Failed);
    }

    #[test]
    fn test_fatal_overrides_processed() {
        let mut outcome = InvocationOutcome::new("transition");
        outcome.processed("a-1");
        let outcome = outcome.failed("deletion not confirmed");
        assert!(outcome.status.is_failure());
        assert_eq!(outcome.message.as_deref(), Some("deletion not confirmed"));
        assert!(outcome.finished_at.is_some());
    }
}
