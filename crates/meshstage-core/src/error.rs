//! # Error Types
//!
//! Domain-specific error types for meshstage-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  meshstage-core errors (this file)                                     │
//! │  ├── CoreError        - Malformed notifications, registry documents    │
//! │  └── ValidationError  - Field-level input validation failures          │
//! │                                                                         │
//! │  meshstage-store errors (separate crate)                               │
//! │  └── StoreError       - Config store failures                          │
//! │                                                                         │
//! │  meshstage-engine errors (separate crate)                              │
//! │  ├── ClientError      - Control plane / directory call failures        │
//! │  └── EngineError      - Categorised reconciliation failures            │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → InvocationOutcome   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors raised while interpreting external input.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A change notification could not be interpreted.
    ///
    /// ## When This Occurs
    /// - Notification has neither a `resources` list nor a `requestParameters` block
    /// - The resource list is empty
    /// - The tag set is not an object / list of key-value pairs
    #[error("Invalid notification: {reason}")]
    InvalidNotification { reason: String },

    /// The persisted stage registry document is not a JSON object of strings.
    #[error("Invalid stage registry document: {0}")]
    InvalidRegistry(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InvalidNotification error.
    pub fn notification(reason: impl Into<String>) -> Self {
        CoreError::InvalidNotification {
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidRegistry(err.to_string())
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when configuration or notification values don't meet
/// requirements. Used for early validation before any backend call runs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., stage name with spaces).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
