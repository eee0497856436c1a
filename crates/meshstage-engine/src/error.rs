//! # Engine Error Types
//!
//! Error types for backend calls and reconciliation.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Reconciliation Error Categories                     │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Policy skip    │  │ Not yet         │  │ Configuration fatal     │ │
//! │  │                 │  │ consistent      │  │                         │ │
//! │  │  PolicySkip     │  │ NotYetConsistent│  │ InvalidConfig           │ │
//! │  │  (logged, left  │  │ (retried, then  │  │ StageNotRegistered      │ │
//! │  │   pending)      │  │  accepted)      │  │ InvalidEvent            │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌───────────────────────────────────────────────┐ │
//! │  │ Timeout fatal   │  │ Backend                                       │ │
//! │  │                 │  │                                               │ │
//! │  │ DeletionTimeout │  │ Client (ClientError) • Store • Concurrent     │ │
//! │  └─────────────────┘  └───────────────────────────────────────────────┘ │
//! │                                                                         │
//! │  Batch phases record these per item; a transition aborts on the first. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use meshstage_core::{CoreError, PolicySkip};
use meshstage_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Client Error
// =============================================================================

/// Result type alias for control plane / directory calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Failure of a single control plane or directory call.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The addressed object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend asked us to slow down (HTTP 429).
    #[error("Throttled: {0}")]
    Throttled(String),

    /// Transport failure, timeout or 5xx.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the request (4xx other than 404/429).
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("Failed to decode response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Returns true if the same call may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Throttled(_) | ClientError::Unavailable(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else {
            ClientError::Unavailable(err.to_string())
        }
    }
}

// =============================================================================
// Error Category
// =============================================================================

/// How a failure is handled by the surrounding invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Admission check failed; logged, never retried.
    PolicySkip,
    /// Eventual-consistency gap; expected to self-heal next sweep.
    NotYetConsistent,
    /// Required mapping or input missing; aborts the invocation.
    ConfigurationFatal,
    /// Bounded wait exceeded; aborts and leaves repair to a later run.
    TimeoutFatal,
    /// Control plane, directory or store failure.
    Backend,
}

// =============================================================================
// Engine Error
// =============================================================================

/// Result type alias for reconciliation operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Reconciliation failure.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Skips
    // =========================================================================
    /// Admission policy rejected a grant.
    #[error("Policy skip: {0}")]
    Policy(PolicySkip),

    /// Backend state has not caught up yet.
    #[error("Not yet consistent: {0}")]
    NotYetConsistent(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to read the config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// No network is registered for the stage a transition targets.
    #[error("No network registered for stage '{stage}'")]
    StageNotRegistered { stage: String },

    /// The notification could not be interpreted.
    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] CoreError),

    /// The resource kind could not be determined from the event.
    #[error("Cannot determine resource kind of {resource}")]
    UnknownResourceKind { resource: String },

    // =========================================================================
    // Timeouts
    // =========================================================================
    /// A deleted association never reported absent.
    #[error("Association {association_id} still present after {waited_secs}s")]
    DeletionTimeout {
        association_id: String,
        waited_secs: u64,
    },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// Control plane or directory call failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Config store call failed.
    #[error("Config store error: {0}")]
    Store(#[from] StoreError),

    /// Another transition for the same resource changed its stage pointer.
    #[error("Concurrent transition detected for {resource}: {detail}")]
    ConcurrentTransition { resource: String, detail: String },
}

impl EngineError {
    /// Classifies the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Policy(_) => ErrorCategory::PolicySkip,
            EngineError::NotYetConsistent(_) => ErrorCategory::NotYetConsistent,
            EngineError::InvalidConfig(_)
            | EngineError::ConfigLoadFailed(_)
            | EngineError::StageNotRegistered { .. }
            | EngineError::InvalidEvent(_)
            | EngineError::UnknownResourceKind { .. } => ErrorCategory::ConfigurationFatal,
            EngineError::DeletionTimeout { .. } => ErrorCategory::TimeoutFatal,
            EngineError::Client(_)
            | EngineError::Store(_)
            | EngineError::ConcurrentTransition { .. } => ErrorCategory::Backend,
        }
    }

    /// Returns true if the error aborts the invocation it occurs in.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::PolicySkip | ErrorCategory::NotYetConsistent
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        self.category() == ErrorCategory::ConfigurationFatal
    }
}

impl From<PolicySkip> for EngineError {
    fn from(skip: PolicySkip) -> Self {
        EngineError::Policy(skip)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<url::ParseError> for EngineError {
    fn from(err: url::ParseError) -> Self {
        EngineError::InvalidConfig(format!("invalid URL: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_client_errors() {
        assert!(ClientError::Throttled("slow down".into()).is_retryable());
        assert!(ClientError::Unavailable("503".into()).is_retryable());
        assert!(!ClientError::NotFound("a-1".into()).is_retryable());
        assert!(!ClientError::Rejected {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_categories() {
        let skip = EngineError::Policy(PolicySkip::UnknownStage {
            name: "gamma".into(),
        });
        assert_eq!(skip.category(), ErrorCategory::PolicySkip);
        assert!(!skip.is_fatal());

        let missing = EngineError::StageNotRegistered {
            stage: "beta".into(),
        };
        assert!(missing.is_fatal());
        assert!(missing.is_config_error());

        let timeout = EngineError::DeletionTimeout {
            association_id: "a-1".into(),
            waited_secs: 60,
        };
        assert_eq!(timeout.category(), ErrorCategory::TimeoutFatal);
        assert!(timeout.to_string().contains("a-1"));
    }
}
