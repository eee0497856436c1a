//! # Store Error Types
//!
//! Error types for config store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        Registry JSON (CoreError)           │
//! │       │                                   │                             │
//! │       └──────────────┬────────────────────┘                             │
//! │                      ▼                                                  │
//! │  StoreError (this module) ← Adds context and categorization            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  EngineError::Store (meshstage-engine) ← Backend failure for a phase   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use meshstage_core::CoreError;
use thiserror::Error;

/// Config store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Parameter not found.
    #[error("Parameter not found: {0}")]
    NotFound(String),

    /// A conditional write saw a different current value.
    ///
    /// ## When This Occurs
    /// - Another invocation updated the same stage pointer between this
    ///   invocation's read and its write
    #[error("Conditional write on {name} failed: expected {expected:?}, found {actual:?}")]
    ConditionFailed {
        name: String,
        expected: Option<String>,
        actual: Option<String>,
    },

    /// A stored value could not be decoded.
    #[error("Corrupt value for {name}: {reason}")]
    Corrupt { name: String, reason: String },

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal store error.
    #[error("Internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Creates a Corrupt error for a parameter.
    pub fn corrupt(name: impl Into<String>, reason: impl ToString) -> Self {
        StoreError::Corrupt {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::PoolExhausted | StoreError::ConnectionFailed(_)
        )
    }
}

/// Convert sqlx errors to StoreError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → StoreError::NotFound
/// sqlx::Error::Database       → StoreError::QueryFailed
/// sqlx::Error::PoolTimedOut   → StoreError::PoolExhausted
/// Other                       → StoreError::Internal
/// ```
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("unknown".to_string()),
            sqlx::Error::Database(db_err) => StoreError::QueryFailed(db_err.message().to_string()),
            sqlx::Error::PoolTimedOut => StoreError::PoolExhausted,
            sqlx::Error::PoolClosed => StoreError::ConnectionFailed("Pool is closed".to_string()),
            _ => StoreError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        StoreError::Corrupt {
            name: "stage registry".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::PoolExhausted.is_transient());
        assert!(!StoreError::corrupt("k", "bad json").is_transient());
    }
}
