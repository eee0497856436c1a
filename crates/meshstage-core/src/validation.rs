//! # Validation Module
//!
//! Input validation for stage names, account ids and resource identifiers.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Config load (EngineConfig::validate)                         │
//! │  ├── Stage names, allow-list, local account                            │
//! │  └── Fails the cold start                                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Notification parsing (TagChangeEvent)                        │
//! │  └── THIS MODULE: stage label value, resource id                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Admission policy                                             │
//! │  └── Grant names must exactly match a configured stage                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use meshstage_core::validation::{normalize_stage_name, validate_account_id};
//!
//! assert_eq!(normalize_stage_name(" Beta ").unwrap(), "beta");
//! assert!(validate_account_id("111122223333").is_ok());
//! ```

use crate::error::ValidationError;
use crate::MAX_STAGE_NAME_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Stage Names
// =============================================================================

/// Trims and case-folds a stage name, then validates it.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 64 characters
/// - Only ASCII alphanumerics, `-` and `_`
pub fn normalize_stage_name(raw: &str) -> ValidationResult<String> {
    let name = raw.trim().to_lowercase();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "stage".to_string(),
        });
    }

    if name.len() > MAX_STAGE_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "stage".to_string(),
            max: MAX_STAGE_NAME_LEN,
        });
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(ValidationError::InvalidFormat {
            field: "stage".to_string(),
            reason: format!("unexpected character '{}'", bad),
        });
    }

    Ok(name)
}

// =============================================================================
// Identifiers
// =============================================================================

/// Validates an account identifier.
///
/// Account ids are opaque to the engine; only emptiness and whitespace are
/// rejected.
pub fn validate_account_id(account: &str) -> ValidationResult<()> {
    if account.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "account".to_string(),
        });
    }

    if account.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "account".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates a resource identifier extracted from a notification.
pub fn validate_resource_id(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "resource id".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_is_case_folded() {
        assert_eq!(normalize_stage_name("PROD").unwrap(), "prod");
        assert_eq!(normalize_stage_name("  Beta-2 ").unwrap(), "beta-2");
    }

    #[test]
    fn test_stage_name_rejects_empty() {
        assert!(matches!(
            normalize_stage_name("   "),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_stage_name_rejects_bad_characters() {
        assert!(matches!(
            normalize_stage_name("pre prod"),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(normalize_stage_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_account_id() {
        assert!(validate_account_id("111122223333").is_ok());
        assert!(validate_account_id("").is_err());
        assert!(validate_account_id("1111 2222").is_err());
    }
}
