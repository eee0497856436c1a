//! # meshstage-core: Pure Domain Logic for meshstage
//!
//! This crate holds the vocabulary of the stage membership reconciliation
//! engine: stages, trust grants, associations, the admission policy, the
//! stage registry and invocation outcomes. It performs no I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      meshstage Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  meshstage-agent (binary)                       │   │
//! │  │      sweep ── run ── prune ── registry ── event                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  meshstage-engine                               │   │
//! │  │   resolver • acceptor • convergence • pruner • transition       │   │
//! │  │   sharing • HTTP clients • retry / poll primitives              │   │
//! │  └───────────────┬─────────────────────────────┬───────────────────┘   │
//! │                  │                             │                        │
//! │  ┌───────────────▼───────────────┐  ┌──────────▼────────────────────┐  │
//! │  │  ★ meshstage-core (THIS) ★    │  │  meshstage-store              │  │
//! │  │  types • policy • registry    │  │  SQLite config parameters     │  │
//! │  │  event • outcome • validation │  │  registry + stage pointers    │  │
//! │  │  NO I/O • PURE FUNCTIONS      │  │                               │  │
//! │  └───────────────────────────────┘  └───────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (StageName, TrustGrant, Association, etc.)
//! - [`policy`] - Two-clause admission policy and allow-list
//! - [`registry`] - Stage name → network id mapping
//! - [`event`] - Tag-change notification parsing
//! - [`outcome`] - Terminal invocation reports
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use meshstage_core::policy::{parse_stage_names, AccountAllowlist, AdmissionPolicy};
//!
//! let policy = AdmissionPolicy::new(
//!     parse_stage_names("alpha, Beta").unwrap(),
//!     AccountAllowlist::parse("ALL"),
//! );
//!
//! // Grant names must match a configured stage exactly
//! assert!(policy.admit("444455556666", "beta").is_ok());
//! assert!(policy.admit("444455556666", "gamma").is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod event;
pub mod outcome;
pub mod policy;
pub mod registry;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use event::{StageChange, TagChangeEvent};
pub use outcome::{InvocationOutcome, OutcomeStatus};
pub use policy::{AccountAllowlist, AdmissionPolicy, PolicySkip};
pub use registry::{RegistryInsert, StageRegistry};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Label key carrying a resource's or network's stage (matched case-insensitively).
pub const STAGE_LABEL: &str = "stage";

/// Allow-list sentinel meaning "accept grants from any account".
pub const ALLOW_ANY_ACCOUNT: &str = "ALL";

/// Stored pointer value meaning "the resource has no current stage".
pub const NO_CURRENT_STAGE: &str = "NONE";

/// Maximum length of a stage name.
///
/// Stage names double as grant and network names, which the backends cap.
pub const MAX_STAGE_NAME_LEN: usize = 64;
