//! # meshstage-store: Config Store for meshstage
//!
//! Persists the stage registry and per-resource current-stage pointers in
//! SQLite, behind the [`ConfigStore`] trait the engine depends on.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       meshstage Data Flow                               │
//! │                                                                         │
//! │  Stage Registry Resolver / Stage Transition (meshstage-engine)         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 meshstage-store (THIS CRATE)                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │ ParameterRepo  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │◄───│ StageStateStore│    │  (embedded)  │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  │   MemoryConfigStore ← same ConfigStore trait, no SQLite        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (config_parameters)                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meshstage_store::{Database, StoreConfig};
//!
//! let db = Database::new(StoreConfig::new("meshstage.db")).await?;
//! let state = db.stage_state("/meshstage/stage-registry", "/meshstage/current-stage");
//! let registry = state.load_registry().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config_store;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use config_store::{ConfigStore, MemoryConfigStore, PointerRecord, StageStateStore};
pub use error::{StoreError, StoreResult};
pub use pool::{Database, StoreConfig};
pub use repository::parameter::{ParameterRecord, ParameterRepository};
