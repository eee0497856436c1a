//! # meshstage-engine: Stage Membership Reconciliation
//!
//! Keeps service-network memberships in line with stage labels, across
//! accounts, on top of an eventually consistent control plane.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Reconciliation Engine                             │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                   Reconciler (orchestrator)                      │  │
//! │  │   periodic sweep  •  tag-change events  •  deployment role       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │   MEMBERSHIP ROLE             │                 SHARING ROLE            │
//! │   ┌───────────────────┐  ┌────┴──────────────┐  ┌───────────────────┐  │
//! │   │ StageRegistry     │  │ TrustAcceptor     │  │ SharingManager    │  │
//! │   │ Resolver          │  │ invitations       │  │ one outbound      │  │
//! │   │ stage → network   │  │ → admitted grants │  │ grant / resource  │  │
//! │   └───────────────────┘  └───────────────────┘  └───────────────────┘  │
//! │   ┌───────────────────┐  ┌───────────────────┐  ┌───────────────────┐  │
//! │   │ Membership        │  │ StaleMembership   │  │ StageTransition   │  │
//! │   │ Convergence       │  │ Pruner            │  │ detach → wait →   │  │
//! │   │ grants → members  │  │ orphans → delete  │  │ attach → pointer  │  │
//! │   └───────────────────┘  └───────────────────┘  └───────────────────┘  │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  MeshControlPlane / ResourceDirectory (HTTP or FakeBackend)     │   │
//! │  │  StageStateStore (registry + per-resource stage pointers)       │   │
//! │  │  retry_until_nonempty • wait_until_absent • ResourceLocks       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Orchestration
//! - [`agent`] - `Reconciler` and `SweepReport`
//! - [`config`] - Engine configuration (role, stages, timing, endpoints)
//! - [`context`] - Shared handles passed to every component
//! - [`error`] - Client and engine error types
//!
//! ### Components
//! - [`resolver`] - Stage registry resolution
//! - [`acceptor`] - Inbound invitation acceptance
//! - [`convergence`] - Membership convergence over admitted grants
//! - [`pruner`] - Stale membership removal
//! - [`transition`] - Per-resource stage transitions
//! - [`sharing`] - Outbound grant maintenance
//!
//! ### Plumbing
//! - [`client`] - Backend traits and request types
//! - [`http`] - reqwest implementations of the backend traits
//! - [`snapshot`] - One listing of networks and their labels
//! - [`poll`] - Bounded retry and deletion polling
//! - [`locks`] - Per-resource mutual exclusion
//! - [`fake`] - Scripted in-memory backend (feature `test-util`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meshstage_engine::{EngineConfig, Reconciler};
//!
//! let config = EngineConfig::load(None)?;
//! let reconciler = Reconciler::connect(config).await?;
//!
//! let report = reconciler.sweep().await;
//! println!("Sweep {}: {:?}", report.sweep_id, report.status);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Orchestration
pub mod agent;
pub mod config;
pub mod context;
pub mod error;

// Components
pub mod acceptor;
pub mod convergence;
pub mod pruner;
pub mod resolver;
pub mod sharing;
pub mod transition;

// Plumbing
pub mod client;
pub mod http;
pub mod locks;
pub mod poll;
pub mod snapshot;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

// Orchestration
pub use agent::{Reconciler, SweepReport};
pub use config::{DeploymentRole, EngineConfig, PreviousStageSource};
pub use context::EngineContext;
pub use error::{ClientError, ClientResult, EngineError, EngineResult, ErrorCategory};

// Components
pub use acceptor::TrustAcceptor;
pub use convergence::MembershipConvergence;
pub use pruner::StaleMembershipPruner;
pub use resolver::{DuplicateStage, Resolution, StageRegistryResolver};
pub use sharing::{SharingManager, SharingOutcome};
pub use transition::{StageTransition, TransitionOutcome};

// Plumbing
pub use client::{MeshControlPlane, ResourceDirectory};
pub use http::{HttpMeshControlPlane, HttpResourceDirectory};
pub use poll::{DeletionWait, ListingRetry, PollOutcome};
