//! # Reconciler
//!
//! Entry point for sweeps and tag-change events.
//!
//! ## Invocation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Reconciler                                     │
//! │                                                                         │
//! │  SWEEP (membership role, periodic)                                     │
//! │  ──────────────────────────────────                                    │
//! │  ┌──────────┐   ┌──────────┐   ┌─────────────┐   ┌──────────┐          │
//! │  │ resolve  │──►│ accept   │──►│ converge    │──►│ prune    │          │
//! │  │ registry │   │ invites  │   │ memberships │   │ orphans  │          │
//! │  └──────────┘   └──────────┘   └─────────────┘   └──────────┘          │
//! │   a fatal phase error stops the phases after it                        │
//! │                                                                         │
//! │  EVENT (tag change)                                                    │
//! │  ──────────────────                                                    │
//! │  membership role → StageTransition                                     │
//! │  sharing role    → SharingManager                                      │
//! │                                                                         │
//! │  Every invocation yields an InvocationOutcome; a sweep yields a        │
//! │  SweepReport with one outcome per phase that ran.                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use meshstage_core::{InvocationOutcome, OutcomeStatus, TagChangeEvent};
use meshstage_store::{Database, StoreConfig};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::acceptor::TrustAcceptor;
use crate::config::{DeploymentRole, EngineConfig};
use crate::context::EngineContext;
use crate::convergence::MembershipConvergence;
use crate::error::{EngineError, EngineResult};
use crate::http::{HttpMeshControlPlane, HttpResourceDirectory};
use crate::pruner::StaleMembershipPruner;
use crate::resolver::{Resolution, StageRegistryResolver};
use crate::sharing::SharingManager;
use crate::transition::StageTransition;

// =============================================================================
// Sweep Report
// =============================================================================

/// Outcome of one periodic sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub sweep_id: Uuid,
    pub status: OutcomeStatus,
    pub phases: Vec<InvocationOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SweepReport {
    fn new(started_at: DateTime<Utc>, phases: Vec<InvocationOutcome>) -> Self {
        let statuses: Vec<OutcomeStatus> = phases.iter().map(|p| p.status).collect();
        let status = if statuses.iter().any(OutcomeStatus::is_failure) {
            OutcomeStatus::Failed
        } else if statuses.contains(&OutcomeStatus::Partial) {
            OutcomeStatus::Partial
        } else if statuses.iter().all(|s| *s == OutcomeStatus::NoOp) {
            OutcomeStatus::NoOp
        } else {
            OutcomeStatus::Succeeded
        };

        SweepReport {
            sweep_id: Uuid::new_v4(),
            status,
            phases,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Looks up a phase outcome by operation name.
    pub fn phase(&self, operation: &str) -> Option<&InvocationOutcome> {
        self.phases.iter().find(|p| p.operation == operation)
    }
}

// =============================================================================
// Reconciler
// =============================================================================

/// Runs sweeps and handles events against one [`EngineContext`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    ctx: Arc<EngineContext>,
}

impl Reconciler {
    pub fn new(ctx: EngineContext) -> Self {
        Reconciler { ctx: Arc::new(ctx) }
    }

    /// Opens the SQLite store and the HTTP clients named in `config`.
    pub async fn connect(config: EngineConfig) -> EngineResult<Self> {
        let db = Database::new(StoreConfig::new(&config.store.database_path)).await?;
        let state = db.stage_state(
            config.store.registry_key.clone(),
            config.store.pointer_prefix.clone(),
        );
        let control_plane = Arc::new(HttpMeshControlPlane::new(&config.control_plane)?);
        let directory = Arc::new(HttpResourceDirectory::new(&config.control_plane)?);

        info!(
            role = %config.role,
            control_plane = %config.control_plane.base_url,
            directory = %config.control_plane.directory_url,
            "Reconciler connected"
        );
        Ok(Self::new(EngineContext::new(config, control_plane, directory, state)?))
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Runs resolve, accept, converge and prune in order.
    pub async fn sweep(&self) -> SweepReport {
        let started_at = Utc::now();
        let ctx = self.ctx.as_ref();

        if ctx.config.role != DeploymentRole::Membership {
            let outcome = InvocationOutcome::new("sweep").failed(EngineError::InvalidConfig(format!(
                "sweeps are not run in the {} role",
                ctx.config.role
            )));
            return SweepReport::new(started_at, vec![outcome]);
        }

        info!("Starting sweep");
        let mut phases = Vec::with_capacity(4);

        let _completed = record_phase(&mut phases, "resolve_registry", StageRegistryResolver::new(ctx).run().await)
            && record_phase(&mut phases, "accept_invitations", TrustAcceptor::new(ctx).run().await)
            && record_phase(&mut phases, "converge_membership", MembershipConvergence::new(ctx).run().await)
            && record_phase(&mut phases, "prune_memberships", StaleMembershipPruner::new(ctx).run().await);

        let report = SweepReport::new(started_at, phases);
        info!(sweep = %report.sweep_id, status = ?report.status, "Sweep finished");
        report
    }

    /// Resolves and saves the registry only.
    pub async fn resolve_registry(&self) -> EngineResult<Resolution> {
        StageRegistryResolver::new(&self.ctx).resolve().await
    }

    /// Runs the pruner only.
    pub async fn prune(&self) -> InvocationOutcome {
        match StaleMembershipPruner::new(&self.ctx).run().await {
            Ok(outcome) => outcome,
            Err(e) => InvocationOutcome::new("prune_memberships").failed(e),
        }
    }

    /// Handles a raw change notification according to the deployment role.
    pub async fn handle_notification(&self, raw: &serde_json::Value) -> InvocationOutcome {
        match TagChangeEvent::from_notification(raw) {
            Ok(event) => self.handle_event(&event).await,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed notification");
                InvocationOutcome::new("handle_event").failed(EngineError::InvalidEvent(e))
            }
        }
    }

    /// Handles a normalised tag-change event according to the deployment role.
    pub async fn handle_event(&self, event: &TagChangeEvent) -> InvocationOutcome {
        info!(
            resource = %event.resource.id,
            stage = ?event.stage().map(|s| s.as_str()),
            role = %self.ctx.config.role,
            "Handling tag change"
        );
        match self.ctx.config.role {
            DeploymentRole::Membership => StageTransition::new(&self.ctx).run(event).await,
            DeploymentRole::Sharing => SharingManager::new(&self.ctx).run(event).await,
        }
    }

    /// Sweeps every `sweep_interval_secs` until `shutdown` resolves.
    pub async fn run_periodic<S>(&self, shutdown: S)
    where
        S: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.ctx.config.timing.sweep_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping sweeps");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    if report.status.is_failure() {
                        warn!(sweep = %report.sweep_id, "Sweep failed; retrying next interval");
                    }
                }
            }
        }
    }
}

/// Appends a phase outcome; returns false when the phase failed fatally.
fn record_phase(phases: &mut Vec<InvocationOutcome>, phase: &str, result: EngineResult<InvocationOutcome>) -> bool {
    match result {
        Ok(outcome) => {
            debug!(phase, status = ?outcome.status, "Phase finished");
            phases.push(outcome);
            true
        }
        Err(e) => {
            error!(phase, error = %e, category = ?e.category(), "Phase failed, stopping sweep");
            phases.push(InvocationOutcome::new(phase).failed(e));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context_with, context_with_config, test_config, LOCAL, SENDER};
    use meshstage_core::{MemberResource, ResourceKind};
    use std::time::Duration;

    #[tokio::test]
    async fn test_full_sweep() {
        let (ctx, fake) = context_with(|fake| {
            fake.add_stage_network("sn-b", "beta", LOCAL);
            let invitation = fake.invite("inv-1", "beta", SENDER);
            fake.share_resource(
                &invitation.grant_arn,
                MemberResource {
                    id: "svc-1".into(),
                    arn: format!("arn:aws:vpc-lattice:eu-west-1:{}:service/svc-1", SENDER),
                    kind: ResourceKind::Service,
                },
            );
            fake.add_association("svc-stale", "sn-b", ResourceKind::Service);
        })
        .await;

        let report = Reconciler::new(ctx).sweep().await;
        assert_eq!(report.status, OutcomeStatus::Succeeded);
        assert_eq!(report.phases.len(), 4);
        assert_eq!(
            report.phase("converge_membership").map(|p| p.processed.clone()),
            Some(vec!["svc-1".to_string()])
        );
        assert_eq!(fake.live_associations("svc-1").len(), 1);
        assert!(fake.live_associations("svc-stale").is_empty());
    }

    #[tokio::test]
    async fn test_fatal_phase_stops_sweep() {
        let (ctx, fake) = context_with(|fake| fake.fail_network_listing()).await;

        let report = Reconciler::new(ctx).sweep().await;
        assert_eq!(report.status, OutcomeStatus::Failed);
        assert_eq!(report.phases.len(), 1);
        assert_eq!(fake.calls("list_invitations"), 0);
    }

    #[tokio::test]
    async fn test_sharing_role_routes_events() {
        let mut config = test_config();
        config.role = DeploymentRole::Sharing;
        let (ctx, fake) = context_with_config(config, |_| {}).await;
        let reconciler = Reconciler::new(ctx);

        let raw = serde_json::json!({
            "resources": ["arn:aws:vpc-lattice:eu-west-1:111122223333:service/svc-0abc"],
            "detail": { "tags": { "stage": "beta" } }
        });
        let outcome = reconciler.handle_notification(&raw).await;
        assert_eq!(outcome.status, OutcomeStatus::Succeeded);
        assert_eq!(fake.live_outbound_grants().len(), 1);

        let sweep = reconciler.sweep().await;
        assert_eq!(sweep.status, OutcomeStatus::Failed);
        assert_eq!(fake.calls("list_networks"), 0);
    }

    #[tokio::test]
    async fn test_malformed_notification_fails() {
        let (ctx, _fake) = context_with(|_| {}).await;
        let outcome = Reconciler::new(ctx)
            .handle_notification(&serde_json::json!({ "detail": {} }))
            .await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweeps_until_shutdown() {
        let (ctx, fake) = context_with(|_| {}).await;
        let reconciler = Reconciler::new(ctx);
        let interval = reconciler.context().config.timing.sweep_interval();

        reconciler
            .run_periodic(tokio::time::sleep(interval * 2 + Duration::from_secs(1)))
            .await;

        assert_eq!(fake.calls("list_networks"), 3);
    }
}
