//! # Membership Convergence Engine
//!
//! Associates every resource shared through an admitted grant with the
//! network of the grant's stage.
//!
//! ## Convergence Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     One Convergence Pass                                │
//! │                                                                         │
//! │  ACTIVE inbound grants                                                 │
//! │       │ admit (allow-list + exact stage name)  ── no ──► skip (policy) │
//! │       ▼                                                                 │
//! │  registry.network_for(grant name)   ── missing ──► skip (not yet)      │
//! │       ▼                                                                 │
//! │  list services under grant (retry until non-empty, bounded)            │
//! │       │                              ── still empty ──► skip (not yet) │
//! │       ▼                                                                 │
//! │  for each resource: ensure_associated(network, resource)               │
//! │       • exists or deleting → nothing                                   │
//! │       • missing → create (processed)                                   │
//! │       • error   → recorded, next resource                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A second pass over unchanged state creates nothing.

use meshstage_core::{AssociationState, InvocationOutcome, MemberResource, ResourceKind, StageRegistry, TrustGrant};
use tracing::{debug, error, info, instrument, warn};

use crate::client::{AssociationFilter, CreateAssociation, GrantQuery, ResourceQuery};
use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::poll::retry_until_nonempty;

pub struct MembershipConvergence<'a> {
    ctx: &'a EngineContext,
}

impl<'a> MembershipConvergence<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        MembershipConvergence { ctx }
    }

    /// Converges every admitted grant against the stored registry.
    #[instrument(skip(self))]
    pub async fn run(&self) -> EngineResult<InvocationOutcome> {
        let mut outcome = InvocationOutcome::new("converge_membership");

        let registry = self.ctx.state.load_registry().await?;
        let grants = self
            .ctx
            .directory
            .list_grants(&GrantQuery::active_inbound())
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to list inbound grants");
                EngineError::from(e)
            })?;

        debug!(grants = grants.len(), "Converging inbound grants");
        for grant in &grants {
            self.converge_grant(grant, &registry, &mut outcome).await;
        }

        Ok(outcome.finish())
    }

    async fn converge_grant(&self, grant: &TrustGrant, registry: &StageRegistry, outcome: &mut InvocationOutcome) {
        let stage = match self.ctx.policy.admit(&grant.owner_account, &grant.name) {
            Ok(stage) => stage,
            Err(skip) => {
                info!(grant = %grant.arn, reason = %skip, "Grant not admitted");
                outcome.skip(grant.arn.clone(), EngineError::Policy(skip));
                return;
            }
        };

        let Some(network_id) = registry.network_for(&stage) else {
            let err = EngineError::NotYetConsistent(format!("no network registered for stage '{}'", stage));
            warn!(grant = %grant.arn, stage = %stage, "Stage not in registry yet");
            outcome.skip(grant.arn.clone(), err);
            return;
        };

        let query = ResourceQuery::under_grant(&grant.arn, ResourceKind::Service);
        let listing = retry_until_nonempty(self.ctx.config.timing.listing_retry(), || {
            self.ctx.directory.list_resources(&query)
        })
        .await;

        let resources = match listing {
            Ok(resources) if resources.is_empty() => {
                let err = EngineError::NotYetConsistent("no resources visible under grant".into());
                warn!(grant = %grant.arn, "Nothing to converge yet");
                outcome.skip(grant.arn.clone(), err);
                return;
            }
            Ok(resources) => resources,
            Err(e) => {
                warn!(grant = %grant.arn, error = %e, "Failed to list shared resources");
                outcome.fail(grant.arn.clone(), e);
                return;
            }
        };

        for resource in &resources {
            match self.ensure_associated(network_id, resource).await {
                Ok(true) => outcome.processed(resource.id.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!(resource = %resource.id, network = %network_id, error = %e, "Failed to converge resource");
                    outcome.fail(resource.id.clone(), e);
                }
            }
        }
    }

    /// Creates the association between `resource` and `network_id` unless
    /// one already exists. Returns true when one was created.
    ///
    /// An association still being deleted is left alone; the pass after the
    /// deletion completes creates a fresh one.
    pub async fn ensure_associated(&self, network_id: &str, resource: &MemberResource) -> EngineResult<bool> {
        let filter = AssociationFilter::between(resource.kind, &resource.id, network_id);
        let existing = self.ctx.control_plane.list_associations(&filter).await?;

        if existing.iter().any(|a| a.state.is_live()) {
            debug!(resource = %resource.id, network = %network_id, "Already associated");
            return Ok(false);
        }
        if existing.iter().any(|a| a.state == AssociationState::Deleting) {
            debug!(resource = %resource.id, network = %network_id, "Association still deleting");
            return Ok(false);
        }

        let identifier = if resource.arn.is_empty() {
            resource.id.clone()
        } else {
            resource.arn.clone()
        };
        let created = self
            .ctx
            .control_plane
            .create_association(&CreateAssociation {
                kind: resource.kind,
                resource_identifier: identifier,
                network_id: network_id.to_string(),
            })
            .await?;

        info!(
            resource = %resource.id,
            network = %network_id,
            association = %created.id,
            "Created association"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StageRegistryResolver;
    use crate::testing::{context_with, LOCAL, SENDER};
    use meshstage_core::{GrantStatus, OutcomeStatus};

    fn service(id: &str) -> MemberResource {
        MemberResource {
            id: id.to_string(),
            arn: format!("arn:aws:vpc-lattice:eu-west-1:{}:service/{}", SENDER, id),
            kind: ResourceKind::Service,
        }
    }

    #[tokio::test]
    async fn test_convergence_is_idempotent() {
        let (ctx, fake) = context_with(|fake| {
            fake.add_stage_network("sn-b", "beta", LOCAL);
            let grant = fake.add_inbound_grant("beta", SENDER, GrantStatus::Active);
            fake.share_resource(&grant, service("svc-1"));
            fake.share_resource(&grant, service("svc-2"));
        })
        .await;
        StageRegistryResolver::new(&ctx).run().await.unwrap();

        let first = MembershipConvergence::new(&ctx).run().await.unwrap();
        assert_eq!(first.status, OutcomeStatus::Succeeded);
        assert_eq!(first.processed, vec!["svc-1".to_string(), "svc-2".to_string()]);

        let second = MembershipConvergence::new(&ctx).run().await.unwrap();
        assert_eq!(second.status, OutcomeStatus::NoOp);
        assert_eq!(fake.calls("create_association"), 2);
        assert_eq!(fake.live_associations("svc-1").len(), 1);
    }

    #[tokio::test]
    async fn test_unregistered_stage_and_policy_skips() {
        let (ctx, fake) = context_with(|fake| {
            let grant = fake.add_inbound_grant("prod", SENDER, GrantStatus::Active);
            fake.share_resource(&grant, service("svc-p"));
            let stranger = fake.add_inbound_grant("beta", "777777777777", GrantStatus::Active);
            fake.share_resource(&stranger, service("svc-x"));
        })
        .await;

        let outcome = MembershipConvergence::new(&ctx).run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::NoOp);
        assert_eq!(outcome.skipped.len(), 2);
        assert_eq!(fake.calls("create_association"), 0);
    }

    #[tokio::test]
    async fn test_per_resource_failures_are_isolated() {
        let (ctx, fake) = context_with(|fake| {
            fake.add_stage_network("sn-b", "beta", LOCAL);
            let grant = fake.add_inbound_grant("beta", SENDER, GrantStatus::Active);
            fake.share_resource(&grant, service("svc-bad"));
            fake.share_resource(&grant, service("svc-good"));
            fake.fail_association_create("svc-bad");
        })
        .await;
        StageRegistryResolver::new(&ctx).run().await.unwrap();

        let outcome = MembershipConvergence::new(&ctx).run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Partial);
        assert_eq!(outcome.processed, vec!["svc-good".to_string()]);
        assert_eq!(outcome.failures[0].id, "svc-bad");
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_listing_is_not_yet_consistent() {
        let (ctx, fake) = context_with(|fake| {
            fake.add_stage_network("sn-b", "beta", LOCAL);
            fake.add_inbound_grant("beta", SENDER, GrantStatus::Active);
        })
        .await;
        StageRegistryResolver::new(&ctx).run().await.unwrap();

        let outcome = MembershipConvergence::new(&ctx).run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::NoOp);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(fake.calls("list_resources"), 5);
    }

    #[tokio::test]
    async fn test_shared_networks_are_not_converged() {
        let (ctx, fake) = context_with(|fake| {
            fake.add_stage_network("sn-b", "beta", LOCAL);
            let grant = fake.add_inbound_grant("beta", SENDER, GrantStatus::Active);
            fake.share_resource(&grant, service("svc-1"));
            fake.share_resource(
                &grant,
                MemberResource {
                    id: "vpc-shared".to_string(),
                    arn: format!("arn:aws:ec2:eu-west-1:{}:vpc/vpc-shared", SENDER),
                    kind: ResourceKind::VirtualNetwork,
                },
            );
        })
        .await;
        StageRegistryResolver::new(&ctx).run().await.unwrap();

        let outcome = MembershipConvergence::new(&ctx).run().await.unwrap();
        assert_eq!(outcome.processed, vec!["svc-1".to_string()]);
        assert!(fake.live_associations("vpc-shared").is_empty());
    }

    #[tokio::test]
    async fn test_deleting_association_is_not_recreated() {
        let (ctx, fake) = context_with(|fake| {
            fake.add_stage_network("sn-b", "beta", LOCAL);
            let grant = fake.add_inbound_grant("beta", SENDER, GrantStatus::Active);
            fake.share_resource(&grant, service("svc-1"));
            let id = fake.add_association("svc-1", "sn-b", ResourceKind::Service);
            fake.set_association_state(&id, AssociationState::Deleting);
        })
        .await;
        StageRegistryResolver::new(&ctx).run().await.unwrap();

        let outcome = MembershipConvergence::new(&ctx).run().await.unwrap();
        assert_eq!(outcome.status, OutcomeStatus::NoOp);
        assert_eq!(fake.calls("create_association"), 0);
        assert_eq!(fake.associations().len(), 1);
    }
}
