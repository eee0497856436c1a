//! # Stale Membership Pruner
//!
//! Deletes service associations in stage networks whose service is no
//! longer visible under any ACTIVE inbound grant.
//!
//! ```text
//! registry networks ──► service associations ─┐
//!                                             ├─► not visible ──► delete
//! ACTIVE inbound grants ──► visible services ─┘
//! ```
//!
//! Virtual-network memberships are owned locally and driven by tag changes,
//! so they are never pruned here.

use meshstage_core::{Association, InvocationOutcome, ResourceKind};
use std::collections::BTreeSet;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{AssociationFilter, ResourceQuery};
use crate::context::EngineContext;
use crate::error::{ClientError, EngineError, EngineResult};

pub struct StaleMembershipPruner<'a> {
    ctx: &'a EngineContext,
}

impl<'a> StaleMembershipPruner<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        StaleMembershipPruner { ctx }
    }

    /// Associations in registry networks whose resource is not visible.
    pub async fn orphaned(&self) -> EngineResult<Vec<Association>> {
        let registry = self.ctx.state.load_registry().await?;

        let mut associations = Vec::new();
        for network_id in registry.network_ids() {
            let filter = AssociationFilter::for_network(ResourceKind::Service, network_id);
            associations.extend(self.ctx.control_plane.list_associations(&filter).await?);
        }

        let visible: BTreeSet<String> = self
            .ctx
            .directory
            .list_resources(&ResourceQuery::inbound_of_kind(ResourceKind::Service))
            .await?
            .into_iter()
            .map(|r| r.id)
            .collect();

        debug!(
            associations = associations.len(),
            visible = visible.len(),
            "Collected memberships"
        );

        Ok(associations
            .into_iter()
            .filter(|a| a.state.is_live() && !visible.contains(&a.resource_id))
            .collect())
    }

    /// Deletes every orphaned association. Listing failures are fatal;
    /// each deletion failure is recorded and the pass continues.
    #[instrument(skip(self))]
    pub async fn run(&self) -> EngineResult<InvocationOutcome> {
        let mut outcome = InvocationOutcome::new("prune_memberships");

        let orphaned = self.orphaned().await.map_err(|e| {
            error!(error = %e, "Failed to collect memberships");
            e
        })?;

        for association in orphaned {
            match self
                .ctx
                .control_plane
                .delete_association(association.kind, &association.id)
                .await
            {
                Ok(()) | Err(ClientError::NotFound(_)) => {
                    info!(
                        association = %association.id,
                        resource = %association.resource_id,
                        network = %association.network_id,
                        "Pruned stale association"
                    );
                    outcome.processed(association.id);
                }
                Err(e) => {
                    warn!(association = %association.id, error = %e, "Failed to prune association");
                    outcome.fail(association.id, EngineError::from(e));
                }
            }
        }

        Ok(outcome.finish())
    }
}
