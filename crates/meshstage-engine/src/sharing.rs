//! # Cross-Account Sharing Manager
//!
//! Runs in the resource-owning account. Keeps at most one live outbound
//! grant per resource, named after the resource's stage.
//!
//! ## Grant Maintenance
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 Outbound Grants of One Resource                         │
//! │                                                                         │
//! │  grants tagged <correlation key> = <resource id>                       │
//! │                                                                         │
//! │  relabel to S'                                                         │
//! │  • grant named S' PENDING/ACTIVE    → already shared, keep             │
//! │  • other stage-named grants         → delete (DELETED/DELETING skipped)│
//! │  • not already shared               → create grant S' for principals   │
//! │                                                                         │
//! │  label removed                                                         │
//! │  • every stage-named grant          → delete (DELETED/DELETING skipped)│
//! │                                                                         │
//! │  Grants whose name is not a configured stage are never touched.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use meshstage_core::{
    CoreError, InvocationOutcome, StageChange, StageName, TagChangeEvent, TrustGrant,
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info, instrument};

use crate::client::{CreateGrantRequest, GrantQuery};
use crate::context::EngineContext;
use crate::error::{ClientError, EngineError, EngineResult};

/// What the sharing manager did for one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SharingOutcome {
    /// ARN of the grant created, if any.
    pub created: Option<String>,
    /// ARNs of grants deleted.
    pub deleted: Vec<String>,
    /// A live grant for the target stage already existed.
    pub already_shared: bool,
}

impl SharingOutcome {
    pub fn is_noop(&self) -> bool {
        self.created.is_none() && self.deleted.is_empty()
    }
}

pub struct SharingManager<'a> {
    ctx: &'a EngineContext,
}

impl<'a> SharingManager<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        SharingManager { ctx }
    }

    /// Reconciles the outbound grants of the event's resource.
    #[instrument(skip(self, event), fields(resource = %event.resource.id))]
    pub async fn apply(&self, event: &TagChangeEvent) -> EngineResult<SharingOutcome> {
        let resource = &event.resource;
        let arn = resource.arn.as_deref().ok_or_else(|| {
            EngineError::InvalidEvent(CoreError::notification(format!(
                "sharing {} requires its ARN",
                resource.id
            )))
        })?;

        let tag_key = &self.ctx.config.sharing.correlation_tag_key;
        let grants = self
            .ctx
            .directory
            .list_grants(&GrantQuery::outbound_tagged(tag_key, &resource.id))
            .await?;
        debug!(resource = %resource.id, grants = grants.len(), "Listed outbound grants");

        let target = match &event.change {
            StageChange::Assign(stage) => Some(stage),
            StageChange::Remove => None,
        };

        let mut outcome = SharingOutcome {
            already_shared: target.map_or(false, |stage| {
                grants
                    .iter()
                    .any(|g| g.name == stage.as_str() && g.status.is_live())
            }),
            ..SharingOutcome::default()
        };

        for grant in grants.iter().filter(|g| self.is_stale(g, target)) {
            match self.ctx.directory.delete_grant(&grant.arn).await {
                Ok(()) | Err(ClientError::NotFound(_)) => {
                    info!(resource = %resource.id, grant = %grant.arn, name = %grant.name, "Deleted outbound grant");
                    outcome.deleted.push(grant.arn.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(stage) = target {
            if !outcome.already_shared {
                let created = self.create(stage, arn, &resource.id).await?;
                outcome.created = Some(created.arn);
            }
        }

        Ok(outcome)
    }

    /// Runs [`apply`](Self::apply) and folds the result into an outcome.
    pub async fn run(&self, event: &TagChangeEvent) -> InvocationOutcome {
        let mut outcome = InvocationOutcome::new("share_resource");

        match self.apply(event).await {
            Ok(result) if result.is_noop() => outcome.finish().with_message("no grant changes"),
            Ok(result) => {
                outcome.processed(event.resource.id.clone());
                let message = format!(
                    "created {}, deleted {}",
                    result.created.as_deref().unwrap_or("nothing"),
                    result.deleted.len()
                );
                outcome.finish().with_message(message)
            }
            Err(e) => {
                error!(resource = %event.resource.id, error = %e, "Sharing failed");
                outcome.fail(event.resource.id.clone(), &e);
                outcome.failed(e)
            }
        }
    }

    /// A stage-named grant that no longer matches the resource's stage.
    fn is_stale(&self, grant: &TrustGrant, target: Option<&StageName>) -> bool {
        if grant.status.is_terminal() || !self.ctx.policy.is_stage(&grant.name) {
            return false;
        }
        target.map_or(true, |stage| grant.name != stage.as_str())
    }

    async fn create(&self, stage: &StageName, arn: &str, resource_id: &str) -> EngineResult<TrustGrant> {
        let sharing = &self.ctx.config.sharing;
        let request = CreateGrantRequest {
            name: stage.to_string(),
            principals: sharing.principals.clone(),
            resource_arns: vec![arn.to_string()],
            tags: BTreeMap::from([(sharing.correlation_tag_key.clone(), resource_id.to_string())]),
        };

        let grant = self.ctx.directory.create_grant(&request).await?;
        info!(resource = %resource_id, stage = %stage, grant = %grant.arn, "Created outbound grant");
        Ok(grant)
    }
}
