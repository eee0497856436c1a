//! # Stage Transition State Machine
//!
//! Moves one resource between stage networks in response to a label change,
//! keeping it a member of at most one stage network.
//!
//! ## States
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Resource Stage States                               │
//! │                                                                         │
//! │                 assign S                    assign S'                   │
//! │  ┌────────────┐ ───────► ┌──────────────┐ ─────────► ┌───────────────┐ │
//! │  │ Unassigned │          │ Associated(S)│            │ Associated(S')│ │
//! │  └────────────┘ ◄─────── └──────────────┘            └───────────────┘ │
//! │                  remove                                                 │
//! │                                                                         │
//! │  ASSIGN S'                                                             │
//! │  1. live association already targets S'      → no-op                   │
//! │  2. registry has no network for S'           → fatal, nothing touched  │
//! │  3. find previous association(s)  (scan, checked against pointer)      │
//! │  4. delete them; virtual networks: poll until absent (bounded)         │
//! │  5. create association with S' network                                 │
//! │  6. conditional write pointer = S'  (only after 5 succeeded)           │
//! │                                                                         │
//! │  REMOVE                                                                │
//! │  delete current association(s) → wait → conditional write pointer=NONE│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every step aborts the transition on error; a timeout leaves the pointer
//! untouched so the next event or sweep repairs it.

use meshstage_core::{
    Association, AssociationState, InvocationOutcome, ResourceKind, StageChange, StageName,
    StageRegistry, TagChangeEvent,
};
use meshstage_store::{PointerRecord, StoreError};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::client::{AssociationFilter, CreateAssociation};
use crate::config::PreviousStageSource;
use crate::context::EngineContext;
use crate::error::{ClientError, EngineError, EngineResult};
use crate::poll::{wait_until_absent, PollOutcome};

// =============================================================================
// Transition Outcome
// =============================================================================

/// What a transition did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TransitionOutcome {
    /// The resource was already a member of the target stage network.
    AlreadyAssociated { stage: StageName },
    /// The resource moved into the target stage network.
    Assigned {
        stage: StageName,
        association_id: String,
        removed: Vec<String>,
    },
    /// The resource left its stage network.
    Removed { removed: Vec<String> },
    /// Removal requested but the resource had no stage membership.
    NothingToRemove,
}

impl TransitionOutcome {
    /// Returns true if nothing changed.
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            TransitionOutcome::AlreadyAssociated { .. } | TransitionOutcome::NothingToRemove
        )
    }
}

// =============================================================================
// State Machine
// =============================================================================

pub struct StageTransition<'a> {
    ctx: &'a EngineContext,
}

impl<'a> StageTransition<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        StageTransition { ctx }
    }

    /// Applies a tag-change event to its resource.
    #[instrument(skip(self, event), fields(resource = %event.resource.id))]
    pub async fn apply(&self, event: &TagChangeEvent) -> EngineResult<TransitionOutcome> {
        let kind = event
            .resource
            .kind
            .ok_or_else(|| EngineError::UnknownResourceKind {
                resource: event.resource.id.clone(),
            })?;

        let _guard = self.ctx.locks.acquire(&event.resource.id).await;

        match &event.change {
            StageChange::Assign(stage) => self.assign(event, kind, stage).await,
            StageChange::Remove => self.remove(event, kind).await,
        }
    }

    /// Runs [`apply`](Self::apply) and folds the result into an outcome.
    pub async fn run(&self, event: &TagChangeEvent) -> InvocationOutcome {
        let mut outcome = InvocationOutcome::new("stage_transition");
        let resource = event.resource.id.clone();

        match self.apply(event).await {
            Ok(result) if result.is_noop() => outcome.finish().with_message(describe(&result)),
            Ok(result) => {
                outcome.processed(resource);
                outcome.finish().with_message(describe(&result))
            }
            Err(e) => {
                error!(resource = %resource, error = %e, category = ?e.category(), "Stage transition failed");
                outcome.fail(resource, &e);
                outcome.failed(e)
            }
        }
    }

    async fn assign(&self, event: &TagChangeEvent, kind: ResourceKind, target: &StageName) -> EngineResult<TransitionOutcome> {
        let resource_id = event.resource.id.as_str();
        let state = &self.ctx.state;

        let registry = state.load_registry().await?;
        let target_network = registry.network_for(target);
        let pointer = state.load_current_stage(resource_id).await?;
        let live = self.live_associations(kind, resource_id).await?;

        if live.iter().any(|a| a.targets(target, target_network)) {
            if pointer.stage.as_ref() != Some(target) {
                info!(resource = %resource_id, stage = %target, "Repairing stage pointer");
                self.write_pointer(resource_id, &pointer, Some(target)).await?;
            }
            info!(resource = %resource_id, stage = %target, "Already associated");
            return Ok(TransitionOutcome::AlreadyAssociated {
                stage: target.clone(),
            });
        }

        let network_id = target_network.ok_or_else(|| EngineError::StageNotRegistered {
            stage: target.to_string(),
        })?;

        let previous = self.previous_associations(&live, &pointer, &registry, Some(target));
        let removed = self.detach(kind, &previous).await?;

        let created = self
            .ctx
            .control_plane
            .create_association(&CreateAssociation {
                kind,
                resource_identifier: event.resource.identifier().to_string(),
                network_id: network_id.to_string(),
            })
            .await?;
        info!(
            resource = %resource_id,
            stage = %target,
            network = %network_id,
            association = %created.id,
            "Associated resource with stage network"
        );

        self.write_pointer(resource_id, &pointer, Some(target)).await?;

        Ok(TransitionOutcome::Assigned {
            stage: target.clone(),
            association_id: created.id,
            removed,
        })
    }

    async fn remove(&self, event: &TagChangeEvent, kind: ResourceKind) -> EngineResult<TransitionOutcome> {
        let resource_id = event.resource.id.as_str();
        let state = &self.ctx.state;

        let registry = state.load_registry().await?;
        let pointer = state.load_current_stage(resource_id).await?;
        let live = self.live_associations(kind, resource_id).await?;

        let current = self.previous_associations(&live, &pointer, &registry, None);
        if current.is_empty() && pointer.stage.is_none() {
            info!(resource = %resource_id, "No stage membership to remove");
            return Ok(TransitionOutcome::NothingToRemove);
        }

        let removed = self.detach(kind, &current).await?;

        if pointer.stage.is_some() || pointer.is_missing() {
            self.write_pointer(resource_id, &pointer, None).await?;
        }
        info!(resource = %resource_id, removed = removed.len(), "Removed stage membership");

        Ok(TransitionOutcome::Removed { removed })
    }

    async fn live_associations(&self, kind: ResourceKind, resource_id: &str) -> EngineResult<Vec<Association>> {
        let all = self
            .ctx
            .control_plane
            .list_associations(&AssociationFilter::for_resource(kind, resource_id))
            .await?;
        Ok(all.into_iter().filter(|a| a.state.is_live()).collect())
    }

    /// The associations the resource is leaving: every live association in
    /// a stage network other than `target`.
    ///
    /// In pointer mode the pointer is trusted only while it agrees with the
    /// live stage associations; a membership the pointer does not account
    /// for (made out of band, or behind a `NONE` pointer) is detached too.
    fn previous_associations(
        &self,
        live: &[Association],
        pointer: &PointerRecord,
        registry: &StageRegistry,
        target: Option<&StageName>,
    ) -> Vec<Association> {
        let scanned: Vec<Association> = live
            .iter()
            .filter(|a| match self.stage_of(a, registry) {
                Some(stage) => Some(&stage) != target,
                None => false,
            })
            .cloned()
            .collect();

        let use_pointer = self.ctx.config.transition.previous_stage_source == PreviousStageSource::Pointer
            && !pointer.is_missing();
        if !use_pointer {
            return scanned;
        }

        let pointed = match &pointer.stage {
            Some(previous) if Some(previous) != target => scanned
                .iter()
                .filter(|a| a.targets(previous, registry.network_for(previous)))
                .count(),
            _ => 0,
        };
        if pointed != scanned.len() {
            warn!(
                pointer = pointer.stage.as_ref().map_or("NONE", StageName::as_str),
                live = scanned.len(),
                "Stage pointer disagrees with live associations, using scan"
            );
        }
        scanned
    }

    /// The stage an association belongs to, by network name or registry.
    fn stage_of(&self, association: &Association, registry: &StageRegistry) -> Option<StageName> {
        association
            .stage()
            .filter(|s| self.ctx.policy.stage_names.contains(s))
            .or_else(|| registry.stage_for_network(&association.network_id).cloned())
    }

    /// Deletes `associations` and, for asynchronously deleted kinds, waits
    /// until every one of them is gone.
    async fn detach(&self, kind: ResourceKind, associations: &[Association]) -> EngineResult<Vec<String>> {
        let control_plane = &self.ctx.control_plane;

        for association in associations {
            match control_plane.delete_association(kind, &association.id).await {
                Ok(()) => {}
                Err(ClientError::NotFound(_)) => {
                    warn!(association = %association.id, "Association already gone");
                }
                Err(e) => return Err(e.into()),
            }
            info!(
                association = %association.id,
                network = %association.network_id,
                "Deleted previous association"
            );
        }

        if kind.has_async_deletion() {
            let wait = self.ctx.config.timing.deletion_wait();
            for association in associations {
                let id = association.id.as_str();
                let outcome = wait_until_absent(wait, || async move {
                    control_plane
                        .get_association(kind, id)
                        .await
                        .map(|current| current.map_or(true, |a| a.state == AssociationState::Absent))
                })
                .await?;

                if let PollOutcome::TimedOut { polls, waited } = outcome {
                    error!(association = %id, polls, "Association deletion not confirmed");
                    return Err(EngineError::DeletionTimeout {
                        association_id: id.to_string(),
                        waited_secs: waited.as_secs(),
                    });
                }
            }
        }

        Ok(associations.iter().map(|a| a.id.clone()).collect())
    }

    async fn write_pointer(&self, resource_id: &str, expected: &PointerRecord, stage: Option<&StageName>) -> EngineResult<()> {
        self.ctx
            .state
            .swap_current_stage(resource_id, expected, stage)
            .await
            .map_err(|e| match e {
                StoreError::ConditionFailed { actual, .. } => EngineError::ConcurrentTransition {
                    resource: resource_id.to_string(),
                    detail: format!(
                        "stage pointer changed to {}",
                        actual.as_deref().unwrap_or("<missing>")
                    ),
                },
                other => EngineError::Store(other),
            })
    }
}

fn describe(result: &TransitionOutcome) -> String {
    match result {
        TransitionOutcome::AlreadyAssociated { stage } => format!("already associated with {}", stage),
        TransitionOutcome::Assigned {
            stage,
            association_id,
            removed,
        } => format!(
            "associated with {} ({}), removed {} previous",
            stage,
            association_id,
            removed.len()
        ),
        TransitionOutcome::Removed { removed } => format!("removed {} association(s)", removed.len()),
        TransitionOutcome::NothingToRemove => "no stage membership".to_string(),
    }
}
