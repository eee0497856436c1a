//! # Stage Registry Resolver
//!
//! Rebuilds the `stage → network` registry from the control plane and
//! persists it, overwriting whatever was stored.
//!
//! ```text
//! list networks ─► keep owned ─► read labels ─► keep configured stages
//!                                                     │
//!                     first-seen wins on duplicates ◄─┘
//!                                 │
//!                                 ▼
//!                      save registry (overwrite)
//! ```

use meshstage_core::{InvocationOutcome, RegistryInsert, StageName, StageRegistry};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::snapshot::NetworkSnapshot;

/// A network dropped because another one already claimed its stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateStage {
    pub stage: StageName,
    pub kept_network_id: String,
    pub dropped_network_id: String,
}

/// Result of one resolution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    pub registry: StageRegistry,
    pub duplicates: Vec<DuplicateStage>,
}

/// Builds the registry from a snapshot.
pub fn build_registry(snapshot: &NetworkSnapshot, ctx: &EngineContext) -> Resolution {
    let mut resolution = Resolution::default();

    for network in snapshot.stage_networks(&ctx.policy) {
        match resolution
            .registry
            .insert_first_seen(network.stage.clone(), &network.network_id)
        {
            RegistryInsert::Inserted => {}
            RegistryInsert::Duplicate { kept_network_id } => {
                warn!(
                    stage = %network.stage,
                    kept = %kept_network_id,
                    dropped = %network.network_id,
                    "Duplicate stage label, keeping first network"
                );
                resolution.duplicates.push(DuplicateStage {
                    stage: network.stage,
                    kept_network_id,
                    dropped_network_id: network.network_id,
                });
            }
        }
    }

    resolution
}

/// Resolver component.
pub struct StageRegistryResolver<'a> {
    ctx: &'a EngineContext,
}

impl<'a> StageRegistryResolver<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        StageRegistryResolver { ctx }
    }

    /// Captures a snapshot, builds the registry and saves it.
    #[instrument(skip(self))]
    pub async fn resolve(&self) -> EngineResult<Resolution> {
        let snapshot =
            NetworkSnapshot::capture(self.ctx.control_plane.as_ref(), self.ctx.local_account()).await?;
        let resolution = build_registry(&snapshot, self.ctx);

        self.ctx.state.save_registry(&resolution.registry).await?;
        info!(stages = resolution.registry.len(), "Stage registry refreshed");

        Ok(resolution)
    }

    /// Runs [`resolve`](Self::resolve) as a sweep phase.
    pub async fn run(&self) -> EngineResult<InvocationOutcome> {
        let mut outcome = InvocationOutcome::new("resolve_registry");

        let resolution = self.resolve().await.map_err(|e| {
            error!(error = %e, "Stage registry resolution failed");
            e
        })?;

        for (stage, network_id) in resolution.registry.iter() {
            outcome.processed(format!("{}={}", stage, network_id));
        }
        for duplicate in &resolution.duplicates {
            outcome.skip(
                duplicate.dropped_network_id.clone(),
                format!(
                    "stage '{}' already mapped to {}",
                    duplicate.stage, duplicate.kept_network_id
                ),
            );
        }

        Ok(outcome.finish())
    }
}
