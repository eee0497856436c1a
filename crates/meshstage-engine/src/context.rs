//! # Engine Context
//!
//! Everything a component needs for one invocation, passed by reference.

use meshstage_core::AdmissionPolicy;
use meshstage_store::StageStateStore;
use std::sync::Arc;

use crate::client::{MeshControlPlane, ResourceDirectory};
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::locks::ResourceLocks;

/// Shared handles and settings for the reconciliation components.
#[derive(Clone)]
pub struct EngineContext {
    pub control_plane: Arc<dyn MeshControlPlane>,
    pub directory: Arc<dyn ResourceDirectory>,
    pub state: StageStateStore,
    pub policy: AdmissionPolicy,
    pub config: Arc<EngineConfig>,
    pub locks: ResourceLocks,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("role", &self.config.role)
            .field("local_account", &self.config.policy.local_account)
            .field("policy", &self.policy)
            .field("state", &self.state)
            .finish()
    }
}

impl EngineContext {
    /// Builds a context, deriving the admission policy from `config`.
    pub fn new(
        config: EngineConfig,
        control_plane: Arc<dyn MeshControlPlane>,
        directory: Arc<dyn ResourceDirectory>,
        state: StageStateStore,
    ) -> EngineResult<Self> {
        let policy = config.admission_policy()?;
        Ok(EngineContext {
            control_plane,
            directory,
            state,
            policy,
            config: Arc::new(config),
            locks: ResourceLocks::new(),
        })
    }

    pub fn local_account(&self) -> &str {
        &self.config.policy.local_account
    }
}
