//! # Config Store
//!
//! The key-value seam the reconciliation engine reads and writes through,
//! plus a typed accessor for the two records it cares about.
//!
//! ## Records
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Stage State Records                               │
//! │                                                                         │
//! │  <registry_key>                   {"alpha":"sn-a","beta":"sn-b"}       │
//! │      written once per sweep, overwrite (no merge)                      │
//! │                                                                         │
//! │  <pointer_prefix>/<resource-id>   "beta" | "NONE"                      │
//! │      written after a transition completes, conditional write           │
//! │                                                                         │
//! │  Implementations:                                                      │
//! │  ├── Database / ParameterRepository (SQLite)                           │
//! │  └── MemoryConfigStore (tests, dry runs)                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use meshstage_core::{StageName, StageRegistry, NO_CURRENT_STAGE};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::pool::Database;
use crate::repository::parameter::ParameterRepository;

// =============================================================================
// ConfigStore Trait
// =============================================================================

/// Get / put / conditional-write access to named string parameters.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Returns the current value, if any.
    async fn get(&self, name: &str) -> StoreResult<Option<String>>;

    /// Writes `value`, overwriting unconditionally.
    async fn put(&self, name: &str, value: &str) -> StoreResult<()>;

    /// Writes `value` only when the current value equals `expected`
    /// (`None` = parameter must be missing).
    async fn compare_and_swap(&self, name: &str, expected: Option<&str>, value: &str) -> StoreResult<()>;
}

#[async_trait]
impl ConfigStore for ParameterRepository {
    async fn get(&self, name: &str) -> StoreResult<Option<String>> {
        Ok(ParameterRepository::get(self, name).await?.map(|r| r.value))
    }

    async fn put(&self, name: &str, value: &str) -> StoreResult<()> {
        ParameterRepository::put(self, name, value).await.map(|_| ())
    }

    async fn compare_and_swap(&self, name: &str, expected: Option<&str>, value: &str) -> StoreResult<()> {
        ParameterRepository::compare_and_swap(self, name, expected, value)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ConfigStore for Database {
    async fn get(&self, name: &str) -> StoreResult<Option<String>> {
        ConfigStore::get(&self.parameters(), name).await
    }

    async fn put(&self, name: &str, value: &str) -> StoreResult<()> {
        ConfigStore::put(&self.parameters(), name, value).await
    }

    async fn compare_and_swap(&self, name: &str, expected: Option<&str>, value: &str) -> StoreResult<()> {
        ConfigStore::compare_and_swap(&self.parameters(), name, expected, value).await
    }
}

// =============================================================================
// In-memory Store
// =============================================================================

/// Process-local config store.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, name: &str) -> StoreResult<Option<String>> {
        Ok(self.values.lock().await.get(name).cloned())
    }

    async fn put(&self, name: &str, value: &str) -> StoreResult<()> {
        self.values
            .lock()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn compare_and_swap(&self, name: &str, expected: Option<&str>, value: &str) -> StoreResult<()> {
        let mut values = self.values.lock().await;
        let actual = values.get(name).cloned();
        if actual.as_deref() != expected {
            return Err(StoreError::ConditionFailed {
                name: name.to_string(),
                expected: expected.map(str::to_string),
                actual,
            });
        }
        values.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

// =============================================================================
// Stage State Store
// =============================================================================

/// What the pointer record holds, including how it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerRecord {
    /// Decoded stage, `None` for a missing record or the sentinel.
    pub stage: Option<StageName>,
    /// Raw stored value, needed for the conditional write.
    raw: Option<String>,
}

impl PointerRecord {
    /// Returns true when no pointer record has ever been written.
    pub fn is_missing(&self) -> bool {
        self.raw.is_none()
    }
}

/// Typed accessor for the stage registry and per-resource stage pointers.
#[derive(Clone)]
pub struct StageStateStore {
    store: Arc<dyn ConfigStore>,
    registry_key: String,
    pointer_prefix: String,
}

impl std::fmt::Debug for StageStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageStateStore")
            .field("registry_key", &self.registry_key)
            .field("pointer_prefix", &self.pointer_prefix)
            .finish()
    }
}

impl StageStateStore {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        registry_key: impl Into<String>,
        pointer_prefix: impl Into<String>,
    ) -> Self {
        StageStateStore {
            store,
            registry_key: registry_key.into(),
            pointer_prefix: pointer_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Parameter name of a resource's stage pointer.
    pub fn pointer_key(&self, resource_id: &str) -> String {
        format!("{}/{}", self.pointer_prefix, resource_id)
    }

    /// Loads the registry. A missing record reads as an empty registry.
    pub async fn load_registry(&self) -> StoreResult<StageRegistry> {
        match self.store.get(&self.registry_key).await? {
            Some(json) => StageRegistry::from_json(&json)
                .map_err(|e| StoreError::corrupt(&self.registry_key, e)),
            None => Ok(StageRegistry::new()),
        }
    }

    /// Overwrites the registry with `registry`.
    pub async fn save_registry(&self, registry: &StageRegistry) -> StoreResult<()> {
        let json = registry.to_json()?;
        debug!(key = %self.registry_key, stages = registry.len(), "Saving stage registry");
        self.store.put(&self.registry_key, &json).await
    }

    /// Reads a resource's current stage pointer.
    pub async fn load_current_stage(&self, resource_id: &str) -> StoreResult<PointerRecord> {
        let key = self.pointer_key(resource_id);
        let raw = self.store.get(&key).await?;

        let stage = match raw.as_deref() {
            None | Some(NO_CURRENT_STAGE) => None,
            Some(value) => Some(StageName::parse(value).map_err(|e| StoreError::corrupt(&key, e))?),
        };

        Ok(PointerRecord { stage, raw })
    }

    /// Conditionally replaces the pointer previously read as `expected`.
    ///
    /// `new = None` clears the pointer by writing the sentinel.
    pub async fn swap_current_stage(
        &self,
        resource_id: &str,
        expected: &PointerRecord,
        new: Option<&StageName>,
    ) -> StoreResult<()> {
        let key = self.pointer_key(resource_id);
        let value = new.map(StageName::as_str).unwrap_or(NO_CURRENT_STAGE);

        debug!(resource = %resource_id, stage = %value, "Updating current stage pointer");
        self.store
            .compare_and_swap(&key, expected.raw.as_deref(), value)
            .await
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
