//! # Stage Registry
//!
//! The authoritative mapping from stage name to target network id.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Stage Registry Lifecycle                            │
//! │                                                                         │
//! │  Sweep start                                                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  StageRegistry::new()      ← always rebuilt from scratch               │
//! │       │                                                                 │
//! │       ├── insert_first_seen("beta", "sn-1")   → Inserted               │
//! │       ├── insert_first_seen("beta", "sn-7")   → Duplicate { sn-1 }     │
//! │       └── insert_first_seen("prod", "sn-2")   → Inserted               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  to_json() → {"beta":"sn-1","prod":"sn-2"}   (overwrite, no merge)     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Read by acceptor / convergence / pruner / transitions                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::types::StageName;

/// Result of inserting a stage into the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryInsert {
    /// The stage was not yet mapped.
    Inserted,
    /// The stage was already mapped; the existing network wins.
    Duplicate { kept_network_id: String },
}

/// Mapping stage name → network id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageRegistry {
    entries: BTreeMap<StageName, String>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `stage` to `network_id` unless the stage is already mapped.
    ///
    /// Duplicate stage labels across networks are tolerated: the first
    /// network seen keeps the stage.
    pub fn insert_first_seen(&mut self, stage: StageName, network_id: &str) -> RegistryInsert {
        match self.entries.get(&stage) {
            Some(existing) => RegistryInsert::Duplicate {
                kept_network_id: existing.clone(),
            },
            None => {
                self.entries.insert(stage, network_id.to_string());
                RegistryInsert::Inserted
            }
        }
    }

    /// Returns the network id registered for `stage`.
    pub fn network_for(&self, stage: &StageName) -> Option<&str> {
        self.entries.get(stage).map(String::as_str)
    }

    /// Reverse lookup: the stage a network is registered under.
    pub fn stage_for_network(&self, network_id: &str) -> Option<&StageName> {
        self.entries
            .iter()
            .find(|(_, id)| id.as_str() == network_id)
            .map(|(stage, _)| stage)
    }

    /// All registered network ids, in stage order.
    pub fn network_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StageName, &str)> {
        self.entries.iter().map(|(stage, id)| (stage, id.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the registry as a flat JSON object.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a registry document written by [`StageRegistry::to_json`].
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::InvalidRegistry(e.to_string()))
    }
}

impl FromIterator<(StageName, String)> for StageRegistry {
    fn from_iter<I: IntoIterator<Item = (StageName, String)>>(iter: I) -> Self {
        let mut registry = StageRegistry::new();
        for (stage, network_id) in iter {
            registry.insert_first_seen(stage, &network_id);
        }
        registry
    }
}
