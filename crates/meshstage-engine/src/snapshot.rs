//! # Network Snapshot
//!
//! One listing of the control plane's networks, captured per sweep. Labels
//! are read only for networks the local account owns; shared-in networks
//! never become stage networks.

use meshstage_core::event::stage_from_labels;
use meshstage_core::{AdmissionPolicy, NetworkSummary, StageName, StageNetwork};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::client::MeshControlPlane;
use crate::error::ClientResult;

/// Networks and owned-network labels as seen at capture time.
#[derive(Debug, Clone, Default)]
pub struct NetworkSnapshot {
    local_account: String,
    networks: Vec<NetworkSummary>,
    labels: BTreeMap<String, BTreeMap<String, String>>,
}

impl NetworkSnapshot {
    /// Lists every network and reads the labels of locally owned ones.
    ///
    /// Any listing or label-read error aborts the capture.
    #[instrument(skip(control_plane))]
    pub async fn capture(control_plane: &dyn MeshControlPlane, local_account: &str) -> ClientResult<Self> {
        let networks = control_plane.list_networks().await?;
        let mut labels = BTreeMap::new();

        for network in networks.iter().filter(|n| n.is_owned_by(local_account)) {
            let network_labels = control_plane.network_labels(network).await?;
            labels.insert(network.id.clone(), network_labels);
        }

        debug!(
            networks = networks.len(),
            owned = labels.len(),
            "Captured network snapshot"
        );

        Ok(NetworkSnapshot {
            local_account: local_account.to_string(),
            networks,
            labels,
        })
    }

    /// Owned networks whose stage label names a configured stage, in listing
    /// order. Several networks may carry the same stage.
    pub fn stage_networks(&self, policy: &AdmissionPolicy) -> Vec<StageNetwork> {
        self.networks
            .iter()
            .filter_map(|network| {
                let stage = self.stage_of(network)?;
                if !policy.stage_names.contains(&stage) {
                    debug!(network = %network.id, stage = %stage, "Stage label not configured");
                    return None;
                }
                Some(StageNetwork {
                    stage,
                    network_id: network.id.clone(),
                    owner_account: self.local_account.clone(),
                })
            })
            .collect()
    }

    fn stage_of(&self, network: &NetworkSummary) -> Option<StageName> {
        let labels = self.labels.get(&network.id)?;
        match stage_from_labels(labels) {
            Ok(stage) => stage,
            Err(e) => {
                debug!(network = %network.id, error = %e, "Ignoring malformed stage label");
                None
            }
        }
    }
}
