//! # In-Memory Backend
//!
//! A scripted control plane and directory for tests and dry runs.
//!
//! ## Scripted Behaviour
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FakeBackend                                      │
//! │                                                                         │
//! │  Eventual consistency                                                  │
//! │  • script_empty_resource_listings(n): next n resource listings empty   │
//! │  • set_deletion_polls(Some(n)): virtual-network association vanishes   │
//! │    on the n-th get after deletion; None keeps it DELETING forever      │
//! │                                                                         │
//! │  Failure injection                                                     │
//! │  • fail_association_create(resource) / fail_association_delete(id)     │
//! │  • fail_network_listing()                                              │
//! │                                                                         │
//! │  Inspection                                                            │
//! │  • calls("create_association"), associations(), grants() ...           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use meshstage_core::{
    resource_id_from_arn, Association, AssociationState, GrantInvitation, GrantOwner, GrantStatus,
    MemberResource, NetworkSummary, ResourceKind, TrustGrant, STAGE_LABEL,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use crate::client::{
    AssociationFilter, CreateAssociation, CreateGrantRequest, GrantQuery, MeshControlPlane, Page,
    ResourceDirectory, ResourceQuery,
};
use crate::error::{ClientError, ClientResult};

#[derive(Debug, Default)]
struct FakeState {
    networks: Vec<NetworkSummary>,
    labels: HashMap<String, BTreeMap<String, String>>,
    associations: BTreeMap<String, Association>,
    /// Gets observed since deletion, per deleting association.
    deletion_polls_seen: HashMap<String, u32>,
    invitations: Vec<GrantInvitation>,
    grants: Vec<TrustGrant>,
    resources: BTreeMap<String, Vec<MemberResource>>,
    empty_resource_listings: u32,
    deletion_polls: Option<u32>,
    page_size: usize,
    next_id: u64,
    fail_network_listing: bool,
    fail_create_for: BTreeSet<String>,
    fail_delete_for: BTreeSet<String>,
    calls: BTreeMap<&'static str, u32>,
}

/// In-memory [`MeshControlPlane`] and [`ResourceDirectory`].
#[derive(Debug)]
pub struct FakeBackend {
    local_account: String,
    state: Mutex<FakeState>,
}

fn paginate<T: Clone>(items: Vec<T>, page_size: usize, token: Option<String>) -> ClientResult<Page<T>> {
    let offset = match token {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| ClientError::Rejected {
                status: 400,
                message: format!("bad nextToken '{}'", token),
            })?,
        None => 0,
    };
    let end = (offset + page_size).min(items.len());
    let next_token = (end < items.len()).then(|| end.to_string());
    Ok(Page {
        items: items.get(offset..end).map(<[T]>::to_vec).unwrap_or_default(),
        next_token,
    })
}

impl FakeBackend {
    pub fn new(local_account: &str) -> Self {
        FakeBackend {
            local_account: local_account.to_string(),
            state: Mutex::new(FakeState {
                deletion_polls: Some(1),
                page_size: 2,
                ..FakeState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: &'static str) -> MutexGuard<'_, FakeState> {
        let mut state = self.lock();
        *state.calls.entry(call).or_default() += 1;
        state
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Adds a network with explicit labels.
    pub fn add_network(&self, id: &str, name: &str, owner: &str, labels: BTreeMap<String, String>) -> NetworkSummary {
        let network = NetworkSummary {
            id: id.to_string(),
            arn: format!("arn:aws:vpc-lattice:eu-west-1:{}:servicenetwork/{}", owner, id),
            name: name.to_string(),
            owner_account: Some(owner.to_string()),
        };
        let mut state = self.lock();
        state.networks.push(network.clone());
        state.labels.insert(id.to_string(), labels);
        network
    }

    /// Adds a network named after `stage` and labelled `stage = <stage>`.
    pub fn add_stage_network(&self, id: &str, stage: &str, owner: &str) -> NetworkSummary {
        let labels = BTreeMap::from([(STAGE_LABEL.to_string(), stage.to_string())]);
        self.add_network(id, stage, owner, labels)
    }

    /// Inserts an association directly and returns its id.
    pub fn add_association(&self, resource_id: &str, network_id: &str, kind: ResourceKind) -> String {
        let mut state = self.lock();
        Self::insert_association(&mut state, resource_id, network_id, kind)
    }

    fn insert_association(state: &mut FakeState, resource_id: &str, network_id: &str, kind: ResourceKind) -> String {
        state.next_id += 1;
        let id = format!("assoc-{}", state.next_id);
        let network_name = state
            .networks
            .iter()
            .find(|n| n.id == network_id)
            .map(|n| n.name.clone())
            .unwrap_or_default();
        state.associations.insert(
            id.clone(),
            Association {
                id: id.clone(),
                resource_id: resource_id.to_string(),
                network_id: network_id.to_string(),
                network_name,
                kind,
                state: AssociationState::Active,
            },
        );
        id
    }

    /// Forces the lifecycle state of an existing association.
    pub fn set_association_state(&self, association_id: &str, new_state: AssociationState) {
        if let Some(a) = self.lock().associations.get_mut(association_id) {
            a.state = new_state;
        }
    }

    pub fn add_invitation(&self, invitation: GrantInvitation) {
        self.lock().invitations.push(invitation);
    }

    /// Adds a pending invitation addressed to the local account.
    pub fn invite(&self, invitation_id: &str, grant_name: &str, sender: &str) -> GrantInvitation {
        let invitation = GrantInvitation {
            invitation_id: invitation_id.to_string(),
            grant_arn: format!("arn:aws:ram:eu-west-1:{}:resource-share/{}", sender, invitation_id),
            grant_name: grant_name.to_string(),
            sender_account: sender.to_string(),
            receiver_account: Some(self.local_account.clone()),
            status: GrantStatus::Pending,
        };
        self.add_invitation(invitation.clone());
        invitation
    }

    pub fn add_grant(&self, grant: TrustGrant) {
        self.lock().grants.push(grant);
    }

    /// Adds an inbound grant from `sender` and returns its ARN.
    pub fn add_inbound_grant(&self, grant_name: &str, sender: &str, status: GrantStatus) -> String {
        let arn = format!(
            "arn:aws:ram:eu-west-1:{}:resource-share/{}-{}",
            sender,
            grant_name,
            self.lock().grants.len() + 1
        );
        self.add_grant(TrustGrant {
            arn: arn.clone(),
            name: grant_name.to_string(),
            owner_account: sender.to_string(),
            status,
            tags: BTreeMap::new(),
        });
        arn
    }

    /// Changes the status of an existing grant, e.g. to revoke it.
    pub fn set_grant_status(&self, grant_arn: &str, status: GrantStatus) {
        if let Some(grant) = self.lock().grants.iter_mut().find(|g| g.arn == grant_arn) {
            grant.status = status;
        }
    }

    /// Makes `resource` visible under `grant_arn`.
    pub fn share_resource(&self, grant_arn: &str, resource: MemberResource) {
        self.lock()
            .resources
            .entry(grant_arn.to_string())
            .or_default()
            .push(resource);
    }

    /// The next `n` resource listings return nothing.
    pub fn script_empty_resource_listings(&self, n: u32) {
        self.lock().empty_resource_listings = n;
    }

    /// Gets needed after deletion before a virtual-network association is
    /// gone; `None` never completes the deletion.
    pub fn set_deletion_polls(&self, polls: Option<u32>) {
        self.lock().deletion_polls = polls;
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.lock().page_size = page_size.max(1);
    }

    pub fn fail_network_listing(&self) {
        self.lock().fail_network_listing = true;
    }

    pub fn fail_association_create(&self, resource_id: &str) {
        self.lock().fail_create_for.insert(resource_id.to_string());
    }

    pub fn fail_association_delete(&self, association_id: &str) {
        self.lock().fail_delete_for.insert(association_id.to_string());
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Number of calls made to `operation`.
    pub fn calls(&self, operation: &str) -> u32 {
        self.lock().calls.get(operation).copied().unwrap_or(0)
    }

    pub fn associations(&self) -> Vec<Association> {
        self.lock().associations.values().cloned().collect()
    }

    /// Live associations of `resource_id`.
    pub fn live_associations(&self, resource_id: &str) -> Vec<Association> {
        self.lock()
            .associations
            .values()
            .filter(|a| a.resource_id == resource_id && a.state.is_live())
            .cloned()
            .collect()
    }

    pub fn invitations(&self) -> Vec<GrantInvitation> {
        self.lock().invitations.clone()
    }

    pub fn grants(&self) -> Vec<TrustGrant> {
        self.lock().grants.clone()
    }

    /// Outbound grants not yet deleted.
    pub fn live_outbound_grants(&self) -> Vec<TrustGrant> {
        self.lock()
            .grants
            .iter()
            .filter(|g| g.owner_account == self.local_account && !g.status.is_terminal())
            .cloned()
            .collect()
    }
}

// =============================================================================
// Control Plane
// =============================================================================

#[async_trait]
impl MeshControlPlane for FakeBackend {
    async fn list_networks_page(&self, next_token: Option<String>) -> ClientResult<Page<NetworkSummary>> {
        let state = self.record("list_networks");
        if state.fail_network_listing {
            return Err(ClientError::Unavailable("network listing unavailable".into()));
        }
        paginate(state.networks.clone(), state.page_size, next_token)
    }

    async fn network_labels(&self, network: &NetworkSummary) -> ClientResult<BTreeMap<String, String>> {
        let state = self.record("network_labels");
        state
            .labels
            .get(&network.id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(network.id.clone()))
    }

    async fn list_associations_page(
        &self,
        filter: &AssociationFilter,
        next_token: Option<String>,
    ) -> ClientResult<Page<Association>> {
        let state = self.record("list_associations");
        let matching: Vec<Association> = state
            .associations
            .values()
            .filter(|a| a.kind == filter.kind)
            .filter(|a| filter.resource_id.as_deref().map_or(true, |r| a.resource_id == r))
            .filter(|a| filter.network_id.as_deref().map_or(true, |n| a.network_id == n))
            .cloned()
            .collect();
        paginate(matching, state.page_size, next_token)
    }

    async fn create_association(&self, request: &CreateAssociation) -> ClientResult<Association> {
        let mut state = self.record("create_association");
        let resource_id = resource_id_from_arn(&request.resource_identifier).to_string();

        if state.fail_create_for.contains(&resource_id) {
            return Err(ClientError::Unavailable(format!("create failed for {}", resource_id)));
        }
        if !state.networks.iter().any(|n| n.id == request.network_id) {
            return Err(ClientError::NotFound(request.network_id.clone()));
        }

        let id = Self::insert_association(&mut state, &resource_id, &request.network_id, request.kind);
        let association = state
            .associations
            .get_mut(&id)
            .ok_or_else(|| ClientError::NotFound(id.clone()))?;
        association.state = AssociationState::Creating;
        let created = association.clone();
        association.state = AssociationState::Active;
        Ok(created)
    }

    async fn delete_association(&self, kind: ResourceKind, association_id: &str) -> ClientResult<()> {
        let mut state = self.record("delete_association");
        if state.fail_delete_for.contains(association_id) {
            return Err(ClientError::Unavailable(format!("delete failed for {}", association_id)));
        }

        match state.associations.get(association_id) {
            Some(a) if a.kind == kind => {}
            _ => return Err(ClientError::NotFound(association_id.to_string())),
        }

        if kind.has_async_deletion() {
            if let Some(a) = state.associations.get_mut(association_id) {
                a.state = AssociationState::Deleting;
            }
            state.deletion_polls_seen.insert(association_id.to_string(), 0);
        } else {
            state.associations.remove(association_id);
        }
        Ok(())
    }

    async fn get_association(&self, kind: ResourceKind, association_id: &str) -> ClientResult<Option<Association>> {
        let mut state = self.record("get_association");
        let deletion_polls = state.deletion_polls;

        if let Some(seen) = state.deletion_polls_seen.get_mut(association_id) {
            *seen += 1;
            if deletion_polls.map_or(false, |needed| *seen >= needed) {
                state.deletion_polls_seen.remove(association_id);
                state.associations.remove(association_id);
                return Ok(None);
            }
        }

        Ok(state
            .associations
            .get(association_id)
            .filter(|a| a.kind == kind)
            .cloned())
    }
}

// =============================================================================
// Directory
// =============================================================================

#[async_trait]
impl ResourceDirectory for FakeBackend {
    async fn list_invitations_page(&self, next_token: Option<String>) -> ClientResult<Page<GrantInvitation>> {
        let state = self.record("list_invitations");
        paginate(state.invitations.clone(), state.page_size, next_token)
    }

    async fn accept_invitation(&self, invitation_id: &str) -> ClientResult<()> {
        let mut state = self.record("accept_invitation");
        let invitation = state
            .invitations
            .iter_mut()
            .find(|i| i.invitation_id == invitation_id)
            .ok_or_else(|| ClientError::NotFound(invitation_id.to_string()))?;
        invitation.status = GrantStatus::Active;
        let accepted = invitation.clone();

        match state.grants.iter_mut().find(|g| g.arn == accepted.grant_arn) {
            Some(grant) => grant.status = GrantStatus::Active,
            None => state.grants.push(TrustGrant {
                arn: accepted.grant_arn,
                name: accepted.grant_name,
                owner_account: accepted.sender_account,
                status: GrantStatus::Active,
                tags: BTreeMap::new(),
            }),
        }
        Ok(())
    }

    async fn list_grants_page(&self, query: &GrantQuery, next_token: Option<String>) -> ClientResult<Page<TrustGrant>> {
        let state = self.record("list_grants");
        let matching: Vec<TrustGrant> = state
            .grants
            .iter()
            .filter(|g| match query.owner {
                GrantOwner::SelfAccount => g.owner_account == self.local_account,
                GrantOwner::OtherAccounts => g.owner_account != self.local_account,
            })
            .filter(|g| query.status.map_or(true, |s| g.status == s))
            .filter(|g| {
                query
                    .tag
                    .as_ref()
                    .map_or(true, |(k, v)| g.tags.get(k) == Some(v))
            })
            .cloned()
            .collect();
        paginate(matching, state.page_size, next_token)
    }

    async fn list_resources_page(
        &self,
        query: &ResourceQuery,
        next_token: Option<String>,
    ) -> ClientResult<Page<MemberResource>> {
        let mut state = self.record("list_resources");
        if next_token.is_none() && state.empty_resource_listings > 0 {
            state.empty_resource_listings -= 1;
            return Ok(Page::last(Vec::new()));
        }

        let active: BTreeSet<&str> = state
            .grants
            .iter()
            .filter(|g| g.status == GrantStatus::Active)
            .filter(|g| match query.owner {
                GrantOwner::SelfAccount => g.owner_account == self.local_account,
                GrantOwner::OtherAccounts => g.owner_account != self.local_account,
            })
            .filter(|g| query.grant_arns.is_empty() || query.grant_arns.contains(&g.arn))
            .map(|g| g.arn.as_str())
            .collect();

        let matching: Vec<MemberResource> = state
            .resources
            .iter()
            .filter(|(arn, _)| active.contains(arn.as_str()))
            .flat_map(|(_, resources)| resources.iter())
            .filter(|r| query.kind.map_or(true, |k| r.kind == k))
            .cloned()
            .collect();
        paginate(matching, state.page_size, next_token)
    }

    async fn create_grant(&self, request: &CreateGrantRequest) -> ClientResult<TrustGrant> {
        let mut state = self.record("create_grant");
        state.next_id += 1;
        let grant = TrustGrant {
            arn: format!(
                "arn:aws:ram:eu-west-1:{}:resource-share/share-{}",
                self.local_account, state.next_id
            ),
            name: request.name.clone(),
            owner_account: self.local_account.clone(),
            status: GrantStatus::Pending,
            tags: request.tags.clone(),
        };
        state.grants.push(grant.clone());
        Ok(grant)
    }

    async fn delete_grant(&self, grant_arn: &str) -> ClientResult<()> {
        let mut state = self.record("delete_grant");
        let grant = state
            .grants
            .iter_mut()
            .find(|g| g.arn == grant_arn)
            .ok_or_else(|| ClientError::NotFound(grant_arn.to_string()))?;
        grant.status = GrantStatus::Deleting;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: &str = "111122223333";

    #[tokio::test]
    async fn test_pagination_collects_every_page() {
        let fake = FakeBackend::new(LOCAL);
        fake.set_page_size(1);
        for i in 0..3 {
            fake.add_stage_network(&format!("sn-{}", i), "alpha", LOCAL);
        }

        let networks = fake.list_networks().await.unwrap();
        assert_eq!(networks.len(), 3);
        assert_eq!(fake.calls("list_networks"), 3);
    }

    #[tokio::test]
    async fn test_async_deletion_completes_after_polls() {
        let fake = FakeBackend::new(LOCAL);
        fake.add_stage_network("sn-a", "alpha", LOCAL);
        fake.set_deletion_polls(Some(2));
        let id = fake.add_association("vpc-1", "sn-a", ResourceKind::VirtualNetwork);

        fake.delete_association(ResourceKind::VirtualNetwork, &id).await.unwrap();
        let first = fake.get_association(ResourceKind::VirtualNetwork, &id).await.unwrap();
        assert_eq!(first.map(|a| a.state), Some(AssociationState::Deleting));
        assert!(fake
            .get_association(ResourceKind::VirtualNetwork, &id)
            .await
            .unwrap()
            .is_none());
    }
}
