//! # Backend Clients
//!
//! The two external collaborators the engine acts through.
//!
//! ## Seams
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Client Traits                                   │
//! │                                                                         │
//! │  MeshControlPlane                    ResourceDirectory                 │
//! │  ────────────────                    ─────────────────                 │
//! │  list_networks_page      (paged)     list_invitations_page   (paged)   │
//! │  network_labels                      accept_invitation                 │
//! │  list_associations_page  (paged)     list_grants_page        (paged)   │
//! │  create_association                  list_resources_page     (paged)   │
//! │  delete_association                  create_grant                      │
//! │  get_association (None = absent)     delete_grant                      │
//! │                                                                         │
//! │  Implementations:                                                      │
//! │  ├── http::HttpMeshControlPlane / http::HttpResourceDirectory          │
//! │  └── fake::FakeBackend (test-util)                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each paged method has a provided counterpart that follows `next_token`
//! until the listing is exhausted.

use async_trait::async_trait;
use meshstage_core::{
    Association, GrantInvitation, GrantOwner, GrantStatus, MemberResource, NetworkSummary,
    ResourceKind, TrustGrant,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ClientResult;

// =============================================================================
// Request / Response Types
// =============================================================================

/// One page of a paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    /// A final page.
    pub fn last(items: Vec<T>) -> Self {
        Page {
            items,
            next_token: None,
        }
    }
}

/// Filter for association listings. `kind` selects the association API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssociationFilter {
    pub kind: ResourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,
}

impl AssociationFilter {
    /// All associations of one resource.
    pub fn for_resource(kind: ResourceKind, resource_id: &str) -> Self {
        AssociationFilter {
            kind,
            resource_id: Some(resource_id.to_string()),
            network_id: None,
        }
    }

    /// All associations of one kind in one network.
    pub fn for_network(kind: ResourceKind, network_id: &str) -> Self {
        AssociationFilter {
            kind,
            resource_id: None,
            network_id: Some(network_id.to_string()),
        }
    }

    /// Associations between exactly this resource and network.
    pub fn between(kind: ResourceKind, resource_id: &str, network_id: &str) -> Self {
        AssociationFilter {
            kind,
            resource_id: Some(resource_id.to_string()),
            network_id: Some(network_id.to_string()),
        }
    }
}

/// Request to associate a resource with a network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssociation {
    pub kind: ResourceKind,
    /// Resource ARN or id.
    pub resource_identifier: String,
    pub network_id: String,
}

/// Filter for grant listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantQuery {
    pub owner: GrantOwner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GrantStatus>,
    /// `(tag key, tag value)` the grant must carry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<(String, String)>,
}

impl GrantQuery {
    /// ACTIVE grants received from other accounts.
    pub fn active_inbound() -> Self {
        GrantQuery {
            owner: GrantOwner::OtherAccounts,
            status: Some(GrantStatus::Active),
            tag: None,
        }
    }

    /// Grants created locally that carry `key = value`, any status.
    pub fn outbound_tagged(key: &str, value: &str) -> Self {
        GrantQuery {
            owner: GrantOwner::SelfAccount,
            status: None,
            tag: Some((key.to_string(), value.to_string())),
        }
    }
}

/// Filter for resources visible under grants.
///
/// Only resources exposed through ACTIVE grants are returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuery {
    pub owner: GrantOwner,
    /// Restrict to these grants; empty means every grant.
    #[serde(default)]
    pub grant_arns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ResourceKind>,
}

impl ResourceQuery {
    /// Resources of `kind` another account shares with us through one grant.
    pub fn under_grant(grant_arn: &str, kind: ResourceKind) -> Self {
        ResourceQuery {
            owner: GrantOwner::OtherAccounts,
            grant_arns: vec![grant_arn.to_string()],
            kind: Some(kind),
        }
    }

    /// Every inbound resource of `kind`.
    pub fn inbound_of_kind(kind: ResourceKind) -> Self {
        ResourceQuery {
            owner: GrantOwner::OtherAccounts,
            grant_arns: Vec::new(),
            kind: Some(kind),
        }
    }
}

/// Request to create an outbound grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGrantRequest {
    pub name: String,
    pub principals: Vec<String>,
    pub resource_arns: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

// =============================================================================
// Mesh Control Plane
// =============================================================================

/// Networks and resource-to-network associations.
#[async_trait]
pub trait MeshControlPlane: Send + Sync {
    async fn list_networks_page(&self, next_token: Option<String>) -> ClientResult<Page<NetworkSummary>>;

    /// Labels (tags) of a network.
    async fn network_labels(&self, network: &NetworkSummary) -> ClientResult<BTreeMap<String, String>>;

    async fn list_associations_page(
        &self,
        filter: &AssociationFilter,
        next_token: Option<String>,
    ) -> ClientResult<Page<Association>>;

    async fn create_association(&self, request: &CreateAssociation) -> ClientResult<Association>;

    async fn delete_association(&self, kind: ResourceKind, association_id: &str) -> ClientResult<()>;

    /// Fetches an association; `None` once it is gone.
    async fn get_association(&self, kind: ResourceKind, association_id: &str) -> ClientResult<Option<Association>>;

    /// Every network, across all pages.
    async fn list_networks(&self) -> ClientResult<Vec<NetworkSummary>> {
        let mut items = Vec::new();
        let mut token = None;
        loop {
            let page = self.list_networks_page(token).await?;
            items.extend(page.items);
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(items),
            }
        }
    }

    /// Every association matching `filter`, across all pages.
    async fn list_associations(&self, filter: &AssociationFilter) -> ClientResult<Vec<Association>> {
        let mut items = Vec::new();
        let mut token = None;
        loop {
            let page = self.list_associations_page(filter, token).await?;
            items.extend(page.items);
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(items),
            }
        }
    }
}

// =============================================================================
// Resource Directory
// =============================================================================

/// Cross-account trust grants and the resources they expose.
#[async_trait]
pub trait ResourceDirectory: Send + Sync {
    /// Invitations addressed to the local account.
    async fn list_invitations_page(&self, next_token: Option<String>) -> ClientResult<Page<GrantInvitation>>;

    async fn accept_invitation(&self, invitation_id: &str) -> ClientResult<()>;

    async fn list_grants_page(&self, query: &GrantQuery, next_token: Option<String>) -> ClientResult<Page<TrustGrant>>;

    async fn list_resources_page(
        &self,
        query: &ResourceQuery,
        next_token: Option<String>,
    ) -> ClientResult<Page<MemberResource>>;

    async fn create_grant(&self, request: &CreateGrantRequest) -> ClientResult<TrustGrant>;

    async fn delete_grant(&self, grant_arn: &str) -> ClientResult<()>;

    /// Every invitation, across all pages.
    async fn list_invitations(&self) -> ClientResult<Vec<GrantInvitation>> {
        let mut items = Vec::new();
        let mut token = None;
        loop {
            let page = self.list_invitations_page(token).await?;
            items.extend(page.items);
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(items),
            }
        }
    }

    /// Every grant matching `query`, across all pages.
    async fn list_grants(&self, query: &GrantQuery) -> ClientResult<Vec<TrustGrant>> {
        let mut items = Vec::new();
        let mut token = None;
        loop {
            let page = self.list_grants_page(query, token).await?;
            items.extend(page.items);
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(items),
            }
        }
    }

    /// Every resource matching `query`, across all pages.
    async fn list_resources(&self, query: &ResourceQuery) -> ClientResult<Vec<MemberResource>> {
        let mut items = Vec::new();
        let mut token = None;
        loop {
            let page = self.list_resources_page(query, token).await?;
            items.extend(page.items);
            match page.next_token {
                Some(next) => token = Some(next),
                None => return Ok(items),
            }
        }
    }
}
