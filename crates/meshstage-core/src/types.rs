//! # Domain Types
//!
//! Core domain types used throughout meshstage.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ NetworkSummary  │   │   TrustGrant    │   │  Association    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id / arn       │   │  arn            │   │  id             │       │
//! │  │  name           │   │  name (= stage) │   │  resource_id    │       │
//! │  │  owner_account  │   │  owner_account  │   │  network_id     │       │
//! │  └─────────────────┘   │  status         │   │  network_name   │       │
//! │                        └─────────────────┘   │  state          │       │
//! │  ┌─────────────────┐   ┌─────────────────┐   └─────────────────┘       │
//! │  │   StageName     │   │  GrantStatus    │   ┌─────────────────┐       │
//! │  │  ─────────────  │   │  ─────────────  │   │ AssociationState│       │
//! │  │  lowercase,     │   │  Pending        │   │  ─────────────  │       │
//! │  │  validated      │   │  Active         │   │  Creating       │       │
//! │  └─────────────────┘   │  Deleting       │   │  Active         │       │
//! │                        │  Deleted        │   │  Deleting       │       │
//! │  ┌─────────────────┐   └─────────────────┘   │  Absent         │       │
//! │  │ MemberResource  │                         └─────────────────┘       │
//! │  │  id, arn, kind  │                                                    │
//! │  └─────────────────┘                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All wire-facing types use camelCase field names so they can be decoded
//! directly from control plane and directory responses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::validation::normalize_stage_name;

// =============================================================================
// Stage Name
// =============================================================================

/// A validated, lowercase stage name (e.g. `beta`, `prod`).
///
/// Construction always goes through [`normalize_stage_name`], so two
/// `StageName`s compare equal exactly when their case-folded labels match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StageName(String);

impl StageName {
    /// Parses and case-folds a raw stage label.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        normalize_stage_name(raw).map(StageName)
    }

    /// Returns the stage name as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StageName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StageName::parse(&value)
    }
}

impl From<StageName> for String {
    fn from(stage: StageName) -> Self {
        stage.0
    }
}

impl FromStr for StageName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageName::parse(s)
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// ARN Helpers
// =============================================================================

/// Extracts the account segment of an ARN (`arn:partition:service:region:ACCOUNT:...`).
pub fn account_from_arn(arn: &str) -> Option<&str> {
    arn.split(':').nth(4).filter(|account| !account.is_empty())
}

/// Returns the trailing `/`-separated segment of an ARN, which is the
/// resource id used for grant correlation tags.
pub fn resource_id_from_arn(arn: &str) -> &str {
    arn.rsplit('/').next().unwrap_or(arn)
}

// =============================================================================
// Networks
// =============================================================================

/// A network as returned by the control plane listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    pub id: String,
    pub arn: String,
    pub name: String,
    /// Owning account, when the listing reports it explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_account: Option<String>,
}

impl NetworkSummary {
    /// Returns the owning account, falling back to the ARN's account segment.
    pub fn owner(&self) -> Option<&str> {
        self.owner_account
            .as_deref()
            .or_else(|| account_from_arn(&self.arn))
    }

    /// Returns true if `account` owns this network.
    pub fn is_owned_by(&self, account: &str) -> bool {
        self.owner() == Some(account)
    }
}

/// A network that carries a recognised stage label and is owned locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageNetwork {
    pub stage: StageName,
    pub network_id: String,
    pub owner_account: String,
}

// =============================================================================
// Member Resources
// =============================================================================

/// The kind of member resource whose membership is managed.
///
/// Association APIs differ per kind, and only virtual-network associations
/// are deleted asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// A service endpoint.
    Service,
    /// A virtual network instance.
    VirtualNetwork,
}

impl ResourceKind {
    /// Wire representation used in query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Service => "service",
            ResourceKind::VirtualNetwork => "virtual-network",
        }
    }

    /// Infers the kind from an ARN or bare identifier.
    ///
    /// ```rust
    /// use meshstage_core::ResourceKind;
    ///
    /// let arn = "arn:aws:vpc-lattice:eu-west-1:111122223333:service/svc-0abc";
    /// assert_eq!(ResourceKind::infer(arn), Some(ResourceKind::Service));
    /// assert_eq!(ResourceKind::infer("vpc-0123"), Some(ResourceKind::VirtualNetwork));
    /// ```
    pub fn infer(identifier: &str) -> Option<Self> {
        let tail = resource_id_from_arn(identifier);
        if identifier.contains(":service/") || tail.starts_with("svc-") {
            Some(ResourceKind::Service)
        } else if identifier.contains(":vpc/") || tail.starts_with("vpc-") {
            Some(ResourceKind::VirtualNetwork)
        } else {
            None
        }
    }

    /// Returns true when deletions of this kind complete asynchronously and
    /// must be confirmed before a replacement association is created.
    pub fn has_async_deletion(&self) -> bool {
        matches!(self, ResourceKind::VirtualNetwork)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "service" => Ok(ResourceKind::Service),
            "virtual-network" | "vpc" => Ok(ResourceKind::VirtualNetwork),
            other => Err(ValidationError::InvalidFormat {
                field: "kind".to_string(),
                reason: format!("unknown resource kind '{}'", other),
            }),
        }
    }
}

/// A resource visible under a trust grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberResource {
    pub id: String,
    pub arn: String,
    pub kind: ResourceKind,
}

/// Reference to the resource named by a change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// Correlation id (last ARN segment, or the bare id).
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ResourceKind>,
}

impl ResourceRef {
    /// Builds a reference from a full ARN.
    pub fn from_arn(arn: &str) -> Self {
        ResourceRef {
            id: resource_id_from_arn(arn).to_string(),
            arn: Some(arn.to_string()),
            kind: ResourceKind::infer(arn),
        }
    }

    /// Builds a reference from a bare identifier (e.g. `vpc-0123`).
    pub fn from_id(id: &str) -> Self {
        ResourceRef {
            id: id.to_string(),
            arn: None,
            kind: ResourceKind::infer(id),
        }
    }

    /// The identifier the control plane accepts: the ARN when known.
    pub fn identifier(&self) -> &str {
        self.arn.as_deref().unwrap_or(&self.id)
    }
}

// =============================================================================
// Trust Grants
// =============================================================================

/// Lifecycle status of a trust grant or invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantStatus {
    Pending,
    Active,
    Deleting,
    Deleted,
    Failed,
}

impl GrantStatus {
    /// PENDING or ACTIVE: the grant still counts toward the one-per-resource rule.
    pub fn is_live(&self) -> bool {
        matches!(self, GrantStatus::Pending | GrantStatus::Active)
    }

    /// DELETED or DELETING: nothing left to do for this grant.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GrantStatus::Deleting | GrantStatus::Deleted)
    }

    /// Wire representation used in query strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Pending => "PENDING",
            GrantStatus::Active => "ACTIVE",
            GrantStatus::Deleting => "DELETING",
            GrantStatus::Deleted => "DELETED",
            GrantStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ownership direction used when listing grants and shared resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantOwner {
    /// Grants created by the local account (outbound).
    #[serde(rename = "SELF")]
    SelfAccount,
    /// Grants created by other accounts and received here (inbound).
    #[serde(rename = "OTHER-ACCOUNTS")]
    OtherAccounts,
}

impl GrantOwner {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantOwner::SelfAccount => "SELF",
            GrantOwner::OtherAccounts => "OTHER-ACCOUNTS",
        }
    }
}

/// An inbound invitation to join a trust grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantInvitation {
    pub invitation_id: String,
    pub grant_arn: String,
    pub grant_name: String,
    pub sender_account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_account: Option<String>,
    pub status: GrantStatus,
}

/// A cross-account trust grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustGrant {
    pub arn: String,
    pub name: String,
    pub owner_account: String,
    pub status: GrantStatus,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

// =============================================================================
// Associations
// =============================================================================

/// Lifecycle state of a resource-to-network association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationState {
    Creating,
    Active,
    Deleting,
    /// Terminal state after confirmed deletion.
    Absent,
    Failed,
}

impl AssociationState {
    /// Creating or active: the association counts as a membership.
    pub fn is_live(&self) -> bool {
        matches!(self, AssociationState::Creating | AssociationState::Active)
    }
}

/// The binding between a member resource and a stage network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Association {
    pub id: String,
    pub resource_id: String,
    pub network_id: String,
    /// Human-readable network name; stage networks are named after their stage.
    pub network_name: String,
    pub kind: ResourceKind,
    pub state: AssociationState,
}

impl Association {
    /// Derives the stage from the network name, when it is a valid stage name.
    pub fn stage(&self) -> Option<StageName> {
        StageName::parse(&self.network_name).ok()
    }

    /// Returns true if this association binds the resource to `stage`,
    /// either by network name or by the registry's network id for the stage.
    pub fn targets(&self, stage: &StageName, stage_network_id: Option<&str>) -> bool {
        self.stage().as_ref() == Some(stage) || stage_network_id == Some(self.network_id.as_str())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_name_serde_is_case_folded() {
        let stage: StageName = serde_json::from_str("\"Prod\"").unwrap();
        assert_eq!(stage.as_str(), "prod");
        assert!(serde_json::from_str::<StageName>("\"\"").is_err());
    }

    #[test]
    fn test_network_owner_falls_back_to_arn() {
        let network = NetworkSummary {
            id: "sn-1".into(),
            arn: "arn:aws:vpc-lattice:eu-west-1:111122223333:servicenetwork/sn-1".into(),
            name: "beta".into(),
            owner_account: None,
        };
        assert_eq!(network.owner(), Some("111122223333"));
        assert!(network.is_owned_by("111122223333"));
        assert!(!network.is_owned_by("999999999999"));
    }

    #[test]
    fn test_resource_ref_from_arn() {
        let r = ResourceRef::from_arn("arn:aws:vpc-lattice:eu-west-1:111122223333:service/svc-0abc");
        assert_eq!(r.id, "svc-0abc");
        assert_eq!(r.kind, Some(ResourceKind::Service));
        assert!(r.identifier().starts_with("arn:"));
    }

    #[test]
    fn test_grant_status_classes() {
        assert!(GrantStatus::Pending.is_live());
        assert!(GrantStatus::Active.is_live());
        assert!(!GrantStatus::Deleting.is_live());
        assert!(GrantStatus::Deleted.is_terminal());
        assert!(!GrantStatus::Failed.is_terminal());
    }

    #[test]
    fn test_grant_owner_wire_format() {
        assert_eq!(
            serde_json::to_string(&GrantOwner::OtherAccounts).unwrap(),
            "\"OTHER-ACCOUNTS\""
        );
    }

    #[test]
    fn test_association_targets_by_name_or_network() {
        let assoc = Association {
            id: "a-1".into(),
            resource_id: "svc-1".into(),
            network_id: "sn-b".into(),
            network_name: "beta".into(),
            kind: ResourceKind::Service,
            state: AssociationState::Active,
        };
        let beta = StageName::parse("beta").unwrap();
        let prod = StageName::parse("prod").unwrap();
        assert!(assoc.targets(&beta, None));
        assert!(!assoc.targets(&prod, Some("sn-p")));
        assert!(assoc.targets(&prod, Some("sn-b")));
    }
}
