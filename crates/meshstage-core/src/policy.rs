//! # Admission Policy
//!
//! The two-clause policy that decides whether an inbound trust grant (or an
//! invitation to one) is honoured.
//!
//! ## Admission Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Admission Policy                                   │
//! │                                                                         │
//! │  Clause 1: sender account                                              │
//! │  ──────────────────────────                                            │
//! │  allow-list = ["ALL"]           → any sender admitted                  │
//! │  allow-list = ["1111", "2222"]  → sender must be listed                │
//! │                                                                         │
//! │  Clause 2: grant name                                                  │
//! │  ─────────────────────                                                 │
//! │  name must EXACTLY equal one of the configured (case-folded) stages    │
//! │                                                                         │
//! │  Failing either clause is a policy skip: logged, never rejected,       │
//! │  never retried.                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::ValidationError;
use crate::types::StageName;
use crate::ALLOW_ANY_ACCOUNT;

// =============================================================================
// Account Allow-list
// =============================================================================

/// Sender accounts whose grants are honoured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountAllowlist {
    /// The sentinel `ALL` was configured: accept from anyone.
    Any,
    /// Only these accounts.
    Only(BTreeSet<String>),
}

impl AccountAllowlist {
    /// Builds an allow-list from raw entries.
    ///
    /// Entries are trimmed and empty ones dropped. If any entry is the `ALL`
    /// sentinel the allow-list is disabled.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let accounts: BTreeSet<String> = entries
            .into_iter()
            .map(|e| e.as_ref().trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();

        if accounts.contains(ALLOW_ANY_ACCOUNT) {
            AccountAllowlist::Any
        } else {
            AccountAllowlist::Only(accounts)
        }
    }

    /// Parses a comma-separated list (`"1111,2222"` or `"ALL"`).
    pub fn parse(raw: &str) -> Self {
        Self::from_entries(raw.split(','))
    }

    pub fn permits(&self, account: &str) -> bool {
        match self {
            AccountAllowlist::Any => true,
            AccountAllowlist::Only(accounts) => accounts.contains(account),
        }
    }
}

impl Default for AccountAllowlist {
    fn default() -> Self {
        AccountAllowlist::Only(BTreeSet::new())
    }
}

// =============================================================================
// Stage Set
// =============================================================================

/// Parses a comma-separated list of stage names, case-folding each entry and
/// dropping empty ones.
pub fn parse_stage_names(raw: &str) -> Result<BTreeSet<StageName>, ValidationError> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(StageName::parse)
        .collect()
}

// =============================================================================
// Policy Skip
// =============================================================================

/// Why a grant was not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PolicySkip {
    SenderNotAllowed { account: String },
    UnknownStage { name: String },
}

impl fmt::Display for PolicySkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicySkip::SenderNotAllowed { account } => {
                write!(f, "sender account {} is not in the allow-list", account)
            }
            PolicySkip::UnknownStage { name } => {
                write!(f, "grant name '{}' is not a configured stage", name)
            }
        }
    }
}

// =============================================================================
// Admission Policy
// =============================================================================

/// Stage set plus allow-list, read once per cold start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionPolicy {
    pub stage_names: BTreeSet<StageName>,
    pub allowlist: AccountAllowlist,
}

impl AdmissionPolicy {
    pub fn new(stage_names: BTreeSet<StageName>, allowlist: AccountAllowlist) -> Self {
        AdmissionPolicy {
            stage_names,
            allowlist,
        }
    }

    /// Looks up a configured stage by its exact name.
    ///
    /// Grant names are compared without case-folding: a grant named `Beta`
    /// does not match the configured stage `beta`.
    pub fn stage(&self, name: &str) -> Option<&StageName> {
        self.stage_names.iter().find(|s| s.as_str() == name)
    }

    /// Returns true if `name` is a configured stage.
    pub fn is_stage(&self, name: &str) -> bool {
        self.stage(name).is_some()
    }

    /// Applies both admission clauses, returning the matched stage.
    pub fn admit(&self, sender_account: &str, grant_name: &str) -> Result<StageName, PolicySkip> {
        if !self.allowlist.permits(sender_account) {
            return Err(PolicySkip::SenderNotAllowed {
                account: sender_account.to_string(),
            });
        }

        self.stage(grant_name)
            .cloned()
            .ok_or_else(|| PolicySkip::UnknownStage {
                name: grant_name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(stages: &str, allow: &str) -> AdmissionPolicy {
        AdmissionPolicy::new(
            parse_stage_names(stages).unwrap(),
            AccountAllowlist::parse(allow),
        )
    }

    #[test]
    fn test_allowlist_sentinel() {
        assert_eq!(AccountAllowlist::parse("1111, ALL"), AccountAllowlist::Any);
        assert!(AccountAllowlist::parse("ALL").permits("anyone"));
        assert!(!AccountAllowlist::parse("").permits("1111"));
    }

    #[test]
    fn test_stage_names_are_case_folded_and_trimmed() {
        let stages = parse_stage_names(" Alpha, BETA ,,prod").unwrap();
        let names: Vec<&str> = stages.iter().map(StageName::as_str).collect();
        assert_eq!(names, vec!["alpha", "beta", "prod"]);
    }

    #[test]
    fn test_admit_both_clauses() {
        let p = policy("alpha,beta", "1111");
        assert_eq!(p.admit("1111", "beta").unwrap().as_str(), "beta");
        assert_eq!(
            p.admit("2222", "beta"),
            Err(PolicySkip::SenderNotAllowed {
                account: "2222".into()
            })
        );
        assert_eq!(
            p.admit("1111", "gamma"),
            Err(PolicySkip::UnknownStage {
                name: "gamma".into()
            })
        );
    }

    #[test]
    fn test_grant_name_match_is_exact() {
        let p = policy("beta", "ALL");
        assert!(p.admit("1111", "Beta").is_err());
        assert!(p.admit("1111", "beta").is_ok());
    }
}
