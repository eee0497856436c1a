//! # Engine Configuration
//!
//! Configuration management for the reconciliation engine. Read once per
//! cold start and never re-read mid-sweep.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MESHSTAGE_STAGE_NAMES=alpha,beta,prod                              │
//! │     MESHSTAGE_ALLOWED_ACCOUNTS=ALL                                     │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/meshstage/meshstage.toml (Linux)                         │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     5 listing attempts 1s apart, 60s deletion wait                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! role = "membership"  # membership | sharing
//!
//! [policy]
//! local_account = "111122223333"
//! stage_names = ["alpha", "beta", "prod"]
//! allowed_accounts = ["ALL"]
//!
//! [transition]
//! previous_stage_source = "pointer"  # pointer | association_scan
//!
//! [control_plane]
//! base_url = "https://mesh.internal/api/v1"
//! directory_url = "https://directory.internal/api/v1"
//! ```

use meshstage_core::policy::{parse_stage_names, AccountAllowlist, AdmissionPolicy};
use meshstage_core::validation::validate_account_id;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::poll::{DeletionWait, ListingRetry};

// =============================================================================
// Deployment Role
// =============================================================================

/// Which side of the cross-account relationship this deployment runs.
///
/// ## Roles
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                        Deployment Roles                                 │
/// │                                                                         │
/// │  MEMBERSHIP (network-owning account)                                   │
/// │  • Periodic sweep: resolve → accept → converge → prune                 │
/// │  • Tag-change events drive stage transitions                           │
/// │                                                                         │
/// │  SHARING (resource-owning account)                                     │
/// │  • Tag-change events maintain one outbound grant per resource          │
/// │  • No sweep                                                            │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentRole {
    #[default]
    Membership,
    Sharing,
}

impl std::fmt::Display for DeploymentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentRole::Membership => write!(f, "membership"),
            DeploymentRole::Sharing => write!(f, "sharing"),
        }
    }
}

impl std::str::FromStr for DeploymentRole {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "membership" | "network" => Ok(DeploymentRole::Membership),
            "sharing" | "service" => Ok(DeploymentRole::Sharing),
            other => Err(EngineError::InvalidConfig(format!(
                "Unknown role: '{}'. Valid options: membership, sharing",
                other
            ))),
        }
    }
}

// =============================================================================
// Policy Settings
// =============================================================================

/// Admission policy inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySettings {
    /// Locally owned account id (distinguishes owned networks from shared ones).
    #[serde(default)]
    pub local_account: String,

    /// Recognised stage names (case-folded on use).
    #[serde(default)]
    pub stage_names: Vec<String>,

    /// Sender accounts whose grants are accepted; `ALL` accepts anyone.
    #[serde(default)]
    pub allowed_accounts: Vec<String>,
}

// =============================================================================
// Store Settings
// =============================================================================

/// Where the registry and stage pointers live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// SQLite database path.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Parameter name of the stage registry.
    #[serde(default = "default_registry_key")]
    pub registry_key: String,

    /// Parameter name prefix of per-resource stage pointers.
    #[serde(default = "default_pointer_prefix")]
    pub pointer_prefix: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("meshstage.db")
}

fn default_registry_key() -> String {
    "/meshstage/stage-registry".to_string()
}

fn default_pointer_prefix() -> String {
    "/meshstage/current-stage".to_string()
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            database_path: default_database_path(),
            registry_key: default_registry_key(),
            pointer_prefix: default_pointer_prefix(),
        }
    }
}

// =============================================================================
// Timing Settings
// =============================================================================

/// Retry and polling bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Attempts when listing resources visible under a grant.
    #[serde(default = "default_listing_attempts")]
    pub listing_attempts: u32,

    /// Spacing between listing attempts (milliseconds).
    #[serde(default = "default_listing_interval")]
    pub listing_interval_ms: u64,

    /// Maximum wait for an asynchronous deletion to report absent (seconds).
    #[serde(default = "default_deletion_timeout")]
    pub deletion_timeout_secs: u64,

    /// Spacing between deletion polls (milliseconds).
    #[serde(default = "default_deletion_poll_interval")]
    pub deletion_poll_interval_ms: u64,

    /// Interval between sweeps in `run` mode (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_listing_attempts() -> u32 {
    5
}
fn default_listing_interval() -> u64 {
    1000
}
fn default_deletion_timeout() -> u64 {
    60
}
fn default_deletion_poll_interval() -> u64 {
    1000
}
fn default_sweep_interval() -> u64 {
    300
}

impl Default for TimingSettings {
    fn default() -> Self {
        TimingSettings {
            listing_attempts: default_listing_attempts(),
            listing_interval_ms: default_listing_interval(),
            deletion_timeout_secs: default_deletion_timeout(),
            deletion_poll_interval_ms: default_deletion_poll_interval(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl TimingSettings {
    pub fn listing_retry(&self) -> ListingRetry {
        ListingRetry::new(
            self.listing_attempts,
            Duration::from_millis(self.listing_interval_ms),
        )
    }

    pub fn deletion_wait(&self) -> DeletionWait {
        DeletionWait::new(
            Duration::from_secs(self.deletion_timeout_secs),
            Duration::from_millis(self.deletion_poll_interval_ms),
        )
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// =============================================================================
// Transition Settings
// =============================================================================

/// How a transition finds the stage a resource is leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreviousStageSource {
    /// Read the persisted current-stage pointer (falls back to a scan when
    /// no pointer was ever written).
    #[default]
    Pointer,
    /// Scan the resource's associations for stage-named networks.
    AssociationScan,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionSettings {
    #[serde(default)]
    pub previous_stage_source: PreviousStageSource,
}

// =============================================================================
// Sharing Settings
// =============================================================================

/// Outbound grant settings (sharing role).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharingSettings {
    /// Principals every outbound grant is issued to.
    #[serde(default)]
    pub principals: Vec<String>,

    /// Tag key correlating a grant with the resource it shares.
    #[serde(default = "default_correlation_tag_key")]
    pub correlation_tag_key: String,
}

fn default_correlation_tag_key() -> String {
    "serviceId".to_string()
}

impl Default for SharingSettings {
    fn default() -> Self {
        SharingSettings {
            principals: Vec::new(),
            correlation_tag_key: default_correlation_tag_key(),
        }
    }
}

// =============================================================================
// Control Plane Settings
// =============================================================================

/// HTTP endpoints and client behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneSettings {
    /// Mesh control plane API root.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Resource directory API root.
    #[serde(default = "default_directory_url")]
    pub directory_url: String,

    /// Bearer token; usually supplied via `MESHSTAGE_API_TOKEN`.
    #[serde(default, skip_serializing)]
    pub api_token: Option<String>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Retries for throttled / unavailable responses.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay (milliseconds), doubled per retry.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api/v1".to_string()
}
fn default_directory_url() -> String {
    "http://127.0.0.1:8081/api/v1".to_string()
}
fn default_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    200
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        ControlPlaneSettings {
            base_url: default_base_url(),
            directory_url: default_directory_url(),
            api_token: None,
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub role: DeploymentRole,

    #[serde(default)]
    pub policy: PolicySettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub timing: TimingSettings,

    #[serde(default)]
    pub transition: TransitionSettings,

    #[serde(default)]
    pub sharing: SharingSettings,

    #[serde(default)]
    pub control_plane: ControlPlaneSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (meshstage.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        validate_account_id(&self.policy.local_account)
            .map_err(|e| EngineError::InvalidConfig(format!("local_account: {}", e)))?;

        let policy = self.admission_policy()?;
        if policy.stage_names.is_empty() {
            return Err(EngineError::InvalidConfig(
                "at least one stage name is required".into(),
            ));
        }

        if self.role == DeploymentRole::Sharing && self.sharing.principals.is_empty() {
            return Err(EngineError::InvalidConfig(
                "sharing role requires at least one principal".into(),
            ));
        }

        if self.timing.listing_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "listing_attempts must be greater than 0".into(),
            ));
        }

        if self.store.registry_key.trim().is_empty() {
            return Err(EngineError::InvalidConfig("registry_key is required".into()));
        }

        url::Url::parse(&self.control_plane.base_url)?;
        url::Url::parse(&self.control_plane.directory_url)?;

        Ok(())
    }

    /// Builds the admission policy (stage set + allow-list).
    pub fn admission_policy(&self) -> EngineResult<AdmissionPolicy> {
        let stages = parse_stage_names(&self.policy.stage_names.join(","))
            .map_err(|e| EngineError::InvalidConfig(format!("stage_names: {}", e)))?;
        let allowlist = AccountAllowlist::from_entries(&self.policy.allowed_accounts);
        Ok(AdmissionPolicy::new(stages, allowlist))
    }

    /// Applies environment variable overrides read through `lookup`.
    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let list = |raw: String| -> Vec<String> {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        if let Some(role) = lookup("MESHSTAGE_ROLE") {
            match role.parse() {
                Ok(parsed) => self.role = parsed,
                Err(_) => warn!(role = %role, "Unknown role in environment"),
            }
        }

        if let Some(account) = lookup("MESHSTAGE_LOCAL_ACCOUNT") {
            debug!(account = %account, "Overriding local account from environment");
            self.policy.local_account = account;
        }

        if let Some(stages) = lookup("MESHSTAGE_STAGE_NAMES") {
            self.policy.stage_names = list(stages);
        }

        if let Some(accounts) = lookup("MESHSTAGE_ALLOWED_ACCOUNTS") {
            self.policy.allowed_accounts = list(accounts);
        }

        if let Some(key) = lookup("MESHSTAGE_REGISTRY_KEY") {
            self.store.registry_key = key;
        }

        if let Some(path) = lookup("MESHSTAGE_DATABASE_PATH") {
            self.store.database_path = PathBuf::from(path);
        }

        if let Some(principals) = lookup("MESHSTAGE_SHARE_PRINCIPALS") {
            self.sharing.principals = list(principals);
        }

        if let Some(url) = lookup("MESHSTAGE_CONTROL_PLANE_URL") {
            debug!(url = %url, "Overriding control plane URL from environment");
            self.control_plane.base_url = url;
        }

        if let Some(url) = lookup("MESHSTAGE_DIRECTORY_URL") {
            self.control_plane.directory_url = url;
        }

        if let Some(token) = lookup("MESHSTAGE_API_TOKEN") {
            self.control_plane.api_token = Some(token);
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "meshstage", "meshstage")
            .map(|dirs| dirs.config_dir().join("meshstage.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.policy.local_account = "111122223333".into();
        config.policy.stage_names = vec!["alpha".into(), "beta".into()];
        config.policy.allowed_accounts = vec!["ALL".into()];
        config
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.role, DeploymentRole::Membership);
        assert_eq!(config.timing.listing_attempts, 5);
        assert_eq!(config.timing.deletion_timeout_secs, 60);
        assert_eq!(
            config.transition.previous_stage_source,
            PreviousStageSource::Pointer
        );
        assert_eq!(config.sharing.correlation_tag_key, "serviceId");
    }

    #[test]
    fn test_validation() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.policy.local_account = String::new();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.policy.stage_names = vec![" ".into()];
        assert!(config.validate().is_err());

        let mut config = valid();
        config.role = DeploymentRole::Sharing;
        assert!(config.validate().is_err());
        config.sharing.principals = vec!["444455556666".into()];
        assert!(config.validate().is_ok());

        let mut config = valid();
        config.control_plane.base_url = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MESHSTAGE_ROLE", "sharing"),
            ("MESHSTAGE_STAGE_NAMES", " Alpha, PROD ,"),
            ("MESHSTAGE_ALLOWED_ACCOUNTS", "1111,2222"),
            ("MESHSTAGE_SHARE_PRINCIPALS", "9999"),
        ]);
        let mut config = valid();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.role, DeploymentRole::Sharing);
        assert_eq!(config.sharing.principals, vec!["9999".to_string()]);

        let policy = config.admission_policy().unwrap();
        assert!(policy.is_stage("alpha"));
        assert!(policy.is_stage("prod"));
        assert!(!policy.is_stage("beta"));
        assert!(policy.allowlist.permits("2222"));
        assert!(!policy.allowlist.permits("3333"));
    }

    #[test]
    fn test_toml_file() {
        let toml_str = r#"
            role = "membership"

            [policy]
            local_account = "111122223333"
            stage_names = ["beta", "prod"]
            allowed_accounts = ["ALL"]

            [timing]
            listing_attempts = 3

            [transition]
            previous_stage_source = "association_scan"
        "#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.listing_attempts, 3);
        assert_eq!(config.timing.listing_interval_ms, 1000);
        assert_eq!(
            config.transition.previous_stage_source,
            PreviousStageSource::AssociationScan
        );
    }

    #[test]
    fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meshstage.toml");
        std::fs::write(
            &path,
            "[policy]\nlocal_account = \"111122223333\"\nstage_names = [\"beta\"]\n",
        )
        .unwrap();

        let config = EngineConfig::load(Some(path)).unwrap();
        assert_eq!(config.policy.local_account, "111122223333");
    }
}
