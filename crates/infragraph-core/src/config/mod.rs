//! Configuration management with file persistence

use anyhow::{Context, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::graph::CloudProvider;
use crate::storage::database::{DEFAULT_MAX_CONNECTIONS, default_database_path};

/// Infragraph configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub inference: InferenceConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Confidence constants and vocabularies for cross-cloud inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub tag_convention_confidence: f64,
    pub cidr_overlap_confidence: f64,
    pub dns_confidence: f64,
    pub federated_identity_confidence: f64,
    pub workload_model_confidence: f64,
    pub workload_owner_confidence: f64,
    pub storage_reference_confidence: f64,
    /// Tag keys that name a peer network
    pub peering_tag_keys: Vec<String>,
    /// Trust-policy principals that identify each provider's identity federation,
    /// keyed by provider name
    pub federation_principals: BTreeMap<String, Vec<String>>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        let mut federation_principals = BTreeMap::new();
        federation_principals.insert(
            CloudProvider::Aws.as_str().to_string(),
            vec![
                "cognito-identity.amazonaws.com".to_string(),
                "sts.amazonaws.com".to_string(),
            ],
        );
        federation_principals.insert(
            CloudProvider::Azure.as_str().to_string(),
            vec![
                "sts.windows.net".to_string(),
                "login.microsoftonline.com".to_string(),
            ],
        );
        federation_principals.insert(
            CloudProvider::Gcp.as_str().to_string(),
            vec![
                "accounts.google.com".to_string(),
                "iam.googleapis.com".to_string(),
            ],
        );

        Self {
            tag_convention_confidence: 0.6,
            cidr_overlap_confidence: 0.5,
            dns_confidence: 0.9,
            federated_identity_confidence: 0.7,
            workload_model_confidence: 0.8,
            workload_owner_confidence: 0.5,
            storage_reference_confidence: 0.7,
            peering_tag_keys: vec![
                "peering".to_string(),
                "peer".to_string(),
                "cross-cloud-peer".to_string(),
            ],
            federation_principals,
        }
    }
}

impl InferenceConfig {
    fn confidences(&self) -> [(&'static str, f64); 7] {
        [
            ("tag_convention_confidence", self.tag_convention_confidence),
            ("cidr_overlap_confidence", self.cidr_overlap_confidence),
            ("dns_confidence", self.dns_confidence),
            ("federated_identity_confidence", self.federated_identity_confidence),
            ("workload_model_confidence", self.workload_model_confidence),
            ("workload_owner_confidence", self.workload_owner_confidence),
            ("storage_reference_confidence", self.storage_reference_confidence),
        ]
    }

    /// Principals identifying federation into `provider`
    pub fn principals_for(&self, provider: CloudProvider) -> &[String] {
        self.federation_principals
            .get(provider.as_str())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for key in self.federation_principals.keys() {
            if CloudProvider::parse(key).is_none() {
                bail!("inference.federation_principals has unknown provider '{}'", key);
            }
        }
        for (name, value) in self.confidences() {
            if !(0.0..=1.0).contains(&value) {
                bail!("inference.{} must be between 0.0 and 1.0, got {}", name, value);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Resource-type enumerations an adapter runs at once
    pub discovery_concurrency: usize,
    /// Edges not re-confirmed within this window are pruned; unset keeps them
    pub stale_edge_max_age_hours: Option<u64>,
    /// Disappeared nodes are purged after this many days; unset keeps them
    pub disappeared_retention_days: Option<u64>,
    /// Node cap for blast-radius and dependency traversals
    pub traversal_max_nodes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            discovery_concurrency: 4,
            stale_edge_max_age_hours: None,
            disappeared_retention_days: None,
            traversal_max_nodes: 10_000,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("INFRAGRAPH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("infragraph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.storage.max_connections == 0 {
            bail!("storage.max_connections must be at least 1");
        }
        if self.sync.discovery_concurrency == 0 {
            bail!("sync.discovery_concurrency must be at least 1");
        }
        if self.sync.traversal_max_nodes == 0 {
            bail!("sync.traversal_max_nodes must be at least 1");
        }
        self.inference.validate()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}
