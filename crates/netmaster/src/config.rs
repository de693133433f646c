//! NetMaster Configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flags::ClusterMode;
use crate::records::GlobalConfigDelta;
use crate::retry::BackoffConfig;

/// Process configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Orchestrator the plugin runs under
    pub cluster_mode: ClusterMode,
    /// Start a DNS container per tenant
    pub dns_enabled: bool,
    /// DNS container settings
    pub dns: DnsServiceConfig,
    /// Image pull retry policy
    pub pull_backoff: BackoffConfig,
    /// Global configuration applied at startup
    pub global: Option<GlobalConfigDelta>,
}

impl MasterConfig {
    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Per-tenant DNS service container settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsServiceConfig {
    pub image: String,
    /// Backing etcd endpoints handed to the DNS server
    pub etcd_machines: String,
    /// Upstream resolvers
    pub nameservers: String,
    pub bind_addr: String,
    pub stop_timeout_secs: u32,
}

impl Default for DnsServiceConfig {
    fn default() -> Self {
        Self {
            image: "skynetservices/skydns:latest".into(),
            etcd_machines: "http://172.17.0.1:4001".into(),
            nameservers: "8.8.8.8:53".into(),
            bind_addr: "0.0.0.0:53".into(),
            stop_timeout_secs: 10,
        }
    }
}

impl DnsServiceConfig {
    /// Container name for a tenant's DNS service
    pub fn container_name(&self, tenant: &str) -> String {
        format!("{tenant}dns")
    }

    /// Environment handed to the DNS container
    pub fn env(&self, tenant: &str) -> Vec<String> {
        vec![
            format!("ETCD_MACHINES={}", self.etcd_machines),
            format!("SKYDNS_NAMESERVERS={}", self.nameservers),
            format!("SKYDNS_ADDR={}", self.bind_addr),
            format!("SKYDNS_DOMAIN={tenant}"),
        ]
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("invalid config: {0}")]
    Parse(String),
}
