//! Process runtime flags
//!
//! Cluster mode is fixed at startup. The DNS flag starts from configuration
//! and can only move from enabled to disabled through [`RuntimeFlags::degrade_dns`],
//! which records why.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::MasterError;

/// Orchestrator the plugin runs under
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterMode {
    #[default]
    Docker,
    Kubernetes,
    /// Internal mode for integration testing
    Test,
}

impl ClusterMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterMode::Docker => "docker",
            ClusterMode::Kubernetes => "kubernetes",
            ClusterMode::Test => "test",
        }
    }
}

impl FromStr for ClusterMode {
    type Err = MasterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker" => Ok(ClusterMode::Docker),
            "kubernetes" => Ok(ClusterMode::Kubernetes),
            "test" => Ok(ClusterMode::Test),
            other => Err(MasterError::InvalidConfig(format!(
                "{other} not a valid cluster mode {{docker | kubernetes}}"
            ))),
        }
    }
}

impl fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why and when DNS was turned off
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsDegradation {
    pub cause: String,
    pub at: DateTime<Utc>,
}

/// Runtime flags shared by the coordinator and tenant service
#[derive(Debug)]
pub struct RuntimeFlags {
    cluster_mode: ClusterMode,
    dns_enabled: AtomicBool,
    degradation: RwLock<Option<DnsDegradation>>,
}

impl RuntimeFlags {
    pub fn new(cluster_mode: ClusterMode, dns_enabled: bool) -> Self {
        info!(%cluster_mode, dns_enabled, "runtime flags initialized");
        Self {
            cluster_mode,
            dns_enabled: AtomicBool::new(dns_enabled),
            degradation: RwLock::new(None),
        }
    }

    pub fn cluster_mode(&self) -> ClusterMode {
        self.cluster_mode
    }

    pub fn is_dns_enabled(&self) -> bool {
        self.dns_enabled.load(Ordering::Acquire)
    }

    /// Disable DNS after a dependency failure.
    ///
    /// Returns true only for the call that performed the transition.
    pub fn degrade_dns(&self, cause: impl Into<String>) -> bool {
        let cause = cause.into();
        let mut degradation = self.degradation.write();
        if !self.dns_enabled.swap(false, Ordering::AcqRel) {
            return false;
        }

        warn!(%cause, "disabling DNS option");
        *degradation = Some(DnsDegradation {
            cause,
            at: Utc::now(),
        });
        true
    }

    /// Last degradation, if DNS was turned off by a failure
    pub fn dns_degradation(&self) -> Option<DnsDegradation> {
        self.degradation.read().clone()
    }
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self::new(ClusterMode::default(), false)
    }
}
