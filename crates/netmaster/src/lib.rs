//! NetMaster - global control plane for the network plugin
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                           NETMASTER                           │
//! │                                                               │
//! │  ┌─────────────────────────┐     ┌─────────────────────────┐  │
//! │  │   GLOBAL COORDINATOR    │     │     TENANT SERVICE      │  │
//! │  │ settings | pools | lock │     │  per-tenant DNS, retry  │  │
//! │  └────────────┬────────────┘     └────────────┬────────────┘  │
//! │               │          RuntimeFlags         │               │
//! │  ┌────────────▼────────────┐     ┌────────────▼────────────┐  │
//! │  │       STATE STORE       │     │    CONTAINER RUNTIME    │  │
//! │  └─────────────────────────┘     └─────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod flags;
pub mod pool;
pub mod records;
pub mod retry;
pub mod runtime;
pub mod tenant;

use std::sync::Arc;

use netmaster_common::{StateStore, TagRangeParser};
use tracing::info;

pub use config::{ConfigError, DnsServiceConfig, MasterConfig};
pub use coordinator::GlobalCoordinator;
pub use error::{MasterError, MasterResult};
pub use flags::{ClusterMode, DnsDegradation, RuntimeFlags};
pub use pool::{OperationalLeases, TagPool};
pub use records::{GlobalConfigDelta, GlobalSettings, InfraMode, ResourcePoolConfig};
pub use retry::{BackoffConfig, ExponentialBackoff};
pub use runtime::{ContainerRuntime, ContainerSpec, DockerRuntime, RestartPolicy, RuntimeError};
pub use tenant::{TenantConfig, TenantCreateOutcome, TenantService};

/// Coordinator and tenant service wired to shared flags
pub struct NetMaster {
    config: MasterConfig,
    flags: Arc<RuntimeFlags>,
    coordinator: GlobalCoordinator,
    tenants: TenantService,
}

impl NetMaster {
    pub fn new(
        config: MasterConfig,
        store: Arc<dyn StateStore>,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let flags = Arc::new(RuntimeFlags::new(config.cluster_mode, config.dns_enabled));
        let parser = Arc::new(TagRangeParser::new());

        let coordinator = GlobalCoordinator::new(store, parser.clone(), flags.clone());
        let tenants = TenantService::new(
            runtime,
            parser,
            flags.clone(),
            config.dns.clone(),
            config.pull_backoff.clone().into(),
        );

        Self {
            config,
            flags,
            coordinator,
            tenants,
        }
    }

    /// Apply the configured global delta, if any
    pub async fn bootstrap(&self) -> MasterResult<()> {
        let Some(delta) = &self.config.global else {
            return Ok(());
        };

        info!("applying bootstrap global config");
        if self.coordinator.global_settings().await?.is_some() {
            self.coordinator.update_global(delta).await
        } else {
            self.coordinator.create_global(delta).await
        }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn flags(&self) -> &Arc<RuntimeFlags> {
        &self.flags
    }

    pub fn coordinator(&self) -> &GlobalCoordinator {
        &self.coordinator
    }

    pub fn tenants(&self) -> &TenantService {
        &self.tenants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::tests::MockRuntime;
    use netmaster_common::{InMemoryStateStore, TagKind};

    fn config() -> MasterConfig {
        MasterConfig {
            cluster_mode: ClusterMode::Kubernetes,
            dns_enabled: true,
            global: Some(GlobalConfigDelta::default().with_infra_mode("aci").with_vlans("1-100")),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bootstrap_applies_global_config() {
        let store = Arc::new(InMemoryStateStore::new());
        let master = NetMaster::new(config(), store.clone(), Arc::new(MockRuntime::default()));

        master.bootstrap().await.unwrap();
        // second start goes through update
        master.bootstrap().await.unwrap();

        assert!(master.coordinator().is_fabric_mode_aci().await.unwrap());
        assert_eq!(master.flags().cluster_mode(), ClusterMode::Kubernetes);
        assert_eq!(master.coordinator().allocate_tag(TagKind::Vlan, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_flags_shared_between_services() {
        let master = NetMaster::new(
            config(),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(MockRuntime::default()),
        );

        master.tenants().flags().degrade_dns("runtime down");

        assert!(!master.flags().is_dns_enabled());
        assert!(!master.coordinator().flags().is_dns_enabled());
    }
}
