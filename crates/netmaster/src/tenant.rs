//! Tenant service orchestration
//!
//! Each tenant gets an auxiliary DNS container while the DNS feature is on.
//! Failing to start it never fails tenant creation: DNS is turned off for the
//! process instead. Teardown failures are returned to the caller.

use std::sync::Arc;

use netmaster_common::{RangeParser, TagKind};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::DnsServiceConfig;
use crate::error::{MasterError, MasterResult};
use crate::flags::RuntimeFlags;
use crate::retry::ExponentialBackoff;
use crate::runtime::{ContainerRuntime, ContainerSpec, RestartPolicy};

/// Tenant as handed over by tenant management
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    pub name: String,
    /// Tenant-scoped VLAN range override
    pub vlans: String,
    /// Tenant-scoped VXLAN range override
    pub vxlans: String,
    pub networks: Vec<String>,
}

impl TenantConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// What happened to the DNS service on tenant creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantCreateOutcome {
    /// DNS container created and started
    DnsStarted { container_id: String },
    /// DNS feature disabled, nothing started
    DnsSkipped,
    /// Start failed and DNS was turned off
    DnsDegraded { cause: String },
}

/// Tenant service orchestrator
pub struct TenantService {
    runtime: Arc<dyn ContainerRuntime>,
    parser: Arc<dyn RangeParser>,
    flags: Arc<RuntimeFlags>,
    dns: DnsServiceConfig,
    pull_backoff: ExponentialBackoff,
}

impl TenantService {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        parser: Arc<dyn RangeParser>,
        flags: Arc<RuntimeFlags>,
        dns: DnsServiceConfig,
        pull_backoff: ExponentialBackoff,
    ) -> Self {
        Self {
            runtime,
            parser,
            flags,
            dns,
            pull_backoff,
        }
    }

    pub fn flags(&self) -> &Arc<RuntimeFlags> {
        &self.flags
    }

    fn validate(&self, tenant: &TenantConfig) -> MasterResult<()> {
        if tenant.name.is_empty() {
            return Err(MasterError::InvalidConfig("invalid tenant name".into()));
        }

        for (kind, spec) in [(TagKind::Vlan, &tenant.vlans), (TagKind::Vxlan, &tenant.vxlans)] {
            if spec.is_empty() {
                continue;
            }
            if let Err(source) = self.parser.parse(spec, kind) {
                error!(tenant = %tenant.name, %kind, spec = %spec, %source, "error parsing tenant range");
                return Err(MasterError::InvalidRange {
                    kind,
                    spec: spec.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// React to a tenant being created
    pub async fn on_tenant_create(&self, tenant: &TenantConfig) -> MasterResult<TenantCreateOutcome> {
        self.validate(tenant)?;

        if !self.flags.is_dns_enabled() {
            return Ok(TenantCreateOutcome::DnsSkipped);
        }

        match self.start_service_container(&tenant.name).await {
            Ok(container_id) => Ok(TenantCreateOutcome::DnsStarted { container_id }),
            Err(err) => {
                let cause = err.to_string();
                error!(tenant = %tenant.name, error = %cause, "error starting service container");
                self.flags.degrade_dns(cause.clone());
                Ok(TenantCreateOutcome::DnsDegraded { cause })
            }
        }
    }

    /// React to a tenant delete request.
    ///
    /// A tenant that still has networks keeps its service; the call is a no-op.
    pub async fn on_tenant_delete(&self, tenant_name: &str, network_count: usize) -> MasterResult<()> {
        if network_count > 0 {
            info!(tenant = tenant_name, network_count, "tenant has networks, deferring service teardown");
            return Ok(());
        }
        self.delete_tenant_id(tenant_name).await
    }

    /// Validate a tenant and react to its deletion
    pub async fn delete_tenant(&self, tenant: &TenantConfig) -> MasterResult<()> {
        self.validate(tenant)?;
        self.on_tenant_delete(&tenant.name, tenant.networks.len()).await
    }

    /// Tear down a tenant's service regardless of its networks
    pub async fn delete_tenant_id(&self, tenant_name: &str) -> MasterResult<()> {
        if !self.flags.is_dns_enabled() {
            return Ok(());
        }

        self.stop_and_remove_service_container(tenant_name)
            .await
            .inspect_err(|err| {
                error!(tenant = tenant_name, error = %err, "error in stopping service container");
            })
    }

    async fn ensure_image(&self) -> MasterResult<()> {
        let image = self.dns.image.as_str();
        if self.runtime.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image, "pulling image");
        self.pull_backoff
            .retry("image pull", || self.runtime.pull_image(image))
            .await
            .map_err(|exhausted| {
                error!(image, attempts = exhausted.attempts, "unable to pull image");
                MasterError::RetryExhausted {
                    attempts: exhausted.attempts,
                    elapsed: exhausted.elapsed,
                    last_error: exhausted.last_error.to_string(),
                }
            })
    }

    async fn start_service_container(&self, tenant_name: &str) -> MasterResult<String> {
        self.ensure_image().await?;

        let name = self.dns.container_name(tenant_name);
        let spec = ContainerSpec {
            image: self.dns.image.clone(),
            env: self.dns.env(tenant_name),
            restart: RestartPolicy::Always,
        };

        let container_id = self.runtime.create_container(&name, &spec).await.inspect_err(|err| {
            error!(tenant = tenant_name, error = %err, "error creating DNS container");
        })?;

        if let Err(err) = self.runtime.start_container(&container_id).await {
            error!(tenant = tenant_name, error = %err, "error starting DNS container");
            return Err(err.into());
        }

        info!(tenant = tenant_name, container = %name, "DNS container started");
        Ok(container_id)
    }

    async fn stop_and_remove_service_container(&self, tenant_name: &str) -> MasterResult<()> {
        let name = self.dns.container_name(tenant_name);

        if let Err(err) = self.runtime.stop_container(&name, self.dns.stop_timeout_secs).await {
            warn!(tenant = tenant_name, error = %err, "error stopping DNS container");
            return Err(err.into());
        }

        if let Err(err) = self.runtime.remove_container(&name, true, true).await {
            warn!(tenant = tenant_name, error = %err, "error removing DNS container");
            return Err(err.into());
        }

        info!(tenant = tenant_name, container = %name, "DNS container removed");
        Ok(())
    }
}
