//! Container runtime client
//!
//! [`ContainerRuntime`] is the capability the tenant service drives;
//! [`DockerRuntime`] implements it over the local Docker daemon.

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, RestartPolicy as DockerRestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures_util::TryStreamExt;
use thiserror::Error;
use tracing::{debug, info};

/// Container runtime error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Could not reach the runtime
    #[error("unable to connect to container runtime: {0}")]
    Connect(String),

    /// Image is not present locally
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// A runtime API call failed
    #[error("{op} {target} failed: {reason}")]
    Api {
        op: &'static str,
        target: String,
        reason: String,
    },
}

impl RuntimeError {
    fn api(op: &'static str, target: &str, err: impl std::fmt::Display) -> Self {
        RuntimeError::Api {
            op,
            target: target.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Container restart policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
}

/// What to create
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub env: Vec<String>,
    pub restart: RestartPolicy,
}

/// Container runtime capability
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ok if the image is present locally
    async fn inspect_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Pull an image
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a named container, returning its id
    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Start a created container
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stop a container, killing it after `timeout_secs`
    async fn stop_container(&self, name: &str, timeout_secs: u32) -> Result<(), RuntimeError>;

    /// Remove a container
    async fn remove_container(&self, name: &str, force: bool, volumes: bool) -> Result<(), RuntimeError>;
}

/// Docker-backed runtime
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (socket or `DOCKER_HOST`)
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn inspect_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.docker
            .inspect_image(image)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                    RuntimeError::ImageNotFound(image.to_string())
                }
                other => RuntimeError::api("inspect image", image, other),
            })
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let progress: Vec<_> = self
            .docker
            .create_image(Some(options), None, None)
            .try_collect()
            .await
            .map_err(|e| RuntimeError::api("pull image", image, e))?;

        debug!(image, events = progress.len(), "image pulled");
        Ok(())
    }

    async fn create_container(&self, name: &str, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let restart_policy = match spec.restart {
            RestartPolicy::Always => Some(DockerRestartPolicy {
                name: Some(RestartPolicyNameEnum::ALWAYS),
                maximum_retry_count: None,
            }),
            RestartPolicy::No => None,
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            host_config: Some(HostConfig {
                restart_policy,
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| RuntimeError::api("create container", name, e))?;

        info!(name, id = %created.id, "container created");
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::api("start container", id, e))
    }

    async fn stop_container(&self, name: &str, timeout_secs: u32) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: i64::from(timeout_secs),
        };
        self.docker
            .stop_container(name, Some(options))
            .await
            .map_err(|e| RuntimeError::api("stop container", name, e))
    }

    async fn remove_container(&self, name: &str, force: bool, volumes: bool) -> Result<(), RuntimeError> {
        let options = RemoveContainerOptions {
            force,
            v: volumes,
            ..Default::default()
        };
        self.docker
            .remove_container(name, Some(options))
            .await
            .map_err(|e| RuntimeError::api("remove container", name, e))
    }
}
