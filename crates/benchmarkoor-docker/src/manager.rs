//! Thin contract over the local container engine
//!
//! Every operation the run engine needs from Docker: network and volume
//! management, policy-driven image pulls, container lifecycle,
//! demultiplexed log streaming and init-container runs.

use std::collections::HashMap;
use std::io::Write;

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerSummary, HostConfig, Mount, MountTypeEnum};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, RemoveVolumeOptions};
use bollard::Docker;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use benchmarkoor_config::{PullPolicy, ResourceLimits};

use crate::error::{DockerError, Result};
use crate::labels::managed_filter;

const STOP_TIMEOUT_SECS: i64 = 30;

/// A bind or volume mount requested for a container.
#[derive(Debug, Clone)]
pub struct MountSpec {
    /// Volume name or absolute host path.
    pub source: String,
    pub target: String,
    pub read_only: bool,
    /// True for a named volume, false for a host bind.
    pub volume: bool,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, Default)]
pub struct ContainerOptions {
    pub name: String,
    pub image: String,
    pub entrypoint: Option<Vec<String>>,
    pub command: Option<Vec<String>>,
    pub env: Vec<String>,
    pub mounts: Vec<MountSpec>,
    pub network: String,
    pub labels: HashMap<String, String>,
    pub limits: Option<ResourceLimits>,
}

pub struct ContainerManager {
    docker: Docker,
}

impl ContainerManager {
    /// Connect using the standard environment (`DOCKER_HOST` etc.).
    pub fn connect() -> Result<Self> {
        Ok(Self {
            docker: Docker::connect_with_local_defaults()?,
        })
    }

    /// Create the run network unless it already exists.
    pub async fn ensure_network(&self, name: &str) -> Result<()> {
        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions {
                filters: HashMap::from([("name".to_string(), vec![name.to_string()])]),
            }))
            .await?;
        if existing
            .iter()
            .any(|network| network.name.as_deref() == Some(name))
        {
            return Ok(());
        }

        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                check_duplicate: true,
                labels: HashMap::from([(
                    crate::labels::MANAGED_LABEL.to_string(),
                    "true".to_string(),
                )]),
                ..Default::default()
            })
            .await?;
        info!(network = name, "created docker network");
        Ok(())
    }

    pub async fn remove_network(&self, name: &str) -> Result<()> {
        self.docker.remove_network(name).await?;
        Ok(())
    }

    pub async fn create_volume(
        &self,
        name: &str,
        labels: &HashMap<String, String>,
    ) -> Result<()> {
        self.docker
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                driver: "local".to_string(),
                driver_opts: HashMap::new(),
                labels: labels.clone(),
            })
            .await?;
        debug!(volume = name, "created volume");
        Ok(())
    }

    pub async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await?;
        Ok(())
    }

    /// Pull `image` under the configured policy.
    pub async fn pull_image(&self, image: &str, policy: PullPolicy) -> Result<()> {
        match policy {
            PullPolicy::Never => {
                if self.docker.inspect_image(image).await.is_err() {
                    return Err(DockerError::ImageNotPresent {
                        image: image.to_string(),
                    });
                }
                Ok(())
            }
            PullPolicy::IfNotPresent => {
                if self.docker.inspect_image(image).await.is_ok() {
                    return Ok(());
                }
                self.do_pull(image).await
            }
            PullPolicy::Always => self.do_pull(image).await,
        }
    }

    async fn do_pull(&self, image: &str) -> Result<()> {
        info!(image, "pulling image");
        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = stream.next().await {
            progress?;
        }
        Ok(())
    }

    pub async fn create_container(&self, options: &ContainerOptions) -> Result<()> {
        let mounts = options
            .mounts
            .iter()
            .map(|mount| Mount {
                source: Some(mount.source.clone()),
                target: Some(mount.target.clone()),
                read_only: Some(mount.read_only),
                typ: Some(if mount.volume {
                    MountTypeEnum::VOLUME
                } else {
                    MountTypeEnum::BIND
                }),
                ..Default::default()
            })
            .collect();

        let mut host_config = HostConfig {
            mounts: Some(mounts),
            network_mode: Some(options.network.clone()),
            ..Default::default()
        };
        if let Some(limits) = &options.limits {
            host_config.nano_cpus = limits.cpus.map(|cpus| (cpus * 1e9) as i64);
            host_config.cpuset_cpus = limits.cpuset.clone();
            host_config.memory = limits.memory;
        }

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: options.name.clone(),
                    platform: None,
                }),
                Config {
                    image: Some(options.image.clone()),
                    entrypoint: options.entrypoint.clone(),
                    cmd: options.command.clone(),
                    env: Some(options.env.clone()),
                    labels: Some(options.labels.clone()),
                    host_config: Some(host_config),
                    ..Default::default()
                },
            )
            .await?;
        debug!(container = %options.name, image = %options.image, "created container");
        Ok(())
    }

    pub async fn start_container(&self, name: &str) -> Result<()> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    pub async fn stop_container(&self, name: &str) -> Result<()> {
        self.docker
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await?;
        Ok(())
    }

    pub async fn remove_container(&self, name: &str) -> Result<()> {
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    /// Block until the container exits; returns its exit code.
    pub async fn wait_exit(&self, name: &str) -> Result<i64> {
        let mut stream = self.docker.wait_container(
            name,
            Some(WaitContainerOptions {
                condition: "not-running".to_string(),
            }),
        );
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits surface as a dedicated engine error.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(error)) => Err(error.into()),
            None => Ok(0),
        }
    }

    /// Run a container to completion, stream its output to `log`, remove
    /// it, and fail when the exit code is non-zero.
    pub async fn run_init_container(
        &self,
        options: &ContainerOptions,
        log: Box<dyn Write + Send>,
    ) -> Result<()> {
        self.create_container(options).await?;
        self.start_container(&options.name).await?;

        // The init container is short-lived; both streams feed one log.
        let stream_result = self
            .stream_logs(&options.name, log, Box::new(std::io::sink()), &CancellationToken::new())
            .await;
        let exit_code = self.wait_exit(&options.name).await;
        self.remove_container(&options.name).await?;
        stream_result?;

        match exit_code? {
            0 => Ok(()),
            code => Err(DockerError::InitFailed {
                name: options.name.clone(),
                code,
            }),
        }
    }

    /// Follow the container's log stream, demultiplexing stdout and
    /// stderr into the two writers until the container exits or the
    /// token is cancelled.
    pub async fn stream_logs(
        &self,
        name: &str,
        mut stdout: Box<dyn Write + Send>,
        mut stderr: Box<dyn Write + Send>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut stream = self.docker.logs(
            name,
            Some(LogsOptions::<String> {
                follow: true,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(LogOutput::StdOut { message } | LogOutput::Console { message })) => {
                        stdout.write_all(&message)?;
                    }
                    Some(Ok(LogOutput::StdErr { message })) => {
                        stderr.write_all(&message)?;
                    }
                    Some(Ok(LogOutput::StdIn { .. })) => {}
                    Some(Err(error)) => {
                        warn!(container = name, %error, "log stream error");
                        break;
                    }
                    None => break,
                },
            }
        }
        stdout.flush()?;
        stderr.flush()?;
        Ok(())
    }

    /// The container's IP address on the given network.
    pub async fn container_ip(&self, name: &str, network: &str) -> Result<String> {
        let inspection = self.docker.inspect_container(name, None).await?;
        inspection
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|networks| networks.get(network).cloned())
            .and_then(|endpoint| endpoint.ip_address)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| DockerError::NoIpAddress {
                name: name.to_string(),
                network: network.to_string(),
            })
    }

    /// All containers carrying the managed-by label, running or not.
    pub async fn list_managed_containers(&self) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: managed_filter(),
                ..Default::default()
            }))
            .await?)
    }

    /// All volumes carrying the managed-by label.
    pub async fn list_managed_volumes(&self) -> Result<Vec<String>> {
        let response = self
            .docker
            .list_volumes(Some(ListVolumesOptions {
                filters: managed_filter(),
            }))
            .await?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|volume| volume.name)
            .collect())
    }

    pub(crate) fn docker(&self) -> &Docker {
        &self.docker
    }
}
