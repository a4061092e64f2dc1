//! Docker Engine runtime client

use super::{
    split_image_reference, ContainerDetails, ContainerFilter, ContainerRef, ContainerState,
    CreateSpec, PullProgress, RuntimeClient,
};
use crate::error::{RepdevError, Result};
use crate::settings::Settings;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::service::{ContainerSummary, HostConfig, PortBinding};
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use tracing::debug;

const DEFAULT_SOCKET: &str = "unix:///var/run/docker.sock";
const CONNECT_TIMEOUT_SECS: u64 = 120;

/// Runtime client backed by the Docker Engine API
pub struct DockerRuntime {
    docker: Docker,
    endpoint: String,
}

impl DockerRuntime {
    /// Connect using `settings.docker_host`, else the local defaults
    /// (`DOCKER_HOST` or the platform socket). No request is made yet.
    pub fn connect(settings: &Settings) -> Result<Self> {
        let (docker, endpoint) = match settings.docker_host.as_deref() {
            Some(host) if host.starts_with("tcp://") || host.starts_with("http://") => (
                Docker::connect_with_http(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)?,
                host.to_string(),
            ),
            Some(host) => (
                Docker::connect_with_socket(host, CONNECT_TIMEOUT_SECS, API_DEFAULT_VERSION)?,
                host.to_string(),
            ),
            None => (
                Docker::connect_with_local_defaults()?,
                std::env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_SOCKET.to_string()),
            ),
        };

        Ok(Self { docker, endpoint })
    }
}

fn to_container_ref(summary: ContainerSummary) -> ContainerRef {
    ContainerRef {
        id: summary.id.unwrap_or_default(),
        names: summary.names.unwrap_or_default(),
        image: summary.image.unwrap_or_default(),
        state: ContainerState::parse(summary.state.as_deref().unwrap_or("unknown")),
        labels: summary.labels.unwrap_or_default(),
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }
    )
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn ping(&self) -> Result<()> {
        self.docker.ping().await?;
        Ok(())
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> BoxStream<'a, Result<PullProgress>> {
        let (repository, tag) = split_image_reference(image);
        let options = CreateImageOptions {
            from_image: repository,
            tag,
            ..Default::default()
        };

        self.docker
            .create_image(Some(options), None, None)
            .map(move |item| match item {
                Ok(info) => Ok(PullProgress {
                    id: info.id,
                    status: info.status,
                    progress: info.progress,
                }),
                Err(e) => Err(RepdevError::ImagePull {
                    image: image.to_string(),
                    reason: e.to_string(),
                }),
            })
            .boxed()
    }

    async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<ContainerRef>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if !filter.labels.is_empty() {
            filters.insert("label".to_string(), filter.labels.clone());
        }
        if let Some(ref name) = filter.name {
            filters.insert("name".to_string(), vec![name.clone()]);
        }

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers.into_iter().map(to_container_ref).collect())
    }

    async fn create_container(&self, spec: &CreateSpec) -> Result<String> {
        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .ports
            .iter()
            .map(|p| (p.container_key(), HashMap::new()))
            .collect();

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        for port in &spec.ports {
            port_bindings
                .entry(port.container_key())
                .or_insert_with(|| Some(Vec::new()))
                .get_or_insert_with(Vec::new)
                .push(PortBinding {
                    host_ip: port.host_ip.clone(),
                    host_port: Some(port.host_port.to_string()),
                });
        }

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: Some(spec.binds.clone()),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: spec.cmd.clone(),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            tty: Some(true),
            ..Default::default()
        };

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });

        let response = self.docker.create_container(options, config).await?;
        for warning in &response.warnings {
            debug!(warning = %warning, "Runtime warning on create");
        }

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<()> {
        let options = StopContainerOptions { t: timeout_secs };
        self.docker.stop_container(id, Some(options)).await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.docker.remove_container(id, Some(options)).await?;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerDetails>> {
        let inspect = match self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state = inspect.state.as_ref();
        let status = state
            .and_then(|s| s.status.as_ref())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let health = state
            .and_then(|s| s.health.as_ref())
            .and_then(|h| h.status.as_ref())
            .map(|h| h.to_string());

        Ok(Some(ContainerDetails {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            name: inspect
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            state: ContainerState::parse(&status),
            health,
        }))
    }
}
