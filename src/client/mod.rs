//! Container runtime client
//!
//! The orchestrator never talks to a daemon directly; it goes through
//! [`RuntimeClient`], passed in at construction. [`DockerRuntime`] is the
//! Docker Engine implementation.

pub mod docker;
#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerRuntime;

use crate::error::Result;
use crate::template::config::PortMapping;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;

/// Container lifecycle state as reported by the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Exited,
    Other(String),
}

impl ContainerState {
    pub fn parse(state: &str) -> Self {
        match state {
            "running" => ContainerState::Running,
            "exited" => ContainerState::Exited,
            other => ContainerState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Running => write!(f, "running"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Snapshot of a container, fetched on demand and never cached
#[derive(Debug, Clone)]
pub struct ContainerRef {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: ContainerState,
    pub labels: HashMap<String, String>,
}

impl ContainerRef {
    /// Primary name without the runtime's leading `/`
    pub fn name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or(&self.id)
    }

    /// Exact name match, ignoring the leading `/`
    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.trim_start_matches('/') == name)
    }

    pub fn is_running(&self) -> bool {
        self.state == ContainerState::Running
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Result of inspecting a single container
#[derive(Debug, Clone)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    /// Health status (`healthy`, `unhealthy`, `starting`), if the image has a healthcheck
    pub health: Option<String>,
}

/// List filter; label selectors are ANDed, all states are included
#[derive(Debug, Clone, Default)]
pub struct ContainerFilter {
    pub labels: Vec<String>,
    pub name: Option<String>,
}

impl ContainerFilter {
    pub fn label(mut self, selector: impl Into<String>) -> Self {
        self.labels.push(selector.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Everything needed to create one container
#[derive(Debug, Clone, Default)]
pub struct CreateSpec {
    pub name: Option<String>,
    pub image: String,
    pub cmd: Option<Vec<String>>,
    /// `KEY=VALUE` strings
    pub env: Vec<String>,
    pub ports: Vec<PortMapping>,
    /// `host:container[:ro]` bind strings with absolute host paths
    pub binds: Vec<String>,
    pub labels: HashMap<String, String>,
}

/// One image pull progress event
#[derive(Debug, Clone, Default)]
pub struct PullProgress {
    pub id: Option<String>,
    pub status: Option<String>,
    pub progress: Option<String>,
}

/// Operations the orchestrator needs from a container runtime
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Where the runtime is reached, for diagnostics
    fn endpoint(&self) -> String;

    /// Liveness probe
    async fn ping(&self) -> Result<()>;

    /// Pull an image; the stream ends when the pull completes
    fn pull_image<'a>(&'a self, image: &'a str) -> BoxStream<'a, Result<PullProgress>>;

    async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<ContainerRef>>;

    /// Create a container, returning its ID
    async fn create_container(&self, spec: &CreateSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn stop_container(&self, id: &str, timeout_secs: i64) -> Result<()>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<()>;

    /// `Ok(None)` when the container does not exist
    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerDetails>>;
}

/// List containers whose name is exactly `name`.
///
/// Runtime name filters match substrings, so results are narrowed here.
pub async fn find_by_name(runtime: &dyn RuntimeClient, name: &str) -> Result<Vec<ContainerRef>> {
    let filter = ContainerFilter::default().name(name);
    let containers = runtime.list_containers(&filter).await?;
    Ok(containers.into_iter().filter(|c| c.has_name(name)).collect())
}

const DEFAULT_TAG: &str = "latest";

/// Split an image reference into repository and tag or digest.
///
/// An untagged reference gets `latest`; the Engine treats an empty tag as
/// "every tag".
pub fn split_image_reference(image: &str) -> (&str, &str) {
    if let Some((repository, digest)) = image.split_once('@') {
        return (repository, digest);
    }

    // a ':' before the last '/' is a registry port
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, DEFAULT_TAG),
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeRuntime;
    use super::*;

    #[test]
    fn test_container_state_parse() {
        assert_eq!(ContainerState::parse("running"), ContainerState::Running);
        assert_eq!(ContainerState::parse("exited"), ContainerState::Exited);
        assert_eq!(ContainerState::parse("paused").to_string(), "paused");
    }

    #[tokio::test]
    async fn test_find_by_name_is_exact() {
        let runtime = FakeRuntime::new();
        runtime.add_container("app_db", "postgres:16", ContainerState::Running, &[]);
        runtime.add_container("app_db_replica", "postgres:16", ContainerState::Running, &[]);

        let found = find_by_name(&runtime, "app_db").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "app_db");
    }

    #[test]
    fn test_split_image_reference() {
        assert_eq!(split_image_reference("node"), ("node", "latest"));
        assert_eq!(split_image_reference("postgres:16"), ("postgres", "16"));
        assert_eq!(
            split_image_reference("registry:5000/team/img"),
            ("registry:5000/team/img", "latest")
        );
        assert_eq!(
            split_image_reference("registry:5000/img:1.2"),
            ("registry:5000/img", "1.2")
        );
        assert_eq!(
            split_image_reference("img@sha256:abc123"),
            ("img", "sha256:abc123")
        );
    }
}
