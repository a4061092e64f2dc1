//! In-memory runtime for tests

use super::{
    ContainerDetails, ContainerFilter, ContainerRef, ContainerState, CreateSpec, PullProgress,
    RuntimeClient,
};
use crate::error::{RepdevError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Runtime call as observed by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Ping,
    Pull(String),
    List,
    Create(String),
    Start(String),
    Stop(String),
    Remove(String),
    Inspect(String),
}

impl Call {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Call::Pull(_) | Call::Create(_) | Call::Start(_) | Call::Stop(_) | Call::Remove(_)
        )
    }
}

#[derive(Default)]
struct FakeState {
    containers: Vec<ContainerRef>,
    next_id: u64,
    calls: Vec<Call>,
    created: Vec<CreateSpec>,
    health: HashMap<String, String>,
    unreachable: bool,
    fail_pull: bool,
    fail_start: bool,
    fail_stop: bool,
    fail_remove: HashSet<String>,
}

/// Scripted runtime that keeps containers in memory and records every call.
///
/// Calls that name a container are recorded with its name so tests can
/// assert on them without tracking IDs.
#[derive(Default)]
pub(crate) struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a container; returns its ID.
    pub fn add_container(
        &self,
        name: &str,
        image: &str,
        state: ContainerState,
        labels: &[(&str, &str)],
    ) -> String {
        let mut s = self.state.lock().unwrap();
        s.next_id += 1;
        let id = format!("seed{:04}", s.next_id);
        s.containers.push(ContainerRef {
            id: id.clone(),
            names: vec![format!("/{}", name)],
            image: image.to_string(),
            state,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        id
    }

    pub fn set_health(&self, name: &str, status: &str) {
        let mut s = self.state.lock().unwrap();
        s.health.insert(name.to_string(), status.to_string());
    }

    pub fn set_unreachable(&self) {
        self.state.lock().unwrap().unreachable = true;
    }

    pub fn fail_pull(&self) {
        self.state.lock().unwrap().fail_pull = true;
    }

    pub fn fail_start(&self) {
        self.state.lock().unwrap().fail_start = true;
    }

    pub fn fail_stop(&self) {
        self.state.lock().unwrap().fail_stop = true;
    }

    pub fn fail_remove(&self, name: &str) {
        self.state.lock().unwrap().fail_remove.insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn created(&self) -> Vec<CreateSpec> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn containers(&self) -> Vec<ContainerRef> {
        self.state.lock().unwrap().containers.clone()
    }

    pub fn container(&self, name: &str) -> Option<ContainerRef> {
        self.containers().into_iter().find(|c| c.has_name(name))
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn name_of(s: &FakeState, id: &str) -> String {
        s.containers
            .iter()
            .find(|c| c.id == id || c.has_name(id))
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| id.to_string())
    }

    fn position(s: &FakeState, id: &str) -> Option<usize> {
        s.containers.iter().position(|c| c.id == id || c.has_name(id))
    }
}

fn no_such_container(id: &str) -> RepdevError {
    RepdevError::container(format!("No such container: {}", id))
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    fn endpoint(&self) -> String {
        "fake://runtime".to_string()
    }

    async fn ping(&self) -> Result<()> {
        self.record(Call::Ping);
        if self.state.lock().unwrap().unreachable {
            return Err(RepdevError::container("connection refused"));
        }
        Ok(())
    }

    fn pull_image<'a>(&'a self, image: &'a str) -> BoxStream<'a, Result<PullProgress>> {
        self.record(Call::Pull(image.to_string()));
        let item = if self.state.lock().unwrap().fail_pull {
            Err(RepdevError::ImagePull {
                image: image.to_string(),
                reason: "manifest unknown".to_string(),
            })
        } else {
            Ok(PullProgress {
                id: None,
                status: Some(format!("Downloaded newer image for {}", image)),
                progress: None,
            })
        };
        stream::iter(vec![item]).boxed()
    }

    async fn list_containers(&self, filter: &ContainerFilter) -> Result<Vec<ContainerRef>> {
        self.record(Call::List);
        let s = self.state.lock().unwrap();
        if s.unreachable {
            return Err(RepdevError::container("connection refused"));
        }
        let matches = s
            .containers
            .iter()
            .filter(|c| {
                filter.labels.iter().all(|selector| match selector.split_once('=') {
                    Some((k, v)) => c.label(k) == Some(v),
                    None => c.labels.contains_key(selector.as_str()),
                })
            })
            .filter(|c| match filter.name {
                Some(ref name) => c.names.iter().any(|n| n.contains(name.as_str())),
                None => true,
            })
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn create_container(&self, spec: &CreateSpec) -> Result<String> {
        let mut s = self.state.lock().unwrap();
        s.next_id += 1;
        let id = format!("ctr{:04}", s.next_id);
        let name = spec.name.clone().unwrap_or_else(|| format!("auto_{}", s.next_id));
        s.calls.push(Call::Create(name.clone()));

        if s.containers.iter().any(|c| c.has_name(&name)) {
            return Err(RepdevError::container(format!(
                "Conflict. The container name \"/{}\" is already in use",
                name
            )));
        }

        s.created.push(spec.clone());
        s.containers.push(ContainerRef {
            id: id.clone(),
            names: vec![format!("/{}", name)],
            image: spec.image.clone(),
            state: ContainerState::Other("created".to_string()),
            labels: spec.labels.clone(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let name = Self::name_of(&s, id);
        s.calls.push(Call::Start(name));
        if s.fail_start {
            return Err(RepdevError::container("port is already allocated"));
        }
        let pos = Self::position(&s, id).ok_or_else(|| no_such_container(id))?;
        s.containers[pos].state = ContainerState::Running;
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout_secs: i64) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let name = Self::name_of(&s, id);
        s.calls.push(Call::Stop(name));
        if s.fail_stop {
            return Err(RepdevError::container("stop timed out"));
        }
        let pos = Self::position(&s, id).ok_or_else(|| no_such_container(id))?;
        s.containers[pos].state = ContainerState::Exited;
        Ok(())
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let name = Self::name_of(&s, id);
        s.calls.push(Call::Remove(name.clone()));
        if s.fail_remove.contains(&name) {
            return Err(RepdevError::container("removal of container is already in progress"));
        }
        let pos = Self::position(&s, id).ok_or_else(|| no_such_container(id))?;
        if s.containers[pos].is_running() && !force {
            return Err(RepdevError::container(
                "You cannot remove a running container. Stop the container before attempting removal or force remove",
            ));
        }
        s.containers.remove(pos);
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerDetails>> {
        let s = self.state.lock().unwrap();
        let name = Self::name_of(&s, id);
        let details = Self::position(&s, id).map(|pos| {
            let c = &s.containers[pos];
            ContainerDetails {
                id: c.id.clone(),
                name: c.name().to_string(),
                state: c.state.clone(),
                health: s.health.get(c.name()).cloned(),
            }
        });
        drop(s);
        self.record(Call::Inspect(name));
        Ok(details)
    }
}
