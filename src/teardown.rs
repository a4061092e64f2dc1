//! Environment teardown
//!
//! Containers are found by the template's ownership label. Only when no
//! labelled container exists does teardown fall back to the declared
//! `container_name`s, for environments created before labelling.

use crate::client::{find_by_name, ContainerFilter, ContainerRef, RuntimeClient};
use crate::error::Result;
use crate::events::{Event, EventSink, TeardownOutcome, TracingSink};
use crate::hooks::{HookExecutor, HookPhase};
use crate::orchestrator::{ensure_reachable, OrchestrationOptions};
use crate::ownership::SERVICE_LABEL_KEY;
use crate::template::EnvironmentConfig;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// How teardown located its containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// By ownership label
    Label,
    /// By declared container names
    Name,
    /// Nothing to tear down
    Nothing,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Label => write!(f, "ownership label"),
            Resolution::Name => write!(f, "container name"),
            Resolution::Nothing => write!(f, "nothing found"),
        }
    }
}

/// One processed container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerTeardown {
    pub container: String,
    pub service: String,
    pub outcome: TeardownOutcome,
}

/// Outcome of `down`
#[derive(Debug, Clone, Serialize)]
pub struct DownReport {
    pub resolution: Resolution,
    pub containers: Vec<ContainerTeardown>,
}

impl DownReport {
    pub fn outcome(&self, container: &str) -> Option<&TeardownOutcome> {
        self.containers
            .iter()
            .find(|c| c.container == container)
            .map(|c| &c.outcome)
    }

    /// Containers whose removal failed
    pub fn failures(&self) -> impl Iterator<Item = &ContainerTeardown> {
        self.containers
            .iter()
            .filter(|c| matches!(c.outcome, TeardownOutcome::Failed { .. }))
    }
}

/// Tears an environment down
pub struct TeardownResolver {
    runtime: Arc<dyn RuntimeClient>,
    sink: Arc<dyn EventSink>,
    stop_timeout_secs: i64,
}

impl TeardownResolver {
    pub fn new(runtime: Arc<dyn RuntimeClient>) -> Self {
        Self {
            runtime,
            sink: Arc::new(TracingSink),
            stop_timeout_secs: 10,
        }
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn stop_timeout(mut self, secs: i64) -> Self {
        self.stop_timeout_secs = secs;
        self
    }

    /// Tear the environment down.
    ///
    /// Per-container failures are recorded in the report and never abort
    /// the remaining containers. Running containers are only removed with
    /// `force`.
    pub async fn down(&self, config: &EnvironmentConfig, options: &OrchestrationOptions) -> Result<DownReport> {
        options.check_filter(config)?;
        ensure_reachable(self.runtime.as_ref()).await?;

        let hooks = HookExecutor::new(config.project_root(), self.sink.clone());
        hooks
            .run(HookPhase::PreDown, None, &config.hooks.pre_down, options.dry_run)
            .await?;

        let labelled = match config.run_label {
            Some(ref label) => {
                let filter = ContainerFilter::default().label(label.selector());
                self.runtime.list_containers(&filter).await?
            }
            None => Vec::new(),
        };

        let mut report = DownReport {
            resolution: Resolution::Label,
            containers: Vec::new(),
        };

        if !labelled.is_empty() {
            info!(count = labelled.len(), "Found containers by ownership label");
            for container in &labelled {
                let service = service_of(container, config);
                let outcome = self.tear_down(container, &service, options).await;
                self.record(&mut report, container, service, outcome);
            }
        } else {
            report.resolution = Resolution::Name;
            for (name, spec) in &config.services {
                let Some(ref container_name) = spec.container_name else {
                    continue;
                };

                let found = find_by_name(self.runtime.as_ref(), container_name).await?;
                if found.is_empty() {
                    info!(service = %name, container = %container_name, "Not found, nothing to do");
                    continue;
                }
                for container in &found {
                    let outcome = self.tear_down(container, name, options).await;
                    self.record(&mut report, container, name.clone(), outcome);
                }
            }

            if report.containers.is_empty() {
                info!("No containers found for this template");
                report.resolution = Resolution::Nothing;
            }
        }

        hooks
            .run(HookPhase::PostDown, None, &config.hooks.post_down, options.dry_run)
            .await?;

        Ok(report)
    }

    async fn tear_down(
        &self,
        container: &ContainerRef,
        service: &str,
        options: &OrchestrationOptions,
    ) -> TeardownOutcome {
        if !options.includes(service) {
            return TeardownOutcome::Filtered;
        }
        if container.is_running() && !options.force {
            return TeardownOutcome::SkippedRunning;
        }
        if options.dry_run {
            return TeardownOutcome::WouldRemove;
        }

        if container.is_running() {
            if let Err(e) = self
                .runtime
                .stop_container(&container.id, self.stop_timeout_secs)
                .await
            {
                warn!(container = container.name(), error = %e, "Stop failed, removing anyway");
            }
        }

        match self.runtime.remove_container(&container.id, options.force).await {
            Ok(()) => TeardownOutcome::Removed,
            Err(e) => TeardownOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    fn record(
        &self,
        report: &mut DownReport,
        container: &ContainerRef,
        service: String,
        outcome: TeardownOutcome,
    ) {
        self.sink.emit(&Event::Teardown {
            container: container.name().to_string(),
            service: service.clone(),
            outcome: outcome.clone(),
        });
        report.containers.push(ContainerTeardown {
            container: container.name().to_string(),
            service,
            outcome,
        });
    }
}

/// Service a labelled container belongs to: its service label, else the
/// template service declaring its name, else the container name itself.
fn service_of(container: &ContainerRef, config: &EnvironmentConfig) -> String {
    container
        .label(SERVICE_LABEL_KEY)
        .or_else(|| config.service_for_container(container.name()))
        .unwrap_or(container.name())
        .to_string()
}
