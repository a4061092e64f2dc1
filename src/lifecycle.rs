//! Per-service startup
//!
//! Brings one service up: beforeStart hooks, image pull, stale container
//! removal, create, start, readiness wait and afterStart hooks. Every step
//! is awaited before the next one, and any failure is returned wrapped with
//! the service name and the phase it happened in.

use crate::client::{find_by_name, ContainerFilter, ContainerRef, CreateSpec, RuntimeClient};
use crate::error::{Phase, RepdevError, Result};
use crate::events::{Event, EventSink, ServiceOutcome, Step};
use crate::hooks::{HookExecutor, HookPhase};
use crate::orchestrator::OrchestrationOptions;
use crate::ownership::{service_selector, SERVICE_LABEL_KEY};
use crate::readiness::{Probe, Sleeper};
use crate::template::{EnvironmentConfig, ServiceSpec, WaitStrategy};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of a successful readiness wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// Drives a single service through its startup sequence
pub struct ServiceLifecycleDriver {
    runtime: Arc<dyn RuntimeClient>,
    probe: Arc<dyn Probe>,
    sleeper: Arc<dyn Sleeper>,
    sink: Arc<dyn EventSink>,
}

impl ServiceLifecycleDriver {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        probe: Arc<dyn Probe>,
        sleeper: Arc<dyn Sleeper>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            runtime,
            probe,
            sleeper,
            sink,
        }
    }

    /// Bring `name` up. Filtered-out services return `Skipped`; a running
    /// container with the declared name is left alone unless `force` is set.
    pub async fn bring_up(
        &self,
        name: &str,
        spec: &ServiceSpec,
        config: &EnvironmentConfig,
        options: &OrchestrationOptions,
    ) -> Result<ServiceOutcome> {
        if !options.includes(name) {
            debug!(service = name, "Not selected, skipping");
            return Ok(ServiceOutcome::Skipped);
        }

        let dry_run = options.dry_run;
        let fail = |phase: Phase| move |e: RepdevError| RepdevError::service_failed(name, phase, e);
        let hooks = HookExecutor::new(config.project_root(), self.sink.clone());

        hooks
            .run(HookPhase::BeforeStart, Some(name), &spec.hooks.before_start, dry_run)
            .await
            .map_err(fail(Phase::BeforeStart))?;

        self.step(name, Step::PullImage { image: spec.image.clone() }, dry_run);
        if !dry_run {
            self.pull(&spec.image).await.map_err(fail(Phase::PullImage))?;
        }

        // Listing is read-only, so a dry-run makes the same decision here.
        // Without a reachable runtime the preview assumes a fresh start.
        let lookup = service_containers(self.runtime.as_ref(), name, spec, config).await;
        let existing = match lookup {
            Ok(existing) => existing,
            Err(e) if dry_run => {
                warn!(service = name, error = %e, "Cannot list containers, previewing a fresh start");
                Vec::new()
            }
            Err(e) => return Err(fail(Phase::RemoveStale)(e)),
        };

        if !options.force && existing.iter().any(ContainerRef::is_running) {
            info!(service = name, "Already running, use --force to recreate");
            hooks
                .run(HookPhase::AfterStart, Some(name), &spec.hooks.after_start, dry_run)
                .await
                .map_err(fail(Phase::AfterStart))?;
            return Ok(ServiceOutcome::AlreadyRunning);
        }

        for stale in &existing {
            self.step(
                name,
                Step::RemoveStale {
                    container: stale.name().to_string(),
                },
                dry_run,
            );
            if !dry_run {
                self.runtime
                    .remove_container(&stale.id, true)
                    .await
                    .map_err(fail(Phase::RemoveStale))?;
            }
        }

        let container = spec.container_name.clone().unwrap_or_else(|| name.to_string());
        self.step(name, Step::Create { container }, dry_run);
        let id = if dry_run {
            None
        } else {
            let create = create_spec(name, spec, config);
            let id = self
                .runtime
                .create_container(&create)
                .await
                .map_err(fail(Phase::Create))?;
            debug!(service = name, id = %id, "Container created");
            Some(id)
        };

        self.step(name, Step::Start, dry_run);
        if let Some(ref id) = id {
            self.runtime
                .start_container(id)
                .await
                .map_err(fail(Phase::Start))?;
        }

        let mut readiness = Readiness::default();
        if let Some(strategy) = spec.wait_for.as_ref().filter(|_| !options.no_wait) {
            self.step(
                name,
                Step::WaitReady {
                    strategy: strategy.describe(),
                },
                dry_run,
            );
            if !dry_run {
                let target = spec.container_name.as_deref().or(id.as_deref());
                readiness = self
                    .wait_until_ready(name, strategy, target)
                    .await
                    .map_err(fail(Phase::Readiness))?;
            }
        }

        hooks
            .run(HookPhase::AfterStart, Some(name), &spec.hooks.after_start, dry_run)
            .await
            .map_err(fail(Phase::AfterStart))?;

        Ok(ServiceOutcome::Started {
            elapsed_ms: readiness.elapsed_ms,
            attempts: readiness.attempts,
        })
    }

    /// Probe up to `retries` times, sleeping `interval` between attempts.
    pub async fn wait_until_ready(
        &self,
        service: &str,
        strategy: &WaitStrategy,
        container: Option<&str>,
    ) -> Result<Readiness> {
        let timing = strategy.timing();
        let retries = timing.retries();
        let interval = Duration::from_millis(timing.interval_ms);
        let started = Instant::now();
        let elapsed_ms = || u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        for attempt in 1..=retries {
            if self.probe.probe(strategy, container).await {
                info!(service, attempt, "Ready");
                return Ok(Readiness {
                    attempts: attempt,
                    elapsed_ms: elapsed_ms(),
                });
            }

            debug!(service, attempt, retries, "Not ready yet");
            if attempt < retries {
                self.sleeper.sleep(interval).await;
            }
        }

        Err(RepdevError::ReadinessTimeout {
            service: service.to_string(),
            attempts: retries,
            elapsed_ms: elapsed_ms(),
        })
    }

    async fn pull(&self, image: &str) -> Result<()> {
        info!(image, "Pulling image");
        let mut progress = self.runtime.pull_image(image);
        while let Some(event) = progress.next().await {
            let event = event?;
            if let Some(status) = event.status {
                debug!(image, layer = event.id.as_deref().unwrap_or(""), "{}", status);
            }
        }
        Ok(())
    }

    fn step(&self, service: &str, step: Step, dry_run: bool) {
        self.sink.emit(&Event::Step {
            service: service.to_string(),
            step,
            dry_run,
        });
    }
}

/// Containers belonging to a service: the declared name when there is one,
/// else this run's containers labelled with the service.
pub async fn service_containers(
    runtime: &dyn RuntimeClient,
    name: &str,
    spec: &ServiceSpec,
    config: &EnvironmentConfig,
) -> Result<Vec<ContainerRef>> {
    if let Some(ref container_name) = spec.container_name {
        return find_by_name(runtime, container_name).await;
    }

    match config.run_label {
        Some(ref label) => {
            let filter = ContainerFilter::default()
                .label(label.selector())
                .label(service_selector(name));
            runtime.list_containers(&filter).await
        }
        None => Ok(Vec::new()),
    }
}

/// Translate a service into a container create request.
pub fn create_spec(name: &str, spec: &ServiceSpec, config: &EnvironmentConfig) -> CreateSpec {
    let root = config.project_root();

    let mut labels = HashMap::new();
    labels.insert(SERVICE_LABEL_KEY.to_string(), name.to_string());
    if let Some(ref label) = config.run_label {
        labels.insert(label.key().to_string(), label.value().to_string());
    }

    CreateSpec {
        name: spec.container_name.clone(),
        image: spec.image.clone(),
        cmd: spec.command.as_ref().map(|c| c.to_args()),
        env: spec.environment.to_key_values(),
        ports: spec.ports.clone(),
        binds: spec.volumes.iter().map(|v| v.bind(&root)).collect(),
        labels,
    }
}
