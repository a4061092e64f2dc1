//! Environment orchestration
//!
//! `up` walks the template's services in declaration order, one at a time.
//! It is not transactional: a failure leaves earlier services running, and
//! re-running `up` is the recovery path.

use crate::client::{ContainerFilter, ContainerRef, RuntimeClient};
use crate::error::{Phase, RepdevError, Result};
use crate::events::{Event, EventSink, ServiceOutcome, TracingSink};
use crate::hooks::{HookExecutor, HookPhase};
use crate::lifecycle::{service_containers, ServiceLifecycleDriver};
use crate::readiness::{Probe, ReadinessChecker, Sleeper, TokioSleeper};
use crate::settings::Settings;
use crate::template::EnvironmentConfig;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Per-invocation options
#[derive(Debug, Clone, Default)]
pub struct OrchestrationOptions {
    /// Recreate running containers
    pub force: bool,
    /// Report every step without touching the runtime
    pub dry_run: bool,
    /// Services to act on; empty means all
    pub services: BTreeSet<String>,
    /// Skip readiness waits
    pub no_wait: bool,
}

impl OrchestrationOptions {
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn no_wait(mut self, no_wait: bool) -> Self {
        self.no_wait = no_wait;
        self
    }

    pub fn only<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn includes(&self, service: &str) -> bool {
        self.services.is_empty() || self.services.contains(service)
    }

    /// Every filtered name must be declared in the template.
    pub fn check_filter(&self, config: &EnvironmentConfig) -> Result<()> {
        match self.services.iter().find(|s| !config.services.contains_key(*s)) {
            Some(unknown) => Err(RepdevError::ServiceNotFound(unknown.clone())),
            None => Ok(()),
        }
    }
}

/// Outcome of `up`, in declaration order
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpReport {
    pub services: Vec<(String, ServiceOutcome)>,
}

impl UpReport {
    pub fn outcome(&self, service: &str) -> Option<&ServiceOutcome> {
        self.services
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, outcome)| outcome)
    }
}

/// Per-service result of `restart`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartOutcome {
    Restarted,
    NotFound,
}

impl fmt::Display for RestartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartOutcome::Restarted => write!(f, "restarted"),
            RestartOutcome::NotFound => write!(f, "not found"),
        }
    }
}

/// Brings an environment up
pub struct EnvironmentOrchestrator {
    runtime: Arc<dyn RuntimeClient>,
    driver: ServiceLifecycleDriver,
    sink: Arc<dyn EventSink>,
    stop_timeout_secs: i64,
}

impl EnvironmentOrchestrator {
    /// Orchestrator with real probes, wall-clock sleeps and tracing output
    pub fn new(runtime: Arc<dyn RuntimeClient>, settings: &Settings) -> Result<Self> {
        let probe = Arc::new(ReadinessChecker::new(runtime.clone(), settings.probe_timeout)?);
        let orchestrator = Self::with_parts(runtime, probe, Arc::new(TokioSleeper), Arc::new(TracingSink))
            .stop_timeout(settings.stop_timeout_secs);
        Ok(orchestrator)
    }

    pub fn with_parts(
        runtime: Arc<dyn RuntimeClient>,
        probe: Arc<dyn Probe>,
        sleeper: Arc<dyn Sleeper>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let driver = ServiceLifecycleDriver::new(runtime.clone(), probe, sleeper, sink.clone());
        Self {
            runtime,
            driver,
            sink,
            stop_timeout_secs: 10,
        }
    }

    pub fn stop_timeout(mut self, secs: i64) -> Self {
        self.stop_timeout_secs = secs;
        self
    }

    /// Bring the environment up.
    ///
    /// The runtime must answer a ping first unless this is a dry-run. The
    /// first service failure aborts the remaining services and postUp.
    pub async fn up(&self, config: &EnvironmentConfig, options: &OrchestrationOptions) -> Result<UpReport> {
        options.check_filter(config)?;

        if !options.dry_run {
            ensure_reachable(self.runtime.as_ref()).await?;
        }

        info!(
            services = config.services.len(),
            dry_run = options.dry_run,
            force = options.force,
            "Bringing environment up"
        );

        let hooks = HookExecutor::new(config.project_root(), self.sink.clone());
        hooks
            .run(HookPhase::PreUp, None, &config.hooks.pre_up, options.dry_run)
            .await?;

        let mut report = UpReport::default();
        for (name, spec) in &config.services {
            match self.driver.bring_up(name, spec, config, options).await {
                Ok(outcome) => {
                    self.emit_outcome(name, outcome.clone());
                    report.services.push((name.clone(), outcome));
                }
                Err(e) => {
                    self.emit_outcome(
                        name,
                        ServiceOutcome::Failed {
                            reason: e.to_string(),
                        },
                    );
                    return Err(e);
                }
            }
        }

        hooks
            .run(HookPhase::PostUp, None, &config.hooks.post_up, options.dry_run)
            .await?;

        Ok(report)
    }

    /// Stop then start the selected services' containers. An empty selection
    /// restarts every service.
    pub async fn restart(
        &self,
        config: &EnvironmentConfig,
        services: &[String],
    ) -> Result<Vec<(String, RestartOutcome)>> {
        let options = OrchestrationOptions::default().only(services.iter().cloned());
        options.check_filter(config)?;
        ensure_reachable(self.runtime.as_ref()).await?;

        let mut results = Vec::new();
        for (name, spec) in &config.services {
            if !options.includes(name) {
                continue;
            }

            let containers = service_containers(self.runtime.as_ref(), name, spec, config).await?;
            if containers.is_empty() {
                info!(service = %name, "No container to restart");
                results.push((name.clone(), RestartOutcome::NotFound));
                continue;
            }

            for container in &containers {
                if container.is_running() {
                    self.runtime
                        .stop_container(&container.id, self.stop_timeout_secs)
                        .await
                        .map_err(|e| RepdevError::service_failed(name.as_str(), Phase::Stop, e))?;
                }
                self.runtime
                    .start_container(&container.id)
                    .await
                    .map_err(|e| RepdevError::service_failed(name.as_str(), Phase::Start, e))?;
                info!(service = %name, container = container.name(), "Restarted");
            }
            results.push((name.clone(), RestartOutcome::Restarted));
        }

        Ok(results)
    }

    /// Containers belonging to this template, in any state.
    ///
    /// Uses the ownership label when the template has one, else the
    /// declared container names.
    pub async fn status(&self, config: &EnvironmentConfig) -> Result<Vec<ContainerRef>> {
        ensure_reachable(self.runtime.as_ref()).await?;

        if let Some(ref label) = config.run_label {
            let filter = ContainerFilter::default().label(label.selector());
            let labelled = self.runtime.list_containers(&filter).await?;
            if !labelled.is_empty() {
                return Ok(labelled);
            }
            debug!("No labelled containers, falling back to declared names");
        }

        let mut containers = Vec::new();
        for spec in config.services.values() {
            if let Some(ref name) = spec.container_name {
                containers.extend(crate::client::find_by_name(self.runtime.as_ref(), name).await?);
            }
        }
        Ok(containers)
    }

    fn emit_outcome(&self, service: &str, outcome: ServiceOutcome) {
        self.sink.emit(&Event::Outcome {
            service: service.to_string(),
            outcome,
        });
    }
}

/// Fail with a diagnostic unless the runtime answers a ping.
pub async fn ensure_reachable(runtime: &dyn RuntimeClient) -> Result<()> {
    runtime
        .ping()
        .await
        .map_err(|e| RepdevError::RuntimeUnreachable {
            endpoint: runtime.endpoint(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::{Call, FakeRuntime};
    use crate::client::ContainerState;
    use crate::events::{RecordingSink, Step};
    use crate::ownership::OWNERSHIP_LABEL_KEY;
    use crate::readiness::fakes::{RecordingSleeper, ScriptedProbe};
    use crate::template::TemplateParser;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const TWO_SERVICES: &str = r#"
services:
  db:
    image: postgres:16
    container_name: app_db
    ports: ["5432:5432"]
    wait_for:
      type: tcp
      port: 5432
      timeout: 1000
      interval: 200
  web:
    image: node:20
    container_name: app_web
    depends_on: [db]
    hooks:
      beforeStart: ["true"]
      afterStart: ["true"]
"#;

    struct Harness {
        runtime: Arc<FakeRuntime>,
        sleeper: Arc<RecordingSleeper>,
        sink: Arc<RecordingSink>,
        orchestrator: EnvironmentOrchestrator,
    }

    fn harness_with(runtime: Arc<FakeRuntime>, probe: Arc<dyn Probe>) -> Harness {
        let sleeper = Arc::new(RecordingSleeper::new());
        let sink = Arc::new(RecordingSink::new());
        let orchestrator =
            EnvironmentOrchestrator::with_parts(runtime.clone(), probe, sleeper.clone(), sink.clone());
        Harness {
            runtime,
            sleeper,
            sink,
            orchestrator,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(FakeRuntime::new()), Arc::new(ScriptedProbe::ready_on(1)))
    }

    fn load(yaml: &str) -> (TempDir, EnvironmentConfig) {
        let temp = tempdir().unwrap();
        let path = temp.path().join("repdev.yml");
        std::fs::write(&path, yaml).unwrap();
        let config = TemplateParser::parse_file(&path).unwrap();
        (temp, config)
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_mutating_calls() {
        let (_temp, config) = load(TWO_SERVICES);
        let h = harness();

        let report = h
            .orchestrator
            .up(&config, &OrchestrationOptions::default().dry_run(true))
            .await
            .unwrap();

        assert!(h.runtime.mutating_calls().is_empty());
        assert!(!h.runtime.calls().contains(&Call::Ping));
        assert_eq!(
            report.outcome("db"),
            Some(&ServiceOutcome::Started {
                elapsed_ms: 0,
                attempts: 0
            })
        );
    }

    #[tokio::test]
    async fn test_dry_run_previews_live_steps() {
        let (_temp, config) = load(TWO_SERVICES);

        let dry = harness();
        dry.orchestrator
            .up(&config, &OrchestrationOptions::default().dry_run(true))
            .await
            .unwrap();

        let live = harness();
        live.orchestrator
            .up(&config, &OrchestrationOptions::default())
            .await
            .unwrap();

        let steps = live.sink.steps();
        assert_eq!(dry.sink.steps(), steps);
        assert_eq!(
            steps.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>(),
            vec!["db", "db", "db", "db", "web", "web", "web"]
        );
        assert!(matches!(steps[3].1, Step::WaitReady { .. }));
        assert!(dry
            .sink
            .events()
            .iter()
            .all(|e| !matches!(e, Event::Hook { dry_run: false, .. } | Event::Step { dry_run: false, .. })));
    }

    #[tokio::test]
    async fn test_dry_run_matches_live_on_running_environment() {
        let (_temp, config) = load(TWO_SERVICES);
        let h = harness();
        let live = OrchestrationOptions::default();

        h.orchestrator.up(&config, &live).await.unwrap();
        let first = h.sink.steps().len();
        let mutations = h.runtime.mutating_calls().len();

        let preview = h
            .orchestrator
            .up(&config, &OrchestrationOptions::default().dry_run(true))
            .await
            .unwrap();
        let second = h.sink.steps().len();
        assert_eq!(h.runtime.mutating_calls().len(), mutations);

        let rerun = h.orchestrator.up(&config, &live).await.unwrap();
        let steps = h.sink.steps();

        assert_eq!(preview.services, rerun.services);
        assert_eq!(preview.outcome("db"), Some(&ServiceOutcome::AlreadyRunning));
        assert_eq!(steps[first..second], steps[second..]);
    }

    #[tokio::test]
    async fn test_forced_dry_run_previews_stale_removal() {
        let (_temp, config) = load(TWO_SERVICES);
        let h = harness();

        h.orchestrator.up(&config, &OrchestrationOptions::default()).await.unwrap();
        let first = h.sink.steps().len();
        let mutations = h.runtime.mutating_calls().len();

        h.orchestrator
            .up(&config, &OrchestrationOptions::default().force(true).dry_run(true))
            .await
            .unwrap();

        assert_eq!(h.runtime.mutating_calls().len(), mutations);
        let previewed = &h.sink.steps()[first..];
        assert!(previewed.contains(&(
            "db".to_string(),
            Step::RemoveStale {
                container: "app_db".to_string()
            }
        )));
        assert!(previewed.iter().any(|(s, step)| s == "db" && matches!(step, Step::Create { .. })));
    }

    #[tokio::test]
    async fn test_dry_run_without_runtime_assumes_fresh_start() {
        let (_temp, config) = load(TWO_SERVICES);
        let h = harness();
        h.runtime.set_unreachable();

        let report = h
            .orchestrator
            .up(&config, &OrchestrationOptions::default().dry_run(true))
            .await
            .unwrap();

        assert!(h.runtime.mutating_calls().is_empty());
        assert_eq!(
            report.outcome("web"),
            Some(&ServiceOutcome::Started {
                elapsed_ms: 0,
                attempts: 0
            })
        );
    }

    #[tokio::test]
    async fn test_second_up_is_idempotent() {
        let (_temp, config) = load(TWO_SERVICES);
        let h = harness();
        let options = OrchestrationOptions::default();

        h.orchestrator.up(&config, &options).await.unwrap();
        let report = h.orchestrator.up(&config, &options).await.unwrap();

        assert_eq!(report.outcome("db"), Some(&ServiceOutcome::AlreadyRunning));
        assert_eq!(report.outcome("web"), Some(&ServiceOutcome::AlreadyRunning));
        assert_eq!(h.runtime.created().len(), 2);
        assert_eq!(h.runtime.containers().len(), 2);
    }

    #[tokio::test]
    async fn test_force_recreates_with_same_name_and_label() {
        let (_temp, config) = load(TWO_SERVICES);
        let h = harness();

        h.orchestrator.up(&config, &OrchestrationOptions::default()).await.unwrap();
        let before = h.runtime.container("app_db").unwrap();

        h.orchestrator
            .up(&config, &OrchestrationOptions::default().force(true))
            .await
            .unwrap();
        let after = h.runtime.container("app_db").unwrap();

        assert_ne!(before.id, after.id);
        assert_eq!(
            after.label(OWNERSHIP_LABEL_KEY),
            config.run_label.as_ref().map(|l| l.value())
        );
        assert!(h.runtime.calls().contains(&Call::Remove("app_db".to_string())));
        assert_eq!(h.runtime.containers().len(), 2);
    }

    #[tokio::test]
    async fn test_filter_touches_only_selected() {
        let (_temp, config) = load(TWO_SERVICES);
        let h = harness();

        let report = h
            .orchestrator
            .up(&config, &OrchestrationOptions::default().only(["web"]))
            .await
            .unwrap();

        assert_eq!(report.outcome("db"), Some(&ServiceOutcome::Skipped));
        assert!(h.runtime.container("app_db").is_none());
        assert!(h.runtime.container("app_web").unwrap().is_running());
        assert!(h
            .runtime
            .mutating_calls()
            .iter()
            .all(|c| !matches!(c, Call::Pull(image) if image == "postgres:16")));
    }

    #[tokio::test]
    async fn test_unknown_filter_is_rejected_before_any_call() {
        let (_temp, config) = load(TWO_SERVICES);
        let h = harness();

        let err = h
            .orchestrator
            .up(&config, &OrchestrationOptions::default().only(["cache"]))
            .await
            .unwrap_err();

        assert!(matches!(err, RepdevError::ServiceNotFound(ref s) if s == "cache"));
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_runtime_fails_before_hooks() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("repdev.yml");
        std::fs::write(
            &path,
            "hooks:\n  preUp: [\"touch ran.txt\"]\nservices:\n  db:\n    image: postgres:16\n    container_name: app_db\n",
        )
        .unwrap();
        let config = TemplateParser::parse_file(&path).unwrap();
        let h = harness();
        h.runtime.set_unreachable();

        let err = h
            .orchestrator
            .up(&config, &OrchestrationOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RepdevError::RuntimeUnreachable { .. }));
        assert_eq!(err.diagnosis(), Some("Docker not running"));
        assert!(h.runtime.mutating_calls().is_empty());
        assert!(!temp.path().join("ran.txt").exists());
    }

    #[tokio::test]
    async fn test_failure_aborts_later_services_and_keeps_earlier() {
        let (_temp, config) = load(TWO_SERVICES);
        let h = harness();
        h.orchestrator
            .up(&config, &OrchestrationOptions::default().only(["db"]))
            .await
            .unwrap();
        h.runtime.fail_remove("app_db");

        let err = h
            .orchestrator
            .up(&config, &OrchestrationOptions::default().force(true))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RepdevError::ServiceFailed {
                phase: Phase::RemoveStale,
                ..
            }
        ));
        assert!(h.runtime.container("app_db").unwrap().is_running());
        assert!(h.runtime.container("app_web").is_none());
        assert!(h.sink.events().iter().any(|e| matches!(
            e,
            Event::Outcome { service, outcome: ServiceOutcome::Failed { .. } } if service == "db"
        )));
    }

    #[tokio::test]
    async fn test_tcp_readiness_timeout_is_bounded() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let yaml = format!(
            "services:\n  db:\n    image: postgres:16\n    container_name: app_db\n    wait_for:\n      type: tcp\n      host: 127.0.0.1\n      port: {}\n      timeout: 1000\n      interval: 200\n",
            port
        );
        let (_temp, config) = load(&yaml);

        let runtime = Arc::new(FakeRuntime::new());
        let checker = ReadinessChecker::new(runtime.clone(), Duration::from_millis(500)).unwrap();
        let h = harness_with(runtime, Arc::new(checker));

        let err = h
            .orchestrator
            .up(&config, &OrchestrationOptions::default())
            .await
            .unwrap_err();

        match err {
            RepdevError::ServiceFailed {
                phase: Phase::Readiness,
                ref source,
                ..
            } => assert!(matches!(**source, RepdevError::ReadinessTimeout { attempts: 5, .. })),
            ref other => panic!("unexpected error: {}", other),
        }
        assert_eq!(h.sleeper.sleeps(), vec![Duration::from_millis(200); 4]);
    }

    #[tokio::test]
    async fn test_hook_order() {
        let yaml = r#"
hooks:
  preUp: ["echo A >> order.txt", "echo B >> order.txt"]
  postUp: ["echo E >> order.txt"]
services:
  s:
    image: alpine:3
    container_name: s
    hooks:
      beforeStart: ["echo C >> order.txt"]
      afterStart: ["echo D >> order.txt"]
"#;
        let (temp, config) = load(yaml);
        let h = harness();

        h.orchestrator.up(&config, &OrchestrationOptions::default()).await.unwrap();

        let order = std::fs::read_to_string(temp.path().join("order.txt")).unwrap();
        assert_eq!(order.split_whitespace().collect::<Vec<_>>(), vec!["A", "B", "C", "D", "E"]);
    }

    #[tokio::test]
    async fn test_failed_pre_up_starts_nothing() {
        let (_temp, config) = load(
            "hooks:\n  preUp: [\"exit 1\"]\nservices:\n  db:\n    image: postgres:16\n    container_name: app_db\n",
        );
        let h = harness();

        let err = h
            .orchestrator
            .up(&config, &OrchestrationOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, RepdevError::HookFailed { .. }));
        assert!(h.runtime.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_restart_stop_failure_names_stop_phase() {
        let (_temp, config) = load(TWO_SERVICES);
        let h = harness();
        h.orchestrator
            .up(&config, &OrchestrationOptions::default().only(["db"]))
            .await
            .unwrap();
        h.runtime.fail_stop();

        let err = h
            .orchestrator
            .restart(&config, &["db".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RepdevError::ServiceFailed {
                phase: Phase::Stop,
                ..
            }
        ));
        let starts = h
            .runtime
            .calls()
            .into_iter()
            .filter(|c| *c == Call::Start("app_db".to_string()))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn test_restart_and_status() {
        let (_temp, config) = load(TWO_SERVICES);
        let h = harness();
        h.runtime
            .add_container("someone_else", "redis:7", ContainerState::Running, &[]);
        h.orchestrator
            .up(&config, &OrchestrationOptions::default().only(["db"]))
            .await
            .unwrap();

        let results = h.orchestrator.restart(&config, &[]).await.unwrap();
        assert_eq!(
            results,
            vec![
                ("db".to_string(), RestartOutcome::Restarted),
                ("web".to_string(), RestartOutcome::NotFound),
            ]
        );
        assert!(h.runtime.calls().contains(&Call::Stop("app_db".to_string())));
        assert!(h.runtime.container("app_db").unwrap().is_running());

        let status = h.orchestrator.status(&config).await.unwrap();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].name(), "app_db");
    }

    #[test]
    fn test_options_filter() {
        let options = OrchestrationOptions::default();
        assert!(options.includes("anything"));

        let options = options.only(["db"]);
        assert!(options.includes("db"));
        assert!(!options.includes("web"));

        let config = EnvironmentConfig::default();
        assert!(options.check_filter(&config).is_err());
    }
}
