//! Orchestration events
//!
//! The orchestrator reports what it does (or would do, in dry-run) as a flat
//! sequence of [`Event`]s. A display layer consumes them through an
//! [`EventSink`] without the engine depending on any presentation.

use crate::hooks::HookPhase;
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;
use tracing::{info, warn};

/// Per-service result of `up`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServiceOutcome {
    /// Excluded by the service filter
    Skipped,
    /// Started (or would be, in dry-run)
    Started { elapsed_ms: u64, attempts: u32 },
    /// A running container with the declared name was left alone
    AlreadyRunning,
    /// Startup aborted
    Failed { reason: String },
}

impl fmt::Display for ServiceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceOutcome::Skipped => write!(f, "skipped"),
            ServiceOutcome::Started { elapsed_ms, attempts } if *attempts > 0 => {
                write!(f, "started (ready after {} attempts, {}ms)", attempts, elapsed_ms)
            }
            ServiceOutcome::Started { .. } => write!(f, "started"),
            ServiceOutcome::AlreadyRunning => write!(f, "already running"),
            ServiceOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// One startup step of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    PullImage { image: String },
    RemoveStale { container: String },
    Create { container: String },
    Start,
    WaitReady { strategy: String },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::PullImage { image } => write!(f, "pull image {}", image),
            Step::RemoveStale { container } => write!(f, "remove stale container {}", container),
            Step::Create { container } => write!(f, "create container {}", container),
            Step::Start => write!(f, "start container"),
            Step::WaitReady { strategy } => write!(f, "wait for {}", strategy),
        }
    }
}

/// Per-container result of `down`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TeardownOutcome {
    Removed,
    /// Dry-run: would have been stopped and removed
    WouldRemove,
    /// Running and `force` not set
    SkippedRunning,
    /// Excluded by the service filter
    Filtered,
    /// Non-fatal; siblings are still processed
    Failed { reason: String },
}

impl fmt::Display for TeardownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownOutcome::Removed => write!(f, "removed"),
            TeardownOutcome::WouldRemove => write!(f, "would remove"),
            TeardownOutcome::SkippedRunning => write!(f, "running, skipped (use --force)"),
            TeardownOutcome::Filtered => write!(f, "not selected"),
            TeardownOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Something the orchestrator did or would do
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Hook {
        phase: HookPhase,
        service: Option<String>,
        command: String,
        dry_run: bool,
    },
    Step {
        service: String,
        step: Step,
        dry_run: bool,
    },
    Outcome {
        service: String,
        outcome: ServiceOutcome,
    },
    Teardown {
        container: String,
        service: String,
        outcome: TeardownOutcome,
    },
}

/// Receiver of orchestration events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Renders events as tracing records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::Hook {
                phase,
                service,
                command,
                dry_run: true,
            } => info!(%phase, service = service.as_deref().unwrap_or("-"), "[dry-run] Would run hook: {}", command),
            Event::Hook {
                phase,
                service,
                command,
                ..
            } => info!(%phase, service = service.as_deref().unwrap_or("-"), "Running hook: {}", command),
            Event::Step {
                service,
                step,
                dry_run: true,
            } => info!(service = %service, "[dry-run] Would {}", step),
            Event::Step { service, step, .. } => info!(service = %service, "{}", step),
            Event::Outcome {
                service,
                outcome: outcome @ ServiceOutcome::Failed { .. },
            } => warn!(service = %service, "{}", outcome),
            Event::Outcome { service, outcome } => info!(service = %service, "{}", outcome),
            Event::Teardown {
                container,
                service,
                outcome: outcome @ TeardownOutcome::Failed { .. },
            } => warn!(container = %container, service = %service, "{}", outcome),
            Event::Teardown {
                container,
                service,
                outcome,
            } => info!(container = %container, service = %service, "{}", outcome),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Steps only, without the dry-run flag, for comparing live and dry-run runs
    pub fn steps(&self) -> Vec<(String, Step)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Step { service, step, .. } => Some((service, step)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
