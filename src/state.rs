//! Display state
//!
//! A summary of the last `up`/`down` per service, written to
//! `<state_dir>/state.json` for `status`. Nothing in the orchestrator reads
//! it back to make decisions, so write failures only warn.

use crate::error::Result;
use crate::events::ServiceOutcome;
use crate::orchestrator::UpReport;
use crate::teardown::DownReport;
use crate::template::EnvironmentConfig;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const STATE_FILE: &str = "state.json";

/// Last recorded status of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Contents of `state.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub services: IndexMap<String, ServiceRecord>,
}

/// Reads and writes the state file
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// `dir` is resolved against `root` when relative.
    pub fn new(root: &Path, dir: &Path) -> Self {
        Self { dir: root.join(dir) }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    /// Load the state; a missing or unreadable file yields an empty state.
    pub fn load(&self) -> EnvironmentState {
        let path = self.path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return EnvironmentState::default(),
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(file = %path.display(), error = %e, "Ignoring unreadable state file");
            EnvironmentState::default()
        })
    }

    pub fn save(&self, state: &EnvironmentState) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(self.path(), json)?;
        debug!(file = %self.path().display(), "State saved");
        Ok(())
    }

    /// Record the outcome of `up`. Skipped services keep their previous record.
    pub fn record_up(&self, config: &EnvironmentConfig, report: &UpReport) {
        let now = Utc::now();
        let mut state = self.load();
        state.template = config.template_path.as_ref().map(|p| p.display().to_string());
        state.updated_at = Some(now);

        for (name, outcome) in &report.services {
            if matches!(outcome, ServiceOutcome::Skipped) {
                continue;
            }
            let container_name = config
                .services
                .get(name)
                .and_then(|s| s.container_name.clone());
            state.services.insert(
                name.clone(),
                ServiceRecord {
                    status: outcome.to_string(),
                    container_name,
                    updated_at: now,
                },
            );
        }

        self.persist(&state);
    }

    /// Record the outcome of `down`.
    pub fn record_down(&self, report: &DownReport) {
        let now = Utc::now();
        let mut state = self.load();
        state.updated_at = Some(now);

        for teardown in &report.containers {
            state.services.insert(
                teardown.service.clone(),
                ServiceRecord {
                    status: teardown.outcome.to_string(),
                    container_name: Some(teardown.container.clone()),
                    updated_at: now,
                },
            );
        }

        self.persist(&state);
    }

    fn persist(&self, state: &EnvironmentState) {
        if let Err(e) = self.save(state) {
            warn!(file = %self.path().display(), error = %e, "Could not write state file");
        }
    }
}
