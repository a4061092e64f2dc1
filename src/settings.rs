//! Process-level settings
//!
//! Values that belong to the invocation rather than to the template: where the
//! container runtime lives, where display state is written, and probe bounds.

use std::path::PathBuf;
use std::time::Duration;

/// Default template file looked up in the working directory
pub const DEFAULT_TEMPLATE_FILE: &str = "repdev.yml";

/// Default directory for the display state file
pub const DEFAULT_STATE_DIR: &str = ".repdev";

/// Upper bound for a single readiness probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// RepDev settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Runtime endpoint override (`unix://`, `tcp://` or `http://`)
    pub docker_host: Option<String>,
    /// Directory holding `state.json`
    pub state_dir: PathBuf,
    /// Upper bound for a single readiness probe
    pub probe_timeout: Duration,
    /// Grace period passed to container stop
    pub stop_timeout_secs: i64,
    /// Template file name used when none is given
    pub template_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            docker_host: None,
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            stop_timeout_secs: 10,
            template_file: PathBuf::from(DEFAULT_TEMPLATE_FILE),
        }
    }
}

impl Settings {
    /// Build settings from `REPDEV_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(host) = lookup("REPDEV_DOCKER_HOST").filter(|h| !h.is_empty()) {
            settings.docker_host = Some(host);
        }
        if let Some(dir) = lookup("REPDEV_STATE_DIR").filter(|d| !d.is_empty()) {
            settings.state_dir = PathBuf::from(dir);
        }
        if let Some(ms) = lookup("REPDEV_PROBE_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
            settings.probe_timeout = Duration::from_millis(ms.max(100));
        }
        if let Some(secs) = lookup("REPDEV_STOP_TIMEOUT").and_then(|v| v.parse::<i64>().ok()) {
            settings.stop_timeout_secs = secs.max(0);
        }

        settings
    }

    /// Override the runtime endpoint (CLI `--host`)
    pub fn docker_host(mut self, host: Option<String>) -> Self {
        if host.is_some() {
            self.docker_host = host;
        }
        self
    }
}
