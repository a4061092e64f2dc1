//! Lifecycle hook execution
//!
//! Hooks are shell commands run on the host, one at a time and in list
//! order, from the directory that holds the template.

use crate::error::{RepdevError, Result};
use crate::events::{Event, EventSink};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Named lifecycle phase a hook list belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum HookPhase {
    PreUp,
    PostUp,
    PreDown,
    PostDown,
    BeforeStart,
    AfterStart,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::PreUp => write!(f, "preUp"),
            HookPhase::PostUp => write!(f, "postUp"),
            HookPhase::PreDown => write!(f, "preDown"),
            HookPhase::PostDown => write!(f, "postDown"),
            HookPhase::BeforeStart => write!(f, "beforeStart"),
            HookPhase::AfterStart => write!(f, "afterStart"),
        }
    }
}

/// Runs hook command lists
#[derive(Clone)]
pub struct HookExecutor {
    working_dir: PathBuf,
    sink: Arc<dyn EventSink>,
}

impl HookExecutor {
    pub fn new(working_dir: PathBuf, sink: Arc<dyn EventSink>) -> Self {
        Self { working_dir, sink }
    }

    /// Run `commands` in order. The first failure aborts the rest of the list.
    ///
    /// In dry-run each command is reported and nothing is executed.
    pub async fn run(
        &self,
        phase: HookPhase,
        service: Option<&str>,
        commands: &[String],
        dry_run: bool,
    ) -> Result<()> {
        for command in commands {
            self.sink.emit(&Event::Hook {
                phase,
                service: service.map(str::to_string),
                command: command.clone(),
                dry_run,
            });

            if dry_run {
                continue;
            }

            self.execute(phase, command).await?;
        }

        Ok(())
    }

    async fn execute(&self, phase: HookPhase, command: &str) -> Result<()> {
        let failed = |reason: String| RepdevError::HookFailed {
            phase: phase.to_string(),
            command: command.to_string(),
            reason,
        };

        let output = shell(command)
            .current_dir(&self.working_dir)
            .output()
            .await
            .map_err(|e| failed(format!("failed to spawn: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.trim().is_empty() {
            debug!(%phase, "{}", stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            debug!(%phase, "stderr: {}", stderr.trim_end());
        }

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let detail = stderr.trim();
            return Err(failed(if detail.is_empty() {
                format!("exited with {}", code)
            } else {
                format!("exited with {}: {}", code, detail)
            }));
        }

        Ok(())
    }
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", command]);
    cmd
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use tempfile::tempdir;

    fn executor(dir: &std::path::Path) -> (HookExecutor, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (HookExecutor::new(dir.to_path_buf(), sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_runs_in_order_in_working_dir() {
        let temp = tempdir().unwrap();
        let (hooks, sink) = executor(temp.path());
        let commands = vec!["echo one >> order.txt".to_string(), "echo two >> order.txt".to_string()];

        hooks.run(HookPhase::PreUp, None, &commands, false).await.unwrap();

        let written = std::fs::read_to_string(temp.path().join("order.txt")).unwrap();
        assert_eq!(written.split_whitespace().collect::<Vec<_>>(), vec!["one", "two"]);
        assert_eq!(sink.events().len(), 2);
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining() {
        let temp = tempdir().unwrap();
        let (hooks, _) = executor(temp.path());
        let commands = vec![
            "echo first >> order.txt".to_string(),
            "exit 3".to_string(),
            "echo never >> order.txt".to_string(),
        ];

        let err = hooks
            .run(HookPhase::BeforeStart, Some("api"), &commands, false)
            .await
            .unwrap_err();

        match err {
            RepdevError::HookFailed { phase, command, reason } => {
                assert_eq!(phase, "beforeStart");
                assert_eq!(command, "exit 3");
                assert!(reason.contains('3'));
            }
            other => panic!("unexpected error: {}", other),
        }
        let written = std::fs::read_to_string(temp.path().join("order.txt")).unwrap();
        assert_eq!(written.trim(), "first");
    }

    #[tokio::test]
    async fn test_dry_run_reports_without_executing() {
        let temp = tempdir().unwrap();
        let (hooks, sink) = executor(temp.path());
        let commands = vec!["touch created.txt".to_string()];

        hooks.run(HookPhase::PostUp, None, &commands, true).await.unwrap();

        assert!(!temp.path().join("created.txt").exists());
        assert!(matches!(
            sink.events().as_slice(),
            [Event::Hook { dry_run: true, .. }]
        ));
    }

    #[tokio::test]
    async fn test_empty_list_is_noop() {
        let temp = tempdir().unwrap();
        let (hooks, sink) = executor(temp.path());
        hooks.run(HookPhase::PreDown, None, &[], false).await.unwrap();
        assert!(sink.events().is_empty());
    }
}
