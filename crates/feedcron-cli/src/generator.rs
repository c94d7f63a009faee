use std::time::Duration;

use async_trait::async_trait;
use feedcron_core::config::GeneratorConfig;
use feedcron_scheduler::generator::{FeedGenerator, StepReport, StepRequest};
use feedcron_scheduler::{Result, SchedulerError};
use tracing::debug;

/// Runs one generation step by spawning the configured command.
///
/// The command gets `FEEDCRON_TENANT` and `FEEDCRON_OFFSET` in its
/// environment and must print a JSON [`StepReport`] as the last line of
/// stdout. A non-zero exit, a timeout or an unparsable report fails the step.
pub struct CommandGenerator {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandGenerator {
    /// `None` when no generator command is configured.
    pub fn from_config(config: &GeneratorConfig) -> Option<Self> {
        let command = config.command.clone()?;
        Some(Self {
            command,
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl FeedGenerator for CommandGenerator {
    async fn run_step(&self, request: &StepRequest) -> Result<StepReport> {
        let run = tokio::process::Command::new(&self.command)
            .args(&self.args)
            .env("FEEDCRON_TENANT", request.tenant.as_str())
            .env("FEEDCRON_OFFSET", request.offset.to_string())
            .kill_on_drop(true)
            .output();

        let out = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => {
                return Err(SchedulerError::Generator(format!(
                    "'{}' timed out after {}s",
                    self.command,
                    self.timeout.as_secs()
                )))
            }
            Ok(Err(e)) => {
                return Err(SchedulerError::Generator(format!(
                    "failed to launch '{}': {e}",
                    self.command
                )))
            }
            Ok(Ok(out)) => out,
        };

        let stdout = String::from_utf8_lossy(&out.stdout);
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(SchedulerError::Generator(format!(
                "'{}' exited with {}: {}",
                self.command,
                out.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        debug!(tenant = %request.tenant, bytes = out.stdout.len(), "generator finished");
        parse_report(&stdout)
    }
}

fn parse_report(stdout: &str) -> Result<StepReport> {
    let line = stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| SchedulerError::Generator("generator printed no step report".into()))?;
    serde_json::from_str(line.trim())
        .map_err(|e| SchedulerError::Generator(format!("bad step report {line:?}: {e}")))
}
