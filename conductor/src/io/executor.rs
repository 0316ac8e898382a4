//! Executor abstraction for agent dispatch.
//!
//! The [`Executor`] trait decouples the run engine from the tool-using runtime
//! that does the actual work. Tests use scripted executors that return
//! predetermined reports without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::context::RunContext;
use crate::core::profile::AgentProfile;
use crate::core::types::TokenUsage;
use crate::io::process::run_with_timeout;

/// Parameters for one executor dispatch.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub agent_name: String,
    pub prompt: String,
    pub profile: AgentProfile,
    pub context: RunContext,
    /// Where the executor was told to write the structured artifact.
    pub artifact_path: PathBuf,
}

/// What the executor reports back. Cost must never be truncated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecReport {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub turns: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ExecReport {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Abstraction over agent execution backends.
///
/// `Err` means the dispatch itself broke (spawn failure, unreadable report);
/// a run the executor completed but judged failed is `Ok` with
/// `success == false`. Implementations must be safe to call again for the
/// same request.
pub trait Executor: Send + Sync {
    fn execute(&self, request: &ExecRequest) -> Result<ExecReport>;
}

/// Settings for [`CommandExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandExecutorConfig {
    /// Program and leading arguments, e.g. `["agent-cli", "run", "--json"]`.
    pub command: Vec<String>,
    /// Used when the profile carries no `timeout_ms`.
    pub default_timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Executor that spawns an external CLI.
///
/// The prompt goes to stdin; profile and artifact location go through
/// `CONDUCTOR_*` environment variables; stdout must hold one JSON
/// [`ExecReport`].
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Result<Self> {
        if config.command.is_empty() || config.command[0].trim().is_empty() {
            return Err(anyhow!("executor command must be a non-empty array"));
        }
        Ok(Self { config })
    }

    fn timeout_for(&self, profile: &AgentProfile) -> Duration {
        profile
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_timeout)
    }

    fn build_command(&self, request: &ExecRequest) -> Command {
        let mut cmd = Command::new(&self.config.command[0]);
        cmd.args(&self.config.command[1..]);
        let profile = &request.profile;
        let tools = profile.tools.iter().cloned().collect::<Vec<_>>().join(",");
        cmd.env("CONDUCTOR_AGENT", &request.agent_name)
            .env("CONDUCTOR_MODEL", profile.model.as_str())
            .env("CONDUCTOR_MAX_TURNS", profile.max_turns.to_string())
            .env("CONDUCTOR_MAX_BUDGET_USD", profile.max_budget_usd.to_string())
            .env("CONDUCTOR_TEMPERATURE", profile.temperature.to_string())
            .env("CONDUCTOR_TOOLS", tools)
            .env("CONDUCTOR_MCP_SERVERS", profile.mcp_servers.join(","))
            .env("CONDUCTOR_ARTIFACT_PATH", &request.artifact_path)
            .env("CONDUCTOR_CORRELATION_ID", &request.context.correlation_id);
        cmd
    }
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(agent = %request.agent_name, correlation_id = %request.context.correlation_id))]
    fn execute(&self, request: &ExecRequest) -> Result<ExecReport> {
        if let Some(parent) = request.artifact_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create artifact dir {}", parent.display()))?;
        }

        let timeout = self.timeout_for(&request.profile);
        info!(program = %self.config.command[0], timeout_ms = timeout.as_millis() as u64, "starting executor");
        let output = run_with_timeout(
            self.build_command(request),
            Some(request.prompt.clone().into_bytes()),
            timeout,
            self.config.output_limit_bytes,
        )
        .context("run executor command")?;

        if output.timed_out {
            warn!(timeout_ms = timeout.as_millis() as u64, "executor timed out");
            return Ok(ExecReport::failed(format!(
                "executor timeout after {}ms",
                timeout.as_millis()
            )));
        }

        let stdout = output.stdout_text();
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "executor exited with failure");
            // A failing CLI may still have reported partial usage.
            if let Ok(mut report) = parse_report(&stdout) {
                report.success = false;
                if report.error.is_none() {
                    report.error = Some(exit_message(&output));
                }
                return Ok(report);
            }
            return Ok(ExecReport::failed(exit_message(&output)));
        }

        let report = parse_report(&stdout)?;
        debug!(success = report.success, cost_usd = report.cost_usd, turns = report.turns, "executor report parsed");
        Ok(report)
    }
}

fn exit_message(output: &crate::io::process::CapturedOutput) -> String {
    let stderr = output.stderr_tail(2_000);
    if stderr.is_empty() {
        format!("executor exited with status {:?}", output.status.code())
    } else {
        format!(
            "executor exited with status {:?}: {stderr}",
            output.status.code()
        )
    }
}

/// Parse the executor report from stdout. The report is the last non-empty
/// line, so CLIs may log progress lines before it.
fn parse_report(stdout: &str) -> Result<ExecReport> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("executor produced no report on stdout"))?;
    serde_json::from_str(line).context("parse executor report")
}
