//! Conductor configuration stored in `conductor.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::budget::SystemLimits;
use crate::core::profile::{AgentProfile, ProfileOverride, resolve_profile};
use crate::io::executor::CommandExecutorConfig;

pub const DEFAULT_CONFIG_PATH: &str = "conductor.toml";

/// Conductor configuration (TOML).
///
/// Meant to be edited by humans. Every table is optional; missing fields take
/// the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Applied to every agent, on top of the agent's built-in profile.
    pub profile: ProfileOverride,

    /// Per-agent overrides keyed by agent name; win over `profile`.
    pub agents: BTreeMap<String, ProfileOverride>,

    /// Aggregate limits for system runs.
    pub system: SystemLimits,

    pub batch: BatchConfig,
    pub store: StoreConfig,
    pub sessions: SessionsConfig,
    pub executor: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of independent units run at once.
    pub concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for executor artifacts.
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".conductor/artifacts"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionsConfig {
    /// Append session records here as JSON lines when set.
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Program and leading arguments for the agent CLI.
    pub command: Vec<String>,

    /// Wall-clock cap used when a profile sets no `timeout_ms`.
    pub timeout_secs: u64,

    /// Keep at most this many bytes of executor stdout/stderr.
    pub output_limit_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: vec!["agent-exec".to_string(), "--report-json".to_string()],
            timeout_secs: 10 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl ExecutorConfig {
    pub fn to_command_config(&self) -> CommandExecutorConfig {
        CommandExecutorConfig {
            command: self.command.clone(),
            default_timeout: Duration::from_secs(self.timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch.concurrency == 0 {
            return Err(anyhow!("batch.concurrency must be > 0"));
        }
        if self.executor.command.is_empty() || self.executor.command[0].trim().is_empty() {
            return Err(anyhow!("executor.command must be a non-empty array"));
        }
        if self.executor.timeout_secs == 0 {
            return Err(anyhow!("executor.timeout_secs must be > 0"));
        }
        if self.executor.output_limit_bytes == 0 {
            return Err(anyhow!("executor.output_limit_bytes must be > 0"));
        }
        self.system
            .validate()
            .map_err(|msg| anyhow!("system.{msg}"))?;
        validate_override("profile", &self.profile)?;
        for (name, over) in &self.agents {
            validate_override(&format!("agents.{name}"), over)?;
        }
        Ok(())
    }

    /// Resolve the effective profile for `agent_name`: built-in default, then
    /// `[profile]`, then `[agents.<name>]`.
    pub fn profile_for(&self, agent_name: &str, agent_default: &AgentProfile) -> AgentProfile {
        let global = resolve_profile(agent_default, &self.profile);
        match self.agents.get(agent_name) {
            Some(over) => resolve_profile(&global, over),
            None => global,
        }
    }
}

fn validate_override(table: &str, over: &ProfileOverride) -> Result<()> {
    if let Some(budget) = over.max_budget_usd
        && !(budget.is_finite() && budget > 0.0)
    {
        return Err(anyhow!("{table}.max_budget_usd must be > 0 (got {budget})"));
    }
    if over.max_turns == Some(0) {
        return Err(anyhow!("{table}.max_turns must be > 0"));
    }
    if over.timeout_ms == Some(0) {
        return Err(anyhow!("{table}.timeout_ms must be > 0"));
    }
    if let Some(temperature) = over.temperature
        && !(0.0..=2.0).contains(&temperature)
    {
        return Err(anyhow!(
            "{table}.temperature must be within 0.0..=2.0 (got {temperature})"
        ));
    }
    Ok(())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::profile::ModelTier;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ConductorConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/conductor.toml");
        let mut cfg = ConductorConfig::default();
        cfg.system.max_cost_usd = Some(3.0);
        cfg.agents.insert(
            "research".to_string(),
            ProfileOverride {
                model: Some(ModelTier::Frontier),
                ..ProfileOverride::default()
            },
        );
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn parses_partial_tables() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("conductor.toml");
        fs::write(
            &path,
            r#"
[profile]
max_budget_usd = 2.5

[agents.research]
model = "fast"
tools = ["web_search"]

[system]
max_cost_usd = 3.0
max_agent_calls = 6

[batch]
concurrency = 2

[executor]
command = ["my-agent", "run"]
"#,
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.batch.concurrency, 2);
        assert_eq!(cfg.system.max_agent_calls, Some(6));
        assert_eq!(cfg.executor.command, vec!["my-agent", "run"]);
        assert_eq!(cfg.executor.timeout_secs, 600);
        assert_eq!(cfg.store, StoreConfig::default());
    }

    #[test]
    fn profile_for_layers_global_then_agent_overrides() {
        let mut cfg = ConductorConfig::default();
        cfg.profile.max_budget_usd = Some(2.5);
        cfg.profile.model = Some(ModelTier::Fast);
        cfg.agents.insert(
            "research".to_string(),
            ProfileOverride {
                model: Some(ModelTier::Frontier),
                ..ProfileOverride::default()
            },
        );
        let base = AgentProfile::default();

        let research = cfg.profile_for("research", &base);
        assert_eq!(research.model, ModelTier::Frontier);
        assert_eq!(research.max_budget_usd, 2.5);

        let filter = cfg.profile_for("report-filter", &base);
        assert_eq!(filter.model, ModelTier::Fast);
        assert_eq!(filter.max_turns, base.max_turns);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = ConductorConfig::default();
        cfg.batch.concurrency = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ConductorConfig::default();
        cfg.executor.command = vec![" ".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = ConductorConfig::default();
        cfg.agents.insert(
            "research".to_string(),
            ProfileOverride {
                max_turns: Some(0),
                ..ProfileOverride::default()
            },
        );
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("agents.research.max_turns"));

        let mut cfg = ConductorConfig::default();
        cfg.system.max_cost_usd = Some(-1.0);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().starts_with("system.max_cost_usd"));
    }

    #[test]
    fn unknown_profile_keys_are_rejected() {
        let err = toml::from_str::<ConductorConfig>("[profile]\nmodle = \"fast\"\n").unwrap_err();
        assert!(err.to_string().contains("modle"));
    }
}
