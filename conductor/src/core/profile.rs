//! Execution profile for a single agent: model tier, caps, tools, retry advice.
//!
//! Profiles are immutable once resolved. Enforcement of the caps happens in the
//! run engine, not here.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Model capability tier requested from the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Balanced,
    Frontier,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Balanced => "balanced",
            ModelTier::Frontier => "frontier",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub model: ModelTier,
    pub max_turns: u32,
    pub max_budget_usd: f64,
    /// Capability names the executor may expose to the agent.
    pub tools: BTreeSet<String>,
    pub mcp_servers: Vec<String>,
    /// Advisory retry count for callers; the engine never retries itself.
    pub retries: u32,
    pub backoff_ms: u64,
    pub temperature: f32,
    /// Wall-clock limit enforced by the executor.
    pub timeout_ms: Option<u64>,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            model: ModelTier::Balanced,
            max_turns: 20,
            max_budget_usd: 1.0,
            tools: BTreeSet::new(),
            mcp_servers: Vec::new(),
            retries: 2,
            backoff_ms: 1_000,
            temperature: 0.2,
            timeout_ms: Some(10 * 60 * 1_000),
        }
    }
}

impl AgentProfile {
    pub fn cost_estimate(&self) -> CostEstimate {
        CostEstimate {
            min_usd: 0.0,
            max_usd: self.max_budget_usd,
            typical_usd: self.max_budget_usd * 0.5,
        }
    }
}

/// Caller-supplied partial profile. Unset fields fall back to the base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfileOverride {
    pub model: Option<ModelTier>,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub tools: Option<BTreeSet<String>>,
    pub mcp_servers: Option<Vec<String>>,
    pub retries: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub temperature: Option<f32>,
    pub timeout_ms: Option<u64>,
}

/// Shallow, field-level merge. Collections replace rather than union.
pub fn resolve_profile(base: &AgentProfile, over: &ProfileOverride) -> AgentProfile {
    AgentProfile {
        model: over.model.unwrap_or(base.model),
        max_turns: over.max_turns.unwrap_or(base.max_turns),
        max_budget_usd: over.max_budget_usd.unwrap_or(base.max_budget_usd),
        tools: over.tools.clone().unwrap_or_else(|| base.tools.clone()),
        mcp_servers: over
            .mcp_servers
            .clone()
            .unwrap_or_else(|| base.mcp_servers.clone()),
        retries: over.retries.unwrap_or(base.retries),
        backoff_ms: over.backoff_ms.unwrap_or(base.backoff_ms),
        temperature: over.temperature.unwrap_or(base.temperature),
        timeout_ms: over.timeout_ms.or(base.timeout_ms),
    }
}

/// Expected spend range for one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub min_usd: f64,
    pub max_usd: f64,
    pub typical_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn empty_override_keeps_base() {
        let base = AgentProfile {
            tools: tools(&["web_search"]),
            ..AgentProfile::default()
        };
        assert_eq!(resolve_profile(&base, &ProfileOverride::default()), base);
    }

    #[test]
    fn override_wins_key_by_key() {
        let base = AgentProfile::default();
        let over = ProfileOverride {
            model: Some(ModelTier::Frontier),
            max_budget_usd: Some(4.0),
            ..ProfileOverride::default()
        };
        let resolved = resolve_profile(&base, &over);
        assert_eq!(resolved.model, ModelTier::Frontier);
        assert_eq!(resolved.max_budget_usd, 4.0);
        assert_eq!(resolved.max_turns, base.max_turns);
        assert_eq!(resolved.temperature, base.temperature);
    }

    #[test]
    fn tools_and_servers_replace_instead_of_union() {
        let base = AgentProfile {
            tools: tools(&["web_search", "read_file"]),
            mcp_servers: vec!["search".to_string()],
            ..AgentProfile::default()
        };
        let over = ProfileOverride {
            tools: Some(tools(&["write_file"])),
            mcp_servers: Some(Vec::new()),
            ..ProfileOverride::default()
        };
        let resolved = resolve_profile(&base, &over);
        assert_eq!(resolved.tools, tools(&["write_file"]));
        assert!(resolved.mcp_servers.is_empty());
    }

    #[test]
    fn override_parses_from_partial_toml() {
        let over: ProfileOverride = toml::from_str("model = \"fast\"\nmax_turns = 5\n").expect("parse");
        assert_eq!(over.model, Some(ModelTier::Fast));
        assert_eq!(over.max_turns, Some(5));
        assert_eq!(over.tools, None);
    }

    #[test]
    fn cost_estimate_derives_from_budget() {
        let profile = AgentProfile {
            max_budget_usd: 3.0,
            ..AgentProfile::default()
        };
        let estimate = profile.cost_estimate();
        assert_eq!(estimate.min_usd, 0.0);
        assert_eq!(estimate.max_usd, 3.0);
        assert_eq!(estimate.typical_usd, 1.5);
    }
}
