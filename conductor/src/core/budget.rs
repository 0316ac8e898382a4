//! System-level resource limits and the checks run around each child call.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggregate caps for one system run. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SystemLimits {
    pub max_cost_usd: Option<f64>,
    pub max_duration_ms: Option<u64>,
    pub max_turns: Option<u32>,
    pub max_agent_calls: Option<u32>,
}

impl SystemLimits {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(cost) = self.max_cost_usd
            && !(cost.is_finite() && cost > 0.0)
        {
            return Err(format!("max_cost_usd must be > 0 (got {cost})"));
        }
        if self.max_agent_calls == Some(0) {
            return Err("max_agent_calls must be > 0".to_string());
        }
        if self.max_turns == Some(0) {
            return Err("max_turns must be > 0".to_string());
        }
        Ok(())
    }
}

/// Running totals for a system run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub turns: u32,
    pub agent_calls: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Cost,
    Duration,
    Turns,
    AgentCalls,
}

/// A limit that has been reached or exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitViolation {
    pub limit: LimitKind,
    pub observed: f64,
    pub max: f64,
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.limit {
            LimitKind::Cost => write!(
                f,
                "cost ${:.2} exceeds max_cost_usd ${:.2}",
                self.observed, self.max
            ),
            LimitKind::Duration => write!(
                f,
                "duration {}ms exceeds max_duration_ms {}ms",
                self.observed, self.max
            ),
            LimitKind::Turns => write!(
                f,
                "turns {} exceeds max_turns {}",
                self.observed, self.max
            ),
            LimitKind::AgentCalls => write!(
                f,
                "agent calls {} reached max_agent_calls {}",
                self.observed, self.max
            ),
        }
    }
}

/// Check before dispatching another child call.
///
/// A limit that is already reached blocks the call: there is no headroom left
/// for the next child to spend.
pub fn check_before_call(limits: &SystemLimits, totals: &UsageTotals) -> Option<LimitViolation> {
    if let Some(max) = limits.max_agent_calls
        && totals.agent_calls >= max
    {
        return Some(LimitViolation {
            limit: LimitKind::AgentCalls,
            observed: f64::from(totals.agent_calls),
            max: f64::from(max),
        });
    }
    if let Some(max) = limits.max_cost_usd
        && totals.cost_usd >= max
    {
        return Some(LimitViolation {
            limit: LimitKind::Cost,
            observed: totals.cost_usd,
            max,
        });
    }
    if let Some(max) = limits.max_duration_ms
        && totals.duration_ms >= max
    {
        return Some(duration_violation(totals.duration_ms, max));
    }
    if let Some(max) = limits.max_turns
        && totals.turns >= max
    {
        return Some(LimitViolation {
            limit: LimitKind::Turns,
            observed: f64::from(totals.turns),
            max: f64::from(max),
        });
    }
    None
}

/// Check after a child call has been recorded. Only strict excess counts.
pub fn check_after_call(limits: &SystemLimits, totals: &UsageTotals) -> Option<LimitViolation> {
    if let Some(max) = limits.max_cost_usd
        && totals.cost_usd > max
    {
        return Some(LimitViolation {
            limit: LimitKind::Cost,
            observed: totals.cost_usd,
            max,
        });
    }
    if let Some(max) = limits.max_duration_ms
        && totals.duration_ms > max
    {
        return Some(duration_violation(totals.duration_ms, max));
    }
    if let Some(max) = limits.max_turns
        && totals.turns > max
    {
        return Some(LimitViolation {
            limit: LimitKind::Turns,
            observed: f64::from(totals.turns),
            max: f64::from(max),
        });
    }
    None
}

fn duration_violation(observed: u64, max: u64) -> LimitViolation {
    LimitViolation {
        limit: LimitKind::Duration,
        observed: observed as f64,
        max: max as f64,
    }
}
