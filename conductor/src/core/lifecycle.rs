//! Strictly forward run phases for the agent run engine.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Created,
    Validating,
    Prompting,
    Executing,
    Parsing,
    Recorded,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Created => "created",
            RunPhase::Validating => "validating",
            RunPhase::Prompting => "prompting",
            RunPhase::Executing => "executing",
            RunPhase::Parsing => "parsing",
            RunPhase::Recorded => "recorded",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal run phase transition {from} -> {to}")]
pub struct PhaseError {
    pub from: RunPhase,
    pub to: RunPhase,
}

/// Phase recorder for one run.
///
/// Phases may be skipped (a failed validation goes straight to `Recorded`)
/// but never revisited, and `Recorded` is reached at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    history: Vec<RunPhase>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            history: vec![RunPhase::Created],
        }
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> RunPhase {
        *self.history.last().unwrap_or(&RunPhase::Created)
    }

    pub fn history(&self) -> &[RunPhase] {
        &self.history
    }

    pub fn is_recorded(&self) -> bool {
        self.phase() == RunPhase::Recorded
    }

    pub fn advance(&mut self, to: RunPhase) -> Result<(), PhaseError> {
        let from = self.phase();
        if to <= from {
            return Err(PhaseError { from, to });
        }
        self.history.push(to);
        Ok(())
    }
}
