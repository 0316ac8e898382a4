//! Shared result, error, and audit types for agent and system runs.
//!
//! Everything here is plain data: created once per run, never mutated after it
//! is handed to a caller or to the observability collaborator.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

/// Flat agent-level error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Execution,
    Model,
    Timeout,
    Budget,
    Turns,
    Infra,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Execution => "execution",
            ErrorKind::Model => "model",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Budget => "budget",
            ErrorKind::Turns => "turns",
            ErrorKind::Infra => "infra",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed failure produced by an agent run.
///
/// `retryable` is advisory: nothing inside this crate retries automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} error ({code}): {message}")]
pub struct AgentError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl AgentError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            retryable: false,
            retry_hint: None,
            cause: None,
        }
    }

    /// Input rejected before any cost-incurring work. Never retryable.
    pub fn validation(errors: &[String]) -> Self {
        Self::new(
            ErrorKind::Validation,
            "invalid_input",
            format!("input validation failed: {}", errors.join("; ")),
        )
    }

    pub fn infra(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Infra, code, message)
    }

    pub fn execution(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, code, message)
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.retry_hint = Some(hint.into());
        self
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Re-derive `retryable` from the message using `policy`.
    pub fn classified(mut self, policy: &dyn RetryPolicy) -> Self {
        self.retryable = policy.is_retryable(&self.message);
        if self.retryable && self.retry_hint.is_none() {
            self.retry_hint = policy.retry_hint(self.kind);
        }
        self
    }
}

/// Error value at the boundary where collaborator errors enter the engine.
///
/// Typed errors pass through untouched; opaque ones are normalized exactly once
/// by [`Failure::into_agent_error`].
#[derive(Debug)]
pub enum Failure {
    Typed(AgentError),
    Opaque(anyhow::Error),
}

impl Failure {
    pub fn into_agent_error(self, policy: &dyn RetryPolicy) -> AgentError {
        match self {
            Failure::Typed(err) => err,
            Failure::Opaque(err) => {
                let message = format!("{err:#}");
                let cause = err.root_cause().to_string();
                let mut normalized =
                    AgentError::new(ErrorKind::Unknown, "unknown", message).classified(policy);
                if cause != normalized.message {
                    normalized.cause = Some(cause);
                }
                normalized
            }
        }
    }
}

impl From<AgentError> for Failure {
    fn from(err: AgentError) -> Self {
        Failure::Typed(err)
    }
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Opaque(err)
    }
}

/// Token counts as reported by the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

/// Timing and usage record produced exactly once per agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub agent_name: String,
    pub agent_version: String,
    pub correlation_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    pub tools_used: Vec<String>,
    pub turns: u32,
    pub model: String,
}

/// Outcome of one agent run: either an output or an error, plus metadata.
#[derive(Debug, Clone)]
pub struct AgentResult<T> {
    pub outcome: Result<T, AgentError>,
    pub metadata: ExecutionMetadata,
}

impl<T> AgentResult<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn output(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&AgentError> {
        self.outcome.as_ref().err()
    }
}

impl<T: Serialize> Serialize for AgentResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a, T> {
            success: bool,
            output: Option<&'a T>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a AgentError>,
            metadata: &'a ExecutionMetadata,
        }

        Wire {
            success: self.is_success(),
            output: self.output(),
            error: self.error(),
            metadata: &self.metadata,
        }
        .serialize(serializer)
    }
}

/// Audit record appended once per child agent call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInvocation {
    pub name: String,
    pub version: String,
    pub role: String,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub success: bool,
}

impl AgentInvocation {
    pub fn from_metadata(role: &str, metadata: &ExecutionMetadata, success: bool) -> Self {
        Self {
            name: metadata.agent_name.clone(),
            version: metadata.agent_version.clone(),
            role: role.to_string(),
            duration_ms: metadata.duration_ms,
            cost_usd: metadata.cost_usd,
            success,
        }
    }
}

/// System-level error taxonomy: the agent kinds plus `Agent`, which marks a
/// failed child run as distinct from the system's own failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemErrorKind {
    Validation,
    Execution,
    Model,
    Timeout,
    Budget,
    Turns,
    Infra,
    Unknown,
    Agent,
}

impl SystemErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SystemErrorKind::Validation => "validation",
            SystemErrorKind::Execution => "execution",
            SystemErrorKind::Model => "model",
            SystemErrorKind::Timeout => "timeout",
            SystemErrorKind::Budget => "budget",
            SystemErrorKind::Turns => "turns",
            SystemErrorKind::Infra => "infra",
            SystemErrorKind::Unknown => "unknown",
            SystemErrorKind::Agent => "agent",
        }
    }
}

impl fmt::Display for SystemErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} error ({code}): {message}")]
pub struct SystemError {
    #[serde(rename = "type")]
    pub kind: SystemErrorKind,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    /// Name of the child agent that failed, for `kind == Agent`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_error: Option<AgentError>,
}

impl SystemError {
    pub fn new(kind: SystemErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            retryable: false,
            agent: None,
            agent_error: None,
        }
    }

    pub fn validation(errors: &[String]) -> Self {
        Self::new(
            SystemErrorKind::Validation,
            "invalid_input",
            format!("input validation failed: {}", errors.join("; ")),
        )
    }

    /// Wrap a child agent failure; retryability is inherited from the child.
    pub fn agent(agent_name: &str, err: AgentError) -> Self {
        Self {
            kind: SystemErrorKind::Agent,
            code: "agent_failed".to_string(),
            message: format!("agent '{agent_name}' failed: {}", err.message),
            retryable: err.retryable,
            agent: Some(agent_name.to_string()),
            agent_error: Some(err),
        }
    }
}

/// Timing and aggregate usage for a system run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetadata {
    pub system_name: String,
    pub system_version: String,
    pub correlation_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub turns: u32,
}

/// Outcome of a multi-agent system run with its invocation audit trail.
///
/// `agents_used` is kept on both success and failure paths.
#[derive(Debug, Clone)]
pub struct SystemResult<T> {
    pub outcome: Result<T, SystemError>,
    pub metadata: SystemMetadata,
    pub agents_used: Vec<AgentInvocation>,
    pub agent_call_count: u32,
}

impl<T> SystemResult<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn output(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&SystemError> {
        self.outcome.as_ref().err()
    }
}

impl<T: Serialize> Serialize for SystemResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a, T> {
            success: bool,
            output: Option<&'a T>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a SystemError>,
            metadata: &'a SystemMetadata,
            agents_used: &'a [AgentInvocation],
            agent_call_count: u32,
        }

        Wire {
            success: self.is_success(),
            output: self.output(),
            error: self.error(),
            metadata: &self.metadata,
            agents_used: &self.agents_used,
            agent_call_count: self.agent_call_count,
        }
        .serialize(serializer)
    }
}
