//! Agent run engine.
//!
//! An [`Agent`] supplies the three per-kind capabilities (input validation,
//! prompt construction, output parsing). [`AgentRunner`] owns everything else
//! about a run: the session, the phase sequence, executor dispatch, cap
//! enforcement, metadata, and error classification.
//!
//! A run never retries on its own. `AgentError::retryable` tells the caller
//! whether re-invoking is worth it.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::core::context::{RunContext, new_correlation_id};
use crate::core::lifecycle::{Lifecycle, RunPhase};
use crate::core::profile::{AgentProfile, CostEstimate, ModelTier, ProfileOverride, resolve_profile};
use crate::core::retry::{KeywordRetryPolicy, RetryPolicy};
use crate::core::types::{AgentError, AgentResult, ErrorKind, ExecutionMetadata, Failure};
use crate::io::executor::{ExecReport, ExecRequest, Executor};
use crate::io::session::{SessionEnd, SessionRecorder, SessionStart, payload_value};
use crate::io::store::ArtifactStore;

/// What `build_prompt` may look at besides the input.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub run: &'a RunContext,
    /// Where the executor must write the structured artifact.
    pub artifact_path: &'a Path,
}

/// What `parse_output` may look at besides the input.
#[derive(Clone, Copy)]
pub struct ParseContext<'a> {
    pub run: &'a RunContext,
    pub store: &'a dyn ArtifactStore,
    pub artifact_key: &'a str,
    /// Free-form text the executor returned alongside its report.
    pub raw_output: Option<&'a str>,
}

/// Per-kind capabilities of an agent.
pub trait Agent: Send + Sync {
    type Input: Serialize + Send + Sync;
    type Output: Serialize + Send;

    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn description(&self) -> &str;
    fn default_profile(&self) -> AgentProfile;

    /// Structural checks. Runs before anything that can cost money.
    fn validate_input(&self, input: &Self::Input) -> Result<(), Vec<String>>;

    /// Must be a pure function of its arguments.
    fn build_prompt(&self, input: &Self::Input, ctx: &PromptContext<'_>) -> anyhow::Result<String>;

    /// Load the executor's artifact. A missing artifact should degrade to a
    /// fallback output; only an unusable present artifact is an error.
    fn parse_output(
        &self,
        input: &Self::Input,
        ctx: &ParseContext<'_>,
    ) -> Result<Self::Output, AgentError>;

    fn retry_policy(&self) -> Box<dyn RetryPolicy> {
        Box::new(KeywordRetryPolicy::default())
    }
}

/// External collaborators a run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub executor: Arc<dyn Executor>,
    pub store: Arc<dyn ArtifactStore>,
    pub sessions: Arc<dyn SessionRecorder>,
}

/// Static description of an agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub tools: Vec<String>,
    pub model: ModelTier,
    pub cost_estimate: CostEstimate,
}

/// Runs one agent kind with a fixed profile.
pub struct AgentRunner<A: Agent> {
    agent: A,
    profile: AgentProfile,
    collaborators: Collaborators,
    retry_policy: Box<dyn RetryPolicy>,
}

/// How far a run got before it settled.
struct Settled<T> {
    outcome: Result<T, AgentError>,
    report: Option<ExecReport>,
}

impl<T> Settled<T> {
    fn early(err: AgentError) -> Self {
        Self {
            outcome: Err(err),
            report: None,
        }
    }
}

impl<A: Agent> AgentRunner<A> {
    pub fn new(agent: A, collaborators: Collaborators) -> Self {
        let profile = agent.default_profile();
        let retry_policy = agent.retry_policy();
        Self {
            agent,
            profile,
            collaborators,
            retry_policy,
        }
    }

    pub fn with_profile(mut self, profile: AgentProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_profile_override(mut self, over: &ProfileOverride) -> Self {
        self.profile = resolve_profile(&self.profile, over);
        self
    }

    pub fn with_retry_policy(mut self, policy: Box<dyn RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn agent(&self) -> &A {
        &self.agent
    }

    pub fn name(&self) -> &str {
        self.agent.name()
    }

    pub fn version(&self) -> &str {
        self.agent.version()
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn get_metadata(&self) -> AgentInfo {
        AgentInfo {
            name: self.agent.name().to_string(),
            version: self.agent.version().to_string(),
            description: self.agent.description().to_string(),
            tools: self.profile.tools.iter().cloned().collect(),
            model: self.profile.model,
            cost_estimate: self.profile.cost_estimate(),
        }
    }

    /// Run the full lifecycle once. Always returns a result with metadata;
    /// failures are carried in `outcome`, never panicked or thrown.
    pub fn run(&self, input: &A::Input, ctx: RunContext) -> AgentResult<A::Output> {
        let ctx = ctx.ensure_correlation_id();
        let span = info_span!(
            "agent.run",
            agent = %self.agent.name(),
            correlation_id = %ctx.correlation_id,
        );
        let _entered = span.enter();

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut lifecycle = Lifecycle::new();

        let start = SessionStart {
            agent_name: self.agent.name().to_string(),
            agent_version: self.agent.version().to_string(),
            correlation_id: ctx.correlation_id.clone(),
            session_id: ctx.session_id.clone(),
            input: payload_value("input", input),
        };
        let session_id = match self.collaborators.sessions.start_session(&start) {
            Ok(id) => id,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "session start failed, aborting run");
                let error = Failure::from(err.context("start observability session"))
                    .into_agent_error(self.retry_policy.as_ref());
                let error = AgentError {
                    kind: ErrorKind::Infra,
                    code: "session_start_failed".to_string(),
                    ..error
                };
                enter(&mut lifecycle, RunPhase::Recorded);
                return AgentResult {
                    outcome: Err(error),
                    metadata: self.metadata(&ctx, started_at, clock.elapsed(), None),
                };
            }
        };

        let Settled { outcome, report } = self.drive(input, &ctx, &mut lifecycle);
        let metadata = self.metadata(&ctx, started_at, clock.elapsed(), report.as_ref());
        let result = AgentResult { outcome, metadata };
        enter(&mut lifecycle, RunPhase::Recorded);

        match &result.outcome {
            Ok(_) => info!(
                event = "agent.run.finished",
                success = true,
                duration_ms = result.metadata.duration_ms,
                cost_usd = result.metadata.cost_usd,
                turns = result.metadata.turns,
            ),
            Err(err) => info!(
                event = "agent.run.finished",
                success = false,
                error_type = %err.kind,
                error_code = %err.code,
                retryable = err.retryable,
                duration_ms = result.metadata.duration_ms,
                cost_usd = result.metadata.cost_usd,
            ),
        }

        if let Err(err) = self
            .collaborators
            .sessions
            .end_session(&session_id, &SessionEnd::from_result(&result))
        {
            warn!(session_id = %session_id, err = %format!("{err:#}"), "session end failed");
        }
        result
    }

    fn drive(
        &self,
        input: &A::Input,
        ctx: &RunContext,
        lifecycle: &mut Lifecycle,
    ) -> Settled<A::Output> {
        let policy = self.retry_policy.as_ref();

        enter(lifecycle, RunPhase::Validating);
        if let Err(errors) = self.agent.validate_input(input) {
            debug!(errors = ?errors, "input rejected");
            return Settled::early(AgentError::validation(&errors));
        }

        enter(lifecycle, RunPhase::Prompting);
        let artifact_key = artifact_key(self.agent.name(), &ctx.correlation_id);
        let artifact_path = match self.collaborators.store.path(&artifact_key) {
            Ok(path) => path,
            Err(err) => return Settled::early(err.into_agent_error().classified(policy)),
        };
        let prompt_ctx = PromptContext {
            run: ctx,
            artifact_path: &artifact_path,
        };
        let prompt = match self.agent.build_prompt(input, &prompt_ctx) {
            Ok(prompt) => prompt,
            Err(err) => {
                return Settled::early(AgentError::execution(
                    "prompt_render_failed",
                    format!("{err:#}"),
                ));
            }
        };
        debug!(prompt_bytes = prompt.len(), artifact_key = %artifact_key, "prompt built");

        enter(lifecycle, RunPhase::Executing);
        let request = ExecRequest {
            agent_name: self.agent.name().to_string(),
            prompt,
            profile: self.profile.clone(),
            context: ctx.clone(),
            artifact_path,
        };
        let report = match self.collaborators.executor.execute(&request) {
            Ok(report) => report,
            Err(err) => {
                return Settled::early(
                    Failure::from(err.context("dispatch executor")).into_agent_error(policy),
                );
            }
        };
        if !report.success {
            let message = report
                .error
                .clone()
                .filter(|msg| !msg.trim().is_empty())
                .unwrap_or_else(|| "executor reported failure without a message".to_string());
            let error = AgentError::new(classify_executor_failure(&message), "executor_failed", message)
                .classified(policy);
            return Settled {
                outcome: Err(error),
                report: Some(report),
            };
        }
        if let Some(error) = check_profile_caps(&self.profile, &report) {
            return Settled {
                outcome: Err(error),
                report: Some(report),
            };
        }

        enter(lifecycle, RunPhase::Parsing);
        let parse_ctx = ParseContext {
            run: ctx,
            store: self.collaborators.store.as_ref(),
            artifact_key: &artifact_key,
            raw_output: report.output.as_deref(),
        };
        let outcome = self.agent.parse_output(input, &parse_ctx);
        Settled {
            outcome,
            report: Some(report),
        }
    }

    fn metadata(
        &self,
        ctx: &RunContext,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        report: Option<&ExecReport>,
    ) -> ExecutionMetadata {
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let completed_at = i64::try_from(duration_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|delta| started_at.checked_add_signed(delta))
            .unwrap_or(started_at);
        let model = report
            .and_then(|report| report.model.clone())
            .unwrap_or_else(|| self.profile.model.as_str().to_string());
        ExecutionMetadata {
            agent_name: self.agent.name().to_string(),
            agent_version: self.agent.version().to_string(),
            correlation_id: ctx.correlation_id.clone(),
            started_at,
            completed_at,
            duration_ms,
            cost_usd: report.map_or(0.0, |report| report.cost_usd),
            tokens: report.and_then(|report| report.tokens),
            tools_used: report.map(|report| report.tools_used.clone()).unwrap_or_default(),
            turns: report.map_or(0, |report| report.turns),
            model,
        }
    }
}

fn enter(lifecycle: &mut Lifecycle, phase: RunPhase) {
    match lifecycle.advance(phase) {
        Ok(()) => debug!(phase = %phase, "run phase"),
        Err(err) => warn!(err = %err, "run phase out of order"),
    }
}

/// Each run writes under its own key so concurrent runs sharing a correlation
/// id never collide.
fn artifact_key(agent_name: &str, correlation_id: &str) -> String {
    let correlation: String = correlation_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{agent_name}/{correlation}/{}.json", new_correlation_id())
}

/// Map an executor-reported failure message onto the error taxonomy.
pub fn classify_executor_failure(message: &str) -> ErrorKind {
    let message = message.to_lowercase();
    if message.contains("timeout") || message.contains("timed out") {
        ErrorKind::Timeout
    } else if ["rate limit", "overloaded", "529"]
        .iter()
        .any(|marker| message.contains(marker))
    {
        ErrorKind::Model
    } else {
        ErrorKind::Execution
    }
}

/// Compare reported usage with the profile caps. Only strict excess fails.
pub fn check_profile_caps(profile: &AgentProfile, report: &ExecReport) -> Option<AgentError> {
    if report.cost_usd > profile.max_budget_usd {
        return Some(AgentError::new(
            ErrorKind::Budget,
            "budget_exceeded",
            format!(
                "executor reported ${:.4} against max_budget_usd ${:.4}",
                report.cost_usd, profile.max_budget_usd
            ),
        ));
    }
    if report.turns > profile.max_turns {
        return Some(AgentError::new(
            ErrorKind::Turns,
            "turn_limit_exceeded",
            format!(
                "executor used {} turns against max_turns {}",
                report.turns, profile.max_turns
            ),
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_failures_are_classified_by_message() {
        assert_eq!(classify_executor_failure("Request TIMEOUT"), ErrorKind::Timeout);
        assert_eq!(classify_executor_failure("command timed out"), ErrorKind::Timeout);
        assert_eq!(classify_executor_failure("hit rate limit"), ErrorKind::Model);
        assert_eq!(classify_executor_failure("API Overloaded"), ErrorKind::Model);
        assert_eq!(classify_executor_failure("status 529"), ErrorKind::Model);
        assert_eq!(classify_executor_failure("tool crashed"), ErrorKind::Execution);
    }

    #[test]
    fn caps_flag_strict_excess_only() {
        let profile = AgentProfile {
            max_budget_usd: 1.0,
            max_turns: 4,
            ..AgentProfile::default()
        };
        let at_cap = ExecReport {
            success: true,
            cost_usd: 1.0,
            turns: 4,
            ..ExecReport::default()
        };
        assert_eq!(check_profile_caps(&profile, &at_cap), None);

        let over_budget = ExecReport {
            cost_usd: 1.5,
            ..at_cap.clone()
        };
        let err = check_profile_caps(&profile, &over_budget).expect("budget");
        assert_eq!(err.kind, ErrorKind::Budget);
        assert!(!err.retryable);

        let over_turns = ExecReport {
            turns: 5,
            ..at_cap
        };
        assert_eq!(
            check_profile_caps(&profile, &over_turns).expect("turns").kind,
            ErrorKind::Turns
        );
    }

    #[test]
    fn artifact_keys_are_unique_and_safe() {
        let a = artifact_key("research", "corr/../1");
        let b = artifact_key("research", "corr/../1");
        assert_ne!(a, b);
        assert!(a.starts_with("research/corr____1/"));
        assert!(a.ends_with(".json"));
    }
}
