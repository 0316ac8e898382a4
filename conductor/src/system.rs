//! System orchestrator: composes agent runs under aggregate limits.
//!
//! A [`SystemRun`] is the bookkeeping for one system-level run. Every child
//! call goes through it so that totals, the invocation audit trail, and limit
//! checks stay in one place. Limits are checked before each call (or chunk)
//! and again after it settles; a violation stops further calls but keeps the
//! trail gathered so far.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::agent::{Agent, AgentInfo, AgentRunner};
use crate::batch::{BatchRunner, duplicate_keys, run_chunk};
use crate::core::budget::{
    LimitViolation, SystemLimits, UsageTotals, check_after_call, check_before_call,
};
use crate::core::context::RunContext;
use crate::core::types::{
    AgentError, AgentInvocation, AgentResult, SystemError, SystemErrorKind, SystemMetadata,
    SystemResult,
};

/// A multi-agent pipeline exposed as one unit.
pub trait System: Send + Sync {
    type Input;
    type Output;

    fn run(&self, input: &Self::Input, ctx: RunContext) -> SystemResult<Self::Output>;

    fn get_info(&self) -> SystemInfo;
}

/// Static description of a system.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub agents: Vec<AgentInfo>,
    pub limits: SystemLimits,
}

/// Outcome of a batch of independent child calls.
#[derive(Debug)]
pub struct BatchOutcome<K, T> {
    /// One entry per unit that was attempted.
    pub results: BTreeMap<K, Result<T, AgentError>>,
    /// Units never attempted because a limit stopped the batch or the batch
    /// was rejected.
    pub skipped: Vec<K>,
    /// The limit violation or validation error that stopped the batch.
    pub stopped: Option<SystemError>,
}

/// Running state of one system run.
#[derive(Debug)]
pub struct SystemRun {
    name: String,
    version: String,
    limits: SystemLimits,
    ctx: RunContext,
    started_at: DateTime<Utc>,
    clock: Instant,
    totals: UsageTotals,
    invocations: Vec<AgentInvocation>,
}

impl SystemRun {
    /// Limits carried on `ctx` take precedence over `limits`.
    pub fn start(
        name: impl Into<String>,
        version: impl Into<String>,
        limits: SystemLimits,
        ctx: RunContext,
    ) -> Self {
        let ctx = ctx.ensure_correlation_id();
        let limits = ctx.limits.clone().unwrap_or(limits);
        let name = name.into();
        info!(
            event = "system.run.started",
            system = %name,
            correlation_id = %ctx.correlation_id,
        );
        Self {
            name,
            version: version.into(),
            limits,
            ctx,
            started_at: Utc::now(),
            clock: Instant::now(),
            totals: UsageTotals::default(),
            invocations: Vec::new(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn limits(&self) -> &SystemLimits {
        &self.limits
    }

    pub fn totals(&self) -> UsageTotals {
        UsageTotals {
            duration_ms: self.elapsed_ms(),
            ..self.totals
        }
    }

    pub fn invocations(&self) -> &[AgentInvocation] {
        &self.invocations
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.clock.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn child_context(&self, role: &str) -> RunContext {
        let span = format!("{}:{role}", self.name);
        self.ctx.child(&self.name, Some(&span))
    }

    fn record(&mut self, role: &str, invocation: AgentInvocation, turns: u32) {
        self.totals.cost_usd += invocation.cost_usd;
        self.totals.turns = self.totals.turns.saturating_add(turns);
        self.totals.agent_calls = self.totals.agent_calls.saturating_add(1);
        info!(
            event = "system.agent_invoked",
            system = %self.name,
            role = %role,
            agent = %invocation.name,
            success = invocation.success,
            cost_usd = invocation.cost_usd,
            total_cost_usd = self.totals.cost_usd,
        );
        self.invocations.push(invocation);
    }

    fn record_result<T>(&mut self, role: &str, result: &AgentResult<T>) {
        let invocation = AgentInvocation::from_metadata(role, &result.metadata, result.is_success());
        self.record(role, invocation, result.metadata.turns);
    }

    fn limit_error(&self, violation: &LimitViolation) -> SystemError {
        warn!(system = %self.name, violation = %violation, "system limit hit");
        SystemError::new(
            SystemErrorKind::Budget,
            "system_budget_exceeded",
            format!("system '{}' stopped: {violation}", self.name),
        )
    }

    fn before_call(&self) -> Result<(), SystemError> {
        match check_before_call(&self.limits, &self.totals()) {
            Some(violation) => Err(self.limit_error(&violation)),
            None => Ok(()),
        }
    }

    fn after_call(&self) -> Result<(), SystemError> {
        match check_after_call(&self.limits, &self.totals()) {
            Some(violation) => Err(self.limit_error(&violation)),
            None => Ok(()),
        }
    }

    /// Run one child agent. The invocation is recorded whether it succeeds or
    /// not; a failed child becomes a `SystemErrorKind::Agent` error.
    pub fn invoke<A: Agent>(
        &mut self,
        runner: &AgentRunner<A>,
        role: &str,
        input: &A::Input,
    ) -> Result<A::Output, SystemError> {
        self.before_call()?;
        let result = runner.run(input, self.child_context(role));
        self.record_result(role, &result);
        let output = result
            .outcome
            .map_err(|err| SystemError::agent(runner.name(), err))?;
        self.after_call()?;
        Ok(output)
    }

    /// Run independent child calls with at most `width` in flight.
    ///
    /// Limits are checked before and after each chunk; the agent-call cap also
    /// shrinks a chunk that would overshoot it. Within a chunk, invocations are
    /// recorded in submission order. A batch with repeated keys is rejected
    /// before any unit runs.
    pub fn invoke_batch<A, K>(
        &mut self,
        runner: &AgentRunner<A>,
        role: &str,
        units: Vec<(K, A::Input)>,
        width: usize,
    ) -> BatchOutcome<K, A::Output>
    where
        A: Agent,
        K: Ord + Clone + Send + Sync,
    {
        let repeated = duplicate_keys(units.iter().map(|(key, _)| key));
        if !repeated.is_empty() {
            warn!(system = %self.name, repeated = repeated.len(), "batch has repeated keys");
            return BatchOutcome {
                results: BTreeMap::new(),
                skipped: units.into_iter().map(|(key, _)| key).collect(),
                stopped: Some(SystemError::validation(&[format!(
                    "{} batch key(s) appear more than once",
                    repeated.len()
                )])),
            };
        }

        let batch = BatchRunner::new(width);
        let ctx = self.child_context(role);
        let indices: Vec<usize> = (0..units.len()).collect();
        let mut results = BTreeMap::new();
        let mut next = 0;
        let mut stopped = None;

        while next < indices.len() {
            if let Err(err) = self.before_call() {
                stopped = Some(err);
                break;
            }
            let mut end = (next + batch.width()).min(indices.len());
            if let Some(max) = self.limits.max_agent_calls {
                let remaining = usize::try_from(max.saturating_sub(self.totals.agent_calls))
                    .unwrap_or(usize::MAX);
                end = end.min(next + remaining);
            }
            let chunk = &indices[next..end];
            let work = |idx: &usize| runner.run(&units[*idx].1, ctx.clone());
            for (idx, outcome) in run_chunk(chunk, &work) {
                let key = units[idx].0.clone();
                match outcome {
                    Ok(result) => {
                        self.record_result(role, &result);
                        results.insert(key, result.outcome);
                    }
                    Err(err) => {
                        let invocation = AgentInvocation {
                            name: runner.name().to_string(),
                            version: runner.version().to_string(),
                            role: role.to_string(),
                            duration_ms: 0,
                            cost_usd: 0.0,
                            success: false,
                        };
                        self.record(role, invocation, 0);
                        results.insert(key, Err(err));
                    }
                }
            }
            next = end;
            if let Err(err) = self.after_call() {
                stopped = Some(err);
                break;
            }
        }

        let skipped: Vec<K> = units[next..].iter().map(|(key, _)| key.clone()).collect();
        if !skipped.is_empty() {
            warn!(system = %self.name, skipped = skipped.len(), "batch stopped early");
        }
        BatchOutcome {
            results,
            skipped,
            stopped,
        }
    }

    /// Close the run and attach the audit trail, on success or failure.
    pub fn finish<T>(self, outcome: Result<T, SystemError>) -> SystemResult<T> {
        let duration_ms = self.elapsed_ms();
        let completed_at = i64::try_from(duration_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|delta| self.started_at.checked_add_signed(delta))
            .unwrap_or(self.started_at);
        let metadata = SystemMetadata {
            system_name: self.name,
            system_version: self.version,
            correlation_id: self.ctx.correlation_id,
            started_at: self.started_at,
            completed_at,
            duration_ms,
            cost_usd: self.totals.cost_usd,
            turns: self.totals.turns,
        };
        info!(
            event = "system.run.finished",
            system = %metadata.system_name,
            success = outcome.is_ok(),
            agent_calls = self.totals.agent_calls,
            cost_usd = metadata.cost_usd,
            duration_ms,
        );
        SystemResult {
            outcome,
            metadata,
            agents_used: self.invocations,
            agent_call_count: self.totals.agent_calls,
        }
    }
}
