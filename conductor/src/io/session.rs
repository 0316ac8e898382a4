//! Observability sessions: one start and one end per agent run.
//!
//! The engine talks to a [`SessionRecorder`]. [`SessionDispatcher`] is the
//! standard recorder; it fans each call out to the handlers it was built with.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::core::context::new_correlation_id;
use crate::core::types::{AgentError, AgentResult, ExecutionMetadata};

/// Payload for opening a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStart {
    pub agent_name: String,
    pub agent_version: String,
    pub correlation_id: String,
    /// Caller-chosen session id; generated when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub input: Value,
}

/// Terminal outcome reported when a session closes.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEnd {
    pub success: bool,
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
    pub metadata: ExecutionMetadata,
}

impl SessionEnd {
    pub fn from_result<T: Serialize>(result: &AgentResult<T>) -> Self {
        Self {
            success: result.is_success(),
            output: result.output().map(|output| payload_value("output", output)),
            error: result.error().cloned(),
            metadata: result.metadata.clone(),
        }
    }

    /// Failure end for a session whose start never completed.
    pub fn aborted(start: &SessionStart, message: &str) -> Self {
        let now = Utc::now();
        Self {
            success: false,
            output: None,
            error: Some(AgentError::infra("session_start_failed", message)),
            metadata: ExecutionMetadata {
                agent_name: start.agent_name.clone(),
                agent_version: start.agent_version.clone(),
                correlation_id: start.correlation_id.clone(),
                started_at: now,
                completed_at: now,
                duration_ms: 0,
                cost_usd: 0.0,
                tokens: None,
                tools_used: Vec::new(),
                turns: 0,
                model: String::new(),
            },
        }
    }
}

/// Session payloads are best effort: a value that cannot be serialized is
/// recorded as null.
pub fn payload_value<T: Serialize + ?Sized>(field: &str, value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(value) => value,
        Err(err) => {
            warn!(field, err = %err, "session payload not serializable; recording null");
            Value::Null
        }
    }
}

/// The session contract the run engine depends on.
pub trait SessionRecorder: Send + Sync {
    /// Returns the session id. An error aborts the run.
    fn start_session(&self, start: &SessionStart) -> Result<String>;

    fn end_session(&self, session_id: &str, end: &SessionEnd) -> Result<()>;
}

/// A sink notified of every session start and end.
pub trait SessionHandler: Send + Sync {
    fn name(&self) -> &str;

    fn on_start(&self, session_id: &str, start: &SessionStart) -> Result<()>;

    fn on_end(&self, session_id: &str, end: &SessionEnd) -> Result<()>;
}

/// Recorder that fans out to an owned list of handlers.
#[derive(Default)]
pub struct SessionDispatcher {
    handlers: Vec<Box<dyn SessionHandler>>,
}

impl SessionDispatcher {
    pub fn new(handlers: Vec<Box<dyn SessionHandler>>) -> Self {
        Self { handlers }
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }
}

impl SessionRecorder for SessionDispatcher {
    fn start_session(&self, start: &SessionStart) -> Result<String> {
        let session_id = start
            .session_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_correlation_id);
        for (idx, handler) in self.handlers.iter().enumerate() {
            if let Err(err) = handler.on_start(&session_id, start) {
                let err = err.context(format!("session handler {} failed on start", handler.name()));
                let end = SessionEnd::aborted(start, &format!("{err:#}"));
                for started in &self.handlers[..idx] {
                    if let Err(close_err) = started.on_end(&session_id, &end) {
                        warn!(
                            handler = started.name(),
                            err = %close_err,
                            "session handler failed to close aborted session"
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(session_id)
    }

    /// Every handler sees the end even if an earlier one fails; the first
    /// failure is returned.
    fn end_session(&self, session_id: &str, end: &SessionEnd) -> Result<()> {
        let mut first_err = None;
        for handler in &self.handlers {
            if let Err(err) = handler.on_end(session_id, end) {
                warn!(handler = handler.name(), err = %err, "session handler failed on end");
                if first_err.is_none() {
                    first_err = Some(
                        err.context(format!("session handler {} failed on end", handler.name())),
                    );
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Emits `session.started` / `session.ended` tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSessionHandler;

impl SessionHandler for TracingSessionHandler {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_start(&self, session_id: &str, start: &SessionStart) -> Result<()> {
        info!(
            event = "session.started",
            session_id = %session_id,
            agent_name = %start.agent_name,
            agent_version = %start.agent_version,
            correlation_id = %start.correlation_id,
        );
        Ok(())
    }

    fn on_end(&self, session_id: &str, end: &SessionEnd) -> Result<()> {
        let error_code = end.error.as_ref().map(|err| err.code.as_str());
        info!(
            event = "session.ended",
            session_id = %session_id,
            success = end.success,
            error_code = error_code,
            duration_ms = end.metadata.duration_ms,
            cost_usd = end.metadata.cost_usd,
            turns = end.metadata.turns,
        );
        Ok(())
    }
}

/// Appends one JSON object per start/end to a file.
#[derive(Debug)]
pub struct JsonlSessionHandler {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlSessionHandler {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &Value) -> Result<()> {
        let mut line = serde_json::to_string(record).context("serialize session record")?;
        line.push('\n');
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow!("session log lock poisoned"))?;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open session log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append session log {}", self.path.display()))
    }
}

impl SessionHandler for JsonlSessionHandler {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn on_start(&self, session_id: &str, start: &SessionStart) -> Result<()> {
        self.append(&json!({
            "event": "session.started",
            "at": Utc::now(),
            "session_id": session_id,
            "start": start,
        }))
    }

    fn on_end(&self, session_id: &str, end: &SessionEnd) -> Result<()> {
        self.append(&json!({
            "event": "session.ended",
            "at": Utc::now(),
            "session_id": session_id,
            "end": end,
        }))
    }
}
