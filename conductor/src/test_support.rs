//! Test-only collaborators and fixtures.

use std::collections::VecDeque;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::agent::Collaborators;
use crate::agents::research::ResearchReport;
use crate::core::citations::{Section, SourceEntry};
use crate::io::executor::{ExecReport, ExecRequest, Executor};
use crate::io::session::{SessionEnd, SessionRecorder, SessionStart};
use crate::io::store::FsArtifactStore;

/// One scripted executor response.
#[derive(Debug, Clone)]
pub struct Scripted {
    pub report: ExecReport,
    /// Written to the request's artifact path before the report is returned.
    pub artifact: Option<Value>,
}

impl Scripted {
    pub fn success(cost_usd: f64, artifact: Value) -> Self {
        Self {
            report: ExecReport {
                cost_usd,
                turns: 1,
                ..ExecReport::succeeded("done")
            },
            artifact: Some(artifact),
        }
    }

    /// Successful report that leaves no artifact behind.
    pub fn no_artifact(cost_usd: f64, output: &str) -> Self {
        Self {
            report: ExecReport {
                cost_usd,
                turns: 1,
                ..ExecReport::succeeded(output)
            },
            artifact: None,
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            report: ExecReport::failed(message),
            artifact: None,
        }
    }

    pub fn with_turns(mut self, turns: u32) -> Self {
        self.report.turns = turns;
        self
    }
}

type Responder = dyn Fn(&ExecRequest) -> Result<Scripted> + Send + Sync;

/// Executor that answers from a script and records what it was asked.
pub struct ScriptedExecutor {
    responder: Box<Responder>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(responder: impl Fn(&ExecRequest) -> Result<Scripted> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Answer calls in order; calls past the end fail the dispatch.
    pub fn in_order(steps: Vec<Scripted>) -> Self {
        let queue = Mutex::new(VecDeque::from(steps));
        Self::new(move |_| {
            let mut queue = queue.lock().map_err(|_| anyhow!("script lock poisoned"))?;
            queue.pop_front().ok_or_else(|| anyhow!("script exhausted"))
        })
    }

    pub fn always(step: Scripted) -> Self {
        Self::new(move |_| Ok(step.clone()))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, request: &ExecRequest) -> Result<ExecReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        let step = (self.responder)(request)?;
        if let Some(artifact) = &step.artifact {
            if let Some(parent) = request.artifact_path.parent() {
                fs::create_dir_all(parent).context("create artifact dir")?;
            }
            let body = serde_json::to_string_pretty(artifact).context("serialize artifact")?;
            fs::write(&request.artifact_path, body).context("write scripted artifact")?;
        }
        Ok(step.report)
    }
}

/// Session recorder that keeps every start and end in memory.
#[derive(Default)]
pub struct RecordingSessions {
    fail_start: bool,
    fail_end: bool,
    starts: Mutex<Vec<SessionStart>>,
    ends: Mutex<Vec<(String, SessionEnd)>>,
}

impl RecordingSessions {
    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::default()
        }
    }

    pub fn failing_end() -> Self {
        Self {
            fail_end: true,
            ..Self::default()
        }
    }

    pub fn starts(&self) -> Vec<SessionStart> {
        self.starts.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn ends(&self) -> Vec<(String, SessionEnd)> {
        self.ends.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl SessionRecorder for RecordingSessions {
    fn start_session(&self, start: &SessionStart) -> Result<String> {
        if self.fail_start {
            return Err(anyhow!("session backend unavailable"));
        }
        let mut starts = self.starts.lock().map_err(|_| anyhow!("lock poisoned"))?;
        starts.push(start.clone());
        Ok(format!("session-{}", starts.len()))
    }

    fn end_session(&self, session_id: &str, end: &SessionEnd) -> Result<()> {
        self.ends
            .lock()
            .map_err(|_| anyhow!("lock poisoned"))?
            .push((session_id.to_string(), end.clone()));
        if self.fail_end {
            return Err(anyhow!("session backend went away"));
        }
        Ok(())
    }
}

/// Temp-dir artifact store plus scripted collaborators.
pub struct Harness {
    pub temp: TempDir,
    pub executor: Arc<ScriptedExecutor>,
    pub store: Arc<FsArtifactStore>,
    pub sessions: Arc<RecordingSessions>,
}

impl Harness {
    pub fn new(executor: ScriptedExecutor) -> Self {
        Self::with_sessions(executor, RecordingSessions::default())
    }

    pub fn with_sessions(executor: ScriptedExecutor, sessions: RecordingSessions) -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FsArtifactStore::new(temp.path().join("artifacts")));
        Self {
            temp,
            executor: Arc::new(executor),
            store,
            sessions: Arc::new(sessions),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            executor: self.executor.clone(),
            store: self.store.clone(),
            sessions: self.sessions.clone(),
        }
    }
}

pub fn source(id: &str) -> SourceEntry {
    SourceEntry {
        id: id.to_string(),
        url: Some(format!("https://example.com/{id}")),
        title: Some(format!("Source {id}")),
    }
}

pub fn section(heading: &str, citations: &[&str]) -> Section {
    Section {
        heading: heading.to_string(),
        body: format!("{heading} findings"),
        citations: citations.iter().map(|c| c.to_string()).collect(),
        subsections: Vec::new(),
    }
}

/// Schema-valid research artifact with one section per source.
pub fn research_report_json(topic: &str, source_ids: &[&str]) -> Value {
    let sections: Vec<Value> = source_ids
        .iter()
        .map(|id| json!({"heading": format!("Finding {id}"), "body": "b", "citations": [id]}))
        .collect();
    let sources: Vec<Value> = source_ids
        .iter()
        .map(|id| json!({"id": id, "url": format!("https://example.com/{id}")}))
        .collect();
    json!({
        "topic": topic,
        "summary": format!("{topic} summary"),
        "sections": sections,
        "sources": sources,
    })
}

pub fn research_report(topic: &str, source_ids: &[&str]) -> ResearchReport {
    ResearchReport {
        topic: topic.to_string(),
        summary: format!("{topic} summary"),
        sections: source_ids
            .iter()
            .map(|id| section(&format!("Finding {id}"), &[id]))
            .collect(),
        sources: source_ids.iter().map(|id| source(id)).collect(),
        open_questions: Vec::new(),
        degraded: false,
    }
}
