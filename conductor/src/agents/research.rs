//! Research agent: topic in, cited report out.

use std::collections::BTreeSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::{Agent, ParseContext, PromptContext};
use crate::core::citations::{
    CitedDocument, ReferenceSet, Section, SourceEntry, check_citations_resolve,
};
use crate::core::profile::{AgentProfile, ModelTier};
use crate::core::types::AgentError;
use crate::io::prompt::{PromptBuilder, ResearchPrompt};
use crate::io::schema::{OutputSchema, describe};
use crate::io::store::{ArtifactLoad, load_artifact};

const REPORT_SCHEMA: &str = include_str!("../../schemas/research_report.schema.json");

pub const RESEARCH_AGENT_NAME: &str = "research";
pub const RESEARCH_AGENT_VERSION: &str = "1.0.0";

const MAX_TOPIC_CHARS: usize = 500;
const MAX_SOURCES_LIMIT: u32 = 50;

fn default_max_sources() -> u32 {
    8
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    #[serde(default = "default_max_sources")]
    pub max_sources: u32,
}

impl ResearchRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            focus: None,
            max_sources: default_max_sources(),
        }
    }

    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub topic: String,
    pub summary: String,
    pub sections: Vec<Section>,
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    /// Set when the report is a fallback rather than the executor's artifact.
    #[serde(default)]
    pub degraded: bool,
}

impl CitedDocument for ResearchReport {
    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn sources(&self) -> &[SourceEntry] {
        &self.sources
    }
}

impl ResearchReport {
    /// Content-poor stand-in used when the executor left no usable artifact.
    pub fn fallback(request: &ResearchRequest, reason: &str, raw_output: Option<&str>) -> Self {
        let summary = raw_output
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map_or_else(
                || "No structured report was produced.".to_string(),
                str::to_string,
            );
        Self {
            topic: request.topic.trim().to_string(),
            summary,
            sections: Vec::new(),
            sources: Vec::new(),
            open_questions: vec![format!("degraded: {reason}")],
            degraded: true,
        }
    }
}

pub struct ResearchAgent {
    schema: OutputSchema<ResearchReport>,
    prompts: PromptBuilder,
}

impl ResearchAgent {
    pub fn new() -> Result<Self> {
        Ok(Self {
            schema: OutputSchema::compile(REPORT_SCHEMA)?,
            prompts: PromptBuilder::default(),
        })
    }

    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }
}

impl Agent for ResearchAgent {
    type Input = ResearchRequest;
    type Output = ResearchReport;

    fn name(&self) -> &str {
        RESEARCH_AGENT_NAME
    }

    fn version(&self) -> &str {
        RESEARCH_AGENT_VERSION
    }

    fn description(&self) -> &str {
        "Investigates a topic with search tools and writes a cited report"
    }

    fn default_profile(&self) -> AgentProfile {
        AgentProfile {
            model: ModelTier::Balanced,
            max_turns: 30,
            max_budget_usd: 2.0,
            tools: ["web_search", "web_fetch", "write_file"]
                .into_iter()
                .map(str::to_string)
                .collect::<BTreeSet<_>>(),
            ..AgentProfile::default()
        }
    }

    fn validate_input(&self, input: &ResearchRequest) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let topic = input.topic.trim();
        if topic.is_empty() {
            errors.push("topic must not be empty".to_string());
        } else if topic.chars().count() > MAX_TOPIC_CHARS {
            errors.push(format!("topic must be at most {MAX_TOPIC_CHARS} characters"));
        }
        if let Some(focus) = &input.focus
            && focus.trim().is_empty()
        {
            errors.push("focus must not be blank when set".to_string());
        }
        if input.max_sources == 0 || input.max_sources > MAX_SOURCES_LIMIT {
            errors.push(format!(
                "max_sources must be within 1..={MAX_SOURCES_LIMIT} (got {})",
                input.max_sources
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn build_prompt(&self, input: &ResearchRequest, ctx: &PromptContext<'_>) -> Result<String> {
        let artifact_path = ctx.artifact_path.display().to_string();
        self.prompts.build_research(&ResearchPrompt {
            topic: &input.topic,
            focus: input.focus.as_deref(),
            max_sources: input.max_sources,
            artifact_path: &artifact_path,
            domain: ctx.run.domain.as_deref(),
            metadata: &ctx.run.metadata,
        })
    }

    fn parse_output(
        &self,
        input: &ResearchRequest,
        ctx: &ParseContext<'_>,
    ) -> Result<ResearchReport, AgentError> {
        match load_artifact(ctx.store, ctx.artifact_key, &self.schema) {
            Ok(ArtifactLoad::Loaded(mut report)) => {
                report.degraded = false;
                flag_unresolved_citations(&mut report);
                Ok(report)
            }
            Ok(ArtifactLoad::Missing) => {
                warn!(artifact_key = ctx.artifact_key, "research artifact missing, degrading");
                Ok(ResearchReport::fallback(
                    input,
                    "executor wrote no report artifact",
                    ctx.raw_output,
                ))
            }
            Ok(ArtifactLoad::Invalid(errors)) => {
                warn!(
                    artifact_key = ctx.artifact_key,
                    errors = errors.len(),
                    "research artifact failed schema, degrading"
                );
                Ok(ResearchReport::fallback(
                    input,
                    &format!("report artifact failed schema validation: {}", describe(&errors)),
                    ctx.raw_output,
                ))
            }
            Err(err) => Err(err.into_agent_error()),
        }
    }
}

/// Dangling citations are surfaced for the reader, not fixed.
fn flag_unresolved_citations(report: &mut ResearchReport) {
    let own = ReferenceSet::from_sources(&report.sources);
    for violation in check_citations_resolve(&*report, &own) {
        report.open_questions.push(format!(
            "unresolved citation '{}' in {}",
            violation.citation, violation.location
        ));
    }
}
