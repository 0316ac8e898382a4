//! Report filter agent: narrows a research report to sections meeting criteria.
//!
//! The filtered artifact is untrusted. Parsing runs both referential-integrity
//! checks against the input report; a filter that invents or re-points
//! citations fails the run instead of degrading.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::{Agent, ParseContext, PromptContext};
use crate::agents::research::ResearchReport;
use crate::core::citations::{CitedDocument, ReferenceSet, Section, SourceEntry, check_integrity};
use crate::core::profile::{AgentProfile, ModelTier};
use crate::core::types::AgentError;
use crate::io::prompt::{FilterPrompt, PromptBuilder};
use crate::io::schema::{OutputSchema, describe};
use crate::io::store::{ArtifactLoad, load_artifact};

const FILTERED_SCHEMA: &str = include_str!("../../schemas/filtered_report.schema.json");

pub const FILTER_AGENT_NAME: &str = "report-filter";
pub const FILTER_AGENT_VERSION: &str = "1.0.0";

const MAX_SECTIONS_LIMIT: u32 = 100;

fn default_max_sections() -> u32 {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRequest {
    pub report: ResearchReport,
    pub criteria: String,
    #[serde(default = "default_max_sections")]
    pub max_sections: u32,
}

impl FilterRequest {
    pub fn new(report: ResearchReport, criteria: impl Into<String>) -> Self {
        Self {
            report,
            criteria: criteria.into(),
            max_sections: default_max_sections(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredReport {
    pub topic: String,
    pub summary: String,
    pub sections: Vec<Section>,
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    /// Headings removed by the filter.
    pub dropped_sections: Vec<String>,
    #[serde(default)]
    pub degraded: bool,
}

impl CitedDocument for FilteredReport {
    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn sources(&self) -> &[SourceEntry] {
        &self.sources
    }
}

impl FilteredReport {
    /// The input report, unfiltered and flagged.
    pub fn passthrough(report: &ResearchReport, reason: &str) -> Self {
        let mut open_questions = report.open_questions.clone();
        open_questions.push(format!("degraded: {reason}; report passed through unfiltered"));
        Self {
            topic: report.topic.clone(),
            summary: report.summary.clone(),
            sections: report.sections.clone(),
            sources: report.sources.clone(),
            open_questions,
            dropped_sections: Vec::new(),
            degraded: true,
        }
    }

    /// Move sections beyond `max` into `dropped_sections`.
    fn enforce_max_sections(&mut self, max: usize) {
        if self.sections.len() <= max {
            return;
        }
        let extra = self.sections.split_off(max);
        self.dropped_sections
            .extend(extra.into_iter().map(|section| section.heading));
    }
}

pub struct ReportFilterAgent {
    schema: OutputSchema<FilteredReport>,
    prompts: PromptBuilder,
}

impl ReportFilterAgent {
    pub fn new() -> Result<Self> {
        Ok(Self {
            schema: OutputSchema::compile(FILTERED_SCHEMA)?,
            prompts: PromptBuilder::default(),
        })
    }

    pub fn with_prompt_builder(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }
}

impl Agent for ReportFilterAgent {
    type Input = FilterRequest;
    type Output = FilteredReport;

    fn name(&self) -> &str {
        FILTER_AGENT_NAME
    }

    fn version(&self) -> &str {
        FILTER_AGENT_VERSION
    }

    fn description(&self) -> &str {
        "Keeps the sections of a research report that meet given criteria"
    }

    fn default_profile(&self) -> AgentProfile {
        AgentProfile {
            model: ModelTier::Fast,
            max_turns: 6,
            max_budget_usd: 0.5,
            tools: BTreeSet::from(["write_file".to_string()]),
            ..AgentProfile::default()
        }
    }

    fn validate_input(&self, input: &FilterRequest) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if input.criteria.trim().is_empty() {
            errors.push("criteria must not be empty".to_string());
        }
        if input.max_sections == 0 || input.max_sections > MAX_SECTIONS_LIMIT {
            errors.push(format!(
                "max_sections must be within 1..={MAX_SECTIONS_LIMIT} (got {})",
                input.max_sections
            ));
        }
        if input.report.topic.trim().is_empty() {
            errors.push("report.topic must not be empty".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn build_prompt(&self, input: &FilterRequest, ctx: &PromptContext<'_>) -> Result<String> {
        let report_json =
            serde_json::to_string_pretty(&input.report).context("serialize input report")?;
        let artifact_path = ctx.artifact_path.display().to_string();
        self.prompts.build_filter(&FilterPrompt {
            criteria: &input.criteria,
            max_sections: input.max_sections,
            artifact_path: &artifact_path,
            source_ids: input.report.sources.iter().map(|s| s.id.as_str()).collect(),
            report_json: &report_json,
        })
    }

    fn parse_output(
        &self,
        input: &FilterRequest,
        ctx: &ParseContext<'_>,
    ) -> Result<FilteredReport, AgentError> {
        let mut filtered = match load_artifact(ctx.store, ctx.artifact_key, &self.schema) {
            Ok(ArtifactLoad::Loaded(filtered)) => filtered,
            Ok(ArtifactLoad::Missing) => {
                warn!(artifact_key = ctx.artifact_key, "filter artifact missing, passing report through");
                return Ok(FilteredReport::passthrough(
                    &input.report,
                    "filter wrote no artifact",
                ));
            }
            Ok(ArtifactLoad::Invalid(errors)) => {
                warn!(
                    artifact_key = ctx.artifact_key,
                    errors = errors.len(),
                    "filter artifact failed schema, passing report through"
                );
                return Ok(FilteredReport::passthrough(
                    &input.report,
                    &format!("filter artifact failed schema validation: {}", describe(&errors)),
                ));
            }
            Err(err) => return Err(err.into_agent_error()),
        };

        let raw = ReferenceSet::from_sources(&input.report.sources);
        let integrity = check_integrity(&filtered, &raw);
        if !integrity.is_clean() {
            warn!(
                unresolved = integrity.unresolved_citations.len(),
                unknown_sources = integrity.unknown_sources.len(),
                "filtered report failed integrity checks"
            );
            return Err(AgentError::execution(
                "fabricated_citation",
                format!(
                    "filtered report references evidence not in the input report: {}",
                    integrity.describe().join("; ")
                ),
            ));
        }

        filtered.degraded = false;
        filtered.enforce_max_sections(usize::try_from(input.max_sections).unwrap_or(usize::MAX));
        Ok(filtered)
    }
}
