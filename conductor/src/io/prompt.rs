//! Prompt rendering for agent executors.
//!
//! Templates mark their sections with `<!-- section:KEY required|droppable -->`.
//! When the rendered prompt exceeds the byte budget, droppable sections go first
//! (in a fixed order) and the last section is truncated as a final resort.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

const RESEARCH_TEMPLATE: &str = include_str!("prompts/research.md");
const FILTER_TEMPLATE: &str = include_str!("prompts/filter.md");

/// Sections dropped first when over budget.
const DROP_ORDER: [&str; 3] = ["context", "focus", "sources"];

const SEPARATOR: &str = "\n\n";
const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Default byte budget for a rendered prompt.
pub const DEFAULT_PROMPT_BUDGET_BYTES: usize = 64 * 1024;

static SECTION_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").ok()
});

/// Inputs for the research prompt.
#[derive(Debug, Clone)]
pub struct ResearchPrompt<'a> {
    pub topic: &'a str,
    pub focus: Option<&'a str>,
    pub max_sources: u32,
    pub artifact_path: &'a str,
    pub domain: Option<&'a str>,
    pub metadata: &'a BTreeMap<String, Value>,
}

/// Inputs for the report filter prompt.
#[derive(Debug, Clone)]
pub struct FilterPrompt<'a> {
    pub criteria: &'a str,
    pub max_sections: u32,
    pub artifact_path: &'a str,
    pub source_ids: Vec<&'a str>,
    /// Pretty-printed input report.
    pub report_json: &'a str,
}

struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("research", RESEARCH_TEMPLATE)
            .context("load research template")?;
        env.add_template("filter", FILTER_TEMPLATE)
            .context("load filter template")?;
        Ok(Self { env })
    }

    fn render_research(&self, input: &ResearchPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("research")?;
        let rendered = template.render(context! {
            topic => input.topic.trim(),
            focus => input.focus.map(str::trim).filter(|s| !s.is_empty()),
            max_sources => input.max_sources,
            artifact_path => input.artifact_path,
            domain => input.domain.map(str::trim).filter(|s| !s.is_empty()),
            metadata => input.metadata,
        })?;
        Ok(rendered)
    }

    fn render_filter(&self, input: &FilterPrompt<'_>) -> Result<String> {
        let template = self.env.get_template("filter")?;
        let rendered = template.render(context! {
            criteria => input.criteria.trim(),
            max_sections => input.max_sections,
            artifact_path => input.artifact_path,
            source_ids => &input.source_ids,
            report_json => input.report_json,
        })?;
        Ok(rendered)
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let Some(re) = SECTION_RE.as_ref() else {
        return vec![ParsedSection {
            key: "all".to_string(),
            required: true,
            content: rendered.trim().to_string(),
        }];
    };

    let markers: Vec<_> = re.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (idx, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(mode)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |next| next.start());
        let required = mode.as_str() == "required";
        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

/// Length of the sections once joined.
fn total_len(sections: &[ParsedSection]) -> usize {
    let content: usize = sections.iter().map(|s| s.content.len()).sum();
    content + SEPARATOR.len() * sections.len().saturating_sub(1)
}

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    if total_len(sections) <= budget {
        return;
    }
    let total = total_len(sections);
    let Some(last) = sections.last_mut() else {
        return;
    };
    let allowed = budget.saturating_sub(total - last.content.len());
    let before_len = last.content.len();
    if allowed > TRUNCATION_MARKER.len() {
        truncate_on_boundary(&mut last.content, allowed - TRUNCATION_MARKER.len());
        last.content.push_str(TRUNCATION_MARKER);
    } else {
        truncate_on_boundary(&mut last.content, allowed);
    }
    debug!(
        section = %last.key,
        before_len,
        after_len = last.content.len(),
        "truncated section for budget"
    );
}

fn truncate_on_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn join_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join(SEPARATOR)
}

/// Renders agent prompts within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PROMPT_BUDGET_BYTES)
    }
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build_research(&self, input: &ResearchPrompt<'_>) -> Result<String> {
        let rendered = PromptEngine::new()?
            .render_research(input)
            .context("render research prompt")?;
        Ok(self.fit(&rendered))
    }

    pub fn build_filter(&self, input: &FilterPrompt<'_>) -> Result<String> {
        let rendered = PromptEngine::new()?
            .render_filter(input)
            .context("render filter prompt")?;
        Ok(self.fit(&rendered))
    }

    fn fit(&self, rendered: &str) -> String {
        let mut sections = parse_sections(rendered);
        apply_budget(&mut sections, self.budget_bytes);
        join_sections(&sections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn research<'a>(metadata: &'a BTreeMap<String, Value>, focus: Option<&'a str>) -> ResearchPrompt<'a> {
        ResearchPrompt {
            topic: "solid-state batteries",
            focus,
            max_sources: 5,
            artifact_path: "/tmp/artifacts/research/corr-1.json",
            domain: Some("energy"),
            metadata,
        }
    }

    #[test]
    fn research_sections_render_in_order() {
        let mut metadata = BTreeMap::new();
        metadata.insert("ticket".to_string(), Value::from("T-1"));
        let prompt = PromptBuilder::default()
            .build_research(&research(&metadata, Some("manufacturing cost")))
            .expect("render");

        let contract = prompt.find("### Research Contract").expect("contract");
        let output = prompt.find("### Output").expect("output");
        let topic = prompt.find("### Topic").expect("topic");
        let focus = prompt.find("### Focus").expect("focus");
        let context = prompt.find("### Run Context").expect("context");
        assert!(contract < output && output < topic && topic < focus && focus < context);
        assert!(prompt.contains("/tmp/artifacts/research/corr-1.json"));
        assert!(prompt.contains("ticket: T-1"));
        assert!(!prompt.contains("<!-- section"));
    }

    #[test]
    fn empty_optional_sections_are_omitted() {
        let metadata = BTreeMap::new();
        let mut input = research(&metadata, None);
        input.domain = None;
        let prompt = PromptBuilder::default().build_research(&input).expect("render");
        assert!(!prompt.contains("### Focus"));
        assert!(!prompt.contains("### Run Context"));
    }

    #[test]
    fn budget_drops_droppable_sections_first() {
        let metadata = BTreeMap::new();
        let focus = "detail ".repeat(200);
        let full = PromptBuilder::default()
            .build_research(&research(&metadata, Some(&focus)))
            .expect("render");
        let budget = full.len() - 200;

        let prompt = PromptBuilder::new(budget)
            .build_research(&research(&metadata, Some(&focus)))
            .expect("render");
        assert!(!prompt.contains("### Focus"), "focus should be dropped");
        assert!(!prompt.contains("### Run Context"), "context should be dropped");
        assert!(prompt.contains("### Research Contract"));
        assert!(prompt.contains("### Topic"));
    }

    #[test]
    fn filter_prompt_truncates_report_last() {
        let report = format!("{{\"sections\": \"{}\"}}", "é".repeat(2_000));
        let input = FilterPrompt {
            criteria: "keep cost analysis",
            max_sections: 3,
            artifact_path: "/tmp/out.json",
            source_ids: vec!["s1", "s2"],
            report_json: &report,
        };
        let full = PromptBuilder::default().build_filter(&input).expect("render");
        assert!(full.contains("- s1\n- s2"));
        assert!(full.ends_with("</report>"));

        let prompt = PromptBuilder::new(1_500).build_filter(&input).expect("render");
        assert!(prompt.len() <= 1_500);
        assert!(prompt.contains("### Criteria"));
        assert!(!prompt.contains("### Allowed Sources"));
        assert!(prompt.ends_with("[truncated]"));
    }
}
