//! Research system: research, then optionally filter, as one unit.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::{Agent, AgentRunner, Collaborators};
use crate::agents::filter::{FILTER_AGENT_NAME, FilterRequest, FilteredReport, ReportFilterAgent};
use crate::agents::research::{
    RESEARCH_AGENT_NAME, ResearchAgent, ResearchReport, ResearchRequest,
};
use crate::core::budget::SystemLimits;
use crate::core::context::RunContext;
use crate::core::types::{AgentError, SystemError, SystemResult};
use crate::io::config::ConductorConfig;
use crate::system::{System, SystemInfo, SystemRun};

pub const RESEARCH_SYSTEM_NAME: &str = "research-system";
pub const RESEARCH_SYSTEM_VERSION: &str = "1.0.0";

const DEFAULT_CONCURRENCY: usize = 4;

/// One unit of work for the research system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchJob {
    pub request: ResearchRequest,
    /// Filter the report against these criteria when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criteria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sections: Option<u32>,
}

impl ResearchJob {
    pub fn new(request: ResearchRequest) -> Self {
        Self {
            request,
            criteria: None,
            max_sections: None,
        }
    }

    pub fn with_criteria(mut self, criteria: impl Into<String>) -> Self {
        self.criteria = Some(criteria.into());
        self
    }

    fn filter_request(&self, report: &ResearchReport, criteria: &str) -> FilterRequest {
        let mut request = FilterRequest::new(report.clone(), criteria);
        if let Some(max) = self.max_sections {
            request.max_sections = max;
        }
        request
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResearchOutcome {
    pub report: ResearchReport,
    /// Absent when no criteria were given or the report was degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filtered: Option<FilteredReport>,
}

/// Per-topic results of [`ResearchSystem::run_many`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResearchBatch {
    pub results: BTreeMap<String, Result<ResearchOutcome, AgentError>>,
    /// Topics cut short by `stopped`: never researched, or researched but not
    /// yet filtered.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
    /// Limit violation that stopped scheduling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<SystemError>,
}

impl ResearchBatch {
    pub fn is_complete(&self) -> bool {
        self.stopped.is_none()
    }
}

pub struct ResearchSystem {
    research: AgentRunner<ResearchAgent>,
    filter: AgentRunner<ReportFilterAgent>,
    limits: SystemLimits,
    concurrency: usize,
}

impl ResearchSystem {
    pub fn new(collaborators: Collaborators) -> Result<Self> {
        Ok(Self {
            research: AgentRunner::new(ResearchAgent::new()?, collaborators.clone()),
            filter: AgentRunner::new(ReportFilterAgent::new()?, collaborators),
            limits: SystemLimits::default(),
            concurrency: DEFAULT_CONCURRENCY,
        })
    }

    /// Profiles, limits, and batch width taken from `cfg`.
    pub fn from_config(cfg: &ConductorConfig, collaborators: Collaborators) -> Result<Self> {
        let research = ResearchAgent::new()?;
        let filter = ReportFilterAgent::new()?;
        let research_profile = cfg.profile_for(RESEARCH_AGENT_NAME, &research.default_profile());
        let filter_profile = cfg.profile_for(FILTER_AGENT_NAME, &filter.default_profile());
        Ok(Self {
            research: AgentRunner::new(research, collaborators.clone())
                .with_profile(research_profile),
            filter: AgentRunner::new(filter, collaborators).with_profile(filter_profile),
            limits: cfg.system.clone(),
            concurrency: cfg.batch.concurrency,
        })
    }

    pub fn with_limits(mut self, limits: SystemLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    fn start(&self, ctx: RunContext) -> SystemRun {
        SystemRun::start(
            RESEARCH_SYSTEM_NAME,
            RESEARCH_SYSTEM_VERSION,
            self.limits.clone(),
            ctx,
        )
    }

    fn pipeline(&self, run: &mut SystemRun, job: &ResearchJob) -> Result<ResearchOutcome, SystemError> {
        let report = run.invoke(&self.research, "research", &job.request)?;
        let Some(criteria) = job.criteria.as_deref() else {
            return Ok(ResearchOutcome {
                report,
                filtered: None,
            });
        };
        if report.degraded {
            warn!(topic = %report.topic, "report degraded, skipping filter");
            return Ok(ResearchOutcome {
                report,
                filtered: None,
            });
        }
        let filtered = run.invoke(&self.filter, "filter", &job.filter_request(&report, criteria))?;
        Ok(ResearchOutcome {
            report,
            filtered: Some(filtered),
        })
    }

    /// Research several unrelated topics with bounded parallelism, then
    /// filter the ones that asked for it. Results are keyed by trimmed topic.
    ///
    /// A unit's failure stays in its own entry. A limit violation stops
    /// scheduling: topics that already settled keep their results and the
    /// violation is reported in [`ResearchBatch::stopped`]. Invalid input
    /// fails the whole run.
    pub fn run_many(&self, jobs: Vec<ResearchJob>, ctx: RunContext) -> SystemResult<ResearchBatch> {
        let mut run = self.start(ctx);
        let outcome = self.batch(&mut run, jobs);
        run.finish(outcome)
    }

    fn batch(
        &self,
        run: &mut SystemRun,
        jobs: Vec<ResearchJob>,
    ) -> Result<ResearchBatch, SystemError> {
        validate_batch(&jobs)?;
        let keyed: Vec<(String, ResearchJob)> = jobs
            .into_iter()
            .map(|job| (job.request.topic.trim().to_string(), job))
            .collect();

        let units = keyed
            .iter()
            .map(|(topic, job)| (topic.clone(), job.request.clone()))
            .collect();
        let researched = run.invoke_batch(&self.research, "research", units, self.concurrency);

        let mut results: BTreeMap<String, Result<ResearchOutcome, AgentError>> = researched
            .results
            .into_iter()
            .map(|(topic, outcome)| {
                let outcome = outcome.map(|report| ResearchOutcome {
                    report,
                    filtered: None,
                });
                (topic, outcome)
            })
            .collect();

        let filter_units: Vec<(String, FilterRequest)> = keyed
            .iter()
            .filter_map(|(topic, job)| {
                let criteria = job.criteria.as_deref()?;
                let report = &results.get(topic)?.as_ref().ok()?.report;
                (!report.degraded).then(|| (topic.clone(), job.filter_request(report, criteria)))
            })
            .collect();
        if researched.stopped.is_some() || filter_units.is_empty() {
            return Ok(ResearchBatch {
                results,
                skipped: researched.skipped,
                stopped: researched.stopped,
            });
        }

        let filtered = run.invoke_batch(&self.filter, "filter", filter_units, self.concurrency);
        for (topic, outcome) in filtered.results {
            let Some(entry) = results.get_mut(&topic) else {
                continue;
            };
            match outcome {
                Ok(report) => {
                    if let Ok(done) = entry {
                        done.filtered = Some(report);
                    }
                }
                Err(err) => *entry = Err(err),
            }
        }
        if let Some(err) = &filtered.stopped {
            warn!(err = %err, unfiltered = filtered.skipped.len(), "research batch stopped during filtering");
        } else {
            info!(topics = results.len(), "research batch complete");
        }
        Ok(ResearchBatch {
            results,
            skipped: filtered.skipped,
            stopped: filtered.stopped,
        })
    }
}

fn validate_batch(jobs: &[ResearchJob]) -> Result<(), SystemError> {
    if jobs.is_empty() {
        return Err(SystemError::validation(&["at least one topic is required".to_string()]));
    }
    let mut seen = BTreeSet::new();
    let duplicates: Vec<String> = jobs
        .iter()
        .map(|job| job.request.topic.trim())
        .filter(|topic| !seen.insert(*topic))
        .map(|topic| format!("duplicate topic '{topic}'"))
        .collect();
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(SystemError::validation(&duplicates))
    }
}

impl System for ResearchSystem {
    type Input = ResearchJob;
    type Output = ResearchOutcome;

    fn run(&self, input: &ResearchJob, ctx: RunContext) -> SystemResult<ResearchOutcome> {
        let mut run = self.start(ctx);
        let outcome = self.pipeline(&mut run, input);
        run.finish(outcome)
    }

    fn get_info(&self) -> SystemInfo {
        SystemInfo {
            name: RESEARCH_SYSTEM_NAME.to_string(),
            version: RESEARCH_SYSTEM_VERSION.to_string(),
            description: "Researches a topic and narrows the report to given criteria".to_string(),
            agents: vec![self.research.get_metadata(), self.filter.get_metadata()],
            limits: self.limits.clone(),
        }
    }
}
