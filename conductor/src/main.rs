//! Conductor CLI: run research agents and check cited documents.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use conductor::agent::{Agent, Collaborators};
use conductor::agents::filter::{FILTER_AGENT_NAME, ReportFilterAgent};
use conductor::agents::research::{RESEARCH_AGENT_NAME, ResearchAgent, ResearchRequest};
use conductor::core::citations::{Document, ReferenceSet, check_integrity};
use conductor::core::context::RunContext;
use conductor::core::types::{SystemErrorKind, SystemResult};
use conductor::exit_codes;
use conductor::io::config::{ConductorConfig, DEFAULT_CONFIG_PATH, load_config};
use conductor::io::executor::CommandExecutor;
use conductor::io::session::{
    JsonlSessionHandler, SessionDispatcher, SessionHandler, TracingSessionHandler,
};
use conductor::io::store::FsArtifactStore;
use conductor::logging::{self, LogFormat};
use conductor::system::System;
use conductor::systems::{ResearchJob, ResearchSystem};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Agent execution and orchestration engine"
)]
struct Cli {
    /// Diagnostic log format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check that every citation resolves and every source is known.
    CheckCitations {
        /// Cited document (JSON).
        #[arg(long)]
        document: PathBuf,
        /// Document whose sources form the raw reference set.
        #[arg(long)]
        raw: Option<PathBuf>,
    },
    /// Print the resolved profile for an agent.
    Profile {
        agent: String,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Print the research system and its agents.
    Info {
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Research one or more topics through the configured executor.
    Research {
        #[arg(required = true)]
        topics: Vec<String>,
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
        /// Filter each report against these criteria.
        #[arg(long)]
        filter: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_format);
    match run(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::CheckCitations { document, raw } => cmd_check_citations(&document, raw.as_deref()),
        Command::Profile { agent, config } => cmd_profile(&agent, &config),
        Command::Info { config } => cmd_info(&config),
        Command::Research {
            topics,
            config,
            filter,
        } => cmd_research(topics, &config, filter),
    }
}

fn cmd_check_citations(document: &Path, raw: Option<&Path>) -> Result<i32> {
    let doc: Document = read_json(document)?;
    let references = match raw {
        Some(path) => ReferenceSet::from_sources(&read_json::<Document>(path)?.sources),
        None => ReferenceSet::from_sources(&doc.sources),
    };
    let report = check_integrity(&doc, &references);
    if report.is_clean() {
        println!("ok");
        return Ok(exit_codes::OK);
    }
    for line in report.describe() {
        println!("{line}");
    }
    Ok(exit_codes::INVALID)
}

fn cmd_profile(agent: &str, config: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    let default = match agent {
        RESEARCH_AGENT_NAME => ResearchAgent::new()?.default_profile(),
        FILTER_AGENT_NAME => ReportFilterAgent::new()?.default_profile(),
        other => bail!("unknown agent '{other}' (expected {RESEARCH_AGENT_NAME} or {FILTER_AGENT_NAME})"),
    };
    print_json(&cfg.profile_for(agent, &default))?;
    Ok(exit_codes::OK)
}

fn cmd_info(config: &Path) -> Result<i32> {
    let cfg = load_config(config)?;
    let system = ResearchSystem::from_config(&cfg, collaborators(&cfg)?)?;
    print_json(&system.get_info())?;
    Ok(exit_codes::OK)
}

fn cmd_research(topics: Vec<String>, config: &Path, filter: Option<String>) -> Result<i32> {
    let cfg = load_config(config)?;
    let system = ResearchSystem::from_config(&cfg, collaborators(&cfg)?)?;
    let jobs: Vec<ResearchJob> = topics
        .into_iter()
        .map(|topic| ResearchJob {
            criteria: filter.clone(),
            ..ResearchJob::new(ResearchRequest::new(topic))
        })
        .collect();

    if let [job] = jobs.as_slice() {
        let result = system.run(job, RunContext::new());
        print_json(&result)?;
        return Ok(exit_code_for(&result));
    }
    let result = system.run_many(jobs, RunContext::new());
    print_json(&result)?;
    let stopped = result.output().and_then(|batch| batch.stopped.as_ref());
    Ok(match stopped {
        Some(err) => exit_code_for_kind(err.kind),
        None => exit_code_for(&result),
    })
}

fn collaborators(cfg: &ConductorConfig) -> Result<Collaborators> {
    let executor = CommandExecutor::new(cfg.executor.to_command_config())?;
    let mut handlers: Vec<Box<dyn SessionHandler>> = vec![Box::new(TracingSessionHandler)];
    if let Some(path) = &cfg.sessions.log_path {
        handlers.push(Box::new(JsonlSessionHandler::new(path)));
    }
    Ok(Collaborators {
        executor: Arc::new(executor),
        store: Arc::new(FsArtifactStore::new(&cfg.store.dir)),
        sessions: Arc::new(SessionDispatcher::new(handlers)),
    })
}

fn exit_code_for<T>(result: &SystemResult<T>) -> i32 {
    result
        .error()
        .map_or(exit_codes::OK, |err| exit_code_for_kind(err.kind))
}

fn exit_code_for_kind(kind: SystemErrorKind) -> i32 {
    match kind {
        SystemErrorKind::Budget => exit_codes::BUDGET_EXCEEDED,
        SystemErrorKind::Validation => exit_codes::INVALID,
        _ => exit_codes::RUN_FAILED,
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_research_with_filter() {
        let cli = Cli::parse_from(["conductor", "research", "a", "b", "--filter", "cost"]);
        match cli.command {
            Command::Research { topics, filter, .. } => {
                assert_eq!(topics, vec!["a", "b"]);
                assert_eq!(filter.as_deref(), Some("cost"));
            }
            _ => panic!("expected research"),
        }
    }

    #[test]
    fn research_requires_a_topic() {
        assert!(Cli::try_parse_from(["conductor", "research"]).is_err());
    }

    #[test]
    fn parse_global_log_format() {
        let cli = Cli::parse_from(["conductor", "info", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(cli.command, Command::Info { .. }));
    }

    #[test]
    fn stopped_batch_maps_to_budget_exit_code() {
        assert_eq!(
            exit_code_for_kind(SystemErrorKind::Budget),
            exit_codes::BUDGET_EXCEEDED
        );
        assert_eq!(exit_code_for_kind(SystemErrorKind::Validation), exit_codes::INVALID);
        assert_eq!(exit_code_for_kind(SystemErrorKind::Agent), exit_codes::RUN_FAILED);
    }

    #[test]
    fn parse_check_citations_raw_is_optional() {
        let cli = Cli::parse_from(["conductor", "check-citations", "--document", "doc.json"]);
        assert!(matches!(
            cli.command,
            Command::CheckCitations { raw: None, .. }
        ));
    }
}
