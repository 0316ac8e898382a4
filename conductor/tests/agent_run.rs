//! End-to-end runs of a single agent against scripted collaborators.

use conductor::agent::AgentRunner;
use conductor::agents::research::{ResearchAgent, ResearchRequest};
use conductor::core::context::RunContext;
use conductor::core::types::ErrorKind;
use conductor::test_support::{
    Harness, RecordingSessions, Scripted, ScriptedExecutor, research_report_json,
};

fn runner(harness: &Harness) -> AgentRunner<ResearchAgent> {
    AgentRunner::new(ResearchAgent::new().expect("agent"), harness.collaborators())
}

#[test]
fn invalid_input_never_reaches_the_executor() {
    let harness = Harness::new(ScriptedExecutor::always(Scripted::success(
        1.0,
        research_report_json("x", &["s1"]),
    )));
    let runner = runner(&harness);

    for request in [
        ResearchRequest::new(""),
        ResearchRequest::new("   "),
        ResearchRequest::new("x".repeat(501)),
        ResearchRequest {
            max_sources: 0,
            ..ResearchRequest::new("grid storage")
        },
    ] {
        let result = runner.run(&request, RunContext::new());
        let err = result.error().expect("validation failure");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.retryable);
        assert_eq!(result.metadata.cost_usd, 0.0);
    }
    assert_eq!(harness.executor.call_count(), 0);
    // Sessions still open and close once per run.
    assert_eq!(harness.sessions.starts().len(), 4);
    assert_eq!(harness.sessions.ends().len(), 4);
}

#[test]
fn successful_run_carries_reported_usage() {
    let harness = Harness::new(ScriptedExecutor::in_order(vec![
        Scripted::success(0.75, research_report_json("grid storage", &["s1", "s2"])).with_turns(7),
    ]));
    let ctx = RunContext::new().with_correlation_id("corr-42");
    let result = runner(&harness).run(&ResearchRequest::new("grid storage"), ctx);

    let report = result.output().expect("report");
    assert!(!report.degraded);
    assert_eq!(report.sources.len(), 2);
    assert_eq!(result.metadata.correlation_id, "corr-42");
    assert_eq!(result.metadata.cost_usd, 0.75);
    assert_eq!(result.metadata.turns, 7);
    assert!(result.metadata.completed_at >= result.metadata.started_at);

    let ends = harness.sessions.ends();
    assert_eq!(ends.len(), 1);
    assert!(ends[0].1.success);
    assert_eq!(harness.sessions.starts()[0].correlation_id, "corr-42");
}

#[test]
fn missing_artifact_degrades_instead_of_failing() {
    let harness = Harness::new(ScriptedExecutor::in_order(vec![Scripted::no_artifact(
        0.3,
        "found a few notes",
    )]));
    let result = runner(&harness).run(&ResearchRequest::new("grid storage"), RunContext::new());
    let report = result.output().expect("fallback");
    assert!(report.degraded);
    assert_eq!(report.summary, "found a few notes");
    assert_eq!(result.metadata.cost_usd, 0.3);
}

#[test]
fn executor_failure_is_classified_and_cost_kept() {
    let harness = Harness::new(ScriptedExecutor::in_order(vec![Scripted {
        report: conductor::io::executor::ExecReport {
            cost_usd: 0.4,
            ..conductor::io::executor::ExecReport::failed("Rate limit hit, retry later")
        },
        artifact: None,
    }]));
    let result = runner(&harness).run(&ResearchRequest::new("grid storage"), RunContext::new());
    let err = result.error().expect("failure");
    assert_eq!(err.kind, ErrorKind::Model);
    assert!(err.retryable);
    assert!(err.retry_hint.is_some());
    assert_eq!(result.metadata.cost_usd, 0.4);
}

#[test]
fn dispatch_error_normalizes_to_unknown() {
    let harness = Harness::new(ScriptedExecutor::in_order(Vec::new()));
    let result = runner(&harness).run(&ResearchRequest::new("grid storage"), RunContext::new());
    let err = result.error().expect("failure");
    assert_eq!(err.kind, ErrorKind::Unknown);
    assert!(err.message.contains("script exhausted"));
    assert_eq!(result.metadata.cost_usd, 0.0);
}

#[test]
fn overspend_fails_with_budget_error() {
    let harness = Harness::new(ScriptedExecutor::in_order(vec![Scripted::success(
        5.0,
        research_report_json("grid storage", &["s1"]),
    )]));
    let result = runner(&harness).run(&ResearchRequest::new("grid storage"), RunContext::new());
    let err = result.error().expect("budget");
    assert_eq!(err.kind, ErrorKind::Budget);
    assert_eq!(result.metadata.cost_usd, 5.0);
}

#[test]
fn failing_session_start_aborts_before_dispatch() {
    let harness = Harness::with_sessions(
        ScriptedExecutor::always(Scripted::success(1.0, research_report_json("x", &["s1"]))),
        RecordingSessions::failing_start(),
    );
    let result = runner(&harness).run(&ResearchRequest::new("grid storage"), RunContext::new());
    let err = result.error().expect("infra failure");
    assert_eq!(err.kind, ErrorKind::Infra);
    assert_eq!(err.code, "session_start_failed");
    assert_eq!(harness.executor.call_count(), 0);
    assert!(harness.sessions.ends().is_empty());
}

#[test]
fn failing_session_end_keeps_the_result() {
    let harness = Harness::with_sessions(
        ScriptedExecutor::in_order(vec![Scripted::success(
            0.2,
            research_report_json("grid storage", &["s1"]),
        )]),
        RecordingSessions::failing_end(),
    );
    let result = runner(&harness).run(&ResearchRequest::new("grid storage"), RunContext::new());
    assert!(result.is_success());
    assert_eq!(harness.sessions.ends().len(), 1);
}

#[test]
fn metadata_is_stable_across_calls() {
    let harness = Harness::new(ScriptedExecutor::in_order(Vec::new()));
    let runner = runner(&harness);
    assert_eq!(runner.get_metadata(), runner.get_metadata());
    assert_eq!(runner.get_metadata().name, "research");
}
