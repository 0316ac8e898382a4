//! Orchestrator limits and batch isolation.

use conductor::agent::AgentRunner;
use conductor::agents::research::{ResearchAgent, ResearchRequest};
use conductor::core::budget::SystemLimits;
use conductor::core::context::RunContext;
use conductor::core::types::{ErrorKind, SystemErrorKind};
use conductor::system::SystemRun;
use conductor::test_support::{Harness, Scripted, ScriptedExecutor, research_report_json};

/// Stage 2 pushes cumulative cost from $2.00 to $4.00 against a $3.00 cap.
#[test]
fn third_stage_never_runs_once_cost_cap_is_crossed() {
    let harness = Harness::new(ScriptedExecutor::in_order(vec![
        Scripted::success(2.0, research_report_json("one", &["s1"])),
        Scripted::success(2.0, research_report_json("two", &["s1"])),
        Scripted::success(2.0, research_report_json("three", &["s1"])),
    ]));
    let runner = AgentRunner::new(ResearchAgent::new().expect("agent"), harness.collaborators());
    let limits = SystemLimits {
        max_cost_usd: Some(3.0),
        ..SystemLimits::default()
    };
    let mut run = SystemRun::start("three-stage", "1.0.0", limits, RunContext::new());

    let mut stages_run = 0;
    let outcome = ["one", "two", "three"].iter().try_for_each(|topic| {
        stages_run += 1;
        run.invoke(&runner, topic, &ResearchRequest::new(*topic)).map(|_| ())
    });
    let result = run.finish(outcome);

    assert_eq!(stages_run, 2);
    assert!(result.agents_used.len() <= 2);
    assert_eq!(result.error().expect("budget").kind, SystemErrorKind::Budget);
    assert_eq!(harness.executor.call_count(), 2);
    assert_eq!(result.metadata.cost_usd, 4.0);
}

#[test]
fn limits_on_the_context_override_system_defaults() {
    let harness = Harness::new(ScriptedExecutor::always(Scripted::success(
        0.1,
        research_report_json("x", &["s1"]),
    )));
    let runner = AgentRunner::new(ResearchAgent::new().expect("agent"), harness.collaborators());
    let ctx = RunContext {
        limits: Some(SystemLimits {
            max_agent_calls: Some(1),
            ..SystemLimits::default()
        }),
        ..RunContext::new()
    };
    let mut run = SystemRun::start("ctx-limits", "1.0.0", SystemLimits::default(), ctx);
    run.invoke(&runner, "first", &ResearchRequest::new("a"))
        .expect("first");
    let err = run
        .invoke(&runner, "second", &ResearchRequest::new("b"))
        .unwrap_err();
    assert_eq!(err.kind, SystemErrorKind::Budget);
}

#[test]
fn batch_failure_of_unit_three_leaves_siblings_untouched() {
    let harness = Harness::new(ScriptedExecutor::new(|request| {
        Ok(if request.prompt.contains("subject-3") {
            Scripted::failure("search backend returned garbage")
        } else {
            Scripted::success(0.1, research_report_json("subject", &["s1"]))
        })
    }));
    let runner = AgentRunner::new(ResearchAgent::new().expect("agent"), harness.collaborators());
    let mut run = SystemRun::start("batch", "1.0.0", SystemLimits::default(), RunContext::new());
    let units = (1..=5)
        .map(|n| (n, ResearchRequest::new(format!("subject-{n}"))))
        .collect();

    let outcome = run.invoke_batch(&runner, "research", units, 2);

    assert_eq!(outcome.results.len(), 5);
    for n in [1, 2, 4, 5] {
        assert!(outcome.results[&n].is_ok(), "unit {n} should succeed");
    }
    let err = outcome.results[&3].as_ref().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Execution);
    assert_eq!(harness.executor.call_count(), 5);
    assert_eq!(run.invocations().len(), 5);
}
