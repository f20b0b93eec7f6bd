use promptgauge_core::engine::Orchestrator;
use promptgauge_core::errors::CoreError;
use promptgauge_core::evaluators_api::{EvalContext, Evaluator, Finding, Registry};
use promptgauge_core::model::{ModelConfig, RunStatus, TestCase};
use promptgauge_core::providers::llm::{FakeClient, FakeRouter};
use promptgauge_core::storage::Store;
use async_trait::async_trait;
use std::sync::Arc;

struct NonEmptyEvaluator;

#[async_trait]
impl Evaluator for NonEmptyEvaluator {
    fn name(&self) -> &'static str {
        "non_empty"
    }
    fn description(&self) -> &'static str {
        "passes when the output has any text"
    }
    async fn evaluate(&self, ctx: &EvalContext) -> anyhow::Result<Finding> {
        Ok(if ctx.output.trim().is_empty() {
            Finding::fail(0.0, "empty output")
        } else {
            Finding::pass(1.0, "non-empty output")
        })
    }
}

struct WaryEvaluator;

#[async_trait]
impl Evaluator for WaryEvaluator {
    fn name(&self) -> &'static str {
        "wary"
    }
    fn description(&self) -> &'static str {
        "abstains on hedged output, otherwise checks for an apology"
    }
    async fn evaluate(&self, ctx: &EvalContext) -> anyhow::Result<Finding> {
        Ok(if ctx.output.contains("maybe") {
            Finding::indeterminate("cannot tell")
        } else if ctx.output.contains("sorry") {
            Finding::fail(0.0, "apologetic output")
        } else {
            Finding::pass(1.0, "confident output")
        })
    }
}

struct FaultyEvaluator;

#[async_trait]
impl Evaluator for FaultyEvaluator {
    fn name(&self) -> &'static str {
        "faulty"
    }
    fn description(&self) -> &'static str {
        "always errors"
    }
    async fn evaluate(&self, _ctx: &EvalContext) -> anyhow::Result<Finding> {
        anyhow::bail!("synthetic evaluator crash")
    }
}

fn registry() -> Arc<Registry> {
    let mut r = Registry::new();
    r.register("non_empty", Box::new(|| Arc::new(NonEmptyEvaluator)));
    r.register("wary", Box::new(|| Arc::new(WaryEvaluator)));
    r.register("faulty", Box::new(|| Arc::new(FaultyEvaluator)));
    Arc::new(r)
}

fn case(prompt: &str, input: &str) -> TestCase {
    TestCase {
        prompt: prompt.to_string(),
        input: input.to_string(),
        ..Default::default()
    }
}

fn seed_cases(store: &Store, cases: &[TestCase]) -> Vec<i64> {
    cases
        .iter()
        .map(|tc| store.insert_test_case(tc).unwrap())
        .collect()
}

#[tokio::test]
async fn run_completes_and_counts_every_unit() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let ids = seed_cases(
        &store,
        &[case("Summarize.", "first text"), case("Summarize.", "second text")],
    );
    let models = vec![ModelConfig::new("gpt-4o-mini"), ModelConfig::new("claude-3-haiku")];

    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(FakeRouter::new(FakeClient::new("a concise summary"))),
        registry(),
    );
    let names = vec!["non_empty".to_string()];
    let run_id = orchestrator
        .start_run("v1", &ids, &models, Some(&names))
        .await?;

    let run = store.get_run(run_id)?.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.test_case_count, 2);
    assert_eq!(run.completed_count, 4);
    assert!(run.total_cost_usd > 0.0);

    let outputs = store.outputs_for_run(run_id)?;
    assert_eq!(outputs.len(), 4);
    for output in &outputs {
        assert!(output.is_success());
        let results = store.results_for_output(output.id)?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].evaluator_name, "non_empty");
        assert_eq!(results[0].passed, Some(true));
    }
    Ok(())
}

#[tokio::test]
async fn provider_failure_stays_on_its_own_unit() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let ids = seed_cases(
        &store,
        &[case("Summarize.", "good text"), case("Summarize.", "poison text")],
    );
    let client = FakeClient::new("fine").fail_when("poison text", "provider exploded");
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(FakeRouter::new(client)),
        registry(),
    );
    let names = vec!["non_empty".to_string()];
    let run_id = orchestrator
        .start_run("v1", &ids, &[ModelConfig::new("gpt-4o-mini")], Some(&names))
        .await?;

    let run = store.get_run(run_id)?.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.completed_count, 2);

    let outputs = store.outputs_for_run(run_id)?;
    let failed: Vec<_> = outputs.iter().filter(|o| !o.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error.as_deref().unwrap().contains("provider exploded"));
    assert!(failed[0].response.is_none());

    // only the successful output gets evaluated
    assert_eq!(store.successful_outputs(run_id)?.len(), 1);
    assert!(store.results_for_output(failed[0].id)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn evaluator_fault_records_indeterminate() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let ids = seed_cases(&store, &[case("Summarize.", "text")]);
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(FakeRouter::new(FakeClient::new("ok"))),
        registry(),
    );
    let names = vec!["faulty".to_string()];
    let run_id = orchestrator
        .start_run("v1", &ids, &[ModelConfig::new("gpt-4o-mini")], Some(&names))
        .await?;

    let outputs = store.outputs_for_run(run_id)?;
    let results = store.results_for_output(outputs[0].id)?;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].passed, None);
    assert!(results[0].reasoning.contains("evaluator error"));
    Ok(())
}

#[tokio::test]
async fn start_run_rejects_bad_input() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let ids = seed_cases(&store, &[case("p", "i")]);
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(FakeRouter::new(FakeClient::new("ok"))),
        registry(),
    );
    let models = vec![ModelConfig::new("gpt-4o-mini")];

    let err = orchestrator.start_run("v1", &[], &models, None).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let err = orchestrator.start_run("v1", &ids, &[], None).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let err = orchestrator
        .start_run("v1", &[9999], &models, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let bogus = vec!["no_such_evaluator".to_string()];
    let err = orchestrator
        .start_run("v1", &ids, &models, Some(&bogus))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    // nothing above should have left a completed run behind
    assert!(store.latest_completed_run("v1")?.is_none());
    Ok(())
}

#[tokio::test]
async fn rerunning_evaluators_overwrites_results() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let ids = seed_cases(&store, &[case("Summarize.", "text")]);
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(FakeRouter::new(FakeClient::new("ok"))),
        registry(),
    );
    let names = vec!["non_empty".to_string()];
    let run_id = orchestrator
        .start_run("v1", &ids, &[ModelConfig::new("gpt-4o-mini")], Some(&names))
        .await?;

    let summary = orchestrator.run_evaluators(run_id, &names).await?;
    assert_eq!(summary.outputs_evaluated, 1);
    assert_eq!(summary.results_count, 1);
    assert_eq!(summary.pass_rates["non_empty"].rate, 1.0);

    // still one result row per (output, evaluator)
    let outputs = store.outputs_for_run(run_id)?;
    assert_eq!(store.results_for_output(outputs[0].id)?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn pass_rate_ignores_indeterminate_findings() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let ids = seed_cases(
        &store,
        &[
            case("Summarize.", "plain text"),
            case("Summarize.", "hedge text"),
            case("Summarize.", "apology text"),
        ],
    );
    let client = FakeClient::new("confident answer")
        .reply_when("hedge", "maybe it is fine")
        .reply_when("apology", "sorry, I cannot");
    let orchestrator = Orchestrator::new(
        store,
        Arc::new(FakeRouter::new(client)),
        registry(),
    );
    let names = vec!["wary".to_string()];
    let run_id = orchestrator
        .start_run("v1", &ids, &[ModelConfig::new("gpt-4o-mini")], Some(&names))
        .await?;

    let summary = orchestrator.run_evaluators(run_id, &names).await?;
    assert_eq!(summary.results_count, 3);
    // one pass, one fail, one indeterminate: the abstention stays out of
    // the denominator
    let rate = &summary.pass_rates["wary"];
    assert_eq!(rate.passed, 1);
    assert_eq!(rate.total, 2);
    assert_eq!(rate.rate, 0.5);
    Ok(())
}

#[tokio::test]
async fn run_evaluators_requires_a_completed_run() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let models = vec![ModelConfig::new("gpt-4o-mini")];
    let run_id = store.create_run("v1", &models, 1)?;
    let orchestrator = Orchestrator::new(
        store.clone(),
        Arc::new(FakeRouter::new(FakeClient::new("ok"))),
        registry(),
    );
    let names = vec!["non_empty".to_string()];

    // pending
    let err = orchestrator.run_evaluators(run_id, &names).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    // running
    store.mark_run_running(run_id)?;
    let err = orchestrator.run_evaluators(run_id, &names).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    Ok(())
}

#[tokio::test]
async fn run_evaluators_unknown_run_is_not_found() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let orchestrator = Orchestrator::new(
        store,
        Arc::new(FakeRouter::new(FakeClient::new("ok"))),
        registry(),
    );
    let names = vec!["non_empty".to_string()];
    let err = orchestrator.run_evaluators(42, &names).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
    Ok(())
}
