use promptgauge_core::compare::{
    compare_versions, previous_run_comparison, run_stats, versions_summary, CompareOutcome,
};
use promptgauge_core::errors::CoreError;
use promptgauge_core::model::{ModelConfig, TestCase};
use promptgauge_core::storage::Store;

/// Seeds a completed run whose `instruction_adherence` results pass for
/// `passed` of `total` outputs, one output per test case.
fn seed_run(store: &Store, version: &str, passed: usize, total: usize) -> i64 {
    let models = vec![ModelConfig::new("gpt-4o-mini")];
    let run_id = store.create_run(version, &models, total as i64).unwrap();
    store.mark_run_running(run_id).unwrap();
    for i in 0..total {
        let tc = TestCase {
            prompt: "p".to_string(),
            input: format!("input {i}"),
            ..Default::default()
        };
        let case_id = store.insert_test_case(&tc).unwrap();
        let output_id = store
            .record_output(
                run_id,
                case_id,
                "gpt-4o-mini",
                Some("response"),
                Some(10),
                Some(20),
                Some(150),
                Some(0.001),
                None,
            )
            .unwrap();
        let ok = i < passed;
        store
            .upsert_evaluator_result(
                output_id,
                "instruction_adherence",
                Some(ok),
                Some(if ok { 1.0 } else { 0.0 }),
                &serde_json::json!({}),
                "seeded",
            )
            .unwrap();
        store.bump_run_progress(run_id, 0.001, 150).unwrap();
    }
    store.mark_run_completed(run_id).unwrap();
    run_id
}

#[test]
fn ten_point_drop_regresses_at_default_threshold() -> anyhow::Result<()> {
    let store = Store::memory()?;
    seed_run(&store, "v1", 9, 10);
    seed_run(&store, "v2", 8, 10);

    let outcome = compare_versions(&store, "v1", "v2", 5.0)?;
    let CompareOutcome::Report(report) = outcome else {
        panic!("expected a comparison report");
    };
    assert_eq!(report.baseline.stats.pass_rate, 90.0);
    assert_eq!(report.current.stats.pass_rate, 80.0);
    assert_eq!(report.overall.pass_rate_delta, -10.0);
    assert!(report.has_regression);

    let delta = &report.evaluators[0];
    assert_eq!(delta.evaluator_name, "instruction_adherence");
    assert_eq!(delta.delta, Some(-10.0));
    assert!(delta.regressed);
    Ok(())
}

#[test]
fn small_drop_below_threshold_is_not_a_regression() -> anyhow::Result<()> {
    let store = Store::memory()?;
    seed_run(&store, "v1", 9, 10);
    seed_run(&store, "v2", 87, 100);

    let outcome = compare_versions(&store, "v1", "v2", 5.0)?;
    let CompareOutcome::Report(report) = outcome else {
        panic!("expected a comparison report");
    };
    assert_eq!(report.overall.pass_rate_delta, -3.0);
    assert!(!report.has_regression);
    Ok(())
}

#[test]
fn drop_equal_to_threshold_regresses() -> anyhow::Result<()> {
    let store = Store::memory()?;
    seed_run(&store, "v1", 9, 10);
    seed_run(&store, "v2", 85, 100);

    let outcome = compare_versions(&store, "v1", "v2", 5.0)?;
    let CompareOutcome::Report(report) = outcome else {
        panic!("expected a comparison report");
    };
    assert!(report.has_regression);
    Ok(())
}

#[test]
fn missing_side_yields_insufficient_data() -> anyhow::Result<()> {
    let store = Store::memory()?;
    seed_run(&store, "v1", 9, 10);

    let outcome = compare_versions(&store, "v1", "v9", 5.0)?;
    assert!(matches!(outcome, CompareOutcome::InsufficientData { .. }));
    Ok(())
}

#[test]
fn comparing_a_version_to_itself_is_rejected() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let err = compare_versions(&store, "v1", "v1", 5.0).unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    Ok(())
}

#[test]
fn previous_run_comparison_uses_same_version_history() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let first = seed_run(&store, "v1", 9, 10);
    seed_run(&store, "v2", 5, 10);
    let second = seed_run(&store, "v1", 6, 10);

    let comparison = previous_run_comparison(&store, second, 5.0)?;
    assert_eq!(comparison.previous_run_id, Some(first));
    assert!(comparison.has_regression);
    let delta = &comparison.deltas[0];
    assert_eq!(delta.delta, Some(-30.0));
    Ok(())
}

#[test]
fn first_run_of_a_version_has_nothing_to_compare() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let only = seed_run(&store, "v1", 9, 10);

    let comparison = previous_run_comparison(&store, only, 5.0)?;
    assert_eq!(comparison.previous_run_id, None);
    assert!(!comparison.has_regression);
    assert!(comparison.note.is_some());
    Ok(())
}

#[test]
fn previous_run_comparison_unknown_run_is_not_found() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let err = previous_run_comparison(&store, 123, 5.0).unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
    Ok(())
}

#[test]
fn run_stats_excludes_indeterminate_from_denominator() -> anyhow::Result<()> {
    let store = Store::memory()?;
    let run_id = seed_run(&store, "v1", 1, 2);
    let outputs = store.outputs_for_run(run_id)?;
    store.upsert_evaluator_result(
        outputs[0].id,
        "hallucination",
        None,
        None,
        &serde_json::json!({}),
        "no grounding context provided",
    )?;
    store.upsert_evaluator_result(
        outputs[1].id,
        "hallucination",
        Some(true),
        Some(1.0),
        &serde_json::json!({}),
        "grounded",
    )?;

    let run = store.get_run(run_id)?.unwrap();
    let stats = run_stats(&store, &run)?;
    // one decisive hallucination verdict out of one scored
    assert_eq!(stats.evaluator_pass_rates["hallucination"], 100.0);
    assert_eq!(stats.evaluator_pass_rates["instruction_adherence"], 50.0);
    Ok(())
}

#[test]
fn versions_summary_reports_latest_run_per_version() -> anyhow::Result<()> {
    let store = Store::memory()?;
    seed_run(&store, "v1", 9, 10);
    let newest_v1 = seed_run(&store, "v1", 10, 10);
    seed_run(&store, "v2", 5, 10);

    let summary = versions_summary(&store)?;
    assert_eq!(summary.len(), 2);
    let v1 = summary.iter().find(|s| s.prompt_version == "v1").unwrap();
    assert_eq!(v1.run_id, newest_v1);
    assert_eq!(v1.pass_rate, 100.0);
    Ok(())
}
