use super::args::*;
use std::path::Path;
use std::sync::Arc;

use promptgauge_core::compare;
use promptgauge_core::config;
use promptgauge_core::engine::Orchestrator;
use promptgauge_core::errors::CoreError;
use promptgauge_core::model::RunStatus;
use promptgauge_core::providers::llm::{ClientRouter, DefaultRouter, FakeClient, FakeRouter};
use promptgauge_core::storage::Store;
use promptgauge_evaluators::default_registry;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const REGRESSION: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => cmd_run(args).await,
        Command::Evaluate(args) => cmd_evaluate(args).await,
        Command::Compare(args) => cmd_compare(args),
        Command::Runs(args) => cmd_runs(args),
        Command::Versions(args) => cmd_versions(args),
        Command::Evaluators => cmd_evaluators(),
        Command::Annotate(args) => cmd_annotate(args),
        Command::Accuracy(args) => cmd_accuracy(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

/// Validation and lookup failures are user input problems, not crashes.
fn user_error(e: CoreError) -> anyhow::Result<i32> {
    match e {
        CoreError::Validation(msg) => {
            eprintln!("config error: {msg}");
            Ok(exit_codes::CONFIG_ERROR)
        }
        CoreError::NotFound(msg) => {
            eprintln!("not found: {msg}");
            Ok(exit_codes::CONFIG_ERROR)
        }
        CoreError::InsufficientData(msg) => {
            eprintln!("insufficient data: {msg}");
            Ok(exit_codes::CONFIG_ERROR)
        }
        CoreError::Internal(e) => Err(e),
    }
}

fn open_store(path: &Path) -> anyhow::Result<Store> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Store::open(path)?;
    store.init_schema()?;
    Ok(store)
}

fn build_router(offline: bool) -> Arc<dyn ClientRouter> {
    if offline {
        Arc::new(FakeRouter::new(FakeClient::new("offline response")))
    } else {
        Arc::new(DefaultRouter::from_env())
    }
}

async fn cmd_run(args: RunArgs) -> anyhow::Result<i32> {
    let suite = match config::load_suite(&args.config) {
        Ok(s) => s,
        Err(e) => return user_error(e),
    };
    let store = open_store(&args.db)?;

    let mut case_ids = Vec::with_capacity(suite.tests.len());
    for tc in &suite.tests {
        case_ids.push(store.insert_test_case(tc)?);
    }

    let orchestrator = Orchestrator::new(
        store.clone(),
        build_router(args.offline),
        Arc::new(default_registry()),
    )
    .with_settings(suite.settings.run_settings());

    let run_id = match orchestrator
        .start_run(
            &suite.prompt_version,
            &case_ids,
            &suite.models,
            suite.evaluators.as_deref(),
        )
        .await
    {
        Ok(id) => id,
        Err(e) => return user_error(e),
    };

    let run = store
        .get_run(run_id)?
        .ok_or_else(|| anyhow::anyhow!("run {run_id} vanished after completion"))?;
    let stats = compare::run_stats(&store, &run)?;

    let threshold = suite
        .settings
        .regression_threshold
        .unwrap_or(compare::DEFAULT_THRESHOLD_PCT);
    let comparison = if args.no_compare {
        None
    } else {
        match compare::previous_run_comparison(&store, run_id, threshold) {
            Ok(c) => Some(c),
            Err(e) => return user_error(e),
        }
    };

    let regressed = comparison
        .as_ref()
        .map(|c| c.has_regression)
        .unwrap_or(false);

    if args.format == "json" {
        let payload = serde_json::json!({
            "run_id": run_id,
            "prompt_version": run.prompt_version,
            "status": run.status.as_str(),
            "stats": stats,
            "comparison": comparison,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!(
            "run {} [{}] version={} pass_rate={}% evaluations={} cost=${:.4}",
            run_id,
            run.status.as_str(),
            run.prompt_version,
            stats.pass_rate,
            stats.total_evaluations,
            stats.cost_usd,
        );
        for (name, rate) in &stats.evaluator_pass_rates {
            println!("  {name}: {rate}%");
        }
        if let Some(c) = &comparison {
            match c.previous_run_id {
                Some(prev) => {
                    println!("vs run {prev}:");
                    for d in &c.deltas {
                        let delta = d
                            .delta
                            .map(|v| format!("{v:+.1}pp"))
                            .unwrap_or_else(|| "n/a".to_string());
                        let flag = if d.regressed { "  REGRESSED" } else { "" };
                        println!("  {}: {}{}", d.evaluator_name, delta, flag);
                    }
                }
                None => {
                    if let Some(note) = &c.note {
                        println!("{note}");
                    }
                }
            }
        }
    }

    Ok(if regressed {
        exit_codes::REGRESSION
    } else {
        exit_codes::OK
    })
}

async fn cmd_evaluate(args: EvaluateArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    let registry = Arc::new(default_registry());
    let names = if args.evaluators.is_empty() {
        registry.names()
    } else {
        args.evaluators.clone()
    };

    let orchestrator = Orchestrator::new(store, build_router(args.offline), registry);
    match orchestrator.run_evaluators(args.run_id, &names).await {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(exit_codes::OK)
        }
        Err(e) => user_error(e),
    }
}

fn cmd_compare(args: CompareArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    let threshold = args.threshold.unwrap_or(compare::DEFAULT_THRESHOLD_PCT);
    match compare::compare_versions(&store, &args.baseline, &args.current, threshold) {
        Ok(outcome) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            let regressed = matches!(&outcome, compare::CompareOutcome::Report(r) if r.has_regression);
            Ok(if regressed {
                exit_codes::REGRESSION
            } else {
                exit_codes::OK
            })
        }
        Err(e) => user_error(e),
    }
}

fn cmd_runs(args: RunsArgs) -> anyhow::Result<i32> {
    let status = match args.status.as_deref() {
        None => None,
        Some(s @ ("pending" | "running" | "completed" | "failed")) => Some(RunStatus::parse(s)),
        Some(other) => {
            return user_error(CoreError::validation(format!("unknown status: {other}")))
        }
    };
    let store = open_store(&args.db)?;
    let runs = store.list_runs(args.prompt_version.as_deref(), status, args.limit)?;
    println!("{}", serde_json::to_string_pretty(&runs)?);
    Ok(exit_codes::OK)
}

fn cmd_versions(args: VersionsArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    match compare::versions_summary(&store) {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(exit_codes::OK)
        }
        Err(e) => user_error(e),
    }
}

fn cmd_evaluators() -> anyhow::Result<i32> {
    let registry = default_registry();
    println!("{}", serde_json::to_string_pretty(&registry.list())?);
    Ok(exit_codes::OK)
}

fn cmd_annotate(args: AnnotateArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    if store.get_output(args.output_id)?.is_none() {
        return user_error(CoreError::not_found(format!(
            "output not found: {}",
            args.output_id
        )));
    }
    if promptgauge_core::annotations::normalize_label(&args.label).is_none() {
        eprintln!(
            "note: label {:?} is not a recognized verdict; it will be stored but excluded from accuracy",
            args.label
        );
    }
    let id = store.insert_annotation(
        args.output_id,
        &args.annotation_type,
        &args.label,
        args.notes.as_deref(),
        args.created_by.as_deref(),
    )?;
    eprintln!(
        "annotation {} recorded: output={} type={}",
        id, args.output_id, args.annotation_type
    );
    Ok(exit_codes::OK)
}

fn cmd_accuracy(args: AccuracyArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    match promptgauge_core::annotations::compute_accuracy(&store) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(exit_codes::OK)
        }
        Err(e) => user_error(e),
    }
}
