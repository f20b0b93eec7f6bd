use crate::errors::CoreError;
use crate::model::EvaluationRun;
use crate::storage::store::Store;
use serde::Serialize;
use std::collections::BTreeMap;

/// Default drop (in percentage points) that flags a regression.
pub const DEFAULT_THRESHOLD_PCT: f64 = 5.0;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ModelStats {
    pub pass_rate: f64,
    pub avg_latency_ms: f64,
    pub avg_cost_usd: f64,
    pub total_evaluations: i64,
}

/// Derived per-run statistics, computed on read and never stored.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub pass_rate: f64,
    pub total_evaluations: i64,
    pub cost_usd: f64,
    pub duration_ms: i64,
    pub evaluator_pass_rates: BTreeMap<String, f64>,
    pub model_stats: BTreeMap<String, ModelStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunRef {
    pub run_id: i64,
    pub prompt_version: String,
    pub started_at: String,
}

impl RunRef {
    fn of(run: &EvaluationRun) -> Self {
        Self {
            run_id: run.id,
            prompt_version: run.prompt_version.clone(),
            started_at: run.started_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluatorDelta {
    pub evaluator_name: String,
    pub current_rate: Option<f64>,
    pub previous_rate: Option<f64>,
    /// Present only when the evaluator appears in both runs.
    pub delta: Option<f64>,
    pub regressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelDelta {
    pub model: String,
    pub baseline: Option<ModelStats>,
    pub current: Option<ModelStats>,
    pub pass_rate_delta: Option<f64>,
    /// Informational only; never flags a regression.
    pub avg_latency_delta_ms: Option<f64>,
    /// Informational only; never flags a regression.
    pub avg_cost_delta_usd: Option<f64>,
    pub regressed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverallDelta {
    pub pass_rate_delta: f64,
    pub cost_delta: f64,
    pub duration_delta: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionSide {
    pub version: String,
    pub run: RunRef,
    pub stats: RunStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionComparison {
    pub baseline: VersionSide,
    pub current: VersionSide,
    pub overall: OverallDelta,
    pub evaluators: Vec<EvaluatorDelta>,
    pub models: Vec<ModelDelta>,
    pub has_regression: bool,
    pub threshold_pct: f64,
}

/// A missing completed run on either side is a normal state, not an error.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CompareOutcome {
    Report(Box<VersionComparison>),
    InsufficientData { error: String },
}

/// Evaluator deltas for a run against the immediately preceding completed
/// run with the same prompt version.
#[derive(Debug, Clone, Serialize)]
pub struct RunComparison {
    pub run_id: i64,
    pub prompt_version: String,
    pub previous_run_id: Option<i64>,
    pub deltas: Vec<EvaluatorDelta>,
    pub has_regression: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionSummary {
    pub prompt_version: String,
    pub run_id: i64,
    pub started_at: String,
    pub pass_rate: f64,
    pub total_evaluations: i64,
    pub cost_usd: f64,
    pub duration_ms: i64,
    pub evaluator_pass_rates: BTreeMap<String, f64>,
}

/// A drop of at least the threshold magnitude; a tie at exactly the
/// threshold counts as regressed.
fn is_regression(delta: f64, threshold_pct: f64) -> bool {
    delta <= -threshold_pct
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

fn rate_pct(passed: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        round1(passed as f64 / total as f64 * 100.0)
    }
}

/// Aggregates a completed run's outputs and results into rates. Pass rates
/// count `passed = true` over scored results; indeterminate verdicts are
/// excluded from the denominator.
pub fn run_stats(store: &Store, run: &EvaluationRun) -> anyhow::Result<RunStats> {
    let outputs = store.outputs_for_run(run.id)?;
    let scored = store.scored_results_for_run(run.id)?;

    let mut total = 0i64;
    let mut total_passed = 0i64;
    let mut by_evaluator: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    let mut by_model: BTreeMap<String, (i64, i64)> = BTreeMap::new();

    for r in &scored {
        let Some(passed) = r.passed else { continue };
        total += 1;
        let e = by_evaluator.entry(r.evaluator_name.clone()).or_default();
        let m = by_model.entry(r.model.clone()).or_default();
        e.1 += 1;
        m.1 += 1;
        if passed {
            total_passed += 1;
            e.0 += 1;
            m.0 += 1;
        }
    }

    let mut latency: BTreeMap<String, (i64, i64)> = BTreeMap::new();
    let mut cost: BTreeMap<String, (f64, i64)> = BTreeMap::new();
    for o in &outputs {
        if let Some(ms) = o.latency_ms {
            let e = latency.entry(o.model.clone()).or_default();
            e.0 += ms;
            e.1 += 1;
        }
        if let Some(c) = o.cost_usd {
            let e = cost.entry(o.model.clone()).or_default();
            e.0 += c;
            e.1 += 1;
        }
    }

    let model_stats = by_model
        .into_iter()
        .map(|(model, (passed, scored_count))| {
            let avg_latency = latency
                .get(&model)
                .filter(|(_, n)| *n > 0)
                .map(|(sum, n)| round1(*sum as f64 / *n as f64))
                .unwrap_or(0.0);
            let avg_cost = cost
                .get(&model)
                .filter(|(_, n)| *n > 0)
                .map(|(sum, n)| round6(*sum / *n as f64))
                .unwrap_or(0.0);
            (
                model,
                ModelStats {
                    pass_rate: rate_pct(passed, scored_count),
                    avg_latency_ms: avg_latency,
                    avg_cost_usd: avg_cost,
                    total_evaluations: scored_count,
                },
            )
        })
        .collect();

    Ok(RunStats {
        pass_rate: rate_pct(total_passed, total),
        total_evaluations: total,
        cost_usd: round6(run.total_cost_usd),
        duration_ms: run.total_duration_ms,
        evaluator_pass_rates: by_evaluator
            .into_iter()
            .map(|(name, (passed, scored_count))| (name, rate_pct(passed, scored_count)))
            .collect(),
        model_stats,
    })
}

fn evaluator_deltas(
    previous: &BTreeMap<String, f64>,
    current: &BTreeMap<String, f64>,
    threshold_pct: f64,
) -> Vec<EvaluatorDelta> {
    let mut names: Vec<&String> = previous.keys().chain(current.keys()).collect();
    names.sort();
    names.dedup();

    names
        .into_iter()
        .map(|name| {
            let prev = previous.get(name).copied();
            let curr = current.get(name).copied();
            match (prev, curr) {
                (Some(p), Some(c)) => {
                    let delta = round1(c - p);
                    EvaluatorDelta {
                        evaluator_name: name.clone(),
                        current_rate: Some(c),
                        previous_rate: Some(p),
                        delta: Some(delta),
                        regressed: is_regression(delta, threshold_pct),
                        note: None,
                    }
                }
                _ => EvaluatorDelta {
                    evaluator_name: name.clone(),
                    current_rate: curr,
                    previous_rate: prev,
                    delta: None,
                    regressed: false,
                    note: Some(
                        if curr.is_some() {
                            "only present in current run"
                        } else {
                            "only present in baseline run"
                        }
                        .to_string(),
                    ),
                },
            }
        })
        .collect()
}

/// Explicit baseline/current comparison over the most recent completed run
/// of each version.
pub fn compare_versions(
    store: &Store,
    baseline_version: &str,
    current_version: &str,
    threshold_pct: f64,
) -> Result<CompareOutcome, CoreError> {
    if baseline_version == current_version {
        return Err(CoreError::validation(
            "baseline and current versions must differ",
        ));
    }

    let baseline_run = store.latest_completed_run(baseline_version)?;
    let current_run = store.latest_completed_run(current_version)?;
    let (Some(baseline_run), Some(current_run)) = (baseline_run, current_run) else {
        return Ok(CompareOutcome::InsufficientData {
            error: "insufficient data".to_string(),
        });
    };

    let baseline_stats = run_stats(store, &baseline_run)?;
    let current_stats = run_stats(store, &current_run)?;

    let evaluators = evaluator_deltas(
        &baseline_stats.evaluator_pass_rates,
        &current_stats.evaluator_pass_rates,
        threshold_pct,
    );

    let mut model_names: Vec<&String> = baseline_stats
        .model_stats
        .keys()
        .chain(current_stats.model_stats.keys())
        .collect();
    model_names.sort();
    model_names.dedup();

    let models: Vec<ModelDelta> = model_names
        .into_iter()
        .map(|model| {
            let baseline = baseline_stats.model_stats.get(model).cloned();
            let current = current_stats.model_stats.get(model).cloned();
            match (&baseline, &current) {
                (Some(b), Some(c)) => {
                    let delta = round1(c.pass_rate - b.pass_rate);
                    ModelDelta {
                        model: model.clone(),
                        pass_rate_delta: Some(delta),
                        avg_latency_delta_ms: Some(round1(c.avg_latency_ms - b.avg_latency_ms)),
                        avg_cost_delta_usd: Some(round6(c.avg_cost_usd - b.avg_cost_usd)),
                        regressed: is_regression(delta, threshold_pct),
                        baseline,
                        current,
                    }
                }
                _ => ModelDelta {
                    model: model.clone(),
                    pass_rate_delta: None,
                    avg_latency_delta_ms: None,
                    avg_cost_delta_usd: None,
                    regressed: false,
                    baseline,
                    current,
                },
            }
        })
        .collect();

    let has_regression =
        evaluators.iter().any(|d| d.regressed) || models.iter().any(|d| d.regressed);

    Ok(CompareOutcome::Report(Box::new(VersionComparison {
        overall: OverallDelta {
            pass_rate_delta: round1(current_stats.pass_rate - baseline_stats.pass_rate),
            cost_delta: round6(current_stats.cost_usd - baseline_stats.cost_usd),
            duration_delta: current_stats.duration_ms - baseline_stats.duration_ms,
        },
        baseline: VersionSide {
            version: baseline_version.to_string(),
            run: RunRef::of(&baseline_run),
            stats: baseline_stats,
        },
        current: VersionSide {
            version: current_version.to_string(),
            run: RunRef::of(&current_run),
            stats: current_stats,
        },
        evaluators,
        models,
        has_regression,
        threshold_pct,
    })))
}

/// Implicit comparison: this run against the completed run immediately
/// before it within the same prompt version.
pub fn previous_run_comparison(
    store: &Store,
    run_id: i64,
    threshold_pct: f64,
) -> Result<RunComparison, CoreError> {
    let run = store
        .get_run(run_id)?
        .ok_or_else(|| CoreError::not_found(format!("evaluation run not found: {}", run_id)))?;

    let Some(previous) = store.previous_completed_run(&run)? else {
        return Ok(RunComparison {
            run_id: run.id,
            prompt_version: run.prompt_version,
            previous_run_id: None,
            deltas: Vec::new(),
            has_regression: false,
            note: Some("no earlier completed run for this prompt version".to_string()),
        });
    };

    let current_stats = run_stats(store, &run)?;
    let previous_stats = run_stats(store, &previous)?;
    let deltas = evaluator_deltas(
        &previous_stats.evaluator_pass_rates,
        &current_stats.evaluator_pass_rates,
        threshold_pct,
    );
    let has_regression = deltas.iter().any(|d| d.regressed);

    Ok(RunComparison {
        run_id: run.id,
        prompt_version: run.prompt_version,
        previous_run_id: Some(previous.id),
        deltas,
        has_regression,
        note: None,
    })
}

/// Latest completed run per prompt version with its derived stats,
/// newest first.
pub fn versions_summary(store: &Store) -> Result<Vec<VersionSummary>, CoreError> {
    let runs = store.latest_completed_runs_by_version()?;
    let mut versions = Vec::with_capacity(runs.len());
    for run in runs {
        let stats = run_stats(store, &run)?;
        versions.push(VersionSummary {
            prompt_version: run.prompt_version.clone(),
            run_id: run.id,
            started_at: run.started_at.clone(),
            pass_rate: stats.pass_rate,
            total_evaluations: stats.total_evaluations,
            cost_usd: stats.cost_usd,
            duration_ms: stats.duration_ms,
            evaluator_pass_rates: stats.evaluator_pass_rates,
        });
    }
    Ok(versions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_tie_counts_as_regressed() {
        assert!(is_regression(-5.0, 5.0));
        assert!(is_regression(-10.0, 5.0));
        assert!(!is_regression(-3.0, 5.0));
        assert!(!is_regression(2.0, 5.0));
    }

    #[test]
    fn deltas_skip_one_sided_evaluators() {
        let mut prev = BTreeMap::new();
        let mut curr = BTreeMap::new();
        prev.insert("instruction_adherence".to_string(), 90.0);
        curr.insert("instruction_adherence".to_string(), 80.0);
        curr.insert("refusal_behavior".to_string(), 100.0);

        let deltas = evaluator_deltas(&prev, &curr, 5.0);
        assert_eq!(deltas.len(), 2);

        let instr = &deltas[0];
        assert_eq!(instr.delta, Some(-10.0));
        assert!(instr.regressed);

        let refusal = &deltas[1];
        assert_eq!(refusal.delta, None);
        assert!(!refusal.regressed);
        assert_eq!(refusal.note.as_deref(), Some("only present in current run"));
    }

    #[test]
    fn rate_pct_handles_empty() {
        assert_eq!(rate_pct(0, 0), 0.0);
        assert_eq!(rate_pct(8, 10), 80.0);
        assert_eq!(rate_pct(1, 3), 33.3);
    }
}
