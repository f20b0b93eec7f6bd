use crate::errors::CoreError;
use crate::evaluators_api::{dispatch_prompt, EvalContext, Finding, Registry, Resampler};
use crate::model::{EvaluationOutput, ModelConfig, RunStatus, TestCase};
use crate::providers::llm::ClientRouter;
use crate::storage::store::Store;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Upper bound on concurrently in-flight dispatch units.
    pub parallel: usize,
    /// Deadline applied to every provider invocation, nested calls included.
    pub timeout: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            parallel: 8,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PassRate {
    pub passed: u32,
    pub total: u32,
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluatorRunSummary {
    pub run_id: i64,
    pub outputs_evaluated: usize,
    pub evaluators_run: Vec<String>,
    pub results_count: usize,
    pub pass_rates: BTreeMap<String, PassRate>,
}

/// Expands (test case x model) dispatch units, invokes the model capability
/// per unit under bounded concurrency, persists outputs, then scores the
/// successful ones with the requested evaluators.
#[derive(Clone)]
pub struct Orchestrator {
    pub store: Store,
    pub router: Arc<dyn ClientRouter>,
    pub registry: Arc<Registry>,
    pub settings: RunSettings,
}

impl Orchestrator {
    pub fn new(store: Store, router: Arc<dyn ClientRouter>, registry: Arc<Registry>) -> Self {
        Self {
            store,
            router,
            registry,
            settings: RunSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Validates inputs, creates the run, drives every dispatch unit to a
    /// terminal output, then applies evaluators. `None` for
    /// `evaluator_names` means all registered evaluators.
    pub async fn start_run(
        &self,
        prompt_version: &str,
        test_case_ids: &[i64],
        model_configs: &[ModelConfig],
        evaluator_names: Option<&[String]>,
    ) -> Result<i64, CoreError> {
        if test_case_ids.is_empty() {
            return Err(CoreError::validation("test_case_ids must not be empty"));
        }
        if model_configs.is_empty() {
            return Err(CoreError::validation("model_configs must not be empty"));
        }

        let mut test_cases = Vec::with_capacity(test_case_ids.len());
        let mut missing = Vec::new();
        for &id in test_case_ids {
            match self.store.get_test_case(id)? {
                Some(tc) => test_cases.push(tc),
                None => missing.push(id),
            }
        }
        if !missing.is_empty() {
            return Err(CoreError::validation(format!(
                "test cases not found: {:?}",
                missing
            )));
        }

        let names = match evaluator_names {
            Some(names) => {
                self.ensure_registered(names)?;
                names.to_vec()
            }
            None => self.registry.names(),
        };

        let run_id = self
            .store
            .create_run(prompt_version, model_configs, test_cases.len() as i64)?;
        self.store.mark_run_running(run_id)?;
        info!(
            run_id,
            prompt_version,
            cases = test_cases.len(),
            models = model_configs.len(),
            "starting evaluation run"
        );

        if let Err(e) = self.dispatch_all(run_id, &test_cases, model_configs).await {
            self.store
                .mark_run_failed(run_id, &format!("dispatch failed: {}", e))?;
            return Err(CoreError::Internal(e));
        }

        self.store.mark_run_completed(run_id)?;

        if !names.is_empty() {
            self.evaluate_outputs(run_id, &names).await?;
        }

        Ok(run_id)
    }

    /// Re-scores all successful outputs of an existing run, overwriting any
    /// prior result for the same (output, evaluator) pair.
    pub async fn run_evaluators(
        &self,
        run_id: i64,
        evaluator_names: &[String],
    ) -> Result<EvaluatorRunSummary, CoreError> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| CoreError::not_found(format!("evaluation run not found: {}", run_id)))?;
        if run.status != RunStatus::Completed {
            return Err(CoreError::validation(format!(
                "run {} is {}, only completed runs can be re-scored",
                run_id,
                run.status.as_str()
            )));
        }
        self.ensure_registered(evaluator_names)?;

        let scored = self.evaluate_outputs(run.id, evaluator_names).await?;

        let mut pass_rates: BTreeMap<String, PassRate> = BTreeMap::new();
        for (name, finding) in &scored {
            let entry = pass_rates.entry(name.clone()).or_insert(PassRate {
                passed: 0,
                total: 0,
                rate: 0.0,
            });
            // Indeterminate findings never enter the denominator.
            match finding.passed {
                Some(true) => {
                    entry.passed += 1;
                    entry.total += 1;
                }
                Some(false) => entry.total += 1,
                None => {}
            }
        }
        for rate in pass_rates.values_mut() {
            if rate.total > 0 {
                rate.rate = (rate.passed as f64 / rate.total as f64 * 1000.0).round() / 1000.0;
            }
        }

        let outputs_evaluated = self.store.successful_outputs(run_id)?.len();
        Ok(EvaluatorRunSummary {
            run_id,
            outputs_evaluated,
            evaluators_run: evaluator_names.to_vec(),
            results_count: scored.len(),
            pass_rates,
        })
    }

    fn ensure_registered(&self, names: &[String]) -> Result<(), CoreError> {
        let unknown: Vec<&String> = names
            .iter()
            .filter(|n| !self.registry.contains(n))
            .collect();
        if !unknown.is_empty() {
            return Err(CoreError::validation(format!(
                "unknown evaluators: {:?}; available: {:?}",
                unknown,
                self.registry.names()
            )));
        }
        Ok(())
    }

    /// Runs every (test case x model) unit to a terminal output. A provider
    /// failure is recorded on its own output row and never aborts siblings;
    /// only infrastructure faults (persistence, join) bubble up.
    async fn dispatch_all(
        &self,
        run_id: i64,
        test_cases: &[TestCase],
        model_configs: &[ModelConfig],
    ) -> anyhow::Result<()> {
        let sem = Arc::new(Semaphore::new(self.settings.parallel.max(1)));
        let mut handles = Vec::new();

        for tc in test_cases {
            for cfg in model_configs {
                let permit = sem.clone().acquire_owned().await?;
                let this = self.clone();
                let tc = tc.clone();
                let cfg = cfg.clone();
                let h = tokio::spawn(async move {
                    let _permit = permit;
                    this.dispatch_unit(run_id, &tc, &cfg).await
                });
                handles.push(h);
            }
        }

        for h in handles {
            h.await??;
        }
        Ok(())
    }

    async fn dispatch_unit(
        &self,
        run_id: i64,
        tc: &TestCase,
        cfg: &ModelConfig,
    ) -> anyhow::Result<()> {
        let prompt = dispatch_prompt(&tc.prompt, &tc.input);
        let client = self.router.client_for(cfg);

        let invocation = timeout(self.settings.timeout, client.invoke(&prompt, cfg)).await;
        match invocation {
            Ok(Ok(completion)) => {
                debug!(
                    run_id,
                    test_case_id = tc.id,
                    model = %cfg.model_id,
                    latency_ms = completion.latency_ms,
                    "unit completed"
                );
                self.store.record_output(
                    run_id,
                    tc.id,
                    &cfg.model_id,
                    Some(&completion.text),
                    Some(completion.input_tokens),
                    Some(completion.output_tokens),
                    Some(completion.latency_ms),
                    Some(completion.cost_usd),
                    None,
                )?;
                self.store
                    .bump_run_progress(run_id, completion.cost_usd, completion.latency_ms)?;
            }
            Ok(Err(e)) => {
                warn!(run_id, test_case_id = tc.id, model = %cfg.model_id, error = %e, "provider failure");
                self.store.record_output(
                    run_id,
                    tc.id,
                    &cfg.model_id,
                    None,
                    None,
                    None,
                    None,
                    None,
                    Some(&e.to_string()),
                )?;
                self.store.bump_run_progress(run_id, 0.0, 0)?;
            }
            Err(_) => {
                let message = format!(
                    "provider timed out after {}s",
                    self.settings.timeout.as_secs()
                );
                warn!(run_id, test_case_id = tc.id, model = %cfg.model_id, "provider timeout");
                self.store.record_output(
                    run_id,
                    tc.id,
                    &cfg.model_id,
                    None,
                    None,
                    None,
                    None,
                    None,
                    Some(&message),
                )?;
                self.store.bump_run_progress(run_id, 0.0, 0)?;
            }
        }
        Ok(())
    }

    /// Scores every successful output with the named evaluators. Evaluator
    /// faults become indeterminate results; one bad evaluator cannot take
    /// down its siblings.
    async fn evaluate_outputs(
        &self,
        run_id: i64,
        evaluator_names: &[String],
    ) -> Result<Vec<(String, Finding)>, CoreError> {
        let run = self
            .store
            .get_run(run_id)?
            .ok_or_else(|| CoreError::not_found(format!("evaluation run not found: {}", run_id)))?;
        let outputs = self.store.successful_outputs(run_id)?;

        let mut cases: HashMap<i64, TestCase> = HashMap::new();
        for output in &outputs {
            if let std::collections::hash_map::Entry::Vacant(slot) =
                cases.entry(output.test_case_id)
            {
                if let Some(tc) = self.store.get_test_case(output.test_case_id)? {
                    slot.insert(tc);
                }
            }
        }

        let configs: HashMap<String, ModelConfig> = run
            .models
            .iter()
            .map(|m| (m.model_id.clone(), m.clone()))
            .collect();

        let sem = Arc::new(Semaphore::new(self.settings.parallel.max(1)));
        let mut handles = Vec::new();
        for output in outputs {
            let Some(tc) = cases.get(&output.test_case_id).cloned() else {
                continue;
            };
            let cfg = configs
                .get(&output.model)
                .cloned()
                .unwrap_or_else(|| ModelConfig::new(output.model.clone()));
            let names = evaluator_names.to_vec();
            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .map_err(anyhow::Error::from)?;
            let this = self.clone();
            let h = tokio::spawn(async move {
                let _permit = permit;
                this.evaluate_one_output(&output, &tc, &cfg, &names).await
            });
            handles.push(h);
        }

        let mut scored = Vec::new();
        for h in handles {
            let findings = h.await.map_err(anyhow::Error::from)??;
            scored.extend(findings);
        }
        Ok(scored)
    }

    async fn evaluate_one_output(
        &self,
        output: &EvaluationOutput,
        tc: &TestCase,
        cfg: &ModelConfig,
        evaluator_names: &[String],
    ) -> Result<Vec<(String, Finding)>, CoreError> {
        let text = output.response.clone().unwrap_or_default();
        let sampler = Resampler::new(
            self.router.client_for(cfg),
            cfg.clone(),
            self.settings.timeout,
        );
        let ctx = EvalContext::for_case(tc, text).with_sampler(sampler);

        let mut findings = Vec::with_capacity(evaluator_names.len());
        for name in evaluator_names {
            let evaluator = self.registry.resolve(name)?;
            let finding = match evaluator.evaluate(&ctx).await {
                Ok(finding) => finding,
                Err(e) => {
                    warn!(output_id = output.id, evaluator = %name, error = %e, "evaluator fault");
                    Finding::indeterminate(format!("evaluator error: {}", e))
                }
            };
            self.store.upsert_evaluator_result(
                output.id,
                name,
                finding.passed,
                finding.score,
                &finding.details,
                &finding.reasoning,
            )?;
            findings.push((name.clone(), finding));
        }
        Ok(findings)
    }
}
