use crate::errors::CoreError;
use crate::model::{InstructionSpec, ModelConfig, StabilityParams, TestCase};
use crate::providers::llm::ModelClient;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// The prompt a dispatch unit actually sends: template plus case input.
pub fn dispatch_prompt(prompt: &str, input: &str) -> String {
    format!("{}\n\nInput: {}", prompt, input)
}

/// Everything an evaluator may look at for one output. Evaluators are pure
/// over this context; the only side channel is the optional [`Resampler`]
/// for nested model calls.
#[derive(Clone)]
pub struct EvalContext {
    pub output: String,
    pub prompt: String,
    pub input: String,
    pub context: Option<String>,
    pub expected_structure: Option<serde_json::Value>,
    pub category: Option<String>,
    pub instruction_spec: Option<InstructionSpec>,
    pub stability_params: Option<StabilityParams>,
    pub should_refuse: Option<bool>,
    pub sampler: Option<Resampler>,
}

impl EvalContext {
    pub fn for_case(test_case: &TestCase, output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            prompt: test_case.prompt.clone(),
            input: test_case.input.clone(),
            context: test_case.context.clone(),
            expected_structure: test_case.expected_structure.clone(),
            category: test_case.category.clone(),
            instruction_spec: test_case.instruction_spec.clone(),
            stability_params: test_case.stability_params.clone(),
            should_refuse: test_case.should_refuse,
            sampler: None,
        }
    }

    pub fn with_sampler(mut self, sampler: Resampler) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn expects_refusal(&self) -> bool {
        if let Some(flag) = self.should_refuse {
            return flag;
        }
        let category = self.category.as_deref().unwrap_or("").to_lowercase();
        category.contains("safety") || category.contains("refusal") || category.contains("policy")
    }
}

/// Re-invocation capability bound to the model config that produced the
/// output under evaluation. Every nested call carries its own deadline; a
/// timeout is a scoring failure for that sub-check, never a process fault.
#[derive(Clone)]
pub struct Resampler {
    client: Arc<dyn ModelClient>,
    config: ModelConfig,
    deadline: Duration,
}

impl Resampler {
    pub fn new(client: Arc<dyn ModelClient>, config: ModelConfig, deadline: Duration) -> Self {
        Self {
            client,
            config,
            deadline,
        }
    }

    /// Re-run the original prompt at a different temperature.
    pub async fn resample(
        &self,
        prompt: &str,
        input: &str,
        temperature: f64,
    ) -> anyhow::Result<String> {
        let cfg = self.config.at_temperature(temperature);
        let dispatched = dispatch_prompt(prompt, input);
        let fut = self.client.invoke(&dispatched, &cfg);
        let completion = timeout(self.deadline, fut)
            .await
            .map_err(|_| anyhow::anyhow!("resample timed out after {:?}", self.deadline))??;
        Ok(completion.text)
    }

    /// Deterministic judge call (temperature 0) for LLM-as-judge checks.
    pub async fn judge(&self, prompt: &str) -> anyhow::Result<String> {
        let cfg = self.config.at_temperature(0.0);
        let fut = self.client.invoke(prompt, &cfg);
        let completion = timeout(self.deadline, fut)
            .await
            .map_err(|_| anyhow::anyhow!("judge call timed out after {:?}", self.deadline))??;
        Ok(completion.text)
    }
}

/// An evaluator's verdict before it is persisted. `passed: None` is the
/// indeterminate state: the evaluator could not responsibly decide.
#[derive(Debug, Clone)]
pub struct Finding {
    pub passed: Option<bool>,
    pub score: Option<f64>,
    pub details: serde_json::Value,
    pub reasoning: String,
}

impl Finding {
    pub fn pass(score: f64, reasoning: impl Into<String>) -> Self {
        Self {
            passed: Some(true),
            score: Some(score),
            details: serde_json::json!({}),
            reasoning: reasoning.into(),
        }
    }

    pub fn fail(score: f64, reasoning: impl Into<String>) -> Self {
        Self {
            passed: Some(false),
            score: Some(score),
            details: serde_json::json!({}),
            reasoning: reasoning.into(),
        }
    }

    pub fn indeterminate(reasoning: impl Into<String>) -> Self {
        Self {
            passed: None,
            score: None,
            details: serde_json::json!({}),
            reasoning: reasoning.into(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Must tolerate arbitrary output text. An `Err` here is converted by
    /// the orchestrator into an indeterminate result, not propagated.
    async fn evaluate(&self, ctx: &EvalContext) -> anyhow::Result<Finding>;
}

pub type EvaluatorCtor = Box<dyn Fn() -> Arc<dyn Evaluator> + Send + Sync>;

#[derive(Debug, Clone, serde::Serialize)]
pub struct EvaluatorInfo {
    pub name: String,
    pub description: String,
}

/// Name-keyed catalog of evaluator constructors. Adding an evaluator means
/// one implementation plus one `register` call; the orchestrator is never
/// touched.
#[derive(Default)]
pub struct Registry {
    ctors: BTreeMap<String, EvaluatorCtor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, ctor: EvaluatorCtor) {
        self.ctors.insert(name.into(), ctor);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctors.contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Evaluator>, CoreError> {
        self.ctors
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| CoreError::not_found(format!("unknown evaluator: {}", name)))
    }

    pub fn names(&self) -> Vec<String> {
        self.ctors.keys().cloned().collect()
    }

    pub fn list(&self) -> Vec<EvaluatorInfo> {
        self.ctors
            .values()
            .map(|ctor| {
                let e = ctor();
                EvaluatorInfo {
                    name: e.name().to_string(),
                    description: e.description().to_string(),
                }
            })
            .collect()
    }
}
