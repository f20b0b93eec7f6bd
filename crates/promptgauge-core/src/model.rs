use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub prompt: String,
    pub input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_structure: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_spec: Option<InstructionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability_params: Option<StabilityParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_refuse: Option<bool>,
}

impl TestCase {
    /// Whether a refusal/abstention is the expected behavior. The explicit
    /// `should_refuse` flag wins over category inference.
    pub fn expects_refusal(&self) -> bool {
        if let Some(flag) = self.should_refuse {
            return flag;
        }
        let category = self.category.as_deref().unwrap_or("").to_lowercase();
        category.contains("safety") || category.contains("refusal") || category.contains("policy")
    }
}

/// Extra instruction-adherence constraints beyond `expected_structure`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstructionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_terms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_terms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_match: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StabilityParams {
    #[serde(default = "default_temperatures")]
    pub temperatures: Vec<f64>,
    #[serde(default = "default_samples_per_temp")]
    pub samples_per_temp: u32,
}

impl Default for StabilityParams {
    fn default() -> Self {
        Self {
            temperatures: default_temperatures(),
            samples_per_temp: default_samples_per_temp(),
        }
    }
}

fn default_temperatures() -> Vec<f64> {
    vec![0.0, 0.5, 1.0]
}

fn default_samples_per_temp() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub model_id: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    1024
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
        }
    }

    /// Same model with a different sampling temperature (used by re-sampling
    /// evaluators and the deterministic judge).
    pub fn at_temperature(&self, temperature: f64) -> Self {
        Self {
            temperature,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => RunStatus::Pending,
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            _ => RunStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub id: i64,
    pub prompt_version: String,
    pub models: Vec<ModelConfig>,
    pub status: RunStatus,
    pub started_at: String,
    pub total_cost_usd: f64,
    pub total_duration_ms: i64,
    pub test_case_count: i64,
    pub completed_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EvaluationRun {
    /// Number of dispatch units: test cases crossed with model configs.
    pub fn unit_count(&self) -> i64 {
        self.test_case_count * self.models.len() as i64
    }
}

/// One dispatch unit's persisted outcome. `response` is null exactly when
/// `error` is set; the (run, test_case, model) triple is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationOutput {
    pub id: i64,
    pub run_id: i64,
    pub test_case_id: i64,
    pub model: String,
    pub response: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub latency_ms: Option<i64>,
    pub cost_usd: Option<f64>,
    pub error: Option<String>,
    pub created_at: String,
}

impl EvaluationOutput {
    pub fn is_success(&self) -> bool {
        self.response.is_some() && self.error.is_none()
    }
}

/// An evaluator's verdict for one output. `passed` is tri-state:
/// `None` means the evaluator could not responsibly assert either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorResult {
    pub id: i64,
    pub output_id: i64,
    pub evaluator_name: String,
    pub passed: Option<bool>,
    pub score: Option<f64>,
    #[serde(default)]
    pub details: serde_json::Value,
    pub reasoning: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanAnnotation {
    pub id: i64,
    pub output_id: i64,
    pub annotation_type: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: String,
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
