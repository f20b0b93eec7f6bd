use crate::model::ModelConfig;
use async_trait::async_trait;
use std::sync::Arc;

pub mod anthropic;
pub mod fake;
pub mod openai;

pub use fake::{FakeClient, FakeRouter};

/// A single model invocation's observable result.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub latency_ms: i64,
    pub cost_usd: f64,
}

/// The sole seam to provider SDKs: given a prompt and a model config,
/// return text plus usage, or fail. Callers bound every invocation with
/// `tokio::time::timeout`.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(&self, prompt: &str, config: &ModelConfig) -> anyhow::Result<Completion>;
    fn provider_name(&self) -> &'static str;
}

/// Resolves a model config to a client. Injected into the orchestrator so
/// tests can route every model to a scripted fake.
pub trait ClientRouter: Send + Sync {
    fn client_for(&self, config: &ModelConfig) -> Arc<dyn ModelClient>;
}

/// Substring routing over the model identifier: `claude` goes to the
/// Anthropic client, everything else (gpt, o1, unknown) to OpenAI.
pub struct DefaultRouter {
    pub openai_api_key: String,
    pub anthropic_api_key: String,
}

impl DefaultRouter {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
        }
    }
}

impl ClientRouter for DefaultRouter {
    fn client_for(&self, config: &ModelConfig) -> Arc<dyn ModelClient> {
        let model_id = config.model_id.to_lowercase();
        if model_id.contains("claude") {
            Arc::new(anthropic::AnthropicClient::new(
                self.anthropic_api_key.clone(),
            ))
        } else {
            Arc::new(openai::OpenAIClient::new(self.openai_api_key.clone()))
        }
    }
}
