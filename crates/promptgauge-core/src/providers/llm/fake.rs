use super::{ClientRouter, Completion, ModelClient};
use crate::model::ModelConfig;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Deterministic offline client for tests and dry runs. Rules are matched
/// against the prompt in order; the first hit wins.
pub struct FakeClient {
    default_reply: String,
    rules: Vec<FakeRule>,
    calls: AtomicUsize,
}

pub struct FakeRule {
    pub needle: String,
    pub outcome: FakeOutcome,
}

pub enum FakeOutcome {
    Reply(String),
    Fail(String),
}

impl FakeClient {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            default_reply: default_reply.into(),
            rules: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn reply_when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push(FakeRule {
            needle: needle.into(),
            outcome: FakeOutcome::Reply(reply.into()),
        });
        self
    }

    pub fn fail_when(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push(FakeRule {
            needle: needle.into(),
            outcome: FakeOutcome::Fail(message.into()),
        });
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for FakeClient {
    async fn invoke(&self, prompt: &str, _config: &ModelConfig) -> anyhow::Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = match self.rules.iter().find(|r| prompt.contains(&r.needle)) {
            Some(rule) => match &rule.outcome {
                FakeOutcome::Reply(reply) => reply.clone(),
                FakeOutcome::Fail(message) => anyhow::bail!("{}", message),
            },
            None => self.default_reply.clone(),
        };
        let output_tokens = text.split_whitespace().count() as i64;
        let input_tokens = prompt.split_whitespace().count() as i64;
        Ok(Completion {
            text,
            input_tokens,
            output_tokens,
            latency_ms: 3,
            cost_usd: (input_tokens + output_tokens) as f64 * 1e-6,
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

/// Routes every model to the same fake client.
pub struct FakeRouter {
    pub client: Arc<FakeClient>,
}

impl FakeRouter {
    pub fn new(client: FakeClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

impl ClientRouter for FakeRouter {
    fn client_for(&self, _config: &ModelConfig) -> Arc<dyn ModelClient> {
        self.client.clone()
    }
}
