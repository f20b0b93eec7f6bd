use super::{Completion, ModelClient};
use crate::model::ModelConfig;
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

// Rough per-million-token pricing used when the API does not return cost.
const INPUT_USD_PER_MTOK: f64 = 2.50;
const OUTPUT_USD_PER_MTOK: f64 = 10.00;

pub struct OpenAIClient {
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAIClient {
    async fn invoke(&self, prompt: &str, config: &ModelConfig) -> anyhow::Result<Completion> {
        let url = "https://api.openai.com/v1/chat/completions";
        let body = json!({
            "model": config.model_id,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": config.temperature,
            "max_tokens": config.max_tokens,
        });

        let start = Instant::now();
        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI chat API error: {}", error_text);
        }

        let json: serde_json::Value = resp.json().await?;
        let latency_ms = start.elapsed().as_millis() as i64;

        let text = json
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("OpenAI API response missing content"))?
            .to_string();

        let input_tokens = json
            .pointer("/usage/prompt_tokens")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let output_tokens = json
            .pointer("/usage/completion_tokens")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        Ok(Completion {
            text,
            input_tokens,
            output_tokens,
            latency_ms,
            cost_usd: estimate_cost(input_tokens, output_tokens),
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

fn estimate_cost(input_tokens: i64, output_tokens: i64) -> f64 {
    (input_tokens as f64 * INPUT_USD_PER_MTOK + output_tokens as f64 * OUTPUT_USD_PER_MTOK)
        / 1_000_000.0
}
