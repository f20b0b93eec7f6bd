use super::{Completion, ModelClient};
use crate::model::ModelConfig;
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;

const INPUT_USD_PER_MTOK: f64 = 3.00;
const OUTPUT_USD_PER_MTOK: f64 = 15.00;

pub struct AnthropicClient {
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ModelClient for AnthropicClient {
    async fn invoke(&self, prompt: &str, config: &ModelConfig) -> anyhow::Result<Completion> {
        let url = "https://api.anthropic.com/v1/messages";
        let body = json!({
            "model": config.model_id,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let start = Instant::now();
        let resp = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic messages API error: {}", error_text);
        }

        let json: serde_json::Value = resp.json().await?;
        let latency_ms = start.elapsed().as_millis() as i64;

        let text = json
            .pointer("/content/0/text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Anthropic API response missing text content"))?
            .to_string();

        let input_tokens = json
            .pointer("/usage/input_tokens")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let output_tokens = json
            .pointer("/usage/output_tokens")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        Ok(Completion {
            text,
            input_tokens,
            output_tokens,
            latency_ms,
            cost_usd: (input_tokens as f64 * INPUT_USD_PER_MTOK
                + output_tokens as f64 * OUTPUT_USD_PER_MTOK)
                / 1_000_000.0,
        })
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}
