use async_trait::async_trait;
use promptgauge_core::evaluators_api::{EvalContext, Evaluator, Finding};
use promptgauge_core::model::StabilityParams;
use serde_json::json;
use tracing::debug;

use crate::text::{jaccard_similarity, round3};

/// Re-invokes the model at the temperatures the test case asks for and
/// measures how far the resamples drift from the original output. The score
/// is the worst (minimum) pairwise Jaccard similarity, so one wild resample
/// is enough to fail the check.
pub struct OutputStabilityEvaluator {
    pub min_similarity: f64,
}

impl Default for OutputStabilityEvaluator {
    fn default() -> Self {
        Self {
            min_similarity: 0.5,
        }
    }
}

#[async_trait]
impl Evaluator for OutputStabilityEvaluator {
    fn name(&self) -> &'static str {
        "output_stability"
    }

    fn description(&self) -> &'static str {
        "Measures consistency of outputs across repeated sampling"
    }

    async fn evaluate(&self, ctx: &EvalContext) -> anyhow::Result<Finding> {
        let Some(sampler) = &ctx.sampler else {
            return Ok(Finding::indeterminate(
                "no model access available for resampling",
            ));
        };

        let params = ctx.stability_params.clone().unwrap_or_default();
        let StabilityParams {
            temperatures,
            samples_per_temp,
        } = params;

        let mut similarities: Vec<f64> = Vec::new();
        let mut failed = 0usize;
        let mut attempted = 0usize;
        for temp in &temperatures {
            for _ in 0..samples_per_temp {
                attempted += 1;
                match sampler.resample(&ctx.prompt, &ctx.input, *temp).await {
                    Ok(text) => {
                        similarities.push(round3(jaccard_similarity(&ctx.output, &text)));
                    }
                    Err(e) => {
                        debug!(temperature = temp, error = %e, "resample failed");
                        failed += 1;
                    }
                }
            }
        }

        if similarities.is_empty() {
            return Ok(Finding::indeterminate(format!(
                "all {} resamples failed",
                attempted
            )));
        }

        let min_similarity = similarities
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let passed = min_similarity >= self.min_similarity;
        let details = json!({
            "resample_count": similarities.len(),
            "failed_resamples": failed,
            "similarities": similarities,
            "min_similarity": min_similarity,
            "threshold": self.min_similarity,
        });
        let reasoning = format!(
            "minimum similarity {:.3} across {} resamples ({})",
            min_similarity,
            similarities.len(),
            if passed { "stable" } else { "below threshold" },
        );
        let finding = if passed {
            Finding::pass(min_similarity, reasoning)
        } else {
            Finding::fail(min_similarity, reasoning)
        };
        Ok(finding.with_details(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptgauge_core::evaluators_api::Resampler;
    use promptgauge_core::model::ModelConfig;
    use promptgauge_core::providers::llm::FakeClient;
    use std::sync::Arc;
    use std::time::Duration;

    fn ctx_with(client: FakeClient, output: &str) -> EvalContext {
        let sampler = Resampler::new(
            Arc::new(client),
            ModelConfig::new("gpt-4o-mini"),
            Duration::from_secs(5),
        );
        EvalContext {
            output: output.to_string(),
            prompt: "Summarize the input.".to_string(),
            input: "the quick brown fox".to_string(),
            context: None,
            expected_structure: None,
            category: None,
            instruction_spec: None,
            stability_params: Some(StabilityParams {
                temperatures: vec![0.0, 1.0],
                samples_per_temp: 1,
            }),
            should_refuse: None,
            sampler: Some(sampler),
        }
    }

    #[tokio::test]
    async fn identical_resamples_pass_with_full_score() {
        let ctx = ctx_with(FakeClient::new("the quick brown fox"), "the quick brown fox");
        let f = OutputStabilityEvaluator::default().evaluate(&ctx).await.unwrap();
        assert_eq!(f.passed, Some(true));
        assert_eq!(f.score, Some(1.0));
    }

    #[tokio::test]
    async fn disjoint_resamples_fail() {
        let ctx = ctx_with(FakeClient::new("entirely different words"), "the quick brown fox");
        let f = OutputStabilityEvaluator::default().evaluate(&ctx).await.unwrap();
        assert_eq!(f.passed, Some(false));
        assert_eq!(f.score, Some(0.0));
    }

    #[tokio::test]
    async fn no_sampler_is_indeterminate() {
        let mut ctx = ctx_with(FakeClient::new("x"), "x");
        ctx.sampler = None;
        let f = OutputStabilityEvaluator::default().evaluate(&ctx).await.unwrap();
        assert_eq!(f.passed, None);
        assert_eq!(f.score, None);
    }

    #[tokio::test]
    async fn all_resamples_failing_is_indeterminate() {
        let client = FakeClient::new("unused").fail_when("Summarize", "provider down");
        let ctx = ctx_with(client, "some output");
        let f = OutputStabilityEvaluator::default().evaluate(&ctx).await.unwrap();
        assert_eq!(f.passed, None);
        assert!(f.reasoning.contains("resamples failed"));
    }
}
