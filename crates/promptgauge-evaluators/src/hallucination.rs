use async_trait::async_trait;
use promptgauge_core::evaluators_api::{EvalContext, Evaluator, Finding};
use serde_json::json;
use tracing::debug;

use crate::text::round3;

/// The two-step judge protocol: extract factual claims, then verify each
/// against the grounding context. Templates are swappable for callers that
/// want a different judge phrasing.
pub struct JudgePolicy {
    pub extraction_template: &'static str,
    pub verification_template: &'static str,
}

const EXTRACTION_TEMPLATE: &str = "Analyze the following response and extract all factual claims made.\n\
A factual claim is any statement that asserts something as true or false about the world.\n\n\
Response to analyze:\n{response}\n\n\
List each factual claim on a new line, numbered. Only include explicit claims, not opinions or hedged statements.\n\
If there are no factual claims, respond with \"NO CLAIMS\".\n\n\
Claims:";

const VERIFICATION_TEMPLATE: &str = "You are a fact-checker. Determine if each claim is supported by the provided context.\n\n\
Context (source of truth):\n{context}\n\n\
Claims to verify:\n{claims}\n\n\
For each claim, respond with:\n\
- SUPPORTED: if the claim is directly supported by the context\n\
- NOT SUPPORTED: if the claim contradicts or is not mentioned in the context\n\
- PARTIALLY SUPPORTED: if only part of the claim is supported\n\n\
Format your response as:\n\
1. [SUPPORTED/NOT SUPPORTED/PARTIALLY SUPPORTED] - Brief explanation\n\
2. [SUPPORTED/NOT SUPPORTED/PARTIALLY SUPPORTED] - Brief explanation\n\
...\n\n\
Verification:";

impl Default for JudgePolicy {
    fn default() -> Self {
        Self {
            extraction_template: EXTRACTION_TEMPLATE,
            verification_template: VERIFICATION_TEMPLATE,
        }
    }
}

impl JudgePolicy {
    fn extraction_prompt(&self, response: &str) -> String {
        self.extraction_template.replace("{response}", response)
    }

    fn verification_prompt(&self, context: &str, claims: &str) -> String {
        self.verification_template
            .replace("{context}", context)
            .replace("{claims}", claims)
    }
}

#[derive(Debug, Default)]
struct VerdictTally {
    supported: usize,
    not_supported: usize,
    partially_supported: usize,
    hallucinations: Vec<String>,
}

/// Parses numbered verdict lines. "NOT SUPPORTED" must be checked before
/// "SUPPORTED" since the latter is a substring of the former.
fn tally_verdicts(verification: &str) -> VerdictTally {
    let mut tally = VerdictTally::default();
    for line in verification.lines() {
        let line = line.trim();
        if !line.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            continue;
        }
        let upper = line.to_uppercase();
        if upper.contains("NOT SUPPORTED") {
            tally.not_supported += 1;
            tally.hallucinations.push(line.to_string());
        } else if upper.contains("PARTIALLY SUPPORTED") {
            tally.partially_supported += 1;
        } else if upper.contains("SUPPORTED") {
            tally.supported += 1;
        }
    }
    tally
}

/// Detects claims in the output that the grounding context does not support,
/// using a deterministic judge call for extraction and verification. Without
/// context (or without model access) the verdict is indeterminate, never a
/// fabricated pass.
#[derive(Default)]
pub struct HallucinationEvaluator {
    policy: JudgePolicy,
}

impl HallucinationEvaluator {
    pub fn with_policy(policy: JudgePolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Evaluator for HallucinationEvaluator {
    fn name(&self) -> &'static str {
        "hallucination"
    }

    fn description(&self) -> &'static str {
        "Detects claims not grounded in the provided context"
    }

    async fn evaluate(&self, ctx: &EvalContext) -> anyhow::Result<Finding> {
        let Some(context) = ctx.context.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Ok(Finding::indeterminate("no grounding context provided"));
        };
        let Some(sampler) = &ctx.sampler else {
            return Ok(Finding::indeterminate(
                "no model access available for judge calls",
            ));
        };

        let claims_text = match sampler.judge(&self.policy.extraction_prompt(&ctx.output)).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                debug!(error = %e, "claim extraction failed");
                return Ok(Finding::indeterminate(format!(
                    "claim extraction failed: {}",
                    e
                )));
            }
        };

        if claims_text.to_uppercase().contains("NO CLAIMS") {
            return Ok(Finding::pass(1.0, "no factual claims found in response")
                .with_details(json!({"claims_found": 0, "hallucinations": []})));
        }

        let verification = match sampler
            .judge(&self.policy.verification_prompt(context, &claims_text))
            .await
        {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "claim verification failed");
                return Ok(Finding::indeterminate(format!(
                    "claim verification failed: {}",
                    e
                )));
            }
        };

        let tally = tally_verdicts(&verification);
        let total = tally.supported + tally.not_supported + tally.partially_supported;
        if total == 0 {
            return Ok(Finding::indeterminate(
                "judge returned no parseable claim verdicts",
            ));
        }

        let score = round3(
            (tally.supported as f64 + 0.5 * tally.partially_supported as f64) / total as f64,
        );
        let passed = tally.not_supported == 0;
        let reasoning = if passed {
            "all claims grounded in context".to_string()
        } else {
            format!("{} hallucinated claims found", tally.not_supported)
        };
        let details = json!({
            "claims_found": total,
            "supported": tally.supported,
            "partially_supported": tally.partially_supported,
            "not_supported": tally.not_supported,
            "hallucinations": tally.hallucinations,
        });
        let finding = if passed {
            Finding::pass(score, reasoning)
        } else {
            Finding::fail(score, reasoning)
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

    fn ctx_with(client: FakeClient, context: Option<&str>) -> EvalContext {
        let sampler = Resampler::new(
            Arc::new(client),
            ModelConfig::new("claude-sonnet-4"),
            Duration::from_secs(5),
        );
        EvalContext {
            output: "Paris is the capital of France. It has 40 million residents.".to_string(),
            prompt: String::new(),
            input: String::new(),
            context: context.map(String::from),
            expected_structure: None,
            category: None,
            instruction_spec: None,
            stability_params: None,
            should_refuse: None,
            sampler: Some(sampler),
        }
    }

    #[tokio::test]
    async fn missing_context_is_indeterminate() {
        let ctx = ctx_with(FakeClient::new("unused"), None);
        let f = HallucinationEvaluator::default().evaluate(&ctx).await.unwrap();
        assert_eq!(f.passed, None);
        assert_eq!(f.reasoning, "no grounding context provided");
    }

    #[tokio::test]
    async fn no_claims_passes() {
        let client = FakeClient::new("unused").reply_when("extract all factual claims", "NO CLAIMS");
        let ctx = ctx_with(client, Some("Paris facts."));
        let f = HallucinationEvaluator::default().evaluate(&ctx).await.unwrap();
        assert_eq!(f.passed, Some(true));
        assert_eq!(f.score, Some(1.0));
    }

    #[tokio::test]
    async fn unsupported_claim_fails_with_mixed_score() {
        let client = FakeClient::new("unused")
            .reply_when(
                "extract all factual claims",
                "1. Paris is the capital of France.\n2. Paris has 40 million residents.",
            )
            .reply_when(
                "You are a fact-checker",
                "1. SUPPORTED - stated in context\n2. NOT SUPPORTED - context says 2 million",
            );
        let ctx = ctx_with(client, Some("Paris is the capital of France, population about 2 million."));
        let f = HallucinationEvaluator::default().evaluate(&ctx).await.unwrap();
        assert_eq!(f.passed, Some(false));
        assert_eq!(f.score, Some(0.5));
        assert!(f.reasoning.contains("1 hallucinated"));
    }

    #[tokio::test]
    async fn partial_support_scores_half_weight() {
        let client = FakeClient::new("unused")
            .reply_when("extract all factual claims", "1. A claim.\n2. Another claim.")
            .reply_when(
                "You are a fact-checker",
                "1. SUPPORTED - ok\n2. PARTIALLY SUPPORTED - partly",
            );
        let ctx = ctx_with(client, Some("grounding text"));
        let f = HallucinationEvaluator::default().evaluate(&ctx).await.unwrap();
        assert_eq!(f.passed, Some(true));
        assert_eq!(f.score, Some(0.75));
    }

    #[tokio::test]
    async fn judge_failure_is_indeterminate() {
        let client = FakeClient::new("unused").fail_when("extract all factual claims", "judge down");
        let ctx = ctx_with(client, Some("grounding text"));
        let f = HallucinationEvaluator::default().evaluate(&ctx).await.unwrap();
        assert_eq!(f.passed, None);
        assert!(f.reasoning.contains("claim extraction failed"));
    }

    #[tokio::test]
    async fn unparseable_verdicts_are_indeterminate() {
        let client = FakeClient::new("unused")
            .reply_when("extract all factual claims", "1. A claim.")
            .reply_when("You are a fact-checker", "I cannot verify these claims.");
        let ctx = ctx_with(client, Some("grounding text"));
        let f = HallucinationEvaluator::default().evaluate(&ctx).await.unwrap();
        assert_eq!(f.passed, None);
    }
}
