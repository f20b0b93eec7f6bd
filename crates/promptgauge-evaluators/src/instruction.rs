use async_trait::async_trait;
use promptgauge_core::evaluators_api::{EvalContext, Evaluator, Finding};
use regex::RegexBuilder;
use serde_json::json;

use crate::text::extract_json;

/// Checks output against the structural and content constraints the test
/// case declares: JSON validity plus required fields when
/// `expected_structure` is present, and length / term / pattern rules from
/// `instruction_spec`.
pub struct InstructionAdherenceEvaluator;

#[async_trait]
impl Evaluator for InstructionAdherenceEvaluator {
    fn name(&self) -> &'static str {
        "instruction_adherence"
    }

    fn description(&self) -> &'static str {
        "Checks if output follows structural and content constraints"
    }

    async fn evaluate(&self, ctx: &EvalContext) -> anyhow::Result<Finding> {
        let output = ctx.output.as_str();
        let output_lower = output.to_lowercase();
        let mut issues: Vec<String> = Vec::new();
        let mut checks_passed = 0usize;
        let mut total_checks = 0usize;

        if let Some(structure) = &ctx.expected_structure {
            total_checks += 1;
            match extract_json(output) {
                Ok(data) => {
                    checks_passed += 1;
                    let required: Vec<&str> = structure
                        .get("required")
                        .and_then(|r| r.as_array())
                        .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
                        .unwrap_or_default();
                    if !required.is_empty() {
                        total_checks += 1;
                        let missing: Vec<&str> = required
                            .iter()
                            .filter(|field| {
                                data.get(**field).map(|v| v.is_null()).unwrap_or(true)
                            })
                            .copied()
                            .collect();
                        if missing.is_empty() {
                            checks_passed += 1;
                        } else {
                            issues.push(format!("missing required fields: {:?}", missing));
                        }
                    }
                }
                Err(e) => issues.push(format!("invalid JSON: {}", e)),
            }
        }

        if let Some(spec) = &ctx.instruction_spec {
            if let Some(max) = spec.max_length {
                total_checks += 1;
                if output.chars().count() <= max {
                    checks_passed += 1;
                } else {
                    issues.push(format!(
                        "output too long: {} > {}",
                        output.chars().count(),
                        max
                    ));
                }
            }
            if let Some(min) = spec.min_length {
                total_checks += 1;
                if output.chars().count() >= min {
                    checks_passed += 1;
                } else {
                    issues.push(format!(
                        "output too short: {} < {}",
                        output.chars().count(),
                        min
                    ));
                }
            }
            if !spec.forbidden_terms.is_empty() {
                total_checks += 1;
                let found: Vec<&str> = spec
                    .forbidden_terms
                    .iter()
                    .filter(|t| output_lower.contains(&t.to_lowercase()))
                    .map(|t| t.as_str())
                    .collect();
                if found.is_empty() {
                    checks_passed += 1;
                } else {
                    issues.push(format!("contains forbidden terms: {:?}", found));
                }
            }
            if !spec.required_terms.is_empty() {
                total_checks += 1;
                let missing: Vec<&str> = spec
                    .required_terms
                    .iter()
                    .filter(|t| !output_lower.contains(&t.to_lowercase()))
                    .map(|t| t.as_str())
                    .collect();
                if missing.is_empty() {
                    checks_passed += 1;
                } else {
                    issues.push(format!("missing required terms: {:?}", missing));
                }
            }
            if let Some(pattern) = &spec.regex_match {
                total_checks += 1;
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(re) if re.is_match(output) => checks_passed += 1,
                    Ok(_) => issues.push(format!("does not match required pattern: {}", pattern)),
                    Err(e) => issues.push(format!("invalid pattern {}: {}", pattern, e)),
                }
            }
        }

        // With nothing to check, a non-empty output is the bar.
        if total_checks == 0 {
            total_checks = 1;
            if output.trim().is_empty() {
                issues.push("output is empty".to_string());
            } else {
                checks_passed = 1;
            }
        }

        let score = checks_passed as f64 / total_checks as f64;
        let details = json!({
            "checks_passed": checks_passed,
            "total_checks": total_checks,
            "issues": issues,
            "output_length": output.chars().count(),
        });
        let finding = if issues.is_empty() {
            Finding::pass(score, "all instruction checks passed")
        } else {
            Finding::fail(score, issues.join("; "))
        };
        Ok(finding.with_details(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use promptgauge_core::model::InstructionSpec;

    fn ctx(output: &str) -> EvalContext {
        EvalContext {
            output: output.to_string(),
            prompt: "Extract the name.".to_string(),
            input: "Ada Lovelace, mathematician".to_string(),
            context: None,
            expected_structure: None,
            category: None,
            instruction_spec: None,
            stability_params: None,
            should_refuse: None,
            sampler: None,
        }
    }

    #[tokio::test]
    async fn required_fields_present_passes() {
        let mut c = ctx(r#"{"name": "Ada"}"#);
        c.expected_structure = Some(serde_json::json!({"required": ["name"]}));
        let f = InstructionAdherenceEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(true));
        assert_eq!(f.score, Some(1.0));
    }

    #[tokio::test]
    async fn missing_required_field_fails() {
        let mut c = ctx("{}");
        c.expected_structure = Some(serde_json::json!({"required": ["name"]}));
        let f = InstructionAdherenceEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(false));
        assert_eq!(f.score, Some(0.5));
    }

    #[tokio::test]
    async fn null_required_field_counts_as_missing() {
        let mut c = ctx(r#"{"name": null}"#);
        c.expected_structure = Some(serde_json::json!({"required": ["name"]}));
        let f = InstructionAdherenceEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(false));
    }

    #[tokio::test]
    async fn fenced_json_is_unwrapped() {
        let mut c = ctx("```json\n{\"name\": \"Ada\"}\n```");
        c.expected_structure = Some(serde_json::json!({"required": ["name"]}));
        let f = InstructionAdherenceEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(true));
    }

    #[tokio::test]
    async fn term_and_length_constraints() {
        let mut c = ctx("A short answer about Ada.");
        c.instruction_spec = Some(InstructionSpec {
            max_length: Some(100),
            min_length: None,
            forbidden_terms: vec!["lorem".to_string()],
            required_terms: vec!["ada".to_string()],
            regex_match: None,
        });
        let f = InstructionAdherenceEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(true));
        assert_eq!(f.score, Some(1.0));
    }

    #[tokio::test]
    async fn forbidden_term_fails_with_reason() {
        let mut c = ctx("lorem ipsum text");
        c.instruction_spec = Some(InstructionSpec {
            max_length: None,
            min_length: None,
            forbidden_terms: vec!["lorem".to_string()],
            required_terms: vec![],
            regex_match: None,
        });
        let f = InstructionAdherenceEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(false));
        assert!(f.reasoning.contains("forbidden"));
    }

    #[tokio::test]
    async fn no_constraints_requires_non_empty_output() {
        let f = InstructionAdherenceEvaluator
            .evaluate(&ctx("  \n"))
            .await
            .unwrap();
        assert_eq!(f.passed, Some(false));
        let f = InstructionAdherenceEvaluator
            .evaluate(&ctx("hello"))
            .await
            .unwrap();
        assert_eq!(f.passed, Some(true));
    }
}
