use async_trait::async_trait;
use promptgauge_core::evaluators_api::{EvalContext, Evaluator, Finding};
use serde_json::{json, Value};

use crate::text::{extract_json, round3};

/// Validates output against `expected_structure` constraints beyond field
/// presence: per-field `minLength`/`maxLength`, `enum`, `minimum`/`maximum`,
/// and `additionalProperties: false` at the top level. Absent fields are
/// skipped here; presence is instruction adherence's job.
pub struct FormatConsistencyEvaluator;

struct ConstraintOutcome {
    satisfied: usize,
    total: usize,
    violated: Vec<String>,
}

fn check_field(name: &str, value: &Value, schema: &Value, out: &mut ConstraintOutcome) {
    if let Some(min) = schema.get("minLength").and_then(|v| v.as_u64()) {
        out.total += 1;
        match value.as_str() {
            Some(s) if s.chars().count() as u64 >= min => out.satisfied += 1,
            _ => out.violated.push(format!("{}.minLength", name)),
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(|v| v.as_u64()) {
        out.total += 1;
        match value.as_str() {
            Some(s) if s.chars().count() as u64 <= max => out.satisfied += 1,
            _ => out.violated.push(format!("{}.maxLength", name)),
        }
    }
    if let Some(allowed) = schema.get("enum").and_then(|v| v.as_array()) {
        out.total += 1;
        if allowed.contains(value) {
            out.satisfied += 1;
        } else {
            out.violated.push(format!("{}.enum", name));
        }
    }
    if let Some(min) = schema.get("minimum").and_then(|v| v.as_f64()) {
        out.total += 1;
        match value.as_f64() {
            Some(n) if n >= min => out.satisfied += 1,
            _ => out.violated.push(format!("{}.minimum", name)),
        }
    }
    if let Some(max) = schema.get("maximum").and_then(|v| v.as_f64()) {
        out.total += 1;
        match value.as_f64() {
            Some(n) if n <= max => out.satisfied += 1,
            _ => out.violated.push(format!("{}.maximum", name)),
        }
    }
}

#[async_trait]
impl Evaluator for FormatConsistencyEvaluator {
    fn name(&self) -> &'static str {
        "format_consistency"
    }

    fn description(&self) -> &'static str {
        "Validates output format against expected structure constraints"
    }

    async fn evaluate(&self, ctx: &EvalContext) -> anyhow::Result<Finding> {
        let Some(structure) = &ctx.expected_structure else {
            return Ok(Finding::pass(1.0, "no expected structure to validate against"));
        };

        let data = match extract_json(&ctx.output) {
            Ok(v) => v,
            Err(e) => {
                return Ok(Finding::fail(0.0, format!("invalid JSON: {}", e))
                    .with_details(json!({"valid_json": false})))
            }
        };

        let mut out = ConstraintOutcome {
            satisfied: 0,
            total: 0,
            violated: Vec::new(),
        };

        let properties = structure.get("properties").and_then(|p| p.as_object());
        if let Some(props) = properties {
            for (field, field_schema) in props {
                // Only validate fields that actually appear in the output.
                if let Some(value) = data.get(field) {
                    if !value.is_null() {
                        check_field(field, value, field_schema, &mut out);
                    }
                }
            }
        }

        if structure.get("additionalProperties") == Some(&Value::Bool(false)) {
            out.total += 1;
            let allowed: Vec<&str> = properties
                .map(|p| p.keys().map(|k| k.as_str()).collect())
                .unwrap_or_default();
            let extras: Vec<&str> = data
                .as_object()
                .map(|o| {
                    o.keys()
                        .map(|k| k.as_str())
                        .filter(|k| !allowed.contains(k))
                        .collect()
                })
                .unwrap_or_default();
            if extras.is_empty() {
                out.satisfied += 1;
            } else {
                out.violated.push("additionalProperties".to_string());
            }
        }

        let score = if out.total == 0 {
            1.0
        } else {
            round3(out.satisfied as f64 / out.total as f64)
        };
        let details = json!({
            "valid_json": true,
            "constraints_satisfied": out.satisfied,
            "constraints_total": out.total,
            "violated": out.violated,
        });
        let finding = if out.violated.is_empty() {
            Finding::pass(score, "output satisfies all structure constraints")
        } else {
            Finding::fail(score, format!("violated constraints: {}", out.violated.join(", ")))
        };
        Ok(finding.with_details(details))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(output: &str, structure: Value) -> EvalContext {
        EvalContext {
            output: output.to_string(),
            prompt: String::new(),
            input: String::new(),
            context: None,
            expected_structure: Some(structure),
            category: None,
            instruction_spec: None,
            stability_params: None,
            should_refuse: None,
            sampler: None,
        }
    }

    #[tokio::test]
    async fn passes_without_expected_structure() {
        let mut c = ctx("plain text", json!({}));
        c.expected_structure = None;
        let f = FormatConsistencyEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(true));
        assert_eq!(f.score, Some(1.0));
    }

    #[tokio::test]
    async fn invalid_json_scores_zero() {
        let c = ctx("not json at all", json!({"properties": {}}));
        let f = FormatConsistencyEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(false));
        assert_eq!(f.score, Some(0.0));
    }

    #[tokio::test]
    async fn enum_and_range_violations_are_named() {
        let structure = json!({
            "properties": {
                "status": {"enum": ["ok", "error"]},
                "count": {"minimum": 0, "maximum": 10},
            }
        });
        let c = ctx(r#"{"status": "weird", "count": 42}"#, structure);
        let f = FormatConsistencyEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(false));
        assert!(f.reasoning.contains("status.enum"));
        assert!(f.reasoning.contains("count.maximum"));
        // minimum satisfied, enum and maximum violated
        assert_eq!(f.score, Some(round3(1.0 / 3.0)));
    }

    #[tokio::test]
    async fn absent_field_is_skipped() {
        let structure = json!({
            "properties": {"summary": {"minLength": 5}}
        });
        let c = ctx(r#"{"other": 1}"#, structure);
        let f = FormatConsistencyEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(true));
        assert_eq!(f.score, Some(1.0));
    }

    #[tokio::test]
    async fn additional_properties_false_rejects_extras() {
        let structure = json!({
            "properties": {"name": {}},
            "additionalProperties": false,
        });
        let c = ctx(r#"{"name": "Ada", "age": 36}"#, structure);
        let f = FormatConsistencyEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(false));
        assert!(f.reasoning.contains("additionalProperties"));
    }

    #[tokio::test]
    async fn string_length_bounds() {
        let structure = json!({
            "properties": {"summary": {"minLength": 3, "maxLength": 10}}
        });
        let c = ctx(r#"{"summary": "short"}"#, structure);
        let f = FormatConsistencyEvaluator.evaluate(&c).await.unwrap();
        assert_eq!(f.passed, Some(true));
        assert_eq!(f.score, Some(1.0));
    }
}
