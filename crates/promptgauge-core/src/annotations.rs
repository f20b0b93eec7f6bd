use crate::errors::CoreError;
use crate::storage::store::Store;
use serde::Serialize;
use std::collections::BTreeMap;

/// Maps a free-text human label onto a pass/fail verdict. Labels outside
/// the known vocabulary are excluded from accuracy, not counted against it.
pub fn normalize_label(label: &str) -> Option<bool> {
    match label.trim().to_lowercase().as_str() {
        "correct" | "pass" | "passed" | "yes" | "true" | "ok" => Some(true),
        "incorrect" | "fail" | "failed" | "no" | "false" | "hallucinated" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluatorAgreement {
    pub evaluator_name: String,
    pub total: u32,
    pub agreed: u32,
    /// Percentage of compared pairs where the automated verdict matched
    /// the human label.
    pub accuracy: f64,
    pub human_true: u32,
    pub human_false: u32,
    pub auto_true: u32,
    pub auto_false: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccuracyReport {
    pub evaluators: Vec<EvaluatorAgreement>,
    pub total_compared: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Reconciles human annotations against automated verdicts on the same
/// output, joined where the annotation type names the evaluator.
pub fn compute_accuracy(store: &Store) -> Result<AccuracyReport, CoreError> {
    let pairs = store.annotation_pairs()?;

    let mut stats: BTreeMap<String, EvaluatorAgreement> = BTreeMap::new();
    for pair in pairs {
        let Some(human) = normalize_label(&pair.label) else {
            continue;
        };
        let entry = stats
            .entry(pair.evaluator_name.clone())
            .or_insert_with(|| EvaluatorAgreement {
                evaluator_name: pair.evaluator_name.clone(),
                ..Default::default()
            });
        entry.total += 1;
        if human {
            entry.human_true += 1;
        } else {
            entry.human_false += 1;
        }
        match pair.auto_passed {
            Some(true) => entry.auto_true += 1,
            Some(false) => entry.auto_false += 1,
            None => {}
        }
        if pair.auto_passed == Some(human) {
            entry.agreed += 1;
        }
    }

    let mut evaluators: Vec<EvaluatorAgreement> = stats.into_values().collect();
    for e in &mut evaluators {
        if e.total > 0 {
            e.accuracy = (e.agreed as f64 / e.total as f64 * 1000.0).round() / 10.0;
        }
    }
    evaluators.sort_by(|a, b| {
        b.accuracy
            .partial_cmp(&a.accuracy)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total_compared = evaluators.iter().map(|e| e.total).sum();
    let note = if total_compared == 0 {
        Some(
            "no annotations with comparable labels; expected one of \
             correct/incorrect, pass/fail, yes/no, true/false, ok, hallucinated"
                .to_string(),
        )
    } else {
        None
    };

    Ok(AccuracyReport {
        evaluators,
        total_compared,
        note,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_vocabulary() {
        assert_eq!(normalize_label("Correct"), Some(true));
        assert_eq!(normalize_label(" ok "), Some(true));
        assert_eq!(normalize_label("hallucinated"), Some(false));
        assert_eq!(normalize_label("FAIL"), Some(false));
        assert_eq!(normalize_label("meh"), None);
        assert_eq!(normalize_label(""), None);
    }
}
