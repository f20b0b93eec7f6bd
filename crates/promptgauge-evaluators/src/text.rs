use regex::Regex;
use std::sync::OnceLock;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").unwrap())
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+\b").unwrap())
}

/// Parses output as JSON, unwrapping a markdown code fence if present.
pub fn extract_json(output: &str) -> Result<serde_json::Value, String> {
    let candidate = fence_re()
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(output);
    serde_json::from_str(candidate.trim()).map_err(|e| e.to_string())
}

pub fn tokenize(text: &str) -> Vec<String> {
    word_re()
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// |A n B| / |A u B| over normalized token sets. Two empty texts count
/// as identical.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let set_a: HashSet<String> = tokenize(a).into_iter().collect();
    let set_b: HashSet<String> = tokenize(b).into_iter().collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

pub fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let out = "Here you go:\n```json\n{\"name\": \"Ada\"}\n```";
        let v = extract_json(out).unwrap();
        assert_eq!(v["name"], "Ada");
    }

    #[test]
    fn jaccard_extremes() {
        assert_eq!(jaccard_similarity("the quick fox", "the quick fox"), 1.0);
        assert_eq!(jaccard_similarity("alpha beta", "gamma delta"), 0.0);
        assert_eq!(jaccard_similarity("", ""), 1.0);
        assert_eq!(jaccard_similarity("something", ""), 0.0);
    }
}
