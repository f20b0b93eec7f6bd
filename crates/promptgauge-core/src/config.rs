use crate::engine::RunSettings;
use crate::errors::CoreError;
use crate::model::{ModelConfig, TestCase};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// YAML suite file consumed by the CLI: test cases, model configs and run
/// settings for one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub prompt_version: String,
    pub models: Vec<ModelConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluators: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "is_default_settings")]
    pub settings: SuiteSettings,
    pub tests: Vec<TestCase>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SuiteSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regression_threshold: Option<f64>,
}

fn is_default_settings(s: &SuiteSettings) -> bool {
    s == &SuiteSettings::default()
}

impl SuiteSettings {
    pub fn run_settings(&self) -> RunSettings {
        let defaults = RunSettings::default();
        RunSettings {
            parallel: self.parallel.unwrap_or(defaults.parallel),
            timeout: self
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

pub fn load_suite(path: &Path) -> Result<SuiteConfig, CoreError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        CoreError::validation(format!("failed to read suite {}: {}", path.display(), e))
    })?;
    let cfg: SuiteConfig = serde_yaml::from_str(&raw)
        .map_err(|e| CoreError::validation(format!("failed to parse YAML: {}", e)))?;

    if cfg.tests.is_empty() {
        return Err(CoreError::validation("suite has no tests"));
    }
    if cfg.models.is_empty() {
        return Err(CoreError::validation("suite has no models"));
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_suite() {
        let yaml = r#"
prompt_version: v2
models:
  - model_id: gpt-4o-mini
    temperature: 0.2
tests:
  - prompt: "Summarize the text."
    input: "Rust is a systems language."
    category: accuracy
"#;
        let cfg: SuiteConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.prompt_version, "v2");
        assert_eq!(cfg.models[0].max_tokens, 1024);
        assert_eq!(cfg.tests.len(), 1);
        assert!(cfg.evaluators.is_none());
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let s = SuiteSettings {
            parallel: Some(2),
            timeout_seconds: None,
            regression_threshold: None,
        };
        let rs = s.run_settings();
        assert_eq!(rs.parallel, 2);
        assert_eq!(rs.timeout, Duration::from_secs(30));
    }
}
