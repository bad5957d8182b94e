//! Reading form definitions, value files and engine configuration.
//!
//! Every loader returns a ready-to-print message on failure.

use std::path::Path;

use edc_core::FormMetadata;
use edc_eval::{EngineConfig, ValueContext};

pub(crate) fn load_form(path: &Path) -> Result<FormMetadata, String> {
    let text = read(path, "form")?;
    serde_json::from_str(&text)
        .map_err(|e| format!("error: invalid form metadata in {}: {}", path.display(), e))
}

pub(crate) fn load_values(path: &Path) -> Result<ValueContext, String> {
    let text = read(path, "values")?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| format!("error: invalid JSON in {}: {}", path.display(), e))?;
    ValueContext::from_json(&json).map_err(|e| format!("error: {}: {}", path.display(), e))
}

/// The engine configuration from `path`, or the defaults when none is given.
pub(crate) fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = read(path, "config")?;
    let config: EngineConfig = toml::from_str(&text)
        .map_err(|e| format!("error: invalid config in {}: {}", path.display(), e))?;
    config
        .validate()
        .map_err(|e| format!("error: invalid config in {}: {}", path.display(), e))?;
    tracing::debug!(path = %path.display(), "engine config loaded");
    Ok(config)
}

fn read(path: &Path, what: &str) -> Result<String, String> {
    std::fs::read_to_string(path)
        .map_err(|e| format!("error: cannot read {} file {}: {}", what, path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use edc_core::Severity;
    use std::io::Write;

    fn temp_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn config_from_toml() {
        let file = temp_file(
            "max_nesting_depth = 8\nduplicate_severity = \"error\"\n\n[na_tokens]\nunknown = \"UNKNOWN\"\n",
        );
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.limits.max_nesting_depth, 8);
        assert_eq!(config.limits.max_expression_len, 4096);
        assert_eq!(config.duplicate_severity, Severity::Error);
        assert_eq!(config.na_tokens.unknown, "UNKNOWN");
        assert_eq!(config.na_tokens.not_done, "ND");
    }

    #[test]
    fn zero_limit_is_rejected() {
        let file = temp_file("max_expression_len = 0\n");
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(err.contains("max_expression_len must be greater than zero"), "{err}");
    }

    #[test]
    fn values_must_be_an_object() {
        let file = temp_file("[1, 2]");
        assert!(load_values(file.path()).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_form(Path::new("does/not/exist.json")).unwrap_err();
        assert!(err.contains("does/not/exist.json"), "{err}");
    }
}
