//! Engine configuration.

use edc_core::{ParseLimits, Severity};
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::temporal;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{setting} must be greater than zero")]
    ZeroLimit { setting: &'static str },
    #[error("na_tokens.{token} must not be empty")]
    EmptyToken { token: &'static str },
    #[error("na_tokens {first} and {second} are both '{value}'")]
    DuplicateToken {
        first: &'static str,
        second: &'static str,
        value: String,
    },
    #[error("reference_date '{value}' is not a YYYY-MM-DD date")]
    InvalidReferenceDate { value: String },
}

/// Sentinel texts accepted as special responses when a field allows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialTokens {
    pub not_applicable: String,
    pub not_done: String,
    pub unknown: String,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        SpecialTokens {
            not_applicable: "NA".to_owned(),
            not_done: "ND".to_owned(),
            unknown: "UNK".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(flatten)]
    pub limits: ParseLimits,
    /// Severity of duplicate-value messages.
    pub duplicate_severity: Severity,
    pub na_tokens: SpecialTokens,
    /// The "today" that date checks compare against, `YYYY-MM-DD`. Unset
    /// means the current UTC date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_date: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            limits: ParseLimits::default(),
            duplicate_severity: Severity::Warning,
            na_tokens: SpecialTokens::default(),
            reference_date: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the reference date, e.g. for reproducible runs.
    pub fn with_reference_date(mut self, date: Date) -> Self {
        self.reference_date = Some(temporal::format_date(date));
        self
    }

    /// The date that future and far-past checks are measured from.
    pub fn today(&self) -> Date {
        self.reference_date
            .as_deref()
            .and_then(temporal::parse_date)
            .unwrap_or_else(|| OffsetDateTime::now_utc().date())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_expression_len == 0 {
            return Err(ConfigError::ZeroLimit {
                setting: "max_expression_len",
            });
        }
        if self.limits.max_nesting_depth == 0 {
            return Err(ConfigError::ZeroLimit {
                setting: "max_nesting_depth",
            });
        }
        if let Some(date) = &self.reference_date {
            if date.len() != 10 || temporal::parse_date(date).is_none() {
                return Err(ConfigError::InvalidReferenceDate {
                    value: date.clone(),
                });
            }
        }
        let tokens: [(&'static str, &str); 3] = [
            ("not_applicable", &self.na_tokens.not_applicable),
            ("not_done", &self.na_tokens.not_done),
            ("unknown", &self.na_tokens.unknown),
        ];
        for (i, &(name, value)) in tokens.iter().enumerate() {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyToken { token: name });
            }
            for &(other, other_value) in &tokens[..i] {
                if other_value.eq_ignore_ascii_case(value) {
                    return Err(ConfigError::DuplicateToken {
                        first: other,
                        second: name,
                        value: value.to_owned(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.limits.max_expression_len, 4096);
        assert_eq!(config.limits.max_nesting_depth, 64);
        assert_eq!(config.duplicate_severity, Severity::Warning);
        assert_eq!(config.na_tokens.not_done, "ND");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialized_defaults_match_new() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::new());
    }

    #[test]
    fn rejects_zero_limits() {
        let mut config = EngineConfig::new();
        config.limits.max_nesting_depth = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroLimit {
                setting: "max_nesting_depth"
            })
        );
    }

    #[test]
    fn reference_date_pins_today() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"reference_date": "2025-03-01"}"#).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(temporal::format_date(config.today()), "2025-03-01");

        let pinned = EngineConfig::new().with_reference_date(config.today());
        assert_eq!(pinned.reference_date.as_deref(), Some("2025-03-01"));

        let bad = EngineConfig {
            reference_date: Some("03/01/2025".to_owned()),
            ..EngineConfig::new()
        };
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvalidReferenceDate { .. })
        ));
    }

    #[test]
    fn rejects_colliding_tokens() {
        let mut config = EngineConfig::new();
        config.na_tokens.unknown = "na".to_owned();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateToken { first: "not_applicable", .. })
        ));
    }
}
