//! The long-lived validation engine: configuration plus a compiled-form
//! cache shared by every call.

use std::sync::Arc;

use edc_core::FormMetadata;

use crate::aggregate;
use crate::compiled::{CompiledForm, FormCache};
use crate::config::{ConfigError, EngineConfig};
use crate::derive::{self, DerivationOutcome};
use crate::types::{FieldOutcome, ValidationResult, Value, ValueContext};

/// Entry point for hosts that validate many forms over time.
///
/// Forms are compiled on first use and cached by `(formId, version)`. The
/// engine is `Send + Sync`; share it behind an `Arc` across request threads.
#[derive(Debug, Default)]
pub struct Engine {
    config: EngineConfig,
    cache: FormCache,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Engine {
            config,
            cache: FormCache::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &FormCache {
        &self.cache
    }

    /// The compiled form for `form`, compiling it if this version is new.
    pub fn compile(&self, form: &FormMetadata) -> Arc<CompiledForm> {
        self.cache.get_or_compile(form, &self.config)
    }

    pub fn validate_form(&self, form: &FormMetadata, values: &ValueContext) -> ValidationResult {
        aggregate::validate_form(&self.compile(form), values)
    }

    pub fn validate_field(
        &self,
        form: &FormMetadata,
        field_id: &str,
        value: &Value,
        values: &ValueContext,
    ) -> FieldOutcome {
        aggregate::validate_field(&self.compile(form), field_id, value, values)
    }

    pub fn resolve_derived(&self, form: &FormMetadata, values: &ValueContext) -> DerivationOutcome {
        derive::resolve_derived(&self.compile(form), values)
    }
}
