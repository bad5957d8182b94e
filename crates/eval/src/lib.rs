//! edc-eval: runtime validation and derivation of clinical form data.
//!
//! Takes a form's metadata (see `edc-core`) plus the values entered so far
//! and produces per-field errors and warnings, derived values, triggered
//! data-management queries and completion statistics.
//!
//! Evaluation is pure and synchronous. Malformed rules never abort a
//! validation pass: they are logged and skipped, and the remaining rules
//! still run.
//!
//! The free functions below compile the form on every call. Hosts that
//! validate the same form repeatedly should hold an [`Engine`], which caches
//! compiled forms per `(formId, version)`.

pub mod aggregate;
pub mod compiled;
pub mod config;
pub mod cross_field;
pub mod derive;
pub mod engine;
pub mod expr;
pub mod field;
pub mod numeric;
pub mod queries;
pub mod temporal;
pub mod types;
pub mod visibility;

pub use compiled::{CompiledForm, FormCache};
pub use config::{ConfigError, EngineConfig, SpecialTokens};
pub use derive::{DerivationFailure, DerivationOutcome};
pub use engine::Engine;
pub use expr::Scope;
pub use types::{
    CompletionStats, EvalError, FieldAnnotation, FieldOutcome, Message, MessageKind,
    QueryCandidate, ValidationResult, Value, ValueContext,
};

use edc_core::{ExpressionError, FormMetadata};

/// Validate a whole form instance.
pub fn validate_form(form: &FormMetadata, values: &ValueContext) -> ValidationResult {
    let compiled = CompiledForm::compile(form, &EngineConfig::default());
    aggregate::validate_form(&compiled, values)
}

/// Validate one field as the user changes it. `values` holds the rest of
/// the form; `value` replaces whatever it holds for `field_id`.
pub fn validate_field(
    field_id: &str,
    value: &Value,
    form: &FormMetadata,
    values: &ValueContext,
) -> FieldOutcome {
    let compiled = CompiledForm::compile(form, &EngineConfig::default());
    aggregate::validate_field(&compiled, field_id, value, values)
}

/// Compute every derived field in dependency order.
pub fn resolve_derived(form: &FormMetadata, values: &ValueContext) -> DerivationOutcome {
    let compiled = CompiledForm::compile(form, &EngineConfig::default());
    derive::resolve_derived(&compiled, values)
}

/// Evaluate rule-expression text against a value context.
pub fn evaluate(source: &str, values: &ValueContext) -> Result<Value, ExpressionError> {
    expr::evaluate_text(source, values)
}

// ──────────────────────────────────────────────
// Integration tests
// ──────────────────────────────────────────────
