//! Derived-field resolution.
//!
//! Derived fields are evaluated in the topological order of the compiled
//! derivation graph. Each formula sees the context as already updated by
//! every field before it, so derived fields can feed later ones. Fields in
//! a cycle, or downstream of one, are left exactly as the caller supplied
//! them.

use std::collections::BTreeMap;

use edc_core::{DerivationCycleError, ExpressionError, FieldMetadata};
use serde::Serialize;

use crate::compiled::CompiledForm;
use crate::expr::{self, Scope};
use crate::numeric;
use crate::types::{Value, ValueContext};

/// A formula that could not be evaluated; the field is set to `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivationFailure {
    pub field_id: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: ExpressionError,
}

fn serialize_error<S: serde::Serializer>(e: &ExpressionError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(e)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivationOutcome {
    /// The input context with every resolvable derived field overwritten.
    pub context: ValueContext,
    /// Computed values, including `null` for failed formulas.
    pub derived: BTreeMap<String, Value>,
    pub cycle_errors: Vec<DerivationCycleError>,
    pub failures: Vec<DerivationFailure>,
}

pub fn resolve_derived(compiled: &CompiledForm, context: &ValueContext) -> DerivationOutcome {
    let graph = compiled.graph();
    let mut updated = context.clone();
    let mut derived = BTreeMap::new();
    let mut failures = Vec::new();

    for node in graph.topological_order() {
        let result = compiled
            .expression(&node.formula)
            .and_then(|e| expr::evaluate(&e, &Scope::new(&updated)));
        let value = match result {
            Ok(v) => match compiled.field(&node.field_id) {
                Some(field) => fit_to_field(field, v),
                None => v,
            },
            Err(error) => {
                tracing::debug!(
                    form = compiled.form_id(),
                    field = %node.field_id,
                    error = %error,
                    "derivation failed; field set to null"
                );
                failures.push(DerivationFailure {
                    field_id: node.field_id.clone(),
                    error,
                });
                Value::Null
            }
        };
        updated.insert(node.field_id.clone(), value.clone());
        derived.insert(node.field_id.clone(), value);
    }

    let blocked: Vec<&str> = graph.blocked_fields().collect();
    if !blocked.is_empty() {
        tracing::debug!(
            form = compiled.form_id(),
            fields = ?blocked,
            "derived fields downstream of a cycle left unresolved"
        );
    }

    DerivationOutcome {
        context: updated,
        derived,
        cycle_errors: graph.cycles().to_vec(),
        failures,
    }
}

/// Round a computed number to the field's declared decimal places.
fn fit_to_field(field: &FieldMetadata, value: Value) -> Value {
    match (value, field.validation.decimal_places) {
        (Value::Number(n), Some(places)) => Value::Number(numeric::round(n, places)),
        (value, _) => value,
    }
}
