//! Whole-form and incremental validation.
//!
//! `validate_form` runs, in order: derivation, per-field validation of every
//! visible field, cross-field and duplicate rules, auto-query detection and
//! completion counting, then merges everything into one [`ValidationResult`].

use std::collections::{BTreeMap, BTreeSet};

use edc_core::FieldMetadata;

use crate::compiled::CompiledForm;
use crate::cross_field;
use crate::derive;
use crate::field;
use crate::queries;
use crate::types::{
    CompletionStats, FieldAnnotation, FieldOutcome, Message, ValidationResult, Value,
    ValueContext,
};
use crate::visibility;

pub fn validate_form(compiled: &CompiledForm, values: &ValueContext) -> ValidationResult {
    let _span = tracing::debug_span!(
        "validate_form",
        form = compiled.form_id(),
        version = %compiled.metadata().version
    )
    .entered();

    let derivation = derive::resolve_derived(compiled, values);
    let context = &derivation.context;
    let hidden = visibility::hidden_fields(compiled, context);
    tracing::trace!(hidden = hidden.len(), "visibility resolved");

    let mut merged = Merged::default();
    let mut completion = CompletionStats::default();

    for field in compiled.fields() {
        if hidden.contains(&field.id) {
            continue;
        }
        let value = context.get(&field.id).cloned().unwrap_or(Value::Null);
        let report = field::check_field(compiled, field, &value, context);
        if !field.is_derived() {
            completion.total_fields += 1;
            completion.completed_fields += usize::from(report.answered);
            if report.required {
                completion.required_fields += 1;
                completion.required_completed += usize::from(report.answered);
            }
        }
        merged.add(report.outcome);
    }
    tracing::trace!("field validation done");

    for outcome in cross_field::validate_cross_field(
        compiled,
        compiled.cross_field_rules(),
        context,
        &hidden,
    ) {
        merged.add(outcome);
    }
    for outcome in cross_field::check_duplicates(compiled, context, &hidden) {
        merged.add(outcome);
    }
    tracing::trace!("cross-field validation done");

    let triggered_queries = queries::scan_auto_queries(compiled, context, &hidden);

    let annotations = merged
        .field_ids()
        .filter_map(|id| compiled.field(id))
        .map(|f| (f.id.clone(), annotate(f)))
        .collect();

    let valid = merged.errors.is_empty();
    tracing::debug!(
        valid,
        errors = merged.errors.values().map(Vec::len).sum::<usize>(),
        warnings = merged.warnings.values().map(Vec::len).sum::<usize>(),
        queries = triggered_queries.len(),
        "form validated"
    );

    ValidationResult {
        valid,
        field_errors: merged.errors,
        field_warnings: merged.warnings,
        triggered_queries,
        completion,
        derivation_cycles: derivation.cycle_errors,
        derived_values: derivation.derived,
        annotations,
    }
}

/// Validate one field on change: its own rules plus every cross-field and
/// duplicate rule that involves it. Derived values are recomputed with the
/// candidate in place first, so rules see current derivations.
///
/// An unknown field id or a hidden field yields an empty outcome.
pub fn validate_field(
    compiled: &CompiledForm,
    field_id: &str,
    value: &Value,
    values: &ValueContext,
) -> FieldOutcome {
    let Some(field) = compiled.field(field_id) else {
        tracing::warn!(form = compiled.form_id(), field = field_id, "unknown field");
        return FieldOutcome::new(field_id);
    };
    let context = derive::resolve_derived(compiled, &values.with(field_id, value.clone())).context;
    let hidden = visibility::hidden_fields(compiled, &context);
    if hidden.contains(field_id) {
        return FieldOutcome::new(field_id);
    }

    let value = context.get(field_id).cloned().unwrap_or(Value::Null);
    let mut outcome = field::check_field(compiled, field, &value, &context).outcome;
    let related = compiled
        .cross_field_rules()
        .iter()
        .filter(|r| r.related_field_ids.iter().any(|f| f == field_id));
    let cross = cross_field::validate_cross_field(compiled, related, &context, &hidden);
    let duplicates = cross_field::check_duplicates(compiled, &context, &hidden);
    for other in cross.into_iter().chain(duplicates) {
        if other.field_id == field_id {
            outcome.extend(other);
        }
    }
    outcome
}

fn annotate(field: &FieldMetadata) -> FieldAnnotation {
    FieldAnnotation {
        critical: field.clinical.critical_data_point,
        safety: field.clinical.safety_data_point,
        requires_review: field.clinical.requires_review(),
    }
}

/// Per-field message buckets; fields with no messages have no entry.
#[derive(Default)]
struct Merged {
    errors: BTreeMap<String, Vec<Message>>,
    warnings: BTreeMap<String, Vec<Message>>,
}

impl Merged {
    fn add(&mut self, outcome: FieldOutcome) {
        if !outcome.errors.is_empty() {
            self.errors
                .entry(outcome.field_id.clone())
                .or_default()
                .extend(outcome.errors);
        }
        if !outcome.warnings.is_empty() {
            self.warnings
                .entry(outcome.field_id)
                .or_default()
                .extend(outcome.warnings);
        }
    }

    fn field_ids(&self) -> impl Iterator<Item = &str> {
        self.errors
            .keys()
            .chain(self.warnings.keys())
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use edc_core::FormMetadata;
    use serde_json::json;

    fn compile(fields: serde_json::Value) -> CompiledForm {
        let form: FormMetadata =
            serde_json::from_value(json!({"formId": "F", "fields": fields})).unwrap();
        CompiledForm::compile(&form, &EngineConfig::new())
    }

    fn ctx(v: serde_json::Value) -> ValueContext {
        ValueContext::from_json(&v).unwrap()
    }

    #[test]
    fn hidden_fields_skip_required_checks() {
        let c = compile(json!([
            {"id": "SMOKE", "type": "radio", "options": [{"value": "Y"}, {"value": "N"}]},
            {"id": "PACKYRS", "type": "number", "validation": {"required": true},
             "display": {"conditionalDisplay": {"field": "SMOKE", "operator": "equals", "value": "Y"}}}
        ]));
        let result = validate_form(&c, &ctx(json!({"SMOKE": "N"})));
        assert!(result.valid);
        assert_eq!(result.completion.total_fields, 1);

        let result = validate_form(&c, &ctx(json!({"SMOKE": "Y"})));
        assert!(!result.valid);
        assert_eq!(result.errors_for("PACKYRS")[0].text, "PACKYRS is required");
    }

    #[test]
    fn derived_values_are_validated() {
        let c = compile(json!([
            {"id": "A", "type": "number"},
            {"id": "B", "type": "number", "validation": {"maxValue": 10},
             "derivation": {"formula": "A * 3", "dependencies": ["A"]}}
        ]));
        let result = validate_form(&c, &ctx(json!({"A": 4})));
        assert_eq!(result.errors_for("B")[0].text, "B must be at most 10");
        assert_eq!(result.derived_number("B"), Some(12.into()));
    }

    #[test]
    fn completion_counts_effective_requirements() {
        let c = compile(json!([
            {"id": "A", "type": "text", "validation": {"required": true}},
            {"id": "B", "type": "text"},
            {"id": "C", "type": "text", "validation": {"conditionalRules": [
                {"condition": "B = 'yes'", "rules": {"required": true}}
            ]}},
            {"id": "D", "type": "number", "derivation": {"formula": "1", "dependencies": []}}
        ]));
        let result = validate_form(&c, &ctx(json!({"A": "x", "B": "yes"})));
        assert_eq!(
            result.completion,
            CompletionStats {
                total_fields: 3,
                completed_fields: 2,
                required_fields: 2,
                required_completed: 1,
            }
        );
    }

    #[test]
    fn annotations_cover_fields_with_messages() {
        let c = compile(json!([
            {"id": "AE", "type": "text", "validation": {"required": true},
             "clinical": {"safetyDataPoint": true, "sdvRequired": true}},
            {"id": "OK", "type": "text", "clinical": {"criticalDataPoint": true}}
        ]));
        let result = validate_form(&c, &ctx(json!({"OK": "x"})));
        assert_eq!(result.annotations.len(), 1);
        assert_eq!(
            result.annotations["AE"],
            FieldAnnotation {
                critical: false,
                safety: true,
                requires_review: true
            }
        );
    }

    #[test]
    fn validate_field_includes_related_cross_field_rules() {
        let c = compile(json!([
            {"id": "start", "type": "date", "dataQuality": {"crossFieldValidation": [{
                "id": "ORDER", "relatedFieldIds": ["start", "end"],
                "expression": "start < end", "message": "Start must be before end"
            }]}},
            {"id": "end", "type": "date"},
            {"id": "other", "type": "text", "validation": {"required": true}}
        ]));
        let values = ctx(json!({"start": "2024-01-10"}));
        let outcome = validate_field(&c, "end", &Value::text("2024-01-01"), &values);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].rule_id.as_deref(), Some("ORDER"));

        let outcome = validate_field(&c, "end", &Value::text("2024-02-01"), &values);
        assert!(outcome.is_empty());
    }

    #[test]
    fn validate_field_sees_recomputed_derivations() {
        let c = compile(json!([
            {"id": "DOSE", "type": "number"},
            {"id": "DAILY", "type": "number",
             "derivation": {"formula": "DOSE * 3", "dependencies": ["DOSE"]}},
            {"id": "MAXDAILY", "type": "number", "validation": {"customRules": [
                {"id": "CAP", "expression": "value >= DAILY", "message": "Daily dose exceeds the cap"}
            ]}}
        ]));
        let stale = ctx(json!({"DOSE": 50, "DAILY": 1}));
        let outcome = validate_field(&c, "MAXDAILY", &Value::from(100i64), &stale);
        assert_eq!(outcome.errors[0].text, "Daily dose exceeds the cap");

        let outcome = validate_field(&c, "MAXDAILY", &Value::from(150i64), &stale);
        assert!(outcome.is_empty());
    }

    #[test]
    fn display_expressions_treat_missing_and_null_alike() {
        let c = compile(json!([
            {"id": "SMOKE", "type": "radio", "options": [{"value": "Y"}, {"value": "N"}]},
            {"id": "PACKYRS", "type": "number", "validation": {"required": true},
             "display": {"conditionalDisplay": {"expression": "SMOKE = 'Y'"}}}
        ]));
        let missing = validate_form(&c, &ctx(json!({})));
        let null = validate_form(&c, &ctx(json!({"SMOKE": null})));
        assert!(missing.valid);
        assert_eq!(missing, null);
    }

    #[test]
    fn validate_field_unknown_id_is_empty() {
        let c = compile(json!([{"id": "A", "type": "text"}]));
        let outcome = validate_field(&c, "NOPE", &Value::text("x"), &ValueContext::new());
        assert!(outcome.is_empty());
        assert_eq!(outcome.field_id, "NOPE");
    }
}
