//! Design-time checks over a form definition.
//!
//! Everything the engine tolerates at entry time (broken expressions, unknown
//! references, derivation cycles) is reported here so the metadata owner can
//! fix it before the form version is released.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::ast::Expression;
use crate::graph::DerivationGraph;
use crate::metadata::{DisplayCondition, FieldMetadata, FormMetadata, ValidationSpec};
use crate::parser::ParseLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub message: String,
}

impl Diagnostic {
    fn error(field: Option<&str>, rule: Option<&str>, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: DiagnosticSeverity::Error,
            field: field.map(str::to_owned),
            rule: rule.map(str::to_owned),
            message: message.into(),
        }
    }

    fn warning(field: Option<&str>, rule: Option<&str>, message: impl Into<String>) -> Self {
        Diagnostic {
            severity: DiagnosticSeverity::Warning,
            ..Diagnostic::error(field, rule, message)
        }
    }
}

static ISO_DATE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("Invalid ISO date regex"));

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|d| d.severity == DiagnosticSeverity::Error)
}

/// Run every design-time check. Diagnostics are returned in field
/// declaration order, form-level findings last.
pub fn lint_form(form: &FormMetadata, limits: &ParseLimits) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let known: BTreeSet<&str> = form.fields.iter().map(|f| f.id.as_str()).collect();

    let mut seen = BTreeSet::new();
    for field in &form.fields {
        if !seen.insert(field.id.as_str()) {
            out.push(Diagnostic::error(
                Some(&field.id),
                None,
                format!("duplicate field id '{}'", field.id),
            ));
        }
        lint_field(field, &known, limits, &mut out);
    }

    for rule in form.cross_field_rules() {
        for id in &rule.related_field_ids {
            if !known.contains(id.as_str()) {
                out.push(Diagnostic::error(
                    None,
                    Some(&rule.id),
                    format!("cross-field rule names unknown field '{}'", id),
                ));
            }
        }
        check_expression(&rule.expression, None, Some(&rule.id), &known, limits, &mut out);
    }

    let graph = DerivationGraph::build(&form.fields);
    for cycle in graph.cycles() {
        out.push(Diagnostic::error(None, None, cycle.to_string()));
    }
    for blocked in graph.blocked_fields() {
        out.push(Diagnostic::warning(
            Some(blocked),
            None,
            "derived field depends on a derivation cycle and will never be computed",
        ));
    }

    out
}

fn lint_field(
    field: &FieldMetadata,
    known: &BTreeSet<&str>,
    limits: &ParseLimits,
    out: &mut Vec<Diagnostic>,
) {
    let id = Some(field.id.as_str());
    lint_spec(&field.validation, id, known, limits, out);

    for cond in &field.validation.conditional_rules {
        check_expression(&cond.condition, id, None, known, limits, out);
        lint_spec(&cond.rules, id, known, limits, out);
        if !cond.rules.conditional_rules.is_empty() {
            out.push(Diagnostic::warning(
                id,
                None,
                "nested conditional rules are ignored at entry time",
            ));
        }
    }

    if let Some(DisplayCondition::Expression { expression }) = &field.display.conditional_display
    {
        check_expression(expression, id, None, known, limits, out);
    }
    if let Some(DisplayCondition::Comparison { field: other, .. }) =
        &field.display.conditional_display
    {
        if !known.contains(other.as_str()) {
            out.push(Diagnostic::error(
                id,
                None,
                format!("conditional display refers to unknown field '{}'", other),
            ));
        }
    }

    if let Some(spec) = &field.derivation {
        for dep in &spec.dependencies {
            if !known.contains(dep.as_str()) {
                out.push(Diagnostic::error(
                    id,
                    None,
                    format!("derivation depends on unknown field '{}'", dep),
                ));
            }
        }
        if let Some(expr) = check_expression(&spec.formula, id, None, known, limits, out) {
            for r in expr.referenced_fields() {
                if !spec.dependencies.iter().any(|d| d == r) {
                    out.push(Diagnostic::warning(
                        id,
                        None,
                        format!("formula reads '{}' which is not a declared dependency", r),
                    ));
                }
            }
        }
    }

    for rule in &field.query.auto_query_rules {
        check_expression(&rule.condition, id, Some(&rule.id), known, limits, out);
    }

    if let Some(dup) = &field.data_quality.duplicate_check {
        for other in &dup.fields {
            if !known.contains(other.as_str()) {
                out.push(Diagnostic::error(
                    id,
                    None,
                    format!("duplicate check names unknown field '{}'", other),
                ));
            }
        }
    }
}

fn lint_spec(
    spec: &ValidationSpec,
    field: Option<&str>,
    known: &BTreeSet<&str>,
    limits: &ParseLimits,
    out: &mut Vec<Diagnostic>,
) {
    if let Some(pattern) = &spec.pattern {
        if let Err(e) = Regex::new(pattern) {
            out.push(Diagnostic::error(
                field,
                None,
                format!("invalid pattern '{}': {}", pattern, e),
            ));
        }
    }
    if let (Some(min), Some(max)) = (spec.min_length, spec.max_length) {
        if min > max {
            out.push(Diagnostic::warning(field, None, "minLength exceeds maxLength"));
        }
    }
    if let (Some(min), Some(max)) = (spec.min_value, spec.max_value) {
        if min > max {
            out.push(Diagnostic::warning(field, None, "minValue exceeds maxValue"));
        }
    }
    for (name, bound) in [("minDate", &spec.min_date), ("maxDate", &spec.max_date)] {
        if let Some(date) = bound.as_deref().filter(|d| !ISO_DATE_REGEX.is_match(d)) {
            out.push(Diagnostic::error(
                field,
                None,
                format!("{} '{}' is not a YYYY-MM-DD date", name, date),
            ));
        }
    }
    if let (Some(min), Some(max)) = (&spec.min_date, &spec.max_date) {
        // ISO dates order lexically
        if min > max {
            out.push(Diagnostic::warning(field, None, "minDate is after maxDate"));
        }
    }
    for rule in &spec.custom_rules {
        check_expression(&rule.expression, field, Some(&rule.id), known, limits, out);
    }
}

fn check_expression(
    text: &str,
    field: Option<&str>,
    rule: Option<&str>,
    known: &BTreeSet<&str>,
    limits: &ParseLimits,
    out: &mut Vec<Diagnostic>,
) -> Option<Expression> {
    match Expression::parse_with_limits(text, limits) {
        Ok(expr) => {
            for r in expr.referenced_fields() {
                if !known.contains(r) {
                    out.push(Diagnostic::error(
                        field,
                        rule,
                        format!("expression '{}' references unknown field '{}'", text, r),
                    ));
                }
            }
            Some(expr)
        }
        Err(e) => {
            out.push(Diagnostic::error(
                field,
                rule,
                format!("expression '{}' does not parse: {}", text, e),
            ));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form(value: serde_json::Value) -> FormMetadata {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn clean_form_has_no_diagnostics() {
        let f = form(json!({
            "formId": "dm",
            "fields": [
                { "id": "birth_date", "type": "date" },
                { "id": "visit_date", "type": "date" },
                {
                    "id": "age",
                    "type": "number",
                    "derivation": {
                        "formula": "date_diff(birth_date, visit_date, 'years')",
                        "dependencies": ["birth_date", "visit_date"]
                    },
                    "validation": {
                        "customRules": [
                            { "id": "adult", "expression": "value >= 18", "message": "Subject must be an adult" }
                        ]
                    }
                }
            ]
        }));
        assert!(lint_form(&f, &ParseLimits::default()).is_empty());
    }

    #[test]
    fn reports_authoring_defects() {
        let f = form(json!({
            "formId": "bad",
            "fields": [
                {
                    "id": "a",
                    "type": "text",
                    "validation": {
                        "customRules": [
                            { "id": "r1", "expression": "a ===", "message": "m" },
                            { "id": "r2", "expression": "ghost > 1", "message": "m" }
                        ]
                    }
                },
                { "id": "c", "type": "number", "derivation": { "formula": "d", "dependencies": ["d"] } },
                { "id": "d", "type": "number", "derivation": { "formula": "c", "dependencies": ["c"] } },
                { "id": "a", "type": "text" }
            ]
        }));
        let diags = lint_form(&f, &ParseLimits::default());
        assert!(has_errors(&diags));
        let messages: Vec<&str> = diags.iter().map(|d| d.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.starts_with("invalid pattern")));
        assert!(messages.iter().any(|m| m.contains("does not parse")));
        assert!(messages
            .iter()
            .any(|m| m.contains("references unknown field 'ghost'")));
        assert!(messages.iter().any(|m| *m == "duplicate field id 'a'"));
        assert!(messages
            .iter()
            .any(|m| *m == "derivation cycle detected involving fields [c, d]"));
    }

    #[test]
    fn undeclared_formula_dependency_is_a_warning() {
        let f = form(json!({
            "formId": "vs",
            "fields": [
                { "id": "weight", "type": "number" },
                { "id": "height", "type": "number" },
                { "id": "bmi", "type": "number", "derivation": { "formula": "weight / (height * height)", "dependencies": ["weight"] } }
            ]
        }));
        let diags = lint_form(&f, &ParseLimits::default());
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, DiagnosticSeverity::Warning);
        assert_eq!(diags[0].field.as_deref(), Some("bmi"));
        assert!(!has_errors(&diags));
    }

    #[test]
    fn date_bounds_must_be_iso_dates() {
        let f = form(json!({
            "formId": "ae",
            "fields": [
                { "id": "onset", "type": "date", "validation": { "minDate": "01/01/2020", "maxDate": "2024-12-31" } },
                { "id": "stop", "type": "date", "validation": { "minDate": "2025-01-01", "maxDate": "2024-01-01" } }
            ]
        }));
        let diags = lint_form(&f, &ParseLimits::default());
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0].severity, DiagnosticSeverity::Error);
        assert_eq!(diags[0].message, "minDate '01/01/2020' is not a YYYY-MM-DD date");
        assert_eq!(diags[1].severity, DiagnosticSeverity::Warning);
        assert_eq!(diags[1].field.as_deref(), Some("stop"));
    }
}
