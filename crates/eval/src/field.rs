//! Per-field validation.
//!
//! Checks run in a fixed order, and messages keep that order:
//!
//! 1. required
//! 2. type / format (data type, option membership, pattern)
//! 3. bounds (length, numeric range, decimal places, sign, dates), then
//!    range checks
//! 4. custom rules
//! 5. conditional rules, each an extra pass of 1-4 with the nested spec
//!
//! An empty value skips steps 2-3 but still runs 4-5. A conditional pass only
//! checks what its nested rules declare, and only on a value whose base format
//! passed; the defaults implied by the field kind belong to the base pass.

use std::borrow::Cow;
use std::sync::LazyLock;

use edc_core::{
    CustomRule, DataType, FieldKind, FieldMetadata, RangeAction, RangeCheck, RangeKind, Severity,
    ValidationSpec,
};
use regex::Regex;
use rust_decimal::Decimal;
use time::Date;

use crate::compiled::CompiledForm;
use crate::config::SpecialTokens;
use crate::expr::{self, Scope};
use crate::temporal;
use crate::types::{FieldOutcome, Message, MessageKind, Value, ValueContext};

static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Invalid email regex"));

static PHONE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9][0-9 ().\-]{5,19}$").expect("Invalid phone regex"));

static URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("Invalid URL regex"));

/// Which rule set a structural check is working from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// The field's own rules plus what its kind implies.
    Base,
    /// An active conditional rule's nested rules, nothing else.
    Conditional,
}

/// What one pass over a field found, beyond its messages.
#[derive(Debug, Clone)]
pub(crate) struct FieldReport {
    pub outcome: FieldOutcome,
    /// Required by the base rules or by an active conditional rule.
    pub required: bool,
    /// Holds a real answer or an accepted special response.
    pub answered: bool,
}

/// Validate one field's candidate `value` against its metadata.
///
/// `context` supplies the other fields' values; the candidate is merged in
/// before any expression runs.
pub(crate) fn check_field(
    compiled: &CompiledForm,
    field: &FieldMetadata,
    value: &Value,
    context: &ValueContext,
) -> FieldReport {
    let merged: Cow<'_, ValueContext> = if context.get(&field.id) == Some(value) {
        Cow::Borrowed(context)
    } else {
        Cow::Owned(context.with(&field.id, value.clone()))
    };
    let scope = Scope::with_current(&merged, value);

    let special = is_special_response(field, value, &compiled.config().na_tokens);
    let empty = !special && is_empty_for(&field.kind, value);
    let mut outcome = FieldOutcome::new(&field.id);
    let mut required = field.validation.required;

    // 1
    if required && empty && !field.is_derived() {
        outcome.push(required_message(field));
    }
    // 2-3
    let well_formed = !empty
        && !special
        && check_structure(compiled, field, &field.validation, Pass::Base, value, &mut outcome);
    if well_formed {
        check_ranges(field, value, &mut outcome);
    }
    // 4
    apply_custom_rules(compiled, field, &field.validation.custom_rules, &scope, &mut outcome);
    // 5
    for (index, cond) in field.validation.conditional_rules.iter().enumerate() {
        let active = compiled
            .expression(&cond.condition)
            .and_then(|e| expr::evaluate_condition(&e, &scope));
        match active {
            Ok(true) => {
                let nested = &cond.rules;
                if nested.required {
                    if !required && empty && !field.is_derived() {
                        outcome.push(required_message(field));
                    }
                    required = true;
                }
                if well_formed {
                    check_structure(
                        compiled,
                        field,
                        nested,
                        Pass::Conditional,
                        value,
                        &mut outcome,
                    );
                }
                apply_custom_rules(compiled, field, &nested.custom_rules, &scope, &mut outcome);
            }
            Ok(false) => {}
            Err(e) => tracing::debug!(
                form = compiled.form_id(),
                field = %field.id,
                conditional = index,
                error = %e,
                "conditional rule skipped"
            ),
        }
    }

    FieldReport {
        outcome,
        required,
        answered: !empty,
    }
}

/// Emptiness as the required check sees it. An unchecked checkbox is empty.
pub(crate) fn is_empty_for(kind: &FieldKind, value: &Value) -> bool {
    match kind {
        FieldKind::Checkbox => match value.as_bool() {
            Some(checked) => !checked,
            None => value.is_blank(),
        },
        _ => value.is_blank(),
    }
}

fn is_special_response(field: &FieldMetadata, value: &Value, tokens: &SpecialTokens) -> bool {
    let Value::Text(text) = value else {
        return false;
    };
    let text = text.trim();
    let entry = &field.data_entry;
    (entry.allow_na && text.eq_ignore_ascii_case(&tokens.not_applicable))
        || (entry.allow_not_done && text.eq_ignore_ascii_case(&tokens.not_done))
        || (entry.allow_unknown && text.eq_ignore_ascii_case(&tokens.unknown))
}

fn required_message(field: &FieldMetadata) -> Message {
    Message::error(
        MessageKind::Required,
        format!("{} is required", field.display_name()),
    )
}

// ──────────────────────────────────────────────
// Steps 2-3
// ──────────────────────────────────────────────

/// Runs the format step, then the bounds step if the format passed.
/// Returns whether the format passed.
fn check_structure(
    compiled: &CompiledForm,
    field: &FieldMetadata,
    spec: &ValidationSpec,
    pass: Pass,
    value: &Value,
    outcome: &mut FieldOutcome,
) -> bool {
    let errors_before = outcome.errors.len();
    check_format(compiled, field, spec, pass, value, outcome);
    if outcome.errors.len() > errors_before {
        return false;
    }
    check_bounds(compiled, field, spec, pass, value, outcome);
    true
}

fn check_format(
    compiled: &CompiledForm,
    field: &FieldMetadata,
    spec: &ValidationSpec,
    pass: Pass,
    value: &Value,
    outcome: &mut FieldOutcome,
) {
    let name = field.display_name();

    if pass == Pass::Base {
        let errors_before = outcome.errors.len();
        check_choices(field, value, outcome);
        if outcome.errors.len() > errors_before {
            return;
        }
    }

    let data_type = match pass {
        Pass::Base => effective_type(&field.kind, spec),
        Pass::Conditional => spec.data_type,
    };
    if let Some(data_type) = data_type {
        if !matches_type(data_type, value) {
            outcome.push(Message::error(
                MessageKind::Format,
                format!("{} must be {}", name, type_description(data_type)),
            ));
            return;
        }
    }

    if let Some(pattern) = &spec.pattern {
        // an invalid pattern was reported when the form was compiled
        if let Some(re) = compiled.pattern(pattern) {
            if !matches!(value, Value::List(_)) && !re.is_match(&value.display_text()) {
                let text = match &spec.pattern_description {
                    Some(desc) => format!("{}: {}", name, desc),
                    None => format!("{} has an invalid format", name),
                };
                outcome.push(Message::error(MessageKind::Format, text));
            }
        }
    }
}

/// Checkbox shape and option-list membership, both implied by the kind.
fn check_choices(field: &FieldMetadata, value: &Value, outcome: &mut FieldOutcome) {
    let name = field.display_name();

    if let FieldKind::Checkbox = field.kind {
        if value.as_bool().is_none() {
            outcome.push(Message::error(
                MessageKind::Format,
                format!("{} must be checked or unchecked", name),
            ));
            return;
        }
    }

    let options = field.kind.options();
    if !options.is_empty() {
        let chosen: Vec<&Value> = match value {
            Value::List(items) if field.kind.is_multi_valued() => items.iter().collect(),
            Value::List(_) => {
                outcome.push(Message::error(
                    MessageKind::Format,
                    format!("{} accepts a single choice", name),
                ));
                return;
            }
            other => vec![other],
        };
        let unknown: Vec<String> = chosen
            .iter()
            .map(|v| v.display_text())
            .filter(|text| !options.iter().any(|o| &o.value == text))
            .collect();
        if !unknown.is_empty() {
            outcome.push(Message::error(
                MessageKind::Format,
                format!("{} has a value not in its option list: {}", name, unknown.join(", ")),
            ));
        }
    }
}

fn effective_type(kind: &FieldKind, spec: &ValidationSpec) -> Option<DataType> {
    spec.data_type.or(match kind {
        FieldKind::Number => Some(DataType::Decimal),
        FieldKind::Date => Some(DataType::Date),
        FieldKind::Datetime => Some(DataType::Datetime),
        FieldKind::Time => Some(DataType::Time),
        FieldKind::Email => Some(DataType::Email),
        FieldKind::Phone => Some(DataType::Phone),
        FieldKind::Url => Some(DataType::Url),
        _ => None,
    })
}

fn matches_type(data_type: DataType, value: &Value) -> bool {
    if let Value::List(items) = value {
        return items.iter().all(|item| matches_type(data_type, item));
    }
    let text = value.display_text();
    let text = text.trim();
    match data_type {
        DataType::String => true,
        DataType::Integer => value.as_number().is_some_and(|n| n.fract().is_zero()),
        DataType::Decimal => value.as_number().is_some(),
        DataType::Date => {
            matches!(value, Value::Date(_))
                || (text.len() == 10 && temporal::parse_date(text).is_some())
        }
        DataType::Datetime => temporal::parse_datetime(text).is_some(),
        DataType::Time => temporal::parse_time(text).is_some(),
        DataType::Email => EMAIL_REGEX.is_match(text),
        DataType::Phone => PHONE_REGEX.is_match(text),
        DataType::Url => URL_REGEX.is_match(text),
    }
}

fn type_description(data_type: DataType) -> &'static str {
    match data_type {
        DataType::String => "text",
        DataType::Integer => "a whole number",
        DataType::Decimal => "a number",
        DataType::Date => "a valid date (YYYY-MM-DD)",
        DataType::Datetime => "a valid date and time",
        DataType::Time => "a valid time (HH:MM)",
        DataType::Email => "a valid email address",
        DataType::Phone => "a valid phone number",
        DataType::Url => "a valid URL",
    }
}

fn is_numeric(field: &FieldMetadata, spec: &ValidationSpec) -> bool {
    matches!(field.kind, FieldKind::Number)
        || matches!(spec.data_type, Some(DataType::Integer | DataType::Decimal))
}

fn is_date(field: &FieldMetadata, spec: &ValidationSpec) -> bool {
    matches!(field.kind, FieldKind::Date | FieldKind::Datetime)
        || matches!(spec.data_type, Some(DataType::Date | DataType::Datetime))
}

fn check_bounds(
    compiled: &CompiledForm,
    field: &FieldMetadata,
    spec: &ValidationSpec,
    pass: Pass,
    value: &Value,
    outcome: &mut FieldOutcome,
) {
    let name = field.display_name();

    match value {
        Value::List(items) => {
            if let Some(min) = spec.min_length.filter(|min| items.len() < *min) {
                outcome.push(Message::error(
                    MessageKind::Bounds,
                    format!("{} needs at least {} selection(s)", name, min),
                ));
            }
            if let Some(max) = spec.max_length.filter(|max| items.len() > *max) {
                outcome.push(Message::error(
                    MessageKind::Bounds,
                    format!("{} allows at most {} selection(s)", name, max),
                ));
            }
        }
        Value::Text(text) if !is_numeric(field, spec) => {
            let len = text.chars().count();
            if let Some(min) = spec.min_length.filter(|min| len < *min) {
                outcome.push(Message::error(
                    MessageKind::Bounds,
                    format!("{} must be at least {} characters", name, min),
                ));
            }
            if let Some(max) = spec.max_length.filter(|max| len > *max) {
                outcome.push(Message::error(
                    MessageKind::Bounds,
                    format!("{} must be at most {} characters", name, max),
                ));
            }
        }
        _ => {}
    }

    if is_date(field, spec) {
        if let Some(date) = value.as_date() {
            check_dates(compiled, field, spec, pass, date, outcome);
        }
    }

    if !is_numeric(field, spec) {
        return;
    }
    let Some(n) = value.as_number() else {
        return;
    };
    if let Some(min) = spec.min_value.filter(|min| n < *min) {
        outcome.push(Message::error(
            MessageKind::Bounds,
            format!("{} must be at least {}", name, min.normalize()),
        ));
    }
    if let Some(max) = spec.max_value.filter(|max| n > *max) {
        outcome.push(Message::error(
            MessageKind::Bounds,
            format!("{} must be at most {}", name, max.normalize()),
        ));
    }
    if let Some(places) = spec.decimal_places.filter(|places| n.normalize().scale() > *places) {
        outcome.push(Message::error(
            MessageKind::Bounds,
            format!("{} allows at most {} decimal place(s)", name, places),
        ));
    }
    if spec.allow_negative == Some(false) && n < Decimal::ZERO {
        outcome.push(Message::error(
            MessageKind::Bounds,
            format!("{} must not be negative", name),
        ));
    }
}

/// Date window checks. Future dates are errors unless allowed; allowed ones
/// more than a year ahead, and dates over a century back, only warn. The
/// base pass applies the future and far-past defaults, a conditional pass
/// only what it declares.
fn check_dates(
    compiled: &CompiledForm,
    field: &FieldMetadata,
    spec: &ValidationSpec,
    pass: Pass,
    date: Date,
    outcome: &mut FieldOutcome,
) {
    let name = field.display_name();
    let today = compiled.config().today();

    match (spec.allow_future_dates, pass) {
        (Some(true), _) => {
            if date > temporal::shift_years(today, 1) {
                outcome.push(
                    Message::new(
                        MessageKind::Bounds,
                        Severity::Warning,
                        format!("{} is more than 1 year in the future; please verify", name),
                    )
                    .with_rule("DATE_FAR_FUTURE"),
                );
            }
        }
        (Some(false), _) | (None, Pass::Base) => {
            if date > today {
                outcome.push(
                    Message::error(
                        MessageKind::Bounds,
                        format!("{} cannot be in the future", name),
                    )
                    .with_rule("DATE_FUTURE"),
                );
            }
        }
        (None, Pass::Conditional) => {}
    }

    if pass == Pass::Base && date < temporal::shift_years(today, -100) {
        outcome.push(
            Message::new(
                MessageKind::Bounds,
                Severity::Warning,
                format!("{} is more than 100 years ago; please verify", name),
            )
            .with_rule("DATE_VERY_OLD"),
        );
    }

    if let Some(min) = date_bound(compiled, field, spec.min_date.as_deref()) {
        if date < min {
            outcome.push(
                Message::error(
                    MessageKind::Bounds,
                    format!("{} must be on or after {}", name, temporal::format_date(min)),
                )
                .with_rule("DATE_MIN"),
            );
        }
    }
    if let Some(max) = date_bound(compiled, field, spec.max_date.as_deref()) {
        if date > max {
            outcome.push(
                Message::error(
                    MessageKind::Bounds,
                    format!("{} must be on or before {}", name, temporal::format_date(max)),
                )
                .with_rule("DATE_MAX"),
            );
        }
    }
}

fn date_bound(compiled: &CompiledForm, field: &FieldMetadata, bound: Option<&str>) -> Option<Date> {
    let bound = bound?;
    let parsed = temporal::parse_date(bound.trim());
    if parsed.is_none() {
        // reported by the lint
        tracing::debug!(
            form = compiled.form_id(),
            field = %field.id,
            bound,
            "date bound ignored"
        );
    }
    parsed
}

// ──────────────────────────────────────────────
// Range checks
// ──────────────────────────────────────────────

fn check_ranges(field: &FieldMetadata, value: &Value, outcome: &mut FieldOutcome) {
    let Some(n) = value.as_number() else {
        return;
    };
    for check in &field.data_quality.range_checks {
        if !check.is_violated_by(n) {
            continue;
        }
        let severity = match check.action {
            RangeAction::Error => Severity::Error,
            RangeAction::Warning => Severity::Warning,
            RangeAction::Info => Severity::Info,
            // raised as a query by the aggregator
            RangeAction::Query => continue,
        };
        outcome.push(
            Message::new(MessageKind::RangeCheck, severity, range_message(field, check, n))
                .with_rule(&check.check_id),
        );
    }
}

pub(crate) fn range_message(field: &FieldMetadata, check: &RangeCheck, n: Decimal) -> String {
    if let Some(message) = &check.message {
        return message.clone();
    }
    let kind = match check.kind {
        RangeKind::Normal => "normal",
        RangeKind::Expected => "expected",
        RangeKind::Possible => "possible",
        RangeKind::Critical => "critical",
    };
    let bounds = match (check.min, check.max) {
        (Some(min), Some(max)) => format!(" [{}, {}]", min.normalize(), max.normalize()),
        (Some(min), None) => format!(" [>= {}]", min.normalize()),
        (None, Some(max)) => format!(" [<= {}]", max.normalize()),
        (None, None) => String::new(),
    };
    format!(
        "{} value {} is outside the {} range{}",
        field.display_name(),
        n.normalize(),
        kind,
        bounds
    )
}

// ──────────────────────────────────────────────
// Step 4
// ──────────────────────────────────────────────

fn apply_custom_rules(
    compiled: &CompiledForm,
    field: &FieldMetadata,
    rules: &[CustomRule],
    scope: &Scope<'_>,
    outcome: &mut FieldOutcome,
) {
    for rule in rules {
        let result = compiled.expression(&rule.expression).and_then(|e| {
            // a referenced field with no value yet leaves the rule indeterminate
            let blank = e
                .referenced_fields()
                .into_iter()
                .find(|f| scope.context.is_blank(f));
            if let Some(blank) = blank {
                tracing::debug!(
                    form = compiled.form_id(),
                    field = %field.id,
                    rule = %rule.id,
                    blank,
                    "custom rule skipped: indeterminate"
                );
                return Ok(true);
            }
            expr::evaluate_condition(&e, scope)
        });
        match result {
            Ok(true) => {}
            Ok(false) => outcome.push(
                Message::new(MessageKind::Custom, rule.severity, &rule.message).with_rule(&rule.id),
            ),
            Err(e) => tracing::debug!(
                form = compiled.form_id(),
                field = %field.id,
                rule = %rule.id,
                error_kind = e.kind(),
                "custom rule skipped"
            ),
        }
    }
}
