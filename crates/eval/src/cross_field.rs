//! Rules spanning several fields: cross-field, consistency and duplicate
//! checks.

use std::collections::BTreeSet;

use edc_core::{CrossFieldRule, DuplicateScope, FieldMetadata};

use crate::compiled::CompiledForm;
use crate::expr::{self, Scope};
use crate::numeric;
use crate::types::{FieldOutcome, Message, MessageKind, ValueContext};

/// Evaluate cross-field rules against `context`.
///
/// A rule is skipped (never failed) when any related field has no value yet.
/// Hidden fields still take part in evaluation, but a `false` result is only
/// attached to the related fields that are visible: one outcome per
/// implicated field, in rule order.
pub fn validate_cross_field<'a>(
    compiled: &CompiledForm,
    rules: impl IntoIterator<Item = &'a CrossFieldRule>,
    context: &ValueContext,
    hidden: &BTreeSet<String>,
) -> Vec<FieldOutcome> {
    let mut outcomes = Vec::new();
    let scope = Scope::new(context);

    for rule in rules {
        if let Some(field) = rule.related_field_ids.iter().find(|f| context.is_blank(f)) {
            tracing::debug!(rule = %rule.id, field = %field, "cross-field rule skipped: indeterminate");
            continue;
        }
        let result = compiled
            .expression(&rule.expression)
            .and_then(|e| expr::evaluate_condition(&e, &scope));
        match result {
            Ok(true) => {}
            Ok(false) => {
                let text = rule.message.clone().unwrap_or_else(|| {
                    format!("{} are inconsistent", rule.related_field_ids.join(", "))
                });
                for field_id in rule.related_field_ids.iter().filter(|f| !hidden.contains(*f)) {
                    let mut outcome = FieldOutcome::new(field_id);
                    outcome.push(
                        Message::new(MessageKind::CrossField, rule.severity, text.clone())
                            .with_rule(&rule.id),
                    );
                    outcomes.push(outcome);
                }
            }
            Err(e) => tracing::debug!(
                form = compiled.form_id(),
                rule = %rule.id,
                error = %e,
                "cross-field rule skipped"
            ),
        }
    }
    outcomes
}

/// Within-form duplicate checks.
///
/// Each field with an enabled form- or visit-scoped duplicate check is
/// grouped with the fields it lists; any two visible group members holding
/// equal non-blank values each get one message.
pub fn check_duplicates(
    compiled: &CompiledForm,
    context: &ValueContext,
    hidden: &BTreeSet<String>,
) -> Vec<FieldOutcome> {
    let severity = compiled.config().duplicate_severity;
    let mut outcomes = Vec::new();

    for owner in compiled.fields() {
        let Some(check) = owner.data_quality.duplicate_check.as_ref().filter(|c| c.enabled) else {
            continue;
        };
        if matches!(check.scope, DuplicateScope::Subject | DuplicateScope::Study) {
            tracing::debug!(
                field = %owner.id,
                scope = ?check.scope,
                "duplicate check needs data outside this form; skipped"
            );
            continue;
        }

        let mut group: Vec<&str> = vec![owner.id.as_str()];
        for id in &check.fields {
            if !group.contains(&id.as_str()) {
                group.push(id);
            }
        }
        let members: Vec<(&str, &crate::types::Value)> = group
            .into_iter()
            .filter(|id| !hidden.contains(*id))
            .filter_map(|id| context.get(id).map(|v| (id, v)))
            .filter(|(_, v)| !v.is_blank())
            .collect();

        for (i, (id, value)) in members.iter().enumerate() {
            let clashes: Vec<&str> = members
                .iter()
                .enumerate()
                .filter(|(j, (_, other))| *j != i && numeric::values_equal(value, other))
                .map(|(_, (other_id, _))| display_name(compiled, other_id))
                .collect();
            if clashes.is_empty() {
                continue;
            }
            let mut outcome = FieldOutcome::new(*id);
            outcome.push(
                Message::new(
                    MessageKind::Duplicate,
                    severity,
                    format!(
                        "{} duplicates the value of {}",
                        display_name(compiled, id),
                        clashes.join(", ")
                    ),
                )
                .with_rule(format!("{}.duplicate_check", owner.id)),
            );
            outcomes.push(outcome);
        }
    }
    outcomes
}

fn display_name<'a>(compiled: &'a CompiledForm, id: &'a str) -> &'a str {
    compiled.field(id).map_or(id, FieldMetadata::display_name)
}
