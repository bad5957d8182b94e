//! Conditional display: which fields are shown for a given context.

use std::borrow::Cow;
use std::collections::BTreeSet;

use edc_core::{BinaryOp, DisplayCondition, DisplayOperator, Expression, FieldMetadata};

use crate::compiled::CompiledForm;
use crate::expr::{self, Scope};
use crate::numeric;
use crate::types::{Value, ValueContext};

/// Whether `field` is shown. A declared field with no entry in `context`
/// reads as null in either condition form. A display condition that cannot
/// be evaluated leaves the field visible.
pub fn is_visible(compiled: &CompiledForm, field: &FieldMetadata, context: &ValueContext) -> bool {
    if field.display.hidden {
        return false;
    }
    let Some(condition) = &field.display.conditional_display else {
        return true;
    };
    let shown = match condition {
        DisplayCondition::Expression { expression } => {
            compiled.expression(expression).and_then(|e| {
                let context = with_declared_nulls(compiled, &e, context);
                expr::evaluate_condition(&e, &Scope::new(&context))
            })
        }
        DisplayCondition::Comparison {
            field: other,
            operator,
            value,
        } => {
            let actual = context.get(other).cloned().unwrap_or(Value::Null);
            compare(&actual, *operator, &Value::from_json(value))
        }
    };
    match shown {
        Ok(shown) => shown,
        Err(e) => {
            tracing::debug!(
                form = compiled.form_id(),
                field = %field.id,
                error = %e,
                "display condition failed; field stays visible"
            );
            true
        }
    }
}

/// Ids of every field hidden under `context`.
pub fn hidden_fields(compiled: &CompiledForm, context: &ValueContext) -> BTreeSet<String> {
    compiled
        .fields()
        .iter()
        .filter(|f| !is_visible(compiled, f, context))
        .map(|f| f.id.clone())
        .collect()
}

fn with_declared_nulls<'c>(
    compiled: &CompiledForm,
    expression: &Expression,
    context: &'c ValueContext,
) -> Cow<'c, ValueContext> {
    let missing: Vec<&str> = expression
        .referenced_fields()
        .into_iter()
        .filter(|f| !context.contains(f) && compiled.field(f).is_some())
        .collect();
    if missing.is_empty() {
        return Cow::Borrowed(context);
    }
    let mut filled = context.clone();
    for field_id in missing {
        filled.insert(field_id, Value::Null);
    }
    Cow::Owned(filled)
}

fn compare(
    actual: &Value,
    operator: DisplayOperator,
    expected: &Value,
) -> Result<bool, edc_core::ExpressionError> {
    match operator {
        DisplayOperator::Equals => Ok(equals_or_selected(actual, expected)),
        DisplayOperator::NotEquals => Ok(!equals_or_selected(actual, expected)),
        DisplayOperator::GreaterThan => numeric::compare_values(actual, expected, BinaryOp::Gt),
        DisplayOperator::LessThan => numeric::compare_values(actual, expected, BinaryOp::Lt),
        DisplayOperator::Contains => Ok(contains(actual, expected)),
        DisplayOperator::NotContains => Ok(!contains(actual, expected)),
    }
}

/// A multi-valued field "equals" a scalar when that scalar is selected.
fn equals_or_selected(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::List(items), scalar) if !matches!(scalar, Value::List(_)) => {
            items.iter().any(|i| numeric::values_equal(i, scalar))
        }
        _ => numeric::values_equal(actual, expected),
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::List(items) => items.iter().any(|i| numeric::values_equal(i, expected)),
        Value::Null => false,
        other => other
            .display_text()
            .to_lowercase()
            .contains(&expected.display_text().to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use edc_core::FormMetadata;
    use serde_json::json;

    fn compiled() -> CompiledForm {
        let form: FormMetadata = serde_json::from_value(json!({
            "formId": "AE",
            "fields": [
                {"id": "AEYN", "type": "radio", "options": [{"value": "Y"}, {"value": "N"}]},
                {"id": "AETERM", "type": "text",
                 "display": {"conditionalDisplay": {"field": "AEYN", "operator": "equals", "value": "Y"}}},
                {"id": "AESEV", "type": "number",
                 "display": {"conditionalDisplay": {"expression": "AEYN = 'Y' and AETERM != ''"}}},
                {"id": "SYMPT", "type": "checkbox_group"},
                {"id": "FEVERT", "type": "number",
                 "display": {"conditionalDisplay": {"field": "SYMPT", "operator": "contains", "value": "FEVER"}}},
                {"id": "INTERNAL", "type": "text", "display": {"hidden": true}},
                {"id": "BROKEN", "type": "text",
                 "display": {"conditionalDisplay": {"expression": "AEYN >"}}},
                {"id": "ORPHAN", "type": "text",
                 "display": {"conditionalDisplay": {"expression": "NOT_A_FIELD = 'Y'"}}}
            ]
        }))
        .unwrap();
        CompiledForm::compile(&form, &EngineConfig::new())
    }

    #[test]
    fn structured_and_expression_conditions() {
        let c = compiled();
        let ctx: ValueContext = [("AEYN", Value::text("N"))].into_iter().collect();
        let hidden = hidden_fields(&c, &ctx);
        assert!(hidden.contains("AETERM"));
        assert!(hidden.contains("AESEV"));
        assert!(hidden.contains("INTERNAL"));

        let ctx: ValueContext = [("AEYN", "Y"), ("AETERM", "Headache")].into_iter().collect();
        let hidden = hidden_fields(&c, &ctx);
        assert!(!hidden.contains("AETERM"));
        assert!(!hidden.contains("AESEV"));
    }

    #[test]
    fn contains_checks_list_membership() {
        let c = compiled();
        let ctx: ValueContext = [("SYMPT", Value::from(vec!["COUGH", "FEVER"]))]
            .into_iter()
            .collect();
        assert!(!hidden_fields(&c, &ctx).contains("FEVERT"));
        let ctx: ValueContext = [("SYMPT", Value::from(vec!["COUGH"]))].into_iter().collect();
        assert!(hidden_fields(&c, &ctx).contains("FEVERT"));
    }

    #[test]
    fn failing_condition_leaves_field_visible() {
        let c = compiled();
        let hidden = hidden_fields(&c, &ValueContext::new());
        assert!(!hidden.contains("BROKEN"));
        assert!(!hidden.contains("ORPHAN"));
    }

    #[test]
    fn missing_declared_field_reads_as_null() {
        let c = compiled();
        let missing = hidden_fields(&c, &ValueContext::new());
        let null = hidden_fields(&c, &[("AEYN", Value::Null)].into_iter().collect());
        assert_eq!(missing, null);
        assert!(missing.contains("AETERM"));
        assert!(missing.contains("AESEV"));
    }
}
