//! Auto-query detection.

use std::collections::BTreeSet;

use edc_core::{FieldMetadata, QueryPriority, RangeAction, RangeKind};

use crate::compiled::CompiledForm;
use crate::expr::{self, Scope};
use crate::field;
use crate::types::{QueryCandidate, Value, ValueContext};

/// Scan visible fields for auto-query rules and query-action range checks
/// that fire against the final (derived) context.
///
/// A candidate is raised only when its priority is at least the field's
/// query threshold, and never for a field with auto-queries disabled.
pub fn scan_auto_queries(
    compiled: &CompiledForm,
    context: &ValueContext,
    hidden: &BTreeSet<String>,
) -> Vec<QueryCandidate> {
    let mut queries = Vec::new();

    for field in compiled.fields() {
        let config = &field.query;
        if !config.auto_query_enabled || hidden.contains(&field.id) {
            continue;
        }
        let value = context.get(&field.id).cloned().unwrap_or(Value::Null);
        let scope = Scope::with_current(context, &value);

        for rule in &config.auto_query_rules {
            if rule.priority < config.query_threshold {
                continue;
            }
            let fired = compiled
                .expression(&rule.condition)
                .and_then(|e| expr::evaluate_condition(&e, &scope));
            match fired {
                Ok(true) => queries.push(QueryCandidate {
                    rule_id: rule.id.clone(),
                    field_id: field.id.clone(),
                    query_text: render_query_text(&rule.query_text, &field.id, context),
                    priority: rule.priority,
                }),
                Ok(false) => {}
                Err(e) => tracing::debug!(
                    form = compiled.form_id(),
                    field = %field.id,
                    rule = %rule.id,
                    error = %e,
                    "auto-query rule skipped"
                ),
            }
        }

        range_queries(field, &value, config.query_threshold, &mut queries);
    }
    queries
}

fn range_queries(
    field: &FieldMetadata,
    value: &Value,
    threshold: QueryPriority,
    queries: &mut Vec<QueryCandidate>,
) {
    let Some(n) = value.as_number() else {
        return;
    };
    for check in &field.data_quality.range_checks {
        if check.action != RangeAction::Query || !check.is_violated_by(n) {
            continue;
        }
        let priority = match check.kind {
            RangeKind::Critical => QueryPriority::High,
            RangeKind::Possible => QueryPriority::Medium,
            RangeKind::Normal | RangeKind::Expected => QueryPriority::Low,
        };
        if priority < threshold {
            continue;
        }
        queries.push(QueryCandidate {
            rule_id: check.check_id.clone(),
            field_id: field.id.clone(),
            query_text: field::range_message(field, check, n),
            priority,
        });
    }
}

/// Replace `{fieldId}` placeholders with the display text of that field's
/// value; `{value}` is the owning field. Unknown placeholders are kept.
pub fn render_query_text(template: &str, owner: &str, context: &ValueContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = after[..close].trim();
        let field_id = if key == "value" { owner } else { key };
        match context.get(field_id) {
            Some(v) => out.push_str(&v.display_text()),
            None => out.push_str(&rest[open..open + close + 2]),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
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

    #[test]
    fn renders_placeholders() {
        let ctx: ValueContext = [("HR", Value::from(150i64)), ("VISIT", Value::text("Week 2"))]
            .into_iter()
            .collect();
        assert_eq!(
            render_query_text("HR {value} bpm at {VISIT}; see {NOTE}", "HR", &ctx),
            "HR 150 bpm at Week 2; see {NOTE}"
        );
        assert_eq!(render_query_text("unclosed {value", "HR", &ctx), "unclosed {value");
    }

    #[test]
    fn rule_fires_once_with_declared_priority() {
        let c = compile(json!([{
            "id": "HR",
            "type": "number",
            "query": {"autoQueryRules": [
                {"ruleId": "Q_HR", "condition": "value > 120", "queryText": "HR of {value} is high", "priority": "high"}
            ]}
        }]));
        let ctx: ValueContext = [("HR", 150i64)].into_iter().collect();
        let queries = scan_auto_queries(&c, &ctx, &BTreeSet::new());
        assert_eq!(
            queries,
            [QueryCandidate {
                rule_id: "Q_HR".into(),
                field_id: "HR".into(),
                query_text: "HR of 150 is high".into(),
                priority: QueryPriority::High,
            }]
        );
        let ctx: ValueContext = [("HR", 80i64)].into_iter().collect();
        assert!(scan_auto_queries(&c, &ctx, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn threshold_and_disable_suppress_queries() {
        let c = compile(json!([
            {"id": "A", "type": "number", "query": {"queryThreshold": "high", "autoQueryRules": [
                {"ruleId": "LOW", "condition": "value > 1", "queryText": "t", "priority": "medium"}
            ]}},
            {"id": "B", "type": "number", "query": {"autoQueryEnabled": false, "autoQueryRules": [
                {"ruleId": "OFF", "condition": "value > 1", "queryText": "t", "priority": "high"}
            ]}}
        ]));
        let ctx: ValueContext = [("A", 5i64), ("B", 5i64)].into_iter().collect();
        assert!(scan_auto_queries(&c, &ctx, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn hidden_fields_raise_no_queries() {
        let c = compile(json!([{
            "id": "A",
            "type": "number",
            "query": {"autoQueryRules": [{"ruleId": "Q", "condition": "value > 1", "queryText": "t"}]}
        }]));
        let ctx: ValueContext = [("A", 5i64)].into_iter().collect();
        let hidden: BTreeSet<String> = ["A".to_owned()].into_iter().collect();
        assert!(scan_auto_queries(&c, &ctx, &hidden).is_empty());
    }

    #[test]
    fn query_range_checks_map_kind_to_priority() {
        let c = compile(json!([{
            "id": "SYSBP",
            "type": "number",
            "dataQuality": {"rangeChecks": [
                {"checkId": "CRIT", "type": "critical", "max": 180, "action": "query"},
                {"checkId": "NORM", "type": "normal", "max": 140, "action": "query"},
                {"checkId": "WARN", "type": "normal", "max": 140, "action": "warning"}
            ]}
        }]));
        let ctx: ValueContext = [("SYSBP", 200i64)].into_iter().collect();
        let queries = scan_auto_queries(&c, &ctx, &BTreeSet::new());
        let got: Vec<_> = queries.iter().map(|q| (q.rule_id.as_str(), q.priority)).collect();
        assert_eq!(got, [("CRIT", QueryPriority::High), ("NORM", QueryPriority::Low)]);
    }
}
