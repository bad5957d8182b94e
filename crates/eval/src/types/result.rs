//! The aggregated result of validating one form instance.

use std::collections::BTreeMap;

use edc_core::{DerivationCycleError, QueryPriority};
use rust_decimal::Decimal;
use serde::Serialize;

use super::{Message, Value};

/// A data-management query the entered data warrants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCandidate {
    pub rule_id: String,
    pub field_id: String,
    pub query_text: String,
    pub priority: QueryPriority,
}

/// Progress counters over the visible, entered (non-derived) fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStats {
    pub total_fields: usize,
    pub completed_fields: usize,
    pub required_fields: usize,
    pub required_completed: usize,
}

impl CompletionStats {
    /// Completed fields as a whole percentage, rounded down. An empty form
    /// is 100% complete.
    pub fn percent(&self) -> u32 {
        if self.total_fields == 0 {
            return 100;
        }
        let pct = (self.completed_fields * 100) / self.total_fields;
        u32::try_from(pct).unwrap_or(100)
    }

    pub fn required_satisfied(&self) -> bool {
        self.required_completed == self.required_fields
    }
}

/// Regulatory flags of a field that carries at least one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldAnnotation {
    pub critical: bool,
    pub safety: bool,
    pub requires_review: bool,
}

/// Produced fresh by every `validate_form` call and never mutated after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub field_errors: BTreeMap<String, Vec<Message>>,
    pub field_warnings: BTreeMap<String, Vec<Message>>,
    pub triggered_queries: Vec<QueryCandidate>,
    pub completion: CompletionStats,
    pub derivation_cycles: Vec<DerivationCycleError>,
    pub derived_values: BTreeMap<String, Value>,
    pub annotations: BTreeMap<String, FieldAnnotation>,
}

impl ValidationResult {
    pub fn errors_for(&self, field_id: &str) -> &[Message] {
        self.field_errors.get(field_id).map_or(&[], Vec::as_slice)
    }

    pub fn warnings_for(&self, field_id: &str) -> &[Message] {
        self.field_warnings.get(field_id).map_or(&[], Vec::as_slice)
    }

    pub fn error_count(&self) -> usize {
        self.field_errors.values().map(Vec::len).sum()
    }

    pub fn warning_count(&self) -> usize {
        self.field_warnings.values().map(Vec::len).sum()
    }

    pub fn derived_number(&self, field_id: &str) -> Option<Decimal> {
        self.derived_values.get(field_id).and_then(Value::as_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_rounds_down() {
        let stats = CompletionStats {
            total_fields: 3,
            completed_fields: 2,
            required_fields: 1,
            required_completed: 1,
        };
        assert_eq!(stats.percent(), 66);
        assert!(stats.required_satisfied());
    }

    #[test]
    fn empty_form_is_complete() {
        assert_eq!(CompletionStats::default().percent(), 100);
    }
}
