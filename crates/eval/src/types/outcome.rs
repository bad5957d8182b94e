//! User-facing validation messages and per-field outcomes.

use edc_core::Severity;
use serde::Serialize;

/// Which step of validation produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Required,
    /// Type, format, pattern or option membership.
    Format,
    /// Length, numeric bounds, decimal places, sign.
    Bounds,
    RangeCheck,
    Custom,
    CrossField,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub kind: MessageKind,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub text: String,
}

impl Message {
    pub fn new(kind: MessageKind, severity: Severity, text: impl Into<String>) -> Self {
        Message {
            kind,
            severity,
            rule_id: None,
            text: text.into(),
        }
    }

    pub fn error(kind: MessageKind, text: impl Into<String>) -> Self {
        Self::new(kind, Severity::Error, text)
    }

    pub fn with_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }
}

/// Messages for one field, split into the error and warning buckets.
///
/// `info` messages land in `warnings` and keep their own severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldOutcome {
    pub field_id: String,
    pub errors: Vec<Message>,
    pub warnings: Vec<Message>,
}

impl FieldOutcome {
    pub fn new(field_id: impl Into<String>) -> Self {
        FieldOutcome {
            field_id: field_id.into(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        match message.severity {
            Severity::Error => self.errors.push(message),
            Severity::Warning | Severity::Info => self.warnings.push(message),
        }
    }

    /// Append another outcome's messages, preserving their order.
    pub fn extend(&mut self, other: FieldOutcome) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_routes_by_severity() {
        let mut outcome = FieldOutcome::new("AGE");
        outcome.push(Message::error(MessageKind::Required, "AGE is required"));
        outcome.push(Message::new(MessageKind::Custom, Severity::Warning, "w"));
        outcome.push(Message::new(MessageKind::Custom, Severity::Info, "i"));
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.warnings.len(), 2);
        assert_eq!(outcome.warnings[1].severity, Severity::Info);
        assert!(!outcome.is_valid());
    }

    #[test]
    fn message_json_shape() {
        let msg = Message::error(MessageKind::CrossField, "dates out of order").with_rule("R1");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "kind": "cross_field",
                "severity": "error",
                "ruleId": "R1",
                "text": "dates out of order"
            })
        );
    }
}
