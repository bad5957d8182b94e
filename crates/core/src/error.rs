use serde::{Deserialize, Serialize};

/// A failure while parsing or evaluating a rule expression.
///
/// Expression errors are always local to one rule: callers log them and treat
/// the rule as a no-op, they never abort validation of the rest of a form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    /// The expression text is not valid in the rule grammar.
    #[error("parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// The expression references a field that has no value in the context.
    #[error("unknown field reference '{field}'")]
    UnknownFieldReference { field: String },

    /// An operator or function was applied to values of the wrong type.
    #[error("type mismatch: {message}")]
    TypeMismatch { message: String },

    /// Division by zero or decimal overflow.
    #[error("arithmetic error: {message}")]
    Arithmetic { message: String },
}

impl ExpressionError {
    pub fn parse(offset: usize, message: impl Into<String>) -> Self {
        ExpressionError::Parse {
            offset,
            message: message.into(),
        }
    }

    pub fn unknown_field(field: impl Into<String>) -> Self {
        ExpressionError::UnknownFieldReference {
            field: field.into(),
        }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        ExpressionError::TypeMismatch {
            message: message.into(),
        }
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        ExpressionError::Arithmetic {
            message: message.into(),
        }
    }

    /// Short machine-readable kind, used in log fields and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExpressionError::Parse { .. } => "parse",
            ExpressionError::UnknownFieldReference { .. } => "unknown_field",
            ExpressionError::TypeMismatch { .. } => "type_mismatch",
            ExpressionError::Arithmetic { .. } => "arithmetic",
        }
    }
}

/// The derivation graph of a form contains a cycle.
///
/// This is a metadata authoring defect. Fields outside the cycle are still
/// derived normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("derivation cycle detected involving fields [{}]", fields.join(", "))]
pub struct DerivationCycleError {
    /// Members of the cycle, sorted.
    pub fields: Vec<String>,
}

impl DerivationCycleError {
    pub fn new(mut fields: Vec<String>) -> Self {
        fields.sort_unstable();
        fields.dedup();
        DerivationCycleError { fields }
    }

    pub fn contains(&self, field_id: &str) -> bool {
        self.fields.iter().any(|f| f == field_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_sorts_members() {
        let err = DerivationCycleError::new(vec!["d".into(), "c".into(), "d".into()]);
        assert_eq!(err.fields, vec!["c", "d"]);
        assert_eq!(
            err.to_string(),
            "derivation cycle detected involving fields [c, d]"
        );
        assert!(err.contains("c"));
        assert!(!err.contains("a"));
    }

    #[test]
    fn expression_error_kinds() {
        assert_eq!(ExpressionError::parse(3, "x").kind(), "parse");
        assert_eq!(
            ExpressionError::unknown_field("age").to_string(),
            "unknown field reference 'age'"
        );
    }
}
