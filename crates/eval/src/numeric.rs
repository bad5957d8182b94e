//! Comparison and arithmetic over runtime values.
//!
//! All arithmetic uses `rust_decimal::Decimal` with checked operations, and
//! rounding uses `RoundingStrategy::MidpointNearestEven`. Text operands that
//! parse as numbers or dates are coerced before comparing.

use std::cmp::Ordering;

use edc_core::{BinaryOp, ExpressionError};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::types::Value;

// ──────────────────────────────────────────────
// Comparison
// ──────────────────────────────────────────────

/// Compare two values with a comparison operator.
///
/// `null` equals `null` (and blank text or an empty list); ordering against
/// `null` is always `false`. Equality between values of unrelated types is
/// `false`; ordering between them is a type mismatch.
pub fn compare_values(left: &Value, right: &Value, op: BinaryOp) -> Result<bool, ExpressionError> {
    match op {
        BinaryOp::Eq => Ok(values_equal(left, right)),
        BinaryOp::Neq => Ok(!values_equal(left, right)),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            if matches!(left, Value::Null) || matches!(right, Value::Null) {
                return Ok(false);
            }
            let ordering = order_values(left, right)?;
            Ok(ordering_satisfies(ordering, op))
        }
        other => Err(ExpressionError::type_mismatch(format!(
            "'{}' is not a comparison operator",
            other
        ))),
    }
}

/// Loose equality used by `=`, `contains`, display conditions and duplicate
/// checks.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, other) | (other, Value::Null) => other.is_blank(),
        (Value::Bool(l), Value::Bool(r)) => l == r,
        (Value::Bool(b), Value::Text(s)) | (Value::Text(s), Value::Bool(b)) => {
            Value::Text(s.clone()).as_bool() == Some(*b)
        }
        (Value::Number(l), Value::Number(r)) => l == r,
        (Value::Number(n), other @ Value::Text(_)) | (other @ Value::Text(_), Value::Number(n)) => {
            other.as_number() == Some(*n)
        }
        (Value::Date(l), Value::Date(r)) => l == r,
        (Value::Date(d), other @ Value::Text(_)) | (other @ Value::Text(_), Value::Date(d)) => {
            other.as_date() == Some(*d)
        }
        (Value::Text(l), Value::Text(r)) => l == r,
        (Value::List(l), Value::List(r)) => {
            l.len() == r.len() && l.iter().zip(r).all(|(a, b)| values_equal(a, b))
        }
        _ => false,
    }
}

fn order_values(left: &Value, right: &Value) -> Result<Ordering, ExpressionError> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => Ok(l.cmp(r)),
        (Value::Date(l), Value::Date(r)) => Ok(l.cmp(r)),
        (Value::Number(n), other) => coerce_number(other, left).map(|r| n.cmp(&r)),
        (other, Value::Number(n)) => coerce_number(other, right).map(|l| l.cmp(n)),
        (Value::Date(d), other) => coerce_date(other, left).map(|r| d.cmp(&r)),
        (other, Value::Date(d)) => coerce_date(other, right).map(|l| l.cmp(d)),
        (Value::Text(l), Value::Text(r)) => {
            if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
                Ok(a.cmp(&b))
            } else if let (Some(a), Some(b)) = (left.as_date(), right.as_date()) {
                Ok(a.cmp(&b))
            } else {
                Ok(l.cmp(r))
            }
        }
        _ => Err(ExpressionError::type_mismatch(format!(
            "cannot order {} against {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn coerce_number(v: &Value, against: &Value) -> Result<Decimal, ExpressionError> {
    v.as_number().ok_or_else(|| {
        ExpressionError::type_mismatch(format!(
            "cannot compare {} with {}",
            v.type_name(),
            against.type_name()
        ))
    })
}

fn coerce_date(v: &Value, against: &Value) -> Result<time::Date, ExpressionError> {
    v.as_date().ok_or_else(|| {
        ExpressionError::type_mismatch(format!(
            "cannot compare {} with {}",
            v.type_name(),
            against.type_name()
        ))
    })
}

fn ordering_satisfies(ordering: Ordering, op: BinaryOp) -> bool {
    match op {
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Lte => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Gte => ordering != Ordering::Less,
        _ => false,
    }
}

// ──────────────────────────────────────────────
// Arithmetic
// ──────────────────────────────────────────────

/// Apply `+ - * /`. Any `null` operand yields `null`. `+` on two operands
/// that are not both numeric concatenates their text.
pub fn eval_arith(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    if matches!(left, Value::Null) || matches!(right, Value::Null) {
        return Ok(Value::Null);
    }
    let (l, r) = match (left.as_number(), right.as_number()) {
        (Some(l), Some(r)) => (l, r),
        _ if op == BinaryOp::Add && is_textual(left) && is_textual(right) => {
            return Ok(Value::Text(format!(
                "{}{}",
                left.display_text(),
                right.display_text()
            )));
        }
        _ => {
            return Err(ExpressionError::type_mismatch(format!(
                "operator '{}' needs numbers, got {} and {}",
                op,
                left.type_name(),
                right.type_name()
            )))
        }
    };
    let result = match op {
        BinaryOp::Add => l.checked_add(r),
        BinaryOp::Sub => l.checked_sub(r),
        BinaryOp::Mul => l.checked_mul(r),
        BinaryOp::Div => {
            if r.is_zero() {
                return Err(ExpressionError::arithmetic("division by zero"));
            }
            l.checked_div(r)
        }
        other => {
            return Err(ExpressionError::type_mismatch(format!(
                "'{}' is not an arithmetic operator",
                other
            )))
        }
    };
    result
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::arithmetic(format!("decimal overflow in '{}'", op)))
}

fn is_textual(v: &Value) -> bool {
    matches!(v, Value::Text(_) | Value::Number(_) | Value::Date(_))
}

/// Round to `places` decimal places, ties to even.
pub fn round(n: Decimal, places: u32) -> Decimal {
    n.round_dp_with_strategy(places, RoundingStrategy::MidpointNearestEven)
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn num(s: &str) -> Value {
        Value::Number(dec(s))
    }

    #[test]
    fn numbers_compare_across_scales() {
        assert!(compare_values(&num("1.50"), &num("1.5"), BinaryOp::Eq).unwrap());
        assert!(compare_values(&num("2"), &num("10"), BinaryOp::Lt).unwrap());
        assert!(compare_values(&num("10"), &num("10"), BinaryOp::Gte).unwrap());
    }

    #[test]
    fn numeric_text_compares_numerically() {
        assert!(compare_values(&Value::text("10"), &Value::text("9"), BinaryOp::Gt).unwrap());
        assert!(compare_values(&Value::text("120"), &num("90"), BinaryOp::Gt).unwrap());
        assert!(values_equal(&Value::text("5"), &num("5.0")));
    }

    #[test]
    fn date_text_compares_chronologically() {
        let start = Value::text("2024-01-31");
        let end = Value::text("2024-02-01");
        assert!(compare_values(&start, &end, BinaryOp::Lt).unwrap());
    }

    #[test]
    fn null_semantics() {
        assert!(values_equal(&Value::Null, &Value::Null));
        assert!(values_equal(&Value::Null, &Value::text("")));
        assert!(!compare_values(&Value::Null, &num("1"), BinaryOp::Lt).unwrap());
        assert!(!compare_values(&num("1"), &Value::Null, BinaryOp::Gte).unwrap());
        assert_eq!(
            eval_arith(BinaryOp::Add, &Value::Null, &num("1")).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn ordering_unrelated_types_is_mismatch() {
        let err = compare_values(&Value::Bool(true), &num("1"), BinaryOp::Lt).unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
        assert!(!values_equal(&Value::Bool(true), &num("1")));
    }

    #[test]
    fn arithmetic_is_exact() {
        let sum = eval_arith(BinaryOp::Add, &num("0.1"), &num("0.2")).unwrap();
        assert_eq!(sum, num("0.3"));
        let product = eval_arith(BinaryOp::Mul, &Value::text("2"), &num("3.5")).unwrap();
        assert_eq!(product, num("7.0"));
    }

    #[test]
    fn division_by_zero_is_arithmetic_error() {
        let err = eval_arith(BinaryOp::Div, &num("1"), &num("0")).unwrap_err();
        assert_eq!(err.kind(), "arithmetic");
    }

    #[test]
    fn plus_concatenates_text() {
        let v = eval_arith(BinaryOp::Add, &Value::text("A"), &Value::text("B")).unwrap();
        assert_eq!(v, Value::text("AB"));
        let err = eval_arith(BinaryOp::Sub, &Value::text("A"), &Value::text("B")).unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
    }

    #[test]
    fn round_ties_to_even() {
        assert_eq!(round(dec("2.345"), 2), dec("2.34"));
        assert_eq!(round(dec("2.355"), 2), dec("2.36"));
        assert_eq!(round(dec("22.857"), 1), dec("22.9"));
    }
}
