//! Rule expression evaluator.
//!
//! Walks a parsed [`Expression`] arena against a read-only [`ValueContext`].
//! Evaluation is pure: no I/O, no mutation, and identical inputs always give
//! identical results. Every failure comes back as an [`ExpressionError`].

use edc_core::{BinaryOp, Expression, ExpressionError, Function, Literal, Node, NodeId, UnaryOp};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::numeric;
use crate::temporal;
use crate::types::{Value, ValueContext};

/// What an expression may observe: the value context, plus the candidate
/// value bound to the reserved word `value` while validating one field.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    pub context: &'a ValueContext,
    pub current: Option<&'a Value>,
}

impl<'a> Scope<'a> {
    pub fn new(context: &'a ValueContext) -> Self {
        Scope {
            context,
            current: None,
        }
    }

    pub fn with_current(context: &'a ValueContext, current: &'a Value) -> Self {
        Scope {
            context,
            current: Some(current),
        }
    }
}

/// Evaluate an expression to a value.
pub fn evaluate(expr: &Expression, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    eval_node(expr, expr.root(), scope)
}

/// Evaluate an expression used as a rule or condition. `null` counts as
/// `false`; any other non-boolean result is a type mismatch.
pub fn evaluate_condition(expr: &Expression, scope: &Scope<'_>) -> Result<bool, ExpressionError> {
    truthy(&evaluate(expr, scope)?)
}

/// Parse and evaluate expression text against a context in one step.
pub fn evaluate_text(source: &str, context: &ValueContext) -> Result<Value, ExpressionError> {
    let expr = Expression::parse(source)?;
    evaluate(&expr, &Scope::new(context))
}

fn truthy(v: &Value) -> Result<bool, ExpressionError> {
    match v {
        Value::Null => Ok(false),
        other => other.as_bool().ok_or_else(|| {
            ExpressionError::type_mismatch(format!("expected boolean, got {}", other.type_name()))
        }),
    }
}

fn eval_node(expr: &Expression, id: NodeId, scope: &Scope<'_>) -> Result<Value, ExpressionError> {
    match expr.node(id) {
        Node::Literal(lit) => Ok(match lit {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => Value::Number(*n),
            Literal::Str(s) => Value::Text(s.clone()),
        }),

        Node::Field(field) => scope
            .context
            .get(field)
            .cloned()
            .ok_or_else(|| ExpressionError::unknown_field(field.as_str())),

        Node::CurrentValue => scope
            .current
            .cloned()
            .ok_or_else(|| ExpressionError::unknown_field("value")),

        Node::Unary { op, operand } => {
            let v = eval_node(expr, *operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&v)?)),
                UnaryOp::Neg => match v {
                    Value::Null => Ok(Value::Null),
                    other => other.as_number().map(|n| Value::Number(-n)).ok_or_else(|| {
                        ExpressionError::type_mismatch(format!(
                            "cannot negate {}",
                            other.type_name()
                        ))
                    }),
                },
            }
        }

        Node::Binary { op, left, right } => match op {
            BinaryOp::And => {
                if !truthy(&eval_node(expr, *left, scope)?)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&eval_node(expr, *right, scope)?)?))
            }
            BinaryOp::Or => {
                if truthy(&eval_node(expr, *left, scope)?)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&eval_node(expr, *right, scope)?)?))
            }
            op if op.is_comparison() => {
                let l = eval_node(expr, *left, scope)?;
                let r = eval_node(expr, *right, scope)?;
                numeric::compare_values(&l, &r, *op).map(Value::Bool)
            }
            op => {
                let l = eval_node(expr, *left, scope)?;
                let r = eval_node(expr, *right, scope)?;
                numeric::eval_arith(*op, &l, &r)
            }
        },

        Node::Call { func, args } => eval_call(expr, *func, args, scope),
    }
}

// ──────────────────────────────────────────────
// Functions
// ──────────────────────────────────────────────

fn eval_call(
    expr: &Expression,
    func: Function,
    args: &[NodeId],
    scope: &Scope<'_>,
) -> Result<Value, ExpressionError> {
    // coalesce tolerates a first argument with no value yet
    if let (Function::Coalesce, [first, second]) = (func, args) {
        let v = match eval_node(expr, *first, scope) {
            Ok(v) => v,
            Err(ExpressionError::UnknownFieldReference { .. }) => Value::Null,
            Err(e) => return Err(e),
        };
        if !v.is_blank() {
            return Ok(v);
        }
        return eval_node(expr, *second, scope);
    }

    let values = args
        .iter()
        .map(|a| eval_node(expr, *a, scope))
        .collect::<Result<Vec<_>, _>>()?;

    match (func, values.as_slice()) {
        (Function::DateDiff, [from, to, unit]) => {
            if from.is_blank() || to.is_blank() {
                return Ok(Value::Null);
            }
            let from = date_arg(func, from)?;
            let to = date_arg(func, to)?;
            let Value::Text(unit) = unit else {
                return Err(ExpressionError::type_mismatch(
                    "date_diff unit must be text",
                ));
            };
            temporal::date_diff(from, to, unit).map(|n| Value::Number(Decimal::from(n)))
        }
        (Function::Length, [x]) => {
            let len = match x {
                Value::Null => 0,
                Value::List(items) => items.len(),
                other => other.display_text().chars().count(),
            };
            Ok(Value::Number(Decimal::from(len)))
        }
        (Function::Round, [x, places]) => {
            if matches!(x, Value::Null) {
                return Ok(Value::Null);
            }
            let n = number_arg(func, x)?;
            let places = number_arg(func, places)?;
            let places = Some(places)
                .filter(|p| p.fract().is_zero())
                .and_then(|p| p.to_u32())
                .filter(|p| *p <= 28)
                .ok_or_else(|| {
                    ExpressionError::type_mismatch(
                        "round places must be a whole number between 0 and 28",
                    )
                })?;
            Ok(Value::Number(numeric::round(n, places)))
        }
        (Function::Abs, [x]) => match x {
            Value::Null => Ok(Value::Null),
            other => number_arg(func, other).map(|n| Value::Number(n.abs())),
        },
        (Function::Min | Function::Max, [a, b]) => {
            if matches!(a, Value::Null) {
                return Ok(b.clone());
            }
            if matches!(b, Value::Null) {
                return Ok(a.clone());
            }
            let a_first = numeric::compare_values(a, b, BinaryOp::Lte)?;
            let pick_a = if func == Function::Min { a_first } else { !a_first };
            Ok(if pick_a { a.clone() } else { b.clone() })
        }
        (Function::IsEmpty, [x]) => Ok(Value::Bool(x.is_blank())),
        (Function::Contains, [haystack, needle]) => {
            let found = match haystack {
                Value::Null => false,
                Value::List(items) => items.iter().any(|i| numeric::values_equal(i, needle)),
                Value::Text(s) => s.contains(needle.display_text().as_str()),
                other => {
                    return Err(ExpressionError::type_mismatch(format!(
                        "contains needs text or a list, got {}",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Bool(found))
        }
        (func, args) => Err(ExpressionError::type_mismatch(format!(
            "{} takes {} argument(s), got {}",
            func.name(),
            func.arity(),
            args.len()
        ))),
    }
}

fn number_arg(func: Function, v: &Value) -> Result<Decimal, ExpressionError> {
    v.as_number().ok_or_else(|| {
        ExpressionError::type_mismatch(format!(
            "{} expects a number, got {}",
            func.name(),
            v.type_name()
        ))
    })
}

fn date_arg(func: Function, v: &Value) -> Result<time::Date, ExpressionError> {
    v.as_date().ok_or_else(|| {
        ExpressionError::type_mismatch(format!(
            "{} expects a date, got {} '{}'",
            func.name(),
            v.type_name(),
            v.display_text()
        ))
    })
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn ctx(pairs: &[(&str, Value)]) -> ValueContext {
        pairs.iter().cloned().collect()
    }

    fn eval(src: &str, context: &ValueContext) -> Result<Value, ExpressionError> {
        evaluate_text(src, context)
    }

    fn num(s: &str) -> Value {
        Value::Number(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn arithmetic_over_fields() {
        let c = ctx(&[("A", num("2")), ("B", num("3"))]);
        assert_eq!(eval("A + B", &c).unwrap(), num("5"));
        assert_eq!(eval("A * B - 1", &c).unwrap(), num("5"));
        assert_eq!(eval("-A + B", &c).unwrap(), num("1"));
    }

    #[test]
    fn bmi_formula() {
        let c = ctx(&[("WEIGHT", num("70")), ("HEIGHT", num("175"))]);
        let v = eval("round(WEIGHT / ((HEIGHT / 100) * (HEIGHT / 100)), 1)", &c).unwrap();
        assert_eq!(v, num("22.9"));
    }

    #[test]
    fn unknown_field_is_reported() {
        let err = eval("MISSING > 1", &ValueContext::new()).unwrap_err();
        assert_eq!(err, ExpressionError::unknown_field("MISSING"));
    }

    #[test]
    fn short_circuit_skips_unknown_fields() {
        let c = ctx(&[("A", Value::Bool(false))]);
        assert_eq!(eval("A and MISSING", &c).unwrap(), Value::Bool(false));
        assert_eq!(eval("not A or MISSING", &c).unwrap(), Value::Bool(true));
    }

    #[test]
    fn value_keyword_reads_current_candidate() {
        let c = ValueContext::new();
        let current = num("42");
        let expr = Expression::parse("value >= 18 and value <= 65").unwrap();
        let ok = evaluate_condition(&expr, &Scope::with_current(&c, &current)).unwrap();
        assert!(ok);
        let err = evaluate(&expr, &Scope::new(&c)).unwrap_err();
        assert_eq!(err, ExpressionError::unknown_field("value"));
    }

    #[test]
    fn conditions_treat_null_as_false() {
        let c = ctx(&[("FLAG", Value::Null), ("N", num("1"))]);
        let expr = Expression::parse("FLAG").unwrap();
        assert!(!evaluate_condition(&expr, &Scope::new(&c)).unwrap());
        let expr = Expression::parse("N").unwrap();
        let err = evaluate_condition(&expr, &Scope::new(&c)).unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
    }

    #[test]
    fn date_diff_over_text_dates() {
        let c = ctx(&[
            ("BRTHDAT", Value::text("1990-06-15")),
            ("VISDAT", Value::text("2024-06-14")),
        ]);
        assert_eq!(eval("date_diff(BRTHDAT, VISDAT, 'years')", &c).unwrap(), num("33"));
        let c = ctx(&[("BRTHDAT", Value::Null), ("VISDAT", Value::text("2024-06-14"))]);
        assert_eq!(eval("date_diff(BRTHDAT, VISDAT, 'years')", &c).unwrap(), Value::Null);
    }

    #[test]
    fn date_diff_rejects_non_dates() {
        let c = ctx(&[("A", Value::text("soon")), ("B", Value::text("2024-01-01"))]);
        let err = eval("date_diff(A, B, 'days')", &c).unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
    }

    #[test]
    fn string_functions() {
        let c = ctx(&[
            ("INIT", Value::text("ABC")),
            ("RACE", Value::from(vec!["WHITE", "ASIAN"])),
        ]);
        assert_eq!(eval("length(INIT)", &c).unwrap(), num("3"));
        assert_eq!(eval("length(RACE)", &c).unwrap(), num("2"));
        assert_eq!(eval("contains(RACE, 'ASIAN')", &c).unwrap(), Value::Bool(true));
        assert_eq!(eval("contains(INIT, 'BC')", &c).unwrap(), Value::Bool(true));
        assert_eq!(eval("is_empty(RACE)", &c).unwrap(), Value::Bool(false));
    }

    #[test]
    fn min_max_abs() {
        let c = ctx(&[("A", num("-4")), ("B", num("2.5"))]);
        assert_eq!(eval("min(A, B)", &c).unwrap(), num("-4"));
        assert_eq!(eval("max(A, B)", &c).unwrap(), num("2.5"));
        assert_eq!(eval("abs(A)", &c).unwrap(), num("4"));
        assert_eq!(eval("max(null, B)", &c).unwrap(), num("2.5"));
    }

    #[test]
    fn coalesce_tolerates_missing_first_argument() {
        let c = ctx(&[("B", num("7"))]);
        assert_eq!(eval("coalesce(A, B)", &c).unwrap(), num("7"));
        assert_eq!(eval("coalesce('', 0)", &c).unwrap(), num("0"));
    }

    #[test]
    fn round_rejects_fractional_places() {
        let err = eval("round(1.25, 0.5)", &ValueContext::new()).unwrap_err();
        assert_eq!(err.kind(), "type_mismatch");
    }

    #[test]
    fn evaluation_is_idempotent() {
        let c = ctx(&[("A", num("10")), ("B", Value::text("2024-01-01"))]);
        let src = "A / 3 > 3 and date_diff(B, '2024-03-01', 'days') = 60";
        let first = eval(src, &c).unwrap();
        for _ in 0..5 {
            assert_eq!(eval(src, &c).unwrap(), first);
        }
        assert_eq!(first, Value::Bool(true));
    }
}
