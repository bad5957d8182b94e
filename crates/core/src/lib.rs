//! edc-core: design-time building blocks of the form validation engine.
//!
//! Provides the typed form metadata model, the closed rule-expression
//! grammar (lexer, parser, arena-indexed AST), the derivation dependency
//! graph with cycle detection, and the design-time lint.
//!
//! # Public API
//!
//! - [`FormMetadata`], [`FieldMetadata`], [`FieldKind`] -- metadata model
//! - [`Expression`] -- parsed rule expression
//! - [`DerivationGraph`] -- derived-field dependency graph
//! - [`lint_form`] -- design-time diagnostics
//! - [`ExpressionError`], [`DerivationCycleError`] -- error types
//!
//! Nothing here holds runtime field values; evaluation lives in `edc-eval`.

pub mod ast;
pub mod error;
pub mod graph;
pub mod lexer;
pub mod lint;
pub mod metadata;
pub mod parser;

// ── Convenience re-exports ───────────────────────────────────────────

pub use ast::{BinaryOp, Expression, Function, Literal, Node, NodeId, UnaryOp};
pub use error::{DerivationCycleError, ExpressionError};
pub use graph::{DerivationGraph, DerivedNode};
pub use lint::{lint_form, Diagnostic, DiagnosticSeverity};
pub use metadata::{
    AutoQueryRule, ClinicalFlags, ConditionalRule, ConsistencyRule, CrossFieldRule, CustomRule,
    DataEntrySpec, DataQualitySpec, DataType, DerivationSpec, DisplayCondition, DisplayOperator,
    DisplaySpec, DuplicateCheck, DuplicateScope, FieldKind, FieldMetadata, FieldOption, FormMetadata,
    QueryConfig, QueryPriority, RangeAction, RangeCheck, RangeKind, Severity, ValidationSpec,
};
pub use parser::ParseLimits;
