//! Arena-indexed AST for rule expressions.
//!
//! Every node of an [`Expression`] lives in one `Vec<Node>`; children are
//! referenced by [`NodeId`]. The tree is immutable once parsed, so a compiled
//! expression can be shared between threads and evaluated any number of times.

use std::collections::BTreeSet;
use std::fmt;

use rust_decimal::Decimal;

use crate::error::ExpressionError;
use crate::parser::{self, ParseLimits};

// ──────────────────────────────────────────────
// Node handles
// ──────────────────────────────────────────────

/// Index of a node inside its expression's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ──────────────────────────────────────────────
// Nodes
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(Decimal),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Neq
                | BinaryOp::Lt
                | BinaryOp::Lte
                | BinaryOp::Gt
                | BinaryOp::Gte
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// The closed set of pure functions available to rule authors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    /// `date_diff(a, b, unit)`: whole `unit`s from `a` to `b`.
    DateDiff,
    Length,
    Round,
    Abs,
    Min,
    Max,
    IsEmpty,
    Contains,
    Coalesce,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Function> {
        let f = match name {
            "date_diff" | "dateDiff" => Function::DateDiff,
            "length" | "len" => Function::Length,
            "round" => Function::Round,
            "abs" => Function::Abs,
            "min" => Function::Min,
            "max" => Function::Max,
            "is_empty" | "isEmpty" => Function::IsEmpty,
            "contains" => Function::Contains,
            "coalesce" => Function::Coalesce,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::DateDiff => "date_diff",
            Function::Length => "length",
            Function::Round => "round",
            Function::Abs => "abs",
            Function::Min => "min",
            Function::Max => "max",
            Function::IsEmpty => "is_empty",
            Function::Contains => "contains",
            Function::Coalesce => "coalesce",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Function::DateDiff => 3,
            Function::Length | Function::Abs | Function::IsEmpty => 1,
            Function::Round
            | Function::Min
            | Function::Max
            | Function::Contains
            | Function::Coalesce => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Literal(Literal),
    /// Reference to another field's value by id.
    Field(String),
    /// The reserved word `value`: the candidate value of the field under validation.
    CurrentValue,
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
    Binary {
        op: BinaryOp,
        left: NodeId,
        right: NodeId,
    },
    Call {
        func: Function,
        args: Vec<NodeId>,
    },
}

// ──────────────────────────────────────────────
// Expression
// ──────────────────────────────────────────────

/// A parsed, statically checked rule expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expression {
    source: String,
    nodes: Vec<Node>,
    root: NodeId,
}

impl Expression {
    /// Parse with the default sandbox limits.
    pub fn parse(source: &str) -> Result<Expression, ExpressionError> {
        Self::parse_with_limits(source, &ParseLimits::default())
    }

    pub fn parse_with_limits(
        source: &str,
        limits: &ParseLimits,
    ) -> Result<Expression, ExpressionError> {
        let (nodes, root) = parser::parse(source, limits)?;
        Ok(Expression {
            source: source.to_owned(),
            nodes,
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Field ids the expression reads, in sorted order.
    pub fn referenced_fields(&self) -> BTreeSet<&str> {
        self.nodes
            .iter()
            .filter_map(|n| match n {
                Node::Field(id) => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn uses_current_value(&self) -> bool {
        self.nodes.iter().any(|n| matches!(n, Node::CurrentValue))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
