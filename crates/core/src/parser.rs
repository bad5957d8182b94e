//! Recursive-descent parser for rule expressions.
//!
//! Produces the arena-indexed nodes of an [`Expression`](crate::ast::Expression).
//! The grammar is closed: no assignment, no user-defined functions, no member
//! access. Unknown function names and wrong arities are parse errors so that
//! broken rules are caught when a form is designed, not when it is filled in.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ast::{BinaryOp, Function, Literal, Node, NodeId, UnaryOp};
use crate::error::ExpressionError;
use crate::lexer::{lex, Spanned, Token};

/// Sandbox limits applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct ParseLimits {
    /// Maximum expression length in characters.
    pub max_expression_len: usize,
    /// Maximum nesting depth of sub-expressions.
    pub max_nesting_depth: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        ParseLimits {
            max_expression_len: 4096,
            max_nesting_depth: 64,
        }
    }
}

pub(crate) fn parse(
    source: &str,
    limits: &ParseLimits,
) -> Result<(Vec<Node>, NodeId), ExpressionError> {
    let len = source.chars().count();
    if len > limits.max_expression_len {
        return Err(ExpressionError::parse(
            0,
            format!(
                "expression is {} characters long, limit is {}",
                len, limits.max_expression_len
            ),
        ));
    }
    let tokens = lex(source)?;
    let mut parser = Parser::new(&tokens, limits.max_nesting_depth);
    if parser.peek() == &Token::Eof {
        return Err(parser.err("empty expression"));
    }
    let root = parser.parse_expr()?;
    if parser.peek() != &Token::Eof {
        return Err(parser.err(format!("unexpected trailing input {:?}", parser.peek())));
    }
    Ok((parser.nodes, root))
}

// ──────────────────────────────────────────────
// Parser
// ──────────────────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    nodes: Vec<Node>,
    depth: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned], max_depth: usize) -> Self {
        Parser {
            tokens,
            pos: 0,
            nodes: Vec::new(),
            depth: 0,
            max_depth,
        }
    }

    fn cur(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.cur().token
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn err(&self, msg: impl Into<String>) -> ExpressionError {
        ExpressionError::parse(self.cur().offset, msg)
    }

    fn is_word(&self, w: &str) -> bool {
        matches!(self.peek(), Token::Word(x) if x == w)
    }

    fn expect_rparen(&mut self) -> Result<(), ExpressionError> {
        if self.peek() == &Token::RParen {
            self.advance();
            Ok(())
        } else {
            Err(self.err(format!("expected ')', got {:?}", self.peek())))
        }
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.err(format!(
                "expression nesting exceeds limit of {}",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // -- Expression parsing --------------------------------------

    fn parse_expr(&mut self) -> Result<NodeId, ExpressionError> {
        self.enter()?;
        let result = self.parse_or_expr();
        self.leave();
        result
    }

    fn parse_or_expr(&mut self) -> Result<NodeId, ExpressionError> {
        let mut left = self.parse_and_expr()?;
        while self.peek() == &Token::Or || self.is_word("or") {
            self.advance();
            let right = self.parse_and_expr()?;
            left = self.push(Node::Binary {
                op: BinaryOp::Or,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<NodeId, ExpressionError> {
        let mut left = self.parse_not_expr()?;
        while self.peek() == &Token::And || self.is_word("and") {
            self.advance();
            let right = self.parse_not_expr()?;
            left = self.push(Node::Binary {
                op: BinaryOp::And,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn parse_not_expr(&mut self) -> Result<NodeId, ExpressionError> {
        if self.peek() == &Token::Not || self.is_word("not") {
            self.advance();
            self.enter()?;
            let operand = self.parse_not_expr();
            self.leave();
            let operand = operand?;
            return Ok(self.push(Node::Unary {
                op: UnaryOp::Not,
                operand,
            }));
        }
        self.parse_compare_expr()
    }

    fn parse_compare_expr(&mut self) -> Result<NodeId, ExpressionError> {
        let left = self.parse_sum()?;
        let op = match self.peek() {
            Token::Eq => BinaryOp::Eq,
            Token::Neq => BinaryOp::Neq,
            Token::Lt => BinaryOp::Lt,
            Token::Lte => BinaryOp::Lte,
            Token::Gt => BinaryOp::Gt,
            Token::Gte => BinaryOp::Gte,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_sum()?;
        if matches!(
            self.peek(),
            Token::Eq | Token::Neq | Token::Lt | Token::Lte | Token::Gt | Token::Gte
        ) {
            return Err(self.err("comparisons cannot be chained; use 'and'"));
        }
        Ok(self.push(Node::Binary { op, left, right }))
    }

    fn parse_sum(&mut self) -> Result<NodeId, ExpressionError> {
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_product()?;
            left = self.push(Node::Binary { op, left, right });
        }
    }

    fn parse_product(&mut self) -> Result<NodeId, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.push(Node::Binary { op, left, right });
        }
    }

    fn parse_unary(&mut self) -> Result<NodeId, ExpressionError> {
        if self.peek() == &Token::Minus {
            self.advance();
            self.enter()?;
            let operand = self.parse_unary();
            self.leave();
            let operand = operand?;
            return Ok(self.push(Node::Unary {
                op: UnaryOp::Neg,
                operand,
            }));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<NodeId, ExpressionError> {
        match self.peek().clone() {
            Token::Int(n) => {
                self.advance();
                Ok(self.push(Node::Literal(Literal::Number(Decimal::from(n)))))
            }
            Token::Float(f) => {
                let d = f
                    .parse::<Decimal>()
                    .map_err(|e| self.err(format!("invalid decimal '{}': {}", f, e)))?;
                self.advance();
                Ok(self.push(Node::Literal(Literal::Number(d))))
            }
            Token::Str(s) => {
                self.advance();
                Ok(self.push(Node::Literal(Literal::Str(s))))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Token::Word(w) => {
                let offset = self.cur().offset;
                self.advance();
                if self.peek() == &Token::LParen {
                    return self.parse_call(&w, offset);
                }
                let node = match w.as_str() {
                    "true" => Node::Literal(Literal::Bool(true)),
                    "false" => Node::Literal(Literal::Bool(false)),
                    "null" => Node::Literal(Literal::Null),
                    "value" => Node::CurrentValue,
                    "and" | "or" | "not" => {
                        return Err(ExpressionError::parse(
                            offset,
                            format!("unexpected keyword '{}'", w),
                        ))
                    }
                    _ => Node::Field(w),
                };
                Ok(self.push(node))
            }
            other => Err(self.err(format!("expected a value, got {:?}", other))),
        }
    }

    fn parse_call(&mut self, name: &str, offset: usize) -> Result<NodeId, ExpressionError> {
        let func = Function::from_name(name).ok_or_else(|| {
            ExpressionError::parse(offset, format!("unknown function '{}'", name))
        })?;
        self.advance(); // '('
        let mut args = Vec::new();
        if self.peek() != &Token::RParen {
            loop {
                args.push(self.parse_expr()?);
                if self.peek() == &Token::Comma {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect_rparen()?;
        if args.len() != func.arity() {
            return Err(ExpressionError::parse(
                offset,
                format!(
                    "function '{}' takes {} argument(s), got {}",
                    func.name(),
                    func.arity(),
                    args.len()
                ),
            ));
        }
        Ok(self.push(Node::Call { func, args }))
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expression;

    fn root(src: &str) -> (Expression, Node) {
        let expr = Expression::parse(src).unwrap();
        let node = expr.node(expr.root()).clone();
        (expr, node)
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let (expr, node) = root("a = 1 or b = 2 and c = 3");
        match node {
            Node::Binary {
                op: BinaryOp::Or,
                right,
                ..
            } => assert!(matches!(
                expr.node(right),
                Node::Binary {
                    op: BinaryOp::And,
                    ..
                }
            )),
            other => panic!("expected or at root, got {:?}", other),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        let (expr, node) = root("a + b * c > 10");
        let Node::Binary {
            op: BinaryOp::Gt,
            left,
            ..
        } = node
        else {
            panic!("expected comparison at root");
        };
        let Node::Binary {
            op: BinaryOp::Add,
            right,
            ..
        } = expr.node(left)
        else {
            panic!("expected addition on the left");
        };
        assert!(matches!(
            expr.node(*right),
            Node::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn keywords_and_symbols_are_equivalent() {
        let a = Expression::parse("not (x = 1) and y = 2 or z = 3").unwrap();
        let b = Expression::parse("!(x == 1) && y == 2 || z == 3").unwrap();
        assert_eq!(a.nodes(), b.nodes());
    }

    #[test]
    fn unary_minus() {
        let (expr, node) = root("-x");
        let Node::Unary {
            op: UnaryOp::Neg,
            operand,
        } = node
        else {
            panic!("expected negation");
        };
        assert_eq!(expr.node(operand), &Node::Field("x".into()));
    }

    #[test]
    fn function_call_with_arity_check() {
        let (_, node) = root("date_diff(birth_date, visit_date, 'years')");
        assert!(matches!(
            node,
            Node::Call {
                func: Function::DateDiff,
                ..
            }
        ));
        let err = Expression::parse("round(x)").unwrap_err();
        assert!(err.to_string().contains("takes 2 argument(s), got 1"));
    }

    #[test]
    fn unknown_function_is_rejected() {
        let err = Expression::parse("system('rm')").unwrap_err();
        assert_eq!(
            err,
            ExpressionError::Parse {
                offset: 0,
                message: "unknown function 'system'".into()
            }
        );
    }

    #[test]
    fn chained_comparison_is_rejected() {
        assert!(Expression::parse("1 < x < 5").is_err());
    }

    #[test]
    fn trailing_input_is_rejected() {
        assert!(Expression::parse("x = 1 y").is_err());
        assert!(Expression::parse("").is_err());
        assert!(Expression::parse("(x = 1").is_err());
    }

    #[test]
    fn nesting_limit_is_enforced() {
        let limits = ParseLimits {
            max_expression_len: 4096,
            max_nesting_depth: 8,
        };
        let deep = format!("{}x{}", "(".repeat(20), ")".repeat(20));
        let err = Expression::parse_with_limits(&deep, &limits).unwrap_err();
        assert!(err.to_string().contains("nesting exceeds limit"));
        assert!(Expression::parse_with_limits("((x))", &limits).is_ok());
    }

    #[test]
    fn length_limit_is_enforced() {
        let limits = ParseLimits {
            max_expression_len: 10,
            max_nesting_depth: 64,
        };
        assert!(Expression::parse_with_limits("aaaa = bbbbbbbb", &limits).is_err());
    }
}
