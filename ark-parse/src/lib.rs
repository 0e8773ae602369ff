#![forbid(unsafe_code)]

mod error;
mod fmt;
mod parser;

use std::str::FromStr;

use ark_lex::{LexError, Lexer};

pub use error::{ParseError, ParseErrorKind};
pub use fmt::{format_expr, format_program};
pub use parser::Parser;

/// Which declaration syntax a compile unit is written in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// `x := 1`, `x ::= 1`, `x: int`, optional parameter and return types.
    #[default]
    Inferred,
    /// `x: int = 1`, `x :: int = 1`, explicit types everywhere, procedure types.
    Strict,
}

impl Dialect {
    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Inferred => "inferred",
            Dialect::Strict => "strict",
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inferred" => Ok(Dialect::Inferred),
            "strict" => Ok(Dialect::Strict),
            other => Err(format!(
                "unknown dialect '{other}' (expected 'inferred' or 'strict')"
            )),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseConfig {
    pub dialect: Dialect,
}

impl ParseConfig {
    pub fn strict() -> Self {
        Self {
            dialect: Dialect::Strict,
        }
    }
}

/// Best-effort parse result: a (possibly partial) program plus every lex and
/// parse error found along the way.
#[derive(Debug)]
pub struct ParseOutput {
    pub program: ark_ast::Program,
    pub lex_errors: Vec<LexError>,
    pub errors: Vec<ParseError>,
}

impl ParseOutput {
    pub fn is_clean(&self) -> bool {
        self.lex_errors.is_empty() && self.errors.is_empty()
    }
}

pub fn parse_source(src: &str) -> miette::Result<ark_ast::Program> {
    parse_source_with_config(src, &ParseConfig::default())
}

pub fn parse_source_with_config(src: &str, config: &ParseConfig) -> miette::Result<ark_ast::Program> {
    let tokens = Lexer::new(src).lex()?;
    let mut parser = Parser::new_with_config(&tokens, config);
    Ok(parser.parse_program()?)
}

/// Parse a source file while attempting to recover from errors.
///
/// Bad tokens are dropped; a failed statement is skipped up to the next
/// statement boundary and parsing continues.
pub fn parse_source_with_recovery(src: &str, config: &ParseConfig) -> ParseOutput {
    let (tokens, lex_errors) = Lexer::new(src).lex_all();
    let mut parser = Parser::new_with_config(&tokens, config);
    let (program, errors) = parser.parse_program_with_recovery();
    ParseOutput {
        program,
        lex_errors,
        errors,
    }
}

pub fn parse_expr(src: &str) -> miette::Result<ark_ast::Expr> {
    let tokens = Lexer::new(src).lex()?;
    let mut parser = Parser::new(&tokens);
    Ok(parser.parse_expr_eof()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ast::{BinOp, ExprKind, Stmt};

    fn binary_op(e: &ark_ast::Expr) -> BinOp {
        match &e.kind {
            ExprKind::Binary { op, .. } => *op,
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let e = parse_expr("2 + 3 * 4").unwrap();
        let ExprKind::Binary { left, op, right } = &e.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::Add);
        assert_eq!(left.kind, ExprKind::Int(2));
        assert_eq!(binary_op(right), BinOp::Mul);
    }

    #[test]
    fn logical_and_binds_tighter_than_or() {
        let e = parse_expr("x && y || z").unwrap();
        assert_eq!(binary_op(&e), BinOp::Or);
        let ExprKind::Binary { left, .. } = &e.kind else {
            unreachable!()
        };
        assert_eq!(binary_op(left), BinOp::And);
    }

    #[test]
    fn bitwise_and_is_below_equality() {
        let e = parse_expr("a & b == c").unwrap();
        assert_eq!(binary_op(&e), BinOp::BitAnd);
        let ExprKind::Binary { right, .. } = &e.kind else {
            unreachable!()
        };
        assert_eq!(binary_op(right), BinOp::Eq);
    }

    #[test]
    fn subtraction_is_left_associative() {
        let e = parse_expr("10 - 4 - 3").unwrap();
        let ExprKind::Binary { left, right, .. } = &e.kind else {
            unreachable!()
        };
        assert_eq!(binary_op(left), BinOp::Sub);
        assert_eq!(right.kind, ExprKind::Int(3));
    }

    #[test]
    fn dialect_names_parse() {
        assert_eq!("Strict".parse::<Dialect>().unwrap(), Dialect::Strict);
        assert!("loose".parse::<Dialect>().is_err());
    }

    #[test]
    fn recovery_collects_lex_and_parse_errors() {
        let out = parse_source_with_recovery("a := 1 @\nb := )\nc := 3\n", &ParseConfig::default());
        assert_eq!(out.lex_errors.len(), 1);
        assert_eq!(out.errors.len(), 1);
        assert!(matches!(out.program.stmts.last(), Some(Stmt::Var(v)) if v.name.node == "c"));
    }
}
