#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::fmt;

use ark_ast::Span;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    UnexpectedToken,
    DialectMismatch,
    UnbalancedBlock,
}

impl ParseErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseErrorKind::UnexpectedToken => "UnexpectedToken",
            ParseErrorKind::DialectMismatch => "DialectMismatch",
            ParseErrorKind::UnbalancedBlock => "UnbalancedBlock",
        }
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, Diagnostic)]
#[error("parse error: {message}")]
#[diagnostic(code(ark::parse))]
#[allow(unused_assignments)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
    #[label]
    pub span: Span,
}
