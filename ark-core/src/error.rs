#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::fmt;

use ark_ast::Span;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SemanticErrorKind {
    UndefinedSymbol,
    Redeclaration,
    ImmutableAssignment,
    TypeMismatch,
    ReturnTypeConflict,
    ControlOutsideLoop,
    ReturnOutsideProc,
    UnknownProperty,
    ArraySizeMismatch,
    ConstantIndexOutOfRange,
    CircularImport,
}

impl SemanticErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SemanticErrorKind::UndefinedSymbol => "UndefinedSymbol",
            SemanticErrorKind::Redeclaration => "Redeclaration",
            SemanticErrorKind::ImmutableAssignment => "ImmutableAssignment",
            SemanticErrorKind::TypeMismatch => "TypeMismatch",
            SemanticErrorKind::ReturnTypeConflict => "ReturnTypeConflict",
            SemanticErrorKind::ControlOutsideLoop => "ControlOutsideLoop",
            SemanticErrorKind::ReturnOutsideProc => "ReturnOutsideProc",
            SemanticErrorKind::UnknownProperty => "UnknownProperty",
            SemanticErrorKind::ArraySizeMismatch => "ArraySizeMismatch",
            SemanticErrorKind::ConstantIndexOutOfRange => "ConstantIndexOutOfRange",
            SemanticErrorKind::CircularImport => "CircularImport",
        }
    }
}

impl fmt::Display for SemanticErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, Diagnostic)]
#[error("semantic error: {message}")]
#[diagnostic(code(ark::sema))]
#[allow(unused_assignments)]
pub struct SemanticError {
    pub kind: SemanticErrorKind,
    pub message: String,
    #[label]
    pub span: Span,
}

impl SemanticError {
    pub fn new(kind: SemanticErrorKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }
}
