#![forbid(unsafe_code)]

mod ctypes;
mod emit;
mod runtime;

use miette::Diagnostic;
use thiserror::Error;

pub use emit::emit_program;
pub use runtime::{RUNTIME_HEADER, RUNTIME_SOURCE};

pub const PROGRAM_SOURCE: &str = "program.c";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoweringErrorKind {
    /// The checked unit holds something the generator has no form for.
    /// Reaching this is a bug in the analyzer or the generator.
    UnsupportedConstruct,
}

#[derive(Debug, Error, Diagnostic)]
#[error("C lowering error: {message}")]
#[diagnostic(code(ark::backend_c))]
#[allow(unused_assignments)]
pub struct LoweringError {
    pub kind: LoweringErrorKind,
    pub message: String,
}

impl LoweringError {
    pub(crate) fn new(kind: LoweringErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The generated program and the runtime support it links against.
#[derive(Clone, Debug)]
pub struct CArtifacts {
    pub runtime_h: String,
    pub runtime_c: String,
    pub program_c: String,
}

impl CArtifacts {
    /// Output files by name, in the order a C compiler wants them listed.
    pub fn files(&self) -> [(&'static str, &str); 3] {
        [
            (RUNTIME_HEADER, self.runtime_h.as_str()),
            (RUNTIME_SOURCE, self.runtime_c.as_str()),
            (PROGRAM_SOURCE, self.program_c.as_str()),
        ]
    }
}
