#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use ark_ast::{LineIndex, Span};
use ark_backend_c::LoweringError;
use ark_core::SemanticError;
use ark_lex::LexError;
use ark_parse::ParseError;
use miette::{Diagnostic, GraphicalReportHandler, GraphicalTheme, IntoDiagnostic, NamedSource};
use serde::Serialize;
use thiserror::Error;

use crate::loader::LoadError;
use crate::manifest::ManifestError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Config,
    Load,
    Lex,
    Parse,
    Semantic,
    Lowering,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Config => "config",
            Phase::Load => "load",
            Phase::Lex => "lex",
            Phase::Parse => "parse",
            Phase::Semantic => "semantic",
            Phase::Lowering => "lowering",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One position-tagged problem, from any phase.
#[derive(Clone, Debug, Error, Diagnostic, Serialize)]
#[error("{phase} error [{kind}]: {message}")]
#[diagnostic(code(ark::compile))]
pub struct CompileDiagnostic {
    pub phase: Phase,
    pub kind: String,
    /// Path of the unit the problem is in.
    pub unit: String,
    /// 1-based; 0 when the problem has no source position.
    pub line: u32,
    pub column: u32,
    pub message: String,
    #[serde(skip)]
    #[label]
    pub span: Option<Span>,
}

impl CompileDiagnostic {
    pub fn unpositioned(phase: Phase, kind: &str, unit: &str, message: impl Into<String>) -> Self {
        Self {
            phase,
            kind: kind.to_string(),
            unit: unit.to_string(),
            line: 0,
            column: 0,
            message: message.into(),
            span: None,
        }
    }

    pub fn from_lex(unit: &str, e: &LexError) -> Self {
        Self {
            phase: Phase::Lex,
            kind: e.kind.as_str().to_string(),
            unit: unit.to_string(),
            line: e.line,
            column: e.column,
            message: e.message.clone(),
            span: Some(e.span),
        }
    }

    pub fn from_parse(unit: &str, e: &ParseError) -> Self {
        Self {
            phase: Phase::Parse,
            kind: e.kind.as_str().to_string(),
            unit: unit.to_string(),
            line: e.line,
            column: e.column,
            message: e.message.clone(),
            span: Some(e.span),
        }
    }

    pub fn from_semantic(unit: &str, index: &LineIndex, e: &SemanticError) -> Self {
        let pos = index.line_col(e.span);
        Self {
            phase: Phase::Semantic,
            kind: e.kind.as_str().to_string(),
            unit: unit.to_string(),
            line: pos.line,
            column: pos.col,
            message: e.message.clone(),
            span: Some(e.span),
        }
    }

    /// A load failure, placed at the import that asked for the unit when
    /// there is one.
    pub fn from_load(unit: &str, at: Option<(&LineIndex, Span)>, e: &LoadError) -> Self {
        let mut out = Self::unpositioned(Phase::Load, e.kind.as_str(), unit, e.message.clone());
        if let Some((index, span)) = at {
            let pos = index.line_col(span);
            out.line = pos.line;
            out.column = pos.col;
            out.span = Some(span);
        }
        out
    }

    pub fn from_lowering(unit: &str, e: &LoweringError) -> Self {
        Self::unpositioned(Phase::Lowering, "UnsupportedConstruct", unit, e.message.clone())
    }

    pub fn from_manifest(unit: &str, e: &ManifestError) -> Self {
        Self::unpositioned(Phase::Config, "Manifest", unit, e.message.clone())
    }
}

/// Everything that went wrong in one compilation, in unit discovery order
/// and source order within each unit.
#[derive(Clone, Debug, Error, Diagnostic)]
#[error("compilation failed with {} error(s)", .diagnostics.len())]
#[diagnostic(code(ark::failed))]
pub struct CompileFailure {
    #[related]
    pub diagnostics: Vec<CompileDiagnostic>,
    sources: BTreeMap<String, Arc<str>>,
}

impl CompileFailure {
    pub(crate) fn new(diagnostics: Vec<CompileDiagnostic>, sources: BTreeMap<String, Arc<str>>) -> Self {
        Self {
            diagnostics,
            sources,
        }
    }

    pub(crate) fn single(diagnostic: CompileDiagnostic) -> Self {
        Self::new(vec![diagnostic], BTreeMap::new())
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.diagnostics.iter().filter(|d| d.phase == phase).count()
    }

    /// Renders every diagnostic against the text of its unit.
    pub fn render(&self) -> String {
        let handler = GraphicalReportHandler::new_themed(GraphicalTheme::unicode_nocolor());
        let mut out = String::new();
        for diag in &self.diagnostics {
            let report = match self.sources.get(&diag.unit) {
                Some(src) if diag.span.is_some() => miette::Report::new(diag.clone())
                    .with_source_code(NamedSource::new(diag.unit.clone(), src.to_string())),
                _ => miette::Report::new(diag.clone()),
            };
            if handler.render_report(&mut out, &*report).is_err() {
                let _ = writeln!(out, "{diag}");
            }
        }
        out
    }

    pub fn to_report(&self) -> CompileReport<'_> {
        CompileReport {
            schema: REPORT_SCHEMA,
            ok: false,
            diagnostics: &self.diagnostics,
        }
    }
}

pub const REPORT_SCHEMA: &str = "ark.compile-report.v1";

#[derive(Debug, Clone, Serialize)]
pub struct CompileReport<'a> {
    pub schema: &'static str,
    pub ok: bool,
    pub diagnostics: &'a [CompileDiagnostic],
}

impl CompileReport<'_> {
    pub fn success() -> Self {
        CompileReport {
            schema: REPORT_SCHEMA,
            ok: true,
            diagnostics: &[],
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

pub fn write_report(report: &CompileReport<'_>, out_path: &Path) -> miette::Result<()> {
    if let Some(parent) = out_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).into_diagnostic()?;
        }
    }
    let text = report.to_json().into_diagnostic()?;
    fs::write(out_path, text).into_diagnostic()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CompileFailure {
        let src = "x ::= 1\nx = 2\n";
        let index = LineIndex::new(src);
        let err = SemanticError::new(
            ark_core::SemanticErrorKind::ImmutableAssignment,
            ark_ast::span(8, 1),
            "cannot assign to immutable `x`",
        );
        let diag = CompileDiagnostic::from_semantic("main.ark", &index, &err);
        let mut sources = BTreeMap::new();
        sources.insert("main.ark".to_string(), Arc::from(src));
        CompileFailure::new(vec![diag], sources)
    }

    #[test]
    fn semantic_positions_are_one_based() {
        let failure = sample();
        let d = &failure.diagnostics[0];
        assert_eq!((d.line, d.column), (2, 1));
        assert_eq!(d.kind, "ImmutableAssignment");
        assert_eq!(failure.count(Phase::Semantic), 1);
    }

    #[test]
    fn json_report_carries_every_field() {
        let failure = sample();
        let json = failure.to_report().to_json().expect("serializable");
        let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
        assert_eq!(value["schema"], REPORT_SCHEMA);
        assert_eq!(value["ok"], false);
        let d = &value["diagnostics"][0];
        assert_eq!(d["phase"], "semantic");
        assert_eq!(d["unit"], "main.ark");
        assert_eq!(d["line"], 2);
        assert_eq!(d["column"], 1);
        assert!(d.get("span").is_none());
    }

    #[test]
    fn rendering_quotes_the_source() {
        let text = sample().render();
        assert!(text.contains("ImmutableAssignment"), "{text}");
        assert!(text.contains("main.ark"), "{text}");
        assert!(text.contains("x = 2"), "{text}");
    }

    #[test]
    fn reports_are_written_as_json() {
        let dir = tempfile::tempdir().expect("temp dir");
        let out = dir.path().join("reports/check.json");
        write_report(&CompileReport::success(), &out).expect("report written");
        let text = fs::read_to_string(&out).expect("report readable");
        assert!(text.contains("\"ok\": true"), "{text}");
    }
}
