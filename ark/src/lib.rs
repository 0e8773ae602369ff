#![forbid(unsafe_code)]

//! Driver for the Ark compiler: project configuration, loading of the
//! import graph, per-level parallel analysis and C lowering, with all
//! problems batched into one report.

mod compile;
mod graph;
pub mod loader;
pub mod manifest;
pub mod report;

pub use compile::{
    CheckedProgram, CompileConfig, CompiledProgram, SOURCE_UNIT, check_entry, check_file,
    check_source, compile_entry, compile_file, compile_source,
};
pub use loader::{FsModuleLoader, LoadError, LoadErrorKind, MemoryLoader, ModuleLoader};
pub use manifest::{ManifestError, ResolvedManifest};
pub use report::{CompileDiagnostic, CompileFailure, CompileReport, Phase};

pub use ark_parse::Dialect;
