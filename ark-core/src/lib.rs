#![forbid(unsafe_code)]

mod builtins;
mod error;
mod infer;
mod interface;
mod scope;
mod sema;
mod types;
mod unit;

use std::sync::Arc;

use ark_ast::Program;

pub use builtins::Builtin;
pub use error::{SemanticError, SemanticErrorKind};
pub use interface::{
    ArtifactInfo, GlobalInfo, ImportFailure, MethodInfo, ModuleInterface, ModuleResolver,
    NoImports, ParamSig, ProcSig, PropInfo,
};
pub use scope::{Symbol, SymbolId, SymbolKind};
pub use types::{ArtifactRef, ModuleId, Type};
pub use unit::{
    CallTarget, CheckedUnit, ParamInfo, ProcId, ProcInfo, ProcKind, ProcRef, Receiver, Resolution,
};

/// Checks one parsed unit. Imports are answered by `resolver`, which must only
/// hand out interfaces of units that analyzed cleanly.
///
/// All diagnostics found in the unit are returned together, ordered by source
/// position.
pub fn analyze(
    module: ModuleId,
    program: Program,
    resolver: &dyn ModuleResolver,
) -> Result<CheckedUnit, Vec<SemanticError>> {
    let tables = {
        let mut analyzer = sema::Analyzer::new(module.clone(), resolver);
        analyzer.run(&program);
        analyzer.finish()?
    };

    Ok(CheckedUnit {
        module,
        program,
        symbols: tables.symbols,
        expr_types: tables.expr_types,
        widened: tables.widened,
        resolutions: tables.resolutions,
        calls: tables.calls,
        decl_symbols: tables.decl_symbols,
        procs: tables.procs,
        proc_decls: tables.proc_decls,
        artifacts: tables.artifacts,
        interface: Arc::new(tables.interface),
    })
}
