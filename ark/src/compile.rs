#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ark_ast::{ImportStmt, Program};
use ark_backend_c::{CArtifacts, emit_program};
use ark_core::{
    CheckedUnit, ImportFailure, ModuleId, ModuleInterface, ModuleResolver, SemanticError, analyze,
};
use ark_parse::{Dialect, ParseConfig};
use miette::IntoDiagnostic;
use rayon::prelude::*;

use crate::graph::{ModuleGraph, unit_label};
use crate::loader::{FsModuleLoader, LoadError, LoadErrorKind, MemoryLoader, ModuleLoader};
use crate::manifest::{ResolvedManifest, load_resolved_manifest};
use crate::report::{CompileDiagnostic, CompileFailure};

/// Name given to a unit compiled from a string.
pub const SOURCE_UNIT: &str = "main.ark";

/// Programmatic mirror of the `[project]` table of `ark.toml`.
#[derive(Clone, Debug, Default)]
pub struct CompileConfig {
    pub dialect: Dialect,
    /// Where bare `Mod name` imports resolve. Defaults to the entry's directory.
    pub search_root: Option<PathBuf>,
}

impl CompileConfig {
    pub fn strict() -> Self {
        Self {
            dialect: Dialect::Strict,
            search_root: None,
        }
    }

    pub fn from_manifest(manifest: &ResolvedManifest) -> Self {
        Self {
            dialect: manifest.dialect,
            search_root: Some(manifest.search_root.clone()),
        }
    }

    fn parse_config(&self) -> ParseConfig {
        ParseConfig {
            dialect: self.dialect,
        }
    }
}

/// A clean program: every unit checked, dependencies before their importers.
#[derive(Debug)]
pub struct CheckedProgram {
    pub units: Vec<CheckedUnit>,
}

impl CheckedProgram {
    pub fn entry(&self) -> Option<&CheckedUnit> {
        self.units.last()
    }
}

#[derive(Debug)]
pub struct CompiledProgram {
    pub units: Vec<CheckedUnit>,
    pub c: CArtifacts,
}

impl CompiledProgram {
    /// Writes the runtime support files and the program into `dir`.
    pub fn write_to(&self, dir: &Path) -> miette::Result<Vec<PathBuf>> {
        fs::create_dir_all(dir).into_diagnostic()?;
        let mut written = Vec::new();
        for (name, text) in self.c.files() {
            let path = dir.join(name);
            fs::write(&path, text).into_diagnostic()?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Answers imports from the interfaces of units that already analyzed cleanly.
struct GraphResolver<'a> {
    graph: &'a ModuleGraph,
    published: &'a HashMap<ModuleId, Arc<ModuleInterface>>,
}

impl ModuleResolver for GraphResolver<'_> {
    fn resolve(
        &self,
        importer: &ModuleId,
        import: &ImportStmt,
    ) -> Result<Arc<ModuleInterface>, ImportFailure> {
        let edge = self
            .graph
            .unit_of(importer)
            .and_then(|unit| unit.imports.iter().find(|e| e.span == import.span))
            .ok_or(ImportFailure::Failed)?;

        match &edge.target {
            Err(LoadError {
                kind: LoadErrorKind::NotFound,
                ..
            }) => Err(ImportFailure::NotFound(import.path.clone())),
            Err(LoadError {
                kind: LoadErrorKind::Circular,
                ..
            }) => Err(ImportFailure::Circular(import.path.clone())),
            Err(_) => Err(ImportFailure::Failed),
            Ok(_) if edge.circular => Err(ImportFailure::Circular(import.path.clone())),
            Ok(target) => {
                let module = &self.graph.units[*target].module;
                self.published
                    .get(module)
                    .cloned()
                    .ok_or(ImportFailure::Failed)
            }
        }
    }

    fn interface(&self, module: &ModuleId) -> Option<Arc<ModuleInterface>> {
        self.published.get(module).cloned()
    }
}

/// Loads, parses and analyzes `entry` and everything it imports.
///
/// Units of one dependency level are analyzed in parallel; a unit's interface
/// is published only once its analysis came back clean. All problems from
/// all units are returned together.
pub fn check_entry(
    entry: &Path,
    loader: &dyn ModuleLoader,
    config: &CompileConfig,
) -> Result<CheckedProgram, CompileFailure> {
    let search_root = match &config.search_root {
        Some(root) => root.clone(),
        None => entry.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    let mut graph = ModuleGraph::discover(entry, loader, &search_root, &config.parse_config())?;

    let mut published: HashMap<ModuleId, Arc<ModuleInterface>> = HashMap::new();
    let mut checked: Vec<Option<CheckedUnit>> = graph.units.iter().map(|_| None).collect();
    let mut failures: Vec<(usize, Vec<SemanticError>)> = Vec::new();
    let levels = graph.levels();

    for level in &levels {
        let jobs: Vec<(usize, Program)> = level
            .iter()
            .filter_map(|&i| {
                let unit = &mut graph.units[i];
                if unit.is_clean() {
                    unit.program.take().map(|p| (i, p))
                } else {
                    None
                }
            })
            .collect();

        let resolver = GraphResolver {
            graph: &graph,
            published: &published,
        };
        let results: Vec<(usize, Result<CheckedUnit, Vec<SemanticError>>)> = jobs
            .into_par_iter()
            .map(|(i, program)| {
                let module = graph.units[i].module.clone();
                (i, analyze(module, program, &resolver))
            })
            .collect();

        for (i, result) in results {
            match result {
                Ok(unit) => {
                    published.insert(unit.module.clone(), Arc::clone(&unit.interface));
                    checked[i] = Some(unit);
                }
                Err(errors) => failures.push((i, errors)),
            }
        }
    }

    for (i, errors) in failures {
        let unit = &mut graph.units[i];
        for e in &errors {
            let diag = CompileDiagnostic::from_semantic(&unit.label, &unit.index, e);
            unit.diagnostics.push(diag);
        }
    }

    let diagnostics: Vec<CompileDiagnostic> = graph
        .units
        .iter()
        .flat_map(|u| u.diagnostics.iter().cloned())
        .collect();
    if !diagnostics.is_empty() {
        return Err(CompileFailure::new(diagnostics, graph.sources()));
    }

    let units = levels
        .iter()
        .flatten()
        .filter_map(|&i| checked[i].take())
        .collect();
    Ok(CheckedProgram { units })
}

/// `check_entry`, then lowering of the whole program to C.
pub fn compile_entry(
    entry: &Path,
    loader: &dyn ModuleLoader,
    config: &CompileConfig,
) -> Result<CompiledProgram, CompileFailure> {
    let checked = check_entry(entry, loader, config)?;
    let c = emit_program(&checked.units).map_err(|e| {
        let root = config.search_root.clone().unwrap_or_default();
        CompileFailure::single(CompileDiagnostic::from_lowering(&unit_label(entry, &root), &e))
    })?;
    Ok(CompiledProgram {
        units: checked.units,
        c,
    })
}

/// Checks a file on disk, configured by the `ark.toml` above it if any.
pub fn check_file(path: &Path) -> Result<CheckedProgram, CompileFailure> {
    let (entry, config) = file_setup(path)?;
    check_entry(&entry, &FsModuleLoader, &config)
}

pub fn compile_file(path: &Path) -> Result<CompiledProgram, CompileFailure> {
    let (entry, config) = file_setup(path)?;
    compile_entry(&entry, &FsModuleLoader, &config)
}

fn file_setup(path: &Path) -> Result<(PathBuf, CompileConfig), CompileFailure> {
    let label = path.display().to_string();
    let entry = std::path::absolute(path).map_err(|e| {
        CompileFailure::single(CompileDiagnostic::from_load(&label, None, &LoadError::io(path, &e)))
    })?;
    let manifest = load_resolved_manifest(&entry)
        .map_err(|e| CompileFailure::single(CompileDiagnostic::from_manifest(&label, &e)))?;
    Ok((entry, CompileConfig::from_manifest(&manifest)))
}

/// Checks a single self-contained unit. Any import it makes is unresolved.
pub fn check_source(src: &str, config: &CompileConfig) -> Result<CheckedProgram, CompileFailure> {
    let loader = MemoryLoader::new().with(SOURCE_UNIT, src);
    check_entry(Path::new(SOURCE_UNIT), &loader, config)
}

pub fn compile_source(src: &str, config: &CompileConfig) -> Result<CompiledProgram, CompileFailure> {
    let loader = MemoryLoader::new().with(SOURCE_UNIT, src);
    compile_entry(Path::new(SOURCE_UNIT), &loader, config)
}
