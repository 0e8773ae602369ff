#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use ark_ast::{ArtifactKind, ImportStmt};

use crate::types::{ModuleId, Type};

/// Everything a unit exports: its module-level globals, procedures and
/// artifacts. Published once the unit is clean and never mutated afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleInterface {
    pub module: ModuleId,
    pub globals: BTreeMap<String, GlobalInfo>,
    pub procs: BTreeMap<String, ProcSig>,
    pub artifacts: BTreeMap<String, ArtifactInfo>,
}

impl ModuleInterface {
    pub fn empty(module: ModuleId) -> Self {
        Self {
            module,
            globals: BTreeMap::new(),
            procs: BTreeMap::new(),
            artifacts: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GlobalInfo {
    pub ty: Type,
    /// As declared; importers always see it as immutable.
    pub mutable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcSig {
    pub params: Vec<ParamSig>,
    pub ret: Type,
}

impl ProcSig {
    pub fn required(&self) -> usize {
        self.params.iter().take_while(|p| !p.has_default).count()
    }

    pub fn proc_type(&self) -> Type {
        Type::Proc(
            self.params.iter().map(|p| p.ty.clone()).collect(),
            Box::new(self.ret.clone()),
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParamSig {
    pub name: String,
    pub ty: Type,
    pub has_default: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArtifactInfo {
    pub name: String,
    pub module: ModuleId,
    pub kind: ArtifactKind,
    /// Record fields or namespace constants, in declaration order.
    pub props: Vec<PropInfo>,
    /// Record methods or namespace procedures.
    pub methods: Vec<MethodInfo>,
    /// Enum cases with their resolved values.
    pub cases: Vec<(String, i64)>,
}

impl ArtifactInfo {
    pub fn prop(&self, name: &str) -> Option<&PropInfo> {
        self.props.iter().find(|p| p.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn case(&self, name: &str) -> Option<i64> {
        self.cases.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PropInfo {
    pub name: String,
    pub ty: Type,
    pub mutable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodInfo {
    pub name: String,
    pub sig: ProcSig,
    pub mutates_self: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportFailure {
    NotFound(String),
    Circular(String),
    /// The module exists but failed to compile; its own diagnostics cover it.
    Failed,
}

/// Supplies the published interfaces of imported units.
pub trait ModuleResolver: Sync {
    fn resolve(
        &self,
        importer: &ModuleId,
        import: &ImportStmt,
    ) -> Result<Arc<ModuleInterface>, ImportFailure>;

    /// Interface of an already published unit, for types that reach this unit
    /// through another module's signatures.
    fn interface(&self, module: &ModuleId) -> Option<Arc<ModuleInterface>>;
}

/// Resolver for units that import nothing.
pub struct NoImports;

impl ModuleResolver for NoImports {
    fn resolve(
        &self,
        _importer: &ModuleId,
        import: &ImportStmt,
    ) -> Result<Arc<ModuleInterface>, ImportFailure> {
        Err(ImportFailure::NotFound(import.path.clone()))
    }

    fn interface(&self, _module: &ModuleId) -> Option<Arc<ModuleInterface>> {
        None
    }
}
