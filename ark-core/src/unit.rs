#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ark_ast::{NodeId, Program};

use crate::builtins::Builtin;
use crate::interface::{ArtifactInfo, ModuleInterface, ProcSig};
use crate::scope::{Symbol, SymbolId};
use crate::types::{ArtifactRef, ModuleId, Type};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcId(pub u32);

/// A module-level procedure, namespace procedure or method, named by its
/// defining module and path (`["area"]`, `["Geo", "area"]`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProcRef {
    pub module: ModuleId,
    pub path: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProcKind {
    TopLevel,
    /// Declared inside a procedure body (or a module-level block when `parent`
    /// is `None`).
    Nested { parent: Option<ProcId> },
    Method { artifact: ArtifactRef, mutates_self: bool },
    NamespaceProc { artifact: ArtifactRef },
}

#[derive(Clone, Debug)]
pub struct ParamInfo {
    pub name: String,
    pub ty: Type,
    pub has_default: bool,
    pub symbol: SymbolId,
}

#[derive(Clone, Debug)]
pub struct ProcInfo {
    pub id: ProcId,
    pub name: String,
    pub path: Vec<String>,
    pub decl: NodeId,
    pub params: Vec<ParamInfo>,
    pub ret: Type,
    pub kind: ProcKind,
    /// Enclosing-procedure locals read by this procedure, in first-use order.
    /// Copied into its environment when the procedure value is created.
    pub captures: Vec<SymbolId>,
    pub nested_in: Option<ProcId>,
}

impl ProcInfo {
    pub fn sig(&self) -> ProcSig {
        ProcSig {
            params: self
                .params
                .iter()
                .map(|p| crate::interface::ParamSig {
                    name: p.name.clone(),
                    ty: p.ty.clone(),
                    has_default: p.has_default,
                })
                .collect(),
            ret: self.ret.clone(),
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.kind, ProcKind::Nested { .. })
    }

    pub fn is_method(&self) -> bool {
        matches!(self.kind, ProcKind::Method { .. })
    }
}

/// What a name, `.name` or `base.name` expression denotes.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    /// Local, parameter, loop variable, module global or nested procedure.
    Var(SymbolId),
    /// Module-level or namespace procedure used as a value.
    Proc(ProcRef),
    /// Imported global, or namespace constant (`path` = `[Ns, name]`).
    Global { module: ModuleId, path: Vec<String> },
    EnumCase { artifact: ArtifactRef, value: i64 },
    /// `value.name` on a record value.
    Field(String),
    /// `.name` inside a record method.
    SelfField(String),
    /// Static path segments; never values on their own.
    Module(ModuleId),
    Artifact(ArtifactRef),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Receiver {
    /// The base of the `base.method(...)` expression.
    Value,
    /// `.method(...)` inside a method of the same record.
    SelfRef,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CallTarget {
    Proc {
        proc: ProcRef,
        supplied: usize,
        total: usize,
    },
    NestedProc {
        symbol: SymbolId,
        proc: ProcId,
        supplied: usize,
        total: usize,
    },
    Method {
        artifact: ArtifactRef,
        method: String,
        supplied: usize,
        total: usize,
        mutating: bool,
        receiver: Receiver,
    },
    Constructor {
        artifact: ArtifactRef,
        supplied: usize,
        total: usize,
    },
    /// Call through a procedure value; every argument is supplied.
    Value,
    Builtin(Builtin),
    ListPush,
    ListPop,
}

/// A type-checked compile unit: the program plus every side table lowering
/// needs. Only produced for units without errors.
#[derive(Debug)]
pub struct CheckedUnit {
    pub module: ModuleId,
    pub program: Program,
    pub symbols: Vec<Symbol>,
    pub expr_types: HashMap<NodeId, Type>,
    /// Integer expressions converted to float where they are used.
    pub widened: HashSet<NodeId>,
    pub resolutions: HashMap<NodeId, Resolution>,
    pub calls: HashMap<NodeId, CallTarget>,
    /// Symbol introduced by each variable declaration, parameter, range-for
    /// and nested procedure declaration.
    pub decl_symbols: HashMap<NodeId, SymbolId>,
    pub procs: Vec<ProcInfo>,
    pub proc_decls: HashMap<NodeId, ProcId>,
    /// Local artifacts by declaration node.
    pub artifacts: HashMap<NodeId, ArtifactInfo>,
    pub interface: Arc<ModuleInterface>,
}

impl CheckedUnit {
    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn proc(&self, id: ProcId) -> &ProcInfo {
        &self.procs[id.0 as usize]
    }

    pub fn type_of(&self, id: NodeId) -> &Type {
        self.expr_types.get(&id).unwrap_or(&Type::Unknown)
    }
}
