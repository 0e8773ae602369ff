#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ark_ast::{
    ArtifactDecl, ArtifactKind, Block, Ident, ImportStmt, Member, NodeId, Param, ProcDecl,
    Program, Span, Stmt, TypeRef, TypeRefKind, VarDecl,
};

use crate::error::{SemanticError, SemanticErrorKind};
use crate::interface::{
    ArtifactInfo, GlobalInfo, ImportFailure, MethodInfo, ModuleInterface, ModuleResolver,
    PropInfo,
};
use crate::scope::{Binding, ScopeArena, ScopeId, Symbol, SymbolId, SymbolKind};
use crate::types::{ArtifactRef, ModuleId, Type};
use crate::unit::{CallTarget, ParamInfo, ProcId, ProcInfo, ProcKind, Resolution};

type SemResult<T> = Result<T, SemanticError>;

/// Largest element count of a fixed array; arrays live on the C stack.
pub(crate) const MAX_ARRAY_LEN: u64 = 65_536;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum State {
    Unchecked,
    InProgress,
    Done,
}

/// What `.name` refers to in the code being checked.
#[derive(Clone, Debug)]
pub(crate) enum SelfCtx {
    Record { artifact: ArtifactRef, method: ProcId },
    Namespace(ArtifactRef),
}

#[derive(Clone, Debug)]
pub(crate) struct Ctx {
    pub(crate) scope: ScopeId,
    /// Procedure whose body is being checked; `None` for module-level code.
    pub(crate) proc: Option<ProcId>,
    pub(crate) loops: u32,
    pub(crate) this: Option<SelfCtx>,
    /// Index of the module-level statement being checked. Module-level code
    /// only sees globals declared before it.
    pub(crate) position: Option<usize>,
}

impl Ctx {
    fn with_scope(&self, scope: ScopeId) -> Ctx {
        Ctx {
            scope,
            ..self.clone()
        }
    }
}

pub(crate) struct ProcMeta<'a> {
    pub(crate) decl: &'a ProcDecl,
    body_parent: ScopeId,
    this: Option<SelfCtx>,
    sig: State,
    pub(crate) body: State,
    ret_declared: bool,
    pub(crate) ret: Option<Type>,
    pub(crate) direct_mutation: bool,
}

pub(crate) struct GlobalSlot<'a> {
    decl: &'a VarDecl,
    pub(crate) position: usize,
    pub(crate) declared: Option<Type>,
    pub(crate) state: State,
}

pub(crate) struct LocalArtifact<'a> {
    decl: &'a ArtifactDecl,
    pub(crate) aref: ArtifactRef,
    pub(crate) position: usize,
    state: State,
    pub(crate) props: Vec<PropInfo>,
    pub(crate) methods: Vec<(String, ProcId)>,
    pub(crate) cases: Vec<(String, i64)>,
}

impl LocalArtifact<'_> {
    pub(crate) fn kind(&self) -> ArtifactKind {
        self.decl.kind
    }

    /// Declared member, whether or not its type is known yet.
    pub(crate) fn declares(&self, name: &str) -> bool {
        self.decl.members.iter().any(|m| match m {
            Member::Prop(v) => v.name.node == name,
            Member::Proc(p) => p.name.node == name,
            Member::Case(c) => c.name.node == name,
        })
    }
}

pub(crate) struct Import {
    pub(crate) interface: Option<Arc<ModuleInterface>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PlaceRoot {
    Symbol(SymbolId),
    /// A property of the receiver inside a record method.
    SelfRef,
    /// Imported globals, namespace constants and procedures.
    Static,
    /// Call results and literals.
    Temp,
}

#[derive(Clone, Debug)]
pub(crate) struct PlaceInfo {
    pub(crate) root: PlaceRoot,
    pub(crate) mutable: bool,
    pub(crate) reason: String,
}

/// A method call whose receiver mutability can only be judged once every
/// method is known to mutate or not.
pub(crate) struct PendingReceiver {
    pub(crate) call: NodeId,
    pub(crate) span: Span,
    pub(crate) place: PlaceInfo,
    pub(crate) artifact: ArtifactRef,
    pub(crate) method: String,
    pub(crate) caller: Option<ProcId>,
}

pub(crate) struct Tables {
    pub(crate) symbols: Vec<Symbol>,
    pub(crate) expr_types: HashMap<NodeId, Type>,
    pub(crate) widened: HashSet<NodeId>,
    pub(crate) resolutions: HashMap<NodeId, Resolution>,
    pub(crate) calls: HashMap<NodeId, CallTarget>,
    pub(crate) decl_symbols: HashMap<NodeId, SymbolId>,
    pub(crate) procs: Vec<ProcInfo>,
    pub(crate) proc_decls: HashMap<NodeId, ProcId>,
    pub(crate) artifacts: HashMap<NodeId, ArtifactInfo>,
    pub(crate) interface: ModuleInterface,
}

pub(crate) struct Analyzer<'a> {
    pub(crate) module: ModuleId,
    resolver: &'a dyn ModuleResolver,
    pub(crate) scopes: ScopeArena,
    pub(crate) module_scope: ScopeId,
    pub(crate) symbols: Vec<Symbol>,
    pub(crate) procs: Vec<ProcInfo>,
    pub(crate) metas: Vec<ProcMeta<'a>>,
    pub(crate) globals: HashMap<SymbolId, GlobalSlot<'a>>,
    pub(crate) artifacts: Vec<LocalArtifact<'a>>,
    artifact_index: HashMap<String, usize>,
    artifact_decls: HashMap<NodeId, usize>,
    pub(crate) imports: Vec<Import>,
    known: HashMap<ModuleId, Arc<ModuleInterface>>,
    pub(crate) expr_types: HashMap<NodeId, Type>,
    pub(crate) widened: HashSet<NodeId>,
    pub(crate) resolutions: HashMap<NodeId, Resolution>,
    pub(crate) calls: HashMap<NodeId, CallTarget>,
    pub(crate) decl_symbols: HashMap<NodeId, SymbolId>,
    pub(crate) proc_decls: HashMap<NodeId, ProcId>,
    pub(crate) pending: Vec<PendingReceiver>,
    pub(crate) errors: Vec<SemanticError>,
}

pub(crate) fn err(kind: SemanticErrorKind, span: Span, message: impl Into<String>) -> SemanticError {
    SemanticError::new(kind, span, message)
}

impl<'a> Analyzer<'a> {
    pub(crate) fn new(module: ModuleId, resolver: &'a dyn ModuleResolver) -> Self {
        let mut scopes = ScopeArena::default();
        let module_scope = scopes.root();
        Self {
            module,
            resolver,
            scopes,
            module_scope,
            symbols: Vec::new(),
            procs: Vec::new(),
            metas: Vec::new(),
            globals: HashMap::new(),
            artifacts: Vec::new(),
            artifact_index: HashMap::new(),
            artifact_decls: HashMap::new(),
            imports: Vec::new(),
            known: HashMap::new(),
            expr_types: HashMap::new(),
            widened: HashSet::new(),
            resolutions: HashMap::new(),
            calls: HashMap::new(),
            decl_symbols: HashMap::new(),
            proc_decls: HashMap::new(),
            pending: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub(crate) fn run(&mut self, program: &'a Program) {
        self.hoist(program);

        for (i, stmt) in program.stmts.iter().enumerate() {
            let ctx = Ctx {
                scope: self.module_scope,
                proc: None,
                loops: 0,
                this: None,
                position: Some(i),
            };
            if let Err(e) = self.top_stmt(&ctx, stmt) {
                self.errors.push(e);
            }
        }

        self.check_record_containment();
        self.resolve_mutating_methods();
    }

    pub(crate) fn finish(mut self) -> Result<Tables, Vec<SemanticError>> {
        if !self.errors.is_empty() {
            let mut errors = std::mem::take(&mut self.errors);
            errors.sort_by_key(|e| e.span.offset());
            return Err(errors);
        }

        let interface = self.build_interface();
        let artifacts = self
            .artifact_decls
            .iter()
            .filter_map(|(decl, idx)| {
                let name = &self.artifacts[*idx].aref.name;
                interface
                    .artifacts
                    .get(name)
                    .map(|info| (*decl, info.clone()))
            })
            .collect();

        Ok(Tables {
            symbols: self.symbols,
            expr_types: self.expr_types,
            widened: self.widened,
            resolutions: self.resolutions,
            calls: self.calls,
            decl_symbols: self.decl_symbols,
            procs: self.procs,
            proc_decls: self.proc_decls,
            artifacts,
            interface,
        })
    }

    // ----- hoisting -------------------------------------------------------

    fn hoist(&mut self, program: &'a Program) {
        // Imports and artifacts first: declared types anywhere may name them.
        for (i, stmt) in program.stmts.iter().enumerate() {
            match stmt {
                Stmt::Import(import) => self.hoist_import(import),
                Stmt::Artifact(a) => self.hoist_artifact(i, a),
                _ => {}
            }
        }
        for (i, stmt) in program.stmts.iter().enumerate() {
            match stmt {
                Stmt::Proc(p) => self.hoist_proc(p),
                Stmt::Var(v) => self.hoist_global(i, v),
                _ => {}
            }
        }
    }

    fn hoist_import(&mut self, import: &ImportStmt) {
        let interface = match self.resolver.resolve(&self.module, import) {
            Ok(interface) => {
                self.known
                    .insert(interface.module.clone(), Arc::clone(&interface));
                Some(interface)
            }
            Err(ImportFailure::NotFound(path)) => {
                self.errors.push(err(
                    SemanticErrorKind::UndefinedSymbol,
                    import.span,
                    format!("module `{path}` not found"),
                ));
                None
            }
            Err(ImportFailure::Circular(path)) => {
                self.errors.push(err(
                    SemanticErrorKind::CircularImport,
                    import.span,
                    format!("circular import of module `{path}`"),
                ));
                None
            }
            Err(ImportFailure::Failed) => None,
        };

        let idx = self.imports.len();
        self.imports.push(Import { interface });
        if self
            .scopes
            .declare(self.module_scope, &import.alias.node, Binding::Module(idx))
            .is_err()
        {
            self.errors.push(err(
                SemanticErrorKind::Redeclaration,
                import.alias.span,
                format!("`{}` is already declared in this module", import.alias.node),
            ));
        }
    }

    fn hoist_artifact(&mut self, position: usize, a: &'a ArtifactDecl) {
        let aref = ArtifactRef {
            module: self.module.clone(),
            name: a.name.node.clone(),
        };
        if self
            .scopes
            .declare(self.module_scope, &a.name.node, Binding::Artifact(aref.clone()))
            .is_err()
        {
            self.errors.push(err(
                SemanticErrorKind::Redeclaration,
                a.name.span,
                format!("`{}` is already declared in this module", a.name.node),
            ));
            return;
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut cases = Vec::new();
        let mut methods = Vec::new();
        let mut next_value = 0i64;

        for member in &a.members {
            let name = match member {
                Member::Prop(v) => &v.name,
                Member::Proc(p) => &p.name,
                Member::Case(c) => &c.name,
            };
            if !seen.insert(name.node.as_str()) {
                self.errors.push(err(
                    SemanticErrorKind::Redeclaration,
                    name.span,
                    format!("`{}` is declared twice in `{}`", name.node, a.name.node),
                ));
                continue;
            }
            match member {
                Member::Case(c) => {
                    let value = c.value.as_ref().map(|v| v.node).unwrap_or(next_value);
                    cases.push((c.name.node.clone(), value));
                    next_value = value.wrapping_add(1);
                }
                Member::Proc(p) => {
                    let next = ProcId(self.procs.len() as u32);
                    let (kind, this) = match a.kind {
                        ArtifactKind::Record => (
                            ProcKind::Method {
                                artifact: aref.clone(),
                                mutates_self: false,
                            },
                            SelfCtx::Record {
                                artifact: aref.clone(),
                                method: next,
                            },
                        ),
                        _ => (
                            ProcKind::NamespaceProc {
                                artifact: aref.clone(),
                            },
                            SelfCtx::Namespace(aref.clone()),
                        ),
                    };
                    let path = vec![a.name.node.clone(), p.name.node.clone()];
                    let pid = self.new_proc(p, path, kind, None, self.module_scope, Some(this));
                    methods.push((p.name.node.clone(), pid));
                }
                Member::Prop(_) => {}
            }
        }

        let idx = self.artifacts.len();
        self.artifact_index.insert(a.name.node.clone(), idx);
        self.artifact_decls.insert(a.id, idx);
        self.artifacts.push(LocalArtifact {
            decl: a,
            aref,
            position,
            state: State::Unchecked,
            props: Vec::new(),
            methods,
            cases,
        });
    }

    fn hoist_proc(&mut self, p: &'a ProcDecl) {
        let pid = self.new_proc(
            p,
            vec![p.name.node.clone()],
            ProcKind::TopLevel,
            None,
            self.module_scope,
            None,
        );
        if self
            .scopes
            .declare(self.module_scope, &p.name.node, Binding::Proc(pid))
            .is_err()
        {
            self.errors.push(err(
                SemanticErrorKind::Redeclaration,
                p.name.span,
                format!("`{}` is already declared in this module", p.name.node),
            ));
        }
    }

    fn hoist_global(&mut self, position: usize, v: &'a VarDecl) {
        let declared = match &v.ty {
            Some(tr) => match self.resolve_value_type(tr) {
                Ok(t) => Some(t),
                Err(e) => {
                    self.errors.push(e);
                    Some(Type::Unknown)
                }
            },
            None => None,
        };

        let sid = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            id: sid,
            name: v.name.node.clone(),
            kind: SymbolKind::Var,
            ty: declared.clone().unwrap_or(Type::Unknown),
            mutable: v.mutable,
            global: true,
            owner: None,
            depth: 0,
            span: v.name.span,
        });
        self.decl_symbols.insert(v.id, sid);
        self.globals.insert(
            sid,
            GlobalSlot {
                decl: v,
                position,
                declared,
                state: State::Unchecked,
            },
        );

        if self
            .scopes
            .declare(self.module_scope, &v.name.node, Binding::Symbol(sid))
            .is_err()
        {
            self.errors.push(err(
                SemanticErrorKind::Redeclaration,
                v.name.span,
                format!("`{}` is already declared in this module", v.name.node),
            ));
        }
    }

    fn new_proc(
        &mut self,
        decl: &'a ProcDecl,
        path: Vec<String>,
        kind: ProcKind,
        nested_in: Option<ProcId>,
        body_parent: ScopeId,
        this: Option<SelfCtx>,
    ) -> ProcId {
        let id = ProcId(self.procs.len() as u32);
        self.procs.push(ProcInfo {
            id,
            name: decl.name.node.clone(),
            path,
            decl: decl.id,
            params: Vec::new(),
            ret: Type::Unknown,
            kind,
            captures: Vec::new(),
            nested_in,
        });
        self.metas.push(ProcMeta {
            decl,
            body_parent,
            this,
            sig: State::Unchecked,
            body: State::Unchecked,
            ret_declared: decl.ret.is_some(),
            ret: None,
            direct_mutation: false,
        });
        self.proc_decls.insert(decl.id, id);
        id
    }

    // ----- module-level statements ------------------------------------------

    fn top_stmt(&mut self, ctx: &Ctx, stmt: &'a Stmt) -> SemResult<()> {
        match stmt {
            Stmt::Import(_) => Ok(()),
            Stmt::Var(v) => match self.decl_symbols.get(&v.id).copied() {
                Some(sid) if self.globals.contains_key(&sid) => {
                    self.check_global(sid);
                    Ok(())
                }
                _ => self.stmt(ctx, stmt),
            },
            Stmt::Proc(p) => match self.proc_decls.get(&p.id).copied() {
                Some(pid) => {
                    self.ensure_body(pid);
                    Ok(())
                }
                None => self.stmt(ctx, stmt),
            },
            Stmt::Artifact(a) => {
                if let Some(idx) = self.artifact_decls.get(&a.id).copied() {
                    self.ensure_artifact(idx);
                    let methods: Vec<ProcId> =
                        self.artifacts[idx].methods.iter().map(|(_, p)| *p).collect();
                    for pid in methods {
                        self.ensure_body(pid);
                    }
                }
                Ok(())
            }
            _ => self.stmt(ctx, stmt),
        }
    }

    /// Checks a global's declaration once, either in statement order or on
    /// first use from a procedure body.
    pub(crate) fn check_global(&mut self, sid: SymbolId) {
        let Some(slot) = self.globals.get_mut(&sid) else {
            return;
        };
        if slot.state != State::Unchecked {
            return;
        }
        slot.state = State::InProgress;
        let decl = slot.decl;
        let declared = slot.declared.clone();
        let ctx = Ctx {
            scope: self.module_scope,
            proc: None,
            loops: 0,
            this: None,
            position: Some(slot.position),
        };

        let ty = match self.decl_type(&ctx, decl, declared) {
            Ok(t) => t,
            Err(e) => {
                self.errors.push(e);
                Type::Unknown
            }
        };
        self.symbols[sid.0 as usize].ty = ty;
        if let Some(slot) = self.globals.get_mut(&sid) {
            slot.state = State::Done;
        }
    }

    // ----- statements -------------------------------------------------------

    pub(crate) fn stmts(&mut self, ctx: &Ctx, stmts: &'a [Stmt]) {
        for stmt in stmts {
            if let Err(e) = self.stmt(ctx, stmt) {
                self.errors.push(e);
            }
        }
    }

    fn block(&mut self, ctx: &Ctx, block: &'a Block, in_loop: bool) {
        let scope = self.scopes.push(Some(ctx.scope));
        let mut inner = ctx.with_scope(scope);
        if in_loop {
            inner.loops += 1;
        }
        self.stmts(&inner, &block.stmts);
        self.scopes.pop(scope);
    }

    fn stmt(&mut self, ctx: &Ctx, stmt: &'a Stmt) -> SemResult<()> {
        match stmt {
            // Only reachable at module level, where `top_stmt` handles them.
            Stmt::Import(_) | Stmt::Artifact(_) => Ok(()),
            Stmt::Var(v) => {
                let result = self.decl_type(ctx, v, None);
                let ty = result.as_ref().cloned().unwrap_or(Type::Unknown);
                let sid = self.declare_symbol(ctx, &v.name, SymbolKind::Var, ty, v.mutable)?;
                self.decl_symbols.insert(v.id, sid);
                result.map(|_| ())
            }
            Stmt::Proc(p) => self.nested_proc(ctx, p),
            Stmt::Assign(a) => {
                let target_ty = self.expr(ctx, &a.target, None)?;
                self.assignable(ctx, &a.target)?;
                self.expect(ctx, &a.value, &target_ty)
            }
            Stmt::Cond(c) => {
                let result = self.condition(ctx, &c.cond);
                self.block(ctx, &c.body, false);
                result
            }
            Stmt::Chain(chain) => {
                for arm in &chain.arms {
                    if let Err(e) = self.condition(ctx, &arm.cond) {
                        self.errors.push(e);
                    }
                    self.block(ctx, &arm.body, false);
                }
                if let Some(fallback) = &chain.fallback {
                    self.block(ctx, fallback, false);
                }
                Ok(())
            }
            Stmt::While(w) => {
                let result = self.condition(ctx, &w.cond);
                self.block(ctx, &w.body, true);
                result
            }
            Stmt::RangeFor(r) => {
                let mut first = self.expect(ctx, &r.start, &Type::Int);
                match self.expr(ctx, &r.end, None) {
                    Ok(Type::Int | Type::Array(..) | Type::List(_) | Type::Unknown) => {}
                    Ok(other) => {
                        let e = err(
                            SemanticErrorKind::TypeMismatch,
                            r.end.span,
                            format!(
                                "range end must be an int or an array or list, found `{other}`"
                            ),
                        );
                        first = first.and(Err(e));
                    }
                    Err(e) => first = first.and(Err(e)),
                }

                let scope = self.scopes.push(Some(ctx.scope));
                let mut inner = ctx.with_scope(scope);
                inner.loops += 1;
                let sid =
                    self.declare_symbol(&inner, &r.var, SymbolKind::LoopVar, Type::Int, false)?;
                self.decl_symbols.insert(r.id, sid);
                self.block(&inner, &r.body, false);
                self.scopes.pop(scope);
                first
            }
            Stmt::Break(span) | Stmt::Skip(span) => {
                if ctx.loops == 0 {
                    let word = if matches!(stmt, Stmt::Break(_)) {
                        "break"
                    } else {
                        "skip"
                    };
                    return Err(err(
                        SemanticErrorKind::ControlOutsideLoop,
                        *span,
                        format!("`{word}` outside of a loop"),
                    ));
                }
                Ok(())
            }
            Stmt::Return(r) => self.return_stmt(ctx, r.span, r.value.as_ref()),
            Stmt::Block(b) => {
                self.block(ctx, b, false);
                Ok(())
            }
            Stmt::Expr(e) => self.expr(ctx, e, None).map(|_| ()),
        }
    }

    fn condition(&mut self, ctx: &Ctx, cond: &'a ark_ast::Expr) -> SemResult<()> {
        let ty = self.expr(ctx, cond, None)?;
        if ty != Type::Bool && !ty.is_unknown() {
            return Err(err(
                SemanticErrorKind::TypeMismatch,
                cond.span,
                format!("condition must be `bool`, found `{ty}`"),
            ));
        }
        Ok(())
    }

    fn return_stmt(
        &mut self,
        ctx: &Ctx,
        span: Span,
        value: Option<&'a ark_ast::Expr>,
    ) -> SemResult<()> {
        let Some(pid) = ctx.proc else {
            return Err(err(
                SemanticErrorKind::ReturnOutsideProc,
                span,
                "`return` outside of a procedure",
            ));
        };
        let name = self.procs[pid.0 as usize].name.clone();
        let declared = self.metas[pid.0 as usize].ret_declared;
        let current = self.metas[pid.0 as usize].ret.clone();

        match (value, current) {
            (Some(v), Some(Type::Void)) => {
                self.expr(ctx, v, None)?;
                let kind = if declared {
                    SemanticErrorKind::TypeMismatch
                } else {
                    SemanticErrorKind::ReturnTypeConflict
                };
                Err(err(
                    kind,
                    v.span,
                    format!("`{name}` returns a value here but returns nothing elsewhere"),
                ))
            }
            (Some(v), Some(ret)) if declared => self.expect(ctx, v, &ret),
            (Some(v), Some(ret)) => {
                let ty = self.expr(ctx, v, Some(&ret))?;
                if ty == Type::Int && ret == Type::Float {
                    self.widened.insert(v.id);
                    return Ok(());
                }
                if !same_type(&ty, &ret) {
                    return Err(err(
                        SemanticErrorKind::ReturnTypeConflict,
                        v.span,
                        format!("`{name}` returns `{ty}` here but `{ret}` earlier"),
                    ));
                }
                Ok(())
            }
            (Some(v), None) => {
                let ty = self.expr(ctx, v, None)?;
                if ty == Type::Void {
                    return Err(err(
                        SemanticErrorKind::TypeMismatch,
                        v.span,
                        "cannot return the result of a procedure that returns nothing",
                    ));
                }
                self.metas[pid.0 as usize].ret = Some(ty);
                Ok(())
            }
            (None, None) => {
                self.metas[pid.0 as usize].ret = Some(Type::Void);
                Ok(())
            }
            (None, Some(Type::Void | Type::Unknown)) => Ok(()),
            (None, Some(ret)) => {
                let kind = if declared {
                    SemanticErrorKind::TypeMismatch
                } else {
                    SemanticErrorKind::ReturnTypeConflict
                };
                Err(err(
                    kind,
                    span,
                    format!("`return` without a value in `{name}`, which returns `{ret}`"),
                ))
            }
        }
    }

    /// Type of a declaration from its annotation and initializer.
    pub(crate) fn decl_type(
        &mut self,
        ctx: &Ctx,
        v: &'a VarDecl,
        declared: Option<Type>,
    ) -> SemResult<Type> {
        let declared = match (declared, &v.ty) {
            (Some(t), _) => Some(t),
            (None, Some(tr)) => Some(self.resolve_value_type(tr)?),
            (None, None) => None,
        };
        match (declared, &v.value) {
            (Some(t), Some(value)) => {
                self.expect(ctx, value, &t)?;
                Ok(t)
            }
            (Some(t), None) => Ok(t),
            (None, Some(value)) => {
                let t = self.expr(ctx, value, None)?;
                if t == Type::Void {
                    return Err(err(
                        SemanticErrorKind::TypeMismatch,
                        value.span,
                        format!(
                            "`{}` cannot hold the result of a procedure that returns nothing",
                            v.name.node
                        ),
                    ));
                }
                Ok(t)
            }
            (None, None) => Ok(Type::Unknown),
        }
    }

    pub(crate) fn declare_symbol(
        &mut self,
        ctx: &Ctx,
        name: &Ident,
        kind: SymbolKind,
        ty: Type,
        mutable: bool,
    ) -> SemResult<SymbolId> {
        if self.scopes.local(ctx.scope, &name.node).is_some() {
            return Err(err(
                SemanticErrorKind::Redeclaration,
                name.span,
                format!("`{}` is already declared in this scope", name.node),
            ));
        }
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            id,
            name: name.node.clone(),
            kind,
            ty,
            mutable,
            global: false,
            owner: ctx.proc,
            depth: self.scopes.depth(ctx.scope),
            span: name.span,
        });
        // Cannot conflict: checked above.
        let _ = self
            .scopes
            .declare(ctx.scope, &name.node, Binding::Symbol(id));
        Ok(id)
    }

    // ----- procedures -------------------------------------------------------

    fn nested_proc(&mut self, ctx: &Ctx, p: &'a ProcDecl) -> SemResult<()> {
        // Namespace procedures keep `.name`; record methods do not lend `self`.
        let this = match &ctx.this {
            Some(SelfCtx::Namespace(a)) => Some(SelfCtx::Namespace(a.clone())),
            _ => None,
        };
        let pid = self.new_proc(
            p,
            vec![p.name.node.clone()],
            ProcKind::Nested { parent: ctx.proc },
            ctx.proc,
            ctx.scope,
            this,
        );
        let sid = self.declare_symbol(
            ctx,
            &p.name,
            SymbolKind::NestedProc(pid),
            Type::Unknown,
            false,
        )?;
        self.decl_symbols.insert(p.id, sid);

        self.ensure_body(pid);
        let info = &self.procs[pid.0 as usize];
        self.symbols[sid.0 as usize].ty = Type::Proc(
            info.params.iter().map(|p| p.ty.clone()).collect(),
            Box::new(info.ret.clone()),
        );
        Ok(())
    }

    pub(crate) fn ensure_sig(&mut self, pid: ProcId) {
        let meta = &mut self.metas[pid.0 as usize];
        if meta.sig != State::Unchecked {
            return;
        }
        meta.sig = State::InProgress;
        let decl = meta.decl;

        // Defaults see module scope plus the parameters before them.
        let scope = self.scopes.push(Some(self.module_scope));
        let ctx = Ctx {
            scope,
            proc: Some(pid),
            loops: 0,
            this: None,
            position: None,
        };

        let mut params = Vec::new();
        for param in &decl.params {
            let ty = match self.param_type(&ctx, param) {
                Ok(t) => t,
                Err(e) => {
                    self.errors.push(e);
                    Type::Unknown
                }
            };
            let sid = match self.declare_symbol(&ctx, &param.name, SymbolKind::Param, ty.clone(), false)
            {
                Ok(sid) => sid,
                Err(_) => {
                    self.errors.push(err(
                        SemanticErrorKind::Redeclaration,
                        param.name.span,
                        format!("parameter `{}` is declared twice", param.name.node),
                    ));
                    let sid = SymbolId(self.symbols.len() as u32);
                    self.symbols.push(Symbol {
                        id: sid,
                        name: param.name.node.clone(),
                        kind: SymbolKind::Param,
                        ty: ty.clone(),
                        mutable: false,
                        global: false,
                        owner: Some(pid),
                        depth: self.scopes.depth(scope),
                        span: param.name.span,
                    });
                    sid
                }
            };
            self.decl_symbols.insert(param.id, sid);
            params.push(ParamInfo {
                name: param.name.node.clone(),
                ty,
                has_default: param.default.is_some(),
                symbol: sid,
            });
        }
        self.scopes.pop(scope);

        let ret = decl.ret.as_ref().map(|tr| match self.resolve_type(tr) {
            Ok(t) => t,
            Err(e) => {
                self.errors.push(e);
                Type::Unknown
            }
        });

        let info = &mut self.procs[pid.0 as usize];
        info.params = params;
        if let Some(ret) = &ret {
            info.ret = ret.clone();
        }
        let meta = &mut self.metas[pid.0 as usize];
        if ret.is_some() {
            meta.ret = ret;
        }
        meta.sig = State::Done;
    }

    fn param_type(&mut self, ctx: &Ctx, param: &'a Param) -> SemResult<Type> {
        match (&param.ty, &param.default) {
            (Some(tr), Some(default)) => {
                let t = self.resolve_value_type(tr)?;
                self.expect(ctx, default, &t)?;
                Ok(t)
            }
            (Some(tr), None) => self.resolve_value_type(tr),
            (None, Some(default)) => {
                let t = self.expr(ctx, default, None)?;
                if t == Type::Void {
                    return Err(err(
                        SemanticErrorKind::TypeMismatch,
                        default.span,
                        format!("default for `{}` produces no value", param.name.node),
                    ));
                }
                Ok(t)
            }
            (None, None) => Ok(Type::Unknown),
        }
    }

    /// Return type, checking the body first when it is inferred. `None` while
    /// the body is still being checked and no `return` has been seen.
    pub(crate) fn ensure_ret(&mut self, pid: ProcId) -> Option<Type> {
        self.ensure_sig(pid);
        if let Some(t) = &self.metas[pid.0 as usize].ret {
            return Some(t.clone());
        }
        self.ensure_body(pid);
        self.metas[pid.0 as usize].ret.clone()
    }

    pub(crate) fn ensure_body(&mut self, pid: ProcId) {
        self.ensure_sig(pid);
        let meta = &mut self.metas[pid.0 as usize];
        if meta.body != State::Unchecked {
            return;
        }
        meta.body = State::InProgress;
        let decl = meta.decl;
        let parent = meta.body_parent;
        let this = meta.this.clone();

        let param_scope = self.scopes.push(Some(parent));
        let params: Vec<(String, SymbolId)> = self.procs[pid.0 as usize]
            .params
            .iter()
            .map(|p| (p.name.clone(), p.symbol))
            .collect();
        for (name, sid) in params {
            // Duplicates were reported with the signature.
            let _ = self
                .scopes
                .declare(param_scope, &name, Binding::Symbol(sid));
        }
        let body_scope = self.scopes.push(Some(param_scope));
        let ctx = Ctx {
            scope: body_scope,
            proc: Some(pid),
            loops: 0,
            this,
            position: None,
        };
        self.stmts(&ctx, &decl.body.stmts);
        self.scopes.pop(body_scope);
        self.scopes.pop(param_scope);

        let meta = &mut self.metas[pid.0 as usize];
        let ret = meta.ret.get_or_insert(Type::Void).clone();
        meta.body = State::Done;
        self.procs[pid.0 as usize].ret = ret;
    }

    // ----- artifacts --------------------------------------------------------

    pub(crate) fn local_artifact(&self, aref: &ArtifactRef) -> Option<usize> {
        if aref.module != self.module {
            return None;
        }
        self.artifact_index.get(&aref.name).copied()
    }

    /// Types every property (field or namespace constant) of a local artifact.
    pub(crate) fn ensure_artifact(&mut self, idx: usize) {
        let art = &mut self.artifacts[idx];
        if art.state != State::Unchecked {
            return;
        }
        art.state = State::InProgress;
        let decl = art.decl;
        let aref = art.aref.clone();
        let namespace = decl.kind == ArtifactKind::Namespace;
        let ctx = Ctx {
            scope: self.module_scope,
            proc: None,
            loops: 0,
            this: namespace.then(|| SelfCtx::Namespace(aref.clone())),
            position: namespace.then_some(art.position),
        };

        for v in decl.props() {
            let ty = match self.decl_type(&ctx, v, None) {
                Ok(t) => t,
                Err(e) => {
                    self.errors.push(e);
                    Type::Unknown
                }
            };
            if decl.kind == ArtifactKind::Record && ty.contains_list() {
                self.errors.push(err(
                    SemanticErrorKind::TypeMismatch,
                    v.name.span,
                    format!(
                        "record `{}` cannot hold list property `{}`",
                        aref.name, v.name.node
                    ),
                ));
            }
            // Later constants may refer to earlier ones through `.name`.
            self.artifacts[idx].props.push(PropInfo {
                name: v.name.node.clone(),
                ty,
                mutable: v.mutable,
            });
        }
        self.artifacts[idx].state = State::Done;
    }

    fn check_record_containment(&mut self) {
        for idx in 0..self.artifacts.len() {
            if self.artifacts[idx].kind() != ArtifactKind::Record {
                continue;
            }
            self.ensure_artifact(idx);
            let target = self.artifacts[idx].aref.clone();
            let mut visited = HashSet::new();
            let props = self.artifacts[idx].props.clone();
            for prop in &props {
                if self.reaches_record(&prop.ty, &target, &mut visited) {
                    let span = self.artifacts[idx]
                        .decl
                        .props()
                        .find(|v| v.name.node == prop.name)
                        .map(|v| v.name.span)
                        .unwrap_or(self.artifacts[idx].decl.name.span);
                    self.errors.push(err(
                        SemanticErrorKind::TypeMismatch,
                        span,
                        format!(
                            "record `{}` contains itself through `{}`",
                            target.name, prop.name
                        ),
                    ));
                    break;
                }
            }
        }
    }

    fn reaches_record(
        &mut self,
        ty: &Type,
        target: &ArtifactRef,
        visited: &mut HashSet<ArtifactRef>,
    ) -> bool {
        match ty {
            Type::Array(elem, _) => self.reaches_record(elem, target, visited),
            Type::Artifact(a) if a == target => true,
            Type::Artifact(a) => {
                if !visited.insert(a.clone()) {
                    return false;
                }
                let Some(idx) = self.local_artifact(a) else {
                    return false;
                };
                if self.artifacts[idx].kind() != ArtifactKind::Record {
                    return false;
                }
                self.ensure_artifact(idx);
                let props: Vec<Type> =
                    self.artifacts[idx].props.iter().map(|p| p.ty.clone()).collect();
                props
                    .iter()
                    .any(|t| self.reaches_record(t, target, visited))
            }
            _ => false,
        }
    }

    /// Decides which methods mutate their receiver (directly, or by calling a
    /// mutating method on it), then judges every deferred receiver.
    fn resolve_mutating_methods(&mut self) {
        let mut mutating: HashMap<ProcId, bool> = HashMap::new();
        for (i, info) in self.procs.iter().enumerate() {
            if info.is_method() {
                mutating.insert(info.id, self.metas[i].direct_mutation);
            }
        }

        loop {
            let mut changed = false;
            for p in &self.pending {
                if p.place.root != PlaceRoot::SelfRef {
                    continue;
                }
                let Some(caller) = p.caller else { continue };
                if mutating.get(&caller) != Some(&false) {
                    continue;
                }
                if self.method_mutates(&p.artifact, &p.method, &mutating) {
                    mutating.insert(caller, true);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let pending = std::mem::take(&mut self.pending);
        for p in &pending {
            let m = self.method_mutates(&p.artifact, &p.method, &mutating);
            if let Some(CallTarget::Method { mutating: flag, .. }) = self.calls.get_mut(&p.call) {
                *flag = m;
            }
            if m && !p.place.mutable {
                self.errors.push(err(
                    SemanticErrorKind::ImmutableAssignment,
                    p.span,
                    format!(
                        "cannot call mutating method `{}` here: {}",
                        p.method, p.place.reason
                    ),
                ));
            }
        }

        for info in &mut self.procs {
            if let ProcKind::Method { mutates_self, .. } = &mut info.kind {
                *mutates_self = mutating.get(&info.id).copied().unwrap_or(false);
            }
        }
    }

    fn method_mutates(
        &self,
        artifact: &ArtifactRef,
        method: &str,
        local: &HashMap<ProcId, bool>,
    ) -> bool {
        if let Some(idx) = self.local_artifact(artifact) {
            return self.artifacts[idx]
                .methods
                .iter()
                .find(|(n, _)| n == method)
                .and_then(|(_, pid)| local.get(pid).copied())
                .unwrap_or(false);
        }
        self.known
            .get(&artifact.module)
            .and_then(|i| i.artifacts.get(&artifact.name))
            .and_then(|a| a.method(method))
            .map(|m| m.mutates_self)
            .unwrap_or(false)
    }

    // ----- types ------------------------------------------------------------

    pub(crate) fn interface_of(&mut self, module: &ModuleId) -> Option<Arc<ModuleInterface>> {
        if let Some(i) = self.known.get(module) {
            return Some(Arc::clone(i));
        }
        let i = self.resolver.interface(module)?;
        self.known.insert(module.clone(), Arc::clone(&i));
        Some(i)
    }

    pub(crate) fn artifact_kind(&mut self, aref: &ArtifactRef) -> Option<ArtifactKind> {
        if let Some(idx) = self.local_artifact(aref) {
            return Some(self.artifacts[idx].kind());
        }
        self.interface_of(&aref.module)?
            .artifacts
            .get(&aref.name)
            .map(|a| a.kind)
    }

    pub(crate) fn artifact_props(&mut self, aref: &ArtifactRef) -> Vec<PropInfo> {
        if let Some(idx) = self.local_artifact(aref) {
            self.ensure_artifact(idx);
            return self.artifacts[idx].props.clone();
        }
        self.interface_of(&aref.module)
            .and_then(|i| i.artifacts.get(&aref.name).map(|a| a.props.clone()))
            .unwrap_or_default()
    }

    pub(crate) fn artifact_prop(&mut self, aref: &ArtifactRef, name: &str) -> Option<PropInfo> {
        self.artifact_props(aref).into_iter().find(|p| p.name == name)
    }

    pub(crate) fn resolve_value_type(&mut self, tr: &TypeRef) -> SemResult<Type> {
        let t = self.resolve_type(tr)?;
        if t == Type::Void {
            return Err(err(
                SemanticErrorKind::TypeMismatch,
                tr.span,
                "`void` is only valid as a return type",
            ));
        }
        Ok(t)
    }

    pub(crate) fn resolve_type(&mut self, tr: &TypeRef) -> SemResult<Type> {
        match &tr.kind {
            TypeRefKind::Named(name) => {
                match name.node.as_str() {
                    "int" => return Ok(Type::Int),
                    "float" => return Ok(Type::Float),
                    "string" => return Ok(Type::String),
                    "bool" => return Ok(Type::Bool),
                    "void" => return Ok(Type::Void),
                    _ => {}
                }
                match self.scopes.local(self.module_scope, &name.node).cloned() {
                    Some(Binding::Artifact(aref)) => self.artifact_type(aref, tr.span),
                    _ => Err(err(
                        SemanticErrorKind::UndefinedSymbol,
                        name.span,
                        format!("unknown type `{}`", name.node),
                    )),
                }
            }
            TypeRefKind::Qualified { module, name } => {
                let Some(Binding::Module(idx)) =
                    self.scopes.local(self.module_scope, &module.node).cloned()
                else {
                    return Err(err(
                        SemanticErrorKind::UndefinedSymbol,
                        module.span,
                        format!("unknown module `{}`", module.node),
                    ));
                };
                let Some(interface) = self.imports[idx].interface.clone() else {
                    return Ok(Type::Unknown);
                };
                if !interface.artifacts.contains_key(&name.node) {
                    return Err(err(
                        SemanticErrorKind::UndefinedSymbol,
                        name.span,
                        format!("module `{}` has no type `{}`", module.node, name.node),
                    ));
                }
                let aref = ArtifactRef {
                    module: interface.module.clone(),
                    name: name.node.clone(),
                };
                self.artifact_type(aref, tr.span)
            }
            TypeRefKind::Array(elem, n) => {
                let elem_ty = self.resolve_value_type(elem)?;
                if elem_ty.contains_list() {
                    return Err(err(
                        SemanticErrorKind::TypeMismatch,
                        elem.span,
                        "arrays cannot hold lists",
                    ));
                }
                if *n == 0 {
                    return Err(err(
                        SemanticErrorKind::ArraySizeMismatch,
                        tr.span,
                        "array size must be at least 1",
                    ));
                }
                if *n > MAX_ARRAY_LEN {
                    return Err(err(
                        SemanticErrorKind::ArraySizeMismatch,
                        tr.span,
                        format!("array size {n} exceeds the limit of {MAX_ARRAY_LEN}"),
                    ));
                }
                Ok(Type::Array(Box::new(elem_ty), *n))
            }
            TypeRefKind::List(elem) => Ok(Type::List(Box::new(self.resolve_value_type(elem)?))),
            TypeRefKind::Proc { params, ret } => {
                let params = params
                    .iter()
                    .map(|p| self.resolve_value_type(p))
                    .collect::<SemResult<Vec<_>>>()?;
                let ret = self.resolve_type(ret)?;
                Ok(Type::Proc(params, Box::new(ret)))
            }
        }
    }

    fn artifact_type(&mut self, aref: ArtifactRef, span: Span) -> SemResult<Type> {
        match self.artifact_kind(&aref) {
            Some(ArtifactKind::Namespace) => Err(err(
                SemanticErrorKind::TypeMismatch,
                span,
                format!("namespace `{}` is not a type", aref.name),
            )),
            _ => Ok(Type::Artifact(aref)),
        }
    }

    // ----- interface --------------------------------------------------------

    fn build_interface(&self) -> ModuleInterface {
        let mut interface = ModuleInterface::empty(self.module.clone());

        for (sid, _) in self.globals.iter() {
            let sym = &self.symbols[sid.0 as usize];
            interface.globals.insert(
                sym.name.clone(),
                GlobalInfo {
                    ty: sym.ty.clone(),
                    mutable: sym.mutable,
                },
            );
        }

        for info in &self.procs {
            if info.kind == ProcKind::TopLevel {
                interface.procs.insert(info.name.clone(), info.sig());
            }
        }

        for art in &self.artifacts {
            let methods = art
                .methods
                .iter()
                .map(|(name, pid)| {
                    let info = &self.procs[pid.0 as usize];
                    MethodInfo {
                        name: name.clone(),
                        sig: info.sig(),
                        mutates_self: matches!(
                            info.kind,
                            ProcKind::Method {
                                mutates_self: true,
                                ..
                            }
                        ),
                    }
                })
                .collect();
            interface.artifacts.insert(
                art.aref.name.clone(),
                ArtifactInfo {
                    name: art.aref.name.clone(),
                    module: self.module.clone(),
                    kind: art.kind(),
                    props: art.props.clone(),
                    methods,
                    cases: art.cases.clone(),
                },
            );
        }

        interface
    }
}

/// Structural equality where `Unknown` matches anything.
pub(crate) fn same_type(a: &Type, b: &Type) -> bool {
    match (a, b) {
        (Type::Unknown, _) | (_, Type::Unknown) => true,
        (Type::Array(x, n), Type::Array(y, m)) => n == m && same_type(x, y),
        (Type::List(x), Type::List(y)) => same_type(x, y),
        (Type::Proc(ps, r), Type::Proc(qs, s)) => {
            ps.len() == qs.len()
                && ps.iter().zip(qs).all(|(p, q)| same_type(p, q))
                && same_type(r, s)
        }
        _ => a == b,
    }
}
