#![forbid(unsafe_code)]

use ark_ast::{ArtifactKind, BinOp, Expr, ExprKind, Ident, PostfixOp, Span, UnaryOp};

use crate::builtins::Builtin;
use crate::error::{SemanticError, SemanticErrorKind};
use crate::interface::ProcSig;
use crate::scope::{Binding, SymbolId, SymbolKind};
use crate::sema::{
    err, same_type, Analyzer, Ctx, PendingReceiver, PlaceInfo, PlaceRoot, SelfCtx, State,
};
use crate::types::{ArtifactRef, Type};
use crate::unit::{CallTarget, ProcId, ProcRef, Receiver, Resolution};

type SemResult<T> = Result<T, SemanticError>;

/// A path that names a module or an artifact rather than a value.
#[derive(Clone, Debug)]
enum StaticPath {
    Module(usize),
    Artifact(ArtifactRef),
    /// Import that failed to compile; everything under it is `Unknown`.
    Poisoned,
}

fn mismatch(span: Span, message: impl Into<String>) -> SemanticError {
    err(SemanticErrorKind::TypeMismatch, span, message)
}

fn unary_symbol(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "-",
        UnaryOp::Not => "!",
        UnaryOp::BitNot => "~",
    }
}

fn arg_count(n: usize) -> String {
    if n == 1 {
        "1 argument".to_string()
    } else {
        format!("{n} arguments")
    }
}

impl<'a> Analyzer<'a> {
    /// Types `e`, records the result, and returns it. `expected` only steers
    /// array literals; callers still coerce.
    pub(crate) fn expr(
        &mut self,
        ctx: &Ctx,
        e: &'a Expr,
        expected: Option<&Type>,
    ) -> SemResult<Type> {
        let ty = self.expr_kind(ctx, e, expected)?;
        self.expr_types.insert(e.id, ty.clone());
        Ok(ty)
    }

    pub(crate) fn expect(&mut self, ctx: &Ctx, e: &'a Expr, want: &Type) -> SemResult<()> {
        let actual = self.expr(ctx, e, Some(want))?;
        self.coerce(e, &actual, want)
    }

    pub(crate) fn coerce(&mut self, e: &Expr, actual: &Type, want: &Type) -> SemResult<()> {
        if *actual == Type::Int && *want == Type::Float {
            self.widened.insert(e.id);
            return Ok(());
        }
        if let (Type::Array(_, n), Type::Array(_, m)) = (actual, want) {
            if n != m {
                return Err(err(
                    SemanticErrorKind::ArraySizeMismatch,
                    e.span,
                    format!("expected `{want}`, found `{actual}`"),
                ));
            }
        }
        if same_type(actual, want) {
            Ok(())
        } else {
            Err(mismatch(
                e.span,
                format!("expected `{want}`, found `{actual}`"),
            ))
        }
    }

    fn expr_kind(&mut self, ctx: &Ctx, e: &'a Expr, expected: Option<&Type>) -> SemResult<Type> {
        match &e.kind {
            ExprKind::Int(_) => Ok(Type::Int),
            ExprKind::Float(_) => Ok(Type::Float),
            ExprKind::Str(_) => Ok(Type::String),
            ExprKind::Bool(_) => Ok(Type::Bool),
            ExprKind::Ident(name) => self.ident(ctx, e, name),
            ExprKind::SelfProp(name) => self.self_prop(ctx, e, name),
            ExprKind::Array(items) => self.array_literal(ctx, e, items, expected),
            ExprKind::Unary { op, expr } => {
                let t = self.expr(ctx, expr, None)?;
                match (op, &t) {
                    (_, Type::Unknown) => Ok(Type::Unknown),
                    (UnaryOp::Neg, Type::Int | Type::Float) => Ok(t),
                    (UnaryOp::Not, Type::Bool) => Ok(Type::Bool),
                    (UnaryOp::BitNot, Type::Int) => Ok(Type::Int),
                    _ => Err(mismatch(
                        e.span,
                        format!("unary `{}` cannot be applied to `{t}`", unary_symbol(*op)),
                    )),
                }
            }
            ExprKind::Binary { left, op, right } => self.binary(ctx, e, left, *op, right),
            ExprKind::Postfix { op, expr } => {
                let t = self.expr(ctx, expr, None)?;
                if t != Type::Int && !t.is_unknown() {
                    let symbol = match op {
                        PostfixOp::Inc => "++",
                        PostfixOp::Dec => "--",
                    };
                    return Err(mismatch(
                        e.span,
                        format!("`{symbol}` needs an `int`, found `{t}`"),
                    ));
                }
                self.assignable(ctx, expr)?;
                Ok(Type::Int)
            }
            ExprKind::Call { callee, args } => self.call(ctx, e, callee, args),
            ExprKind::Index { base, index } => {
                let base_ty = self.expr(ctx, base, None)?;
                let index_ty = self.expr(ctx, index, None)?;
                if index_ty != Type::Int && !index_ty.is_unknown() {
                    return Err(mismatch(
                        index.span,
                        format!("index must be an `int`, found `{index_ty}`"),
                    ));
                }
                let constant = index.const_int();
                match base_ty {
                    Type::Array(elem, n) => {
                        if let Some(c) = constant {
                            if c < 1 || c as u64 > n {
                                return Err(err(
                                    SemanticErrorKind::ConstantIndexOutOfRange,
                                    index.span,
                                    format!(
                                        "index {c} is out of range for `[{elem}; {n}]`; indices run from 1 to {n}"
                                    ),
                                ));
                            }
                        }
                        Ok(*elem)
                    }
                    Type::List(elem) => {
                        if let Some(c) = constant {
                            if c < 1 {
                                return Err(err(
                                    SemanticErrorKind::ConstantIndexOutOfRange,
                                    index.span,
                                    format!("index {c} is out of range; indices start at 1"),
                                ));
                            }
                        }
                        Ok(*elem)
                    }
                    Type::Unknown => Ok(Type::Unknown),
                    other => Err(mismatch(
                        base.span,
                        format!("`{other}` cannot be indexed"),
                    )),
                }
            }
            ExprKind::Member { base, name } => {
                if let Some(path) = self.static_path(ctx, base)? {
                    return self.static_member(ctx, e, path, name);
                }
                let base_ty = self.expr(ctx, base, None)?;
                self.value_member(e, &base_ty, name)
            }
        }
    }

    // ----- names ------------------------------------------------------------

    fn ident(&mut self, ctx: &Ctx, e: &Expr, name: &str) -> SemResult<Type> {
        match self.scopes.lookup(ctx.scope, name).cloned() {
            Some(Binding::Symbol(sid)) => {
                let ty = self.use_symbol(ctx, sid, e.span)?;
                self.resolutions.insert(e.id, Resolution::Var(sid));
                Ok(ty)
            }
            Some(Binding::Proc(pid)) => {
                let sig = self.local_sig(pid, e.span)?;
                let proc = self.proc_ref(pid);
                self.resolutions.insert(e.id, Resolution::Proc(proc));
                Ok(sig.proc_type())
            }
            Some(Binding::Artifact(_)) => Err(mismatch(
                e.span,
                format!("`{name}` is a type, not a value"),
            )),
            Some(Binding::Module(_)) => Err(mismatch(
                e.span,
                format!("module `{name}` is not a value"),
            )),
            None if Builtin::from_name(name).is_some() => Err(mismatch(
                e.span,
                format!("builtin `{name}` can only be called"),
            )),
            None => Err(err(
                SemanticErrorKind::UndefinedSymbol,
                e.span,
                format!("undefined name `{name}`"),
            )),
        }
    }

    /// Type of a symbol at a use site, enforcing declaration order for
    /// module-level code and recording captures.
    fn use_symbol(&mut self, ctx: &Ctx, sid: SymbolId, span: Span) -> SemResult<Type> {
        if self.symbols[sid.0 as usize].global {
            if let Some(slot) = self.globals.get(&sid) {
                let (position, inferred, state) =
                    (slot.position, slot.declared.is_none(), slot.state);
                let name = self.symbols[sid.0 as usize].name.clone();
                if let Some(current) = ctx.position {
                    if position >= current {
                        return Err(err(
                            SemanticErrorKind::UndefinedSymbol,
                            span,
                            format!("`{name}` is used before its declaration"),
                        ));
                    }
                }
                if inferred {
                    match state {
                        State::Unchecked => self.check_global(sid),
                        State::InProgress => {
                            return Err(mismatch(
                                span,
                                format!("the type of `{name}` depends on itself"),
                            ));
                        }
                        State::Done => {}
                    }
                }
            }
        } else {
            self.note_capture(ctx, sid, span)?;
        }
        Ok(self.symbols[sid.0 as usize].ty.clone())
    }

    /// Adds `sid` to the capture set of every procedure between the use site
    /// and the symbol's owner.
    fn note_capture(&mut self, ctx: &Ctx, sid: SymbolId, span: Span) -> SemResult<()> {
        let sym = &self.symbols[sid.0 as usize];
        let owner = sym.owner;
        let kind = sym.kind;
        let holds_list = sym.ty.contains_list();
        let name = sym.name.clone();

        let mut cur = ctx.proc;
        while let Some(pid) = cur {
            if Some(pid) == owner || kind == SymbolKind::NestedProc(pid) {
                break;
            }
            let info = &mut self.procs[pid.0 as usize];
            if holds_list {
                return Err(mismatch(
                    span,
                    format!(
                        "procedure `{}` cannot capture list `{name}`; pass it as an argument",
                        info.name
                    ),
                ));
            }
            if !info.captures.contains(&sid) {
                info.captures.push(sid);
            }
            cur = info.nested_in;
        }
        Ok(())
    }

    fn proc_ref(&self, pid: ProcId) -> ProcRef {
        ProcRef {
            module: self.module.clone(),
            path: self.procs[pid.0 as usize].path.clone(),
        }
    }

    /// Signature of a local procedure with its return type resolved.
    fn local_sig(&mut self, pid: ProcId, span: Span) -> SemResult<ProcSig> {
        let Some(ret) = self.ensure_ret(pid) else {
            let name = &self.procs[pid.0 as usize].name;
            return Err(mismatch(
                span,
                format!(
                    "cannot infer the return type of `{name}` from a recursive call before its first `return`"
                ),
            ));
        };
        let mut sig = self.procs[pid.0 as usize].sig();
        sig.ret = ret;
        Ok(sig)
    }

    fn self_prop(&mut self, ctx: &Ctx, e: &Expr, name: &Ident) -> SemResult<Type> {
        match ctx.this.clone() {
            None => Err(err(
                SemanticErrorKind::UnknownProperty,
                e.span,
                format!("`.{}` can only be used inside an artifact", name.node),
            )),
            Some(SelfCtx::Record { artifact, .. }) => {
                if let Some(prop) = self.artifact_prop(&artifact, &name.node) {
                    self.resolutions
                        .insert(e.id, Resolution::SelfField(name.node.clone()));
                    return Ok(prop.ty);
                }
                if self.has_method(&artifact, &name.node) {
                    return Err(mismatch(
                        e.span,
                        format!("method `.{}` must be called", name.node),
                    ));
                }
                Err(err(
                    SemanticErrorKind::UnknownProperty,
                    name.span,
                    format!("`{}` has no property `{}`", artifact.name, name.node),
                ))
            }
            Some(SelfCtx::Namespace(artifact)) => self.namespace_member(ctx, e, &artifact, name),
        }
    }

    fn namespace_member(
        &mut self,
        ctx: &Ctx,
        e: &Expr,
        artifact: &ArtifactRef,
        name: &Ident,
    ) -> SemResult<Type> {
        let inside = matches!(&ctx.this, Some(SelfCtx::Namespace(a)) if a == artifact);
        let local = self.local_artifact(artifact);

        if let Some(prop) = self.artifact_prop(artifact, &name.node) {
            if let (Some(idx), Some(position), false) = (local, ctx.position, inside) {
                if self.artifact_position(idx) >= position {
                    return Err(err(
                        SemanticErrorKind::UndefinedSymbol,
                        e.span,
                        format!(
                            "`{}.{}` is used before its declaration",
                            artifact.name, name.node
                        ),
                    ));
                }
            }
            self.resolutions.insert(
                e.id,
                Resolution::Global {
                    module: artifact.module.clone(),
                    path: vec![artifact.name.clone(), name.node.clone()],
                },
            );
            return Ok(prop.ty);
        }

        if let Some(sig) = self.artifact_method_sig(artifact, &name.node, e.span)? {
            self.resolutions.insert(
                e.id,
                Resolution::Proc(ProcRef {
                    module: artifact.module.clone(),
                    path: vec![artifact.name.clone(), name.node.clone()],
                }),
            );
            return Ok(sig.proc_type());
        }

        if let Some(idx) = local {
            if self.artifacts[idx].declares(&name.node) {
                return Err(err(
                    SemanticErrorKind::UndefinedSymbol,
                    name.span,
                    format!(
                        "`{}.{}` is used before its declaration",
                        artifact.name, name.node
                    ),
                ));
            }
        }
        Err(err(
            SemanticErrorKind::UnknownProperty,
            name.span,
            format!("namespace `{}` has no member `{}`", artifact.name, name.node),
        ))
    }

    fn static_path(&mut self, ctx: &Ctx, e: &Expr) -> SemResult<Option<StaticPath>> {
        match &e.kind {
            ExprKind::Ident(name) => match self.scopes.lookup(ctx.scope, name).cloned() {
                Some(Binding::Module(idx)) => match self.imports[idx].interface.clone() {
                    Some(interface) => {
                        self.resolutions
                            .insert(e.id, Resolution::Module(interface.module.clone()));
                        Ok(Some(StaticPath::Module(idx)))
                    }
                    None => Ok(Some(StaticPath::Poisoned)),
                },
                Some(Binding::Artifact(artifact)) => {
                    self.resolutions
                        .insert(e.id, Resolution::Artifact(artifact.clone()));
                    Ok(Some(StaticPath::Artifact(artifact)))
                }
                _ => Ok(None),
            },
            ExprKind::Member { base, name } => match self.static_path(ctx, base)? {
                Some(StaticPath::Module(idx)) => {
                    let Some(interface) = self.imports[idx].interface.clone() else {
                        return Ok(Some(StaticPath::Poisoned));
                    };
                    if !interface.artifacts.contains_key(&name.node) {
                        return Ok(None);
                    }
                    let artifact = ArtifactRef {
                        module: interface.module.clone(),
                        name: name.node.clone(),
                    };
                    self.resolutions
                        .insert(e.id, Resolution::Artifact(artifact.clone()));
                    Ok(Some(StaticPath::Artifact(artifact)))
                }
                Some(StaticPath::Poisoned) => Ok(Some(StaticPath::Poisoned)),
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn static_member(
        &mut self,
        ctx: &Ctx,
        e: &Expr,
        path: StaticPath,
        name: &Ident,
    ) -> SemResult<Type> {
        match path {
            StaticPath::Poisoned => Ok(Type::Unknown),
            StaticPath::Module(idx) => {
                let Some(interface) = self.imports[idx].interface.clone() else {
                    return Ok(Type::Unknown);
                };
                if let Some(global) = interface.globals.get(&name.node) {
                    self.resolutions.insert(
                        e.id,
                        Resolution::Global {
                            module: interface.module.clone(),
                            path: vec![name.node.clone()],
                        },
                    );
                    return Ok(global.ty.clone());
                }
                if let Some(sig) = interface.procs.get(&name.node) {
                    self.resolutions.insert(
                        e.id,
                        Resolution::Proc(ProcRef {
                            module: interface.module.clone(),
                            path: vec![name.node.clone()],
                        }),
                    );
                    return Ok(sig.proc_type());
                }
                if interface.artifacts.contains_key(&name.node) {
                    return Err(mismatch(
                        e.span,
                        format!("`{}` is a type, not a value", name.node),
                    ));
                }
                Err(err(
                    SemanticErrorKind::UndefinedSymbol,
                    name.span,
                    format!("module `{}` has no member `{}`", interface.module, name.node),
                ))
            }
            StaticPath::Artifact(artifact) => match self.artifact_kind(&artifact) {
                Some(ArtifactKind::Enum) => match self.enum_case(&artifact, &name.node) {
                    Some(value) => {
                        self.resolutions.insert(
                            e.id,
                            Resolution::EnumCase {
                                artifact: artifact.clone(),
                                value,
                            },
                        );
                        Ok(Type::Artifact(artifact))
                    }
                    None => Err(err(
                        SemanticErrorKind::UnknownProperty,
                        name.span,
                        format!("enum `{}` has no case `{}`", artifact.name, name.node),
                    )),
                },
                Some(ArtifactKind::Namespace) => self.namespace_member(ctx, e, &artifact, name),
                _ => Err(mismatch(
                    e.span,
                    format!(
                        "record `{}` has no static members; construct a value first",
                        artifact.name
                    ),
                )),
            },
        }
    }

    fn value_member(&mut self, e: &Expr, base_ty: &Type, name: &Ident) -> SemResult<Type> {
        match base_ty {
            Type::Unknown => Ok(Type::Unknown),
            Type::Artifact(artifact) => {
                if self.artifact_kind(artifact) != Some(ArtifactKind::Record) {
                    return Err(err(
                        SemanticErrorKind::UnknownProperty,
                        name.span,
                        format!("`{base_ty}` values have no properties"),
                    ));
                }
                if let Some(prop) = self.artifact_prop(artifact, &name.node) {
                    self.resolutions
                        .insert(e.id, Resolution::Field(name.node.clone()));
                    return Ok(prop.ty);
                }
                if self.has_method(artifact, &name.node) {
                    return Err(mismatch(
                        e.span,
                        format!("method `{}` of `{}` must be called", name.node, artifact.name),
                    ));
                }
                Err(err(
                    SemanticErrorKind::UnknownProperty,
                    name.span,
                    format!("`{}` has no property `{}`", artifact.name, name.node),
                ))
            }
            other => Err(err(
                SemanticErrorKind::UnknownProperty,
                name.span,
                format!("`{other}` has no property `{}`", name.node),
            )),
        }
    }

    fn artifact_position(&self, idx: usize) -> usize {
        self.artifacts[idx].position
    }

    fn enum_case(&mut self, artifact: &ArtifactRef, name: &str) -> Option<i64> {
        if let Some(idx) = self.local_artifact(artifact) {
            return self.artifacts[idx]
                .cases
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| *v);
        }
        self.interface_of(&artifact.module)?
            .artifacts
            .get(&artifact.name)?
            .case(name)
    }

    fn has_method(&mut self, artifact: &ArtifactRef, name: &str) -> bool {
        if let Some(idx) = self.local_artifact(artifact) {
            return self.artifacts[idx].methods.iter().any(|(n, _)| n == name);
        }
        self.interface_of(&artifact.module)
            .and_then(|i| i.artifacts.get(&artifact.name).map(|a| a.method(name).is_some()))
            .unwrap_or(false)
    }

    fn artifact_method_sig(
        &mut self,
        artifact: &ArtifactRef,
        name: &str,
        span: Span,
    ) -> SemResult<Option<ProcSig>> {
        if let Some(idx) = self.local_artifact(artifact) {
            let pid = self.artifacts[idx]
                .methods
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, p)| *p);
            return match pid {
                Some(pid) => self.local_sig(pid, span).map(Some),
                None => Ok(None),
            };
        }
        Ok(self.interface_of(&artifact.module).and_then(|i| {
            i.artifacts
                .get(&artifact.name)
                .and_then(|a| a.method(name))
                .map(|m| m.sig.clone())
        }))
    }

    // ----- literals and operators -------------------------------------------

    fn array_literal(
        &mut self,
        ctx: &Ctx,
        e: &'a Expr,
        items: &'a [Expr],
        expected: Option<&Type>,
    ) -> SemResult<Type> {
        match expected {
            Some(Type::List(elem)) => {
                for item in items {
                    self.expect(ctx, item, elem)?;
                }
                Ok(Type::List(elem.clone()))
            }
            Some(Type::Array(elem, n)) => {
                if items.len() as u64 != *n {
                    return Err(err(
                        SemanticErrorKind::ArraySizeMismatch,
                        e.span,
                        format!("expected {n} elements, found {}", items.len()),
                    ));
                }
                for item in items {
                    self.expect(ctx, item, elem)?;
                }
                Ok(Type::Array(elem.clone(), *n))
            }
            _ => {
                if items.is_empty() {
                    return Err(mismatch(
                        e.span,
                        "cannot infer the element type of an empty array literal; declare its type",
                    ));
                }
                let mut types = Vec::with_capacity(items.len());
                for item in items {
                    types.push(self.expr(ctx, item, None)?);
                }

                let mut elem = types[0].clone();
                for (item, t) in items.iter().zip(&types).skip(1) {
                    elem = match (&elem, t) {
                        (Type::Unknown, _) => t.clone(),
                        (_, Type::Unknown) => elem,
                        (Type::Int, Type::Float) | (Type::Float, Type::Int) => Type::Float,
                        (Type::Array(_, n), Type::Array(_, m)) if n != m => {
                            return Err(err(
                                SemanticErrorKind::ArraySizeMismatch,
                                item.span,
                                format!("array elements must share one size, found `{elem}` and `{t}`"),
                            ));
                        }
                        _ if same_type(&elem, t) => elem,
                        _ => {
                            return Err(mismatch(
                                item.span,
                                format!("array elements must share one type, found `{elem}` and `{t}`"),
                            ));
                        }
                    };
                }

                if elem == Type::Void {
                    return Err(mismatch(e.span, "array elements must be values"));
                }
                if elem.contains_list() {
                    return Err(mismatch(e.span, "arrays cannot hold lists"));
                }
                if elem == Type::Float {
                    for (item, t) in items.iter().zip(&types) {
                        if *t == Type::Int {
                            self.widened.insert(item.id);
                        }
                    }
                }
                Ok(Type::Array(Box::new(elem), items.len() as u64))
            }
        }
    }

    fn binary(
        &mut self,
        ctx: &Ctx,
        e: &Expr,
        left: &'a Expr,
        op: BinOp,
        right: &'a Expr,
    ) -> SemResult<Type> {
        let lt = self.expr(ctx, left, None)?;
        let rt = self.expr(ctx, right, None)?;
        let bad = || {
            mismatch(
                e.span,
                format!("`{}` cannot be applied to `{lt}` and `{rt}`", op.symbol()),
            )
        };

        if lt.is_unknown() || rt.is_unknown() {
            return Ok(if op.is_comparison() || matches!(op, BinOp::And | BinOp::Or) {
                Type::Bool
            } else {
                Type::Unknown
            });
        }

        match op {
            BinOp::Add if lt == Type::String || rt == Type::String => {
                let text = |t: &Type| {
                    matches!(t, Type::String | Type::Int | Type::Float | Type::Bool)
                };
                if text(&lt) && text(&rt) {
                    Ok(Type::String)
                } else {
                    Err(bad())
                }
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                self.numeric(left, right, &lt, &rt).ok_or_else(bad)
            }
            BinOp::Shl | BinOp::Shr | BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => {
                if lt == Type::Int && rt == Type::Int {
                    Ok(Type::Int)
                } else {
                    Err(bad())
                }
            }
            BinOp::And | BinOp::Or => {
                if lt == Type::Bool && rt == Type::Bool {
                    Ok(Type::Bool)
                } else {
                    Err(bad())
                }
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if self.numeric(left, right, &lt, &rt).is_some()
                    || (lt == Type::String && rt == Type::String)
                {
                    Ok(Type::Bool)
                } else {
                    Err(bad())
                }
            }
            BinOp::Eq | BinOp::Ne => {
                if self.numeric(left, right, &lt, &rt).is_some() {
                    return Ok(Type::Bool);
                }
                let comparable = match (&lt, &rt) {
                    (Type::String, Type::String) | (Type::Bool, Type::Bool) => true,
                    (Type::Artifact(a), Type::Artifact(b)) if a == b => {
                        self.artifact_kind(a) == Some(ArtifactKind::Enum)
                    }
                    _ => false,
                };
                if comparable {
                    Ok(Type::Bool)
                } else {
                    Err(bad())
                }
            }
        }
    }

    /// Result type of a numeric operation, widening an `int` operand when the
    /// other one is `float`.
    fn numeric(&mut self, left: &Expr, right: &Expr, lt: &Type, rt: &Type) -> Option<Type> {
        match (lt, rt) {
            (Type::Int, Type::Int) => Some(Type::Int),
            (Type::Float, Type::Float) => Some(Type::Float),
            (Type::Int, Type::Float) => {
                self.widened.insert(left.id);
                Some(Type::Float)
            }
            (Type::Float, Type::Int) => {
                self.widened.insert(right.id);
                Some(Type::Float)
            }
            _ => None,
        }
    }

    // ----- calls ------------------------------------------------------------

    fn call(
        &mut self,
        ctx: &Ctx,
        e: &'a Expr,
        callee: &'a Expr,
        args: &'a [Expr],
    ) -> SemResult<Type> {
        match &callee.kind {
            ExprKind::Ident(name) => match self.scopes.lookup(ctx.scope, name).cloned() {
                Some(Binding::Symbol(sid)) => {
                    if let SymbolKind::NestedProc(pid) = self.symbols[sid.0 as usize].kind {
                        self.note_capture(ctx, sid, callee.span)?;
                        let sig = self.local_sig(pid, e.span)?;
                        self.bind_args(ctx, e, name, &sig, args)?;
                        self.resolutions.insert(callee.id, Resolution::Var(sid));
                        self.expr_types.insert(callee.id, sig.proc_type());
                        self.calls.insert(
                            e.id,
                            CallTarget::NestedProc {
                                symbol: sid,
                                proc: pid,
                                supplied: args.len(),
                                total: sig.params.len(),
                            },
                        );
                        return Ok(sig.ret);
                    }
                    self.value_call(ctx, e, callee, args)
                }
                Some(Binding::Proc(pid)) => {
                    let sig = self.local_sig(pid, e.span)?;
                    self.bind_args(ctx, e, name, &sig, args)?;
                    let proc = self.proc_ref(pid);
                    self.resolutions
                        .insert(callee.id, Resolution::Proc(proc.clone()));
                    self.expr_types.insert(callee.id, sig.proc_type());
                    self.calls.insert(
                        e.id,
                        CallTarget::Proc {
                            proc,
                            supplied: args.len(),
                            total: sig.params.len(),
                        },
                    );
                    Ok(sig.ret)
                }
                Some(Binding::Artifact(artifact)) => {
                    self.resolutions
                        .insert(callee.id, Resolution::Artifact(artifact.clone()));
                    self.construct(ctx, e, &artifact, args)
                }
                Some(Binding::Module(_)) => Err(mismatch(
                    callee.span,
                    format!("module `{name}` is not callable"),
                )),
                None => match Builtin::from_name(name) {
                    Some(builtin) => self.builtin_call(ctx, e, builtin, args),
                    None => Err(err(
                        SemanticErrorKind::UndefinedSymbol,
                        callee.span,
                        format!("undefined procedure `{name}`"),
                    )),
                },
            },
            ExprKind::SelfProp(name) => match ctx.this.clone() {
                Some(SelfCtx::Record { artifact, .. }) if self.has_method(&artifact, &name.node) => {
                    let place = PlaceInfo {
                        root: PlaceRoot::SelfRef,
                        mutable: true,
                        reason: String::new(),
                    };
                    self.method_call(ctx, e, &artifact, name, args, Receiver::SelfRef, place)
                }
                Some(SelfCtx::Namespace(artifact)) if self.has_method(&artifact, &name.node) => {
                    self.namespace_call(ctx, e, callee, &artifact, name, args)
                }
                _ => self.value_call(ctx, e, callee, args),
            },
            ExprKind::Member { base, name } => {
                if let Some(path) = self.static_path(ctx, base)? {
                    return self.static_call(ctx, e, callee, path, name, args);
                }
                let base_ty = self.expr(ctx, base, None)?;
                match &base_ty {
                    Type::List(elem) if name.node == "push" || name.node == "pop" => {
                        let elem = (**elem).clone();
                        self.list_call(ctx, e, base, &elem, name, args)
                    }
                    Type::Artifact(artifact) if self.has_method(artifact, &name.node) => {
                        let place = self.place_info(ctx, base);
                        let artifact = artifact.clone();
                        self.method_call(ctx, e, &artifact, name, args, Receiver::Value, place)
                    }
                    Type::Unknown => {
                        for arg in args {
                            self.expr(ctx, arg, None)?;
                        }
                        Ok(Type::Unknown)
                    }
                    _ => {
                        // A property holding a procedure value.
                        let ty = self.value_member(callee, &base_ty, name)?;
                        self.expr_types.insert(callee.id, ty.clone());
                        self.apply_value(ctx, e, &ty, args)
                    }
                }
            }
            _ => self.value_call(ctx, e, callee, args),
        }
    }

    fn bind_args(
        &mut self,
        ctx: &Ctx,
        call: &Expr,
        what: &str,
        sig: &ProcSig,
        args: &'a [Expr],
    ) -> SemResult<()> {
        let total = sig.params.len();
        let required = sig.required();
        if args.len() < required || args.len() > total {
            let expected = if required == total {
                arg_count(total)
            } else {
                format!("{required} to {total} arguments")
            };
            return Err(mismatch(
                call.span,
                format!("`{what}` expects {expected}, found {}", args.len()),
            ));
        }
        for (arg, param) in args.iter().zip(&sig.params) {
            self.expect(ctx, arg, &param.ty)?;
        }
        Ok(())
    }

    fn value_call(
        &mut self,
        ctx: &Ctx,
        e: &'a Expr,
        callee: &'a Expr,
        args: &'a [Expr],
    ) -> SemResult<Type> {
        let ty = self.expr(ctx, callee, None)?;
        self.apply_value(ctx, e, &ty, args)
    }

    fn apply_value(&mut self, ctx: &Ctx, e: &Expr, ty: &Type, args: &'a [Expr]) -> SemResult<Type> {
        match ty {
            Type::Proc(params, ret) => {
                if args.len() != params.len() {
                    return Err(mismatch(
                        e.span,
                        format!(
                            "procedure value expects {}, found {}",
                            arg_count(params.len()),
                            args.len()
                        ),
                    ));
                }
                for (arg, param) in args.iter().zip(params) {
                    self.expect(ctx, arg, param)?;
                }
                self.calls.insert(e.id, CallTarget::Value);
                Ok((**ret).clone())
            }
            Type::Unknown => {
                for arg in args {
                    self.expr(ctx, arg, None)?;
                }
                Ok(Type::Unknown)
            }
            other => Err(mismatch(e.span, format!("`{other}` is not callable"))),
        }
    }

    fn static_call(
        &mut self,
        ctx: &Ctx,
        e: &'a Expr,
        callee: &'a Expr,
        path: StaticPath,
        name: &Ident,
        args: &'a [Expr],
    ) -> SemResult<Type> {
        match path {
            StaticPath::Poisoned => {
                for arg in args {
                    self.expr(ctx, arg, None)?;
                }
                Ok(Type::Unknown)
            }
            StaticPath::Module(idx) => {
                let Some(interface) = self.imports[idx].interface.clone() else {
                    return Ok(Type::Unknown);
                };
                if let Some(sig) = interface.procs.get(&name.node) {
                    self.bind_args(ctx, e, &name.node, sig, args)?;
                    let proc = ProcRef {
                        module: interface.module.clone(),
                        path: vec![name.node.clone()],
                    };
                    self.resolutions
                        .insert(callee.id, Resolution::Proc(proc.clone()));
                    self.expr_types.insert(callee.id, sig.proc_type());
                    self.calls.insert(
                        e.id,
                        CallTarget::Proc {
                            proc,
                            supplied: args.len(),
                            total: sig.params.len(),
                        },
                    );
                    return Ok(sig.ret.clone());
                }
                if interface.artifacts.contains_key(&name.node) {
                    let artifact = ArtifactRef {
                        module: interface.module.clone(),
                        name: name.node.clone(),
                    };
                    self.resolutions
                        .insert(callee.id, Resolution::Artifact(artifact.clone()));
                    return self.construct(ctx, e, &artifact, args);
                }
                let ty = self.static_member(ctx, callee, StaticPath::Module(idx), name)?;
                self.expr_types.insert(callee.id, ty.clone());
                self.apply_value(ctx, e, &ty, args)
            }
            StaticPath::Artifact(artifact) => {
                if self.artifact_kind(&artifact) == Some(ArtifactKind::Namespace)
                    && self.has_method(&artifact, &name.node)
                {
                    return self.namespace_call(ctx, e, callee, &artifact, name, args);
                }
                let ty = self.static_member(ctx, callee, StaticPath::Artifact(artifact), name)?;
                self.expr_types.insert(callee.id, ty.clone());
                self.apply_value(ctx, e, &ty, args)
            }
        }
    }

    fn namespace_call(
        &mut self,
        ctx: &Ctx,
        e: &'a Expr,
        callee: &Expr,
        artifact: &ArtifactRef,
        name: &Ident,
        args: &'a [Expr],
    ) -> SemResult<Type> {
        let Some(sig) = self.artifact_method_sig(artifact, &name.node, e.span)? else {
            return Err(err(
                SemanticErrorKind::UnknownProperty,
                name.span,
                format!("namespace `{}` has no procedure `{}`", artifact.name, name.node),
            ));
        };
        self.bind_args(ctx, e, &name.node, &sig, args)?;
        let proc = ProcRef {
            module: artifact.module.clone(),
            path: vec![artifact.name.clone(), name.node.clone()],
        };
        self.resolutions
            .insert(callee.id, Resolution::Proc(proc.clone()));
        self.expr_types.insert(callee.id, sig.proc_type());
        self.calls.insert(
            e.id,
            CallTarget::Proc {
                proc,
                supplied: args.len(),
                total: sig.params.len(),
            },
        );
        Ok(sig.ret)
    }

    #[allow(clippy::too_many_arguments)]
    fn method_call(
        &mut self,
        ctx: &Ctx,
        e: &'a Expr,
        artifact: &ArtifactRef,
        name: &Ident,
        args: &'a [Expr],
        receiver: Receiver,
        place: PlaceInfo,
    ) -> SemResult<Type> {
        let Some(sig) = self.artifact_method_sig(artifact, &name.node, e.span)? else {
            return Err(err(
                SemanticErrorKind::UnknownProperty,
                name.span,
                format!("`{}` has no method `{}`", artifact.name, name.node),
            ));
        };
        self.bind_args(ctx, e, &name.node, &sig, args)?;
        self.calls.insert(
            e.id,
            CallTarget::Method {
                artifact: artifact.clone(),
                method: name.node.clone(),
                supplied: args.len(),
                total: sig.params.len(),
                mutating: false,
                receiver,
            },
        );
        self.pending.push(PendingReceiver {
            call: e.id,
            span: e.span,
            place,
            artifact: artifact.clone(),
            method: name.node.clone(),
            caller: ctx.proc,
        });
        Ok(sig.ret)
    }

    fn construct(
        &mut self,
        ctx: &Ctx,
        e: &'a Expr,
        artifact: &ArtifactRef,
        args: &'a [Expr],
    ) -> SemResult<Type> {
        match self.artifact_kind(artifact) {
            Some(ArtifactKind::Record) => {}
            Some(ArtifactKind::Enum) => {
                return Err(mismatch(
                    e.span,
                    format!(
                        "enum `{}` cannot be constructed; use one of its cases",
                        artifact.name
                    ),
                ));
            }
            Some(ArtifactKind::Namespace) => {
                return Err(mismatch(
                    e.span,
                    format!("namespace `{}` cannot be constructed", artifact.name),
                ));
            }
            None => return Ok(Type::Unknown),
        }

        let props = self.artifact_props(artifact);
        if args.len() > props.len() {
            return Err(mismatch(
                e.span,
                format!(
                    "`{}` has {}, found {} arguments",
                    artifact.name,
                    match props.len() {
                        1 => "1 property".to_string(),
                        n => format!("{n} properties"),
                    },
                    args.len()
                ),
            ));
        }
        for (arg, prop) in args.iter().zip(&props) {
            self.expect(ctx, arg, &prop.ty)?;
        }
        self.calls.insert(
            e.id,
            CallTarget::Constructor {
                artifact: artifact.clone(),
                supplied: args.len(),
                total: props.len(),
            },
        );
        Ok(Type::Artifact(artifact.clone()))
    }

    fn builtin_call(
        &mut self,
        ctx: &Ctx,
        e: &'a Expr,
        builtin: Builtin,
        args: &'a [Expr],
    ) -> SemResult<Type> {
        let name = builtin.name();
        let (min, max) = builtin.arity();
        if args.len() < min || args.len() > max {
            let expected = if min == max {
                arg_count(min)
            } else {
                format!("{min} to {max} arguments")
            };
            return Err(mismatch(
                e.span,
                format!("`{name}` expects {expected}, found {}", args.len()),
            ));
        }

        let mut types = Vec::with_capacity(args.len());
        for arg in args {
            types.push(self.expr(ctx, arg, None)?);
        }
        self.calls.insert(e.id, CallTarget::Builtin(builtin));

        if types.iter().any(Type::is_unknown) {
            return Ok(match builtin {
                Builtin::Print => Type::Void,
                _ => Type::Unknown,
            });
        }
        for t in &types {
            if let Type::Artifact(a) = t {
                if self.artifact_kind(a) == Some(ArtifactKind::Record) {
                    return Err(mismatch(
                        e.span,
                        format!("`{name}` cannot take record `{}`", a.name),
                    ));
                }
            }
        }
        builtin.result(&types).map_err(|accepts| {
            let found = types
                .iter()
                .map(|t| format!("`{t}`"))
                .collect::<Vec<_>>()
                .join(", ");
            mismatch(e.span, format!("`{name}` takes {accepts}, found {found}"))
        })
    }

    fn list_call(
        &mut self,
        ctx: &Ctx,
        e: &'a Expr,
        base: &'a Expr,
        elem: &Type,
        name: &Ident,
        args: &'a [Expr],
    ) -> SemResult<Type> {
        let place = self.place_info(ctx, base);
        match place.root {
            PlaceRoot::Temp => {
                return Err(mismatch(
                    base.span,
                    format!("`{}` needs a list variable, not a temporary value", name.node),
                ));
            }
            _ if !place.mutable => {
                return Err(err(
                    SemanticErrorKind::ImmutableAssignment,
                    e.span,
                    format!("cannot `{}`: {}", name.node, place.reason),
                ));
            }
            PlaceRoot::SelfRef => self.mark_self_mutation(ctx),
            _ => {}
        }

        if name.node == "push" {
            if args.len() != 1 {
                return Err(mismatch(
                    e.span,
                    format!("`push` expects 1 argument, found {}", args.len()),
                ));
            }
            self.expect(ctx, &args[0], elem)?;
            self.calls.insert(e.id, CallTarget::ListPush);
            Ok(Type::Void)
        } else {
            if !args.is_empty() {
                return Err(mismatch(
                    e.span,
                    format!("`pop` expects 0 arguments, found {}", args.len()),
                ));
            }
            self.calls.insert(e.id, CallTarget::ListPop);
            Ok(elem.clone())
        }
    }

    // ----- places -----------------------------------------------------------

    /// Checks that an already-typed expression may be written to.
    pub(crate) fn assignable(&mut self, ctx: &Ctx, target: &Expr) -> SemResult<()> {
        let place = self.place_info(ctx, target);
        match place.root {
            PlaceRoot::Temp => Err(mismatch(target.span, "cannot assign to a temporary value")),
            _ if !place.mutable => Err(err(
                SemanticErrorKind::ImmutableAssignment,
                target.span,
                place.reason,
            )),
            PlaceRoot::SelfRef => {
                self.mark_self_mutation(ctx);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn mark_self_mutation(&mut self, ctx: &Ctx) {
        if let Some(SelfCtx::Record { method, .. }) = &ctx.this {
            self.metas[method.0 as usize].direct_mutation = true;
        }
    }

    /// Root binding and mutability of an already-typed expression.
    pub(crate) fn place_info(&mut self, ctx: &Ctx, e: &Expr) -> PlaceInfo {
        let fixed = |reason: String| PlaceInfo {
            root: PlaceRoot::Static,
            mutable: false,
            reason,
        };
        match &e.kind {
            ExprKind::Ident(name) => match self.resolutions.get(&e.id) {
                Some(Resolution::Var(sid)) => {
                    let sym = &self.symbols[sid.0 as usize];
                    let captured = !sym.global && sym.owner != ctx.proc;
                    let reason = if captured {
                        format!("`{name}` is captured by value and cannot be modified")
                    } else {
                        match sym.kind {
                            SymbolKind::Param => format!("parameter `{name}` is immutable"),
                            SymbolKind::LoopVar => format!("loop variable `{name}` is immutable"),
                            SymbolKind::NestedProc(_) => {
                                format!("procedure `{name}` cannot be modified")
                            }
                            SymbolKind::Var => format!("`{name}` is immutable"),
                        }
                    };
                    PlaceInfo {
                        root: PlaceRoot::Symbol(*sid),
                        mutable: sym.mutable && !captured,
                        reason,
                    }
                }
                _ => fixed(format!("`{name}` cannot be modified")),
            },
            ExprKind::SelfProp(name) => match (self.resolutions.get(&e.id).cloned(), ctx.this.clone()) {
                (Some(Resolution::SelfField(_)), Some(SelfCtx::Record { artifact, .. })) => {
                    let mutable = self
                        .artifact_prop(&artifact, &name.node)
                        .map(|p| p.mutable)
                        .unwrap_or(false);
                    PlaceInfo {
                        root: PlaceRoot::SelfRef,
                        mutable,
                        reason: format!("property `.{}` is immutable", name.node),
                    }
                }
                (Some(Resolution::Global { .. }), _) => {
                    fixed(format!("namespace constant `.{}` is immutable", name.node))
                }
                _ => fixed(format!("`.{}` cannot be modified", name.node)),
            },
            ExprKind::Member { base, name } => match self.resolutions.get(&e.id).cloned() {
                Some(Resolution::Field(_)) => {
                    let base_place = self.place_info(ctx, base);
                    let prop_mutable = match self.expr_types.get(&base.id).cloned() {
                        Some(Type::Artifact(artifact)) => self
                            .artifact_prop(&artifact, &name.node)
                            .map(|p| p.mutable)
                            .unwrap_or(false),
                        _ => true,
                    };
                    let reason = if base_place.mutable {
                        format!("property `{}` is immutable", name.node)
                    } else {
                        base_place.reason.clone()
                    };
                    PlaceInfo {
                        root: base_place.root,
                        mutable: base_place.mutable && prop_mutable,
                        reason,
                    }
                }
                Some(Resolution::Global { .. }) => {
                    fixed(format!("imported `{}` is immutable", name.node))
                }
                _ => fixed(format!("`{}` cannot be modified", name.node)),
            },
            ExprKind::Index { base, .. } => self.place_info(ctx, base),
            _ => PlaceInfo {
                root: PlaceRoot::Temp,
                mutable: true,
                reason: String::new(),
            },
        }
    }
}
