#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use ark_ast::{
    ArtifactDecl, ArtifactKind, BinOp, Block, Expr, ExprKind, NodeId, PostfixOp, ProcDecl, Stmt,
    UnaryOp, VarDecl,
};
use ark_core::{
    ArtifactRef, Builtin, CallTarget, CheckedUnit, ProcId, ProcKind, ProcRef, Receiver, Resolution,
    Symbol, SymbolId, SymbolKind, Type,
};

use crate::ctypes::{c_ident, c_string, float_lit, int_lit, mangle, module_part, TypeTable};
use crate::runtime::{emit_runtime_c, emit_runtime_h, RUNTIME_HEADER};
use crate::{CArtifacts, LoweringError, LoweringErrorKind};

type LowerResult<T> = Result<T, LoweringError>;

fn unsupported(message: impl Into<String>) -> LoweringError {
    LoweringError::new(LoweringErrorKind::UnsupportedConstruct, message)
}

/// Lowers checked units, dependencies first and the entry unit last, into one
/// C translation unit plus the runtime support files.
pub fn emit_program(units: &[CheckedUnit]) -> Result<CArtifacts, LoweringError> {
    if units.is_empty() {
        return Err(unsupported("no units to lower"));
    }

    let mut artifacts = HashMap::new();
    for unit in units {
        for info in unit.interface.artifacts.values() {
            artifacts.insert(
                ArtifactRef {
                    module: info.module.clone(),
                    name: info.name.clone(),
                },
                info.clone(),
            );
        }
    }

    let mut types = TypeTable::new(artifacts);
    let mut sections = Sections::default();
    for unit in units {
        UnitLowering::new(unit, &mut types, &mut sections).lower()?;
    }

    let program_c = assemble(&types, &sections)?;
    Ok(CArtifacts {
        runtime_h: emit_runtime_h(),
        runtime_c: emit_runtime_c(),
        program_c,
    })
}

/// Text of `program.c`, filled unit by unit and joined at the end.
#[derive(Default)]
struct Sections {
    envs: String,
    enums: String,
    protos: String,
    globals: String,
    funcs: String,
    /// Module name parts in initialization order.
    modules: Vec<String>,
}

fn assemble(types: &TypeTable, s: &Sections) -> LowerResult<String> {
    let mut out = String::new();
    out.push_str("/* Generated by ark. Do not edit. */\n");
    let _ = writeln!(out, "#include \"{RUNTIME_HEADER}\"\n");

    out.push_str("/* types */\n");
    types.emit_definitions(&mut out)?;
    if !s.envs.is_empty() {
        out.push_str("/* procedure environments */\n");
        out.push_str(&s.envs);
        out.push('\n');
    }
    if !s.enums.is_empty() {
        out.push_str("/* enums */\n");
        out.push_str(&s.enums);
        out.push('\n');
    }
    out.push_str("/* prototypes */\n");
    out.push_str(&s.protos);
    out.push('\n');
    out.push_str("/* helpers */\n");
    types.emit_helpers(&mut out)?;
    out.push_str("/* globals */\n");
    out.push_str(&s.globals);
    out.push('\n');
    out.push_str(&s.funcs);

    out.push_str("int main(void) {\n  ark_rt_init();\n");
    for m in &s.modules {
        let _ = writeln!(out, "  ark_{m}__init();");
    }
    for m in s.modules.iter().rev() {
        let _ = writeln!(out, "  ark_{m}__fini();");
    }
    out.push_str("  ark_rt_fini();\n  return 0;\n}\n");
    Ok(out)
}

/// Per-function lowering state: owned lists per open scope, loop nesting and
/// the procedure being emitted.
struct FnCtx {
    proc: Option<ProcId>,
    ret: Type,
    scopes: Vec<Vec<(String, Type)>>,
    /// Scope depth at which each enclosing loop body starts.
    loops: Vec<usize>,
    /// List parameters, released at every exit.
    params: Vec<(String, Type)>,
    indent: usize,
    next_tmp: u32,
}

impl FnCtx {
    fn new(proc: Option<ProcId>, ret: Type) -> Self {
        Self {
            proc,
            ret,
            scopes: vec![Vec::new()],
            loops: Vec::new(),
            params: Vec::new(),
            indent: 1,
            next_tmp: 0,
        }
    }

    fn line(&self, out: &mut String, text: impl AsRef<str>) {
        for _ in 0..self.indent {
            out.push_str("  ");
        }
        out.push_str(text.as_ref());
        out.push('\n');
    }

    fn tmp(&mut self, what: &str) -> String {
        self.next_tmp += 1;
        format!("t{}_{what}", self.next_tmp)
    }

    fn own(&mut self, name: &str, ty: &Type) {
        if ty.contains_list() {
            if let Some(scope) = self.scopes.last_mut() {
                scope.push((name.to_string(), ty.clone()));
            }
        }
    }

    fn holds_lists(&self) -> bool {
        !self.params.is_empty() || self.scopes.iter().any(|s| !s.is_empty())
    }
}

fn local_name(sym: &Symbol) -> String {
    format!("l{}_{}", sym.id.0, c_ident(&sym.name))
}

fn ends_in_jump(stmts: &[Stmt]) -> bool {
    matches!(
        stmts.last(),
        Some(Stmt::Return(_) | Stmt::Break(_) | Stmt::Skip(_))
    )
}

fn collect_procs<'u>(stmts: &'u [Stmt], out: &mut HashMap<NodeId, &'u ProcDecl>) {
    for stmt in stmts {
        match stmt {
            Stmt::Proc(p) => {
                out.insert(p.id, p);
                collect_procs(&p.body.stmts, out);
            }
            Stmt::Artifact(a) => {
                for p in a.procs() {
                    out.insert(p.id, p);
                    collect_procs(&p.body.stmts, out);
                }
            }
            Stmt::Cond(c) => collect_procs(&c.body.stmts, out),
            Stmt::Chain(ch) => {
                for arm in &ch.arms {
                    collect_procs(&arm.body.stmts, out);
                }
                if let Some(fallback) = &ch.fallback {
                    collect_procs(&fallback.stmts, out);
                }
            }
            Stmt::While(w) => collect_procs(&w.body.stmts, out),
            Stmt::RangeFor(r) => collect_procs(&r.body.stmts, out),
            Stmt::Block(b) => collect_procs(&b.stmts, out),
            _ => {}
        }
    }
}

/// Literal initializers that can live in `const` file-scope storage.
fn is_constant_literal(unit: &CheckedUnit, e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Int(_) | ExprKind::Float(_) | ExprKind::Str(_) | ExprKind::Bool(_) => true,
        ExprKind::Unary {
            op: UnaryOp::Neg,
            expr,
        } => matches!(expr.kind, ExprKind::Int(_) | ExprKind::Float(_)),
        ExprKind::Member { .. } => matches!(
            unit.resolutions.get(&e.id),
            Some(Resolution::EnumCase { .. })
        ),
        _ => false,
    }
}

struct Param {
    name: String,
    c_type: String,
    ty: Type,
}

fn param_list(lead: Option<&str>, params: &[Param]) -> String {
    let mut parts: Vec<String> = lead.map(str::to_string).into_iter().collect();
    parts.extend(params.iter().map(|p| format!("{} {}", p.c_type, p.name)));
    if parts.is_empty() {
        "void".to_string()
    } else {
        parts.join(", ")
    }
}

fn arg_list(lead: Option<&str>, args: impl IntoIterator<Item = String>) -> String {
    lead.map(str::to_string)
        .into_iter()
        .chain(args)
        .collect::<Vec<_>>()
        .join(", ")
}

struct UnitLowering<'u, 'o> {
    unit: &'u CheckedUnit,
    types: &'o mut TypeTable,
    out: &'o mut Sections,
    proc_decls: HashMap<NodeId, &'u ProcDecl>,
    /// Module-level declarations stored as `const` literals.
    consts: HashSet<NodeId>,
    /// Module-level lists, released by the unit's `__fini`.
    fini: Vec<(String, Type)>,
}

impl<'u, 'o> UnitLowering<'u, 'o> {
    fn new(unit: &'u CheckedUnit, types: &'o mut TypeTable, out: &'o mut Sections) -> Self {
        Self {
            unit,
            types,
            out,
            proc_decls: HashMap::new(),
            consts: HashSet::new(),
            fini: Vec::new(),
        }
    }

    fn lower(mut self) -> LowerResult<()> {
        let unit = self.unit;
        collect_procs(&unit.program.stmts, &mut self.proc_decls);

        for stmt in &unit.program.stmts {
            match stmt {
                Stmt::Artifact(a) => self.artifact(a)?,
                Stmt::Proc(p) => {
                    let pid = self.proc_id(p.id)?;
                    if unit.proc(pid).kind == ProcKind::TopLevel {
                        self.procedure(pid)?;
                    }
                }
                Stmt::Var(v) => self.global_storage(v)?,
                _ => {}
            }
        }

        let part = module_part(&unit.module);
        let mut cx = FnCtx::new(None, Type::Void);
        let mut body = String::new();
        for stmt in &unit.program.stmts {
            self.stmt(&mut cx, &mut body, stmt)?;
        }
        self.release_from(&cx, &mut body, 0)?;

        let mut fini = String::new();
        for (name, ty) in self.fini.iter().rev() {
            let list = self.types.c_type(ty)?;
            let _ = writeln!(fini, "  {list}_free(&{name});");
        }

        let _ = writeln!(self.out.protos, "void ark_{part}__init(void);");
        let _ = writeln!(self.out.protos, "void ark_{part}__fini(void);");
        let _ = write!(
            self.out.funcs,
            "void ark_{part}__init(void) {{\n{body}}}\n\nvoid ark_{part}__fini(void) {{\n{fini}}}\n\n"
        );
        self.out.modules.push(part);
        Ok(())
    }

    fn proc_id(&self, id: NodeId) -> LowerResult<ProcId> {
        self.unit
            .proc_decls
            .get(&id)
            .copied()
            .ok_or_else(|| unsupported("procedure declaration was never analyzed"))
    }

    fn decl_symbol(&self, id: NodeId) -> LowerResult<SymbolId> {
        self.unit
            .decl_symbols
            .get(&id)
            .copied()
            .ok_or_else(|| unsupported("declaration without a symbol"))
    }

    fn resolution(&self, e: &Expr) -> LowerResult<&'u Resolution> {
        let unit = self.unit;
        unit.resolutions
            .get(&e.id)
            .ok_or_else(|| unsupported("unresolved name reached lowering"))
    }

    /// Type of `e` at its use site, after any int-to-float widening.
    fn value_type(&self, e: &Expr) -> Type {
        if self.unit.widened.contains(&e.id) {
            Type::Float
        } else {
            self.unit.type_of(e.id).clone()
        }
    }

    // ----- declarations -----------------------------------------------------

    fn global_storage(&mut self, v: &VarDecl) -> LowerResult<()> {
        let unit = self.unit;
        let sym = unit.symbol(self.decl_symbol(v.id)?);
        let name = mangle(&unit.module, std::slice::from_ref(&sym.name));
        self.storage(v, &name, &sym.ty, sym.mutable)
    }

    fn storage(&mut self, v: &VarDecl, name: &str, ty: &Type, mutable: bool) -> LowerResult<()> {
        let c_type = self.types.c_type(ty)?;
        if let Some(value) = &v.value {
            if !mutable && self.types.is_scalar(ty) && is_constant_literal(self.unit, value) {
                let mut cx = FnCtx::new(None, Type::Void);
                let init = self.expr(&mut cx, value)?;
                let _ = writeln!(self.out.globals, "const {c_type} {name} = {init};");
                self.consts.insert(v.id);
                return Ok(());
            }
        }
        let _ = writeln!(self.out.globals, "{c_type} {name};");
        if ty.contains_list() {
            self.fini.push((name.to_string(), ty.clone()));
        }
        Ok(())
    }

    fn artifact(&mut self, a: &ArtifactDecl) -> LowerResult<()> {
        let aref = ArtifactRef {
            module: self.unit.module.clone(),
            name: a.name.node.clone(),
        };
        let info = self.types.artifact(&aref)?.clone();
        match a.kind {
            ArtifactKind::Enum => {
                for (case, value) in &info.cases {
                    let name = mangle(&aref.module, &[aref.name.clone(), case.clone()]);
                    let _ = writeln!(self.out.enums, "#define {name} {}", int_lit(*value));
                }
            }
            ArtifactKind::Namespace => {
                for (prop, v) in info.props.iter().zip(a.props()) {
                    let name = mangle(&aref.module, &[aref.name.clone(), prop.name.clone()]);
                    self.storage(v, &name, &prop.ty, prop.mutable)?;
                }
            }
            ArtifactKind::Record => self.record(a, &aref)?,
        }
        for p in a.procs() {
            let pid = self.proc_id(p.id)?;
            self.procedure(pid)?;
        }
        Ok(())
    }

    /// Struct constructor, one dispatcher per omitted-argument count and
    /// `__default`, which evaluates every property default.
    fn record(&mut self, a: &ArtifactDecl, aref: &ArtifactRef) -> LowerResult<()> {
        let info = self.types.artifact(aref)?.clone();
        let rec = self.types.c_type(&Type::Artifact(aref.clone()))?;

        let mut fields = Vec::new();
        for prop in &info.props {
            fields.push(Param {
                name: format!("f_{}", c_ident(&prop.name)),
                c_type: self.types.c_type(&prop.ty)?,
                ty: prop.ty.clone(),
            });
        }

        let mut defaults = Vec::new();
        let mut cx = FnCtx::new(None, Type::Void);
        for (field, decl) in fields.iter().zip(a.props()) {
            defaults.push(match &decl.value {
                Some(e) => self.owned(&mut cx, e)?,
                None => self.types.default_value(&field.ty)?,
            });
        }

        let sig = format!("{rec} {rec}__new({})", param_list(None, &fields));
        let _ = writeln!(self.out.protos, "{sig};");
        let _ = writeln!(self.out.funcs, "{sig} {{\n  {rec} r;");
        for f in &fields {
            let _ = writeln!(self.out.funcs, "  r.{0} = {0};", f.name);
        }
        self.out.funcs.push_str("  return r;\n}\n\n");

        let n = fields.len();
        for keep in 1..n {
            let sig = format!(
                "{rec} {rec}__new__a{}({})",
                n - keep,
                param_list(None, &fields[..keep])
            );
            let args = fields[..keep]
                .iter()
                .map(|f| f.name.clone())
                .chain(defaults[keep..].iter().cloned());
            let _ = writeln!(self.out.protos, "{sig};");
            let _ = write!(
                self.out.funcs,
                "{sig} {{\n  return {rec}__new({});\n}}\n\n",
                arg_list(None, args)
            );
        }

        let sig = format!("{rec} {rec}__default(void)");
        let _ = writeln!(self.out.protos, "{sig};");
        let _ = write!(
            self.out.funcs,
            "{sig} {{\n  return {rec}__new({});\n}}\n\n",
            defaults.join(", ")
        );
        Ok(())
    }

    fn proc_name(&self, pid: ProcId) -> String {
        let info = self.unit.proc(pid);
        match info.kind {
            ProcKind::Nested { .. } => format!(
                "ark_{}__n{}_{}",
                module_part(&self.unit.module),
                pid.0,
                c_ident(&info.name)
            ),
            _ => mangle(&self.unit.module, &info.path),
        }
    }

    fn env_name(&self, pid: ProcId) -> String {
        format!("ark_env_{}_{}", module_part(&self.unit.module), pid.0)
    }

    /// Full-arity body, default dispatchers and, for module-level and
    /// namespace procedures, the `__v` adapter used by procedure values.
    fn procedure(&mut self, pid: ProcId) -> LowerResult<()> {
        let unit = self.unit;
        let info = unit.proc(pid);
        let decl = *self
            .proc_decls
            .get(&info.decl)
            .ok_or_else(|| unsupported(format!("no declaration for `{}`", info.name)))?;
        let name = self.proc_name(pid);
        let ret = self.types.c_type(&info.ret)?;

        let (lead_decl, lead_arg) = match &info.kind {
            ProcKind::Nested { .. } => (Some("void *env_".to_string()), Some("env_")),
            ProcKind::Method {
                artifact,
                mutates_self,
            } => {
                let rec = TypeTable::record_name(artifact);
                let qual = if *mutates_self { "" } else { "const " };
                (Some(format!("{qual}{rec} *self")), Some("self"))
            }
            _ => (None, None),
        };

        let mut params = Vec::new();
        for p in &info.params {
            params.push(Param {
                name: local_name(unit.symbol(p.symbol)),
                c_type: self.types.c_type(&p.ty)?,
                ty: p.ty.clone(),
            });
        }

        if info.is_nested() && !info.captures.is_empty() {
            let env = self.env_name(pid);
            let mut fields = String::new();
            for &sid in &info.captures {
                let ty = self.types.c_type(&unit.symbol(sid).ty)?;
                let _ = write!(fields, " {ty} c{};", sid.0);
            }
            let _ = writeln!(self.out.envs, "struct {env} {{{fields} }};");
        }

        let sig = format!("{ret} {name}({})", param_list(lead_decl.as_deref(), &params));
        let _ = writeln!(self.out.protos, "{sig};");

        let mut cx = FnCtx::new(Some(pid), info.ret.clone());
        let mut body = String::new();
        match lead_arg {
            Some("env_") if !info.captures.is_empty() => {
                let env = self.env_name(pid);
                cx.line(&mut body, format!("struct {env} *env = env_;"));
            }
            Some(lead) => cx.line(&mut body, format!("(void){lead};")),
            None => {}
        }
        for p in &params {
            cx.line(&mut body, format!("(void){};", p.name));
            if p.ty.contains_list() {
                cx.params.push((p.name.clone(), p.ty.clone()));
            }
        }
        for stmt in &decl.body.stmts {
            self.stmt(&mut cx, &mut body, stmt)?;
        }
        if !ends_in_jump(&decl.body.stmts) {
            if info.ret == Type::Void {
                self.release_from(&cx, &mut body, 0)?;
                self.release_params(&cx, &mut body)?;
            } else {
                cx.line(
                    &mut body,
                    format!("ark_rt_missing_return({});", c_string(&info.path.join("."))),
                );
            }
        }
        let _ = write!(self.out.funcs, "{sig} {{\n{body}}}\n\n");

        let required = info.params.iter().take_while(|p| !p.has_default).count();
        for keep in required..params.len() {
            self.dispatcher(pid, decl, &name, &ret, lead_decl.as_deref(), lead_arg, &params, keep)?;
        }

        if matches!(info.kind, ProcKind::TopLevel | ProcKind::NamespaceProc { .. }) {
            let sig = format!(
                "{ret} {name}__v({})",
                param_list(Some("void *env_"), &params)
            );
            let call = format!(
                "{name}({})",
                arg_list(None, params.iter().map(|p| p.name.clone()))
            );
            let stmt = if info.ret == Type::Void {
                format!("{call};")
            } else {
                format!("return {call};")
            };
            let _ = writeln!(self.out.protos, "{sig};");
            let _ = write!(self.out.funcs, "{sig} {{\n  (void)env_;\n  {stmt}\n}}\n\n");
        }
        Ok(())
    }

    /// `name__aK` takes the first `keep` arguments, evaluates the omitted
    /// defaults in order and forwards to the full-arity body.
    #[allow(clippy::too_many_arguments)]
    fn dispatcher(
        &mut self,
        pid: ProcId,
        decl: &ProcDecl,
        name: &str,
        ret: &str,
        lead_decl: Option<&str>,
        lead_arg: Option<&str>,
        params: &[Param],
        keep: usize,
    ) -> LowerResult<()> {
        let unit = self.unit;
        let info = unit.proc(pid);
        let sig = format!(
            "{ret} {name}__a{}({})",
            params.len() - keep,
            param_list(lead_decl, &params[..keep])
        );
        let _ = writeln!(self.out.protos, "{sig};");

        let mut cx = FnCtx::new(Some(pid), info.ret.clone());
        let mut body = String::new();
        for (p, d) in params.iter().zip(&decl.params).skip(keep) {
            let default = d
                .default
                .as_ref()
                .ok_or_else(|| unsupported(format!("parameter `{}` has no default", d.name.node)))?;
            let value = self.owned(&mut cx, default)?;
            cx.line(&mut body, format!("{} {} = {value};", p.c_type, p.name));
        }
        let call = format!(
            "{name}({})",
            arg_list(lead_arg, params.iter().map(|p| p.name.clone()))
        );
        if info.ret == Type::Void {
            cx.line(&mut body, format!("{call};"));
        } else {
            cx.line(&mut body, format!("return {call};"));
        }
        let _ = write!(self.out.funcs, "{sig} {{\n{body}}}\n\n");
        Ok(())
    }

    // ----- statements -------------------------------------------------------

    fn release_from(&mut self, cx: &FnCtx, out: &mut String, from: usize) -> LowerResult<()> {
        for scope in cx.scopes.iter().skip(from).rev() {
            for (name, ty) in scope.iter().rev() {
                let list = self.types.c_type(ty)?;
                cx.line(out, format!("{list}_free(&{name});"));
            }
        }
        Ok(())
    }

    fn release_params(&mut self, cx: &FnCtx, out: &mut String) -> LowerResult<()> {
        for (name, ty) in &cx.params {
            let list = self.types.c_type(ty)?;
            cx.line(out, format!("{list}_free(&{name});"));
        }
        Ok(())
    }

    /// Statements of `block` in a fresh scope; the caller writes the braces.
    fn block(&mut self, cx: &mut FnCtx, out: &mut String, block: &Block) -> LowerResult<()> {
        cx.scopes.push(Vec::new());
        cx.indent += 1;
        for stmt in &block.stmts {
            self.stmt(cx, out, stmt)?;
        }
        if !ends_in_jump(&block.stmts) {
            self.release_from(cx, out, cx.scopes.len() - 1)?;
        }
        cx.indent -= 1;
        cx.scopes.pop();
        Ok(())
    }

    fn stmt(&mut self, cx: &mut FnCtx, out: &mut String, stmt: &Stmt) -> LowerResult<()> {
        match stmt {
            Stmt::Import(_) => {}
            Stmt::Artifact(a) => self.namespace_init(cx, out, a)?,
            Stmt::Proc(p) => {
                let pid = self.proc_id(p.id)?;
                if self.unit.proc(pid).is_nested() {
                    self.nested_value(cx, out, p, pid)?;
                }
            }
            Stmt::Var(v) => self.var(cx, out, v)?,
            Stmt::Assign(a) => {
                let ty = self.unit.type_of(a.target.id).clone();
                let value = self.owned(cx, &a.value)?;
                let target = self.lvalue(cx, &a.target)?;
                if ty.contains_list() {
                    let list = self.types.c_type(&ty)?;
                    cx.line(out, format!("{list}_assign(&({target}), {value});"));
                } else {
                    cx.line(out, format!("{target} = {value};"));
                }
            }
            Stmt::Cond(c) => {
                let cond = condition(self.expr(cx, &c.cond)?);
                cx.line(out, format!("if ({cond}) {{"));
                self.block(cx, out, &c.body)?;
                cx.line(out, "}");
            }
            Stmt::Chain(ch) => {
                for (i, arm) in ch.arms.iter().enumerate() {
                    let cond = condition(self.expr(cx, &arm.cond)?);
                    if i == 0 {
                        cx.line(out, format!("if ({cond}) {{"));
                    } else {
                        cx.line(out, format!("}} else if ({cond}) {{"));
                    }
                    self.block(cx, out, &arm.body)?;
                }
                if let Some(fallback) = &ch.fallback {
                    cx.line(out, "} else {");
                    self.block(cx, out, fallback)?;
                }
                cx.line(out, "}");
            }
            Stmt::While(w) => {
                let cond = condition(self.expr(cx, &w.cond)?);
                cx.line(out, format!("while ({cond}) {{"));
                cx.loops.push(cx.scopes.len());
                self.block(cx, out, &w.body)?;
                cx.loops.pop();
                cx.line(out, "}");
            }
            Stmt::RangeFor(r) => {
                let start = self.expr(cx, &r.start)?;
                let end = self.range_end(cx, &r.end)?;
                let (s, e, i) = (cx.tmp("start"), cx.tmp("end"), cx.tmp("i"));
                let var = local_name(self.unit.symbol(self.decl_symbol(r.id)?));

                cx.line(out, "{");
                cx.indent += 1;
                cx.line(out, format!("const int64_t {s} = {start};"));
                cx.line(out, format!("const int64_t {e} = {end};"));
                cx.line(out, format!("for (int64_t {i} = {s}; {i} <= {e}; {i}++) {{"));
                cx.indent += 1;
                cx.line(out, format!("const int64_t {var} = {i};"));
                cx.line(out, format!("(void){var};"));
                cx.indent -= 1;
                cx.loops.push(cx.scopes.len());
                self.block(cx, out, &r.body)?;
                cx.loops.pop();
                cx.line(out, "}");
                cx.indent -= 1;
                cx.line(out, "}");
            }
            Stmt::Break(_) | Stmt::Skip(_) => {
                let from = *cx
                    .loops
                    .last()
                    .ok_or_else(|| unsupported("loop control outside of a loop"))?;
                self.release_from(cx, out, from)?;
                cx.line(
                    out,
                    if matches!(stmt, Stmt::Break(_)) {
                        "break;"
                    } else {
                        "continue;"
                    },
                );
            }
            Stmt::Return(r) => match &r.value {
                Some(value) => {
                    let value = self.owned(cx, value)?;
                    if cx.holds_lists() {
                        let tmp = cx.tmp("ret");
                        let ret = self.types.c_type(&cx.ret.clone())?;
                        cx.line(out, format!("{ret} {tmp} = {value};"));
                        self.release_from(cx, out, 0)?;
                        self.release_params(cx, out)?;
                        cx.line(out, format!("return {tmp};"));
                    } else {
                        cx.line(out, format!("return {value};"));
                    }
                }
                None => {
                    self.release_from(cx, out, 0)?;
                    self.release_params(cx, out)?;
                    cx.line(out, "return;");
                }
            },
            Stmt::Block(b) => {
                cx.line(out, "{");
                self.block(cx, out, b)?;
                cx.line(out, "}");
            }
            Stmt::Expr(e) => {
                let ty = self.unit.type_of(e.id).clone();
                let value = self.expr(cx, e)?;
                if ty.contains_list() && !self.is_place(e) {
                    let list = self.types.c_type(&ty)?;
                    cx.line(out, format!("{list}_drop({value});"));
                } else if matches!(e.kind, ExprKind::Call { .. } | ExprKind::Postfix { .. }) {
                    cx.line(out, format!("{value};"));
                } else {
                    cx.line(out, format!("(void){value};"));
                }
            }
        }
        Ok(())
    }

    fn var(&mut self, cx: &mut FnCtx, out: &mut String, v: &VarDecl) -> LowerResult<()> {
        let unit = self.unit;
        let sym = unit.symbol(self.decl_symbol(v.id)?);
        let init = match &v.value {
            Some(e) => self.owned(cx, e)?,
            None => self.types.default_value(&sym.ty)?,
        };

        if sym.global {
            if !self.consts.contains(&v.id) {
                let name = mangle(&unit.module, std::slice::from_ref(&sym.name));
                cx.line(out, format!("{name} = {init};"));
            }
            return Ok(());
        }

        let c_type = self.types.c_type(&sym.ty)?;
        let name = local_name(sym);
        let qual = if !sym.mutable && self.types.is_scalar(&sym.ty) {
            "const "
        } else {
            ""
        };
        cx.line(out, format!("{qual}{c_type} {name} = {init};"));
        cx.line(out, format!("(void){name};"));
        cx.own(&name, &sym.ty);
        Ok(())
    }

    /// Namespace constants are assigned where the namespace is declared.
    fn namespace_init(&mut self, cx: &mut FnCtx, out: &mut String, a: &ArtifactDecl) -> LowerResult<()> {
        if a.kind != ArtifactKind::Namespace {
            return Ok(());
        }
        let aref = ArtifactRef {
            module: self.unit.module.clone(),
            name: a.name.node.clone(),
        };
        let info = self.types.artifact(&aref)?.clone();
        for (prop, v) in info.props.iter().zip(a.props()) {
            if self.consts.contains(&v.id) {
                continue;
            }
            let init = match &v.value {
                Some(e) => self.owned(cx, e)?,
                None => self.types.default_value(&prop.ty)?,
            };
            let name = mangle(&aref.module, &[aref.name.clone(), prop.name.clone()]);
            cx.line(out, format!("{name} = {init};"));
        }
        Ok(())
    }

    /// Emits the nested procedure and binds its `{env, fn}` value, copying
    /// the captures into a fresh environment.
    fn nested_value(
        &mut self,
        cx: &mut FnCtx,
        out: &mut String,
        p: &ProcDecl,
        pid: ProcId,
    ) -> LowerResult<()> {
        self.procedure(pid)?;
        let unit = self.unit;
        let info = unit.proc(pid);
        let sym = unit.symbol(self.decl_symbol(p.id)?);
        let value_ty = self.types.c_type(&sym.ty)?;
        let func = self.proc_name(pid);
        let local = local_name(sym);

        if info.captures.is_empty() {
            cx.line(out, format!("{value_ty} {local} = {{ NULL, {func} }};"));
        } else {
            let env = self.env_name(pid);
            let e = cx.tmp("env");
            cx.line(
                out,
                format!("struct {env} *{e} = ark_rt_arena_alloc(sizeof *{e});"),
            );
            for &sid in &info.captures {
                let value = self.var_access(cx, sid)?;
                cx.line(out, format!("{e}->c{} = {value};", sid.0));
            }
            cx.line(out, format!("{value_ty} {local} = {{ {e}, {func} }};"));
        }
        cx.line(out, format!("(void){local};"));
        Ok(())
    }

    fn range_end(&mut self, cx: &mut FnCtx, end: &Expr) -> LowerResult<String> {
        let ty = self.unit.type_of(end.id).clone();
        match &ty {
            Type::Int => self.expr(cx, end),
            Type::Array(_, n) => {
                let len = int_lit(*n as i64);
                if self.is_place(end) {
                    Ok(len)
                } else {
                    Ok(format!("((void){}, {len})", self.expr(cx, end)?))
                }
            }
            Type::List(_) => self.list_len(cx, end, &ty),
            other => Err(unsupported(format!("cannot iterate up to a `{other}`"))),
        }
    }

    fn list_len(&mut self, cx: &mut FnCtx, e: &Expr, ty: &Type) -> LowerResult<String> {
        if self.is_place(e) {
            Ok(format!("({}).len", self.lvalue(cx, e)?))
        } else {
            let list = self.types.c_type(ty)?;
            Ok(format!("{list}_len_take({})", self.expr(cx, e)?))
        }
    }

    // ----- expressions ------------------------------------------------------

    /// Whether `e` names storage rather than producing a temporary.
    fn is_place(&self, e: &Expr) -> bool {
        let res = self.unit.resolutions.get(&e.id);
        match &e.kind {
            ExprKind::Ident(_) => matches!(res, Some(Resolution::Var(_))),
            ExprKind::SelfProp(_) | ExprKind::Member { .. } => matches!(
                res,
                Some(Resolution::SelfField(_) | Resolution::Field(_) | Resolution::Global { .. })
            ),
            ExprKind::Index { base, .. } => self.is_place(base),
            _ => false,
        }
    }

    /// Value of `e` in an owning position: list places are cloned,
    /// temporaries are moved.
    fn owned(&mut self, cx: &mut FnCtx, e: &Expr) -> LowerResult<String> {
        let value = self.expr(cx, e)?;
        let ty = self.unit.type_of(e.id).clone();
        if ty.contains_list() && self.is_place(e) {
            let list = self.types.c_type(&ty)?;
            Ok(format!("{list}_clone({value})"))
        } else {
            Ok(value)
        }
    }

    fn expr(&mut self, cx: &mut FnCtx, e: &Expr) -> LowerResult<String> {
        let raw = self.expr_raw(cx, e)?;
        if self.unit.widened.contains(&e.id) {
            Ok(format!("((double){raw})"))
        } else {
            Ok(raw)
        }
    }

    fn lvalue(&mut self, cx: &mut FnCtx, e: &Expr) -> LowerResult<String> {
        self.expr_raw(cx, e)
    }

    fn var_access(&mut self, cx: &FnCtx, sid: SymbolId) -> LowerResult<String> {
        let unit = self.unit;
        let sym = unit.symbol(sid);
        if sym.global {
            return Ok(mangle(&unit.module, std::slice::from_ref(&sym.name)));
        }
        if let SymbolKind::NestedProc(pid) = sym.kind {
            if Some(pid) == cx.proc {
                let value_ty = self.types.c_type(&sym.ty)?;
                return Ok(format!("(({value_ty}){{ env_, {} }})", self.proc_name(pid)));
            }
        }
        if sym.owner != cx.proc {
            Ok(format!("env->c{}", sid.0))
        } else {
            Ok(local_name(sym))
        }
    }

    fn proc_value(&mut self, e: &Expr, proc: &ProcRef) -> LowerResult<String> {
        let value_ty = self.types.c_type(self.unit.type_of(e.id))?;
        Ok(format!(
            "(({value_ty}){{ NULL, {}__v }})",
            mangle(&proc.module, &proc.path)
        ))
    }

    fn expr_raw(&mut self, cx: &mut FnCtx, e: &Expr) -> LowerResult<String> {
        let unit = self.unit;
        match &e.kind {
            ExprKind::Int(n) => Ok(int_lit(*n)),
            ExprKind::Float(f) => Ok(float_lit(*f)),
            ExprKind::Str(s) => Ok(c_string(s)),
            ExprKind::Bool(b) => Ok(b.to_string()),
            ExprKind::Ident(name) => match self.resolution(e)? {
                Resolution::Var(sid) => self.var_access(cx, *sid),
                Resolution::Proc(proc) => self.proc_value(e, proc),
                Resolution::Global { module, path } => Ok(mangle(module, path)),
                _ => Err(unsupported(format!("`{name}` is not a value"))),
            },
            ExprKind::SelfProp(name) => match self.resolution(e)? {
                Resolution::SelfField(field) => Ok(format!("self->f_{}", c_ident(field))),
                Resolution::Global { module, path } => Ok(mangle(module, path)),
                Resolution::Proc(proc) => self.proc_value(e, proc),
                _ => Err(unsupported(format!("`.{}` is not a value", name.node))),
            },
            ExprKind::Member { base, name } => match self.resolution(e)? {
                Resolution::Field(field) => {
                    let base = self.expr(cx, base)?;
                    Ok(format!("({base}).f_{}", c_ident(field)))
                }
                Resolution::Global { module, path } => Ok(mangle(module, path)),
                Resolution::Proc(proc) => self.proc_value(e, proc),
                Resolution::EnumCase { artifact, .. } => Ok(mangle(
                    &artifact.module,
                    &[artifact.name.clone(), name.node.clone()],
                )),
                _ => Err(unsupported(format!("`.{}` is not a value", name.node))),
            },
            ExprKind::Array(items) => {
                let ty = unit.type_of(e.id).clone();
                let c_type = self.types.c_type(&ty)?;
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.owned(cx, item)?);
                }
                match &ty {
                    Type::Array(..) => Ok(format!("(({c_type}){{ {{ {} }} }})", values.join(", "))),
                    Type::List(_) if values.is_empty() => Ok(format!("{c_type}_empty()")),
                    Type::List(elem) => {
                        let elem = self.types.c_type(elem)?;
                        Ok(format!(
                            "{c_type}_from(({elem}[]){{ {} }}, {})",
                            values.join(", "),
                            int_lit(values.len() as i64)
                        ))
                    }
                    other => Err(unsupported(format!("array literal of type `{other}`"))),
                }
            }
            ExprKind::Unary { op, expr } => {
                if *op == UnaryOp::Neg {
                    match expr.kind {
                        ExprKind::Int(n) => return Ok(format!("(-{})", int_lit(n))),
                        ExprKind::Float(f) => return Ok(format!("(-{})", float_lit(f))),
                        _ => {}
                    }
                }
                let inner = self.expr(cx, expr)?;
                Ok(match op {
                    UnaryOp::Neg if self.value_type(expr) == Type::Float => format!("(-{inner})"),
                    UnaryOp::Neg => format!("ark_rt_neg({inner})"),
                    UnaryOp::Not => format!("(!{inner})"),
                    UnaryOp::BitNot => format!("(~{inner})"),
                })
            }
            ExprKind::Binary { left, op, right } => self.binary(cx, e, left, *op, right),
            ExprKind::Postfix { op, expr } => {
                let place = self.lvalue(cx, expr)?;
                Ok(match op {
                    PostfixOp::Inc => format!("ark_rt_post_inc(&({place}))"),
                    PostfixOp::Dec => format!("ark_rt_post_dec(&({place}))"),
                })
            }
            ExprKind::Index { base, index } => {
                let base_ty = unit.type_of(base.id).clone();
                let idx = self.expr(cx, index)?;
                match &base_ty {
                    Type::Array(_, n) => {
                        let base = self.expr(cx, base)?;
                        Ok(format!(
                            "({base}).v[ark_rt_index({idx}, {})]",
                            int_lit(*n as i64)
                        ))
                    }
                    Type::List(_) => {
                        let list = self.types.c_type(&base_ty)?;
                        if self.is_place(base) {
                            let place = self.lvalue(cx, base)?;
                            Ok(format!("(*{list}_at(&({place}), {idx}))"))
                        } else {
                            let value = self.expr(cx, base)?;
                            Ok(format!("{list}_get_take({value}, {idx})"))
                        }
                    }
                    other => Err(unsupported(format!("cannot index a `{other}`"))),
                }
            }
            ExprKind::Call { callee, args } => self.call(cx, e, callee, args),
        }
    }

    fn binary(
        &mut self,
        cx: &mut FnCtx,
        e: &Expr,
        left: &Expr,
        op: BinOp,
        right: &Expr,
    ) -> LowerResult<String> {
        let result = self.unit.type_of(e.id).clone();
        let left_ty = self.value_type(left);
        let right_ty = self.value_type(right);
        let l = self.expr(cx, left)?;
        let r = self.expr(cx, right)?;
        let sym = op.symbol();

        Ok(match op {
            BinOp::And | BinOp::Or => format!("({l} {sym} {r})"),
            BinOp::Add if result == Type::String => format!(
                "ark_rt_concat({}, {})",
                to_str(&left_ty, l),
                to_str(&right_ty, r)
            ),
            BinOp::Div if result == Type::Float => format!("ark_rt_fdiv({l}, {r})"),
            BinOp::Rem if result == Type::Float => format!("ark_rt_fmod({l}, {r})"),
            BinOp::Add | BinOp::Sub | BinOp::Mul if result == Type::Float => {
                format!("({l} {sym} {r})")
            }
            BinOp::Add => format!("ark_rt_add({l}, {r})"),
            BinOp::Sub => format!("ark_rt_sub({l}, {r})"),
            BinOp::Mul => format!("ark_rt_mul({l}, {r})"),
            BinOp::Div => format!("ark_rt_div({l}, {r})"),
            BinOp::Rem => format!("ark_rt_rem({l}, {r})"),
            BinOp::Shl => format!("ark_rt_shl({l}, {r})"),
            BinOp::Shr => format!("ark_rt_shr({l}, {r})"),
            BinOp::BitAnd | BinOp::BitXor | BinOp::BitOr => format!("({l} {sym} {r})"),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne => {
                if left_ty == Type::String {
                    format!("(ark_rt_str_cmp({l}, {r}) {sym} 0)")
                } else {
                    format!("({l} {sym} {r})")
                }
            }
        })
    }

    fn args(&mut self, cx: &mut FnCtx, args: &[Expr]) -> LowerResult<Vec<String>> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            out.push(self.owned(cx, arg)?);
        }
        Ok(out)
    }

    fn call(&mut self, cx: &mut FnCtx, e: &Expr, callee: &Expr, args: &[Expr]) -> LowerResult<String> {
        let unit = self.unit;
        let target = unit
            .calls
            .get(&e.id)
            .ok_or_else(|| unsupported("call without a resolved target"))?;

        let suffix = |supplied: usize, total: usize| {
            if supplied < total {
                format!("__a{}", total - supplied)
            } else {
                String::new()
            }
        };

        match target {
            CallTarget::Proc {
                proc,
                supplied,
                total,
            } => {
                let args = self.args(cx, args)?;
                Ok(format!(
                    "{}{}({})",
                    mangle(&proc.module, &proc.path),
                    suffix(*supplied, *total),
                    arg_list(None, args)
                ))
            }
            CallTarget::NestedProc {
                symbol,
                proc,
                supplied,
                total,
            } => {
                let env = if Some(*proc) == cx.proc {
                    "env_".to_string()
                } else {
                    format!("({}).env", self.var_access(cx, *symbol)?)
                };
                let args = self.args(cx, args)?;
                Ok(format!(
                    "{}{}({})",
                    self.proc_name(*proc),
                    suffix(*supplied, *total),
                    arg_list(Some(&env), args)
                ))
            }
            CallTarget::Method {
                artifact,
                method,
                supplied,
                total,
                receiver,
                ..
            } => {
                let recv = match receiver {
                    Receiver::SelfRef => "self".to_string(),
                    Receiver::Value => {
                        let ExprKind::Member { base, .. } = &callee.kind else {
                            return Err(unsupported("method call without a receiver"));
                        };
                        if self.is_place(base) {
                            format!("&({})", self.lvalue(cx, base)?)
                        } else {
                            let rec = self.types.c_type(&Type::Artifact(artifact.clone()))?;
                            format!("({rec}[]){{ {} }}", self.expr(cx, base)?)
                        }
                    }
                };
                let args = self.args(cx, args)?;
                Ok(format!(
                    "{}{}({})",
                    mangle(&artifact.module, &[artifact.name.clone(), method.clone()]),
                    suffix(*supplied, *total),
                    arg_list(Some(&recv), args)
                ))
            }
            CallTarget::Constructor {
                artifact,
                supplied,
                total,
            } => {
                let rec = self.types.c_type(&Type::Artifact(artifact.clone()))?;
                if *supplied == 0 {
                    return Ok(format!("{rec}__default()"));
                }
                let args = self.args(cx, args)?;
                let ctor = if supplied < total {
                    format!("__new__a{}", total - supplied)
                } else {
                    "__new".to_string()
                };
                Ok(format!("{rec}{ctor}({})", arg_list(None, args)))
            }
            CallTarget::Value => {
                let proc_ty = self.types.c_type(unit.type_of(callee.id))?;
                let value = self.expr(cx, callee)?;
                let args = self.args(cx, args)?;
                Ok(format!("{proc_ty}_call({})", arg_list(Some(&value), args)))
            }
            CallTarget::Builtin(b) => self.builtin(cx, *b, args),
            CallTarget::ListPush | CallTarget::ListPop => {
                let ExprKind::Member { base, .. } = &callee.kind else {
                    return Err(unsupported("list operation without a receiver"));
                };
                let list = self.types.c_type(unit.type_of(base.id))?;
                let place = self.lvalue(cx, base)?;
                if matches!(target, CallTarget::ListPush) {
                    let arg = args
                        .first()
                        .ok_or_else(|| unsupported("`push` without an argument"))?;
                    let value = self.owned(cx, arg)?;
                    Ok(format!("{list}_push(&({place}), {value})"))
                } else {
                    Ok(format!("{list}_pop(&({place}))"))
                }
            }
        }
    }

    fn builtin(&mut self, cx: &mut FnCtx, b: Builtin, args: &[Expr]) -> LowerResult<String> {
        if b == Builtin::Input {
            return match args.first() {
                Some(prompt) => Ok(format!("ark_input({})", self.expr(cx, prompt)?)),
                None => Ok("ark_input(NULL)".to_string()),
            };
        }
        let arg = args
            .first()
            .ok_or_else(|| unsupported(format!("`{}` without an argument", b.name())))?;
        let ty = self.value_type(arg);

        if b == Builtin::Len {
            return match &ty {
                Type::String => Ok(format!("ark_str_len({})", self.expr(cx, arg)?)),
                Type::Array(_, n) if self.is_place(arg) => Ok(int_lit(*n as i64)),
                Type::Array(_, n) => Ok(format!(
                    "((void){}, {})",
                    self.expr(cx, arg)?,
                    int_lit(*n as i64)
                )),
                Type::List(_) => self.list_len(cx, arg, &ty),
                other => Err(unsupported(format!("`len` of a `{other}`"))),
            };
        }

        let v = self.expr(cx, arg)?;
        let mismatch = || unsupported(format!("`{}` of a `{ty}`", b.name()));
        Ok(match (b, &ty) {
            (Builtin::Print, Type::Int | Type::Artifact(_)) => format!("ark_print_int({v})"),
            (Builtin::Print, Type::Float) => format!("ark_print_float({v})"),
            (Builtin::Print, Type::String) => format!("ark_print_str({v})"),
            (Builtin::Print, Type::Bool) => format!("ark_print_bool({v})"),
            (Builtin::Int, Type::Int | Type::Artifact(_)) => v,
            (Builtin::Int, Type::Float) => format!("ark_rt_f2i({v})"),
            (Builtin::Int, Type::String) => format!("ark_int_of_str({v})"),
            (Builtin::Int, Type::Bool) => format!("((int64_t){v})"),
            (Builtin::Float, Type::Int) => format!("((double){v})"),
            (Builtin::Float, Type::Float) => v,
            (Builtin::Float, Type::String) => format!("ark_float_of_str({v})"),
            (Builtin::Str, _) => to_str(&ty, v),
            (Builtin::Bool, Type::Int) => format!("({v} != 0)"),
            (Builtin::Bool, Type::Bool) => v,
            (Builtin::Bool, Type::String) => format!("ark_bool_of_str({v})"),
            (Builtin::Sqrt, _) => format!("ark_sqrt({v})"),
            (Builtin::Abs, Type::Int) => format!("ark_abs_int({v})"),
            (Builtin::Abs, Type::Float) => format!("ark_abs_float({v})"),
            (Builtin::Pow, _) => {
                let exp = args
                    .get(1)
                    .ok_or_else(|| unsupported("`pow` needs two arguments"))?;
                format!("ark_pow({v}, {})", self.expr(cx, exp)?)
            }
            _ => return Err(mismatch()),
        })
    }
}

/// Drops one pair of parentheses wrapping the whole condition.
fn condition(text: String) -> String {
    let bytes = text.as_bytes();
    if bytes.first() != Some(&b'(') || bytes.last() != Some(&b')') {
        return text;
    }
    let mut depth = 0usize;
    let mut in_str = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate() {
        if in_str {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_str = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_str = true,
            b'(' => depth += 1,
            b')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 && i + 1 < bytes.len() {
                    return text;
                }
            }
            _ => {}
        }
    }
    text[1..text.len() - 1].to_string()
}

/// Text form of a scalar for concatenation and `str`.
fn to_str(ty: &Type, value: String) -> String {
    match ty {
        Type::String => value,
        Type::Float => format!("ark_rt_float_str({value})"),
        Type::Bool => format!("ark_rt_bool_str({value})"),
        _ => format!("ark_rt_int_str({value})"),
    }
}
