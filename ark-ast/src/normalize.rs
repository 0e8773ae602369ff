#![forbid(unsafe_code)]

use crate::{
    span, ArtifactDecl, Block, Expr, ExprKind, Member, NodeId, Param, ProcDecl, Program, Stmt,
    TypeRef, TypeRefKind, VarDecl,
};

/// Erases source positions and renumbers node ids in traversal order, so two
/// programs compare equal iff they have the same structure.
pub fn normalize(program: &Program) -> Program {
    let mut program = program.clone();
    let mut n = Normalizer { next: 0 };
    for stmt in &mut program.stmts {
        n.stmt(stmt);
    }
    program
}

struct Normalizer {
    next: u32,
}

impl Normalizer {
    fn id(&mut self, id: &mut NodeId) {
        *id = NodeId(self.next);
        self.next += 1;
    }

    fn stmt(&mut self, stmt: &mut Stmt) {
        match stmt {
            Stmt::Import(s) => {
                s.span = span(0, 0);
                s.alias.span = span(0, 0);
            }
            Stmt::Var(v) => self.var(v),
            Stmt::Proc(p) => self.proc(p),
            Stmt::Artifact(a) => self.artifact(a),
            Stmt::Assign(s) => {
                s.span = span(0, 0);
                self.expr(&mut s.target);
                self.expr(&mut s.value);
            }
            Stmt::Cond(c) => {
                c.span = span(0, 0);
                self.expr(&mut c.cond);
                self.block(&mut c.body);
            }
            Stmt::Chain(c) => {
                c.span = span(0, 0);
                for arm in &mut c.arms {
                    arm.span = span(0, 0);
                    self.expr(&mut arm.cond);
                    self.block(&mut arm.body);
                }
                if let Some(b) = &mut c.fallback {
                    self.block(b);
                }
            }
            Stmt::While(w) => {
                w.span = span(0, 0);
                self.expr(&mut w.cond);
                self.block(&mut w.body);
            }
            Stmt::RangeFor(r) => {
                self.id(&mut r.id);
                r.span = span(0, 0);
                r.var.span = span(0, 0);
                self.expr(&mut r.start);
                self.expr(&mut r.end);
                self.block(&mut r.body);
            }
            Stmt::Break(s) | Stmt::Skip(s) => *s = span(0, 0),
            Stmt::Return(r) => {
                r.span = span(0, 0);
                if let Some(v) = &mut r.value {
                    self.expr(v);
                }
            }
            Stmt::Block(b) => self.block(b),
            Stmt::Expr(e) => self.expr(e),
        }
    }

    fn block(&mut self, block: &mut Block) {
        block.span = span(0, 0);
        for s in &mut block.stmts {
            self.stmt(s);
        }
    }

    fn var(&mut self, v: &mut VarDecl) {
        self.id(&mut v.id);
        v.span = span(0, 0);
        v.name.span = span(0, 0);
        if let Some(t) = &mut v.ty {
            self.ty(t);
        }
        if let Some(e) = &mut v.value {
            self.expr(e);
        }
    }

    fn proc(&mut self, p: &mut ProcDecl) {
        self.id(&mut p.id);
        p.span = span(0, 0);
        p.name.span = span(0, 0);
        for param in &mut p.params {
            self.param(param);
        }
        if let Some(t) = &mut p.ret {
            self.ty(t);
        }
        self.block(&mut p.body);
    }

    fn param(&mut self, p: &mut Param) {
        self.id(&mut p.id);
        p.span = span(0, 0);
        p.name.span = span(0, 0);
        if let Some(t) = &mut p.ty {
            self.ty(t);
        }
        if let Some(d) = &mut p.default {
            self.expr(d);
        }
    }

    fn artifact(&mut self, a: &mut ArtifactDecl) {
        self.id(&mut a.id);
        a.span = span(0, 0);
        a.name.span = span(0, 0);
        for m in &mut a.members {
            match m {
                Member::Prop(v) => self.var(v),
                Member::Proc(p) => self.proc(p),
                Member::Case(c) => {
                    c.span = span(0, 0);
                    c.name.span = span(0, 0);
                    if let Some(v) = &mut c.value {
                        v.span = span(0, 0);
                    }
                }
            }
        }
    }

    fn ty(&mut self, t: &mut TypeRef) {
        t.span = span(0, 0);
        match &mut t.kind {
            TypeRefKind::Named(n) => n.span = span(0, 0),
            TypeRefKind::Qualified { module, name } => {
                module.span = span(0, 0);
                name.span = span(0, 0);
            }
            TypeRefKind::Array(elem, _) | TypeRefKind::List(elem) => self.ty(elem),
            TypeRefKind::Proc { params, ret } => {
                for p in params {
                    self.ty(p);
                }
                self.ty(ret);
            }
        }
    }

    fn expr(&mut self, e: &mut Expr) {
        e.span = span(0, 0);
        match &mut e.kind {
            ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::Ident(_) => {}
            ExprKind::SelfProp(name) => name.span = span(0, 0),
            ExprKind::Array(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            ExprKind::Unary { expr, .. } | ExprKind::Postfix { expr, .. } => self.expr(expr),
            ExprKind::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Call { callee, args } => {
                self.expr(callee);
                for a in args {
                    self.expr(a);
                }
            }
            ExprKind::Index { base, index } => {
                self.expr(base);
                self.expr(index);
            }
            ExprKind::Member { base, name } => {
                self.expr(base);
                name.span = span(0, 0);
            }
        }
        // Children first, matching the order the parser allocates ids in.
        self.id(&mut e.id);
    }
}
