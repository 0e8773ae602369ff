#![forbid(unsafe_code)]

use ark_ast::{
    ArtifactDecl, Block, Expr, ExprKind, Member, Param, PostfixOp, ProcDecl, Program, Stmt,
    TypeRef, TypeRefKind, UnaryOp, VarDecl,
};

const INDENT: &str = "    ";

const PREC_UNARY: u8 = 11;
const PREC_POSTFIX: u8 = 12;
const PREC_ATOM: u8 = 13;

pub fn format_program(program: &Program) -> String {
    let mut out = String::new();
    fmt_stmts(&mut out, 0, &program.stmts);
    out
}

pub fn format_expr(expr: &Expr) -> String {
    let mut out = String::new();
    fmt_expr(&mut out, expr, 0);
    out
}

fn fmt_stmts(out: &mut String, indent: usize, stmts: &[Stmt]) {
    for (i, stmt) in stmts.iter().enumerate() {
        fmt_stmt(out, indent, stmt);
        // Two chains in a row would otherwise read as one.
        if matches!(stmt, Stmt::Chain(_)) && matches!(stmts.get(i + 1), Some(Stmt::Chain(_))) {
            out.push(';');
        }
        out.push('\n');
    }
}

fn fmt_stmt(out: &mut String, indent: usize, stmt: &Stmt) {
    indent_line(out, indent);
    match stmt {
        Stmt::Import(s) => {
            out.push_str("Mod ");
            if s.quoted {
                fmt_string(out, &s.path);
            } else {
                out.push_str(&s.path);
            }
        }
        Stmt::Var(v) => fmt_var(out, v),
        Stmt::Proc(p) => fmt_proc(out, indent, p),
        Stmt::Artifact(a) => fmt_artifact(out, indent, a),
        Stmt::Assign(s) => {
            fmt_expr(out, &s.target, 0);
            out.push_str(" = ");
            fmt_expr(out, &s.value, 0);
        }
        Stmt::Cond(s) => {
            fmt_stmt_expr(out, &s.cond, true);
            out.push(' ');
            fmt_block(out, indent, &s.body);
        }
        Stmt::Chain(s) => {
            for (i, arm) in s.arms.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str("|> ");
                fmt_expr(out, &arm.cond, 0);
                out.push(' ');
                fmt_block(out, indent, &arm.body);
            }
            if let Some(fallback) = &s.fallback {
                out.push_str(" |> ");
                fmt_block(out, indent, fallback);
            }
        }
        Stmt::While(s) => {
            out.push_str("while ");
            fmt_expr(out, &s.cond, 0);
            out.push(' ');
            fmt_block(out, indent, &s.body);
        }
        Stmt::RangeFor(s) => {
            out.push_str(&s.var.node);
            out.push_str(", ");
            fmt_expr(out, &s.start, 0);
            out.push_str(" .. ");
            fmt_expr(out, &s.end, 0);
            out.push(' ');
            fmt_block(out, indent, &s.body);
        }
        Stmt::Break(_) => out.push_str("break"),
        Stmt::Skip(_) => out.push_str("skip"),
        Stmt::Return(s) => {
            out.push_str("return");
            if let Some(value) = &s.value {
                out.push(' ');
                fmt_expr(out, value, 0);
            }
        }
        Stmt::Block(b) => fmt_block(out, indent, b),
        Stmt::Expr(e) => fmt_stmt_expr(out, e, false),
    }
}

/// An expression at the start of a statement. A leading `-` would continue the
/// previous line as a subtraction, and `f() {` reads as a procedure
/// declaration, so both get wrapped.
fn fmt_stmt_expr(out: &mut String, expr: &Expr, is_cond: bool) {
    let ident_call = matches!(
        &expr.kind,
        ExprKind::Call { callee, .. } if matches!(callee.kind, ExprKind::Ident(_))
    );
    if starts_with_minus(expr) || (is_cond && ident_call) {
        out.push('(');
        fmt_expr(out, expr, 0);
        out.push(')');
    } else {
        fmt_expr(out, expr, 0);
    }
}

fn starts_with_minus(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Unary { op: UnaryOp::Neg, .. } => true,
        ExprKind::Binary { left, .. } => starts_with_minus(left),
        ExprKind::Postfix { expr: base, .. }
        | ExprKind::Call { callee: base, .. }
        | ExprKind::Index { base, .. }
        | ExprKind::Member { base, .. } => expr_prec(base) >= PREC_POSTFIX && starts_with_minus(base),
        ExprKind::Int(n) => *n < 0,
        _ => false,
    }
}

fn fmt_var(out: &mut String, v: &VarDecl) {
    out.push_str(&v.name.node);
    match (&v.ty, &v.value) {
        (None, Some(value)) => {
            out.push_str(if v.mutable { " := " } else { " ::= " });
            fmt_expr(out, value, 0);
        }
        (Some(ty), value) => {
            out.push_str(if v.mutable { ": " } else { " :: " });
            fmt_type_ref(out, ty);
            if let Some(value) = value {
                out.push_str(" = ");
                fmt_expr(out, value, 0);
            }
        }
        // Not produced by the parser.
        (None, None) => out.push_str(": void"),
    }
}

fn fmt_proc(out: &mut String, indent: usize, p: &ProcDecl) {
    out.push_str(&p.name.node);
    out.push('(');
    for (i, param) in p.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        fmt_param(out, param);
    }
    out.push(')');
    if let Some(ret) = &p.ret {
        out.push_str(": ");
        fmt_type_ref(out, ret);
    }
    out.push(' ');
    fmt_block(out, indent, &p.body);
}

fn fmt_param(out: &mut String, param: &Param) {
    out.push_str(&param.name.node);
    if let Some(ty) = &param.ty {
        out.push_str(": ");
        fmt_type_ref(out, ty);
    }
    if let Some(default) = &param.default {
        out.push_str(" = ");
        fmt_expr(out, default, 0);
    }
}

fn fmt_artifact(out: &mut String, indent: usize, a: &ArtifactDecl) {
    out.push_str(&a.name.node);
    out.push_str(" :: {");
    if a.members.is_empty() {
        out.push('}');
        return;
    }
    out.push('\n');
    for member in &a.members {
        indent_line(out, indent + 1);
        match member {
            Member::Prop(v) => fmt_var(out, v),
            Member::Proc(p) => fmt_proc(out, indent + 1, p),
            Member::Case(c) => {
                out.push_str(&c.name.node);
                if let Some(value) = &c.value {
                    out.push_str(" = ");
                    out.push_str(&value.node.to_string());
                }
            }
        }
        out.push('\n');
    }
    indent_line(out, indent);
    out.push('}');
}

fn fmt_block(out: &mut String, indent: usize, block: &Block) {
    if block.stmts.is_empty() {
        out.push_str("{}");
        return;
    }
    out.push_str("{\n");
    fmt_stmts(out, indent + 1, &block.stmts);
    indent_line(out, indent);
    out.push('}');
}

fn fmt_type_ref(out: &mut String, t: &TypeRef) {
    match &t.kind {
        TypeRefKind::Named(name) => out.push_str(&name.node),
        TypeRefKind::Qualified { module, name } => {
            out.push_str(&module.node);
            out.push('.');
            out.push_str(&name.node);
        }
        TypeRefKind::Array(elem, n) => {
            out.push('[');
            fmt_type_ref(out, elem);
            out.push_str("; ");
            out.push_str(&n.to_string());
            out.push(']');
        }
        TypeRefKind::List(elem) => {
            out.push('[');
            fmt_type_ref(out, elem);
            out.push(']');
        }
        TypeRefKind::Proc { params, ret } => {
            out.push('(');
            for (i, p) in params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_type_ref(out, p);
            }
            out.push_str(") -> ");
            fmt_type_ref(out, ret);
        }
    }
}

fn expr_prec(expr: &Expr) -> u8 {
    match &expr.kind {
        ExprKind::Binary { op, .. } => op.precedence(),
        ExprKind::Unary { .. } => PREC_UNARY,
        ExprKind::Postfix { .. }
        | ExprKind::Call { .. }
        | ExprKind::Index { .. }
        | ExprKind::Member { .. } => PREC_POSTFIX,
        _ => PREC_ATOM,
    }
}

fn fmt_expr(out: &mut String, expr: &Expr, min_prec: u8) {
    let prec = expr_prec(expr);
    if prec < min_prec {
        out.push('(');
        fmt_expr_inner(out, expr);
        out.push(')');
    } else {
        fmt_expr_inner(out, expr);
    }
}

fn fmt_expr_inner(out: &mut String, expr: &Expr) {
    match &expr.kind {
        ExprKind::Int(n) => out.push_str(&n.to_string()),
        ExprKind::Float(x) => {
            let text = x.to_string();
            out.push_str(&text);
            if !text.contains('.') {
                out.push_str(".0");
            }
        }
        ExprKind::Str(s) => fmt_string(out, s),
        ExprKind::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        ExprKind::Ident(name) => out.push_str(name),
        ExprKind::SelfProp(name) => {
            out.push('.');
            out.push_str(&name.node);
        }
        ExprKind::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_expr(out, item, 0);
            }
            out.push(']');
        }
        ExprKind::Unary { op, expr: inner } => {
            out.push_str(match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
                UnaryOp::BitNot => "~",
            });
            // `--x` would lex as a decrement.
            let double_neg = *op == UnaryOp::Neg && starts_with_minus(inner);
            if double_neg {
                out.push('(');
                fmt_expr(out, inner, 0);
                out.push(')');
            } else {
                fmt_expr(out, inner, PREC_UNARY);
            }
        }
        ExprKind::Binary { left, op, right } => {
            let prec = op.precedence();
            fmt_expr(out, left, prec);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            fmt_expr(out, right, prec + 1);
        }
        ExprKind::Postfix { op, expr: inner } => {
            fmt_expr(out, inner, PREC_POSTFIX);
            out.push_str(match op {
                PostfixOp::Inc => "++",
                PostfixOp::Dec => "--",
            });
        }
        ExprKind::Call { callee, args } => {
            fmt_expr(out, callee, PREC_POSTFIX);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_expr(out, arg, 0);
            }
            out.push(')');
        }
        ExprKind::Index { base, index } => {
            fmt_expr(out, base, PREC_POSTFIX);
            out.push('[');
            fmt_expr(out, index, 0);
            out.push(']');
        }
        ExprKind::Member { base, name } => {
            // `1.x` would lex as a malformed number.
            if matches!(base.kind, ExprKind::Int(_) | ExprKind::Float(_)) {
                out.push('(');
                fmt_expr(out, base, 0);
                out.push(')');
            } else {
                fmt_expr(out, base, PREC_POSTFIX);
            }
            out.push('.');
            out.push_str(&name.node);
        }
    }
}

fn fmt_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('"');
}

fn indent_line(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str(INDENT);
    }
}
