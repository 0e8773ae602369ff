use ark_ast::{
    normalize, span, ArtifactDecl, ArtifactKind, AssignStmt, BinOp, Block, ChainStmt, CondStmt,
    EnumCase, Expr, ExprKind, Ident, ImportStmt, Member, NodeId, Param, PostfixOp, ProcDecl,
    Program, RangeForStmt, ReturnStmt, Spanned, Stmt, TypeRef, TypeRefKind, UnaryOp, VarDecl,
    WhileStmt,
};
use ark_parse::{format_expr, format_program, parse_expr, parse_source};
use proptest::{
    prelude::{any, prop},
    test_runner::{Config, TestCaseError, TestRunner},
};

const NAMES: &[&str] = &["a", "b", "count", "total", "xs", "_tmp"];
const STRINGS: &[&str] = &["", "hi", "say \"hi\"", "tab\there", "back\\slash", "line\nbreak"];
const BINOPS: &[BinOp] = &[
    BinOp::Mul,
    BinOp::Div,
    BinOp::Rem,
    BinOp::Add,
    BinOp::Sub,
    BinOp::Shl,
    BinOp::Shr,
    BinOp::Lt,
    BinOp::Le,
    BinOp::Gt,
    BinOp::Ge,
    BinOp::Eq,
    BinOp::Ne,
    BinOp::BitAnd,
    BinOp::BitXor,
    BinOp::BitOr,
    BinOp::And,
    BinOp::Or,
];

/// Deterministic AST builder driven by a vector of random choices.
struct Gen {
    ops: Vec<u32>,
    pos: usize,
}

impl Gen {
    fn new(ops: Vec<u32>) -> Self {
        Self { ops, pos: 0 }
    }

    fn pick(&mut self, n: u32) -> u32 {
        let raw = if self.ops.is_empty() {
            0
        } else {
            self.ops[self.pos % self.ops.len()]
        };
        self.pos += 1;
        raw.wrapping_add((self.pos as u32).wrapping_mul(7919)) % n
    }

    fn name(&mut self) -> Ident {
        let i = self.pick(NAMES.len() as u32) as usize;
        Ident::new(span(0, 0), NAMES[i].to_string())
    }

    fn expr(&mut self, depth: u32) -> Expr {
        let choice = if depth == 0 {
            self.pick(6)
        } else {
            self.pick(14)
        };
        let kind = match choice {
            0 => ExprKind::Int(self.pick(1000) as i64),
            1 => ExprKind::Float(self.pick(100) as f64 + 0.25),
            2 => ExprKind::Str(STRINGS[self.pick(STRINGS.len() as u32) as usize].to_string()),
            3 => ExprKind::Bool(self.pick(2) == 0),
            4 => ExprKind::Ident(self.name().node),
            5 => ExprKind::SelfProp(self.name()),
            6 => {
                let n = self.pick(3);
                ExprKind::Array((0..n).map(|_| self.expr(depth - 1)).collect())
            }
            7 => {
                let op = [UnaryOp::Neg, UnaryOp::Not, UnaryOp::BitNot][self.pick(3) as usize];
                ExprKind::Unary {
                    op,
                    expr: Box::new(self.expr(depth - 1)),
                }
            }
            8 | 9 => ExprKind::Binary {
                left: Box::new(self.expr(depth - 1)),
                op: BINOPS[self.pick(BINOPS.len() as u32) as usize],
                right: Box::new(self.expr(depth - 1)),
            },
            10 => ExprKind::Postfix {
                op: if self.pick(2) == 0 {
                    PostfixOp::Inc
                } else {
                    PostfixOp::Dec
                },
                expr: Box::new(self.expr(depth - 1)),
            },
            11 => {
                let callee = Box::new(self.expr(depth - 1));
                let n = self.pick(3);
                ExprKind::Call {
                    callee,
                    args: (0..n).map(|_| self.expr(depth - 1)).collect(),
                }
            }
            12 => ExprKind::Index {
                base: Box::new(self.expr(depth - 1)),
                index: Box::new(self.expr(depth - 1)),
            },
            _ => ExprKind::Member {
                base: Box::new(self.expr(depth - 1)),
                name: self.name(),
            },
        };
        expr(kind)
    }

    fn place(&mut self, depth: u32) -> Expr {
        match self.pick(4) {
            0 => expr(ExprKind::Ident(self.name().node)),
            1 => expr(ExprKind::SelfProp(self.name())),
            2 => expr(ExprKind::Member {
                base: Box::new(expr(ExprKind::Ident(self.name().node))),
                name: self.name(),
            }),
            _ => expr(ExprKind::Index {
                base: Box::new(expr(ExprKind::Ident(self.name().node))),
                index: Box::new(self.expr(depth)),
            }),
        }
    }

    fn ty(&mut self, depth: u32) -> TypeRef {
        let choice = if depth == 0 { 0 } else { self.pick(4) };
        let kind = match choice {
            0 => {
                let n = ["int", "float", "string", "bool", "Point"][self.pick(5) as usize];
                TypeRefKind::Named(Ident::new(span(0, 0), n.to_string()))
            }
            1 => TypeRefKind::Qualified {
                module: self.name(),
                name: Ident::new(span(0, 0), "Shape".to_string()),
            },
            2 => TypeRefKind::Array(Box::new(self.ty(depth - 1)), 1 + self.pick(8) as u64),
            _ => TypeRefKind::List(Box::new(self.ty(depth - 1))),
        };
        TypeRef {
            span: span(0, 0),
            kind,
        }
    }

    fn var(&mut self, depth: u32, mutable: Option<bool>) -> VarDecl {
        let mutable = mutable.unwrap_or_else(|| self.pick(2) == 0);
        let (ty, value) = match self.pick(3) {
            0 => (None, Some(self.expr(depth))),
            1 => (Some(self.ty(2)), Some(self.expr(depth))),
            // Only mutable declarations may omit the value.
            _ if mutable => (Some(self.ty(2)), None),
            _ => (None, Some(self.expr(depth))),
        };
        VarDecl {
            id: NodeId(0),
            span: span(0, 0),
            name: self.name(),
            mutable,
            ty,
            value,
        }
    }

    fn proc(&mut self, depth: u32) -> ProcDecl {
        let n = self.pick(4);
        let first_default = self.pick(n + 1);
        let params = (0..n)
            .map(|i| {
                let has_default = i >= first_default;
                let ty = if !has_default || self.pick(2) == 0 {
                    Some(self.ty(1))
                } else {
                    None
                };
                Param {
                    id: NodeId(0),
                    span: span(0, 0),
                    name: self.name(),
                    ty,
                    default: has_default.then(|| self.expr(1)),
                }
            })
            .collect();
        ProcDecl {
            id: NodeId(0),
            span: span(0, 0),
            name: self.name(),
            params,
            ret: (self.pick(2) == 0).then(|| self.ty(1)),
            body: self.block(depth),
        }
    }

    fn artifact(&mut self, depth: u32) -> ArtifactDecl {
        let kind = [ArtifactKind::Enum, ArtifactKind::Record, ArtifactKind::Namespace]
            [self.pick(3) as usize];
        let n = self.pick(4);
        let mut members = Vec::new();
        match kind {
            ArtifactKind::Enum => {
                for _ in 0..n.max(1) {
                    let value = (self.pick(2) == 0)
                        .then(|| Spanned::new(span(0, 0), self.pick(20) as i64 - 10));
                    members.push(Member::Case(EnumCase {
                        span: span(0, 0),
                        name: self.name(),
                        value,
                    }));
                }
            }
            ArtifactKind::Record => {
                members.push(Member::Prop(self.var(1, Some(true))));
                for _ in 0..n {
                    members.push(if self.pick(2) == 0 {
                        Member::Prop(self.var(1, None))
                    } else {
                        Member::Proc(self.proc(depth))
                    });
                }
            }
            ArtifactKind::Namespace => {
                for _ in 0..n {
                    members.push(if self.pick(2) == 0 {
                        Member::Prop(self.var(1, Some(false)))
                    } else {
                        Member::Proc(self.proc(depth))
                    });
                }
            }
        }
        ArtifactDecl {
            id: NodeId(0),
            span: span(0, 0),
            name: Ident::new(span(0, 0), "Shape".to_string()),
            kind,
            members,
        }
    }

    fn block(&mut self, depth: u32) -> Block {
        let n = if depth == 0 { 0 } else { self.pick(4) };
        Block {
            span: span(0, 0),
            stmts: self.stmts(n, depth.saturating_sub(1), false),
        }
    }

    fn stmts(&mut self, n: u32, depth: u32, top_level: bool) -> Vec<Stmt> {
        let mut out: Vec<Stmt> = Vec::new();
        for _ in 0..n {
            let after_chain = matches!(out.last(), Some(Stmt::Chain(_)));
            out.push(self.stmt(depth, top_level, after_chain));
        }
        out
    }

    fn stmt(&mut self, depth: u32, top_level: bool, after_chain: bool) -> Stmt {
        let limit = if top_level { 16 } else { 14 };
        match self.pick(limit) {
            0 => Stmt::Var(self.var(2, None)),
            1 => Stmt::Assign(AssignStmt {
                span: span(0, 0),
                target: self.place(1),
                value: self.expr(2),
            }),
            2 if !after_chain => Stmt::Cond(CondStmt {
                span: span(0, 0),
                cond: self.expr(2),
                body: self.block(depth),
            }),
            3 => {
                let n = 1 + self.pick(3);
                let arms = (0..n)
                    .map(|_| CondStmt {
                        span: span(0, 0),
                        cond: self.expr(2),
                        body: self.block(depth),
                    })
                    .collect();
                let fallback = (self.pick(2) == 0).then(|| self.block(depth));
                Stmt::Chain(ChainStmt {
                    span: span(0, 0),
                    arms,
                    fallback,
                })
            }
            4 => Stmt::While(WhileStmt {
                span: span(0, 0),
                cond: self.expr(2),
                body: self.block(depth),
            }),
            5 => Stmt::RangeFor(RangeForStmt {
                id: NodeId(0),
                span: span(0, 0),
                var: self.name(),
                start: self.expr(1),
                end: self.expr(2),
                body: self.block(depth),
            }),
            6 => Stmt::Break(span(0, 0)),
            7 => Stmt::Skip(span(0, 0)),
            8 => Stmt::Return(ReturnStmt {
                span: span(0, 0),
                value: (self.pick(2) == 0).then(|| self.expr(2)),
            }),
            9 => Stmt::Block(self.block(depth)),
            10 | 11 => Stmt::Proc(self.proc(depth)),
            14 => {
                let (path, quoted, alias) = [
                    ("math", false, "math"),
                    ("util/strings", false, "strings"),
                    ("lib/geo.ark", true, "geo"),
                    ("../shared/io", true, "io"),
                ][self.pick(4) as usize];
                Stmt::Import(ImportStmt {
                    span: span(0, 0),
                    path: path.to_string(),
                    quoted,
                    alias: Ident::new(span(0, 0), alias.to_string()),
                })
            }
            15 => Stmt::Artifact(self.artifact(depth)),
            _ => Stmt::Expr(self.expr(3)),
        }
    }
}

fn expr(kind: ExprKind) -> Expr {
    Expr {
        id: NodeId(0),
        span: span(0, 0),
        kind,
    }
}

#[test]
fn formatted_expressions_reparse_to_the_same_tree() {
    let mut runner = TestRunner::new(Config {
        cases: 256,
        ..Config::default()
    });
    let strat = prop::collection::vec(any::<u32>(), 1..48);

    runner
        .run(&strat, |ops| {
            let original = Gen::new(ops).expr(4);
            let text = format_expr(&original);
            let reparsed = parse_expr(&text)
                .map_err(|e| TestCaseError::fail(format!("{text:?} failed to parse: {e}")))?;

            let wrap = |e: Expr| Program {
                stmts: vec![Stmt::Expr(e)],
            };
            if normalize(&wrap(original)) != normalize(&wrap(reparsed)) {
                return Err(TestCaseError::fail(format!("{text:?} changed shape")));
            }
            Ok(())
        })
        .unwrap_or_else(|e| panic!("expression round trip failed: {e}"));
}

#[test]
fn formatted_programs_reparse_to_the_same_tree() {
    let mut runner = TestRunner::new(Config {
        cases: 128,
        ..Config::default()
    });
    let strat = prop::collection::vec(any::<u32>(), 1..64);

    runner
        .run(&strat, |ops| {
            let mut g = Gen::new(ops);
            let n = 1 + g.pick(6);
            let original = Program {
                stmts: g.stmts(n, 2, true),
            };
            let text = format_program(&original);
            let reparsed = parse_source(&text)
                .map_err(|e| TestCaseError::fail(format!("failed to parse:\n{text}\n{e}")))?;

            if normalize(&original) != normalize(&reparsed) {
                return Err(TestCaseError::fail(format!("program changed shape:\n{text}")));
            }
            // Formatting is a fixpoint.
            if format_program(&reparsed) != text {
                return Err(TestCaseError::fail(format!("formatting is unstable:\n{text}")));
            }
            Ok(())
        })
        .unwrap_or_else(|e| panic!("program round trip failed: {e}"));
}

#[test]
fn known_tricky_shapes_round_trip() {
    for src in [
        "x := -(-a)\n",
        "(-a).b()\n",
        "(-a + b)\n",
        "(ready()) {}\n",
        "y := (1).x\n",
        "z := a - -b\n",
        "w := (a + b) * c\n",
        "v := a - (b - c)\n",
        "|> a {} |> {};\n|> b {}\n",
    ] {
        let program = parse_source(src).unwrap_or_else(|e| panic!("{src:?}: {e}"));
        let text = format_program(&program);
        assert_eq!(text, src);
    }
}
