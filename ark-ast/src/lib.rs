#![forbid(unsafe_code)]

mod normalize;
mod source;

use miette::SourceSpan;

pub use normalize::normalize;
pub use source::{LineCol, LineIndex};

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

pub fn span_start(s: Span) -> usize {
    s.offset()
}

pub type Ident = Spanned<String>;

/// Identity of a node inside one compile unit, assigned in parse order.
/// Analysis side tables are keyed by it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Import(ImportStmt),
    Var(VarDecl),
    Proc(ProcDecl),
    Artifact(ArtifactDecl),
    Assign(AssignStmt),
    Cond(CondStmt),
    Chain(ChainStmt),
    While(WhileStmt),
    RangeFor(RangeForStmt),
    Break(Span),
    Skip(Span),
    Return(ReturnStmt),
    Block(Block),
    Expr(Expr),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Import(s) => s.span,
            Stmt::Var(s) => s.span,
            Stmt::Proc(s) => s.span,
            Stmt::Artifact(s) => s.span,
            Stmt::Assign(s) => s.span,
            Stmt::Cond(s) => s.span,
            Stmt::Chain(s) => s.span,
            Stmt::While(s) => s.span,
            Stmt::RangeFor(s) => s.span,
            Stmt::Break(span) | Stmt::Skip(span) => *span,
            Stmt::Return(s) => s.span,
            Stmt::Block(b) => b.span,
            Stmt::Expr(e) => e.span,
        }
    }
}

/// `Mod math`, `Mod util/strings`, `Mod "lib/geo"`.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportStmt {
    pub span: Span,
    /// Slash-separated path as written, without quotes.
    pub path: String,
    pub quoted: bool,
    /// Last path segment; the name the module is reachable under.
    pub alias: Ident,
}

impl ImportStmt {
    /// Bare single-segment imports resolve against the search root; anything
    /// else is relative to the importing unit.
    pub fn is_rooted(&self) -> bool {
        !self.quoted && !self.path.contains('/')
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VarDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: Ident,
    pub mutable: bool,
    pub ty: Option<TypeRef>,
    pub value: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: Ident,
    pub params: Vec<Param>,
    pub ret: Option<TypeRef>,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub id: NodeId,
    pub span: Span,
    pub name: Ident,
    pub ty: Option<TypeRef>,
    pub default: Option<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Record,
    Enum,
    Namespace,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArtifactDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: Ident,
    pub kind: ArtifactKind,
    pub members: Vec<Member>,
}

impl ArtifactDecl {
    pub fn props(&self) -> impl Iterator<Item = &VarDecl> {
        self.members.iter().filter_map(|m| match m {
            Member::Prop(p) => Some(p),
            _ => None,
        })
    }

    pub fn procs(&self) -> impl Iterator<Item = &ProcDecl> {
        self.members.iter().filter_map(|m| match m {
            Member::Proc(p) => Some(p),
            _ => None,
        })
    }

    pub fn cases(&self) -> impl Iterator<Item = &EnumCase> {
        self.members.iter().filter_map(|m| match m {
            Member::Case(c) => Some(c),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Member {
    Prop(VarDecl),
    Proc(ProcDecl),
    Case(EnumCase),
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnumCase {
    pub span: Span,
    pub name: Ident,
    pub value: Option<Spanned<i64>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssignStmt {
    pub span: Span,
    pub target: Expr,
    pub value: Expr,
}

/// `cond { ... }`
#[derive(Clone, Debug, PartialEq)]
pub struct CondStmt {
    pub span: Span,
    pub cond: Expr,
    pub body: Block,
}

/// `|> a { ... } |> b { ... } |> { ... }`
#[derive(Clone, Debug, PartialEq)]
pub struct ChainStmt {
    pub span: Span,
    pub arms: Vec<CondStmt>,
    pub fallback: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStmt {
    pub span: Span,
    pub cond: Expr,
    pub body: Block,
}

/// `i, lo .. hi { ... }` (inclusive on both ends)
#[derive(Clone, Debug, PartialEq)]
pub struct RangeForStmt {
    pub id: NodeId,
    pub span: Span,
    pub var: Ident,
    pub start: Expr,
    pub end: Expr,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStmt {
    pub span: Span,
    pub value: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeRef {
    pub span: Span,
    pub kind: TypeRefKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeRefKind {
    /// Builtin scalar or artifact name.
    Named(Ident),
    /// `module.Name`
    Qualified { module: Ident, name: Ident },
    /// `[T; N]`
    Array(Box<TypeRef>, u64),
    /// `[T]`
    List(Box<TypeRef>),
    /// `(T, U) -> R`
    Proc { params: Vec<TypeRef>, ret: Box<TypeRef> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Ident(String),
    /// `.name`: property or procedure of the enclosing artifact.
    SelfProp(Ident),
    Array(Vec<Expr>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    Postfix {
        op: PostfixOp,
        expr: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        name: Ident,
    },
}

impl Expr {
    /// Integer value of a literal index such as `3` or `-1`.
    pub fn const_int(&self) -> Option<i64> {
        match &self.kind {
            ExprKind::Int(n) => Some(*n),
            ExprKind::Unary {
                op: UnaryOp::Neg,
                expr,
            } => match expr.kind {
                ExprKind::Int(n) => n.checked_neg(),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostfixOp {
    Inc,
    Dec,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::BitAnd => "&",
            BinOp::BitXor => "^",
            BinOp::BitOr => "|",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    /// Binding strength; higher binds tighter. All levels are left-associative.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Mul | BinOp::Div | BinOp::Rem => 10,
            BinOp::Add | BinOp::Sub => 9,
            BinOp::Shl | BinOp::Shr => 8,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 7,
            BinOp::Eq | BinOp::Ne => 6,
            BinOp::BitAnd => 5,
            BinOp::BitXor => 4,
            BinOp::BitOr => 3,
            BinOp::And => 2,
            BinOp::Or => 1,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }
}
