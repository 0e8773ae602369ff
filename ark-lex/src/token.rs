#![forbid(unsafe_code)]

use std::fmt;

use ark_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// 1-based
    pub line: u32,
    /// 1-based, in bytes
    pub column: u32,
    /// A line break (possibly inside a comment) separates this token from the previous one.
    pub newline_before: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwMod,
    KwWhile,
    KwBreak,
    KwSkip,
    KwReturn,
    KwTrue,
    KwFalse,

    // Multi-character operators
    ColonColonEq,
    ColonEq,
    ColonColon,
    PlusPlus,
    MinusMinus,
    EqEq,
    Neq,
    Le,
    Ge,
    AndAnd,
    OrOr,
    Shl,
    Shr,
    Chain,
    DotDot,
    Arrow,

    // Single-character operators / punctuation
    Colon,
    Eq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Gt,
    Amp,
    Bar,
    Caret,
    Bang,
    Tilde,
    Dot,
    Comma,
    Semi,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    Eof,

    // Literals / identifiers
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::KwMod => "`Mod`",
            TokenKind::KwWhile => "`while`",
            TokenKind::KwBreak => "`break`",
            TokenKind::KwSkip => "`skip`",
            TokenKind::KwReturn => "`return`",
            TokenKind::KwTrue => "`true`",
            TokenKind::KwFalse => "`false`",
            TokenKind::ColonColonEq => "`::=`",
            TokenKind::ColonEq => "`:=`",
            TokenKind::ColonColon => "`::`",
            TokenKind::PlusPlus => "`++`",
            TokenKind::MinusMinus => "`--`",
            TokenKind::EqEq => "`==`",
            TokenKind::Neq => "`!=`",
            TokenKind::Le => "`<=`",
            TokenKind::Ge => "`>=`",
            TokenKind::AndAnd => "`&&`",
            TokenKind::OrOr => "`||`",
            TokenKind::Shl => "`<<`",
            TokenKind::Shr => "`>>`",
            TokenKind::Chain => "`|>`",
            TokenKind::DotDot => "`..`",
            TokenKind::Arrow => "`->`",
            TokenKind::Colon => "`:`",
            TokenKind::Eq => "`=`",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Star => "`*`",
            TokenKind::Slash => "`/`",
            TokenKind::Percent => "`%`",
            TokenKind::Lt => "`<`",
            TokenKind::Gt => "`>`",
            TokenKind::Amp => "`&`",
            TokenKind::Bar => "`|`",
            TokenKind::Caret => "`^`",
            TokenKind::Bang => "`!`",
            TokenKind::Tilde => "`~`",
            TokenKind::Dot => "`.`",
            TokenKind::Comma => "`,`",
            TokenKind::Semi => "`;`",
            TokenKind::LParen => "`(`",
            TokenKind::RParen => "`)`",
            TokenKind::LBrace => "`{`",
            TokenKind::RBrace => "`}`",
            TokenKind::LBracket => "`[`",
            TokenKind::RBracket => "`]`",
            TokenKind::Eof => "end of input",
            TokenKind::Ident(name) => return write!(f, "identifier `{name}`"),
            TokenKind::Int(n) => return write!(f, "integer `{n}`"),
            TokenKind::Float(x) => return write!(f, "float `{x}`"),
            TokenKind::Str(_) => "string literal",
        };
        f.write_str(s)
    }
}
