#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::fmt;
use std::ops::Range;

use ark_ast::{span_between, LineIndex, Span};
use logos::Logos;
use miette::Diagnostic;
use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LexErrorKind {
    UnterminatedString,
    InvalidChar,
    MalformedNumber,
}

impl LexErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LexErrorKind::UnterminatedString => "UnterminatedString",
            LexErrorKind::InvalidChar => "InvalidChar",
            LexErrorKind::MalformedNumber => "MalformedNumber",
        }
    }
}

impl fmt::Display for LexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(ark::lex))]
#[allow(unused_assignments)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub message: String,
    pub line: u32,
    pub column: u32,
    #[label]
    pub span: Span,
}

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
enum RawToken {
    #[token("Mod")]
    KwMod,
    #[token("while")]
    KwWhile,
    #[token("break")]
    KwBreak,
    #[token("skip")]
    KwSkip,
    #[token("return")]
    KwReturn,
    #[token("true")]
    KwTrue,
    #[token("false")]
    KwFalse,

    #[token("/*", block_comment)]
    BlockComment(bool),

    #[token("::=")]
    ColonColonEq,
    #[token(":=")]
    ColonEq,
    #[token("::")]
    ColonColon,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Neq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("|>")]
    Chain,
    #[token("..")]
    DotDot,
    #[token("->")]
    Arrow,

    #[token(":")]
    Colon,
    #[token("=")]
    Eq,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("&")]
    Amp,
    #[token("|")]
    Bar,
    #[token("^")]
    Caret,
    #[token("!")]
    Bang,
    #[token("~")]
    Tilde,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(Option<i64>),

    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().parse::<f64>().ok().filter(|x| x.is_finite()))]
    Float(Option<f64>),

    // Digits running into identifier characters, or more than one fractional part.
    #[regex(r"[0-9]+(\.[0-9]+)*[a-zA-Z_][a-zA-Z0-9_]*")]
    #[regex(r"[0-9]+\.[0-9]+(\.[0-9]+)+")]
    BadNumber,

    // Supported escapes: \n, \t, \r, \\, \", \'
    #[regex(r#""([^"\\\n]|\\[^\n])*""#, parse_string)]
    #[regex(r#"'([^'\\\n]|\\[^\n])*'"#, parse_string)]
    Str(Option<String>),

    #[regex(r#""([^"\\\n]|\\[^\n])*\\?"#)]
    #[regex(r#"'([^'\\\n]|\\[^\n])*\\?"#)]
    UnterminatedStr,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn block_comment(lex: &mut logos::Lexer<RawToken>) -> bool {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            true
        }
        None => {
            lex.bump(lex.remainder().len());
            false
        }
    }
}

fn parse_string(lex: &mut logos::Lexer<RawToken>) -> Option<String> {
    let s = lex.slice();
    let inner = &s[1..s.len().saturating_sub(1)];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            _ => return None,
        }
    }

    Some(out)
}

/// Lazy token stream over one source text.
///
/// Yields `Ok(token)` or `Err(error)` per token; an error covers only the
/// offending token and lexing resumes right after it. The stream always ends
/// with one `Eof` token.
pub struct Lexer<'a> {
    src: &'a str,
    raw: logos::Lexer<'a, RawToken>,
    lines: LineIndex,
    prev_end: usize,
    finished: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            raw: RawToken::lexer(src),
            lines: LineIndex::new(src),
            prev_end: 0,
            finished: false,
        }
    }

    /// A fresh stream over the same text, positioned at the start.
    pub fn restart(&self) -> Lexer<'a> {
        Lexer::new(self.src)
    }

    pub fn source(&self) -> &'a str {
        self.src
    }

    /// Lex the whole input, stopping at the first error.
    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        self.restart().collect()
    }

    /// Lex the whole input, dropping bad tokens and collecting their errors.
    pub fn lex_all(&self) -> (Vec<Token>, Vec<LexError>) {
        let mut tokens = Vec::new();
        let mut errors = Vec::new();
        for item in self.restart() {
            match item {
                Ok(tok) => tokens.push(tok),
                Err(err) => errors.push(err),
            }
        }
        (tokens, errors)
    }

    fn token(&mut self, kind: TokenKind, range: Range<usize>) -> Token {
        let newline_before = self
            .src
            .get(self.prev_end..range.start)
            .is_some_and(|gap| gap.contains('\n'));
        self.prev_end = range.end;
        let lc = self.lines.line_col_at(range.start);
        Token {
            kind,
            span: span_between(range.start, range.end),
            line: lc.line,
            column: lc.col,
            newline_before,
        }
    }

    fn error(&mut self, kind: LexErrorKind, message: String, range: Range<usize>) -> LexError {
        self.prev_end = range.end;
        let lc = self.lines.line_col_at(range.start);
        LexError {
            kind,
            message,
            line: lc.line,
            column: lc.col,
            span: span_between(range.start, range.end),
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let Some(raw) = self.raw.next() else {
                self.finished = true;
                let end = self.src.len();
                return Some(Ok(self.token(TokenKind::Eof, end..end)));
            };
            let range = self.raw.span();
            let slice = self.raw.slice();

            let kind = match raw {
                Ok(RawToken::BlockComment(true)) => continue,
                Ok(RawToken::BlockComment(false)) => {
                    return Some(Err(self.error(
                        LexErrorKind::InvalidChar,
                        "unterminated block comment".to_string(),
                        range,
                    )));
                }

                Ok(RawToken::KwMod) => TokenKind::KwMod,
                Ok(RawToken::KwWhile) => TokenKind::KwWhile,
                Ok(RawToken::KwBreak) => TokenKind::KwBreak,
                Ok(RawToken::KwSkip) => TokenKind::KwSkip,
                Ok(RawToken::KwReturn) => TokenKind::KwReturn,
                Ok(RawToken::KwTrue) => TokenKind::KwTrue,
                Ok(RawToken::KwFalse) => TokenKind::KwFalse,

                Ok(RawToken::ColonColonEq) => TokenKind::ColonColonEq,
                Ok(RawToken::ColonEq) => TokenKind::ColonEq,
                Ok(RawToken::ColonColon) => TokenKind::ColonColon,
                Ok(RawToken::PlusPlus) => TokenKind::PlusPlus,
                Ok(RawToken::MinusMinus) => TokenKind::MinusMinus,
                Ok(RawToken::EqEq) => TokenKind::EqEq,
                Ok(RawToken::Neq) => TokenKind::Neq,
                Ok(RawToken::Le) => TokenKind::Le,
                Ok(RawToken::Ge) => TokenKind::Ge,
                Ok(RawToken::AndAnd) => TokenKind::AndAnd,
                Ok(RawToken::OrOr) => TokenKind::OrOr,
                Ok(RawToken::Shl) => TokenKind::Shl,
                Ok(RawToken::Shr) => TokenKind::Shr,
                Ok(RawToken::Chain) => TokenKind::Chain,
                Ok(RawToken::DotDot) => TokenKind::DotDot,
                Ok(RawToken::Arrow) => TokenKind::Arrow,

                Ok(RawToken::Colon) => TokenKind::Colon,
                Ok(RawToken::Eq) => TokenKind::Eq,
                Ok(RawToken::Plus) => TokenKind::Plus,
                Ok(RawToken::Minus) => TokenKind::Minus,
                Ok(RawToken::Star) => TokenKind::Star,
                Ok(RawToken::Slash) => TokenKind::Slash,
                Ok(RawToken::Percent) => TokenKind::Percent,
                Ok(RawToken::Lt) => TokenKind::Lt,
                Ok(RawToken::Gt) => TokenKind::Gt,
                Ok(RawToken::Amp) => TokenKind::Amp,
                Ok(RawToken::Bar) => TokenKind::Bar,
                Ok(RawToken::Caret) => TokenKind::Caret,
                Ok(RawToken::Bang) => TokenKind::Bang,
                Ok(RawToken::Tilde) => TokenKind::Tilde,
                Ok(RawToken::Dot) => TokenKind::Dot,
                Ok(RawToken::Comma) => TokenKind::Comma,
                Ok(RawToken::Semi) => TokenKind::Semi,

                Ok(RawToken::LParen) => TokenKind::LParen,
                Ok(RawToken::RParen) => TokenKind::RParen,
                Ok(RawToken::LBrace) => TokenKind::LBrace,
                Ok(RawToken::RBrace) => TokenKind::RBrace,
                Ok(RawToken::LBracket) => TokenKind::LBracket,
                Ok(RawToken::RBracket) => TokenKind::RBracket,

                Ok(RawToken::Ident(s)) => TokenKind::Ident(s),
                Ok(RawToken::Int(Some(n))) => TokenKind::Int(n),
                Ok(RawToken::Int(None)) => {
                    let message = format!("integer literal `{slice}` is out of range");
                    return Some(Err(self.error(LexErrorKind::MalformedNumber, message, range)));
                }
                Ok(RawToken::Float(Some(x))) => TokenKind::Float(x),
                Ok(RawToken::Float(None)) => {
                    let message = format!("float literal `{slice}` is out of range");
                    return Some(Err(self.error(LexErrorKind::MalformedNumber, message, range)));
                }
                Ok(RawToken::BadNumber) => {
                    let message = format!("malformed number `{slice}`");
                    return Some(Err(self.error(LexErrorKind::MalformedNumber, message, range)));
                }
                Ok(RawToken::Str(Some(s))) => TokenKind::Str(s),
                Ok(RawToken::Str(None)) => {
                    let message = "unknown escape sequence in string literal".to_string();
                    return Some(Err(self.error(LexErrorKind::InvalidChar, message, range)));
                }
                Ok(RawToken::UnterminatedStr) => {
                    let message = "unterminated string literal".to_string();
                    return Some(Err(self.error(
                        LexErrorKind::UnterminatedString,
                        message,
                        range,
                    )));
                }

                Err(()) => {
                    let message = format!("unexpected character `{}`", slice.escape_debug());
                    return Some(Err(self.error(LexErrorKind::InvalidChar, message, range)));
                }
            };

            return Some(Ok(self.token(kind, range)));
        }
    }
}
