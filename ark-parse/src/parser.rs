#![forbid(unsafe_code)]

use std::mem;

use ark_ast::{
    span, span_between, ArtifactDecl, ArtifactKind, AssignStmt, BinOp, Block, ChainStmt, CondStmt,
    EnumCase, Expr, ExprKind, Ident, ImportStmt, Member, NodeId, Param, PostfixOp, ProcDecl,
    Program, RangeForStmt, ReturnStmt, Span, Spanned, Stmt, TypeRef, TypeRefKind, UnaryOp,
    VarDecl, WhileStmt,
};
use ark_lex::{Token, TokenKind};

use crate::error::{ParseError, ParseErrorKind};
use crate::{Dialect, ParseConfig};

pub struct Parser<'a> {
    tokens: &'a [Token],
    idx: usize,
    config: ParseConfig,
    next_id: u32,
    recovering: bool,
    errors: Vec<ParseError>,
    eof: Token,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self::new_with_config(tokens, &ParseConfig::default())
    }

    pub fn new_with_config(tokens: &'a [Token], config: &ParseConfig) -> Self {
        let end = tokens
            .last()
            .map(|t| t.span.offset() + t.span.len())
            .unwrap_or(0);
        let eof = Token {
            kind: TokenKind::Eof,
            span: span(end, 0),
            line: tokens.last().map(|t| t.line).unwrap_or(1),
            column: tokens.last().map(|t| t.column).unwrap_or(1),
            newline_before: false,
        };
        Self {
            tokens,
            idx: 0,
            config: config.clone(),
            next_id: 0,
            recovering: false,
            errors: Vec::new(),
            eof,
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let stmts = self.parse_stmts(true)?;
        Ok(Program { stmts })
    }

    /// Parse a program while attempting to recover from errors.
    ///
    /// On a statement parse error, tokens are skipped up to the next statement
    /// boundary (`;` or a line break at the same nesting level, or the `}`
    /// closing the enclosing block) and parsing continues. This applies inside
    /// nested blocks too.
    pub fn parse_program_with_recovery(&mut self) -> (Program, Vec<ParseError>) {
        self.recovering = true;
        let stmts = match self.parse_stmts(true) {
            Ok(stmts) => stmts,
            Err(err) => {
                self.errors.push(err);
                Vec::new()
            }
        };
        self.recovering = false;
        (Program { stmts }, mem::take(&mut self.errors))
    }

    pub fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(1)
    }

    pub fn parse_expr_eof(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expr()?;
        if !self.at(TokenKind::Eof) {
            let tok = self.current().clone();
            return Err(self.error(
                &tok,
                ParseErrorKind::UnexpectedToken,
                format!("expected end of input, found {}", tok.kind),
            ));
        }
        Ok(expr)
    }

    fn parse_stmts(&mut self, top_level: bool) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        let mut after_chain = false;

        loop {
            while self.at(TokenKind::Semi) {
                self.next();
            }
            if self.at(TokenKind::Eof) {
                break;
            }
            if self.at(TokenKind::RBrace) && !top_level {
                break;
            }

            let start = self.idx;
            match self.parse_terminated_stmt(top_level, after_chain) {
                Ok(stmt) => {
                    after_chain = matches!(stmt, Stmt::Chain(_));
                    stmts.push(stmt);
                }
                Err(err) => {
                    if !self.recovering {
                        return Err(err);
                    }
                    self.errors.push(err);
                    self.recover_to_stmt_boundary(start);
                    after_chain = false;
                }
            }
        }

        Ok(stmts)
    }

    fn recover_to_stmt_boundary(&mut self, stmt_start: usize) {
        let mut depth = 0usize;
        while !self.at(TokenKind::Eof) {
            let tok = self.current();
            if depth == 0 && self.idx > stmt_start && tok.newline_before {
                break;
            }
            let kind = tok.kind.clone();
            match kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    if depth == 0 {
                        // Closes the enclosing block, unless it is the stray
                        // brace this statement failed on.
                        if self.idx == stmt_start {
                            self.idx += 1;
                        }
                        break;
                    }
                    depth -= 1;
                }
                TokenKind::Semi if depth == 0 => {
                    self.idx += 1;
                    break;
                }
                _ => {}
            }
            self.idx += 1;
        }
    }

    fn parse_terminated_stmt(
        &mut self,
        top_level: bool,
        after_chain: bool,
    ) -> Result<Stmt, ParseError> {
        if self.at(TokenKind::RBrace) {
            let tok = self.current().clone();
            return Err(self.error(
                &tok,
                ParseErrorKind::UnbalancedBlock,
                "unmatched `}`",
            ));
        }

        let stmt = self.parse_stmt()?;

        if !top_level {
            let what = match &stmt {
                Stmt::Import(_) => Some("imports"),
                Stmt::Artifact(_) => Some("artifact declarations"),
                _ => None,
            };
            if let Some(what) = what {
                return Err(self.error_at(
                    stmt.span(),
                    ParseErrorKind::UnexpectedToken,
                    format!("{what} must appear at module level"),
                ));
            }
        }

        if after_chain {
            if let Stmt::Cond(cond) = &stmt {
                return Err(self.error_at(
                    cond.span,
                    ParseErrorKind::UnexpectedToken,
                    "a conditional following a `|>` chain must itself start with `|>`",
                ));
            }
        }

        self.expect_stmt_end()?;
        Ok(stmt)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek_kind() {
            Some(TokenKind::KwMod) => Ok(Stmt::Import(self.parse_import()?)),
            Some(TokenKind::KwWhile) => Ok(Stmt::While(self.parse_while()?)),
            Some(TokenKind::Chain) => Ok(Stmt::Chain(self.parse_chain()?)),
            Some(TokenKind::KwBreak) => {
                let tok = self.bump();
                Ok(Stmt::Break(tok.span))
            }
            Some(TokenKind::KwSkip) => {
                let tok = self.bump();
                Ok(Stmt::Skip(tok.span))
            }
            Some(TokenKind::KwReturn) => Ok(Stmt::Return(self.parse_return()?)),
            Some(TokenKind::LBrace) => Ok(Stmt::Block(self.parse_block()?)),
            Some(TokenKind::Ident(_)) => match self.peek_kind_n(1) {
                Some(TokenKind::Comma) => Ok(Stmt::RangeFor(self.parse_range_for()?)),
                Some(TokenKind::ColonColon)
                    if matches!(self.peek_kind_n(2), Some(TokenKind::LBrace)) =>
                {
                    Ok(Stmt::Artifact(self.parse_artifact()?))
                }
                Some(
                    TokenKind::Colon
                    | TokenKind::ColonColon
                    | TokenKind::ColonEq
                    | TokenKind::ColonColonEq,
                ) => Ok(Stmt::Var(self.parse_var_decl()?)),
                Some(TokenKind::LParen) if self.is_proc_decl() => {
                    Ok(Stmt::Proc(self.parse_proc_decl()?))
                }
                _ => self.parse_expr_stmt(),
            },
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_expr_stmt(&mut self) -> Result<Stmt, ParseError> {
        let expr = self.parse_expr()?;

        if self.at(TokenKind::LBrace) && !self.current().newline_before {
            let body = self.parse_block()?;
            return Ok(Stmt::Cond(CondStmt {
                span: join(expr.span, body.span),
                cond: expr,
                body,
            }));
        }

        if self.at(TokenKind::Eq) {
            if !is_place(&expr) {
                return Err(self.error_at(
                    expr.span,
                    ParseErrorKind::UnexpectedToken,
                    "invalid assignment target",
                ));
            }
            self.next();
            let value = self.parse_expr()?;
            if self.at(TokenKind::Eq) {
                let tok = self.current().clone();
                return Err(self.error(
                    &tok,
                    ParseErrorKind::UnexpectedToken,
                    "assignments cannot be chained",
                ));
            }
            return Ok(Stmt::Assign(AssignStmt {
                span: join(expr.span, value.span),
                target: expr,
                value,
            }));
        }

        Ok(Stmt::Expr(expr))
    }

    fn parse_import(&mut self) -> Result<ImportStmt, ParseError> {
        let kw = self.expect(TokenKind::KwMod)?;
        let tok = self.current().clone();
        match &tok.kind {
            TokenKind::Str(path) => {
                self.next();
                let last = path
                    .rsplit('/')
                    .next()
                    .unwrap_or("")
                    .trim_end_matches(".ark")
                    .to_string();
                if !is_ident(&last) {
                    return Err(self.error(
                        &tok,
                        ParseErrorKind::UnexpectedToken,
                        format!("module path \"{path}\" does not end in a valid module name"),
                    ));
                }
                Ok(ImportStmt {
                    span: join(kw.span, tok.span),
                    path: path.clone(),
                    quoted: true,
                    alias: Ident::new(tok.span, last),
                })
            }
            TokenKind::Ident(_) => {
                let mut segments = vec![self.expect_ident()?];
                while self.at(TokenKind::Slash) {
                    self.next();
                    segments.push(self.expect_ident()?);
                }
                let path = segments
                    .iter()
                    .map(|s| s.node.as_str())
                    .collect::<Vec<_>>()
                    .join("/");
                let alias = segments.pop().unwrap_or_else(|| Ident::new(tok.span, String::new()));
                Ok(ImportStmt {
                    span: join(kw.span, alias.span),
                    path,
                    quoted: false,
                    alias,
                })
            }
            other => {
                let message = format!("expected a module path after `Mod`, found {other}");
                Err(self.error(&tok, ParseErrorKind::UnexpectedToken, message))
            }
        }
    }

    fn parse_var_decl(&mut self) -> Result<VarDecl, ParseError> {
        let id = self.fresh_id();
        let name = self.expect_ident()?;
        let op = self.bump();

        match op.kind {
            TokenKind::ColonEq | TokenKind::ColonColonEq => {
                if self.config.dialect == Dialect::Strict {
                    let message = format!(
                        "`{}` declarations belong to the inferred dialect; write `{}: Type = value`",
                        if op.kind == TokenKind::ColonEq { ":=" } else { "::=" },
                        name.node
                    );
                    return Err(self.error(&op, ParseErrorKind::DialectMismatch, message));
                }
                let value = self.parse_expr()?;
                Ok(VarDecl {
                    id,
                    span: join(name.span, value.span),
                    mutable: op.kind == TokenKind::ColonEq,
                    name,
                    ty: None,
                    value: Some(value),
                })
            }
            TokenKind::Colon | TokenKind::ColonColon => {
                let mutable = op.kind == TokenKind::Colon;
                let ty = self.parse_type()?;
                if self.at(TokenKind::Eq) {
                    self.next();
                    let value = self.parse_expr()?;
                    return Ok(VarDecl {
                        id,
                        span: join(name.span, value.span),
                        name,
                        mutable,
                        ty: Some(ty),
                        value: Some(value),
                    });
                }
                if !mutable {
                    let message = format!("immutable declaration `{}` needs a value", name.node);
                    return Err(self.error_at(name.span, ParseErrorKind::UnexpectedToken, message));
                }
                if self.config.dialect == Dialect::Strict {
                    let message = format!(
                        "`{}` has no value; declarations without a value belong to the inferred dialect",
                        name.node
                    );
                    return Err(self.error_at(name.span, ParseErrorKind::DialectMismatch, message));
                }
                Ok(VarDecl {
                    id,
                    span: join(name.span, ty.span),
                    name,
                    mutable,
                    ty: Some(ty),
                    value: None,
                })
            }
            ref other => {
                let message = format!("expected a declaration operator, found {other}");
                Err(self.error(&op, ParseErrorKind::UnexpectedToken, message))
            }
        }
    }

    /// `name(` ... `)` followed by `:` or `{` on the same line. A `{` only
    /// makes it a declaration when every item in the parentheses looks like a
    /// parameter (`x: T` or `x = default`), or there are none; otherwise it is
    /// a call used as a conditional.
    fn is_proc_decl(&self) -> bool {
        let mut i = self.idx + 2;
        let mut depth = 1usize;
        let mut all_params = true;
        let mut empty = true;
        let mut at_item_start = true;

        loop {
            let Some(tok) = self.tokens.get(i) else {
                return false;
            };
            match &tok.kind {
                TokenKind::Eof => return false,
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::Comma if depth == 1 => {
                    at_item_start = true;
                    i += 1;
                    continue;
                }
                _ => {}
            }
            if at_item_start {
                empty = false;
                let named = matches!(tok.kind, TokenKind::Ident(_));
                let typed = matches!(
                    self.tokens.get(i + 1).map(|t| &t.kind),
                    Some(TokenKind::Colon | TokenKind::Eq)
                );
                all_params &= named && typed;
                at_item_start = false;
            }
            i += 1;
        }

        match self.tokens.get(i + 1) {
            Some(t) if t.newline_before => false,
            Some(t) => match t.kind {
                TokenKind::Colon => true,
                TokenKind::LBrace => empty || all_params,
                _ => false,
            },
            None => false,
        }
    }

    fn parse_proc_decl(&mut self) -> Result<ProcDecl, ParseError> {
        let id = self.fresh_id();
        let name = self.expect_ident()?;
        let open = self.expect(TokenKind::LParen)?;

        let mut params: Vec<Param> = Vec::new();
        while !self.at(TokenKind::RParen) && !self.at(TokenKind::Eof) {
            let param = self.parse_param()?;
            if param.default.is_none() && params.iter().any(|p| p.default.is_some()) {
                let message = format!(
                    "parameter `{}` without a default follows a parameter with a default",
                    param.name.node
                );
                return Err(self.error_at(param.span, ParseErrorKind::UnexpectedToken, message));
            }
            params.push(param);
            if self.at(TokenKind::Comma) {
                self.next();
            } else {
                break;
            }
        }
        self.expect_closing(TokenKind::RParen, &open)?;

        let ret = if self.at(TokenKind::Colon) {
            self.next();
            Some(self.parse_type()?)
        } else {
            if self.config.dialect == Dialect::Strict {
                let message = format!(
                    "procedure `{}` needs a return type in the strict dialect",
                    name.node
                );
                return Err(self.error_at(name.span, ParseErrorKind::DialectMismatch, message));
            }
            None
        };

        let body = self.parse_block()?;
        Ok(ProcDecl {
            id,
            span: join(name.span, body.span),
            name,
            params,
            ret,
            body,
        })
    }

    fn parse_param(&mut self) -> Result<Param, ParseError> {
        let id = self.fresh_id();
        let name = self.expect_ident()?;
        let mut end = name.span;

        let ty = if self.at(TokenKind::Colon) {
            self.next();
            let ty = self.parse_type()?;
            end = ty.span;
            Some(ty)
        } else {
            None
        };

        let default = if self.at(TokenKind::Eq) {
            self.next();
            let value = self.parse_expr()?;
            end = value.span;
            Some(value)
        } else {
            None
        };

        if ty.is_none() {
            if self.config.dialect == Dialect::Strict {
                let message = format!(
                    "parameter `{}` needs a type in the strict dialect",
                    name.node
                );
                return Err(self.error_at(name.span, ParseErrorKind::DialectMismatch, message));
            }
            if default.is_none() {
                let message = format!(
                    "parameter `{}` needs a type or a default value",
                    name.node
                );
                return Err(self.error_at(name.span, ParseErrorKind::UnexpectedToken, message));
            }
        }

        Ok(Param {
            id,
            span: join(name.span, end),
            name,
            ty,
            default,
        })
    }

    fn parse_artifact(&mut self) -> Result<ArtifactDecl, ParseError> {
        let id = self.fresh_id();
        let name = self.expect_ident()?;
        self.expect(TokenKind::ColonColon)?;
        let open = self.expect(TokenKind::LBrace)?;

        let mut members = Vec::new();
        loop {
            while self.at(TokenKind::Comma) || self.at(TokenKind::Semi) {
                self.next();
            }
            if self.at(TokenKind::RBrace) || self.at(TokenKind::Eof) {
                break;
            }
            members.push(self.parse_member()?);

            let tok = self.current();
            let separated = tok.newline_before
                || matches!(
                    tok.kind,
                    TokenKind::Comma | TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof
                );
            if !separated {
                let tok = tok.clone();
                let message = format!(
                    "expected `,` or a line break between members of `{}`, found {}",
                    name.node, tok.kind
                );
                return Err(self.error(&tok, ParseErrorKind::UnexpectedToken, message));
            }
        }
        let close = self.expect_closing(TokenKind::RBrace, &open)?;

        let kind = self.classify_artifact(&name, &members)?;
        Ok(ArtifactDecl {
            id,
            span: join(name.span, close.span),
            name,
            kind,
            members,
        })
    }

    fn parse_member(&mut self) -> Result<Member, ParseError> {
        match (self.peek_kind(), self.peek_kind_n(1)) {
            (Some(TokenKind::Ident(_)), Some(TokenKind::LParen)) => {
                Ok(Member::Proc(self.parse_proc_decl()?))
            }
            (
                Some(TokenKind::Ident(_)),
                Some(
                    TokenKind::Colon
                    | TokenKind::ColonColon
                    | TokenKind::ColonEq
                    | TokenKind::ColonColonEq,
                ),
            ) => Ok(Member::Prop(self.parse_var_decl()?)),
            (Some(TokenKind::Ident(_)), _) => {
                let name = self.expect_ident()?;
                if !self.at(TokenKind::Eq) {
                    return Ok(Member::Case(EnumCase {
                        span: name.span,
                        name,
                        value: None,
                    }));
                }
                self.next();
                let negative = if self.at(TokenKind::Minus) {
                    self.next();
                    true
                } else {
                    false
                };
                let tok = self.bump();
                let TokenKind::Int(n) = tok.kind else {
                    let message = format!(
                        "enum case `{}` needs an integer literal value, found {}",
                        name.node, tok.kind
                    );
                    return Err(self.error(&tok, ParseErrorKind::UnexpectedToken, message));
                };
                let value = if negative { -n } else { n };
                Ok(Member::Case(EnumCase {
                    span: join(name.span, tok.span),
                    name,
                    value: Some(Spanned::new(tok.span, value)),
                }))
            }
            _ => {
                let tok = self.current().clone();
                let message = format!("expected an artifact member, found {}", tok.kind);
                Err(self.error(&tok, ParseErrorKind::UnexpectedToken, message))
            }
        }
    }

    fn classify_artifact(&self, name: &Ident, members: &[Member]) -> Result<ArtifactKind, ParseError> {
        let first_case = members.iter().find_map(|m| match m {
            Member::Case(c) => Some(c.span),
            _ => None,
        });
        let has_other = members.iter().any(|m| !matches!(m, Member::Case(_)));

        match first_case {
            Some(case_span) if has_other => {
                let message = format!(
                    "enum cases cannot be mixed with properties or procedures in `{}`",
                    name.node
                );
                Err(self.error_at(case_span, ParseErrorKind::UnexpectedToken, message))
            }
            Some(_) => Ok(ArtifactKind::Enum),
            None => {
                let has_mutable = members
                    .iter()
                    .any(|m| matches!(m, Member::Prop(p) if p.mutable));
                if has_mutable {
                    Ok(ArtifactKind::Record)
                } else {
                    Ok(ArtifactKind::Namespace)
                }
            }
        }
    }

    fn parse_while(&mut self) -> Result<WhileStmt, ParseError> {
        let kw = self.expect(TokenKind::KwWhile)?;
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(WhileStmt {
            span: join(kw.span, body.span),
            cond,
            body,
        })
    }

    fn parse_chain(&mut self) -> Result<ChainStmt, ParseError> {
        let start = self.current().span;
        let mut arms = Vec::new();
        let mut fallback: Option<Block> = None;
        let mut end = start;

        while self.at(TokenKind::Chain) {
            let bar = self.bump();
            if fallback.is_some() {
                return Err(self.error(
                    &bar,
                    ParseErrorKind::UnexpectedToken,
                    "the catch-all `|> { ... }` arm must be the last arm of a chain",
                ));
            }
            if self.at(TokenKind::LBrace) {
                let body = self.parse_block()?;
                end = body.span;
                fallback = Some(body);
                continue;
            }
            let cond = self.parse_expr()?;
            let body = self.parse_block()?;
            end = body.span;
            arms.push(CondStmt {
                span: join(bar.span, body.span),
                cond,
                body,
            });
        }

        if arms.is_empty() {
            return Err(self.error_at(
                start,
                ParseErrorKind::UnexpectedToken,
                "a `|>` chain needs at least one conditional arm",
            ));
        }

        Ok(ChainStmt {
            span: join(start, end),
            arms,
            fallback,
        })
    }

    fn parse_range_for(&mut self) -> Result<RangeForStmt, ParseError> {
        let id = self.fresh_id();
        let var = self.expect_ident()?;
        self.expect(TokenKind::Comma)?;
        let start = self.parse_expr()?;
        if !self.at(TokenKind::DotDot) {
            let tok = self.current().clone();
            let message = format!("expected `..` in range header, found {}", tok.kind);
            return Err(self.error(&tok, ParseErrorKind::UnexpectedToken, message));
        }
        self.next();
        let end = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(RangeForStmt {
            id,
            span: join(var.span, body.span),
            var,
            start,
            end,
            body,
        })
    }

    fn parse_return(&mut self) -> Result<ReturnStmt, ParseError> {
        let kw = self.expect(TokenKind::KwReturn)?;
        let tok = self.current();
        let bare = tok.newline_before
            || matches!(
                tok.kind,
                TokenKind::Semi | TokenKind::RBrace | TokenKind::Eof
            );
        if bare {
            return Ok(ReturnStmt {
                span: kw.span,
                value: None,
            });
        }
        let value = self.parse_expr()?;
        Ok(ReturnStmt {
            span: join(kw.span, value.span),
            value: Some(value),
        })
    }

    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let open = self.expect(TokenKind::LBrace)?;
        let stmts = self.parse_stmts(false)?;
        let close = self.expect_closing(TokenKind::RBrace, &open)?;
        Ok(Block {
            span: join(open.span, close.span),
            stmts,
        })
    }

    fn parse_type(&mut self) -> Result<TypeRef, ParseError> {
        let tok = self.current().clone();
        match &tok.kind {
            TokenKind::Ident(_) => {
                let name = self.expect_ident()?;
                if self.at(TokenKind::Dot)
                    && !self.current().newline_before
                    && matches!(self.peek_kind_n(1), Some(TokenKind::Ident(_)))
                {
                    self.next();
                    let item = self.expect_ident()?;
                    return Ok(TypeRef {
                        span: join(name.span, item.span),
                        kind: TypeRefKind::Qualified {
                            module: name,
                            name: item,
                        },
                    });
                }
                Ok(TypeRef {
                    span: name.span,
                    kind: TypeRefKind::Named(name),
                })
            }
            TokenKind::LBracket => {
                self.next();
                let elem = self.parse_type()?;
                if self.at(TokenKind::Semi) {
                    self.next();
                    let size_tok = self.bump();
                    let TokenKind::Int(n) = size_tok.kind else {
                        let message =
                            format!("expected an array size, found {}", size_tok.kind);
                        return Err(self.error(&size_tok, ParseErrorKind::UnexpectedToken, message));
                    };
                    let close = self.expect_closing(TokenKind::RBracket, &tok)?;
                    return Ok(TypeRef {
                        span: join(tok.span, close.span),
                        kind: TypeRefKind::Array(Box::new(elem), n as u64),
                    });
                }
                let close = self.expect_closing(TokenKind::RBracket, &tok)?;
                Ok(TypeRef {
                    span: join(tok.span, close.span),
                    kind: TypeRefKind::List(Box::new(elem)),
                })
            }
            TokenKind::LParen => {
                if self.config.dialect == Dialect::Inferred {
                    return Err(self.error(
                        &tok,
                        ParseErrorKind::DialectMismatch,
                        "procedure types belong to the strict dialect",
                    ));
                }
                self.next();
                let mut params = Vec::new();
                while !self.at(TokenKind::RParen) && !self.at(TokenKind::Eof) {
                    params.push(self.parse_type()?);
                    if self.at(TokenKind::Comma) {
                        self.next();
                    } else {
                        break;
                    }
                }
                self.expect_closing(TokenKind::RParen, &tok)?;
                self.expect(TokenKind::Arrow)?;
                let ret = self.parse_type()?;
                Ok(TypeRef {
                    span: join(tok.span, ret.span),
                    kind: TypeRefKind::Proc {
                        params,
                        ret: Box::new(ret),
                    },
                })
            }
            other => {
                let message = format!("expected a type, found {other}");
                Err(self.error(&tok, ParseErrorKind::UnexpectedToken, message))
            }
        }
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.peek_binop() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.next();
            let right = self.parse_binary(prec + 1)?;
            let span = join(left.span, right.span);
            left = Expr {
                id: self.fresh_id(),
                span,
                kind: ExprKind::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn peek_binop(&self) -> Option<BinOp> {
        let op = match self.peek_kind()? {
            TokenKind::Star => BinOp::Mul,
            TokenKind::Slash => BinOp::Div,
            TokenKind::Percent => BinOp::Rem,
            TokenKind::Plus => BinOp::Add,
            TokenKind::Minus => BinOp::Sub,
            TokenKind::Shl => BinOp::Shl,
            TokenKind::Shr => BinOp::Shr,
            TokenKind::Lt => BinOp::Lt,
            TokenKind::Le => BinOp::Le,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::Ge => BinOp::Ge,
            TokenKind::EqEq => BinOp::Eq,
            TokenKind::Neq => BinOp::Ne,
            TokenKind::Amp => BinOp::BitAnd,
            TokenKind::Caret => BinOp::BitXor,
            TokenKind::Bar => BinOp::BitOr,
            TokenKind::AndAnd => BinOp::And,
            TokenKind::OrOr => BinOp::Or,
            _ => return None,
        };
        Some(op)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Minus) => UnaryOp::Neg,
            Some(TokenKind::Bang) => UnaryOp::Not,
            Some(TokenKind::Tilde) => UnaryOp::BitNot,
            _ => return self.parse_postfix(),
        };
        let tok = self.bump();
        let inner = self.parse_unary()?;
        Ok(Expr {
            id: self.fresh_id(),
            span: join(tok.span, inner.span),
            kind: ExprKind::Unary {
                op,
                expr: Box::new(inner),
            },
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            let tok = self.current().clone();
            // Postfix operators never reach across a line break.
            if tok.newline_before {
                break;
            }
            match tok.kind {
                TokenKind::PlusPlus | TokenKind::MinusMinus => {
                    self.next();
                    let op = if tok.kind == TokenKind::PlusPlus {
                        PostfixOp::Inc
                    } else {
                        PostfixOp::Dec
                    };
                    expr = Expr {
                        id: self.fresh_id(),
                        span: join(expr.span, tok.span),
                        kind: ExprKind::Postfix {
                            op,
                            expr: Box::new(expr),
                        },
                    };
                }
                TokenKind::LParen => {
                    self.next();
                    let mut args = Vec::new();
                    while !self.at(TokenKind::RParen) && !self.at(TokenKind::Eof) {
                        args.push(self.parse_expr()?);
                        if self.at(TokenKind::Comma) {
                            self.next();
                        } else {
                            break;
                        }
                    }
                    let close = self.expect_closing(TokenKind::RParen, &tok)?;
                    expr = Expr {
                        id: self.fresh_id(),
                        span: join(expr.span, close.span),
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                    };
                }
                TokenKind::LBracket => {
                    self.next();
                    let index = self.parse_expr()?;
                    let close = self.expect_closing(TokenKind::RBracket, &tok)?;
                    expr = Expr {
                        id: self.fresh_id(),
                        span: join(expr.span, close.span),
                        kind: ExprKind::Index {
                            base: Box::new(expr),
                            index: Box::new(index),
                        },
                    };
                }
                TokenKind::Dot => {
                    self.next();
                    let name = self.expect_ident()?;
                    expr = Expr {
                        id: self.fresh_id(),
                        span: join(expr.span, name.span),
                        kind: ExprKind::Member {
                            base: Box::new(expr),
                            name,
                        },
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.bump();
        let kind = match &tok.kind {
            TokenKind::Int(n) => ExprKind::Int(*n),
            TokenKind::Float(x) => ExprKind::Float(*x),
            TokenKind::Str(s) => ExprKind::Str(s.clone()),
            TokenKind::KwTrue => ExprKind::Bool(true),
            TokenKind::KwFalse => ExprKind::Bool(false),
            TokenKind::Ident(name) => ExprKind::Ident(name.clone()),
            TokenKind::Dot => {
                let name = self.expect_ident()?;
                return Ok(Expr {
                    id: self.fresh_id(),
                    span: join(tok.span, name.span),
                    kind: ExprKind::SelfProp(name),
                });
            }
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect_closing(TokenKind::RParen, &tok)?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.at(TokenKind::RBracket) && !self.at(TokenKind::Eof) {
                    items.push(self.parse_expr()?);
                    if self.at(TokenKind::Comma) {
                        self.next();
                    } else {
                        break;
                    }
                }
                let close = self.expect_closing(TokenKind::RBracket, &tok)?;
                return Ok(Expr {
                    id: self.fresh_id(),
                    span: join(tok.span, close.span),
                    kind: ExprKind::Array(items),
                });
            }
            TokenKind::Eof => {
                return Err(self.error(
                    &tok,
                    ParseErrorKind::UnexpectedToken,
                    "expected an expression, found end of input",
                ));
            }
            other => {
                let message = format!("expected an expression, found {other}");
                return Err(self.error(&tok, ParseErrorKind::UnexpectedToken, message));
            }
        };
        Ok(Expr {
            id: self.fresh_id(),
            span: tok.span,
            kind,
        })
    }

    fn expect_stmt_end(&mut self) -> Result<(), ParseError> {
        let tok = self.current();
        if tok.kind == TokenKind::Semi {
            self.next();
            return Ok(());
        }
        if tok.newline_before || matches!(tok.kind, TokenKind::RBrace | TokenKind::Eof) {
            return Ok(());
        }
        let tok = tok.clone();
        let message = format!("expected `;` or a line break, found {}", tok.kind);
        Err(self.error(&tok, ParseErrorKind::UnexpectedToken, message))
    }

    fn expect_closing(&mut self, expected: TokenKind, open: &Token) -> Result<Token, ParseError> {
        if self.at(expected.clone()) {
            return Ok(self.bump());
        }
        let tok = self.current().clone();
        if tok.kind == TokenKind::Eof {
            let message = format!(
                "{} opened at line {}, column {} is never closed",
                open.kind, open.line, open.column
            );
            return Err(self.error(open, ParseErrorKind::UnbalancedBlock, message));
        }
        let message = format!("expected {expected}, found {}", tok.kind);
        Err(self.error(&tok, ParseErrorKind::UnexpectedToken, message))
    }

    fn expect_ident(&mut self) -> Result<Ident, ParseError> {
        let tok = self.bump();
        match tok.kind {
            TokenKind::Ident(name) => Ok(Ident {
                span: tok.span,
                node: name,
            }),
            ref other => {
                let message = format!("expected identifier, found {other}");
                Err(self.error(&tok, ParseErrorKind::UnexpectedToken, message))
            }
        }
    }

    fn expect(&mut self, expected: TokenKind) -> Result<Token, ParseError> {
        let tok = self.current().clone();
        if mem::discriminant(&tok.kind) == mem::discriminant(&expected) {
            self.next();
            Ok(tok)
        } else {
            let message = format!("expected {expected}, found {}", tok.kind);
            Err(self.error(&tok, ParseErrorKind::UnexpectedToken, message))
        }
    }

    fn error(&self, tok: &Token, kind: ParseErrorKind, message: impl Into<String>) -> ParseError {
        ParseError {
            kind,
            message: message.into(),
            line: tok.line,
            column: tok.column,
            span: tok.span,
        }
    }

    fn error_at(&self, at: Span, kind: ParseErrorKind, message: impl Into<String>) -> ParseError {
        let off = at.offset();
        let pos = self.tokens.partition_point(|t| t.span.offset() < off);
        let tok = self.tokens.get(pos).unwrap_or(&self.eof);
        ParseError {
            kind,
            message: message.into(),
            line: tok.line,
            column: tok.column,
            span: at,
        }
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.idx).unwrap_or(&self.eof)
    }

    fn at(&self, kind: TokenKind) -> bool {
        mem::discriminant(&self.current().kind) == mem::discriminant(&kind)
    }

    /// Consume and return the current token (the trailing `Eof` is never consumed).
    fn bump(&mut self) -> Token {
        let tok = self.current().clone();
        self.next();
        tok
    }

    fn next(&mut self) {
        if self.idx < self.tokens.len() && self.current().kind != TokenKind::Eof {
            self.idx += 1;
        }
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.idx).map(|t| &t.kind)
    }

    fn peek_kind_n(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.idx + n).map(|t| &t.kind)
    }
}

fn is_place(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Ident(_)
            | ExprKind::SelfProp(_)
            | ExprKind::Member { .. }
            | ExprKind::Index { .. }
    )
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn join(a: Span, b: Span) -> Span {
    let a0 = a.offset();
    let b0 = b.offset();
    let a1 = a0 + a.len();
    let b1 = b0 + b.len();
    span_between(a0.min(b0), a1.max(b1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_lex::Lexer;

    #[test]
    fn declarations_need_a_declaration_operator() {
        let tokens = Lexer::new("x + 1").lex().expect("lexes");
        let mut parser = Parser::new(&tokens);
        let err = parser.parse_var_decl().expect_err("`+` declares nothing");
        assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
        assert!(err.message.contains("declaration operator"), "{}", err.message);
        assert_eq!((err.line, err.column), (1, 3));
    }
}
