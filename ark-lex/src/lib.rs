#![forbid(unsafe_code)]

mod lexer;
mod token;

pub use lexer::{LexError, LexErrorKind, Lexer};
pub use token::{Token, TokenKind};

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .lex()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn multi_char_operators_use_maximal_munch() {
        assert_eq!(
            kinds("a ::= b := c :: d"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::ColonColonEq,
                TokenKind::Ident("b".into()),
                TokenKind::ColonEq,
                TokenKind::Ident("c".into()),
                TokenKind::ColonColon,
                TokenKind::Ident("d".into()),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds("|> || | ++ + -> -- - << <= < >> >= > .. ."),
            vec![
                TokenKind::Chain,
                TokenKind::OrOr,
                TokenKind::Bar,
                TokenKind::PlusPlus,
                TokenKind::Plus,
                TokenKind::Arrow,
                TokenKind::MinusMinus,
                TokenKind::Minus,
                TokenKind::Shl,
                TokenKind::Le,
                TokenKind::Lt,
                TokenKind::Shr,
                TokenKind::Ge,
                TokenKind::Gt,
                TokenKind::DotDot,
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn range_bounds_are_not_floats() {
        assert_eq!(
            kinds("i, 1..5"),
            vec![
                TokenKind::Ident("i".into()),
                TokenKind::Comma,
                TokenKind::Int(1),
                TokenKind::DotDot,
                TokenKind::Int(5),
                TokenKind::Eof,
            ]
        );
        assert_eq!(kinds("2.5")[0], TokenKind::Float(2.5));
    }

    #[test]
    fn keywords_and_identifiers() {
        assert_eq!(
            kinds("Mod Module while skip skipper return true false"),
            vec![
                TokenKind::KwMod,
                TokenKind::Ident("Module".into()),
                TokenKind::KwWhile,
                TokenKind::KwSkip,
                TokenKind::Ident("skipper".into()),
                TokenKind::KwReturn,
                TokenKind::KwTrue,
                TokenKind::KwFalse,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes_and_quotes() {
        let toks = kinds(r#""a\n\t\"" 'it\'s'"#);
        assert_eq!(toks[0], TokenKind::Str("a\n\t\"".into()));
        assert_eq!(toks[1], TokenKind::Str("it's".into()));
    }

    #[test]
    fn comments_are_skipped_and_count_as_line_breaks() {
        let toks = Lexer::new("a /* one\ntwo */ b // tail\nc d").lex().unwrap();
        let names: Vec<_> = toks.iter().map(|t| (&t.kind, t.newline_before)).collect();
        assert_eq!(
            names,
            vec![
                (&TokenKind::Ident("a".into()), false),
                (&TokenKind::Ident("b".into()), true),
                (&TokenKind::Ident("c".into()), true),
                (&TokenKind::Ident("d".into()), false),
                (&TokenKind::Eof, false),
            ]
        );
    }

    #[test]
    fn tokens_carry_line_and_column() {
        let toks = Lexer::new("x := 1\n  y").lex().unwrap();
        assert_eq!((toks[0].line, toks[0].column), (1, 1));
        assert_eq!((toks[2].line, toks[2].column), (1, 6));
        assert_eq!((toks[3].line, toks[3].column), (2, 3));
    }

    #[test]
    fn unterminated_string_aborts_only_that_token() {
        let (toks, errs) = Lexer::new("a := \"oops\nb := 2").lex_all();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].kind, LexErrorKind::UnterminatedString);
        assert_eq!((errs[0].line, errs[0].column), (1, 6));
        let kinds: Vec<_> = toks.into_iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::ColonEq,
                TokenKind::Ident("b".into()),
                TokenKind::ColonEq,
                TokenKind::Int(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn invalid_characters_and_malformed_numbers() {
        let (_, errs) = Lexer::new("a @ 12ab 1.2.3 99999999999999999999 \"\\q\"").lex_all();
        let got: Vec<_> = errs.iter().map(|e| e.kind).collect();
        assert_eq!(
            got,
            vec![
                LexErrorKind::InvalidChar,
                LexErrorKind::MalformedNumber,
                LexErrorKind::MalformedNumber,
                LexErrorKind::MalformedNumber,
                LexErrorKind::InvalidChar,
            ]
        );
        assert!(errs[1].message.contains("12ab"), "{}", errs[1].message);
    }

    #[test]
    fn unterminated_block_comment_is_reported() {
        let err = Lexer::new("a /* never closed").lex().unwrap_err();
        assert_eq!(err.kind, LexErrorKind::InvalidChar);
        assert!(err.message.contains("block comment"));
    }

    #[test]
    fn lexer_is_lazy_and_restartable() {
        let mut lexer = Lexer::new("x y z");
        let first = lexer.next().unwrap().unwrap();
        assert_eq!(first.kind, TokenKind::Ident("x".into()));

        let again: Vec<_> = lexer.restart().map(|t| t.unwrap().kind).collect();
        assert_eq!(again.len(), 4);
        assert_eq!(again[0], TokenKind::Ident("x".into()));

        let rest: Vec<_> = lexer.map(|t| t.unwrap().kind).collect();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest.last(), Some(&TokenKind::Eof));
    }
}
