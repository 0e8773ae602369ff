use ark_ast::{ArtifactKind, ExprKind, Stmt, TypeRefKind};
use ark_parse::{
    parse_source, parse_source_with_config, parse_source_with_recovery, ParseConfig,
    ParseErrorKind,
};

fn parse_err_kind(src: &str, config: &ParseConfig) -> ParseErrorKind {
    let out = parse_source_with_recovery(src, config);
    assert!(out.lex_errors.is_empty(), "unexpected lex errors: {:?}", out.lex_errors);
    out.errors
        .first()
        .map(|e| e.kind)
        .unwrap_or_else(|| panic!("expected a parse error for {src:?}"))
}

#[test]
fn inferred_declarations_parse() {
    let src = "x := 1\ny ::= 2.5\nz: int\nw :: string = \"hi\"\n";
    let program = parse_source(src).expect("inferred declarations should parse");
    let vars: Vec<_> = program
        .stmts
        .iter()
        .map(|s| match s {
            Stmt::Var(v) => (v.name.node.as_str(), v.mutable, v.ty.is_some(), v.value.is_some()),
            other => panic!("expected declaration, got {other:?}"),
        })
        .collect();
    assert_eq!(
        vars,
        vec![
            ("x", true, false, true),
            ("y", false, false, true),
            ("z", true, true, false),
            ("w", false, true, true),
        ]
    );
}

#[test]
fn strict_dialect_rejects_inferred_forms() {
    let strict = ParseConfig::strict();
    for src in [
        "x := 1\n",
        "x ::= 1\n",
        "x: int\n",
        "f(a: int) { return a }\n",
        "f(a = 1): int { return a }\n",
    ] {
        assert_eq!(
            parse_err_kind(src, &strict),
            ParseErrorKind::DialectMismatch,
            "{src:?}"
        );
    }
    parse_source_with_config("x: int = 1\ny :: int = 2\n", &strict)
        .expect("strict declarations should parse");
}

#[test]
fn inferred_dialect_rejects_procedure_types() {
    let err = parse_err_kind("cb: (int) -> int\n", &ParseConfig::default());
    assert_eq!(err, ParseErrorKind::DialectMismatch);

    let program = parse_source_with_config(
        "apply(f: (int, int) -> int, x: int): int { return f(x, x) }\n",
        &ParseConfig::strict(),
    )
    .expect("procedure types are strict-only");
    let Stmt::Proc(p) = &program.stmts[0] else {
        panic!("expected procedure");
    };
    assert!(matches!(
        p.params[0].ty.as_ref().map(|t| &t.kind),
        Some(TypeRefKind::Proc { params, .. }) if params.len() == 2
    ));
}

#[test]
fn immutable_declaration_without_value_is_rejected() {
    let err = parse_source("x :: int\n").expect_err("expected parse error");
    assert!(err.to_string().contains("needs a value"), "{err}");
}

#[test]
fn procedure_with_defaults_parses() {
    let src = "greet(name = \"World\", times: int = 1) {\n    print(\"Hello, \" + name)\n}\n";
    let program = parse_source(src).expect("defaults should parse");
    let Stmt::Proc(p) = &program.stmts[0] else {
        panic!("expected procedure");
    };
    assert_eq!(p.name.node, "greet");
    assert_eq!(p.params.len(), 2);
    assert!(p.params.iter().all(|p| p.default.is_some()));
    assert!(p.ret.is_none());
}

#[test]
fn required_parameter_after_default_is_rejected() {
    let err = parse_err_kind("f(a = 1, b: int) {}\n", &ParseConfig::default());
    assert_eq!(err, ParseErrorKind::UnexpectedToken);
}

#[test]
fn call_followed_by_block_on_same_line_is_a_conditional() {
    let program = parse_source("ready(x) {\n    go()\n}\n").expect("should parse");
    assert!(matches!(&program.stmts[0], Stmt::Cond(_)));

    let program = parse_source("ready(x: int) {\n    go()\n}\n").expect("should parse");
    assert!(matches!(&program.stmts[0], Stmt::Proc(_)));
}

#[test]
fn chain_arms_keep_declared_order() {
    let src = "|> a { x = 1 } |> b { x = 2 } |> { x = 3 }\n";
    let program = parse_source(src).expect("chain should parse");
    let Stmt::Chain(chain) = &program.stmts[0] else {
        panic!("expected chain");
    };
    let conds: Vec<_> = chain
        .arms
        .iter()
        .map(|arm| match &arm.cond.kind {
            ExprKind::Ident(name) => name.as_str(),
            other => panic!("unexpected condition {other:?}"),
        })
        .collect();
    assert_eq!(conds, vec!["a", "b"]);
    assert!(chain.fallback.is_some());
}

#[test]
fn chain_fallback_must_be_last() {
    let err = parse_source("|> { x = 1 } |> a { x = 2 }\n").expect_err("expected parse error");
    assert!(err.to_string().contains("last arm"), "{err}");
}

#[test]
fn conditional_directly_after_chain_is_rejected() {
    let err = parse_err_kind("|> a { x = 1 }\nb { x = 2 }\n", &ParseConfig::default());
    assert_eq!(err, ParseErrorKind::UnexpectedToken);
}

#[test]
fn chained_assignment_is_rejected() {
    let err = parse_source("a = b = 1\n").expect_err("expected parse error");
    assert!(err.to_string().contains("chained"), "{err}");
}

#[test]
fn range_for_and_while_parse() {
    let src = "i, 1 .. n + 1 {\n    skip\n}\nwhile i < 10 {\n    break\n}\n";
    let program = parse_source(src).expect("loops should parse");
    let Stmt::RangeFor(r) = &program.stmts[0] else {
        panic!("expected range-for");
    };
    assert_eq!(r.var.node, "i");
    assert!(matches!(r.end.kind, ExprKind::Binary { .. }));
    assert!(matches!(&program.stmts[1], Stmt::While(_)));
}

#[test]
fn artifact_kinds_are_classified() {
    let src = r#"
Color :: { Red, Green = 5, Blue }
Point :: {
    x := 0
    y := 0
    norm() { return .x * .x + .y * .y }
}
Geo :: { pi ::= 3.14; area(r: float): float { return .pi * r * r } }
"#;
    let program = parse_source(src).expect("artifacts should parse");
    let kinds: Vec<_> = program
        .stmts
        .iter()
        .filter_map(|s| match s {
            Stmt::Artifact(a) => Some((a.name.node.as_str(), a.kind)),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("Color", ArtifactKind::Enum),
            ("Point", ArtifactKind::Record),
            ("Geo", ArtifactKind::Namespace),
        ]
    );
}

#[test]
fn enum_cases_cannot_mix_with_properties() {
    let err = parse_source("Bad :: { A, x := 1 }\n").expect_err("expected parse error");
    assert!(err.to_string().contains("mixed"), "{err}");
}

#[test]
fn imports_take_bare_slash_and_quoted_paths() {
    let src = "Mod math\nMod util/strings\nMod \"lib/geo.ark\"\n";
    let program = parse_source(src).expect("imports should parse");
    let imports: Vec<_> = program
        .stmts
        .iter()
        .map(|s| match s {
            Stmt::Import(i) => (i.path.as_str(), i.alias.node.as_str(), i.is_rooted()),
            other => panic!("expected import, got {other:?}"),
        })
        .collect();
    assert_eq!(
        imports,
        vec![
            ("math", "math", true),
            ("util/strings", "strings", false),
            ("lib/geo.ark", "geo", false),
        ]
    );
}

#[test]
fn postfix_does_not_reach_across_lines() {
    let program = parse_source("f\n(x)\n").expect("should parse");
    assert_eq!(program.stmts.len(), 2);
    let program = parse_source("xs\n[1]\n").expect("should parse");
    assert_eq!(program.stmts.len(), 2);
}

#[test]
fn statements_on_one_line_need_a_separator() {
    parse_source("a := 1; b := 2\n").expect("semicolon separates statements");
    let err = parse_source("a := 1 b := 2\n").expect_err("expected parse error");
    assert!(err.to_string().contains("line break"), "{err}");
}

#[test]
fn unclosed_block_is_unbalanced() {
    let err = parse_err_kind("f() {\n    x := 1\n", &ParseConfig::default());
    assert_eq!(err, ParseErrorKind::UnbalancedBlock);
    let err = parse_err_kind("x := 1\n}\n", &ParseConfig::default());
    assert_eq!(err, ParseErrorKind::UnbalancedBlock);
}

#[test]
fn recovery_continues_inside_blocks() {
    let src = "f() {\n    a := )\n    b := 2\n}\nc := 3\n";
    let out = parse_source_with_recovery(src, &ParseConfig::default());
    assert_eq!(out.errors.len(), 1);
    assert_eq!(out.errors[0].line, 2);
    assert_eq!(out.program.stmts.len(), 2);
    let Stmt::Proc(p) = &out.program.stmts[0] else {
        panic!("expected procedure");
    };
    assert_eq!(p.body.stmts.len(), 1);
}

#[test]
fn errors_carry_line_and_column() {
    let out = parse_source_with_recovery("x := 1\ny := * 2\n", &ParseConfig::default());
    let err = &out.errors[0];
    assert_eq!((err.line, err.column), (2, 6));
    assert!(err.message.contains("`*`"), "{}", err.message);
}

#[test]
fn self_property_and_member_access() {
    let program = parse_source("p.x = .y + q.z\n").expect("should parse");
    let Stmt::Assign(a) = &program.stmts[0] else {
        panic!("expected assignment");
    };
    assert!(matches!(a.target.kind, ExprKind::Member { .. }));
    let ExprKind::Binary { left, .. } = &a.value.kind else {
        panic!("expected binary");
    };
    assert!(matches!(&left.kind, ExprKind::SelfProp(name) if name.node == "y"));
}

#[test]
fn imports_and_artifacts_stay_at_module_level() {
    let config = ParseConfig::default();
    let out = parse_source_with_recovery("f() {\n  Mod util\n}\n", &config);
    assert_eq!(out.errors.len(), 1, "{:?}", out.errors);
    assert!(out.errors[0].message.contains("module level"), "{}", out.errors[0].message);

    assert_eq!(
        parse_err_kind("{\n  P :: { x := 1 }\n}\n", &config),
        ParseErrorKind::UnexpectedToken
    );
}
