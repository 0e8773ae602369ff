use std::collections::HashMap;
use std::sync::Arc;

use ark_ast::ImportStmt;
use ark_core::{
    analyze, ArtifactRef, CheckedUnit, ImportFailure, ModuleId, ModuleInterface, ModuleResolver,
    NoImports, ProcInfo, SemanticError, SemanticErrorKind, Type,
};

#[derive(Default)]
struct MapResolver {
    modules: HashMap<String, Result<Arc<ModuleInterface>, ImportFailure>>,
}

impl MapResolver {
    fn with_unit(mut self, path: &str, src: &str) -> Self {
        let unit = check_module(path, src, &NoImports).expect("dependency should check");
        self.modules
            .insert(path.to_string(), Ok(Arc::clone(&unit.interface)));
        self
    }

    fn with_failure(mut self, path: &str, failure: ImportFailure) -> Self {
        self.modules.insert(path.to_string(), Err(failure));
        self
    }
}

impl ModuleResolver for MapResolver {
    fn resolve(
        &self,
        _importer: &ModuleId,
        import: &ImportStmt,
    ) -> Result<Arc<ModuleInterface>, ImportFailure> {
        self.modules
            .get(&import.path)
            .cloned()
            .unwrap_or_else(|| Err(ImportFailure::NotFound(import.path.clone())))
    }

    fn interface(&self, module: &ModuleId) -> Option<Arc<ModuleInterface>> {
        self.modules
            .values()
            .filter_map(|r| r.as_ref().ok())
            .find(|i| &i.module == module)
            .cloned()
    }
}

fn check_module(
    module: &str,
    src: &str,
    resolver: &dyn ModuleResolver,
) -> Result<CheckedUnit, Vec<SemanticError>> {
    let program = ark_parse::parse_source(src).expect("source should parse");
    analyze(ModuleId::new(module), program, resolver)
}

fn check(src: &str) -> Result<CheckedUnit, Vec<SemanticError>> {
    check_module("main", src, &NoImports)
}

fn error_kinds(src: &str) -> Vec<SemanticErrorKind> {
    check(src)
        .expect_err("expected semantic errors")
        .iter()
        .map(|e| e.kind)
        .collect()
}

fn proc_named<'u>(unit: &'u CheckedUnit, name: &str) -> &'u ProcInfo {
    unit.procs
        .iter()
        .find(|p| p.name == name)
        .unwrap_or_else(|| panic!("no procedure `{name}`"))
}

fn capture_names(unit: &CheckedUnit, name: &str) -> Vec<String> {
    proc_named(unit, name)
        .captures
        .iter()
        .map(|s| unit.symbol(*s).name.clone())
        .collect()
}

#[test]
fn nested_procedures_record_captures() {
    let src = r#"
outer() {
    n := 1
    step ::= 2
    inner() { return n + step }
    return inner()
}
"#;
    let unit = check(src).expect("should check");
    assert_eq!(capture_names(&unit, "inner"), vec!["n", "step"]);
    assert!(proc_named(&unit, "outer").captures.is_empty());
}

#[test]
fn captures_propagate_through_intermediate_procedures() {
    let src = r#"
outer() {
    n := 1
    mid() {
        deep() { return n }
        return deep()
    }
    return mid()
}
"#;
    let unit = check(src).expect("should check");
    assert_eq!(capture_names(&unit, "deep"), vec!["n"]);
    assert_eq!(capture_names(&unit, "mid"), vec!["n"]);
}

#[test]
fn captured_variables_are_immutable() {
    let src = "outer() {\n    n := 1\n    bump() { n = 2 }\n    bump()\n}\n";
    let errors = check(src).expect_err("captured writes are rejected");
    assert_eq!(errors[0].kind, SemanticErrorKind::ImmutableAssignment);
    assert!(errors[0].message.contains("captured"), "{}", errors[0].message);
}

#[test]
fn lists_cannot_be_captured() {
    let src = "outer() {\n    xs: [int] = [1]\n    size() { return len(xs) }\n    return size()\n}\n";
    let errors = check(src).expect_err("list capture is rejected");
    assert_eq!(errors[0].kind, SemanticErrorKind::TypeMismatch);
    assert!(errors[0].message.contains("capture"), "{}", errors[0].message);
}

const COUNTER: &str = r#"
Counter :: {
    n := 0
    bump() { .n = .n + 1 }
    twice() { .bump(); .bump() }
    get() { return .n }
}
"#;

#[test]
fn mutating_methods_are_inferred_transitively() {
    let unit = check(COUNTER).expect("should check");
    let counter = unit
        .interface
        .artifacts
        .get("Counter")
        .expect("Counter is exported");
    let mutating: Vec<_> = counter
        .methods
        .iter()
        .map(|m| (m.name.as_str(), m.mutates_self))
        .collect();
    assert_eq!(
        mutating,
        vec![("bump", true), ("twice", true), ("get", false)]
    );
}

#[test]
fn mutating_methods_need_a_mutable_receiver() {
    let src = format!("{COUNTER}c ::= Counter()\nprint(c.get())\nc.twice()\n");
    let errors = check(&src).expect_err("immutable receiver");
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].kind, SemanticErrorKind::ImmutableAssignment);
    assert!(errors[0].message.contains("twice"), "{}", errors[0].message);

    let src = format!("{COUNTER}d := Counter()\nd.twice()\nprint(d.get())\n");
    check(&src).expect("mutable receiver is fine");
}

#[test]
fn break_outside_a_loop_is_reported_inside_conditionals() {
    let kinds = error_kinds("f() {\n    true {\n        break\n    }\n}\n");
    assert_eq!(kinds, vec![SemanticErrorKind::ControlOutsideLoop]);

    check("f() {\n    i, 1 .. 3 {\n        i == 2 { skip }\n    }\n}\n")
        .expect("skip inside a range loop");
}

#[test]
fn literal_indices_are_range_checked() {
    let kinds = error_kinds("a := [1, 2, 3]\nprint(a[0])\nprint(a[4])\nprint(a[3])\n");
    assert_eq!(
        kinds,
        vec![
            SemanticErrorKind::ConstantIndexOutOfRange,
            SemanticErrorKind::ConstantIndexOutOfRange,
        ]
    );
}

#[test]
fn fixed_arrays_check_their_size() {
    let kinds = error_kinds("a: [int; 3] = [1, 2]\n");
    assert_eq!(kinds, vec![SemanticErrorKind::ArraySizeMismatch]);

    let kinds = error_kinds("a := [1, 2]\nb: [int; 3] = [1, 2, 3]\nb = a\n");
    assert_eq!(kinds, vec![SemanticErrorKind::ArraySizeMismatch]);
}

#[test]
fn fixed_arrays_have_a_size_limit() {
    let kinds = error_kinds("big: [int; 9999999999]\n");
    assert_eq!(kinds, vec![SemanticErrorKind::ArraySizeMismatch]);

    check("edge: [int; 65536]\nprint(len(edge))\n").expect("the limit itself is allowed");
}

#[test]
fn immutable_lists_cannot_grow() {
    let kinds = error_kinds("xs :: [int] = [1]\nxs.push(2)\n");
    assert_eq!(kinds, vec![SemanticErrorKind::ImmutableAssignment]);

    let unit = check("xs: [int] = []\nxs.push(2)\nlast := xs.pop()\n").expect("should check");
    assert_eq!(
        unit.interface.globals.get("last").map(|g| g.ty.clone()),
        Some(Type::Int)
    );
}

#[test]
fn enums_and_namespaces_resolve_statically() {
    let src = r#"
Color :: { Red, Green = 5, Blue }
Geo :: { pi ::= 3.14; area(r: float): float { return .pi * r * r } }
c := Color.Blue
same := c == Color.Red
a := Geo.area(2)
"#;
    let unit = check(src).expect("should check");
    let color = unit.interface.artifacts.get("Color").expect("Color");
    assert_eq!(color.case("Blue"), Some(6));
    let globals = &unit.interface.globals;
    assert_eq!(
        globals.get("c").map(|g| g.ty.clone()),
        Some(Type::Artifact(ArtifactRef {
            module: ModuleId::new("main"),
            name: "Color".to_string(),
        }))
    );
    assert_eq!(globals.get("same").map(|g| g.ty.clone()), Some(Type::Bool));
    assert_eq!(globals.get("a").map(|g| g.ty.clone()), Some(Type::Float));

    let kinds = error_kinds("Color :: { Red, Blue }\nx := Color.Red < Color.Blue\n");
    assert_eq!(kinds, vec![SemanticErrorKind::TypeMismatch]);
}

#[test]
fn unknown_properties_are_reported() {
    let kinds = error_kinds("Point :: {\n    x := 0\n    y := 0\n}\np := Point()\nprint(p.z)\n");
    assert_eq!(kinds, vec![SemanticErrorKind::UnknownProperty]);

    let kinds = error_kinds("f() { return .x }\n");
    assert_eq!(kinds, vec![SemanticErrorKind::UnknownProperty]);
}

#[test]
fn records_cannot_hold_lists_or_themselves() {
    let kinds = error_kinds("Bag :: { items: [int] }\n");
    assert_eq!(kinds, vec![SemanticErrorKind::TypeMismatch]);

    let errors = check("Node :: { next: Node }\n").expect_err("self containment");
    assert!(errors[0].message.contains("itself"), "{}", errors[0].message);
}

#[test]
fn user_procedures_shadow_builtins() {
    check("len(x: int) { return x }\nprint(len(3))\n").expect("user `len` wins");
}

const UTIL: &str = r#"
double(n: int) { return n * 2 }
limit ::= 10
Box :: { v := 0 }
"#;

#[test]
fn imported_members_resolve_through_the_interface() {
    let resolver = MapResolver::default().with_unit("util", UTIL);
    let src = "Mod util\nx := util.double(util.limit)\nb := util.Box(3)\nprint(b.v)\nk: util.Box = b\n";
    let unit = check_module("main", src, &resolver).expect("should check");
    assert_eq!(
        unit.interface.globals.get("x").map(|g| g.ty.clone()),
        Some(Type::Int)
    );

    let kinds: Vec<_> = check_module("main", "Mod util\nutil.limit = 3\n", &resolver)
        .expect_err("imported globals are immutable")
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![SemanticErrorKind::ImmutableAssignment]);
}

#[test]
fn unresolvable_imports_are_classified() {
    let resolver = MapResolver::default()
        .with_failure("loop", ImportFailure::Circular("loop".to_string()));

    let errors = check_module("main", "Mod loop\n", &resolver).expect_err("cycle");
    assert_eq!(errors[0].kind, SemanticErrorKind::CircularImport);

    let errors = check_module("main", "Mod missing\n", &resolver).expect_err("not found");
    assert_eq!(errors[0].kind, SemanticErrorKind::UndefinedSymbol);
    assert!(errors[0].message.contains("missing"), "{}", errors[0].message);
}

#[test]
fn failed_imports_do_not_cascade() {
    let resolver = MapResolver::default().with_failure("broken", ImportFailure::Failed);
    check_module("main", "Mod broken\nx := broken.anything(1)\n", &resolver)
        .expect("members of a failed import are silently unknown");
}
