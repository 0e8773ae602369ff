use std::process::Command;
use std::sync::Arc;

use ark_ast::ImportStmt;
use ark_backend_c::{emit_program, CArtifacts, PROGRAM_SOURCE, RUNTIME_HEADER};
use ark_core::{
    analyze, CheckedUnit, ImportFailure, ModuleId, ModuleInterface, ModuleResolver, NoImports,
};

fn check_module(module: &str, src: &str, resolver: &dyn ModuleResolver) -> CheckedUnit {
    let program = ark_parse::parse_source(src).expect("source should parse");
    analyze(ModuleId::new(module), program, resolver).expect("source should check")
}

fn lower(src: &str) -> CArtifacts {
    let unit = check_module("main", src, &NoImports);
    emit_program(&[unit]).expect("lowering should succeed")
}

fn pos(haystack: &str, needle: &str) -> usize {
    haystack
        .find(needle)
        .unwrap_or_else(|| panic!("missing `{needle}` in:\n{haystack}"))
}

fn assert_has(haystack: &str, needle: &str) {
    pos(haystack, needle);
}

#[test]
fn chains_lower_to_if_else_in_declared_order() {
    let c = lower("x := 2\n|> x == 1 { print(1) } |> x == 2 { print(2) } |> { print(3) }\n").program_c;
    let first = pos(&c, "if (ark_4main_1x == INT64_C(1)) {");
    let second = pos(&c, "} else if (ark_4main_1x == INT64_C(2)) {");
    let fallback = pos(&c, "} else {");
    assert!(first < second && second < fallback, "{c}");
}

#[test]
fn omitted_arguments_go_through_a_dispatcher() {
    let c = lower("greet(name = \"World\") {\n  print(\"Hello, \" + name)\n}\ngreet()\n").program_c;
    assert_has(&c, "void ark_4main_5greet__a1(void);");
    assert_has(&c, "= \"World\";");
    assert_has(&c, "  ark_4main_5greet__a1();");
    assert_has(&c, "ark_rt_concat(\"Hello, \", l");
}

#[test]
fn indexing_is_one_based_and_checked() {
    let c = lower("a := [1, 2, 3]\nprint(a[2])\n").program_c;
    assert_has(&c, "typedef struct ark_t_A3i { int64_t v[3]; } ark_t_A3i;");
    assert_has(
        &c,
        "ark_print_int((ark_4main_1a).v[ark_rt_index(INT64_C(2), INT64_C(3))]);",
    );

    let c = lower("f() {\n  xs: [int] = [10, 20]\n  xs.push(30)\n  print(xs[1])\n}\n").program_c;
    assert_has(&c, "ark_t_Li_from((int64_t[]){ INT64_C(10), INT64_C(20) }, INT64_C(2))");
    assert_has(&c, "ark_t_Li_push(&(l");
    assert_has(&c, "ark_print_int((*ark_t_Li_at(&(l");
    assert_has(&c, "return &l->data[ark_rt_index(i, l->len)];");
}

#[test]
fn list_places_are_cloned_and_released_on_return() {
    let c = lower("count() {\n  xs: [int] = [1]\n  ys := xs\n  return len(ys)\n}\n").program_c;
    let body = &c[pos(&c, "int64_t ark_4main_5count(void) {")..];
    assert_has(body, "ark_t_Li_clone(l");
    let ret = pos(body, "int64_t t1_ret = (l");
    let done = pos(body, "return t1_ret;");
    let frees = body[ret..done].matches("ark_t_Li_free(&l").count();
    assert_eq!(frees, 2, "{body}");
}

#[test]
fn discarded_list_results_are_dropped() {
    let c = lower("make() {\n  xs: [int] = [1]\n  return xs\n}\nmake()\n").program_c;
    assert_has(&c, "ark_t_Li_drop(ark_4main_4make());");
}

#[test]
fn break_releases_lists_of_the_loop_body() {
    let c = lower("f() {\n  i, 1 .. 3 {\n    xs: [int] = [i]\n    i == 2 { break }\n  }\n}\n").program_c;
    let brk = pos(&c, "break;");
    let before = c[..brk].trim_end();
    let last_line = before.lines().last().unwrap_or_default();
    assert!(last_line.contains("ark_t_Li_free(&l"), "{c}");
}

#[test]
fn range_loops_evaluate_bounds_once() {
    let c = lower("i, 1 .. 5 {\n  print(i)\n}\n").program_c;
    assert_has(&c, "const int64_t t1_start = INT64_C(1);");
    assert_has(&c, "const int64_t t2_end = INT64_C(5);");
    assert_has(&c, "for (int64_t t3_i = t1_start; t3_i <= t2_end; t3_i++) {");
}

#[test]
fn records_become_structs_with_self_pointers() {
    let src = r#"
Counter :: {
    n := 0
    bump() { .n = .n + 1 }
    get() { return .n }
}
c := Counter()
c.bump()
print(c.get())
"#;
    let c = lower(src).program_c;
    assert_has(&c, "struct ark_4main_7Counter {\n  int64_t f_n;\n};");
    assert_has(&c, "ark_4main_7Counter ark_4main_7Counter__default(void);");
    assert_has(&c, "void ark_4main_7Counter4bump(ark_4main_7Counter *self);");
    assert_has(&c, "int64_t ark_4main_7Counter3get(const ark_4main_7Counter *self);");
    assert_has(&c, "self->f_n = ark_rt_add(self->f_n, INT64_C(1));");
    assert_has(&c, "ark_4main_1c = ark_4main_7Counter__default();");
    assert_has(&c, "ark_4main_7Counter4bump(&(ark_4main_1c));");
}

#[test]
fn enums_are_defines_and_literals_are_const() {
    let c = lower("Color :: { Red, Green = 5, Blue }\nc := Color.Blue\nlimit ::= 10\nprint(c)\n").program_c;
    assert_has(&c, "#define ark_4main_5Color3Red INT64_C(0)");
    assert_has(&c, "#define ark_4main_5Color4Blue INT64_C(6)");
    assert_has(&c, "ark_4main_1c = ark_4main_5Color4Blue;");
    assert_has(&c, "const int64_t ark_4main_5limit = INT64_C(10);");
}

#[test]
fn nested_procedures_copy_captures_into_an_environment() {
    let src = "outer() {\n    n := 1\n    inner() { return n + 1 }\n    return inner()\n}\n";
    let c = lower(src).program_c;
    assert_has(&c, "struct ark_env_4main_");
    assert_has(&c, "ark_rt_arena_alloc(sizeof *t1_env);");
    assert_has(&c, "return ark_rt_add(env->c");
    assert_has(&c, "_inner((l");
    assert_has(&c, ").env)");
}

#[test]
fn procedure_values_call_through_their_struct() {
    let c = lower("twice(n: int) { return n * 2 }\nf := twice\nprint(f(3))\n").program_c;
    assert_has(&c, "typedef struct ark_t_P1i_i { void *env; int64_t (*fn)(void *, int64_t); } ark_t_P1i_i;");
    assert_has(&c, "ark_4main_1f = ((ark_t_P1i_i){ NULL, ark_4main_5twice__v });");
    assert_has(&c, "ark_t_P1i_i_call(ark_4main_1f, INT64_C(3))");
}

#[test]
fn scalars_convert_where_the_language_does() {
    let c = lower("x: float = 1\ns := \"a\" + 1\n").program_c;
    assert_has(&c, "((double)INT64_C(1))");
    assert_has(&c, "ark_rt_concat(\"a\", ark_rt_int_str(INT64_C(1)))");
}

struct Single(Arc<ModuleInterface>);

impl ModuleResolver for Single {
    fn resolve(
        &self,
        _importer: &ModuleId,
        import: &ImportStmt,
    ) -> Result<Arc<ModuleInterface>, ImportFailure> {
        if import.path == self.0.module.as_str() {
            Ok(Arc::clone(&self.0))
        } else {
            Err(ImportFailure::NotFound(import.path.clone()))
        }
    }

    fn interface(&self, module: &ModuleId) -> Option<Arc<ModuleInterface>> {
        (module == &self.0.module).then(|| Arc::clone(&self.0))
    }
}

#[test]
fn dependencies_initialize_first() {
    let util = check_module("util", "double(n: int) { return n * 2 }\nlimit ::= 10\n", &NoImports);
    let resolver = Single(Arc::clone(&util.interface));
    let main = check_module("main", "Mod util\nprint(util.double(util.limit))\n", &resolver);

    let out = emit_program(&[util, main]).expect("lowering should succeed");
    let c = &out.program_c;
    assert_has(c, "ark_print_int(ark_4util_6double(ark_4util_5limit));");
    let main_fn = &c[pos(c, "int main(void) {")..];
    let inits = (pos(main_fn, "ark_4util__init();"), pos(main_fn, "ark_4main__init();"));
    let finis = (pos(main_fn, "ark_4util__fini();"), pos(main_fn, "ark_4main__fini();"));
    assert!(inits.0 < inits.1, "{main_fn}");
    assert!(finis.1 < finis.0, "{main_fn}");
}

#[test]
fn artifacts_name_their_files() {
    let out = lower("print(1)\n");
    let names: Vec<_> = out.files().iter().map(|(name, _)| *name).collect();
    assert_eq!(names, vec![RUNTIME_HEADER, "ark_runtime.c", PROGRAM_SOURCE]);
    assert_has(&out.runtime_h, "_Noreturn void ark_rt_fault(const char *what);");
    assert_has(&out.program_c, "#include \"ark_runtime.h\"");
    assert!(emit_program(&[]).is_err());
}

/// Builds and runs the artifacts with the host C compiler. `None` when there
/// is no `cc` on the path.
fn run_with_cc(out: &CArtifacts) -> Option<String> {
    let dir = tempfile::tempdir().expect("temp dir");
    for (name, text) in out.files() {
        std::fs::write(dir.path().join(name), text).expect("artifact written");
    }
    let exe = dir.path().join("prog");
    let build = match Command::new("cc")
        .current_dir(dir.path())
        .args(["-std=c11", "-o"])
        .arg(&exe)
        .args(["ark_runtime.c", PROGRAM_SOURCE, "-lm"])
        .output()
    {
        Ok(build) => build,
        Err(_) => return None,
    };
    assert!(
        build.status.success(),
        "cc failed:\n{}",
        String::from_utf8_lossy(&build.stderr)
    );
    let run = Command::new(&exe).output().expect("program runs");
    assert!(run.status.success(), "program failed");
    Some(String::from_utf8_lossy(&run.stdout).into_owned())
}

#[test]
fn floats_print_in_positional_notation() {
    let out = lower(
        "print(\"v=\" + 100000000.0)\nprint(\"v=\" + 0.00001)\nprint(10 / 3.0)\nprint(2.5)\nprint(3.0)\n",
    );
    assert_has(&out.runtime_c, "snprintf(s, 400, \"%.*f\", decimals, v);");
    assert!(!out.runtime_c.contains("\"%.*g\""));

    if let Some(stdout) = run_with_cc(&out) {
        assert_eq!(
            stdout,
            "v=100000000.0\nv=0.00001\n3.3333333333333335\n2.5\n3.0\n"
        );
    }
}
