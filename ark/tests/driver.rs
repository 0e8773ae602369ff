use std::fs;
use std::path::Path;

use ark::{
    CompileConfig, CompileFailure, LoadError, MemoryLoader, ModuleLoader, Phase, check_entry, check_file, check_source,
    compile_entry, compile_file, compile_source,
};
use proptest::{
    prelude::any,
    test_runner::{Config, TestCaseError, TestRunner},
};

fn check_fails(loader: &MemoryLoader) -> CompileFailure {
    check_entry(Path::new("main.ark"), loader, &CompileConfig::default())
        .expect_err("program should be rejected")
}

fn kinds(failure: &CompileFailure) -> Vec<(String, String)> {
    failure
        .diagnostics
        .iter()
        .map(|d| (d.unit.clone(), d.kind.clone()))
        .collect()
}

#[test]
fn single_source_compiles_to_c() {
    let src = "greet(name = \"World\") {\n  print(\"Hello, \" + name)\n}\ngreet()\n";
    let out = compile_source(src, &CompileConfig::default()).expect("program should compile");
    assert_eq!(out.units.len(), 1);
    assert_eq!(out.units[0].module.as_str(), "main");
    assert!(out.c.program_c.contains("ark_4main_5greet__a1();"), "{}", out.c.program_c);
    assert!(out.c.runtime_c.contains("ark_rt_concat"));
}

#[test]
fn dependencies_come_before_their_importers() {
    let loader = MemoryLoader::new()
        .with("main.ark", "Mod util\nprint(util.double(util.limit))\n")
        .with("util.ark", "double(n: int) { return n * 2 }\nlimit ::= 10\n");
    let out = compile_entry(Path::new("main.ark"), &loader, &CompileConfig::default())
        .expect("program should compile");

    let order: Vec<_> = out.units.iter().map(|u| u.module.as_str()).collect();
    assert_eq!(order, vec!["util", "main"]);
    assert!(
        out.c
            .program_c
            .contains("ark_print_int(ark_4util_6double(ark_4util_5limit));"),
        "{}",
        out.c.program_c
    );
}

#[test]
fn nested_paths_name_their_modules() {
    let loader = MemoryLoader::new()
        .with("app/main.ark", "Mod \"lib/geo\"\nprint(geo.area(2, 3))\n")
        .with("app/lib/geo.ark", "area(w: int, h: int) { return w * h }\n");
    let out = compile_entry(Path::new("app/main.ark"), &loader, &CompileConfig::default())
        .expect("program should compile");
    assert_eq!(out.units[0].module.as_str(), "lib/geo");
    assert!(out.c.program_c.contains("ark_3lib3geo_4area("), "{}", out.c.program_c);
}

#[test]
fn bare_imports_use_the_search_root() {
    let loader = MemoryLoader::new()
        .with("src/main.ark", "Mod util\nprint(util.limit)\n")
        .with("std/util.ark", "limit ::= 3\n");
    let config = CompileConfig {
        search_root: Some("std".into()),
        ..CompileConfig::default()
    };
    let checked = check_entry(Path::new("src/main.ark"), &loader, &config)
        .expect("util resolves under the search root");
    assert_eq!(checked.units.len(), 2);
    assert_eq!(checked.units[0].module.as_str(), "util");
}

#[test]
fn cycles_are_reported_at_every_import_on_them() {
    let loader = MemoryLoader::new()
        .with("main.ark", "Mod a\nprint(1)\n")
        .with("a.ark", "Mod b\nx ::= 1\n")
        .with("b.ark", "y ::= 2\nMod a\n");
    let failure = check_fails(&loader);

    assert_eq!(
        kinds(&failure),
        vec![
            ("a.ark".to_string(), "CircularImport".to_string()),
            ("b.ark".to_string(), "CircularImport".to_string()),
        ]
    );
    let b = &failure.diagnostics[1];
    assert_eq!((b.line, b.column), (2, 1));
    assert_eq!(failure.count(Phase::Semantic), 2);
}

#[test]
fn a_failed_dependency_does_not_cascade() {
    let loader = MemoryLoader::new()
        .with("main.ark", "Mod util\nprint(util.limit)\n")
        .with("util.ark", "limit ::= 3\nlimit = 4\n");
    let failure = check_fails(&loader);
    assert_eq!(
        kinds(&failure),
        vec![("util.ark".to_string(), "ImmutableAssignment".to_string())]
    );
}

#[test]
fn missing_modules_are_undefined() {
    let loader = MemoryLoader::new().with("main.ark", "Mod nowhere\n");
    let failure = check_fails(&loader);
    let d = &failure.diagnostics[0];
    assert_eq!(d.kind, "UndefinedSymbol");
    assert!(d.message.contains("nowhere"), "{}", d.message);
}

#[test]
fn syntax_errors_in_one_unit_leave_siblings_checked() {
    let loader = MemoryLoader::new()
        .with("main.ark", "Mod good\nMod bad\n")
        .with("good.ark", "z ::= 1\nz = 2\n")
        .with("bad.ark", "q := )\n");
    let failure = check_fails(&loader);
    assert_eq!(
        kinds(&failure),
        vec![
            ("good.ark".to_string(), "ImmutableAssignment".to_string()),
            ("bad.ark".to_string(), "UnexpectedToken".to_string()),
        ]
    );
    assert_eq!(failure.count(Phase::Parse), 1);
}

#[test]
fn a_malformed_number_is_one_lex_error() {
    let failure = check_source("print(str(1.0) + \"|\" + 1e0)\n", &CompileConfig::default())
        .expect_err("`1e0` is not a number literal");
    assert_eq!(failure.diagnostics.len(), 1, "{:?}", failure.diagnostics);
    let d = &failure.diagnostics[0];
    assert_eq!((d.phase, d.kind.as_str()), (Phase::Lex, "MalformedNumber"));
    assert_eq!((d.line, d.column), (1, 24));
}

#[test]
fn the_dialect_is_chosen_by_configuration() {
    let inferred = "x := 1\nprint(x)\n";
    check_source(inferred, &CompileConfig::default()).expect("inferred source, inferred dialect");

    let failure = check_source(inferred, &CompileConfig::strict())
        .expect_err("inferred declarations are not strict syntax");
    assert_eq!(failure.diagnostics[0].kind, "DialectMismatch");
    assert_eq!(failure.diagnostics[0].phase, Phase::Parse);

    check_source("x: int = 1\nprint(x)\n", &CompileConfig::strict())
        .expect("strict source, strict dialect");
}

#[test]
fn failures_render_and_serialize() {
    let failure = check_source("x ::= 1\nx = 2\n", &CompileConfig::default())
        .expect_err("assignment to an immutable binding");
    let text = failure.render();
    assert!(text.contains("main.ark"), "{text}");
    assert!(text.contains("x = 2"), "{text}");

    let json = failure.to_report().to_json().expect("serializable");
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    let d = &value["diagnostics"][0];
    assert_eq!(d["phase"], "semantic");
    assert_eq!(d["kind"], "ImmutableAssignment");
    assert_eq!(d["line"], 2);
}

#[test]
fn files_on_disk_follow_the_manifest() {
    let dir = tempfile::tempdir().expect("temp dir");
    let root = dir.path();
    fs::create_dir_all(root.join("src")).expect("src dir");
    fs::create_dir_all(root.join("lib")).expect("lib dir");
    fs::write(
        root.join("ark.toml"),
        "[project]\nname = \"demo\"\ndialect = \"strict\"\nsearch_root = \"lib\"\n",
    )
    .expect("manifest");
    fs::write(
        root.join("lib/util.ark"),
        "twice(n: int): int {\n  return n * 2\n}\n",
    )
    .expect("util");
    fs::write(root.join("src/main.ark"), "Mod util\ny: int = util.twice(21)\nprint(y)\n")
        .expect("main");

    let out = compile_file(&root.join("src/main.ark")).expect("project should compile");
    assert_eq!(out.units.len(), 2);
    assert_eq!(out.units[0].module.as_str(), "util");

    let written = out.write_to(&root.join("build")).expect("output written");
    assert_eq!(written.len(), 3);
    for path in &written {
        assert!(path.is_file(), "{} missing", path.display());
    }
    let program = fs::read_to_string(root.join("build/program.c")).expect("program.c");
    assert!(program.contains("ark_4util_5twice("), "{program}");
}

#[test]
fn bad_manifests_are_config_errors() {
    let dir = tempfile::tempdir().expect("temp dir");
    fs::write(dir.path().join("ark.toml"), "[project]\ndialect = \"loose\"\n").expect("manifest");
    fs::write(dir.path().join("main.ark"), "print(1)\n").expect("main");

    let failure = check_file(&dir.path().join("main.ark")).expect_err("manifest is invalid");
    assert_eq!(failure.diagnostics[0].phase, Phase::Config);
}

#[test]
fn cycles_on_disk_terminate() {
    let dir = tempfile::tempdir().expect("temp dir");
    fs::write(dir.path().join("main.ark"), "Mod main\n").expect("main");

    let failure = check_file(&dir.path().join("main.ark")).expect_err("self import");
    assert_eq!(failure.diagnostics[0].kind, "CircularImport");
}

struct RefusingLoader(MemoryLoader);

impl ModuleLoader for RefusingLoader {
    fn load(&self, path: &Path) -> Result<String, LoadError> {
        if path.ends_with("guarded.ark") {
            return Err(LoadError::circular(path));
        }
        self.0.load(path)
    }
}

#[test]
fn loader_reported_cycles_are_circular_imports() {
    let loader = RefusingLoader(MemoryLoader::new().with("main.ark", "x ::= 1\nMod guarded\n"));
    let failure = check_entry(Path::new("main.ark"), &loader, &CompileConfig::default())
        .expect_err("the loader refuses the import");
    let d = &failure.diagnostics[0];
    assert_eq!(d.kind, "CircularImport");
    assert_eq!((d.line, d.column), (2, 1));
}

/// `main` imports `m0`, each `m{i}` imports `m{i+1}`, and the last module
/// optionally closes a cycle back to `m{back}`.
fn chain(len: usize, back: Option<usize>) -> MemoryLoader {
    let mut loader = MemoryLoader::new().with("main.ark", "Mod m0\nprint(m0.v0)\n");
    for i in 0..len {
        let next = if i + 1 < len { Some(i + 1) } else { back };
        let import = next.map(|n| format!("Mod m{n}\n")).unwrap_or_default();
        loader.insert(format!("m{i}.ark"), format!("{import}v{i} ::= {i}\n"));
    }
    loader
}

#[test]
fn import_chains_are_ordered_or_rejected_as_cycles() {
    let mut runner = TestRunner::new(Config {
        cases: 64,
        ..Config::default()
    });
    let strat = (1usize..8, any::<bool>(), any::<u32>());

    runner
        .run(&strat, |(len, cyclic, pick)| {
            let back = cyclic.then(|| pick as usize % len);
            let result = check_entry(Path::new("main.ark"), &chain(len, back), &CompileConfig::default());

            match (back, result) {
                (None, Ok(checked)) => {
                    let order: Vec<String> =
                        checked.units.iter().map(|u| u.module.to_string()).collect();
                    let mut expected: Vec<String> = (0..len).rev().map(|i| format!("m{i}")).collect();
                    expected.push("main".to_string());
                    if order != expected {
                        return Err(TestCaseError::fail(format!("bad order {order:?}")));
                    }
                }
                (Some(k), Err(failure)) => {
                    let all_circular = failure.diagnostics.iter().all(|d| d.kind == "CircularImport");
                    if !all_circular || failure.diagnostics.len() != len - k {
                        return Err(TestCaseError::fail(format!(
                            "cycle from m{k} in {len} modules: {:?}",
                            failure.diagnostics
                        )));
                    }
                }
                (back, result) => {
                    return Err(TestCaseError::fail(format!(
                        "back edge {back:?} gave ok = {}",
                        result.is_ok()
                    )));
                }
            }
            Ok(())
        })
        .unwrap_or_else(|e| panic!("import chain property failed: {e}"));
}

#[test]
fn independent_units_in_one_level_all_report() {
    let mut loader = MemoryLoader::new();
    let mut main = String::new();
    for i in 0..6 {
        main.push_str(&format!("Mod u{i}\n"));
        loader.insert(format!("u{i}.ark"), format!("k{i} ::= {i}\nk{i} = 0\n"));
    }
    loader.insert("main.ark", main);

    let failure = check_fails(&loader);
    let units: Vec<_> = failure.diagnostics.iter().map(|d| d.unit.as_str()).collect();
    assert_eq!(units, vec!["u0.ark", "u1.ark", "u2.ark", "u3.ark", "u4.ark", "u5.ark"]);
}
