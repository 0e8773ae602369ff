#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ark_ast::{ImportStmt, LineIndex, Program, Span, Stmt};
use ark_core::ModuleId;
use ark_parse::{ParseConfig, parse_source_with_recovery};

use crate::loader::{LoadError, LoadErrorKind, ModuleLoader, import_path, module_name, normalize_path};
use crate::report::{CompileDiagnostic, CompileFailure};

/// One `Mod` statement and the unit it reached.
#[derive(Clone, Debug)]
pub(crate) struct ImportEdge {
    pub span: Span,
    pub target: Result<usize, LoadError>,
    /// Set when the target imports this unit back, directly or not.
    pub circular: bool,
}

#[derive(Debug)]
pub(crate) struct Unit {
    pub path: PathBuf,
    /// Name used in diagnostics.
    pub label: String,
    pub module: ModuleId,
    pub source: Arc<str>,
    pub index: LineIndex,
    /// Best-effort parse, kept even when broken so its imports are followed.
    /// Taken by analysis.
    pub program: Option<Program>,
    pub imports: Vec<ImportEdge>,
    pub diagnostics: Vec<CompileDiagnostic>,
}

impl Unit {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Every unit reachable from an entry, in discovery order (entry first).
#[derive(Debug)]
pub(crate) struct ModuleGraph {
    pub units: Vec<Unit>,
    by_module: HashMap<ModuleId, usize>,
}

impl ModuleGraph {
    /// Loads and parses the entry and everything it imports, breadth first.
    /// Only a missing or unreadable entry is fatal; other load failures are
    /// recorded on the importing edge.
    pub fn discover(
        entry: &Path,
        loader: &dyn ModuleLoader,
        search_root: &Path,
        parse: &ParseConfig,
    ) -> Result<Self, CompileFailure> {
        let entry = normalize_path(entry);
        let src = loader.load(&entry).map_err(|e| {
            let label = unit_label(&entry, search_root);
            CompileFailure::single(CompileDiagnostic::from_load(&label, None, &e))
        })?;

        let mut graph = ModuleGraph {
            units: Vec::new(),
            by_module: HashMap::new(),
        };
        let mut seen: HashMap<PathBuf, Result<usize, LoadError>> = HashMap::new();
        let first = graph.push(entry.clone(), src, search_root, parse);
        seen.insert(entry, Ok(first));

        let mut queue = VecDeque::from([first]);
        while let Some(idx) = queue.pop_front() {
            let wanted: Vec<(Span, PathBuf)> = match &graph.units[idx].program {
                Some(program) => imports(program)
                    .map(|i| (i.span, import_path(&graph.units[idx].path, i, search_root)))
                    .collect(),
                None => Vec::new(),
            };

            for (span, path) in wanted {
                let target = match seen.get(&path) {
                    Some(known) => known.clone(),
                    None => {
                        let loaded = loader.load(&path).map(|src| {
                            let next = graph.push(path.clone(), src, search_root, parse);
                            queue.push_back(next);
                            next
                        });
                        seen.insert(path, loaded.clone());
                        loaded
                    }
                };

                let unit = &mut graph.units[idx];
                if let Err(e) = &target {
                    if e.kind == LoadErrorKind::Io {
                        let diag = CompileDiagnostic::from_load(&unit.label, Some((&unit.index, span)), e);
                        unit.diagnostics.push(diag);
                    }
                }
                unit.imports.push(ImportEdge {
                    span,
                    target,
                    circular: false,
                });
            }
        }

        graph.mark_cycles();
        Ok(graph)
    }

    fn push(&mut self, path: PathBuf, src: String, search_root: &Path, parse: &ParseConfig) -> usize {
        let label = unit_label(&path, search_root);
        let module = ModuleId::new(module_name(&path, search_root));
        let out = parse_source_with_recovery(&src, parse);

        // Bad tokens are dropped before parsing, so parse errors after a lex
        // error are echoes of it.
        let mut diagnostics: Vec<CompileDiagnostic> = if out.lex_errors.is_empty() {
            out.errors
                .iter()
                .map(|e| CompileDiagnostic::from_parse(&label, e))
                .collect()
        } else {
            out.lex_errors
                .iter()
                .map(|e| CompileDiagnostic::from_lex(&label, e))
                .collect()
        };
        diagnostics.sort_by_key(|d| (d.line, d.column));

        let idx = self.units.len();
        self.by_module.insert(module.clone(), idx);
        self.units.push(Unit {
            index: LineIndex::new(&src),
            source: Arc::from(src),
            path,
            label,
            module,
            program: Some(out.program),
            imports: Vec::new(),
            diagnostics,
        });
        idx
    }

    pub fn unit_of(&self, module: &ModuleId) -> Option<&Unit> {
        self.by_module.get(module).map(|&i| &self.units[i])
    }

    /// Marks every import edge that lies on a cycle, so each unit on the
    /// cycle reports it at its own `Mod` statement.
    fn mark_cycles(&mut self) {
        let scc = self.components();
        for (u, unit) in self.units.iter_mut().enumerate() {
            for edge in &mut unit.imports {
                if let Ok(v) = edge.target {
                    edge.circular = scc.component[u] == scc.component[v];
                }
            }
        }
    }

    /// Units grouped so that each group only imports from earlier groups.
    /// Cyclic edges are ignored; units within a group are independent.
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let scc = self.components();
        let mut level = vec![0usize; self.units.len()];
        // Tarjan emits a component only after everything it reaches.
        for members in &scc.order {
            for &u in members {
                let deepest = self.units[u]
                    .imports
                    .iter()
                    .filter(|e| !e.circular)
                    .filter_map(|e| e.target.as_ref().ok())
                    .map(|&v| level[v] + 1)
                    .max();
                level[u] = deepest.unwrap_or(0);
            }
        }

        let depth = level.iter().copied().max().map_or(0, |m| m + 1);
        let mut out = vec![Vec::new(); depth];
        for (u, l) in level.into_iter().enumerate() {
            out[l].push(u);
        }
        out
    }

    pub fn sources(&self) -> BTreeMap<String, Arc<str>> {
        self.units
            .iter()
            .map(|u| (u.label.clone(), Arc::clone(&u.source)))
            .collect()
    }

    fn components(&self) -> Components {
        let mut t = Tarjan {
            graph: self,
            next: 0,
            index: vec![None; self.units.len()],
            low: vec![0; self.units.len()],
            stack: Vec::new(),
            on_stack: vec![false; self.units.len()],
            out: Components {
                component: vec![0; self.units.len()],
                order: Vec::new(),
            },
        };
        for u in 0..self.units.len() {
            if t.index[u].is_none() {
                t.visit(u);
            }
        }
        t.out
    }
}

struct Components {
    component: Vec<usize>,
    /// Members of each component, dependencies first.
    order: Vec<Vec<usize>>,
}

struct Tarjan<'g> {
    graph: &'g ModuleGraph,
    next: usize,
    index: Vec<Option<usize>>,
    low: Vec<usize>,
    stack: Vec<usize>,
    on_stack: Vec<bool>,
    out: Components,
}

impl Tarjan<'_> {
    fn visit(&mut self, u: usize) {
        self.index[u] = Some(self.next);
        self.low[u] = self.next;
        self.next += 1;
        self.stack.push(u);
        self.on_stack[u] = true;

        let graph = self.graph;
        for edge in &graph.units[u].imports {
            let Ok(v) = edge.target else { continue };
            match self.index[v] {
                None => {
                    self.visit(v);
                    self.low[u] = self.low[u].min(self.low[v]);
                }
                Some(iv) if self.on_stack[v] => self.low[u] = self.low[u].min(iv),
                Some(_) => {}
            }
        }

        if Some(self.low[u]) == self.index[u] {
            let id = self.out.order.len();
            let mut members = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                self.out.component[w] = id;
                members.push(w);
                if w == u {
                    break;
                }
            }
            self.out.order.push(members);
        }
    }
}

fn imports(program: &Program) -> impl Iterator<Item = &ImportStmt> {
    program.stmts.iter().filter_map(|s| match s {
        Stmt::Import(i) => Some(i),
        _ => None,
    })
}

/// Diagnostic name of a unit: root-relative when possible.
pub(crate) fn unit_label(path: &Path, search_root: &Path) -> String {
    let root = normalize_path(search_root);
    path.strip_prefix(&root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;

    fn discover(loader: &MemoryLoader) -> ModuleGraph {
        ModuleGraph::discover(Path::new("main.ark"), loader, Path::new(""), &ParseConfig::default())
            .expect("entry should load")
    }

    fn index_of(graph: &ModuleGraph, module: &str) -> usize {
        graph
            .units
            .iter()
            .position(|u| u.module.as_str() == module)
            .unwrap_or_else(|| panic!("no unit `{module}`"))
    }

    #[test]
    fn shared_dependencies_load_once() {
        let loader = MemoryLoader::new()
            .with("main.ark", "Mod a\nMod b\n")
            .with("a.ark", "Mod util\n")
            .with("b.ark", "Mod util\n")
            .with("util.ark", "x ::= 1\n");
        let graph = discover(&loader);
        assert_eq!(graph.units.len(), 4);

        let levels = graph.levels();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec![index_of(&graph, "util")]);
        let mut middle = levels[1].clone();
        middle.sort_unstable();
        assert_eq!(middle, vec![index_of(&graph, "a"), index_of(&graph, "b")]);
        assert_eq!(levels[2], vec![0]);
    }

    #[test]
    fn every_edge_on_a_cycle_is_marked() {
        let loader = MemoryLoader::new()
            .with("main.ark", "Mod a\nMod leaf\n")
            .with("a.ark", "Mod b\n")
            .with("b.ark", "Mod a\n")
            .with("leaf.ark", "x ::= 1\n");
        let graph = discover(&loader);

        let a = &graph.units[index_of(&graph, "a")];
        let b = &graph.units[index_of(&graph, "b")];
        assert!(a.imports[0].circular && b.imports[0].circular);
        assert!(graph.units[0].imports.iter().all(|e| !e.circular));

        let levels = graph.levels();
        assert_eq!(levels.last(), Some(&vec![0]));
    }

    #[test]
    fn self_imports_are_cycles() {
        let loader = MemoryLoader::new().with("main.ark", "Mod main\n");
        let graph = discover(&loader);
        assert_eq!(graph.units.len(), 1);
        assert!(graph.units[0].imports[0].circular);
        assert_eq!(graph.levels(), vec![vec![0]]);
    }

    #[test]
    fn missing_imports_stay_on_the_edge() {
        let loader = MemoryLoader::new().with("main.ark", "Mod gone\n");
        let graph = discover(&loader);
        let edge = &graph.units[0].imports[0];
        let err = edge.target.as_ref().expect_err("nothing to load");
        assert_eq!(err.kind, LoadErrorKind::NotFound);
        assert!(graph.units[0].is_clean());
    }

    #[test]
    fn parse_errors_are_kept_per_unit() {
        let loader = MemoryLoader::new()
            .with("main.ark", "Mod util\nx := )\n")
            .with("util.ark", "y ::= 1\n");
        let graph = discover(&loader);
        assert_eq!(graph.units.len(), 2, "imports of a broken unit are still followed");
        assert_eq!(graph.units[0].diagnostics.len(), 1);
        assert_eq!(graph.units[0].diagnostics[0].line, 2);
        assert!(graph.units[1].is_clean());
    }

    #[test]
    fn lex_errors_stand_in_for_the_parse() {
        let loader = MemoryLoader::new().with("main.ark", "print(str(1.0) + \"|\" + 1e0)\n");
        let graph = discover(&loader);
        let diags = &graph.units[0].diagnostics;
        assert_eq!(diags.len(), 1, "{diags:?}");
        assert_eq!(diags[0].kind, "MalformedNumber");
    }

    #[test]
    fn missing_entry_is_fatal() {
        let err = ModuleGraph::discover(
            Path::new("main.ark"),
            &MemoryLoader::new(),
            Path::new(""),
            &ParseConfig::default(),
        )
        .expect_err("no entry");
        assert_eq!(err.diagnostics[0].kind, "NotFound");
    }
}
