#![forbid(unsafe_code)]

use std::collections::HashMap;

use ark_ast::Span;

use crate::types::{ArtifactRef, Type};
use crate::unit::ProcId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Var,
    Param,
    LoopVar,
    /// A procedure declared inside another procedure; its value is `{env, fn}`.
    NestedProc(ProcId),
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    pub ty: Type,
    pub mutable: bool,
    /// Declared directly at module level.
    pub global: bool,
    /// Procedure whose frame holds the binding; `None` for module-level code.
    pub owner: Option<ProcId>,
    /// Number of enclosing scopes at the declaration.
    pub depth: u32,
    pub span: Span,
}

/// What a name in scope refers to.
#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    Symbol(SymbolId),
    /// Module-level procedure.
    Proc(ProcId),
    Artifact(ArtifactRef),
    /// Index into the unit's import table.
    Module(usize),
}

#[derive(Debug, Default)]
struct Scope {
    parent: Option<ScopeId>,
    depth: u32,
    names: HashMap<String, Binding>,
}

/// Scopes live in one arena and point at their parent by index. A popped scope
/// keeps its slot but drops its name map.
#[derive(Debug, Default)]
pub struct ScopeArena {
    scopes: Vec<Scope>,
}

impl ScopeArena {
    pub fn root(&mut self) -> ScopeId {
        self.push(None)
    }

    pub fn push(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let depth = parent.map(|p| self.depth(p) + 1).unwrap_or(0);
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent,
            depth,
            names: HashMap::new(),
        });
        id
    }

    pub fn pop(&mut self, scope: ScopeId) {
        if let Some(s) = self.scopes.get_mut(scope.0 as usize) {
            s.names = HashMap::new();
        }
    }

    pub fn depth(&self, scope: ScopeId) -> u32 {
        self.scopes
            .get(scope.0 as usize)
            .map(|s| s.depth)
            .unwrap_or(0)
    }

    /// Binding declared directly in `scope`, ignoring parents.
    pub fn local(&self, scope: ScopeId, name: &str) -> Option<&Binding> {
        self.scopes.get(scope.0 as usize)?.names.get(name)
    }

    /// Insert `name`; on a same-scope conflict the existing binding is returned
    /// and nothing changes.
    pub fn declare(&mut self, scope: ScopeId, name: &str, binding: Binding) -> Result<(), Binding> {
        let Some(s) = self.scopes.get_mut(scope.0 as usize) else {
            return Ok(());
        };
        if let Some(existing) = s.names.get(name) {
            return Err(existing.clone());
        }
        s.names.insert(name.to_string(), binding);
        Ok(())
    }

    /// Innermost-first lookup.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<&Binding> {
        let mut cur = Some(scope);
        while let Some(id) = cur {
            let s = self.scopes.get(id.0 as usize)?;
            if let Some(b) = s.names.get(name) {
                return Some(b);
            }
            cur = s.parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scopes_shadow_and_pop_releases_names() {
        let mut arena = ScopeArena::default();
        let root = arena.root();
        arena
            .declare(root, "x", Binding::Symbol(SymbolId(0)))
            .expect("fresh name");
        let inner = arena.push(Some(root));
        arena
            .declare(inner, "x", Binding::Symbol(SymbolId(1)))
            .expect("shadowing is allowed");
        assert_eq!(arena.lookup(inner, "x"), Some(&Binding::Symbol(SymbolId(1))));
        assert_eq!(arena.depth(inner), 1);

        assert!(arena.declare(inner, "x", Binding::Symbol(SymbolId(2))).is_err());

        arena.pop(inner);
        assert_eq!(arena.local(inner, "x"), None);
        assert_eq!(arena.lookup(root, "x"), Some(&Binding::Symbol(SymbolId(0))));
    }
}
