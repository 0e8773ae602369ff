#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use ark_ast::ImportStmt;
use miette::Diagnostic;
use thiserror::Error;

pub const SOURCE_EXTENSION: &str = "ark";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadErrorKind {
    NotFound,
    Circular,
    Io,
}

impl LoadErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadErrorKind::NotFound => "NotFound",
            LoadErrorKind::Circular => "Circular",
            LoadErrorKind::Io => "Io",
        }
    }
}

#[derive(Clone, Debug, Error, Diagnostic)]
#[error("load error: {message}")]
#[diagnostic(code(ark::load))]
pub struct LoadError {
    pub kind: LoadErrorKind,
    pub message: String,
}

impl LoadError {
    pub fn not_found(path: &Path) -> Self {
        Self {
            kind: LoadErrorKind::NotFound,
            message: format!("no module at {}", path.display()),
        }
    }

    pub fn circular(path: &Path) -> Self {
        Self {
            kind: LoadErrorKind::Circular,
            message: format!("{} imports itself through its dependencies", path.display()),
        }
    }

    pub fn io(path: &Path, err: &io::Error) -> Self {
        Self {
            kind: LoadErrorKind::Io,
            message: format!("failed to read {}: {err}", path.display()),
        }
    }
}

/// Supplies the text of compile units by path.
///
/// Paths handed to `load` are already resolved and lexically normalized, so a
/// loader only has to answer "what is at this path". A loader that tracks
/// cycles itself may answer `Circular`; it is reported like a detected cycle.
pub trait ModuleLoader: Sync {
    fn load(&self, path: &Path) -> Result<String, LoadError>;
}

/// Reads units from disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsModuleLoader;

impl ModuleLoader for FsModuleLoader {
    fn load(&self, path: &Path) -> Result<String, LoadError> {
        match fs::read_to_string(path) {
            Ok(src) => Ok(src),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(LoadError::not_found(path)),
            Err(e) => Err(LoadError::io(path, &e)),
        }
    }
}

/// Units held in memory, keyed by normalized path.
#[derive(Clone, Debug, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, src: impl Into<String>) {
        self.files.insert(normalize_path(path.as_ref()), src.into());
    }

    pub fn with(mut self, path: impl AsRef<Path>, src: impl Into<String>) -> Self {
        self.insert(path, src);
        self
    }
}

impl ModuleLoader for MemoryLoader {
    fn load(&self, path: &Path) -> Result<String, LoadError> {
        self.files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| LoadError::not_found(path))
    }
}

/// Where `import`, written in the unit at `importer`, points.
///
/// Quoted and slash paths are relative to the importing unit's directory;
/// bare names resolve against `search_root`.
pub fn import_path(importer: &Path, import: &ImportStmt, search_root: &Path) -> PathBuf {
    let base = if import.is_rooted() {
        search_root.to_path_buf()
    } else {
        importer.parent().map(Path::to_path_buf).unwrap_or_default()
    };
    let mut path = base.join(&import.path);
    path.set_extension(SOURCE_EXTENSION);
    normalize_path(&path)
}

/// Resolves `.` and `..` without touching the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    out
}

/// Module identity of the unit at `path`: relative to `search_root` when it
/// lies below it, slash-separated, without the extension.
pub fn module_name(path: &Path, search_root: &Path) -> String {
    let path = normalize_path(path);
    let root = normalize_path(search_root);
    let rel = path.strip_prefix(&root).unwrap_or(&path).with_extension("");
    let segments: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::ParentDir => Some("up".to_string()),
            _ => None,
        })
        .collect();
    segments.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import(path: &str, quoted: bool) -> ImportStmt {
        let alias = path.rsplit('/').next().unwrap_or(path).to_string();
        ImportStmt {
            span: ark_ast::span(0, 0),
            path: path.to_string(),
            quoted,
            alias: ark_ast::Spanned::new(ark_ast::span(0, 0), alias),
        }
    }

    #[test]
    fn normalizes_lexically() {
        assert_eq!(normalize_path(Path::new("a/./b/../c.ark")), PathBuf::from("a/c.ark"));
        assert_eq!(normalize_path(Path::new("../x.ark")), PathBuf::from("../x.ark"));
        assert_eq!(normalize_path(Path::new("/../x.ark")), PathBuf::from("/x.ark"));
    }

    #[test]
    fn bare_names_use_the_search_root() {
        let p = import_path(Path::new("src/app/main.ark"), &import("util", false), Path::new("lib"));
        assert_eq!(p, PathBuf::from("lib/util.ark"));
    }

    #[test]
    fn relative_imports_use_the_importer_directory() {
        let importer = Path::new("src/app/main.ark");
        let p = import_path(importer, &import("../shared/geo", false), Path::new("lib"));
        assert_eq!(p, PathBuf::from("src/shared/geo.ark"));
        let p = import_path(importer, &import("util", true), Path::new("lib"));
        assert_eq!(p, PathBuf::from("src/app/util.ark"));
    }

    #[test]
    fn module_names_are_root_relative() {
        assert_eq!(module_name(Path::new("proj/util/strings.ark"), Path::new("proj")), "util/strings");
        assert_eq!(module_name(Path::new("proj/main.ark"), Path::new("proj/")), "main");
        assert_eq!(module_name(Path::new("other/x.ark"), Path::new("proj")), "other/x");
    }

    #[test]
    fn memory_loader_distinguishes_missing_units() {
        let loader = MemoryLoader::new().with("./a/b.ark", "x := 1\n");
        assert_eq!(loader.load(Path::new("a/b.ark")).expect("present"), "x := 1\n");
        let err = loader.load(Path::new("a/c.ark")).expect_err("absent");
        assert_eq!(err.kind, LoadErrorKind::NotFound);
    }

    #[test]
    fn fs_loader_reads_files() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("main.ark");
        fs::write(&path, "print(1)\n").expect("write unit");
        assert_eq!(FsModuleLoader.load(&path).expect("readable"), "print(1)\n");
        let err = FsModuleLoader
            .load(&dir.path().join("missing.ark"))
            .expect_err("missing");
        assert_eq!(err.kind, LoadErrorKind::NotFound);
    }
}
