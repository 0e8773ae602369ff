#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use ark_parse::Dialect;
use miette::Diagnostic;
use thiserror::Error;

pub const MANIFEST_FILE: &str = "ark.toml";

#[derive(Debug, Error, Diagnostic)]
#[error("manifest error: {message}")]
#[diagnostic(code(ark::manifest))]
pub struct ManifestError {
    pub message: String,
}

#[derive(Clone, Debug, Default)]
pub struct ResolvedManifest {
    pub manifest_path: Option<PathBuf>,
    pub project_root: PathBuf,

    pub name: Option<String>,
    pub dialect: Dialect,

    /// Directory bare `Mod name` imports resolve against.
    pub search_root: PathBuf,
}

impl ResolvedManifest {
    pub fn empty(project_root: PathBuf) -> Self {
        Self {
            manifest_path: None,
            search_root: project_root.clone(),
            project_root,
            name: None,
            dialect: Dialect::default(),
        }
    }
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(default)]
    project: Option<Project>,
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct Project {
    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    dialect: Option<String>,

    #[serde(default)]
    search_root: Option<String>,
}

pub fn find_manifest(start: &Path) -> Option<PathBuf> {
    let mut cur = if start.is_file() {
        start.parent()?.to_path_buf()
    } else {
        start.to_path_buf()
    };

    loop {
        let candidate = cur.join(MANIFEST_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        match cur.parent() {
            Some(p) => cur = p.to_path_buf(),
            None => return None,
        }
    }
}

/// Finds the `ark.toml` governing `start` (a file or directory) and resolves
/// its settings. Without a manifest, defaults apply and the search root is
/// the directory of `start`.
pub fn load_resolved_manifest(start: &Path) -> Result<ResolvedManifest, ManifestError> {
    let project_root = if start.is_file() {
        start
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf()
    } else {
        start.to_path_buf()
    };

    let Some(manifest_path) = find_manifest(&project_root) else {
        return Ok(ResolvedManifest::empty(project_root));
    };

    let raw = fs::read_to_string(&manifest_path).map_err(|e| ManifestError {
        message: format!("failed to read {}: {e}", manifest_path.display()),
    })?;

    parse_manifest(&raw, &manifest_path)
}

/// Resolves manifest text as if it had been read from `manifest_path`.
pub fn parse_manifest(raw: &str, manifest_path: &Path) -> Result<ResolvedManifest, ManifestError> {
    let manifest_dir = manifest_path
        .parent()
        .ok_or_else(|| ManifestError {
            message: "manifest has no parent directory".to_string(),
        })?
        .to_path_buf();

    let parsed: Manifest = toml::from_str(raw).map_err(|e| ManifestError {
        message: format!("failed to parse {}: {e}", manifest_path.display()),
    })?;

    let mut out = ResolvedManifest::empty(manifest_dir.clone());
    out.manifest_path = Some(manifest_path.to_path_buf());

    if let Some(project) = parsed.project {
        out.name = project.name;
        if let Some(dialect) = project.dialect {
            out.dialect = dialect.parse().map_err(|message| ManifestError {
                message: format!("{}: {message}", manifest_path.display()),
            })?;
        }
        if let Some(root) = project.search_root {
            out.search_root = resolve_path(&manifest_dir, &root);
        }
    }

    Ok(out)
}

fn resolve_path(base: &Path, p: &str) -> PathBuf {
    let pb = PathBuf::from(p);
    if pb.is_absolute() { pb } else { base.join(pb) }
}
