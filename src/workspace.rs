//! Path and workspace utilities.
//!
//! Workspace roots are absolute, normalized paths. Every persisted file is
//! keyed by a db-path of the form `<root_id>/<posix-rel-path>`, where the
//! root id is a stable derivation from the normalized root path. This
//! decouples index storage from filesystem layout and lets several roots
//! share one database without key collisions.

use crate::settings;
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

use crate::types::RootId;

/// Normalizes a workspace root: absolute, symlink-resolved where possible,
/// with Windows drive letters folded to a canonical case.
#[must_use]
pub fn normalize_root(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let canonical = dunce::canonicalize(&absolute).unwrap_or(absolute);
    fold_drive_letter(&canonical)
}

/// Folds `C:\...` and `c:\...` to one canonical form so they hash alike.
fn fold_drive_letter(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    let bytes = s.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_uppercase() {
        let mut folded = String::with_capacity(s.len());
        folded.push(bytes[0].to_ascii_lowercase() as char);
        folded.push_str(&s[1..]);
        PathBuf::from(folded)
    } else {
        path.to_path_buf()
    }
}

/// Derives the stable root id for a workspace root.
///
/// Format: `root-` + first 12 hex characters of SHA-256 of the normalized
/// absolute path. Distinct roots therefore never collide in practice, and
/// the prefix distinguishes canonical ids from legacy db-paths.
#[must_use]
pub fn root_id(root: &Path) -> RootId {
    let normalized = normalize_root(root);
    let mut hasher = Sha256::new();
    hasher.update(normalized.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest[..6].iter().map(|b| format!("{b:02x}")).collect();
    RootId(format!("root-{hex}"))
}

/// Encodes a db-path from a root id and a root-relative path.
#[must_use]
pub fn encode_db_path(root_id: &RootId, rel: &Path) -> String {
    let posix = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("{root_id}/{posix}")
}

/// Splits a db-path into `(root_id, rel)`. Legacy paths without the
/// `root-` prefix return `None` for the root id.
#[must_use]
pub fn split_db_path(db_path: &str) -> (Option<RootId>, &str) {
    if let Some(rest) = db_path.strip_prefix("root-") {
        if let Some(idx) = rest.find('/') {
            let id = RootId(format!("root-{}", &rest[..idx]));
            return (Some(id), &rest[idx + 1..]);
        }
    }
    (None, db_path)
}

/// Derives the repo label for a file: first path segment of the
/// root-relative path, or the root's basename for top-level files.
#[must_use]
pub fn repo_label(root: &Path, rel: &Path) -> String {
    let mut parts = rel.components().filter_map(|c| match c {
        Component::Normal(p) => Some(p.to_string_lossy().to_string()),
        _ => None,
    });
    let first = parts.next();
    if parts.next().is_some() {
        first.unwrap_or_default()
    } else {
        root.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "workspace".into())
    }
}

/// Resolves a user-supplied target into an allowed db-path.
///
/// Accepts either a db-path (`root-xxxx/rel`) or a filesystem path
/// (absolute or relative to any allowed root). Returns `None` when the
/// target escapes every allowed root.
#[must_use]
pub fn resolve_db_path(input: &str, roots: &[PathBuf]) -> Option<String> {
    if input.is_empty() {
        return None;
    }
    if input.starts_with("root-") {
        let (id, _) = split_db_path(input);
        if input.contains('/') {
            let id = id?;
            let allowed = roots.iter().any(|r| root_id(r) == id);
            return allowed.then(|| input.to_string());
        }
        // A bare "root-xxxx" with no rel is never a file.
        return None;
    }

    let p = Path::new(input);
    for root in roots {
        let normalized_root = normalize_root(root);
        let candidate = if p.is_absolute() {
            fold_drive_letter(&dunce::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()))
        } else {
            normalized_root.join(normalize_rel(p)?)
        };
        if let Ok(rel) = candidate.strip_prefix(&normalized_root) {
            return Some(encode_db_path(&root_id(root), rel));
        }
    }
    None
}

/// Normalizes a relative path, rejecting traversal out of the root.
fn normalize_rel(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            _ => return None,
        }
    }
    Some(out)
}

/// Resolves a db-path back to an absolute filesystem path, when its root
/// is among the allowed roots.
#[must_use]
pub fn db_path_to_fs(db_path: &str, roots: &[PathBuf]) -> Option<PathBuf> {
    let (id, rel) = split_db_path(db_path);
    let id = id?;
    let root = roots.iter().find(|r| root_id(r) == id)?;
    Some(normalize_root(root).join(rel))
}

/// Resolves the workspace-local config path (the SSOT).
///
/// `<config_dir>/workspaces/<root_id>.json` takes precedence over the
/// legacy in-workspace `.sari/config.json`.
#[must_use]
pub fn resolve_config_path(workspace_root: &Path) -> PathBuf {
    let id = root_id(workspace_root);
    let ssot = settings::config_dir()
        .join("workspaces")
        .join(format!("{id}.json"));
    if ssot.exists() {
        return ssot;
    }
    let legacy = workspace_root.join(".sari").join("config.json");
    if legacy.exists() {
        return legacy;
    }
    ssot
}

/// Default database path for a set of workspace roots.
///
/// `<cache_dir>/<root_id of first root>.db`, which keeps index files out of
/// the indexed tree (no .gitignore pollution, no write permission needed in
/// the workspace).
#[must_use]
pub fn default_db_path(primary_root: &Path) -> PathBuf {
    settings::cache_dir().join(format!("{}.db", root_id(primary_root)))
}
