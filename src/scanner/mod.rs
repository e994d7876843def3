//! Workspace scanner.
//!
//! Yields `(path, metadata, excluded)` entries for one root. Exclude globs
//! are compiled once per scanner into a single alternation regex (with
//! `{a,b}` brace expansion), `.gitignore` rules come from the mtime-keyed
//! cache, and a trie of active sibling workspace roots keeps the walk from
//! descending into nested sub-workspaces. Per-entry permission errors are
//! silent skips; a scan order is not guaranteed.

mod gitignore;
mod trie;

pub use gitignore::{CompiledGitignore, GitignoreCache};
pub use trie::PathTrie;

use ahash::AHashSet;
use regex::Regex;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Directory names never scanned, regardless of user config.
const HARD_EXCLUDE_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".venv",
    "venv",
    "dist",
    "build",
    ".next",
    "target",
    "coverage",
    ".idea",
    ".vscode",
    ".pytest_cache",
    "__pycache__",
];

/// File globs never indexed, regardless of user config.
const HARD_EXCLUDE_GLOBS: &[&str] = &[
    "*.pyc", "*.pyo", "*.class", "*.o", "*.dll", "*.so", "*.dylib", "*.exe", "*.bin",
];

/// Scanner configuration, resolved from workspace config + settings.
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Extensions (with leading dot, lowercase) to include; empty = all.
    pub include_ext: Vec<String>,
    /// Filename/relpath globs to include; empty = all.
    pub include_files: Vec<String>,
    /// Additional directory-name globs to exclude.
    pub exclude_dirs: Vec<String>,
    /// Additional file globs to exclude.
    pub exclude_globs: Vec<String>,
    pub max_depth: usize,
    pub follow_symlinks: bool,
}

/// One scanner entry: absolute path, stat result, exclusion flag.
pub struct ScanEntry {
    pub path: PathBuf,
    pub meta: Metadata,
    pub excluded: bool,
}

/// Compiled scanner for a fixed config and set of active workspace roots.
pub struct Scanner {
    include_ext: AHashSet<String>,
    include_file_re: Option<Regex>,
    include_all: bool,
    exclude_dir_re: Option<Regex>,
    exclude_glob_re: Option<Regex>,
    max_depth: usize,
    follow_symlinks: bool,
    workspace_trie: PathTrie,
    gitignore: GitignoreCache,
}

impl Scanner {
    /// Builds a scanner. Patterns are compiled here, once, not per entry.
    #[must_use]
    pub fn new(cfg: &ScanConfig, active_roots: &[PathBuf]) -> Self {
        let include_ext: AHashSet<String> = cfg
            .include_ext
            .iter()
            .map(|e| e.to_ascii_lowercase())
            .collect();
        let include_file_re = compile_patterns(&cfg.include_files);
        let include_all = include_ext.is_empty() && include_file_re.is_none();

        let mut dir_patterns: Vec<String> =
            HARD_EXCLUDE_DIRS.iter().map(|s| (*s).to_string()).collect();
        dir_patterns.extend(cfg.exclude_dirs.iter().cloned());

        let mut glob_patterns: Vec<String> =
            HARD_EXCLUDE_GLOBS.iter().map(|s| (*s).to_string()).collect();
        glob_patterns.extend(cfg.exclude_globs.iter().cloned());

        let mut trie = PathTrie::new();
        for root in active_roots {
            trie.insert(&crate::workspace::normalize_root(root));
        }

        Self {
            include_ext,
            include_file_re,
            include_all,
            exclude_dir_re: compile_patterns(&dir_patterns),
            exclude_glob_re: compile_patterns(&glob_patterns),
            max_depth: if cfg.max_depth == 0 { 20 } else { cfg.max_depth },
            follow_symlinks: cfg.follow_symlinks,
            workspace_trie: trie,
            gitignore: GitignoreCache::new(),
        }
    }

    /// Starts a scan of `root`. The iterator is lazy, finite, and
    /// non-restartable; a root-level permission error yields nothing.
    #[must_use]
    pub fn scan(&self, root: &Path) -> ScanIter<'_> {
        self.scan_with(root, true)
    }

    /// Like [`scan`](Self::scan) but optionally yielding excluded files
    /// (with `excluded = true`) instead of dropping them.
    #[must_use]
    pub fn scan_with(&self, root: &Path, apply_exclude: bool) -> ScanIter<'_> {
        let root = crate::workspace::normalize_root(root);
        let gitignore = self.gitignore.matcher_for(&root);
        let mut frames = Vec::new();
        if let Ok(iter) = std::fs::read_dir(&root) {
            frames.push(Frame { iter, depth: 0 });
        }
        let mut visited = AHashSet::new();
        if self.follow_symlinks {
            if let Ok(real) = std::fs::canonicalize(&root) {
                visited.insert(real);
            }
        }
        ScanIter {
            scanner: self,
            root,
            frames,
            visited,
            gitignore,
            apply_exclude,
        }
    }

    fn dir_excluded(&self, name: &str, rel_posix: &str) -> bool {
        self.exclude_dir_re
            .as_ref()
            .is_some_and(|re| re.is_match(name) || re.is_match(rel_posix))
    }

    fn file_excluded(
        &self,
        name: &str,
        rel_posix: &str,
        gitignore: Option<&Arc<CompiledGitignore>>,
    ) -> bool {
        if self
            .exclude_glob_re
            .as_ref()
            .is_some_and(|re| re.is_match(name) || re.is_match(rel_posix))
        {
            return true;
        }
        if gitignore.is_some_and(|g| g.is_ignored(rel_posix, false)) {
            return true;
        }
        // A file under an excluded directory name is excluded even when the
        // walk reached it some other way (include overrides, symlinks).
        if let Some(re) = &self.exclude_dir_re {
            if rel_posix.split('/').any(|part| re.is_match(part)) {
                return true;
            }
        }
        false
    }

    fn included(&self, name: &str, rel_posix: &str, path: &Path) -> bool {
        if self.include_all {
            return true;
        }
        if let Some(re) = &self.include_file_re {
            if re.is_match(name) || re.is_match(rel_posix) {
                return true;
            }
        }
        if !self.include_ext.is_empty() {
            let ext = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_ascii_lowercase()))
                .unwrap_or_default();
            if self.include_ext.contains(&ext) {
                return true;
            }
        }
        false
    }
}

struct Frame {
    iter: std::fs::ReadDir,
    depth: usize,
}

/// Depth-first scan iterator. Non-restartable by construction.
pub struct ScanIter<'a> {
    scanner: &'a Scanner,
    root: PathBuf,
    frames: Vec<Frame>,
    visited: AHashSet<PathBuf>,
    gitignore: Option<Arc<CompiledGitignore>>,
    apply_exclude: bool,
}

impl Iterator for ScanIter<'_> {
    type Item = ScanEntry;

    fn next(&mut self) -> Option<ScanEntry> {
        loop {
            let depth = self.frames.last()?.depth;
            let entry = match self.frames.last_mut()?.iter.next() {
                None => {
                    self.frames.pop();
                    continue;
                }
                Some(Err(_)) => continue,
                Some(Ok(e)) => e,
            };

            let path = entry.path();
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let rel_posix = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let name = entry.file_name().to_string_lossy().to_string();

            let Ok(meta) = (if self.scanner.follow_symlinks {
                std::fs::metadata(&path)
            } else {
                entry.metadata()
            }) else {
                continue;
            };

            if meta.is_dir() {
                if depth + 1 > self.scanner.max_depth {
                    continue;
                }
                if self.apply_exclude && self.scanner.dir_excluded(&name, &rel_posix) {
                    continue;
                }
                if self
                    .gitignore
                    .as_ref()
                    .is_some_and(|g| g.is_ignored(&rel_posix, true))
                    && self.apply_exclude
                {
                    continue;
                }
                if self.scanner.workspace_trie.is_foreign_root(&path, &self.root) {
                    continue;
                }
                if self.scanner.follow_symlinks {
                    let Ok(real) = std::fs::canonicalize(&path) else {
                        continue;
                    };
                    if !self.visited.insert(real) {
                        continue;
                    }
                }
                if let Ok(iter) = std::fs::read_dir(&path) {
                    self.frames.push(Frame {
                        iter,
                        depth: depth + 1,
                    });
                }
                continue;
            }

            if !meta.is_file() {
                continue;
            }
            if self.scanner.follow_symlinks {
                let Ok(real) = std::fs::canonicalize(&path) else {
                    continue;
                };
                if !self.visited.insert(real) {
                    continue;
                }
            }
            if !self.scanner.included(&name, &rel_posix, &path) {
                continue;
            }
            let excluded = self
                .scanner
                .file_excluded(&name, &rel_posix, self.gitignore.as_ref());
            if excluded && self.apply_exclude {
                continue;
            }
            return Some(ScanEntry {
                path,
                meta,
                excluded,
            });
        }
    }
}

/// Expands `{a,b}` alternatives in a glob. Bounded to avoid pathological
/// inputs producing exponential pattern sets.
fn expand_braces(pattern: &str) -> Vec<String> {
    const MAX_EXPANSION: usize = 1000;
    let mut patterns = vec![pattern.to_string()];
    while patterns.iter().any(|p| p.contains('{')) {
        if patterns.len() > MAX_EXPANSION {
            break;
        }
        let mut next = Vec::new();
        for p in &patterns {
            if let Some(open) = p.find('{') {
                if let Some(close) = p[open..].find('}').map(|i| i + open) {
                    let prefix = &p[..open];
                    let suffix = &p[close + 1..];
                    for option in p[open + 1..close].split(',') {
                        next.push(format!("{prefix}{option}{suffix}"));
                        if next.len() > MAX_EXPANSION {
                            return patterns;
                        }
                    }
                    continue;
                }
            }
            next.push(p.clone());
        }
        if next == patterns {
            break;
        }
        patterns = next;
    }
    patterns
}

/// Translates one fnmatch-style glob into an anchored regex fragment.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                let mut class = String::from("[");
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                let mut closed = false;
                for cc in chars.by_ref() {
                    if cc == ']' {
                        closed = true;
                        break;
                    }
                    if cc == '\\' {
                        class.push_str("\\\\");
                    } else {
                        class.push(cc);
                    }
                }
                if closed {
                    class.push(']');
                    out.push_str(&class);
                } else {
                    out.push_str(&regex::escape("["));
                    out.push_str(&regex::escape(&class[1..]));
                }
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out
}

/// Compiles a set of globs into one alternation regex, with brace
/// expansion. Returns `None` for an empty set.
#[must_use]
pub fn compile_patterns(patterns: &[String]) -> Option<Regex> {
    if patterns.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    for pattern in patterns {
        for expanded in expand_braces(pattern) {
            parts.push(format!("(?:{})", glob_to_regex(&expanded)));
        }
    }
    if parts.is_empty() {
        return None;
    }
    let source = format!("\\A(?:{})\\z", parts.join("|"));
    Regex::new(&source).ok()
}
