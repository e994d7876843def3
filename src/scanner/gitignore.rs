//! Mtime-cached `.gitignore` matching.
//!
//! Compiling gitignore rules is the expensive part, so compiled matchers
//! are cached keyed by the `.gitignore` file's mtime; match results are
//! additionally memoized in a small per-matcher LRU because scans hit the
//! same directory prefixes over and over.

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

const QUERY_CACHE_ENTRIES: usize = 4096;

/// One compiled `.gitignore` with a memoized query cache.
pub struct CompiledGitignore {
    matcher: Gitignore,
    queries: Mutex<LruCache<(String, bool), bool>>,
}

impl CompiledGitignore {
    fn new(matcher: Gitignore) -> Self {
        Self {
            matcher,
            queries: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_ENTRIES).expect("nonzero cache size"),
            )),
        }
    }

    /// Returns true when the root-relative posix path is ignored.
    #[must_use]
    pub fn is_ignored(&self, rel_posix: &str, is_dir: bool) -> bool {
        let key = (rel_posix.to_string(), is_dir);
        if let Ok(mut cache) = self.queries.lock() {
            if let Some(hit) = cache.get(&key) {
                return *hit;
            }
        }
        let matched = self
            .matcher
            .matched_path_or_any_parents(Path::new(rel_posix), is_dir)
            .is_ignore();
        if let Ok(mut cache) = self.queries.lock() {
            cache.put(key, matched);
        }
        matched
    }
}

struct CacheEntry {
    mtime: SystemTime,
    compiled: Arc<CompiledGitignore>,
}

/// Cache of compiled root-level `.gitignore` files keyed by path + mtime.
#[derive(Default)]
pub struct GitignoreCache {
    entries: Mutex<ahash::AHashMap<PathBuf, CacheEntry>>,
}

impl GitignoreCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads (or reuses) the matcher for `<root>/.gitignore`.
    ///
    /// Returns `None` when the root has no readable `.gitignore`.
    #[must_use]
    pub fn matcher_for(&self, root: &Path) -> Option<Arc<CompiledGitignore>> {
        let gi_path = root.join(".gitignore");
        let mtime = std::fs::metadata(&gi_path).and_then(|m| m.modified()).ok()?;

        if let Ok(entries) = self.entries.lock() {
            if let Some(entry) = entries.get(&gi_path) {
                if entry.mtime == mtime {
                    return Some(Arc::clone(&entry.compiled));
                }
            }
        }

        let mut builder = GitignoreBuilder::new(root);
        builder.add(&gi_path);
        let matcher = builder.build().ok()?;
        let compiled = Arc::new(CompiledGitignore::new(matcher));

        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                gi_path,
                CacheEntry {
                    mtime,
                    compiled: Arc::clone(&compiled),
                },
            );
        }
        Some(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_gitignore_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = GitignoreCache::new();
        assert!(cache.matcher_for(dir.path()).is_none());
    }

    #[test]
    fn test_rules_apply_and_cache_reuses() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.log\nbuildout/\n").unwrap();

        let cache = GitignoreCache::new();
        let m1 = cache.matcher_for(dir.path()).unwrap();
        assert!(m1.is_ignored("debug.log", false));
        assert!(m1.is_ignored("buildout", true));
        assert!(m1.is_ignored("buildout/deep/file.txt", false));
        assert!(!m1.is_ignored("src/main.rs", false));

        // Second lookup with unchanged mtime returns the cached matcher.
        let m2 = cache.matcher_for(dir.path()).unwrap();
        assert!(Arc::ptr_eq(&m1, &m2));
    }

    #[test]
    fn test_mtime_change_rebuilds() {
        let dir = tempfile::TempDir::new().unwrap();
        let gi = dir.path().join(".gitignore");
        std::fs::write(&gi, "*.log\n").unwrap();

        let cache = GitignoreCache::new();
        let m1 = cache.matcher_for(dir.path()).unwrap();
        assert!(!m1.is_ignored("notes.txt", false));

        // Force a different mtime, then change the rules.
        let past = SystemTime::now() - std::time::Duration::from_secs(120);
        std::fs::write(&gi, "*.txt\n").unwrap();
        let file = std::fs::OpenOptions::new().write(true).open(&gi).unwrap();
        let _ = file.set_modified(past);

        let m2 = cache.matcher_for(dir.path()).unwrap();
        assert!(m2.is_ignored("notes.txt", false));
    }
}
