//! Path trie for workspace boundary enforcement.
//!
//! Scanning one root must not descend into a directory that is itself a
//! registered workspace root (a nested sub-workspace); that directory is
//! scanned under its own root identity. Lookup is O(path components).

use ahash::AHashMap;
use std::path::{Component, Path};

#[derive(Default)]
struct TrieNode {
    children: AHashMap<String, TrieNode>,
    is_root: bool,
}

/// Trie over normalized root paths.
#[derive(Default)]
pub struct PathTrie {
    root: TrieNode,
}

impl PathTrie {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workspace root path.
    pub fn insert(&mut self, path: &Path) {
        let mut node = &mut self.root;
        for part in components_of(path) {
            node = node.children.entry(part).or_default();
        }
        node.is_root = true;
    }

    /// Returns true when `dir` is a registered workspace root other than
    /// `scanning_root` (i.e. the scanner must not descend into it).
    #[must_use]
    pub fn is_foreign_root(&self, dir: &Path, scanning_root: &Path) -> bool {
        if dir == scanning_root {
            return false;
        }
        let mut node = &self.root;
        for part in components_of(dir) {
            match node.children.get(&part) {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.is_root
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }
}

fn components_of(path: &Path) -> impl Iterator<Item = String> + '_ {
    path.components().filter_map(|c| match c {
        Component::Normal(p) => Some(p.to_string_lossy().to_string()),
        Component::Prefix(p) => Some(p.as_os_str().to_string_lossy().to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_nested_root_is_foreign() {
        let mut trie = PathTrie::new();
        trie.insert(Path::new("/ws"));
        trie.insert(Path::new("/ws/sub"));

        let scanning = PathBuf::from("/ws");
        assert!(trie.is_foreign_root(Path::new("/ws/sub"), &scanning));
        assert!(!trie.is_foreign_root(Path::new("/ws"), &scanning));
        assert!(!trie.is_foreign_root(Path::new("/ws/other"), &scanning));
    }

    #[test]
    fn test_prefix_of_root_is_not_foreign() {
        let mut trie = PathTrie::new();
        trie.insert(Path::new("/ws/deep/nested"));
        // /ws/deep is only a prefix, not a registered root
        assert!(!trie.is_foreign_root(Path::new("/ws/deep"), Path::new("/ws")));
        assert!(trie.is_foreign_root(Path::new("/ws/deep/nested"), Path::new("/ws")));
    }
}
