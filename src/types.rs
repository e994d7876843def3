//! Type-safe newtypes and shared domain types for sari.
//!
//! These newtypes provide compile-time safety and semantic clarity
//! for core domain concepts: workspace roots, db-paths, symbol ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Stable opaque identifier derived from an absolute workspace root path.
///
/// Format: `root-<12 hex>`. Legacy db-paths without this prefix are
/// tolerated on read when the store reports legacy rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootId(pub String);

impl RootId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the `root-` prefixed canonical form.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.0.starts_with("root-")
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable symbol identifier: `hash(path|kind|qualname)` rendered as hex.
///
/// The invariant `(path, kind, qualname) -> symbol_id` is what lets
/// relations reference symbols across re-index cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(pub String);

impl SymbolId {
    #[must_use]
    pub fn derive(db_path: &str, kind: SymbolKind, qualname: &str) -> Self {
        let seed = format!("{db_path}|{}|{qualname}", kind.as_str());
        Self(format!("{:016x}", xxh3_64(seed.as_bytes())))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Symbol kinds recognized across extraction backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Struct,
    Trait,
    Enum,
    Module,
    Variable,
}

impl SymbolKind {
    pub const ALL: [SymbolKind; 9] = [
        Self::Function,
        Self::Method,
        Self::Class,
        Self::Interface,
        Self::Struct,
        Self::Trait,
        Self::Enum,
        Self::Module,
        Self::Variable,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Struct => "struct",
            Self::Trait => "trait",
            Self::Enum => "enum",
            Self::Module => "module",
            Self::Variable => "variable",
        }
    }
}

impl std::str::FromStr for SymbolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "function" => Ok(Self::Function),
            "method" => Ok(Self::Method),
            "class" => Ok(Self::Class),
            "interface" => Ok(Self::Interface),
            "struct" => Ok(Self::Struct),
            "trait" => Ok(Self::Trait),
            "enum" => Ok(Self::Enum),
            "module" => Ok(Self::Module),
            "variable" => Ok(Self::Variable),
            other => Err(format!("unknown symbol kind: '{other}'")),
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directed relation kinds between symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelType {
    Calls,
    Extends,
    Implements,
    Uses,
}

impl RelType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::Uses => "uses",
        }
    }
}

impl std::str::FromStr for RelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "calls" => Ok(Self::Calls),
            "extends" => Ok(Self::Extends),
            "implements" => Ok(Self::Implements),
            "uses" => Ok(Self::Uses),
            other => Err(format!("unknown relation type: '{other}'")),
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse / AST status of an indexed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseStatus {
    Ok,
    Skipped,
    Failed,
}

impl ParseStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "ok" => Self::Ok,
            "failed" => Self::Failed,
            _ => Self::Skipped,
        }
    }
}

/// A symbol row produced by extraction and persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRow {
    pub symbol_id: SymbolId,
    pub path: String,
    pub root_id: RootId,
    pub name: String,
    pub qualname: String,
    pub kind: SymbolKind,
    pub line: u32,
    pub end_line: u32,
    pub content: String,
    pub parent: Option<String>,
    pub meta_json: String,
    pub doc_comment: String,
    pub importance_score: f64,
}

/// A directed edge between two symbols. Either endpoint may be unresolved
/// (by-name only) when the target was not indexed at extraction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationRow {
    pub from_symbol_id: Option<SymbolId>,
    pub from_symbol: String,
    pub from_path: String,
    pub to_symbol_id: Option<SymbolId>,
    pub to_symbol: String,
    pub to_path: Option<String>,
    pub rel_type: RelType,
    pub line: u32,
}

/// Transient projection of a file fed into the FTS index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDoc {
    /// doc_id == db_path
    pub id: String,
    pub repo: String,
    pub rel_path: String,
    pub root_id: RootId,
    pub body_text: String,
    pub mtime: i64,
    pub size: i64,
}

/// Lightweight metadata view of a persisted file row.
#[derive(Debug, Clone)]
pub struct FileMeta {
    pub db_path: String,
    pub root_id: RootId,
    pub repo: String,
    pub mtime: i64,
    pub size: i64,
    pub content_hash: String,
    pub parse_status: ParseStatus,
    pub is_binary: bool,
    pub is_minified: bool,
    pub deleted_ts: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_symbol_id_is_deterministic() {
        let a = SymbolId::derive("root-abc/src/app.py", SymbolKind::Function, "hello");
        let b = SymbolId::derive("root-abc/src/app.py", SymbolKind::Function, "hello");
        assert_eq!(a, b);
        let c = SymbolId::derive("root-abc/src/app.py", SymbolKind::Method, "hello");
        assert_ne!(a, c);
    }

    #[test]
    fn test_symbol_kind_roundtrip() {
        for kind in SymbolKind::ALL {
            assert_eq!(SymbolKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(SymbolKind::from_str("gadget").is_err());
    }

    #[test]
    fn test_rel_type_roundtrip() {
        for rel in [
            RelType::Calls,
            RelType::Extends,
            RelType::Implements,
            RelType::Uses,
        ] {
            assert_eq!(RelType::from_str(rel.as_str()).unwrap(), rel);
        }
    }

    #[test]
    fn test_parse_status_tolerates_unknown() {
        assert_eq!(ParseStatus::parse("ok"), ParseStatus::Ok);
        assert_eq!(ParseStatus::parse("whatever"), ParseStatus::Skipped);
    }
}
