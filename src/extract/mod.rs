//! File extraction: one file in, one durable row (plus symbols and
//! relations) out, deterministically.
//!
//! The extractor never raises to the indexer. Every failure mode is a
//! value: `Unchanged` short-circuits on delta checks, `Missing` maps a
//! file that vanished between stat and read to a silent skip, and
//! `Failed` records the reason without aborting the batch.

pub mod ast;
pub mod fallback;
pub mod normalize;

pub use ast::SymbolSpan;
pub use fallback::Lang;
pub use normalize::{CjkTokenizer, Redactor, Tokenizer};

use crate::settings::Settings;
use crate::types::{EngineDoc, ParseStatus, RelationRow, RootId, SymbolRow};
use crate::workspace;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

/// Magic prefix for zlib-compressed stored content.
pub const ZLIB_MAGIC: &[u8; 5] = b"ZLIB\0";

/// Byte cap for the engine doc body.
const ENGINE_DOC_MAX_BYTES: usize = 50_000;

/// Prior state of a file row, for delta short-circuits.
#[derive(Debug, Clone)]
pub struct FileDelta {
    pub mtime: i64,
    pub size: i64,
    pub content_hash: String,
}

/// Full payload for a changed file.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub db_path: String,
    pub root_id: RootId,
    pub repo: String,
    pub rel_path: String,
    pub mtime: i64,
    pub size: i64,
    /// Possibly `ZLIB\0`-prefixed.
    pub stored_content: Vec<u8>,
    pub content_hash: String,
    pub fts_content: String,
    pub metadata_json: String,
    pub symbols: Vec<SymbolRow>,
    pub relations: Vec<RelationRow>,
    pub parse_status: ParseStatus,
    pub parse_reason: String,
    pub ast_status: ParseStatus,
    pub ast_reason: String,
    pub is_binary: bool,
    pub is_minified: bool,
    pub scan_ts: i64,
    pub importance: f64,
    pub engine_doc: Option<EngineDoc>,
}

/// Result of extracting one file.
#[derive(Debug, Clone)]
pub enum ExtractOutcome {
    Unchanged { db_path: String },
    Changed(Box<FilePayload>),
    Failed {
        db_path: String,
        repo: String,
        error: String,
    },
    /// The file disappeared between stat and read; not a failure.
    Missing,
}

/// Deterministic file extractor shared by the indexer workers.
pub struct Extractor {
    settings: Settings,
    tokenizer: Arc<dyn Tokenizer>,
    redactor: Redactor,
}

impl Extractor {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            tokenizer: Arc::new(CjkTokenizer),
            redactor: Redactor::new(),
        }
    }

    #[must_use]
    pub fn with_tokenizer(settings: Settings, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            settings,
            tokenizer,
            redactor: Redactor::new(),
        }
    }

    #[must_use]
    pub fn tokenizer(&self) -> Arc<dyn Tokenizer> {
        Arc::clone(&self.tokenizer)
    }

    /// Processes one file into an outcome. Never panics, never errors out.
    #[must_use]
    pub fn process_file(
        &self,
        root: &Path,
        path: &Path,
        mtime: i64,
        size: i64,
        scan_ts: i64,
        prev: Option<&FileDelta>,
        force: bool,
    ) -> ExtractOutcome {
        let root = workspace::normalize_root(root);
        let root_id = workspace::root_id(&root);
        let Ok(rel) = path.strip_prefix(&root) else {
            return ExtractOutcome::Failed {
                db_path: path.to_string_lossy().into_owned(),
                repo: "unknown".into(),
                error: "path escapes root".into(),
            };
        };
        let db_path = workspace::encode_db_path(&root_id, rel);
        let repo = workspace::repo_label(&root, rel);
        let rel_path = rel.to_string_lossy().replace('\\', "/");

        if !force {
            if let Some(prev) = prev {
                if prev.mtime == mtime && prev.size == size {
                    return ExtractOutcome::Unchanged { db_path };
                }
            }
        }

        if size as u64 > self.settings.max_parse_bytes {
            return ExtractOutcome::Changed(Box::new(self.skip_payload(
                db_path, root_id, repo, rel_path, mtime, size, scan_ts, "too_large", false,
            )));
        }

        let raw = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ExtractOutcome::Missing,
            Err(e) => {
                return ExtractOutcome::Failed {
                    db_path,
                    repo,
                    error: e.to_string(),
                }
            }
        };
        let content = String::from_utf8_lossy(&raw).into_owned();
        if content.is_empty() {
            return ExtractOutcome::Changed(Box::new(self.skip_payload(
                db_path, root_id, repo, rel_path, mtime, size, scan_ts, "empty", false,
            )));
        }
        if normalize::printable_ratio(&content) < normalize::PRINTABLE_THRESHOLD {
            return ExtractOutcome::Changed(Box::new(self.skip_payload(
                db_path, root_id, repo, rel_path, mtime, size, scan_ts, "binary", true,
            )));
        }

        let content_hash = compute_hash(&content);
        if !force {
            if let Some(prev) = prev {
                if prev.content_hash == content_hash {
                    return ExtractOutcome::Unchanged { db_path };
                }
            }
        }

        let content = if self.settings.redact_enabled {
            self.redactor.redact(&content)
        } else {
            content
        };
        let is_minified = normalize::is_minified(&rel_path, &content);

        let normalized;
        let fts_content = if is_minified {
            normalized = String::new();
            content.chars().take(1024).collect()
        } else {
            normalized = self.tokenizer.normalize(&content);
            truncate_bytes(&normalized, self.settings.fts_max_bytes)
        };

        let importance = importance_of(&rel_path);
        let mut symbols = Vec::new();
        let mut relations = Vec::new();
        let mut ast_status = ParseStatus::Skipped;
        let mut ast_reason = if is_minified { "minified" } else { "none" }.to_string();

        let lang = Lang::from_rel_path(&rel_path);
        if !is_minified && size as u64 <= self.settings.max_ast_bytes {
            if let Some(lang) = lang {
                let (fb_symbols, fb_relations) =
                    fallback::extract_symbols(lang, &db_path, &root_id, &content, importance);
                if ast::supports(lang) {
                    match ast::extract(&db_path, &root_id, lang, &content, importance) {
                        Some((ast_symbols, ast_relations)) => {
                            ast_status = ParseStatus::Ok;
                            ast_reason = "none".into();
                            symbols = merge_symbols(ast_symbols, fb_symbols);
                            relations = merge_relations(ast_relations, fb_relations);
                        }
                        None => {
                            ast_status = ParseStatus::Failed;
                            ast_reason = "parse_error".into();
                            symbols = fb_symbols;
                            relations = fb_relations;
                        }
                    }
                } else {
                    symbols = fb_symbols;
                    relations = fb_relations;
                }
            }
        }

        let (stored_content, metadata_json) = if self.settings.store_content {
            if self.settings.compress_content {
                let compressed = compress_content(&content);
                let meta = format!(
                    "{{\"compressed\":\"zlib\",\"orig_bytes\":{}}}",
                    content.len()
                );
                (compressed, meta)
            } else {
                (content.clone().into_bytes(), "{}".to_string())
            }
        } else {
            (Vec::new(), "{}".to_string())
        };

        let body = if normalized.is_empty() {
            &content
        } else {
            &normalized
        };
        let engine_doc = Some(EngineDoc {
            id: db_path.clone(),
            repo: repo.clone(),
            rel_path: rel_path.clone(),
            root_id: root_id.clone(),
            body_text: truncate_bytes(body, ENGINE_DOC_MAX_BYTES),
            mtime,
            size,
        });

        ExtractOutcome::Changed(Box::new(FilePayload {
            db_path,
            root_id,
            repo,
            rel_path,
            mtime,
            size,
            stored_content,
            content_hash,
            fts_content,
            metadata_json,
            symbols,
            relations,
            parse_status: ParseStatus::Ok,
            parse_reason: "none".into(),
            ast_status,
            ast_reason,
            is_binary: false,
            is_minified,
            scan_ts,
            importance,
            engine_doc,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    fn skip_payload(
        &self,
        db_path: String,
        root_id: RootId,
        repo: String,
        rel_path: String,
        mtime: i64,
        size: i64,
        scan_ts: i64,
        reason: &str,
        is_binary: bool,
    ) -> FilePayload {
        FilePayload {
            db_path,
            root_id,
            repo,
            rel_path,
            mtime,
            size,
            stored_content: Vec::new(),
            content_hash: String::new(),
            fts_content: String::new(),
            metadata_json: "{}".into(),
            symbols: Vec::new(),
            relations: Vec::new(),
            parse_status: ParseStatus::Skipped,
            parse_reason: reason.into(),
            ast_status: ParseStatus::Skipped,
            ast_reason: reason.into(),
            is_binary,
            is_minified: false,
            scan_ts,
            importance: 0.0,
            engine_doc: None,
        }
    }
}

/// SHA-1 of the UTF-8 content, hex-encoded.
#[must_use]
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// zlib-compresses content with the `ZLIB\0` storage prefix.
#[must_use]
pub fn compress_content(content: &str) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::from(*ZLIB_MAGIC), Compression::new(6));
    let _ = encoder.write_all(content.as_bytes());
    encoder.finish().unwrap_or_else(|_| content.as_bytes().to_vec())
}

/// Reverses [`compress_content`]; plain bytes pass through untouched.
#[must_use]
pub fn decompress_content(stored: &[u8]) -> String {
    if let Some(compressed) = stored.strip_prefix(ZLIB_MAGIC.as_slice()) {
        let mut decoder = flate2::read::ZlibDecoder::new(compressed);
        let mut out = String::new();
        if std::io::Read::read_to_string(&mut decoder, &mut out).is_ok() {
            return out;
        }
    }
    String::from_utf8_lossy(stored).into_owned()
}

/// Path-shape importance heuristic feeding ranking boosts.
#[must_use]
pub fn importance_of(rel_path: &str) -> f64 {
    let lower = rel_path.to_ascii_lowercase();
    let mut score: f64 = 1.0;
    if lower.starts_with("src/") || lower.contains("/src/") || lower.starts_with("lib/") {
        score += 0.3;
    }
    if lower.contains("test") || lower.contains("spec") || lower.contains("fixture") {
        score -= 0.4;
    }
    if lower.contains("vendor/") || lower.contains("generated") {
        score -= 0.5;
    }
    score.clamp(0.1, 2.0)
}

fn truncate_bytes(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

/// Merges AST and fallback symbols, deduplicating on
/// `(name, kind, line, end_line)`. AST entries win on conflicts, fallback
/// supplies the doc comments the AST pass leaves empty.
fn merge_symbols(ast: Vec<SymbolRow>, fallback: Vec<SymbolRow>) -> Vec<SymbolRow> {
    let mut out = ast;
    for fb in fallback {
        let dup = out
            .iter_mut()
            .find(|s| s.name == fb.name && s.kind == fb.kind && s.line == fb.line);
        match dup {
            Some(existing) => {
                if existing.doc_comment.is_empty() && !fb.doc_comment.is_empty() {
                    existing.doc_comment = fb.doc_comment;
                }
            }
            None => {
                let key_clash = out.iter().any(|s| {
                    s.name == fb.name
                        && s.kind == fb.kind
                        && s.line == fb.line
                        && s.end_line == fb.end_line
                });
                if !key_clash {
                    out.push(fb);
                }
            }
        }
    }
    out
}

fn merge_relations(ast: Vec<RelationRow>, fallback: Vec<RelationRow>) -> Vec<RelationRow> {
    let mut out = ast;
    let mut seen: ahash::AHashSet<(String, String, &'static str, u32)> = out
        .iter()
        .map(|r| {
            (
                r.from_symbol.clone(),
                r.to_symbol.clone(),
                r.rel_type.as_str(),
                r.line,
            )
        })
        .collect();
    for r in fallback {
        let key = (
            r.from_symbol.clone(),
            r.to_symbol.clone(),
            r.rel_type.as_str(),
            r.line,
        );
        if seen.insert(key) {
            out.push(r);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_and_stat(dir: &Path, name: &str, content: &str) -> (std::path::PathBuf, i64, i64) {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        let mtime = meta
            .modified()
            .unwrap()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        (path, mtime, meta.len() as i64)
    }

    fn extractor() -> Extractor {
        Extractor::new(Settings::default())
    }

    #[test]
    fn test_changed_payload_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let (path, mtime, size) = write_and_stat(dir.path(), "app.py", "def hello():\n    return 1\n");
        let out = extractor().process_file(dir.path(), &path, mtime, size, 100, None, false);
        let ExtractOutcome::Changed(payload) = out else {
            panic!("expected changed");
        };
        assert_eq!(payload.parse_status, ParseStatus::Ok);
        assert!(payload.db_path.ends_with("/app.py"));
        assert!(payload.symbols.iter().any(|s| s.name == "hello"));
        assert_eq!(
            decompress_content(&payload.stored_content),
            "def hello():\n    return 1\n"
        );
        assert!(payload.engine_doc.is_some());
    }

    #[test]
    fn test_unchanged_on_same_stat() {
        let dir = tempfile::TempDir::new().unwrap();
        let (path, mtime, size) = write_and_stat(dir.path(), "a.py", "x = 1\n");
        let prev = FileDelta {
            mtime,
            size,
            content_hash: String::new(),
        };
        let out = extractor().process_file(dir.path(), &path, mtime, size, 100, Some(&prev), false);
        assert!(matches!(out, ExtractOutcome::Unchanged { .. }));
    }

    #[test]
    fn test_unchanged_on_same_hash() {
        let dir = tempfile::TempDir::new().unwrap();
        let content = "x = 1\n";
        let (path, mtime, size) = write_and_stat(dir.path(), "a.py", content);
        let prev = FileDelta {
            mtime: mtime - 100,
            size,
            content_hash: compute_hash(content),
        };
        let out = extractor().process_file(dir.path(), &path, mtime, size, 100, Some(&prev), false);
        assert!(matches!(out, ExtractOutcome::Unchanged { .. }));
    }

    #[test]
    fn test_force_overrides_delta() {
        let dir = tempfile::TempDir::new().unwrap();
        let (path, mtime, size) = write_and_stat(dir.path(), "a.py", "x = 1\n");
        let prev = FileDelta {
            mtime,
            size,
            content_hash: compute_hash("x = 1\n"),
        };
        let out = extractor().process_file(dir.path(), &path, mtime, size, 100, Some(&prev), true);
        assert!(matches!(out, ExtractOutcome::Changed(_)));
    }

    #[test]
    fn test_missing_file_is_silent_skip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ghost.py");
        let out = extractor().process_file(dir.path(), &path, 0, 10, 100, None, false);
        assert!(matches!(out, ExtractOutcome::Missing));
    }

    #[test]
    fn test_empty_file_skips() {
        let dir = tempfile::TempDir::new().unwrap();
        let (path, mtime, size) = write_and_stat(dir.path(), "empty.py", "");
        let out = extractor().process_file(dir.path(), &path, mtime, size, 100, None, false);
        let ExtractOutcome::Changed(payload) = out else {
            panic!("expected skip payload");
        };
        assert_eq!(payload.parse_status, ParseStatus::Skipped);
        assert_eq!(payload.parse_reason, "empty");
    }

    #[test]
    fn test_binary_detection() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("blob.bin2");
        std::fs::write(&path, b"\x01\x02\x03\x04abc\x05\x06\x07\x08\x09").unwrap();
        let out = extractor().process_file(dir.path(), &path, 1, 12, 100, None, false);
        let ExtractOutcome::Changed(payload) = out else {
            panic!("expected skip payload");
        };
        assert!(payload.is_binary);
        assert_eq!(payload.parse_reason, "binary");
    }

    #[test]
    fn test_too_large_skips_without_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let (path, mtime, _) = write_and_stat(dir.path(), "big.py", "x = 1\n");
        let huge = 100 * 1024 * 1024;
        let out = extractor().process_file(dir.path(), &path, mtime, huge, 100, None, false);
        let ExtractOutcome::Changed(payload) = out else {
            panic!("expected skip payload");
        };
        assert_eq!(payload.parse_reason, "too_large");
    }

    #[test]
    fn test_minified_skips_ast() {
        let dir = tempfile::TempDir::new().unwrap();
        let long = format!("var a={};", "x".repeat(400));
        let (path, mtime, size) = write_and_stat(dir.path(), "app.min.js", &long);
        let out = extractor().process_file(dir.path(), &path, mtime, size, 100, None, false);
        let ExtractOutcome::Changed(payload) = out else {
            panic!("expected changed");
        };
        assert!(payload.is_minified);
        assert_eq!(payload.ast_status, ParseStatus::Skipped);
        assert_eq!(payload.ast_reason, "minified");
    }

    #[test]
    fn test_cjk_survives_in_fts_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let (path, mtime, size) =
            write_and_stat(dir.path(), "notes.md", "# 포털\n네이버 검색 연동\n");
        let out = extractor().process_file(dir.path(), &path, mtime, size, 100, None, false);
        let ExtractOutcome::Changed(payload) = out else {
            panic!("expected changed");
        };
        assert!(payload.fts_content.contains("네이버"));
    }

    #[test]
    fn test_compression_roundtrip() {
        let original = "fn main() { println!(\"hello\"); }\n".repeat(50);
        let stored = compress_content(&original);
        assert!(stored.starts_with(ZLIB_MAGIC));
        assert!(stored.len() < original.len());
        assert_eq!(decompress_content(&stored), original);
    }

    #[test]
    fn test_plain_bytes_pass_through_decompress() {
        assert_eq!(decompress_content(b"plain text"), "plain text");
    }

    #[test]
    fn test_redaction_applies_before_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let (path, mtime, size) = write_and_stat(
            dir.path(),
            "conf.py",
            "api_key = \"sk1234567890abcdef\"\n",
        );
        let out = extractor().process_file(dir.path(), &path, mtime, size, 100, None, false);
        let ExtractOutcome::Changed(payload) = out else {
            panic!("expected changed");
        };
        let stored = decompress_content(&payload.stored_content);
        assert!(!stored.contains("sk1234567890abcdef"));
        assert!(!payload.fts_content.contains("sk1234567890abcdef"));
    }
}
