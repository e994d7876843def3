//! Ranked query execution over the FTS index.
//!
//! FTS5 bm25 provides the base relevance; multiplicative boosts come from
//! the file's importance score and (optionally) recency. Ties break by
//! path lexicographic order so results are stable across runs.

use crate::error::{ToolCode, ToolError};
use crate::extract::{CjkTokenizer, Tokenizer};
use crate::store::Store;
use crate::types::RootId;
use regex::RegexBuilder;
use rusqlite::params;
use std::sync::Arc;

/// How `meta.total` was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TotalMode {
    #[default]
    Exact,
    Approx,
}

impl TotalMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Approx => "approx",
        }
    }
}

/// Search options. Domains: `limit` in `[1,100]`, `snippet_lines` in
/// `[1,20]`; the tool layer rejects out-of-domain values, the engine
/// clamps defensively.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub query: String,
    pub repo: Option<String>,
    pub root_ids: Vec<RootId>,
    pub limit: usize,
    pub offset: usize,
    pub path_pattern: Option<String>,
    pub file_types: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub use_regex: bool,
    pub case_sensitive: bool,
    pub recency_boost: bool,
    pub total_mode: TotalMode,
    pub snippet_lines: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            repo: None,
            root_ids: Vec::new(),
            limit: 20,
            offset: 0,
            path_pattern: None,
            file_types: Vec::new(),
            exclude_patterns: Vec::new(),
            use_regex: false,
            case_sensitive: false,
            recency_boost: false,
            total_mode: TotalMode::Exact,
            snippet_lines: 3,
        }
    }
}

/// One ranked hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub repo: String,
    pub path: String,
    pub score: f64,
    /// Lines prefixed `L<line>: ` so consumers can recover line numbers.
    pub snippet: String,
    pub mtime: i64,
    pub size: i64,
    pub file_type: String,
    pub hit_reason: String,
    pub match_count: usize,
}

/// Result metadata.
#[derive(Debug, Clone)]
pub struct SearchMeta {
    pub total: usize,
    pub total_mode: TotalMode,
    pub engine: &'static str,
}

/// A repo candidate: files-matching count as the score.
#[derive(Debug, Clone)]
pub struct RepoCandidate {
    pub repo: String,
    pub score: i64,
    pub reason: String,
}

/// Overfetch cap for exact totals and post-filtering headroom.
const CANDIDATE_CAP: usize = 1000;
/// File cap for the regex scan path.
const REGEX_SCAN_CAP: usize = 2000;

struct Candidate {
    db_path: String,
    repo: String,
    rel_path: String,
    mtime: i64,
    size: i64,
    importance: f64,
    relevance: f64,
}

/// Query engine over one store.
pub struct Engine {
    store: Arc<Store>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Engine {
    #[must_use]
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            tokenizer: Arc::new(CjkTokenizer),
        }
    }

    #[must_use]
    pub fn with_tokenizer(store: Arc<Store>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { store, tokenizer }
    }

    #[must_use]
    pub fn tokenizer_ready(&self) -> bool {
        !self.tokenizer.bundle_tag().is_empty()
    }

    #[must_use]
    pub fn tokenizer_bundle_tag(&self) -> &'static str {
        self.tokenizer.bundle_tag()
    }

    #[must_use]
    pub fn tokenizer_bundle_path(&self) -> &'static str {
        self.tokenizer.bundle_path()
    }

    /// Executes a ranked search.
    ///
    /// # Errors
    ///
    /// `ERR_ENGINE_QUERY` on FTS/regex failure, `DB_ERROR` on storage
    /// failure.
    pub fn search(&self, opts: &SearchOptions) -> Result<(Vec<SearchHit>, SearchMeta), ToolError> {
        let limit = opts.limit.clamp(1, 100);
        let snippet_lines = opts.snippet_lines.clamp(1, 20);

        let mut candidates = if opts.use_regex {
            self.regex_candidates(opts)?
        } else {
            self.fts_candidates(opts)?
        };

        // Post-filters that FTS cannot express.
        let path_re = opts
            .path_pattern
            .as_deref()
            .and_then(|g| crate::scanner::compile_patterns(&[g.to_string()]));
        let exclude_re = crate::scanner::compile_patterns(&opts.exclude_patterns);
        candidates.retain(|c| {
            if let Some(re) = &path_re {
                if !re.is_match(&c.rel_path) && !re.is_match(&c.db_path) {
                    return false;
                }
            }
            if let Some(re) = &exclude_re {
                if re.is_match(&c.rel_path) || re.is_match(&c.db_path) {
                    return false;
                }
            }
            if !opts.file_types.is_empty() {
                let ft = file_type_of(&c.rel_path);
                if !opts.file_types.iter().any(|t| t.trim_start_matches('.') == ft) {
                    return false;
                }
            }
            true
        });

        // Boosts are multiplicative on the base relevance.
        let now = crate::store::now_ts();
        for c in &mut candidates {
            let mut score = c.relevance * (0.5 + c.importance / 2.0);
            if opts.recency_boost {
                let age_days = ((now - c.mtime).max(0) as f64) / 86_400.0;
                score *= 1.0 + 0.3 / (1.0 + age_days / 30.0);
            }
            c.relevance = score;
        }
        candidates.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.db_path.cmp(&b.db_path))
        });

        let total = candidates.len();
        let total_mode = if opts.total_mode == TotalMode::Exact && total < CANDIDATE_CAP {
            TotalMode::Exact
        } else {
            TotalMode::Approx
        };

        let engine_name = if opts.use_regex { "regex" } else { "fts5" };
        let mut hits = Vec::new();
        for c in candidates.into_iter().skip(opts.offset).take(limit) {
            let (snippet, match_count) = self.build_snippet(&c.db_path, opts, snippet_lines);
            hits.push(SearchHit {
                repo: c.repo,
                file_type: file_type_of(&c.rel_path),
                path: c.db_path,
                score: c.relevance,
                snippet,
                mtime: c.mtime,
                size: c.size,
                hit_reason: engine_name.to_string(),
                match_count,
            });
        }

        Ok((
            hits,
            SearchMeta {
                total,
                total_mode,
                engine: engine_name,
            },
        ))
    }

    /// Counts files per repo whose FTS body matches the query.
    ///
    /// # Errors
    ///
    /// `ERR_ENGINE_QUERY` on FTS failure, `DB_ERROR` on storage failure.
    pub fn repo_candidates(
        &self,
        query: &str,
        limit: usize,
        root_ids: &[RootId],
    ) -> Result<Vec<RepoCandidate>, ToolError> {
        let Some(match_expr) = self.fts_match_expr(query) else {
            return Ok(Vec::new());
        };
        let conn = self.store.conn().map_err(ToolError::from)?;
        let mut sql = String::from(
            r"
            SELECT f.repo, COUNT(*) AS n
            FROM files_fts
            JOIN files f ON f.db_path = files_fts.db_path
            WHERE files_fts MATCH ?1 AND f.deleted_ts IS NULL
            ",
        );
        push_root_filter(&mut sql, root_ids);
        sql.push_str(" GROUP BY f.repo ORDER BY n DESC, f.repo LIMIT ?2");

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| ToolError::new(ToolCode::EngineQuery, e.to_string()))?;
        let rows = stmt
            .query_map(params![match_expr, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| ToolError::new(ToolCode::EngineQuery, e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ToolError::new(ToolCode::EngineQuery, e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|(repo, score)| RepoCandidate {
                reason: format!("{score} files matching '{query}'"),
                repo,
                score,
            })
            .collect())
    }

    /// Builds the FTS5 MATCH expression from a user query: normalize with
    /// the same tokenizer the index used, quote each token. `None` when
    /// nothing searchable remains.
    fn fts_match_expr(&self, query: &str) -> Option<String> {
        let normalized = self.tokenizer.normalize(query);
        let tokens: Vec<String> = normalized
            .split_whitespace()
            .map(|t| t.replace('"', ""))
            .filter(|t| !t.is_empty())
            .take(12)
            .map(|t| format!("\"{t}\""))
            .collect();
        if tokens.is_empty() {
            return None;
        }
        Some(tokens.join(" "))
    }

    fn fts_candidates(&self, opts: &SearchOptions) -> Result<Vec<Candidate>, ToolError> {
        let Some(match_expr) = self.fts_match_expr(&opts.query) else {
            return Ok(Vec::new());
        };
        let conn = self.store.conn().map_err(ToolError::from)?;
        let mut sql = String::from(
            r"
            SELECT f.db_path, f.repo, f.rel_path, f.mtime, f.size, f.importance,
                   bm25(files_fts) AS rank
            FROM files_fts
            JOIN files f ON f.db_path = files_fts.db_path
            WHERE files_fts MATCH ?1 AND f.deleted_ts IS NULL
            ",
        );
        if opts.repo.is_some() {
            sql.push_str(" AND f.repo = ?3");
        }
        push_root_filter(&mut sql, &opts.root_ids);
        sql.push_str(" ORDER BY rank LIMIT ?2");

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| ToolError::new(ToolCode::EngineQuery, e.to_string()))?;
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Candidate> {
            let rank: f64 = row.get(6)?;
            Ok(Candidate {
                db_path: row.get(0)?,
                repo: row.get(1)?,
                rel_path: row.get(2)?,
                mtime: row.get(3)?,
                size: row.get(4)?,
                importance: row.get(5)?,
                // bm25() returns lower-is-better; flip so bigger is better.
                relevance: -rank,
            })
        };
        let cap = CANDIDATE_CAP as i64;
        let rows = if let Some(repo) = &opts.repo {
            stmt.query_map(params![match_expr, cap, repo], map)
        } else {
            stmt.query_map(params![match_expr, cap], map)
        }
        .map_err(|e| ToolError::new(ToolCode::EngineQuery, e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ToolError::new(ToolCode::EngineQuery, e.to_string()))?;
        Ok(rows)
    }

    /// Regex search over stored content. Bounded scan; intended for
    /// precise patterns, not broad discovery.
    fn regex_candidates(&self, opts: &SearchOptions) -> Result<Vec<Candidate>, ToolError> {
        let re = RegexBuilder::new(&opts.query)
            .case_insensitive(!opts.case_sensitive)
            .size_limit(1 << 20)
            .build()
            .map_err(|e| {
                ToolError::new(ToolCode::EngineQuery, format!("invalid regex: {e}"))
            })?;

        let conn = self.store.conn().map_err(ToolError::from)?;
        let mut sql = String::from(
            r"
            SELECT f.db_path, f.repo, f.rel_path, f.mtime, f.size, f.importance
            FROM files f
            WHERE f.deleted_ts IS NULL AND f.is_binary = 0
            ",
        );
        if opts.repo.is_some() {
            sql.push_str(" AND f.repo = ?2");
        }
        push_root_filter(&mut sql, &opts.root_ids);
        sql.push_str(" ORDER BY f.db_path LIMIT ?1");

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| ToolError::new(ToolCode::EngineQuery, e.to_string()))?;
        let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String, String, i64, i64, f64)> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        };
        let cap = REGEX_SCAN_CAP as i64;
        let rows = if let Some(repo) = &opts.repo {
            stmt.query_map(params![cap, repo], map)
        } else {
            stmt.query_map(params![cap], map)
        }
        .map_err(|e| ToolError::new(ToolCode::EngineQuery, e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ToolError::new(ToolCode::EngineQuery, e.to_string()))?;

        let mut out = Vec::new();
        for (db_path, repo, rel_path, mtime, size, importance) in rows {
            let Ok(content) = self.store.read_file(&db_path) else {
                continue;
            };
            let matches = content.lines().filter(|l| re.is_match(l)).count();
            if matches > 0 {
                out.push(Candidate {
                    db_path,
                    repo,
                    rel_path,
                    mtime,
                    size,
                    importance,
                    relevance: matches as f64,
                });
            }
        }
        Ok(out)
    }

    /// Best-window snippet around the first matches, lines prefixed
    /// `L<line>: `.
    fn build_snippet(
        &self,
        db_path: &str,
        opts: &SearchOptions,
        snippet_lines: usize,
    ) -> (String, usize) {
        let Ok(content) = self.store.read_file(db_path) else {
            return (String::new(), 0);
        };
        let lines: Vec<&str> = content.lines().collect();

        let matcher: Box<dyn Fn(&str) -> bool> = if opts.use_regex {
            match RegexBuilder::new(&opts.query)
                .case_insensitive(!opts.case_sensitive)
                .build()
            {
                Ok(re) => Box::new(move |line: &str| re.is_match(line)),
                Err(_) => return (String::new(), 0),
            }
        } else {
            let terms: Vec<String> = opts
                .query
                .split_whitespace()
                .map(|t| {
                    if opts.case_sensitive {
                        t.to_string()
                    } else {
                        t.to_lowercase()
                    }
                })
                .filter(|t| !t.is_empty())
                .collect();
            let case_sensitive = opts.case_sensitive;
            Box::new(move |line: &str| {
                let haystack = if case_sensitive {
                    line.to_string()
                } else {
                    line.to_lowercase()
                };
                terms.iter().any(|t| haystack.contains(t))
            })
        };

        let match_lines: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| matcher(l))
            .map(|(i, _)| i)
            .collect();
        let match_count = match_lines.len();
        let center = match_lines.first().copied().unwrap_or(0);

        let half = snippet_lines / 2;
        let start = center.saturating_sub(half);
        let end = (start + snippet_lines).min(lines.len());
        let snippet = lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, l)| format!("L{}: {}", start + i + 1, l))
            .collect::<Vec<_>>()
            .join("\n");
        (snippet, match_count)
    }
}

fn push_root_filter(sql: &mut String, root_ids: &[RootId]) {
    if root_ids.is_empty() {
        return;
    }
    let list = root_ids
        .iter()
        .map(|r| format!("'{}'", r.as_str().replace('\'', "")))
        .collect::<Vec<_>>()
        .join(",");
    sql.push_str(&format!(" AND f.root_id IN ({list})"));
}

fn file_type_of(rel_path: &str) -> String {
    rel_path
        .rsplit('/')
        .next()
        .and_then(|n| n.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractOutcome, Extractor};
    use crate::settings::Settings;
    use crate::store::now_ts;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<Store>,
        engine: Engine,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("index.db")).unwrap());
        let extractor = Extractor::new(Settings::default());
        let mut payloads = Vec::new();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, content).unwrap();
            let meta = std::fs::metadata(&path).unwrap();
            let mtime = meta
                .modified()
                .unwrap()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_secs() as i64;
            match extractor.process_file(
                dir.path(),
                &path,
                mtime,
                meta.len() as i64,
                now_ts(),
                None,
                false,
            ) {
                ExtractOutcome::Changed(p) => payloads.push(*p),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        store.upsert_files_turbo_sync(payloads, Vec::new()).unwrap();
        let engine = Engine::new(Arc::clone(&store));
        Fixture {
            _dir: dir,
            store,
            engine,
        }
    }

    #[test]
    fn test_basic_fts_search() {
        let fx = fixture(&[
            ("app.py", "def hello():\n    return 'hi'\n"),
            ("README.md", "# Project\nSay hello to the docs.\n"),
            ("other.py", "x = 1\n"),
        ]);
        let opts = SearchOptions {
            query: "hello".into(),
            ..Default::default()
        };
        let (hits, meta) = fx.engine.search(&opts).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(meta.total, 2);
        assert_eq!(meta.engine, "fts5");
        assert!(hits.iter().all(|h| h.match_count >= 1));
        // Snippet lines carry the L<line>: prefix.
        assert!(hits[0].snippet.contains("L1:") || hits[0].snippet.contains("L2:"));
    }

    #[test]
    fn test_empty_query_returns_nothing() {
        let fx = fixture(&[("a.py", "x = 1\n")]);
        let opts = SearchOptions::default();
        let (hits, meta) = fx.engine.search(&opts).unwrap();
        assert!(hits.is_empty());
        assert_eq!(meta.total, 0);
    }

    #[test]
    fn test_repo_filter() {
        let fx = fixture(&[
            ("backend/api.py", "def serve(): pass\n"),
            ("frontend/app.js", "function serve() {}\n"),
        ]);
        let opts = SearchOptions {
            query: "serve".into(),
            repo: Some("backend".into()),
            ..Default::default()
        };
        let (hits, _) = fx.engine.search(&opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].repo, "backend");
    }

    #[test]
    fn test_file_type_filter() {
        let fx = fixture(&[
            ("a.py", "needle in python\n"),
            ("b.md", "needle in markdown\n"),
        ]);
        let opts = SearchOptions {
            query: "needle".into(),
            file_types: vec!["py".into()],
            ..Default::default()
        };
        let (hits, _) = fx.engine.search(&opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].path.ends_with("a.py"));
    }

    #[test]
    fn test_path_pattern_and_exclude() {
        let fx = fixture(&[
            ("src/core.py", "pattern target\n"),
            ("docs/notes.md", "pattern target\n"),
        ]);
        let opts = SearchOptions {
            query: "pattern".into(),
            path_pattern: Some("src/*".into()),
            ..Default::default()
        };
        let (hits, _) = fx.engine.search(&opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].path.contains("src/core.py"));

        let opts = SearchOptions {
            query: "pattern".into(),
            exclude_patterns: vec!["docs/*".into()],
            ..Default::default()
        };
        let (hits, _) = fx.engine.search(&opts).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_regex_search() {
        let fx = fixture(&[
            ("a.py", "def process_data():\n    pass\n"),
            ("b.py", "def unrelated():\n    pass\n"),
        ]);
        let opts = SearchOptions {
            query: r"def\s+process_\w+".into(),
            use_regex: true,
            ..Default::default()
        };
        let (hits, meta) = fx.engine.search(&opts).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(meta.engine, "regex");
        assert_eq!(hits[0].hit_reason, "regex");
    }

    #[test]
    fn test_invalid_regex_is_engine_error() {
        let fx = fixture(&[("a.py", "x\n")]);
        let opts = SearchOptions {
            query: "(unclosed".into(),
            use_regex: true,
            ..Default::default()
        };
        let err = fx.engine.search(&opts).unwrap_err();
        assert_eq!(err.code, ToolCode::EngineQuery);
    }

    #[test]
    fn test_cjk_query_roundtrip() {
        let fx = fixture(&[("notes.md", "# 메모\n네이버 검색 연동 작업\n")]);
        let opts = SearchOptions {
            query: "네이버".into(),
            ..Default::default()
        };
        let (hits, _) = fx.engine.search(&opts).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_importance_boost_orders_results() {
        let fx = fixture(&[
            ("tests/test_util.py", "shared_token here\n"),
            ("src/util.py", "shared_token here\n"),
        ]);
        let opts = SearchOptions {
            query: "shared_token".into(),
            ..Default::default()
        };
        let (hits, _) = fx.engine.search(&opts).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].path.contains("src/util.py"));
    }

    #[test]
    fn test_repo_candidates() {
        let fx = fixture(&[
            ("backend/a.py", "token alpha\n"),
            ("backend/b.py", "token beta\n"),
            ("frontend/c.js", "token gamma\n"),
        ]);
        let candidates = fx.engine.repo_candidates("token", 10, &[]).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].repo, "backend");
        assert_eq!(candidates[0].score, 2);
        assert!(candidates[0].reason.contains("2 files"));
        let _ = &fx.store;
    }

    #[test]
    fn test_offset_pagination() {
        let fx = fixture(&[
            ("a.py", "page_token\n"),
            ("b.py", "page_token\n"),
            ("c.py", "page_token\n"),
        ]);
        let opts = SearchOptions {
            query: "page_token".into(),
            limit: 2,
            ..Default::default()
        };
        let (page1, meta) = fx.engine.search(&opts).unwrap();
        assert_eq!(page1.len(), 2);
        assert_eq!(meta.total, 3);
        let opts = SearchOptions {
            offset: 2,
            ..opts
        };
        let (page2, _) = fx.engine.search(&opts).unwrap();
        assert_eq!(page2.len(), 1);
        assert!(!page1.iter().any(|h| h.path == page2[0].path));
    }
}
