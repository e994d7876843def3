//! Persistent store: files, symbols, relations, snippets, contexts, roots,
//! task queue, and the FTS index.
//!
//! Thread discipline: one designated writer thread owns a private
//! connection and applies every mutation; readers go through an r2d2 pool.
//! Readers therefore only ever observe committed state.

mod pragmas;
mod schema;
mod writer;

pub use pragmas::apply_pragmas;
pub use schema::{init_schema, SCHEMA_VERSION};
pub use writer::{BatchResult, FailedFile, WriteOp};

use crate::error::{DbError, DbResult};
use crate::extract::{self, FileDelta, FilePayload};
use crate::types::{
    FileMeta, ParseStatus, RelType, RelationRow, RootId, SymbolId, SymbolKind, SymbolRow,
};
use crossbeam_channel::{bounded, unbounded, Sender};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::JoinHandle;

/// Seconds since the unix epoch.
#[must_use]
pub fn now_ts() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// A tagged snippet row. `tags`/`related_files` on contexts and
/// `meta_json` here hold JSON strings; decoding is the tool layer's job.
#[derive(Debug, Clone, Default)]
pub struct SnippetRow {
    pub id: i64,
    pub tag: String,
    pub path: String,
    pub root_id: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub content_hash: String,
    pub anchor_before: String,
    pub anchor_after: String,
    pub note: String,
    pub commit_hash: String,
    pub created_ts: i64,
    pub updated_ts: i64,
    pub meta_json: String,
}

/// Free-form knowledge keyed by topic.
#[derive(Debug, Clone, Default)]
pub struct ContextRow {
    pub topic: String,
    pub content: String,
    /// JSON array string.
    pub tags: String,
    /// JSON array string.
    pub related_files: String,
    pub source: String,
    pub valid_from: Option<i64>,
    pub valid_until: Option<i64>,
    pub deprecated: bool,
    pub updated_ts: i64,
}

/// Per-repo aggregate for `list_files` summaries and `repo_candidates`.
#[derive(Debug, Clone)]
pub struct RepoStat {
    pub repo: String,
    pub files: i64,
    pub bytes: i64,
}

/// One row of a detailed file listing.
#[derive(Debug, Clone)]
pub struct FileListing {
    pub db_path: String,
    pub repo: String,
    pub mtime: i64,
    pub size: i64,
    pub parse_status: String,
}

/// Store handle. Cheap to share behind `Arc`.
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
    tx: Sender<WriteOp>,
    writer: Mutex<Option<JoinHandle<()>>>,
    path: PathBuf,
    legacy_paths: AtomicBool,
}

impl Store {
    /// Opens (or creates) the store at `path`, spawning the writer thread.
    ///
    /// # Errors
    ///
    /// Returns `DbError` when the database cannot be opened or migrated.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let writer_conn = Connection::open(path)?;
        apply_pragmas(&writer_conn)?;
        init_schema(&writer_conn)?;

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(4)
            .min_idle(Some(1))
            .build(manager)?;
        {
            let conn = pool.get()?;
            apply_pragmas(&conn)?;
        }

        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("sari-db-writer".into())
            .spawn(move || writer::run_writer(writer_conn, rx))
            .map_err(|e| DbError::Migration(format!("writer spawn failed: {e}")))?;

        let store = Self {
            pool,
            tx,
            writer: Mutex::new(Some(handle)),
            path: path.to_path_buf(),
            legacy_paths: AtomicBool::new(false),
        };
        store.refresh_legacy_flag();
        Ok(store)
    }

    /// Database file location (informational, for status/doctor).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.path
    }

    /// Gets a read connection from the pool.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Pool` if no connection is available within the
    /// pool timeout.
    pub fn conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(DbError::from)
    }

    /// True when the writer thread is still servicing its channel.
    #[must_use]
    pub fn writer_alive(&self) -> bool {
        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send(WriteOp::Flush { reply: reply_tx }).is_err() {
            return false;
        }
        reply_rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .is_ok()
    }

    // ── Write surface (all through the writer thread) ───────────────────

    pub fn upsert_root(&self, root_id: &RootId, path: &str, label: &str) {
        let _ = self.tx.send(WriteOp::UpsertRoot {
            root_id: root_id.clone(),
            path: path.to_string(),
            label: label.to_string(),
        });
    }

    /// Queues a batch without waiting for it to land.
    pub fn upsert_files_turbo(&self, changes: Vec<FilePayload>, failed: Vec<FailedFile>) {
        let _ = self.tx.send(WriteOp::UpsertBatch {
            changes,
            failed,
            reply: None,
        });
    }

    /// Queues a batch and waits for the commit result.
    ///
    /// # Errors
    ///
    /// Returns `DbError::WriterGone` when the writer has shut down, or the
    /// batch's own error.
    pub fn upsert_files_turbo_sync(
        &self,
        changes: Vec<FilePayload>,
        failed: Vec<FailedFile>,
    ) -> DbResult<BatchResult> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(WriteOp::UpsertBatch {
                changes,
                failed,
                reply: Some(reply_tx),
            })
            .map_err(|_| DbError::WriterGone)?;
        reply_rx.recv().map_err(|_| DbError::WriterGone)?
    }

    /// Soft-deletes rows the scan ending at `scan_ts` did not touch.
    ///
    /// # Errors
    ///
    /// Returns `DbError::WriterGone` when the writer has shut down.
    pub fn finalize_turbo_batch(&self, scan_ts: i64, root_ids: Vec<RootId>) -> DbResult<usize> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(WriteOp::FinalizeScan {
                scan_ts,
                root_ids,
                reply: Some(reply_tx),
            })
            .map_err(|_| DbError::WriterGone)?;
        reply_rx.recv().map_err(|_| DbError::WriterGone)?
    }

    /// Hard-purges rows soft-deleted before `cutoff_ts`.
    ///
    /// # Errors
    ///
    /// Returns `DbError::WriterGone` when the writer has shut down.
    pub fn purge_deleted(&self, cutoff_ts: i64) -> DbResult<usize> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(WriteOp::PurgeDeleted {
                cutoff_ts,
                reply: Some(reply_tx),
            })
            .map_err(|_| DbError::WriterGone)?;
        reply_rx.recv().map_err(|_| DbError::WriterGone)?
    }

    /// Saves (or updates by tag) a snippet, appending a version row.
    ///
    /// # Errors
    ///
    /// Returns `DbError::WriterGone` when the writer has shut down.
    pub fn save_snippet(&self, row: SnippetRow) -> DbResult<i64> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(WriteOp::SaveSnippet {
                row,
                reply: reply_tx,
            })
            .map_err(|_| DbError::WriterGone)?;
        reply_rx.recv().map_err(|_| DbError::WriterGone)?
    }

    /// Deletes a snippet by id or tag; returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns `DbError::WriterGone` when the writer has shut down.
    pub fn delete_snippet(&self, id: Option<i64>, tag: Option<String>) -> DbResult<usize> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(WriteOp::DeleteSnippet {
                id,
                tag,
                reply: reply_tx,
            })
            .map_err(|_| DbError::WriterGone)?;
        reply_rx.recv().map_err(|_| DbError::WriterGone)?
    }

    /// Upserts a knowledge context by topic.
    ///
    /// # Errors
    ///
    /// Returns `DbError::WriterGone` when the writer has shut down.
    pub fn upsert_context(&self, row: ContextRow) -> DbResult<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(WriteOp::UpsertContext {
                row,
                reply: reply_tx,
            })
            .map_err(|_| DbError::WriterGone)?;
        reply_rx.recv().map_err(|_| DbError::WriterGone)?
    }

    /// Deletes a context by topic; returns the number deleted.
    ///
    /// # Errors
    ///
    /// Returns `DbError::WriterGone` when the writer has shut down.
    pub fn delete_context(&self, topic: &str) -> DbResult<usize> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(WriteOp::DeleteContext {
                topic: topic.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| DbError::WriterGone)?;
        reply_rx.recv().map_err(|_| DbError::WriterGone)?
    }

    /// Bumps `scan_ts` for files a scan saw but did not need to rewrite.
    pub fn touch_scan(&self, db_paths: Vec<String>, scan_ts: i64) {
        if db_paths.is_empty() {
            return;
        }
        let _ = self.tx.send(WriteOp::TouchScan { db_paths, scan_ts });
    }

    /// Write barrier: returns once everything queued before it committed.
    pub fn flush(&self) {
        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send(WriteOp::Flush { reply: reply_tx }).is_ok() {
            let _ = reply_rx.recv_timeout(std::time::Duration::from_secs(10));
        }
    }

    /// Orderly shutdown of the writer thread.
    pub fn close(&self) {
        let _ = self.tx.send(WriteOp::Shutdown);
        if let Ok(mut guard) = self.writer.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }

    // ── Read surface ────────────────────────────────────────────────────

    /// Prior `(mtime, size, content_hash)` of a live file row.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn get_file_meta(&self, db_path: &str) -> DbResult<Option<FileDelta>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT mtime, size, content_hash FROM files WHERE db_path = ?1 AND deleted_ts IS NULL",
                params![db_path],
                |row| {
                    Ok(FileDelta {
                        mtime: row.get(0)?,
                        size: row.get(1)?,
                        content_hash: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Full metadata view of a file row (live or soft-deleted).
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn get_file_record(&self, db_path: &str) -> DbResult<Option<FileMeta>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r"
                SELECT db_path, root_id, repo, mtime, size, content_hash,
                       parse_status, is_binary, is_minified, deleted_ts
                FROM files WHERE db_path = ?1
                ",
                params![db_path],
                |row| {
                    Ok(FileMeta {
                        db_path: row.get(0)?,
                        root_id: RootId(row.get(1)?),
                        repo: row.get(2)?,
                        mtime: row.get(3)?,
                        size: row.get(4)?,
                        content_hash: row.get(5)?,
                        parse_status: ParseStatus::parse(&row.get::<_, String>(6)?),
                        is_binary: row.get::<_, i64>(7)? != 0,
                        is_minified: row.get::<_, i64>(8)? != 0,
                        deleted_ts: row.get(9)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Reads stored file content, transparently decompressing. Tolerates
    /// legacy db-paths when the store carries them.
    ///
    /// # Errors
    ///
    /// Returns `DbError::FileNotFound` when no live row matches.
    pub fn read_file(&self, db_path: &str) -> DbResult<String> {
        let conn = self.conn()?;
        let lookup = |key: &str| -> DbResult<Option<Vec<u8>>> {
            Ok(conn
                .query_row(
                    "SELECT content FROM files WHERE db_path = ?1 AND deleted_ts IS NULL",
                    params![key],
                    |row| row.get::<_, Option<Vec<u8>>>(0),
                )
                .optional()?
                .flatten())
        };
        let mut stored = lookup(db_path)?;
        if stored.is_none() && self.has_legacy_paths() {
            // Legacy rows were keyed by bare relative path.
            let (_, rel) = crate::workspace::split_db_path(db_path);
            stored = lookup(rel)?;
        }
        match stored {
            Some(bytes) => Ok(extract::decompress_content(&bytes)),
            None => Err(DbError::FileNotFound {
                db_path: db_path.to_string(),
            }),
        }
    }

    /// Counts live file rows, optionally per root.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn file_count(&self, root_ids: Option<&[RootId]>) -> DbResult<i64> {
        let conn = self.conn()?;
        match root_ids {
            None => Ok(conn.query_row(
                "SELECT COUNT(*) FROM files WHERE deleted_ts IS NULL",
                [],
                |r| r.get(0),
            )?),
            Some(ids) => {
                let mut total = 0i64;
                for id in ids {
                    total += conn.query_row(
                        "SELECT COUNT(*) FROM files WHERE deleted_ts IS NULL AND root_id = ?1",
                        params![id.as_str()],
                        |r| r.get::<_, i64>(0),
                    )?;
                }
                Ok(total)
            }
        }
    }

    /// Counts symbol rows.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn symbol_count(&self) -> DbResult<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?)
    }

    /// Per-repo aggregates over live files.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn get_repo_stats(&self, root_ids: Option<&[RootId]>) -> DbResult<Vec<RepoStat>> {
        let conn = self.conn()?;
        let rows = match root_ids {
            None => {
                let mut stmt = conn.prepare(
                    r"
                    SELECT repo, COUNT(*), COALESCE(SUM(size), 0)
                    FROM files WHERE deleted_ts IS NULL
                    GROUP BY repo ORDER BY COUNT(*) DESC
                    ",
                )?;
                let result = stmt
                    .query_map([], map_repo_stat)?
                    .collect::<Result<Vec<_>, _>>()?;
                result
            }
            Some(ids) => {
                let placeholders = placeholders(ids.len());
                let mut stmt = conn.prepare(&format!(
                    "SELECT repo, COUNT(*), COALESCE(SUM(size), 0)
                     FROM files WHERE deleted_ts IS NULL AND root_id IN ({placeholders})
                     GROUP BY repo ORDER BY COUNT(*) DESC"
                ))?;
                let values: Vec<&str> = ids.iter().map(RootId::as_str).collect();
                let result = stmt
                    .query_map(rusqlite::params_from_iter(values), map_repo_stat)?
                    .collect::<Result<Vec<_>, _>>()?;
                result
            }
        };
        Ok(rows)
    }

    /// Detailed listing for one repo with pagination.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn list_files(
        &self,
        repo: &str,
        limit: usize,
        offset: usize,
    ) -> DbResult<(Vec<FileListing>, i64)> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM files WHERE deleted_ts IS NULL AND repo = ?1",
            params![repo],
            |r| r.get(0),
        )?;
        let mut stmt = conn.prepare_cached(
            r"
            SELECT db_path, repo, mtime, size, parse_status
            FROM files WHERE deleted_ts IS NULL AND repo = ?1
            ORDER BY db_path LIMIT ?2 OFFSET ?3
            ",
        )?;
        let rows = stmt
            .query_map(params![repo, limit as i64, offset as i64], |row| {
                Ok(FileListing {
                    db_path: row.get(0)?,
                    repo: row.get(1)?,
                    mtime: row.get(2)?,
                    size: row.get(3)?,
                    parse_status: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rows, total))
    }

    /// Symbol search by name/qualname with kind filters.
    ///
    /// `match_mode`: `exact`, `prefix`, or `contains`.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn search_symbols(
        &self,
        query: &str,
        kinds: &[SymbolKind],
        match_mode: &str,
        limit: usize,
        root_ids: Option<&[RootId]>,
    ) -> DbResult<Vec<SymbolRow>> {
        let conn = self.conn()?;
        let pattern = match match_mode {
            "exact" => query.to_string(),
            "prefix" => format!("{}%", like_escape(query)),
            _ => format!("%{}%", like_escape(query)),
        };
        let name_clause = if match_mode == "exact" {
            "(name = ?1 OR qualname = ?1)"
        } else {
            r"(name LIKE ?1 ESCAPE '\' OR qualname LIKE ?1 ESCAPE '\')"
        };
        let mut sql = format!(
            r"
            SELECT symbol_id, path, root_id, name, qualname, kind, line, end_line,
                   content, parent, meta_json, doc_comment, importance
            FROM symbols
            WHERE {name_clause}
            ",
        );
        if !kinds.is_empty() {
            let kind_list = kinds
                .iter()
                .map(|k| format!("'{}'", k.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            sql.push_str(&format!(" AND kind IN ({kind_list})"));
        }
        if let Some(ids) = root_ids {
            if !ids.is_empty() {
                let id_list = ids
                    .iter()
                    .map(|i| format!("'{}'", i.as_str()))
                    .collect::<Vec<_>>()
                    .join(",");
                sql.push_str(&format!(" AND root_id IN ({id_list})"));
            }
        }
        sql.push_str(" ORDER BY importance DESC, name, path LIMIT ?2");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], map_symbol)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All symbols for a file, ordered by line.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn symbols_for_file(&self, db_path: &str) -> DbResult<Vec<SymbolRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            r"
            SELECT symbol_id, path, root_id, name, qualname, kind, line, end_line,
                   content, parent, meta_json, doc_comment, importance
            FROM symbols WHERE path = ?1 ORDER BY line
            ",
        )?;
        let rows = stmt
            .query_map(params![db_path], map_symbol)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Looks up one symbol in a file by name or qualname.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn get_symbol_block(&self, db_path: &str, name: &str) -> DbResult<Option<SymbolRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r"
                SELECT symbol_id, path, root_id, name, qualname, kind, line, end_line,
                       content, parent, meta_json, doc_comment, importance
                FROM symbols
                WHERE path = ?1 AND (name = ?2 OR qualname = ?2)
                ORDER BY line LIMIT 1
                ",
                params![db_path, name],
                map_symbol,
            )
            .optional()?;
        Ok(row)
    }

    /// Looks up a symbol by its stable id.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn get_symbol_by_id(&self, symbol_id: &SymbolId) -> DbResult<Option<SymbolRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                r"
                SELECT symbol_id, path, root_id, name, qualname, kind, line, end_line,
                       content, parent, meta_json, doc_comment, importance
                FROM symbols WHERE symbol_id = ?1 LIMIT 1
                ",
                params![symbol_id.as_str()],
                map_symbol,
            )
            .optional()?;
        Ok(row)
    }

    /// Relations pointing at a symbol name (or id), for `get_callers`.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn relations_to(
        &self,
        target: &str,
        rel_types: &[RelType],
        limit: usize,
    ) -> DbResult<Vec<RelationRow>> {
        let conn = self.conn()?;
        let rel_list = rel_filter(rel_types);
        let sql = format!(
            r"
            SELECT from_symbol_id, from_symbol, from_path, to_symbol_id,
                   to_symbol, to_path, rel_type, line
            FROM symbol_relations
            WHERE (to_symbol = ?1 OR to_symbol_id = ?1){rel_list}
            ORDER BY from_path, line LIMIT ?2
            "
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![target, limit as i64], map_relation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Relations leaving a symbol, for call-graph traversal.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn relations_from(
        &self,
        from_symbol: &str,
        rel_types: &[RelType],
        limit: usize,
    ) -> DbResult<Vec<RelationRow>> {
        let conn = self.conn()?;
        let rel_list = rel_filter(rel_types);
        let sql = format!(
            r"
            SELECT from_symbol_id, from_symbol, from_path, to_symbol_id,
                   to_symbol, to_path, rel_type, line
            FROM symbol_relations
            WHERE (from_symbol = ?1 OR from_symbol_id = ?1){rel_list}
            ORDER BY line LIMIT ?2
            "
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![from_symbol, limit as i64], map_relation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Snippets matching a tag (exact) or a content query (LIKE).
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn find_snippets(
        &self,
        tag: Option<&str>,
        query: Option<&str>,
        limit: usize,
    ) -> DbResult<Vec<SnippetRow>> {
        let conn = self.conn()?;
        let mut rows = Vec::new();
        if let Some(tag) = tag {
            let mut stmt = conn.prepare_cached(
                "SELECT * FROM snippets WHERE tag = ?1 ORDER BY updated_ts DESC LIMIT ?2",
            )?;
            rows = stmt
                .query_map(params![tag, limit as i64], map_snippet)?
                .collect::<Result<Vec<_>, _>>()?;
        }
        if rows.is_empty() {
            if let Some(q) = query {
                let pattern = format!("%{}%", like_escape(q));
                let mut stmt = conn.prepare_cached(
                    r"
                    SELECT * FROM snippets
                    WHERE tag LIKE ?1 ESCAPE '\' OR note LIKE ?1 ESCAPE '\'
                          OR content LIKE ?1 ESCAPE '\'
                    ORDER BY updated_ts DESC LIMIT ?2
                    ",
                )?;
                rows = stmt
                    .query_map(params![pattern, limit as i64], map_snippet)?
                    .collect::<Result<Vec<_>, _>>()?;
            }
        }
        Ok(rows)
    }

    /// Lists all snippets, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn list_snippets(&self, limit: usize) -> DbResult<Vec<SnippetRow>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached("SELECT * FROM snippets ORDER BY updated_ts DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], map_snippet)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Fetches one context by exact topic.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn get_context(&self, topic: &str) -> DbResult<Option<ContextRow>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT * FROM contexts WHERE topic = ?1",
                params![topic],
                map_context,
            )
            .optional()?;
        Ok(row)
    }

    /// Contexts whose topic or content matches the query.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn find_contexts(&self, query: &str, limit: usize) -> DbResult<Vec<ContextRow>> {
        let conn = self.conn()?;
        let pattern = format!("%{}%", like_escape(query));
        let mut stmt = conn.prepare_cached(
            r"
            SELECT * FROM contexts
            WHERE topic LIKE ?1 ESCAPE '\' OR content LIKE ?1 ESCAPE '\'
                  OR tags LIKE ?1 ESCAPE '\'
            ORDER BY updated_ts DESC LIMIT ?2
            ",
        )?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], map_context)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Lists contexts, newest first.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn list_contexts(&self, limit: usize) -> DbResult<Vec<ContextRow>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT * FROM contexts ORDER BY updated_ts DESC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], map_context)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `(total, high_priority)` failed tasks in one aggregate query.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn count_failed_tasks(&self) -> DbResult<(i64, i64)> {
        let conn = self.conn()?;
        let row = conn.query_row(
            r"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN priority > 0 THEN 1 ELSE 0 END), 0)
            FROM tasks WHERE state = 'failed'
            ",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(row)
    }

    /// Schema gate used by tools before touching optional columns.
    #[must_use]
    pub fn has_table_columns(&self, table: &str, cols: &[&str]) -> bool {
        match self.conn() {
            Ok(conn) => schema::has_table_columns(&conn, table, cols),
            Err(_) => false,
        }
    }

    /// True when the store contains rows keyed by legacy (un-prefixed)
    /// db-paths.
    #[must_use]
    pub fn has_legacy_paths(&self) -> bool {
        self.legacy_paths.load(Ordering::Relaxed)
    }

    fn refresh_legacy_flag(&self) {
        let Ok(conn) = self.conn() else { return };
        let has: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM files WHERE db_path NOT LIKE 'root-%')",
                [],
                |r| r.get(0),
            )
            .unwrap_or(false);
        self.legacy_paths.store(has, Ordering::Relaxed);
    }

    /// Registered roots as `(root_id, path, label)` rows.
    ///
    /// # Errors
    ///
    /// Returns `DbError` on pool or query failure.
    pub fn roots(&self) -> DbResult<Vec<(RootId, String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT root_id, path, label FROM roots ORDER BY path")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    RootId(row.get(0)?),
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}

fn placeholders(n: usize) -> String {
    (1..=n)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn rel_filter(rel_types: &[RelType]) -> String {
    if rel_types.is_empty() {
        return String::new();
    }
    let list = rel_types
        .iter()
        .map(|r| format!("'{}'", r.as_str()))
        .collect::<Vec<_>>()
        .join(",");
    format!(" AND rel_type IN ({list})")
}

fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn map_repo_stat(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepoStat> {
    Ok(RepoStat {
        repo: row.get(0)?,
        files: row.get(1)?,
        bytes: row.get(2)?,
    })
}

fn map_symbol(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolRow> {
    Ok(SymbolRow {
        symbol_id: SymbolId(row.get(0)?),
        path: row.get(1)?,
        root_id: RootId(row.get(2)?),
        name: row.get(3)?,
        qualname: row.get(4)?,
        kind: SymbolKind::from_str(&row.get::<_, String>(5)?).unwrap_or(SymbolKind::Function),
        line: row.get(6)?,
        end_line: row.get(7)?,
        content: row.get(8)?,
        parent: row.get(9)?,
        meta_json: row.get(10)?,
        doc_comment: row.get(11)?,
        importance_score: row.get(12)?,
    })
}

fn map_relation(row: &rusqlite::Row<'_>) -> rusqlite::Result<RelationRow> {
    Ok(RelationRow {
        from_symbol_id: row.get::<_, Option<String>>(0)?.map(SymbolId),
        from_symbol: row.get(1)?,
        from_path: row.get(2)?,
        to_symbol_id: row.get::<_, Option<String>>(3)?.map(SymbolId),
        to_symbol: row.get(4)?,
        to_path: row.get(5)?,
        rel_type: RelType::from_str(&row.get::<_, String>(6)?).unwrap_or(RelType::Uses),
        line: row.get(7)?,
    })
}

fn map_snippet(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnippetRow> {
    Ok(SnippetRow {
        id: row.get("id")?,
        tag: row.get("tag")?,
        path: row.get("path")?,
        root_id: row.get("root_id")?,
        start_line: row.get("start_line")?,
        end_line: row.get("end_line")?,
        content: row.get("content")?,
        content_hash: row.get("content_hash")?,
        anchor_before: row.get("anchor_before")?,
        anchor_after: row.get("anchor_after")?,
        note: row.get("note")?,
        commit_hash: row.get("commit_hash")?,
        created_ts: row.get("created_ts")?,
        updated_ts: row.get("updated_ts")?,
        meta_json: row.get("meta_json")?,
    })
}

fn map_context(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContextRow> {
    Ok(ContextRow {
        topic: row.get("topic")?,
        content: row.get("content")?,
        tags: row.get("tags")?,
        related_files: row.get("related_files")?,
        source: row.get("source")?,
        valid_from: row.get("valid_from")?,
        valid_until: row.get("valid_until")?,
        deprecated: row.get::<_, i64>("deprecated")? != 0,
        updated_ts: row.get("updated_ts")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{compute_hash, ExtractOutcome, Extractor};
    use crate::settings::Settings;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        Store::open(&dir.path().join("index.db")).unwrap()
    }

    fn payload_for(dir: &tempfile::TempDir, name: &str, content: &str) -> FilePayload {
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
        let extractor = Extractor::new(Settings::default());
        match extractor.process_file(
            dir.path(),
            &path,
            mtime,
            meta.len() as i64,
            now_ts(),
            None,
            false,
        ) {
            ExtractOutcome::Changed(p) => *p,
            other => panic!("expected changed, got {other:?}"),
        }
    }

    #[test]
    fn test_upsert_and_read_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);
        let payload = payload_for(&dir, "app.py", "def hello():\n    return 1\n");
        let db_path = payload.db_path.clone();

        let result = store
            .upsert_files_turbo_sync(vec![payload], Vec::new())
            .unwrap();
        assert_eq!(result.written, 1);

        let content = store.read_file(&db_path).unwrap();
        assert_eq!(content, "def hello():\n    return 1\n");
        assert_eq!(store.file_count(None).unwrap(), 1);
        assert!(store.symbol_count().unwrap() >= 1);
    }

    #[test]
    fn test_delta_noop_on_same_row() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);
        let payload = payload_for(&dir, "a.py", "x = 1\n");

        let first = store
            .upsert_files_turbo_sync(vec![payload.clone()], Vec::new())
            .unwrap();
        assert_eq!(first.written, 1);

        let second = store
            .upsert_files_turbo_sync(vec![payload], Vec::new())
            .unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.unchanged, 1);
    }

    #[test]
    fn test_get_file_meta() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);
        let payload = payload_for(&dir, "a.py", "x = 1\n");
        let db_path = payload.db_path.clone();
        store
            .upsert_files_turbo_sync(vec![payload], Vec::new())
            .unwrap();

        let meta = store.get_file_meta(&db_path).unwrap().unwrap();
        assert_eq!(meta.content_hash, compute_hash("x = 1\n"));
        assert!(store.get_file_meta("root-none/x.py").unwrap().is_none());
    }

    #[test]
    fn test_finalize_soft_deletes_then_purge() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);
        let payload = payload_for(&dir, "a.py", "x = 1\n");
        let db_path = payload.db_path.clone();
        let root_id = payload.root_id.clone();
        store
            .upsert_files_turbo_sync(vec![payload], Vec::new())
            .unwrap();

        // A later scan that never saw the file soft-deletes it.
        let later = now_ts() + 100;
        let pruned = store
            .finalize_turbo_batch(later, vec![root_id])
            .unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(store.file_count(None).unwrap(), 0);
        let record = store.get_file_record(&db_path).unwrap().unwrap();
        assert!(record.deleted_ts.is_some());
        assert!(store.read_file(&db_path).is_err());

        // Hard purge only after the grace cutoff passes.
        let purged = store.purge_deleted(later + 1000).unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_file_record(&db_path).unwrap().is_none());
    }

    #[test]
    fn test_failed_rows_recorded() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);
        let failed = FailedFile {
            db_path: "root-xx/broken.py".into(),
            root_id: RootId("root-xx".into()),
            repo: "xx".into(),
            error: "boom".into(),
            scan_ts: now_ts(),
        };
        let result = store
            .upsert_files_turbo_sync(Vec::new(), vec![failed])
            .unwrap();
        assert_eq!(result.failed, 1);
        let record = store.get_file_record("root-xx/broken.py").unwrap().unwrap();
        assert_eq!(record.parse_status, ParseStatus::Failed);
    }

    #[test]
    fn test_symbol_queries() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);
        let payload = payload_for(
            &dir,
            "lib.py",
            "def helper():\n    return 1\n\ndef main():\n    return helper()\n",
        );
        let db_path = payload.db_path.clone();
        store
            .upsert_files_turbo_sync(vec![payload], Vec::new())
            .unwrap();

        let by_prefix = store
            .search_symbols("help", &[], "prefix", 10, None)
            .unwrap();
        assert!(by_prefix.iter().any(|s| s.name == "helper"));

        let by_kind = store
            .search_symbols("helper", &[SymbolKind::Class], "exact", 10, None)
            .unwrap();
        assert!(by_kind.is_empty());

        let block = store.get_symbol_block(&db_path, "main").unwrap().unwrap();
        assert!(block.content.contains("helper()"));

        let callers = store
            .relations_to("helper", &[RelType::Calls], 10)
            .unwrap();
        assert!(callers.iter().any(|r| r.from_symbol == "main"));
    }

    #[test]
    fn test_snippets_and_versions() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut row = SnippetRow {
            tag: "auth-check".into(),
            path: "root-aa/auth.py".into(),
            start_line: 1,
            end_line: 2,
            content: "def check():\n    pass".into(),
            created_ts: now_ts(),
            updated_ts: now_ts(),
            meta_json: "{}".into(),
            ..Default::default()
        };
        let id1 = store.save_snippet(row.clone()).unwrap();
        row.content = "def check():\n    return True".into();
        let id2 = store.save_snippet(row).unwrap();
        assert_eq!(id1, id2);

        let found = store.find_snippets(Some("auth-check"), None, 10).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].content.contains("return True"));

        let conn = store.conn().unwrap();
        let versions: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM snippet_versions WHERE snippet_id = ?1",
                params![id1],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(versions, 2);

        assert_eq!(store.delete_snippet(None, Some("auth-check".into())).unwrap(), 1);
    }

    #[test]
    fn test_contexts() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .upsert_context(ContextRow {
                topic: "deploy-process".into(),
                content: "Deploys go through CI".into(),
                tags: "[\"ops\"]".into(),
                related_files: "[]".into(),
                updated_ts: now_ts(),
                ..Default::default()
            })
            .unwrap();
        let got = store.get_context("deploy-process").unwrap().unwrap();
        assert!(got.content.contains("CI"));
        let found = store.find_contexts("deploy", 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.delete_context("deploy-process").unwrap(), 1);
    }

    #[test]
    fn test_count_failed_tasks_single_query() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);
        let conn = store.conn().unwrap();
        conn.execute(
            "INSERT INTO tasks (kind, state, priority) VALUES ('write_retry', 'failed', 1)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tasks (kind, state, priority) VALUES ('write_retry', 'failed', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO tasks (kind, state, priority) VALUES ('write_retry', 'done', 1)",
            [],
        )
        .unwrap();
        assert_eq!(store.count_failed_tasks().unwrap(), (2, 1));
    }

    #[test]
    fn test_writer_alive_and_close() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.writer_alive());
        store.close();
        assert!(!store.writer_alive());
    }
}
