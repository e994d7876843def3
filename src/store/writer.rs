//! The single writer thread.
//!
//! All mutations flow through one channel into one thread owning its own
//! connection; readers never write. Transient lock errors retry a small
//! fixed number of times, then the batch is parked in the `tasks` table
//! instead of being lost.

use crate::error::{DbError, DbResult};
use crate::extract::FilePayload;
use crate::store::{now_ts, ContextRow, SnippetRow};
use crate::types::RootId;
use crossbeam_channel::{Receiver, Sender};
use rusqlite::{params, Connection};
use std::time::Duration;

const WRITE_RETRIES: usize = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// A failed extraction to record alongside a batch.
#[derive(Debug, Clone)]
pub struct FailedFile {
    pub db_path: String,
    pub root_id: RootId,
    pub repo: String,
    pub error: String,
    pub scan_ts: i64,
}

/// Outcome of one applied batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchResult {
    pub written: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Operations accepted by the writer thread.
pub enum WriteOp {
    UpsertRoot {
        root_id: RootId,
        path: String,
        label: String,
    },
    UpsertBatch {
        changes: Vec<FilePayload>,
        failed: Vec<FailedFile>,
        reply: Option<Sender<DbResult<BatchResult>>>,
    },
    /// Soft-deletes files not seen by the scan that ended at `scan_ts`.
    FinalizeScan {
        scan_ts: i64,
        root_ids: Vec<RootId>,
        reply: Option<Sender<DbResult<usize>>>,
    },
    /// Hard-purges rows soft-deleted before `cutoff_ts`.
    PurgeDeleted {
        cutoff_ts: i64,
        reply: Option<Sender<DbResult<usize>>>,
    },
    SaveSnippet {
        row: SnippetRow,
        reply: Sender<DbResult<i64>>,
    },
    DeleteSnippet {
        id: Option<i64>,
        tag: Option<String>,
        reply: Sender<DbResult<usize>>,
    },
    UpsertContext {
        row: ContextRow,
        reply: Sender<DbResult<()>>,
    },
    DeleteContext {
        topic: String,
        reply: Sender<DbResult<usize>>,
    },
    /// Bumps `scan_ts` on unchanged files so finalize does not soft-delete
    /// rows the scan saw but did not rewrite.
    TouchScan {
        db_paths: Vec<String>,
        scan_ts: i64,
    },
    /// Barrier: the reply fires once everything queued before it landed.
    Flush { reply: Sender<()> },
    Shutdown,
}

/// Writer loop. Runs until `Shutdown` or channel disconnect.
pub fn run_writer(mut conn: Connection, rx: Receiver<WriteOp>) {
    while let Ok(op) = rx.recv() {
        match op {
            WriteOp::UpsertRoot {
                root_id,
                path,
                label,
            } => {
                let result = with_retry(|| upsert_root(&conn, &root_id, &path, &label));
                if let Err(e) = result {
                    tracing::warn!(target: "sari::store", "upsert_root failed: {e}");
                }
            }
            WriteOp::UpsertBatch {
                changes,
                failed,
                reply,
            } => {
                let result = with_retry(|| apply_batch(&mut conn, &changes, &failed));
                if let Err(e) = &result {
                    tracing::warn!(target: "sari::store", "batch write failed: {e}");
                    park_failed_batch(&conn, &changes, e);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            WriteOp::FinalizeScan {
                scan_ts,
                root_ids,
                reply,
            } => {
                let result = with_retry(|| finalize_scan(&mut conn, scan_ts, &root_ids));
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            WriteOp::PurgeDeleted { cutoff_ts, reply } => {
                let result = with_retry(|| purge_deleted(&mut conn, cutoff_ts));
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            WriteOp::SaveSnippet { row, reply } => {
                let _ = reply.send(with_retry(|| save_snippet(&mut conn, &row)));
            }
            WriteOp::DeleteSnippet { id, tag, reply } => {
                let _ = reply.send(with_retry(|| delete_snippet(&conn, id, tag.as_deref())));
            }
            WriteOp::UpsertContext { row, reply } => {
                let _ = reply.send(with_retry(|| upsert_context(&conn, &row)));
            }
            WriteOp::DeleteContext { topic, reply } => {
                let _ = reply.send(with_retry(|| delete_context(&conn, &topic)));
            }
            WriteOp::TouchScan { db_paths, scan_ts } => {
                let result = with_retry(|| touch_scan(&mut conn, &db_paths, scan_ts));
                if let Err(e) = result {
                    tracing::warn!(target: "sari::store", "touch_scan failed: {e}");
                }
            }
            WriteOp::Flush { reply } => {
                let _ = reply.send(());
            }
            WriteOp::Shutdown => break,
        }
    }
}

fn is_transient(err: &DbError) -> bool {
    match err {
        DbError::Sqlite(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        DbError::Locked => true,
        _ => false,
    }
}

fn with_retry<T>(mut f: impl FnMut() -> DbResult<T>) -> DbResult<T> {
    let mut last = None;
    for attempt in 0..WRITE_RETRIES {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if is_transient(&e) => {
                std::thread::sleep(RETRY_BACKOFF * (attempt as u32 + 1));
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or(DbError::Locked))
}

fn upsert_root(conn: &Connection, root_id: &RootId, path: &str, label: &str) -> DbResult<()> {
    conn.execute(
        r"
        INSERT INTO roots (root_id, path, label) VALUES (?1, ?2, ?3)
        ON CONFLICT(root_id) DO UPDATE SET path = excluded.path, label = excluded.label
        ",
        params![root_id.as_str(), path, label],
    )?;
    Ok(())
}

/// Applies one extractor batch transactionally.
///
/// Delta discipline: a payload whose `(mtime, size, content_hash)` equals
/// the persisted row is a no-op; the content blob and FTS row are only
/// rewritten on actual change.
fn apply_batch(
    conn: &mut Connection,
    changes: &[FilePayload],
    failed: &[FailedFile],
) -> DbResult<BatchResult> {
    let tx = conn.transaction()?;
    let mut result = BatchResult::default();

    for payload in changes {
        let prev: Option<(i64, i64, String)> = tx
            .query_row(
                "SELECT mtime, size, content_hash FROM files WHERE db_path = ?1 AND deleted_ts IS NULL",
                params![payload.db_path],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();
        if let Some((mtime, size, hash)) = prev {
            if mtime == payload.mtime
                && size == payload.size
                && hash == payload.content_hash
                && !payload.content_hash.is_empty()
            {
                result.unchanged += 1;
                continue;
            }
        }

        tx.execute(
            r"
            INSERT OR REPLACE INTO files (
                db_path, root_id, repo, rel_path, mtime, size, content_hash,
                content, metadata, parse_status, parse_reason, ast_status,
                ast_reason, is_binary, is_minified, importance, scan_ts, deleted_ts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, NULL)
            ",
            params![
                payload.db_path,
                payload.root_id.as_str(),
                payload.repo,
                payload.rel_path,
                payload.mtime,
                payload.size,
                payload.content_hash,
                payload.stored_content,
                payload.metadata_json,
                payload.parse_status.as_str(),
                payload.parse_reason,
                payload.ast_status.as_str(),
                payload.ast_reason,
                payload.is_binary as i64,
                payload.is_minified as i64,
                payload.importance,
                payload.scan_ts,
            ],
        )?;

        // FTS row replacement is atomic with the file row update.
        tx.execute(
            "DELETE FROM files_fts WHERE db_path = ?1",
            params![payload.db_path],
        )?;
        if !payload.fts_content.is_empty() {
            tx.execute(
                "INSERT INTO files_fts (db_path, repo, body) VALUES (?1, ?2, ?3)",
                params![payload.db_path, payload.repo, payload.fts_content],
            )?;
        }

        tx.execute(
            "DELETE FROM symbols WHERE path = ?1",
            params![payload.db_path],
        )?;
        for sym in &payload.symbols {
            tx.execute(
                r"
                INSERT OR REPLACE INTO symbols (
                    symbol_id, path, root_id, name, qualname, kind, line,
                    end_line, content, parent, meta_json, doc_comment, importance
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                ",
                params![
                    sym.symbol_id.as_str(),
                    sym.path,
                    sym.root_id.as_str(),
                    sym.name,
                    sym.qualname,
                    sym.kind.as_str(),
                    sym.line,
                    sym.end_line,
                    sym.content,
                    sym.parent,
                    sym.meta_json,
                    sym.doc_comment,
                    sym.importance_score,
                ],
            )?;
        }

        tx.execute(
            "DELETE FROM symbol_relations WHERE from_path = ?1",
            params![payload.db_path],
        )?;
        for rel in &payload.relations {
            tx.execute(
                r"
                INSERT INTO symbol_relations (
                    from_symbol_id, from_symbol, from_path,
                    to_symbol_id, to_symbol, to_path, rel_type, line
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ",
                params![
                    rel.from_symbol_id.as_ref().map(|s| s.as_str()),
                    rel.from_symbol,
                    rel.from_path,
                    rel.to_symbol_id.as_ref().map(|s| s.as_str()),
                    rel.to_symbol,
                    rel.to_path,
                    rel.rel_type.as_str(),
                    rel.line,
                ],
            )?;
        }

        result.written += 1;
    }

    for f in failed {
        tx.execute(
            r"
            INSERT INTO files (db_path, root_id, repo, parse_status, parse_reason,
                               ast_status, ast_reason, scan_ts)
            VALUES (?1, ?2, ?3, 'failed', ?4, 'failed', ?4, ?5)
            ON CONFLICT(db_path) DO UPDATE SET
                parse_status = 'failed',
                parse_reason = excluded.parse_reason,
                ast_status = 'failed',
                ast_reason = excluded.ast_reason,
                scan_ts = excluded.scan_ts
            ",
            params![f.db_path, f.root_id.as_str(), f.repo, f.error, f.scan_ts],
        )?;
        result.failed += 1;
    }

    tx.commit()?;
    Ok(result)
}

/// Records an unwritable batch in the tasks table for later retry.
fn park_failed_batch(conn: &Connection, changes: &[FilePayload], err: &DbError) {
    let paths: Vec<&str> = changes.iter().map(|p| p.db_path.as_str()).collect();
    let payload = serde_json::json!({ "db_paths": paths }).to_string();
    let result = conn.execute(
        r"
        INSERT INTO tasks (kind, payload, attempts, state, priority, last_error, next_run_ts)
        VALUES ('write_retry', ?1, 1, 'failed', 1, ?2, ?3)
        ",
        params![payload, err.to_string(), now_ts() + 60],
    );
    if let Err(e) = result {
        tracing::error!(target: "sari::store", "could not park failed batch: {e}");
    }
}

fn touch_scan(conn: &mut Connection, db_paths: &[String], scan_ts: i64) -> DbResult<()> {
    let tx = conn.transaction()?;
    for db_path in db_paths {
        tx.execute(
            "UPDATE files SET scan_ts = ?1 WHERE db_path = ?2",
            params![scan_ts, db_path],
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn finalize_scan(conn: &mut Connection, scan_ts: i64, root_ids: &[RootId]) -> DbResult<usize> {
    let tx = conn.transaction()?;
    let mut pruned = 0usize;
    for root_id in root_ids {
        pruned += tx.execute(
            r"
            UPDATE files SET deleted_ts = ?1
            WHERE root_id = ?2 AND scan_ts < ?1 AND deleted_ts IS NULL
            ",
            params![scan_ts, root_id.as_str()],
        )?;
        tx.execute(
            r"
            DELETE FROM files_fts WHERE db_path IN (
                SELECT db_path FROM files WHERE root_id = ?1 AND deleted_ts IS NOT NULL
            )
            ",
            params![root_id.as_str()],
        )?;
    }
    tx.commit()?;
    Ok(pruned)
}

/// Hard purge: soft delete first, purge after the grace period. Symbols
/// and relations cascade with their file rows here.
fn purge_deleted(conn: &mut Connection, cutoff_ts: i64) -> DbResult<usize> {
    let tx = conn.transaction()?;
    tx.execute(
        r"
        DELETE FROM symbols WHERE path IN (
            SELECT db_path FROM files WHERE deleted_ts IS NOT NULL AND deleted_ts < ?1
        )
        ",
        params![cutoff_ts],
    )?;
    tx.execute(
        r"
        DELETE FROM symbol_relations WHERE from_path IN (
            SELECT db_path FROM files WHERE deleted_ts IS NOT NULL AND deleted_ts < ?1
        )
        ",
        params![cutoff_ts],
    )?;
    let purged = tx.execute(
        "DELETE FROM files WHERE deleted_ts IS NOT NULL AND deleted_ts < ?1",
        params![cutoff_ts],
    )?;
    tx.commit()?;
    Ok(purged)
}

fn save_snippet(conn: &mut Connection, row: &SnippetRow) -> DbResult<i64> {
    let tx = conn.transaction()?;
    let existing: Option<i64> = tx
        .query_row(
            "SELECT id FROM snippets WHERE tag = ?1",
            params![row.tag],
            |r| r.get(0),
        )
        .ok();
    let id = match existing {
        Some(id) => {
            tx.execute(
                r"
                UPDATE snippets SET path = ?2, root_id = ?3, start_line = ?4,
                    end_line = ?5, content = ?6, content_hash = ?7,
                    anchor_before = ?8, anchor_after = ?9, note = ?10,
                    commit_hash = ?11, updated_ts = ?12, meta_json = ?13
                WHERE id = ?1
                ",
                params![
                    id,
                    row.path,
                    row.root_id,
                    row.start_line,
                    row.end_line,
                    row.content,
                    row.content_hash,
                    row.anchor_before,
                    row.anchor_after,
                    row.note,
                    row.commit_hash,
                    row.updated_ts,
                    row.meta_json,
                ],
            )?;
            id
        }
        None => {
            tx.execute(
                r"
                INSERT INTO snippets (tag, path, root_id, start_line, end_line,
                    content, content_hash, anchor_before, anchor_after, note,
                    commit_hash, created_ts, updated_ts, meta_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                ",
                params![
                    row.tag,
                    row.path,
                    row.root_id,
                    row.start_line,
                    row.end_line,
                    row.content,
                    row.content_hash,
                    row.anchor_before,
                    row.anchor_after,
                    row.note,
                    row.commit_hash,
                    row.created_ts,
                    row.updated_ts,
                    row.meta_json,
                ],
            )?;
            tx.last_insert_rowid()
        }
    };
    tx.execute(
        r"
        INSERT INTO snippet_versions (snippet_id, content, content_hash, created_ts)
        VALUES (?1, ?2, ?3, ?4)
        ",
        params![id, row.content, row.content_hash, row.updated_ts],
    )?;
    tx.commit()?;
    Ok(id)
}

fn delete_snippet(conn: &Connection, id: Option<i64>, tag: Option<&str>) -> DbResult<usize> {
    let deleted = match (id, tag) {
        (Some(id), _) => conn.execute("DELETE FROM snippets WHERE id = ?1", params![id])?,
        (None, Some(tag)) => conn.execute("DELETE FROM snippets WHERE tag = ?1", params![tag])?,
        (None, None) => 0,
    };
    Ok(deleted)
}

fn upsert_context(conn: &Connection, row: &ContextRow) -> DbResult<()> {
    conn.execute(
        r"
        INSERT INTO contexts (topic, content, tags, related_files, source,
            valid_from, valid_until, deprecated, updated_ts)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ON CONFLICT(topic) DO UPDATE SET
            content = excluded.content,
            tags = excluded.tags,
            related_files = excluded.related_files,
            source = excluded.source,
            valid_from = excluded.valid_from,
            valid_until = excluded.valid_until,
            deprecated = excluded.deprecated,
            updated_ts = excluded.updated_ts
        ",
        params![
            row.topic,
            row.content,
            row.tags,
            row.related_files,
            row.source,
            row.valid_from,
            row.valid_until,
            row.deprecated as i64,
            row.updated_ts,
        ],
    )?;
    Ok(())
}

fn delete_context(conn: &Connection, topic: &str) -> DbResult<usize> {
    Ok(conn.execute(
        "DELETE FROM contexts WHERE topic = ?1",
        params![topic],
    )?)
}
