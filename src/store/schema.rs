//! Database schema definitions.

use crate::error::DbResult;
use rusqlite::Connection;

/// Current schema version for migrations.
pub const SCHEMA_VERSION: u32 = 3;

/// Initializes the database schema.
///
/// Handles schema versioning - if an older schema version exists,
/// drops all tables and recreates them with the new schema. The index is
/// a cache; dropping it only costs a re-scan.
///
/// # Errors
///
/// Returns `DbError::Sqlite` if schema creation fails.
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    let existing_version: Option<u32> = conn
        .query_row(
            "SELECT CAST(value AS INTEGER) FROM schema_info WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .ok();

    match existing_version {
        Some(v) if v >= SCHEMA_VERSION => return Ok(()),
        Some(_) => {
            conn.execute_batch(
                r"
                DROP TABLE IF EXISTS files;
                DROP TABLE IF EXISTS files_fts;
                DROP TABLE IF EXISTS symbols;
                DROP TABLE IF EXISTS symbol_relations;
                DROP TABLE IF EXISTS snippets;
                DROP TABLE IF EXISTS snippet_versions;
                DROP TABLE IF EXISTS contexts;
                DROP TABLE IF EXISTS roots;
                DROP TABLE IF EXISTS tasks;
                DROP TABLE IF EXISTS schema_info;
                ",
            )?;
        }
        None => {}
    }

    conn.execute_batch(
        r#"
        -- Registered workspace roots
        CREATE TABLE IF NOT EXISTS roots (
            root_id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            label TEXT NOT NULL DEFAULT ''
        );

        -- One row per scanned file, keyed by db-path <root_id>/<rel>.
        -- content may be zlib-compressed (ZLIB\0 prefix).
        -- deleted_ts is the soft-delete mark; hard purge happens after a
        -- grace period.
        CREATE TABLE IF NOT EXISTS files (
            db_path TEXT PRIMARY KEY,
            root_id TEXT NOT NULL,
            repo TEXT NOT NULL,
            rel_path TEXT NOT NULL DEFAULT '',
            mtime INTEGER NOT NULL DEFAULT 0,
            size INTEGER NOT NULL DEFAULT 0,
            content_hash TEXT NOT NULL DEFAULT '',
            content BLOB,
            metadata TEXT NOT NULL DEFAULT '{}',
            parse_status TEXT NOT NULL DEFAULT 'skipped',
            parse_reason TEXT NOT NULL DEFAULT 'none',
            ast_status TEXT NOT NULL DEFAULT 'skipped',
            ast_reason TEXT NOT NULL DEFAULT 'none',
            is_binary INTEGER NOT NULL DEFAULT 0,
            is_minified INTEGER NOT NULL DEFAULT 0,
            importance REAL NOT NULL DEFAULT 1.0,
            scan_ts INTEGER NOT NULL DEFAULT 0,
            deleted_ts INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_files_root ON files(root_id);
        CREATE INDEX IF NOT EXISTS idx_files_repo ON files(repo);
        CREATE INDEX IF NOT EXISTS idx_files_scan ON files(scan_ts);

        -- FTS5 over the normalized body text. db_path/repo ride along
        -- unindexed so hits resolve without a join.
        CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
            db_path UNINDEXED,
            repo UNINDEXED,
            body,
            tokenize='unicode61'
        );

        -- (path, kind, qualname) uniquely determines symbol_id.
        CREATE TABLE IF NOT EXISTS symbols (
            symbol_id TEXT NOT NULL,
            path TEXT NOT NULL,
            root_id TEXT NOT NULL,
            name TEXT NOT NULL,
            qualname TEXT NOT NULL,
            kind TEXT NOT NULL,
            line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            parent TEXT,
            meta_json TEXT NOT NULL DEFAULT '{}',
            doc_comment TEXT NOT NULL DEFAULT '',
            importance REAL NOT NULL DEFAULT 1.0,
            PRIMARY KEY (path, kind, qualname)
        );

        CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);
        CREATE INDEX IF NOT EXISTS idx_symbols_sid ON symbols(symbol_id);

        -- Directed symbol edges; either endpoint may be name-only when the
        -- id could not be resolved at extraction time.
        CREATE TABLE IF NOT EXISTS symbol_relations (
            from_symbol_id TEXT,
            from_symbol TEXT NOT NULL,
            from_path TEXT NOT NULL,
            to_symbol_id TEXT,
            to_symbol TEXT NOT NULL,
            to_path TEXT,
            rel_type TEXT NOT NULL,
            line INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_rel_to ON symbol_relations(to_symbol);
        CREATE INDEX IF NOT EXISTS idx_rel_from ON symbol_relations(from_symbol);
        CREATE INDEX IF NOT EXISTS idx_rel_from_path ON symbol_relations(from_path);

        -- Tagged user saves with content anchors for re-mapping.
        CREATE TABLE IF NOT EXISTS snippets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tag TEXT NOT NULL,
            path TEXT NOT NULL,
            root_id TEXT NOT NULL DEFAULT '',
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL DEFAULT '',
            anchor_before TEXT NOT NULL DEFAULT '',
            anchor_after TEXT NOT NULL DEFAULT '',
            note TEXT NOT NULL DEFAULT '',
            commit_hash TEXT NOT NULL DEFAULT '',
            created_ts INTEGER NOT NULL,
            updated_ts INTEGER NOT NULL,
            meta_json TEXT NOT NULL DEFAULT '{}'
        );

        CREATE INDEX IF NOT EXISTS idx_snippets_tag ON snippets(tag);

        -- Append-only version history per snippet.
        CREATE TABLE IF NOT EXISTS snippet_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snippet_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL DEFAULT '',
            created_ts INTEGER NOT NULL
        );

        -- Free-form domain knowledge keyed by topic.
        CREATE TABLE IF NOT EXISTS contexts (
            topic TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            related_files TEXT NOT NULL DEFAULT '[]',
            source TEXT NOT NULL DEFAULT '',
            valid_from INTEGER,
            valid_until INTEGER,
            deprecated INTEGER NOT NULL DEFAULT 0,
            updated_ts INTEGER NOT NULL
        );

        -- Durable work items for background retries of failed writes.
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT '{}',
            attempts INTEGER NOT NULL DEFAULT 0,
            state TEXT NOT NULL DEFAULT 'pending',
            priority INTEGER NOT NULL DEFAULT 0,
            last_error TEXT NOT NULL DEFAULT '',
            next_run_ts INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        ) WITHOUT ROWID;

        INSERT OR REPLACE INTO schema_info (key, value)
        VALUES ('version', '3');
        "#,
    )?;

    Ok(())
}

/// Reports whether `table` exists with at least the given columns.
///
/// Tools gate on schema presence through this instead of crashing into
/// "no such column" mid-query.
#[must_use]
pub fn has_table_columns(conn: &Connection, table: &str, cols: &[&str]) -> bool {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return false;
    }
    let Ok(mut stmt) = conn.prepare(&format!("PRAGMA table_info({table})")) else {
        return false;
    };
    let Ok(rows) = stmt.query_map([], |row| row.get::<_, String>(1)) else {
        return false;
    };
    let present: Vec<String> = rows.filter_map(Result::ok).collect();
    if present.is_empty() {
        return false;
    }
    cols.iter().all(|c| present.iter().any(|p| p == c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::pragmas::apply_pragmas;

    #[test]
    fn test_schema_creation() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pragmas(&conn).unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(Result::ok)
            .collect();

        for expected in [
            "roots",
            "files",
            "symbols",
            "symbol_relations",
            "snippets",
            "snippet_versions",
            "contexts",
            "tasks",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn test_has_table_columns() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        assert!(has_table_columns(&conn, "files", &["db_path", "deleted_ts"]));
        assert!(!has_table_columns(&conn, "files", &["no_such_col"]));
        assert!(!has_table_columns(&conn, "no_such_table", &["x"]));
        assert!(!has_table_columns(&conn, "files; DROP TABLE files", &["x"]));
    }

    #[test]
    fn test_old_schema_is_recreated() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE schema_info (key TEXT PRIMARY KEY, value TEXT NOT NULL) WITHOUT ROWID;
             INSERT INTO schema_info VALUES ('version', '1');
             CREATE TABLE files (old_col TEXT);",
        )
        .unwrap();
        init_schema(&conn).unwrap();
        assert!(has_table_columns(&conn, "files", &["db_path"]));
        let version: u32 = conn
            .query_row(
                "SELECT CAST(value AS INTEGER) FROM schema_info WHERE key='version'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
