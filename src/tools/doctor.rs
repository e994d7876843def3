//! Read-only health checks.
//!
//! Each probe reports `ok`, `warn`, or `fail` with a short detail line;
//! anything below `ok` contributes a recommendation the operator (or the
//! calling agent) can act on. Probes never mutate state.

use super::{error_response, parse_args, ToolContext};
use crate::extract::ast;
use crate::pack::{enc_text, pack_header, pack_line, ToolResponse};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

const TOOL: &str = "doctor";
const MIN_FREE_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DoctorArgs {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

struct Check {
    name: &'static str,
    status: &'static str,
    detail: String,
    recommendation: Option<String>,
}

impl Check {
    fn ok(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "ok",
            detail: detail.into(),
            recommendation: None,
        }
    }

    fn warn(name: &'static str, detail: impl Into<String>, rec: impl Into<String>) -> Self {
        Self {
            name,
            status: "warn",
            detail: detail.into(),
            recommendation: Some(rec.into()),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, rec: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            detail: detail.into(),
            recommendation: Some(rec.into()),
        }
    }
}

pub fn execute_doctor(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let _args: DoctorArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, TOOL, e),
    };

    let checks = vec![
        check_daemon(ctx),
        check_db_access(ctx),
        check_disk_space(ctx),
        check_tokenizer(ctx),
        check_tree_sitter(),
        check_writer(ctx),
        check_queues(ctx),
    ];

    let recommendations: Vec<String> = checks
        .iter()
        .filter_map(|c| c.recommendation.clone())
        .collect();
    let healthy = checks.iter().all(|c| c.status == "ok");

    let results: Vec<Value> = checks
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "status": c.status,
                "detail": &c.detail,
            })
        })
        .collect();
    let payload = json!({
        "healthy": healthy,
        "results": results,
        "recommendations": &recommendations,
    });

    let mut lines = vec![pack_header(
        TOOL,
        &[("healthy", healthy.to_string())],
        Some(checks.len()),
        None,
        None,
    )];
    for c in &checks {
        lines.push(pack_line(
            "c",
            &[
                ("name", enc_text(c.name)),
                ("status", c.status.to_string()),
                ("detail", enc_text(&c.detail)),
            ],
        ));
    }
    for rec in &recommendations {
        lines.push(pack_line("rec", &[("msg", enc_text(rec))]));
    }
    ToolResponse::ok(payload, lines.join("\n"))
}

fn check_daemon(ctx: &ToolContext) -> Check {
    Check::ok(
        "Sari Daemon",
        format!(
            "pid {} serving {} root(s)",
            std::process::id(),
            ctx.roots.len()
        ),
    )
}

fn check_db_access(ctx: &ToolContext) -> Check {
    let db_path = ctx.store.db_path().to_path_buf();
    let Some(dir) = db_path.parent() else {
        return Check::fail(
            "DB Access",
            "database path has no parent directory",
            "set SARI_DB_PATH to a writable location",
        );
    };
    let probe = dir.join(".sari-doctor-probe");
    let writable = std::fs::write(&probe, b"ok").is_ok();
    let _ = std::fs::remove_file(&probe);
    if !writable {
        return Check::fail(
            "DB Access",
            format!("cannot write in {}", dir.display()),
            format!("restore write permission on {}", dir.display()),
        );
    }
    if !ctx
        .store
        .has_table_columns("files", &["db_path", "content_hash", "scan_ts", "deleted_ts"])
    {
        return Check::fail(
            "DB Access",
            "files table is missing critical columns",
            "delete the index database and rescan to rebuild the schema",
        );
    }
    match ctx.store.conn() {
        Ok(_) => Check::ok("DB Access", format!("read/write ok at {}", db_path.display())),
        Err(e) => Check::fail(
            "DB Access",
            format!("read connection failed: {e}"),
            "delete the index database and rescan",
        ),
    }
}

fn check_disk_space(ctx: &ToolContext) -> Check {
    let db_path = ctx.store.db_path().to_path_buf();
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let available = disks
        .list()
        .iter()
        .filter(|d| db_path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| d.available_space());
    match available {
        Some(free) if free >= MIN_FREE_BYTES => Check::ok(
            "Disk Space",
            format!("{} MiB free", free / (1024 * 1024)),
        ),
        Some(free) => Check::warn(
            "Disk Space",
            format!("only {} MiB free", free / (1024 * 1024)),
            "free disk space; the index may fail to grow",
        ),
        None => Check::ok("Disk Space", "mount point not resolved; skipping"),
    }
}

fn check_tokenizer(ctx: &ToolContext) -> Check {
    if ctx.engine.tokenizer_ready() {
        Check::ok(
            "Tokenizer",
            format!("bundle '{}' ready", ctx.engine.tokenizer_bundle_tag()),
        )
    } else {
        Check::warn(
            "Tokenizer",
            "no CJK tokenizer available",
            "CJK queries will degrade; install a tokenizer bundle",
        )
    }
}

fn check_tree_sitter() -> Check {
    if ast::backend_available() {
        Check::ok("Tree-sitter", "AST backend compiled in")
    } else {
        Check::warn(
            "Tree-sitter",
            "AST backend not compiled in",
            "rebuild with the 'ast' feature for symbol-accurate extraction",
        )
    }
}

fn check_writer(ctx: &ToolContext) -> Check {
    if !ctx.store.writer_alive() {
        return Check::fail(
            "Writer Health",
            "writer thread is not responding",
            "restart the service; queued writes are parked in the tasks table",
        );
    }
    match ctx.store.count_failed_tasks() {
        Ok((0, _)) => Check::ok("Writer Health", "writer alive, no failed tasks"),
        Ok((total, high)) => Check::warn(
            "Writer Health",
            format!("{total} failed write task(s), {high} high priority"),
            "run scan_once to retry failed writes",
        ),
        Err(e) => Check::fail(
            "Writer Health",
            format!("task query failed: {e}"),
            "check the index database integrity",
        ),
    }
}

fn check_queues(ctx: &ToolContext) -> Check {
    let status = ctx.indexer.status();
    let depth = status.fair_queue_depth + status.priority_queue_depth;
    if depth > 2048 {
        Check::warn(
            "Index Queues",
            format!("{depth} queued tasks"),
            "indexing is backlogged; avoid rescans until it drains",
        )
    } else {
        Check::ok("Index Queues", format!("{depth} queued tasks"))
    }
}
