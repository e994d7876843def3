//! Thin wrappers over the indexer service plus the status snapshot.

use super::{error_response, parse_args, ToolContext};
use crate::pack::{enc_id, pack_header, pack_line, ToolResponse};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct StatusArgs {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

pub fn execute_status(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let _args: StatusArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, "status", e),
    };
    let idx = ctx.indexer.status();
    let file_count = ctx.store.file_count(None).unwrap_or(0);
    let symbol_count = ctx.store.symbol_count().unwrap_or(0);
    let (failed_total, failed_high) = ctx.store.count_failed_tasks().unwrap_or((0, 0));
    let warning_counts: Vec<Value> = ctx
        .stabilization
        .warning_counts()
        .into_iter()
        .take(10)
        .map(|(code, count)| json!({ "code": code, "count": count }))
        .collect();

    let payload = json!({
        "server": { "name": "sari", "version": ctx.server_version },
        "workspace_roots": ctx
            .roots
            .iter()
            .map(|r| r.to_string_lossy().into_owned())
            .collect::<Vec<_>>(),
        "index": {
            "index_ready": idx.index_ready,
            "phase": idx.phase,
            "mode": format!("{:?}", idx.mode).to_lowercase(),
            "last_scan_ts": idx.last_scan_ts,
            "scanned_files": idx.scanned_files,
            "indexed_files": idx.indexed_files,
            "errors": idx.errors,
            "fair_queue_depth": idx.fair_queue_depth,
            "priority_queue_depth": idx.priority_queue_depth,
            "in_flight": idx.in_flight,
            "governor_factor": (idx.governor_factor * 100.0).round() / 100.0,
        },
        "storage": {
            "db_path": ctx.store.db_path().to_string_lossy(),
            "file_count": file_count,
            "symbol_count": symbol_count,
            "failed_tasks": failed_total,
            "failed_tasks_high_priority": failed_high,
            "has_legacy_paths": ctx.store.has_legacy_paths(),
        },
        "engine": {
            "engine_tokenizer_ready": ctx.engine.tokenizer_ready(),
            "engine_tokenizer_bundle_tag": ctx.engine.tokenizer_bundle_tag(),
            "engine_tokenizer_bundle_path": ctx.engine.tokenizer_bundle_path(),
        },
        "stabilization": {
            "sessions": ctx.stabilization.session_count(),
            "read_gate_mode": format!("{:?}", ctx.stabilization.gate_mode()).to_lowercase(),
            "warning_counts": warning_counts,
        },
    });

    let pack = [
        pack_header(
            "status",
            &[
                ("ready", idx.index_ready.to_string()),
                ("phase", idx.phase.to_string()),
                ("files", file_count.to_string()),
                ("symbols", symbol_count.to_string()),
                ("errors", idx.errors.to_string()),
                ("tokenizer_ready", ctx.engine.tokenizer_ready().to_string()),
            ],
            None,
            None,
            None,
        ),
        pack_line(
            "q",
            &[
                ("fair", idx.fair_queue_depth.to_string()),
                ("prio", idx.priority_queue_depth.to_string()),
                ("in_flight", idx.in_flight.to_string()),
                (
                    "governor",
                    format!("{:.2}", idx.governor_factor),
                ),
            ],
        ),
    ]
    .join("\n");
    ToolResponse::ok(payload, pack)
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RescanArgs {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

pub fn execute_rescan(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let _args: RescanArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, "rescan", e),
    };
    match ctx.indexer.rescan() {
        Ok(started) => {
            let state = if started { "started" } else { "coalesced" };
            let payload = json!({ "ok": true, "state": state });
            let pack = pack_header("rescan", &[("state", state.into())], None, None, None);
            ToolResponse::ok(payload, pack)
        }
        Err(e) => error_response(ctx, "rescan", e.into()),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ScanOnceArgs {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

pub fn execute_scan_once(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let _args: ScanOnceArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, "scan_once", e),
    };
    match ctx.indexer.scan_once() {
        Ok(outcome) => {
            let payload = json!({
                "scanned_files": outcome.scanned_files,
                "indexed_files": outcome.indexed_files,
            });
            let pack = pack_header(
                "scan_once",
                &[
                    ("scanned", outcome.scanned_files.to_string()),
                    ("indexed", outcome.indexed_files.to_string()),
                ],
                None,
                None,
                None,
            );
            ToolResponse::ok(payload, pack)
        }
        Err(e) => error_response(ctx, "scan_once", e.into()),
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct IndexFileArgs {
    /// File to reindex (absolute or workspace-relative).
    pub path: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

pub fn execute_index_file(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let args: IndexFileArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, "index_file", e),
    };
    let fs_path = if std::path::Path::new(&args.path).is_absolute() {
        std::path::PathBuf::from(&args.path)
    } else {
        match crate::workspace::resolve_db_path(&args.path, &ctx.roots)
            .and_then(|db| crate::workspace::db_path_to_fs(&db, &ctx.roots))
        {
            Some(p) => p,
            None => {
                return error_response(
                    ctx,
                    "index_file",
                    crate::error::ToolError::new(
                        crate::error::ToolCode::RootOutOfScope,
                        format!("'{}' is outside every registered workspace root", args.path),
                    ),
                )
            }
        }
    };
    match ctx.indexer.index_file(&fs_path) {
        Ok(()) => {
            let payload = json!({ "ok": true, "path": &args.path });
            let pack = pack_header(
                "index_file",
                &[("path", enc_id(&args.path)), ("queued", "true".into())],
                None,
                None,
                None,
            );
            ToolResponse::ok(payload, pack)
        }
        Err(e) => error_response(ctx, "index_file", e.into()),
    }
}
