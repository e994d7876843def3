//! File and symbol listing tools.

use super::{error_response, opt_int, parse_args, resolve_target, ToolContext};
use crate::error::{ToolCode, ToolError};
use crate::pack::{enc_id, pack_header, pack_line, pack_truncated, ToolResponse};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListFilesArgs {
    /// Repo label; omit for the per-repo summary.
    #[serde(default)]
    pub repo: Option<String>,
    /// Maximum files per page (detailed listing).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub limit: Option<i64>,
    /// Pagination offset (detailed listing).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub offset: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

pub fn execute_list_files(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let args: ListFilesArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, "list_files", e),
    };
    match &args.repo {
        None => repo_summary(ctx),
        Some(repo) => repo_detail(ctx, repo, &args),
    }
}

/// Per-repo summary, payload bounded by eliding trailing repos.
fn repo_summary(ctx: &ToolContext) -> ToolResponse {
    let stats = match ctx.store.get_repo_stats(None) {
        Ok(s) => s,
        Err(e) => return error_response(ctx, "list_files", e.into()),
    };
    let repos_total = stats.len();
    let budget = ctx.settings.list_files_budget_bytes;

    let mut repos_json = Vec::new();
    let mut pack_lines = Vec::new();
    let mut spent = 0usize;
    for stat in &stats {
        let entry_cost = stat.repo.len() + 48;
        if spent + entry_cost > budget && !repos_json.is_empty() {
            break;
        }
        spent += entry_cost;
        repos_json.push(json!({
            "repo": &stat.repo,
            "files": stat.files,
            "bytes": stat.bytes,
        }));
        pack_lines.push(pack_line(
            "r",
            &[
                ("repo", enc_id(&stat.repo)),
                ("files", stat.files.to_string()),
                ("bytes", stat.bytes.to_string()),
            ],
        ));
    }
    let repos_returned = repos_json.len();
    let truncated = repos_returned < repos_total;

    let payload = json!({
        "repos": repos_json,
        "repos_returned": repos_returned,
        "repos_total": repos_total,
        "truncated": truncated,
    });
    let mut lines = vec![pack_header(
        "list_files",
        &[("truncated", truncated.to_string())],
        Some(repos_returned),
        Some(repos_total),
        Some("exact"),
    )];
    lines.extend(pack_lines);
    ToolResponse::ok(payload, lines.join("\n"))
}

fn repo_detail(ctx: &ToolContext, repo: &str, args: &ListFilesArgs) -> ToolResponse {
    let known = match ctx.store.get_repo_stats(None) {
        Ok(stats) => stats.iter().any(|s| s.repo == repo),
        Err(e) => return error_response(ctx, "list_files", e.into()),
    };
    if !known {
        let err = ToolError::new(
            ToolCode::RepoNotFound,
            format!("repo '{repo}' is not in the index"),
        )
        .with_next_call(json!({"tool": "list_files", "arguments": {}}));
        return error_response(ctx, "list_files", err);
    }

    let limit = args.limit.unwrap_or(100).clamp(1, 500) as usize;
    let offset = args.offset.unwrap_or(0).max(0) as usize;
    let (rows, total) = match ctx.store.list_files(repo, limit, offset) {
        Ok(out) => out,
        Err(e) => return error_response(ctx, "list_files", e.into()),
    };

    let files_json: Vec<Value> = rows
        .iter()
        .map(|f| {
            json!({
                "path": &f.db_path,
                "mtime": f.mtime,
                "size": f.size,
                "parse_status": &f.parse_status,
            })
        })
        .collect();
    let returned = files_json.len();
    let has_more = offset + returned < total as usize;

    let payload = json!({
        "repo": repo,
        "files": files_json,
        "meta": {
            "limit": limit,
            "offset": offset,
            "total": total,
            "truncated": has_more,
        }
    });
    let mut lines = vec![pack_header(
        "list_files",
        &[("repo", enc_id(repo))],
        Some(returned),
        Some(total as usize),
        Some("exact"),
    )];
    for f in &rows {
        lines.push(pack_line(
            "f",
            &[
                ("path", enc_id(&f.db_path)),
                ("size", f.size.to_string()),
                ("mtime", f.mtime.to_string()),
                ("st", f.parse_status.clone()),
            ],
        ));
    }
    if has_more {
        lines.push(pack_truncated("true", offset + returned, limit));
    }
    ToolResponse::ok(payload, lines.join("\n"))
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListSymbolsArgs {
    /// File to list (db-path or workspace-relative path).
    pub target: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

pub fn execute_list_symbols(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let args: ListSymbolsArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, "list_symbols", e),
    };
    let db_path = match resolve_target(ctx, &args.target) {
        Ok(p) => p,
        Err(e) => return error_response(ctx, "list_symbols", e),
    };
    match ctx.store.get_file_record(&db_path) {
        Ok(Some(_)) => {}
        Ok(None) => {
            let err = ToolError::new(
                ToolCode::NotIndexed,
                format!("'{db_path}' is not in the index"),
            )
            .with_next_call(json!({
                "tool": "index_file",
                "arguments": {"path": args.target}
            }));
            return error_response(ctx, "list_symbols", err);
        }
        Err(e) => return error_response(ctx, "list_symbols", e.into()),
    }

    let symbols = match ctx.store.symbols_for_file(&db_path) {
        Ok(s) => s,
        Err(e) => return error_response(ctx, "list_symbols", e.into()),
    };

    // One nesting level: children grouped under their parent's name.
    let mut roots: Vec<Value> = Vec::new();
    for sym in symbols.iter().filter(|s| s.parent.is_none()) {
        let children: Vec<Value> = symbols
            .iter()
            .filter(|s| s.parent.as_deref() == Some(sym.name.as_str()))
            .map(symbol_json)
            .collect();
        let mut node = symbol_json(sym);
        if !children.is_empty() {
            node["children"] = json!(children);
        }
        roots.push(node);
    }
    // Orphans whose parent symbol was not indexed still show up flat.
    for sym in symbols.iter().filter(|s| {
        s.parent
            .as_deref()
            .is_some_and(|p| !symbols.iter().any(|o| o.name == p))
    }) {
        roots.push(symbol_json(sym));
    }

    let payload = json!({
        "path": &db_path,
        "symbols": roots,
        "count": symbols.len(),
    });
    let mut lines = vec![pack_header(
        "list_symbols",
        &[("path", enc_id(&db_path))],
        Some(symbols.len()),
        None,
        None,
    )];
    for sym in &symbols {
        let mut kv = vec![
            ("name", enc_id(&sym.name)),
            ("kind", sym.kind.as_str().to_string()),
            ("line", sym.line.to_string()),
            ("end", sym.end_line.to_string()),
        ];
        if let Some(parent) = &sym.parent {
            kv.push(("parent", enc_id(parent)));
        }
        lines.push(pack_line("s", &kv));
    }
    ToolResponse::ok(payload, lines.join("\n"))
}

fn symbol_json(sym: &crate::types::SymbolRow) -> Value {
    json!({
        "name": &sym.name,
        "qualname": &sym.qualname,
        "kind": sym.kind.as_str(),
        "line": sym.line,
        "end_line": sym.end_line,
        "symbol_id": sym.symbol_id.as_str(),
    })
}
