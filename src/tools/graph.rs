//! Relation traversal tools: callers, implementations, call graph.
//!
//! The symbol graph may be cyclic; every traversal carries a visited set
//! and honors node/edge/depth/time caps.

use super::{error_response, opt_int, parse_args, ToolContext};
use crate::error::ToolError;
use crate::pack::{enc_id, pack_header, pack_line, ToolResponse};
use crate::types::RelType;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CallersArgs {
    /// Symbol name (or symbol id) whose callers to find.
    pub symbol: String,
    /// Maximum call sites (default: 50).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub limit: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

pub fn execute_get_callers(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let args: CallersArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, "get_callers", e),
    };
    if args.symbol.trim().is_empty() {
        return error_response(
            ctx,
            "get_callers",
            ToolError::invalid_args("symbol must not be empty"),
        );
    }
    let limit = args.limit.unwrap_or(50).clamp(1, 500) as usize;
    let relations = match ctx
        .store
        .relations_to(args.symbol.trim(), &[RelType::Calls], limit)
    {
        Ok(r) => r,
        Err(e) => return error_response(ctx, "get_callers", e.into()),
    };

    let callers: Vec<Value> = relations
        .iter()
        .map(|r| {
            json!({
                "from_symbol": &r.from_symbol,
                "from_path": &r.from_path,
                "line": r.line,
                "rel_type": r.rel_type.as_str(),
            })
        })
        .collect();
    let payload = json!({
        "symbol": args.symbol,
        "callers": callers,
        "count": relations.len(),
    });
    let mut lines = vec![pack_header(
        "get_callers",
        &[("symbol", enc_id(&args.symbol))],
        Some(relations.len()),
        None,
        None,
    )];
    for r in &relations {
        lines.push(pack_line(
            "r",
            &[
                ("from", enc_id(&r.from_symbol)),
                ("path", enc_id(&r.from_path)),
                ("line", r.line.to_string()),
            ],
        ));
    }
    ToolResponse::ok(payload, lines.join("\n"))
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ImplementationsArgs {
    /// Interface/base symbol name.
    pub symbol: String,
    /// Maximum implementations (default: 50).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub limit: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

pub fn execute_get_implementations(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let args: ImplementationsArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, "get_implementations", e),
    };
    let limit = args.limit.unwrap_or(50).clamp(1, 500) as usize;
    let relations = match ctx.store.relations_to(
        args.symbol.trim(),
        &[RelType::Implements, RelType::Extends],
        limit,
    ) {
        Ok(r) => r,
        Err(e) => return error_response(ctx, "get_implementations", e.into()),
    };

    let implementations: Vec<Value> = relations
        .iter()
        .map(|r| {
            json!({
                "symbol": &r.from_symbol,
                "path": &r.from_path,
                "line": r.line,
                "rel_type": r.rel_type.as_str(),
            })
        })
        .collect();
    let payload = json!({
        "symbol": args.symbol,
        "implementations": implementations,
        "count": relations.len(),
    });
    let mut lines = vec![pack_header(
        "get_implementations",
        &[("symbol", enc_id(&args.symbol))],
        Some(relations.len()),
        None,
        None,
    )];
    for r in &relations {
        lines.push(pack_line(
            "r",
            &[
                ("sym", enc_id(&r.from_symbol)),
                ("path", enc_id(&r.from_path)),
                ("line", r.line.to_string()),
                ("rel", r.rel_type.as_str().to_string()),
            ],
        ));
    }
    ToolResponse::ok(payload, lines.join("\n"))
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CallGraphArgs {
    /// Root symbol of the traversal.
    pub symbol: String,
    /// Traversal direction: out (callees) or in (callers).
    #[serde(default)]
    pub direction: Option<String>,
    /// Depth bound (default: 3).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub max_depth: Option<i64>,
    /// Node cap (default: 50).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub max_nodes: Option<i64>,
    /// Edge cap (default: 200).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub max_edges: Option<i64>,
    /// Wall-clock bound in milliseconds (default: 2000).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub max_time_ms: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

pub fn execute_call_graph(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let args: CallGraphArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, "call_graph", e),
    };
    let direction = args.direction.as_deref().unwrap_or("out");
    if direction != "out" && direction != "in" {
        return error_response(
            ctx,
            "call_graph",
            ToolError::invalid_args("direction must be 'out' or 'in'"),
        );
    }
    let max_depth = args.max_depth.unwrap_or(3).clamp(1, 10) as usize;
    let max_nodes = args.max_nodes.unwrap_or(50).clamp(1, 500) as usize;
    let max_edges = args.max_edges.unwrap_or(200).clamp(1, 2000) as usize;
    let max_time = std::time::Duration::from_millis(args.max_time_ms.unwrap_or(2000).clamp(10, 30_000) as u64);

    let started = Instant::now();
    let mut nodes: Vec<Value> = Vec::new();
    let mut edges: Vec<Value> = Vec::new();
    let mut visited = ahash::AHashSet::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();
    let mut truncated = false;

    let root = args.symbol.trim().to_string();
    visited.insert(root.clone());
    nodes.push(json!({ "symbol": root, "depth": 0 }));
    queue.push_back((root, 0));

    'bfs: while let Some((current, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        if started.elapsed() > max_time {
            truncated = true;
            break;
        }
        let step = if direction == "out" {
            ctx.store
                .relations_from(&current, &[RelType::Calls], max_edges)
        } else {
            ctx.store
                .relations_to(&current, &[RelType::Calls], max_edges)
        };
        let relations = match step {
            Ok(r) => r,
            Err(e) => return error_response(ctx, "call_graph", e.into()),
        };
        for rel in relations {
            if edges.len() >= max_edges {
                truncated = true;
                break 'bfs;
            }
            let (from, to) = (rel.from_symbol.clone(), rel.to_symbol.clone());
            edges.push(json!({
                "from": &from,
                "to": &to,
                "path": &rel.from_path,
                "line": rel.line,
            }));
            let next = if direction == "out" { to } else { from };
            if visited.insert(next.clone()) {
                if nodes.len() >= max_nodes {
                    truncated = true;
                    break 'bfs;
                }
                nodes.push(json!({ "symbol": next, "depth": depth + 1 }));
                queue.push_back((next, depth + 1));
            }
        }
    }

    let payload = json!({
        "root": args.symbol,
        "direction": direction,
        "nodes": nodes,
        "edges": edges,
        "truncated": truncated,
        "elapsed_ms": started.elapsed().as_millis() as u64,
    });
    let mut lines = vec![pack_header(
        "call_graph",
        &[
            ("root", enc_id(&args.symbol)),
            ("dir", direction.to_string()),
            ("nodes", nodes.len().to_string()),
            ("edges", edges.len().to_string()),
            ("truncated", truncated.to_string()),
        ],
        None,
        None,
        None,
    )];
    for edge in &edges {
        lines.push(pack_line(
            "e",
            &[
                (
                    "from",
                    enc_id(edge["from"].as_str().unwrap_or_default()),
                ),
                ("to", enc_id(edge["to"].as_str().unwrap_or_default())),
                (
                    "line",
                    edge["line"].as_u64().unwrap_or_default().to_string(),
                ),
            ],
        ));
    }
    ToolResponse::ok(payload, lines.join("\n"))
}
