//! MCP tool implementations.
//!
//! Each tool is a pure function `(context, args) -> ToolResponse`. The
//! registry pairs every handler with a JSON-Schema input description
//! (sanitized for LLM clients) and is the single source of truth for
//! `tools/list` and `tools/call` dispatch.

mod admin;
mod doctor;
mod edit;
mod files;
mod graph;
mod knowledge;
mod read;
mod search;

pub use admin::{execute_index_file, execute_rescan, execute_scan_once, execute_status};
pub use doctor::execute_doctor;
pub use edit::version_hash;
pub use files::{execute_list_files, execute_list_symbols};
pub use graph::{execute_call_graph, execute_get_callers, execute_get_implementations};
pub use knowledge::{execute_knowledge, make_context_ref};
pub use read::execute_read;
pub use search::execute_search;

use crate::engine::Engine;
use crate::error::{ToolCode, ToolError};
use crate::indexer::Indexer;
use crate::pack::ToolResponse;
use crate::settings::Settings;
use crate::stabilize::Stabilization;
use crate::store::Store;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a tool needs; owned state only, no globals.
#[derive(Clone)]
pub struct ToolContext {
    pub store: Arc<Store>,
    pub engine: Arc<Engine>,
    pub indexer: Arc<Indexer>,
    pub stabilization: Arc<Stabilization>,
    pub settings: Settings,
    pub roots: Vec<PathBuf>,
    pub workspace_root: PathBuf,
    pub server_version: &'static str,
}

type Handler = fn(&ToolContext, &Value) -> ToolResponse;

/// One registered tool.
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    /// Hidden from `tools/list` unless `SARI_EXPOSE_INTERNAL_TOOLS`.
    pub internal: bool,
    handler: Handler,
}

/// Registry of all tools; dispatch and listing both go through it.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl ToolRegistry {
    /// Builds the default tool set.
    #[must_use]
    pub fn default_registry() -> Self {
        let tools = vec![
            ToolDef {
                name: "search",
                description: "Unified code/symbol/api/repo search over the workspace index. \
                              search_type=auto infers intent from the query shape.",
                input_schema: schema_of::<search::SearchArgs>(),
                internal: false,
                handler: search::execute_search,
            },
            ToolDef {
                name: "read",
                description: "Unified read: mode=file|symbol|snippet|diff_preview|ast_edit. \
                              Mode-specific parameters are rejected outside their mode.",
                input_schema: schema_of::<read::ReadArgs>(),
                internal: false,
                handler: read::execute_read,
            },
            ToolDef {
                name: "list_files",
                description: "Per-repo summary (no repo argument) or a detailed paginated \
                              listing of one repo.",
                input_schema: schema_of::<files::ListFilesArgs>(),
                internal: false,
                handler: files::execute_list_files,
            },
            ToolDef {
                name: "list_symbols",
                description: "Symbol tree for one file.",
                input_schema: schema_of::<files::ListSymbolsArgs>(),
                internal: false,
                handler: files::execute_list_symbols,
            },
            ToolDef {
                name: "get_callers",
                description: "Call sites referencing a symbol.",
                input_schema: schema_of::<graph::CallersArgs>(),
                internal: false,
                handler: graph::execute_get_callers,
            },
            ToolDef {
                name: "get_implementations",
                description: "Types implementing or extending a symbol.",
                input_schema: schema_of::<graph::ImplementationsArgs>(),
                internal: false,
                handler: graph::execute_get_implementations,
            },
            ToolDef {
                name: "call_graph",
                description: "Bounded call-graph traversal from a symbol \
                              (max_nodes/max_edges/max_depth/max_time_ms).",
                input_schema: schema_of::<graph::CallGraphArgs>(),
                internal: false,
                handler: graph::execute_call_graph,
            },
            ToolDef {
                name: "knowledge",
                description: "Save/recall/list/delete/relink domain knowledge (contexts) and \
                              tagged snippets. save requires a verifiable context_ref.",
                input_schema: schema_of::<knowledge::KnowledgeArgs>(),
                internal: false,
                handler: knowledge::execute_knowledge,
            },
            ToolDef {
                name: "status",
                description: "Index, engine, and session health snapshot.",
                input_schema: schema_of::<admin::StatusArgs>(),
                internal: false,
                handler: admin::execute_status,
            },
            ToolDef {
                name: "rescan",
                description: "Request a non-blocking workspace rescan (coalesced while one \
                              is in flight).",
                input_schema: schema_of::<admin::RescanArgs>(),
                internal: false,
                handler: admin::execute_rescan,
            },
            ToolDef {
                name: "scan_once",
                description: "Run one full scan to completion and drain the index queues.",
                input_schema: schema_of::<admin::ScanOnceArgs>(),
                internal: false,
                handler: admin::execute_scan_once,
            },
            ToolDef {
                name: "index_file",
                description: "Queue one file for priority reindexing.",
                input_schema: schema_of::<admin::IndexFileArgs>(),
                internal: false,
                handler: admin::execute_index_file,
            },
            ToolDef {
                name: "doctor",
                description: "Read-only health checks with recommendations.",
                input_schema: schema_of::<doctor::DoctorArgs>(),
                internal: false,
                handler: doctor::execute_doctor,
            },
        ];
        Self { tools }
    }

    /// Tools visible to `tools/list`.
    #[must_use]
    pub fn list(&self, expose_internal: bool) -> Vec<&ToolDef> {
        self.tools
            .iter()
            .filter(|t| expose_internal || !t.internal)
            .collect()
    }

    /// Dispatches a `tools/call`. `None` when the tool is unknown.
    #[must_use]
    pub fn execute(&self, name: &str, ctx: &ToolContext, args: &Value) -> Option<ToolResponse> {
        let tool = self.tools.iter().find(|t| t.name == name)?;
        Some((tool.handler)(ctx, args))
    }
}

/// Generates the sanitized input schema for a tool args type.
fn schema_of<T: schemars::JsonSchema>() -> Value {
    let schema = schemars::schema_for!(T);
    let value = serde_json::to_value(schema).unwrap_or_else(|_| json!({"type": "object"}));
    sanitize_schema_for_llm(value)
}

/// Makes a JSON Schema friendlier to LLM clients:
/// `integer` becomes `number` with `multipleOf: 1`, and `null` is removed
/// from union type arrays.
#[must_use]
pub fn sanitize_schema_for_llm(schema: Value) -> Value {
    fn walk(node: Value) -> Value {
        let Value::Object(mut map) = node else {
            return node;
        };
        if let Some(t) = map.get("type").cloned() {
            match t {
                Value::String(s) if s == "integer" => {
                    map.insert("type".into(), json!("number"));
                    map.entry("multipleOf").or_insert(json!(1));
                }
                Value::Array(items) => {
                    let had_integer = items.iter().any(|v| v.as_str() == Some("integer"));
                    let mut kept: Vec<Value> = items
                        .into_iter()
                        .filter(|v| v.as_str() != Some("null"))
                        .map(|v| {
                            if v.as_str() == Some("integer") {
                                json!("number")
                            } else {
                                v
                            }
                        })
                        .collect();
                    if kept.is_empty() {
                        kept.push(json!("object"));
                    }
                    let new_type = if kept.len() == 1 {
                        kept.into_iter().next().expect("one element")
                    } else {
                        Value::Array(kept)
                    };
                    map.insert("type".into(), new_type);
                    if had_integer {
                        map.entry("multipleOf").or_insert(json!(1));
                    }
                }
                _ => {}
            }
        }
        // Nullable unions collapse to their single non-null variant.
        for key in ["anyOf", "oneOf"] {
            if let Some(Value::Array(variants)) = map.get(key) {
                let non_null: Vec<Value> = variants
                    .iter()
                    .filter(|v| v.get("type").and_then(Value::as_str) != Some("null"))
                    .cloned()
                    .collect();
                if non_null.len() == 1 && non_null.len() < variants.len() {
                    let mut merged = non_null.into_iter().next().expect("one variant");
                    if let Value::Object(dst) = &mut merged {
                        for (k, v) in &map {
                            if k.as_str() != key && !dst.contains_key(k) {
                                dst.insert(k.clone(), v.clone());
                            }
                        }
                    }
                    return walk(merged);
                }
            }
        }
        for key in ["properties", "patternProperties", "definitions", "$defs"] {
            if let Some(Value::Object(children)) = map.remove(key) {
                let rebuilt: serde_json::Map<String, Value> =
                    children.into_iter().map(|(k, v)| (k, walk(v))).collect();
                map.insert(key.into(), Value::Object(rebuilt));
            }
        }
        if let Some(items) = map.remove("items") {
            map.insert("items".into(), walk(items));
        }
        Value::Object(map)
    }
    walk(schema)
}

/// Parses typed args, mapping deserialization failures (including unknown
/// fields) to `INVALID_ARGS`.
pub(crate) fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, ToolError> {
    serde_json::from_value(args.clone())
        .map_err(|e| ToolError::invalid_args(format!("invalid arguments: {e}")))
}

/// Tolerant integer argument: accepts `5`, `5.0`, and `"5"`.
pub(crate) fn opt_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize as _;
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Ok(Some(i))
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 {
                    Ok(Some(f as i64))
                } else {
                    Err(serde::de::Error::custom("must be an integer"))
                }
            } else {
                Err(serde::de::Error::custom("must be an integer"))
            }
        }
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom("must be an integer")),
        Some(_) => Err(serde::de::Error::custom("must be an integer")),
    }
}

/// Maps a tool-level error into its response, recording the warning.
pub(crate) fn error_response(ctx: &ToolContext, tool: &str, err: ToolError) -> ToolResponse {
    ctx.stabilization.warn(err.code.as_str(), &err.message);
    ToolResponse::from_error(tool, &err)
}

/// Resolves a user target into a db-path, refusing out-of-scope paths.
pub(crate) fn resolve_target(ctx: &ToolContext, target: &str) -> Result<String, ToolError> {
    crate::workspace::resolve_db_path(target, &ctx.roots).ok_or_else(|| {
        ToolError::new(
            ToolCode::RootOutOfScope,
            format!("'{target}' is outside every registered workspace root"),
        )
        .with_hint("pass a path under a registered root, or a root-<id>/<rel> db-path")
    })
}
