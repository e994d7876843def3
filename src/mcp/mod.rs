//! MCP server: JSON-RPC dispatch over the framed transport.
//!
//! A single read loop feeds a bounded request queue; a worker pool
//! handles tool invocations in parallel. Output frames are totally
//! ordered by one write mutex, so concurrent workers never interleave
//! bytes. When the queue is full the reader answers `-32003` itself
//! rather than blocking the wire.

pub mod transport;

pub use transport::{write_message, FrameMode, FrameReader, MAX_MESSAGE_SIZE};

use crate::pack::ToolResponse;
use crate::tools::{ToolContext, ToolRegistry};
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::Mutex;

/// Default protocol version offered to clients.
pub const PROTOCOL_VERSION: &str = "2025-06-18";
/// Versions this server can speak.
pub const SUPPORTED_VERSIONS: [&str; 4] =
    ["2024-11-05", "2025-03-26", "2025-06-18", "2025-11-25"];

/// The MCP server over one tool context.
pub struct McpServer {
    ctx: ToolContext,
    registry: ToolRegistry,
    /// Workspace root the client announced through `initialize`
    /// (`rootUri` / `rootPath` / first workspace folder).
    announced_root: Mutex<Option<String>>,
}

impl McpServer {
    #[must_use]
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            ctx,
            registry: ToolRegistry::default_registry(),
            announced_root: Mutex::new(None),
        }
    }

    /// Serves requests from `input` until EOF. Workers drain the queue
    /// before the call returns.
    pub fn run<R, W>(&self, input: R, output: W)
    where
        R: BufRead,
        W: Write + Send,
    {
        let output = Mutex::new(output);
        let workers = self.ctx.settings.mcp_workers.max(1);
        let (tx, rx) =
            crossbeam_channel::bounded::<(Value, FrameMode)>(self.ctx.settings.mcp_queue_size);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let output = &output;
                scope.spawn(move || {
                    while let Ok((request, mode)) = rx.recv() {
                        if let Some(response) = self.handle_request(&request) {
                            self.write_response(output, &response, mode);
                        }
                    }
                });
            }

            let mut reader = FrameReader::new(input);
            while let Some((request, mode)) = reader.read_message() {
                if tx.try_send((request.clone(), mode)).is_err() {
                    let overloaded = json!({
                        "jsonrpc": "2.0",
                        "id": request.get("id").cloned().unwrap_or(Value::Null),
                        "error": { "code": -32003, "message": "Server overloaded" },
                    });
                    self.write_response(&output, &overloaded, mode);
                }
            }
            drop(tx);
            // Scope exit joins the workers after they drain the queue.
        });
    }

    fn output_mode(&self, request_mode: FrameMode) -> FrameMode {
        if self.ctx.settings.force_content_length {
            FrameMode::ContentLength
        } else if self.ctx.settings.dev_jsonl {
            FrameMode::Jsonl
        } else {
            request_mode
        }
    }

    fn write_response<W: Write>(&self, output: &Mutex<W>, response: &Value, mode: FrameMode) {
        let mode = self.output_mode(mode);
        let mut guard = output.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = write_message(&mut *guard, response, mode) {
            tracing::error!(target: "sari::mcp", "write failed: {e}");
        }
    }

    /// Dispatches one JSON-RPC request. `None` for notifications.
    #[must_use]
    pub fn handle_request(&self, request: &Value) -> Option<Value> {
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
        let id = request.get("id").cloned();

        // Requests without an id are notifications: handle side effects,
        // never respond.
        let Some(id) = id.filter(|v| !v.is_null()) else {
            return None;
        };

        let result: Result<Value, (i64, String, Option<Value>)> = match method {
            "initialize" => self.handle_initialize(&params),
            "tools/list" => Ok(json!({ "tools": self.list_tools() })),
            "tools/call" => self.handle_tools_call(&params),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            "resources/list" => Ok(json!({ "resources": [] })),
            "resources/templates/list" => Ok(json!({ "resourceTemplates": [] })),
            "roots/list" => Ok(json!({ "roots": self.list_roots() })),
            "initialized" | "notifications/initialized" => Ok(json!({})),
            "ping" => Ok(json!({})),
            "sari/identify" => {
                let announced = self
                    .announced_root
                    .lock()
                    .ok()
                    .and_then(|g| g.clone())
                    .unwrap_or_default();
                Ok(json!({
                    "name": "sari",
                    "version": self.ctx.server_version,
                    "pid": std::process::id(),
                    "workspace_root": self.ctx.workspace_root.to_string_lossy(),
                    "announced_root": announced,
                }))
            }
            other => Err((-32601, format!("Method not found: {other}"), None)),
        };

        Some(match result {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err((code, message, data)) => {
                let mut error = json!({ "code": code, "message": message });
                if let Some(data) = data {
                    error["data"] = data;
                }
                json!({ "jsonrpc": "2.0", "id": id, "error": error })
            }
        })
    }

    fn handle_initialize(&self, params: &Value) -> Result<Value, (i64, String, Option<Value>)> {
        if let Some(root) = announced_workspace_root(params) {
            let served = self.ctx.workspace_root.to_string_lossy();
            if root != served {
                tracing::warn!(
                    target: "sari::mcp",
                    "client announced workspace '{root}' but this server serves '{served}'"
                );
            }
            if let Ok(mut guard) = self.announced_root.lock() {
                *guard = Some(root);
            }
        }
        let client_versions = client_protocol_versions(params);
        let negotiated = client_versions
            .iter()
            .find(|v| SUPPORTED_VERSIONS.contains(&v.as_str()))
            .cloned();
        let negotiated = match negotiated {
            Some(v) => v,
            None if self.ctx.settings.strict_protocol && !client_versions.is_empty() => {
                return Err((
                    -32602,
                    "Unsupported protocol version".into(),
                    Some(json!({ "supported": SUPPORTED_VERSIONS })),
                ));
            }
            None => PROTOCOL_VERSION.to_string(),
        };
        Ok(json!({
            "protocolVersion": negotiated,
            "serverInfo": { "name": "sari", "version": self.ctx.server_version },
            "capabilities": {
                "tools": { "listChanged": false },
                "prompts": { "listChanged": false },
                "resources": { "subscribe": false, "listChanged": false },
                "roots": { "listChanged": false },
            },
        }))
    }

    fn handle_tools_call(&self, params: &Value) -> Result<Value, (i64, String, Option<Value>)> {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let args = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let Some(response) = self.registry.execute(name, &self.ctx, &args) else {
            return Err((-32602, format!("Unknown tool: {name}"), None));
        };
        let encoded = self.encode(&response);
        if response.is_error {
            // Tool errors ride the JSON-RPC error channel with the
            // structured payload (reason codes included) as data.
            let message = response
                .json
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("tool error")
                .to_string();
            return Err((-32000, message, Some(encoded)));
        }
        Ok(encoded)
    }

    fn encode(&self, response: &ToolResponse) -> Value {
        response.encode(&self.ctx.settings)
    }

    fn list_tools(&self) -> Vec<Value> {
        self.registry
            .list(self.ctx.settings.expose_internal_tools)
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": &t.input_schema,
                })
            })
            .collect()
    }

    fn list_roots(&self) -> Vec<Value> {
        self.ctx
            .roots
            .iter()
            .map(|r| {
                let name = r
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| r.to_string_lossy().into_owned());
                json!({ "uri": format!("file://{}", r.to_string_lossy()), "name": name })
            })
            .collect()
    }
}

/// Extracts the workspace root a client announces in `initialize`.
/// Priority: first workspace folder, then `rootUri`, then `rootPath`.
fn announced_workspace_root(params: &Value) -> Option<String> {
    let raw = params
        .get("workspaceFolders")
        .and_then(Value::as_array)
        .and_then(|folders| folders.first())
        .and_then(|f| f.get("uri").or_else(|| f.get("path")))
        .and_then(Value::as_str)
        .or_else(|| {
            params
                .get("rootUri")
                .or_else(|| params.get("rootPath"))
                .and_then(Value::as_str)
        })?;
    let path = raw.strip_prefix("file://").unwrap_or(raw);
    let path = path.trim_end_matches('/');
    (!path.is_empty()).then(|| path.to_string())
}

fn client_protocol_versions(params: &Value) -> Vec<String> {
    let mut versions = Vec::new();
    let mut push = |v: &Value| {
        if let Some(s) = v.as_str() {
            let s = s.trim();
            if !s.is_empty() && !versions.contains(&s.to_string()) {
                versions.push(s.to_string());
            }
        }
    };
    if let Some(v) = params.get("protocolVersion") {
        push(v);
    }
    for key in ["supportedProtocolVersions"] {
        if let Some(Value::Array(items)) = params.get(key) {
            for v in items {
                push(v);
            }
        }
    }
    if let Some(Value::Array(items)) = params
        .get("capabilities")
        .and_then(|c| c.get("protocolVersions"))
    {
        for v in items {
            push(v);
        }
    }
    versions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announced_workspace_root_priority() {
        let params = json!({
            "rootUri": "file:///from/root-uri",
            "workspaceFolders": [{ "uri": "file:///from/folder/" }],
        });
        assert_eq!(
            announced_workspace_root(&params).unwrap(),
            "/from/folder"
        );
        let params = json!({ "rootPath": "/plain/path" });
        assert_eq!(announced_workspace_root(&params).unwrap(), "/plain/path");
        assert!(announced_workspace_root(&json!({})).is_none());
    }

    #[test]
    fn test_client_versions_collection() {
        let params = json!({
            "protocolVersion": "2099-01-01",
            "supportedProtocolVersions": ["2025-06-18", "2099-01-01"],
            "capabilities": { "protocolVersions": ["2024-11-05"] },
        });
        let versions = client_protocol_versions(&params);
        assert_eq!(versions[0], "2099-01-01");
        assert!(versions.contains(&"2025-06-18".to_string()));
        assert!(versions.contains(&"2024-11-05".to_string()));
        // deduplicated
        assert_eq!(
            versions
                .iter()
                .filter(|v| v.as_str() == "2099-01-01")
                .count(),
            1
        );
    }
}
