//! Unified knowledge CRUD over contexts (topic-keyed notes) and tagged
//! snippets.
//!
//! `save` requires a verifiable `context_ref` token binding the request
//! to its payload: `cr1:<first 12 hex of SHA-1(content)>`. A stale or
//! foreign token is refused before anything is written.

use super::{error_response, opt_int, parse_args, resolve_target, ToolContext};
use crate::error::{ToolCode, ToolError};
use crate::pack::{enc_id, enc_text, pack_header, pack_line, ToolResponse};
use crate::store::{now_ts, ContextRow, SnippetRow};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

const TOOL: &str = "knowledge";
const ACTIONS: [&str; 5] = ["save", "recall", "list", "delete", "relink"];

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeArgs {
    /// One of: save, recall, list, delete, relink ("search" is accepted
    /// as an alias of recall).
    pub action: String,
    /// Context topic (contexts are keyed by topic).
    #[serde(default)]
    pub topic: Option<String>,
    /// Payload content for save.
    #[serde(default)]
    pub content: Option<String>,
    /// Verification token for save: cr1:<12-hex SHA-1 of content>.
    #[serde(default)]
    pub context_ref: Option<String>,
    /// Context tags.
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Related file db-paths.
    #[serde(default)]
    pub related_files: Option<Vec<String>>,
    /// Provenance note.
    #[serde(default)]
    pub source: Option<String>,

    /// Snippet tag (snippet saves/recalls/deletes).
    #[serde(default)]
    pub tag: Option<String>,
    /// Snippet source file.
    #[serde(default)]
    pub path: Option<String>,
    /// Snippet range start, 1-based.
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub start_line: Option<i64>,
    /// Snippet range end, 1-based inclusive.
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub end_line: Option<i64>,
    /// Free-form note on the snippet.
    #[serde(default)]
    pub note: Option<String>,
    /// Recall query over topics, tags, notes, and content.
    #[serde(default)]
    pub query: Option<String>,
    /// Snippet id (delete/relink).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub id: Option<i64>,

    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// Builds the verification token for a payload.
#[must_use]
pub fn make_context_ref(content: &str) -> String {
    let hash = crate::extract::compute_hash(content);
    format!("cr1:{}", &hash[..12])
}

fn verify_context_ref(context_ref: &str, content: &str) -> Result<(), ToolError> {
    let Some(given) = context_ref.strip_prefix("cr1:") else {
        return Err(ToolError::invalid_args(
            "context_ref must have the form cr1:<12-hex>",
        ));
    };
    let expected = crate::extract::compute_hash(content);
    if given.len() != 12 || !expected.starts_with(given) {
        return Err(ToolError::invalid_args(
            "content hash mismatch with context_ref",
        )
        .with_hint("recompute the token from the exact content being saved"));
    }
    Ok(())
}

pub fn execute_knowledge(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let args: KnowledgeArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, TOOL, e),
    };
    let mut action = args.action.trim().to_lowercase();
    if action == "search" {
        action = "recall".into();
    }
    if !ACTIONS.contains(&action.as_str()) {
        return error_response(
            ctx,
            TOOL,
            ToolError::invalid_args(format!(
                "action must be one of: {}",
                ACTIONS.join(", ")
            )),
        );
    }
    let result = match action.as_str() {
        "save" => run_save(ctx, &args),
        "recall" => run_recall(ctx, &args),
        "list" => run_list(ctx),
        "delete" => run_delete(ctx, &args),
        _ => run_relink(ctx, &args),
    };
    match result {
        Ok(resp) => resp,
        Err(e) => error_response(ctx, TOOL, e),
    }
}

fn run_save(ctx: &ToolContext, args: &KnowledgeArgs) -> Result<ToolResponse, ToolError> {
    let content = args
        .content
        .as_deref()
        .ok_or_else(|| ToolError::invalid_args("'content' is required for save"))?;
    let context_ref = args
        .context_ref
        .as_deref()
        .ok_or_else(|| ToolError::invalid_args("context_ref is required"))?;
    verify_context_ref(context_ref, content)?;

    if let Some(tag) = &args.tag {
        // Snippet save: anchors come from the current file content.
        let path = args
            .path
            .as_deref()
            .ok_or_else(|| ToolError::invalid_args("snippet save requires 'path'"))?;
        let db_path = resolve_target(ctx, path)?;
        let start = args
            .start_line
            .ok_or_else(|| ToolError::invalid_args("snippet save requires 'start_line'"))?
            .max(1) as u32;
        let end = args.end_line.unwrap_or(start as i64).max(start as i64) as u32;

        let (anchor_before, anchor_after) = match ctx.store.read_file(&db_path) {
            Ok(current) => {
                let lines: Vec<&str> = current.lines().collect();
                let before = (start >= 2)
                    .then(|| lines.get(start as usize - 2).copied())
                    .flatten()
                    .unwrap_or("")
                    .to_string();
                let after = lines
                    .get(end as usize)
                    .copied()
                    .unwrap_or("")
                    .to_string();
                (before, after)
            }
            Err(_) => (String::new(), String::new()),
        };

        let now = now_ts();
        let row = SnippetRow {
            id: 0,
            tag: tag.clone(),
            path: db_path.clone(),
            root_id: crate::workspace::split_db_path(&db_path)
                .0
                .map(|r| r.0)
                .unwrap_or_default(),
            start_line: start,
            end_line: end,
            content: content.to_string(),
            content_hash: crate::extract::compute_hash(content),
            anchor_before,
            anchor_after,
            note: args.note.clone().unwrap_or_default(),
            commit_hash: String::new(),
            created_ts: now,
            updated_ts: now,
            meta_json: "{}".into(),
        };
        let id = ctx.store.save_snippet(row)?;
        let payload = json!({
            "action": "save",
            "kind": "snippet",
            "id": id,
            "tag": tag,
            "path": db_path,
        });
        let pack = [
            pack_header(
                TOOL,
                &[
                    ("action", "save".into()),
                    ("kind", "snippet".into()),
                    ("tag", enc_id(tag)),
                    ("id", id.to_string()),
                ],
                None,
                None,
                None,
            ),
        ]
        .join("\n");
        return Ok(ToolResponse::ok(payload, pack));
    }

    let topic = args
        .topic
        .as_deref()
        .ok_or_else(|| ToolError::invalid_args("context save requires 'topic' (or 'tag' for snippets)"))?;
    let row = ContextRow {
        topic: topic.to_string(),
        content: content.to_string(),
        tags: serde_json::to_string(&args.tags.clone().unwrap_or_default())
            .unwrap_or_else(|_| "[]".into()),
        related_files: serde_json::to_string(&args.related_files.clone().unwrap_or_default())
            .unwrap_or_else(|_| "[]".into()),
        source: args.source.clone().unwrap_or_default(),
        valid_from: None,
        valid_until: None,
        deprecated: false,
        updated_ts: now_ts(),
    };
    ctx.store.upsert_context(row)?;
    let payload = json!({ "action": "save", "kind": "context", "topic": topic });
    let pack = pack_header(
        TOOL,
        &[
            ("action", "save".into()),
            ("kind", "context".into()),
            ("topic", enc_id(topic)),
        ],
        None,
        None,
        None,
    );
    Ok(ToolResponse::ok(payload, pack))
}

fn run_recall(ctx: &ToolContext, args: &KnowledgeArgs) -> Result<ToolResponse, ToolError> {
    let mut contexts = Vec::new();
    if let Some(topic) = &args.topic {
        if let Some(row) = ctx.store.get_context(topic)? {
            contexts.push(row);
        }
    }
    if contexts.is_empty() {
        if let Some(query) = args.query.as_deref().or(args.topic.as_deref()) {
            contexts = ctx.store.find_contexts(query, 10)?;
        }
    }
    let snippets = ctx
        .store
        .find_snippets(args.tag.as_deref(), args.query.as_deref(), 10)?;

    if contexts.is_empty() && snippets.is_empty() {
        let payload = json!({
            "action": "recall",
            "contexts": [],
            "snippets": [],
            "meta": { "stabilization": { "reason_codes": ["NO_RESULTS"], "evidence_refs": [] } },
        });
        let pack = pack_header(TOOL, &[("action", "recall".into())], Some(0), Some(0), Some("exact"));
        return Ok(ToolResponse::ok(payload, pack));
    }

    let contexts_json: Vec<Value> = contexts.iter().map(context_json).collect();
    let snippets_json: Vec<Value> = snippets
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "tag": &s.tag,
                "path": &s.path,
                "start_line": s.start_line,
                "end_line": s.end_line,
                "content": &s.content,
                "note": &s.note,
            })
        })
        .collect();
    let returned = contexts_json.len() + snippets_json.len();
    let payload = json!({
        "action": "recall",
        "contexts": contexts_json,
        "snippets": snippets_json,
    });
    let mut lines = vec![pack_header(
        TOOL,
        &[("action", "recall".into())],
        Some(returned),
        None,
        None,
    )];
    for c in &contexts {
        lines.push(pack_line(
            "k",
            &[("topic", enc_id(&c.topic)), ("s", enc_text(&c.content))],
        ));
    }
    for s in &snippets {
        lines.push(pack_line(
            "sn",
            &[
                ("tag", enc_id(&s.tag)),
                ("path", enc_id(&s.path)),
                ("s", enc_text(&s.content)),
            ],
        ));
    }
    Ok(ToolResponse::ok(payload, lines.join("\n")))
}

fn run_list(ctx: &ToolContext) -> Result<ToolResponse, ToolError> {
    let contexts = ctx.store.list_contexts(50)?;
    let snippets = ctx.store.list_snippets(50)?;
    let payload = json!({
        "action": "list",
        "contexts": contexts.iter().map(context_json).collect::<Vec<_>>(),
        "snippets": snippets
            .iter()
            .map(|s| json!({ "id": s.id, "tag": &s.tag, "path": &s.path, "note": &s.note }))
            .collect::<Vec<_>>(),
    });
    let mut lines = vec![pack_header(
        TOOL,
        &[("action", "list".into())],
        Some(contexts.len() + snippets.len()),
        None,
        None,
    )];
    for c in &contexts {
        lines.push(pack_line("k", &[("topic", enc_id(&c.topic))]));
    }
    for s in &snippets {
        lines.push(pack_line(
            "sn",
            &[("tag", enc_id(&s.tag)), ("id", s.id.to_string())],
        ));
    }
    Ok(ToolResponse::ok(payload, lines.join("\n")))
}

fn run_delete(ctx: &ToolContext, args: &KnowledgeArgs) -> Result<ToolResponse, ToolError> {
    let mut deleted = 0usize;
    let mut kind = "none";
    if let Some(topic) = &args.topic {
        deleted = ctx.store.delete_context(topic)?;
        kind = "context";
    } else if args.id.is_some() || args.tag.is_some() {
        deleted = ctx.store.delete_snippet(args.id, args.tag.clone())?;
        kind = "snippet";
    } else {
        return Err(ToolError::invalid_args(
            "delete requires 'topic', 'tag', or 'id'",
        ));
    }
    let payload = json!({ "action": "delete", "kind": kind, "deleted": deleted });
    let pack = pack_header(
        TOOL,
        &[
            ("action", "delete".into()),
            ("kind", kind.into()),
            ("deleted", deleted.to_string()),
        ],
        None,
        None,
        None,
    );
    Ok(ToolResponse::ok(payload, pack))
}

/// Re-anchors an existing snippet onto a new path/range. The current
/// content at the new range becomes the stored content.
fn run_relink(ctx: &ToolContext, args: &KnowledgeArgs) -> Result<ToolResponse, ToolError> {
    let tag = args
        .tag
        .as_deref()
        .ok_or_else(|| ToolError::invalid_args("relink requires 'tag'"))?;
    let existing = ctx
        .store
        .find_snippets(Some(tag), None, 1)?
        .into_iter()
        .next()
        .ok_or_else(|| {
            ToolError::new(
                ToolCode::NoResults,
                format!("no snippet tagged '{tag}' to relink"),
            )
        })?;

    let path = args.path.as_deref().unwrap_or(existing.path.as_str());
    let db_path = resolve_target(ctx, path)?;
    let start = args.start_line.unwrap_or(existing.start_line as i64).max(1) as u32;
    let end = args.end_line.unwrap_or(existing.end_line as i64).max(start as i64) as u32;
    let current = ctx.store.read_file(&db_path)?;
    let lines: Vec<&str> = current.lines().collect();
    if start as usize > lines.len() {
        return Err(ToolError::invalid_args(format!(
            "start_line {start} is beyond end of file ({} lines)",
            lines.len()
        )));
    }
    let end = (end as usize).min(lines.len()) as u32;
    let content = lines[(start - 1) as usize..end as usize].join("\n");

    let mut row = existing;
    row.path = db_path.clone();
    row.start_line = start;
    row.end_line = end;
    row.content_hash = crate::extract::compute_hash(&content);
    row.content = content;
    row.updated_ts = now_ts();
    let id = ctx.store.save_snippet(row)?;

    let payload = json!({
        "action": "relink",
        "id": id,
        "tag": tag,
        "path": &db_path,
        "start_line": start,
        "end_line": end,
    });
    let pack = pack_header(
        TOOL,
        &[
            ("action", "relink".into()),
            ("tag", enc_id(tag)),
            ("path", enc_id(&db_path)),
            ("start", start.to_string()),
            ("end", end.to_string()),
        ],
        None,
        None,
        None,
    );
    Ok(ToolResponse::ok(payload, pack))
}

fn context_json(c: &ContextRow) -> Value {
    json!({
        "topic": &c.topic,
        "content": &c.content,
        "tags": serde_json::from_str::<Value>(&c.tags).unwrap_or_else(|_| json!([])),
        "related_files": serde_json::from_str::<Value>(&c.related_files).unwrap_or_else(|_| json!([])),
        "source": &c.source,
        "deprecated": c.deprecated,
        "updated_ts": c.updated_ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ref_roundtrip() {
        let content = "Deploys go through CI.";
        let token = make_context_ref(content);
        assert!(token.starts_with("cr1:"));
        assert!(verify_context_ref(&token, content).is_ok());
        assert!(verify_context_ref(&token, "tampered").is_err());
        assert!(verify_context_ref("cr1:zzz", content).is_err());
        assert!(verify_context_ref("garbage", content).is_err());
    }
}
