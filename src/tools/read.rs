//! Unified read dispatcher.
//!
//! `mode=file|symbol|snippet|diff_preview|ast_edit`, with cross-mode
//! parameters rejected at the boundary. Every successful read records
//! session metrics, joins an aggregation bundle, and attaches evidence
//! refs; policy denials come back as structured errors with `next_calls`
//! so agents can recover without guessing.

use super::{error_response, opt_int, parse_args, resolve_target, ToolContext};
use crate::error::{ToolCode, ToolError};
use crate::pack::{enc_id, enc_text, pack_header, pack_line, ToolResponse};
use crate::stabilize::{BudgetState, EvidenceRef, Relevance};
use crate::store::SnippetRow;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

const TOOL: &str = "read";
const MODES: [&str; 5] = ["file", "symbol", "snippet", "diff_preview", "ast_edit"];
const DIFF_BASELINES: [&str; 3] = ["HEAD", "WORKTREE", "INDEX"];

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReadArgs {
    /// One of: file, symbol, snippet, diff_preview, ast_edit.
    pub mode: String,
    /// Primary target (db-path or workspace-relative path; symbol name in
    /// symbol mode; snippet tag in snippet mode).
    #[serde(default)]
    pub target: Option<String>,

    // file mode
    /// Maximum lines to return (file mode; auto-chunked to the budget cap).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub limit: Option<i64>,
    /// Starting line offset, 0-based (file mode).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub offset: Option<i64>,

    // symbol mode
    /// File db-path to disambiguate the symbol (symbol mode).
    #[serde(default)]
    pub path: Option<String>,
    /// Symbol name (symbol mode).
    #[serde(default)]
    pub name: Option<String>,
    /// Stable symbol id (symbol mode).
    #[serde(default)]
    pub symbol_id: Option<String>,
    /// Alias of symbol_id (symbol mode).
    #[serde(default)]
    pub sid: Option<String>,
    /// Include surrounding file context (symbol mode).
    #[serde(default)]
    pub include_context: Option<bool>,

    // snippet mode
    /// Saved snippet tag (snippet mode).
    #[serde(default)]
    pub tag: Option<String>,
    /// Free-text snippet query (snippet mode).
    #[serde(default)]
    pub query: Option<String>,
    /// Ad-hoc range start, 1-based (snippet mode).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub start_line: Option<i64>,
    /// Ad-hoc range end, 1-based inclusive (snippet mode).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub end_line: Option<i64>,
    /// Context lines around an ad-hoc range (snippet mode).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub context_lines: Option<i64>,

    // diff_preview mode
    /// Diff baseline: HEAD, WORKTREE, or INDEX (diff_preview mode).
    #[serde(default)]
    pub against: Option<String>,

    // ast_edit mode
    /// First 12 hex chars of SHA-256 of the current on-disk content.
    #[serde(default)]
    pub expected_version_hash: Option<String>,
    /// Exact text to replace (ast_edit mode).
    #[serde(default)]
    pub old_text: Option<String>,
    /// Replacement text (ast_edit mode).
    #[serde(default)]
    pub new_text: Option<String>,
    /// Symbol whose block to replace (ast_edit mode).
    #[serde(default)]
    pub symbol: Option<String>,
    /// Qualname disambiguation when several symbols share a name.
    #[serde(default)]
    pub symbol_qualname: Option<String>,
    /// Expected symbol kind (ast_edit mode).
    #[serde(default)]
    pub symbol_kind: Option<String>,
    /// Post-write focus-sync wait in milliseconds (ast_edit mode).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub sync_timeout_ms: Option<i64>,

    /// Candidate ref issued by the most recent search in this session.
    #[serde(default)]
    pub candidate_id: Option<String>,
    /// Session identity for stabilization metrics.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

fn invalid_mode_param(param: &str, mode: &str) -> ToolError {
    ToolError::invalid_args(format!(
        "{param} is only valid for mode='{mode}'. Remove it or switch mode."
    ))
}

fn validate_mode_params(args: &ReadArgs) -> Result<(), ToolError> {
    let mode = args.mode.as_str();
    if !MODES.contains(&mode) {
        return Err(ToolError::invalid_args(format!(
            "'mode' must be one of: {}",
            MODES.join(", ")
        )));
    }
    if args.against.is_some() && mode != "diff_preview" {
        return Err(invalid_mode_param("against", "diff_preview"));
    }
    if let Some(against) = args.against.as_deref() {
        if !DIFF_BASELINES.contains(&against) {
            return Err(ToolError::invalid_args(
                "'against' must be one of: HEAD, WORKTREE, INDEX",
            ));
        }
    }
    if mode != "snippet" {
        for (present, name) in [
            (args.start_line.is_some(), "start_line"),
            (args.end_line.is_some(), "end_line"),
            (args.context_lines.is_some(), "context_lines"),
        ] {
            if present {
                return Err(invalid_mode_param(name, "snippet"));
            }
        }
    }
    if mode != "symbol" {
        for (present, name) in [
            (args.path.is_some(), "path"),
            (args.include_context.is_some(), "include_context"),
            (args.symbol_id.is_some(), "symbol_id"),
            (args.sid.is_some(), "sid"),
            (args.name.is_some(), "name"),
        ] {
            if present {
                return Err(invalid_mode_param(name, "symbol"));
            }
        }
    }
    if mode != "ast_edit" {
        for (present, name) in [
            (args.expected_version_hash.is_some(), "expected_version_hash"),
            (args.old_text.is_some(), "old_text"),
            (args.new_text.is_some(), "new_text"),
            (args.symbol.is_some(), "symbol"),
            (args.symbol_qualname.is_some(), "symbol_qualname"),
            (args.symbol_kind.is_some(), "symbol_kind"),
            (args.sync_timeout_ms.is_some(), "sync_timeout_ms"),
        ] {
            if present {
                return Err(invalid_mode_param(name, "ast_edit"));
            }
        }
    }
    if mode != "file" {
        for (present, name) in [(args.limit.is_some(), "limit"), (args.offset.is_some(), "offset")]
        {
            if present {
                return Err(invalid_mode_param(name, "file"));
            }
        }
    }
    Ok(())
}

/// One mode's result, before stabilization metadata is layered on.
pub(crate) struct ModeOutput {
    pub payload: Value,
    pub pack_lines: Vec<String>,
    pub evidence: Vec<EvidenceRef>,
    pub read_lines: u64,
    pub read_chars: u64,
    pub read_span: u64,
    pub content_for_bundle: String,
    pub reason_codes: Vec<&'static str>,
    pub next_calls: Vec<Value>,
}

pub fn execute_read(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let args: ReadArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, TOOL, e),
    };
    if let Err(e) = validate_mode_params(&args) {
        return error_response(ctx, TOOL, e);
    }
    if let Err(e) = ctx.stabilization.require_session_id(raw_args) {
        return error_response(ctx, TOOL, e);
    }

    if args.mode == "ast_edit" {
        return super::edit::execute_ast_edit(ctx, &args, raw_args);
    }

    let session_key = ctx.stabilization.session_key(raw_args, &ctx.roots);
    let mut warnings: Vec<String> = Vec::new();

    // Cumulative budget first: a session over budget is denied outright.
    let mut budget_state = ctx.stabilization.evaluate_budget(&session_key);
    if budget_state == BudgetState::HardLimit {
        let err = ToolError::new(
            ToolCode::BudgetExceeded,
            "Read budget exceeded. Use search to narrow scope before reading more.",
        )
        .with_next_call(json!({
            "tool": "search",
            "arguments": {"query": args.target.clone().unwrap_or_default(), "search_type": "auto"}
        }));
        return error_response(ctx, TOOL, err);
    }

    let target = args.target.clone().unwrap_or_default();

    // Read-first gate applies to file and symbol reads.
    if matches!(args.mode.as_str(), "file" | "symbol") {
        match ctx
            .stabilization
            .check_read_gate(&session_key, &target, args.candidate_id.as_deref())
        {
            Ok(None) => {}
            Ok(Some(advisory)) => warnings.push(advisory),
            Err(e) => return error_response(ctx, TOOL, e),
        }
    }

    // Relevance guard against the last search's top paths.
    let mut alternatives: Vec<String> = Vec::new();
    let mut low_relevance = false;
    if let Relevance::OutsideTopK { alternatives: alts } =
        ctx.stabilization.assess_relevance(&session_key, &target)
    {
        low_relevance = true;
        warnings.push("This target seems unrelated to recent search results.".into());
        ctx.stabilization
            .warn("LOW_RELEVANCE_OUTSIDE_TOPK", &target);
        alternatives = alts;
    }

    let output = match args.mode.as_str() {
        "file" => read_file_mode(ctx, &args, &mut warnings, &mut budget_state),
        "symbol" => read_symbol_mode(ctx, &args),
        "snippet" => read_snippet_mode(ctx, &args),
        _ => read_diff_preview_mode(ctx, &args),
    };
    let mut output = match output {
        Ok(out) => out,
        Err(e) => return error_response(ctx, TOOL, e),
    };

    // Session bookkeeping happens only for successful reads.
    let snapshot = ctx.stabilization.record_read(
        &session_key,
        output.read_lines,
        output.read_chars,
        output.read_span,
    );
    let (bundle_id, bundle_size) = ctx.stabilization.bundle_read(
        &session_key,
        &args.mode,
        &target,
        &output.content_for_bundle,
    );

    let suggested = if low_relevance || budget_state != BudgetState::Ok {
        "search"
    } else {
        "none"
    };
    if low_relevance && output.next_calls.is_empty() {
        output.next_calls.push(json!({
            "tool": "search",
            "arguments": {"query": target, "search_type": "auto"}
        }));
    }

    let mut stabilization = json!({
        "budget_state": budget_state.as_str(),
        "warnings": warnings,
        "suggested_next_action": suggested,
        "metrics_snapshot": serde_json::to_value(&snapshot).unwrap_or_default(),
        "evidence_refs": serde_json::to_value(&output.evidence).unwrap_or_default(),
        "reason_codes": output.reason_codes,
        "next_calls": output.next_calls,
        "context_bundle_id": bundle_id,
        "bundle_size": bundle_size,
    });
    if low_relevance {
        stabilization["relevance_code"] = json!("LOW_RELEVANCE_OUTSIDE_TOPK");
        stabilization["alternatives"] = json!(alternatives);
    }

    let mut payload = output.payload;
    payload["meta"] = json!({ "stabilization": stabilization });

    let mut pack_lines = output.pack_lines;
    if budget_state != BudgetState::Ok {
        pack_lines.push(pack_line(
            "m",
            &[("budget_state", budget_state.as_str().to_string())],
        ));
    }
    for warning in payload["meta"]["stabilization"]["warnings"]
        .as_array()
        .into_iter()
        .flatten()
    {
        if let Some(w) = warning.as_str() {
            pack_lines.push(pack_line("w", &[("msg", enc_text(w))]));
        }
    }

    ToolResponse::ok(payload, pack_lines.join("\n"))
}

// ── file mode ───────────────────────────────────────────────────────────

fn read_file_mode(
    ctx: &ToolContext,
    args: &ReadArgs,
    warnings: &mut Vec<String>,
    budget_state: &mut BudgetState,
) -> Result<ModeOutput, ToolError> {
    let target = args
        .target
        .as_deref()
        .ok_or_else(|| ToolError::invalid_args("'target' is required for mode='file'"))?;
    let db_path = resolve_target(ctx, target)?;
    let content = read_indexed_file(ctx, &db_path)?;
    let all_lines: Vec<&str> = content.lines().collect();
    let total_lines = all_lines.len();

    let offset = args.offset.unwrap_or(0).max(0) as usize;
    let requested = args
        .limit
        .map(|l| l.max(1) as usize)
        .unwrap_or(ctx.settings.max_range_lines);
    let (effective_limit, soft_warning) = ctx.stabilization.apply_soft_limit(requested);
    if let Some(w) = soft_warning {
        warnings.push(w);
        *budget_state = BudgetState::SoftLimit;
    }

    let start = offset.min(total_lines);
    let end = (start + effective_limit).min(total_lines);
    let text = all_lines[start..end].join("\n");
    let start_line = (start + 1) as u32;
    let end_line = end as u32;
    let content_hash = ctx
        .store
        .get_file_meta(&db_path)
        .ok()
        .flatten()
        .map(|m| m.content_hash)
        .unwrap_or_else(|| crate::extract::compute_hash(&content));

    let lines_returned = end.saturating_sub(start) as u64;
    let payload = json!({
        "path": &db_path,
        "content": [{ "type": "text", "text": &text }],
        "start_line": start_line,
        "end_line": end_line,
        "total_lines": total_lines,
        "metadata": { "limit": effective_limit, "offset": offset },
    });
    let evidence = vec![EvidenceRef {
        kind: "file",
        path: db_path.clone(),
        start_line,
        end_line,
        content_hash,
        candidate_id: args.candidate_id.clone(),
    }];
    let next_calls = vec![json!({
        "tool": "list_symbols",
        "arguments": { "target": &db_path }
    })];

    let pack_lines = vec![
        pack_header(
            TOOL,
            &[
                ("mode", "file".into()),
                ("path", enc_id(&db_path)),
                ("start", start_line.to_string()),
                ("end", end_line.to_string()),
                ("total_lines", total_lines.to_string()),
                ("limit", effective_limit.to_string()),
            ],
            None,
            None,
            None,
        ),
        format!("t:{}", enc_text(&text)),
    ];

    Ok(ModeOutput {
        payload,
        pack_lines,
        evidence,
        read_lines: lines_returned,
        read_chars: text.len() as u64,
        read_span: lines_returned,
        content_for_bundle: text,
        reason_codes: Vec::new(),
        next_calls,
    })
}

// ── symbol mode ─────────────────────────────────────────────────────────

fn read_symbol_mode(ctx: &ToolContext, args: &ReadArgs) -> Result<ModeOutput, ToolError> {
    let id = args
        .symbol_id
        .as_deref()
        .or(args.sid.as_deref())
        .map(str::to_string);
    let name = args
        .name
        .clone()
        .or_else(|| args.target.clone())
        .unwrap_or_default();
    if id.is_none() && name.is_empty() {
        return Err(ToolError::invalid_args(
            "mode='symbol' requires 'name', 'symbol_id', or 'target'",
        ));
    }

    let row = if let Some(id) = id {
        ctx.store
            .get_symbol_by_id(&crate::types::SymbolId(id.clone()))?
    } else if let Some(path) = &args.path {
        let db_path = resolve_target(ctx, path)?;
        ctx.store.get_symbol_block(&db_path, &name)?
    } else {
        ctx.store
            .search_symbols(&name, &[], "exact", 1, None)?
            .into_iter()
            .next()
    };
    let Some(row) = row else {
        return Err(ToolError::new(
            ToolCode::SymbolResolutionFailed,
            format!("no indexed symbol matches '{name}'"),
        )
        .with_hint("run search with search_type='symbol' to list candidates")
        .with_next_call(json!({
            "tool": "search",
            "arguments": {"query": name, "search_type": "symbol"}
        })));
    };

    let span = row.end_line.saturating_sub(row.line) as u64 + 1;
    let content_hash = crate::extract::compute_hash(&row.content);
    let payload = json!({
        "name": &row.name,
        "qualname": &row.qualname,
        "kind": row.kind.as_str(),
        "path": &row.path,
        "start_line": row.line,
        "end_line": row.end_line,
        "content": &row.content,
        "doc_comment": &row.doc_comment,
        "symbol_id": row.symbol_id.as_str(),
    });
    let evidence = vec![EvidenceRef {
        kind: "symbol",
        path: row.path.clone(),
        start_line: row.line,
        end_line: row.end_line,
        content_hash,
        candidate_id: args.candidate_id.clone(),
    }];
    let next_calls = vec![json!({
        "tool": "get_callers",
        "arguments": { "symbol": &row.name }
    })];
    let pack_lines = vec![
        pack_header(
            TOOL,
            &[
                ("mode", "symbol".into()),
                ("name", enc_id(&row.name)),
                ("kind", row.kind.as_str().into()),
                ("path", enc_id(&row.path)),
                ("start", row.line.to_string()),
                ("end", row.end_line.to_string()),
            ],
            None,
            None,
            None,
        ),
        format!("t:{}", enc_text(&row.content)),
    ];

    Ok(ModeOutput {
        payload,
        pack_lines,
        evidence,
        read_lines: row.content.lines().count() as u64,
        read_chars: row.content.len() as u64,
        read_span: span,
        content_for_bundle: row.content,
        reason_codes: Vec::new(),
        next_calls,
    })
}

// ── snippet mode ────────────────────────────────────────────────────────

/// Outcome of re-mapping one stored snippet onto current content.
struct Remapped {
    start_line: u32,
    end_line: u32,
    content: String,
    remapped: bool,
    stale: bool,
}

fn remap_snippet(row: &SnippetRow, current: &str) -> Remapped {
    let lines: Vec<&str> = current.lines().collect();
    let start = row.start_line.max(1) as usize;
    let end = row.end_line.max(row.start_line) as usize;

    // (a) content equality at the stored range
    if start <= lines.len() && end <= lines.len() && start <= end {
        let window = lines[start - 1..end].join("\n");
        if window == row.content {
            return Remapped {
                start_line: row.start_line,
                end_line: row.end_line,
                content: window,
                remapped: false,
                stale: false,
            };
        }
    }

    // (b) exact content found elsewhere
    let snippet_lines: Vec<&str> = row.content.lines().collect();
    if !snippet_lines.is_empty() && lines.len() >= snippet_lines.len() {
        for idx in 0..=(lines.len() - snippet_lines.len()) {
            if lines[idx..idx + snippet_lines.len()] == snippet_lines[..] {
                return Remapped {
                    start_line: (idx + 1) as u32,
                    end_line: (idx + snippet_lines.len()) as u32,
                    content: row.content.clone(),
                    remapped: true,
                    stale: false,
                };
            }
        }
    }

    // (c) before/after anchors
    if !row.anchor_before.is_empty() || !row.anchor_after.is_empty() {
        let before_idx = (!row.anchor_before.is_empty())
            .then(|| lines.iter().position(|l| *l == row.anchor_before))
            .flatten();
        let after_idx = (!row.anchor_after.is_empty())
            .then(|| lines.iter().position(|l| *l == row.anchor_after))
            .flatten();
        if let (Some(b), Some(a)) = (before_idx, after_idx) {
            if a > b + 1 {
                let content = lines[b + 1..a].join("\n");
                return Remapped {
                    start_line: (b + 2) as u32,
                    end_line: a as u32,
                    content,
                    remapped: true,
                    stale: false,
                };
            }
        }
    }

    // Unmappable: return the stored version, marked stale. No diff is
    // emitted alongside remapped=false.
    Remapped {
        start_line: row.start_line,
        end_line: row.end_line,
        content: row.content.clone(),
        remapped: false,
        stale: true,
    }
}

fn read_snippet_mode(ctx: &ToolContext, args: &ReadArgs) -> Result<ModeOutput, ToolError> {
    let tag = args.tag.clone().or_else(|| {
        args.target
            .clone()
            .filter(|t| !t.contains('/') && !t.contains('.'))
    });

    // Ad-hoc range read when an explicit range is given.
    if args.start_line.is_some() && args.tag.is_none() && args.query.is_none() {
        return read_adhoc_range(ctx, args);
    }

    let rows = ctx
        .store
        .find_snippets(tag.as_deref(), args.query.as_deref(), 20)?;
    if rows.is_empty() {
        // Empty recall is the one success shape allowed an empty
        // evidence list.
        let payload = json!({ "results": [], "count": 0 });
        let pack_lines = vec![pack_header(
            TOOL,
            &[("mode", "snippet".into())],
            Some(0),
            Some(0),
            Some("exact"),
        )];
        return Ok(ModeOutput {
            payload,
            pack_lines,
            evidence: Vec::new(),
            read_lines: 0,
            read_chars: 0,
            read_span: 0,
            content_for_bundle: String::new(),
            reason_codes: vec!["NO_RESULTS"],
            next_calls: vec![json!({
                "tool": "knowledge",
                "arguments": {"action": "list"}
            })],
        });
    }

    let mut results = Vec::new();
    let mut evidence = Vec::new();
    let mut total_lines = 0u64;
    let mut total_chars = 0u64;
    let mut total_span = 0u64;
    let mut bundle_text = String::new();
    let mut pack_lines = vec![pack_header(
        TOOL,
        &[("mode", "snippet".into())],
        Some(rows.len()),
        Some(rows.len()),
        Some("exact"),
    )];

    for row in &rows {
        let remapped = match ctx.store.read_file(&row.path) {
            Ok(current) => remap_snippet(row, &current),
            Err(_) => Remapped {
                start_line: row.start_line,
                end_line: row.end_line,
                content: row.content.clone(),
                remapped: false,
                stale: true,
            },
        };
        total_lines += remapped.content.lines().count() as u64;
        total_chars += remapped.content.len() as u64;
        total_span += u64::from(remapped.end_line.saturating_sub(remapped.start_line)) + 1;
        bundle_text.push_str(&remapped.content);
        results.push(json!({
            "id": row.id,
            "tag": &row.tag,
            "path": &row.path,
            "start_line": remapped.start_line,
            "end_line": remapped.end_line,
            "content": &remapped.content,
            "note": &row.note,
            "remapped": remapped.remapped,
            "stale": remapped.stale,
        }));
        evidence.push(EvidenceRef {
            kind: "snippet",
            path: row.path.clone(),
            start_line: remapped.start_line,
            end_line: remapped.end_line,
            content_hash: crate::extract::compute_hash(&remapped.content),
            candidate_id: None,
        });
        pack_lines.push(pack_line(
            "r",
            &[
                ("tag", enc_id(&row.tag)),
                ("path", enc_id(&row.path)),
                ("start", remapped.start_line.to_string()),
                ("end", remapped.end_line.to_string()),
                ("remapped", remapped.remapped.to_string()),
                ("s", enc_text(&remapped.content)),
            ],
        ));
    }

    Ok(ModeOutput {
        payload: json!({ "results": results, "count": rows.len() }),
        pack_lines,
        evidence,
        read_lines: total_lines,
        read_chars: total_chars,
        read_span: total_span,
        content_for_bundle: bundle_text,
        reason_codes: Vec::new(),
        next_calls: Vec::new(),
    })
}

fn read_adhoc_range(ctx: &ToolContext, args: &ReadArgs) -> Result<ModeOutput, ToolError> {
    let target = args.target.as_deref().ok_or_else(|| {
        ToolError::invalid_args("ad-hoc snippet ranges require 'target'")
    })?;
    let db_path = resolve_target(ctx, target)?;
    let content = read_indexed_file(ctx, &db_path)?;
    let lines: Vec<&str> = content.lines().collect();

    let start = args.start_line.unwrap_or(1).max(1) as usize;
    let end = args.end_line.unwrap_or(start as i64).max(start as i64) as usize;
    let context = args.context_lines.unwrap_or(0).max(0) as usize;
    let from = start.saturating_sub(1).saturating_sub(context);
    let to = (end + context).min(lines.len());
    if from >= lines.len() {
        return Err(ToolError::invalid_args(format!(
            "start_line {start} is beyond end of file ({} lines)",
            lines.len()
        )));
    }
    let text = lines[from..to].join("\n");
    let start_line = (from + 1) as u32;
    let end_line = to as u32;

    let payload = json!({
        "results": [{
            "path": &db_path,
            "start_line": start_line,
            "end_line": end_line,
            "content": &text,
            "remapped": false,
            "stale": false,
        }],
        "count": 1,
    });
    let evidence = vec![EvidenceRef {
        kind: "snippet",
        path: db_path.clone(),
        start_line,
        end_line,
        content_hash: crate::extract::compute_hash(&text),
        candidate_id: args.candidate_id.clone(),
    }];
    let pack_lines = vec![
        pack_header(
            TOOL,
            &[
                ("mode", "snippet".into()),
                ("path", enc_id(&db_path)),
                ("start", start_line.to_string()),
                ("end", end_line.to_string()),
            ],
            Some(1),
            None,
            None,
        ),
        format!("t:{}", enc_text(&text)),
    ];
    let span = u64::from(end_line.saturating_sub(start_line)) + 1;
    Ok(ModeOutput {
        payload,
        pack_lines,
        evidence,
        read_lines: text.lines().count() as u64,
        read_chars: text.len() as u64,
        read_span: span,
        content_for_bundle: text,
        reason_codes: Vec::new(),
        next_calls: Vec::new(),
    })
}

// ── diff_preview mode ───────────────────────────────────────────────────

fn read_diff_preview_mode(ctx: &ToolContext, args: &ReadArgs) -> Result<ModeOutput, ToolError> {
    let target = args
        .target
        .as_deref()
        .ok_or_else(|| ToolError::invalid_args("'target' is required for mode='diff_preview'"))?;
    let db_path = resolve_target(ctx, target)?;
    let against = args.against.as_deref().unwrap_or("INDEX");

    let on_disk = crate::workspace::db_path_to_fs(&db_path, &ctx.roots)
        .and_then(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_default();
    let baseline = match against {
        "INDEX" => read_indexed_file(ctx, &db_path)?,
        "WORKTREE" => on_disk.clone(),
        _ => git_show_head(ctx, &db_path).ok_or_else(|| {
            ToolError::new(
                ToolCode::IoError,
                "HEAD baseline unavailable (not a git checkout?)",
            )
            .with_hint("use against='INDEX' to diff against the indexed content")
        })?,
    };

    let (diff, additions, deletions) = unified_diff(&baseline, &on_disk, 3);
    let changed = additions + deletions > 0;
    let payload = json!({
        "path": &db_path,
        "against": against,
        "diff": &diff,
        "additions": additions,
        "deletions": deletions,
        "changed": changed,
    });
    let diff_lines = diff.lines().count() as u64;
    let evidence = vec![EvidenceRef {
        kind: "diff",
        path: db_path.clone(),
        start_line: 1,
        end_line: diff_lines.max(1) as u32,
        content_hash: crate::extract::compute_hash(&diff),
        candidate_id: None,
    }];
    let pack_lines = vec![
        pack_header(
            TOOL,
            &[
                ("mode", "diff_preview".into()),
                ("path", enc_id(&db_path)),
                ("against", against.into()),
                ("adds", additions.to_string()),
                ("dels", deletions.to_string()),
            ],
            None,
            None,
            None,
        ),
        format!("t:{}", enc_text(&diff)),
    ];
    Ok(ModeOutput {
        payload,
        pack_lines,
        evidence,
        read_lines: diff_lines,
        read_chars: diff.len() as u64,
        read_span: diff_lines,
        content_for_bundle: diff,
        reason_codes: Vec::new(),
        next_calls: Vec::new(),
    })
}

fn git_show_head(ctx: &ToolContext, db_path: &str) -> Option<String> {
    let (_, rel) = crate::workspace::split_db_path(db_path);
    let root = ctx.roots.first()?;
    let output = std::process::Command::new("git")
        .arg("-C")
        .arg(root)
        .arg("show")
        .arg(format!("HEAD:{rel}"))
        .output()
        .ok()?;
    output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
}

// ── shared helpers ──────────────────────────────────────────────────────

fn read_indexed_file(ctx: &ToolContext, db_path: &str) -> Result<String, ToolError> {
    ctx.store.read_file(db_path).map_err(|e| match e {
        crate::error::DbError::FileNotFound { db_path } => ToolError::new(
            ToolCode::NotIndexed,
            format!("'{db_path}' is not in the index"),
        )
        .with_hint("index the file or run scan_once")
        .with_next_call(json!({
            "tool": "index_file",
            "arguments": { "path": db_path }
        })),
        other => other.into(),
    })
}

/// Minimal unified diff over two texts. LCS-based for reasonable sizes,
/// whole-file replacement beyond that.
pub(crate) fn unified_diff(a: &str, b: &str, context: usize) -> (String, usize, usize) {
    let a_lines: Vec<&str> = a.lines().collect();
    let b_lines: Vec<&str> = b.lines().collect();
    if a_lines == b_lines {
        return (String::new(), 0, 0);
    }

    const MAX_LCS: usize = 1500;
    if a_lines.len() > MAX_LCS || b_lines.len() > MAX_LCS {
        let diff = format!(
            "--- baseline ({} lines)\n+++ current ({} lines)\n[files differ; too large for line diff]",
            a_lines.len(),
            b_lines.len()
        );
        return (diff, b_lines.len(), a_lines.len());
    }

    // LCS table
    let n = a_lines.len();
    let m = b_lines.len();
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if a_lines[i] == b_lines[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    // Walk the table emitting ops.
    #[derive(PartialEq, Clone, Copy)]
    enum Op {
        Keep,
        Del,
        Add,
    }
    let mut ops: Vec<(Op, usize)> = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a_lines[i] == b_lines[j] {
            ops.push((Op::Keep, i));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push((Op::Del, i));
            i += 1;
        } else {
            ops.push((Op::Add, j));
            j += 1;
        }
    }
    while i < n {
        ops.push((Op::Del, i));
        i += 1;
    }
    while j < m {
        ops.push((Op::Add, j));
        j += 1;
    }

    let mut additions = 0;
    let mut deletions = 0;
    let mut out = Vec::new();
    let changed_idx: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, (op, _))| *op != Op::Keep)
        .map(|(k, _)| k)
        .collect();
    for (k, (op, idx)) in ops.iter().enumerate() {
        let near_change = changed_idx
            .iter()
            .any(|c| k.abs_diff(*c) <= context);
        match op {
            Op::Keep if near_change => out.push(format!(" {}", a_lines[*idx])),
            Op::Keep => {}
            Op::Del => {
                deletions += 1;
                out.push(format!("-{}", a_lines[*idx]));
            }
            Op::Add => {
                additions += 1;
                out.push(format!("+{}", b_lines[*idx]));
            }
        }
    }
    (out.join("\n"), additions, deletions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unified_diff_basic() {
        let (diff, adds, dels) = unified_diff("a\nb\nc\n", "a\nB\nc\n", 1);
        assert_eq!(adds, 1);
        assert_eq!(dels, 1);
        assert!(diff.contains("-b"));
        assert!(diff.contains("+B"));
        assert!(diff.contains(" a"));
    }

    #[test]
    fn test_unified_diff_identical() {
        let (diff, adds, dels) = unified_diff("same\n", "same\n", 3);
        assert!(diff.is_empty());
        assert_eq!(adds + dels, 0);
    }

    #[test]
    fn test_remap_exact_position() {
        let row = SnippetRow {
            start_line: 2,
            end_line: 3,
            content: "b\nc".into(),
            ..Default::default()
        };
        let out = remap_snippet(&row, "a\nb\nc\nd\n");
        assert!(!out.remapped);
        assert!(!out.stale);
        assert_eq!(out.start_line, 2);
    }

    #[test]
    fn test_remap_shifted_content() {
        let row = SnippetRow {
            start_line: 2,
            end_line: 3,
            content: "b\nc".into(),
            ..Default::default()
        };
        // Two lines inserted above.
        let out = remap_snippet(&row, "x\ny\na\nb\nc\nd\n");
        assert!(out.remapped);
        assert_eq!(out.start_line, 4);
        assert_eq!(out.end_line, 5);
    }

    #[test]
    fn test_remap_by_anchors() {
        let row = SnippetRow {
            start_line: 2,
            end_line: 2,
            content: "old body".into(),
            anchor_before: "start".into(),
            anchor_after: "finish".into(),
            ..Default::default()
        };
        let out = remap_snippet(&row, "start\nnew body line\nfinish\n");
        assert!(out.remapped);
        assert_eq!(out.content, "new body line");
        assert_eq!(out.start_line, 2);
        assert_eq!(out.end_line, 2);
    }

    #[test]
    fn test_remap_stale_keeps_stored_without_diff() {
        let row = SnippetRow {
            start_line: 1,
            end_line: 1,
            content: "vanished".into(),
            ..Default::default()
        };
        let out = remap_snippet(&row, "completely different\n");
        assert!(!out.remapped);
        assert!(out.stale);
        assert_eq!(out.content, "vanished");
    }

    #[test]
    fn test_mode_param_rejection() {
        let args: ReadArgs = serde_json::from_value(json!({
            "mode": "file",
            "target": "a.py",
            "against": "HEAD"
        }))
        .unwrap();
        let err = validate_mode_params(&args).unwrap_err();
        assert_eq!(err.code, ToolCode::InvalidArgs);
        assert!(err.message.contains("diff_preview"));

        let args: ReadArgs = serde_json::from_value(json!({
            "mode": "file",
            "target": "a.py",
            "start_line": 3
        }))
        .unwrap();
        assert!(validate_mode_params(&args).is_err());

        let args: ReadArgs = serde_json::from_value(json!({
            "mode": "snippet",
            "tag": "x",
            "name": "sym"
        }))
        .unwrap();
        assert!(validate_mode_params(&args).is_err());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let args: ReadArgs = serde_json::from_value(json!({ "mode": "teleport" })).unwrap();
        let err = validate_mode_params(&args).unwrap_err();
        assert!(err.message.contains("mode"));
    }
}
