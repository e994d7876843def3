//! Unified search dispatcher.
//!
//! One entrypoint fans out to code (FTS), symbol, api, and repo queries.
//! `search_type=auto` infers intent from the query shape: SQL keywords
//! force `code`, URL-like queries go to `api`, identifier-like queries go
//! to `symbol`, everything else is `code`. Auto-routed symbol/api queries
//! that come back empty fall back to code search.

use super::{error_response, opt_int, parse_args, ToolContext};
use crate::engine::{SearchOptions, TotalMode};
use crate::error::{ToolCode, ToolError};
use crate::pack::{enc_id, enc_text, pack_header, pack_line, pack_truncated, ToolResponse};
use crate::types::SymbolKind;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

const TOOL: &str = "search";
const SEARCH_TYPES: [&str; 5] = ["code", "symbol", "api", "repo", "auto"];

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchArgs {
    /// Search query text.
    pub query: String,
    /// One of: code, symbol, api, repo, auto (default: code).
    #[serde(default)]
    pub search_type: Option<String>,
    /// Restrict to one repo label.
    #[serde(default)]
    pub repo: Option<String>,
    /// Maximum results, 1-100 (default: 20).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub limit: Option<i64>,
    /// Pagination offset.
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub offset: Option<i64>,
    /// Glob filter on result paths.
    #[serde(default)]
    pub path_pattern: Option<String>,
    /// Restrict to these file extensions.
    #[serde(default)]
    pub file_types: Option<Vec<String>>,
    /// Globs excluded from results.
    #[serde(default)]
    pub exclude_patterns: Option<Vec<String>>,
    /// Treat the query as a regex (code mode).
    #[serde(default)]
    pub use_regex: Option<bool>,
    /// Case-sensitive matching (regex mode).
    #[serde(default)]
    pub case_sensitive: Option<bool>,
    /// Boost recently modified files.
    #[serde(default)]
    pub recency_boost: Option<bool>,
    /// Total counting: exact or approx.
    #[serde(default)]
    pub total_mode: Option<String>,
    /// Snippet window height, 1-20 (default: 3).
    #[serde(default, deserialize_with = "opt_int")]
    #[schemars(with = "Option<i64>")]
    pub snippet_lines: Option<i64>,

    // symbol-mode parameters
    /// Symbol kinds filter (symbol search only).
    #[serde(default)]
    pub kinds: Option<Vec<String>>,
    /// Name matching: exact, prefix, contains (symbol search only).
    #[serde(default)]
    pub match_mode: Option<String>,
    /// Match qualnames too (symbol search only).
    #[serde(default)]
    pub include_qualname: Option<bool>,

    // api-mode parameters
    /// HTTP method filter (api search only).
    #[serde(default)]
    pub method: Option<String>,
    /// Framework hint (api search only).
    #[serde(default)]
    pub framework_hint: Option<String>,

    /// Session identity for stabilization metrics.
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
}

/// Decides the effective search type for `auto` queries.
#[must_use]
pub fn infer_search_type(query: &str) -> &'static str {
    let trimmed = query.trim();
    let lower = trimmed.to_lowercase();

    // SQL keywords force code search, even when the query also contains
    // URL-ish or identifier-ish tokens.
    const SQL_KEYWORDS: [&str; 8] = [
        "select ", "insert ", "update ", "delete from", "create table", "alter table", "join ",
        "group by",
    ];
    if SQL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        return "code";
    }

    // URL-like wins over identifier-like for mixed queries.
    let url_like = Regex::new(r"(?i)^(?:(?:GET|POST|PUT|DELETE|PATCH)\s+)?/[\w\-/{}:.]*$")
        .expect("static regex");
    if url_like.is_match(trimmed) || lower.starts_with("http://") || lower.starts_with("https://") {
        return "api";
    }

    let identifier_like = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:(?:::|\.)[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("static regex");
    if identifier_like.is_match(trimmed) && !trimmed.contains(' ') {
        return "symbol";
    }
    "code"
}

fn validate(args: &SearchArgs, search_type: &str) -> Result<(), ToolError> {
    if args.query.trim().is_empty() {
        return Err(ToolError::invalid_args("query must not be empty"));
    }
    if !SEARCH_TYPES.contains(&search_type) {
        return Err(ToolError::invalid_args(format!(
            "Invalid search_type: '{search_type}'. Must be one of {SEARCH_TYPES:?}"
        )));
    }
    if let Some(limit) = args.limit {
        if !(1..=100).contains(&limit) {
            return Err(ToolError::invalid_args("limit must be in [1,100]"));
        }
    }
    if let Some(lines) = args.snippet_lines {
        if !(1..=20).contains(&lines) {
            return Err(ToolError::invalid_args("snippet_lines must be in [1,20]"));
        }
    }
    if let Some(mode) = &args.total_mode {
        if mode != "exact" && mode != "approx" {
            return Err(ToolError::invalid_args(
                "total_mode must be 'exact' or 'approx'",
            ));
        }
    }
    // Mode-scoped parameters are rejected outside their mode.
    if search_type != "symbol" && search_type != "auto" {
        for (present, name) in [
            (args.kinds.is_some(), "kinds"),
            (args.match_mode.is_some(), "match_mode"),
            (args.include_qualname.is_some(), "include_qualname"),
        ] {
            if present {
                return Err(ToolError::invalid_args(format!(
                    "'{name}' is only valid for search_type='symbol'"
                )));
            }
        }
    }
    if search_type != "api" && search_type != "auto" {
        for (present, name) in [
            (args.method.is_some(), "method"),
            (args.framework_hint.is_some(), "framework_hint"),
        ] {
            if present {
                return Err(ToolError::invalid_args(format!(
                    "'{name}' is only valid for search_type='api'"
                )));
            }
        }
    }
    Ok(())
}

/// One normalized result record shared by every search type.
struct Match {
    rtype: &'static str,
    path: String,
    identity: String,
    line: u32,
    qualname: Option<String>,
    snippet: Option<String>,
    extra: Value,
}

pub fn execute_search(ctx: &ToolContext, raw_args: &Value) -> ToolResponse {
    let args: SearchArgs = match parse_args(raw_args) {
        Ok(a) => a,
        Err(e) => return error_response(ctx, TOOL, e),
    };
    let requested = args
        .search_type
        .as_deref()
        .unwrap_or("code")
        .to_lowercase();
    if let Err(e) = validate(&args, &requested) {
        return error_response(ctx, TOOL, e);
    }
    if !ctx.indexer.status().index_ready && ctx.store.file_count(None).unwrap_or(0) == 0 {
        let err = ToolError::new(
            ToolCode::NotIndexed,
            "Index is empty. Run scan_once first, then retry the search.",
        )
        .with_next_call(json!({"tool": "scan_once", "arguments": {}}));
        return error_response(ctx, TOOL, err);
    }

    let limit = args.limit.unwrap_or(20) as usize;
    let mut resolved: &'static str = match requested.as_str() {
        "auto" => infer_search_type(&args.query),
        "symbol" => "symbol",
        "api" => "api",
        "repo" => "repo",
        _ => "code",
    };
    let mut fallback_used = false;

    let mut result = run_search(ctx, &args, resolved, limit);
    if requested == "auto" && resolved != "code" {
        let empty = matches!(&result, Ok((matches, _, _)) if matches.is_empty());
        if result.is_err() || empty {
            fallback_used = true;
            resolved = "code";
            result = run_search(ctx, &args, "code", limit);
        }
    }

    let (matches, total, total_mode) = match result {
        Ok(out) => out,
        Err(e) => return error_response(ctx, TOOL, e),
    };

    build_response(ctx, raw_args, &args, resolved, requested == "auto", fallback_used, matches, total, &total_mode, limit)
}

fn run_search(
    ctx: &ToolContext,
    args: &SearchArgs,
    search_type: &str,
    limit: usize,
) -> Result<(Vec<Match>, usize, String), ToolError> {
    let exact = |matches: Vec<Match>| {
        let total = matches.len();
        (matches, total, "exact".to_string())
    };
    match search_type {
        "symbol" => symbol_search(ctx, args, limit).map(exact),
        "api" => api_search(ctx, args, limit).map(exact),
        "repo" => repo_search(ctx, args, limit).map(exact),
        _ => code_search(ctx, args, limit),
    }
}

fn code_search(
    ctx: &ToolContext,
    args: &SearchArgs,
    limit: usize,
) -> Result<(Vec<Match>, usize, String), ToolError> {
    let opts = SearchOptions {
        query: args.query.clone(),
        repo: args.repo.clone(),
        root_ids: ctx.roots.iter().map(|r| crate::workspace::root_id(r)).collect(),
        limit,
        offset: args.offset.unwrap_or(0).max(0) as usize,
        path_pattern: args.path_pattern.clone(),
        file_types: args.file_types.clone().unwrap_or_default(),
        exclude_patterns: args.exclude_patterns.clone().unwrap_or_default(),
        use_regex: args.use_regex.unwrap_or(false),
        case_sensitive: args.case_sensitive.unwrap_or(false),
        recency_boost: args.recency_boost.unwrap_or(false),
        total_mode: match args.total_mode.as_deref() {
            Some("approx") => TotalMode::Approx,
            _ => TotalMode::Exact,
        },
        snippet_lines: args.snippet_lines.unwrap_or(3) as usize,
    };
    let (hits, meta) = ctx.engine.search(&opts)?;
    let matches = hits
        .into_iter()
        .map(|h| {
            let line = extract_first_line_number(&h.snippet);
            Match {
                rtype: "code",
                identity: h
                    .path
                    .rsplit('/')
                    .next()
                    .unwrap_or(h.path.as_str())
                    .to_string(),
                line,
                qualname: None,
                snippet: Some(h.snippet),
                extra: json!({
                    "repo": h.repo,
                    "score": (h.score * 100.0).round() / 100.0,
                    "mtime": h.mtime,
                    "size": h.size,
                    "file_type": h.file_type,
                    "hit_reason": h.hit_reason,
                    "match_count": h.match_count,
                }),
                path: h.path,
            }
        })
        .collect();
    Ok((matches, meta.total, meta.total_mode.as_str().to_string()))
}

fn symbol_search(
    ctx: &ToolContext,
    args: &SearchArgs,
    limit: usize,
) -> Result<Vec<Match>, ToolError> {
    let kinds: Vec<SymbolKind> = match &args.kinds {
        None => Vec::new(),
        Some(raw) => {
            let mut kinds = Vec::new();
            for k in raw {
                let kind = SymbolKind::from_str(k)
                    .map_err(|e| ToolError::new(ToolCode::SymbolKindInvalid, e))?;
                kinds.push(kind);
            }
            kinds
        }
    };
    let match_mode = args.match_mode.as_deref().unwrap_or("contains");
    if !["exact", "prefix", "contains"].contains(&match_mode) {
        return Err(ToolError::invalid_args(
            "match_mode must be exact, prefix, or contains",
        ));
    }
    let rows = ctx
        .store
        .search_symbols(args.query.trim(), &kinds, match_mode, limit, None)?;
    Ok(rows
        .into_iter()
        .map(|s| Match {
            rtype: "symbol",
            path: s.path,
            identity: s.name,
            line: s.line,
            qualname: Some(s.qualname),
            snippet: None,
            extra: json!({ "kind": s.kind.as_str(), "end_line": s.end_line }),
        })
        .collect())
}

fn api_search(ctx: &ToolContext, args: &SearchArgs, limit: usize) -> Result<Vec<Match>, ToolError> {
    // Route definitions are matched as quoted paths near an HTTP verb.
    let route_re = Regex::new(
        r#"(?i)\b(GET|POST|PUT|DELETE|PATCH)\b[^\n]*?["'](/[^"'\s]*)["']|["'](/[A-Za-z0-9_\-/{}:.]+)["']"#,
    )
    .expect("static regex");
    let wanted_method = args.method.as_ref().map(|m| m.to_uppercase());
    let needle = args
        .query
        .trim()
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .trim()
        .to_lowercase();

    let opts = SearchOptions {
        query: args.query.clone(),
        repo: args.repo.clone(),
        limit: 100,
        snippet_lines: 1,
        ..Default::default()
    };
    let (hits, _) = ctx.engine.search(&opts)?;
    let mut matches = Vec::new();
    for hit in hits {
        let Ok(content) = ctx.store.read_file(&hit.path) else {
            continue;
        };
        for (idx, line) in content.lines().enumerate() {
            for caps in route_re.captures_iter(line) {
                let method = caps
                    .get(1)
                    .map(|m| m.as_str().to_uppercase())
                    .unwrap_or_default();
                let route = caps
                    .get(2)
                    .or_else(|| caps.get(3))
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                if route.is_empty() {
                    continue;
                }
                if !needle.is_empty() && !route.to_lowercase().contains(&needle) {
                    continue;
                }
                if let Some(wanted) = &wanted_method {
                    if &method != wanted {
                        continue;
                    }
                }
                matches.push(Match {
                    rtype: "api",
                    path: hit.path.clone(),
                    identity: route,
                    line: (idx + 1) as u32,
                    qualname: None,
                    snippet: Some(format!("L{}: {}", idx + 1, line.trim())),
                    extra: json!({ "method": method, "repo": &hit.repo }),
                });
                if matches.len() >= limit {
                    return Ok(matches);
                }
            }
        }
    }
    Ok(matches)
}

fn repo_search(ctx: &ToolContext, args: &SearchArgs, limit: usize) -> Result<Vec<Match>, ToolError> {
    let root_ids: Vec<_> = ctx.roots.iter().map(|r| crate::workspace::root_id(r)).collect();
    let candidates = ctx
        .engine
        .repo_candidates(args.query.trim(), limit, &root_ids)?;
    Ok(candidates
        .into_iter()
        .map(|c| Match {
            rtype: "repo",
            path: c.repo.clone(),
            identity: c.repo,
            line: 0,
            qualname: None,
            snippet: None,
            extra: json!({ "score": c.score, "reason": c.reason }),
        })
        .collect())
}

fn extract_first_line_number(snippet: &str) -> u32 {
    let re = Regex::new(r"L(\d+):").expect("static regex");
    re.captures(snippet)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

#[allow(clippy::too_many_arguments)]
fn build_response(
    ctx: &ToolContext,
    raw_args: &Value,
    args: &SearchArgs,
    resolved: &str,
    inferred: bool,
    fallback_used: bool,
    mut matches: Vec<Match>,
    total: usize,
    total_mode: &str,
    limit: usize,
) -> ToolResponse {
    // Per-item preview budget keeps the serialized payload bounded;
    // shrinking marks the response degraded.
    let mut preview_degraded = false;
    let budget = ctx.settings.preview_budget_bytes;
    let payload_size: usize = matches
        .iter()
        .map(|m| m.snippet.as_deref().map_or(0, str::len) + m.path.len() + 64)
        .sum();
    if payload_size > budget && !matches.is_empty() {
        let per_item = (budget / matches.len()).max(80);
        for m in &mut matches {
            if let Some(snippet) = &mut m.snippet {
                if snippet.len() > per_item {
                    let mut cut = per_item;
                    while cut > 0 && !snippet.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    snippet.truncate(cut);
                    preview_degraded = true;
                }
            }
        }
    }

    // Record search metrics and mint candidate ids for the top paths.
    let session_key = ctx.stabilization.session_key(raw_args, &ctx.roots);
    let top_paths: Vec<String> = matches
        .iter()
        .filter(|m| m.rtype != "repo")
        .take(ctx.settings.relevance_top_k)
        .map(|m| m.path.clone())
        .collect();
    let candidates =
        ctx.stabilization
            .record_search(&session_key, &args.query, &top_paths, preview_degraded);
    let candidate_for = |path: &str| -> Option<String> {
        candidates
            .iter()
            .find(|(_, p)| p == path)
            .map(|(id, _)| id.clone())
    };

    let results_json: Vec<Value> = matches
        .iter()
        .map(|m| {
            let mut location = json!({ "line": m.line });
            if let Some(q) = &m.qualname {
                location["qualname"] = json!(q);
            }
            let mut record = json!({
                "type": m.rtype,
                "path": &m.path,
                "identity": &m.identity,
                "location": location,
                "extra": &m.extra,
            });
            if let Some(snippet) = &m.snippet {
                record["snippet"] = json!(snippet);
            }
            if let Some(cid) = candidate_for(&m.path) {
                record["candidate_id"] = json!(cid);
            }
            record
        })
        .collect();

    let has_more = total > args.offset.unwrap_or(0).max(0) as usize + matches.len();
    let mut meta = json!({
        "total": total,
        "total_mode": total_mode,
        "search_type": resolved,
        "engine": if args.use_regex.unwrap_or(false) { "regex" } else { "fts5" },
    });
    if inferred {
        meta["inferred"] = json!(true);
    }
    if fallback_used {
        meta["fallback_used"] = json!(true);
    }
    if preview_degraded {
        meta["preview_degraded"] = json!(true);
    }
    // Deterministic follow-up: read the top hit through its candidate ref.
    let next_calls = match candidates.first() {
        Some((cid, path)) => json!([{
            "tool": "read",
            "arguments": { "mode": "file", "target": path, "candidate_id": cid }
        }]),
        None => json!([]),
    };
    meta["stabilization"] = json!({ "next_calls": next_calls });
    let candidates_json: serde_json::Map<String, Value> = candidates
        .iter()
        .map(|(id, path)| (id.clone(), json!(path)))
        .collect();
    let json_payload = json!({
        "results": results_json,
        "meta": meta,
        "candidates": Value::Object(candidates_json),
    });

    // PACK1 form.
    let mut header_kv: Vec<(&str, String)> = vec![("type", resolved.to_string())];
    if fallback_used {
        header_kv.push(("fallback", "code".into()));
    }
    if preview_degraded {
        header_kv.push(("preview_degraded", "true".into()));
    }
    let mut lines = vec![pack_header(
        TOOL,
        &header_kv,
        Some(matches.len()),
        Some(total),
        Some(total_mode),
    )];
    for m in &matches {
        let mut kv: Vec<(&str, String)> = vec![("path", enc_id(&m.path))];
        if m.line > 0 {
            kv.push(("line", m.line.to_string()));
        }
        kv.push(("id", enc_id(&m.identity)));
        if let Some(q) = &m.qualname {
            kv.push(("qual", enc_id(q)));
        }
        if let Some(cid) = candidate_for(&m.path) {
            kv.push(("c", cid));
        }
        if let Some(snippet) = &m.snippet {
            kv.push(("s", enc_text(snippet)));
        }
        lines.push(pack_line("r", &kv));
    }
    if has_more {
        let next_offset = args.offset.unwrap_or(0).max(0) as usize + matches.len();
        lines.push(pack_truncated("true", next_offset, limit));
    }

    ToolResponse::ok(json_payload, lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_sql_forces_code() {
        assert_eq!(infer_search_type("SELECT * FROM users JOIN roles"), "code");
        assert_eq!(infer_search_type("create table users"), "code");
    }

    #[test]
    fn test_infer_url_like_wins() {
        assert_eq!(infer_search_type("/api/users"), "api");
        assert_eq!(infer_search_type("GET /api/users"), "api");
        assert_eq!(infer_search_type("https://example.com/x"), "api");
    }

    #[test]
    fn test_infer_identifier_like() {
        assert_eq!(infer_search_type("SearchService"), "symbol");
        assert_eq!(infer_search_type("Foo::bar"), "symbol");
        assert_eq!(infer_search_type("module.attr"), "symbol");
    }

    #[test]
    fn test_infer_default_code() {
        assert_eq!(infer_search_type("how does auth work"), "code");
        assert_eq!(infer_search_type("fn main() {"), "code");
    }

    #[test]
    fn test_extract_first_line_number() {
        assert_eq!(extract_first_line_number("L42: fn main()"), 42);
        assert_eq!(extract_first_line_number("no markers"), 0);
    }
}
