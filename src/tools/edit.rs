//! AST-guided edit (read tool, `mode=ast_edit`).
//!
//! The edit is gated on an optimistic version hash of the on-disk
//! content, resolves symbol spans through the tree-sitter backend with a
//! DB-recorded span fallback, syntax-checks Python results before
//! writing, and requests focus indexing of the touched file afterwards.
//! On any refusal the file is byte-identical to before the call.

use super::read::{unified_diff, ReadArgs};
use super::{error_response, ToolContext};
use crate::error::{ToolCode, ToolError};
use crate::extract::{ast, Lang};
use crate::pack::{enc_id, enc_text, pack_header, ToolResponse};
use crate::stabilize::EvidenceRef;
use crate::types::SymbolKind;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const TOOL: &str = "read";

/// First 12 hex chars of SHA-256, the edit version token.
#[must_use]
pub fn version_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn execute_ast_edit(
    ctx: &ToolContext,
    args: &ReadArgs,
    raw_args: &Value,
) -> ToolResponse {
    match run_edit(ctx, args, raw_args) {
        Ok(resp) => resp,
        Err(e) => error_response(ctx, TOOL, e),
    }
}

fn run_edit(ctx: &ToolContext, args: &ReadArgs, raw_args: &Value) -> Result<ToolResponse, ToolError> {
    let target = args
        .target
        .as_deref()
        .ok_or_else(|| ToolError::invalid_args("'target' is required for mode='ast_edit'"))?;
    let expected = args
        .expected_version_hash
        .as_deref()
        .ok_or_else(|| ToolError::invalid_args("'expected_version_hash' is required"))?;

    let db_path = super::resolve_target(ctx, target)?;
    let fs_path = crate::workspace::db_path_to_fs(&db_path, &ctx.roots).ok_or_else(|| {
        ToolError::new(ToolCode::RootOutOfScope, "target root is not registered")
    })?;
    let original = std::fs::read_to_string(&fs_path)
        .map_err(|e| ToolError::new(ToolCode::IoError, format!("cannot read target: {e}")))?;

    let actual = version_hash(&original);
    if actual != expected.to_lowercase() {
        return Err(ToolError::new(
            ToolCode::VersionConflict,
            format!("expected_version_hash '{expected}' does not match on-disk content '{actual}'"),
        )
        .with_field("current_version_hash", actual)
        .with_hint("re-read the file and retry with the fresh hash"));
    }

    let has_text_pair = args.old_text.is_some() && args.new_text.is_some();
    let has_symbol = args.symbol.is_some();
    if !has_text_pair && !(has_symbol && args.new_text.is_some()) {
        return Err(ToolError::invalid_args(
            "provide either (old_text, new_text) or (symbol, new_text)",
        ));
    }

    let new_text = args.new_text.as_deref().unwrap_or_default();
    let edited = if has_symbol {
        apply_symbol_edit(ctx, args, &db_path, &original, new_text)?
    } else {
        apply_text_edit(
            args.old_text.as_deref().unwrap_or_default(),
            new_text,
            &original,
        )?
    };

    // Syntax gate before anything touches the disk.
    if fs_path.extension().and_then(|e| e.to_str()) == Some("py") {
        check_python_syntax(&edited)?;
    }

    std::fs::write(&fs_path, &edited)
        .map_err(|e| ToolError::new(ToolCode::IoError, format!("write failed: {e}")))?;

    // Focus indexing of the touched file; a rejection downgrades the
    // result but never the edit itself.
    let mut warnings: Vec<String> = Vec::new();
    let focus_indexing = match ctx.indexer.index_file(&fs_path) {
        Err(e) => {
            warnings.push(format!("focus indexing rejected: {e}"));
            "failed"
        }
        Ok(()) => {
            let timeout = args.sync_timeout_ms.unwrap_or(0).max(0) as u64;
            if timeout > 0 {
                ctx.store.flush();
                if ctx.indexer.wait_for_drain(Duration::from_millis(timeout)) {
                    ctx.store.flush();
                    "complete"
                } else {
                    "triggered"
                }
            } else {
                "triggered"
            }
        }
    };

    let (diff, additions, deletions) = unified_diff(&original, &edited, 2);
    let new_hash = version_hash(&edited);
    let next_calls = build_test_next_calls(ctx, args.symbol.as_deref(), &fs_path);

    let session_key = ctx.stabilization.session_key(raw_args, &ctx.roots);
    let snapshot = ctx.stabilization.record_read(
        &session_key,
        diff.lines().count() as u64,
        diff.len() as u64,
        diff.lines().count() as u64,
    );
    let evidence = vec![EvidenceRef {
        kind: "diff",
        path: db_path.clone(),
        start_line: 1,
        end_line: (diff.lines().count().max(1)) as u32,
        content_hash: crate::extract::compute_hash(&diff),
        candidate_id: None,
    }];

    let payload = json!({
        "updated": true,
        "path": &db_path,
        "version_hash": &new_hash,
        "additions": additions,
        "deletions": deletions,
        "diff": &diff,
        "focus_indexing": focus_indexing,
        "meta": {
            "stabilization": {
                "budget_state": "OK",
                "warnings": warnings,
                "suggested_next_action": "none",
                "metrics_snapshot": serde_json::to_value(&snapshot).unwrap_or_default(),
                "evidence_refs": serde_json::to_value(&evidence).unwrap_or_default(),
                "reason_codes": [],
                "next_calls": next_calls,
            }
        }
    });

    let pack = [
        pack_header(
            TOOL,
            &[
                ("mode", "ast_edit".into()),
                ("path", enc_id(&db_path)),
                ("updated", "true".into()),
                ("version", new_hash),
                ("adds", additions.to_string()),
                ("dels", deletions.to_string()),
                ("focus", focus_indexing.into()),
            ],
            None,
            None,
            None,
        ),
        format!("t:{}", enc_text(&diff)),
    ]
    .join("\n");

    Ok(ToolResponse::ok(payload, pack))
}

/// Plain text replacement; `old_text` must occur exactly once.
fn apply_text_edit(old_text: &str, new_text: &str, original: &str) -> Result<String, ToolError> {
    if old_text.is_empty() {
        return Err(ToolError::invalid_args("old_text must not be empty"));
    }
    let occurrences = original.matches(old_text).count();
    match occurrences {
        0 => Err(ToolError::invalid_args(
            "old_text not found in the target file",
        )
        .with_hint("re-read the file; its content may have moved")),
        1 => Ok(original.replacen(old_text, new_text, 1)),
        n => Err(ToolError::invalid_args(format!(
            "old_text occurs {n} times; provide a longer unique span"
        ))),
    }
}

/// Symbol-block replacement with AST span resolution and DB fallback.
fn apply_symbol_edit(
    ctx: &ToolContext,
    args: &ReadArgs,
    db_path: &str,
    original: &str,
    new_text: &str,
) -> Result<String, ToolError> {
    let symbol = args.symbol.as_deref().unwrap_or_default();
    let kind = match args.symbol_kind.as_deref() {
        None => None,
        Some(raw) => Some(
            SymbolKind::from_str(raw)
                .map_err(|e| ToolError::new(ToolCode::SymbolKindInvalid, e))?,
        ),
    };

    let (_, rel) = crate::workspace::split_db_path(db_path);
    let lang = Lang::from_rel_path(rel);

    // (a) tree-sitter span, with qualname disambiguation.
    let mut span: Option<(u32, u32)> = None;
    if let Some(lang) = lang {
        if let Some(mut spans) = ast::find_symbol_spans(lang, original, symbol, kind) {
            if spans.len() > 1 {
                if let Some(qual) = args.symbol_qualname.as_deref() {
                    spans.retain(|s| s.qualname == qual);
                }
            }
            match spans.len() {
                0 => {}
                1 => span = Some((spans[0].start_line, spans[0].end_line)),
                _ => {
                    return Err(ToolError::new(
                        ToolCode::SymbolResolutionFailed,
                        format!(
                            "symbol '{symbol}' is ambiguous ({} candidates); pass symbol_qualname",
                            spans.len()
                        ),
                    ))
                }
            }
        }
    }

    // (b) DB-recorded span when the AST cannot answer.
    if span.is_none() {
        let row = ctx.store.get_symbol_block(db_path, symbol)?;
        span = row.map(|r| (r.line, r.end_line));
    }
    let Some((start, end)) = span else {
        return Err(ToolError::new(
            ToolCode::SymbolResolutionFailed,
            format!("cannot locate symbol '{symbol}' in {db_path}"),
        )
        .with_next_call(json!({
            "tool": "search",
            "arguments": {"query": symbol, "search_type": "symbol"}
        })));
    };

    let lines: Vec<&str> = original.lines().collect();
    if start == 0 || end as usize > lines.len() || start > end {
        return Err(ToolError::new(
            ToolCode::SymbolResolutionFailed,
            format!("recorded span {start}-{end} is outside the current file"),
        ));
    }
    let block = lines[(start - 1) as usize..end as usize].join("\n");

    // Scoped old_text replacement inside the block; must be unique there.
    let replacement = if let Some(old_text) = args.old_text.as_deref() {
        let occurrences = block.matches(old_text).count();
        if occurrences != 1 {
            return Err(ToolError::new(
                ToolCode::SymbolBlockMismatch,
                format!(
                    "old_text occurs {occurrences} times within the '{symbol}' block (expected exactly 1)"
                ),
            ));
        }
        block.replacen(old_text, new_text, 1)
    } else {
        new_text.to_string()
    };

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    out.extend(&lines[..(start - 1) as usize]);
    let replacement_lines: Vec<&str> = replacement.lines().collect();
    out.extend(&replacement_lines);
    out.extend(&lines[end as usize..]);
    let mut edited = out.join("\n");
    if original.ends_with('\n') && !edited.ends_with('\n') {
        edited.push('\n');
    }
    Ok(edited)
}

/// Python syntax gate: tree-sitter ERROR nodes when the backend is
/// available, a bracket/indent sanity check otherwise.
fn check_python_syntax(content: &str) -> Result<(), ToolError> {
    match ast::python_parse_ok(content) {
        Some(true) => Ok(()),
        Some(false) => Err(ToolError::invalid_args(
            "edited content is not valid Python (parse error); file left unchanged",
        )),
        None => lightweight_python_check(content),
    }
}

fn lightweight_python_check(content: &str) -> Result<(), ToolError> {
    let mut depth: i64 = 0;
    for c in content.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return Err(ToolError::invalid_args(
                "unbalanced brackets in edited content; file left unchanged",
            ));
        }
    }
    if depth != 0 {
        return Err(ToolError::invalid_args(
            "unbalanced brackets in edited content; file left unchanged",
        ));
    }
    // A block-opening line must be followed by a more-indented line.
    let lines: Vec<&str> = content.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim_end();
        if trimmed.ends_with(':') && !trimmed.trim_start().starts_with('#') {
            let indent = line.len() - line.trim_start().len();
            let has_body = lines
                .iter()
                .skip(i + 1)
                .find(|l| !l.trim().is_empty())
                .is_some_and(|l| l.len() - l.trim_start().len() > indent);
            if !has_body {
                return Err(ToolError::invalid_args(
                    "block with no indented body in edited content; file left unchanged",
                ));
            }
        }
    }
    Ok(())
}

/// Prefers tests referencing the edited symbol for the follow-up hint.
fn build_test_next_calls(ctx: &ToolContext, symbol: Option<&str>, edited: &Path) -> Vec<Value> {
    let mut command = "pytest -q".to_string();
    if let Some(symbol) = symbol {
        if let Some(test_file) = find_test_referencing(ctx, symbol) {
            command = format!("pytest -q {}", test_file.display());
        }
    } else if let Some(name) = edited.file_stem().and_then(|s| s.to_str()) {
        if let Some(test_file) = find_test_referencing(ctx, name) {
            command = format!("pytest -q {}", test_file.display());
        }
    }
    vec![json!({
        "tool": "run_command",
        "arguments": { "command": command }
    })]
}

/// Bounded walk over `tests/` directories looking for a file that
/// mentions the symbol.
fn find_test_referencing(ctx: &ToolContext, symbol: &str) -> Option<PathBuf> {
    const MAX_CANDIDATES: usize = 200;
    let mut checked = 0;
    for root in &ctx.roots {
        for dir_name in ["tests", "test"] {
            let dir = root.join(dir_name);
            if !dir.is_dir() {
                continue;
            }
            let mut stack = vec![dir];
            while let Some(current) = stack.pop() {
                let Ok(entries) = std::fs::read_dir(&current) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        stack.push(path);
                        continue;
                    }
                    checked += 1;
                    if checked > MAX_CANDIDATES {
                        return None;
                    }
                    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                    if !name.starts_with("test") && !name.ends_with("_test.py") {
                        continue;
                    }
                    if let Ok(content) = std::fs::read_to_string(&path) {
                        if content.contains(symbol) {
                            return path.strip_prefix(root).map(Path::to_path_buf).ok().or(Some(path));
                        }
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_hash_is_12_hex() {
        let h = version_hash("def target():\n    return 1\n");
        assert_eq!(h.len(), 12);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, version_hash("def target():\n    return 1\n"));
        assert_ne!(h, version_hash("other"));
    }

    #[test]
    fn test_apply_text_edit_unique() {
        let edited = apply_text_edit("x = 1", "x = 2", "a\nx = 1\nb\n").unwrap();
        assert_eq!(edited, "a\nx = 2\nb\n");
    }

    #[test]
    fn test_apply_text_edit_missing_and_ambiguous() {
        assert!(apply_text_edit("nope", "y", "a\n").is_err());
        let err = apply_text_edit("x", "y", "x x\n").unwrap_err();
        assert!(err.message.contains("2 times"));
    }

    #[test]
    fn test_lightweight_python_check() {
        assert!(lightweight_python_check("def f():\n    return 1\n").is_ok());
        assert!(lightweight_python_check("def f(:\n").is_err());
        assert!(lightweight_python_check("def f():\nreturn 1\n").is_err());
    }
}
