//! Dual-format response encoder.
//!
//! Every tool produces both a PACK1 textual form (token-efficient, the
//! default) and a JSON form with equivalent semantics; the active format is
//! selected by `SARI_FORMAT`. PACK1 grammar:
//!
//! ```text
//! PACK1 tool=<t> ok=<bool> [k=v]* [returned=N] [total_mode=<m>] [total=M]
//! <kind>:k=v k2=v2 ...
//! <kind>:<encoded-value>
//! m:truncated=true|maybe next=use_offset offset=<n> limit=<l>
//! ```
//!
//! Two URL-encoding profiles keep records single-line and parseable:
//! `ENC_TEXT` (safe = none) for free text, `ENC_ID` (safe = `/._-:@`) for
//! paths and identifiers.

use crate::error::ToolError;
use crate::settings::{ResponseFormat, Settings};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Value};

/// ENC_TEXT: everything but unreserved characters is escaped.
const ENC_TEXT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

/// ENC_ID: additionally keeps `/ : @` so paths and qualnames stay readable.
const ENC_ID: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/')
    .remove(b':')
    .remove(b'@');

/// Percent-encodes free text (snippet, msg, reason, hint).
#[must_use]
pub fn enc_text(s: &str) -> String {
    utf8_percent_encode(s, ENC_TEXT).to_string()
}

/// Percent-encodes identifiers (path, repo, name).
#[must_use]
pub fn enc_id(s: &str) -> String {
    utf8_percent_encode(s, ENC_ID).to_string()
}

/// Builds the PACK1 header line.
#[must_use]
pub fn pack_header(
    tool: &str,
    kv: &[(&str, String)],
    returned: Option<usize>,
    total: Option<usize>,
    total_mode: Option<&str>,
) -> String {
    let mut parts = vec!["PACK1".to_string(), format!("tool={tool}"), "ok=true".into()];
    for (k, v) in kv {
        parts.push(format!("{k}={v}"));
    }
    if let Some(n) = returned {
        parts.push(format!("returned={n}"));
    }
    if let Some(mode) = total_mode {
        parts.push(format!("total_mode={mode}"));
        if mode != "none" {
            if let Some(t) = total {
                parts.push(format!("total={t}"));
            }
        }
    } else if let Some(t) = total {
        parts.push(format!("total={t}"));
    }
    parts.join(" ")
}

/// Builds a PACK1 record line with key=value fields.
#[must_use]
pub fn pack_line(kind: &str, kv: &[(&str, String)]) -> String {
    let fields: Vec<String> = kv.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{kind}:{}", fields.join(" "))
}

/// Builds a PACK1 record line carrying one encoded value.
#[must_use]
pub fn pack_value_line(kind: &str, value: &str) -> String {
    format!("{kind}:{value}")
}

/// Builds the PACK1 pagination trailer.
#[must_use]
pub fn pack_truncated(state: &str, next_offset: usize, limit: usize) -> String {
    format!("m:truncated={state} next=use_offset offset={next_offset} limit={limit}")
}

/// Builds the PACK1 error line for a tool error.
#[must_use]
pub fn pack_error(tool: &str, err: &ToolError) -> String {
    let mut parts = vec![
        "PACK1".to_string(),
        format!("tool={tool}"),
        "ok=false".into(),
        format!("code={}", err.code),
        format!("msg={}", enc_text(&err.message)),
    ];
    if let Some(hint) = &err.hint {
        parts.push(format!("hint={}", enc_text(hint)));
    }
    for (k, v) in &err.fields {
        parts.push(format!("{k}={}", enc_text(v)));
    }
    parts.join(" ")
}

/// One tool invocation's output in both wire forms.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    /// Decoded JSON payload (mirrored at the top level in JSON mode).
    pub json: Value,
    /// PACK1 textual payload.
    pub pack: String,
    pub is_error: bool,
}

impl ToolResponse {
    #[must_use]
    pub fn ok(json: Value, pack: String) -> Self {
        Self {
            json,
            pack,
            is_error: false,
        }
    }

    /// Builds the error response for a tool-level failure.
    #[must_use]
    pub fn from_error(tool: &str, err: &ToolError) -> Self {
        let mut error_obj = json!({
            "code": err.code.as_str(),
            "message": err.message,
        });
        if let Some(hint) = &err.hint {
            error_obj["hint"] = json!(hint);
        }
        if !err.fields.is_empty() {
            let data: serde_json::Map<String, Value> = err
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect();
            error_obj["data"] = Value::Object(data);
        }
        let mut payload = json!({ "error": error_obj, "isError": true });
        if !err.next_calls.is_empty() {
            payload["meta"] = json!({ "stabilization": { "next_calls": err.next_calls } });
        }
        Self {
            json: payload,
            pack: pack_error(tool, err),
            is_error: true,
        }
    }

    /// Encodes into the MCP `tools/call` result object per the active
    /// format. In JSON mode the decoded dict is mirrored at the top level
    /// next to the `content` wrapper for client convenience.
    #[must_use]
    pub fn encode(&self, settings: &Settings) -> Value {
        let mut result = match settings.format {
            ResponseFormat::Pack => {
                json!({ "content": [{ "type": "text", "text": self.pack }] })
            }
            ResponseFormat::Json => {
                let text = if settings.response_compact {
                    serde_json::to_string(&self.json)
                } else {
                    serde_json::to_string_pretty(&self.json)
                }
                .unwrap_or_else(|_| "{}".into());
                let mut out = json!({ "content": [{ "type": "text", "text": text }] });
                if let (Value::Object(dst), Value::Object(src)) = (&mut out, &self.json) {
                    for (k, v) in src {
                        dst.insert(k.clone(), v.clone());
                    }
                }
                out
            }
        };
        if self.is_error {
            result["isError"] = json!(true);
            if settings.format == ResponseFormat::Pack {
                if let Some(err) = self.json.get("error") {
                    result["error"] = err.clone();
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ToolCode, ToolError};

    #[test]
    fn test_enc_text_escapes_spaces_and_unicode() {
        assert_eq!(enc_text("a b"), "a%20b");
        assert_eq!(enc_text("x/y"), "x%2Fy");
        // CJK is escaped but reversible
        assert_eq!(enc_text("네"), "%EB%84%A4");
    }

    #[test]
    fn test_enc_id_keeps_path_chars() {
        assert_eq!(enc_id("src/a.rs"), "src/a.rs");
        assert_eq!(enc_id("Foo::bar"), "Foo::bar");
        assert_eq!(enc_id("a b"), "a%20b");
    }

    #[test]
    fn test_pack_header_ordering() {
        let h = pack_header(
            "search",
            &[("type", "code".into())],
            Some(2),
            Some(10),
            Some("exact"),
        );
        assert_eq!(h, "PACK1 tool=search ok=true type=code returned=2 total_mode=exact total=10");
    }

    #[test]
    fn test_pack_header_total_mode_none_hides_total() {
        let h = pack_header("search", &[], Some(1), Some(99), Some("none"));
        assert!(!h.contains("total=99"));
    }

    #[test]
    fn test_pack_error_line() {
        let err = ToolError::new(ToolCode::BudgetExceeded, "too many reads")
            .with_hint("run search first");
        let line = pack_error("read", &err);
        assert!(line.starts_with("PACK1 tool=read ok=false code=BUDGET_EXCEEDED"));
        assert!(line.contains("msg=too%20many%20reads"));
        assert!(line.contains("hint=run%20search%20first"));
    }

    #[test]
    fn test_json_mode_mirrors_payload() {
        let settings = Settings {
            format: ResponseFormat::Json,
            ..Settings::default()
        };
        let resp = ToolResponse::ok(
            serde_json::json!({ "results": [1, 2], "meta": { "total": 2 } }),
            "PACK1 tool=t ok=true returned=2".into(),
        );
        let encoded = resp.encode(&settings);
        assert_eq!(encoded["results"][1], 2);
        assert!(encoded["content"][0]["text"].as_str().unwrap().contains("results"));
    }

    #[test]
    fn test_pack_mode_wraps_text_only() {
        let settings = Settings::default();
        let resp = ToolResponse::ok(serde_json::json!({"x": 1}), "PACK1 tool=t ok=true".into());
        let encoded = resp.encode(&settings);
        assert_eq!(
            encoded["content"][0]["text"].as_str().unwrap(),
            "PACK1 tool=t ok=true"
        );
        assert!(encoded.get("x").is_none());
    }

    #[test]
    fn test_error_response_carries_is_error() {
        let settings = Settings::default();
        let err = ToolError::invalid_args("bad");
        let resp = ToolResponse::from_error("read", &err);
        let encoded = resp.encode(&settings);
        assert_eq!(encoded["isError"], true);
        assert_eq!(encoded["error"]["code"], "INVALID_ARGS");
    }
}
