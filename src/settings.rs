//! Runtime settings resolved from the `SARI_*` environment surface plus
//! the workspace config file.
//!
//! Settings are resolved once at startup and passed by reference; there are
//! no global singletons, which keeps tests isolated.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Output encoder selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Pack,
    Json,
}

/// Read-first gate behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateMode {
    Off,
    #[default]
    Warn,
    Enforce,
}

/// Indexer operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexerMode {
    #[default]
    Leader,
    Follower,
    Off,
}

/// Resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub format: ResponseFormat,
    pub response_compact: bool,
    pub read_gate_mode: GateMode,
    pub strict_session_id: bool,
    pub expose_internal_tools: bool,
    pub mcp_workers: usize,
    pub mcp_queue_size: usize,
    pub force_content_length: bool,
    pub dev_jsonl: bool,
    pub strict_protocol: bool,

    pub max_parse_bytes: u64,
    pub max_ast_bytes: u64,
    pub fts_max_bytes: usize,
    pub redact_enabled: bool,
    pub store_content: bool,
    pub compress_content: bool,

    pub max_depth: usize,
    pub follow_symlinks: bool,

    pub max_range_lines: usize,
    pub session_read_budget: usize,
    pub session_cap: usize,
    pub bundle_items_cap: usize,
    pub relevance_top_k: usize,

    pub indexer_mode: IndexerMode,
    pub worker_baseline: usize,
    pub writer_buffer: usize,
    pub scan_once_timeout_ms: u64,
    pub purge_grace_secs: i64,

    pub preview_budget_bytes: usize,
    pub list_files_budget_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            format: ResponseFormat::Pack,
            response_compact: true,
            read_gate_mode: GateMode::Warn,
            strict_session_id: false,
            expose_internal_tools: false,
            mcp_workers: 4,
            mcp_queue_size: 1000,
            force_content_length: false,
            dev_jsonl: false,
            strict_protocol: false,

            max_parse_bytes: 2 * 1024 * 1024,
            max_ast_bytes: 1024 * 1024,
            fts_max_bytes: 1_000_000,
            redact_enabled: true,
            store_content: true,
            compress_content: true,

            max_depth: 20,
            follow_symlinks: false,

            max_range_lines: 200,
            session_read_budget: 25,
            session_cap: 32,
            bundle_items_cap: 16,
            relevance_top_k: 5,

            indexer_mode: IndexerMode::Leader,
            worker_baseline: 4,
            writer_buffer: 256,
            scan_once_timeout_ms: 8000,
            purge_grace_secs: 7 * 24 * 3600,

            preview_budget_bytes: 10 * 1024,
            list_files_budget_bytes: 2 * 1024,
        }
    }
}

impl Settings {
    /// Resolves settings from the process environment over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut s = Self::default();

        s.format = match env_str("SARI_FORMAT").as_deref() {
            Some("json") => ResponseFormat::Json,
            _ => ResponseFormat::Pack,
        };
        s.response_compact = env_bool("SARI_RESPONSE_COMPACT", s.response_compact);
        s.read_gate_mode = match env_str("SARI_READ_GATE_MODE").as_deref() {
            Some("off") => GateMode::Off,
            Some("enforce") => GateMode::Enforce,
            Some("warn") => GateMode::Warn,
            _ => s.read_gate_mode,
        };
        s.strict_session_id = env_bool("SARI_STRICT_SESSION_ID", s.strict_session_id);
        s.expose_internal_tools = env_bool("SARI_EXPOSE_INTERNAL_TOOLS", s.expose_internal_tools);
        s.mcp_workers = env_usize("SARI_MCP_WORKERS", s.mcp_workers).max(1);
        s.mcp_queue_size = env_usize("SARI_MCP_QUEUE_SIZE", s.mcp_queue_size).max(1);
        s.force_content_length = env_bool("SARI_FORCE_CONTENT_LENGTH", s.force_content_length);
        s.dev_jsonl = env_bool("SARI_DEV_JSONL", s.dev_jsonl);
        s.strict_protocol = env_bool("SARI_STRICT_PROTOCOL", s.strict_protocol);

        s.max_parse_bytes = env_usize("SARI_MAX_PARSE_BYTES", s.max_parse_bytes as usize) as u64;
        s.fts_max_bytes = env_usize("SARI_FTS_MAX_BYTES", s.fts_max_bytes);
        s.redact_enabled = env_bool("SARI_REDACT_ENABLED", s.redact_enabled);
        s.compress_content = env_bool("SARI_STORE_CONTENT_COMPRESS", s.compress_content);

        s.max_depth = env_usize("SARI_MAX_DEPTH", s.max_depth);
        s.follow_symlinks = env_bool("SARI_FOLLOW_SYMLINKS", s.follow_symlinks);

        s.max_range_lines = env_usize("SARI_MAX_RANGE_LINES", s.max_range_lines).max(1);
        s.session_read_budget = env_usize("SARI_SESSION_READ_BUDGET", s.session_read_budget);

        s.indexer_mode = match env_str("SARI_INDEXER_MODE").as_deref() {
            Some("follower") => IndexerMode::Follower,
            Some("off") => IndexerMode::Off,
            _ => IndexerMode::Leader,
        };
        s.worker_baseline = env_usize("SARI_INDEX_WORKERS", s.worker_baseline).max(1);
        s.scan_once_timeout_ms = env_usize(
            "SARI_SCAN_ONCE_TIMEOUT_MS",
            s.scan_once_timeout_ms as usize,
        ) as u64;
        s.purge_grace_secs = env_usize("SARI_PURGE_GRACE_SECS", s.purge_grace_secs as usize) as i64;

        s
    }
}

/// Workspace config file: the SSOT under the user config directory.
///
/// Only the fields the core consumes; unknown fields are ignored so the
/// external CLI can extend the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default)]
    pub workspace_roots: Vec<String>,
    #[serde(default)]
    pub include_ext: Vec<String>,
    #[serde(default)]
    pub include_files: Vec<String>,
    #[serde(default)]
    pub exclude_dirs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl WorkspaceConfig {
    /// Loads the config file, returning defaults when missing or malformed.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&text).unwrap_or_default()
    }

    /// Persists the config as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".into());
        std::fs::write(path, text)
    }
}

/// Returns the per-user config directory for sari.
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("sari")
}

/// Returns the per-user cache directory for sari databases.
#[must_use]
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("sari")
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_str(key).as_deref() {
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
