//! Error types for sari.
//!
//! Uses thiserror for ergonomic error handling with proper
//! error chain propagation. Tool-facing errors carry the structured
//! reason-code taxonomy that MCP clients key their recovery on.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level server error.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Tool(#[from] ToolError),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("File not found in database: {db_path}")]
    FileNotFound { db_path: String },

    #[error("Writer thread is gone")]
    WriterGone,

    #[error("Database is locked")]
    Locked,
}

/// Scanner errors. Per-entry failures are skipped silently; these are
/// the errors worth surfacing.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Root is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    BadPattern { pattern: String, reason: String },
}

/// Indexing errors.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to index file {path}: {reason}")]
    FileIndex { path: PathBuf, reason: String },

    #[error("Indexer is in follower mode")]
    Follower,

    #[error("Indexer is disabled")]
    Disabled,

    #[error("Indexer queue is full")]
    QueueFull,

    #[error("Indexer is shut down")]
    Stopped,
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Result type alias for database operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

impl ServerError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(e) => e.code(),
            Self::Scan(_) => "SCAN_ERROR",
            Self::Index(e) => e.code(),
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Tool(e) => e.code.as_str(),
        }
    }
}

impl DbError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) | Self::Migration(_) => "DB_ERROR",
            Self::Pool(_) => "POOL_ERROR",
            Self::FileNotFound { .. } => "FILE_NOT_FOUND",
            Self::WriterGone => "WRITER_GONE",
            Self::Locked => "DB_LOCKED",
        }
    }
}

impl IndexError {
    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileIndex { .. } => "FILE_INDEX_ERROR",
            Self::Follower => "ERR_INDEXER_FOLLOWER",
            Self::Disabled => "ERR_INDEXER_DISABLED",
            Self::QueueFull => "QUEUE_FULL",
            Self::Stopped => "INDEXER_STOPPED",
        }
    }
}

/// Reason codes surfaced to MCP clients on tool errors and policy denials.
///
/// Codes are stable strings: agents branch on them, so renaming one is a
/// breaking protocol change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCode {
    InvalidArgs,
    NotIndexed,
    RepoNotFound,
    IoError,
    DbError,
    Internal,
    IndexerFollower,
    IndexerDisabled,
    RootOutOfScope,
    EngineNotInstalled,
    EngineInit,
    EngineQuery,
    EngineIndex,
    EngineUnavailable,
    BudgetExceeded,
    SearchFirstRequired,
    SearchRefRequired,
    CandidateRefRequired,
    StrictSessionIdRequired,
    VersionConflict,
    SymbolResolutionFailed,
    SymbolKindInvalid,
    SymbolBlockMismatch,
    NoResults,
    PreviewDegraded,
}

impl ToolCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgs => "INVALID_ARGS",
            Self::NotIndexed => "NOT_INDEXED",
            Self::RepoNotFound => "REPO_NOT_FOUND",
            Self::IoError => "IO_ERROR",
            Self::DbError => "DB_ERROR",
            Self::Internal => "INTERNAL",
            Self::IndexerFollower => "ERR_INDEXER_FOLLOWER",
            Self::IndexerDisabled => "ERR_INDEXER_DISABLED",
            Self::RootOutOfScope => "ERR_ROOT_OUT_OF_SCOPE",
            Self::EngineNotInstalled => "ERR_ENGINE_NOT_INSTALLED",
            Self::EngineInit => "ERR_ENGINE_INIT",
            Self::EngineQuery => "ERR_ENGINE_QUERY",
            Self::EngineIndex => "ERR_ENGINE_INDEX",
            Self::EngineUnavailable => "ERR_ENGINE_UNAVAILABLE",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::SearchFirstRequired => "SEARCH_FIRST_REQUIRED",
            Self::SearchRefRequired => "SEARCH_REF_REQUIRED",
            Self::CandidateRefRequired => "CANDIDATE_REF_REQUIRED",
            Self::StrictSessionIdRequired => "STRICT_SESSION_ID_REQUIRED",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::SymbolResolutionFailed => "SYMBOL_RESOLUTION_FAILED",
            Self::SymbolKindInvalid => "SYMBOL_KIND_INVALID",
            Self::SymbolBlockMismatch => "SYMBOL_BLOCK_MISMATCH",
            Self::NoResults => "NO_RESULTS",
            Self::PreviewDegraded => "PREVIEW_DEGRADED",
        }
    }
}

impl fmt::Display for ToolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured tool-level error.
///
/// Carries everything the response encoder needs for both PACK1 and JSON
/// error forms, plus optional `next_calls` templates so agents can recover
/// without guessing.
#[derive(Error, Debug, Clone)]
#[error("{code}: {message}")]
pub struct ToolError {
    pub code: ToolCode,
    pub message: String,
    pub hint: Option<String>,
    /// Extra key=value pairs for the PACK1 error line / JSON error data.
    pub fields: Vec<(String, String)>,
    /// Suggested follow-up tool invocations.
    pub next_calls: Vec<serde_json::Value>,
}

impl ToolError {
    #[must_use]
    pub fn new(code: ToolCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            hint: None,
            fields: Vec::new(),
            next_calls: Vec::new(),
        }
    }

    #[must_use]
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::new(ToolCode::InvalidArgs, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ToolCode::Internal, message)
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_next_call(mut self, call: serde_json::Value) -> Self {
        self.next_calls.push(call);
        self
    }
}

impl From<DbError> for ToolError {
    fn from(err: DbError) -> Self {
        Self::new(ToolCode::DbError, err.to_string())
    }
}

impl From<IndexError> for ToolError {
    fn from(err: IndexError) -> Self {
        let code = match err {
            IndexError::Follower => ToolCode::IndexerFollower,
            IndexError::Disabled => ToolCode::IndexerDisabled,
            _ => ToolCode::Internal,
        };
        Self::new(code, err.to_string())
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ToolCode::IoError, err.to_string())
    }
}
