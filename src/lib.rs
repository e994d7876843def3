//! sari: workspace-scoped code search and retrieval over MCP.
//!
//! The server keeps a persistent FTS5 index of one or more workspace
//! roots in sync with the source tree and answers structured queries
//! through MCP tools, with a stabilization layer that keeps the surface
//! usable by automated agents (budgets, evidence refs, next-call hints).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │      MCP transport (Content-Length/JSONL)    │
//! │        request queue + worker pool           │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │               Tool registry                  │
//! │  search, read, list_*, call_graph, doctor…   │
//! └───────┬───────────────────┬─────────────────┘
//!         │                   │
//! ┌───────▼────────┐  ┌───────▼─────────────────┐
//! │ Stabilization  │  │     Query engine         │
//! │ budgets/gates  │  │  FTS5 bm25 + boosts      │
//! └────────────────┘  └───────┬─────────────────┘
//!                             │
//! ┌───────────────────────────▼─────────────────┐
//! │                  Store                       │
//! │   r2d2 readers · single writer thread        │
//! └───────────────────────────▲─────────────────┘
//!                             │
//! ┌───────────────────────────┴─────────────────┐
//! │  Indexer: scanner → extractor pool → writer  │
//! │        (resource-governed concurrency)       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod error;
pub mod extract;
pub mod indexer;
pub mod mcp;
pub mod pack;
pub mod scanner;
pub mod service;
pub mod settings;
pub mod stabilize;
pub mod store;
pub mod tools;
pub mod types;
pub mod workspace;

pub use error::{Result, ServerError, ToolCode, ToolError};
pub use service::Service;
pub use settings::Settings;

/// Server version reported through `initialize` and `sari/identify`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
