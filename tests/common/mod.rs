//! Common test utilities for sari integration tests.
//!
//! Provides `TestEnv` for setting up isolated environments with a
//! temporary workspace, a private database, and the full service wired
//! together.

#![allow(dead_code)] // Test utilities may not all be used in every test file

use sari::tools::ToolContext;
use sari::{Service, Settings};
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A complete test environment with all services wired together.
pub struct TestEnv {
    pub dir: TempDir,
    pub service: Service,
}

impl TestEnv {
    /// Creates a new empty test environment with default settings.
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    /// Creates an environment with custom settings (gate mode, budgets).
    pub fn with_settings(settings: Settings) -> Self {
        let dir = TempDir::new().expect("create temp directory");
        let ws = dir.path().join("ws");
        fs::create_dir_all(&ws).expect("create workspace");
        let db = dir.path().join("cache").join("index.db");
        let service = Service::new(&ws, Some(db), settings).expect("create service");
        Self { dir, service }
    }

    pub fn ctx(&self) -> &ToolContext {
        &self.service.ctx
    }

    /// Workspace root on disk.
    pub fn ws(&self) -> PathBuf {
        self.dir.path().join("ws")
    }

    /// Writes a file into the workspace.
    pub fn write_file(&self, name: &str, content: &str) {
        let path = self.ws().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent directories");
        }
        fs::write(&path, content).expect("write test file");
    }

    /// Runs one blocking scan over the workspace.
    pub fn scan(&self) {
        self.ctx().indexer.scan_once().expect("scan_once");
        self.ctx().store.flush();
    }

    /// Invokes the search tool and returns the JSON payload.
    pub fn search(&self, args: Value) -> Value {
        let response = sari::tools::execute_search(self.ctx(), &args);
        assert!(
            !response.is_error,
            "search failed: {}",
            response.json
        );
        response.json
    }

    /// Invokes the read tool, returning the raw response.
    pub fn read(&self, args: Value) -> sari::pack::ToolResponse {
        sari::tools::execute_read(self.ctx(), &args)
    }

    /// Convenience: a successful file read's payload.
    pub fn read_ok(&self, args: Value) -> Value {
        let response = self.read(args);
        assert!(!response.is_error, "read failed: {}", response.json);
        response.json
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a test environment with a small indexed python workspace.
pub fn python_workspace() -> TestEnv {
    let env = TestEnv::new();
    env.write_file(
        "app.py",
        "def hello():\n    return \"hi\"\n\ndef main():\n    return hello()\n",
    );
    env.write_file("README.md", "# Demo\nSay hello to the demo project.\n");
    env.write_file(
        "lib/util.py",
        "def helper():\n    return 1\n",
    );
    env.scan();
    env
}

/// First error code of a response, for error-path assertions.
pub fn error_code(response: &sari::pack::ToolResponse) -> String {
    response.json["error"]["code"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

/// Shorthand for search-with-query.
pub fn query(q: &str) -> Value {
    json!({ "query": q })
}
