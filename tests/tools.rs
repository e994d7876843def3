//! End-to-end tool behavior over an indexed workspace.

mod common;

use common::{error_code, python_workspace, TestEnv};
use sari::Settings;
use serde_json::json;

#[test]
fn test_code_search_finds_both_files() {
    let env = python_workspace();
    let payload = env.search(json!({ "query": "hello", "search_type": "code" }));
    let results = payload["results"].as_array().unwrap();
    assert_eq!(results.len(), 2, "expected app.py and README.md: {payload}");
    assert!(results.iter().all(|r| r["type"] == "code"));
    assert_eq!(payload["meta"]["total"], 2);
}

#[test]
fn test_symbol_search_finds_only_the_function() {
    let env = python_workspace();
    let payload = env.search(json!({ "query": "hello", "search_type": "symbol" }));
    let results = payload["results"].as_array().unwrap();
    assert_eq!(results.len(), 1, "payload: {payload}");
    assert_eq!(results[0]["type"], "symbol");
    assert_eq!(results[0]["identity"], "hello");
    assert_eq!(results[0]["extra"]["kind"], "function");
    assert!(results[0]["location"]["line"].as_u64().unwrap() >= 1);
}

#[test]
fn test_auto_search_infers_symbol_then_falls_back() {
    let env = python_workspace();
    // Identifier-shaped query resolves as a symbol search.
    let payload = env.search(json!({ "query": "hello", "search_type": "auto" }));
    assert_eq!(payload["meta"]["search_type"], "symbol");

    // Identifier with no symbol match falls back to code search.
    let payload = env.search(json!({ "query": "project", "search_type": "auto" }));
    assert_eq!(payload["meta"]["search_type"], "code");
    assert_eq!(payload["meta"]["fallback_used"], true);
    assert!(!payload["results"].as_array().unwrap().is_empty());
}

#[test]
fn test_mode_scoped_params_rejected() {
    let env = python_workspace();
    let response =
        sari::tools::execute_search(env.ctx(), &json!({ "query": "x", "kinds": ["function"] }));
    assert!(response.is_error);
    assert_eq!(error_code(&response), "INVALID_ARGS");

    let response = sari::tools::execute_search(
        env.ctx(),
        &json!({ "query": "x", "search_type": "symbol", "method": "GET" }),
    );
    assert!(response.is_error);
    assert_eq!(error_code(&response), "INVALID_ARGS");
}

#[test]
fn test_limit_domain_enforced() {
    let env = python_workspace();
    let response =
        sari::tools::execute_search(env.ctx(), &json!({ "query": "hello", "limit": 500 }));
    assert!(response.is_error);
    assert_eq!(error_code(&response), "INVALID_ARGS");
}

#[test]
fn test_unknown_arg_rejected() {
    let env = python_workspace();
    let response =
        sari::tools::execute_search(env.ctx(), &json!({ "query": "x", "bogus_flag": true }));
    assert!(response.is_error);
    assert_eq!(error_code(&response), "INVALID_ARGS");
}

#[test]
fn test_search_issues_candidates() {
    let env = python_workspace();
    let payload = env.search(json!({ "query": "hello" }));
    let results = payload["results"].as_array().unwrap();
    assert!(results
        .iter()
        .all(|r| r["candidate_id"].as_str().is_some_and(|c| c.starts_with('c'))));
    assert!(!payload["candidates"].as_object().unwrap().is_empty());
}

#[test]
fn test_cjk_search_and_tokenizer_status() {
    let env = TestEnv::new();
    env.write_file("notes.md", "# 메모\n네이버 검색 연동을 정리한다\n");
    env.scan();

    let payload = env.search(json!({ "query": "네이버" }));
    assert_eq!(payload["results"].as_array().unwrap().len(), 1);

    let status = sari::tools::execute_status(env.ctx(), &json!({}));
    assert_eq!(status.json["engine"]["engine_tokenizer_ready"], true);
    assert_eq!(
        status.json["engine"]["engine_tokenizer_bundle_tag"],
        "builtin"
    );
}

#[test]
fn test_repo_search() {
    let env = TestEnv::new();
    env.write_file("backend/a.py", "token alpha\n");
    env.write_file("backend/b.py", "token beta\n");
    env.write_file("frontend/c.js", "token gamma\n");
    env.scan();

    let payload = env.search(json!({ "query": "token", "search_type": "repo" }));
    let results = payload["results"].as_array().unwrap();
    assert_eq!(results[0]["identity"], "backend");
    assert_eq!(results[0]["extra"]["score"], 2);
}

#[test]
fn test_api_search() {
    let env = TestEnv::new();
    env.write_file(
        "routes.py",
        "@app.route(\"/api/users\", methods=[\"GET\"])\ndef list_users():\n    return []\n",
    );
    env.scan();
    let payload = env.search(json!({ "query": "/api/users", "search_type": "api" }));
    let results = payload["results"].as_array().unwrap();
    assert!(!results.is_empty(), "payload: {payload}");
    assert_eq!(results[0]["identity"], "/api/users");
}

#[test]
fn test_list_files_summary_and_detail() {
    let env = TestEnv::new();
    env.write_file("backend/a.py", "a = 1\n");
    env.write_file("backend/b.py", "b = 2\n");
    env.write_file("frontend/c.js", "var c = 3;\n");
    env.scan();

    let summary = sari::tools::execute_list_files(env.ctx(), &json!({}));
    assert!(!summary.is_error);
    assert_eq!(summary.json["repos_total"], 2);
    assert_eq!(summary.json["truncated"], false);

    let detail = sari::tools::execute_list_files(env.ctx(), &json!({ "repo": "backend" }));
    assert!(!detail.is_error);
    let files = detail.json["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(detail.json["meta"]["total"], 2);

    let missing = sari::tools::execute_list_files(env.ctx(), &json!({ "repo": "nope" }));
    assert!(missing.is_error);
    assert_eq!(error_code(&missing), "REPO_NOT_FOUND");
}

#[test]
fn test_list_files_summary_stays_under_budget() {
    let settings = Settings {
        list_files_budget_bytes: 256,
        ..Settings::default()
    };
    let env = TestEnv::with_settings(settings);
    for i in 0..40 {
        env.write_file(&format!("repo{i:02}/file.py"), "x = 1\n");
    }
    env.scan();

    let summary = sari::tools::execute_list_files(env.ctx(), &json!({}));
    let returned = summary.json["repos_returned"].as_u64().unwrap();
    let total = summary.json["repos_total"].as_u64().unwrap();
    assert_eq!(total, 40);
    assert!(returned < total);
    assert_eq!(summary.json["truncated"], true);
}

#[test]
fn test_list_symbols_tree() {
    let env = TestEnv::new();
    env.write_file(
        "shapes.py",
        "class Circle:\n    def area(self):\n        return 3\n\ndef top():\n    pass\n",
    );
    env.scan();

    let response = sari::tools::execute_list_symbols(env.ctx(), &json!({ "target": "shapes.py" }));
    assert!(!response.is_error, "{}", response.json);
    let symbols = response.json["symbols"].as_array().unwrap();
    let circle = symbols
        .iter()
        .find(|s| s["name"] == "Circle")
        .expect("class node");
    let children = circle["children"].as_array().expect("children");
    assert!(children.iter().any(|c| c["name"] == "area"));
    assert!(symbols.iter().any(|s| s["name"] == "top"));
}

#[test]
fn test_get_callers_and_call_graph() {
    let env = TestEnv::new();
    env.write_file(
        "flow.py",
        "def leaf():\n    return 1\n\ndef middle():\n    return leaf()\n\ndef top():\n    return middle()\n",
    );
    env.scan();

    let callers = sari::tools::execute_get_callers(env.ctx(), &json!({ "symbol": "leaf" }));
    assert!(!callers.is_error);
    let list = callers.json["callers"].as_array().unwrap();
    assert!(list.iter().any(|c| c["from_symbol"] == "middle"));

    let graph = sari::tools::execute_call_graph(
        env.ctx(),
        &json!({ "symbol": "top", "direction": "out", "max_depth": 3 }),
    );
    assert!(!graph.is_error);
    let nodes: Vec<&str> = graph.json["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["symbol"].as_str())
        .collect();
    assert!(nodes.contains(&"top"));
    assert!(nodes.contains(&"middle"));
    assert!(nodes.contains(&"leaf"));
    assert_eq!(graph.json["truncated"], false);
}

#[test]
fn test_call_graph_respects_node_cap() {
    let env = TestEnv::new();
    let mut src = String::new();
    for i in 0..20 {
        src.push_str(&format!("def f{i}():\n    return f{}()\n\n", (i + 1) % 20));
    }
    env.write_file("chain.py", &src);
    env.scan();

    let graph = sari::tools::execute_call_graph(
        env.ctx(),
        &json!({ "symbol": "f0", "max_depth": 10, "max_nodes": 5 }),
    );
    assert!(!graph.is_error);
    assert!(graph.json["nodes"].as_array().unwrap().len() <= 5);
    assert_eq!(graph.json["truncated"], true);
}

#[test]
fn test_knowledge_save_recall_delete() {
    let env = TestEnv::new();
    let content = "Deploys go through the release pipeline.";
    let token = sari::tools::make_context_ref(content);

    let saved = sari::tools::execute_knowledge(
        env.ctx(),
        &json!({
            "action": "save",
            "topic": "deploy-process",
            "content": content,
            "context_ref": token,
            "tags": ["ops"],
        }),
    );
    assert!(!saved.is_error, "{}", saved.json);

    let recalled = sari::tools::execute_knowledge(
        env.ctx(),
        &json!({ "action": "recall", "topic": "deploy-process" }),
    );
    assert!(!recalled.is_error);
    let contexts = recalled.json["contexts"].as_array().unwrap();
    assert_eq!(contexts[0]["topic"], "deploy-process");
    assert!(contexts[0]["content"].as_str().unwrap().contains("release"));

    // "search" is accepted as an alias of recall.
    let via_alias = sari::tools::execute_knowledge(
        env.ctx(),
        &json!({ "action": "search", "query": "release pipeline" }),
    );
    assert!(!via_alias.is_error);
    assert!(!via_alias.json["contexts"].as_array().unwrap().is_empty());

    let deleted = sari::tools::execute_knowledge(
        env.ctx(),
        &json!({ "action": "delete", "topic": "deploy-process" }),
    );
    assert_eq!(deleted.json["deleted"], 1);
}

#[test]
fn test_knowledge_save_requires_matching_ref() {
    let env = TestEnv::new();
    let bad = sari::tools::execute_knowledge(
        env.ctx(),
        &json!({
            "action": "save",
            "topic": "t",
            "content": "actual content",
            "context_ref": "cr1:000000000000",
        }),
    );
    assert!(bad.is_error);
    assert_eq!(error_code(&bad), "INVALID_ARGS");

    let missing = sari::tools::execute_knowledge(
        env.ctx(),
        &json!({ "action": "save", "topic": "t", "content": "x" }),
    );
    assert!(missing.is_error);
}

#[test]
fn test_knowledge_snippet_roundtrip() {
    let env = TestEnv::new();
    env.write_file("auth.py", "def check():\n    return True\n");
    env.scan();

    let content = "def check():\n    return True";
    let token = sari::tools::make_context_ref(content);
    let saved = sari::tools::execute_knowledge(
        env.ctx(),
        &json!({
            "action": "save",
            "tag": "auth-check",
            "path": "auth.py",
            "start_line": 1,
            "end_line": 2,
            "content": content,
            "context_ref": token,
            "note": "the auth gate",
        }),
    );
    assert!(!saved.is_error, "{}", saved.json);

    let read = env.read_ok(json!({ "mode": "snippet", "tag": "auth-check" }));
    let results = read["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0]["content"].as_str().unwrap().contains("check"));
    assert_eq!(results[0]["remapped"], false);
}

#[test]
fn test_status_reports_index_and_queues() {
    let env = python_workspace();
    let status = sari::tools::execute_status(env.ctx(), &json!({}));
    assert!(!status.is_error);
    assert_eq!(status.json["index"]["index_ready"], true);
    assert_eq!(status.json["index"]["phase"], "idle");
    assert!(status.json["storage"]["file_count"].as_i64().unwrap() >= 3);
    assert!(status.json["index"]["last_scan_ts"].as_i64().unwrap() > 0);
    assert_eq!(status.json["storage"]["failed_tasks"], 0);
}

#[test]
fn test_scan_once_counts() {
    let env = TestEnv::new();
    env.write_file("one.py", "x = 1\n");
    env.write_file("two.py", "y = 2\n");
    let response = sari::tools::execute_scan_once(env.ctx(), &json!({}));
    assert!(!response.is_error);
    assert_eq!(response.json["scanned_files"], 2);
    assert_eq!(response.json["indexed_files"], 2);
}

#[test]
fn test_index_file_tool() {
    let env = TestEnv::new();
    env.write_file("hot.py", "def hot():\n    return 1\n");
    let response =
        sari::tools::execute_index_file(env.ctx(), &json!({ "path": "hot.py" }));
    assert!(!response.is_error, "{}", response.json);
    assert_eq!(response.json["ok"], true);
    assert!(env
        .ctx()
        .indexer
        .wait_for_drain(std::time::Duration::from_secs(5)));
    env.ctx().store.flush();
    assert_eq!(env.ctx().store.file_count(None).unwrap(), 1);
}

#[test]
fn test_doctor_on_healthy_service() {
    let env = python_workspace();
    let report = sari::tools::execute_doctor(env.ctx(), &json!({}));
    assert!(!report.is_error);
    let results = report.json["results"].as_array().unwrap();
    let get = |name: &str| {
        results
            .iter()
            .find(|r| r["name"] == name)
            .unwrap_or_else(|| panic!("missing check {name}"))
    };
    assert_eq!(get("Sari Daemon")["status"], "ok");
    assert_eq!(get("DB Access")["status"], "ok");
    assert_eq!(get("Writer Health")["status"], "ok");
}

#[cfg(unix)]
#[test]
fn test_doctor_flags_unwritable_db_dir() {
    use std::os::unix::fs::PermissionsExt;

    let env = python_workspace();
    let db_dir = env.ctx().store.db_path().parent().unwrap().to_path_buf();
    let original = std::fs::metadata(&db_dir).unwrap().permissions();
    std::fs::set_permissions(&db_dir, std::fs::Permissions::from_mode(0o500)).unwrap();

    // Root ignores permission bits; nothing to observe in that case.
    let still_writable = std::fs::write(db_dir.join(".probe"), b"x").is_ok();
    let _ = std::fs::remove_file(db_dir.join(".probe"));
    if still_writable {
        std::fs::set_permissions(&db_dir, original).unwrap();
        return;
    }

    let report = sari::tools::execute_doctor(env.ctx(), &json!({}));
    std::fs::set_permissions(&db_dir, original).unwrap();

    let results = report.json["results"].as_array().unwrap();
    let db_access = results.iter().find(|r| r["name"] == "DB Access").unwrap();
    assert_eq!(db_access["status"], "fail");
    assert!(!report.json["recommendations"].as_array().unwrap().is_empty());
}

#[test]
fn test_read_modes_reject_cross_params() {
    let env = python_workspace();
    let response = env.read(json!({
        "mode": "file",
        "target": "app.py",
        "against": "HEAD",
    }));
    assert!(response.is_error);
    assert_eq!(error_code(&response), "INVALID_ARGS");
}

#[test]
fn test_diff_preview_reports_changes() {
    let env = python_workspace();
    // Change the on-disk file after indexing.
    env.write_file(
        "app.py",
        "def hello():\n    return \"changed\"\n\ndef main():\n    return hello()\n",
    );
    let payload = env.read_ok(json!({
        "mode": "diff_preview",
        "target": "app.py",
        "against": "INDEX",
    }));
    assert_eq!(payload["changed"], true);
    assert!(payload["diff"].as_str().unwrap().contains("changed"));
    assert!(payload["additions"].as_u64().unwrap() >= 1);
}
