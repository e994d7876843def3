//! Stabilization policy behavior: read gate, budgets, candidate refs,
//! relevance, evidence invariants.

mod common;

use common::{error_code, python_workspace, TestEnv};
use sari::settings::GateMode;
use sari::Settings;
use serde_json::json;

fn enforce_env() -> TestEnv {
    let settings = Settings {
        read_gate_mode: GateMode::Enforce,
        ..Settings::default()
    };
    let env = TestEnv::with_settings(settings);
    env.write_file("app.py", "def hello():\n    return \"hi\"\n");
    env.scan();
    env
}

#[test]
fn test_enforce_gate_requires_search_first() {
    let env = enforce_env();
    let response = env.read(json!({
        "mode": "file",
        "target": "app.py",
        "session_id": "s-gate",
    }));
    assert!(response.is_error);
    assert_eq!(error_code(&response), "SEARCH_FIRST_REQUIRED");
    // Policy denials carry concrete recovery templates.
    let next = &response.json["meta"]["stabilization"]["next_calls"];
    assert_eq!(next[0]["tool"], "search");
}

#[test]
fn test_candidate_authorizes_read_and_evidence_attaches() {
    let env = enforce_env();
    let payload = env.search(json!({ "query": "hello", "session_id": "s-cand" }));
    let first = &payload["results"][0];
    let candidate = first["candidate_id"].as_str().unwrap().to_string();
    let path = first["path"].as_str().unwrap().to_string();

    let read = env.read_ok(json!({
        "mode": "file",
        "target": path,
        "candidate_id": candidate,
        "session_id": "s-cand",
    }));
    let evidence = &read["meta"]["stabilization"]["evidence_refs"];
    let refs = evidence.as_array().unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0]["kind"], "file");
    assert_eq!(refs[0]["start_line"], 1);
    assert!(!refs[0]["content_hash"].as_str().unwrap().is_empty());
}

#[test]
fn test_candidate_binding_rejects_other_path_and_session() {
    let env = enforce_env();
    env.write_file("other.py", "x = 1\n");
    env.scan();

    let payload = env.search(json!({ "query": "hello", "session_id": "s-bind" }));
    let candidate = payload["results"][0]["candidate_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Same session, different path.
    let response = env.read(json!({
        "mode": "file",
        "target": "other.py",
        "candidate_id": candidate,
        "session_id": "s-bind",
    }));
    assert!(response.is_error);
    assert_eq!(error_code(&response), "CANDIDATE_REF_REQUIRED");

    // Different session, correct path.
    let path = payload["results"][0]["path"].as_str().unwrap();
    let response = env.read(json!({
        "mode": "file",
        "target": path,
        "candidate_id": candidate,
        "session_id": "s-other",
    }));
    assert!(response.is_error);
    assert_eq!(error_code(&response), "CANDIDATE_REF_REQUIRED");
}

#[test]
fn test_budget_soft_limit_auto_chunks() {
    let env = TestEnv::new();
    let body: String = (1..=400).map(|i| format!("line_{i}\n")).collect();
    env.write_file("big.py", &body);
    env.scan();

    let payload = env.read_ok(json!({
        "mode": "file",
        "target": "big.py",
        "limit": 1000,
        "session_id": "s-soft",
    }));
    assert_eq!(payload["metadata"]["limit"], 200);
    let text = payload["content"][0]["text"].as_str().unwrap();
    assert_eq!(text.lines().count(), 200);

    let stab = &payload["meta"]["stabilization"];
    assert_eq!(stab["budget_state"], "SOFT_LIMIT");
    let warnings = stab["warnings"].as_array().unwrap();
    assert!(warnings
        .iter()
        .any(|w| w.as_str().unwrap().contains("Auto-chunked read limit to max_range_lines=200")));
}

#[test]
fn test_budget_hard_limit_after_unsearched_reads() {
    let settings = Settings {
        session_read_budget: 5,
        ..Settings::default()
    };
    let env = TestEnv::with_settings(settings);
    env.write_file("a.py", "x = 1\n");
    env.scan();

    for _ in 0..5 {
        let payload = env.read(json!({
            "mode": "file",
            "target": "a.py",
            "session_id": "s-budget",
        }));
        assert!(!payload.is_error);
    }
    let denied = env.read(json!({
        "mode": "file",
        "target": "a.py",
        "session_id": "s-budget",
    }));
    assert!(denied.is_error);
    assert_eq!(error_code(&denied), "BUDGET_EXCEEDED");

    // A search resets the since-search budget.
    env.search(json!({ "query": "x", "session_id": "s-budget" }));
    let allowed = env.read(json!({
        "mode": "file",
        "target": "a.py",
        "session_id": "s-budget",
    }));
    assert!(!allowed.is_error);
}

#[test]
fn test_relevance_guard_flags_off_topic_reads() {
    let env = python_workspace();
    env.write_file("unrelated.py", "nothing to see\n");
    env.scan();

    env.search(json!({ "query": "hello", "session_id": "s-rel" }));
    let payload = env.read_ok(json!({
        "mode": "file",
        "target": "unrelated.py",
        "session_id": "s-rel",
    }));
    let stab = &payload["meta"]["stabilization"];
    assert_eq!(stab["relevance_code"], "LOW_RELEVANCE_OUTSIDE_TOPK");
    assert_eq!(stab["suggested_next_action"], "search");
    let alternatives = stab["alternatives"].as_array().unwrap();
    assert!(!alternatives.is_empty());
    assert!(alternatives
        .iter()
        .any(|a| a.as_str().unwrap().ends_with("app.py")));
}

#[test]
fn test_strict_session_id_required() {
    let settings = Settings {
        strict_session_id: true,
        ..Settings::default()
    };
    let env = TestEnv::with_settings(settings);
    env.write_file("a.py", "x = 1\n");
    env.scan();

    let denied = env.read(json!({ "mode": "file", "target": "a.py" }));
    assert!(denied.is_error);
    assert_eq!(error_code(&denied), "STRICT_SESSION_ID_REQUIRED");

    let allowed = env.read(json!({
        "mode": "file",
        "target": "a.py",
        "session_id": "s-strict",
    }));
    assert!(!allowed.is_error);
}

#[test]
fn test_session_metrics_are_monotonic() {
    let env = python_workspace();
    let mut last_reads = 0u64;
    for _ in 0..4 {
        let payload = env.read_ok(json!({
            "mode": "file",
            "target": "app.py",
            "session_id": "s-mono",
        }));
        let reads = payload["meta"]["stabilization"]["metrics_snapshot"]["reads_count"]
            .as_u64()
            .unwrap();
        assert!(reads > last_reads);
        last_reads = reads;
    }
}

#[test]
fn test_identical_reads_share_a_bundle() {
    let env = python_workspace();
    let first = env.read_ok(json!({
        "mode": "file",
        "target": "app.py",
        "session_id": "s-bundle",
    }));
    let second = env.read_ok(json!({
        "mode": "file",
        "target": "app.py",
        "session_id": "s-bundle",
    }));
    let b1 = first["meta"]["stabilization"]["context_bundle_id"]
        .as_str()
        .unwrap();
    let b2 = second["meta"]["stabilization"]["context_bundle_id"]
        .as_str()
        .unwrap();
    assert_eq!(b1, b2);
}

#[test]
fn test_successful_reads_always_carry_evidence() {
    let env = python_workspace();
    for args in [
        json!({ "mode": "file", "target": "app.py", "session_id": "s-ev" }),
        json!({ "mode": "symbol", "name": "hello", "session_id": "s-ev" }),
        json!({ "mode": "snippet", "target": "app.py", "start_line": 1, "end_line": 2, "session_id": "s-ev" }),
        json!({ "mode": "diff_preview", "target": "app.py", "session_id": "s-ev" }),
    ] {
        let payload = env.read_ok(args.clone());
        let stab = &payload["meta"]["stabilization"];
        let reasons: Vec<&str> = stab["reason_codes"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if !reasons.contains(&"NO_RESULTS") {
            let refs = stab["evidence_refs"].as_array().unwrap();
            assert!(!refs.is_empty(), "no evidence for {args}");
        }
    }
}

#[test]
fn test_empty_snippet_recall_is_no_results() {
    let env = python_workspace();
    let payload = env.read_ok(json!({
        "mode": "snippet",
        "tag": "no-such-tag",
        "session_id": "s-empty",
    }));
    let stab = &payload["meta"]["stabilization"];
    let reasons = stab["reason_codes"].as_array().unwrap();
    assert!(reasons.iter().any(|r| r == "NO_RESULTS"));
    assert!(stab["evidence_refs"].as_array().unwrap().is_empty());
}

#[test]
fn test_read_out_of_scope_target() {
    let env = python_workspace();
    let response = env.read(json!({
        "mode": "file",
        "target": "/etc/passwd",
        "session_id": "s-scope",
    }));
    assert!(response.is_error);
    assert_eq!(error_code(&response), "ERR_ROOT_OUT_OF_SCOPE");
}

#[test]
fn test_read_unindexed_target_suggests_indexing() {
    let env = python_workspace();
    env.write_file("fresh.py", "just created\n");
    // No rescan: the file exists on disk but not in the index.
    let response = env.read(json!({
        "mode": "file",
        "target": "fresh.py",
        "session_id": "s-fresh",
    }));
    assert!(response.is_error);
    assert_eq!(error_code(&response), "NOT_INDEXED");
    let next = &response.json["meta"]["stabilization"]["next_calls"];
    assert_eq!(next[0]["tool"], "index_file");
}
