//! Stabilization layer: the guards, bundles, and hints that make the tool
//! surface robust to LLM misuse.
//!
//! All state is owned by one [`Stabilization`] value passed through the
//! tool context; there are no globals, and every collection is bounded
//! (LRU or ring buffer) so adversarial load cannot grow memory without
//! limit. Session counters are monotonically non-decreasing under the
//! state lock, and `record_search` always precedes the reads it
//! influences because both take that same lock.

use crate::error::{ToolCode, ToolError};
use crate::settings::{GateMode, Settings};
use lru::LruCache;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Mutex;
use xxhash_rust::xxh3::xxh3_64;

const WARNING_CODE_CAP: usize = 64;
const WARNING_RING_CAP: usize = 128;

/// Resolved session key: `ws:<hash(roots)>:(sid:…|conn:…|conn:unknown)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(pub String);

impl SessionKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-session metrics. Counters never decrease.
#[derive(Debug, Clone, Default)]
struct SessionMetrics {
    reads_count: u64,
    reads_lines_total: u64,
    reads_chars_total: u64,
    search_count: u64,
    read_span_sum: u64,
    max_read_span: u64,
    preview_degraded_count: u64,
    reads_after_search_count: u64,
    reads_since_search: u64,
    last_search_query: String,
    last_search_top_paths: Vec<String>,
    last_search_candidates: ahash::AHashMap<String, String>,
    last_bundle_id: String,
    last_seen_seq: u64,
}

/// Serializable snapshot attached to read responses.
#[derive(Debug, Clone, Serialize, Default)]
pub struct MetricsSnapshot {
    pub reads_count: u64,
    pub reads_lines_total: u64,
    pub reads_chars_total: u64,
    pub search_count: u64,
    pub read_after_search_ratio: f64,
    pub avg_read_span: f64,
    pub max_read_span: u64,
    pub preview_degraded_count: u64,
}

/// What the last search in the session established.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    pub last_query: String,
    pub top_paths: Vec<String>,
    pub candidates: Vec<(String, String)>,
    pub search_count: u64,
}

/// Budget verdict for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetState {
    Ok,
    SoftLimit,
    HardLimit,
}

impl BudgetState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::SoftLimit => "SOFT_LIMIT",
            Self::HardLimit => "HARD_LIMIT",
        }
    }
}

/// Relevance verdict for a read target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relevance {
    Ok,
    /// Target not among the last search's top-K paths.
    OutsideTopK { alternatives: Vec<String> },
}

/// A structured citation naming the bytes that informed a read answer.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceRef {
    pub kind: &'static str,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
}

/// One bundle of deduplicated reads within a session.
#[derive(Debug, Clone)]
struct Bundle {
    id: String,
    items: Vec<u64>,
}

#[derive(Debug, Default)]
struct SessionBundles {
    bundles: Vec<Bundle>,
}

struct StabState {
    sessions: LruCache<String, SessionMetrics>,
    bundles: LruCache<String, SessionBundles>,
    warning_counts: ahash::AHashMap<String, u64>,
    warning_ring: VecDeque<(String, String)>,
    seq: u64,
}

/// Owned stabilization component; shared behind the tool context.
pub struct Stabilization {
    state: Mutex<StabState>,
    gate_mode: GateMode,
    strict_session_id: bool,
    max_range_lines: usize,
    read_budget: usize,
    bundle_items_cap: usize,
    relevance_top_k: usize,
}

impl Stabilization {
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        let cap = NonZeroUsize::new(settings.session_cap.max(1)).expect("nonzero session cap");
        Self {
            state: Mutex::new(StabState {
                sessions: LruCache::new(cap),
                bundles: LruCache::new(cap),
                warning_counts: ahash::AHashMap::new(),
                warning_ring: VecDeque::new(),
                seq: 0,
            }),
            gate_mode: settings.read_gate_mode,
            strict_session_id: settings.strict_session_id,
            max_range_lines: settings.max_range_lines,
            read_budget: settings.session_read_budget,
            bundle_items_cap: settings.bundle_items_cap,
            relevance_top_k: settings.relevance_top_k,
        }
    }

    #[must_use]
    pub fn gate_mode(&self) -> GateMode {
        self.gate_mode
    }

    #[must_use]
    pub fn max_range_lines(&self) -> usize {
        self.max_range_lines
    }

    /// Resolves the session key from call args and the workspace roots.
    /// `session_id` wins over `connection_id`.
    #[must_use]
    pub fn session_key(&self, args: &Value, roots: &[PathBuf]) -> SessionKey {
        let ws_hash = {
            let joined = roots
                .iter()
                .map(|r| r.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("|");
            format!("{:08x}", xxh3_64(joined.as_bytes()) as u32)
        };
        let sid = args
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let conn = args
            .get("connection_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let suffix = match (sid, conn) {
            (Some(sid), _) => format!("sid:{sid}"),
            (None, Some(conn)) => format!("conn:{conn}"),
            (None, None) => "conn:unknown".to_string(),
        };
        SessionKey(format!("ws:{ws_hash}:{suffix}"))
    }

    /// Strict-mode check: reads must carry a `session_id`.
    ///
    /// # Errors
    ///
    /// `STRICT_SESSION_ID_REQUIRED` when strict mode is on and the args
    /// carry no usable `session_id`.
    pub fn require_session_id(&self, args: &Value) -> Result<(), ToolError> {
        if !self.strict_session_id {
            return Ok(());
        }
        let present = args
            .get("session_id")
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty());
        if present {
            Ok(())
        } else {
            Err(ToolError::new(
                ToolCode::StrictSessionIdRequired,
                "session_id is required on reads in strict mode",
            )
            .with_hint("pass a stable session_id argument on every read call"))
        }
    }

    /// Records a search, issuing candidate ids for the top paths.
    /// Returns `(candidate_id, path)` pairs in rank order.
    #[must_use]
    pub fn record_search(
        &self,
        key: &SessionKey,
        query: &str,
        top_paths: &[String],
        preview_degraded: bool,
    ) -> Vec<(String, String)> {
        let mut state = self.lock();
        state.seq += 1;
        let seq = state.seq;
        let session = get_session(&mut state, key);
        session.search_count += 1;
        session.reads_since_search = 0;
        session.last_seen_seq = seq;
        session.last_search_query = query.trim().to_string();
        if preview_degraded {
            session.preview_degraded_count += 1;
        }

        let mut pairs = Vec::new();
        if !top_paths.is_empty() {
            session.last_search_top_paths = top_paths.to_vec();
            session.last_search_candidates.clear();
            for (rank, path) in top_paths.iter().enumerate() {
                let id = format!(
                    "c{:012x}",
                    xxh3_64(format!("{}|{path}|{seq}|{rank}", key.as_str()).as_bytes())
                        & 0xffff_ffff_ffff
                );
                session
                    .last_search_candidates
                    .insert(id.clone(), path.clone());
                pairs.push((id, path.clone()));
            }
        }
        pairs
    }

    /// Records a read's volume into the session counters.
    #[must_use]
    pub fn record_read(
        &self,
        key: &SessionKey,
        read_lines: u64,
        read_chars: u64,
        read_span: u64,
    ) -> MetricsSnapshot {
        let mut state = self.lock();
        state.seq += 1;
        let seq = state.seq;
        let session = get_session(&mut state, key);
        session.reads_count += 1;
        session.reads_since_search += 1;
        session.last_seen_seq = seq;
        session.reads_lines_total += read_lines;
        session.reads_chars_total += read_chars;
        session.read_span_sum += read_span;
        session.max_read_span = session.max_read_span.max(read_span);
        if session.search_count > 0 {
            session.reads_after_search_count += 1;
        }
        snapshot_of(session)
    }

    #[must_use]
    pub fn metrics_snapshot(&self, key: &SessionKey) -> MetricsSnapshot {
        let mut state = self.lock();
        let session = get_session(&mut state, key);
        snapshot_of(session)
    }

    #[must_use]
    pub fn search_context(&self, key: &SessionKey) -> SearchContext {
        let mut state = self.lock();
        let session = get_session(&mut state, key);
        SearchContext {
            last_query: session.last_search_query.clone(),
            top_paths: session.last_search_top_paths.clone(),
            candidates: session
                .last_search_candidates
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            search_count: session.search_count,
        }
    }

    /// Cumulative budget check, evaluated before a read executes.
    #[must_use]
    pub fn evaluate_budget(&self, key: &SessionKey) -> BudgetState {
        let mut state = self.lock();
        let session = get_session(&mut state, key);
        if session.reads_since_search >= self.read_budget as u64 {
            BudgetState::HardLimit
        } else {
            BudgetState::Ok
        }
    }

    /// Per-read soft limit: auto-chunks an oversized line limit.
    /// Returns the effective limit and the warning to attach, if any.
    #[must_use]
    pub fn apply_soft_limit(&self, requested: usize) -> (usize, Option<String>) {
        if requested > self.max_range_lines {
            let warning = format!(
                "Auto-chunked read limit to max_range_lines={}",
                self.max_range_lines
            );
            (self.max_range_lines, Some(warning))
        } else {
            (requested, None)
        }
    }

    /// Relevance guard: a read target outside the last search's top-K
    /// paths gets flagged with alternatives.
    #[must_use]
    pub fn assess_relevance(&self, key: &SessionKey, target: &str) -> Relevance {
        if target.is_empty() {
            return Relevance::Ok;
        }
        let mut state = self.lock();
        let session = get_session(&mut state, key);
        if session.search_count == 0 || session.last_search_top_paths.is_empty() {
            return Relevance::Ok;
        }
        let top_k: Vec<&String> = session
            .last_search_top_paths
            .iter()
            .take(self.relevance_top_k)
            .collect();
        let related = top_k
            .iter()
            .any(|p| p.as_str() == target || p.ends_with(target) || target.ends_with(p.as_str()));
        if related {
            Relevance::Ok
        } else {
            Relevance::OutsideTopK {
                alternatives: top_k.into_iter().cloned().collect(),
            }
        }
    }

    /// Read-first gate. A valid `candidate_id` issued by the most recent
    /// search in this session authorizes the read even before any search
    /// counter check; a candidate bound to another path (or session) is a
    /// `CANDIDATE_REF_REQUIRED` refusal.
    ///
    /// # Errors
    ///
    /// `SEARCH_FIRST_REQUIRED` or `CANDIDATE_REF_REQUIRED` in enforce
    /// mode; never errs in warn/off modes (returns the advisory instead).
    pub fn check_read_gate(
        &self,
        key: &SessionKey,
        target: &str,
        candidate_id: Option<&str>,
    ) -> Result<Option<String>, ToolError> {
        if self.gate_mode == GateMode::Off {
            return Ok(None);
        }
        let (has_search, candidate_path) = {
            let mut state = self.lock();
            let session = get_session(&mut state, key);
            let candidate_path = candidate_id
                .and_then(|id| session.last_search_candidates.get(id))
                .cloned();
            (session.search_count > 0, candidate_path)
        };

        if let Some(id) = candidate_id {
            match candidate_path {
                Some(path) if paths_agree(&path, target) => return Ok(None),
                _ => {
                    if self.gate_mode == GateMode::Enforce {
                        return Err(ToolError::new(
                            ToolCode::CandidateRefRequired,
                            format!(
                                "candidate_id '{id}' does not authorize '{target}' in this session"
                            ),
                        )
                        .with_hint("use a candidate_id returned by the most recent search")
                        .with_next_call(json!({
                            "tool": "search",
                            "arguments": {"query": "<refine>", "search_type": "code"}
                        })));
                    }
                    return Ok(Some(
                        "candidate_id does not match this target; run search again".into(),
                    ));
                }
            }
        }

        if has_search {
            return Ok(None);
        }
        match self.gate_mode {
            GateMode::Enforce => Err(ToolError::new(
                ToolCode::SearchFirstRequired,
                "search-first policy active. Call search before read.",
            )
            .with_next_call(json!({
                "tool": "search",
                "arguments": {"query": target, "search_type": "auto"}
            }))),
            _ => Ok(Some(
                "Search-first policy (advisory): call search before read.".into(),
            )),
        }
    }

    /// Deduplicates identical reads into a shared bundle id. Returns
    /// `(context_bundle_id, items_in_bundle)`.
    #[must_use]
    pub fn bundle_read(&self, key: &SessionKey, mode: &str, path: &str, text: &str) -> (String, usize) {
        let fingerprint = xxh3_64(format!("{mode}|{path}|{}", text.len()).as_bytes())
            ^ xxh3_64(text.as_bytes());
        let mut state = self.lock();
        state.seq += 1;
        let bundle_seed = state.seq;
        if state.bundles.get(key.as_str()).is_none() {
            state
                .bundles
                .put(key.as_str().to_string(), SessionBundles::default());
        }
        let bundles = state
            .bundles
            .get_mut(key.as_str())
            .expect("bundle entry just inserted");
        for bundle in &mut bundles.bundles {
            if bundle.items.contains(&fingerprint) {
                return (bundle.id.clone(), bundle.items.len());
            }
        }
        let id = format!("b{:010x}", xxh3_64(format!("{}|{bundle_seed}", key.as_str()).as_bytes()) & 0xff_ffff_ffff);
        let bundle = Bundle {
            id: id.clone(),
            items: vec![fingerprint],
        };
        bundles.bundles.push(bundle);
        // Oldest bundle evicted once the per-session cap is hit.
        if bundles.bundles.len() > self.bundle_items_cap {
            bundles.bundles.remove(0);
        }
        let size = bundles
            .bundles
            .last()
            .map(|b| b.items.len())
            .unwrap_or(1);
        // Remember the bundle on the session for status introspection.
        let session = get_session(&mut state, key);
        session.last_bundle_id = id.clone();
        (id, size)
    }

    /// Records a warning into the bounded sink.
    pub fn warn(&self, reason_code: &str, message: &str) {
        let mut state = self.lock();
        if state.warning_counts.len() < WARNING_CODE_CAP
            || state.warning_counts.contains_key(reason_code)
        {
            *state
                .warning_counts
                .entry(reason_code.to_string())
                .or_insert(0) += 1;
        } else {
            *state.warning_counts.entry("OTHER".to_string()).or_insert(0) += 1;
        }
        state
            .warning_ring
            .push_back((reason_code.to_string(), message.to_string()));
        while state.warning_ring.len() > WARNING_RING_CAP {
            state.warning_ring.pop_front();
        }
    }

    /// Warning counts per reason code (bounded cardinality).
    #[must_use]
    pub fn warning_counts(&self) -> Vec<(String, u64)> {
        let state = self.lock();
        let mut counts: Vec<(String, u64)> = state
            .warning_counts
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    /// Most recent warnings, oldest first.
    #[must_use]
    pub fn recent_warnings(&self, limit: usize) -> Vec<(String, String)> {
        let state = self.lock();
        state
            .warning_ring
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Active session count (for status/doctor).
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Test isolation: clears all state.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.sessions.clear();
        state.bundles.clear();
        state.warning_counts.clear();
        state.warning_ring.clear();
        state.seq = 0;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StabState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn get_session<'a>(state: &'a mut StabState, key: &SessionKey) -> &'a mut SessionMetrics {
    if state.sessions.get(key.as_str()).is_none() {
        state
            .sessions
            .put(key.as_str().to_string(), SessionMetrics::default());
    }
    state
        .sessions
        .get_mut(key.as_str())
        .expect("session entry just inserted")
}

fn snapshot_of(session: &SessionMetrics) -> MetricsSnapshot {
    let ratio = if session.reads_count > 0 {
        session.reads_after_search_count as f64 / session.reads_count as f64
    } else {
        0.0
    };
    let avg_span = if session.reads_count > 0 {
        session.read_span_sum as f64 / session.reads_count as f64
    } else {
        0.0
    };
    MetricsSnapshot {
        reads_count: session.reads_count,
        reads_lines_total: session.reads_lines_total,
        reads_chars_total: session.reads_chars_total,
        search_count: session.search_count,
        read_after_search_ratio: (ratio * 1e6).round() / 1e6,
        avg_read_span: (avg_span * 1e6).round() / 1e6,
        max_read_span: session.max_read_span,
        preview_degraded_count: session.preview_degraded_count,
    }
}

fn paths_agree(candidate_path: &str, target: &str) -> bool {
    candidate_path == target
        || candidate_path.ends_with(target)
        || target.ends_with(candidate_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stab(gate: GateMode) -> Stabilization {
        let settings = Settings {
            read_gate_mode: gate,
            ..Settings::default()
        };
        Stabilization::new(&settings)
    }

    fn key(stab: &Stabilization, sid: &str) -> SessionKey {
        stab.session_key(&json!({ "session_id": sid }), &[PathBuf::from("/ws")])
    }

    #[test]
    fn test_session_key_shapes() {
        let s = stab(GateMode::Warn);
        let roots = [PathBuf::from("/ws")];
        let with_sid = s.session_key(&json!({"session_id": "abc"}), &roots);
        assert!(with_sid.as_str().starts_with("ws:"));
        assert!(with_sid.as_str().ends_with(":sid:abc"));

        let with_conn = s.session_key(&json!({"connection_id": "c9"}), &roots);
        assert!(with_conn.as_str().ends_with(":conn:c9"));

        let neither = s.session_key(&json!({}), &roots);
        assert!(neither.as_str().ends_with(":conn:unknown"));

        // session_id wins over connection_id
        let both = s.session_key(
            &json!({"session_id": "abc", "connection_id": "c9"}),
            &roots,
        );
        assert!(both.as_str().ends_with(":sid:abc"));
    }

    #[test]
    fn test_metrics_monotonicity() {
        let s = stab(GateMode::Warn);
        let k = key(&s, "m1");
        let mut last_reads = 0;
        let mut last_span = 0;
        for i in 1..=10u64 {
            let snap = s.record_read(&k, 10, 200, i);
            assert!(snap.reads_count > last_reads);
            assert!(snap.max_read_span >= last_span);
            last_reads = snap.reads_count;
            last_span = snap.max_read_span;
        }
        let _ = s.record_search(&k, "q", &[], false);
        let snap = s.metrics_snapshot(&k);
        assert_eq!(snap.search_count, 1);
        assert_eq!(snap.reads_count, 10);
    }

    #[test]
    fn test_budget_hard_limit_after_reads_without_search() {
        let s = stab(GateMode::Warn);
        let k = key(&s, "b1");
        for _ in 0..25 {
            assert_eq!(s.evaluate_budget(&k), BudgetState::Ok);
            let _ = s.record_read(&k, 1, 10, 1);
        }
        assert_eq!(s.evaluate_budget(&k), BudgetState::HardLimit);
        // A search resets the since-search counter.
        let _ = s.record_search(&k, "narrow", &["a.py".into()], false);
        assert_eq!(s.evaluate_budget(&k), BudgetState::Ok);
    }

    #[test]
    fn test_soft_limit_auto_chunks() {
        let s = stab(GateMode::Warn);
        let (limit, warning) = s.apply_soft_limit(1000);
        assert_eq!(limit, 200);
        assert_eq!(
            warning.unwrap(),
            "Auto-chunked read limit to max_range_lines=200"
        );
        let (limit, warning) = s.apply_soft_limit(50);
        assert_eq!(limit, 50);
        assert!(warning.is_none());
    }

    #[test]
    fn test_relevance_guard() {
        let s = stab(GateMode::Warn);
        let k = key(&s, "r1");
        // No search yet: everything is fine.
        assert_eq!(s.assess_relevance(&k, "any.py"), Relevance::Ok);

        let _ = s.record_search(
            &k,
            "hello",
            &["root-a/app.py".into(), "root-a/lib.py".into()],
            false,
        );
        assert_eq!(s.assess_relevance(&k, "root-a/app.py"), Relevance::Ok);
        match s.assess_relevance(&k, "root-a/unrelated.py") {
            Relevance::OutsideTopK { alternatives } => {
                assert_eq!(alternatives[0], "root-a/app.py");
            }
            Relevance::Ok => panic!("expected OutsideTopK"),
        }
    }

    #[test]
    fn test_gate_enforce_requires_search() {
        let s = stab(GateMode::Enforce);
        let k = key(&s, "g1");
        let err = s.check_read_gate(&k, "root-a/app.py", None).unwrap_err();
        assert_eq!(err.code, ToolCode::SearchFirstRequired);
        assert!(!err.next_calls.is_empty());

        let _ = s.record_search(&k, "hello", &["root-a/app.py".into()], false);
        assert!(s.check_read_gate(&k, "root-a/app.py", None).unwrap().is_none());
    }

    #[test]
    fn test_candidate_binding() {
        let s = stab(GateMode::Enforce);
        let k = key(&s, "c1");
        let pairs = s.record_search(&k, "hello", &["root-a/app.py".into()], false);
        let (cid, path) = pairs[0].clone();

        // Right session + right path: authorized.
        assert!(s.check_read_gate(&k, &path, Some(&cid)).unwrap().is_none());

        // Same session, wrong path: refused.
        let err = s
            .check_read_gate(&k, "root-a/other.py", Some(&cid))
            .unwrap_err();
        assert_eq!(err.code, ToolCode::CandidateRefRequired);

        // Different session, same candidate: refused.
        let other = key(&s, "c2");
        let err = s.check_read_gate(&other, &path, Some(&cid)).unwrap_err();
        // No search in the other session either, but the candidate check
        // takes precedence for an explicit candidate_id.
        assert_eq!(err.code, ToolCode::CandidateRefRequired);
    }

    #[test]
    fn test_gate_warn_mode_is_advisory() {
        let s = stab(GateMode::Warn);
        let k = key(&s, "w1");
        let advisory = s.check_read_gate(&k, "x.py", None).unwrap();
        assert!(advisory.unwrap().contains("advisory"));
    }

    #[test]
    fn test_bundles_dedupe_identical_reads() {
        let s = stab(GateMode::Warn);
        let k = key(&s, "a1");
        let (b1, _) = s.bundle_read(&k, "file", "root-a/app.py", "content");
        let (b2, _) = s.bundle_read(&k, "file", "root-a/app.py", "content");
        assert_eq!(b1, b2);
        let (b3, _) = s.bundle_read(&k, "file", "root-a/app.py", "different");
        assert_ne!(b1, b3);
    }

    #[test]
    fn test_session_lru_cap() {
        let settings = Settings {
            session_cap: 4,
            ..Settings::default()
        };
        let s = Stabilization::new(&settings);
        for i in 0..10 {
            let k = key(&s, &format!("s{i}"));
            let _ = s.record_read(&k, 1, 1, 1);
        }
        assert!(s.session_count() <= 4);
    }

    #[test]
    fn test_warning_sink_bounded() {
        let s = stab(GateMode::Warn);
        for i in 0..200 {
            s.warn(&format!("CODE_{i}"), "message");
        }
        let counts = s.warning_counts();
        assert!(counts.len() <= WARNING_CODE_CAP + 1);
        assert!(s.recent_warnings(500).len() <= WARNING_RING_CAP);
    }

    #[test]
    fn test_strict_session_id() {
        let settings = Settings {
            strict_session_id: true,
            ..Settings::default()
        };
        let s = Stabilization::new(&settings);
        assert!(s.require_session_id(&json!({})).is_err());
        assert!(s
            .require_session_id(&json!({"session_id": "ok"}))
            .is_ok());
    }
}
