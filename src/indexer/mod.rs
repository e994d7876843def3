//! Long-running indexing coordinator.
//!
//! Scanner output feeds a fair FIFO queue; user-triggered single-file
//! reindex requests land on a priority queue that workers always drain
//! first. A permanent worker pool pulls from both and pushes extraction
//! results to the store's writer thread. Worker concurrency follows the
//! resource governor.
//!
//! State machine: Idle -> Scanning -> Draining -> Idle.

mod governor;

pub use governor::ResourceGovernor;

use crate::error::IndexError;
use crate::extract::{ExtractOutcome, Extractor, FileDelta};
use crate::scanner::{ScanConfig, Scanner};
use crate::settings::{IndexerMode, Settings};
use crate::store::{now_ts, FailedFile, Store};
use crate::types::RootId;
use crate::workspace;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const FAIR_QUEUE_DEPTH: usize = 4096;
const PRIORITY_QUEUE_DEPTH: usize = 512;
const GOVERNOR_INTERVAL: Duration = Duration::from_millis(250);
const DRAIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(50);

/// One unit of extraction work.
#[derive(Debug, Clone)]
struct FileTask {
    root: PathBuf,
    path: PathBuf,
    mtime: i64,
    size: i64,
    scan_ts: i64,
    force: bool,
}

/// Indexer phase, exposed by `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scanning,
    Draining,
}

impl Phase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Draining => "draining",
        }
    }
}

/// Status snapshot for the `status` tool.
#[derive(Debug, Clone)]
pub struct IndexerStatus {
    pub mode: IndexerMode,
    pub phase: &'static str,
    pub index_ready: bool,
    pub last_scan_ts: i64,
    pub scanned_files: u64,
    pub indexed_files: u64,
    pub errors: u64,
    pub fair_queue_depth: usize,
    pub priority_queue_depth: usize,
    pub in_flight: usize,
    pub governor_factor: f64,
}

/// Result of a blocking `scan_once`.
#[derive(Debug, Clone, Copy)]
pub struct ScanOutcome {
    pub scanned_files: u64,
    pub indexed_files: u64,
}

struct Inner {
    store: Arc<Store>,
    settings: Settings,
    roots: Vec<PathBuf>,
    scan_config: ScanConfig,
    extractor: Extractor,
    governor: ResourceGovernor,

    fair_tx: Sender<FileTask>,
    fair_rx: Receiver<FileTask>,
    prio_tx: Sender<FileTask>,
    prio_rx: Receiver<FileTask>,

    phase: Mutex<Phase>,
    scan_lock: Mutex<()>,
    rescan_pending: AtomicBool,
    stop: AtomicBool,

    index_ready: AtomicBool,
    last_scan_ts: AtomicU64,
    scanned: AtomicU64,
    indexed: AtomicU64,
    errors: AtomicU64,
    in_flight: AtomicUsize,
}

/// Handle to the indexing service.
pub struct Indexer {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Indexer {
    /// Builds the service and starts the permanent worker pool.
    #[must_use]
    pub fn new(
        store: Arc<Store>,
        settings: Settings,
        roots: Vec<PathBuf>,
        scan_config: ScanConfig,
    ) -> Self {
        let (fair_tx, fair_rx) = bounded(FAIR_QUEUE_DEPTH);
        let (prio_tx, prio_rx) = bounded(PRIORITY_QUEUE_DEPTH);
        let extractor = Extractor::new(settings.clone());
        let index_ready = store.file_count(None).map(|n| n > 0).unwrap_or(false);

        let inner = Arc::new(Inner {
            store,
            settings,
            roots: roots.iter().map(|r| workspace::normalize_root(r)).collect(),
            scan_config,
            extractor,
            governor: ResourceGovernor::new(),
            fair_tx,
            fair_rx,
            prio_tx,
            prio_rx,
            phase: Mutex::new(Phase::Idle),
            scan_lock: Mutex::new(()),
            rescan_pending: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            index_ready: AtomicBool::new(index_ready),
            last_scan_ts: AtomicU64::new(0),
            scanned: AtomicU64::new(0),
            indexed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        });

        let mut workers = Vec::new();
        if inner.settings.indexer_mode == IndexerMode::Leader {
            let pool_size = inner.settings.worker_baseline.max(1);
            for worker_id in 0..pool_size.saturating_mul(3) {
                let inner = Arc::clone(&inner);
                let handle = std::thread::Builder::new()
                    .name(format!("sari-extract-{worker_id}"))
                    .spawn(move || worker_loop(&inner, worker_id))
                    .expect("spawn extract worker");
                workers.push(handle);
            }
            let gov_inner = Arc::clone(&inner);
            let handle = std::thread::Builder::new()
                .name("sari-governor".into())
                .spawn(move || governor_loop(&gov_inner))
                .expect("spawn governor");
            workers.push(handle);
        }

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.inner.roots
    }

    #[must_use]
    pub fn status(&self) -> IndexerStatus {
        let phase = self
            .inner
            .phase
            .lock()
            .map(|p| *p)
            .unwrap_or(Phase::Idle);
        IndexerStatus {
            mode: self.inner.settings.indexer_mode,
            phase: phase.as_str(),
            index_ready: self.inner.index_ready.load(Ordering::Relaxed),
            last_scan_ts: self.inner.last_scan_ts.load(Ordering::Relaxed) as i64,
            scanned_files: self.inner.scanned.load(Ordering::Relaxed),
            indexed_files: self.inner.indexed.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
            fair_queue_depth: self.inner.fair_rx.len(),
            priority_queue_depth: self.inner.prio_rx.len(),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            governor_factor: self.inner.governor.factor(),
        }
    }

    fn check_writable(&self) -> Result<(), IndexError> {
        match self.inner.settings.indexer_mode {
            IndexerMode::Leader => Ok(()),
            IndexerMode::Follower => Err(IndexError::Follower),
            IndexerMode::Off => Err(IndexError::Disabled),
        }
    }

    /// Runs one full scan of all roots to completion, drains the queues
    /// until three consecutive empty samples, flushes the writer, and
    /// prunes rows the scan did not see. Wall-clock bounded.
    ///
    /// # Errors
    ///
    /// `ERR_INDEXER_FOLLOWER` / `ERR_INDEXER_DISABLED` outside leader
    /// mode.
    pub fn scan_once(&self) -> Result<ScanOutcome, IndexError> {
        self.check_writable()?;
        let _guard = self
            .inner
            .scan_lock
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let scan_ts = now_ts();
        let scanned_before = self.inner.scanned.load(Ordering::Relaxed);
        let indexed_before = self.inner.indexed.load(Ordering::Relaxed);
        set_phase(&self.inner, Phase::Scanning);

        let scanner = Scanner::new(&self.inner.scan_config, &self.inner.roots);
        for root in &self.inner.roots {
            let root_id = workspace::root_id(root);
            let label = root
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            self.inner
                .store
                .upsert_root(&root_id, &root.to_string_lossy(), &label);

            for entry in scanner.scan(root) {
                if self.inner.stop.load(Ordering::Relaxed) {
                    break;
                }
                let mtime = entry
                    .meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                let task = FileTask {
                    root: root.clone(),
                    path: entry.path,
                    mtime,
                    size: entry.meta.len() as i64,
                    scan_ts,
                    force: false,
                };
                self.inner.scanned.fetch_add(1, Ordering::Relaxed);
                // Blocking send: queue depth is the backpressure.
                if self.inner.fair_tx.send(task).is_err() {
                    break;
                }
            }
        }

        set_phase(&self.inner, Phase::Draining);
        self.drain(Duration::from_millis(self.inner.settings.scan_once_timeout_ms));
        self.inner.store.flush();

        let root_ids: Vec<RootId> = self.inner.roots.iter().map(|r| workspace::root_id(r)).collect();
        if let Err(e) = self.inner.store.finalize_turbo_batch(scan_ts, root_ids) {
            tracing::warn!(target: "sari::indexer", "finalize failed: {e}");
        }
        let cutoff = now_ts() - self.inner.settings.purge_grace_secs;
        if let Err(e) = self.inner.store.purge_deleted(cutoff) {
            tracing::warn!(target: "sari::indexer", "purge failed: {e}");
        }

        self.inner
            .last_scan_ts
            .store(scan_ts as u64, Ordering::Relaxed);
        self.inner.index_ready.store(true, Ordering::Relaxed);
        set_phase(&self.inner, Phase::Idle);

        let outcome = ScanOutcome {
            scanned_files: self.inner.scanned.load(Ordering::Relaxed) - scanned_before,
            indexed_files: self.inner.indexed.load(Ordering::Relaxed) - indexed_before,
        };
        if self.inner.rescan_pending.swap(false, Ordering::Relaxed) {
            tracing::info!(target: "sari::indexer", "running coalesced rescan");
            drop(_guard);
            return self.scan_once().map(|second| ScanOutcome {
                scanned_files: outcome.scanned_files + second.scanned_files,
                indexed_files: outcome.indexed_files + second.indexed_files,
            });
        }
        Ok(outcome)
    }

    /// Waits until both queues plus in-flight work show zero depth for
    /// three consecutive samples, bounded by `timeout`.
    fn drain(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut empty_samples = 0;
        while Instant::now() < deadline {
            let depth = self.inner.fair_rx.len()
                + self.inner.prio_rx.len()
                + self.inner.in_flight.load(Ordering::Relaxed);
            if depth == 0 {
                empty_samples += 1;
                if empty_samples >= 3 {
                    return;
                }
            } else {
                empty_samples = 0;
            }
            std::thread::sleep(DRAIN_SAMPLE_INTERVAL);
        }
        tracing::warn!(target: "sari::indexer", "drain timed out with work pending");
    }

    /// Non-blocking rescan request; coalesced while a scan is in flight.
    ///
    /// # Errors
    ///
    /// `ERR_INDEXER_FOLLOWER` / `ERR_INDEXER_DISABLED` outside leader
    /// mode.
    pub fn rescan(self: &Arc<Self>) -> Result<bool, IndexError> {
        self.check_writable()?;
        if self.inner.scan_lock.try_lock().is_err() {
            self.inner.rescan_pending.store(true, Ordering::Relaxed);
            return Ok(false);
        }
        let this = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("sari-rescan".into())
            .spawn(move || {
                if let Err(e) = this.scan_once() {
                    tracing::warn!(target: "sari::indexer", "rescan failed: {e}");
                }
            })
            .is_ok();
        Ok(spawned)
    }

    /// Enqueues a synthesized "modified" event for one file on the
    /// priority queue. Returns immediately; queue depths tell the caller
    /// when the effect has landed.
    ///
    /// # Errors
    ///
    /// Mode errors outside leader mode; `QUEUE_FULL` when the priority
    /// queue is saturated.
    pub fn index_file(&self, path: &Path) -> Result<(), IndexError> {
        self.check_writable()?;
        let path = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let root = self
            .inner
            .roots
            .iter()
            .find(|r| path.starts_with(r))
            .cloned()
            .ok_or_else(|| IndexError::FileIndex {
                path: path.clone(),
                reason: "path is outside every workspace root".into(),
            })?;
        let meta = std::fs::metadata(&path).map_err(|e| IndexError::FileIndex {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let task = FileTask {
            root,
            path,
            mtime,
            size: meta.len() as i64,
            scan_ts: now_ts(),
            force: true,
        };
        self.inner
            .prio_tx
            .try_send(task)
            .map_err(|_| IndexError::QueueFull)?;
        Ok(())
    }

    /// True once both queues and in-flight work are empty.
    #[must_use]
    pub fn queues_empty(&self) -> bool {
        self.inner.fair_rx.len() == 0
            && self.inner.prio_rx.len() == 0
            && self.inner.in_flight.load(Ordering::Relaxed) == 0
    }

    /// Blocks until queues drain or the timeout elapses. Returns whether
    /// the drain completed.
    #[must_use]
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.queues_empty() {
                return true;
            }
            std::thread::sleep(DRAIN_SAMPLE_INTERVAL);
        }
        self.queues_empty()
    }

    /// Stops workers and joins them.
    pub fn shutdown(&self) {
        self.inner.stop.store(true, Ordering::Relaxed);
        if let Ok(mut workers) = self.workers.lock() {
            for handle in workers.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn set_phase(inner: &Inner, phase: Phase) {
    if let Ok(mut guard) = inner.phase.lock() {
        *guard = phase;
    }
}

fn governor_loop(inner: &Inner) {
    while !inner.stop.load(Ordering::Relaxed) {
        inner.governor.sample();
        std::thread::sleep(GOVERNOR_INTERVAL);
    }
}

fn worker_loop(inner: &Inner, worker_id: usize) {
    loop {
        if inner.stop.load(Ordering::Relaxed) {
            return;
        }
        // Workers above the governor's target idle instead of pulling work.
        let target = inner.governor.worker_target(inner.settings.worker_baseline);
        if worker_id >= target {
            std::thread::sleep(Duration::from_millis(200));
            continue;
        }

        // Priority queue always wins.
        let task = match inner.prio_rx.try_recv() {
            Ok(task) => Some(task),
            Err(TryRecvError::Empty) => match inner.fair_rx.try_recv() {
                Ok(task) => Some(task),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => return,
            },
            Err(TryRecvError::Disconnected) => return,
        };
        let Some(task) = task else {
            std::thread::sleep(Duration::from_millis(20));
            continue;
        };

        inner.in_flight.fetch_add(1, Ordering::Relaxed);
        process_task(inner, &task);
        inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

fn process_task(inner: &Inner, task: &FileTask) {
    let root_id = workspace::root_id(&task.root);
    let db_path = match task.path.strip_prefix(&task.root) {
        Ok(rel) => workspace::encode_db_path(&root_id, rel),
        Err(_) => return,
    };
    let prev: Option<FileDelta> = inner.store.get_file_meta(&db_path).ok().flatten();

    let outcome = inner.extractor.process_file(
        &task.root,
        &task.path,
        task.mtime,
        task.size,
        task.scan_ts,
        prev.as_ref(),
        task.force,
    );
    match outcome {
        ExtractOutcome::Changed(payload) => {
            inner.store.upsert_files_turbo(vec![*payload], Vec::new());
            inner.indexed.fetch_add(1, Ordering::Relaxed);
        }
        ExtractOutcome::Unchanged { db_path } => {
            inner.store.touch_scan(vec![db_path], task.scan_ts);
        }
        ExtractOutcome::Failed {
            db_path,
            repo,
            error,
        } => {
            tracing::debug!(target: "sari::indexer", "extract failed for {db_path}: {error}");
            inner.store.upsert_files_turbo(
                Vec::new(),
                vec![FailedFile {
                    db_path,
                    root_id,
                    repo,
                    error,
                    scan_ts: task.scan_ts,
                }],
            );
            inner.errors.fetch_add(1, Ordering::Relaxed);
        }
        ExtractOutcome::Missing => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_indexer(dir: &Path, settings: Settings) -> (Arc<Store>, Arc<Indexer>) {
        let store = Arc::new(Store::open(&dir.join("cache").join("index.db")).unwrap());
        let ws = dir.join("ws");
        std::fs::create_dir_all(&ws).unwrap();
        let indexer = Arc::new(Indexer::new(
            Arc::clone(&store),
            settings,
            vec![ws],
            ScanConfig::default(),
        ));
        (store, indexer)
    }

    #[test]
    fn test_scan_once_indexes_workspace() {
        let dir = tempfile::TempDir::new().unwrap();
        let (store, indexer) = build_indexer(dir.path(), Settings::default());
        let ws = dir.path().join("ws");
        std::fs::write(ws.join("app.py"), "def hello():\n    return 1\n").unwrap();
        std::fs::write(ws.join("README.md"), "# hello\n").unwrap();

        let outcome = indexer.scan_once().unwrap();
        assert_eq!(outcome.scanned_files, 2);
        assert_eq!(outcome.indexed_files, 2);
        assert_eq!(store.file_count(None).unwrap(), 2);

        let status = indexer.status();
        assert!(status.index_ready);
        assert_eq!(status.phase, "idle");
        assert!(status.last_scan_ts > 0);
    }

    #[test]
    fn test_second_scan_is_incremental() {
        let dir = tempfile::TempDir::new().unwrap();
        let (store, indexer) = build_indexer(dir.path(), Settings::default());
        let ws = dir.path().join("ws");
        std::fs::write(ws.join("a.py"), "x = 1\n").unwrap();

        indexer.scan_once().unwrap();
        let second = indexer.scan_once().unwrap();
        assert_eq!(second.scanned_files, 1);
        assert_eq!(second.indexed_files, 0);
        // Unchanged file must survive finalize (scan_ts was touched).
        assert_eq!(store.file_count(None).unwrap(), 1);
    }

    #[test]
    fn test_deleted_file_soft_deletes() {
        let dir = tempfile::TempDir::new().unwrap();
        let (store, indexer) = build_indexer(dir.path(), Settings::default());
        let ws = dir.path().join("ws");
        std::fs::write(ws.join("gone.py"), "x = 1\n").unwrap();
        indexer.scan_once().unwrap();
        assert_eq!(store.file_count(None).unwrap(), 1);

        std::fs::remove_file(ws.join("gone.py")).unwrap();
        // finalize compares strictly against the new scan_ts
        std::thread::sleep(Duration::from_millis(1100));
        indexer.scan_once().unwrap();
        assert_eq!(store.file_count(None).unwrap(), 0);
    }

    #[test]
    fn test_index_file_priority_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let (store, indexer) = build_indexer(dir.path(), Settings::default());
        let ws = dir.path().join("ws");
        let file = ws.join("hot.py");
        std::fs::write(&file, "def hot():\n    return 1\n").unwrap();

        indexer.index_file(&file).unwrap();
        assert!(indexer.wait_for_drain(Duration::from_secs(5)));
        store.flush();
        assert_eq!(store.file_count(None).unwrap(), 1);
    }

    #[test]
    fn test_index_file_outside_roots_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let (_store, indexer) = build_indexer(dir.path(), Settings::default());
        let outside = dir.path().join("outside.py");
        std::fs::write(&outside, "x = 1\n").unwrap();
        let err = indexer.index_file(&outside).unwrap_err();
        assert!(matches!(err, IndexError::FileIndex { .. }));
    }

    #[test]
    fn test_follower_mode_rejects_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = Settings {
            indexer_mode: IndexerMode::Follower,
            ..Settings::default()
        };
        let (_store, indexer) = build_indexer(dir.path(), settings);
        assert!(matches!(indexer.scan_once(), Err(IndexError::Follower)));
        assert!(matches!(indexer.rescan(), Err(IndexError::Follower)));
        let dummy = dir.path().join("ws").join("x.py");
        assert!(matches!(
            indexer.index_file(&dummy),
            Err(IndexError::Follower)
        ));
    }

    #[test]
    fn test_off_mode_rejects_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = Settings {
            indexer_mode: IndexerMode::Off,
            ..Settings::default()
        };
        let (_store, indexer) = build_indexer(dir.path(), settings);
        assert!(matches!(indexer.scan_once(), Err(IndexError::Disabled)));
    }

    #[test]
    fn test_nested_workspace_not_scanned() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("index.db")).unwrap());
        let ws = dir.path().join("ws");
        let sub = ws.join("sub");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(ws.join("file.txt"), "top\n").unwrap();
        std::fs::write(sub.join("x.py"), "nested\n").unwrap();

        // Both roots registered; scanning only the outer root.
        let indexer = Indexer::new(
            Arc::clone(&store),
            Settings::default(),
            vec![ws.clone()],
            ScanConfig::default(),
        );
        // Register the sub-workspace as an active sibling via scan config:
        // the Indexer trie is built from its own roots, so emulate the
        // registry by building a scanner the same way the service does.
        drop(indexer);
        let indexer = Indexer::new(
            store.clone(),
            Settings::default(),
            vec![ws, sub],
            ScanConfig::default(),
        );
        let outcome = indexer.scan_once().unwrap();
        // file.txt from the outer root and x.py under its own root: the
        // outer scan must not have descended into sub/.
        assert_eq!(outcome.scanned_files, 2);
        let files = store.get_repo_stats(None).unwrap();
        let total: i64 = files.iter().map(|r| r.files).sum();
        assert_eq!(total, 2);
    }
}
