//! Service wiring: one place that assembles store, engine, indexer, and
//! stabilization into a tool context.

use crate::engine::Engine;
use crate::error::Result;
use crate::indexer::Indexer;
use crate::scanner::ScanConfig;
use crate::settings::{Settings, WorkspaceConfig};
use crate::stabilize::Stabilization;
use crate::store::Store;
use crate::tools::ToolContext;
use crate::workspace;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A fully initialized service for one set of workspace roots.
pub struct Service {
    pub ctx: ToolContext,
}

impl Service {
    /// Opens (or creates) the store and wires every component.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be opened.
    pub fn new(
        workspace_root: &Path,
        db_path: Option<PathBuf>,
        settings: Settings,
    ) -> Result<Self> {
        let workspace_root = workspace::normalize_root(workspace_root);
        let config_path = workspace::resolve_config_path(&workspace_root);
        let config = WorkspaceConfig::load(&config_path);

        let mut roots: Vec<PathBuf> = vec![workspace_root.clone()];
        for extra in &config.workspace_roots {
            let normalized = workspace::normalize_root(Path::new(extra));
            if !roots.contains(&normalized) {
                roots.push(normalized);
            }
        }

        let db_path = db_path.unwrap_or_else(|| workspace::default_db_path(&workspace_root));
        let store = Arc::new(Store::open(&db_path)?);
        for root in &roots {
            let label = root
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            store.upsert_root(&workspace::root_id(root), &root.to_string_lossy(), &label);
        }

        let scan_config = ScanConfig {
            include_ext: config.include_ext.clone(),
            include_files: config.include_files.clone(),
            exclude_dirs: config.exclude_dirs.clone(),
            exclude_globs: config.exclude_globs.clone(),
            max_depth: settings.max_depth,
            follow_symlinks: settings.follow_symlinks,
        };

        let engine = Arc::new(Engine::new(Arc::clone(&store)));
        let indexer = Arc::new(Indexer::new(
            Arc::clone(&store),
            settings.clone(),
            roots.clone(),
            scan_config,
        ));
        let stabilization = Arc::new(Stabilization::new(&settings));

        Ok(Self {
            ctx: ToolContext {
                store,
                engine,
                indexer,
                stabilization,
                settings,
                roots,
                workspace_root,
                server_version: crate::VERSION,
            },
        })
    }

    /// Orderly shutdown: stop workers, then the writer.
    pub fn shutdown(&self) {
        self.ctx.indexer.shutdown();
        self.ctx.store.close();
    }
}
