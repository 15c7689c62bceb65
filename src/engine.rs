//! `Engine`: the single owned store behind the public operations.
//!
//! One writer connection sits behind a tokio mutex and is held for a whole
//! `index` run. Reads open their own read-only connection and query a WAL
//! snapshot, so they never wait for the writer.
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::{self, ContextResult, Dependencies};
use crate::db::Db;
use crate::db::models::{VectorFilter, VectorHit};
use crate::embedder::{self, Embedder};
use crate::error::{IndexError, Result};
use crate::fingerprint::IndexMode;
use crate::graph::DependencyGraph;
use crate::indexer::chunker::{ChunkKind, Chunker};
use crate::indexer::core::{IndexStats, Indexer, relative_path};
use crate::indexer::languages::Language;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub total_files: usize,
    pub total_chunks: usize,
    pub total_dependency_edges: usize,
    pub storage_size_bytes: u64,
    pub dimensions: usize,
    pub model: Option<String>,
}

pub struct Engine {
    config: Config,
    db: Mutex<Db>,
    graph: RwLock<DependencyGraph>,
    embedder: Arc<dyn Embedder>,
    chunker: Arc<Chunker>,
}

impl Engine {
    /// Open the index with the embedder the configuration selects.
    pub fn open(config: Config) -> Result<Self> {
        let embedder = embedder::from_config(&config)?;
        Self::open_with_embedder(config, embedder)
    }

    pub fn open_with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if embedder.dimensions() != config.model.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: config.model.dimensions,
                actual: embedder.dimensions(),
            });
        }
        std::fs::create_dir_all(&config.state_dir)?;
        let db = Db::open(config.db_path(), config.model.dimensions, &config.model.name)?;
        let graph = DependencyGraph::from_edges(db.load_edges()?);
        let chunker = Chunker::new(config.max_chunk_chars)?;
        info!(
            "Index ready at {} ({} dependency edges loaded)",
            config.db_path().display(),
            graph.edge_count()
        );
        Ok(Self {
            config,
            db: Mutex::new(db),
            graph: RwLock::new(graph),
            embedder,
            chunker: Arc::new(chunker),
        })
    }

    /// Delete the state files without opening them. The way out of an
    /// `IndexCorrupted` or `DimensionMismatch` open failure.
    pub fn wipe(config: &Config) -> Result<()> {
        for path in state_files(&config.db_path()) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!("Wiped index state in {}", config.state_dir);
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `full` walks the repository and deletes vanished files;
    /// `incremental` touches only `files`.
    pub async fn index(&self, mode: IndexMode, files: &[String]) -> Result<IndexStats> {
        let mut db = self.db.lock().await;
        Indexer::new(
            &mut db,
            &self.graph,
            Arc::clone(&self.embedder),
            Arc::clone(&self.chunker),
            &self.config,
        )
        .run(mode, files)
        .await
    }

    /// Context for a file under review. Never fails: problems degrade to an
    /// empty result.
    pub async fn get_context(
        &self,
        filepath: &str,
        patch: Option<&str>,
        top_k: Option<usize>,
    ) -> ContextResult {
        match self.try_get_context(filepath, patch, top_k).await {
            Ok(result) => result,
            Err(IndexError::FileNotFound(path)) => {
                debug!("No indexed or on-disk content for {path}");
                ContextResult::empty(filepath)
            }
            Err(e) => {
                warn!("Context lookup for {filepath} failed: {e}");
                ContextResult::empty(filepath)
            }
        }
    }

    /// Like [`Engine::get_context`] but surfaces the error.
    pub async fn try_get_context(
        &self,
        filepath: &str,
        patch: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<ContextResult> {
        let filepath = relative_path(Path::new(&self.config.repo_root), filepath);
        let top_k = top_k.unwrap_or(self.config.search_top_k);
        let dependencies = Dependencies::of(&*self.read_graph()?, &filepath);
        let root = PathBuf::from(&self.config.repo_root);
        let patch = patch.map(str::to_string);
        let embedder = Arc::clone(&self.embedder);

        self.read(move |db| {
            let text = context::query_text(db, &root, &filepath, patch.as_deref())?;
            context::compose(db, embedder.as_ref(), &filepath, &text, top_k, dependencies)
        })
        .await
    }

    /// Free-text similarity search over every chunk.
    pub async fn search_similar(
        &self,
        text: &str,
        top_k: Option<usize>,
        kind: Option<ChunkKind>,
        language: Option<Language>,
    ) -> Result<Vec<VectorHit>> {
        let top_k = top_k.unwrap_or(self.config.search_top_k);
        let text = text.to_string();
        let embedder = Arc::clone(&self.embedder);
        self.read(move |db| {
            let vector = embedder.embed(&text)?;
            let kinds: Vec<ChunkKind> = kind.into_iter().collect();
            db.query(
                &vector,
                top_k,
                &VectorFilter {
                    kinds: &kinds,
                    language,
                    ..Default::default()
                },
            )
        })
        .await
    }

    pub async fn get_stats(&self) -> Result<EngineStats> {
        let db_path = self.config.db_path();
        let storage_size_bytes = state_files(&db_path)
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        self.read(move |db| {
            let (total_files, total_chunks, total_dependency_edges) = db.counts()?;
            Ok(EngineStats {
                total_files,
                total_chunks,
                total_dependency_edges,
                storage_size_bytes,
                dimensions: db.dimensions(),
                model: db.model()?,
            })
        })
        .await
    }

    /// Irreversibly drop every chunk, vector, fingerprint and edge.
    pub async fn reset(&self, confirm: bool) -> Result<()> {
        if !confirm {
            return Err(IndexError::ResetNotConfirmed);
        }
        let mut db = self.db.lock().await;
        db.clear()?;
        self.write_graph()?.clear();
        info!("Index reset");
        Ok(())
    }

    /// Run `f` on a fresh read-only connection inside one snapshot, off the
    /// async runtime.
    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> Result<T> + Send + 'static,
    {
        let db_path = self.config.db_path();
        tokio::task::spawn_blocking(move || {
            let db = Db::open_readonly(&db_path)?;
            db.read_snapshot(f)
        })
        .await
        .map_err(|e| IndexError::Task(e.to_string()))?
    }

    fn read_graph(&self) -> Result<RwLockReadGuard<'_, DependencyGraph>> {
        self.graph
            .read()
            .map_err(|_| IndexError::Task("dependency graph lock poisoned".into()))
    }

    fn write_graph(&self) -> Result<RwLockWriteGuard<'_, DependencyGraph>> {
        self.graph
            .write()
            .map_err(|_| IndexError::Task("dependency graph lock poisoned".into()))
    }
}

/// The database file with its WAL and shared-memory companions.
fn state_files(db_path: &Path) -> [PathBuf; 3] {
    let with_suffix = |suffix: &str| {
        let mut name = db_path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    };
    [db_path.to_path_buf(), with_suffix("-wal"), with_suffix("-shm")]
}
