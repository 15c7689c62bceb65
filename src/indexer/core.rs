use crate::config::Config;
use crate::db::Db;
use crate::db::models::BatchWrite;
use crate::embedder::{Embedder, embed_in_batches};
use crate::error::{IndexError, Result};
use crate::fingerprint::{self, Candidate, FileFingerprint, IndexMode};
use crate::graph::{DependencyEdge, DependencyGraph};
use crate::indexer::chunker::{Chunk, Chunker, content_hash};
use crate::indexer::languages::Language;
use crate::indexer::resolve::{Resolver, normalize};
use chrono::Utc;
use ignore::WalkBuilder;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftErrorKind {
    UnsupportedLanguage,
    ParseError,
    FileNotFound,
}

/// A per-file problem that did not stop the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoftError {
    pub filepath: String,
    pub kind: SoftErrorKind,
    pub message: String,
}

impl SoftError {
    /// `None` for hard errors.
    pub fn from_error(filepath: &str, err: &IndexError) -> Option<Self> {
        let kind = match err {
            IndexError::UnsupportedLanguage(_) => SoftErrorKind::UnsupportedLanguage,
            IndexError::Parse { .. } => SoftErrorKind::ParseError,
            IndexError::FileNotFound(_) => SoftErrorKind::FileNotFound,
            _ => return None,
        };
        Some(Self {
            filepath: filepath.to_string(),
            kind,
            message: err.to_string(),
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_deleted: usize,
    /// Chunks embedded in this run (new or with a changed hash).
    pub chunks_created: usize,
    /// Chunks whose hash matched and kept their stored vector.
    pub chunks_unchanged: usize,
    pub chunks_deleted: usize,
    pub errors: Vec<SoftError>,
    pub duration_ms: u64,
}

impl IndexStats {
    fn record(&mut self, filepath: &str, err: &IndexError) {
        warn!("Skipping {filepath}: {err}");
        if let Some(soft) = SoftError::from_error(filepath, err) {
            self.errors.push(soft);
        }
    }
}

/// A candidate file read from disk.
struct SourceFile {
    filepath: String,
    text: String,
    hash: String,
}

/// Result of chunking and embedding one file off the async runtime.
struct FileOutcome {
    fingerprint: FileFingerprint,
    parse_error: Option<String>,
    embedded: Vec<(Chunk, Vec<f32>)>,
    touched: Vec<Chunk>,
    deleted: Vec<String>,
}

/// Runs one `index(mode, files)` pass against the writer connection.
///
/// Work is committed per batch of files; a hard failure leaves every
/// earlier batch in place.
pub struct Indexer<'a> {
    db: &'a mut Db,
    graph: &'a RwLock<DependencyGraph>,
    embedder: Arc<dyn Embedder>,
    chunker: Arc<Chunker>,
    config: &'a Config,
}

impl<'a> Indexer<'a> {
    pub fn new(
        db: &'a mut Db,
        graph: &'a RwLock<DependencyGraph>,
        embedder: Arc<dyn Embedder>,
        chunker: Arc<Chunker>,
        config: &'a Config,
    ) -> Self {
        Self {
            db,
            graph,
            embedder,
            chunker,
            config,
        }
    }

    pub async fn run(&mut self, mode: IndexMode, files: &[String]) -> Result<IndexStats> {
        let started = Instant::now();
        let mut stats = IndexStats::default();

        let mut known = self.db.load_fingerprints()?;

        let sources = self.gather(mode, files, &mut stats)?;
        let candidates: Vec<Candidate> = sources
            .iter()
            .map(|s| Candidate {
                filepath: s.filepath.clone(),
                content_hash: s.hash.clone(),
            })
            .collect();
        let diff = fingerprint::diff(&known, &candidates, mode);
        stats.files_unchanged = diff.unchanged.len();
        info!(
            "Index ({mode}): {} to index, {} unchanged, {} to delete",
            diff.to_index.len(),
            diff.unchanged.len(),
            diff.to_delete.len()
        );

        if !diff.to_delete.is_empty() {
            self.delete_files(&diff.to_delete, &mut known, &mut stats)?;
        }

        let mut by_path: HashMap<String, SourceFile> = sources
            .into_iter()
            .map(|s| (s.filepath.clone(), s))
            .collect();
        let mut queue: VecDeque<SourceFile> = diff
            .to_index
            .iter()
            .filter_map(|path| by_path.remove(path))
            .collect();
        let batch_files = self.config.indexing.commit_batch_files.max(1);
        while !queue.is_empty() {
            let take = batch_files.min(queue.len());
            let batch: Vec<SourceFile> = queue.drain(..take).collect();
            self.index_batch(batch, &mut known, &mut stats).await?;
        }

        // Unchanged importers may resolve differently once other files
        // change, including files committed by an earlier failed run.
        self.refresh_edges(&known)?;

        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            "Indexed {} files ({} chunks embedded, {} unchanged, {} deleted, {} errors) in {}ms",
            stats.files_indexed,
            stats.chunks_created,
            stats.chunks_unchanged,
            stats.chunks_deleted,
            stats.errors.len(),
            stats.duration_ms
        );
        Ok(stats)
    }

    /// Read every candidate file. Missing and unsupported inputs are
    /// recorded as soft errors.
    fn gather(
        &self,
        mode: IndexMode,
        files: &[String],
        stats: &mut IndexStats,
    ) -> Result<Vec<SourceFile>> {
        let root = Path::new(&self.config.repo_root);
        let paths = match mode {
            IndexMode::Full => {
                if !files.is_empty() {
                    debug!(
                        "Full mode walks {}; ignoring {} explicit paths",
                        root.display(),
                        files.len()
                    );
                }
                walk_repository(self.config)?
            }
            IndexMode::Incremental => files.iter().map(|f| relative_path(root, f)).collect(),
        };

        let mut sources = Vec::with_capacity(paths.len());
        for rel in paths {
            if Language::from_path(&rel).is_none() {
                stats.record(&rel, &IndexError::UnsupportedLanguage(rel.clone()));
                continue;
            }
            let abs = root.join(&rel);
            if !abs.is_file() {
                stats.record(&rel, &IndexError::FileNotFound(rel.clone()));
                continue;
            }
            match read_source(&abs, &rel) {
                Ok(source) => sources.push(source),
                Err(e) => stats.record(&rel, &e),
            }
        }
        Ok(sources)
    }

    fn delete_files(
        &mut self,
        paths: &[String],
        known: &mut BTreeMap<String, FileFingerprint>,
        stats: &mut IndexStats,
    ) -> Result<()> {
        let mut batch = BatchWrite::default();
        for path in paths {
            batch
                .deleted_chunks
                .extend(self.db.chunk_hashes(path)?.into_keys());
            batch.deleted_files.push(path.clone());
        }
        batch.deleted_chunks.sort();
        batch.deleted_chunks.dedup();

        self.db.commit_batch(&batch)?;
        {
            let mut graph = self.write_graph()?;
            for path in paths {
                graph.remove_file(path);
            }
        }
        for path in paths {
            debug!("Removed {path}");
            known.remove(path);
        }
        stats.files_deleted += paths.len();
        stats.chunks_deleted += batch.deleted_chunks.len();
        Ok(())
    }

    async fn index_batch(
        &mut self,
        batch: Vec<SourceFile>,
        known: &mut BTreeMap<String, FileFingerprint>,
        stats: &mut IndexStats,
    ) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.indexing.workers.max(1)));
        let batch_size = self.config.indexing.embed_batch_size;

        let mut handles = Vec::with_capacity(batch.len());
        for source in batch {
            let stored = self.db.chunk_hashes(&source.filepath)?;
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| IndexError::Task(e.to_string()))?;
            let chunker = Arc::clone(&self.chunker);
            let embedder = Arc::clone(&self.embedder);
            let filepath = source.filepath.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                process_file(&chunker, embedder.as_ref(), batch_size, source, stored)
            });
            handles.push((filepath, handle));
        }

        // Awaiting in spawn order keeps the batch in input order.
        let mut write = BatchWrite::default();
        let mut indexed = Vec::new();
        for (filepath, handle) in handles {
            let outcome = match handle
                .await
                .map_err(|e| IndexError::Task(e.to_string()))?
            {
                Ok(outcome) => outcome,
                Err(e) if e.is_soft() => {
                    stats.record(&filepath, &e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(message) = outcome.parse_error {
                let err = IndexError::Parse {
                    path: filepath.clone(),
                    message,
                };
                stats.record(&filepath, &err);
            }
            debug!(
                "{filepath}: {} embedded, {} unchanged, {} removed",
                outcome.embedded.len(),
                outcome.touched.len(),
                outcome.deleted.len()
            );
            stats.files_indexed += 1;
            stats.chunks_created += outcome.embedded.len();
            stats.chunks_unchanged += outcome.touched.len();
            stats.chunks_deleted += outcome.deleted.len();

            known.insert(filepath.clone(), outcome.fingerprint.clone());
            write.upserts.extend(outcome.embedded);
            write.touched.extend(outcome.touched);
            write.deleted_chunks.extend(outcome.deleted);
            write.fingerprints.push(outcome.fingerprint);
            indexed.push(filepath);
        }

        let resolver = Resolver::new(
            known
                .iter()
                .map(|(path, fp)| (path.as_str(), fp.exports.as_slice())),
        );
        for path in &indexed {
            if let Some(fp) = known.get(path) {
                write
                    .edges
                    .push((path.clone(), resolver.edges_for(path, fp.language, &fp.imports)));
            }
        }

        self.db.commit_batch(&write)?;
        self.apply_edges(&write.edges)
    }

    /// Re-resolve imports of every known file and rewrite the ones whose
    /// edges moved.
    fn refresh_edges(&mut self, known: &BTreeMap<String, FileFingerprint>) -> Result<()> {
        let resolver = Resolver::new(
            known
                .iter()
                .map(|(path, fp)| (path.as_str(), fp.exports.as_slice())),
        );
        let mut write = BatchWrite::default();
        {
            let graph = self.read_graph()?;
            for (path, fp) in known {
                let edges = resolver.edges_for(path, fp.language, &fp.imports);
                let pairs: BTreeSet<(String, String)> = edges
                    .iter()
                    .map(|e| (e.to_file.clone(), e.symbol.clone()))
                    .collect();
                if pairs != graph.outgoing(path) {
                    write.edges.push((path.clone(), edges));
                }
            }
        }
        if write.is_empty() {
            return Ok(());
        }
        debug!("Re-resolved edges of {} files", write.edges.len());
        self.db.commit_batch(&write)?;
        self.apply_edges(&write.edges)
    }

    /// Mirror committed edge replacements into the in-memory graph.
    fn apply_edges(&self, edges: &[(String, Vec<DependencyEdge>)]) -> Result<()> {
        let mut graph = self.write_graph()?;
        for (file, file_edges) in edges {
            graph.add_edges(
                file,
                file_edges
                    .iter()
                    .map(|e| (e.to_file.clone(), e.symbol.clone())),
            );
        }
        Ok(())
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

/// Read one file; an unreadable file is reported as missing.
fn read_source(abs: &Path, rel: &str) -> Result<SourceFile> {
    let bytes = std::fs::read(abs)
        .map_err(|e| IndexError::FileNotFound(format!("{rel} ({e})")))?;
    Ok(SourceFile {
        hash: content_hash(&bytes),
        text: String::from_utf8_lossy(&bytes).into_owned(),
        filepath: rel.to_string(),
    })
}

/// Chunk a file and embed only the chunks whose hash is not stored yet.
fn process_file(
    chunker: &Chunker,
    embedder: &dyn Embedder,
    batch_size: usize,
    source: SourceFile,
    stored: HashMap<String, String>,
) -> Result<FileOutcome> {
    let parsed = chunker.chunk(&source.filepath, &source.text)?;

    let (touched, fresh): (Vec<Chunk>, Vec<Chunk>) = parsed
        .chunks
        .into_iter()
        .partition(|c| stored.get(&c.id) == Some(&c.content_hash));

    let texts: Vec<String> = fresh.iter().map(Chunk::embedding_text).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let vectors = embed_in_batches(embedder, &refs, batch_size)?;

    let chunk_ids: BTreeSet<String> = fresh
        .iter()
        .chain(&touched)
        .map(|c| c.id.clone())
        .collect();
    let mut deleted: Vec<String> = stored
        .into_keys()
        .filter(|id| !chunk_ids.contains(id))
        .collect();
    deleted.sort();

    Ok(FileOutcome {
        fingerprint: FileFingerprint {
            filepath: source.filepath,
            content_hash: source.hash,
            language: parsed.language,
            chunk_ids,
            imports: parsed.imports,
            exports: parsed.exports,
            indexed_at: Utc::now(),
        },
        parse_error: parsed.parse_error,
        embedded: fresh.into_iter().zip(vectors).collect(),
        touched,
        deleted,
    })
}

/// Supported source files under `repo_root`, relative and sorted.
fn walk_repository(config: &Config) -> Result<Vec<String>> {
    let root = PathBuf::from(&config.repo_root);
    let ignore_set = config
        .ignore_set()
        .map_err(|e| IndexError::InvalidConfig(e.to_string()))?;

    let filter_config = config.clone();
    let walker = WalkBuilder::new(&root)
        .hidden(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir
                && entry.depth() > 0
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| filter_config.is_ignored_dir(name)))
        })
        .build();

    let mut paths = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if entry
            .file_name()
            .to_str()
            .is_some_and(|name| ignore_set.is_match(name))
        {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(&root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if Language::from_path(&rel).is_some() {
            paths.push(rel);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Express `input` relative to `root` with forward slashes.
pub(crate) fn relative_path(root: &Path, input: &str) -> String {
    let path = Path::new(input);
    let rel = if path.is_absolute() {
        let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        path.strip_prefix(root)
            .or_else(|_| path.strip_prefix(&canonical_root))
            .unwrap_or(path)
    } else {
        path
    };
    normalize(&rel.to_string_lossy().replace('\\', "/"))
}
