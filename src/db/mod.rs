//! Persistent index state using SQLite and sqlite-vec.
//!
//! Chunk vectors, fingerprints and dependency edges live in one database
//! so every batch commits all three together.
use std::path::Path;
use std::sync::Once;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use sqlite_vec::sqlite3_vec_init;
use tracing::{debug, info};

use crate::error::{IndexError, Result};

pub mod edges;
pub mod fingerprints;
pub mod models;
pub mod vectors;

pub const SCHEMA_VERSION: u32 = 1;

const TABLES: [&str; 5] = [
    "meta",
    "chunks",
    "vec_chunks",
    "fingerprints",
    "dependency_edges",
];

fn schema_sql(dimensions: usize) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk_id TEXT NOT NULL UNIQUE,
    filepath TEXT NOT NULL,
    kind TEXT NOT NULL,
    name TEXT NOT NULL,
    parent TEXT,
    language TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    truncated INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_chunks_filepath ON chunks(filepath);
CREATE INDEX IF NOT EXISTS idx_chunks_kind ON chunks(kind);

CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(
    embedding FLOAT[{dimensions}]
);

CREATE TABLE IF NOT EXISTS fingerprints (
    filepath TEXT PRIMARY KEY,
    content_hash TEXT NOT NULL,
    language TEXT NOT NULL,
    chunk_ids TEXT NOT NULL,
    imports TEXT NOT NULL,
    exports TEXT NOT NULL,
    indexed_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS dependency_edges (
    from_file TEXT NOT NULL,
    to_file TEXT NOT NULL,
    symbol TEXT NOT NULL,
    PRIMARY KEY (from_file, to_file, symbol)
);

CREATE INDEX IF NOT EXISTS idx_edges_to ON dependency_edges(to_file);
"#
    )
}

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

fn corrupted(err: impl std::fmt::Display) -> IndexError {
    IndexError::IndexCorrupted(err.to_string())
}

/// A SQLite connection holding the index schema.
pub struct Db {
    pub(crate) conn: Connection,
    dimensions: usize,
}

impl Db {
    /// Open (creating if needed) the writer connection.
    ///
    /// An existing database must be intact and built for `dimensions`.
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize, model: &str) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening index database: {}", path.display());
        init_sqlite_vec();
        let conn = Connection::open(path).map_err(corrupted)?;
        let journal: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(corrupted)?;
        debug!("journal mode: {journal}");
        Self::init(conn, dimensions, model)
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory(dimensions: usize) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::init(conn, dimensions, "test")
    }

    /// Open a read-only connection for queries. Dimensions come from the
    /// stored metadata.
    pub fn open_readonly<P: AsRef<Path>>(path: P) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let dimensions = read_dimensions(&conn)?;
        Ok(Self { conn, dimensions })
    }

    fn init(conn: Connection, dimensions: usize, model: &str) -> Result<Self> {
        let vec_version: String = conn
            .query_row("SELECT vec_version()", [], |row| row.get(0))
            .map_err(corrupted)?;
        debug!("sqlite-vec version: {vec_version}");

        let check: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(corrupted)?;
        if check != "ok" {
            return Err(IndexError::IndexCorrupted(format!("quick_check: {check}")));
        }

        let present = existing_tables(&conn)?;
        if present.is_empty() {
            conn.execute_batch(&schema_sql(dimensions))?;
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1), ('dimensions', ?2), ('model', ?3)",
                params![SCHEMA_VERSION.to_string(), dimensions.to_string(), model],
            )?;
            info!("Created index schema ({dimensions} dimensions)");
        } else if present.len() < TABLES.len() {
            let missing: Vec<&str> = TABLES
                .iter()
                .copied()
                .filter(|t| !present.iter().any(|p| p == t))
                .collect();
            return Err(IndexError::IndexCorrupted(format!(
                "partial state, missing tables: {}",
                missing.join(", ")
            )));
        } else {
            let stored = read_dimensions(&conn)?;
            if stored != dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: stored,
                    actual: dimensions,
                });
            }
        }

        let db = Self { conn, dimensions };
        db.check_vector_consistency()?;
        Ok(db)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Model name recorded when the index was created.
    pub fn model(&self) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = 'model'", [], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Every chunk row must have exactly one vector.
    fn check_vector_consistency(&self) -> Result<()> {
        let chunks: i64 = self
            .conn
            .query_row("SELECT count(*) FROM chunks", [], |row| row.get(0))
            .map_err(corrupted)?;
        let vectors: i64 = self
            .conn
            .query_row("SELECT count(*) FROM vec_chunks", [], |row| row.get(0))
            .map_err(corrupted)?;
        if chunks != vectors {
            return Err(IndexError::IndexCorrupted(format!(
                "{chunks} chunks but {vectors} vectors"
            )));
        }
        Ok(())
    }

    /// Row counts: (fingerprinted files, chunks, dependency edges).
    pub fn counts(&self) -> Result<(usize, usize, usize)> {
        let count = |table: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(&format!("SELECT count(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?;
            Ok(n as usize)
        };
        Ok((
            count("fingerprints")?,
            count("chunks")?,
            count("dependency_edges")?,
        ))
    }

    /// Apply one indexing batch atomically. Either every chunk, fingerprint
    /// and edge change in `batch` is stored or none is.
    pub fn commit_batch(&mut self, batch: &models::BatchWrite) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        for (_, vector) in &batch.upserts {
            self.check_dimensions(vector)?;
        }

        let tx = self.conn.transaction()?;
        for file in &batch.deleted_files {
            fingerprints::delete_fingerprint(&tx, file)?;
            edges::delete_file_edges(&tx, file)?;
        }
        for chunk_id in &batch.deleted_chunks {
            vectors::delete_chunk(&tx, chunk_id)?;
        }
        for (chunk, vector) in &batch.upserts {
            vectors::upsert_chunk(&tx, chunk, vector)?;
        }
        for chunk in &batch.touched {
            vectors::update_metadata(&tx, chunk)?;
        }
        for fp in &batch.fingerprints {
            fingerprints::upsert_fingerprint(&tx, fp)?;
        }
        for (file, file_edges) in &batch.edges {
            edges::replace_edges(&tx, file, file_edges)?;
        }
        tx.commit()?;

        debug!(
            upserts = batch.upserts.len(),
            deleted_chunks = batch.deleted_chunks.len(),
            files = batch.fingerprints.len(),
            deleted_files = batch.deleted_files.len(),
            "Committed batch"
        );
        Ok(())
    }

    /// Run `f` inside one read transaction so all of its queries see the
    /// same snapshot.
    pub fn read_snapshot<T>(&self, f: impl FnOnce(&Db) -> Result<T>) -> Result<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = f(self);
        tx.finish()?;
        out
    }

    /// Remove every chunk, vector, fingerprint and edge in one transaction.
    /// Metadata (dimensions, model) is kept.
    pub fn clear(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM vec_chunks;
             DELETE FROM chunks;
             DELETE FROM fingerprints;
             DELETE FROM dependency_edges;",
        )?;
        tx.commit()?;
        info!("Index cleared");
        Ok(())
    }
}

fn existing_tables(conn: &Connection) -> Result<Vec<String>> {
    let placeholders = TABLES.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql).map_err(corrupted)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(TABLES.iter()), |row| {
            row.get::<_, String>(0)
        })
        .map_err(corrupted)?;
    let mut names = Vec::new();
    for row in rows {
        names.push(row.map_err(corrupted)?);
    }
    Ok(names)
}

fn read_dimensions(conn: &Connection) -> Result<usize> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM meta WHERE key = 'dimensions'", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(corrupted)?;
    value
        .as_deref()
        .and_then(|v| v.parse::<usize>().ok())
        .ok_or_else(|| IndexError::IndexCorrupted("missing or invalid stored dimensions".into()))
}

/// Serialize a float32 vector into the little-endian blob vec0 expects.
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice::<f32, u8>(vec).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_init() {
        let db = Db::open_in_memory(8).expect("Failed to open in-memory DB");
        let tables = existing_tables(&db.conn).unwrap();
        assert_eq!(tables.len(), TABLES.len());
        assert_eq!(db.dimensions(), 8);
        assert_eq!(db.counts().unwrap(), (0, 0, 0));
    }

    #[test]
    fn test_reopen_with_other_dimensions_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        drop(Db::open(&path, 16, "m").unwrap());
        let reopened = Db::open(&path, 16, "m").unwrap();
        assert_eq!(reopened.model().unwrap().as_deref(), Some("m"));
        drop(reopened);

        let err = Db::open(&path, 32, "m").err().unwrap();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 16,
                actual: 32
            }
        ));
    }

    #[test]
    fn test_partial_state_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let db = Db::open(&path, 8, "m").unwrap();
            db.conn.execute_batch("DROP TABLE fingerprints").unwrap();
        }
        let err = Db::open(&path, 8, "m").err().unwrap();
        assert!(matches!(err, IndexError::IndexCorrupted(_)), "{err}");
    }

    #[test]
    fn test_garbage_file_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        std::fs::write(&path, vec![0x42u8; 8192]).unwrap();
        let err = Db::open(&path, 8, "m").err().unwrap();
        assert!(matches!(err, IndexError::IndexCorrupted(_)), "{err}");
    }

    #[test]
    fn test_commit_batch_and_delete_file() {
        use crate::fingerprint::FileFingerprint;
        use crate::graph::DependencyEdge;
        use crate::indexer::chunker::{Chunk, ChunkKind, chunk_id, content_hash};
        use crate::indexer::languages::Language;
        use models::BatchWrite;

        let mut db = Db::open_in_memory(2).unwrap();
        let chunk = Chunk {
            id: chunk_id(ChunkKind::File, "B.py", ""),
            kind: ChunkKind::File,
            filepath: "B.py".into(),
            name: String::new(),
            parent: None,
            start_line: 1,
            end_line: 2,
            text: "from A import foo".into(),
            content_hash: content_hash(b"from A import foo"),
            language: Language::Python,
            truncated: false,
        };
        let fp = FileFingerprint {
            filepath: "B.py".into(),
            content_hash: "h".into(),
            language: Language::Python,
            chunk_ids: [chunk.id.clone()].into_iter().collect(),
            imports: Vec::new(),
            exports: Vec::new(),
            indexed_at: chrono::Utc::now(),
        };
        let edge = DependencyEdge {
            from_file: "B.py".into(),
            to_file: "A.py".into(),
            symbol: "foo".into(),
        };
        db.commit_batch(&BatchWrite {
            upserts: vec![(chunk.clone(), vec![1.0, 0.0])],
            fingerprints: vec![fp],
            edges: vec![("B.py".into(), vec![edge])],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(db.counts().unwrap(), (1, 1, 1));

        db.commit_batch(&BatchWrite {
            deleted_chunks: vec![chunk.id.clone()],
            deleted_files: vec!["B.py".into()],
            ..Default::default()
        })
        .unwrap();
        assert_eq!(db.counts().unwrap(), (0, 0, 0));
    }

    #[test]
    fn test_bad_vector_aborts_whole_batch() {
        use crate::indexer::chunker::{Chunk, ChunkKind};
        use crate::indexer::languages::Language;

        let mut db = Db::open_in_memory(2).unwrap();
        let chunk = |name: &str| Chunk {
            id: format!("function:a.py:{name}"),
            kind: ChunkKind::Function,
            filepath: "a.py".into(),
            name: name.into(),
            parent: None,
            start_line: 1,
            end_line: 1,
            text: name.into(),
            content_hash: name.into(),
            language: Language::Python,
            truncated: false,
        };
        let batch = models::BatchWrite {
            upserts: vec![(chunk("ok"), vec![1.0, 0.0]), (chunk("bad"), vec![1.0])],
            ..Default::default()
        };
        assert!(db.commit_batch(&batch).is_err());
        assert_eq!(db.counts().unwrap().1, 0);
    }

    #[test]
    fn test_serialize_vector() {
        let bytes = serialize_vector(&[1.0, 2.0, -3.5]);
        assert_eq!(bytes.len(), 12);
        // 1.0f32 = 0x3f800000, little endian
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x40]);
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }
}
