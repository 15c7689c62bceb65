use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use serde::Serialize;

use crate::fingerprint::FileFingerprint;
use crate::graph::DependencyEdge;
use crate::indexer::chunker::{Chunk, ChunkKind};
use crate::indexer::languages::Language;

/// Candidate restriction for a vector query.
#[derive(Debug, Default, Clone)]
pub struct VectorFilter<'a> {
    /// Allowed kinds; empty means any.
    pub kinds: &'a [ChunkKind],
    pub language: Option<Language>,
    /// Drop every chunk of this file.
    pub exclude_file: Option<&'a str>,
    /// Drop this exact chunk.
    pub exclude_chunk: Option<&'a str>,
}

/// One nearest-neighbour result; `score` is cosine similarity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorHit {
    pub chunk_id: String,
    pub kind: ChunkKind,
    pub filepath: String,
    pub name: String,
    pub language: Language,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f32,
    pub text: String,
}

/// Everything one commit batch writes, applied in a single transaction.
#[derive(Debug, Default)]
pub struct BatchWrite {
    /// New or changed chunks with their fresh vectors.
    pub upserts: Vec<(Chunk, Vec<f32>)>,
    /// Chunks whose text is unchanged; only metadata such as line numbers
    /// is refreshed, the vector is left alone.
    pub touched: Vec<Chunk>,
    pub deleted_chunks: Vec<String>,
    pub fingerprints: Vec<FileFingerprint>,
    pub deleted_files: Vec<String>,
    /// Full replacement of each listed file's outgoing edges.
    pub edges: Vec<(String, Vec<DependencyEdge>)>,
}

impl BatchWrite {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty()
            && self.touched.is_empty()
            && self.deleted_chunks.is_empty()
            && self.fingerprints.is_empty()
            && self.deleted_files.is_empty()
            && self.edges.is_empty()
    }
}

// Kinds and languages are stored by their lowercase names.

impl ToSql for ChunkKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ChunkKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        ChunkKind::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown chunk kind: {s}").into()))
    }
}

impl ToSql for Language {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.name()))
    }
}

impl FromSql for Language {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Language::from_name(s).ok_or_else(|| FromSqlError::Other(format!("unknown language: {s}").into()))
    }
}
