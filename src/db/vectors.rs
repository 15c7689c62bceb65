//! Vector index operations: chunk upsert/delete and nearest-neighbour
//! queries over `vec_chunks`.
use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, params};

use super::models::{VectorFilter, VectorHit};
use super::{Db, serialize_vector};
use crate::error::{IndexError, Result};
use crate::indexer::chunker::{Chunk, ChunkKind};

/// Insert or overwrite a chunk and its vector.
///
/// Callers run this inside a transaction so the metadata row and the
/// vector are replaced together.
pub(crate) fn upsert_chunk(conn: &Connection, chunk: &Chunk, vector: &[f32]) -> Result<()> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM chunks WHERE chunk_id = ?",
            params![chunk.id],
            |row| row.get(0),
        )
        .optional()?;

    let rowid = match existing {
        Some(rowid) => {
            update_metadata(conn, chunk)?;
            conn.execute("DELETE FROM vec_chunks WHERE rowid = ?", params![rowid])?;
            rowid
        }
        None => {
            conn.execute(
                r#"
                INSERT INTO chunks (chunk_id, filepath, kind, name, parent, language,
                                    start_line, end_line, text, content_hash, truncated)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    chunk.id,
                    chunk.filepath,
                    chunk.kind,
                    chunk.name,
                    chunk.parent,
                    chunk.language,
                    chunk.start_line as i64,
                    chunk.end_line as i64,
                    chunk.text,
                    chunk.content_hash,
                    chunk.truncated,
                ],
            )?;
            conn.last_insert_rowid()
        }
    };

    conn.execute(
        "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
        params![rowid, serialize_vector(vector)],
    )?;
    Ok(())
}

/// Refresh the metadata of an existing chunk without touching its vector.
pub(crate) fn update_metadata(conn: &Connection, chunk: &Chunk) -> Result<()> {
    conn.execute(
        r#"
        UPDATE chunks SET filepath = ?, kind = ?, name = ?, parent = ?, language = ?,
                          start_line = ?, end_line = ?, text = ?, content_hash = ?, truncated = ?
        WHERE chunk_id = ?
        "#,
        params![
            chunk.filepath,
            chunk.kind,
            chunk.name,
            chunk.parent,
            chunk.language,
            chunk.start_line as i64,
            chunk.end_line as i64,
            chunk.text,
            chunk.content_hash,
            chunk.truncated,
            chunk.id,
        ],
    )?;
    Ok(())
}

/// Delete a chunk and its vector. Returns whether it existed.
pub(crate) fn delete_chunk(conn: &Connection, chunk_id: &str) -> Result<bool> {
    let rowid: Option<i64> = conn
        .query_row(
            "SELECT id FROM chunks WHERE chunk_id = ?",
            params![chunk_id],
            |row| row.get(0),
        )
        .optional()?;
    let Some(rowid) = rowid else {
        return Ok(false);
    };
    // vec0 tables do not take part in cascades.
    conn.execute("DELETE FROM vec_chunks WHERE rowid = ?", params![rowid])?;
    conn.execute("DELETE FROM chunks WHERE id = ?", params![rowid])?;
    Ok(true)
}

fn map_hit(row: &rusqlite::Row<'_>) -> rusqlite::Result<VectorHit> {
    let distance: f64 = row.get(8)?;
    Ok(VectorHit {
        chunk_id: row.get(0)?,
        kind: row.get(1)?,
        filepath: row.get(2)?,
        name: row.get(3)?,
        language: row.get(4)?,
        start_line: row.get::<_, i64>(5)? as usize,
        end_line: row.get::<_, i64>(6)? as usize,
        text: row.get(7)?,
        score: (1.0 - distance) as f32,
    })
}

impl Db {
    /// Upsert a single chunk in its own transaction.
    pub fn upsert(&mut self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        self.check_dimensions(vector)?;
        let tx = self.conn.transaction()?;
        upsert_chunk(&tx, chunk, vector)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a single chunk in its own transaction.
    pub fn delete(&mut self, chunk_id: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let existed = delete_chunk(&tx, chunk_id)?;
        tx.commit()?;
        Ok(existed)
    }

    pub(crate) fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions(),
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Stored chunk id -> content hash for one file.
    pub fn chunk_hashes(&self, filepath: &str) -> Result<HashMap<String, String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT chunk_id, content_hash FROM chunks WHERE filepath = ?")?;
        let rows = stmt.query_map(params![filepath], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut hashes = HashMap::new();
        for row in rows {
            let (id, hash) = row?;
            hashes.insert(id, hash);
        }
        Ok(hashes)
    }

    /// Stored text of a file's file-kind chunk.
    pub fn file_chunk_text(&self, filepath: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT text FROM chunks WHERE filepath = ? AND kind = ?",
                params![filepath, ChunkKind::File],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Stored vector of a chunk.
    pub fn vector(&self, chunk_id: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                r#"
                SELECT v.embedding FROM vec_chunks v
                JOIN chunks c ON v.rowid = c.id
                WHERE c.chunk_id = ?
                "#,
                params![chunk_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| {
            b.chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        }))
    }

    /// Nearest chunks to `vector` by cosine similarity.
    ///
    /// Never returns more than `top_k` hits. Equal scores are ordered by
    /// ascending chunk id.
    pub fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &VectorFilter<'_>,
    ) -> Result<Vec<VectorHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimensions(vector)?;

        let mut sql = String::from(
            r#"
            SELECT c.chunk_id, c.kind, c.filepath, c.name, c.language,
                   c.start_line, c.end_line, c.text,
                   vec_distance_cosine(v.embedding, ?) AS distance
            FROM vec_chunks v
            JOIN chunks c ON v.rowid = c.id
            "#,
        );
        let mut where_clauses = Vec::new();
        let mut params: Vec<Value> = vec![Value::Blob(serialize_vector(vector))];

        if !filter.kinds.is_empty() {
            let placeholders = vec!["?"; filter.kinds.len()].join(", ");
            where_clauses.push(format!("c.kind IN ({placeholders})"));
            params.extend(
                filter
                    .kinds
                    .iter()
                    .map(|k| Value::Text(k.as_str().to_string())),
            );
        }
        if let Some(lang) = filter.language {
            where_clauses.push("c.language = ?".to_string());
            params.push(Value::Text(lang.name().to_string()));
        }
        if let Some(file) = filter.exclude_file {
            where_clauses.push("c.filepath != ?".to_string());
            params.push(Value::Text(file.to_string()));
        }
        if let Some(id) = filter.exclude_chunk {
            where_clauses.push("c.chunk_id != ?".to_string());
            params.push(Value::Text(id.to_string()));
        }

        if !where_clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY distance ASC, c.chunk_id ASC LIMIT ?");
        params.push(Value::Integer(top_k as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), map_hit)?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::chunker::{chunk_id, content_hash};
    use crate::indexer::languages::Language;

    fn chunk(kind: ChunkKind, filepath: &str, name: &str, text: &str) -> Chunk {
        Chunk {
            id: chunk_id(kind, filepath, name),
            kind,
            filepath: filepath.to_string(),
            name: name.to_string(),
            parent: None,
            start_line: 1,
            end_line: 1,
            text: text.to_string(),
            content_hash: content_hash(text.as_bytes()),
            language: Language::Python,
            truncated: false,
        }
    }

    fn unit(i: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 4];
        v[i] = 1.0;
        v
    }

    #[test]
    fn test_upsert_overwrites() {
        let mut db = Db::open_in_memory(4).unwrap();
        let mut c = chunk(ChunkKind::Function, "a.py", "foo", "def foo(): pass");
        db.upsert(&c, &unit(0)).unwrap();
        c.text = "def foo(): return 2".into();
        db.upsert(&c, &unit(1)).unwrap();

        assert_eq!(db.counts().unwrap().1, 1);
        assert_eq!(db.vector(&c.id).unwrap(), Some(unit(1)));
        let hits = db.query(&unit(1), 5, &VectorFilter::default()).unwrap();
        assert_eq!(hits[0].text, "def foo(): return 2");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_query_filters_and_limit() {
        let mut db = Db::open_in_memory(4).unwrap();
        db.upsert(&chunk(ChunkKind::File, "a.py", "", "a"), &unit(0)).unwrap();
        db.upsert(&chunk(ChunkKind::File, "b.py", "", "b"), &unit(0)).unwrap();
        db.upsert(&chunk(ChunkKind::Function, "b.py", "f", "f"), &unit(0)).unwrap();
        db.upsert(&chunk(ChunkKind::File, "c.py", "", "c"), &unit(2)).unwrap();

        let files = db
            .query(
                &unit(0),
                10,
                &VectorFilter {
                    kinds: &[ChunkKind::File],
                    exclude_file: Some("a.py"),
                    ..Default::default()
                },
            )
            .unwrap();
        let ids: Vec<&str> = files.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["file:b.py", "file:c.py"]);

        let limited = db.query(&unit(0), 2, &VectorFilter::default()).unwrap();
        assert_eq!(limited.len(), 2);
        // Equal distances break ties by chunk id.
        assert_eq!(limited[0].chunk_id, "file:a.py");
        assert_eq!(limited[1].chunk_id, "file:b.py");

        let excluded = db
            .query(
                &unit(0),
                10,
                &VectorFilter {
                    exclude_chunk: Some("file:a.py"),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(excluded.iter().all(|h| h.chunk_id != "file:a.py"));
        assert!(db.query(&unit(0), 0, &VectorFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_vector() {
        let mut db = Db::open_in_memory(4).unwrap();
        let c = chunk(ChunkKind::Class, "m.py", "Model", "class Model: pass");
        db.upsert(&c, &unit(3)).unwrap();
        assert!(db.delete(&c.id).unwrap());
        assert!(!db.delete(&c.id).unwrap());
        assert!(db.vector(&c.id).unwrap().is_none());
        assert_eq!(db.counts().unwrap(), (0, 0, 0));
    }

    #[test]
    fn test_wrong_dimensions_rejected() {
        let mut db = Db::open_in_memory(4).unwrap();
        let c = chunk(ChunkKind::File, "a.py", "", "a");
        let err = db.upsert(&c, &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 4, actual: 2 }));
    }
}
