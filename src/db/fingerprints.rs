//! Fingerprint table: file path -> content hash, chunk ids, imports, exports.
use std::collections::BTreeMap;

use rusqlite::{Connection, params};

use super::Db;
use crate::error::Result;
use crate::fingerprint::FileFingerprint;

pub(crate) fn upsert_fingerprint(conn: &Connection, fp: &FileFingerprint) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO fingerprints (filepath, content_hash, language, chunk_ids, imports, exports, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(filepath) DO UPDATE SET
            content_hash = excluded.content_hash,
            language = excluded.language,
            chunk_ids = excluded.chunk_ids,
            imports = excluded.imports,
            exports = excluded.exports,
            indexed_at = excluded.indexed_at
        "#,
        params![
            fp.filepath,
            fp.content_hash,
            fp.language,
            serde_json::to_string(&fp.chunk_ids)?,
            serde_json::to_string(&fp.imports)?,
            serde_json::to_string(&fp.exports)?,
            fp.indexed_at,
        ],
    )?;
    Ok(())
}

pub(crate) fn delete_fingerprint(conn: &Connection, filepath: &str) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM fingerprints WHERE filepath = ?",
        params![filepath],
    )?;
    Ok(rows > 0)
}

impl Db {
    /// All fingerprints keyed by file path.
    pub fn load_fingerprints(&self) -> Result<BTreeMap<String, FileFingerprint>> {
        let mut stmt = self.conn.prepare(
            "SELECT filepath, content_hash, language, chunk_ids, imports, exports, indexed_at FROM fingerprints",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get(6)?,
            ))
        })?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (filepath, content_hash, language, chunk_ids, imports, exports, indexed_at) = row?;
            let fp = FileFingerprint {
                filepath: filepath.clone(),
                content_hash,
                language,
                chunk_ids: serde_json::from_str(&chunk_ids)?,
                imports: serde_json::from_str(&imports)?,
                exports: serde_json::from_str(&exports)?,
                indexed_at,
            };
            out.insert(filepath, fp);
        }
        Ok(out)
    }
}
