//! Serialized dependency graph (adjacency list keyed by file path).
use rusqlite::{Connection, params};

use super::Db;
use crate::error::Result;
use crate::graph::DependencyEdge;

/// Replace every outgoing edge of `from_file`.
pub(crate) fn replace_edges(
    conn: &Connection,
    from_file: &str,
    edges: &[DependencyEdge],
) -> Result<()> {
    conn.execute(
        "DELETE FROM dependency_edges WHERE from_file = ?",
        params![from_file],
    )?;
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO dependency_edges (from_file, to_file, symbol) VALUES (?, ?, ?)",
    )?;
    for edge in edges.iter().filter(|e| e.from_file == from_file) {
        stmt.execute(params![edge.from_file, edge.to_file, edge.symbol])?;
    }
    Ok(())
}

/// Remove edges in both directions for a deleted file.
pub(crate) fn delete_file_edges(conn: &Connection, file: &str) -> Result<usize> {
    let rows = conn.execute(
        "DELETE FROM dependency_edges WHERE from_file = ?1 OR to_file = ?1",
        params![file],
    )?;
    Ok(rows)
}

impl Db {
    pub fn load_edges(&self) -> Result<Vec<DependencyEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT from_file, to_file, symbol FROM dependency_edges ORDER BY from_file, to_file, symbol",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DependencyEdge {
                from_file: row.get(0)?,
                to_file: row.get(1)?,
                symbol: row.get(2)?,
            })
        })?;
        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }
}
