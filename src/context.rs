//! Context Composer: similarity search plus exact dependency lookup for a
//! file under review.
//!
//! The three groups answer different questions and are never merged or
//! re-ranked against each other. `similar_files` and `related_chunks` are
//! capped at `top_k`; `dependencies` is always complete.
use std::collections::BTreeSet;
use std::path::Path;

use serde::Serialize;

use crate::db::Db;
use crate::db::models::{VectorFilter, VectorHit};
use crate::embedder::Embedder;
use crate::error::{IndexError, Result};
use crate::graph::DependencyGraph;
use crate::indexer::chunker::ChunkKind;

const DIFF_HEADERS: [&str; 5] = ["diff", "index ", "---", "+++", "@@"];

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Dependencies {
    /// Files the queried file imports.
    pub imports: BTreeSet<String>,
    /// Files importing the queried file.
    pub imported_by: BTreeSet<String>,
}

impl Dependencies {
    pub fn of(graph: &DependencyGraph, filepath: &str) -> Self {
        Self {
            imports: graph.forward(filepath),
            imported_by: graph.reverse(filepath),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.imported_by.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextResult {
    pub filepath: String,
    pub similar_files: Vec<VectorHit>,
    pub related_chunks: Vec<VectorHit>,
    pub dependencies: Dependencies,
}

impl ContextResult {
    pub fn empty(filepath: &str) -> Self {
        Self {
            filepath: filepath.to_string(),
            similar_files: Vec::new(),
            related_chunks: Vec::new(),
            dependencies: Dependencies::default(),
        }
    }

    /// Union of imports and importers.
    pub fn files(&self) -> BTreeSet<String> {
        self.dependencies
            .imports
            .union(&self.dependencies.imported_by)
            .cloned()
            .collect()
    }

    pub fn has_context(&self) -> bool {
        !self.similar_files.is_empty()
            || !self.related_chunks.is_empty()
            || !self.dependencies.is_empty()
    }
}

/// Turn a unified diff into query text: headers dropped, `+`/`-` markers
/// stripped, blank lines skipped.
pub fn clean_patch(filepath: &str, patch: &str) -> String {
    let body: Vec<&str> = patch
        .lines()
        .filter(|line| !DIFF_HEADERS.iter().any(|h| line.starts_with(h)))
        .map(|line| line.strip_prefix(['+', '-']).unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .collect();
    if body.is_empty() {
        return String::new();
    }
    format!("file: {filepath}\n{}", body.join("\n"))
}

/// Pick the text to embed for a query.
///
/// A non-empty patch wins; otherwise the stored file chunk, then the file
/// on disk. `FileNotFound` when none exist.
pub fn query_text(
    db: &Db,
    repo_root: &Path,
    filepath: &str,
    patch: Option<&str>,
) -> Result<String> {
    if let Some(patch) = patch {
        let cleaned = clean_patch(filepath, patch);
        if !cleaned.is_empty() {
            return Ok(cleaned);
        }
    }
    if let Some(text) = db.file_chunk_text(filepath)? {
        return Ok(text);
    }
    match std::fs::read(repo_root.join(filepath)) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(IndexError::FileNotFound(filepath.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Run both similarity queries for `text`, excluding the queried file.
pub fn compose(
    db: &Db,
    embedder: &dyn Embedder,
    filepath: &str,
    text: &str,
    top_k: usize,
    dependencies: Dependencies,
) -> Result<ContextResult> {
    let vector = embedder.embed(text)?;

    let similar_files = db.query(
        &vector,
        top_k,
        &VectorFilter {
            kinds: &[ChunkKind::File],
            exclude_file: Some(filepath),
            ..Default::default()
        },
    )?;
    let related_chunks = db.query(
        &vector,
        top_k,
        &VectorFilter {
            kinds: &ChunkKind::SYMBOLS,
            exclude_file: Some(filepath),
            ..Default::default()
        },
    )?;

    Ok(ContextResult {
        filepath: filepath.to_string(),
        similar_files,
        related_chunks,
        dependencies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::hashing::HashingEmbedder;
    use crate::indexer::chunker::{Chunk, chunk_id, content_hash};
    use crate::indexer::languages::Language;

    const PATCH: &str = "diff --git a/app.py b/app.py
index 83db48f..bf269f4 100644
--- a/app.py
+++ b/app.py
@@ -1,3 +1,4 @@
 import os
-def old():
+def new():
+    return os.getcwd()
";

    #[test]
    fn test_clean_patch() {
        let cleaned = clean_patch("app.py", PATCH);
        assert_eq!(
            cleaned,
            "file: app.py\n import os\ndef old():\ndef new():\n    return os.getcwd()"
        );
        assert_eq!(clean_patch("app.py", "@@ -1 +1 @@\n"), "");
    }

    #[test]
    fn test_has_context_and_files() {
        let mut result = ContextResult::empty("a.py");
        assert!(!result.has_context());
        result.dependencies.imported_by.insert("b.py".into());
        result.dependencies.imports.insert("c.py".into());
        assert!(result.has_context());
        assert_eq!(
            result.files().into_iter().collect::<Vec<_>>(),
            vec!["b.py", "c.py"]
        );
    }

    #[test]
    fn test_query_text_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("disk.py"), "x = 1\n").unwrap();
        let db = Db::open_in_memory(8).unwrap();

        let text = query_text(&db, dir.path(), "disk.py", Some("")).unwrap();
        assert_eq!(text, "x = 1\n");
        let text = query_text(&db, dir.path(), "disk.py", Some(PATCH)).unwrap();
        assert!(text.starts_with("file: disk.py\n"));
        let err = query_text(&db, dir.path(), "missing.py", None).unwrap_err();
        assert!(matches!(err, IndexError::FileNotFound(_)));
    }

    #[test]
    fn test_compose_excludes_query_file_and_caps() {
        let embedder = HashingEmbedder::new(32);
        let mut db = Db::open_in_memory(32).unwrap();
        for (path, kind, name) in [
            ("a.py", ChunkKind::File, ""),
            ("a.py", ChunkKind::Function, "run"),
            ("b.py", ChunkKind::File, ""),
            ("c.py", ChunkKind::File, ""),
            ("c.py", ChunkKind::Function, "run"),
            ("d.py", ChunkKind::Class, "Runner"),
        ] {
            let text = format!("def run(): {path}");
            let chunk = Chunk {
                id: chunk_id(kind, path, name),
                kind,
                filepath: path.into(),
                name: name.into(),
                parent: None,
                start_line: 1,
                end_line: 1,
                content_hash: content_hash(text.as_bytes()),
                text,
                language: Language::Python,
                truncated: false,
            };
            let vector = embedder.embed(&chunk.embedding_text()).unwrap();
            db.upsert(&chunk, &vector).unwrap();
        }

        let result = compose(
            &db,
            &embedder,
            "a.py",
            "def run()",
            1,
            Dependencies::default(),
        )
        .unwrap();
        assert_eq!(result.similar_files.len(), 1);
        assert_eq!(result.related_chunks.len(), 1);
        assert_ne!(result.similar_files[0].filepath, "a.py");
        assert_ne!(result.related_chunks[0].filepath, "a.py");
        assert_eq!(result.similar_files[0].kind, ChunkKind::File);
        assert_ne!(result.related_chunks[0].kind, ChunkKind::File);
    }
}
