//! End-to-end tests for the reviewrag pipeline.
//!
//! Tests the complete flow:
//!   Config → Engine → index → get_context / search → stats → reset
use reviewrag::config::Config;
use reviewrag::db::Db;
use reviewrag::embedder::hashing::HashingEmbedder;
use reviewrag::engine::Engine;
use reviewrag::error::IndexError;
use reviewrag::fingerprint::IndexMode;
use reviewrag::graph::DependencyEdge;
use reviewrag::indexer::chunker::ChunkKind;
use reviewrag::indexer::core::SoftErrorKind;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

const DIMS: usize = 64;

const A_PY: &str = r#""""Helpers for B."""


def foo():
    return 42
"#;

const B_PY: &str = r#"from A import foo


def bar():
    return foo() + 1
"#;

fn repo(files: &[(&str, &str)]) -> (TempDir, Config) {
    let dir = tempdir().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }
    let mut config = Config::for_repo(dir.path());
    config.model.dimensions = DIMS;
    (dir, config)
}

fn open(config: &Config) -> Engine {
    Engine::open_with_embedder(config.clone(), Arc::new(HashingEmbedder::new(DIMS))).unwrap()
}

fn reader(config: &Config) -> Db {
    Db::open_readonly(config.db_path()).unwrap()
}

fn edge(from: &str, to: &str, symbol: &str) -> DependencyEdge {
    DependencyEdge {
        from_file: from.into(),
        to_file: to.into(),
        symbol: symbol.into(),
    }
}

/// A.py defines foo, B.py imports it.
#[tokio::test]
async fn test_two_file_scenario() {
    let (_dir, config) = repo(&[("A.py", A_PY), ("B.py", B_PY)]);
    let engine = open(&config);

    let stats = engine.index(IndexMode::Full, &[]).await.unwrap();
    assert_eq!(stats.files_indexed, 2);
    assert!(stats.errors.is_empty(), "{:?}", stats.errors);

    let db = reader(&config);
    let (files, chunks, edges) = db.counts().unwrap();
    assert_eq!(files, 2);
    assert!(chunks >= 3, "2 file chunks + foo, got {chunks}");
    assert_eq!(edges, 1);
    assert!(db.chunk_hashes("A.py").unwrap().contains_key("function:A.py:foo"));
    assert_eq!(db.load_edges().unwrap(), vec![edge("B.py", "A.py", "foo")]);

    let b = engine.get_context("B.py", None, Some(3)).await;
    assert_eq!(b.dependencies.imports.iter().collect::<Vec<_>>(), vec!["A.py"]);
    assert!(b.dependencies.imported_by.is_empty());

    let a = engine.get_context("A.py", None, Some(3)).await;
    assert_eq!(a.dependencies.imported_by.iter().collect::<Vec<_>>(), vec!["B.py"]);
    assert!(a.dependencies.imports.is_empty());
}

/// Dependencies are exact and never cut by top_k.
#[tokio::test]
async fn test_dependencies_ignore_top_k() {
    let mut files = vec![("A.py", A_PY), ("B.py", B_PY)];
    let fillers: Vec<(String, String)> = (0..6)
        .map(|i| {
            (
                format!("filler_{i}.py"),
                format!("def bar_{i}():\n    return foo() + {i}\n"),
            )
        })
        .collect();
    files.extend(fillers.iter().map(|(p, c)| (p.as_str(), c.as_str())));
    let (_dir, config) = repo(&files);
    let engine = open(&config);
    engine.index(IndexMode::Full, &[]).await.unwrap();

    let result = engine.get_context("B.py", Some(""), Some(1)).await;
    assert_eq!(result.similar_files.len(), 1);
    assert!(result.related_chunks.len() <= 1);
    assert!(result.dependencies.imports.contains("A.py"));
    assert!(result.has_context());
    assert!(
        result
            .similar_files
            .iter()
            .chain(&result.related_chunks)
            .all(|hit| hit.filepath != "B.py"),
        "query file must be excluded"
    );
}

/// Editing only the module docstring re-embeds the file chunk but not foo.
#[tokio::test]
async fn test_docstring_edit_keeps_function_vector() {
    let (dir, config) = repo(&[("A.py", A_PY)]);
    let engine = open(&config);
    engine.index(IndexMode::Full, &[]).await.unwrap();

    let before = reader(&config);
    let hashes_before = before.chunk_hashes("A.py").unwrap();
    let foo_before = before.vector("function:A.py:foo").unwrap().unwrap();
    drop(before);

    fs::write(
        dir.path().join("A.py"),
        A_PY.replace("Helpers for B.", "Shared helpers."),
    )
    .unwrap();
    let stats = engine
        .index(IndexMode::Incremental, &["A.py".to_string()])
        .await
        .unwrap();
    assert_eq!(stats.files_indexed, 1);
    assert_eq!(stats.chunks_created, 1, "only the file chunk is re-embedded");
    assert_eq!(stats.chunks_unchanged, 1);

    let after = reader(&config);
    let hashes_after = after.chunk_hashes("A.py").unwrap();
    assert_ne!(hashes_before["file:A.py"], hashes_after["file:A.py"]);
    assert_eq!(
        hashes_before["function:A.py:foo"],
        hashes_after["function:A.py:foo"]
    );
    assert_eq!(after.vector("function:A.py:foo").unwrap().unwrap(), foo_before);
}

/// Re-indexing unchanged files writes nothing.
#[tokio::test]
async fn test_reindex_is_idempotent() {
    let (_dir, config) = repo(&[("A.py", A_PY), ("B.py", B_PY)]);
    let engine = open(&config);
    engine.index(IndexMode::Full, &[]).await.unwrap();
    let vector_before = reader(&config).vector("file:B.py").unwrap();

    let stats = engine.index(IndexMode::Full, &[]).await.unwrap();
    assert_eq!(stats.files_unchanged, 2);
    assert_eq!(stats.files_indexed, 0);
    assert_eq!(stats.chunks_created, 0);
    assert_eq!(stats.chunks_deleted, 0);
    assert_eq!(reader(&config).vector("file:B.py").unwrap(), vector_before);
}

/// Full mode removes a deleted file's chunks and edges in both directions.
#[tokio::test]
async fn test_full_mode_prunes_deleted_file() {
    let (dir, config) = repo(&[
        ("A.py", A_PY),
        ("B.py", B_PY),
        ("C.py", "from B import bar\n"),
    ]);
    let engine = open(&config);
    engine.index(IndexMode::Full, &[]).await.unwrap();
    assert_eq!(reader(&config).counts().unwrap().2, 2);

    fs::remove_file(dir.path().join("B.py")).unwrap();
    let stats = engine.index(IndexMode::Full, &[]).await.unwrap();
    assert_eq!(stats.files_deleted, 1);
    assert!(stats.chunks_deleted >= 2);

    let db = reader(&config);
    assert!(db.chunk_hashes("B.py").unwrap().is_empty());
    assert!(db.load_edges().unwrap().is_empty());
    assert!(!db.load_fingerprints().unwrap().contains_key("B.py"));

    let a = engine.get_context("A.py", None, None).await;
    assert!(a.dependencies.imported_by.is_empty());
    let c = engine.get_context("C.py", None, None).await;
    assert!(c.dependencies.imports.is_empty());
}

/// Incremental mode only touches the given files and never deletes.
#[tokio::test]
async fn test_incremental_mode_never_deletes() {
    let (dir, config) = repo(&[("A.py", A_PY), ("B.py", B_PY)]);
    let engine = open(&config);
    engine.index(IndexMode::Full, &[]).await.unwrap();

    fs::remove_file(dir.path().join("A.py")).unwrap();
    fs::write(dir.path().join("notes.md"), "# notes").unwrap();
    let stats = engine
        .index(
            IndexMode::Incremental,
            &["B.py".to_string(), "notes.md".to_string(), "A.py".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(stats.files_deleted, 0);
    assert_eq!(stats.files_unchanged, 1);
    let kinds: Vec<SoftErrorKind> = stats.errors.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![SoftErrorKind::UnsupportedLanguage, SoftErrorKind::FileNotFound]
    );

    let db = reader(&config);
    assert!(db.load_fingerprints().unwrap().contains_key("A.py"));
    assert_eq!(db.load_edges().unwrap(), vec![edge("B.py", "A.py", "foo")]);
}

/// reset() then get_stats() reports an empty index.
#[tokio::test]
async fn test_reset_then_stats() {
    let (_dir, config) = repo(&[("A.py", A_PY), ("B.py", B_PY)]);
    let engine = open(&config);
    engine.index(IndexMode::Full, &[]).await.unwrap();
    assert!(engine.get_stats().await.unwrap().total_chunks > 0);

    engine.reset(true).await.unwrap();
    let stats = engine.get_stats().await.unwrap();
    assert_eq!(stats.total_files, 0);
    assert_eq!(stats.total_chunks, 0);
    assert_eq!(stats.total_dependency_edges, 0);
    assert_eq!(stats.dimensions, DIMS);

    let context = engine.get_context("B.py", None, None).await;
    assert!(context.dependencies.imports.is_empty());
}

/// TSX components and relative imports in the JS family.
#[tokio::test]
async fn test_typescript_components_and_imports() {
    let (_dir, config) = repo(&[
        (
            "src/components/Button.tsx",
            "export function Button(props: { label: string }) {\n  return <button>{props.label}</button>;\n}\n",
        ),
        (
            "src/app.ts",
            "import { Button } from './components/Button';\n\nexport const render = () => Button({ label: 'ok' });\n",
        ),
    ]);
    let engine = open(&config);
    let stats = engine.index(IndexMode::Full, &[]).await.unwrap();
    assert_eq!(stats.files_indexed, 2);

    let db = reader(&config);
    assert!(
        db.chunk_hashes("src/components/Button.tsx")
            .unwrap()
            .contains_key("component:src/components/Button.tsx:Button")
    );
    assert_eq!(
        db.load_edges().unwrap(),
        vec![edge("src/app.ts", "src/components/Button.tsx", "Button")]
    );

    let hits = engine
        .search_similar("button label", Some(5), Some(ChunkKind::Component), None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "Button");
}

/// A damaged database refuses to open until it is wiped.
#[tokio::test]
async fn test_corrupted_state_requires_wipe() {
    let (_dir, config) = repo(&[("A.py", A_PY)]);
    {
        let engine = open(&config);
        engine.index(IndexMode::Full, &[]).await.unwrap();
    }
    for suffix in ["-wal", "-shm"] {
        let _ = fs::remove_file(format!("{}{suffix}", config.db_path().display()));
    }
    fs::write(config.db_path(), vec![0x13u8; 16384]).unwrap();

    let err = Engine::open_with_embedder(config.clone(), Arc::new(HashingEmbedder::new(DIMS)))
        .err()
        .unwrap();
    assert!(matches!(err, IndexError::IndexCorrupted(_)), "{err}");

    Engine::wipe(&config).unwrap();
    let engine = open(&config);
    let stats = engine.index(IndexMode::Full, &[]).await.unwrap();
    assert_eq!(stats.files_indexed, 1);
}

#[test]
fn test_state_lives_under_state_dir() {
    let (dir, config) = repo(&[]);
    let _engine = open(&config);
    assert!(Path::new(&config.state_dir).starts_with(dir.path()));
    assert!(config.db_path().exists());
}
