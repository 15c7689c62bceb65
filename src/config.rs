/// Configuration module for reviewrag.
///
/// Handles loading, validating, and providing default configuration values.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embedder::download::default_model_dir;

/// File name of the index database inside `state_dir`.
pub const INDEX_DB_FILE: &str = "index.db";

// ── Default value functions ──────────────────────────────────────────

fn default_repo_root() -> String {
    ".".to_string()
}

fn default_state_dir() -> String {
    "./.reviewrag".to_string()
}

fn default_max_chunk_chars() -> usize {
    32_000
}

fn default_search_top_k() -> usize {
    5
}

fn default_ignore_dirs() -> Vec<String> {
    [
        "node_modules",
        "dist",
        "build",
        ".git",
        "__pycache__",
        ".next",
        ".nuxt",
        "venv",
        "env",
        ".venv",
        "coverage",
        ".pytest_cache",
        ".mypy_cache",
        "target",
        ".reviewrag",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_ignore_suffixes() -> Vec<String> {
    [".min.js", ".bundle.js", ".map", ".d.ts"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_workers() -> usize {
    4
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_commit_batch_files() -> usize {
    16
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_dimensions() -> usize {
    384
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_repo_root")]
    pub repo_root: String,

    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,

    #[serde(default = "default_search_top_k")]
    pub search_top_k: usize,

    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,

    #[serde(default = "default_ignore_suffixes")]
    pub ignore_suffixes: Vec<String>,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub model: ModelConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Maximum number of files embedded concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Texts per `embed_batch` call.
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    /// Files committed per database transaction.
    #[serde(default = "default_commit_batch_files")]
    pub commit_batch_files: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderBackend {
    #[default]
    Hashing,
    Onnx,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default)]
    pub backend: EmbedderBackend,

    /// Directory holding `model.onnx` and `tokenizer.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        Self {
            repo_root: default_repo_root(),
            state_dir: default_state_dir(),
            max_chunk_chars: default_max_chunk_chars(),
            search_top_k: default_search_top_k(),
            ignore_dirs: default_ignore_dirs(),
            ignore_suffixes: default_ignore_suffixes(),
            indexing: IndexingConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            embed_batch_size: default_embed_batch_size(),
            commit_batch_files: default_commit_batch_files(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            dimensions: default_dimensions(),
            backend: EmbedderBackend::default(),
            dir: None,
        }
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Config rooted at `repo_root` with state kept in `repo_root/.reviewrag`.
    pub fn for_repo(repo_root: impl AsRef<Path>) -> Self {
        let root = repo_root.as_ref();
        Self {
            repo_root: root.to_string_lossy().to_string(),
            state_dir: root.join(".reviewrag").to_string_lossy().to_string(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// If `config_path` is empty, defaults to `"reviewrag.json"`.
    /// If the file does not exist, returns a default config and generates a
    /// template file for the default path only.
    pub fn load(config_path: &str) -> Result<Self> {
        let path = if config_path.is_empty() {
            "reviewrag.json"
        } else {
            config_path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let cfg = Self::default();

            if path == "reviewrag.json" {
                match cfg.save(path) {
                    Ok(()) => info!("Generated config template: {path}"),
                    Err(e) => warn!("Failed to generate config template: {e}"),
                }
            }

            return Ok(cfg);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;

        let cfg: Config = match serde_json::from_str(&data) {
            Ok(c) => c,
            Err(e) => {
                warn!("Invalid JSON in {path}: {e}");
                warn!("Using default configuration");
                return Ok(Self::default());
            }
        };

        info!("Loaded configuration from {path}");
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data).with_context(|| format!("failed to write config: {path}"))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_chunk_chars > 0, "max_chunk_chars must be positive");
        anyhow::ensure!(self.search_top_k > 0, "search_top_k must be positive");
        anyhow::ensure!(
            self.model.dimensions > 0,
            "model.dimensions must be positive"
        );
        anyhow::ensure!(self.indexing.workers > 0, "indexing.workers must be positive");
        anyhow::ensure!(
            self.indexing.embed_batch_size > 0,
            "indexing.embed_batch_size must be positive"
        );
        anyhow::ensure!(
            self.indexing.commit_batch_files > 0,
            "indexing.commit_batch_files must be positive"
        );
        self.ignore_set()?;
        Ok(())
    }

    /// Path of the index database.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        Path::new(&self.state_dir).join(INDEX_DB_FILE)
    }

    /// Directory the ONNX backend loads its files from.
    #[must_use]
    pub fn model_dir(&self) -> PathBuf {
        self.model
            .dir
            .as_ref()
            .map_or_else(default_model_dir, PathBuf::from)
    }

    /// Whether a directory name is excluded from the full-mode walk.
    #[must_use]
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignore_dirs.iter().any(|d| d == name)
    }

    /// Glob set matching file names with an ignored suffix.
    pub fn ignore_set(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();
        for suffix in &self.ignore_suffixes {
            let pattern = format!("*{suffix}");
            builder.add(
                Glob::new(&pattern).with_context(|| format!("invalid ignore suffix: {suffix}"))?,
            );
        }
        builder.build().context("failed to build ignore set")
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_chunk_chars, 32_000);
        assert_eq!(config.search_top_k, 5);
        assert_eq!(config.model.dimensions, 384);
        assert_eq!(config.model.name, "all-MiniLM-L6-v2");
        assert_eq!(config.model.backend, EmbedderBackend::Hashing);
        assert_eq!(config.indexing.workers, 4);
        assert!(config.is_ignored_dir("node_modules"));
        assert!(!config.is_ignored_dir("src"));
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"{"max_chunk_chars": 1000, "state_dir": "/tmp/state", "model": {"backend": "onnx"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_chunk_chars, 1000);
        assert_eq!(config.db_path(), PathBuf::from("/tmp/state/index.db"));
        assert_eq!(config.model.backend, EmbedderBackend::Onnx);
        // Other fields should have defaults
        assert_eq!(config.search_top_k, 5);
        assert_eq!(config.model.dimensions, 384);
        assert_eq!(config.indexing.commit_batch_files, 16);
    }

    #[test]
    fn test_load_missing_custom_path_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.search_top_k, 5);
        assert!(!path.exists(), "template is only written for the default path");
    }

    #[test]
    fn test_load_invalid_json_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.max_chunk_chars, 32_000);
    }

    #[test]
    fn test_validate_ok() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_values() {
        let mut config = Config::default();
        config.max_chunk_chars = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.indexing.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ignore_set_matches_suffixes() {
        let set = Config::default().ignore_set().unwrap();
        assert!(set.is_match("web/app.min.js"));
        assert!(set.is_match("types/index.d.ts"));
        assert!(!set.is_match("web/app.js"));
        assert!(!set.is_match("src/index.ts"));
    }

    #[test]
    fn test_model_dir_override() {
        let mut config = Config::default();
        assert!(config.model_dir().ends_with("all-MiniLM-L6-v2"));
        config.model.dir = Some("/opt/models/minilm".into());
        assert_eq!(config.model_dir(), PathBuf::from("/opt/models/minilm"));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = Config::for_repo("/work/repo");
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.repo_root, "/work/repo");
        assert_eq!(parsed.state_dir, config.state_dir);
        assert_eq!(parsed.model.backend, config.model.backend);
    }
}
