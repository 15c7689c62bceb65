//! Fetches the all-MiniLM-L6-v2 ONNX export into the model cache.
//!
//! Only the `download-model` command calls this; opening an engine never
//! touches the network.
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

const REPO_URL: &str = "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main";

/// A file the ONNX embedder loads, and where the model repo keeps it.
struct ModelFile {
    local: &'static str,
    remote: &'static str,
}

static MODEL_FILES: [ModelFile; 3] = [
    ModelFile {
        local: "model.onnx",
        remote: "onnx/model.onnx",
    },
    ModelFile {
        local: "tokenizer.json",
        remote: "tokenizer.json",
    },
    ModelFile {
        local: "config.json",
        remote: "config.json",
    },
];

#[must_use]
pub fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("reviewrag")
        .join("all-MiniLM-L6-v2")
}

fn missing(model_dir: &Path) -> impl Iterator<Item = &'static ModelFile> + '_ {
    MODEL_FILES
        .iter()
        .filter(move |f| !model_dir.join(f.local).is_file())
}

#[must_use]
pub fn all_files_present(model_dir: &Path) -> bool {
    missing(model_dir).next().is_none()
}

/// Download whichever model files are absent from `model_dir`.
///
/// Returns the paths written; empty when the cache was already complete.
pub fn download_model_files(model_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(model_dir)
        .with_context(|| format!("failed to create {}", model_dir.display()))?;

    let todo: Vec<&ModelFile> = missing(model_dir).collect();
    if todo.is_empty() {
        info!("Model files already cached in {}", model_dir.display());
        return Ok(Vec::new());
    }

    let client = reqwest::blocking::Client::builder()
        .user_agent(concat!("reviewrag/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let mut written = Vec::with_capacity(todo.len());
    for file in todo {
        let url = format!("{REPO_URL}/{}", file.remote);
        let dest = model_dir.join(file.local);
        info!("Fetching {}", file.local);
        fetch(&client, &url, &dest).with_context(|| format!("failed to download {url}"))?;
        written.push(dest);
    }
    info!("Model ready in {}", model_dir.display());
    Ok(written)
}

/// Stream `url` into `dest` through a `.part` file renamed on success.
fn fetch(client: &reqwest::blocking::Client, url: &str, dest: &Path) -> Result<()> {
    let mut resp = client.get(url).send()?.error_for_status()?;

    let bar = match resp.content_length() {
        Some(len) if len > 0 => {
            let bar = ProgressBar::new(len);
            bar.set_style(
                ProgressStyle::with_template("  {bar:40.cyan/blue} {bytes}/{total_bytes} {msg}")
                    .context("invalid progress template")?,
            );
            bar
        }
        _ => ProgressBar::new_spinner(),
    };

    let partial = dest.with_extension("part");
    let file = fs::File::create(&partial)
        .with_context(|| format!("failed to create {}", partial.display()))?;
    let copied = std::io::copy(&mut resp, &mut bar.wrap_write(file))
        .with_context(|| format!("failed to write {}", partial.display()))?;
    bar.finish_and_clear();
    debug!("{url}: {copied} bytes");

    fs::rename(&partial, dest)
        .with_context(|| format!("failed to move download into {}", dest.display()))?;
    Ok(())
}
