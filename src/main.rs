use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reviewrag::config::Config;
use reviewrag::embedder::download;
use reviewrag::engine::Engine;
use reviewrag::fingerprint::IndexMode;
use reviewrag::mcp::server::McpServer;
use std::io::Read;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reviewrag", version, about = "Codebase index and review context retrieval")]
struct Cli {
    /// Config file (default: reviewrag.json)
    #[arg(short, long, default_value = "")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index the repository
    Index {
        #[arg(long, default_value_t = IndexMode::Full)]
        mode: IndexMode,
        /// Files for incremental mode
        files: Vec<String>,
    },
    /// Retrieve review context for a file
    Context {
        file: String,
        /// Diff file, or `-` for stdin
        #[arg(long)]
        patch: Option<String>,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Print index totals
    Stats,
    /// Delete all index state
    Reset {
        /// Confirm the irreversible reset
        #[arg(long)]
        yes: bool,
    },
    /// Serve the MCP tools on stdio
    Serve,
    /// Download the ONNX model files
    DownloadModel,
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_patch(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read patch from stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(source).with_context(|| format!("failed to read patch: {source}"))
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    config.validate()?;

    let open = |config: Config| Engine::open(config).context("failed to open index");

    match cli.command {
        Command::Index { mode, files } => {
            let engine = open(config)?;
            print_json(&engine.index(mode, &files).await?)
        }
        Command::Context { file, patch, top_k } => {
            let patch = patch.as_deref().map(read_patch).transpose()?;
            let engine = open(config)?;
            let result = engine.get_context(&file, patch.as_deref(), top_k).await;
            print_json(&result)
        }
        Command::Stats => {
            let engine = open(config)?;
            print_json(&engine.get_stats().await?)
        }
        Command::Reset { yes } => {
            if !yes {
                anyhow::bail!("reset is irreversible; pass --yes to confirm");
            }
            // Wiping the files also recovers from a corrupted index that
            // would refuse to open.
            Engine::wipe(&config)?;
            print_json(&serde_json::json!({ "reset": true }))
        }
        Command::Serve => McpServer::new(Arc::new(open(config)?)).start().await,
        Command::DownloadModel => {
            let dir = config.model_dir();
            let target = dir.clone();
            // reqwest's blocking client must stay off the async runtime.
            let fetched =
                tokio::task::spawn_blocking(move || download::download_model_files(&target))
                    .await
                    .context("download task failed")??;
            print_json(&serde_json::json!({ "model_dir": dir, "fetched": fetched }))
        }
    }
}

#[tokio::main]
async fn main() {
    // stdout carries JSON and the MCP transport; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("reviewrag {}", env!("CARGO_PKG_VERSION"));
    if let Err(e) = run(Cli::parse()).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
