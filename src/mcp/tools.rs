//! MCP tool handlers.
//!
//! 1. index_codebase – full or incremental indexing
//! 2. get_context    – similar files, related chunks and dependencies for a file
//! 3. get_stats      – index totals and storage size
//! 4. reset_index    – drop all state (requires `confirm: true`)
//! 5. search_code    – free-text similarity search
use crate::fingerprint::IndexMode;
use crate::indexer::chunker::ChunkKind;
use crate::indexer::languages::Language;
use crate::mcp::server::McpContext;
use rmcp::handler::server::ServerHandler;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{ErrorData as McpError, handler::server::tool::ToolRouter, model::*, tool, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

// ── Parameter structs ────────────────────────────────────────────────

#[derive(Deserialize, JsonSchema)]
struct IndexParams {
    /// full | incremental (default: full)
    mode: Option<String>,
    /// Files to index in incremental mode, relative to the repository root
    files: Option<Vec<String>>,
}

#[derive(Deserialize, JsonSchema)]
struct ContextParams {
    /// File under review, relative to the repository root
    filepath: String,
    /// Unified diff of the change (the file content is used when omitted)
    patch: Option<String>,
    /// Max similar files and related chunks (default: 5)
    top_k: Option<usize>,
}

#[derive(Deserialize, JsonSchema)]
struct ResetParams {
    /// Must be true; the reset cannot be undone
    confirm: bool,
}

#[derive(Deserialize, JsonSchema)]
struct SearchCodeParams {
    /// Natural language or code snippet
    query: String,
    /// Max results (default: 5)
    top_k: Option<usize>,
    /// Chunk kind filter: file | function | class | component
    kind: Option<String>,
    /// Language filter: python | typescript | tsx | javascript | go | rust
    language: Option<String>,
}

// ── Response helpers ─────────────────────────────────────────────────

fn json_result(value: impl serde::Serialize) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| McpError::internal_error(format!("serialize failed: {e}"), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn error_result(msg: &str) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg.to_string())]))
}

// ── Tool implementations ─────────────────────────────────────────────

#[derive(Clone)]
pub struct AppTools {
    pub ctx: McpContext,
    pub tool_router: ToolRouter<Self>,
}

impl ServerHandler for AppTools {}

#[tool_router]
impl AppTools {
    pub fn new(ctx: McpContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Index the codebase. mode=full rescans the repository and removes deleted files; mode=incremental indexes only the given files and never deletes. Unchanged files are skipped by content hash."
    )]
    async fn index_codebase(
        &self,
        params: Parameters<IndexParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let mode: IndexMode = match p.mode.as_deref().unwrap_or("full").parse() {
            Ok(mode) => mode,
            Err(e) => return error_result(&e),
        };
        let files = p.files.unwrap_or_default();
        if mode == IndexMode::Incremental && files.is_empty() {
            return error_result("incremental mode requires files");
        }

        info!("index_codebase: mode={mode}, {} files", files.len());
        match self.ctx.engine.index(mode, &files).await {
            Ok(stats) => json_result(stats),
            Err(e) => error_result(&format!("indexing failed: {e}")),
        }
    }

    #[tool(
        description = "Retrieve review context for a changed file: the most similar files, related functions/classes/components, and its direct imports and importers."
    )]
    async fn get_context(
        &self,
        params: Parameters<ContextParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.filepath.is_empty() {
            return error_result("filepath is required");
        }
        let result = self
            .ctx
            .engine
            .get_context(&p.filepath, p.patch.as_deref(), p.top_k)
            .await;
        json_result(result)
    }

    #[tool(description = "Report indexed file, chunk and dependency edge totals plus storage size")]
    async fn get_stats(&self) -> Result<CallToolResult, McpError> {
        match self.ctx.engine.get_stats().await {
            Ok(stats) => json_result(stats),
            Err(e) => error_result(&format!("stats failed: {e}")),
        }
    }

    #[tool(
        description = "Irreversibly delete all indexed chunks, fingerprints and dependency edges. Requires confirm=true."
    )]
    async fn reset_index(
        &self,
        params: Parameters<ResetParams>,
    ) -> Result<CallToolResult, McpError> {
        match self.ctx.engine.reset(params.0.confirm).await {
            Ok(()) => json_result(serde_json::json!({ "reset": true })),
            Err(e) => error_result(&e.to_string()),
        }
    }

    #[tool(description = "Semantic search over indexed code chunks")]
    async fn search_code(
        &self,
        params: Parameters<SearchCodeParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        if p.query.is_empty() {
            return error_result("query is required");
        }
        let kind = match p.kind.as_deref().map(ChunkKind::parse) {
            Some(None) => return error_result("kind must be file, function, class or component"),
            Some(kind) => kind,
            None => None,
        };
        let language = match p.language.as_deref().map(Language::from_name) {
            Some(None) => return error_result("unknown language"),
            Some(language) => language,
            None => None,
        };

        match self
            .ctx
            .engine
            .search_similar(&p.query, p.top_k, kind, language)
            .await
        {
            Ok(hits) => json_result(serde_json::json!({ "results": hits })),
            Err(e) => error_result(&format!("search failed: {e}")),
        }
    }
}
