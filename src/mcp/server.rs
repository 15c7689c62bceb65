//! MCP server over stdio using `rmcp`.
use crate::engine::Engine;
use crate::mcp::tools::AppTools;
use anyhow::{Context, Result};
use rmcp::{ServiceExt, handler::server::router::Router, transport::io::stdio};
use std::sync::Arc;
use tracing::info;

/// Shared state handed to every tool handler.
#[derive(Clone)]
pub struct McpContext {
    pub engine: Arc<Engine>,
}

#[derive(Clone)]
pub struct McpServer {
    pub ctx: McpContext,
}

impl McpServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            ctx: McpContext { engine },
        }
    }

    /// Serve on stdin/stdout until the client disconnects.
    pub async fn start(self) -> Result<()> {
        info!("Starting MCP server on stdio...");
        let (stdin, stdout) = stdio();

        let app_tools = AppTools::new(self.ctx.clone());
        let router = Router::new(app_tools.clone()).with_tools(app_tools.tool_router.clone());

        let service = router
            .serve((stdin, stdout))
            .await
            .context("MCP server failed to initialize on stdio")?;
        service
            .waiting()
            .await
            .context("MCP server stopped with an error")?;
        info!("MCP client disconnected");
        Ok(())
    }
}
