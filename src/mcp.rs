use anyhow::{Context, Result};
use rmcp::{
    ErrorData as McpError, ServiceExt,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars::JsonSchema,
    tool, tool_handler, tool_router,
    transport::stdio,
};
use serde::Deserialize;

use crate::agents::run_research;
use crate::config::RuntimeConfig;

pub const MCP_TOOL_NAME: &str = "crew_research";

#[derive(Debug, Deserialize, JsonSchema)]
#[schemars(crate = "rmcp::schemars")]
pub struct CrewResearchArgs {
    /// The research query or question.
    pub query: String,
}

/// MCP tool server exposing the research crew as one tool. Each call runs
/// against its own copy of the startup configuration.
#[derive(Clone)]
pub struct ResearchToolServer {
    tool_router: ToolRouter<Self>,
    cfg: RuntimeConfig,
}

#[tool_router]
impl ResearchToolServer {
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self {
            tool_router: Self::tool_router(),
            cfg,
        }
    }

    #[tool(
        description = "Run the multi-agent research crew for a user query. Can do both \
                       standard and deep web search. Returns the final markdown research \
                       response, or text starting with 'Error:' when the run fails."
    )]
    pub async fn crew_research(
        &self,
        Parameters(args): Parameters<CrewResearchArgs>,
    ) -> Result<CallToolResult, McpError> {
        tracing::info!(tool = MCP_TOOL_NAME, query_chars = args.query.chars().count(), "mcp tool called");
        let snapshot = self.cfg.clone();
        let answer = run_research(&snapshot, &args.query).await;
        Ok(CallToolResult::success(vec![Content::text(answer)]))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for ResearchToolServer {
    fn get_info(&self) -> ServerInfo {
        let mut info = ServerInfo::default();
        info.instructions = Some(
            "Deep research over the web: a search agent gathers sources, an analyst \
             verifies and structures them, and a writer produces a cited markdown answer."
                .to_string(),
        );
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info
    }
}

/// Serves until the client closes stdin. Logs must go to stderr while this runs.
pub async fn serve_stdio(cfg: RuntimeConfig) -> Result<()> {
    tracing::info!(profile = %cfg.profile, "mcp stdio server starting");
    let running = ResearchToolServer::new(cfg)
        .serve(stdio())
        .await
        .context("failed to start MCP stdio server")?;
    running
        .waiting()
        .await
        .context("MCP stdio server terminated unexpectedly")?;
    tracing::info!("mcp stdio server stopped");
    Ok(())
}
