use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::agents::executor::StageExecutor;
use crate::agents::stage::Stage;
use crate::config::RuntimeConfig;
use crate::provider::{LanguageModel, resolve_model};
use crate::tools::linkup::LINKUP_SEARCH_TOOL_NAME;
use crate::tools::{LinkupSearchTool, ToolRegistry};
use crate::workflow::{Pipeline, PipelineOutcome};

pub const WEB_SEARCHER: &str = "Web Searcher";
pub const RESEARCH_ANALYST: &str = "Research Analyst";
pub const TECHNICAL_WRITER: &str = "Technical Writer";

pub const RESEARCH_PIPELINE_NAME: &str = "deep_research";

/// Builds the three research stages. Stages are fresh values each call and are
/// dropped when the run finishes.
pub fn build_research_pipeline(tools: &ToolRegistry) -> Result<Pipeline> {
    let web_searcher = Stage::builder(WEB_SEARCHER)
        .goal("Find the most relevant information on the web, along with source links (urls).")
        .backstory(
            "An expert at formulating search queries and retrieving relevant information. \
             Passes the results to the 'Research Analyst' only.",
        )
        .tools(tools.select(&[LINKUP_SEARCH_TOOL_NAME])?)
        .delegate_to(RESEARCH_ANALYST)
        .task("Search for comprehensive information about: {query}.")
        .expected_output("Detailed raw search results including sources (urls).")
        .build()?;

    let research_analyst = Stage::builder(RESEARCH_ANALYST)
        .goal(
            "Analyze and synthesize raw information into structured insights, along with \
             source links (urls) as citations.",
        )
        .backstory(
            "An expert at analyzing information, identifying patterns, and extracting key \
             insights. If required, can delegate the task of fact checking/verification to \
             'Web Searcher' only. Passes the final results to the 'Technical Writer' only.",
        )
        .delegate_to(WEB_SEARCHER)
        .context_from(WEB_SEARCHER)
        .task(
            "Analyze the raw search results, identify key information, verify facts and \
             prepare a structured analysis.",
        )
        .expected_output(
            "A structured analysis of the information with verified facts and key insights, \
             along with source links",
        )
        .build()?;

    let technical_writer = Stage::builder(TECHNICAL_WRITER)
        .goal(
            "Create well-structured, clear, and comprehensive responses in markdown format, \
             with citations/source links (urls).",
        )
        .backstory("An expert at communicating complex information in an accessible way.")
        .context_from(RESEARCH_ANALYST)
        .task("Create a comprehensive, well-organized response based on the research analysis.")
        .expected_output(
            "A clear, comprehensive response that directly answers the query with proper \
             citations/source links (urls).",
        )
        .build()?;

    Pipeline::new(
        RESEARCH_PIPELINE_NAME,
        vec![web_searcher, research_analyst, technical_writer],
    )
}

/// Search, analysis and writing stages sharing one model client. Cheap to
/// clone; every kickoff builds its own pipeline, so concurrent runs only share
/// read-only state.
#[derive(Clone)]
pub struct ResearchCrew {
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    max_iterations: usize,
    tool_timeout: Duration,
    max_query_chars: usize,
}

impl ResearchCrew {
    pub fn new(model: Arc<dyn LanguageModel>, tools: ToolRegistry) -> Self {
        Self {
            model,
            tools,
            max_iterations: 6,
            tool_timeout: Duration::from_secs(65),
            max_query_chars: 32_000,
        }
    }

    /// Fails when the language-model credential is missing. A missing Linkup
    /// key is not fatal: searches report it as an error string.
    pub fn from_config(cfg: &RuntimeConfig) -> Result<Self> {
        let (model, provider, model_name) = resolve_model(cfg)?;
        if cfg.credentials.linkup_api_key.is_none() {
            tracing::warn!("LINKUP_API_KEY is not set; web searches will report an error");
        }
        tracing::info!(
            provider = ?provider,
            model = %model_name,
            search_depth = cfg.search_depth.as_str(),
            "research crew configured"
        );

        let tools = ToolRegistry::new().with(Arc::new(LinkupSearchTool::from_config(cfg)));
        Ok(Self::new(model, tools)
            .with_max_iterations(cfg.max_stage_iterations)
            .with_tool_timeout(Duration::from_secs(cfg.search_timeout_secs.saturating_add(5)))
            .with_max_query_chars(cfg.max_query_chars))
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_tool_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self
    }

    pub fn with_max_query_chars(mut self, max_query_chars: usize) -> Self {
        self.max_query_chars = max_query_chars;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn validate_query<'a>(&self, query: &'a str) -> Result<&'a str> {
        let query = query.trim();
        if query.is_empty() {
            return Err(anyhow::anyhow!("research query cannot be empty"));
        }
        let chars = query.chars().count();
        if chars > self.max_query_chars {
            return Err(anyhow::anyhow!(
                "research query is too long: {} characters (max {})",
                chars,
                self.max_query_chars
            ));
        }
        Ok(query)
    }

    pub async fn kickoff(&self, query: &str) -> Result<PipelineOutcome> {
        let query = self.validate_query(query)?;
        let pipeline = build_research_pipeline(&self.tools)?;
        let executor = StageExecutor::new(self.model.clone())
            .with_max_iterations(self.max_iterations)
            .with_tool_timeout(self.tool_timeout);

        tracing::info!(query_chars = query.chars().count(), "research run started");
        let outcome = pipeline
            .run(query, &executor)
            .await
            .context("research run failed")?;
        tracing::info!(
            stages = outcome.records.len(),
            output_chars = outcome.output.chars().count(),
            "research run finished"
        );
        Ok(outcome)
    }

    /// Final answer text, or `"Error: <details>"`.
    pub async fn research(&self, query: &str) -> String {
        match self.kickoff(query).await {
            Ok(outcome) => outcome.output,
            Err(err) => error_text(&err),
        }
    }
}

pub async fn run_research(cfg: &RuntimeConfig, query: &str) -> String {
    match ResearchCrew::from_config(cfg) {
        Ok(crew) => crew.research(query).await,
        Err(err) => error_text(&err),
    }
}

fn error_text(err: &anyhow::Error) -> String {
    tracing::error!(error = %format!("{err:#}"), "research failed");
    format!("Error: {err:#}")
}
