//! Web search through the Linkup API.
//!
//! The tool is the only capability of the search stage. Every failure mode
//! (missing key, transport error, provider error, bad arguments) is folded into
//! a `"Error occurred while searching: ..."` string.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::RuntimeConfig;
use crate::tools::Tool;

pub const DEFAULT_LINKUP_ENDPOINT: &str = "https://api.linkup.so/v1/search";
pub const LINKUP_SEARCH_TOOL_NAME: &str = "linkup_search";
pub const SEARCH_ERROR_PREFIX: &str = "Error occurred while searching:";

const STRUCTURED_OUTPUT_SCHEMA: &str = r#"{"type":"object","properties":{"answer":{"type":"string"},"sources":{"type":"array","items":{"type":"object","properties":{"name":{"type":"string"},"url":{"type":"string"}}}}},"required":["answer","sources"]}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchDepth {
    Standard,
    Deep,
}

impl SearchDepth {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchDepth::Standard => "standard",
            SearchDepth::Deep => "deep",
        }
    }
}

/// What Linkup returns: raw ranked results, a synthesized answer with sources,
/// or a JSON document shaped by a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchOutputMode {
    #[value(alias = "raw-results")]
    #[serde(alias = "raw_results")]
    SearchResults,
    #[value(alias = "synthesized-answer")]
    #[serde(alias = "synthesized_answer")]
    SourcedAnswer,
    Structured,
}

impl SearchOutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchOutputMode::SearchResults => "searchResults",
            SearchOutputMode::SourcedAnswer => "sourcedAnswer",
            SearchOutputMode::Structured => "structured",
        }
    }
}

#[derive(Debug, Deserialize)]
struct LinkupSearchArgs {
    query: String,
    #[serde(default)]
    depth: Option<SearchDepth>,
    #[serde(default, alias = "output_mode", alias = "outputType")]
    output_type: Option<SearchOutputMode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkupRequest<'a> {
    q: &'a str,
    depth: &'static str,
    output_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    structured_output_schema: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct LinkupResults {
    results: Vec<LinkupResult>,
}

#[derive(Debug, Deserialize)]
struct LinkupResult {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinkupSourcedAnswer {
    answer: String,
    #[serde(default)]
    sources: Vec<LinkupSource>,
}

#[derive(Debug, Deserialize)]
struct LinkupSource {
    #[serde(default)]
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    snippet: Option<String>,
}

#[derive(Clone)]
pub struct LinkupSearchTool {
    endpoint: String,
    api_key: Option<String>,
    default_depth: SearchDepth,
    default_output: SearchOutputMode,
    timeout: Duration,
}

impl fmt::Debug for LinkupSearchTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkupSearchTool")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("default_depth", &self.default_depth)
            .field("default_output", &self.default_output)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl LinkupSearchTool {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            default_depth: SearchDepth::Deep,
            default_output: SearchOutputMode::SearchResults,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn from_config(cfg: &RuntimeConfig) -> Self {
        Self::new(
            cfg.search_endpoint.clone(),
            cfg.credentials.linkup_api_key.clone(),
        )
        .with_defaults(cfg.search_depth, cfg.search_output)
        .with_timeout(Duration::from_secs(cfg.search_timeout_secs))
    }

    pub fn with_defaults(mut self, depth: SearchDepth, output: SearchOutputMode) -> Self {
        self.default_depth = depth;
        self.default_output = output;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn search(&self, args: &Value) -> Result<String> {
        let args: LinkupSearchArgs =
            serde_json::from_value(args.clone()).context("invalid search arguments")?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err(anyhow::anyhow!("search query cannot be empty"));
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("LINKUP_API_KEY is not set"))?;

        let depth = args.depth.unwrap_or(self.default_depth);
        let output = args.output_type.unwrap_or(self.default_output);
        let request = LinkupRequest {
            q: query,
            depth: depth.as_str(),
            output_type: output.as_str(),
            structured_output_schema: matches!(output, SearchOutputMode::Structured)
                .then_some(STRUCTURED_OUTPUT_SCHEMA),
        };

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .context("failed to build Linkup HTTP client")?;
        let response = client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to reach Linkup at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Linkup API error ({}): {}", status, body.trim()));
        }

        let body = response
            .json::<Value>()
            .await
            .context("failed to decode Linkup response")?;
        tracing::debug!(depth = depth.as_str(), output = output.as_str(), "Linkup search completed");
        Ok(render_search_response(output, body))
    }
}

#[async_trait]
impl Tool for LinkupSearchTool {
    fn name(&self) -> &str {
        LINKUP_SEARCH_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Search the web for information using LinkUp and return comprehensive results with source URLs."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query to perform"
                },
                "depth": {
                    "type": "string",
                    "enum": ["standard", "deep"],
                    "description": "Depth of search: 'standard' or 'deep'"
                },
                "output_type": {
                    "type": "string",
                    "enum": ["searchResults", "sourcedAnswer", "structured"],
                    "description": "Output type: 'searchResults', 'sourcedAnswer', or 'structured'"
                }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: &Value) -> String {
        match self.search(args).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(tool = LINKUP_SEARCH_TOOL_NAME, error = %err, "search failed");
                format!("{SEARCH_ERROR_PREFIX} {err:#}")
            }
        }
    }
}

pub fn render_search_response(output: SearchOutputMode, body: Value) -> String {
    match output {
        SearchOutputMode::SearchResults => {
            match serde_json::from_value::<LinkupResults>(body.clone()) {
                Ok(parsed) => render_results(&parsed.results),
                Err(_) => pretty_json(&body),
            }
        }
        SearchOutputMode::SourcedAnswer => {
            match serde_json::from_value::<LinkupSourcedAnswer>(body.clone()) {
                Ok(parsed) => render_sourced_answer(&parsed),
                Err(_) => pretty_json(&body),
            }
        }
        SearchOutputMode::Structured => pretty_json(&body),
    }
}

fn render_results(results: &[LinkupResult]) -> String {
    if results.is_empty() {
        return "No search results found.".to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(idx, result)| {
            let mut block = format!("{}. {}\n   Source: {}", idx + 1, result.name, result.url);
            if let Some(content) = result.content.as_deref().map(str::trim) {
                if !content.is_empty() {
                    block.push_str("\n   ");
                    block.push_str(content);
                }
            }
            block
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}

fn render_sourced_answer(answer: &LinkupSourcedAnswer) -> String {
    let mut out = answer.answer.trim().to_string();
    if !answer.sources.is_empty() {
        out.push_str("\n\nSources:");
        for source in &answer.sources {
            out.push_str(&format!("\n- {} ({})", source.name, source.url));
            if let Some(snippet) = source.snippet.as_deref().map(str::trim) {
                if !snippet.is_empty() {
                    out.push_str(&format!(": {snippet}"));
                }
            }
        }
    }
    out
}

fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
