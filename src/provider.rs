use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::cli::Provider;
use crate::config::RuntimeConfig;
use crate::tools::ToolDefinition;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    User(String),
    Assistant {
        text: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        call_id: String,
        name: String,
        output: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub system: String,
    pub turns: Vec<ModelTurn>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Text(String),
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
}

/// One request/response exchange with a chat model that supports function calling.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &ModelRequest) -> Result<ModelReply>;
}

pub fn validate_model_for_provider(provider: Provider, model_name: &str) -> Result<()> {
    let is_valid = match provider {
        Provider::Gemini => model_name.starts_with("gemini"),
        Provider::Openai => !model_name.trim().is_empty() && !model_name.starts_with("gemini"),
        Provider::Auto => true,
    };

    if is_valid {
        return Ok(());
    }

    Err(anyhow::anyhow!(
        "model '{}' is not compatible with provider '{:?}'",
        model_name,
        provider
    ))
}

pub fn detect_provider(cfg: &RuntimeConfig) -> Option<Provider> {
    if cfg.credentials.gemini_api_key.is_some() {
        return Some(Provider::Gemini);
    }
    if cfg.credentials.openai_api_key.is_some() {
        return Some(Provider::Openai);
    }
    None
}

/// Builds the model client for the configured provider. A missing credential
/// is a configuration error and surfaces here, before any stage runs.
pub fn resolve_model(cfg: &RuntimeConfig) -> Result<(Arc<dyn LanguageModel>, Provider, String)> {
    let provider = match cfg.provider {
        Provider::Auto => detect_provider(cfg).context(
            "no language-model credential found. Set GEMINI_API_KEY (or OPENAI_API_KEY), \
             or enter one in chat with /key gemini <value>",
        )?,
        p => p,
    };
    let timeout = Duration::from_secs(cfg.model_timeout_secs);

    match provider {
        Provider::Gemini => {
            let api_key = cfg
                .credentials
                .gemini_api_key
                .clone()
                .context("GEMINI_API_KEY is required for the Gemini provider")?;
            let model_name = cfg
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string());
            validate_model_for_provider(provider, &model_name)?;
            let base_url = cfg
                .model_base_url
                .clone()
                .unwrap_or_else(|| GEMINI_API_BASE.to_string());
            let model = GeminiModel::new(api_key, model_name.clone(), base_url, timeout)?;
            Ok((Arc::new(model), provider, model_name))
        }
        Provider::Openai => {
            let api_key = cfg
                .credentials
                .openai_api_key
                .clone()
                .context("OPENAI_API_KEY is required for the OpenAI provider")?;
            let model_name = cfg
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
            validate_model_for_provider(provider, &model_name)?;
            let base_url = cfg
                .model_base_url
                .clone()
                .unwrap_or_else(|| OPENAI_API_BASE.to_string());
            let model = OpenAiModel::new(api_key, model_name.clone(), base_url, timeout)?;
            Ok((Arc::new(model), provider, model_name))
        }
        Provider::Auto => Err(anyhow::anyhow!(
            "auto provider must be resolved before building a model client"
        )),
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build model HTTP client")
}

async fn read_error_body(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default().trim().to_string()
}

// ---------------------------------------------------------------------------
// Gemini
// ---------------------------------------------------------------------------

pub struct GeminiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTools>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTools {
    function_declarations: Vec<ToolDefinition>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContent,
}

impl GeminiModel {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn text_part(text: &str) -> GeminiPart {
        GeminiPart {
            text: Some(text.to_string()),
            ..Default::default()
        }
    }

    fn convert_turns(turns: &[ModelTurn]) -> Vec<GeminiContent> {
        let mut contents = Vec::<GeminiContent>::new();
        for turn in turns {
            let (role, part) = match turn {
                ModelTurn::User(text) => ("user", vec![Self::text_part(text)]),
                ModelTurn::Assistant { text, tool_calls } => {
                    let mut parts = Vec::new();
                    if let Some(text) = text.as_deref().filter(|t| !t.trim().is_empty()) {
                        parts.push(Self::text_part(text));
                    }
                    for call in tool_calls {
                        parts.push(GeminiPart {
                            function_call: Some(GeminiFunctionCall {
                                name: call.name.clone(),
                                args: call.arguments.clone(),
                            }),
                            ..Default::default()
                        });
                    }
                    ("model", parts)
                }
                ModelTurn::ToolResult { name, output, .. } => (
                    "user",
                    vec![GeminiPart {
                        function_response: Some(GeminiFunctionResponse {
                            name: name.clone(),
                            response: json!({ "content": output }),
                        }),
                        ..Default::default()
                    }],
                ),
            };

            // Consecutive function responses belong to one user turn.
            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) && role == "user" => {
                    last.parts.extend(part)
                }
                _ => contents.push(GeminiContent {
                    role: Some(role.to_string()),
                    parts: part,
                }),
            }
        }
        contents
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelReply> {
        let body = GeminiRequest {
            contents: Self::convert_turns(&request.turns),
            system_instruction: (!request.system.is_empty()).then(|| GeminiContent {
                role: None,
                parts: vec![Self::text_part(&request.system)],
            }),
            tools: if request.tools.is_empty() {
                Vec::new()
            } else {
                vec![GeminiTools {
                    function_declarations: request.tools.clone(),
                }]
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to send request to Gemini API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = read_error_body(response).await;
            anyhow::bail!("Gemini API error ({}): {}", status, error_text);
        }

        let parsed = response
            .json::<GeminiResponse>()
            .await
            .context("failed to parse Gemini API response")?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .context("Gemini API returned no candidates")?;

        let mut text_parts = Vec::new();
        let mut calls = Vec::new();
        for part in candidate.content.parts {
            if let Some(text) = part.text {
                text_parts.push(text);
            }
            if let Some(call) = part.function_call {
                calls.push(ToolCall {
                    // Gemini does not issue call ids.
                    id: format!("gemini_{}_{}", call.name, calls.len()),
                    name: call.name,
                    arguments: call.args,
                });
            }
        }

        let text = text_parts.join("\n");
        if calls.is_empty() {
            Ok(ModelReply::Text(text))
        } else {
            Ok(ModelReply::ToolCalls {
                text: (!text.trim().is_empty()).then_some(text),
                calls,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions
// ---------------------------------------------------------------------------

pub struct OpenAiModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCall>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

impl OpenAiModel {
    pub fn new(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn convert_messages(request: &ModelRequest) -> Vec<Value> {
        let mut messages = Vec::with_capacity(request.turns.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system }));
        }
        for turn in &request.turns {
            messages.push(match turn {
                ModelTurn::User(text) => json!({ "role": "user", "content": text }),
                ModelTurn::Assistant { text, tool_calls } => {
                    let mut message = json!({ "role": "assistant", "content": text });
                    if !tool_calls.is_empty() {
                        message["tool_calls"] = tool_calls
                            .iter()
                            .map(|call| {
                                json!({
                                    "id": call.id,
                                    "type": "function",
                                    "function": {
                                        "name": call.name,
                                        "arguments": call.arguments.to_string()
                                    }
                                })
                            })
                            .collect();
                    }
                    message
                }
                ModelTurn::ToolResult {
                    call_id, output, ..
                } => json!({ "role": "tool", "tool_call_id": call_id, "content": output }),
            });
        }
        messages
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelReply> {
        let mut body = json!({
            "model": self.model,
            "messages": Self::convert_messages(request),
        });
        if !request.tools.is_empty() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| json!({ "type": "function", "function": tool }))
                .collect();
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to send request to OpenAI API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = read_error_body(response).await;
            anyhow::bail!("OpenAI API error ({}): {}", status, error_text);
        }

        let parsed = response
            .json::<OpenAiResponse>()
            .await
            .context("failed to parse OpenAI API response")?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .context("OpenAI API returned no choices")?
            .message;

        if message.tool_calls.is_empty() {
            return Ok(ModelReply::Text(message.content.unwrap_or_default()));
        }

        let calls = message
            .tool_calls
            .into_iter()
            .map(|call| {
                // Undecodable arguments are passed on as the raw string so the
                // tool reports what the model actually sent.
                let arguments = serde_json::from_str(&call.function.arguments).unwrap_or_else(|err| {
                    tracing::warn!(tool = %call.function.name, error = %err, "model sent malformed tool arguments");
                    Value::String(call.function.arguments.clone())
                });
                ToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                }
            })
            .collect();
        Ok(ModelReply::ToolCalls {
            text: message.content.filter(|text| !text.trim().is_empty()),
            calls,
        })
    }
}
