//! Reasoning loop that drives one stage through the language model.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::agents::stage::{Stage, StageInput};
use crate::provider::{LanguageModel, ModelReply, ModelRequest, ModelTurn, ToolCall};
use crate::tools::{ToolDefinition, invoke_with_timeout};

pub const DELEGATE_TOOL_NAME: &str = "delegate_work";

const FINAL_ANSWER_NUDGE: &str = "You have used all available steps. Do not call any more \
     tools. Give your best complete final answer now, using the information gathered so far.";

type StageFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    task: String,
    #[serde(default)]
    context: Option<String>,
    coworker: String,
}

#[derive(Clone)]
pub struct StageExecutor {
    model: Arc<dyn LanguageModel>,
    max_iterations: usize,
    tool_timeout: Duration,
}

impl StageExecutor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            max_iterations: 6,
            tool_timeout: Duration::from_secs(65),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_tool_timeout(mut self, tool_timeout: Duration) -> Self {
        self.tool_timeout = tool_timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Runs `stage` to a final answer. `coworkers` are the other stages of the
    /// pipeline; only those the stage's delegation policy names are offered.
    pub async fn execute(
        &self,
        stage: &Stage,
        input: &StageInput,
        coworkers: &[Stage],
    ) -> Result<String> {
        self.reason(stage, input, coworkers).await
    }

    fn reason<'a>(
        &'a self,
        stage: &'a Stage,
        input: &'a StageInput,
        coworkers: &'a [Stage],
    ) -> StageFuture<'a> {
        Box::pin(async move {
            let delegates = coworkers
                .iter()
                .filter(|c| c.role != stage.role && stage.delegation.allows(&c.role))
                .collect::<Vec<&Stage>>();

            let mut tools = stage
                .tools
                .iter()
                .map(|tool| tool.definition())
                .collect::<Vec<ToolDefinition>>();
            let mut system = stage.system_prompt();
            if !delegates.is_empty() {
                tools.push(delegate_tool_definition(&delegates));
                system.push_str(&format!(
                    "\n\nYou may delegate sub-work with the {DELEGATE_TOOL_NAME} tool to: {}.",
                    delegates
                        .iter()
                        .map(|c| c.role.as_str())
                        .collect::<Vec<&str>>()
                        .join(", ")
                ));
            }

            let mut request = ModelRequest {
                system,
                turns: vec![ModelTurn::User(stage.task_prompt(input))],
                tools,
            };

            for iteration in 0..self.max_iterations {
                let reply = self.model.generate(&request).await.with_context(|| {
                    format!("stage '{}' failed to invoke the language model", stage.role)
                })?;

                match reply {
                    ModelReply::Text(text) => return final_answer(stage, text),
                    ModelReply::ToolCalls { text, calls } => {
                        tracing::debug!(
                            stage = %stage.role,
                            iteration,
                            calls = calls.len(),
                            "stage requested tool calls"
                        );
                        request.turns.push(ModelTurn::Assistant {
                            text,
                            tool_calls: calls.clone(),
                        });
                        for call in calls {
                            let output = self.dispatch(stage, &call, &delegates).await;
                            request.turns.push(ModelTurn::ToolResult {
                                call_id: call.id,
                                name: call.name,
                                output,
                            });
                        }
                    }
                }
            }

            tracing::warn!(
                stage = %stage.role,
                max_iterations = self.max_iterations,
                "stage iteration budget exhausted; requesting final answer"
            );
            request.tools.clear();
            request
                .turns
                .push(ModelTurn::User(FINAL_ANSWER_NUDGE.to_string()));
            let reply = self.model.generate(&request).await.with_context(|| {
                format!("stage '{}' failed to invoke the language model", stage.role)
            })?;
            match reply {
                ModelReply::Text(text) | ModelReply::ToolCalls { text: Some(text), .. } => {
                    final_answer(stage, text)
                }
                ModelReply::ToolCalls { text: None, .. } => Err(anyhow::anyhow!(
                    "stage '{}' did not produce a final answer within {} iterations",
                    stage.role,
                    self.max_iterations
                )),
            }
        })
    }

    async fn dispatch(&self, stage: &Stage, call: &ToolCall, delegates: &[&Stage]) -> String {
        tracing::info!(stage = %stage.role, tool = %call.name, "tool requested");

        if call.name == DELEGATE_TOOL_NAME && !delegates.is_empty() {
            return self.delegate(stage, &call.arguments, delegates).await;
        }

        match stage.tool(&call.name) {
            Some(tool) => invoke_with_timeout(tool.as_ref(), &call.arguments, self.tool_timeout).await,
            None => {
                let mut available = stage
                    .tools
                    .iter()
                    .map(|tool| tool.name().to_string())
                    .collect::<Vec<String>>();
                if !delegates.is_empty() {
                    available.push(DELEGATE_TOOL_NAME.to_string());
                }
                format!(
                    "Error: tool '{}' is not available to {}. Available tools: {}",
                    call.name,
                    stage.role,
                    if available.is_empty() {
                        "<none>".to_string()
                    } else {
                        available.join(", ")
                    }
                )
            }
        }
    }

    /// Best-effort hand-off: the coworker reasons once over the delegated task
    /// with its own tools, no upstream context and no further delegation.
    async fn delegate(&self, stage: &Stage, args: &Value, delegates: &[&Stage]) -> String {
        let args = match serde_json::from_value::<DelegateArgs>(args.clone()) {
            Ok(args) => args,
            Err(err) => return format!("Error: invalid {DELEGATE_TOOL_NAME} arguments: {err}"),
        };

        let Some(coworker) = delegates
            .iter()
            .find(|c| c.role.eq_ignore_ascii_case(args.coworker.trim()))
        else {
            return format!(
                "Error: coworker '{}' is not available to {}. Available coworkers: {}",
                args.coworker.trim(),
                stage.role,
                delegates
                    .iter()
                    .map(|c| c.role.as_str())
                    .collect::<Vec<&str>>()
                    .join(", ")
            );
        };

        tracing::info!(from = %stage.role, to = %coworker.role, "delegating work");
        let input = StageInput {
            task: args.task,
            context: args.context.filter(|context| !context.trim().is_empty()),
        };
        match self.reason(coworker, &input, &[]).await {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(from = %stage.role, to = %coworker.role, error = %err, "delegation failed");
                format!("Error: delegation to '{}' failed: {err:#}", coworker.role)
            }
        }
    }
}

fn final_answer(stage: &Stage, text: String) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(anyhow::anyhow!(
            "stage '{}' returned an empty answer",
            stage.role
        ));
    }
    Ok(trimmed.to_string())
}

pub fn delegate_tool_definition(delegates: &[&Stage]) -> ToolDefinition {
    let roles = delegates
        .iter()
        .map(|c| c.role.clone())
        .collect::<Vec<String>>();
    ToolDefinition {
        name: DELEGATE_TOOL_NAME.to_string(),
        description: "Delegate a specific sub-task to a coworker and receive their answer. \
                      Provide all the context they need; they cannot see your conversation."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "The sub-task the coworker should perform"
                },
                "context": {
                    "type": "string",
                    "description": "Everything the coworker needs to know to do the task"
                },
                "coworker": {
                    "type": "string",
                    "enum": roles,
                    "description": "Role of the coworker to delegate to"
                }
            },
            "required": ["task", "coworker"]
        }),
    }
}
