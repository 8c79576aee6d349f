pub mod linkup;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

pub use linkup::LinkupSearchTool;

/// Name/description/schema triple offered to the model for function calling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// An external action a stage may call. `invoke` never fails: every failure is
/// rendered into the returned text so the calling stage can read it.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema (OpenAPI subset) of the argument object.
    fn parameters(&self) -> Value;

    async fn invoke(&self, args: &Value) -> String;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tool` under its own name, replacing any previous entry.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Resolves an ordered tool selection, failing on the first unknown name.
    pub fn select(&self, names: &[&str]) -> anyhow::Result<Vec<Arc<dyn Tool>>> {
        names
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| {
                    anyhow::anyhow!(
                        "tool '{}' is not registered. Registered tools: {}",
                        name,
                        self.names().join(", ")
                    )
                })
            })
            .collect()
    }
}

pub async fn invoke_with_timeout(tool: &dyn Tool, args: &Value, timeout: Duration) -> String {
    match tokio::time::timeout(timeout, tool.invoke(args)).await {
        Ok(output) => output,
        Err(_) => {
            tracing::warn!(
                tool = tool.name(),
                timeout_secs = timeout.as_secs(),
                "tool invocation timed out"
            );
            format!(
                "Error: tool '{}' timed out after {}s",
                tool.name(),
                timeout.as_secs()
            )
        }
    }
}
