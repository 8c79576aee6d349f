//! Pipeline stage model: one concrete record parameterized by data.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::tools::Tool;

pub const QUERY_PLACEHOLDER: &str = "{query}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delegation {
    Disabled,
    /// Roles this stage may hand sub-work to.
    To(Vec<String>),
}

impl Delegation {
    pub fn allows(&self, role: &str) -> bool {
        match self {
            Delegation::Disabled => false,
            Delegation::To(roles) => roles
                .iter()
                .any(|allowed| allowed.trim().eq_ignore_ascii_case(role.trim())),
        }
    }

    pub fn targets(&self) -> &[String] {
        match self {
            Delegation::Disabled => &[],
            Delegation::To(roles) => roles,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub description: String,
    pub expected_output: String,
}

impl TaskSpec {
    /// Fills `{query}` for entry stages; non-entry stages never see the query.
    pub fn render(&self, query: Option<&str>) -> String {
        match query {
            Some(query) => self.description.replace(QUERY_PLACEHOLDER, query.trim()),
            None => self.description.clone(),
        }
    }

    pub fn mentions_query(&self) -> bool {
        self.description.contains(QUERY_PLACEHOLDER)
    }
}

/// What a stage receives when it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInput {
    pub task: String,
    pub context: Option<String>,
}

#[derive(Clone)]
pub struct Stage {
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub task: TaskSpec,
    pub tools: Vec<Arc<dyn Tool>>,
    pub delegation: Delegation,
    pub context: Vec<String>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("role", &self.role)
            .field("goal", &self.goal)
            .field("task", &self.task)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("delegation", &self.delegation)
            .field("context", &self.context)
            .finish()
    }
}

impl Stage {
    pub fn builder(role: impl Into<String>) -> StageBuilder {
        StageBuilder::new(role)
    }

    pub fn is_entry(&self) -> bool {
        self.context.is_empty()
    }

    pub fn tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are {}. {}\nYour personal goal is: {}",
            self.role, self.backstory, self.goal
        );
        if !self.tools.is_empty() {
            prompt.push_str("\n\nYou can call these tools when they help:");
            for tool in &self.tools {
                prompt.push_str(&format!("\n- {}: {}", tool.name(), tool.description()));
            }
            prompt.push_str(
                "\nIf a tool returns an error, you may retry with a rephrased input or \
                 continue with what you have.",
            );
        }
        prompt
    }

    pub fn task_prompt(&self, input: &StageInput) -> String {
        let mut prompt = format!(
            "Current Task: {}\n\nThis is the expected criteria for your final answer: {}\n\
             You MUST return the actual complete content as the final answer, not a summary.",
            input.task, self.task.expected_output
        );
        if let Some(context) = input.context.as_deref() {
            prompt.push_str("\n\nThis is the context you're working with:\n");
            prompt.push_str(context);
        }
        prompt
    }
}

pub struct StageBuilder {
    role: String,
    goal: String,
    backstory: String,
    description: String,
    expected_output: String,
    tools: Vec<Arc<dyn Tool>>,
    delegate_to: Vec<String>,
    context: Vec<String>,
}

impl StageBuilder {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            goal: String::new(),
            backstory: String::new(),
            description: String::new(),
            expected_output: String::new(),
            tools: Vec::new(),
            delegate_to: Vec::new(),
            context: Vec::new(),
        }
    }

    pub fn goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = backstory.into();
        self
    }

    pub fn task(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn expected_output(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = expected_output.into();
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn delegate_to(mut self, role: impl Into<String>) -> Self {
        self.delegate_to.push(role.into());
        self
    }

    pub fn context_from(mut self, role: impl Into<String>) -> Self {
        self.context.push(role.into());
        self
    }

    pub fn build(self) -> Result<Stage> {
        let role = self.role.trim().to_string();
        if role.is_empty() {
            return Err(anyhow::anyhow!("stage role cannot be empty"));
        }
        if self.description.trim().is_empty() {
            return Err(anyhow::anyhow!("stage '{}' has no task description", role));
        }
        if self.goal.trim().is_empty() {
            return Err(anyhow::anyhow!("stage '{}' has no goal", role));
        }
        if self
            .delegate_to
            .iter()
            .any(|target| target.trim().eq_ignore_ascii_case(&role))
        {
            return Err(anyhow::anyhow!("stage '{}' cannot delegate to itself", role));
        }

        let delegation = if self.delegate_to.is_empty() {
            Delegation::Disabled
        } else {
            Delegation::To(self.delegate_to)
        };

        Ok(Stage {
            role,
            goal: self.goal,
            backstory: self.backstory,
            task: TaskSpec {
                description: self.description,
                expected_output: self.expected_output,
            },
            tools: self.tools,
            delegation,
            context: self.context,
        })
    }
}
