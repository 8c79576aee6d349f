use std::collections::HashSet;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::agents::executor::StageExecutor;
use crate::agents::stage::{Stage, StageInput};

/// Output of one stage within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRecord {
    pub role: String,
    pub input: StageInput,
    pub output: String,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutcome {
    pub records: Vec<StageRecord>,
    /// Output of the terminal stage.
    pub output: String,
}

impl PipelineOutcome {
    pub fn record(&self, role: &str) -> Option<&StageRecord> {
        self.records
            .iter()
            .find(|record| record.role.eq_ignore_ascii_case(role))
    }
}

/// Ordered stages executed strictly one after another.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, stages: Vec<Stage>) -> Result<Self> {
        let name = name.into();
        validate_stages(&stages).with_context(|| format!("invalid pipeline '{}'", name))?;
        Ok(Self { name, stages })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, role: &str) -> Option<&Stage> {
        self.stages
            .iter()
            .find(|stage| stage.role.eq_ignore_ascii_case(role))
    }

    pub fn terminal(&self) -> &Stage {
        // Non-empty by construction.
        &self.stages[self.stages.len() - 1]
    }

    /// Runs every stage in order. The query reaches entry stages only; later
    /// stages see the outputs of the stages they name as context. The first
    /// failing stage aborts the run.
    pub async fn run(&self, query: &str, executor: &StageExecutor) -> Result<PipelineOutcome> {
        let mut records = Vec::<StageRecord>::with_capacity(self.stages.len());

        for (idx, stage) in self.stages.iter().enumerate() {
            let input = StageInput {
                task: stage.task.render(stage.is_entry().then_some(query)),
                context: assemble_context(stage, &records),
            };

            tracing::info!(
                pipeline = %self.name,
                stage = %stage.role,
                position = idx + 1,
                total = self.stages.len(),
                model = executor.model_name(),
                "stage started"
            );
            let started = Instant::now();
            let output = executor
                .execute(stage, &input, &self.stages)
                .await
                .with_context(|| {
                    format!("pipeline '{}' aborted at stage '{}'", self.name, stage.role)
                })?;
            let elapsed_ms = started.elapsed().as_millis();
            tracing::info!(
                pipeline = %self.name,
                stage = %stage.role,
                elapsed_ms,
                output_chars = output.chars().count(),
                "stage completed"
            );

            records.push(StageRecord {
                role: stage.role.clone(),
                input,
                output,
                elapsed_ms,
            });
        }

        let output = records
            .last()
            .map(|record| record.output.clone())
            .context("pipeline produced no output")?;
        Ok(PipelineOutcome { records, output })
    }
}

/// Builds the context text a stage sees from the upstream records it names.
/// A single upstream output is passed through verbatim; several are headed
/// by their role.
pub fn assemble_context(stage: &Stage, records: &[StageRecord]) -> Option<String> {
    let upstream = stage
        .context
        .iter()
        .filter_map(|role| {
            records
                .iter()
                .find(|record| record.role.eq_ignore_ascii_case(role))
        })
        .collect::<Vec<&StageRecord>>();

    match upstream.as_slice() {
        [] => None,
        [single] => Some(single.output.clone()),
        many => Some(
            many.iter()
                .map(|record| format!("## {}\n{}", record.role, record.output))
                .collect::<Vec<String>>()
                .join("\n\n"),
        ),
    }
}

pub fn validate_stages(stages: &[Stage]) -> Result<()> {
    if stages.is_empty() {
        return Err(anyhow::anyhow!("a pipeline needs at least one stage"));
    }

    let all_roles = stages
        .iter()
        .map(|stage| stage.role.to_ascii_lowercase())
        .collect::<HashSet<String>>();
    if all_roles.len() != stages.len() {
        return Err(anyhow::anyhow!("stage roles must be unique"));
    }

    let mut earlier = HashSet::<String>::new();
    for stage in stages {
        for upstream in &stage.context {
            let key = upstream.trim().to_ascii_lowercase();
            if !earlier.contains(&key) {
                return Err(anyhow::anyhow!(
                    "stage '{}' takes context from '{}', which does not run before it",
                    stage.role,
                    upstream
                ));
            }
        }
        for target in stage.delegation.targets() {
            if !all_roles.contains(&target.trim().to_ascii_lowercase()) {
                return Err(anyhow::anyhow!(
                    "stage '{}' delegates to unknown role '{}'",
                    stage.role,
                    target
                ));
            }
        }
        if !stage.is_entry() && stage.task.mentions_query() {
            return Err(anyhow::anyhow!(
                "stage '{}' is not an entry stage and must not reference the query",
                stage.role
            ));
        }
        earlier.insert(stage.role.to_ascii_lowercase());
    }

    Ok(())
}
