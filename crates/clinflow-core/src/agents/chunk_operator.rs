use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::{call_structured, CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
use crate::workflow::Workflow;

use super::load_prompt;

const DEFAULT_PROMPT: &str = "You are a chunk operator agent. Your job is to perform targeted operations \
on an existing workflow: insert, append, or remove steps.

OPERATIONS:
- INSERT: Add step(s) at a specific position (e.g., \"before step 3\", \"after the loop\")
- APPEND: Add step(s) at the end of the workflow
- REMOVE: Remove specific step(s) from the workflow

IMPORTANT RULES:
1. For INSERT/APPEND: Set prompt fields to null for new steps that need prompts.
2. PRESERVE all unchanged steps exactly as they are.
3. Maintain variable references - update if needed when removing steps.
4. Keep step IDs unique.

Output the modified workflow as valid JSON.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkOperation {
    Insert,
    Append,
    Remove,
}

impl ChunkOperation {
    fn as_str(&self) -> &'static str {
        match self {
            ChunkOperation::Insert => "insert",
            ChunkOperation::Append => "append",
            ChunkOperation::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOperatorInput {
    pub current_workflow: Workflow,
    pub operation: ChunkOperation,
    pub description: String,
    pub tool_specs: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOperatorOutput {
    pub workflow: Option<Workflow>,
    pub success: bool,
    pub error_message: Option<String>,
    pub call_meta: CallMeta,
}

/// Performs a single targeted insert/append/remove operation on a workflow,
/// rather than regenerating or freely editing it (see `EditorAgent` for the
/// latter).
pub struct ChunkOperatorAgent {
    llm: Arc<dyn LlmClient>,
    prompt_override: Option<PathBuf>,
}

impl ChunkOperatorAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, prompt_override: None }
    }

    pub fn with_prompt_override(llm: Arc<dyn LlmClient>, path: PathBuf) -> Self {
        Self { llm, prompt_override: Some(path) }
    }

    pub fn name(&self) -> &'static str {
        "chunk_operator"
    }

    pub async fn run(&self, input: ChunkOperatorInput) -> ChunkOperatorOutput {
        info!(agent = self.name(), operation = input.operation.as_str(), "called");

        let prompt = load_prompt(&self.prompt_override, DEFAULT_PROMPT);
        let current_workflow_str = serde_json::to_string_pretty(&input.current_workflow).unwrap_or_default();
        let tool_specs_str = serde_json::to_string_pretty(&input.tool_specs).unwrap_or_default();
        let system = format!(
            "{prompt}\n\nAVAILABLE TOOLS:\n{tool_specs_str}\n\nCURRENT WORKFLOW:\n{current_workflow_str}\n\n\
             OPERATION: {op}\n\nPerform the {op_lower} operation as described.\nIMPORTANT: Preserve all \
             unchanged steps exactly!",
            op = input.operation.as_str().to_uppercase(),
            op_lower = input.operation.as_str(),
        );

        let req = LlmRequest::new(vec![LlmMessage {
            role: LlmRole::User,
            content: format!("Operation description: {}", input.description),
        }])
        .with_system(system)
        .with_temperature(0.7);

        match call_structured::<Workflow>(self.llm.as_ref(), req).await {
            Ok(result) => match result.parsed {
                Some(workflow) => {
                    info!(agent = self.name(), steps = workflow.steps.len(), "applied chunk operation");
                    ChunkOperatorOutput { workflow: Some(workflow), success: true, error_message: None, call_meta: result.meta }
                }
                None => {
                    warn!(agent = self.name(), "failed to parse modified workflow from LLM response");
                    ChunkOperatorOutput {
                        workflow: None,
                        success: false,
                        error_message: Some("Failed to parse modified workflow from LLM response".to_string()),
                        call_meta: result.meta,
                    }
                }
            },
            Err(e) => ChunkOperatorOutput {
                workflow: None,
                success: false,
                error_message: Some(e.to_string()),
                call_meta: CallMeta::default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_util::StubLlmProvider;

    #[tokio::test]
    async fn appends_a_step() {
        let llm = Arc::new(StubLlmProvider::new(vec![serde_json::json!({ "steps": [] }).to_string()]));
        let agent = ChunkOperatorAgent::new(llm);
        let output = agent
            .run(ChunkOperatorInput {
                current_workflow: Workflow::default(),
                operation: ChunkOperation::Append,
                description: "add a final summary step".to_string(),
                tool_specs: serde_json::json!({}),
            })
            .await;
        assert!(output.success);
    }
}
