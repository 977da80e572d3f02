use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::{call_structured, CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
use crate::workflow::Workflow;

use super::load_prompt;

const DEFAULT_PROMPT: &str = "You are a workflow editor agent. Your job is to modify an existing workflow \
based on the user's edit request.

IMPORTANT RULES:
1. PRESERVE existing prompt values for steps that are NOT being changed.
2. For NEW steps that require a \"prompt\" field, set it to null.
3. Maintain existing variable references and step IDs where possible.
4. Only modify what's necessary to fulfill the edit request.
5. Keep the workflow structure consistent.

Output the modified workflow as valid JSON.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorInput {
    pub current_workflow: Workflow,
    pub edit_request: String,
    pub tool_specs: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorOutput {
    pub workflow: Option<Workflow>,
    pub success: bool,
    pub error_message: Option<String>,
    pub call_meta: CallMeta,
}

/// Modifies an existing workflow in place based on a free-text edit
/// request, instructing the LLM (not the code) to preserve unchanged steps.
pub struct EditorAgent {
    llm: Arc<dyn LlmClient>,
    prompt_override: Option<PathBuf>,
}

impl EditorAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, prompt_override: None }
    }

    pub fn with_prompt_override(llm: Arc<dyn LlmClient>, path: PathBuf) -> Self {
        Self { llm, prompt_override: Some(path) }
    }

    pub fn name(&self) -> &'static str {
        "editor"
    }

    pub async fn run(&self, input: EditorInput) -> EditorOutput {
        info!(agent = self.name(), "called");

        let prompt = load_prompt(&self.prompt_override, DEFAULT_PROMPT);
        let current_workflow_str = serde_json::to_string_pretty(&input.current_workflow).unwrap_or_default();
        let tool_specs_str = serde_json::to_string_pretty(&input.tool_specs).unwrap_or_default();
        let system = format!(
            "{prompt}\n\nAVAILABLE TOOLS:\n{tool_specs_str}\n\nCURRENT WORKFLOW:\n{current_workflow_str}\n\n\
             Modify this workflow according to the edit request.\nIMPORTANT: Preserve prompt values for \
             unchanged steps!"
        );

        let req = LlmRequest::new(vec![LlmMessage {
            role: LlmRole::User,
            content: format!("Edit request: {}", input.edit_request),
        }])
        .with_system(system)
        .with_temperature(0.7);

        match call_structured::<Workflow>(self.llm.as_ref(), req).await {
            Ok(result) => match result.parsed {
                Some(workflow) => {
                    info!(agent = self.name(), steps = workflow.steps.len(), "edited workflow");
                    EditorOutput { workflow: Some(workflow), success: true, error_message: None, call_meta: result.meta }
                }
                None => {
                    warn!(agent = self.name(), "failed to parse edited workflow from LLM response");
                    EditorOutput {
                        workflow: None,
                        success: false,
                        error_message: Some("Failed to parse edited workflow from LLM response".to_string()),
                        call_meta: result.meta,
                    }
                }
            },
            Err(e) => EditorOutput { workflow: None, success: false, error_message: Some(e.to_string()), call_meta: CallMeta::default() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_util::StubLlmProvider;

    #[tokio::test]
    async fn returns_edited_workflow_on_success() {
        let llm = Arc::new(StubLlmProvider::new(vec![serde_json::json!({ "steps": [] }).to_string()]));
        let agent = EditorAgent::new(llm);
        let output = agent
            .run(EditorInput {
                current_workflow: Workflow::default(),
                edit_request: "add a step".to_string(),
                tool_specs: serde_json::json!({}),
            })
            .await;
        assert!(output.success);
        assert!(output.workflow.is_some());
    }
}
