use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::{call_structured, CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
use crate::workflow::Workflow;

use super::load_prompt;

const DEFAULT_PROMPT: &str = "You are a workflow generator agent. Your job is to create a structured workflow \
based on the user's task description.

IMPORTANT RULES:
1. For any tool that requires a \"prompt\" field, set it to null. The prompt_filler agent will fill these in later.
2. Use the available tools only - don't invent new ones.
3. Create clear variable names for outputs.
4. Use loops when processing multiple items (like notes, medications, etc.)
5. Use conditionals when logic depends on previous results.

Output a valid workflow JSON that follows the Workflow schema.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorInput {
    pub task_description: String,
    pub tool_specs: serde_json::Value,
    pub patient_context: PatientContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientContext {
    pub mrn: i64,
    pub csn: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorOutput {
    pub workflow: Option<Workflow>,
    pub success: bool,
    pub error_message: Option<String>,
    pub call_meta: CallMeta,
}

/// Creates new workflows from scratch via a single structured LLM call.
pub struct GeneratorAgent {
    llm: Arc<dyn LlmClient>,
    prompt_override: Option<PathBuf>,
}

impl GeneratorAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, prompt_override: None }
    }

    pub fn with_prompt_override(llm: Arc<dyn LlmClient>, path: PathBuf) -> Self {
        Self { llm, prompt_override: Some(path) }
    }

    pub fn name(&self) -> &'static str {
        "generator"
    }

    pub async fn run(&self, input: GeneratorInput) -> GeneratorOutput {
        info!(agent = self.name(), "called");

        let prompt = load_prompt(&self.prompt_override, DEFAULT_PROMPT);
        let tool_specs_str = serde_json::to_string_pretty(&input.tool_specs).unwrap_or_default();
        let system = format!(
            "{prompt}\n\nAVAILABLE TOOLS:\n{tool_specs_str}\n\nPATIENT CONTEXT:\n\
             - MRN: {mrn}\n- CSN: {csn}\n\nGenerate a workflow that accomplishes the given task using only \
             the available tools.\nRemember: Set prompt fields to null for tools that need them - they will be \
             filled later.",
            mrn = input.patient_context.mrn,
            csn = input.patient_context.csn,
        );

        let req = LlmRequest::new(vec![LlmMessage {
            role: LlmRole::User,
            content: format!("Create a workflow for: {}", input.task_description),
        }])
        .with_system(system)
        .with_temperature(0.7);

        match call_structured::<Workflow>(self.llm.as_ref(), req).await {
            Ok(result) => match result.parsed {
                Some(workflow) => {
                    info!(agent = self.name(), steps = workflow.steps.len(), "generated workflow");
                    GeneratorOutput { workflow: Some(workflow), success: true, error_message: None, call_meta: result.meta }
                }
                None => {
                    warn!(agent = self.name(), "failed to parse workflow from LLM response");
                    GeneratorOutput {
                        workflow: None,
                        success: false,
                        error_message: Some("Failed to parse workflow from LLM response".to_string()),
                        call_meta: result.meta,
                    }
                }
            },
            Err(e) => GeneratorOutput {
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
    async fn parses_workflow_from_structured_response() {
        let workflow_json = serde_json::json!({ "steps": [] }).to_string();
        let llm = Arc::new(StubLlmProvider::new(vec![workflow_json]));
        let agent = GeneratorAgent::new(llm);
        let output = agent
            .run(GeneratorInput {
                task_description: "summarize notes".to_string(),
                tool_specs: serde_json::json!({}),
                patient_context: PatientContext { mrn: 1, csn: 2 },
            })
            .await;
        assert!(output.success);
        assert!(output.workflow.is_some());
    }

    #[tokio::test]
    async fn unparseable_response_yields_failure_not_error() {
        let llm = Arc::new(StubLlmProvider::new(vec!["not json".to_string()]));
        let agent = GeneratorAgent::new(llm);
        let output = agent
            .run(GeneratorInput {
                task_description: "summarize notes".to_string(),
                tool_specs: serde_json::json!({}),
                patient_context: PatientContext { mrn: 1, csn: 2 },
            })
            .await;
        assert!(!output.success);
        assert!(output.error_message.is_some());
    }
}
