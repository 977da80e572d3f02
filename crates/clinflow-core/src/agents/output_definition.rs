use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::{call_structured, CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
use crate::workflow::Workflow;

const DEFAULT_PROMPT: &str = "You are an output definition generator. Your job is to analyze a workflow's steps \
and define what outputs it produces.

Given a workflow with steps, you must:
1. Identify what meaningful outputs the workflow produces
2. Create output_definitions that describe each output
3. Create output_mappings that connect step results to output definitions

Keep the original steps unchanged - only add output_definitions and output_mappings.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDefinitionInput {
    pub workflow: Workflow,
    pub user_intent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDefinitionOutput {
    pub workflow: Option<Workflow>,
    pub success: bool,
    pub error_message: Option<String>,
    pub call_meta: CallMeta,
}

/// Generates `output_definitions`/`output_mappings` for a workflow's
/// `compute` steps via a single structured LLM call. Not wired into the
/// orchestrator's decision enum — when this agent is never invoked, the
/// executor falls back to auto-deriving definitions from `compute`-role
/// tool steps (see `executor::derive_output_definitions`).
pub struct OutputDefinitionAgent {
    llm: Arc<dyn LlmClient>,
}

impl OutputDefinitionAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn name(&self) -> &'static str {
        "output_definition"
    }

    pub async fn run(&self, input: OutputDefinitionInput) -> OutputDefinitionOutput {
        info!(agent = self.name(), "called");

        let workflow_json = serde_json::to_string_pretty(&input.workflow).unwrap_or_default();
        let system = format!(
            "{DEFAULT_PROMPT}\n\nCURRENT WORKFLOW:\n{workflow_json}\n\nUSER INTENT:\n{}\n\n\
             Generate output_definitions and output_mappings for this workflow.\n\
             Keep all existing steps exactly as they are.",
            input.user_intent
        );

        let req = LlmRequest::new(vec![LlmMessage {
            role: LlmRole::User,
            content: "Generate output definitions for this workflow.".to_string(),
        }])
        .with_system(system)
        .with_temperature(0.5);

        match call_structured::<Workflow>(self.llm.as_ref(), req).await {
            Ok(result) => match result.parsed {
                Some(workflow) => {
                    info!(
                        agent = self.name(),
                        definitions = workflow.output_definitions.len(),
                        "generated output definitions"
                    );
                    OutputDefinitionOutput {
                        workflow: Some(workflow),
                        success: true,
                        error_message: None,
                        call_meta: result.meta,
                    }
                }
                None => {
                    warn!(agent = self.name(), "failed to parse response");
                    OutputDefinitionOutput {
                        workflow: None,
                        success: false,
                        error_message: Some("Failed to parse response".to_string()),
                        call_meta: result.meta,
                    }
                }
            },
            Err(e) => OutputDefinitionOutput {
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
    async fn generates_definitions_on_success() {
        let response = serde_json::json!({
            "steps": [],
            "output_definitions": [{"id": "out_1", "name": "flag", "label": "Depression flag"}],
            "output_mappings": []
        })
        .to_string();
        let llm = Arc::new(StubLlmProvider::new(vec![response]));
        let agent = OutputDefinitionAgent::new(llm);
        let output = agent
            .run(OutputDefinitionInput { workflow: Workflow::default(), user_intent: "flag depression".to_string() })
            .await;
        assert!(output.success);
        assert_eq!(output.workflow.unwrap().output_definitions.len(), 1);
    }
}
