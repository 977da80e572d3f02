use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::{call_structured, CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
use crate::workflow::{Step, ToolStep, Workflow};

use super::load_prompt;

const DEFAULT_PROMPT: &str = "You are a prompt filler agent. Your job is to generate appropriate prompts \
for workflow steps that require them.

For each step that needs a prompt, create:
1. system_prompt: Instructions for the LLM about its role and how to respond
2. user_prompt: The template for user input (can include {{ variable }} placeholders)

The prompts should align with:
- The user's overall intent
- The specific tool's purpose
- The step's position in the workflow

Be specific and actionable in your prompts.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptFillerInput {
    pub workflow: Workflow,
    pub user_intent: String,
    #[serde(default)]
    pub prompt_guides: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptFillerOutput {
    pub workflow: Workflow,
    pub success: bool,
    pub error_message: Option<String>,
    pub call_meta: CallMeta,
}

#[derive(Debug, Deserialize)]
struct FilledPrompt {
    system_prompt: String,
    user_prompt: String,
}

/// Walks a workflow's step tree and fills every `ToolStep.inputs.prompt ==
/// null` field with a `{system_prompt, user_prompt, examples}` object, one
/// LLM call per step needing it. A per-step call failure does not fail the
/// whole agent — it falls back to a deterministic canned prompt so a single
/// bad LLM response can't leave a workflow half-filled.
pub struct PromptFillerAgent {
    llm: Arc<dyn LlmClient>,
    prompt_override: Option<PathBuf>,
}

impl PromptFillerAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, prompt_override: None }
    }

    pub fn with_prompt_override(llm: Arc<dyn LlmClient>, path: PathBuf) -> Self {
        Self { llm, prompt_override: Some(path) }
    }

    pub fn name(&self) -> &'static str {
        "prompt_filler"
    }

    pub async fn run(&self, input: PromptFillerInput) -> PromptFillerOutput {
        info!(agent = self.name(), "called");

        let mut workflow = input.workflow;
        let mut total = CallMeta::default();
        let outcome = self
            .process_steps(&mut workflow.steps, &input.user_intent, &input.prompt_guides, &mut total)
            .await;

        match outcome {
            Ok(()) => {
                info!(agent = self.name(), "success");
                PromptFillerOutput { workflow, success: true, error_message: None, call_meta: total }
            }
            Err(message) => {
                warn!(agent = self.name(), error = %message, "failed");
                PromptFillerOutput { workflow, success: false, error_message: Some(message), call_meta: total }
            }
        }
    }

    fn process_steps<'a>(
        &'a self,
        steps: &'a mut [Step],
        user_intent: &'a str,
        prompt_guides: &'a HashMap<String, String>,
        total: &'a mut CallMeta,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<(), String>> + Send + 'a>> {
        Box::pin(async move {
            for step in steps.iter_mut() {
                match step {
                    Step::Tool(tool_step) => {
                        self.fill_tool_step(tool_step, user_intent, prompt_guides, total).await?;
                    }
                    Step::Loop(loop_step) => {
                        self.process_steps(&mut loop_step.body, user_intent, prompt_guides, total).await?;
                    }
                    Step::If(if_step) => {
                        self.process_branch(&mut if_step.then, user_intent, prompt_guides, total).await?;
                        if let Some(otherwise) = &mut if_step.otherwise {
                            self.process_branch(otherwise, user_intent, prompt_guides, total).await?;
                        }
                    }
                    Step::FlagVariable(_) => {}
                }
            }
            Ok(())
        })
    }

    fn process_branch<'a>(
        &'a self,
        branch: &'a mut crate::workflow::ThenBranch,
        user_intent: &'a str,
        prompt_guides: &'a HashMap<String, String>,
        total: &'a mut CallMeta,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<(), String>> + Send + 'a>> {
        Box::pin(async move {
            match branch {
                crate::workflow::ThenBranch::One(step) => {
                    self.process_steps(std::slice::from_mut(step.as_mut()), user_intent, prompt_guides, total).await
                }
                crate::workflow::ThenBranch::Many(steps) => {
                    self.process_steps(steps, user_intent, prompt_guides, total).await
                }
            }
        })
    }

    async fn fill_tool_step(
        &self,
        step: &mut ToolStep,
        user_intent: &str,
        prompt_guides: &HashMap<String, String>,
        total: &mut CallMeta,
    ) -> std::result::Result<(), String> {
        let needs_prompt = step
            .inputs
            .get("prompt")
            .map(|v| v.is_null())
            .unwrap_or(false);
        if !needs_prompt {
            return Ok(());
        }

        let guide = prompt_guides.get(&step.tool).cloned().unwrap_or_default();
        let (filled, meta) = self.generate_prompt(step, user_intent, &guide).await;
        total.cost += meta.cost;
        total.input_tokens += meta.input_tokens;
        total.output_tokens += meta.output_tokens;

        if let Some(obj) = step.inputs.as_object_mut() {
            obj.insert("prompt".to_string(), filled);
        }
        Ok(())
    }

    async fn generate_prompt(&self, step: &ToolStep, user_intent: &str, guide: &str) -> (serde_json::Value, CallMeta) {
        let prompt = load_prompt(&self.prompt_override, DEFAULT_PROMPT);
        let step_str = serde_json::to_string_pretty(step).unwrap_or_default();
        let guide_text = if guide.is_empty() { "No specific guide available." } else { guide };
        let system = format!(
            "{prompt}\n\nTOOL: {tool}\nTOOL GUIDE: {guide_text}\n\nSTEP CONTEXT:\n{step_str}\n\n\
             USER'S OVERALL INTENT:\n{user_intent}\n\n\
             Generate a prompt that aligns with the user's intent and the tool's purpose.",
            tool = step.tool,
        );

        let req = LlmRequest::new(vec![LlmMessage {
            role: LlmRole::User,
            content: format!("Generate a prompt for the '{}' tool step.", step.tool),
        }])
        .with_system(system)
        .with_temperature(0.7);

        match call_structured::<FilledPrompt>(self.llm.as_ref(), req).await {
            Ok(result) => match result.parsed {
                Some(filled) => (
                    serde_json::json!({
                        "system_prompt": filled.system_prompt,
                        "user_prompt": filled.user_prompt,
                        "examples": null,
                    }),
                    result.meta,
                ),
                None => (fallback_prompt(&step.tool), result.meta),
            },
            Err(e) => {
                warn!(agent = "prompt_filler", tool = step.tool, error = %e, "prompt generation failed");
                (fallback_prompt(&step.tool), CallMeta::default())
            }
        }
    }
}

/// A deterministic, zero-cost prompt used when an LLM call for a single
/// step fails or returns an unparseable response.
fn fallback_prompt(tool_name: &str) -> serde_json::Value {
    serde_json::json!({
        "system_prompt": format!("You are an assistant helping with {tool_name}."),
        "user_prompt": "Please process the input.",
        "examples": null,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_util::StubLlmProvider;
    use crate::workflow::{LoopStep, ThenBranch};

    fn tool_step_needing_prompt(id: &str, tool: &str) -> Step {
        Step::Tool(ToolStep {
            id: id.to_string(),
            step_summary: "analyze".to_string(),
            tool: tool.to_string(),
            inputs: serde_json::json!({ "note_id": "{{ note_id }}", "prompt": null }),
            output: Some("result".to_string()),
        })
    }

    #[tokio::test]
    async fn fills_prompt_in_top_level_step() {
        let response = serde_json::json!({ "system_prompt": "sys", "user_prompt": "usr" }).to_string();
        let llm = Arc::new(StubLlmProvider::new(vec![response]));
        let agent = PromptFillerAgent::new(llm);
        let workflow = Workflow { steps: vec![tool_step_needing_prompt("s1", "analyze_note")], ..Default::default() };

        let output = agent
            .run(PromptFillerInput { workflow, user_intent: "flag depression".to_string(), prompt_guides: HashMap::new() })
            .await;

        assert!(output.success);
        let Step::Tool(step) = &output.workflow.steps[0] else { unreachable!() };
        assert_eq!(step.inputs["prompt"]["system_prompt"], "sys");
    }

    #[tokio::test]
    async fn fills_prompt_inside_loop_body() {
        let response = serde_json::json!({ "system_prompt": "sys", "user_prompt": "usr" }).to_string();
        let llm = Arc::new(StubLlmProvider::new(vec![response]));
        let agent = PromptFillerAgent::new(llm);
        let workflow = Workflow {
            steps: vec![Step::Loop(LoopStep {
                id: "loop1".to_string(),
                for_var: "note_id".to_string(),
                in_expr: "note_ids".to_string(),
                body: vec![tool_step_needing_prompt("s1", "analyze_note")],
                output_dict: None,
            })],
            ..Default::default()
        };

        let output = agent
            .run(PromptFillerInput { workflow, user_intent: "flag depression".to_string(), prompt_guides: HashMap::new() })
            .await;

        assert!(output.success);
        let Step::Loop(loop_step) = &output.workflow.steps[0] else { unreachable!() };
        let Step::Tool(step) = &loop_step.body[0] else { unreachable!() };
        assert!(!step.inputs["prompt"].is_null());
    }

    #[tokio::test]
    async fn unparseable_response_falls_back_to_canned_prompt() {
        let llm = Arc::new(StubLlmProvider::new(vec!["not json".to_string()]));
        let agent = PromptFillerAgent::new(llm);
        let workflow = Workflow { steps: vec![tool_step_needing_prompt("s1", "analyze_note")], ..Default::default() };

        let output = agent
            .run(PromptFillerInput { workflow, user_intent: "flag depression".to_string(), prompt_guides: HashMap::new() })
            .await;

        assert!(output.success);
        let Step::Tool(step) = &output.workflow.steps[0] else { unreachable!() };
        assert!(step.inputs["prompt"]["system_prompt"].as_str().unwrap().contains("analyze_note"));
    }

    #[tokio::test]
    async fn otherwise_branch_prompts_are_filled_too() {
        let response = serde_json::json!({ "system_prompt": "sys", "user_prompt": "usr" }).to_string();
        let llm = Arc::new(StubLlmProvider::new(vec![response]));
        let agent = PromptFillerAgent::new(llm);
        let workflow = Workflow {
            steps: vec![Step::If(crate::workflow::IfStep {
                id: "if1".to_string(),
                condition: "flag".to_string(),
                then: ThenBranch::One(Box::new(Step::FlagVariable(crate::workflow::FlagVariableStep {
                    id: "t".to_string(),
                    variable: "hit".to_string(),
                    value: true,
                }))),
                otherwise: Some(ThenBranch::One(Box::new(tool_step_needing_prompt("s1", "analyze_note")))),
            })],
            ..Default::default()
        };

        let output = agent
            .run(PromptFillerInput { workflow, user_intent: "flag depression".to_string(), prompt_guides: HashMap::new() })
            .await;

        assert!(output.success);
        let Step::If(if_step) = &output.workflow.steps[0] else { unreachable!() };
        let ThenBranch::One(step) = if_step.otherwise.as_ref().unwrap() else { unreachable!() };
        let Step::Tool(tool_step) = step.as_ref() else { unreachable!() };
        assert!(!tool_step.inputs["prompt"].is_null());
    }
}
