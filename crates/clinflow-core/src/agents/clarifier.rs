use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::{call_structured, CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
use crate::workflow::Workflow;

use super::load_prompt;

const DEFAULT_PROMPT: &str = "You are a clarifier agent. Your job is to analyze user requests and determine \
if they're clear enough to proceed with workflow generation.

Analyze the request against available tools and determine:
1. ready: true if the request is clear and achievable with available tools
2. questions: list of clarifying questions if the request is ambiguous
3. out_of_scope: true if the request cannot be accomplished with available tools
4. out_of_scope_reason: explanation if out of scope

Guidelines:
- Only ask questions if truly necessary for workflow generation
- Check if required data/tools are available
- Be specific about what information is missing
- Don't ask obvious questions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarifierInput {
    pub user_request: String,
    pub tool_specs: serde_json::Value,
    #[serde(default)]
    pub current_workflow: Option<Workflow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarifierOutput {
    pub ready: bool,
    #[serde(default)]
    pub questions: Vec<String>,
    pub out_of_scope: bool,
    pub out_of_scope_reason: Option<String>,
    pub call_meta: CallMeta,
}

impl ClarifierOutput {
    /// Errors and parse misses both fall back to `ready = true` so a
    /// clarifier failure never blocks the orchestrator loop.
    fn assume_ready(call_meta: CallMeta) -> Self {
        Self { ready: true, questions: Vec::new(), out_of_scope: false, out_of_scope_reason: None, call_meta }
    }
}

#[derive(Debug, Deserialize)]
struct ClarifierResponse {
    ready: bool,
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    out_of_scope: bool,
    #[serde(default)]
    out_of_scope_reason: String,
}

/// Decides whether a user request is clear enough to hand to the generator,
/// or whether it needs clarifying questions or falls outside the tool set
/// entirely. Ambiguity on its own failure (parse miss, transport error)
/// resolves to "ready" rather than stalling the turn.
pub struct ClarifierAgent {
    llm: Arc<dyn LlmClient>,
    prompt_override: Option<PathBuf>,
}

impl ClarifierAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, prompt_override: None }
    }

    pub fn with_prompt_override(llm: Arc<dyn LlmClient>, path: PathBuf) -> Self {
        Self { llm, prompt_override: Some(path) }
    }

    pub fn name(&self) -> &'static str {
        "clarifier"
    }

    pub async fn run(&self, input: ClarifierInput) -> ClarifierOutput {
        info!(agent = self.name(), "called");

        let prompt = load_prompt(&self.prompt_override, DEFAULT_PROMPT);
        let tool_specs_str = serde_json::to_string_pretty(&input.tool_specs).unwrap_or_default();
        let current_workflow_context = input
            .current_workflow
            .as_ref()
            .map(|w| format!("\n\nCURRENT WORKFLOW:\n{}", serde_json::to_string_pretty(w).unwrap_or_default()))
            .unwrap_or_default();
        let system = format!(
            "{prompt}\n\nAVAILABLE TOOLS:\n{tool_specs_str}\n{current_workflow_context}\n\
             Analyze whether the user's request is clear and achievable."
        );

        let req = LlmRequest::new(vec![LlmMessage {
            role: LlmRole::User,
            content: format!("User request: {}", input.user_request),
        }])
        .with_system(system)
        .with_temperature(0.5);

        match call_structured::<ClarifierResponse>(self.llm.as_ref(), req).await {
            Ok(result) => match result.parsed {
                Some(parsed) => {
                    info!(
                        agent = self.name(),
                        ready = parsed.ready,
                        questions = parsed.questions.len(),
                        out_of_scope = parsed.out_of_scope,
                        "analyzed request"
                    );
                    ClarifierOutput {
                        ready: parsed.ready,
                        questions: parsed.questions,
                        out_of_scope: parsed.out_of_scope,
                        out_of_scope_reason: parsed.out_of_scope.then_some(parsed.out_of_scope_reason),
                        call_meta: result.meta,
                    }
                }
                None => {
                    warn!(agent = self.name(), "parsing failed, assuming ready=true");
                    ClarifierOutput::assume_ready(result.meta)
                }
            },
            Err(e) => {
                warn!(agent = self.name(), error = %e, "error, assuming ready=true");
                ClarifierOutput::assume_ready(CallMeta::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_util::StubLlmProvider;

    #[tokio::test]
    async fn ready_request_needs_no_questions() {
        let response = serde_json::json!({ "ready": true, "questions": [], "out_of_scope": false }).to_string();
        let llm = Arc::new(StubLlmProvider::new(vec![response]));
        let agent = ClarifierAgent::new(llm);
        let output = agent
            .run(ClarifierInput {
                user_request: "flag depression in every note".to_string(),
                tool_specs: serde_json::json!({}),
                current_workflow: None,
            })
            .await;
        assert!(output.ready);
        assert!(output.questions.is_empty());
    }

    #[tokio::test]
    async fn ambiguous_request_carries_questions() {
        let response = serde_json::json!({
            "ready": false,
            "questions": ["Which medication class?"],
            "out_of_scope": false
        })
        .to_string();
        let llm = Arc::new(StubLlmProvider::new(vec![response]));
        let agent = ClarifierAgent::new(llm);
        let output = agent
            .run(ClarifierInput {
                user_request: "check the meds".to_string(),
                tool_specs: serde_json::json!({}),
                current_workflow: None,
            })
            .await;
        assert!(!output.ready);
        assert_eq!(output.questions.len(), 1);
    }

    #[tokio::test]
    async fn unparseable_response_assumes_ready() {
        let llm = Arc::new(StubLlmProvider::new(vec!["not json".to_string()]));
        let agent = ClarifierAgent::new(llm);
        let output = agent
            .run(ClarifierInput {
                user_request: "anything".to_string(),
                tool_specs: serde_json::json!({}),
                current_workflow: None,
            })
            .await;
        assert!(output.ready);
        assert!(!output.out_of_scope);
    }
}
