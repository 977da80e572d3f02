use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::llm::{call_structured, CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
use crate::workflow::Workflow;

use super::load_prompt;

const DEFAULT_PROMPT: &str = "You are a workflow summarizer. Your job is to create clear, concise \
summaries of workflows in plain English.

Guidelines:
1. Describe what the workflow does in 2-3 sentences
2. Highlight the main steps and their purpose
3. Mention any loops or conditions
4. Use non-technical language where possible
5. Keep it brief but informative";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerInput {
    pub workflow: Workflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerOutput {
    pub summary: String,
    pub call_meta: CallMeta,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    summary: String,
}

/// Generates a 2-3 sentence plain-English summary of a workflow via a
/// single structured LLM call. Never fails outward — a transport error or
/// parse miss yields a canned placeholder summary instead.
pub struct SummarizerAgent {
    llm: Arc<dyn LlmClient>,
    prompt_override: Option<PathBuf>,
}

impl SummarizerAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, prompt_override: None }
    }

    pub fn with_prompt_override(llm: Arc<dyn LlmClient>, path: PathBuf) -> Self {
        Self { llm, prompt_override: Some(path) }
    }

    pub fn name(&self) -> &'static str {
        "summarizer"
    }

    pub async fn run(&self, input: SummarizerInput) -> SummarizerOutput {
        info!(agent = self.name(), "called");

        let prompt = load_prompt(&self.prompt_override, DEFAULT_PROMPT);
        let workflow_str = serde_json::to_string_pretty(&input.workflow).unwrap_or_default();
        let system = format!("{prompt}\n\nGenerate a clear, concise summary of this workflow.");

        let req = LlmRequest::new(vec![LlmMessage {
            role: LlmRole::User,
            content: format!("Summarize this workflow:\n\n{workflow_str}"),
        }])
        .with_system(system)
        .with_temperature(0.7);

        match call_structured::<SummaryResponse>(self.llm.as_ref(), req).await {
            Ok(result) => match result.parsed {
                Some(parsed) => {
                    info!(agent = self.name(), len = parsed.summary.len(), "success");
                    SummarizerOutput { summary: parsed.summary, call_meta: result.meta }
                }
                None => {
                    warn!(agent = self.name(), "using fallback content");
                    let fallback = if result.raw_text.is_empty() {
                        "Workflow summary unavailable.".to_string()
                    } else {
                        result.raw_text
                    };
                    SummarizerOutput { summary: fallback, call_meta: result.meta }
                }
            },
            Err(e) => {
                warn!(agent = self.name(), error = %e, "error");
                SummarizerOutput { summary: format!("Could not generate summary: {e}"), call_meta: CallMeta::default() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::test_util::StubLlmProvider;

    #[tokio::test]
    async fn returns_summary_on_success() {
        let response = serde_json::json!({ "summary": "Reads every note and flags depression." }).to_string();
        let llm = Arc::new(StubLlmProvider::new(vec![response]));
        let agent = SummarizerAgent::new(llm);
        let output = agent.run(SummarizerInput { workflow: Workflow::default() }).await;
        assert_eq!(output.summary, "Reads every note and flags depression.");
    }

    #[tokio::test]
    async fn falls_back_to_raw_text_on_parse_miss() {
        let llm = Arc::new(StubLlmProvider::new(vec!["plain text summary".to_string()]));
        let agent = SummarizerAgent::new(llm);
        let output = agent.run(SummarizerInput { workflow: Workflow::default() }).await;
        assert_eq!(output.summary, "plain text summary");
    }
}
