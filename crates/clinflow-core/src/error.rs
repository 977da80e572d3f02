// Error taxonomy for the workflow engine core.
//
// Kinds follow the error taxonomy of the workflow engine: template/tool
// errors are tagged with the step that raised them and propagate up through
// the executor; LLM errors are absorbed by agents (they never reach here)
// and only escape as a transport failure from the `LlmClient` itself.

use thiserror::Error;

/// Result type alias for core workflow-engine operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Tool inputs failed schema validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Template rendering failed for a specific step.
    #[error("template error in step {step_id}: {message}")]
    Template { step_id: String, message: String },

    /// A tool's own implementation failed.
    #[error("tool error in step {step_id}: {message}")]
    Tool { step_id: String, message: String },

    /// The named tool is not registered in the catalog.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// LLM transport/provider failure (not a structured-call parse miss —
    /// those are represented as `parsed: None`, not an error).
    #[error("LLM error: {0}")]
    Llm(String),

    /// The orchestrator exhausted its iteration budget without reaching
    /// `respond_to_user`.
    #[error("orchestrator overran {0} iterations without a final response")]
    OrchestratorOverrun(usize),

    /// Internal error, for anything that doesn't fit a named kind above.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn template(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Template {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    pub fn tool(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Tool {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    pub fn llm(msg: impl Into<String>) -> Self {
        CoreError::Llm(msg.into())
    }
}
