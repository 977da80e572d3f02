// clinflow-core: workflow schema, sandboxed template evaluator, executor,
// agent set, orchestrator and trace recorder for the clinical workflow
// engine.
//
// Key design decisions:
// - Steps are a tagged union matched exhaustively (see workflow::Step), not
//   a class hierarchy — workflows are data, not code.
// - Template rendering never embeds a general templating engine; `template`
//   is a purpose-built, sandboxed recursive-descent evaluator with a fixed
//   grammar and a forbidden-token prefilter.
// - Agents never raise to the orchestrator — failures are encoded as
//   `success: false` on the agent's own output type.
// - The orchestrator's own decision loop is bounded (`MAX_ITERATIONS`); a
//   turn that cannot finish in budget ends with a canned response rather
//   than looping forever.

pub mod agents;
pub mod auth;
pub mod catalog;
pub mod error;
pub mod executor;
pub mod llm;
pub mod orchestrator;
pub mod state;
pub mod template;
pub mod trace;
pub mod workflow;

pub use auth::{AllowAllContext, AuthContext};
pub use catalog::{Tool, ToolCatalog, ToolContext, ToolRole, ToolSpec};
pub use error::{CoreError, Result};
pub use executor::{CostAccumulator, Executor, OutputValue, ResultEnvelope};
pub use llm::{CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
pub use orchestrator::{Orchestrator, OrchestratorAction, OrchestratorDecision, OrchestratorEvent, TurnResult};
pub use state::AgentState;
pub use trace::TraceRecorder;
pub use workflow::{
    FlagVariableStep, IfStep, LoopStep, OutputDefinition, OutputMapping, Step, ThenBranch, ToolStep,
    Workflow,
};
