// Multi-agent orchestrator: a bounded decision loop that routes each turn
// through whichever specialized agent an LLM decision call names, until the
// decision is `respond_to_user` or the iteration budget is exhausted.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agents::{
    ChunkOperation, ChunkOperatorAgent, ChunkOperatorInput, ClarifierAgent, ClarifierInput,
    EditorAgent, EditorInput, GeneratorAgent, GeneratorInput, PatientContext, PromptFillerAgent,
    PromptFillerInput, SummarizerAgent, SummarizerInput, ValidatorAgent, ValidatorInput,
};
use crate::error::{CoreError, Result};
use crate::executor::derive_output_definitions;
use crate::llm::{call_structured, CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
use crate::catalog::ToolCatalog;
use crate::state::{AgentCallRecord, AgentState};
use crate::trace::TraceRecorder;
use crate::workflow::Workflow;

/// Reborrows an `Option<&mut TraceRecorder>` so it can be handed to one call
/// while remaining usable on the next loop iteration — `Option<&mut T>` is
/// not `Copy`, so a plain pass-by-value would move it out of `run_turn`'s
/// loop after the first iteration.
fn reborrow_trace<'a>(trace: &'a mut Option<&mut TraceRecorder>) -> Option<&'a mut TraceRecorder> {
    trace.as_mut().map(|r| &mut **r)
}

/// An orchestrator turn is capped at this many agent-dispatch iterations
/// before it gives up and responds with a canned message, matching the
/// original's `MAX_ITERATIONS` guard against runaway decision loops.
pub const MAX_ITERATIONS: usize = 20;

const DEFAULT_PROMPT: &str = "You are the orchestrator for a clinical workflow assistant. Each turn, decide which \
specialized agent to call next, or respond directly to the user.

AVAILABLE ACTIONS:
- call_clarifier: ask the clarifier whether the request is clear and in scope
- call_generator: create a new workflow from scratch
- call_editor: freely modify the current/pending workflow
- call_chunk_operator: insert, append, or remove specific steps
- call_validator: check the pending workflow for structural errors
- call_prompt_filler: fill in null prompt fields on the pending workflow
- call_summarizer: generate a plain-English summary of the pending workflow
- respond_to_user: end the turn with a text response (and, optionally, the workflow)

Call call_validator and call_prompt_filler before ending a turn that produced or changed a workflow. \
Only call_summarizer once the workflow is valid and fully filled in. Use agent_task to describe what \
you want an agent to do when it takes free text (generator/editor/chunk_operator).";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorAction {
    CallClarifier,
    CallGenerator,
    CallEditor,
    CallChunkOperator,
    CallValidator,
    CallPromptFiller,
    CallSummarizer,
    RespondToUser,
}

/// One decision from the orchestrator's own LLM call. `reasoning` is not
/// part of every copy of the upstream schema we found, but the trace
/// recorder's event schema and the orchestrator's own logic both read it
/// unconditionally — we keep it as an optional field rather than dropping
/// information the rest of the pipeline expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorDecision {
    pub action: OrchestratorAction,
    #[serde(default)]
    pub response_text: Option<String>,
    #[serde(default)]
    pub include_workflow: bool,
    #[serde(default)]
    pub agent_task: Option<String>,
    #[serde(default)]
    pub chunk_operation: Option<ChunkOperation>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl OrchestratorDecision {
    fn fallback(text: impl Into<String>) -> Self {
        Self {
            action: OrchestratorAction::RespondToUser,
            response_text: Some(text.into()),
            include_workflow: false,
            agent_task: None,
            chunk_operation: None,
            reasoning: None,
        }
    }
}

/// The final shape of a completed turn, either plain text or text plus a
/// committed workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    pub response_type: String,
    pub text: String,
    pub workflow: Option<Workflow>,
    pub summary: Option<String>,
    pub workflow_id: Option<String>,
    pub total_cost: f64,
    pub total_input_tokens: u32,
    pub total_output_tokens: u32,
    /// The turn's finalized trace, one JSON object per line, ready for a
    /// caller to persist via `ConversationStore::save_trace`. `None` when
    /// no `TraceRecorder` was passed to `process_message`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_jsonl: Option<String>,
}

/// Streamed during a turn so a caller can surface progress before the final
/// result is ready. The original yields these from a generator function;
/// here they are accumulated eagerly and handed back as a `Stream` — see
/// `process_message_streaming`'s doc comment for why.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    Decision { action: OrchestratorAction, agent_task: Option<String>, reasoning: Option<String> },
    AgentResult { agent: String, success: bool, summary: String },
    Final { result: TurnResult },
}

/// Routes a turn through the clarifier/generator/editor/chunk_operator/
/// validator/prompt_filler/summarizer agents per an LLM's own routing
/// decisions, accumulating cost/tokens and recording a trace as it goes.
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    catalog: ToolCatalog,
    prompt_guides: HashMap<String, String>,
    system_prompt: String,

    clarifier: ClarifierAgent,
    generator: GeneratorAgent,
    editor: EditorAgent,
    chunk_operator: ChunkOperatorAgent,
    validator: ValidatorAgent,
    prompt_filler: PromptFillerAgent,
    summarizer: SummarizerAgent,
    max_iterations: usize,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, catalog: ToolCatalog) -> Self {
        Self {
            clarifier: ClarifierAgent::new(llm.clone()),
            generator: GeneratorAgent::new(llm.clone()),
            editor: EditorAgent::new(llm.clone()),
            chunk_operator: ChunkOperatorAgent::new(llm.clone()),
            validator: ValidatorAgent::new(),
            prompt_filler: PromptFillerAgent::new(llm.clone()),
            summarizer: SummarizerAgent::new(llm.clone()),
            llm,
            catalog,
            prompt_guides: HashMap::new(),
            system_prompt: DEFAULT_PROMPT.to_string(),
            max_iterations: MAX_ITERATIONS,
        }
    }

    pub fn with_prompt_guides(mut self, guides: HashMap<String, String>) -> Self {
        self.prompt_guides = guides;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Overrides the default `MAX_ITERATIONS` budget — mainly for tests that
    /// need to exercise the overrun path without a 20-call run.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Runs one turn to completion, eagerly accumulating every
    /// `OrchestratorEvent` and handing them back as a `Stream`.
    ///
    /// Cancellation is not a requirement here (workflow turns are short,
    /// bounded by `MAX_ITERATIONS`), so a background task plus channel would
    /// buy nothing but `'static`/ownership overhead for moving `&mut
    /// AgentState` across a spawn boundary. Eager accumulation wrapped in
    /// `tokio_stream::iter` gives callers the same `Stream` interface at a
    /// fraction of the complexity.
    pub async fn process_message_streaming(
        &self,
        state: &mut AgentState,
        user_message: &str,
        trace: Option<&mut TraceRecorder>,
    ) -> impl futures::Stream<Item = OrchestratorEvent> {
        let events = self.run_turn(state, user_message, trace).await;
        tokio_stream::iter(events)
    }

    /// Convenience wrapper over `process_message_streaming` for callers that
    /// only want the final result.
    pub async fn process_message(
        &self,
        state: &mut AgentState,
        user_message: &str,
        trace: Option<&mut TraceRecorder>,
    ) -> Result<TurnResult> {
        let events = self.run_turn(state, user_message, trace).await;
        for event in events {
            if let OrchestratorEvent::Final { result } = event {
                return Ok(result);
            }
        }
        Err(CoreError::Internal(anyhow::anyhow!("turn produced no final event")))
    }

    async fn run_turn(
        &self,
        state: &mut AgentState,
        user_message: &str,
        trace: Option<&mut TraceRecorder>,
    ) -> Vec<OrchestratorEvent> {
        let mut trace = trace;
        let mut events = Vec::new();
        let mut total = CallMeta::default();
        state.agent_call_log.clear();
        state.add_user_message(user_message);

        if let Some(t) = reborrow_trace(&mut trace) {
            t.record_turn_start(user_message);
            t.record_initial_state(state);
        }

        for iteration in 0..self.max_iterations {
            let decision = self.decide(state, user_message, &mut total, reborrow_trace(&mut trace)).await;
            events.push(OrchestratorEvent::Decision {
                action: decision.action,
                agent_task: decision.agent_task.clone(),
                reasoning: decision.reasoning.clone(),
            });

            if matches!(decision.action, OrchestratorAction::RespondToUser) {
                let mut result = self.build_response(state, &decision, &total);
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_state_snapshot(state, "respond_to_user");
                    result.trace_jsonl = t.finalize(result.total_cost, result.total_input_tokens, result.total_output_tokens);
                }
                events.push(OrchestratorEvent::Final { result });
                return events;
            }

            let (agent_name, summary, success) =
                self.dispatch(state, &decision, &mut total, reborrow_trace(&mut trace)).await;
            state.agent_call_log.push(AgentCallRecord { agent: agent_name.clone(), success, summary: summary.clone() });
            events.push(OrchestratorEvent::AgentResult { agent: agent_name, success, summary });

            if let Some(t) = reborrow_trace(&mut trace) {
                t.record_state_snapshot(state, "post_dispatch");
            }

            info!(iteration, action = ?decision.action, "orchestrator step complete");
        }

        warn!(turn_iterations = self.max_iterations, "orchestrator overran iteration budget");
        let mut result = TurnResult {
            response_type: "text".to_string(),
            text: "I wasn't able to finish that request in a reasonable number of steps. \
                   Could you try breaking it into a smaller request?"
                .to_string(),
            workflow: None,
            summary: None,
            workflow_id: None,
            total_cost: total.cost,
            total_input_tokens: total.input_tokens,
            total_output_tokens: total.output_tokens,
            trace_jsonl: None,
        };
        if let Some(t) = reborrow_trace(&mut trace) {
            t.record_error("orchestrator overran MAX_ITERATIONS");
            result.trace_jsonl = t.finalize(result.total_cost, result.total_input_tokens, result.total_output_tokens);
        }
        events.push(OrchestratorEvent::Final { result });
        events
    }

    /// Builds the decision context exactly as `_get_orchestrator_decision`
    /// does: user message, whether a workflow exists, the pending workflow,
    /// this turn's agent history, the last agent's result (stripped of
    /// cost/token noise), and any pending summary.
    async fn decide(
        &self,
        state: &AgentState,
        user_message: &str,
        total: &mut CallMeta,
        trace: Option<&mut TraceRecorder>,
    ) -> OrchestratorDecision {
        let mut context = format!("USER MESSAGE:\n{user_message}\n");
        context.push_str(&format!(
            "\nCURRENT WORKFLOW EXISTS: {}\n",
            state.get_current_workflow().is_some()
        ));

        if let Some(pending) = &state.pending_workflow {
            context.push_str(&format!(
                "\nPENDING WORKFLOW:\n{}\n",
                serde_json::to_string_pretty(pending).unwrap_or_default()
            ));
        }

        if !state.agent_call_log.is_empty() {
            let history: Vec<String> = state
                .agent_call_log
                .iter()
                .map(|r| format!("- {} (success={}): {}", r.agent, r.success, r.summary))
                .collect();
            context.push_str(&format!("\nAGENT HISTORY THIS RUN:\n{}\n", history.join("\n")));
        }

        if let (Some(last_agent), Some(last_result)) = (&state.last_agent, &state.last_agent_result) {
            let mut stripped = last_result.clone();
            if let Some(obj) = stripped.as_object_mut() {
                obj.remove("call_meta");
            }
            context.push_str(&format!(
                "\nLAST AGENT: {last_agent}\nLAST RESULT:\n{}\n",
                serde_json::to_string_pretty(&stripped).unwrap_or_default()
            ));
        }

        if let Some(summary) = &state.pending_summary {
            context.push_str(&format!("\nPENDING SUMMARY:\n{summary}\n"));
        }

        let req = LlmRequest::new(vec![LlmMessage { role: LlmRole::User, content: context.clone() }])
            .with_system(self.system_prompt.clone())
            .with_temperature(0.5);

        let decision = match call_structured::<OrchestratorDecision>(self.llm.as_ref(), req).await {
            Ok(result) => {
                total.cost += result.meta.cost;
                total.input_tokens += result.meta.input_tokens;
                total.output_tokens += result.meta.output_tokens;
                let parsed = result.parsed.unwrap_or_else(|| {
                    warn!("orchestrator decision did not parse, responding to user");
                    OrchestratorDecision::fallback(
                        "I had trouble deciding how to proceed. Could you rephrase your request?",
                    )
                });
                if let Some(t) = trace {
                    t.record_decision(&context, &self.system_prompt, &parsed, result.meta.cost, result.meta.input_tokens, result.meta.output_tokens);
                }
                parsed
            }
            Err(e) => {
                warn!(error = %e, "orchestrator decision call failed, responding to user");
                let fallback = OrchestratorDecision::fallback(format!("I ran into an error: {e}"));
                if let Some(t) = trace {
                    t.record_error(&format!("orchestrator decision call failed: {e}"));
                    t.record_decision(&context, &self.system_prompt, &fallback, 0.0, 0, 0);
                }
                fallback
            }
        };
        decision
    }

    /// Builds the per-action agent input and runs that agent. Matches
    /// `_build_agent_input`'s mapping table, including its "missing required
    /// source means a synthetic failure, no call is made" behavior for
    /// editor/chunk_operator/validator/prompt_filler/summarizer when there
    /// is no pending-or-current workflow to act on.
    async fn dispatch(
        &self,
        state: &mut AgentState,
        decision: &OrchestratorDecision,
        total: &mut CallMeta,
        trace: Option<&mut TraceRecorder>,
    ) -> (String, String, bool) {
        match decision.action {
            OrchestratorAction::CallClarifier => {
                let input = ClarifierInput {
                    user_request: decision.agent_task.clone().unwrap_or_default(),
                    tool_specs: self.catalog.tool_specs_map(),
                    current_workflow: state.get_current_workflow().cloned(),
                };
                let mut trace = trace;
                let started = std::time::Instant::now();
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_input(self.clarifier.name(), &input);
                }
                let output = self.clarifier.run(input).await;
                total.cost += output.call_meta.cost;
                total.input_tokens += output.call_meta.input_tokens;
                total.output_tokens += output.call_meta.output_tokens;
                let summary = if output.ready {
                    "Request is clear, ready to proceed.".to_string()
                } else {
                    format!("Needs clarification: {}", output.questions.join("; "))
                };
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_output(
                        self.clarifier.name(),
                        &output,
                        started.elapsed().as_millis() as u64,
                        output.call_meta.cost,
                        output.call_meta.input_tokens,
                        output.call_meta.output_tokens,
                    );
                }
                state.last_agent = Some(self.clarifier.name().to_string());
                state.last_agent_result = Some(serde_json::to_value(&output).unwrap_or_default());
                (self.clarifier.name().to_string(), summary, true)
            }

            OrchestratorAction::CallGenerator => {
                let input = GeneratorInput {
                    task_description: decision.agent_task.clone().unwrap_or_default(),
                    tool_specs: self.catalog.tool_specs_map(),
                    patient_context: PatientContext { mrn: state.mrn, csn: state.csn },
                };
                let mut trace = trace;
                let started = std::time::Instant::now();
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_input(self.generator.name(), &input);
                }
                let output = self.generator.run(input).await;
                total.cost += output.call_meta.cost;
                total.input_tokens += output.call_meta.input_tokens;
                total.output_tokens += output.call_meta.output_tokens;
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_output(
                        self.generator.name(),
                        &output,
                        started.elapsed().as_millis() as u64,
                        output.call_meta.cost,
                        output.call_meta.input_tokens,
                        output.call_meta.output_tokens,
                    );
                }
                let summary = self.finish_workflow_call(state, output.workflow, output.success, "generator");
                state.last_agent = Some(self.generator.name().to_string());
                state.last_agent_result = Some(serde_json::to_value(&output).unwrap_or_default());
                (self.generator.name().to_string(), summary, output.success)
            }

            OrchestratorAction::CallEditor => {
                let Some(current) = state.pending_or_current().cloned() else {
                    return self.missing_source(state, self.editor.name());
                };
                let input = EditorInput {
                    current_workflow: current,
                    edit_request: decision.agent_task.clone().unwrap_or_default(),
                    tool_specs: self.catalog.tool_specs_map(),
                };
                let mut trace = trace;
                let started = std::time::Instant::now();
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_input(self.editor.name(), &input);
                }
                let output = self.editor.run(input).await;
                total.cost += output.call_meta.cost;
                total.input_tokens += output.call_meta.input_tokens;
                total.output_tokens += output.call_meta.output_tokens;
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_output(
                        self.editor.name(),
                        &output,
                        started.elapsed().as_millis() as u64,
                        output.call_meta.cost,
                        output.call_meta.input_tokens,
                        output.call_meta.output_tokens,
                    );
                }
                let summary = self.finish_workflow_call(state, output.workflow, output.success, "editor");
                state.last_agent = Some(self.editor.name().to_string());
                state.last_agent_result = Some(serde_json::to_value(&output).unwrap_or_default());
                (self.editor.name().to_string(), summary, output.success)
            }

            OrchestratorAction::CallChunkOperator => {
                let Some(current) = state.pending_or_current().cloned() else {
                    return self.missing_source(state, self.chunk_operator.name());
                };
                let Some(operation) = decision.chunk_operation else {
                    return self.missing_source(state, self.chunk_operator.name());
                };
                let input = ChunkOperatorInput {
                    current_workflow: current,
                    operation,
                    description: decision.agent_task.clone().unwrap_or_default(),
                    tool_specs: self.catalog.tool_specs_map(),
                };
                let mut trace = trace;
                let started = std::time::Instant::now();
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_input(self.chunk_operator.name(), &input);
                }
                let output = self.chunk_operator.run(input).await;
                total.cost += output.call_meta.cost;
                total.input_tokens += output.call_meta.input_tokens;
                total.output_tokens += output.call_meta.output_tokens;
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_output(
                        self.chunk_operator.name(),
                        &output,
                        started.elapsed().as_millis() as u64,
                        output.call_meta.cost,
                        output.call_meta.input_tokens,
                        output.call_meta.output_tokens,
                    );
                }
                let summary = self.finish_workflow_call(state, output.workflow, output.success, "chunk_operator");
                state.last_agent = Some(self.chunk_operator.name().to_string());
                state.last_agent_result = Some(serde_json::to_value(&output).unwrap_or_default());
                (self.chunk_operator.name().to_string(), summary, output.success)
            }

            OrchestratorAction::CallValidator => {
                let Some(workflow) = state.pending_or_current().cloned() else {
                    return self.missing_source(state, self.validator.name());
                };
                let mut trace = trace;
                let started = std::time::Instant::now();
                let validator_input = ValidatorInput { workflow };
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_input(self.validator.name(), &validator_input);
                }
                let output = self.validator.run(validator_input).await;
                let summary = if output.valid {
                    "Workflow is valid.".to_string()
                } else {
                    format!(
                        "Invalid: step {} — {}",
                        output.broken_step_id.clone().unwrap_or_default(),
                        output.broken_reason.clone().unwrap_or_default()
                    )
                };
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_output(self.validator.name(), &output, started.elapsed().as_millis() as u64, 0.0, 0, 0);
                }
                state.last_agent = Some(self.validator.name().to_string());
                state.last_agent_result = Some(serde_json::to_value(&output).unwrap_or_default());
                (self.validator.name().to_string(), summary, output.valid)
            }

            OrchestratorAction::CallPromptFiller => {
                let Some(workflow) = state.pending_or_current().cloned() else {
                    return self.missing_source(state, self.prompt_filler.name());
                };
                let last_user_message = state
                    .conversation
                    .iter()
                    .rev()
                    .find(|e| matches!(e.role, crate::state::ConversationRole::User))
                    .map(|e| e.content.clone())
                    .unwrap_or_default();
                let input = PromptFillerInput {
                    workflow,
                    user_intent: last_user_message,
                    prompt_guides: self.prompt_guides.clone(),
                };
                let mut trace = trace;
                let started = std::time::Instant::now();
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_input(self.prompt_filler.name(), &input);
                }
                let output = self.prompt_filler.run(input).await;
                total.cost += output.call_meta.cost;
                total.input_tokens += output.call_meta.input_tokens;
                total.output_tokens += output.call_meta.output_tokens;
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_output(
                        self.prompt_filler.name(),
                        &output,
                        started.elapsed().as_millis() as u64,
                        output.call_meta.cost,
                        output.call_meta.input_tokens,
                        output.call_meta.output_tokens,
                    );
                }
                let summary = self.finish_workflow_call(state, Some(output.workflow.clone()), output.success, "prompt_filler");
                state.last_agent = Some(self.prompt_filler.name().to_string());
                state.last_agent_result = Some(serde_json::to_value(&output).unwrap_or_default());
                (self.prompt_filler.name().to_string(), summary, output.success)
            }

            OrchestratorAction::CallSummarizer => {
                let Some(workflow) = state.pending_or_current().cloned() else {
                    return self.missing_source(state, self.summarizer.name());
                };
                let mut trace = trace;
                let started = std::time::Instant::now();
                let summarizer_input = SummarizerInput { workflow };
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_input(self.summarizer.name(), &summarizer_input);
                }
                let output = self.summarizer.run(summarizer_input).await;
                total.cost += output.call_meta.cost;
                total.input_tokens += output.call_meta.input_tokens;
                total.output_tokens += output.call_meta.output_tokens;
                if let Some(t) = reborrow_trace(&mut trace) {
                    t.record_agent_output(
                        self.summarizer.name(),
                        &output,
                        started.elapsed().as_millis() as u64,
                        output.call_meta.cost,
                        output.call_meta.input_tokens,
                        output.call_meta.output_tokens,
                    );
                }
                state.pending_summary = Some(output.summary.clone());
                state.last_agent = Some(self.summarizer.name().to_string());
                state.last_agent_result = Some(serde_json::to_value(&output).unwrap_or_default());
                (self.summarizer.name().to_string(), output.summary, true)
            }

            OrchestratorAction::RespondToUser => unreachable!("handled in run_turn before dispatch"),
        }
    }

    /// Shared tail of every workflow-producing agent call: stage the
    /// workflow as pending and re-derive output definitions, matching
    /// `_process_agent_result`'s behavior of keeping output definitions in
    /// sync with the steps the last agent just produced.
    fn finish_workflow_call(&self, state: &mut AgentState, workflow: Option<Workflow>, success: bool, agent: &str) -> String {
        let Some(mut workflow) = workflow else {
            return format!("{agent} failed to produce a workflow.");
        };
        if !success {
            return format!("{agent} failed to produce a workflow.");
        }
        if workflow.output_definitions.is_empty() {
            workflow.output_definitions = derive_output_definitions(&workflow.steps, &self.catalog);
        }
        let step_count = workflow.step_count();
        state.pending_workflow = Some(workflow);
        format!("{agent} produced a workflow with {step_count} steps.")
    }

    fn missing_source(&self, state: &mut AgentState, agent: &str) -> (String, String, bool) {
        let summary = format!("{agent} has no workflow to act on.");
        state.last_agent = Some(agent.to_string());
        state.last_agent_result = None;
        (agent.to_string(), summary, false)
    }

    /// Builds the final `TurnResult` and commits the pending workflow (if
    /// any) to history, matching `_build_response`'s commit/clear_pending/
    /// conversation-append sequence.
    fn build_response(&self, state: &mut AgentState, decision: &OrchestratorDecision, total: &CallMeta) -> TurnResult {
        let text = decision
            .response_text
            .clone()
            .unwrap_or_else(|| "Done.".to_string());

        if decision.include_workflow {
            if let Some(workflow) = state.pending_workflow.take() {
                let summary = state.pending_summary.take();
                let workflow_id = state.add_workflow(workflow.clone());
                state.add_assistant_message(&text, Some(workflow_id.clone()));
                state.clear_pending();
                return TurnResult {
                    response_type: "workflow".to_string(),
                    text,
                    workflow: Some(workflow),
                    summary,
                    workflow_id: Some(workflow_id),
                    total_cost: total.cost,
                    total_input_tokens: total.input_tokens,
                    total_output_tokens: total.output_tokens,
                    trace_jsonl: None,
                };
            }
        }

        state.add_assistant_message(&text, None);
        state.clear_pending();
        TurnResult {
            response_type: "text".to_string(),
            text,
            workflow: None,
            summary: None,
            workflow_id: None,
            total_cost: total.cost,
            total_input_tokens: total.input_tokens,
            total_output_tokens: total.output_tokens,
            trace_jsonl: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ToolCatalog;
    use crate::llm::test_util::StubLlmProvider;
    use futures::StreamExt;

    fn decision_json(action: &str, extra: serde_json::Value) -> String {
        let mut obj = serde_json::json!({ "action": action });
        if let (Some(base), Some(more)) = (obj.as_object_mut(), extra.as_object()) {
            for (k, v) in more {
                base.insert(k.clone(), v.clone());
            }
        }
        obj.to_string()
    }

    #[tokio::test]
    async fn happy_path_generate_validate_fill_summarize_respond() {
        let responses = vec![
            decision_json("call_generator", serde_json::json!({ "agent_task": "summarize every note" })),
            serde_json::json!({ "steps": [] }).to_string(),
            decision_json("call_validator", serde_json::json!({})),
            serde_json::json!({ "valid": true }).to_string(),
            decision_json("call_prompt_filler", serde_json::json!({})),
            decision_json("call_summarizer", serde_json::json!({})),
            serde_json::json!({ "summary": "Summarizes every note." }).to_string(),
            decision_json(
                "respond_to_user",
                serde_json::json!({ "response_text": "Here is your workflow.", "include_workflow": true }),
            ),
        ];
        let llm = Arc::new(StubLlmProvider::new(responses));
        let orchestrator = Orchestrator::new(llm, ToolCatalog::new());
        let mut state = AgentState::new(1, 2);

        let result = orchestrator.process_message(&mut state, "summarize every note", None).await.unwrap();
        assert_eq!(result.response_type, "workflow");
        assert!(result.workflow.is_some());
        assert_eq!(state.pending_workflow, None);
        assert!(state.get_current_workflow().is_some());
    }

    #[tokio::test]
    async fn missing_workflow_short_circuits_editor() {
        let responses = vec![
            decision_json("call_editor", serde_json::json!({ "agent_task": "add a step" })),
            decision_json("respond_to_user", serde_json::json!({ "response_text": "No workflow yet." })),
        ];
        let llm = Arc::new(StubLlmProvider::new(responses));
        let orchestrator = Orchestrator::new(llm, ToolCatalog::new());
        let mut state = AgentState::new(1, 2);

        let result = orchestrator.process_message(&mut state, "edit it", None).await.unwrap();
        assert_eq!(result.response_type, "text");
        assert_eq!(state.last_agent.as_deref(), Some("editor"));
    }

    #[tokio::test]
    async fn overrunning_max_iterations_yields_canned_response() {
        const BUDGET: usize = 3;
        let mut responses = Vec::new();
        for _ in 0..BUDGET {
            responses.push(decision_json("call_validator", serde_json::json!({})));
            responses.push(serde_json::json!({ "valid": true }).to_string());
        }
        let llm = Arc::new(StubLlmProvider::new(responses));
        let orchestrator = Orchestrator::new(llm, ToolCatalog::new()).with_max_iterations(BUDGET);
        let mut state = AgentState::new(1, 2);

        let result = orchestrator.process_message(&mut state, "loop forever", None).await.unwrap();
        assert!(result.text.contains("reasonable number of steps"));
    }

    #[tokio::test]
    async fn stays_within_budget_when_exactly_at_the_limit() {
        const BUDGET: usize = 2;
        let responses = vec![
            decision_json("call_validator", serde_json::json!({})),
            serde_json::json!({ "valid": true }).to_string(),
            decision_json("respond_to_user", serde_json::json!({ "response_text": "done" })),
        ];
        let llm = Arc::new(StubLlmProvider::new(responses));
        let orchestrator = Orchestrator::new(llm, ToolCatalog::new()).with_max_iterations(BUDGET);
        let mut state = AgentState::new(1, 2);

        let result = orchestrator.process_message(&mut state, "two steps then done", None).await.unwrap();
        assert_eq!(result.text, "done");
    }

    #[tokio::test]
    async fn streaming_emits_decision_then_final_events() {
        let responses = vec![decision_json(
            "respond_to_user",
            serde_json::json!({ "response_text": "hi" }),
        )];
        let llm = Arc::new(StubLlmProvider::new(responses));
        let orchestrator = Orchestrator::new(llm, ToolCatalog::new());
        let mut state = AgentState::new(1, 2);

        let events: Vec<OrchestratorEvent> = orchestrator
            .process_message_streaming(&mut state, "hello", None)
            .await
            .collect()
            .await;
        assert!(matches!(events[0], OrchestratorEvent::Decision { .. }));
        assert!(matches!(events.last().unwrap(), OrchestratorEvent::Final { .. }));
    }

    #[tokio::test]
    async fn trace_recorder_captures_turn_start_decision_and_final() {
        let responses = vec![decision_json(
            "respond_to_user",
            serde_json::json!({ "response_text": "hi" }),
        )];
        let llm = Arc::new(StubLlmProvider::new(responses));
        let orchestrator = Orchestrator::new(llm, ToolCatalog::new());
        let mut state = AgentState::new(1, 2);
        let mut trace = TraceRecorder::new("conv1", 1);

        let result = orchestrator.process_message(&mut state, "hello", Some(&mut trace)).await.unwrap();
        assert!(trace.is_finalized());
        let jsonl = result.trace_jsonl.expect("finalized turn carries its trace jsonl");
        assert!(jsonl.lines().any(|l| l.contains("\"turn_start\"")));
        assert!(jsonl.lines().any(|l| l.contains("\"final\"")));
    }

    #[tokio::test]
    async fn trace_recorder_refuses_double_finalize_after_a_turn() {
        let responses = vec![
            decision_json("call_validator", serde_json::json!({})),
            serde_json::json!({ "valid": true }).to_string(),
            decision_json("respond_to_user", serde_json::json!({ "response_text": "done" })),
        ];
        let llm = Arc::new(StubLlmProvider::new(responses));
        let orchestrator = Orchestrator::new(llm, ToolCatalog::new());
        let mut state = AgentState::new(1, 2);
        let mut trace = TraceRecorder::new("conv1", 1);

        orchestrator.process_message(&mut state, "check it", Some(&mut trace)).await.unwrap();
        assert!(trace.is_finalized());
        assert!(trace.finalize(0.0, 0, 0).is_none());
    }
}
