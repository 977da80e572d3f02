// Notes tools: read a patient's note index/content, and analyze notes with
// an LLM.
//
// Keyword-counting variants are deliberately not included here —
// `highlight_patient_note` covers the same need more generally, so only
// the five tools below are registered.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use clinflow_core::catalog::{DataItemEvent, Tool, ToolContext, ToolRole};
use clinflow_core::error::{CoreError, Result};
use clinflow_core::llm::{call_structured, CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
use clinflow_core::template::{render_template, ScopeStack};
use clinflow_storage::RecordStore;

use crate::common::{parse_input, to_output};

pub struct GetPatientNotesIds {
    record_store: Arc<dyn RecordStore>,
}

impl GetPatientNotesIds {
    pub fn new(record_store: Arc<dyn RecordStore>) -> Self {
        Self { record_store }
    }
}

#[async_trait]
impl Tool for GetPatientNotesIds {
    fn name(&self) -> &str {
        "get_patient_notes_ids"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Reader
    }
    fn category(&self) -> &str {
        "notes"
    }
    fn description(&self) -> &str {
        "Return a list of note IDs for a given patient MRN and CSN encounter."
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "additionalProperties": false})
    }
    fn output_schema(&self) -> Value {
        json!({"type": "array", "items": {"type": "integer"}})
    }

    async fn invoke(&self, _inputs: Value, ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let ids: Vec<i64> = self
            .record_store
            .encounter(ctx.mrn, ctx.csn)?
            .map(|e| e.notes.iter().map(|n| n.note_id).collect())
            .unwrap_or_default();
        Ok((json!(ids), CallMeta::default()))
    }
}

#[derive(Debug, Deserialize)]
struct ReadPatientNoteInput {
    note_id: i64,
}

pub struct ReadPatientNote {
    record_store: Arc<dyn RecordStore>,
}

impl ReadPatientNote {
    pub fn new(record_store: Arc<dyn RecordStore>) -> Self {
        Self { record_store }
    }
}

#[async_trait]
impl Tool for ReadPatientNote {
    fn name(&self) -> &str {
        "read_patient_note"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Reader
    }
    fn category(&self) -> &str {
        "notes"
    }
    fn description(&self) -> &str {
        "Return details about a specific patient note."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"note_id": {"type": "integer", "description": "The specific note ID to retrieve"}},
            "required": ["note_id"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "note_id": {"type": ["integer", "null"]},
                "pat_id": {"type": ["string", "null"]},
                "note_type_id": {"type": ["integer", "null"]},
                "note_type": {"type": ["string", "null"]},
                "note_status": {"type": ["string", "null"]},
                "service": {"type": ["string", "null"]},
                "author": {"type": ["string", "null"]},
                "create_datetime": {"type": ["string", "null"]},
                "filing_datetime": {"type": ["string", "null"]},
                "note_text": {"type": ["string", "null"]},
                "etl_datetime": {"type": ["string", "null"]},
            },
        })
    }
    fn data_item_extractor(&self, inputs: &Value) -> Option<DataItemEvent> {
        let note_id = inputs.get("note_id")?.as_i64()?;
        Some(DataItemEvent {
            resource_type: "note".to_string(),
            resource_id: note_id.to_string(),
            status: "read".to_string(),
        })
    }

    async fn invoke(&self, inputs: Value, ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let input: ReadPatientNoteInput = parse_input(inputs, self.name())?;
        let encounter = self.record_store.encounter(ctx.mrn, ctx.csn)?;
        let note = encounter.and_then(|e| e.notes.into_iter().find(|n| n.note_id == input.note_id));
        let out = to_output(self.name(), &note.unwrap_or_default())?;
        Ok((out, CallMeta::default()))
    }
}

#[derive(Debug, Deserialize)]
struct SummarizePatientNoteInput {
    note: String,
    #[serde(default)]
    criteria: Option<String>,
}

pub struct SummarizePatientNote {
    llm_client: Arc<dyn LlmClient>,
}

impl SummarizePatientNote {
    pub fn new(llm_client: Arc<dyn LlmClient>) -> Self {
        Self { llm_client }
    }
}

const SUMMARIZE_NOTE_SYSTEM_PROMPT: &str = "\
You are a helpful medical assistant that analyzes patient notes.
You are given the patient note and its metadata from the database.
Your task is to summarize the note given a criteria.
The criteria defines the information you need to extract from the note.
For example, if the criteria is \"mental health\", you need to summarize the
note in a way that emphasizes the mental health aspects of the note.
Although we are looking for a specific criteria, you should not limit your
analysis to the criteria. You should analyze the note in a way that is
consistent with the note's content and metadata.
You should return the summary in a clear and concise manner.
The output should contain only the summary, no other text.

You are not forced to use the criteria. Text that is relevant to the
criteria should be emphasized, but your analysis should not be limited to it.";

#[async_trait]
impl Tool for SummarizePatientNote {
    fn name(&self) -> &str {
        "summarize_patient_note"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Compute
    }
    fn uses_llm(&self) -> bool {
        true
    }
    fn category(&self) -> &str {
        "notes"
    }
    fn description(&self) -> &str {
        "Analyze and summarize a patient note based on a given criteria"
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "note": {"type": "string", "description": "The full patient note text to analyze"},
                "criteria": {"type": "string", "description": "The specific criteria or aspects to focus on in the summary"},
            },
            "required": ["note"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({"type": "string", "description": "A concise summary of the patient note based on the given criteria"})
    }

    async fn invoke(&self, inputs: Value, _ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let input: SummarizePatientNoteInput = parse_input(inputs, self.name())?;
        let user_prompt = format!(
            "<text>\n{}\n</text>\n<criteria>\n{}\n</criteria>",
            input.note,
            input.criteria.as_deref().unwrap_or("general")
        );
        let req = LlmRequest::new(vec![LlmMessage { role: LlmRole::User, content: user_prompt }])
            .with_system(SUMMARIZE_NOTE_SYSTEM_PROMPT);
        let result = self.llm_client.call(req).await.map_err(|e| CoreError::llm(e.to_string()))?;
        Ok((json!(result.text), result.meta))
    }
}

#[derive(Debug, Deserialize)]
struct HighlightPatientNoteInput {
    note_type: String,
    note_types_list: Vec<String>,
}

/// Built by analogy to `HighlightMedication`: a membership check over one
/// attribute, used inside loops to flag whether the current item belongs to
/// a target set the orchestrator asked to highlight.
pub struct HighlightPatientNote;

#[async_trait]
impl Tool for HighlightPatientNote {
    fn name(&self) -> &str {
        "highlight_patient_note"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Compute
    }
    fn category(&self) -> &str {
        "notes"
    }
    fn description(&self) -> &str {
        "Highlight the note type if it is in the list of note types you are searching for."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "note_type": {"type": "string", "description": "The note type to search for."},
                "note_types_list": {"type": "array", "items": {"type": "string"}, "description": "List of note types to search within."},
            },
            "required": ["note_type", "note_types_list"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({"type": "string", "description": "The note type if found, otherwise an empty string."})
    }

    async fn invoke(&self, inputs: Value, _ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let input: HighlightPatientNoteInput = parse_input(inputs, self.name())?;
        let found = input.note_types_list.contains(&input.note_type);
        let out = if found { input.note_type } else { String::new() };
        Ok((json!(out), CallMeta::default()))
    }
}

#[derive(Debug, Deserialize)]
struct ExamplePair {
    user_input: String,
    assistant_response: String,
}

#[derive(Debug, Deserialize)]
struct PromptInput {
    system_prompt: String,
    user_prompt: String,
    #[serde(default)]
    examples: Vec<ExamplePair>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeNoteWithSpanAndReasonInput {
    note: String,
    prompt: PromptInput,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnalyzeNoteWithSpanAndReasonOutput {
    flag_state: bool,
    span: String,
    reasoning: String,
}

pub struct AnalyzeNoteWithSpanAndReason {
    llm_client: Arc<dyn LlmClient>,
}

impl AnalyzeNoteWithSpanAndReason {
    pub fn new(llm_client: Arc<dyn LlmClient>) -> Self {
        Self { llm_client }
    }
}

#[async_trait]
impl Tool for AnalyzeNoteWithSpanAndReason {
    fn name(&self) -> &str {
        "analyze_note_with_span_and_reason"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Compute
    }
    fn uses_llm(&self) -> bool {
        true
    }
    fn category(&self) -> &str {
        "notes"
    }
    fn description(&self) -> &str {
        "Analyze a patient note, detect a criteria and extract portions of the text relevant to the criteria, with additional reasoning"
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "note": {"type": "string", "description": "The full patient note text to analyze"},
                "prompt": {
                    "type": "object",
                    "description": "System/user prompt templates. Use {{note}} to reference the note text.",
                    "properties": {
                        "system_prompt": {"type": "string"},
                        "user_prompt": {"type": "string"},
                        "examples": {"type": "array", "items": {"type": "object", "properties": {
                            "user_input": {"type": "string"}, "assistant_response": {"type": "string"}
                        }}},
                    },
                    "required": ["system_prompt", "user_prompt"],
                },
            },
            "required": ["note", "prompt"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "flag_state": {"type": "boolean"},
                "span": {"type": "string"},
                "reasoning": {"type": "string"},
            },
            "required": ["flag_state", "span", "reasoning"],
        })
    }

    async fn invoke(&self, inputs: Value, _ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let input: AnalyzeNoteWithSpanAndReasonInput = parse_input(inputs, self.name())?;

        let mut scope_vars = std::collections::HashMap::new();
        scope_vars.insert("note".to_string(), json!(input.note));
        let scopes = ScopeStack::with_base(scope_vars);

        let render = |text: &str| -> Result<String> {
            Ok(render_template(text, &scopes, self.name())
                .map_err(|e| CoreError::tool(self.name(), e.to_string()))?
                .into_json()
                .as_str()
                .map(str::to_string)
                .unwrap_or_default())
        };

        let system_prompt = render(&input.prompt.system_prompt)?;
        let mut messages = Vec::new();
        for example in &input.prompt.examples {
            messages.push(LlmMessage { role: LlmRole::User, content: render(&example.user_input)? });
            messages.push(LlmMessage { role: LlmRole::Assistant, content: render(&example.assistant_response)? });
        }
        messages.push(LlmMessage { role: LlmRole::User, content: render(&input.prompt.user_prompt)? });

        let req = LlmRequest::new(messages)
            .with_system(system_prompt)
            .with_schema(json!({
                "type": "object",
                "properties": {"flag_state": {"type": "boolean"}, "span": {"type": "string"}, "reasoning": {"type": "string"}},
                "required": ["flag_state", "span", "reasoning"],
            }));

        let result = call_structured::<AnalyzeNoteWithSpanAndReasonOutput>(self.llm_client.as_ref(), req)
            .await
            .map_err(|e| CoreError::llm(e.to_string()))?;

        let output = match result.parsed {
            Some(parsed) => parsed,
            None => AnalyzeNoteWithSpanAndReasonOutput {
                flag_state: false,
                span: String::new(),
                reasoning: "structured output failed: model response did not match the expected schema".to_string(),
            },
        };
        Ok((to_output(self.name(), &output)?, result.meta))
    }
}
