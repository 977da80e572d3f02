// Flowsheets tools.
//
// A CAPD-score threshold check (`AnalyzeFlowsheetInstance`) is
// deliberately omitted from this catalog rather than carried as an
// unregistered tool; see DESIGN.md.
//
// `read_flowsheets_table` reads the `flowsheet_instances` field directly
// off an `Encounter`, trusting the already-reformatted instance list
// instead of recomputing a pivot at read time.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use clinflow_core::catalog::{Tool, ToolContext, ToolRole};
use clinflow_core::error::{CoreError, Result};
use clinflow_core::llm::{CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
use clinflow_storage::RecordStore;

use crate::common::{parse_input, to_output};

pub struct ReadFlowsheetsTable {
    record_store: Arc<dyn RecordStore>,
}

impl ReadFlowsheetsTable {
    pub fn new(record_store: Arc<dyn RecordStore>) -> Self {
        Self { record_store }
    }
}

#[async_trait]
impl Tool for ReadFlowsheetsTable {
    fn name(&self) -> &str {
        "read_flowsheets_table"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Reader
    }
    fn category(&self) -> &str {
        "flowsheets"
    }
    fn description(&self) -> &str {
        "Read the table of flowsheets for a given patient MRN and CSN encounter."
    }
    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "additionalProperties": false})
    }
    fn output_schema(&self) -> Value {
        json!({"type": "string", "description": "JSON string containing the flowsheet instances for the specified patient encounter."})
    }

    async fn invoke(&self, _inputs: Value, ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let instances = self.record_store.encounter(ctx.mrn, ctx.csn)?.map(|e| e.flowsheet_instances).unwrap_or_default();
        let rendered = serde_json::to_string(&instances).map_err(|e| CoreError::tool(self.name(), e.to_string()))?;
        Ok((json!(rendered), CallMeta::default()))
    }
}

#[derive(Debug, Deserialize)]
struct SummarizeFlowsheetsTableInput {
    flowsheets_table: String,
}

pub struct SummarizeFlowsheetsTable {
    llm_client: Arc<dyn LlmClient>,
}

impl SummarizeFlowsheetsTable {
    pub fn new(llm_client: Arc<dyn LlmClient>) -> Self {
        Self { llm_client }
    }
}

const SUMMARIZE_FLOWSHEETS_SYSTEM_PROMPT: &str = "\
You are a helpful medical assistant that analyzes flowsheets data.
Your task is to summarize the flowsheets table in a clear and concise manner.
Focus on identifying trends, abnormal values, and clinically significant information.
The output should be a concise summary that highlights the most important aspects of the data.";

#[async_trait]
impl Tool for SummarizeFlowsheetsTable {
    fn name(&self) -> &str {
        "summarize_flowsheets_table"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Compute
    }
    fn uses_llm(&self) -> bool {
        true
    }
    fn category(&self) -> &str {
        "flowsheets"
    }
    fn description(&self) -> &str {
        "Summarize the table of flowsheets in a clear and concise manner."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"flowsheets_table": {"type": "string", "description": "JSON string containing the table of flowsheets"}},
            "required": ["flowsheets_table"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({"type": "string", "description": "A concise natural-language summary of the flowsheets data provided."})
    }

    async fn invoke(&self, inputs: Value, _ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let input: SummarizeFlowsheetsTableInput = parse_input(inputs, self.name())?;
        let user_prompt = format!(
            "<flowsheets_table>\n{}\n</flowsheets_table>\n\nPlease analyze this flowsheets data and provide a clear, concise summary.\nFocus on trends, abnormal values, and clinically significant information.",
            input.flowsheets_table
        );
        let req = LlmRequest::new(vec![LlmMessage { role: LlmRole::User, content: user_prompt }])
            .with_system(SUMMARIZE_FLOWSHEETS_SYSTEM_PROMPT);
        let result = self.llm_client.call(req).await.map_err(|e| CoreError::llm(e.to_string()))?;
        Ok((json!(result.text), result.meta))
    }
}
