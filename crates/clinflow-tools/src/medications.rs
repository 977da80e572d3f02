// Medications tools.
//
// `FilterMedication` has the LLM emit a boolean expression in the
// existing sandboxed evaluator's grammar (comparisons, `in`/`not
// in`, `and`/`or`/`not` — no pandas accessors) and evaluates it per medication
// row via `clinflow_core::template::eval_condition`. The contract is
// unchanged — an unsafe or failing expression yields an empty result
// without raising — but there is no `eval()` anywhere in the path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use clinflow_core::catalog::{Tool, ToolContext, ToolRole};
use clinflow_core::error::{CoreError, Result};
use clinflow_core::llm::{call_structured, CallMeta, LlmClient, LlmMessage, LlmRequest, LlmRole};
use clinflow_core::template::{eval_condition, ScopeStack};
use clinflow_storage::{Medication, RecordStore};

use crate::common::{parse_input, to_output};

pub struct GetMedicationsIds {
    record_store: Arc<dyn RecordStore>,
}

impl GetMedicationsIds {
    pub fn new(record_store: Arc<dyn RecordStore>) -> Self {
        Self { record_store }
    }
}

#[async_trait]
impl Tool for GetMedicationsIds {
    fn name(&self) -> &str {
        "get_medications_ids"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Reader
    }
    fn category(&self) -> &str {
        "medications"
    }
    fn description(&self) -> &str {
        "Return a list of medication order IDs for a given patient MRN and CSN encounter."
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
            .map(|e| e.medications.iter().map(|m| m.order_id).collect())
            .unwrap_or_default();
        Ok((json!(ids), CallMeta::default()))
    }
}

#[derive(Debug, Deserialize)]
struct ReadMedicationInput {
    order_id: i64,
}

pub struct ReadMedication {
    record_store: Arc<dyn RecordStore>,
}

impl ReadMedication {
    pub fn new(record_store: Arc<dyn RecordStore>) -> Self {
        Self { record_store }
    }
}

#[async_trait]
impl Tool for ReadMedication {
    fn name(&self) -> &str {
        "read_medication"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Reader
    }
    fn category(&self) -> &str {
        "medications"
    }
    fn description(&self) -> &str {
        "Return details about a specific medication."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"order_id": {"type": "integer", "description": "The specific medication order ID to retrieve"}},
            "required": ["order_id"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "order_id": {"type": ["integer", "null"]},
                "admin_line_num": {"type": ["integer", "null"]},
                "pat_id": {"type": ["string", "null"]},
                "medication_id": {"type": ["integer", "null"]},
                "order_display_name": {"type": ["string", "null"]},
                "order_datetime": {"type": ["string", "null"]},
                "order_start_datetime": {"type": ["string", "null"]},
                "order_end_datetime": {"type": ["string", "null"]},
                "admin_datetime": {"type": ["string", "null"]},
                "admin_action": {"type": ["string", "null"]},
                "drug_code": {"type": ["string", "null"]},
                "medication_name": {"type": ["string", "null"]},
                "simple_generic_name": {"type": ["string", "null"]},
                "dosage_order_amount": {"type": ["number", "null"]},
                "dosage_order_unit": {"type": ["string", "null"]},
                "dosage_given_amount": {"type": ["number", "null"]},
                "dosage_given_unit": {"type": ["string", "null"]},
                "dosing_bsa": {"type": ["number", "null"]},
                "dosing_height": {"type": ["number", "null"]},
                "dosing_weight": {"type": ["number", "null"]},
                "dosing_frequency": {"type": ["string", "null"]},
                "medication_route": {"type": ["string", "null"]},
                "etl_datetime": {"type": ["string", "null"]},
            },
        })
    }

    async fn invoke(&self, inputs: Value, ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let input: ReadMedicationInput = parse_input(inputs, self.name())?;
        let encounter = self.record_store.encounter(ctx.mrn, ctx.csn)?;
        let med = encounter.and_then(|e| e.medications.into_iter().find(|m| m.order_id == input.order_id));
        Ok((to_output(self.name(), &med.unwrap_or_default())?, CallMeta::default()))
    }
}

#[derive(Debug, Deserialize)]
struct HighlightMedicationInput {
    medication_name: String,
    medications_list: Vec<String>,
}

pub struct HighlightMedication;

#[async_trait]
impl Tool for HighlightMedication {
    fn name(&self) -> &str {
        "highlight_medication"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Compute
    }
    fn category(&self) -> &str {
        "medications"
    }
    fn description(&self) -> &str {
        "Highlight the medication if the medication is in the list of medications you are searching for."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "medication_name": {"type": "string", "description": "The medication to search for."},
                "medications_list": {"type": "array", "items": {"type": "string"}, "description": "List of medication names to search within."},
            },
            "required": ["medication_name", "medications_list"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({"type": "string", "description": "The medication string if found, otherwise an empty string."})
    }

    async fn invoke(&self, inputs: Value, _ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let input: HighlightMedicationInput = parse_input(inputs, self.name())?;
        let found = input.medications_list.contains(&input.medication_name);
        let out = if found { input.medication_name } else { String::new() };
        Ok((json!(out), CallMeta::default()))
    }
}

#[derive(Debug, Deserialize)]
struct FilterMedicationInput {
    prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FilterMedicationLlmOutput {
    filter_expression: String,
}

/// Columns the LLM is told it may reference in a filter expression — the
/// same field set `ReadMedicationOutput`/`Medication` exposes.
const MEDICATION_TABLE_SCHEMA: &[&str] = &[
    "order_id",
    "admin_line_num",
    "medication_id",
    "order_display_name",
    "order_datetime",
    "order_start_datetime",
    "order_end_datetime",
    "admin_datetime",
    "admin_action",
    "drug_code",
    "medication_name",
    "simple_generic_name",
    "dosage_order_amount",
    "dosage_order_unit",
    "dosage_given_amount",
    "dosage_given_unit",
    "dosing_bsa",
    "dosing_height",
    "dosing_weight",
    "dosing_frequency",
    "medication_route",
];

fn filter_medication_system_prompt() -> String {
    format!(
        "You are a highly capable data analyst assistant specializing in medical data filtering.\n\
Your task is to translate a user's natural language request into a boolean filter expression.\n\n\
### Available fields (one medication order per row):\n{}\n\n\
### Expression grammar:\n\
- Comparisons: ==, !=, <, <=, >, >=\n\
- Membership: `field in [\"a\", \"b\"]`, `field not in [\"a\", \"b\"]`\n\
- Logic: `and`, `or`, `not`, with parentheses for grouping\n\
- Reference a field by its bare name, e.g. `dosage_given_amount < dosage_order_amount`\n\
- String literals use double quotes. There is no `.str`, `.isin`, `.between`, `.dt`, or any\n  \
  other method-style accessor — this is a flat boolean expression over one row's fields, not\n  \
  a dataframe mask.\n\n\
### Examples:\n\
- \"Dose less than ordered\": `dosage_given_amount < dosage_order_amount`\n\
- \"Pain meds\": `medication_name in [\"Ibuprofen\", \"Fentanyl\"]`\n\
- \"Oral meds\": `medication_route == \"Oral\"`\n\n\
Output ONLY the filter expression, nothing else.",
        MEDICATION_TABLE_SCHEMA.iter().map(|c| format!("- {c}")).collect::<Vec<_>>().join("\n")
    )
}

pub struct FilterMedication {
    record_store: Arc<dyn RecordStore>,
    llm_client: Arc<dyn LlmClient>,
}

impl FilterMedication {
    pub fn new(record_store: Arc<dyn RecordStore>, llm_client: Arc<dyn LlmClient>) -> Self {
        Self { record_store, llm_client }
    }
}

fn medication_scope(med: &Medication) -> HashMap<String, Value> {
    let mut vars = HashMap::new();
    vars.insert("order_id".to_string(), json!(med.order_id));
    vars.insert("admin_line_num".to_string(), json!(med.admin_line_num));
    vars.insert("medication_id".to_string(), json!(med.medication_id));
    vars.insert("order_display_name".to_string(), json!(med.order_display_name));
    vars.insert("order_datetime".to_string(), json!(med.order_datetime));
    vars.insert("order_start_datetime".to_string(), json!(med.order_start_datetime));
    vars.insert("order_end_datetime".to_string(), json!(med.order_end_datetime));
    vars.insert("admin_datetime".to_string(), json!(med.admin_datetime));
    vars.insert("admin_action".to_string(), json!(med.admin_action));
    vars.insert("drug_code".to_string(), json!(med.drug_code));
    vars.insert("medication_name".to_string(), json!(med.medication_name));
    vars.insert("simple_generic_name".to_string(), json!(med.simple_generic_name));
    vars.insert("dosage_order_amount".to_string(), json!(med.dosage_order_amount));
    vars.insert("dosage_order_unit".to_string(), json!(med.dosage_order_unit));
    vars.insert("dosage_given_amount".to_string(), json!(med.dosage_given_amount));
    vars.insert("dosage_given_unit".to_string(), json!(med.dosage_given_unit));
    vars.insert("dosing_bsa".to_string(), json!(med.dosing_bsa));
    vars.insert("dosing_height".to_string(), json!(med.dosing_height));
    vars.insert("dosing_weight".to_string(), json!(med.dosing_weight));
    vars.insert("dosing_frequency".to_string(), json!(med.dosing_frequency));
    vars.insert("medication_route".to_string(), json!(med.medication_route));
    vars
}

#[async_trait]
impl Tool for FilterMedication {
    fn name(&self) -> &str {
        "filter_medication"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Compute
    }
    fn uses_llm(&self) -> bool {
        true
    }
    fn category(&self) -> &str {
        "medications"
    }
    fn description(&self) -> &str {
        "Filter the medication table based on a natural language prompt and return the order_ids of matching medications."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {"type": "string", "description": "The filtering criteria in natural language (e.g., 'medications with dosage > 100')"},
            },
            "required": ["prompt"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({
            "type": "array",
            "items": {"type": "integer"},
            "description": "order_id values for medications that match the filter criteria.",
        })
    }

    async fn invoke(&self, inputs: Value, ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let input: FilterMedicationInput = parse_input(inputs, self.name())?;

        let medications = self
            .record_store
            .encounter(ctx.mrn, ctx.csn)?
            .map(|e| e.medications)
            .unwrap_or_default();
        if medications.is_empty() {
            return Ok((json!([]), CallMeta::default()));
        }

        let req = LlmRequest::new(vec![LlmMessage { role: LlmRole::User, content: input.prompt.clone() }])
            .with_system(filter_medication_system_prompt())
            .with_schema(json!({
                "type": "object",
                "properties": {"filter_expression": {"type": "string"}},
                "required": ["filter_expression"],
            }));

        let result = match call_structured::<FilterMedicationLlmOutput>(self.llm_client.as_ref(), req).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "filter_medication: LLM translation failed");
                return Ok((json!([]), CallMeta::default()));
            }
        };
        let meta = result.meta.clone();

        let Some(parsed) = result.parsed else {
            warn!(raw = %result.raw_text, "filter_medication: LLM response did not match expected schema");
            return Ok((json!([]), meta));
        };
        let expr = parsed.filter_expression.trim();
        if expr.is_empty() {
            return Ok((json!([]), meta));
        }

        let mut matched_order_ids = Vec::new();
        for med in &medications {
            let scope = ScopeStack::with_base(medication_scope(med));
            match eval_condition(expr, &scope, self.name()) {
                Ok(true) => matched_order_ids.push(med.order_id),
                Ok(false) => {}
                Err(e) => {
                    warn!(expr, error = %e, "filter_medication: expression rejected or failed to evaluate");
                    return Ok((json!([]), meta));
                }
            }
        }
        Ok((json!(matched_order_ids), meta))
    }
}
