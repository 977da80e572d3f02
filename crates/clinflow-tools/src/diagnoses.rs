// Diagnoses tools: the same get-ids/read/highlight convention every
// other category in this crate uses, applied to the `Diagnosis` record.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use clinflow_core::catalog::{Tool, ToolContext, ToolRole};
use clinflow_core::error::Result;
use clinflow_core::llm::CallMeta;
use clinflow_storage::RecordStore;

use crate::common::{parse_input, to_output};

pub struct GetDiagnosisIds {
    record_store: Arc<dyn RecordStore>,
}

impl GetDiagnosisIds {
    pub fn new(record_store: Arc<dyn RecordStore>) -> Self {
        Self { record_store }
    }
}

#[async_trait]
impl Tool for GetDiagnosisIds {
    fn name(&self) -> &str {
        "get_diagnosis_ids"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Reader
    }
    fn category(&self) -> &str {
        "diagnoses"
    }
    fn description(&self) -> &str {
        "Return a list of diagnosis IDs for a given patient MRN and CSN encounter."
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
            .map(|e| e.diagnoses.iter().map(|d| d.diagnosis_id).collect())
            .unwrap_or_default();
        Ok((json!(ids), CallMeta::default()))
    }
}

#[derive(Debug, Deserialize)]
struct ReadDiagnosisInput {
    diagnosis_id: i64,
}

pub struct ReadDiagnosis {
    record_store: Arc<dyn RecordStore>,
}

impl ReadDiagnosis {
    pub fn new(record_store: Arc<dyn RecordStore>) -> Self {
        Self { record_store }
    }
}

#[async_trait]
impl Tool for ReadDiagnosis {
    fn name(&self) -> &str {
        "read_diagnosis"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Reader
    }
    fn category(&self) -> &str {
        "diagnoses"
    }
    fn description(&self) -> &str {
        "Return details about a specific diagnosis."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"diagnosis_id": {"type": "integer", "description": "The specific diagnosis ID to retrieve"}},
            "required": ["diagnosis_id"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "diagnosis_id": {"type": ["integer", "null"]},
                "pat_id": {"type": ["string", "null"]},
                "diagnosis_name": {"type": ["string", "null"]},
                "diagnosis_code": {"type": ["string", "null"]},
                "chronicity": {"type": ["string", "null"]},
                "diagnosis_datetime": {"type": ["string", "null"]},
                "etl_datetime": {"type": ["string", "null"]},
            },
        })
    }

    async fn invoke(&self, inputs: Value, ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let input: ReadDiagnosisInput = parse_input(inputs, self.name())?;
        let encounter = self.record_store.encounter(ctx.mrn, ctx.csn)?;
        let diagnosis = encounter.and_then(|e| e.diagnoses.into_iter().find(|d| d.diagnosis_id == input.diagnosis_id));
        Ok((to_output(self.name(), &diagnosis.unwrap_or_default())?, CallMeta::default()))
    }
}

#[derive(Debug, Deserialize)]
struct HighlightDiagnosisInput {
    diagnosis_name: String,
    diagnoses_list: Vec<String>,
}

pub struct HighlightDiagnosis;

#[async_trait]
impl Tool for HighlightDiagnosis {
    fn name(&self) -> &str {
        "highlight_diagnosis"
    }
    fn role(&self) -> ToolRole {
        ToolRole::Compute
    }
    fn category(&self) -> &str {
        "diagnoses"
    }
    fn description(&self) -> &str {
        "Highlight the diagnosis if it is in the list of diagnoses you are searching for."
    }
    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "diagnosis_name": {"type": "string", "description": "The diagnosis to search for."},
                "diagnoses_list": {"type": "array", "items": {"type": "string"}, "description": "List of diagnosis names to search within."},
            },
            "required": ["diagnosis_name", "diagnoses_list"],
            "additionalProperties": false,
        })
    }
    fn output_schema(&self) -> Value {
        json!({"type": "string", "description": "The diagnosis string if found, otherwise an empty string."})
    }

    async fn invoke(&self, inputs: Value, _ctx: &ToolContext) -> Result<(Value, CallMeta)> {
        let input: HighlightDiagnosisInput = parse_input(inputs, self.name())?;
        let found = input.diagnoses_list.contains(&input.diagnosis_name);
        let out = if found { input.diagnosis_name } else { String::new() };
        Ok((json!(out), CallMeta::default()))
    }
}
