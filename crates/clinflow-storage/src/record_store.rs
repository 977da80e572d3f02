// Typed, read-only accessor over one dataset's patient records.
//
// Every tool is constructed against one dataset name, loads that
// dataset's patient list once, then scans it in memory per call. The
// scan-by-mrn-then-csn shape lives here as a trait method instead of
// being duplicated in every tool.

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Note {
    pub note_id: i64,
    pub pat_id: Option<String>,
    pub note_type_id: Option<i64>,
    pub note_type: Option<String>,
    pub note_status: Option<String>,
    pub service: Option<String>,
    pub author: Option<String>,
    pub create_datetime: Option<String>,
    pub filing_datetime: Option<String>,
    pub note_text: Option<String>,
    pub etl_datetime: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Medication {
    pub order_id: i64,
    pub admin_line_num: Option<i64>,
    pub pat_id: Option<String>,
    pub medication_id: Option<i64>,
    pub order_display_name: Option<String>,
    pub order_datetime: Option<String>,
    pub order_start_datetime: Option<String>,
    pub order_end_datetime: Option<String>,
    pub admin_datetime: Option<String>,
    pub admin_action: Option<String>,
    pub drug_code: Option<String>,
    pub medication_name: Option<String>,
    pub simple_generic_name: Option<String>,
    pub dosage_order_amount: Option<f64>,
    pub dosage_order_unit: Option<String>,
    pub dosage_given_amount: Option<f64>,
    pub dosage_given_unit: Option<String>,
    pub dosing_bsa: Option<f64>,
    pub dosing_height: Option<f64>,
    pub dosing_weight: Option<f64>,
    pub dosing_frequency: Option<String>,
    pub medication_route: Option<String>,
    pub etl_datetime: Option<String>,
}

/// Built by close analogy to `Medication`/`Note`: no `diagnoses.py` was
/// retrieved alongside the other tool modules, so this shape follows the
/// same id/name/reader convention the rest of the record model uses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnosis {
    pub diagnosis_id: i64,
    pub pat_id: Option<String>,
    pub diagnosis_name: Option<String>,
    pub diagnosis_code: Option<String>,
    pub chronicity: Option<String>,
    pub diagnosis_datetime: Option<String>,
    pub etl_datetime: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowsheetInstance {
    pub flo_meas_id: Option<i64>,
    pub flo_meas_name: Option<String>,
    pub value: Option<serde_json::Value>,
    pub recorded_datetime: Option<String>,
    pub etl_datetime: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Encounter {
    pub csn: i64,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub diagnoses: Vec<Diagnosis>,
    #[serde(default)]
    pub flowsheet_instances: Vec<FlowsheetInstance>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientRecord {
    pub mrn: i64,
    #[serde(default)]
    pub encounters: Vec<Encounter>,
}

/// Read-only accessor over one dataset's patient records, scoped to the
/// dataset it was built against (per-dataset scoping mirrors the original's
/// one-dataset-per-tool-instance convention).
pub trait RecordStore: Send + Sync {
    fn patient(&self, mrn: i64) -> Result<Option<PatientRecord>>;
    fn encounter(&self, mrn: i64, csn: i64) -> Result<Option<Encounter>>;
}

/// A `RecordStore` backed by one dataset's JSON patient list, loaded once at
/// construction (mirrors `get_dataset_patients(dataset_name)` being read
/// once into `self.dataset` in every Python tool's `__init__`).
pub struct JsonRecordStore {
    patients: Vec<PatientRecord>,
}

impl JsonRecordStore {
    pub fn new(patients: Vec<PatientRecord>) -> Self {
        Self { patients }
    }

    pub fn patient_count(&self) -> usize {
        self.patients.len()
    }
}

impl RecordStore for JsonRecordStore {
    fn patient(&self, mrn: i64) -> Result<Option<PatientRecord>> {
        Ok(self.patients.iter().find(|p| p.mrn == mrn).cloned())
    }

    fn encounter(&self, mrn: i64, csn: i64) -> Result<Option<Encounter>> {
        Ok(self
            .patients
            .iter()
            .find(|p| p.mrn == mrn)
            .and_then(|p| p.encounters.iter().find(|e| e.csn == csn))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> JsonRecordStore {
        JsonRecordStore::new(vec![PatientRecord {
            mrn: 123,
            encounters: vec![Encounter {
                csn: 456,
                notes: vec![Note { note_id: 1, note_text: Some("hello".into()), ..Default::default() }],
                ..Default::default()
            }],
        }])
    }

    #[test]
    fn finds_patient_and_encounter() {
        let store = sample_store();
        assert!(store.patient(123).unwrap().is_some());
        assert!(store.patient(999).unwrap().is_none());
        let encounter = store.encounter(123, 456).unwrap().unwrap();
        assert_eq!(encounter.notes.len(), 1);
        assert!(store.encounter(123, 999).unwrap().is_none());
    }
}
