// Experiment persistence and index cache.
//
// On-disk shape: `experiments/<name>/{metadata.json, status.json,
// results.json}`. The index (patient -> experiments, experiment ->
// summary) is built in one pass over every experiment's `results.json`,
// deduping by `(patient_id, encounter_id)` and counting
// `values.detected == true` to derive `total_flags_detected`/
// `total_encounters`/`patient_count`. A plain `RwLock` backs the cache,
// owned by this struct and threaded through `StoreRegistry`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;
#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use clinflow_core::workflow::OutputDefinition;

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ExperimentMetadata {
    pub name: String,
    pub project_name: String,
    pub workflow_name: String,
    pub dataset_name: String,
    pub created_date: String,
    pub last_modified_date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum ExperimentLifecycle {
    Pending,
    Running,
    Completed,
    PartialComplete,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ExperimentProgress {
    pub total_patients: usize,
    pub processed_count: usize,
    pub failed_count: usize,
    pub current_patient_mrn: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ExperimentStatus {
    pub status: ExperimentLifecycle,
    #[serde(default)]
    pub progress: ExperimentProgress,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    #[serde(default)]
    pub total_flags_detected: u64,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl Default for ExperimentStatus {
    fn default() -> Self {
        Self {
            status: ExperimentLifecycle::Pending,
            progress: ExperimentProgress::default(),
            started_at: None,
            completed_at: None,
            total_flags_detected: 0,
            errors: Vec::new(),
        }
    }
}

/// Metadata carried by one output value in `results.json`:
/// `{patient_id, encounter_id, ...}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct OutputValueMetadata {
    pub patient_id: String,
    pub encounter_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ExperimentOutputValue {
    pub id: String,
    pub output_definition_id: String,
    pub resource_id: String,
    pub values: serde_json::Value,
    pub metadata: OutputValueMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ExperimentResults {
    #[serde(default)]
    pub output_definitions: Vec<OutputDefinition>,
    #[serde(default)]
    pub output_values: Vec<ExperimentOutputValue>,
}

/// One patient's appearance in an experiment, as surfaced by the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct PatientExperimentEntry {
    pub experiment_name: String,
    pub csn: String,
    pub run_date: Option<String>,
    pub flags_detected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ExperimentSummary {
    pub experiment_name: String,
    pub metadata: ExperimentMetadata,
    pub patient_count: usize,
    pub total_encounters: usize,
    pub total_flags_detected: u64,
}

#[derive(Debug, Clone, Default)]
struct ExperimentIndex {
    patient_index: HashMap<i64, Vec<PatientExperimentEntry>>,
    experiment_index: HashMap<String, ExperimentSummary>,
}

pub struct ExperimentStore {
    root: PathBuf,
    index: RwLock<Option<ExperimentIndex>>,
}

impl ExperimentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), index: RwLock::new(None) }
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.dir(name).join("metadata.json").exists()
    }

    fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Creates the on-disk experiment directory with a `pending` status and
    /// empty results. Fails if the experiment already exists — name
    /// uniqueness is enforced here, not just by the scheduler's precondition
    /// check, so two concurrent `submit`s can't race past it.
    pub async fn create(&self, metadata: ExperimentMetadata) -> Result<()> {
        let dir = self.dir(&metadata.name);
        if dir.exists() {
            return Err(StoreError::malformed("experiment", dir.display().to_string(), "experiment already exists"));
        }
        tokio::fs::create_dir_all(&dir).await.map_err(|e| StoreError::io(dir.display().to_string(), e))?;
        write_json(&dir.join("metadata.json"), &metadata).await?;
        write_json(&dir.join("status.json"), &ExperimentStatus::default()).await?;
        write_json(&dir.join("results.json"), &ExperimentResults::default()).await?;
        self.invalidate(None).await;
        Ok(())
    }

    pub async fn metadata(&self, name: &str) -> Result<ExperimentMetadata> {
        read_json(&self.dir(name).join("metadata.json")).await
    }

    pub async fn status(&self, name: &str) -> Result<ExperimentStatus> {
        read_json(&self.dir(name).join("status.json")).await
    }

    pub async fn results(&self, name: &str) -> Result<ExperimentResults> {
        read_json(&self.dir(name).join("results.json")).await
    }

    /// Read-modify-write the status file under an update closure. Each call
    /// is independently atomic; there is no multi-file transaction across
    /// `metadata.json`/`status.json`/`results.json`.
    pub async fn update_status<F>(&self, name: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut ExperimentStatus),
    {
        let mut status = self.status(name).await?;
        update(&mut status);
        write_json(&self.dir(name).join("status.json"), &status).await
    }

    /// Appends output definitions (deduped by id) and output values to
    /// `results.json`.
    pub async fn append_results(
        &self,
        name: &str,
        new_definitions: Vec<OutputDefinition>,
        new_values: Vec<ExperimentOutputValue>,
    ) -> Result<()> {
        let mut results = self.results(name).await?;
        let mut seen: HashSet<String> = results.output_definitions.iter().map(|d| d.id.clone()).collect();
        for def in new_definitions {
            if seen.insert(def.id.clone()) {
                results.output_definitions.push(def);
            }
        }
        results.output_values.extend(new_values);
        write_json(&self.dir(name).join("results.json"), &results).await
    }

    /// All experiments referencing `mrn`, per the cached patient index.
    pub async fn experiments_for_patient(&self, mrn: i64) -> Result<Vec<PatientExperimentEntry>> {
        let index = self.index_cache().await?;
        Ok(index.patient_index.get(&mrn).cloned().unwrap_or_default())
    }

    pub async fn list_experiments(&self) -> Result<Vec<ExperimentSummary>> {
        let index = self.index_cache().await?;
        let mut list: Vec<ExperimentSummary> = index.experiment_index.values().cloned().collect();
        list.sort_by(|a, b| a.experiment_name.cmp(&b.experiment_name));
        Ok(list)
    }

    /// Drops the cached index; `name` is accepted for symmetry with the
    /// other stores' `invalidate(key?)` but the whole index is always
    /// rebuilt from disk on next access, exactly as the original's
    /// `invalidate_experiment_cache` does (it has no per-experiment partial
    /// invalidation either).
    pub async fn invalidate(&self, _name: Option<&str>) {
        *self.index.write().await = None;
    }

    async fn index_cache(&self) -> Result<ExperimentIndex> {
        if let Some(cached) = self.index.read().await.as_ref() {
            return Ok(cloned_index(cached));
        }
        let mut guard = self.index.write().await;
        if let Some(cached) = guard.as_ref() {
            return Ok(cloned_index(cached));
        }
        let built = self.build_index().await?;
        *guard = Some(cloned_index(&built));
        Ok(built)
    }

    async fn build_index(&self) -> Result<ExperimentIndex> {
        info!("building experiment index");
        let mut index = ExperimentIndex::default();

        if !self.root.exists() {
            return Ok(index);
        }

        let mut entries = tokio::fs::read_dir(&self.root).await.map_err(|e| StoreError::io(self.root.display().to_string(), e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(self.root.display().to_string(), e))? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let experiment_name = entry.file_name().to_string_lossy().to_string();
            let (Ok(metadata), Ok(results)) = (
                read_json::<ExperimentMetadata>(&path.join("metadata.json")).await,
                read_json::<ExperimentResults>(&path.join("results.json")).await,
            ) else {
                continue;
            };

            let mut patients_seen: HashSet<String> = HashSet::new();
            let mut encounters_seen: HashMap<(String, String), u64> = HashMap::new();
            let mut total_flags = 0u64;

            for value in &results.output_values {
                let patient_id = value.metadata.patient_id.clone();
                if patient_id.is_empty() {
                    continue;
                }
                let encounter_id = value.metadata.encounter_id.clone();
                patients_seen.insert(patient_id.clone());
                let key = (patient_id, encounter_id);
                let flags = encounters_seen.entry(key).or_insert(0);
                if value.values.get("detected").and_then(|v| v.as_bool()) == Some(true) {
                    *flags += 1;
                    total_flags += 1;
                }
            }

            for ((mrn, csn), flags_detected) in &encounters_seen {
                if let Ok(mrn_num) = mrn.parse::<i64>() {
                    index.patient_index.entry(mrn_num).or_default().push(PatientExperimentEntry {
                        experiment_name: experiment_name.clone(),
                        csn: csn.clone(),
                        run_date: Some(metadata.created_date.clone()),
                        flags_detected: *flags_detected,
                    });
                }
            }

            index.experiment_index.insert(
                experiment_name.clone(),
                ExperimentSummary {
                    experiment_name,
                    metadata,
                    patient_count: patients_seen.len(),
                    total_encounters: encounters_seen.len(),
                    total_flags_detected: total_flags,
                },
            );
        }

        info!(experiments = index.experiment_index.len(), patients = index.patient_index.len(), "built experiment index");
        Ok(index)
    }
}

fn cloned_index(index: &ExperimentIndex) -> ExperimentIndex {
    ExperimentIndex {
        patient_index: index.patient_index.clone(),
        experiment_index: index.experiment_index.clone(),
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(path: &std::path::Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| StoreError::io(path.display().to_string(), e))?;
    serde_json::from_str(&raw).map_err(|e| StoreError::malformed("experiment", path.display().to_string(), e.to_string()))
}

async fn write_json<T: Serialize>(path: &std::path::Path, value: &T) -> Result<()> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|e| StoreError::malformed("experiment", path.display().to_string(), e.to_string()))?;
    tokio::fs::write(path, rendered).await.map_err(|e| StoreError::io(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(name: &str) -> ExperimentMetadata {
        ExperimentMetadata {
            name: name.to_string(),
            project_name: "proj".to_string(),
            workflow_name: "wf".to_string(),
            dataset_name: "ds".to_string(),
            created_date: "2026-01-01T00:00:00Z".to_string(),
            last_modified_date: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(dir.path());
        store.create(metadata("exp1")).await.unwrap();
        assert!(store.exists("exp1").await);
        let status = store.status("exp1").await.unwrap();
        assert_eq!(status.status, ExperimentLifecycle::Pending);
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(dir.path());
        store.create(metadata("exp1")).await.unwrap();
        assert!(store.create(metadata("exp1")).await.is_err());
    }

    #[tokio::test]
    async fn append_results_dedupes_definitions_and_counts_flags() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExperimentStore::new(dir.path());
        store.create(metadata("exp1")).await.unwrap();

        let def = OutputDefinition {
            id: "out1".to_string(),
            name: "flag".to_string(),
            label: "Flag".to_string(),
            tool_name: Some("analyze_note_with_span_and_reason".to_string()),
            field_type: "boolean".to_string(),
        };
        let value = ExperimentOutputValue {
            id: "v1".to_string(),
            output_definition_id: "out1".to_string(),
            resource_id: "note-1".to_string(),
            values: serde_json::json!({"detected": true}),
            metadata: OutputValueMetadata { patient_id: "123".to_string(), encounter_id: "456".to_string(), extra: Default::default() },
        };
        store.append_results("exp1", vec![def.clone()], vec![value]).await.unwrap();
        store.append_results("exp1", vec![def], vec![]).await.unwrap();

        let results = store.results("exp1").await.unwrap();
        assert_eq!(results.output_definitions.len(), 1);
        assert_eq!(results.output_values.len(), 1);

        let summaries = store.list_experiments().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].total_flags_detected, 1);

        let for_patient = store.experiments_for_patient(123).await.unwrap();
        assert_eq!(for_patient.len(), 1);
        assert_eq!(for_patient[0].experiment_name, "exp1");
    }
}
