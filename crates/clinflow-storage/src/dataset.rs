// Dataset metadata/patient cache.
//
// Metadata is loaded eagerly (one scan of `datasets/*/metadata.json`),
// full patient payloads are loaded lazily per dataset on first demand,
// and an explicit `invalidate(name?)` drops either one entry or
// everything. A plain `tokio::sync::RwLock` backs the cache; `StoreRegistry`
// constructs one instance and hands it out behind an `Arc`, rather than
// reaching for a process-global static.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::record_store::{JsonRecordStore, PatientRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub dataset_name: String,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub created_date: Option<String>,
    pub last_modified_date: Option<String>,
    pub patient_count: usize,
}

pub struct DatasetStore {
    root: PathBuf,
    metadata: RwLock<Option<HashMap<String, DatasetMetadata>>>,
    patients: RwLock<HashMap<String, Arc<Vec<PatientRecord>>>>,
}

impl DatasetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            metadata: RwLock::new(None),
            patients: RwLock::new(HashMap::new()),
        }
    }

    pub async fn list_datasets(&self) -> Result<Vec<DatasetMetadata>> {
        let metadata = self.metadata_cache().await?;
        let mut list: Vec<DatasetMetadata> = metadata.values().cloned().collect();
        list.sort_by(|a, b| b.created_date.cmp(&a.created_date));
        Ok(list)
    }

    pub async fn dataset_exists(&self, dataset_name: &str) -> Result<bool> {
        let metadata = self.metadata_cache().await?;
        Ok(metadata.contains_key(dataset_name))
    }

    pub async fn metadata(&self, dataset_name: &str) -> Result<Option<DatasetMetadata>> {
        let metadata = self.metadata_cache().await?;
        Ok(metadata.get(dataset_name).cloned())
    }

    /// Loads (and caches) the full patient list for a dataset.
    pub async fn patients(&self, dataset_name: &str) -> Result<Arc<Vec<PatientRecord>>> {
        if let Some(cached) = self.patients.read().await.get(dataset_name) {
            return Ok(cached.clone());
        }
        let mut patients = self.patients.write().await;
        if let Some(cached) = patients.get(dataset_name) {
            return Ok(cached.clone());
        }
        let path = self.root.join(dataset_name).join("dataset.json");
        let loaded = load_patients(&path).await?;
        let loaded = Arc::new(loaded);
        patients.insert(dataset_name.to_string(), loaded.clone());
        Ok(loaded)
    }

    /// A `RecordStore` view over one dataset's cached patient list.
    pub async fn record_store(&self, dataset_name: &str) -> Result<JsonRecordStore> {
        let patients = self.patients(dataset_name).await?;
        Ok(JsonRecordStore::new((*patients).clone()))
    }

    /// Clears cached metadata and/or patient data. `None` clears everything.
    pub async fn invalidate(&self, dataset_name: Option<&str>) {
        match dataset_name {
            Some(name) => {
                self.patients.write().await.remove(name);
                self.metadata.write().await.take();
            }
            None => {
                *self.metadata.write().await = None;
                self.patients.write().await.clear();
            }
        }
    }

    async fn metadata_cache(&self) -> Result<HashMap<String, DatasetMetadata>> {
        if let Some(cached) = self.metadata.read().await.as_ref() {
            return Ok(cached.clone());
        }
        let mut guard = self.metadata.write().await;
        if let Some(cached) = guard.as_ref() {
            return Ok(cached.clone());
        }
        let loaded = load_all_metadata(&self.root).await?;
        *guard = Some(loaded.clone());
        Ok(loaded)
    }
}

async fn load_all_metadata(root: &Path) -> Result<HashMap<String, DatasetMetadata>> {
    info!(root = %root.display(), "loading dataset metadata from disk");
    let mut datasets = HashMap::new();

    if !root.exists() {
        tokio::fs::create_dir_all(root).await.map_err(|e| StoreError::io(root.display().to_string(), e))?;
        return Ok(datasets);
    }

    let mut entries = tokio::fs::read_dir(root).await.map_err(|e| StoreError::io(root.display().to_string(), e))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::io(root.display().to_string(), e))? {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let dataset_name = entry.file_name().to_string_lossy().to_string();
        let metadata_path = path.join("metadata.json");
        let Ok(raw) = tokio::fs::read_to_string(&metadata_path).await else {
            warn!(dataset = %dataset_name, "no metadata.json found, skipping");
            continue;
        };
        let parsed: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(dataset = %dataset_name, error = %e, "malformed metadata.json, skipping");
                continue;
            }
        };
        let required = ["name", "owner", "created_date"];
        if !required.iter().all(|f| parsed.get(f).is_some()) {
            warn!(dataset = %dataset_name, "metadata missing required fields, skipping");
            continue;
        }
        let patient_count = count_patients(&path.join("dataset.json")).await;
        datasets.insert(
            dataset_name.clone(),
            DatasetMetadata {
                dataset_name,
                name: parsed.get("name").and_then(|v| v.as_str()).map(str::to_string),
                owner: parsed.get("owner").and_then(|v| v.as_str()).map(str::to_string),
                created_date: parsed.get("created_date").and_then(|v| v.as_str()).map(str::to_string),
                last_modified_date: parsed.get("last_modified_date").and_then(|v| v.as_str()).map(str::to_string),
                patient_count,
            },
        );
    }

    info!(count = datasets.len(), "loaded datasets from disk");
    Ok(datasets)
}

async fn count_patients(dataset_path: &Path) -> usize {
    match tokio::fs::read_to_string(dataset_path).await {
        Ok(raw) => serde_json::from_str::<Vec<serde_json::Value>>(&raw).map(|v| v.len()).unwrap_or(0),
        Err(_) => 0,
    }
}

async fn load_patients(path: &Path) -> Result<Vec<PatientRecord>> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| StoreError::io(path.display().to_string(), e))?;
    serde_json::from_str(&raw).map_err(|e| StoreError::malformed("dataset", path.display().to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_dataset_directory_is_created_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DatasetStore::new(dir.path().join("datasets"));
        let list = store.list_datasets().await.unwrap();
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn loads_metadata_and_patient_count() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_dir = dir.path().join("demo");
        tokio::fs::create_dir_all(&dataset_dir).await.unwrap();
        tokio::fs::write(
            dataset_dir.join("metadata.json"),
            r#"{"name":"Demo","owner":"alice","created_date":"2026-01-01"}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dataset_dir.join("dataset.json"), r#"[{"mrn":1,"encounters":[]}]"#)
            .await
            .unwrap();

        let store = DatasetStore::new(dir.path());
        assert!(store.dataset_exists("demo").await.unwrap());
        let metadata = store.metadata("demo").await.unwrap().unwrap();
        assert_eq!(metadata.patient_count, 1);

        let patients = store.patients("demo").await.unwrap();
        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].mrn, 1);
    }

    #[tokio::test]
    async fn invalidate_drops_cached_entries() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_dir = dir.path().join("demo");
        tokio::fs::create_dir_all(&dataset_dir).await.unwrap();
        tokio::fs::write(
            dataset_dir.join("metadata.json"),
            r#"{"name":"Demo","owner":"alice","created_date":"2026-01-01"}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dataset_dir.join("dataset.json"), "[]").await.unwrap();

        let store = DatasetStore::new(dir.path());
        store.metadata("demo").await.unwrap();
        store.invalidate(Some("demo")).await;
        assert!(store.patients.read().await.get("demo").is_none());
    }
}
