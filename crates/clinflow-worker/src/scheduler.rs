// Background experiment scheduler: spawn-per-job via `tokio::spawn`,
// active jobs tracked in a lock-guarded task map, `shutdown` aborting
// outstanding tasks. Each job fans a workflow out across its cohort
// sequentially, one patient at a time, inside its own task.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use clinflow_core::catalog::ToolContext;
use clinflow_core::executor::Executor;
use clinflow_core::llm::LlmClient;
use clinflow_core::workflow::Workflow;
use clinflow_storage::{
    ExperimentLifecycle, ExperimentMetadata, ExperimentOutputValue, ExperimentStore, OutputValueMetadata,
    RecordStore, StoreRegistry,
};

use crate::error::{Result, SchedulerError};

/// Inputs to submit an experiment. `workflow` is the already-resolved plan
/// body — resolving `workflow_name` to a `Workflow` is a caller concern
/// (plan storage is out of the core's scope).
#[derive(Debug, Clone)]
pub struct ExperimentRequest {
    pub name: String,
    pub project_name: String,
    pub workflow_name: String,
    pub dataset_name: String,
    pub workflow: Workflow,
    /// Cohort restriction; `None` runs every patient in the dataset.
    pub mrns: Option<Vec<i64>>,
    /// The historical "exactly nine `analyze_note_with_span_and_reason`
    /// steps" precondition, parameterized rather than hardcoded: `(tool
    /// name, expected count)`. `None` skips the shape check entirely.
    pub expected_step_count: Option<(String, usize)>,
}

/// Returned immediately on a successful `submit`; the experiment itself
/// keeps running in the background and is tracked by name.
#[derive(Debug, Clone)]
pub struct ExperimentHandle {
    pub name: String,
}

pub struct Scheduler {
    store: Arc<StoreRegistry>,
    llm_client: Arc<dyn LlmClient>,
    active: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(store: Arc<StoreRegistry>, llm_client: Arc<dyn LlmClient>) -> Self {
        Self { store, llm_client, active: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Validates preconditions synchronously, then spawns the background
    /// fan-out and returns right away. `202 Accepted` at the HTTP layer
    /// corresponds to this returning `Ok`.
    pub async fn submit(&self, req: ExperimentRequest) -> Result<ExperimentHandle> {
        if self.store.experiments.exists(&req.name).await {
            return Err(SchedulerError::NameInUse(req.name));
        }
        if !self.store.datasets.dataset_exists(&req.dataset_name).await? {
            return Err(SchedulerError::DatasetNotFound(req.dataset_name));
        }
        let patients = self.store.datasets.patients(&req.dataset_name).await?;
        if patients.is_empty() {
            return Err(SchedulerError::DatasetEmpty(req.dataset_name));
        }
        if let Some((tool, expected)) = &req.expected_step_count {
            let found = count_tool_steps(&req.workflow.steps, tool);
            if found != *expected {
                return Err(SchedulerError::UnexpectedWorkflowShape {
                    tool: tool.clone(),
                    expected: *expected,
                    found,
                });
            }
        }

        let now = Utc::now().to_rfc3339();
        self.store
            .experiments
            .create(ExperimentMetadata {
                name: req.name.clone(),
                project_name: req.project_name.clone(),
                workflow_name: req.workflow_name.clone(),
                dataset_name: req.dataset_name.clone(),
                created_date: now.clone(),
                last_modified_date: now,
            })
            .await?;

        let name = req.name.clone();
        let store = self.store.clone();
        let llm_client = self.llm_client.clone();
        let active = self.active.clone();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let result = run_experiment(&store, llm_client, &req).await;
            if let Err(err) = result {
                warn!(experiment = %req.name, error = %err, "experiment run failed");
                let _ = store
                    .experiments
                    .update_status(&req.name, |status| {
                        status.status = ExperimentLifecycle::Failed;
                        status.completed_at = Some(Utc::now().to_rfc3339());
                        status.errors.push(err.to_string());
                    })
                    .await;
            }
            store.experiments.invalidate(None).await;
            active.write().await.remove(&task_name);
        });

        self.active.write().await.insert(name.clone(), handle);
        Ok(ExperimentHandle { name })
    }

    /// The in-memory scheduler does not actively abort a running task on
    /// cancellation — it only stops tracking it as active, matching
    /// `InMemoryRunner::cancel_workflow`'s own note. Callers observe
    /// completion (or a future abandon) via `status`.
    pub async fn is_running(&self, name: &str) -> bool {
        self.active.read().await.contains_key(name)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn shutdown(&self) {
        info!("shutting down experiment scheduler");
        let mut active = self.active.write().await;
        for (name, handle) in active.drain() {
            info!(experiment = %name, "aborting experiment on shutdown");
            handle.abort();
        }
    }
}

async fn run_experiment(
    store: &Arc<StoreRegistry>,
    llm_client: Arc<dyn LlmClient>,
    req: &ExperimentRequest,
) -> Result<()> {
    let all_patients = store.datasets.patients(&req.dataset_name).await?;
    let wanted: Option<HashSet<i64>> = req.mrns.as_ref().map(|m| m.iter().copied().collect());
    let cohort: Vec<_> = all_patients
        .iter()
        .filter(|p| wanted.as_ref().map_or(true, |w| w.contains(&p.mrn)))
        .collect();

    store
        .experiments
        .update_status(&req.name, |status| {
            status.status = ExperimentLifecycle::Running;
            status.started_at = Some(Utc::now().to_rfc3339());
            status.progress.total_patients = cohort.len();
        })
        .await?;

    let record_store: Arc<dyn RecordStore> = Arc::new(store.datasets.record_store(&req.dataset_name).await?);
    let catalog = clinflow_tools::standard_catalog(record_store.clone(), llm_client);

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut total_flags_detected = 0u64;

    for patient in cohort {
        let Some(encounter) = patient.encounters.first() else {
            failed += 1;
            store
                .experiments
                .update_status(&req.name, |status| {
                    status.progress.failed_count += 1;
                    status.progress.current_patient_mrn = Some(patient.mrn);
                    status.errors.push(format!("patient {}: No encounters found", patient.mrn));
                })
                .await?;
            continue;
        };
        let csn = encounter.csn;

        let executor = Executor::new(&catalog, ToolContext { mrn: patient.mrn, csn });
        match executor.execute_workflow(&req.workflow, HashMap::new()).await {
            Ok(envelope) => {
                let values: Vec<ExperimentOutputValue> = envelope
                    .output_values
                    .into_iter()
                    .map(|ov| {
                        if let Some(true) = ov.value.get("detected").and_then(|v| v.as_bool()) {
                            total_flags_detected += 1;
                        }
                        ExperimentOutputValue {
                            id: uuid::Uuid::new_v4().to_string(),
                            output_definition_id: ov.output_definition_id,
                            resource_id: csn.to_string(),
                            values: ov.value,
                            metadata: OutputValueMetadata {
                                patient_id: patient.mrn.to_string(),
                                encounter_id: csn.to_string(),
                                extra: serde_json::Map::new(),
                            },
                        }
                    })
                    .collect();

                store.experiments.append_results(&req.name, envelope.output_definitions, values).await?;
                succeeded += 1;
                store
                    .experiments
                    .update_status(&req.name, |status| {
                        status.progress.processed_count += 1;
                        status.progress.current_patient_mrn = Some(patient.mrn);
                        status.total_flags_detected = total_flags_detected;
                    })
                    .await?;
            }
            Err(err) => {
                failed += 1;
                store
                    .experiments
                    .update_status(&req.name, |status| {
                        status.progress.failed_count += 1;
                        status.progress.current_patient_mrn = Some(patient.mrn);
                        status.errors.push(format!("patient {}: {err}", patient.mrn));
                    })
                    .await?;
            }
        }
    }

    let terminal = if succeeded == 0 {
        ExperimentLifecycle::Failed
    } else if failed > 0 {
        ExperimentLifecycle::PartialComplete
    } else {
        ExperimentLifecycle::Completed
    };

    store
        .experiments
        .update_status(&req.name, |status| {
            status.status = terminal;
            status.completed_at = Some(Utc::now().to_rfc3339());
        })
        .await?;

    Ok(())
}

fn count_tool_steps(steps: &[clinflow_core::workflow::Step], tool: &str) -> usize {
    use clinflow_core::workflow::Step;

    steps
        .iter()
        .map(|step| match step {
            Step::Tool(t) => usize::from(t.tool == tool),
            Step::Loop(l) => count_tool_steps(&l.body, tool),
            Step::If(i) => {
                count_tool_steps(&as_slice(&i.then), tool)
                    + i.otherwise.as_ref().map_or(0, |o| count_tool_steps(&as_slice(o), tool))
            }
            Step::FlagVariable(_) => 0,
        })
        .sum()
}

fn as_slice(branch: &clinflow_core::workflow::ThenBranch) -> Vec<clinflow_core::workflow::Step> {
    branch.as_slice().into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinflow_core::llm::test_util::StubLlmProvider;
    use clinflow_core::workflow::{Step, ToolStep};

    fn sample_workflow() -> Workflow {
        Workflow {
            steps: vec![Step::Tool(ToolStep {
                id: "s1".into(),
                step_summary: "read a note".into(),
                tool: "get_patient_notes_ids".into(),
                inputs: serde_json::json!({}),
                output: Some("note_ids".into()),
            })],
            output_definitions: vec![],
            output_mappings: vec![],
        }
    }

    async fn registry_with_one_patient(dir: &tempfile::TempDir) -> Arc<StoreRegistry> {
        let dataset_dir = dir.path().join("datasets").join("demo");
        tokio::fs::create_dir_all(&dataset_dir).await.unwrap();
        tokio::fs::write(
            dataset_dir.join("metadata.json"),
            r#"{"name":"Demo","owner":"alice","created_date":"2026-01-01"}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(
            dataset_dir.join("dataset.json"),
            r#"[{"mrn":1,"encounters":[{"csn":10,"notes":[],"medications":[],"diagnoses":[],"flowsheet_instances":[]}]}]"#,
        )
        .await
        .unwrap();
        StoreRegistry::new(dir.path())
    }

    #[tokio::test]
    async fn submit_rejects_a_duplicate_experiment_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = registry_with_one_patient(&dir).await;
        let llm: Arc<dyn LlmClient> = Arc::new(StubLlmProvider::new(vec![]));
        let scheduler = Scheduler::new(store.clone(), llm);

        let request = || ExperimentRequest {
            name: "exp1".into(),
            project_name: "proj".into(),
            workflow_name: "wf".into(),
            dataset_name: "demo".into(),
            workflow: sample_workflow(),
            mrns: None,
            expected_step_count: None,
        };

        scheduler.submit(request()).await.unwrap();
        let err = scheduler.submit(request()).await.unwrap_err();
        assert!(matches!(err, SchedulerError::NameInUse(_)));
    }

    #[tokio::test]
    async fn submit_rejects_an_unknown_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let store = registry_with_one_patient(&dir).await;
        let llm: Arc<dyn LlmClient> = Arc::new(StubLlmProvider::new(vec![]));
        let scheduler = Scheduler::new(store, llm);

        let err = scheduler
            .submit(ExperimentRequest {
                name: "exp1".into(),
                project_name: "proj".into(),
                workflow_name: "wf".into(),
                dataset_name: "missing".into(),
                workflow: sample_workflow(),
                mrns: None,
                expected_step_count: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DatasetNotFound(_)));
    }

    #[tokio::test]
    async fn submit_enforces_expected_step_count_when_given() {
        let dir = tempfile::tempdir().unwrap();
        let store = registry_with_one_patient(&dir).await;
        let llm: Arc<dyn LlmClient> = Arc::new(StubLlmProvider::new(vec![]));
        let scheduler = Scheduler::new(store, llm);

        let err = scheduler
            .submit(ExperimentRequest {
                name: "exp1".into(),
                project_name: "proj".into(),
                workflow_name: "wf".into(),
                dataset_name: "demo".into(),
                workflow: sample_workflow(),
                mrns: None,
                expected_step_count: Some(("analyze_note_with_span_and_reason".into(), 9)),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::UnexpectedWorkflowShape { expected: 9, found: 0, .. }));
    }

    #[tokio::test]
    async fn submit_runs_to_completion_and_marks_status_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = registry_with_one_patient(&dir).await;
        let llm: Arc<dyn LlmClient> = Arc::new(StubLlmProvider::new(vec![]));
        let scheduler = Scheduler::new(store.clone(), llm);

        scheduler
            .submit(ExperimentRequest {
                name: "exp1".into(),
                project_name: "proj".into(),
                workflow_name: "wf".into(),
                dataset_name: "demo".into(),
                workflow: sample_workflow(),
                mrns: None,
                expected_step_count: None,
            })
            .await
            .unwrap();

        for _ in 0..50 {
            if !scheduler.is_running("exp1").await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let status = store.experiments.status("exp1").await.unwrap();
        assert_eq!(status.status, ExperimentLifecycle::Completed);
        assert_eq!(status.progress.processed_count, 1);
    }
}
