// clinflow-worker: the experiment scheduler. Fans a resolved workflow out
// across a patient cohort in the background, persisting incremental
// results and progress via `clinflow_storage::ExperimentStore`.

pub mod error;
pub mod scheduler;

pub use error::{Result, SchedulerError};
pub use scheduler::{ExperimentHandle, ExperimentRequest, Scheduler};
