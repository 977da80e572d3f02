use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("an experiment named {0:?} already exists")]
    NameInUse(String),

    #[error("dataset {0:?} does not exist")]
    DatasetNotFound(String),

    #[error("dataset {0:?} has no patients")]
    DatasetEmpty(String),

    #[error("workflow does not have the expected shape: expected {expected} steps tagged {tool:?}, found {found}")]
    UnexpectedWorkflowShape { tool: String, expected: usize, found: usize },

    #[error("experiment {0:?} was not found")]
    ExperimentNotFound(String),

    #[error(transparent)]
    Store(#[from] clinflow_storage::StoreError),

    #[error(transparent)]
    Core(#[from] clinflow_core::error::CoreError),
}
