// clinflow-storage: on-disk JSON persistence for patient records, datasets,
// conversations and experiments.
//
// Every store here is a whole-file JSON document, not a relational table —
// there is no `sqlx` dependency in this crate. Each store is a
// thread-safe, lazily-populated cache with an explicit `invalidate(key?)`,
// combined into one `StoreRegistry` rather than a set of process-global
// lazy statics.

pub mod conversation;
pub mod dataset;
pub mod error;
pub mod experiment;
pub mod record_store;
pub mod registry;

pub use conversation::ConversationStore;
pub use dataset::{DatasetMetadata, DatasetStore};
pub use error::{Result, StoreError};
pub use experiment::{
    ExperimentLifecycle, ExperimentMetadata, ExperimentOutputValue, ExperimentProgress, ExperimentResults,
    ExperimentStatus, ExperimentStore, ExperimentSummary, OutputValueMetadata, PatientExperimentEntry,
};
pub use record_store::{Diagnosis, Encounter, FlowsheetInstance, JsonRecordStore, Medication, Note, PatientRecord, RecordStore};
pub use registry::StoreRegistry;
