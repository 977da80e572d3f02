// The standard tool catalog: fourteen tools across four categories.
//
// `ToolCatalog` itself lives in `clinflow-core` and knows nothing about
// these concrete tools — `standard_catalog` is the composition root that
// wires a dataset-scoped `RecordStore` and an `LlmClient` into the fixed
// set every workflow agent plans and executes over.

pub mod common;
pub mod diagnoses;
pub mod flowsheets;
pub mod medications;
pub mod notes;
pub mod variable_management;

use std::sync::Arc;

use clinflow_core::catalog::ToolCatalog;
use clinflow_core::llm::LlmClient;
use clinflow_storage::RecordStore;

/// Builds the fixed fourteen-tool catalog described in
/// `tool_specs.get_tools_list`, bound to one dataset's `RecordStore` and one
/// `LlmClient`. Call once per dataset context (a fresh dataset means a
/// fresh `RecordStore`, hence a fresh catalog) and share the result behind
/// an `Arc`.
pub fn standard_catalog(record_store: Arc<dyn RecordStore>, llm_client: Arc<dyn LlmClient>) -> ToolCatalog {
    let mut catalog = ToolCatalog::new();

    catalog.register(Arc::new(notes::GetPatientNotesIds::new(record_store.clone())));
    catalog.register(Arc::new(notes::ReadPatientNote::new(record_store.clone())));
    catalog.register(Arc::new(notes::SummarizePatientNote::new(llm_client.clone())));
    catalog.register(Arc::new(notes::HighlightPatientNote));
    catalog.register(Arc::new(notes::AnalyzeNoteWithSpanAndReason::new(llm_client.clone())));

    catalog.register(Arc::new(medications::GetMedicationsIds::new(record_store.clone())));
    catalog.register(Arc::new(medications::ReadMedication::new(record_store.clone())));
    catalog.register(Arc::new(medications::HighlightMedication));
    catalog.register(Arc::new(medications::FilterMedication::new(record_store.clone(), llm_client.clone())));

    catalog.register(Arc::new(diagnoses::GetDiagnosisIds::new(record_store.clone())));
    catalog.register(Arc::new(diagnoses::ReadDiagnosis::new(record_store.clone())));
    catalog.register(Arc::new(diagnoses::HighlightDiagnosis));

    catalog.register(Arc::new(flowsheets::ReadFlowsheetsTable::new(record_store.clone())));
    catalog.register(Arc::new(flowsheets::SummarizeFlowsheetsTable::new(llm_client.clone())));

    catalog.register(Arc::new(variable_management::InitStore));
    catalog.register(Arc::new(variable_management::StoreAppend));
    catalog.register(Arc::new(variable_management::StoreRead));
    catalog.register(Arc::new(variable_management::BuildText));

    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinflow_core::llm::test_util::StubLlmProvider;
    use clinflow_storage::JsonRecordStore;

    #[test]
    fn standard_catalog_registers_fourteen_tools() {
        let record_store: Arc<dyn RecordStore> = Arc::new(JsonRecordStore::new(vec![]));
        let llm_client: Arc<dyn LlmClient> = Arc::new(StubLlmProvider::new(vec![]));
        let catalog = standard_catalog(record_store, llm_client);
        assert_eq!(catalog.len(), 14);
    }

    #[test]
    fn categories_match_the_four_tool_groups() {
        let record_store: Arc<dyn RecordStore> = Arc::new(JsonRecordStore::new(vec![]));
        let llm_client: Arc<dyn LlmClient> = Arc::new(StubLlmProvider::new(vec![]));
        let catalog = standard_catalog(record_store, llm_client);
        let mut categories: Vec<String> = catalog.list().into_iter().map(|s| s.category).collect();
        categories.sort();
        categories.dedup();
        assert_eq!(categories, vec!["diagnoses", "flowsheets", "medications", "notes", "variable_management"]);
    }
}
