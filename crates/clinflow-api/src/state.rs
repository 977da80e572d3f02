use std::sync::Arc;

use clinflow_core::auth::AuthContext;
use clinflow_core::llm::LlmClient;
use clinflow_storage::StoreRegistry;
use clinflow_worker::Scheduler;

/// Shared application state, threaded through every route module.
/// `auth` is accepted but never constructed beyond `AllowAllContext` — the
/// full user/project/dataset-grant model is out of scope here.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StoreRegistry>,
    pub llm: Arc<dyn LlmClient>,
    pub scheduler: Arc<Scheduler>,
    pub auth: Arc<dyn AuthContext>,
}
