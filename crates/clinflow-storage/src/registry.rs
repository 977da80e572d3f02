// `StoreRegistry`: one struct, constructed once at process start and
// threaded through `Arc` to the HTTP and worker layers, rather than ad
// hoc lazy global singletons. Each wrapped store keeps its own lock; a
// caller never has to reach through more than one `Arc` to get at any of
// them.

use std::path::PathBuf;
use std::sync::Arc;

use crate::conversation::ConversationStore;
use crate::dataset::DatasetStore;
use crate::experiment::ExperimentStore;

pub struct StoreRegistry {
    pub datasets: DatasetStore,
    pub experiments: ExperimentStore,
    pub conversations: ConversationStore,
}

impl StoreRegistry {
    /// `data_root` is the directory containing `datasets/`, `experiments/`,
    /// and `conversations/`.
    pub fn new(data_root: impl Into<PathBuf>) -> Arc<Self> {
        let data_root = data_root.into();
        Arc::new(Self {
            datasets: DatasetStore::new(data_root.join("datasets")),
            experiments: ExperimentStore::new(data_root.join("experiments")),
            conversations: ConversationStore::new(data_root.join("conversations")),
        })
    }
}
