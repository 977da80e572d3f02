// Conversation persistence: `conversations/<id>/{conversation.json,
// traces/turn_NNN.jsonl}`. `clinflow_core::trace` deliberately stops at
// producing a JSON-Lines string — this module owns writing that string to
// disk.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::RwLock;

use clinflow_core::state::AgentState;

use crate::error::{Result, StoreError};

pub struct ConversationStore {
    root: PathBuf,
    cache: RwLock<HashMap<String, AgentState>>,
}

impl ConversationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), cache: RwLock::new(HashMap::new()) }
    }

    fn dir(&self, conversation_id: &str) -> PathBuf {
        self.root.join(conversation_id)
    }

    pub async fn exists(&self, conversation_id: &str) -> bool {
        if self.cache.read().await.contains_key(conversation_id) {
            return true;
        }
        self.dir(conversation_id).join("conversation.json").exists()
    }

    /// Loads a conversation's `AgentState`, caching it. A fresh conversation
    /// (no file yet) is represented by the caller constructing a new
    /// `AgentState` rather than this method — it returns `Ok(None)` when
    /// nothing is on disk yet.
    pub async fn load(&self, conversation_id: &str) -> Result<Option<AgentState>> {
        if let Some(state) = self.cache.read().await.get(conversation_id) {
            return Ok(Some(state.clone()));
        }
        let path = self.dir(conversation_id).join("conversation.json");
        if !path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| StoreError::io(path.display().to_string(), e))?;
        let state: AgentState =
            serde_json::from_str(&raw).map_err(|e| StoreError::malformed("conversation", path.display().to_string(), e.to_string()))?;
        self.cache.write().await.insert(conversation_id.to_string(), state.clone());
        Ok(Some(state))
    }

    /// Writes `conversation.json` first, then updates the cache under lock.
    pub async fn save(&self, conversation_id: &str, state: &AgentState) -> Result<()> {
        let dir = self.dir(conversation_id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| StoreError::io(dir.display().to_string(), e))?;
        let rendered =
            serde_json::to_string_pretty(state).map_err(|e| StoreError::malformed("conversation", dir.display().to_string(), e.to_string()))?;
        let path = dir.join("conversation.json");
        tokio::fs::write(&path, rendered).await.map_err(|e| StoreError::io(path.display().to_string(), e))?;
        self.cache.write().await.insert(conversation_id.to_string(), state.clone());
        Ok(())
    }

    /// Persists one turn's finalized trace as `traces/turn_NNN.jsonl`, zero
    /// padded to three digits.
    pub async fn save_trace(&self, conversation_id: &str, turn_number: u32, jsonl: &str) -> Result<()> {
        let traces_dir = self.dir(conversation_id).join("traces");
        tokio::fs::create_dir_all(&traces_dir).await.map_err(|e| StoreError::io(traces_dir.display().to_string(), e))?;
        let path = traces_dir.join(format!("turn_{turn_number:03}.jsonl"));
        tokio::fs::write(&path, jsonl).await.map_err(|e| StoreError::io(path.display().to_string(), e))
    }

    pub async fn invalidate(&self, conversation_id: Option<&str>) {
        match conversation_id {
            Some(id) => {
                self.cache.write().await.remove(id);
            }
            None => self.cache.write().await.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_conversation_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        assert!(store.load("conv1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        let state = AgentState::new(111, 222);
        store.save("conv1", &state).await.unwrap();

        let loaded = store.load("conv1").await.unwrap().unwrap();
        assert_eq!(loaded.mrn, 111);
        assert_eq!(loaded.csn, 222);
    }

    #[tokio::test]
    async fn save_trace_writes_zero_padded_filename() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        store.save_trace("conv1", 7, "{\"event\":\"turn_start\"}\n").await.unwrap();
        let path = dir.path().join("conv1").join("traces").join("turn_007.jsonl");
        assert!(path.exists());
    }
}
