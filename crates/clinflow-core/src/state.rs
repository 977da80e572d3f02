// Conversation state for one workflow-agent session: conversation history,
// workflow version history, and the scratch slots the orchestrator uses to
// carry a workflow through validator/prompt-filler/summarizer before it is
// committed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::workflow::Workflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: ConversationRole,
    pub content: String,
    pub workflow_ref: Option<String>,
}

/// One entry in `agent_call_log`: a condensed record of an agent call made
/// during the current turn, surfaced back to the orchestrator LLM as
/// decision context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCallRecord {
    pub agent: String,
    pub success: bool,
    pub summary: String,
}

/// All state for one workflow-agent session. Not thread-safe by itself —
/// the orchestrator holds it behind whatever locking its caller needs
/// (typically one session per conversation).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub conversation: Vec<ConversationEntry>,
    pub workflow_history: HashMap<String, Workflow>,
    pub current_workflow_id: Option<String>,

    pub mrn: i64,
    pub csn: i64,

    pub last_agent: Option<String>,
    pub last_agent_result: Option<serde_json::Value>,

    pub pending_workflow: Option<Workflow>,
    pub pending_summary: Option<String>,

    /// Agent calls made so far during the current turn; cleared at the top
    /// of `process_message_streaming`, not by `clear_pending`.
    pub agent_call_log: Vec<AgentCallRecord>,
}

impl AgentState {
    pub fn new(mrn: i64, csn: i64) -> Self {
        Self { mrn, csn, ..Default::default() }
    }

    pub fn get_current_workflow(&self) -> Option<&Workflow> {
        self.current_workflow_id
            .as_ref()
            .and_then(|id| self.workflow_history.get(id))
    }

    /// Commits a workflow as a new version and makes it current. Returns
    /// the assigned id (`workflow_v{N}`).
    pub fn add_workflow(&mut self, workflow: Workflow) -> String {
        let version = self.workflow_history.len() + 1;
        let id = format!("workflow_v{version}");
        self.workflow_history.insert(id.clone(), workflow);
        self.current_workflow_id = Some(id.clone());
        id
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.conversation.push(ConversationEntry {
            role: ConversationRole::User,
            content: content.into(),
            workflow_ref: None,
        });
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>, workflow_ref: Option<String>) {
        self.conversation.push(ConversationEntry {
            role: ConversationRole::Assistant,
            content: content.into(),
            workflow_ref,
        });
    }

    /// The workflow an editing agent should act on: a workflow already
    /// staged this turn, falling back to the committed current workflow.
    pub fn pending_or_current(&self) -> Option<&Workflow> {
        self.pending_workflow.as_ref().or_else(|| self.get_current_workflow())
    }

    /// Clears the scratch slots after a workflow is committed to history.
    /// Deliberately does not touch `agent_call_log` — that is only cleared
    /// at the top of the next turn.
    pub fn clear_pending(&mut self) {
        self.pending_workflow = None;
        self.pending_summary = None;
        self.last_agent = None;
        self.last_agent_result = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_workflow_assigns_sequential_versioned_ids() {
        let mut state = AgentState::new(1, 2);
        let id1 = state.add_workflow(Workflow::default());
        assert_eq!(id1, "workflow_v1");
        let id2 = state.add_workflow(Workflow::default());
        assert_eq!(id2, "workflow_v2");
        assert_eq!(state.current_workflow_id.as_deref(), Some("workflow_v2"));
    }

    #[test]
    fn clear_pending_preserves_agent_call_log() {
        let mut state = AgentState::new(1, 2);
        state.agent_call_log.push(AgentCallRecord {
            agent: "generator".to_string(),
            success: true,
            summary: "created 3 steps".to_string(),
        });
        state.pending_summary = Some("a summary".to_string());
        state.clear_pending();
        assert!(state.pending_summary.is_none());
        assert_eq!(state.agent_call_log.len(), 1);
    }

    #[test]
    fn pending_or_current_prefers_pending() {
        let mut state = AgentState::new(1, 2);
        let committed = state.add_workflow(Workflow::default());
        state.clear_pending();
        assert_eq!(state.pending_or_current().unwrap(), state.workflow_history.get(&committed).unwrap());

        let mut pending = Workflow::default();
        pending.output_mappings.push(crate::workflow::OutputMapping {
            output_definition_id: "x".to_string(),
            source_variable: "y".to_string(),
            field: None,
        });
        state.pending_workflow = Some(pending.clone());
        assert_eq!(state.pending_or_current().unwrap(), &pending);
    }
}
