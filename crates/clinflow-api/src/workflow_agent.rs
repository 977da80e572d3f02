// workflow-agent routes: POST /v1/workflow-agent/message. Runs one
// orchestrator turn and returns {response_type, message, workflow_data?}.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use clinflow_core::orchestrator::Orchestrator;
use clinflow_core::state::{AgentState, ConversationRole};
use clinflow_core::trace::TraceRecorder;
use clinflow_core::workflow::Workflow;
use clinflow_storage::RecordStore;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct MessageRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub mrn: i64,
    pub csn: i64,
    pub dataset: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub conversation_id: String,
    pub response_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_data: Option<Workflow>,
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/v1/workflow-agent/message", post(post_message)).with_state(state)
}

/// POST /v1/workflow-agent/message
#[utoipa::path(
    post,
    path = "/v1/workflow-agent/message",
    request_body = MessageRequest,
    responses((status = 200, description = "One orchestrator turn completed", body = MessageResponse)),
    tag = "workflow-agent",
)]
pub async fn post_message(
    State(state): State<AppState>,
    Json(req): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.auth.can_access_dataset(&req.dataset) {
        return Err(ApiError::AccessDenied(req.dataset));
    }

    let conversation_id = req.conversation_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut agent_state = state
        .store
        .conversations
        .load(&conversation_id)
        .await?
        .unwrap_or_else(|| AgentState::new(req.mrn, req.csn));

    let record_store: Arc<dyn RecordStore> = Arc::new(state.store.datasets.record_store(&req.dataset).await?);
    let catalog = clinflow_tools::standard_catalog(record_store, state.llm.clone());
    let orchestrator = Orchestrator::new(state.llm.clone(), catalog);

    let turn_number =
        agent_state.conversation.iter().filter(|entry| entry.role == ConversationRole::User).count() as u32 + 1;
    let mut trace = TraceRecorder::new(conversation_id.clone(), turn_number);

    let result = orchestrator.process_message(&mut agent_state, &req.message, Some(&mut trace)).await?;

    state.store.conversations.save(&conversation_id, &agent_state).await?;
    if let Some(jsonl) = &result.trace_jsonl {
        state.store.conversations.save_trace(&conversation_id, turn_number, jsonl).await?;
    }

    Ok(Json(MessageResponse {
        conversation_id,
        response_type: result.response_type,
        message: result.text,
        workflow_data: result.workflow,
    }))
}
