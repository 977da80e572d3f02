// Legacy single-turn "supervisor" stream: POST /v1/supervisor-stream,
// replays one orchestrator turn's already-accumulated
// `OrchestratorEvent`s as server-sent events rather than a persisted,
// replayable event log.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::post;
use axum::{Json, Router};
use futures::stream::{self, Stream};
use futures::StreamExt;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use clinflow_core::orchestrator::Orchestrator;
use clinflow_core::state::AgentState;
use clinflow_storage::RecordStore;

use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SupervisorStreamRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub mrn: i64,
    pub csn: i64,
    pub dataset: String,
}

pub fn routes(state: AppState) -> Router {
    Router::new().route("/v1/supervisor-stream", post(supervisor_stream)).with_state(state)
}

/// POST /v1/supervisor-stream
#[utoipa::path(
    post,
    path = "/v1/supervisor-stream",
    request_body = SupervisorStreamRequest,
    responses((status = 200, description = "Server-sent events for one orchestrator turn")),
    tag = "supervisor-stream",
)]
pub async fn supervisor_stream(
    State(state): State<AppState>,
    Json(req): Json<SupervisorStreamRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let conversation_id = req.conversation_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

    let events: Vec<Event> = if !state.auth.can_access_dataset(&req.dataset) {
        vec![error_event(&format!("access to {:?} is denied", req.dataset))]
    } else {
        let setup = async {
            let agent_state = state
                .store
                .conversations
                .load(&conversation_id)
                .await?
                .unwrap_or_else(|| AgentState::new(req.mrn, req.csn));
            let record_store: Arc<dyn RecordStore> = Arc::new(state.store.datasets.record_store(&req.dataset).await?);
            Ok::<_, clinflow_storage::StoreError>((agent_state, record_store))
        };

        match setup.await {
            Ok((mut agent_state, record_store)) => {
                let catalog = clinflow_tools::standard_catalog(record_store, state.llm.clone());
                let orchestrator = Orchestrator::new(state.llm.clone(), catalog);
                let turn_events = orchestrator.process_message_streaming(&mut agent_state, &req.message, None).await.collect::<Vec<_>>().await;

                if let Err(err) = state.store.conversations.save(&conversation_id, &agent_state).await {
                    vec![error_event(&err.to_string())]
                } else {
                    turn_events
                        .iter()
                        .map(|e| Event::default().json_data(e).unwrap_or_else(|_| Event::default().data("{}")))
                        .collect()
                }
            }
            Err(err) => vec![error_event(&err.to_string())],
        }
    };

    Sse::new(stream::iter(events.into_iter().map(Ok))).keep_alive(KeepAlive::default())
}

fn error_event(message: &str) -> Event {
    Event::default().event("error").data(message.to_string())
}
