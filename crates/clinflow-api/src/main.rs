// clinflow API server.

mod error;
mod experiments;
mod state;
mod supervisor_stream;
mod workflow_agent;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use clinflow_core::auth::AllowAllContext;
use clinflow_core::llm::LlmClient;
use clinflow_storage::StoreRegistry;
use clinflow_worker::Scheduler;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

/// OpenAPI documentation for the workflow-agent, experiment, and legacy
/// supervisor-stream surface.
#[derive(OpenApi)]
#[openapi(
    paths(
        workflow_agent::post_message,
        experiments::submit_experiment,
        experiments::experiment_status,
        experiments::experiment_view,
        supervisor_stream::supervisor_stream,
    ),
    components(schemas(
        workflow_agent::MessageRequest,
        workflow_agent::MessageResponse,
        experiments::SubmitExperimentRequest,
        experiments::ExpectedStepCount,
        experiments::SubmitExperimentResponse,
        experiments::ExperimentView,
        supervisor_stream::SupervisorStreamRequest,
    )),
    tags(
        (name = "workflow-agent", description = "Conversational workflow-authoring turns"),
        (name = "experiments", description = "Background experiment submission and status"),
        (name = "supervisor-stream", description = "Legacy single-turn SSE surface"),
    ),
    info(
        title = "clinflow API",
        version = "0.1.0",
        description = "HTTP surface for the clinical workflow engine's workflow-agent and experiment scheduler",
    )
)]
struct ApiDoc;

fn build_llm_client() -> Result<Arc<dyn LlmClient>> {
    let provider = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
    match provider.as_str() {
        "anthropic" => {
            let client = clinflow_anthropic::AnthropicClient::from_env().context("failed to configure Anthropic client")?;
            Ok(Arc::new(client))
        }
        "openai" => {
            let client = clinflow_openai::OpenAiClient::from_env().context("failed to configure OpenAI client")?;
            Ok(Arc::new(client))
        }
        other => anyhow::bail!("unknown LLM_PROVIDER {other:?}, expected \"openai\" or \"anthropic\""),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "clinflow_api=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("clinflow-api starting...");

    let data_root = std::env::var("CLINFLOW_DATA_ROOT").unwrap_or_else(|_| "./data".to_string());
    let store = StoreRegistry::new(&data_root);
    tracing::info!(data_root = %data_root, "store registry initialized");

    let llm = build_llm_client()?;
    let scheduler = Arc::new(Scheduler::new(store.clone(), llm.clone()));

    let state = AppState { store, llm, scheduler, auth: Arc::new(AllowAllContext) };

    let app = Router::new()
        .route("/health", get(health))
        .merge(workflow_agent::routes(state.clone()))
        .merge(experiments::routes(state.clone()))
        .merge(supervisor_stream::routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let addr = std::env::var("CLINFLOW_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9100".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await.context("failed to bind to address")?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
