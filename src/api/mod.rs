//! HTTP API module for the hourglass scheduler.
//!
//! Provides REST endpoints for stepping, inspecting slots, rerunning and
//! killing them, and controlling the scheduler loop.

mod errors;
mod handlers;
mod responses;

pub use errors::{ApiError, ErrorResponse};
pub use handlers::{ApiState, SlotRangeQuery, StepQuery};
pub use responses::*;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::core::workflow::WorkflowConfiguration;
use crate::scheduler::SchedulerHandle;
use crate::storage::StateDatabase;

/// Build the API router with all endpoints.
pub fn build_router<S: StateDatabase + 'static>(state: ApiState<S>) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(handlers::health))
        // Scheduler control
        .route(
            "/api/scheduler/state",
            get(handlers::get_scheduler_state::<S>),
        )
        .route("/api/scheduler/pause", post(handlers::pause_scheduler::<S>))
        .route(
            "/api/scheduler/resume",
            post(handlers::resume_scheduler::<S>),
        )
        .route("/api/scheduler/step", post(handlers::step::<S>))
        // Workflows
        .route("/api/workflows", get(handlers::list_workflows::<S>))
        .route(
            "/api/workflows/{workflow_id}",
            get(handlers::get_workflow::<S>),
        )
        .route(
            "/api/workflows/{workflow_id}/slots",
            get(handlers::list_slots::<S>),
        )
        // Slots
        .route(
            "/api/slots/{workflow_id}/{time}",
            get(handlers::get_slot::<S>),
        )
        .route(
            "/api/slots/{workflow_id}/{time}/rerun",
            post(handlers::rerun_slot::<S>),
        )
        .route(
            "/api/slots/{workflow_id}/{time}/trigger",
            get(handlers::get_trigger_status::<S>),
        )
        .route(
            "/api/slots/{workflow_id}/{time}/kill",
            post(handlers::kill_slot::<S>),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Create the API state from scheduler components.
pub fn create_api_state<S: StateDatabase>(
    handle: SchedulerHandle,
    storage: Arc<S>,
    configuration: Arc<WorkflowConfiguration>,
) -> ApiState<S> {
    ApiState {
        handle,
        storage,
        configuration,
    }
}

/// Start the API server.
///
/// This function spawns the server and returns a handle to the task.
/// The server runs until the task is aborted or the process exits.
pub async fn start_server<S: StateDatabase + 'static>(
    config: &ApiConfig,
    state: ApiState<S>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let router = build_router(state);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let addr = listener.local_addr()?;
    tracing::info!("API server listening on http://{}", addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(handle)
}
