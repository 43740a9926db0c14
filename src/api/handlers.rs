//! API request handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::time::ScheduledTime;
use crate::core::trigger::TriggerStatus;
use crate::core::types::{SlotId, WorkflowId};
use crate::core::workflow::WorkflowConfiguration;
use crate::scheduler::SchedulerHandle;
use crate::storage::StateDatabase;

use super::errors::ApiError;
use super::responses::{
    HealthResponse, MessageResponse, SchedulerStateResponse, SlotListResponse, SlotResponse,
    StepResponse, WorkflowListResponse, WorkflowResponse,
};

/// Hours covered by the slot listing when no range is given.
const DEFAULT_SLOT_RANGE_HOURS: u32 = 24;

/// Shared application state for API handlers.
pub struct ApiState<S: StateDatabase> {
    pub handle: SchedulerHandle,
    pub storage: Arc<S>,
    pub configuration: Arc<WorkflowConfiguration>,
}

impl<S: StateDatabase> Clone for ApiState<S> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            storage: Arc::clone(&self.storage),
            configuration: Arc::clone(&self.configuration),
        }
    }
}

/// Query parameters for the step endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct StepQuery {
    /// Step time; defaults to now.
    pub time: Option<String>,
    /// Comma-separated workflow ids; defaults to all.
    pub workflows: Option<String>,
}

/// Query parameters for the slot listing endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct SlotRangeQuery {
    pub start: Option<String>,
    pub end: Option<String>,
}

fn parse_time(raw: &str) -> Result<ScheduledTime, ApiError> {
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("invalid time '{}': {}", raw, e)))
}

fn slot_id<S: StateDatabase>(
    state: &ApiState<S>,
    workflow_id: &str,
    time: &str,
) -> Result<SlotId, ApiError> {
    let workflow_id = WorkflowId::new(workflow_id);
    if state.configuration.find_workflow(&workflow_id).is_none() {
        return Err(ApiError::NotFound(format!(
            "workflow not found: {}",
            workflow_id
        )));
    }
    Ok(SlotId::new(workflow_id, parse_time(time)?))
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

/// Get scheduler state.
pub async fn get_scheduler_state<S: StateDatabase + 'static>(
    State(state): State<ApiState<S>>,
) -> Json<SchedulerStateResponse> {
    let scheduler_state = state.handle.state().await;
    Json(SchedulerStateResponse::from(scheduler_state))
}

/// Pause the scheduler.
pub async fn pause_scheduler<S: StateDatabase + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.pause().await?;
    Ok(Json(MessageResponse {
        message: "scheduler paused".to_string(),
    }))
}

/// Resume the scheduler.
pub async fn resume_scheduler<S: StateDatabase + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.handle.resume().await?;
    Ok(Json(MessageResponse {
        message: "scheduler resumed".to_string(),
    }))
}

/// Run one step, optionally at a given time and for some workflows.
///
/// Responds 500 when any workflow failed; the body lists the failures.
pub async fn step<S: StateDatabase + 'static>(
    State(state): State<ApiState<S>>,
    Query(query): Query<StepQuery>,
) -> Result<(StatusCode, Json<StepResponse>), ApiError> {
    let time = match query.time.as_deref() {
        Some(raw) => parse_time(raw)?,
        None => ScheduledTime::now(),
    };

    let filter: Option<BTreeSet<WorkflowId>> = query.workflows.as_deref().map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(WorkflowId::from)
            .collect()
    });

    let report = state.handle.step(time, filter).await?;
    let status = if report.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(StepResponse::new(time, report))))
}

/// List all workflows, plus stored workflows missing from the configuration.
pub async fn list_workflows<S: StateDatabase + 'static>(
    State(state): State<ApiState<S>>,
) -> Result<Json<WorkflowListResponse>, ApiError> {
    let workflows: Vec<WorkflowResponse> = state
        .configuration
        .workflows()
        .map(|wf| WorkflowResponse::from(wf.as_ref()))
        .collect();
    let count = workflows.len();

    let unconfigured = state
        .storage
        .list_workflow_ids()
        .await?
        .into_iter()
        .filter(|id| state.configuration.find_workflow(id).is_none())
        .map(|id| id.to_string())
        .collect();

    Ok(Json(WorkflowListResponse {
        workflows,
        count,
        unconfigured,
    }))
}

/// Get a specific workflow.
pub async fn get_workflow<S: StateDatabase + 'static>(
    State(state): State<ApiState<S>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let workflow_id = WorkflowId::new(workflow_id);
    let workflow = state
        .configuration
        .find_workflow(&workflow_id)
        .ok_or_else(|| ApiError::NotFound(format!("workflow not found: {}", workflow_id)))?;
    Ok(Json(WorkflowResponse::from(workflow.as_ref())))
}

/// List persisted slot states of a workflow in `[start, end)`.
pub async fn list_slots<S: StateDatabase + 'static>(
    State(state): State<ApiState<S>>,
    Path(workflow_id): Path<String>,
    Query(query): Query<SlotRangeQuery>,
) -> Result<Json<SlotListResponse>, ApiError> {
    let workflow_id = WorkflowId::new(workflow_id);
    if state.configuration.find_workflow(&workflow_id).is_none() {
        return Err(ApiError::NotFound(format!(
            "workflow not found: {}",
            workflow_id
        )));
    }

    let end = match query.end.as_deref() {
        Some(raw) => parse_time(raw)?,
        None => ScheduledTime::now(),
    };
    let start = match query.start.as_deref() {
        Some(raw) => parse_time(raw)?,
        None => end
            .minus_hours(DEFAULT_SLOT_RANGE_HOURS)
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
    };

    let states = state
        .storage
        .get_slot_states(&workflow_id, start, end)
        .await?;
    let slots: Vec<SlotResponse> = states.values().map(SlotResponse::from).collect();
    let count = slots.len();
    Ok(Json(SlotListResponse {
        workflow_id: workflow_id.to_string(),
        start,
        end,
        slots,
        count,
    }))
}

/// Get one slot's persisted state.
pub async fn get_slot<S: StateDatabase + 'static>(
    State(state): State<ApiState<S>>,
    Path((workflow_id, time)): Path<(String, String)>,
) -> Result<Json<SlotResponse>, ApiError> {
    let slot_id = slot_id(&state, &workflow_id, &time)?;
    let slot = state
        .storage
        .get_slot_state(&slot_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("slot not found: {}", slot_id)))?;
    Ok(Json(SlotResponse::from(&slot)))
}

/// Mark a slot for rerun.
pub async fn rerun_slot<S: StateDatabase + 'static>(
    State(state): State<ApiState<S>>,
    Path((workflow_id, time)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let slot_id = slot_id(&state, &workflow_id, &time)?;
    state.handle.mark_for_rerun(slot_id.clone()).await?;
    Ok(Json(MessageResponse {
        message: format!("slot {} marked for rerun", slot_id),
    }))
}

/// Evaluate a slot's trigger tree now.
pub async fn get_trigger_status<S: StateDatabase + 'static>(
    State(state): State<ApiState<S>>,
    Path((workflow_id, time)): Path<(String, String)>,
) -> Result<Json<TriggerStatus>, ApiError> {
    let slot_id = slot_id(&state, &workflow_id, &time)?;
    let status = state.handle.trigger_status(slot_id).await?;
    Ok(Json(status))
}

/// Kill the external job of a running slot.
pub async fn kill_slot<S: StateDatabase + 'static>(
    State(state): State<ApiState<S>>,
    Path((workflow_id, time)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let slot_id = slot_id(&state, &workflow_id, &time)?;
    state.handle.kill_slot(slot_id.clone()).await?;
    Ok(Json(MessageResponse {
        message: format!("slot {} killed", slot_id),
    }))
}
