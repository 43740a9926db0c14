//! API response types.

use serde::Serialize;

use crate::core::slot::{SlotState, SlotStatus};
use crate::core::time::ScheduledTime;
use crate::core::workflow::{Workflow, WorkflowInfo};
use crate::scheduler::{SchedulerState, StepReport, WorkflowFailure};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Scheduler state response.
#[derive(Debug, Serialize)]
pub struct SchedulerStateResponse {
    pub state: SchedulerState,
    pub is_running: bool,
    pub is_paused: bool,
}

impl From<SchedulerState> for SchedulerStateResponse {
    fn from(state: SchedulerState) -> Self {
        Self {
            state,
            is_running: state == SchedulerState::Running,
            is_paused: state == SchedulerState::Paused,
        }
    }
}

/// Result of an explicit step.
#[derive(Debug, Serialize)]
pub struct StepResponse {
    pub time: ScheduledTime,
    pub processed: Vec<String>,
    pub failures: Vec<WorkflowFailure>,
}

impl StepResponse {
    pub fn new(time: ScheduledTime, report: StepReport) -> Self {
        Self {
            time,
            processed: report.processed.iter().map(|id| id.to_string()).collect(),
            failures: report.failures,
        }
    }
}

/// Workflow summary.
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub schedule: String,
    pub timezone: String,
    pub max_retry_count: u32,
    pub start_time: ScheduledTime,
    pub wait_timeout_secs: i64,
    pub info: WorkflowInfo,
}

impl From<&Workflow> for WorkflowResponse {
    fn from(workflow: &Workflow) -> Self {
        Self {
            id: workflow.id().to_string(),
            schedule: workflow.schedule().expression().to_string(),
            timezone: workflow.schedule().timezone().to_string(),
            max_retry_count: workflow.max_retry_count(),
            start_time: workflow.start_time(),
            wait_timeout_secs: workflow.wait_timeout_secs(),
            info: workflow.info().clone(),
        }
    }
}

/// List of workflows response.
#[derive(Debug, Serialize)]
pub struct WorkflowListResponse {
    pub workflows: Vec<WorkflowResponse>,
    pub count: usize,
    /// Workflows with persisted slots that are no longer configured.
    pub unconfigured: Vec<String>,
}

/// Slot state response.
#[derive(Debug, Serialize)]
pub struct SlotResponse {
    pub workflow_id: String,
    pub scheduled_time: ScheduledTime,
    pub status: SlotStatus,
    pub external_id: Option<String>,
    pub retry_count: u32,
}

impl From<&SlotState> for SlotResponse {
    fn from(state: &SlotState) -> Self {
        Self {
            workflow_id: state.workflow_id().to_string(),
            scheduled_time: state.scheduled_time(),
            status: state.status(),
            external_id: state.external_id().map(|id| id.to_string()),
            retry_count: state.retry_count(),
        }
    }
}

/// Slots of one workflow in a time range.
#[derive(Debug, Serialize)]
pub struct SlotListResponse {
    pub workflow_id: String,
    pub start: ScheduledTime,
    pub end: ScheduledTime,
    pub slots: Vec<SlotResponse>,
    pub count: usize,
}

/// Simple message response.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
