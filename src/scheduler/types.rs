//! Scheduler type definitions.
//!
//! This module contains error types, state enums, reports, and command types
//! for the scheduler.

use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::core::slot::{SlotError, SlotState, SlotStatus};
use crate::core::time::{ScheduledTime, TimeOutOfRange};
use crate::core::trigger::{TriggerError, TriggerStatus};
use crate::core::types::{SlotId, WorkflowId};
use crate::external::ExternalServiceError;
use crate::storage::StorageError;

/// Errors that can occur in the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The sliding window is empty or longer than the supported maximum.
    #[error(
        "sliding window must be between 1 and {max} hours, got {0}",
        max = SchedulerConfig::MAX_SLIDING_WINDOW_HOURS
    )]
    InvalidSlidingWindow(u32),

    /// A scheduling strategy returned a slot that is not READY.
    #[error("scheduling strategy returned {slot_id} in status {status}, expected READY")]
    IllegalCandidate { slot_id: SlotId, status: SlotStatus },

    /// Workflow not found.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    /// Slot has no persisted state.
    #[error("slot not found: {0}")]
    SlotNotFound(SlotId),

    /// The operation needs a RUNNING slot with an external job.
    #[error("slot {0} is not running")]
    NotRunning(SlotId),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// External service error.
    #[error("external service error: {0}")]
    External(#[from] ExternalServiceError),

    /// Trigger evaluation error.
    #[error("trigger error: {0}")]
    Trigger(#[from] TriggerError),

    /// Window arithmetic left the representable time range.
    #[error("time error: {0}")]
    Time(#[from] TimeOutOfRange),

    /// Illegal slot transition.
    #[error("slot error: {0}")]
    Slot(#[from] SlotError),

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// State of the scheduler loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// Scheduler is stopped.
    Stopped,
    /// Scheduler is running; periodic steps are taken.
    Running,
    /// Scheduler is paused; only explicitly requested steps are taken.
    Paused,
}

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How far back from `now` each step looks, in hours.
    pub sliding_window_hours: u32,
}

impl SchedulerConfig {
    /// Default window: one week.
    pub const DEFAULT_SLIDING_WINDOW_HOURS: u32 = 168;

    /// Longest accepted window: one hundred years.
    pub const MAX_SLIDING_WINDOW_HOURS: u32 = 100 * 366 * 24;

    pub fn new(sliding_window_hours: u32) -> Self {
        Self {
            sliding_window_hours,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SLIDING_WINDOW_HOURS)
    }
}

/// A workflow whose processing was aborted during a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowFailure {
    pub workflow_id: WorkflowId,
    pub error: String,
}

/// Outcome of one step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepReport {
    /// Workflows processed to completion.
    pub processed: Vec<WorkflowId>,
    /// Workflows aborted by an error.
    pub failures: Vec<WorkflowFailure>,
}

impl StepReport {
    /// Whether every selected workflow was processed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Commands that can be sent to the scheduler loop.
pub(crate) enum SchedulerCommand {
    /// Step at the given time.
    Step {
        now: ScheduledTime,
        filter: Option<BTreeSet<WorkflowId>>,
        response: oneshot::Sender<Result<StepReport, SchedulerError>>,
    },
    /// Mark a slot for rerun.
    MarkForRerun {
        slot_id: SlotId,
        response: oneshot::Sender<Result<(), SchedulerError>>,
    },
    /// Evaluate a slot's trigger at the current wall-clock time.
    TriggerStatus {
        slot_id: SlotId,
        response: oneshot::Sender<Result<TriggerStatus, SchedulerError>>,
    },
    /// Kill a running slot's external job.
    Kill {
        slot_id: SlotId,
        response: oneshot::Sender<Result<SlotState, SchedulerError>>,
    },
    /// Pause the scheduler.
    Pause { response: oneshot::Sender<()> },
    /// Resume the scheduler.
    Resume { response: oneshot::Sender<()> },
    /// Shutdown the scheduler.
    Shutdown { response: oneshot::Sender<()> },
}
