//! Slot state machine.
//!
//! A [`SlotState`] is an immutable value. Every transition consumes nothing and
//! returns a fresh value, so the reconciliation logic stays a pure function of
//! the persisted state and the wall clock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::time::ScheduledTime;
use super::types::{ExternalId, SlotId, WorkflowId};

/// Errors raised by illegal slot transitions.
#[derive(Debug, Error)]
pub enum SlotError {
    /// The transition is not allowed from the current status.
    #[error("illegal transition of slot {slot_id} from {from} to {to}")]
    IllegalTransition {
        slot_id: SlotId,
        from: SlotStatus,
        to: SlotStatus,
    },

    /// A status string could not be parsed.
    #[error("unknown slot status: {0}")]
    UnknownStatus(String),
}

/// Lifecycle status of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotStatus {
    /// Waiting for the trigger to report its input data ready.
    Waiting,
    /// Data is available; waiting for admission by the scheduling strategy.
    Ready,
    /// Submitted to and started on the external service.
    Running,
    /// The external job finished successfully.
    Success,
    /// The external job failed and no retries remain.
    Failure,
    /// The trigger did not become ready before the wait timeout.
    WaitTimeout,
}

impl SlotStatus {
    /// Whether the scheduler will never move this slot again on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SlotStatus::Success | SlotStatus::Failure | SlotStatus::WaitTimeout
        )
    }

    /// Storage and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Waiting => "WAITING",
            SlotStatus::Ready => "READY",
            SlotStatus::Running => "RUNNING",
            SlotStatus::Success => "SUCCESS",
            SlotStatus::Failure => "FAILURE",
            SlotStatus::WaitTimeout => "WAIT_TIMEOUT",
        }
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotStatus {
    type Err = SlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(SlotStatus::Waiting),
            "READY" => Ok(SlotStatus::Ready),
            "RUNNING" => Ok(SlotStatus::Running),
            "SUCCESS" => Ok(SlotStatus::Success),
            "FAILURE" => Ok(SlotStatus::Failure),
            "WAIT_TIMEOUT" => Ok(SlotStatus::WaitTimeout),
            other => Err(SlotError::UnknownStatus(other.to_string())),
        }
    }
}

/// Persisted state of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    slot_id: SlotId,
    status: SlotStatus,
    external_id: Option<ExternalId>,
    retry_count: u32,
}

impl SlotState {
    /// A fresh WAITING slot with no external job and no retries.
    pub fn waiting(slot_id: SlotId) -> Self {
        Self {
            slot_id,
            status: SlotStatus::Waiting,
            external_id: None,
            retry_count: 0,
        }
    }

    /// Reassemble a state from its parts, as stored by a state database.
    pub fn from_parts(
        slot_id: SlotId,
        status: SlotStatus,
        external_id: Option<ExternalId>,
        retry_count: u32,
    ) -> Self {
        Self {
            slot_id,
            status,
            external_id,
            retry_count,
        }
    }

    /// The slot's identifier.
    pub fn slot_id(&self) -> &SlotId {
        &self.slot_id
    }

    /// The owning workflow.
    pub fn workflow_id(&self) -> &WorkflowId {
        self.slot_id.workflow_id()
    }

    /// The slot's scheduled instant.
    pub fn scheduled_time(&self) -> ScheduledTime {
        self.slot_id.scheduled_time()
    }

    /// Current status.
    pub fn status(&self) -> SlotStatus {
        self.status
    }

    /// External job handle, present while RUNNING and after completion.
    pub fn external_id(&self) -> Option<&ExternalId> {
        self.external_id.as_ref()
    }

    /// Number of retries already consumed.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// WAITING -> READY.
    pub fn transition_to_ready(&self) -> Result<SlotState, SlotError> {
        self.expect_status(SlotStatus::Waiting, SlotStatus::Ready)?;
        Ok(self.with_status(SlotStatus::Ready))
    }

    /// WAITING -> WAIT_TIMEOUT.
    pub fn transition_to_wait_timeout(&self) -> Result<SlotState, SlotError> {
        self.expect_status(SlotStatus::Waiting, SlotStatus::WaitTimeout)?;
        Ok(self.with_status(SlotStatus::WaitTimeout))
    }

    /// READY -> RUNNING, recording the external job handle.
    pub fn transition_to_running(&self, external_id: ExternalId) -> Result<SlotState, SlotError> {
        self.expect_status(SlotStatus::Ready, SlotStatus::Running)?;
        Ok(SlotState {
            external_id: Some(external_id),
            ..self.with_status(SlotStatus::Running)
        })
    }

    /// RUNNING -> SUCCESS.
    pub fn transition_to_success(&self) -> Result<SlotState, SlotError> {
        self.expect_status(SlotStatus::Running, SlotStatus::Success)?;
        Ok(self.with_status(SlotStatus::Success))
    }

    /// RUNNING -> FAILURE.
    pub fn transition_to_failure(&self) -> Result<SlotState, SlotError> {
        self.expect_status(SlotStatus::Running, SlotStatus::Failure)?;
        Ok(self.with_status(SlotStatus::Failure))
    }

    /// RUNNING -> WAITING for another attempt.
    ///
    /// Consumes one retry and clears the external handle; the slot repeats the
    /// whole wait, ready, run cycle.
    pub fn transition_to_retry(&self) -> Result<SlotState, SlotError> {
        self.expect_status(SlotStatus::Running, SlotStatus::Waiting)?;
        Ok(SlotState {
            slot_id: self.slot_id.clone(),
            status: SlotStatus::Waiting,
            external_id: None,
            retry_count: self.retry_count + 1,
        })
    }

    /// Any status -> fresh WAITING, as requested by an operator rerun.
    pub fn transition_to_rerun(&self) -> SlotState {
        SlotState::waiting(self.slot_id.clone())
    }

    fn expect_status(&self, expected: SlotStatus, to: SlotStatus) -> Result<(), SlotError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(SlotError::IllegalTransition {
                slot_id: self.slot_id.clone(),
                from: self.status,
                to,
            })
        }
    }

    fn with_status(&self, status: SlotStatus) -> SlotState {
        SlotState {
            status,
            ..self.clone()
        }
    }
}
