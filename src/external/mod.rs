//! External job-running backends.
//!
//! The scheduler never runs a slot's work itself. It submits the slot to an
//! [`ExternalService`], starts it, and polls its status on later steps.

mod command;

pub use command::{CommandExternalService, CommandExternalServiceBuilder};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{ExternalId, SlotId};

/// Errors reported by an external service.
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    /// The job could not be submitted.
    #[error("failed to submit {slot_id}: {message}")]
    Submit { slot_id: SlotId, message: String },

    /// A submitted job could not be started.
    #[error("failed to start job {external_id}: {message}")]
    Start {
        external_id: ExternalId,
        message: String,
    },

    /// The job's status could not be determined.
    #[error("failed to query job {external_id}: {message}")]
    Status {
        external_id: ExternalId,
        message: String,
    },

    /// The job could not be killed.
    #[error("failed to kill job {external_id}: {message}")]
    Kill {
        external_id: ExternalId,
        message: String,
    },

    /// The backend has no job with this id.
    #[error("unknown job: {0}")]
    UnknownJob(ExternalId),

    /// The job table lock was poisoned.
    #[error("external service lock poisoned")]
    LockPoisoned,
}

/// Status of a job as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalStatus {
    Running,
    Success,
    Failure,
}

impl ExternalStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ExternalStatus::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExternalStatus::Success)
    }
}

/// A backend that runs slot jobs.
///
/// Submission and start are separate calls. A job that was submitted but
/// never started is not running.
#[async_trait]
pub trait ExternalService: Send + Sync {
    /// Register a job for the slot and return its handle.
    async fn submit(&self, slot_id: &SlotId) -> Result<ExternalId, ExternalServiceError>;

    /// Start a previously submitted job.
    async fn start(
        &self,
        slot_id: &SlotId,
        external_id: &ExternalId,
    ) -> Result<(), ExternalServiceError>;

    /// Poll a job's status.
    async fn status(
        &self,
        slot_id: &SlotId,
        external_id: &ExternalId,
    ) -> Result<ExternalStatus, ExternalServiceError>;

    /// Stop a job.
    async fn kill(
        &self,
        slot_id: &SlotId,
        external_id: &ExternalId,
    ) -> Result<(), ExternalServiceError>;
}
