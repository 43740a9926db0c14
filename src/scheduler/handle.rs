//! Scheduler handle for controlling a running scheduler.
//!
//! This module provides the `SchedulerHandle` type that allows external control
//! of the scheduler loop: explicit steps, rerun marking, pause, resume, and
//! shutdown. Every command is processed by the single loop task, so at most
//! one step is in flight at any time.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};

use crate::core::slot::SlotState;
use crate::core::time::ScheduledTime;
use crate::core::trigger::TriggerStatus;
use crate::core::types::{SlotId, WorkflowId};

use super::types::{SchedulerCommand, SchedulerError, SchedulerState, StepReport};

/// Buffer size for the command channel between SchedulerHandle and Scheduler.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle for controlling the scheduler.
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(crate) command_tx: mpsc::Sender<SchedulerCommand>,
    pub(crate) state: Arc<RwLock<SchedulerState>>,
}

impl SchedulerHandle {
    /// Helper to send a command that returns a result and wait for response.
    async fn send_result_command<T>(
        &self,
        build_command: impl FnOnce(oneshot::Sender<Result<T, SchedulerError>>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<T, SchedulerError>
    where
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                SchedulerError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError(format!("failed to receive {} response", operation))
        })?
    }

    /// Helper to send a command that returns unit and wait for response.
    async fn send_unit_command(
        &self,
        build_command: impl FnOnce(oneshot::Sender<()>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<(), SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                SchedulerError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError(format!("failed to receive {} response", operation))
        })?;

        Ok(())
    }

    /// Step at `now`, optionally restricted to some workflows.
    ///
    /// Explicit steps run even while the scheduler is paused.
    pub async fn step(
        &self,
        now: ScheduledTime,
        filter: Option<BTreeSet<WorkflowId>>,
    ) -> Result<StepReport, SchedulerError> {
        self.send_result_command(
            |response| SchedulerCommand::Step {
                now,
                filter,
                response,
            },
            "step",
        )
        .await
    }

    /// Step at the current wall-clock time.
    pub async fn step_now(
        &self,
        filter: Option<BTreeSet<WorkflowId>>,
    ) -> Result<StepReport, SchedulerError> {
        self.step(ScheduledTime::now(), filter).await
    }

    /// Mark a slot for rerun at the current wall-clock time.
    pub async fn mark_for_rerun(&self, slot_id: SlotId) -> Result<(), SchedulerError> {
        self.send_result_command(
            |response| SchedulerCommand::MarkForRerun { slot_id, response },
            "rerun",
        )
        .await
    }

    /// Evaluate the trigger of a slot at the current wall-clock time.
    pub async fn trigger_status(&self, slot_id: SlotId) -> Result<TriggerStatus, SchedulerError> {
        self.send_result_command(
            |response| SchedulerCommand::TriggerStatus { slot_id, response },
            "trigger status",
        )
        .await
    }

    /// Kill the external job of a RUNNING slot.
    pub async fn kill_slot(&self, slot_id: SlotId) -> Result<SlotState, SchedulerError> {
        self.send_result_command(|response| SchedulerCommand::Kill { slot_id, response }, "kill")
            .await
    }

    /// Pause the scheduler.
    ///
    /// While paused, periodic steps are skipped, but explicit steps still work.
    pub async fn pause(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(|response| SchedulerCommand::Pause { response }, "pause")
            .await
    }

    /// Resume the scheduler after being paused.
    pub async fn resume(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(|response| SchedulerCommand::Resume { response }, "resume")
            .await
    }

    /// Shutdown the scheduler.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(
            |response| SchedulerCommand::Shutdown { response },
            "shutdown",
        )
        .await
    }

    /// Get the current scheduler state.
    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    /// Check if the scheduler is running.
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == SchedulerState::Running
    }

    /// Check if the scheduler is paused.
    pub async fn is_paused(&self) -> bool {
        *self.state.read().await == SchedulerState::Paused
    }
}
