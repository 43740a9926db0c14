//! Scheduler engine for slot reconciliation.
//!
//! This module provides the step algorithm that moves slots through their
//! lifecycle and the loop that runs steps periodically or on request.

mod engine;
mod handle;
mod types;

pub use engine::Scheduler;
pub use handle::SchedulerHandle;
pub use types::{
    SchedulerConfig, SchedulerError, SchedulerState, StepReport, WorkflowFailure,
};
