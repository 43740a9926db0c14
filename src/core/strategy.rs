//! Scheduling strategies (admission control).
//!
//! A strategy picks which READY slots of one workflow may be started in the
//! current step. It is handed every slot state the step considered, in
//! ascending time order, so it can account for slots that are already running.

use std::fmt;

use super::slot::{SlotState, SlotStatus};

/// Selects the slots to start from the workflow's current slot states.
pub trait SchedulingStrategy: Send + Sync + fmt::Debug {
    /// Return the READY slots that should be started now, in start order.
    fn scheduling_candidates(&self, slots: &[SlotState]) -> Vec<SlotState>;
}

/// Starts every READY slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrivialStrategy;

impl SchedulingStrategy for TrivialStrategy {
    fn scheduling_candidates(&self, slots: &[SlotState]) -> Vec<SlotState> {
        slots
            .iter()
            .filter(|s| s.status() == SlotStatus::Ready)
            .cloned()
            .collect()
    }
}

/// Keeps at most `max_concurrent` slots of a workflow running, oldest first.
#[derive(Debug, Clone, Copy)]
pub struct SerialStrategy {
    max_concurrent: usize,
}

impl SerialStrategy {
    /// Create a serial strategy. Returns `None` for a limit of zero, which
    /// would never admit anything.
    pub fn new(max_concurrent: usize) -> Option<Self> {
        (max_concurrent > 0).then_some(Self { max_concurrent })
    }

    /// The concurrency limit.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl SchedulingStrategy for SerialStrategy {
    fn scheduling_candidates(&self, slots: &[SlotState]) -> Vec<SlotState> {
        let running = slots
            .iter()
            .filter(|s| s.status() == SlotStatus::Running)
            .count();
        let free = self.max_concurrent.saturating_sub(running);

        let mut ready: Vec<&SlotState> = slots
            .iter()
            .filter(|s| s.status() == SlotStatus::Ready)
            .collect();
        ready.sort_by_key(|s| s.scheduled_time());

        ready.into_iter().take(free).cloned().collect()
    }
}
