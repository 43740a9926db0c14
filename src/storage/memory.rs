//! In-memory state database.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use super::{StateDatabase, StorageError};
use crate::core::slot::SlotState;
use crate::core::time::ScheduledTime;
use crate::core::types::{SlotId, WorkflowId};

/// In-memory state database.
///
/// Slots are kept per workflow, ordered by scheduled time.
/// Data is not persisted across restarts.
pub struct InMemoryStateDatabase {
    slots: RwLock<HashMap<WorkflowId, BTreeMap<ScheduledTime, SlotState>>>,
    /// Scheduled time -> when it was marked.
    rerun_marks: RwLock<HashMap<WorkflowId, BTreeMap<ScheduledTime, ScheduledTime>>>,
}

impl InMemoryStateDatabase {
    /// Create a new empty database.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            rerun_marks: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of persisted slots across all workflows.
    pub fn slot_count(&self) -> Result<usize, StorageError> {
        let slots = self.slots.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(slots.values().map(BTreeMap::len).sum())
    }

    /// Number of outstanding rerun marks across all workflows.
    pub fn rerun_mark_count(&self) -> Result<usize, StorageError> {
        let marks = self
            .rerun_marks
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(marks.values().map(BTreeMap::len).sum())
    }
}

impl Default for InMemoryStateDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateDatabase for InMemoryStateDatabase {
    async fn get_slot_state(&self, slot_id: &SlotId) -> Result<Option<SlotState>, StorageError> {
        let slots = self.slots.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(slots
            .get(slot_id.workflow_id())
            .and_then(|states| states.get(&slot_id.scheduled_time()))
            .cloned())
    }

    async fn put_slot_state(&self, state: SlotState) -> Result<(), StorageError> {
        let mut slots = self.slots.write().map_err(|_| StorageError::LockPoisoned)?;
        slots
            .entry(state.workflow_id().clone())
            .or_default()
            .insert(state.scheduled_time(), state);
        Ok(())
    }

    async fn get_slot_states(
        &self,
        workflow_id: &WorkflowId,
        from: ScheduledTime,
        to: ScheduledTime,
    ) -> Result<BTreeMap<SlotId, SlotState>, StorageError> {
        if from >= to {
            return Ok(BTreeMap::new());
        }
        let slots = self.slots.read().map_err(|_| StorageError::LockPoisoned)?;
        let Some(states) = slots.get(workflow_id) else {
            return Ok(BTreeMap::new());
        };
        Ok(states
            .range(from..to)
            .map(|(_, state)| (state.slot_id().clone(), state.clone()))
            .collect())
    }

    async fn get_times_marked_for_rerun(
        &self,
        workflow_id: &WorkflowId,
        now: ScheduledTime,
    ) -> Result<BTreeSet<ScheduledTime>, StorageError> {
        let marks = self
            .rerun_marks
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(marks
            .get(workflow_id)
            .map(|times| {
                times
                    .iter()
                    .filter(|(_, marked_at)| **marked_at <= now)
                    .map(|(time, _)| *time)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mark_slot_for_rerun(
        &self,
        slot_id: &SlotId,
        now: ScheduledTime,
    ) -> Result<(), StorageError> {
        {
            let mut marks = self
                .rerun_marks
                .write()
                .map_err(|_| StorageError::LockPoisoned)?;
            marks
                .entry(slot_id.workflow_id().clone())
                .or_default()
                .insert(slot_id.scheduled_time(), now);
        }
        self.put_slot_state(SlotState::waiting(slot_id.clone()))
            .await
    }

    async fn clear_rerun_mark(
        &self,
        slot_id: &SlotId,
        now: ScheduledTime,
    ) -> Result<(), StorageError> {
        let mut marks = self
            .rerun_marks
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if let Some(times) = marks.get_mut(slot_id.workflow_id()) {
            if times
                .get(&slot_id.scheduled_time())
                .is_some_and(|marked_at| *marked_at <= now)
            {
                times.remove(&slot_id.scheduled_time());
            }
            if times.is_empty() {
                marks.remove(slot_id.workflow_id());
            }
        }
        Ok(())
    }

    async fn list_workflow_ids(&self) -> Result<Vec<WorkflowId>, StorageError> {
        let slots = self.slots.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut ids: Vec<_> = slots.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
