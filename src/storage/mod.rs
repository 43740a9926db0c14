//! Storage abstraction for persisted slot state.
//!
//! The scheduler owns no state of its own. Every slot transition is written
//! through a [`StateDatabase`], and every step re-reads what it needs, so the
//! database is the single source of truth. Backends must offer
//! read-your-writes: a read issued after a write returns that write.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStateDatabase;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStateDatabase;

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::core::slot::SlotState;
use crate::core::time::ScheduledTime;
use crate::core::types::{SlotId, WorkflowId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Read/write contract for slot state.
#[async_trait]
pub trait StateDatabase: Send + Sync {
    /// Get the persisted state of one slot.
    async fn get_slot_state(&self, slot_id: &SlotId) -> Result<Option<SlotState>, StorageError>;

    /// Insert or replace the state of a slot.
    async fn put_slot_state(&self, state: SlotState) -> Result<(), StorageError>;

    /// Persisted states of a workflow with scheduled times in `[from, to)`.
    async fn get_slot_states(
        &self,
        workflow_id: &WorkflowId,
        from: ScheduledTime,
        to: ScheduledTime,
    ) -> Result<BTreeMap<SlotId, SlotState>, StorageError>;

    /// Scheduled times of a workflow that were marked for rerun at or
    /// before `now`.
    async fn get_times_marked_for_rerun(
        &self,
        workflow_id: &WorkflowId,
        now: ScheduledTime,
    ) -> Result<BTreeSet<ScheduledTime>, StorageError>;

    /// Mark a slot for rerun.
    ///
    /// Records the mark, made at `now`, and replaces the slot's state with a
    /// fresh WAITING state, whatever its previous status.
    async fn mark_slot_for_rerun(
        &self,
        slot_id: &SlotId,
        now: ScheduledTime,
    ) -> Result<(), StorageError>;

    /// Drop a slot's rerun mark if it was made at or before `now`.
    ///
    /// A mark made later than `now` belongs to a newer rerun request and is
    /// kept. Clearing a slot without a mark is not an error.
    async fn clear_rerun_mark(
        &self,
        slot_id: &SlotId,
        now: ScheduledTime,
    ) -> Result<(), StorageError>;

    /// Ids of all workflows with at least one persisted slot.
    async fn list_workflow_ids(&self) -> Result<Vec<WorkflowId>, StorageError>;
}
