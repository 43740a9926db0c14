//! Core identifier types for the scheduler.
//!
//! These types provide type-safe identifiers for workflows, slots and the
//! jobs an external service runs on a slot's behalf.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::time::ScheduledTime;

/// Unique identifier for a workflow.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkflowId(String);

/// Identifier of one workflow occurrence: the workflow plus its scheduled instant.
///
/// Ordering is by scheduled time first, so sorted collections of slots of one
/// workflow iterate chronologically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId {
    workflow_id: WorkflowId,
    scheduled_time: ScheduledTime,
}

/// Opaque handle an external service assigns to a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId(String);

impl WorkflowId {
    /// Create a new WorkflowId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl SlotId {
    /// Create a slot identifier.
    pub fn new(workflow_id: impl Into<WorkflowId>, scheduled_time: ScheduledTime) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            scheduled_time,
        }
    }

    /// The owning workflow.
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    /// The scheduled instant.
    pub fn scheduled_time(&self) -> ScheduledTime {
        self.scheduled_time
    }
}

impl Ord for SlotId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.scheduled_time
            .cmp(&other.scheduled_time)
            .then_with(|| self.workflow_id.cmp(&other.workflow_id))
    }
}

impl PartialOrd for SlotId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl ExternalId {
    /// Wrap an identifier returned by an external backend.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExternalId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ExternalId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.workflow_id, self.scheduled_time)
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
