//! Trigger trees.
//!
//! A trigger decides whether the input data for a slot is available. Triggers
//! compose into a tree (`and`, `or`, `not`, `offset`) over leaf checks, and
//! evaluation walks the tree once, producing a [`TriggerStatus`] tree that
//! mirrors it.
//!
//! Evaluation only reads: it consults the wall clock, the data stores and the
//! state database, but never writes. Re-evaluating a WAITING slot every step is
//! therefore safe.

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;

use super::store::{DataStoreError, DataStores};
use super::time::{ScheduledTime, TimeOutOfRange};
use super::types::{SlotId, WorkflowId};
use crate::core::slot::SlotStatus;
use crate::storage::{StateDatabase, StorageError};

/// Errors raised while evaluating a trigger.
///
/// A store that cannot be queried is an error, never a "not ready".
#[derive(Debug, Error)]
pub enum TriggerError {
    /// A data store could not be opened or queried.
    #[error("data store error: {0}")]
    DataStore(#[from] DataStoreError),

    /// The state database could not be read.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An offset or delay moved the slot time out of range.
    #[error("time error: {0}")]
    Time(#[from] TimeOutOfRange),
}

/// Collaborators a trigger may consult during evaluation.
pub struct TriggerContext<'a> {
    /// Slot state, for triggers that depend on other workflows.
    pub connection: &'a dyn StateDatabase,
    /// Store handles, for data-existence checks.
    pub stores: &'a DataStores,
}

impl<'a> TriggerContext<'a> {
    /// Bundle a state database and a store cache.
    pub fn new(connection: &'a dyn StateDatabase, stores: &'a DataStores) -> Self {
        Self { connection, stores }
    }
}

/// Result of evaluating one trigger node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerStatus {
    /// Node kind, e.g. `"or"` or `"data_exists"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Whether this node is satisfied.
    pub ready: bool,
    /// Human-readable explanation.
    pub description: String,
    /// Statuses of nested triggers, in declaration order.
    pub sub_statuses: Vec<TriggerStatus>,
}

impl TriggerStatus {
    fn leaf(kind: &'static str, ready: bool, description: impl Into<String>) -> Self {
        Self {
            kind,
            ready,
            description: description.into(),
            sub_statuses: Vec::new(),
        }
    }
}

/// A data-availability predicate over a slot's scheduled time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Always ready.
    Always,
    /// Never ready.
    Never,
    /// Ready when every child is ready. An empty list is ready.
    And(Vec<Trigger>),
    /// Ready when any child is ready. An empty list is never ready.
    Or(Vec<Trigger>),
    /// Ready when the child is not.
    Not(Box<Trigger>),
    /// Evaluates the child at `scheduled_time + seconds`.
    Offset { seconds: i64, inner: Box<Trigger> },
    /// Ready once the wall clock reaches `scheduled_time + seconds`.
    Delay { seconds: i64 },
    /// Ready once the named workflow's slot at the same time has succeeded.
    Success { workflow: WorkflowId },
    /// Ready once `path`, with time tokens substituted, exists in `store`.
    DataExists { path: String, store: String },
}

impl Trigger {
    /// Conjunction of triggers.
    pub fn and(children: impl IntoIterator<Item = Trigger>) -> Self {
        Trigger::And(children.into_iter().collect())
    }

    /// Disjunction of triggers.
    pub fn or(children: impl IntoIterator<Item = Trigger>) -> Self {
        Trigger::Or(children.into_iter().collect())
    }

    /// Negation of a trigger.
    pub fn not(inner: Trigger) -> Self {
        Trigger::Not(Box::new(inner))
    }

    /// Shift a trigger in time.
    pub fn offset(seconds: i64, inner: Trigger) -> Self {
        Trigger::Offset {
            seconds,
            inner: Box::new(inner),
        }
    }

    /// Wait for a delay after the scheduled time.
    pub fn delay(seconds: i64) -> Self {
        Trigger::Delay { seconds }
    }

    /// Depend on another workflow's slot.
    pub fn success(workflow: impl Into<WorkflowId>) -> Self {
        Trigger::Success {
            workflow: workflow.into(),
        }
    }

    /// Check for a path in an external store.
    pub fn data_exists(path: impl Into<String>, store: impl Into<String>) -> Self {
        Trigger::DataExists {
            path: path.into(),
            store: store.into(),
        }
    }

    /// Evaluate this trigger for the slot at `scheduled_time`.
    pub fn status<'a>(
        &'a self,
        ctx: &'a TriggerContext<'a>,
        now: ScheduledTime,
        scheduled_time: ScheduledTime,
    ) -> BoxFuture<'a, Result<TriggerStatus, TriggerError>> {
        Box::pin(async move {
            match self {
                Trigger::Always => Ok(TriggerStatus::leaf("always", true, "Always ready")),
                Trigger::Never => Ok(TriggerStatus::leaf("never", false, "Never ready")),
                Trigger::And(children) => {
                    let sub_statuses = Self::evaluate_all(children, ctx, now, scheduled_time).await?;
                    let ready_count = sub_statuses.iter().filter(|s| s.ready).count();
                    let ready = ready_count == sub_statuses.len();
                    let description = if ready {
                        "All nested triggers are ready"
                    } else if ready_count > 0 {
                        "Not all nested triggers are ready"
                    } else {
                        "None of the nested triggers are ready"
                    };
                    Ok(TriggerStatus {
                        kind: "and",
                        ready,
                        description: description.to_string(),
                        sub_statuses,
                    })
                }
                Trigger::Or(children) => {
                    let sub_statuses = Self::evaluate_all(children, ctx, now, scheduled_time).await?;
                    let ready = sub_statuses.iter().any(|s| s.ready);
                    let description = if ready {
                        "One or more nested triggers are ready"
                    } else {
                        "None of the nested triggers are ready"
                    };
                    Ok(TriggerStatus {
                        kind: "or",
                        ready,
                        description: description.to_string(),
                        sub_statuses,
                    })
                }
                Trigger::Not(inner) => {
                    let inner_status = inner.status(ctx, now, scheduled_time).await?;
                    let ready = !inner_status.ready;
                    let description = if ready {
                        "Nested trigger is not ready"
                    } else {
                        "Nested trigger is ready"
                    };
                    Ok(TriggerStatus {
                        kind: "not",
                        ready,
                        description: description.to_string(),
                        sub_statuses: vec![inner_status],
                    })
                }
                Trigger::Offset { seconds, inner } => {
                    let shifted = scheduled_time.plus_seconds(*seconds)?;
                    let inner_status = inner.status(ctx, now, shifted).await?;
                    let ready = inner_status.ready;
                    Ok(TriggerStatus {
                        kind: "offset",
                        ready,
                        description: format!(
                            "Nested trigger offset by {} seconds {}",
                            seconds,
                            ready_word(ready)
                        ),
                        sub_statuses: vec![inner_status],
                    })
                }
                Trigger::Delay { seconds } => {
                    let until = scheduled_time.plus_seconds(*seconds)?;
                    let ready = now >= until;
                    let description = if ready {
                        format!("Ready since {}", until)
                    } else {
                        format!("Delayed until {}", until)
                    };
                    Ok(TriggerStatus::leaf("delay", ready, description))
                }
                Trigger::Success { workflow } => {
                    let slot_id = SlotId::new(workflow.clone(), scheduled_time);
                    let state = ctx.connection.get_slot_state(&slot_id).await?;
                    let ready = state.is_some_and(|s| s.status() == SlotStatus::Success);
                    let description = if ready {
                        format!("Slot {} succeeded", slot_id)
                    } else {
                        format!("Slot {} has not succeeded", slot_id)
                    };
                    Ok(TriggerStatus::leaf("success", ready, description))
                }
                Trigger::DataExists { path, store } => {
                    let resolved = scheduled_time.substitute(path);
                    let handle = ctx.stores.get(store).await?;
                    let ready = handle.exists(&resolved).await?;
                    Ok(TriggerStatus::leaf(
                        "data_exists",
                        ready,
                        format!("Path {} in {} is {}", resolved, store, ready_word(ready)),
                    ))
                }
            }
        })
    }

    /// Shorthand for `status(..).ready`.
    pub async fn is_ready(
        &self,
        ctx: &TriggerContext<'_>,
        now: ScheduledTime,
        scheduled_time: ScheduledTime,
    ) -> Result<bool, TriggerError> {
        Ok(self.status(ctx, now, scheduled_time).await?.ready)
    }

    async fn evaluate_all(
        children: &[Trigger],
        ctx: &TriggerContext<'_>,
        now: ScheduledTime,
        scheduled_time: ScheduledTime,
    ) -> Result<Vec<TriggerStatus>, TriggerError> {
        let mut statuses = Vec::with_capacity(children.len());
        for child in children {
            statuses.push(child.status(ctx, now, scheduled_time).await?);
        }
        Ok(statuses)
    }
}

fn ready_word(ready: bool) -> &'static str {
    if ready { "ready" } else { "not ready" }
}
