//! SQLite state database.
//!
//! Provides persistent slot state using a SQLite database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

use super::{StateDatabase, StorageError};
use crate::core::slot::{SlotState, SlotStatus};
use crate::core::time::ScheduledTime;
use crate::core::types::{ExternalId, SlotId, WorkflowId};

type SlotRow = (String, i64, String, Option<String>, i64);

/// SQLite state database.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStateDatabase {
    pool: SqlitePool,
}

impl SqliteStateDatabase {
    /// Open the database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_seconds(time: ScheduledTime) -> i64 {
    time.as_datetime().timestamp()
}

fn from_seconds(secs: i64) -> Result<ScheduledTime, StorageError> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(ScheduledTime::new)
        .ok_or_else(|| StorageError::SerializationError(format!("timestamp out of range: {}", secs)))
}

fn row_to_state(row: SlotRow) -> Result<SlotState, StorageError> {
    let (workflow_id, scheduled_time, status, external_id, retry_count) = row;
    let status = SlotStatus::from_str(&status)
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;
    let retry_count = u32::try_from(retry_count)
        .map_err(|_| StorageError::SerializationError(format!("invalid retry count: {}", retry_count)))?;
    Ok(SlotState::from_parts(
        SlotId::new(workflow_id, from_seconds(scheduled_time)?),
        status,
        external_id.map(ExternalId::new),
        retry_count,
    ))
}

#[async_trait]
impl StateDatabase for SqliteStateDatabase {
    async fn get_slot_state(&self, slot_id: &SlotId) -> Result<Option<SlotState>, StorageError> {
        let row: Option<SlotRow> = sqlx::query_as(
            "SELECT workflow_id, scheduled_time, status, external_id, retry_count FROM slot_states WHERE workflow_id = ? AND scheduled_time = ?",
        )
        .bind(slot_id.workflow_id().as_str())
        .bind(to_seconds(slot_id.scheduled_time()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        row.map(row_to_state).transpose()
    }

    async fn put_slot_state(&self, state: SlotState) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO slot_states (workflow_id, scheduled_time, status, external_id, retry_count, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (workflow_id, scheduled_time) DO UPDATE SET
                status = excluded.status,
                external_id = excluded.external_id,
                retry_count = excluded.retry_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.workflow_id().as_str())
        .bind(to_seconds(state.scheduled_time()))
        .bind(state.status().as_str())
        .bind(state.external_id().map(|id| id.as_str().to_string()))
        .bind(i64::from(state.retry_count()))
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    async fn get_slot_states(
        &self,
        workflow_id: &WorkflowId,
        from: ScheduledTime,
        to: ScheduledTime,
    ) -> Result<BTreeMap<SlotId, SlotState>, StorageError> {
        let rows: Vec<SlotRow> = sqlx::query_as(
            "SELECT workflow_id, scheduled_time, status, external_id, retry_count FROM slot_states WHERE workflow_id = ? AND scheduled_time >= ? AND scheduled_time < ? ORDER BY scheduled_time",
        )
        .bind(workflow_id.as_str())
        .bind(to_seconds(from))
        .bind(to_seconds(to))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let state = row_to_state(row)?;
                Ok((state.slot_id().clone(), state))
            })
            .collect()
    }

    async fn get_times_marked_for_rerun(
        &self,
        workflow_id: &WorkflowId,
        now: ScheduledTime,
    ) -> Result<BTreeSet<ScheduledTime>, StorageError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT scheduled_time FROM rerun_marks WHERE workflow_id = ? AND marked_at <= ?",
        )
        .bind(workflow_id.as_str())
        .bind(to_seconds(now))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(|(secs,)| from_seconds(secs)).collect()
    }

    async fn mark_slot_for_rerun(
        &self,
        slot_id: &SlotId,
        now: ScheduledTime,
    ) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO rerun_marks (workflow_id, scheduled_time, marked_at)
            VALUES (?, ?, ?)
            ON CONFLICT (workflow_id, scheduled_time) DO UPDATE SET marked_at = excluded.marked_at
            "#,
        )
        .bind(slot_id.workflow_id().as_str())
        .bind(to_seconds(slot_id.scheduled_time()))
        .bind(to_seconds(now))
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO slot_states (workflow_id, scheduled_time, status, external_id, retry_count, updated_at)
            VALUES (?, ?, ?, NULL, 0, ?)
            ON CONFLICT (workflow_id, scheduled_time) DO UPDATE SET
                status = excluded.status,
                external_id = NULL,
                retry_count = 0,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(slot_id.workflow_id().as_str())
        .bind(to_seconds(slot_id.scheduled_time()))
        .bind(SlotStatus::Waiting.as_str())
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Other(e.to_string()))
    }

    async fn clear_rerun_mark(
        &self,
        slot_id: &SlotId,
        now: ScheduledTime,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "DELETE FROM rerun_marks WHERE workflow_id = ? AND scheduled_time = ? AND marked_at <= ?",
        )
        .bind(slot_id.workflow_id().as_str())
        .bind(to_seconds(slot_id.scheduled_time()))
        .bind(to_seconds(now))
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(())
    }

    async fn list_workflow_ids(&self) -> Result<Vec<WorkflowId>, StorageError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT workflow_id FROM slot_states ORDER BY workflow_id")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StorageError::Other(e.to_string()))?;
        Ok(rows.into_iter().map(|(id,)| WorkflowId::new(id)).collect())
    }
}
