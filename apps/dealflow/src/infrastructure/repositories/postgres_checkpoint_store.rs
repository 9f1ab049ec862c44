use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::repositories::CheckpointStore;
use crate::domain::run::SharedState;

/// PostgreSQL implementation of CheckpointStore
///
/// One row per run holding the latest snapshot as JSONB. The version and
/// status columns mirror the snapshot so stale writes can be refused and
/// active runs listed without decoding documents.
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

impl PostgresCheckpointStore {
    /// Creates a new PostgresCheckpointStore
    ///
    /// # Arguments
    /// * `pool` - SQLx connection pool for PostgreSQL
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the checkpoint table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), String> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_checkpoints (
                run_id UUID PRIMARY KEY,
                version BIGINT NOT NULL,
                status TEXT NOT NULL,
                state JSONB NOT NULL,
                archived BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create checkpoint table: {}", e))?;

        Ok(())
    }

    async fn upsert(&self, run_id: Uuid, state: &SharedState, archived: bool) -> Result<(), String> {
        if state.run_id() != run_id {
            return Err(format!(
                "Snapshot of run {} cannot be stored under {}",
                state.run_id(),
                run_id
            ));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO run_checkpoints (
                run_id, version, status, state, archived, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (run_id) DO UPDATE SET
                version = EXCLUDED.version,
                status = EXCLUDED.status,
                state = EXCLUDED.state,
                archived = EXCLUDED.archived,
                updated_at = EXCLUDED.updated_at
            WHERE run_checkpoints.archived = FALSE
              AND run_checkpoints.version <= EXCLUDED.version
            "#,
        )
        .bind(run_id)
        .bind(state.version() as i64)
        .bind(state.workflow_status().to_string())
        .bind(Json(state))
        .bind(archived)
        .bind(state.created_at())
        .bind(state.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to save checkpoint: {}", e))?;

        if result.rows_affected() == 0 {
            return Err(format!(
                "Checkpoint of run {} rejected: run is archived or version {} is stale",
                run_id,
                state.version()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn put(&self, run_id: Uuid, state: &SharedState) -> Result<(), String> {
        self.upsert(run_id, state, false).await
    }

    async fn get(&self, run_id: Uuid) -> Result<Option<SharedState>, String> {
        let row: Option<(Json<SharedState>,)> =
            sqlx::query_as("SELECT state FROM run_checkpoints WHERE run_id = $1")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| format!("Failed to load checkpoint: {}", e))?;

        Ok(row.map(|(Json(state),)| state))
    }

    async fn archive(&self, run_id: Uuid, state: &SharedState) -> Result<(), String> {
        self.upsert(run_id, state, true).await
    }

    async fn list_active(&self) -> Result<Vec<Uuid>, String> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT run_id
            FROM run_checkpoints
            WHERE archived = FALSE
            ORDER BY created_at ASC, run_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to list active runs: {}", e))?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
