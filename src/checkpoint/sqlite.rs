//! SQLite-backed durable checkpointer. Stores the latest record per flow;
//! schema is a single table, created on connect if absent.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use crate::compensation::CompensationStack;
use crate::cursor::Cursor;
use crate::ids::FlowId;

use super::{Checkpointer, CheckpointRecord, Result, StoreError};

/// Durable, file- or memory-backed checkpoint store.
pub struct SqliteCheckpointer {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCheckpointer").finish()
    }
}

impl SqliteCheckpointer {
    /// Connects (creating the database if absent) and ensures the schema
    /// exists. Example url: `sqlite://flowloom.db`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await.map_err(|e| StoreError::Backend {
            message: format!("connect error: {e}"),
        })?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                flow_id TEXT PRIMARY KEY,
                cursor_json TEXT NOT NULL,
                compensation_json TEXT NOT NULL,
                state_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("schema create: {e}"),
        })?;
        Ok(Self { pool: Arc::new(pool) })
    }

    fn decode_row(row: &SqliteRow) -> Result<CheckpointRecord> {
        let flow_id: String = row.try_get("flow_id").map_err(|e| StoreError::Backend {
            message: format!("column flow_id: {e}"),
        })?;
        let cursor_json: String = row.try_get("cursor_json").map_err(|e| StoreError::Backend {
            message: format!("column cursor_json: {e}"),
        })?;
        let compensation_json: String = row.try_get("compensation_json").map_err(|e| StoreError::Backend {
            message: format!("column compensation_json: {e}"),
        })?;
        let state_json: String = row.try_get("state_json").map_err(|e| StoreError::Backend {
            message: format!("column state_json: {e}"),
        })?;
        let created_at: String = row.try_get("created_at").map_err(|e| StoreError::Backend {
            message: format!("column created_at: {e}"),
        })?;

        let cursor: Cursor = serde_json::from_str(&cursor_json).map_err(|e| StoreError::Backend {
            message: format!("decode cursor: {e}"),
        })?;
        let compensation: CompensationStack =
            serde_json::from_str(&compensation_json).map_err(|e| StoreError::Backend {
                message: format!("decode compensation: {e}"),
            })?;
        let state = serde_json::from_str(&state_json).map_err(|e| StoreError::Backend {
            message: format!("decode state: {e}"),
        })?;
        let created_at: DateTime<Utc> = created_at.parse().map_err(|e| StoreError::Backend {
            message: format!("decode created_at: {e}"),
        })?;

        Ok(CheckpointRecord {
            flow_id: FlowId::new(flow_id),
            cursor,
            compensation,
            state,
            created_at,
        })
    }
}

#[async_trait]
impl Checkpointer for SqliteCheckpointer {
    #[instrument(skip(self, record), err)]
    async fn save(&self, record: CheckpointRecord) -> Result<()> {
        let cursor_json = serde_json::to_string(&record.cursor).map_err(|e| StoreError::Backend {
            message: format!("encode cursor: {e}"),
        })?;
        let compensation_json = serde_json::to_string(&record.compensation).map_err(|e| StoreError::Backend {
            message: format!("encode compensation: {e}"),
        })?;
        let state_json = serde_json::to_string(&record.state).map_err(|e| StoreError::Backend {
            message: format!("encode state: {e}"),
        })?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints
                (flow_id, cursor_json, compensation_json, state_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        )
        .bind(record.flow_id.as_str())
        .bind(cursor_json)
        .bind(compensation_json)
        .bind(state_json)
        .bind(record.created_at.to_rfc3339())
        .execute(&*self.pool)
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("insert checkpoint: {e}"),
        })?;

        Ok(())
    }

    #[instrument(skip(self, flow_id), err)]
    async fn load(&self, flow_id: &FlowId) -> Result<Option<CheckpointRecord>> {
        let row: Option<SqliteRow> = sqlx::query("SELECT * FROM checkpoints WHERE flow_id = ?1")
            .bind(flow_id.as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("select checkpoint: {e}"),
            })?;
        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn delete(&self, flow_id: &FlowId) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE flow_id = ?1")
            .bind(flow_id.as_str())
            .execute(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("delete checkpoint: {e}"),
            })?;
        Ok(())
    }

    async fn list_flows(&self) -> Result<Vec<FlowId>> {
        let rows = sqlx::query("SELECT flow_id FROM checkpoints")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("list checkpoints: {e}"),
            })?;
        rows.into_iter()
            .map(|row| {
                row.try_get::<String, _>("flow_id")
                    .map(FlowId::new)
                    .map_err(|e| StoreError::Backend {
                        message: format!("column flow_id: {e}"),
                    })
            })
            .collect()
    }
}
