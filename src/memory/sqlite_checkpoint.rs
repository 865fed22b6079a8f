//! SQLite 检查点存储
//!
//! 使用 sqlx 异步连接池，一张表保存每个会话的最新快照；upsert 时仅在新版本更大时覆盖。

#![cfg(feature = "async-sqlite")]

use std::path::Path;

use async_trait::async_trait;
use sqlx::Row;

use crate::core::WorkflowState;
use crate::memory::checkpoint::{validate_session_id, CheckpointError, CheckpointStore};

impl From<sqlx::Error> for CheckpointError {
    fn from(e: sqlx::Error) -> Self {
        CheckpointError::Database(e.to_string())
    }
}

/// SQLite 检查点存储
pub struct SqliteCheckpointStore {
    pool: sqlx::sqlite::SqlitePool,
}

impl SqliteCheckpointStore {
    /// 打开（或创建）数据库文件并初始化表
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), CheckpointError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS workflow_checkpoints (
                session_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                phase TEXT NOT NULL,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, session_id: &str, state: &WorkflowState) -> Result<(), CheckpointError> {
        validate_session_id(session_id)?;
        let data = serde_json::to_string(state)?;
        let version = state.version as i64;

        let result = sqlx::query(
            "INSERT INTO workflow_checkpoints (session_id, version, phase, state, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                version = excluded.version,
                phase = excluded.phase,
                state = excluded.state,
                updated_at = excluded.updated_at
             WHERE excluded.version > workflow_checkpoints.version",
        )
        .bind(session_id)
        .bind(version)
        .bind(state.phase.to_string())
        .bind(&data)
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let row = sqlx::query("SELECT version FROM workflow_checkpoints WHERE session_id = ?")
                .bind(session_id)
                .fetch_one(&self.pool)
                .await?;
            let stored: i64 = row.get("version");
            return Err(CheckpointError::StaleVersion {
                session_id: session_id.to_string(),
                attempted: state.version,
                stored: stored as u64,
            });
        }
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<WorkflowState>, CheckpointError> {
        validate_session_id(session_id)?;
        let row = sqlx::query("SELECT state FROM workflow_checkpoints WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let data: String = row.get("state");
        let state = serde_json::from_str(&data).map_err(|e| CheckpointError::Corrupt {
            session_id: session_id.to_string(),
            detail: e.to_string(),
        })?;
        Ok(Some(state))
    }

    async fn list_sessions(&self) -> Result<Vec<String>, CheckpointError> {
        let rows = sqlx::query("SELECT session_id FROM workflow_checkpoints ORDER BY session_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("session_id")).collect())
    }
}
