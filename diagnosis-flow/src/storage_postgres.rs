use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use tracing::info;

use crate::{
    error::{DiagnosisError, Result},
    storage::SessionStorage,
    workflow::WorkflowSession,
};

/// Postgres-backed session storage; each session is one JSONB row.
pub struct PostgresSessionStorage {
    pool: PgPool,
}

impl PostgresSessionStorage {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| DiagnosisError::Storage(format!("Failed to connect to Postgres: {e}")))?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS diagnosis_sessions (
                id TEXT PRIMARY KEY,
                step TEXT NOT NULL,
                state JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DiagnosisError::Storage(format!("Migration failed: {e}")))?;

        info!("diagnosis_sessions table ready");
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for PostgresSessionStorage {
    async fn save(&self, session: WorkflowSession) -> Result<()> {
        let state = serde_json::to_value(&session)
            .map_err(|e| DiagnosisError::Storage(format!("Failed to serialize session: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO diagnosis_sessions (id, step, state, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (id) DO UPDATE
            SET step = EXCLUDED.step, state = EXCLUDED.state, updated_at = NOW()
            "#,
        )
        .bind(&session.id)
        .bind(session.step().to_string())
        .bind(state)
        .execute(&self.pool)
        .await
        .map_err(|e| DiagnosisError::Storage(format!("Failed to save session: {e}")))?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<WorkflowSession>> {
        let row = sqlx::query("SELECT state FROM diagnosis_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DiagnosisError::Storage(format!("Failed to load session: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state: serde_json::Value = row
            .try_get("state")
            .map_err(|e| DiagnosisError::Storage(format!("Failed to read session row: {e}")))?;
        let session = serde_json::from_value(state)
            .map_err(|e| DiagnosisError::Storage(format!("Failed to deserialize session: {e}")))?;
        Ok(Some(session))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM diagnosis_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| DiagnosisError::Storage(format!("Failed to delete session: {e}")))?;
        Ok(())
    }
}
