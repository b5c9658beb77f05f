//! SQLite-backed state storage

use super::StateBackend;
use crate::db::Database;
use crate::error::{FoundryError, Result};
use crate::models::{AgentInvocation, PipelineRun, ProjectState, RunId};
use async_trait::async_trait;
use sqlx::Row;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct SqliteBackend {
    db: Database,
}

impl SqliteBackend {
    /// Wrap an already migrated database
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Database::initialize(path).await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> FoundryError {
    move |e| FoundryError::Database(format!("{}: {}", context, e))
}

#[async_trait]
impl StateBackend for SqliteBackend {
    async fn append_version(&self, state: &ProjectState, expected_latest: Option<u64>) -> Result<()> {
        let encoded = serde_json::to_string(state)?;
        let expected = expected_latest.map(|v| v as i64);

        // Insert only if the stored head still matches what the caller read
        let result = sqlx::query(
            "INSERT INTO project_versions (project_id, version, state, committed_at)
             SELECT ?, ?, ?, ?
             WHERE (SELECT MAX(version) FROM project_versions WHERE project_id = ?) IS ?",
        )
        .bind(&state.project_id)
        .bind(state.version as i64)
        .bind(&encoded)
        .bind(state.committed_at.to_rfc3339())
        .bind(&state.project_id)
        .bind(expected)
        .execute(self.db.pool())
        .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => {
                debug!(project_id = %state.project_id, version = state.version, "Stored version");
                Ok(())
            }
            Ok(_) => Err(FoundryError::conflict(
                &state.project_id,
                format!("latest version is no longer {:?}", expected_latest),
            )),
            Err(e)
                if e
                    .as_database_error()
                    .map(|d| d.is_unique_violation())
                    .unwrap_or(false) =>
            {
                Err(FoundryError::conflict(
                    &state.project_id,
                    format!("version {} already exists", state.version),
                ))
            }
            Err(e) => Err(db_err("Failed to store version")(e)),
        }
    }

    async fn latest(&self, project_id: &str) -> Result<Option<ProjectState>> {
        let row = sqlx::query(
            "SELECT state FROM project_versions WHERE project_id = ?
             ORDER BY version DESC LIMIT 1",
        )
        .bind(project_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(db_err("Failed to load latest version"))?;

        row.map(|r| decode(r.get::<&str, _>("state"))).transpose()
    }

    async fn get_version(&self, project_id: &str, version: u64) -> Result<Option<ProjectState>> {
        let row = sqlx::query("SELECT state FROM project_versions WHERE project_id = ? AND version = ?")
            .bind(project_id)
            .bind(version as i64)
            .fetch_optional(self.db.pool())
            .await
            .map_err(db_err("Failed to load version"))?;

        row.map(|r| decode(r.get::<&str, _>("state"))).transpose()
    }

    async fn versions(&self, project_id: &str, from: u64, limit: usize) -> Result<Vec<ProjectState>> {
        let rows = sqlx::query(
            "SELECT state FROM project_versions WHERE project_id = ? AND version >= ?
             ORDER BY version ASC LIMIT ?",
        )
        .bind(project_id)
        .bind(from as i64)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err("Failed to list versions"))?;

        rows.iter().map(|r| decode(r.get::<&str, _>("state"))).collect()
    }

    async fn append_invocation(&self, invocation: &AgentInvocation) -> Result<()> {
        sqlx::query(
            "INSERT INTO invocations (id, run_id, stage, attempt, model, record, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(invocation.id.to_string())
        .bind(invocation.run_id.to_string())
        .bind(invocation.stage.as_str())
        .bind(invocation.attempt as i64)
        .bind(invocation.model.to_string())
        .bind(serde_json::to_string(invocation)?)
        .bind(invocation.finished_at.to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(db_err("Failed to record invocation"))?;
        Ok(())
    }

    async fn invocations(&self, run_id: RunId) -> Result<Vec<AgentInvocation>> {
        let rows = sqlx::query("SELECT record FROM invocations WHERE run_id = ? ORDER BY seq ASC")
            .bind(run_id.to_string())
            .fetch_all(self.db.pool())
            .await
            .map_err(db_err("Failed to list invocations"))?;

        rows.iter().map(|r| decode(r.get::<&str, _>("record"))).collect()
    }

    async fn save_run(&self, run: &PipelineRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (id, project_id, status, record, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                record = excluded.record,
                updated_at = excluded.updated_at",
        )
        .bind(run.id.to_string())
        .bind(&run.project_id)
        .bind(run.status.as_str())
        .bind(serde_json::to_string(run)?)
        .bind(run.updated_at.to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(db_err("Failed to save run"))?;
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<PipelineRun>> {
        let row = sqlx::query("SELECT record FROM runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(self.db.pool())
            .await
            .map_err(db_err("Failed to load run"))?;

        row.map(|r| decode(r.get::<&str, _>("record"))).transpose()
    }
}
