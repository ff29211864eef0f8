//! Enrichment run repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use lore_core::{
    new_v7, EnrichmentRun, EnrichmentRunRepository, EnrichmentTotals, Error, Result, RunStatus,
};

/// PostgreSQL implementation of EnrichmentRunRepository.
#[derive(Clone)]
pub struct PgEnrichmentRunRepository {
    pool: Pool<Postgres>,
}

const RUN_COLUMNS: &str = "id, import_run_id, team_id, status, totals, error_message, \
                           created_at, started_at, completed_at";

impl PgEnrichmentRunRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: PgRow) -> Result<EnrichmentRun> {
        let status: String = row.get("status");
        let totals: Option<JsonValue> = row.get("totals");
        Ok(EnrichmentRun {
            id: row.get("id"),
            import_run_id: row.get("import_run_id"),
            team_id: row.get("team_id"),
            status: status.parse()?,
            totals: totals.map(serde_json::from_value).transpose()?,
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }

    /// Zero rows updated means the run is missing or in the wrong state;
    /// tell the two apart for the caller.
    async fn transition_error(&self, id: Uuid, next: RunStatus) -> Error {
        match EnrichmentRunRepository::get(self, id).await {
            Ok(Some(run)) => Error::InvalidInput(format!(
                "enrichment run {} cannot move from {} to {}",
                id, run.status, next
            )),
            Ok(None) => Error::RunNotFound(id),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl EnrichmentRunRepository for PgEnrichmentRunRepository {
    async fn create(&self, import_run_id: Uuid, team_id: Uuid) -> Result<EnrichmentRun> {
        let row = sqlx::query(&format!(
            "INSERT INTO enrichment_run (id, import_run_id, team_id, status, created_at)
             VALUES ($1, $2, $3, 'pending', $4)
             RETURNING {}",
            RUN_COLUMNS
        ))
        .bind(new_v7())
        .bind(import_run_id)
        .bind(team_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Self::parse_row(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<EnrichmentRun>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM enrichment_run WHERE id = $1",
            RUN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_row).transpose()
    }

    async fn mark_running(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE enrichment_run SET status = 'running', started_at = $2
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, RunStatus::Running).await);
        }
        Ok(())
    }

    async fn complete(&self, id: Uuid, totals: &EnrichmentTotals) -> Result<()> {
        let result = sqlx::query(
            "UPDATE enrichment_run SET status = 'completed', totals = $2, completed_at = $3
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .bind(serde_json::to_value(totals)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, RunStatus::Completed).await);
        }
        Ok(())
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE enrichment_run SET status = 'failed', error_message = $2, completed_at = $3
             WHERE id = $1 AND status IN ('pending', 'running')",
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, RunStatus::Failed).await);
        }
        Ok(())
    }
}
