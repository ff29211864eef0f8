//! Classification and relationship review record repositories.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use lore_core::{
    clamp_confidence, new_v7, ClassificationRecord, ClassificationRepository,
    ClassificationResult, Error, EvidenceType, InferredType, RelationshipRecord,
    RelationshipRepository, RelationshipResult, RelationshipType, Result, ReviewStatus,
};

const CLASSIFICATION_COLUMNS: &str = "id, enrichment_run_id, note_id, inferred_type, confidence, \
     explanation, extracted_entity_names, status, reviewed_by, reviewed_at, created_at";

const RELATIONSHIP_COLUMNS: &str = "id, enrichment_run_id, from_note_id, to_note_id, \
     relationship_type, confidence, evidence_snippet, evidence_type, status, reviewed_by, \
     reviewed_at, created_at";

/// PostgreSQL implementation of ClassificationRepository.
#[derive(Clone)]
pub struct PgClassificationRepository {
    pool: Pool<Postgres>,
}

impl PgClassificationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: PgRow) -> Result<ClassificationRecord> {
        let inferred_type: String = row.get("inferred_type");
        let status: String = row.get("status");
        Ok(ClassificationRecord {
            id: row.get("id"),
            enrichment_run_id: row.get("enrichment_run_id"),
            note_id: row.get("note_id"),
            inferred_type: InferredType::from_label(&inferred_type),
            confidence: row.get("confidence"),
            explanation: row.get("explanation"),
            extracted_entity_names: row.get("extracted_entity_names"),
            status: status.parse()?,
            reviewed_by: row.get("reviewed_by"),
            reviewed_at: row.get("reviewed_at"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl ClassificationRepository for PgClassificationRepository {
    async fn create(
        &self,
        enrichment_run_id: Uuid,
        result: &ClassificationResult,
    ) -> Result<ClassificationRecord> {
        let row = sqlx::query(&format!(
            "INSERT INTO note_classification
                 (id, enrichment_run_id, note_id, inferred_type, confidence, explanation,
                  extracted_entity_names, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8)
             RETURNING {}",
            CLASSIFICATION_COLUMNS
        ))
        .bind(new_v7())
        .bind(enrichment_run_id)
        .bind(result.note_id)
        .bind(result.inferred_type.as_str())
        .bind(clamp_confidence(result.confidence))
        .bind(&result.explanation)
        .bind(&result.extracted_entity_names)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Self::parse_row(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ClassificationRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM note_classification WHERE id = $1",
            CLASSIFICATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_row).transpose()
    }

    async fn list_for_run(&self, enrichment_run_id: Uuid) -> Result<Vec<ClassificationRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM note_classification WHERE enrichment_run_id = $1
             ORDER BY created_at, id",
            CLASSIFICATION_COLUMNS
        ))
        .bind(enrichment_run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(Self::parse_row).collect()
    }

    async fn update_status(&self, id: Uuid, status: ReviewStatus, actor: &str) -> Result<bool> {
        if !ReviewStatus::Pending.can_transition_to(status) {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE note_classification SET status = $2, reviewed_by = $3, reviewed_at = $4
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(actor)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

/// PostgreSQL implementation of RelationshipRepository.
#[derive(Clone)]
pub struct PgRelationshipRepository {
    pool: Pool<Postgres>,
}

impl PgRelationshipRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: PgRow) -> Result<RelationshipRecord> {
        let relationship_type: String = row.get("relationship_type");
        let evidence_type: String = row.get("evidence_type");
        let status: String = row.get("status");
        Ok(RelationshipRecord {
            id: row.get("id"),
            enrichment_run_id: row.get("enrichment_run_id"),
            from_note_id: row.get("from_note_id"),
            to_note_id: row.get("to_note_id"),
            relationship_type: RelationshipType::from_label(&relationship_type),
            confidence: row.get("confidence"),
            evidence_snippet: row.get("evidence_snippet"),
            evidence_type: EvidenceType::from_label(&evidence_type),
            status: status.parse()?,
            reviewed_by: row.get("reviewed_by"),
            reviewed_at: row.get("reviewed_at"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl RelationshipRepository for PgRelationshipRepository {
    async fn create(
        &self,
        enrichment_run_id: Uuid,
        result: &RelationshipResult,
    ) -> Result<RelationshipRecord> {
        if result.from_note_id == result.to_note_id {
            return Err(Error::InvalidInput(format!(
                "relationship endpoints must differ (note {})",
                result.from_note_id
            )));
        }
        let row = sqlx::query(&format!(
            "INSERT INTO note_relationship
                 (id, enrichment_run_id, from_note_id, to_note_id, relationship_type, confidence,
                  evidence_snippet, evidence_type, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9)
             RETURNING {}",
            RELATIONSHIP_COLUMNS
        ))
        .bind(new_v7())
        .bind(enrichment_run_id)
        .bind(result.from_note_id)
        .bind(result.to_note_id)
        .bind(result.relationship_type.as_str())
        .bind(clamp_confidence(result.confidence))
        .bind(&result.evidence_snippet)
        .bind(result.evidence_type.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Self::parse_row(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<RelationshipRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM note_relationship WHERE id = $1",
            RELATIONSHIP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_row).transpose()
    }

    async fn list_for_run(&self, enrichment_run_id: Uuid) -> Result<Vec<RelationshipRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM note_relationship WHERE enrichment_run_id = $1
             ORDER BY created_at, id",
            RELATIONSHIP_COLUMNS
        ))
        .bind(enrichment_run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(Self::parse_row).collect()
    }

    async fn update_status(&self, id: Uuid, status: ReviewStatus, actor: &str) -> Result<bool> {
        if !ReviewStatus::Pending.can_transition_to(status) {
            return Ok(false);
        }
        let result = sqlx::query(
            "UPDATE note_relationship SET status = $2, reviewed_by = $3, reviewed_at = $4
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(actor)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }
}
