//! Imported note repository implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use lore_core::{Error, ImportNote, NoteRepository, Result};

/// PostgreSQL implementation of NoteRepository.
#[derive(Clone)]
pub struct PgNoteRepository {
    pool: Pool<Postgres>,
}

impl PgNoteRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert or replace a note. Used by importers and test fixtures.
    pub async fn upsert(&self, note: &ImportNote) -> Result<()> {
        sqlx::query(
            "INSERT INTO import_note (id, import_run_id, team_id, title, content, note_type, linked_note_ids)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE
             SET title = EXCLUDED.title, content = EXCLUDED.content,
                 note_type = EXCLUDED.note_type, linked_note_ids = EXCLUDED.linked_note_ids",
        )
        .bind(note.id)
        .bind(note.import_run_id)
        .bind(note.team_id)
        .bind(&note.title)
        .bind(&note.content)
        .bind(&note.note_type)
        .bind(&note.linked_note_ids)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    fn parse_row(row: PgRow) -> ImportNote {
        ImportNote {
            id: row.get("id"),
            import_run_id: row.get("import_run_id"),
            team_id: row.get("team_id"),
            title: row.get("title"),
            content: row.get("content"),
            note_type: row.get("note_type"),
            linked_note_ids: row.get("linked_note_ids"),
        }
    }
}

const NOTE_COLUMNS: &str =
    "id, import_run_id, team_id, title, content, note_type, linked_note_ids";

#[async_trait]
impl NoteRepository for PgNoteRepository {
    async fn get(&self, id: Uuid) -> Result<Option<ImportNote>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM import_note WHERE id = $1",
            NOTE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.map(Self::parse_row))
    }

    async fn list_for_import(&self, import_run_id: Uuid) -> Result<Vec<ImportNote>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM import_note WHERE import_run_id = $1 ORDER BY created_at, id",
            NOTE_COLUMNS
        ))
        .bind(import_run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(rows.into_iter().map(Self::parse_row).collect())
    }

    async fn titles(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query("SELECT id, title FROM import_note WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("id"), row.get("title")))
            .collect())
    }
}
