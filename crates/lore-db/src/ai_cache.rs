//! AI cache repository implementation.
//!
//! `context_hash` is stored as `''` when a key has none, which keeps the
//! unique constraint free of NULL comparisons.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use lore_core::{
    new_v7, CacheEntry, CacheKey, CacheRepository, CacheStats, CacheTypeStats, Error,
    NewCacheEntry, OperationType, Result,
};

const CACHE_COLUMNS: &str = "id, cache_type, content_hash, algorithm_version, context_hash, \
     team_id, from_hash, to_hash, result, model_id, hit_count, created_at, expires_at";

/// PostgreSQL implementation of CacheRepository.
#[derive(Clone)]
pub struct PgCacheRepository {
    pool: Pool<Postgres>,
}

fn stored_context(context_hash: Option<&str>) -> &str {
    context_hash.unwrap_or("")
}

impl PgCacheRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: PgRow) -> Result<CacheEntry> {
        let cache_type: String = row.get("cache_type");
        let context_hash: String = row.get("context_hash");
        Ok(CacheEntry {
            id: row.get("id"),
            cache_type: cache_type.parse()?,
            content_hash: row.get("content_hash"),
            algorithm_version: row.get("algorithm_version"),
            context_hash: (!context_hash.is_empty()).then_some(context_hash),
            team_id: row.get("team_id"),
            from_hash: row.get("from_hash"),
            to_hash: row.get("to_hash"),
            result: row.get("result"),
            model_id: row.get("model_id"),
            hit_count: row.get("hit_count"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        })
    }
}

#[async_trait]
impl CacheRepository for PgCacheRepository {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM ai_cache
             WHERE cache_type = $1 AND content_hash = $2 AND algorithm_version = $3
               AND context_hash = $4 AND team_id = $5 AND expires_at > now()",
            CACHE_COLUMNS
        ))
        .bind(key.cache_type.as_str())
        .bind(&key.content_hash)
        .bind(&key.algorithm_version)
        .bind(stored_context(key.context_hash.as_deref()))
        .bind(key.team_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_row).transpose()
    }

    async fn get_batch(
        &self,
        cache_type: OperationType,
        content_hashes: &[String],
        algorithm_version: &str,
        context_hash: Option<&str>,
        team_id: Uuid,
    ) -> Result<Vec<CacheEntry>> {
        if content_hashes.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM ai_cache
             WHERE cache_type = $1 AND content_hash = ANY($2) AND algorithm_version = $3
               AND context_hash = $4 AND team_id = $5 AND expires_at > now()",
            CACHE_COLUMNS
        ))
        .bind(cache_type.as_str())
        .bind(content_hashes)
        .bind(algorithm_version)
        .bind(stored_context(context_hash))
        .bind(team_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(Self::parse_row).collect()
    }

    async fn set(&self, entry: &NewCacheEntry) -> Result<()> {
        let key = &entry.key;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Existing rows keep their result; only the expiry moves.
        sqlx::query(
            "INSERT INTO ai_cache
                 (id, cache_type, content_hash, algorithm_version, context_hash, team_id,
                  from_hash, to_hash, result, model_id, hit_count, created_at, expires_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 0, $11, $12)
             ON CONFLICT (cache_type, content_hash, algorithm_version, context_hash, team_id)
             DO UPDATE SET expires_at = EXCLUDED.expires_at",
        )
        .bind(new_v7())
        .bind(key.cache_type.as_str())
        .bind(&key.content_hash)
        .bind(&key.algorithm_version)
        .bind(stored_context(key.context_hash.as_deref()))
        .bind(key.team_id)
        .bind(&entry.from_hash)
        .bind(&entry.to_hash)
        .bind(&entry.result)
        .bind(&entry.model_id)
        .bind(Utc::now())
        .bind(entry.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let superseded = sqlx::query(
            "DELETE FROM ai_cache
             WHERE cache_type = $1 AND content_hash = $2 AND context_hash = $3
               AND team_id = $4 AND algorithm_version <> $5",
        )
        .bind(key.cache_type.as_str())
        .bind(&key.content_hash)
        .bind(stored_context(key.context_hash.as_deref()))
        .bind(key.team_id)
        .bind(&key.algorithm_version)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        if superseded.rows_affected() > 0 {
            debug!(
                cache_type = %key.cache_type,
                rows_affected = superseded.rows_affected(),
                "Removed cache entries from older algorithm versions"
            );
        }
        Ok(())
    }

    async fn increment_hits(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE ai_cache SET hit_count = hit_count + 1 WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn invalidate_version(
        &self,
        cache_type: OperationType,
        algorithm_version: &str,
    ) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM ai_cache WHERE cache_type = $1 AND algorithm_version = $2")
                .bind(cache_type.as_str())
                .bind(algorithm_version)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn invalidate_team(&self, team_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ai_cache WHERE team_id = $1")
            .bind(team_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn prune_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM ai_cache WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn stats(&self, expiring_within: chrono::Duration) -> Result<CacheStats> {
        let horizon = Utc::now() + expiring_within;
        let row = sqlx::query(
            "SELECT COUNT(*) AS total_entries,
                    COALESCE(SUM(hit_count), 0)::BIGINT AS total_hits,
                    COUNT(*) FILTER (WHERE expires_at > now() AND expires_at <= $1) AS expiring_soon,
                    MIN(created_at) AS oldest_entry,
                    MAX(created_at) AS newest_entry
             FROM ai_cache",
        )
        .bind(horizon)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let by_type = sqlx::query(
            "SELECT cache_type, COUNT(*) AS entries, COALESCE(SUM(hit_count), 0)::BIGINT AS hits
             FROM ai_cache GROUP BY cache_type ORDER BY cache_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?
        .into_iter()
        .map(|r| CacheTypeStats {
            cache_type: r.get("cache_type"),
            entries: r.get("entries"),
            hits: r.get("hits"),
        })
        .collect();

        Ok(CacheStats {
            total_entries: row.get("total_entries"),
            total_hits: row.get("total_hits"),
            expiring_soon: row.get("expiring_soon"),
            oldest_entry: row.get("oldest_entry"),
            newest_entry: row.get("newest_entry"),
            by_type,
        })
    }
}
