//! Core traits for lorekeep abstractions.
//!
//! The generation backend seam sits here so the inference crate can swap
//! model servers, and the persistence traits sit here so the job crate can
//! run against PostgreSQL or the in-memory store interchangeably.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::versions::OperationType;

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for text generation (LLM).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a prompt.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Generate text constrained to JSON output where the backend supports it.
    async fn generate_json(&self, prompt: &str) -> Result<String> {
        self.generate(prompt).await
    }

    /// JSON-constrained generation with system context.
    async fn generate_json_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        self.generate_with_system(system, prompt).await
    }

    /// Get the model name being used.
    fn model_name(&self) -> &str;

    /// Check if the backend is available and responding.
    async fn health_check(&self) -> Result<bool>;
}

// =============================================================================
// PERSISTENCE TRAITS
// =============================================================================

/// Read access to imported notes.
#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// Fetch a note by ID.
    async fn get(&self, id: Uuid) -> Result<Option<ImportNote>>;

    /// All notes produced by one import run, in creation order.
    async fn list_for_import(&self, import_run_id: Uuid) -> Result<Vec<ImportNote>>;

    /// Titles for the given notes. Unknown IDs are omitted.
    async fn titles(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>>;
}

/// Enrichment run records.
#[async_trait]
pub trait EnrichmentRunRepository: Send + Sync {
    /// Create a run in `pending`.
    async fn create(&self, import_run_id: Uuid, team_id: Uuid) -> Result<EnrichmentRun>;

    async fn get(&self, id: Uuid) -> Result<Option<EnrichmentRun>>;

    /// `pending → running`.
    async fn mark_running(&self, id: Uuid) -> Result<()>;

    /// `running → completed` with final totals.
    async fn complete(&self, id: Uuid, totals: &EnrichmentTotals) -> Result<()>;

    /// Move a non-terminal run to `failed`.
    async fn fail(&self, id: Uuid, error: &str) -> Result<()>;
}

/// Classification review records.
#[async_trait]
pub trait ClassificationRepository: Send + Sync {
    /// Persist a result as a `pending` record.
    async fn create(
        &self,
        enrichment_run_id: Uuid,
        result: &ClassificationResult,
    ) -> Result<ClassificationRecord>;

    async fn get(&self, id: Uuid) -> Result<Option<ClassificationRecord>>;

    async fn list_for_run(&self, enrichment_run_id: Uuid) -> Result<Vec<ClassificationRecord>>;

    /// Set the review status if the record is still `pending`.
    /// Returns false when the record is missing or already reviewed.
    async fn update_status(&self, id: Uuid, status: ReviewStatus, actor: &str) -> Result<bool>;
}

/// Relationship review records.
#[async_trait]
pub trait RelationshipRepository: Send + Sync {
    async fn create(
        &self,
        enrichment_run_id: Uuid,
        result: &RelationshipResult,
    ) -> Result<RelationshipRecord>;

    async fn get(&self, id: Uuid) -> Result<Option<RelationshipRecord>>;

    async fn list_for_run(&self, enrichment_run_id: Uuid) -> Result<Vec<RelationshipRecord>>;

    async fn update_status(&self, id: Uuid, status: ReviewStatus, actor: &str) -> Result<bool>;
}

/// Key-value persistence behind the enrichment cache.
///
/// All reads exclude expired entries without deleting them.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// Single live entry for an exact key.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Live entries matching any of `content_hashes` under one version,
    /// context and team.
    async fn get_batch(
        &self,
        cache_type: OperationType,
        content_hashes: &[String],
        algorithm_version: &str,
        context_hash: Option<&str>,
        team_id: Uuid,
    ) -> Result<Vec<CacheEntry>>;

    /// Insert, or refresh `expires_at` of an existing entry with the same
    /// key. Entries for the same content under other versions are removed.
    async fn set(&self, entry: &NewCacheEntry) -> Result<()>;

    /// Add one hit to each entry.
    async fn increment_hits(&self, ids: &[Uuid]) -> Result<u64>;

    async fn invalidate_version(
        &self,
        cache_type: OperationType,
        algorithm_version: &str,
    ) -> Result<u64>;

    async fn invalidate_team(&self, team_id: Uuid) -> Result<u64>;

    /// Delete every expired entry.
    async fn prune_expired(&self) -> Result<u64>;

    /// Aggregate statistics; `expiring_within` bounds the "expiring soon"
    /// count.
    async fn stats(&self, expiring_within: chrono::Duration) -> Result<CacheStats>;
}
