//! In-memory implementations of the persistence traits.
//!
//! Used by tests and by local runs without PostgreSQL. Semantics match the
//! PostgreSQL repositories, including expiry filtering on cache reads and
//! status transition checks on runs and review records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use lore_core::{
    new_v7, CacheEntry, CacheKey, CacheRepository, CacheStats, CacheTypeStats,
    ClassificationRecord, ClassificationRepository, ClassificationResult, EnrichmentRun,
    EnrichmentRunRepository, EnrichmentTotals, Error, ImportNote, NewCacheEntry, NoteRepository,
    OperationType, RelationshipRecord, RelationshipRepository, RelationshipResult, Result,
    ReviewStatus, RunStatus,
};

use crate::Repositories;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// NOTES
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryNoteRepository {
    notes: Mutex<Vec<ImportNote>>,
}

impl MemoryNoteRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a note.
    pub fn insert(&self, note: ImportNote) {
        let mut notes = lock(&self.notes);
        match notes.iter_mut().find(|n| n.id == note.id) {
            Some(existing) => *existing = note,
            None => notes.push(note),
        }
    }

    pub fn insert_all(&self, notes: impl IntoIterator<Item = ImportNote>) {
        for note in notes {
            self.insert(note);
        }
    }
}

#[async_trait]
impl NoteRepository for MemoryNoteRepository {
    async fn get(&self, id: Uuid) -> Result<Option<ImportNote>> {
        Ok(lock(&self.notes).iter().find(|n| n.id == id).cloned())
    }

    async fn list_for_import(&self, import_run_id: Uuid) -> Result<Vec<ImportNote>> {
        Ok(lock(&self.notes)
            .iter()
            .filter(|n| n.import_run_id == import_run_id)
            .cloned()
            .collect())
    }

    async fn titles(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, String>> {
        Ok(lock(&self.notes)
            .iter()
            .filter(|n| ids.contains(&n.id))
            .map(|n| (n.id, n.title.clone()))
            .collect())
    }
}

// =============================================================================
// RUNS
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryRunRepository {
    runs: Mutex<HashMap<Uuid, EnrichmentRun>>,
}

impl MemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition<F>(&self, id: Uuid, next: RunStatus, apply: F) -> Result<()>
    where
        F: FnOnce(&mut EnrichmentRun),
    {
        let mut runs = lock(&self.runs);
        let run = runs.get_mut(&id).ok_or(Error::RunNotFound(id))?;
        if !run.status.can_transition_to(next) {
            return Err(Error::InvalidInput(format!(
                "enrichment run {} cannot move from {} to {}",
                id, run.status, next
            )));
        }
        run.status = next;
        apply(run);
        Ok(())
    }
}

#[async_trait]
impl EnrichmentRunRepository for MemoryRunRepository {
    async fn create(&self, import_run_id: Uuid, team_id: Uuid) -> Result<EnrichmentRun> {
        let run = EnrichmentRun {
            id: new_v7(),
            import_run_id,
            team_id,
            status: RunStatus::Pending,
            totals: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        lock(&self.runs).insert(run.id, run.clone());
        Ok(run)
    }

    async fn get(&self, id: Uuid) -> Result<Option<EnrichmentRun>> {
        Ok(lock(&self.runs).get(&id).cloned())
    }

    async fn mark_running(&self, id: Uuid) -> Result<()> {
        self.transition(id, RunStatus::Running, |run| {
            run.started_at = Some(Utc::now());
        })
    }

    async fn complete(&self, id: Uuid, totals: &EnrichmentTotals) -> Result<()> {
        let totals = *totals;
        self.transition(id, RunStatus::Completed, move |run| {
            run.totals = Some(totals);
            run.completed_at = Some(Utc::now());
        })
    }

    async fn fail(&self, id: Uuid, error: &str) -> Result<()> {
        self.transition(id, RunStatus::Failed, |run| {
            run.error_message = Some(error.to_string());
            run.completed_at = Some(Utc::now());
        })
    }
}

// =============================================================================
// REVIEW RECORDS
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryClassificationRepository {
    records: Mutex<Vec<ClassificationRecord>>,
}

impl MemoryClassificationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClassificationRepository for MemoryClassificationRepository {
    async fn create(
        &self,
        enrichment_run_id: Uuid,
        result: &ClassificationResult,
    ) -> Result<ClassificationRecord> {
        let record = ClassificationRecord {
            id: new_v7(),
            enrichment_run_id,
            note_id: result.note_id,
            inferred_type: result.inferred_type,
            confidence: lore_core::clamp_confidence(result.confidence),
            explanation: result.explanation.clone(),
            extracted_entity_names: result.extracted_entity_names.clone(),
            status: ReviewStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
        };
        lock(&self.records).push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<ClassificationRecord>> {
        Ok(lock(&self.records).iter().find(|r| r.id == id).cloned())
    }

    async fn list_for_run(&self, enrichment_run_id: Uuid) -> Result<Vec<ClassificationRecord>> {
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.enrichment_run_id == enrichment_run_id)
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: Uuid, status: ReviewStatus, actor: &str) -> Result<bool> {
        let mut records = lock(&self.records);
        match records.iter_mut().find(|r| r.id == id) {
            Some(r) if r.status.can_transition_to(status) => {
                r.status = status;
                r.reviewed_by = Some(actor.to_string());
                r.reviewed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryRelationshipRepository {
    records: Mutex<Vec<RelationshipRecord>>,
}

impl MemoryRelationshipRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationshipRepository for MemoryRelationshipRepository {
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
        let record = RelationshipRecord {
            id: new_v7(),
            enrichment_run_id,
            from_note_id: result.from_note_id,
            to_note_id: result.to_note_id,
            relationship_type: result.relationship_type,
            confidence: lore_core::clamp_confidence(result.confidence),
            evidence_snippet: result.evidence_snippet.clone(),
            evidence_type: result.evidence_type,
            status: ReviewStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            created_at: Utc::now(),
        };
        lock(&self.records).push(record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<RelationshipRecord>> {
        Ok(lock(&self.records).iter().find(|r| r.id == id).cloned())
    }

    async fn list_for_run(&self, enrichment_run_id: Uuid) -> Result<Vec<RelationshipRecord>> {
        Ok(lock(&self.records)
            .iter()
            .filter(|r| r.enrichment_run_id == enrichment_run_id)
            .cloned()
            .collect())
    }

    async fn update_status(&self, id: Uuid, status: ReviewStatus, actor: &str) -> Result<bool> {
        let mut records = lock(&self.records);
        match records.iter_mut().find(|r| r.id == id) {
            Some(r) if r.status.can_transition_to(status) => {
                r.status = status;
                r.reviewed_by = Some(actor.to_string());
                r.reviewed_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// =============================================================================
// CACHE
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryCacheRepository {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries, expired ones included.
    pub fn entries(&self) -> Vec<CacheEntry> {
        lock(&self.entries).values().cloned().collect()
    }

    fn live(entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        !entry.is_expired(now)
    }
}

#[async_trait]
impl CacheRepository for MemoryCacheRepository {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let now = Utc::now();
        Ok(lock(&self.entries)
            .get(key)
            .filter(|e| Self::live(e, now))
            .cloned())
    }

    async fn get_batch(
        &self,
        cache_type: OperationType,
        content_hashes: &[String],
        algorithm_version: &str,
        context_hash: Option<&str>,
        team_id: Uuid,
    ) -> Result<Vec<CacheEntry>> {
        let now = Utc::now();
        let entries = lock(&self.entries);
        Ok(content_hashes
            .iter()
            .filter_map(|hash| {
                let key = CacheKey {
                    cache_type,
                    content_hash: hash.clone(),
                    algorithm_version: algorithm_version.to_string(),
                    context_hash: context_hash.map(str::to_string),
                    team_id,
                };
                entries.get(&key).filter(|e| Self::live(e, now)).cloned()
            })
            .collect())
    }

    async fn set(&self, entry: &NewCacheEntry) -> Result<()> {
        let mut entries = lock(&self.entries);
        match entries.get_mut(&entry.key) {
            Some(existing) => existing.expires_at = entry.expires_at,
            None => {
                let stored = CacheEntry {
                    id: new_v7(),
                    cache_type: entry.key.cache_type,
                    content_hash: entry.key.content_hash.clone(),
                    algorithm_version: entry.key.algorithm_version.clone(),
                    context_hash: entry.key.context_hash.clone(),
                    team_id: entry.key.team_id,
                    from_hash: entry.from_hash.clone(),
                    to_hash: entry.to_hash.clone(),
                    result: entry.result.clone(),
                    model_id: entry.model_id.clone(),
                    hit_count: 0,
                    created_at: Utc::now(),
                    expires_at: entry.expires_at,
                };
                entries.insert(entry.key.clone(), stored);
            }
        }
        entries.retain(|k, _| {
            !(k.cache_type == entry.key.cache_type
                && k.content_hash == entry.key.content_hash
                && k.context_hash == entry.key.context_hash
                && k.team_id == entry.key.team_id
                && k.algorithm_version != entry.key.algorithm_version)
        });
        Ok(())
    }

    async fn increment_hits(&self, ids: &[Uuid]) -> Result<u64> {
        let mut updated = 0;
        for entry in lock(&self.entries).values_mut() {
            if ids.contains(&entry.id) {
                entry.hit_count += 1;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn invalidate_version(
        &self,
        cache_type: OperationType,
        algorithm_version: &str,
    ) -> Result<u64> {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|k, _| {
            !(k.cache_type == cache_type && k.algorithm_version == algorithm_version)
        });
        Ok((before - entries.len()) as u64)
    }

    async fn invalidate_team(&self, team_id: Uuid) -> Result<u64> {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|k, _| k.team_id != team_id);
        Ok((before - entries.len()) as u64)
    }

    async fn prune_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, e| Self::live(e, now));
        Ok((before - entries.len()) as u64)
    }

    async fn stats(&self, expiring_within: chrono::Duration) -> Result<CacheStats> {
        let now = Utc::now();
        let horizon = now + expiring_within;
        let entries = lock(&self.entries);

        let mut stats = CacheStats::default();
        let mut by_type: HashMap<OperationType, CacheTypeStats> = HashMap::new();
        for entry in entries.values() {
            stats.total_entries += 1;
            stats.total_hits += entry.hit_count;
            if entry.expires_at > now && entry.expires_at <= horizon {
                stats.expiring_soon += 1;
            }
            stats.oldest_entry = Some(match stats.oldest_entry {
                Some(t) => t.min(entry.created_at),
                None => entry.created_at,
            });
            stats.newest_entry = Some(match stats.newest_entry {
                Some(t) => t.max(entry.created_at),
                None => entry.created_at,
            });
            let slot = by_type
                .entry(entry.cache_type)
                .or_insert_with(|| CacheTypeStats {
                    cache_type: entry.cache_type.as_str().to_string(),
                    entries: 0,
                    hits: 0,
                });
            slot.entries += 1;
            slot.hits += entry.hit_count;
        }
        stats.by_type = OperationType::ALL
            .iter()
            .filter_map(|op| by_type.remove(op))
            .collect();
        Ok(stats)
    }
}

// =============================================================================
// BUNDLE
// =============================================================================

/// Every in-memory repository, shared behind `Arc`s.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub notes: Arc<MemoryNoteRepository>,
    pub runs: Arc<MemoryRunRepository>,
    pub classifications: Arc<MemoryClassificationRepository>,
    pub relationships: Arc<MemoryRelationshipRepository>,
    pub cache: Arc<MemoryCacheRepository>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repositories(&self) -> Repositories {
        Repositories {
            notes: self.notes.clone(),
            runs: self.runs.clone(),
            classifications: self.classifications.clone(),
            relationships: self.relationships.clone(),
            cache: self.cache.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_core::InferredType;
    use serde_json::json;

    fn key(hash: &str, version: &str, team_id: Uuid) -> CacheKey {
        CacheKey {
            cache_type: OperationType::Classification,
            content_hash: hash.to_string(),
            algorithm_version: version.to_string(),
            context_hash: Some("ctx".to_string()),
            team_id,
        }
    }

    fn new_entry(key: CacheKey, result: serde_json::Value, ttl: chrono::Duration) -> NewCacheEntry {
        NewCacheEntry {
            key,
            from_hash: None,
            to_hash: None,
            result,
            model_id: Some("m".into()),
            expires_at: Utc::now() + ttl,
        }
    }

    #[tokio::test]
    async fn test_run_lifecycle_transitions() {
        let repo = MemoryRunRepository::new();
        let run = repo.create(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        assert_eq!(run.status, RunStatus::Pending);

        assert!(repo.complete(run.id, &EnrichmentTotals::default()).await.is_err());
        repo.mark_running(run.id).await.unwrap();
        repo.complete(run.id, &EnrichmentTotals::default()).await.unwrap();

        let stored = repo.get(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert!(stored.started_at.is_some());
        assert!(matches!(
            repo.fail(run.id, "late").await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let repo = MemoryRunRepository::new();
        assert!(matches!(
            repo.mark_running(Uuid::new_v4()).await,
            Err(Error::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_review_status_only_moves_out_of_pending() {
        let repo = MemoryClassificationRepository::new();
        let result = ClassificationResult::new(Uuid::new_v4(), InferredType::Npc, 0.9, "x");
        let record = repo.create(Uuid::new_v4(), &result).await.unwrap();

        assert!(repo
            .update_status(record.id, ReviewStatus::Approved, "gm")
            .await
            .unwrap());
        assert!(!repo
            .update_status(record.id, ReviewStatus::Rejected, "gm")
            .await
            .unwrap());
        let stored = repo.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReviewStatus::Approved);
        assert_eq!(stored.reviewed_by.as_deref(), Some("gm"));
    }

    #[tokio::test]
    async fn test_cache_set_keeps_original_result_and_refreshes_expiry() {
        let repo = MemoryCacheRepository::new();
        let team = Uuid::new_v4();
        let k = key("h1", "1.0.0", team);

        repo.set(&new_entry(k.clone(), json!({"v": 1}), chrono::Duration::days(1)))
            .await
            .unwrap();
        repo.set(&new_entry(k.clone(), json!({"v": 2}), chrono::Duration::days(30)))
            .await
            .unwrap();

        let entry = repo.get(&k).await.unwrap().unwrap();
        assert_eq!(entry.result, json!({"v": 1}));
        assert!(entry.expires_at > Utc::now() + chrono::Duration::days(29));
    }

    #[tokio::test]
    async fn test_cache_set_removes_superseded_versions() {
        let repo = MemoryCacheRepository::new();
        let team = Uuid::new_v4();
        repo.set(&new_entry(key("h1", "1.0.0", team), json!(1), chrono::Duration::days(1)))
            .await
            .unwrap();
        repo.set(&new_entry(key("h2", "1.0.0", team), json!(2), chrono::Duration::days(1)))
            .await
            .unwrap();
        repo.set(&new_entry(key("h1", "1.1.0", team), json!(3), chrono::Duration::days(1)))
            .await
            .unwrap();

        assert!(repo.get(&key("h1", "1.0.0", team)).await.unwrap().is_none());
        assert!(repo.get(&key("h2", "1.0.0", team)).await.unwrap().is_some());
        assert_eq!(repo.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses_until_pruned() {
        let repo = MemoryCacheRepository::new();
        let team = Uuid::new_v4();
        let k = key("h1", "1.0.0", team);
        repo.set(&new_entry(k.clone(), json!(1), chrono::Duration::seconds(-1)))
            .await
            .unwrap();

        assert!(repo.get(&k).await.unwrap().is_none());
        assert_eq!(repo.entries().len(), 1);
        assert_eq!(repo.prune_expired().await.unwrap(), 1);
        assert!(repo.entries().is_empty());
    }

    #[tokio::test]
    async fn test_get_batch_is_team_scoped() {
        let repo = MemoryCacheRepository::new();
        let team_a = Uuid::new_v4();
        let team_b = Uuid::new_v4();
        repo.set(&new_entry(key("h1", "1.0.0", team_a), json!(1), chrono::Duration::days(1)))
            .await
            .unwrap();

        let hashes = vec!["h1".to_string()];
        let a = repo
            .get_batch(OperationType::Classification, &hashes, "1.0.0", Some("ctx"), team_a)
            .await
            .unwrap();
        let b = repo
            .get_batch(OperationType::Classification, &hashes, "1.0.0", Some("ctx"), team_b)
            .await
            .unwrap();
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
    }

    #[tokio::test]
    async fn test_stats_counts_by_type() {
        let repo = MemoryCacheRepository::new();
        let team = Uuid::new_v4();
        repo.set(&new_entry(key("h1", "1.0.0", team), json!(1), chrono::Duration::days(3)))
            .await
            .unwrap();
        repo.set(&new_entry(key("h2", "1.0.0", team), json!(2), chrono::Duration::days(30)))
            .await
            .unwrap();
        let id = repo.get(&key("h1", "1.0.0", team)).await.unwrap().unwrap().id;
        assert_eq!(repo.increment_hits(&[id]).await.unwrap(), 1);

        let stats = repo.stats(chrono::Duration::days(7)).await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.total_hits, 1);
        assert_eq!(stats.expiring_soon, 1);
        assert_eq!(stats.by_type.len(), 1);
        assert_eq!(stats.by_type[0].cache_type, "classification");
        assert!(stats.oldest_entry <= stats.newest_entry);
    }
}
