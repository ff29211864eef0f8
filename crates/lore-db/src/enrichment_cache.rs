//! Content-addressed cache of classification and relationship results.
//!
//! Classification entries are keyed by the note's content hash, the
//! player-character context hash and the current classification algorithm
//! version. Relationship entries are keyed by the order-independent pair
//! hash of both endpoints; the endpoint hashes are stored on the entry so a
//! reader can recover the written direction.
//!
//! Cached results are detached from note identity: on a hit the stored
//! result is re-bound to the note ids of the query.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use lore_core::defaults::{CACHE_EXPIRING_SOON_DAYS, CACHE_TTL_DAYS};
use lore_core::{
    algorithm_version, clamp_confidence, CacheEntry, CacheKey, CacheRepository, CacheStats,
    ClassificationResult, ImportNote, NewCacheEntry, NoteForClassification,
    NoteWithClassification, OperationType, RelationshipResult, Result,
};

use crate::cache_keys::{content_hash, context_hash, pair_hash};

/// The identifying text of a note, borrowed from any note shape.
#[derive(Debug, Clone, Copy)]
pub struct NoteRef<'a> {
    pub id: Uuid,
    pub title: &'a str,
    pub content: &'a str,
}

impl<'a> NoteRef<'a> {
    pub fn new(id: Uuid, title: &'a str, content: &'a str) -> Self {
        Self { id, title, content }
    }

    pub fn content_hash(&self) -> String {
        content_hash(self.title, self.content)
    }
}

impl<'a> From<&'a NoteForClassification> for NoteRef<'a> {
    fn from(n: &'a NoteForClassification) -> Self {
        Self::new(n.id, &n.title, &n.content)
    }
}

impl<'a> From<&'a NoteWithClassification> for NoteRef<'a> {
    fn from(n: &'a NoteWithClassification) -> Self {
        Self::new(n.id, &n.title, &n.content)
    }
}

impl<'a> From<&'a ImportNote> for NoteRef<'a> {
    fn from(n: &'a ImportNote) -> Self {
        Self::new(n.id, &n.title, &n.content)
    }
}

#[derive(Clone)]
pub struct EnrichmentCache {
    repo: Arc<dyn CacheRepository>,
    ttl: chrono::Duration,
}

impl EnrichmentCache {
    pub fn new(repo: Arc<dyn CacheRepository>) -> Self {
        Self {
            repo,
            ttl: chrono::Duration::days(CACHE_TTL_DAYS),
        }
    }

    /// Override the lifetime given to new entries.
    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    fn classification_key(&self, hash: String, context: String, team_id: Uuid) -> CacheKey {
        CacheKey {
            cache_type: OperationType::Classification,
            content_hash: hash,
            algorithm_version: algorithm_version(OperationType::Classification)
                .current
                .to_string(),
            context_hash: Some(context),
            team_id,
        }
    }

    fn relationship_key(&self, pair: String, team_id: Uuid) -> CacheKey {
        CacheKey {
            cache_type: OperationType::Relationship,
            content_hash: pair,
            algorithm_version: algorithm_version(OperationType::Relationship)
                .current
                .to_string(),
            context_hash: None,
            team_id,
        }
    }

    /// Bump hit counters without holding up the caller. Failures are only
    /// logged.
    fn record_hits(&self, ids: Vec<Uuid>) {
        if ids.is_empty() {
            return;
        }
        let repo = self.repo.clone();
        tokio::spawn(async move {
            if let Err(e) = repo.increment_hits(&ids).await {
                debug!(error = %e, hits = ids.len(), "Cache hit counter update failed");
            }
        });
    }

    fn decode<T: DeserializeOwned>(entry: &CacheEntry) -> Option<T> {
        match serde_json::from_value(entry.result.clone()) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(
                    cache_type = %entry.cache_type,
                    entry_id = %entry.id,
                    error = %e,
                    "Unreadable cache entry treated as a miss"
                );
                None
            }
        }
    }

    fn bind_classification(stored: ClassificationResult, note_id: Uuid) -> ClassificationResult {
        ClassificationResult {
            note_id,
            confidence: clamp_confidence(stored.confidence),
            fallback: false,
            ..stored
        }
    }

    // -------------------------------------------------------------------------
    // Classification
    // -------------------------------------------------------------------------

    #[instrument(skip(self, note, player_character_names), fields(subsystem = "cache", component = "enrichment_cache", op = "get_classification", team_id = %team_id))]
    pub async fn get_classification<'a>(
        &self,
        note: impl Into<NoteRef<'a>>,
        player_character_names: &[String],
        team_id: Uuid,
    ) -> Result<Option<ClassificationResult>> {
        let note = note.into();
        let key = self.classification_key(
            note.content_hash(),
            context_hash(player_character_names),
            team_id,
        );
        let Some(entry) = self.repo.get(&key).await? else {
            return Ok(None);
        };
        let result = Self::decode::<ClassificationResult>(&entry)
            .map(|stored| Self::bind_classification(stored, note.id));
        if result.is_some() {
            self.record_hits(vec![entry.id]);
        }
        Ok(result)
    }

    #[instrument(skip(self, note, player_character_names, result), fields(subsystem = "cache", component = "enrichment_cache", op = "set_classification", team_id = %team_id))]
    pub async fn set_classification<'a>(
        &self,
        note: impl Into<NoteRef<'a>>,
        player_character_names: &[String],
        team_id: Uuid,
        result: &ClassificationResult,
        model_id: &str,
    ) -> Result<()> {
        let note = note.into();
        let key = self.classification_key(
            note.content_hash(),
            context_hash(player_character_names),
            team_id,
        );
        let entry = NewCacheEntry {
            key,
            from_hash: None,
            to_hash: None,
            result: serde_json::to_value(result)?,
            model_id: Some(model_id.to_string()),
            expires_at: Utc::now() + self.ttl,
        };
        self.repo.set(&entry).await
    }

    /// One bulk lookup for notes sharing the same player-character context.
    ///
    /// Returns hits keyed by note id. Notes with identical content share an
    /// entry and all receive it.
    #[instrument(skip(self, notes, player_character_names), fields(subsystem = "cache", component = "enrichment_cache", op = "get_batch", team_id = %team_id, note_count = notes.len()))]
    pub async fn get_batch(
        &self,
        notes: &[NoteForClassification],
        player_character_names: &[String],
        team_id: Uuid,
    ) -> Result<HashMap<Uuid, ClassificationResult>> {
        if notes.is_empty() {
            return Ok(HashMap::new());
        }

        let mut by_hash: HashMap<String, Vec<Uuid>> = HashMap::new();
        for note in notes {
            by_hash
                .entry(content_hash(&note.title, &note.content))
                .or_default()
                .push(note.id);
        }
        let hashes: Vec<String> = by_hash.keys().cloned().collect();
        let context = context_hash(player_character_names);
        let version = algorithm_version(OperationType::Classification).current;

        let entries = self
            .repo
            .get_batch(
                OperationType::Classification,
                &hashes,
                version,
                Some(&context),
                team_id,
            )
            .await?;

        let mut hits = HashMap::new();
        let mut hit_ids = Vec::with_capacity(entries.len());
        for entry in &entries {
            let Some(stored) = Self::decode::<ClassificationResult>(entry) else {
                continue;
            };
            let Some(note_ids) = by_hash.get(&entry.content_hash) else {
                continue;
            };
            for &note_id in note_ids {
                hits.insert(note_id, Self::bind_classification(stored.clone(), note_id));
            }
            hit_ids.push(entry.id);
        }

        debug!(
            cache_hits = hits.len(),
            cache_misses = notes.len() - hits.len(),
            "Classification cache lookup"
        );
        self.record_hits(hit_ids);
        Ok(hits)
    }

    // -------------------------------------------------------------------------
    // Relationship
    // -------------------------------------------------------------------------

    /// Cached relationship between two notes, with `from_note_id` and
    /// `to_note_id` taken from the query notes in the direction the result
    /// was written.
    #[instrument(skip(self, a, b), fields(subsystem = "cache", component = "enrichment_cache", op = "get_relationship", team_id = %team_id))]
    pub async fn get_relationship<'a>(
        &self,
        a: impl Into<NoteRef<'a>>,
        b: impl Into<NoteRef<'a>>,
        team_id: Uuid,
    ) -> Result<Option<RelationshipResult>> {
        let (a, b) = (a.into(), b.into());
        let (hash_a, hash_b) = (a.content_hash(), b.content_hash());
        let key = self.relationship_key(pair_hash(&hash_a, &hash_b), team_id);

        let Some(entry) = self.repo.get(&key).await? else {
            return Ok(None);
        };
        let Some(stored) = Self::decode::<RelationshipResult>(&entry) else {
            return Ok(None);
        };

        let written_from_b = entry.from_hash.as_deref() == Some(hash_b.as_str())
            && entry.from_hash.as_deref() != Some(hash_a.as_str());
        let (from_note_id, to_note_id) = if written_from_b {
            (b.id, a.id)
        } else {
            (a.id, b.id)
        };

        self.record_hits(vec![entry.id]);
        Ok(Some(RelationshipResult {
            from_note_id,
            to_note_id,
            confidence: clamp_confidence(stored.confidence),
            ..stored
        }))
    }

    /// Store a relationship between `from` and `to`. If the result points the
    /// other way, the endpoints are swapped so the stored hashes follow the
    /// result's direction.
    #[instrument(skip(self, from, to, result), fields(subsystem = "cache", component = "enrichment_cache", op = "set_relationship", team_id = %team_id))]
    pub async fn set_relationship<'a>(
        &self,
        from: impl Into<NoteRef<'a>>,
        to: impl Into<NoteRef<'a>>,
        team_id: Uuid,
        result: &RelationshipResult,
        model_id: &str,
    ) -> Result<()> {
        let (mut from, mut to) = (from.into(), to.into());
        if from.id == result.to_note_id && to.id == result.from_note_id {
            std::mem::swap(&mut from, &mut to);
        }
        let (from_hash, to_hash) = (from.content_hash(), to.content_hash());
        let key = self.relationship_key(pair_hash(&from_hash, &to_hash), team_id);

        let entry = NewCacheEntry {
            key,
            from_hash: Some(from_hash),
            to_hash: Some(to_hash),
            result: serde_json::to_value(result)?,
            model_id: Some(model_id.to_string()),
            expires_at: Utc::now() + self.ttl,
        };
        self.repo.set(&entry).await
    }

    // -------------------------------------------------------------------------
    // Administration
    // -------------------------------------------------------------------------

    /// Remove entries written under `version` of `operation`.
    ///
    /// `operation` is parsed, so an unsupported name is an
    /// `Error::InvalidInput` and nothing is deleted.
    #[instrument(skip(self), fields(subsystem = "cache", component = "enrichment_cache", op = "invalidate_version"))]
    pub async fn invalidate_version(&self, operation: &str, version: &str) -> Result<u64> {
        let operation: OperationType = operation.parse()?;
        let removed = self.repo.invalidate_version(operation, version).await?;
        debug!(rows_affected = removed, cache_type = %operation, "Cache version invalidated");
        Ok(removed)
    }

    #[instrument(skip(self), fields(subsystem = "cache", component = "enrichment_cache", op = "invalidate_team"))]
    pub async fn invalidate_team(&self, team_id: Uuid) -> Result<u64> {
        let removed = self.repo.invalidate_team(team_id).await?;
        debug!(rows_affected = removed, "Team cache invalidated");
        Ok(removed)
    }

    #[instrument(skip(self), fields(subsystem = "cache", component = "enrichment_cache", op = "prune_expired"))]
    pub async fn prune_expired(&self) -> Result<u64> {
        let removed = self.repo.prune_expired().await?;
        debug!(rows_affected = removed, "Expired cache entries pruned");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.repo
            .stats(chrono::Duration::days(CACHE_EXPIRING_SOON_DAYS))
            .await
    }
}
