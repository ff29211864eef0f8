//! Classification and relationship extraction through the enrichment cache.
//!
//! Cache failures never fail the caller: a failed read is treated as a full
//! miss and a failed write is logged.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use lore_db::EnrichmentCache;
use lore_inference::{ClassifyOptions, GenerationProvider, ProgressCallback};
use lore_core::{
    ClassificationResult, NoteForClassification, NoteWithClassification, RelationshipResult,
};

#[derive(Clone)]
pub struct CachedClassifier {
    provider: Arc<dyn GenerationProvider>,
    cache: EnrichmentCache,
}

impl CachedClassifier {
    pub fn new(provider: Arc<dyn GenerationProvider>, cache: EnrichmentCache) -> Self {
        Self { provider, cache }
    }

    pub fn provider(&self) -> &Arc<dyn GenerationProvider> {
        &self.provider
    }

    pub fn cache(&self) -> &EnrichmentCache {
        &self.cache
    }

    /// One result per note, in input order. Only cache misses reach the
    /// provider.
    #[instrument(skip(self, notes, options, on_progress), fields(subsystem = "jobs", component = "cached_classifier", op = "classify", team_id = %team_id, note_count = notes.len()))]
    pub async fn classify(
        &self,
        notes: &[NoteForClassification],
        team_id: Uuid,
        options: &ClassifyOptions,
        on_progress: Option<&ProgressCallback>,
    ) -> Vec<ClassificationResult> {
        if notes.is_empty() {
            return Vec::new();
        }
        let pc_names = &options.player_character_names;

        let mut hits = match self.cache.get_batch(notes, pc_names, team_id).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "Cache lookup failed, classifying every note");
                HashMap::new()
            }
        };

        let misses: Vec<NoteForClassification> = notes
            .iter()
            .filter(|n| !hits.contains_key(&n.id))
            .cloned()
            .collect();
        debug!(
            cache_hits = notes.len() - misses.len(),
            cache_misses = misses.len(),
            "Classification cache checked"
        );

        if !misses.is_empty() {
            let fresh = self
                .provider
                .classify_notes(&misses, on_progress, options)
                .await;
            let model_id = self.provider.model_id();
            for (note, result) in misses.iter().zip(fresh) {
                // Placeholders for failed batches must not be memoised.
                if !result.fallback {
                    if let Err(e) = self
                        .cache
                        .set_classification(note, pc_names, team_id, &result, model_id)
                        .await
                    {
                        warn!(error = %e, note_id = %note.id, "Cache write failed");
                    }
                }
                hits.insert(note.id, result);
            }
        }

        notes
            .iter()
            .map(|n| {
                hits.remove(&n.id)
                    .unwrap_or_else(|| ClassificationResult::fallback(n.id, "no result returned"))
            })
            .collect()
    }

    /// Extract relationships and write each result through to the
    /// relationship cache under its endpoint pair.
    #[instrument(skip(self, notes, on_progress), fields(subsystem = "jobs", component = "cached_classifier", op = "relate", team_id = %team_id, note_count = notes.len()))]
    pub async fn relate(
        &self,
        notes: &[NoteWithClassification],
        team_id: Uuid,
        on_progress: Option<&ProgressCallback>,
    ) -> Vec<RelationshipResult> {
        let results = self.provider.extract_relationships(notes, on_progress).await;
        if results.is_empty() {
            return results;
        }

        let by_id: HashMap<Uuid, &NoteWithClassification> =
            notes.iter().map(|n| (n.id, n)).collect();
        let model_id = self.provider.model_id();
        for rel in &results {
            let (Some(&from), Some(&to)) = (by_id.get(&rel.from_note_id), by_id.get(&rel.to_note_id))
            else {
                continue;
            };
            if let Err(e) = self
                .cache
                .set_relationship(from, to, team_id, rel, model_id)
                .await
            {
                warn!(error = %e, "Relationship cache write failed");
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_db::MemoryCacheRepository;
    use lore_inference::{LlmProvider, MockGenerationBackend, MockProvider};
    use std::time::Duration;

    fn note(title: &str, content: &str) -> NoteForClassification {
        NoteForClassification {
            id: Uuid::new_v4(),
            title: title.to_string(),
            content: content.to_string(),
            current_type: None,
            existing_link_titles: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let provider = Arc::new(MockProvider::new());
        let cache = EnrichmentCache::new(Arc::new(MemoryCacheRepository::new()));
        let classifier = CachedClassifier::new(provider.clone(), cache);
        let team = Uuid::new_v4();
        let notes = vec![note("The Rusty Tavern", "An inn by the docks.")];

        let first = classifier
            .classify(&notes, team, &ClassifyOptions::default(), None)
            .await;
        let second = classifier
            .classify(&notes, team, &ClassifyOptions::default(), None)
            .await;

        assert_eq!(provider.classify_calls(), 1);
        assert_eq!(first[0].inferred_type, second[0].inferred_type);
        assert_eq!(second[0].note_id, notes[0].id);
    }

    #[tokio::test]
    async fn test_only_misses_reach_provider_and_order_is_kept() {
        let provider = Arc::new(MockProvider::new());
        let cache = EnrichmentCache::new(Arc::new(MemoryCacheRepository::new()));
        let classifier = CachedClassifier::new(provider.clone(), cache);
        let team = Uuid::new_v4();
        let known = note("Quest: the Lost Crown", "Reward: 100 gold.");
        classifier
            .classify(std::slice::from_ref(&known), team, &ClassifyOptions::default(), None)
            .await;

        let fresh = note("Session 4 recap", "We rested.");
        let results = classifier
            .classify(
                &[fresh.clone(), known.clone()],
                team,
                &ClassifyOptions::default(),
                None,
            )
            .await;

        assert_eq!(provider.classify_calls(), 2);
        assert_eq!(results[0].note_id, fresh.id);
        assert_eq!(results[1].note_id, known.id);
    }

    #[tokio::test]
    async fn test_fallback_results_are_not_cached() {
        let backend = Arc::new(MockGenerationBackend::new().failing());
        let provider =
            Arc::new(LlmProvider::new(backend.clone()).with_batch_delay(Duration::ZERO));
        let repo = Arc::new(MemoryCacheRepository::new());
        let classifier = CachedClassifier::new(provider, EnrichmentCache::new(repo.clone()));

        let results = classifier
            .classify(
                &[note("Anything", "at all")],
                Uuid::new_v4(),
                &ClassifyOptions::default(),
                None,
            )
            .await;

        assert!(results[0].fallback);
        assert!(repo.entries().is_empty());
    }
}
