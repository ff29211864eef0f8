//! Synchronous enrichment preview.
//!
//! A preview classifies and relates a note set without touching review
//! records. The resulting plan is held for a bounded time and can later be
//! committed as a completed run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use lore_core::{
    defaults, new_v7, ClassificationResult, Clock, EnrichmentOptions, EnrichmentRun,
    EnrichmentTotals, EphemeralStore, Error, ImportNote, RelationshipResult, Result,
    SystemClock,
};
use lore_db::Repositories;
use lore_inference::ClassifyOptions;

use crate::cached::CachedClassifier;
use crate::pipeline::{classification_inputs, known_endpoints, relationship_inputs, tally};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentPlan {
    pub id: Uuid,
    pub team_id: Uuid,
    pub classifications: Vec<ClassificationResult>,
    pub relationships: Vec<RelationshipResult>,
    pub totals: EnrichmentTotals,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a plan query. Expired and never-created plans are both
/// `NotFound`.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanLookup {
    Found(EnrichmentPlan),
    NotFound,
}

pub struct PreviewService {
    classifier: CachedClassifier,
    repos: Repositories,
    plans: EphemeralStore<Uuid, EnrichmentPlan>,
}

impl PreviewService {
    pub fn new(classifier: CachedClassifier, repos: Repositories) -> Self {
        Self::with_clock(
            classifier,
            repos,
            Duration::from_secs(defaults::PLAN_RETENTION_SECS),
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        classifier: CachedClassifier,
        repos: Repositories,
        retention: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            classifier,
            repos,
            plans: EphemeralStore::new(retention, clock),
        }
    }

    /// Classify every note (through the cache) and extract relationships.
    #[instrument(skip(self, notes, player_character_names), fields(subsystem = "jobs", component = "preview", op = "preview", team_id = %team_id, note_count = notes.len()))]
    pub async fn preview(
        &self,
        team_id: Uuid,
        notes: &[ImportNote],
        player_character_names: &[String],
    ) -> EnrichmentPlan {
        let options = EnrichmentOptions {
            override_existing_types: true,
            player_character_names: player_character_names.to_vec(),
        };
        let inputs = classification_inputs(notes, &options);
        let classify_options = ClassifyOptions {
            player_character_names: options.player_character_names,
        };
        let classifications = self
            .classifier
            .classify(&inputs, team_id, &classify_options, None)
            .await;

        let related = relationship_inputs(notes, &classifications);
        let relationships =
            known_endpoints(notes, self.classifier.relate(&related, team_id, None).await);

        let plan = EnrichmentPlan {
            id: new_v7(),
            team_id,
            totals: tally(notes.len(), &classifications, &relationships),
            classifications,
            relationships,
            created_at: Utc::now(),
        };
        self.plans.sweep();
        self.plans.insert(plan.id, plan.clone());
        info!(plan_id = %plan.id, "Preview plan stored");
        plan
    }

    pub fn get_plan(&self, plan_id: Uuid) -> PlanLookup {
        match self.plans.get(&plan_id) {
            Some(plan) => PlanLookup::Found(plan),
            None => PlanLookup::NotFound,
        }
    }

    /// Persist a plan as a completed run with pending review records.
    ///
    /// The plan is taken out of the store first so it cannot be committed
    /// twice; it is put back if persisting fails.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "preview", op = "commit_plan"))]
    pub async fn commit_plan(&self, plan_id: Uuid, import_run_id: Uuid) -> Result<EnrichmentRun> {
        let plan = self
            .plans
            .remove(&plan_id)
            .ok_or_else(|| Error::NotFound(format!("enrichment plan {}", plan_id)))?;

        match self.persist(&plan, import_run_id).await {
            Ok(run) => {
                info!(plan_id = %plan_id, run_id = %run.id, "Preview plan committed");
                Ok(run)
            }
            Err(e) => {
                self.plans.insert(plan.id, plan);
                Err(e)
            }
        }
    }

    async fn persist(&self, plan: &EnrichmentPlan, import_run_id: Uuid) -> Result<EnrichmentRun> {
        let run = self.repos.runs.create(import_run_id, plan.team_id).await?;
        self.repos.runs.mark_running(run.id).await?;

        let written = async {
            for result in &plan.classifications {
                self.repos.classifications.create(run.id, result).await?;
            }
            for result in &plan.relationships {
                self.repos.relationships.create(run.id, result).await?;
            }
            self.repos.runs.complete(run.id, &plan.totals).await
        }
        .await;

        if let Err(e) = written {
            self.repos.runs.fail(run.id, &e.to_string()).await?;
            return Err(e);
        }

        self.repos
            .runs
            .get(run.id)
            .await?
            .ok_or(Error::RunNotFound(run.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_core::{ManualClock, RunStatus};
    use lore_db::{EnrichmentCache, MemoryStore};
    use lore_inference::MockProvider;

    fn service(store: &MemoryStore, clock: Arc<ManualClock>) -> PreviewService {
        let classifier = CachedClassifier::new(
            Arc::new(MockProvider::new()),
            EnrichmentCache::new(store.cache.clone()),
        );
        PreviewService::with_clock(
            classifier,
            store.repositories(),
            Duration::from_secs(60),
            clock,
        )
    }

    fn note(title: &str, content: &str) -> ImportNote {
        ImportNote {
            id: Uuid::new_v4(),
            import_run_id: Uuid::nil(),
            team_id: Uuid::nil(),
            title: title.to_string(),
            content: content.to_string(),
            note_type: None,
            linked_note_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_preview_then_commit() {
        let store = MemoryStore::new();
        let previews = service(&store, Arc::new(ManualClock::new()));
        let tam = note("Old Tam the innkeeper", "Runs the inn.");
        let quest = note("Quest: Find Tam", "Reward from [[Old Tam the innkeeper]].");
        let team = Uuid::new_v4();

        let plan = previews.preview(team, &[tam, quest], &[]).await;
        assert_eq!(plan.classifications.len(), 2);
        assert_eq!(plan.relationships.len(), 1);
        assert_eq!(plan.totals.classifications_created, 2);
        assert!(matches!(previews.get_plan(plan.id), PlanLookup::Found(_)));

        let run = previews.commit_plan(plan.id, Uuid::new_v4()).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.totals, Some(plan.totals));
        assert_eq!(previews.get_plan(plan.id), PlanLookup::NotFound);

        let err = previews.commit_plan(plan.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_expired_plan_is_not_found() {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new());
        let previews = service(&store, clock.clone());

        let plan = previews.preview(Uuid::new_v4(), &[note("A", "b")], &[]).await;
        clock.advance(Duration::from_secs(61));

        assert_eq!(previews.get_plan(plan.id), PlanLookup::NotFound);
        assert!(previews.commit_plan(plan.id, Uuid::new_v4()).await.is_err());
    }
}
