//! The per-run enrichment algorithm: classify, then relate, then persist.
//!
//! Provider calls never fail here. Anything else that fails (loading notes,
//! writing review records) propagates to the worker, which fails the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use lore_core::{
    ClassificationResult, ConfidenceTally, EnrichmentOptions, EnrichmentTotals, ImportNote,
    NoteForClassification, NoteWithClassification, RelationshipResult, Result,
};
use lore_db::Repositories;
use lore_inference::{ClassifyOptions, ProgressCallback, ProgressUpdate};

use crate::cached::CachedClassifier;
use crate::links::{inferred_type_for, is_pre_classified, LinkIndex};
use crate::progress::RunPhase;

/// Receives provider progress tagged with the pipeline phase.
pub type PhaseProgress = dyn Fn(RunPhase, ProgressUpdate) + Send + Sync;

/// One queued enrichment run.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentJob {
    pub run_id: Uuid,
    pub import_run_id: Uuid,
    pub team_id: Uuid,
    pub options: EnrichmentOptions,
}

/// Classification inputs for an import. Notes whose importer type is already
/// an entity category are left out unless `override_existing_types` is set.
pub fn classification_inputs(
    notes: &[ImportNote],
    options: &EnrichmentOptions,
) -> Vec<NoteForClassification> {
    let index = LinkIndex::new(notes);
    notes
        .iter()
        .filter(|n| options.override_existing_types || !is_pre_classified(n.note_type.as_deref()))
        .map(|n| NoteForClassification {
            id: n.id,
            title: n.title.clone(),
            content: n.content.clone(),
            current_type: n.note_type.clone(),
            existing_link_titles: index
                .resolve_links(n)
                .iter()
                .filter_map(|l| index.title(l.target_note_id).map(str::to_string))
                .collect(),
        })
        .collect()
}

/// Relationship inputs for every note in the import, typed from this run's
/// classifications where available and from the importer type otherwise.
pub fn relationship_inputs(
    notes: &[ImportNote],
    classifications: &[ClassificationResult],
) -> Vec<NoteWithClassification> {
    let index = LinkIndex::new(notes);
    let inferred: HashMap<Uuid, _> = classifications
        .iter()
        .map(|c| (c.note_id, c.inferred_type))
        .collect();
    notes
        .iter()
        .map(|n| NoteWithClassification {
            id: n.id,
            title: n.title.clone(),
            content: n.content.clone(),
            inferred_type: inferred
                .get(&n.id)
                .copied()
                .unwrap_or_else(|| inferred_type_for(n.note_type.as_deref())),
            links: index.resolve_links(n),
        })
        .collect()
}

/// Relationships whose endpoints are both in the import.
pub fn known_endpoints(
    notes: &[ImportNote],
    relationships: Vec<RelationshipResult>,
) -> Vec<RelationshipResult> {
    let index = LinkIndex::new(notes);
    let before = relationships.len();
    let kept: Vec<_> = relationships
        .into_iter()
        .filter(|r| {
            r.from_note_id != r.to_note_id
                && index.contains(r.from_note_id)
                && index.contains(r.to_note_id)
        })
        .collect();
    if kept.len() < before {
        debug!(dropped = before - kept.len(), "Dropped relationships with unknown endpoints");
    }
    kept
}

/// Totals for a set of results, bucketed by the shared thresholds.
pub fn tally(
    notes_processed: usize,
    classifications: &[ClassificationResult],
    relationships: &[RelationshipResult],
) -> EnrichmentTotals {
    let mut counts = ConfidenceTally::default();
    counts.record_all(classifications.iter().map(|c| c.confidence));
    counts.record_all(relationships.iter().map(|r| r.confidence));
    EnrichmentTotals {
        notes_processed: notes_processed as i32,
        classifications_created: classifications.len() as i32,
        relationships_found: relationships.len() as i32,
        high_confidence_count: counts.high,
        low_confidence_count: counts.low,
        user_review_required: counts.review_required,
    }
}

#[derive(Clone)]
pub struct EnrichmentPipeline {
    repos: Repositories,
    classifier: CachedClassifier,
}

impl EnrichmentPipeline {
    pub fn new(repos: Repositories, classifier: CachedClassifier) -> Self {
        Self { repos, classifier }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    /// Enrich the notes of an already-running job and return its totals.
    #[instrument(skip(self, job, on_progress), fields(subsystem = "jobs", component = "pipeline", op = "process", run_id = %job.run_id, import_run_id = %job.import_run_id))]
    pub async fn process(
        &self,
        job: &EnrichmentJob,
        on_progress: Arc<PhaseProgress>,
    ) -> Result<EnrichmentTotals> {
        let start = Instant::now();
        let run_id = job.run_id;

        let notes = self.repos.notes.list_for_import(job.import_run_id).await?;
        if notes.is_empty() {
            info!("Import has no notes, nothing to enrich");
            return Ok(EnrichmentTotals::default());
        }

        let inputs = classification_inputs(&notes, &job.options);
        let options = ClassifyOptions {
            player_character_names: job.options.player_character_names.clone(),
        };
        let on_classify = {
            let report = on_progress.clone();
            move |u: ProgressUpdate| report(RunPhase::Classifying, u)
        };
        let classifications = self
            .classifier
            .classify(&inputs, job.team_id, &options, Some(&on_classify as &ProgressCallback))
            .await;

        for result in &classifications {
            self.repos.classifications.create(run_id, result).await?;
        }

        let related_inputs = relationship_inputs(&notes, &classifications);
        let on_relate = move |u: ProgressUpdate| on_progress(RunPhase::Relating, u);
        let relationships = self
            .classifier
            .relate(&related_inputs, job.team_id, Some(&on_relate as &ProgressCallback))
            .await;
        let relationships = known_endpoints(&notes, relationships);

        for result in &relationships {
            self.repos.relationships.create(run_id, result).await?;
        }

        let totals = tally(notes.len(), &classifications, &relationships);
        info!(
            notes_processed = totals.notes_processed,
            classifications_created = totals.classifications_created,
            relationships_found = totals.relationships_found,
            user_review_required = totals.user_review_required,
            duration_ms = start.elapsed().as_millis() as u64,
            "Enrichment pipeline finished"
        );
        Ok(totals)
    }
}
