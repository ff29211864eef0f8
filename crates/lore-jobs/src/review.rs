//! Review actions on persisted classification and relationship records.
//!
//! Reviewers only ever change `status`; results themselves are written by
//! the worker or a committed preview.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use lore_core::{
    confidence, ClassificationRepository, ClassificationWithTitle, Error, NoteRepository,
    RelationshipRepository, RelationshipWithTitles, Result, ReviewStatus,
};
use lore_db::Repositories;

/// Which pending records a bulk approval covers.
///
/// Either an explicit id list, or every pending record of the run at or
/// above `threshold` when `approve_high_confidence` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkApproveRequest {
    #[serde(default)]
    pub ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub approve_high_confidence: bool,
    #[serde(default)]
    pub threshold: Option<f32>,
}

impl BulkApproveRequest {
    pub fn ids(ids: Vec<Uuid>) -> Self {
        Self {
            ids: Some(ids),
            ..Default::default()
        }
    }

    pub fn high_confidence(threshold: Option<f32>) -> Self {
        Self {
            approve_high_confidence: true,
            threshold,
            ..Default::default()
        }
    }
}

enum Selection {
    Ids(Vec<Uuid>),
    AtLeast(f32),
}

impl Selection {
    fn from_request(request: &BulkApproveRequest) -> Result<Self> {
        if let Some(ids) = &request.ids {
            return Ok(Self::Ids(ids.clone()));
        }
        if !request.approve_high_confidence {
            return Err(Error::InvalidInput(
                "bulk approval needs ids or approve_high_confidence".into(),
            ));
        }
        let threshold = request.threshold.unwrap_or(confidence::HIGH);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(Error::InvalidInput(format!(
                "threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        Ok(Self::AtLeast(threshold))
    }

    fn covers(&self, id: Uuid, confidence: f32) -> bool {
        match self {
            Self::Ids(ids) => ids.contains(&id),
            Self::AtLeast(threshold) => confidence >= *threshold,
        }
    }
}

#[derive(Clone)]
pub struct ReviewService {
    notes: Arc<dyn NoteRepository>,
    classifications: Arc<dyn ClassificationRepository>,
    relationships: Arc<dyn RelationshipRepository>,
}

impl ReviewService {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            notes: repos.notes.clone(),
            classifications: repos.classifications.clone(),
            relationships: repos.relationships.clone(),
        }
    }

    async fn titles(&self, ids: Vec<Uuid>) -> Result<HashMap<Uuid, String>> {
        let mut ids = ids;
        ids.sort();
        ids.dedup();
        self.notes.titles(&ids).await
    }

    pub async fn list_classifications(
        &self,
        enrichment_run_id: Uuid,
    ) -> Result<Vec<ClassificationWithTitle>> {
        let records = self.classifications.list_for_run(enrichment_run_id).await?;
        let titles = self
            .titles(records.iter().map(|r| r.note_id).collect())
            .await?;
        Ok(records
            .into_iter()
            .map(|record| ClassificationWithTitle {
                note_title: titles.get(&record.note_id).cloned().unwrap_or_default(),
                record,
            })
            .collect())
    }

    pub async fn list_relationships(
        &self,
        enrichment_run_id: Uuid,
    ) -> Result<Vec<RelationshipWithTitles>> {
        let records = self.relationships.list_for_run(enrichment_run_id).await?;
        let titles = self
            .titles(
                records
                    .iter()
                    .flat_map(|r| [r.from_note_id, r.to_note_id])
                    .collect(),
            )
            .await?;
        Ok(records
            .into_iter()
            .map(|record| RelationshipWithTitles {
                from_title: titles.get(&record.from_note_id).cloned().unwrap_or_default(),
                to_title: titles.get(&record.to_note_id).cloned().unwrap_or_default(),
                record,
            })
            .collect())
    }

    #[instrument(skip(self), fields(subsystem = "jobs", component = "review", op = "set_classification_status"))]
    pub async fn set_classification_status(
        &self,
        id: Uuid,
        status: ReviewStatus,
        actor: &str,
    ) -> Result<()> {
        let record = self
            .classifications
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("classification {}", id)))?;
        check_transition(record.status, status)?;
        if !self.classifications.update_status(id, status, actor).await? {
            return Err(Error::InvalidInput(format!(
                "classification {} is no longer pending",
                id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(subsystem = "jobs", component = "review", op = "set_relationship_status"))]
    pub async fn set_relationship_status(
        &self,
        id: Uuid,
        status: ReviewStatus,
        actor: &str,
    ) -> Result<()> {
        let record = self
            .relationships
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("relationship {}", id)))?;
        check_transition(record.status, status)?;
        if !self.relationships.update_status(id, status, actor).await? {
            return Err(Error::InvalidInput(format!(
                "relationship {} is no longer pending",
                id
            )));
        }
        Ok(())
    }

    /// Approve pending classifications of a run. Returns how many changed.
    #[instrument(skip(self, request), fields(subsystem = "jobs", component = "review", op = "bulk_approve_classifications"))]
    pub async fn bulk_approve_classifications(
        &self,
        enrichment_run_id: Uuid,
        request: &BulkApproveRequest,
        actor: &str,
    ) -> Result<u64> {
        let selection = Selection::from_request(request)?;
        let mut approved = 0;
        for record in self.classifications.list_for_run(enrichment_run_id).await? {
            if record.status != ReviewStatus::Pending
                || !selection.covers(record.id, record.confidence)
            {
                continue;
            }
            if self
                .classifications
                .update_status(record.id, ReviewStatus::Approved, actor)
                .await?
            {
                approved += 1;
            }
        }
        info!(approved, "Classifications bulk approved");
        Ok(approved)
    }

    /// Approve pending relationships of a run. Returns how many changed.
    #[instrument(skip(self, request), fields(subsystem = "jobs", component = "review", op = "bulk_approve_relationships"))]
    pub async fn bulk_approve_relationships(
        &self,
        enrichment_run_id: Uuid,
        request: &BulkApproveRequest,
        actor: &str,
    ) -> Result<u64> {
        let selection = Selection::from_request(request)?;
        let mut approved = 0;
        for record in self.relationships.list_for_run(enrichment_run_id).await? {
            if record.status != ReviewStatus::Pending
                || !selection.covers(record.id, record.confidence)
            {
                continue;
            }
            if self
                .relationships
                .update_status(record.id, ReviewStatus::Approved, actor)
                .await?
            {
                approved += 1;
            }
        }
        info!(approved, "Relationships bulk approved");
        Ok(approved)
    }
}

fn check_transition(current: ReviewStatus, next: ReviewStatus) -> Result<()> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "cannot move review status from {} to {}",
            current, next
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lore_core::{ClassificationResult, InferredType};
    use lore_db::{test_fixtures::ImportBuilder, MemoryStore};

    async fn seeded() -> (MemoryStore, ReviewService, Uuid, Vec<Uuid>) {
        let store = MemoryStore::new();
        let mut import = ImportBuilder::new(Uuid::new_v4());
        let notes: Vec<Uuid> = ["Tam", "Mill", "Crown"]
            .iter()
            .map(|t| import.note(t, ""))
            .collect();
        store.notes.insert_all(import.build());

        let run_id = Uuid::new_v4();
        let mut ids = Vec::new();
        for (note_id, conf) in notes.iter().zip([0.95, 0.81, 0.4]) {
            let result = ClassificationResult::new(*note_id, InferredType::Npc, conf, "");
            let record = store
                .repositories()
                .classifications
                .create(run_id, &result)
                .await
                .unwrap();
            ids.push(record.id);
        }
        let service = ReviewService::new(&store.repositories());
        (store, service, run_id, ids)
    }

    #[tokio::test]
    async fn test_list_joins_titles() {
        let (_, service, run_id, _) = seeded().await;
        let listed = service.list_classifications(run_id).await.unwrap();
        let titles: Vec<_> = listed.iter().map(|c| c.note_title.as_str()).collect();
        assert_eq!(titles, vec!["Tam", "Mill", "Crown"]);
    }

    #[tokio::test]
    async fn test_status_transitions_out_of_pending_only() {
        let (_, service, _, ids) = seeded().await;
        service
            .set_classification_status(ids[0], ReviewStatus::Rejected, "gm")
            .await
            .unwrap();

        let again = service
            .set_classification_status(ids[0], ReviewStatus::Approved, "gm")
            .await;
        assert!(matches!(again, Err(Error::InvalidInput(_))));

        let back = service
            .set_classification_status(ids[1], ReviewStatus::Pending, "gm")
            .await;
        assert!(matches!(back, Err(Error::InvalidInput(_))));

        let missing = service
            .set_classification_status(Uuid::new_v4(), ReviewStatus::Approved, "gm")
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_bulk_approve_default_threshold() {
        let (_, service, run_id, _) = seeded().await;
        let approved = service
            .bulk_approve_classifications(run_id, &BulkApproveRequest::high_confidence(None), "gm")
            .await
            .unwrap();
        assert_eq!(approved, 2);

        // Already-approved records are not counted twice.
        let again = service
            .bulk_approve_classifications(run_id, &BulkApproveRequest::high_confidence(Some(0.0)), "gm")
            .await
            .unwrap();
        assert_eq!(again, 1);
    }

    #[tokio::test]
    async fn test_bulk_approve_by_ids() {
        let (_, service, run_id, ids) = seeded().await;
        let approved = service
            .bulk_approve_classifications(run_id, &BulkApproveRequest::ids(vec![ids[2]]), "gm")
            .await
            .unwrap();
        assert_eq!(approved, 1);
    }

    #[tokio::test]
    async fn test_bulk_approve_rejects_bad_threshold() {
        let (_, service, run_id, _) = seeded().await;
        for threshold in [f32::NAN, -0.1, 1.5] {
            let err = service
                .bulk_approve_classifications(
                    run_id,
                    &BulkApproveRequest::high_confidence(Some(threshold)),
                    "gm",
                )
                .await
                .unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)));
        }

        let empty = service
            .bulk_approve_relationships(run_id, &BulkApproveRequest::default(), "gm")
            .await;
        assert!(matches!(empty, Err(Error::InvalidInput(_))));
    }
}
