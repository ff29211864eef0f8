//! Enqueue API for enrichment runs.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use lore_core::{EnrichmentOptions, EnrichmentRun, EnrichmentRunRepository, Error, Result};

use crate::pipeline::EnrichmentJob;
use crate::progress::ProgressLookup;
use crate::worker::WorkerHandle;

#[derive(Clone)]
pub struct EnrichmentService {
    runs: Arc<dyn EnrichmentRunRepository>,
    worker: WorkerHandle,
}

impl EnrichmentService {
    pub fn new(runs: Arc<dyn EnrichmentRunRepository>, worker: WorkerHandle) -> Self {
        Self { runs, worker }
    }

    /// Create a pending run for the import and queue it. Returns the run id.
    ///
    /// If the worker cannot accept the job, the run is marked failed and
    /// the error is returned.
    #[instrument(skip(self, options), fields(subsystem = "jobs", component = "enrichment_service", op = "enqueue", import_run_id = %import_run_id, team_id = %team_id))]
    pub async fn enqueue(
        &self,
        import_run_id: Uuid,
        team_id: Uuid,
        options: EnrichmentOptions,
    ) -> Result<Uuid> {
        let run = self.runs.create(import_run_id, team_id).await?;
        let job = EnrichmentJob {
            run_id: run.id,
            import_run_id,
            team_id,
            options,
        };

        if let Err(e) = self.worker.enqueue(job).await {
            if let Err(fail_err) = self.runs.fail(run.id, &e.to_string()).await {
                warn!(run_id = %run.id, error = %fail_err, "Failed to mark unqueued run as failed");
            }
            return Err(e);
        }

        info!(run_id = %run.id, "Enrichment run queued");
        Ok(run.id)
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<EnrichmentRun> {
        self.runs
            .get(run_id)
            .await?
            .ok_or(Error::RunNotFound(run_id))
    }

    pub fn progress(&self, run_id: Uuid) -> ProgressLookup {
        self.worker.progress(run_id)
    }

    pub fn worker(&self) -> &WorkerHandle {
        &self.worker
    }
}
