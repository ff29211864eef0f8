//! Single-flight enrichment worker.
//!
//! Jobs are pushed onto a bounded FIFO channel and consumed by one task, so
//! at most one run is in flight and runs execute in enqueue order. The
//! consumer owns the [`WorkerState`] and publishes it through a `watch`
//! channel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use lore_core::{
    defaults, Clock, EnrichmentRunRepository, EnrichmentTotals, Error, Result, RunStatus,
    SystemClock,
};
use lore_inference::ProgressUpdate;

use crate::pipeline::{EnrichmentJob, EnrichmentPipeline, PhaseProgress};
use crate::progress::{ProgressLookup, ProgressTracker, RunPhase, RunProgress};

/// Configuration for the enrichment worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs that may wait in the channel before `enqueue` applies backpressure.
    pub queue_capacity: usize,
    /// How long run progress stays queryable after its last update.
    pub progress_retention: Duration,
    /// Whether to process jobs at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::WORKER_QUEUE_CAPACITY,
            progress_retention: Duration::from_secs(defaults::PROGRESS_RETENTION_SECS),
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `LORE_WORKER_ENABLED` | `true` | Enable/disable enrichment processing |
    /// | `LORE_WORKER_QUEUE_CAPACITY` | `64` | Queued jobs before enqueue waits |
    /// | `LORE_PROGRESS_RETENTION_SECS` | `3600` | Progress retention after last update |
    pub fn from_env() -> Self {
        let enabled = std::env::var("LORE_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let queue_capacity = std::env::var("LORE_WORKER_QUEUE_CAPACITY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::WORKER_QUEUE_CAPACITY)
            .max(1);

        let retention_secs = std::env::var("LORE_PROGRESS_RETENTION_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::PROGRESS_RETENTION_SECS);

        Self {
            queue_capacity,
            progress_retention: Duration::from_secs(retention_secs),
            enabled,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_progress_retention(mut self, retention: Duration) -> Self {
        self.progress_retention = retention;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the enrichment worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    WorkerStarted,
    RunStarted {
        run_id: Uuid,
        import_run_id: Uuid,
    },
    RunProgress {
        run_id: Uuid,
        phase: RunPhase,
        current: usize,
        total: usize,
    },
    RunCompleted {
        run_id: Uuid,
        totals: EnrichmentTotals,
    },
    RunFailed {
        run_id: Uuid,
        error: String,
    },
    WorkerStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "run_id", rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Busy(Uuid),
    Stopped,
}

/// Handle for feeding and observing a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    job_tx: mpsc::Sender<EnrichmentJob>,
    shutdown_tx: mpsc::Sender<()>,
    event_tx: broadcast::Sender<WorkerEvent>,
    state_rx: watch::Receiver<WorkerState>,
    progress: ProgressTracker,
}

impl WorkerHandle {
    /// Queue a job behind every job already queued.
    pub async fn enqueue(&self, job: EnrichmentJob) -> Result<()> {
        let run_id = job.run_id;
        // Recorded first so the consumer's own updates are never overwritten.
        self.progress.update(RunProgress::queued(run_id));
        if self.job_tx.send(job).await.is_err() {
            self.progress.forget(run_id);
            return Err(Error::Internal("Enrichment worker is not running".into()));
        }
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }

    pub fn progress(&self, run_id: Uuid) -> ProgressLookup {
        self.progress.lookup(run_id)
    }

    /// Signal the worker to stop once the current run, if any, finishes.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Wait until the worker has stopped.
    pub async fn stopped(&self) {
        let mut rx = self.state_rx.clone();
        // A dropped sender means the consumer task is gone.
        let _ = rx.wait_for(|s| *s == WorkerState::Stopped).await;
    }
}

pub struct EnrichmentWorker {
    pipeline: EnrichmentPipeline,
    runs: Arc<dyn EnrichmentRunRepository>,
    config: WorkerConfig,
    progress: ProgressTracker,
    event_tx: broadcast::Sender<WorkerEvent>,
    state_tx: watch::Sender<WorkerState>,
}

impl EnrichmentWorker {
    pub fn new(pipeline: EnrichmentPipeline, config: WorkerConfig) -> Self {
        Self::with_clock(pipeline, config, Arc::new(SystemClock))
    }

    /// Use `clock` for progress retention.
    pub fn with_clock(
        pipeline: EnrichmentPipeline,
        config: WorkerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::WORKER_EVENT_CAPACITY);
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        Self {
            runs: pipeline.repositories().runs.clone(),
            progress: ProgressTracker::new(config.progress_retention, clock),
            pipeline,
            config,
            event_tx,
            state_tx,
        }
    }

    /// Start the consumer task and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (job_tx, job_rx) = mpsc::channel(self.config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = WorkerHandle {
            job_tx,
            shutdown_tx,
            event_tx: self.event_tx.clone(),
            state_rx: self.state_tx.subscribe(),
            progress: self.progress.clone(),
        };

        tokio::spawn(self.run(job_rx, shutdown_rx));
        handle
    }

    #[instrument(skip_all, fields(subsystem = "jobs", component = "worker"))]
    async fn run(
        self,
        mut jobs: mpsc::Receiver<EnrichmentJob>,
        mut shutdown: mpsc::Receiver<()>,
    ) {
        if !self.config.enabled {
            info!("Enrichment worker is disabled, not starting");
            drop(jobs);
            self.state_tx.send_replace(WorkerState::Stopped);
            return;
        }

        info!(
            queue_capacity = self.config.queue_capacity,
            "Enrichment worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Enrichment worker received shutdown signal");
                    break;
                }
                job = jobs.recv() => match job {
                    Some(job) => self.execute(job).await,
                    None => break,
                },
            }
        }

        // Close the queue before announcing the stop so later enqueues fail.
        drop(jobs);
        self.state_tx.send_replace(WorkerState::Stopped);
        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Enrichment worker stopped");
    }

    fn reporter(&self, run_id: Uuid) -> Arc<PhaseProgress> {
        let progress = self.progress.clone();
        let events = self.event_tx.clone();
        Arc::new(move |phase: RunPhase, update: ProgressUpdate| {
            progress.advance(run_id, phase, update.current, update.total, update.label);
            let _ = events.send(WorkerEvent::RunProgress {
                run_id,
                phase,
                current: update.current,
                total: update.total,
            });
        })
    }

    /// Run one job to a terminal state. This is the only place a run is
    /// marked failed.
    async fn execute(&self, job: EnrichmentJob) {
        let start = Instant::now();
        let run_id = job.run_id;
        self.state_tx.send_replace(WorkerState::Busy(run_id));
        let _ = self.event_tx.send(WorkerEvent::RunStarted {
            run_id,
            import_run_id: job.import_run_id,
        });
        info!(%run_id, import_run_id = %job.import_run_id, "Processing enrichment run");

        let pipeline = self.pipeline.clone();
        let runs = self.runs.clone();
        let reporter = self.reporter(run_id);
        let task = tokio::spawn(async move {
            runs.mark_running(job.run_id).await?;
            let totals = pipeline.process(&job, reporter).await?;
            runs.complete(job.run_id, &totals).await?;
            Ok::<_, Error>(totals)
        });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::Internal(format!("Enrichment task aborted: {}", e))),
        };

        match outcome {
            Ok(totals) => {
                self.progress.finish(run_id, RunStatus::Completed);
                info!(
                    %run_id,
                    notes_processed = totals.notes_processed,
                    user_review_required = totals.user_review_required,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Enrichment run completed"
                );
                let _ = self
                    .event_tx
                    .send(WorkerEvent::RunCompleted { run_id, totals });
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(fail_err) = self.runs.fail(run_id, &message).await {
                    warn!(%run_id, error = %fail_err, "Failed to mark enrichment run as failed");
                }
                self.progress.finish(run_id, RunStatus::Failed);
                error!(
                    %run_id,
                    error = %message,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Enrichment run failed"
                );
                let _ = self.event_tx.send(WorkerEvent::RunFailed {
                    run_id,
                    error: message,
                });
            }
        }

        self.progress.sweep();
        self.state_tx.send_replace(WorkerState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.queue_capacity, defaults::WORKER_QUEUE_CAPACITY);
        assert_eq!(config.progress_retention, Duration::from_secs(3600));
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_queue_capacity(0)
            .with_progress_retention(Duration::from_secs(5))
            .with_enabled(false);

        assert_eq!(config.queue_capacity, 1);
        assert_eq!(config.progress_retention, Duration::from_secs(5));
        assert!(!config.enabled);
    }

    #[test]
    fn test_worker_state_serializes_with_run_id() {
        let id = Uuid::nil();
        let json = serde_json::to_value(WorkerState::Busy(id)).unwrap();
        assert_eq!(json["state"], "busy");
        assert_eq!(json["run_id"], id.to_string());
        let idle = serde_json::to_value(WorkerState::Idle).unwrap();
        assert_eq!(idle["state"], "idle");
    }
}
