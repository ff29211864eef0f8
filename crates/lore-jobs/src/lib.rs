//! # lore-jobs
//!
//! Enrichment orchestration for lorekeep.
//!
//! This crate provides:
//! - A single-flight, FIFO enrichment worker with progress tracking and
//!   event broadcasting
//! - The per-run pipeline: classify through the cache, resolve links,
//!   extract relationships, persist review records
//! - A synchronous preview path with bounded-retention plans
//! - Review and bulk-approval actions
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use lore_db::{EnrichmentCache, MemoryStore};
//! use lore_inference::MockProvider;
//! use lore_jobs::{CachedClassifier, EnrichmentPipeline, EnrichmentService, EnrichmentWorker, WorkerConfig};
//!
//! let store = MemoryStore::new();
//! let repos = store.repositories();
//! let classifier = CachedClassifier::new(
//!     Arc::new(MockProvider::new()),
//!     EnrichmentCache::new(repos.cache.clone()),
//! );
//! let worker = EnrichmentWorker::new(
//!     EnrichmentPipeline::new(repos.clone(), classifier),
//!     WorkerConfig::from_env(),
//! )
//! .start();
//!
//! let service = EnrichmentService::new(repos.runs.clone(), worker.clone());
//! let run_id = service.enqueue(import_run_id, team_id, Default::default()).await?;
//!
//! let mut events = worker.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//! ```

pub mod cached;
pub mod links;
pub mod pipeline;
pub mod preview;
pub mod progress;
pub mod review;
pub mod service;
pub mod worker;

// Re-export core types
pub use lore_core::*;

pub use cached::CachedClassifier;
pub use links::{inferred_type_for, is_pre_classified, LinkIndex, PRE_CLASSIFIED_TYPES};
pub use pipeline::{EnrichmentJob, EnrichmentPipeline, PhaseProgress};
pub use preview::{EnrichmentPlan, PlanLookup, PreviewService};
pub use progress::{ProgressLookup, ProgressTracker, RunPhase, RunProgress};
pub use review::{BulkApproveRequest, ReviewService};
pub use service::EnrichmentService;
pub use worker::{EnrichmentWorker, WorkerConfig, WorkerEvent, WorkerHandle, WorkerState};
