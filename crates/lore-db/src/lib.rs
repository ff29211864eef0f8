//! # lore-db
//!
//! Persistence layer for the lorekeep enrichment pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for imported notes, enrichment runs, review
//!   records and AI cache entries
//! - In-memory implementations of every repository trait
//! - Cache key derivation and the [`EnrichmentCache`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use lore_db::{Database, EnrichmentCache};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/lorekeep").await?;
//!     db.migrate().await?;
//!
//!     let cache = EnrichmentCache::new(db.repositories().cache);
//!     println!("{} cached entries", cache.stats().await?.total_entries);
//!     Ok(())
//! }
//! ```

pub mod ai_cache;
pub mod cache_keys;
pub mod enrichment_cache;
pub mod memory;
pub mod notes;
pub mod pool;
pub mod review;
pub mod runs;

// Always compiled so integration tests (in tests/) can share the URL.
pub mod test_fixtures;

use std::sync::Arc;

// Re-export core types
pub use lore_core::*;

pub use ai_cache::PgCacheRepository;
pub use cache_keys::{content_hash, context_hash, normalize, pair_hash};
pub use enrichment_cache::{EnrichmentCache, NoteRef};
pub use memory::{
    MemoryCacheRepository, MemoryClassificationRepository, MemoryNoteRepository,
    MemoryRelationshipRepository, MemoryRunRepository, MemoryStore,
};
pub use notes::PgNoteRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use review::{PgClassificationRepository, PgRelationshipRepository};
pub use runs::PgEnrichmentRunRepository;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Every repository the enrichment pipeline needs, as trait objects.
///
/// Built from either [`Database`] or [`MemoryStore`].
#[derive(Clone)]
pub struct Repositories {
    pub notes: Arc<dyn NoteRepository>,
    pub runs: Arc<dyn EnrichmentRunRepository>,
    pub classifications: Arc<dyn ClassificationRepository>,
    pub relationships: Arc<dyn RelationshipRepository>,
    pub cache: Arc<dyn CacheRepository>,
}

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub notes: PgNoteRepository,
    pub runs: PgEnrichmentRunRepository,
    pub classifications: PgClassificationRepository,
    pub relationships: PgRelationshipRepository,
    pub cache: PgCacheRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            notes: PgNoteRepository::new(pool.clone()),
            runs: PgEnrichmentRunRepository::new(pool.clone()),
            classifications: PgClassificationRepository::new(pool.clone()),
            relationships: PgRelationshipRepository::new(pool.clone()),
            cache: PgCacheRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(e.into()))
    }

    pub fn repositories(&self) -> Repositories {
        Repositories {
            notes: Arc::new(self.notes.clone()),
            runs: Arc::new(self.runs.clone()),
            classifications: Arc::new(self.classifications.clone()),
            relationships: Arc::new(self.relationships.clone()),
            cache: Arc::new(self.cache.clone()),
        }
    }
}
