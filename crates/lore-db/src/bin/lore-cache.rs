//! lore-cache: administrative tool for the AI enrichment cache.
//!
//! Usage:
//!   lore-cache stats [--json]
//!   lore-cache prune
//!   lore-cache invalidate-version classification 1.2.0
//!   lore-cache invalidate-team 018f2c1e-...

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lore_db::{CacheStats, Database, EnrichmentCache, PoolConfig};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "lore-cache")]
#[command(author, version, about = "Inspect and maintain the lorekeep AI cache")]
#[command(propagate_version = true)]
struct Cli {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show entry counts, hits and expiry information
    Stats {
        /// Print as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Delete every expired entry
    Prune,

    /// Delete all entries for an operation type at one algorithm version
    InvalidateVersion {
        /// Operation type (classification or relationship)
        operation: String,

        /// Algorithm version to remove
        version: String,
    },

    /// Delete all entries belonging to a team
    InvalidateTeam {
        /// Team id
        team_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let url = cli
        .database_url
        .context("no database URL: pass --database-url or set DATABASE_URL")?;
    let db = Database::connect_with_config(&url, PoolConfig::from_env().max_connections(2))
        .await
        .context("failed to connect to database")?;
    let cache = EnrichmentCache::new(db.repositories().cache);

    match cli.command {
        Commands::Stats { json } => {
            let stats = cache.stats().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
        Commands::Prune => {
            let removed = cache.prune_expired().await?;
            println!("Pruned {} expired entries", removed);
        }
        Commands::InvalidateVersion { operation, version } => {
            let removed = cache.invalidate_version(&operation, &version).await?;
            println!(
                "Removed {} {} entries at version {}",
                removed,
                operation.trim().to_lowercase(),
                version
            );
        }
        Commands::InvalidateTeam { team_id } => {
            let removed = cache.invalidate_team(team_id).await?;
            println!("Removed {} entries for team {}", removed, team_id);
        }
    }

    Ok(())
}

fn print_stats(stats: &CacheStats) {
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };

    println!("Total entries:   {}", stats.total_entries);
    println!("Total hits:      {}", stats.total_hits);
    println!(
        "Expiring soon:   {} (within {} days)",
        stats.expiring_soon,
        lore_db::defaults::CACHE_EXPIRING_SOON_DAYS
    );
    println!("Oldest entry:    {}", fmt_time(stats.oldest_entry));
    println!("Newest entry:    {}", fmt_time(stats.newest_entry));

    if !stats.by_type.is_empty() {
        println!();
        println!("{:<16} {:>10} {:>10}", "TYPE", "ENTRIES", "HITS");
        for row in &stats.by_type {
            println!("{:<16} {:>10} {:>10}", row.cache_type, row.entries, row.hits);
        }
    }
}
