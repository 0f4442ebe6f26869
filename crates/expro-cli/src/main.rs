use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use expro_places::{PlacesClient, PlacesConfig};
use expro_store::ReviewStore;
use expro_sync::{CycleOutcome, ReviewSync, ReviewSyncScheduler, SyncConfig};
use expro_web::{AppState, LogNotifier};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "expro")]
#[command(about = "Expertise Pro site server and review sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the site; starts the review scheduler when enabled.
    Serve,
    /// Run one review sync cycle and exit.
    Sync,
    /// Create the database schema and exit.
    Migrate,
}

fn database_url() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:expro.db?mode=rwc".to_string())
}

fn web_port() -> u16 {
    std::env::var("EXPRO_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let store = ReviewStore::connect(&database_url()).await?;
            let sync_config = SyncConfig::from_env();

            let _scheduler = if sync_config.scheduler_enabled {
                let source = PlacesClient::new(PlacesConfig::from_env())?;
                let sync = Arc::new(ReviewSync::new(
                    store.clone(),
                    Arc::new(source),
                    sync_config.retention,
                ));
                let scheduler = ReviewSyncScheduler::start(sync, &sync_config.cron).await?;
                info!(cron = %sync_config.cron, "review sync scheduler started");
                Some(scheduler)
            } else {
                None
            };

            expro_web::serve(AppState::new(store, Arc::new(LogNotifier)), web_port()).await?;
        }
        Commands::Sync => {
            let store = ReviewStore::connect(&database_url()).await?;
            let sync_config = SyncConfig::from_env();
            let source = PlacesClient::new(PlacesConfig::from_env())?;
            let sync = ReviewSync::new(store, Arc::new(source), sync_config.retention);
            match sync.run_cycle().await? {
                CycleOutcome::Completed(summary) => println!(
                    "sync complete: run_id={} fetched={} inserted={} pruned={}",
                    summary.run_id, summary.fetched, summary.inserted, summary.pruned
                ),
                CycleOutcome::Skipped => println!("sync skipped: another cycle in flight"),
            }
        }
        Commands::Migrate => {
            ReviewStore::connect(&database_url()).await?;
            println!("schema ready at {}", database_url());
        }
    }

    Ok(())
}
