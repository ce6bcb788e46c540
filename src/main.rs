//! sleek-sync: command-line host for the offline mutation queue
//!
//! Queues check-ins and nutrition edits locally and flushes them to the
//! Sleek Coach API, either on demand (`sync`) or continuously (`run`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sleek_sync::{
    BroadcastInvalidator, CheckinPayload, Config, Domain, FileKvStore, HttpConnectivityProbe,
    HttpMutationClient, KeyValueStore, MemoryKvStore, NutritionDayPayload, OrchestratorSettings,
    PassOutcome, PendingMutationStore, SqliteKvStore, StorageBackend, StoreOptions,
    SyncOrchestrator,
};

const MAX_NOTES_LEN: usize = 2000;

#[derive(Parser)]
#[command(name = "sleek-sync")]
#[command(about = "Offline mutation queue and sync for Sleek Coach")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "sleek-sync.toml")]
    config: String,

    /// Data directory (overrides config file)
    #[arg(short, long, env = "SLEEK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// API base URL (overrides config file)
    #[arg(long, env = "SLEEK_API_URL")]
    api_url: Option<String>,

    /// Bearer token for the API
    #[arg(long, env = "SLEEK_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Queue a body-metric check-in
    Checkin {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, value_parser = parse_weight)]
        weight_kg: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        energy: Option<u8>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        sleep: Option<u8>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
        mood: Option<u8>,
    },
    /// Queue the nutrition totals for a day
    Nutrition {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=50000))]
        calories: Option<u32>,
        #[arg(long, value_parser = parse_protein)]
        protein_g: Option<f64>,
        #[arg(long, value_parser = parse_carbs)]
        carbs_g: Option<f64>,
        #[arg(long, value_parser = parse_fat)]
        fat_g: Option<f64>,
        #[arg(long, value_parser = parse_fiber)]
        fiber_g: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Show pending count, sync state and recent errors
    Status,
    /// List queued mutations
    List,
    /// Run one sync pass now
    Sync,
    /// Keep syncing whenever connectivity returns (Ctrl-C to stop)
    Run,
    /// List mutations that exhausted their attempts
    DeadLetters,
    /// Move a dead letter back into the queue
    Requeue { local_id: String },
    /// Permanently delete a dead letter
    Discard { local_id: String },
    /// Clear the sync error log
    ClearErrors,
}

fn parse_bounded(s: &str, min: f64, max: f64, what: &str) -> Result<f64, String> {
    let value: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if !(min..=max).contains(&value) {
        return Err(format!("{} must be between {} and {}", what, min, max));
    }
    Ok(value)
}

fn parse_weight(s: &str) -> Result<f64, String> {
    parse_bounded(s, 20.0, 500.0, "weight (kg)")
}

fn parse_protein(s: &str) -> Result<f64, String> {
    parse_bounded(s, 0.0, 2000.0, "protein (g)")
}

fn parse_carbs(s: &str) -> Result<f64, String> {
    parse_bounded(s, 0.0, 2000.0, "carbs (g)")
}

fn parse_fat(s: &str) -> Result<f64, String> {
    parse_bounded(s, 0.0, 1000.0, "fat (g)")
}

fn parse_fiber(s: &str) -> Result<f64, String> {
    parse_bounded(s, 0.0, 500.0, "fiber (g)")
}

fn check_notes(notes: &Option<String>) -> anyhow::Result<()> {
    if notes.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTES_LEN) {
        bail!("notes must be at most {} characters", MAX_NOTES_LEN);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sleek_sync=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(std::path::Path::new(&cli.config))
        .with_context(|| format!("loading config {}", cli.config))?;

    // Apply CLI overrides
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    if let Some(api_url) = cli.api_url {
        config.remote.base_url = api_url;
    }
    if cli.api_token.is_some() {
        config.remote.api_token = cli.api_token;
    }

    let kv = open_kv(&config).await?;
    let store = Arc::new(PendingMutationStore::load(kv, StoreOptions::from(&config.sync)).await?);

    match cli.command {
        Command::Checkin {
            date,
            weight_kg,
            notes,
            energy,
            sleep,
            mood,
        } => {
            check_notes(&notes)?;
            let payload = CheckinPayload {
                date,
                weight_kg,
                notes,
                energy_level: energy,
                sleep_quality: sleep,
                mood,
                client_updated_at: Some(Utc::now()),
            };
            let local_id = store.enqueue(payload).await?;
            println!("Queued check-in {} as {}", date, local_id);
        }

        Command::Nutrition {
            date,
            calories,
            protein_g,
            carbs_g,
            fat_g,
            fiber_g,
            notes,
        } => {
            check_notes(&notes)?;
            let payload = NutritionDayPayload {
                date,
                calories,
                protein_g,
                carbs_g,
                fat_g,
                fiber_g,
                notes,
            };
            let local_id = store.enqueue(payload).await?;
            println!("Queued nutrition day {} as {}", date, local_id);
        }

        Command::Status => {
            let status = store.status().await;
            let indicator = store.indicator();
            println!("Pending:      {}", indicator.pending_count);
            println!("Syncing:      {}", status.is_syncing);
            println!(
                "Last sync:    {}",
                status
                    .last_sync_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string())
            );
            println!("Dead letters: {}", indicator.dead_letter_count);
            if !status.sync_errors.is_empty() {
                println!("Errors:");
                for error in &status.sync_errors {
                    println!("  - {}", error);
                }
            }
        }

        Command::List => {
            for domain in Domain::ALL {
                let entries = store.list(domain).await;
                println!("{} ({})", domain, entries.len());
                for m in entries {
                    println!(
                        "  {}  {}  attempts={}  queued={}",
                        m.local_id,
                        m.payload.describe(),
                        m.attempts,
                        m.created_at.to_rfc3339()
                    );
                }
            }
        }

        Command::Sync => {
            let orchestrator = build_orchestrator(&config, store.clone())?.0;
            match orchestrator.run_pass_now().await {
                PassOutcome::Completed(report) => println!(
                    "Synced {} mutation(s), {} failed, {} dropped",
                    report.succeeded, report.failed, report.dropped
                ),
                PassOutcome::Skipped(reason) => println!("Nothing to do: {:?}", reason),
                PassOutcome::Aborted(message) => bail!("sync pass aborted: {}", message),
            }
        }

        Command::Run => {
            let (orchestrator, probe) = build_orchestrator(&config, store.clone())?;
            let probe_task = probe.spawn();
            let triggers = orchestrator.start(None);

            let mut indicator = store.subscribe();
            info!(pending = indicator.borrow().pending_count, "Watching offline queue");

            loop {
                tokio::select! {
                    changed = indicator.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = indicator.borrow_and_update().clone();
                        info!(
                            pending = current.pending_count,
                            syncing = current.is_syncing,
                            has_errors = current.has_errors,
                            "Queue updated"
                        );
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutting down");
                        break;
                    }
                }
            }

            triggers.shutdown();
            probe_task.abort();
        }

        Command::DeadLetters => {
            let letters = store.dead_letters().await;
            if letters.is_empty() {
                println!("No dead letters");
            }
            for letter in letters {
                println!(
                    "{}  {}  failed={}  {}",
                    letter.mutation.local_id,
                    letter.mutation.payload.describe(),
                    letter.failed_at.to_rfc3339(),
                    letter.reason
                );
            }
        }

        Command::Requeue { local_id } => {
            let new_id = store.requeue_dead_letter(&local_id).await?;
            println!("Requeued {} as {}", local_id, new_id);
        }

        Command::Discard { local_id } => {
            store.discard_dead_letter(&local_id).await?;
            println!("Discarded {}", local_id);
        }

        Command::ClearErrors => {
            store.clear_errors().await?;
            println!("Cleared sync errors");
        }
    }

    Ok(())
}

async fn open_kv(config: &Config) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let data_dir = &config.storage.data_dir;
    let kv: Arc<dyn KeyValueStore> = match config.storage.backend {
        StorageBackend::File => Arc::new(FileKvStore::open(data_dir.clone()).await?),
        StorageBackend::Sqlite => Arc::new(SqliteKvStore::open(&data_dir.join("queue.db"))?),
        StorageBackend::Memory => {
            warn!("Using in-memory storage, queued mutations will not survive exit");
            Arc::new(MemoryKvStore::new())
        }
    };
    Ok(kv)
}

fn build_orchestrator(
    config: &Config,
    store: Arc<PendingMutationStore>,
) -> anyhow::Result<(SyncOrchestrator, Arc<HttpConnectivityProbe>)> {
    if config.remote.api_token.is_none() {
        warn!("No API token configured, requests will be unauthenticated");
    }
    let remote = Arc::new(HttpMutationClient::new(&config.remote)?);
    let probe = Arc::new(HttpConnectivityProbe::new(&config.remote)?);

    let orchestrator = SyncOrchestrator::new(
        store,
        remote,
        Arc::new(BroadcastInvalidator::default()),
        probe.clone(),
        OrchestratorSettings::from(&config.sync),
    );
    Ok((orchestrator, probe))
}
