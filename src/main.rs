//! CLI entry point for the harvester.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chron_harvester_core::config::{Config, DownloadConfig, HttpClientConfig, RateGateConfig};
use chron_harvester_core::db::Database;
use chron_harvester_core::discovery::{BatchDiscovery, FacetDiscovery, FacetOutcome, SplitOperation};
use chron_harvester_core::download::{DownloadEngine, RecoveryOps};
use chron_harvester_core::http_client::ArchiveClient;
use chron_harvester_core::ops;
use chron_harvester_core::rate_gate::RateGate;
use chron_harvester_core::shutdown::ShutdownSignal;
use chron_harvester_core::store::facet::{FacetStatus, FacetUpdate, NewFacet};
use chron_harvester_core::store::periodical::NewPeriodical;
use chron_harvester_core::store::Store;
use clap::Parser;
use tracing::{debug, info, warn};

use cli::{Args, Command};

const EXIT_OK: i32 = 0;
const EXIT_FATAL: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

const CAPTCHA_POLL_INTERVAL: Duration = Duration::from_secs(300);
const CAPTCHA_POLL_TICK: Duration = Duration::from_secs(1);

/// Marks an error as a CLI-usage/configuration problem so `main` can report
/// exit code 2 instead of the generic fatal code.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ConfigError(String);

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let shutdown = ShutdownSignal::new();
    shutdown.install();

    let result = run(args, shutdown.clone()).await;

    let code = if shutdown.is_triggered() {
        info!("interrupted, exiting");
        EXIT_INTERRUPTED
    } else {
        match result {
            Ok(()) => EXIT_OK,
            Err(err) => {
                if err.downcast_ref::<ConfigError>().is_some() {
                    eprintln!("configuration error: {err}");
                    EXIT_CONFIG_ERROR
                } else {
                    eprintln!("error: {err:#}");
                    EXIT_FATAL
                }
            }
        }
    };

    std::process::exit(code);
}

async fn run(args: Args, shutdown: ShutdownSignal) -> Result<()> {
    let config = Config {
        db_path: args.db.clone(),
        rate_gate: RateGateConfig {
            max_per_minute: args.max_per_minute,
            ..RateGateConfig::default()
        },
        http_client: HttpClientConfig {
            base_url: args.base_url.clone(),
            ..HttpClientConfig::default()
        },
        download: DownloadConfig {
            download_root: args.download_root.clone(),
            ..DownloadConfig::default()
        },
    };

    let db = Database::new(&config.db_path).await?;
    let store = Store::new(db);
    let recovered = store.recover_on_startup().await?;
    if recovered > 0 {
        info!(recovered, "requeued stuck-active items from a previous run");
    }

    let gate = Arc::new(RateGate::new(
        config.rate_gate.max_per_minute,
        Duration::from_secs(config.rate_gate.base_cooldown_secs),
    ));
    let client = Arc::new(ArchiveClient::new(
        config.http_client.base_url.clone(),
        Arc::clone(&gate),
        Duration::from_secs(config.http_client.read_timeout_metadata_secs),
        config.http_client.max_retries,
        shutdown.clone(),
    ));

    match args.command {
        Command::SeedPeriodicals => {
            let summaries = client.iter_all_periodicals().await?;
            let items: Vec<NewPeriodical> = summaries
                .into_iter()
                .map(|p| NewPeriodical {
                    lccn: p.lccn,
                    title: p.title,
                    state: p.state,
                    city: None,
                    start_year: None,
                    end_year: None,
                    frequency: None,
                    language: None,
                    subject: None,
                    url: Some(p.url),
                })
                .collect();
            let count = items.len();
            store.periodicals.upsert_periodicals(&items).await?;
            info!(count, "seeded periodicals");
        }

        Command::DiscoverBatch { session_name, auto_enqueue } => {
            let discovery = BatchDiscovery::new(Arc::clone(&client), Arc::clone(&gate), store.clone(), shutdown.clone());
            discovery.run(&session_name, auto_enqueue).await?;
        }

        Command::AddFacet { facet_type, facet_value, priority, estimated_items } => {
            let id = store
                .facets
                .create_search_facet(&NewFacet {
                    facet_type,
                    facet_value,
                    query: None,
                    estimated_items,
                    priority,
                })
                .await?;
            info!(facet_id = id, "facet registered");
        }

        Command::DiscoverFacets { max_items, auto_enqueue } => {
            discover_facets(&store, Arc::clone(&client), Arc::clone(&gate), &shutdown, max_items, auto_enqueue).await?;
        }

        Command::Download { file_types, per_page_concurrency, batch_size, once, poll_interval_secs, max_idle_minutes } => {
            let file_types = cli::parse_file_types(&file_types).map_err(|e| anyhow!(ConfigError(e)))?;
            let download_config = DownloadConfig {
                download_root: config.download.download_root.clone(),
                file_types,
                per_page_concurrency,
                batch_size,
                flush_every: config.download.flush_every,
                poll_interval_secs,
                max_idle_minutes,
                route_binaries_through_rate_gate: config.download.route_binaries_through_rate_gate,
            };
            let engine = DownloadEngine::new(
                store.clone(),
                &download_config,
                Duration::from_secs(config.http_client.read_timeout_file_secs),
            )?;

            if once {
                let stats = engine.run_batch(&shutdown).await?;
                log_batch(&stats);
            } else {
                run_download_continuously(&engine, &shutdown, poll_interval_secs, max_idle_minutes).await?;
            }
        }

        Command::ResumeFailed => {
            let ops = RecoveryOps::new(store.clone(), config.download.download_root.clone());
            let count = ops.resume_failed().await?;
            info!(count, "resumed failed queue items");
        }

        Command::ResetStuck => {
            let ops = RecoveryOps::new(store.clone(), config.download.download_root.clone());
            let count = ops.reset_stuck_active().await?;
            info!(count, "reset stuck active queue items");
        }

        Command::CleanupIncomplete => {
            let ops = RecoveryOps::new(store.clone(), config.download.download_root.clone());
            let report = ops.cleanup_incomplete().await?;
            info!(removed = report.removed.len(), "removed incomplete files");
        }

        Command::Split { workers, output } => {
            let result = ops::split(&store, workers, &output)
                .await
                .map_err(|e| match e {
                    ops::OpsError::InvalidWorkerCount(n) => anyhow!(ConfigError(format!("invalid worker count: {n}"))),
                    other => anyhow::Error::from(other),
                })?;
            info!(workers = result.worker_count, "split complete");
        }

        Command::Merge { worker_db } => {
            let report = ops::merge(&store, &worker_db).await?;
            info!(facets_merged = report.facets_merged, pages_merged = report.pages_merged, "merge complete");
        }
    }

    Ok(())
}

fn log_batch(stats: &chron_harvester_core::DownloadStats) {
    info!(
        completed = stats.completed(),
        skipped = stats.skipped(),
        failed = stats.failed(),
        retried = stats.retried(),
        bytes = stats.bytes_downloaded(),
        "download batch complete"
    );
}

/// Polls the queue every `poll_interval_secs`; exits once `max_idle_minutes`
/// pass with nothing to do, or the shutdown signal fires.
async fn run_download_continuously(
    engine: &DownloadEngine,
    shutdown: &ShutdownSignal,
    poll_interval_secs: u64,
    max_idle_minutes: u64,
) -> Result<()> {
    let max_idle_secs = max_idle_minutes.saturating_mul(60);
    let mut idle_secs = 0u64;

    loop {
        if shutdown.is_triggered() {
            return Ok(());
        }

        let stats = engine.run_batch(shutdown).await?;
        if stats.total() > 0 {
            idle_secs = 0;
            log_batch(&stats);
        } else {
            idle_secs += poll_interval_secs;
            if idle_secs >= max_idle_secs {
                info!("download queue idle, exiting");
                return Ok(());
            }
        }

        if shutdown.is_triggered() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(poll_interval_secs)).await;
    }
}

/// Drains pending/retryable facets through facet-mode discovery. A CAPTCHA
/// halts every facet, not just the one in flight: the loop parks here
/// polling the gate before handing the facet back to `claim_next`.
async fn discover_facets(
    store: &Store,
    client: Arc<ArchiveClient>,
    gate: Arc<RateGate>,
    shutdown: &ShutdownSignal,
    max_items: Option<i64>,
    auto_enqueue: bool,
) -> Result<()> {
    let facet_discovery = FacetDiscovery::new(client, Arc::clone(&gate), store.clone());
    let split_op = SplitOperation::new(store.clone());

    loop {
        if shutdown.is_triggered() {
            return Ok(());
        }

        let Some(facet) = store.facets.claim_next().await? else {
            info!("no pending facets remain");
            return Ok(());
        };

        match facet_discovery.run_facet(facet.id, max_items).await? {
            FacetOutcome::Completed => {
                info!(facet_id = facet.id, "facet discovery completed");
                if auto_enqueue {
                    facet_discovery.enqueue_facet(facet.id, facet.priority).await?;
                }
            }
            FacetOutcome::NeedsSplitting => {
                info!(facet_id = facet.id, "facet needs splitting, resolving");
                split_op.split(facet.id).await?;
            }
            FacetOutcome::CaptchaBlocked => {
                warn!("captcha detected, halting facet discovery until the gate clears");
                poll_until_unblocked(&gate, shutdown).await;
                if shutdown.is_triggered() {
                    return Ok(());
                }
                store
                    .facets
                    .update_facet(
                        facet.id,
                        &FacetUpdate {
                            status: Some(FacetStatus::CaptchaRetry),
                            ..Default::default()
                        },
                    )
                    .await?;
            }
            FacetOutcome::Error => {
                warn!(facet_id = facet.id, "facet discovery failed, skipping");
            }
        }
    }
}

async fn poll_until_unblocked(gate: &RateGate, shutdown: &ShutdownSignal) {
    loop {
        if !gate.is_blocked().await || shutdown.is_triggered() {
            return;
        }
        let mut waited = Duration::ZERO;
        while waited < CAPTCHA_POLL_INTERVAL {
            if shutdown.is_triggered() || !gate.is_blocked().await {
                return;
            }
            tokio::time::sleep(CAPTCHA_POLL_TICK).await;
            waited += CAPTCHA_POLL_TICK;
        }
    }
}
