//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use chron_harvester_core::config::FileType;

/// Harvest digitized historical newspaper pages from a rate-limited public archive.
#[derive(Parser, Debug)]
#[command(name = "chron-harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the state store database
    #[arg(long, default_value = "./harvester.db", global = true)]
    pub db: PathBuf,

    /// Root directory downloaded files are written under
    #[arg(long, default_value = "./downloads", global = true)]
    pub download_root: PathBuf,

    /// Base URL of the upstream archive
    #[arg(long, default_value = "https://chroniclingamerica.loc.gov", global = true)]
    pub base_url: String,

    /// Maximum outbound requests permitted per rolling 60-second window
    #[arg(long, default_value_t = 12, global = true)]
    pub max_per_minute: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch the full periodical listing and store it for facet-mode lookups.
    SeedPeriodicals,

    /// Run (or resume) batch-mode discovery to completion.
    DiscoverBatch {
        /// Name identifying this discovery run; resuming uses the same name.
        #[arg(long, default_value = "default")]
        session_name: String,
        /// Enqueue discovered pages onto the download queue as they're found.
        #[arg(long)]
        auto_enqueue: bool,
    },

    /// Register a new search facet for facet-mode discovery.
    AddFacet {
        /// One of: date_range, state, combined.
        #[arg(long = "type")]
        facet_type: String,
        /// `"YYYY/YYYY"`, a state name, or `"<state>|YYYY/YYYY"` for combined.
        #[arg(long = "value")]
        facet_value: String,
        #[arg(long, default_value_t = 5)]
        priority: i64,
        #[arg(long)]
        estimated_items: Option<i64>,
    },

    /// Drain pending/retryable facets through facet-mode discovery until
    /// none remain or the global rate gate enters cooldown.
    DiscoverFacets {
        /// Caps items collected per facet; unset means unbounded.
        #[arg(long)]
        max_items: Option<i64>,
        /// Enqueue a facet's pages onto the download queue once it completes.
        #[arg(long)]
        auto_enqueue: bool,
    },

    /// Consume the download queue, fetching page files to disk.
    Download {
        /// File types to fetch per page.
        #[arg(long, value_delimiter = ',', default_value = "pdf,jp2,ocr,metadata")]
        file_types: Vec<String>,
        /// Concurrent file fetches within one page.
        #[arg(long, default_value_t = 6)]
        per_page_concurrency: usize,
        /// Items pulled from the queue per iteration.
        #[arg(long, default_value_t = 50)]
        batch_size: usize,
        /// Run a single batch and exit instead of polling continuously.
        #[arg(long)]
        once: bool,
        /// Seconds between queue polls in continuous mode.
        #[arg(long, default_value_t = 30)]
        poll_interval_secs: u64,
        /// Minutes of consecutive empty polls before continuous mode exits.
        #[arg(long, default_value_t = 10)]
        max_idle_minutes: u64,
    },

    /// Move all `failed` queue items back to `queued`.
    ResumeFailed,

    /// Move all `active` queue items back to `queued` (after a crash).
    ResetStuck,

    /// Delete zero-byte files and undersized PDFs left by an interrupted run.
    CleanupIncomplete,

    /// Partition non-terminal facets across `workers` sibling state stores.
    Split {
        #[arg(long)]
        workers: usize,
        #[arg(long)]
        output: PathBuf,
    },

    /// Copy a worker store's finished facets and pages back into this store.
    Merge {
        /// Path to the worker's `state.db`.
        worker_db: PathBuf,
    },
}

/// Parses `--file-types` values into [`FileType`]s, rejecting unknown names
/// with a message naming the offender (clap surfaces this as exit code 2).
pub fn parse_file_types(values: &[String]) -> Result<Vec<FileType>, String> {
    values.iter().map(|v| v.parse()).collect()
}
