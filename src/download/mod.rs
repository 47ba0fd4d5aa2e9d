//! Download engine: fetches page binaries onto disk from `download_queue`
//! items.
//!
//! # Features
//!
//! - Bounded, shared concurrency across page-file fetches
//! - Per-file retry with exponential backoff on transient failures
//! - Content-Length verification with delete-on-mismatch
//! - Idempotent re-runs (existing files are skipped without a network call)
//! - Recovery operations for resuming after a crash or CAPTCHA block
//!
//! # Example
//!
//! ```no_run
//! use chron_harvester_core::config::Config;
//! use chron_harvester_core::db::Database;
//! use chron_harvester_core::download::DownloadEngine;
//! use chron_harvester_core::shutdown::ShutdownSignal;
//! use chron_harvester_core::store::Store;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let db = Database::new(&config.db_path).await?;
//! let store = Store::new(db);
//! let engine = DownloadEngine::new(store, &config.download, Duration::from_secs(120))?;
//! let stats = engine.run_batch(&ShutdownSignal::new()).await?;
//! println!("completed: {}", stats.completed());
//! # Ok(())
//! # }
//! ```

pub(crate) mod engine;
mod error;
mod fetch;
mod recovery;
mod retry;

pub use engine::{DownloadEngine, DownloadStats, EngineError};
pub use error::DownloadError;
pub use fetch::{FetchOutcome, FileFetcher};
pub use recovery::{CleanupReport, RecoveryOps};
pub use retry::{DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error};
