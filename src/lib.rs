//! Chronicling America Harvester
//!
//! Discovers and downloads digitized historical newspaper pages from a
//! rate-limited public archive API, tracking all progress in a durable
//! `SQLite` state store so a run can be killed and resumed at any point.
//!
//! # Architecture
//!
//! - [`rate_gate`] - global request pacing, CAPTCHA detection and cooldown
//! - [`http_client`] - typed wrapper over the archive's JSON API
//! - [`store`] - durable `SQLite` state store: periodicals, pages, facets, sessions, queue
//! - [`discovery`] - batch-mode and facet-mode page discovery
//! - [`download`] - concurrent per-page file fetching with retries
//! - [`ops`] - operator tooling: splitting and merging state stores
//! - [`config`] - engine-wide tunables
//! - [`db`] - connection pool and migration bootstrap
//! - [`shutdown`] - cooperative cancellation

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod discovery;
pub mod download;
pub mod http_client;
pub mod ops;
pub mod rate_gate;
pub mod shutdown;
pub mod store;

pub use config::Config;
pub use db::Database;
pub use download::{DownloadEngine, DownloadStats, EngineError};
pub use http_client::ArchiveClient;
pub use rate_gate::RateGate;
pub use shutdown::ShutdownSignal;
pub use store::Store;
