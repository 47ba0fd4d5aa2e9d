//! `split N`: partitions a master state store's non-terminal facets across
//! `N` sibling worker stores for horizontal fan-out.
//!
//! This is distinct from [`crate::discovery::split`], which splits a single
//! overly broad facet into smaller sibling facets within the same store.
//! This operation splits *work*, not *facets*, across independent processes
//! or hosts.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, instrument};

use super::error::OpsError;
use crate::db::Database;
use crate::store::periodical::NewPeriodical;
use crate::store::Store;

/// Written to `<output_dir>/master_config.json`, recording how the master's
/// non-terminal facets were partitioned so `ops merge` can locate every
/// worker store afterward.
#[derive(Debug, Serialize)]
pub struct MasterConfig {
    pub worker_count: usize,
    pub workers: Vec<WorkerEntry>,
}

#[derive(Debug, Serialize)]
pub struct WorkerEntry {
    pub db_path: PathBuf,
    pub facet_count: usize,
}

/// Splits the facets in `master` that are not yet in a terminal state
/// (`completed` or `split_completed`) round-robin across `worker_count`
/// fresh `SQLite` stores under `output_dir/worker-<n>/state.db`, and writes
/// a `master_config.json` partition manifest alongside them.
#[instrument(skip(master), fields(worker_count))]
pub async fn split(master: &Store, worker_count: usize, output_dir: &Path) -> Result<MasterConfig, OpsError> {
    if worker_count == 0 {
        return Err(OpsError::InvalidWorkerCount(worker_count));
    }

    let facets = master.facets.list_not_terminal().await?;
    let periodicals = collect_periodicals(master, &facets).await?;

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| OpsError::io(output_dir, e))?;

    let mut worker_dbs = Vec::with_capacity(worker_count);
    for i in 0..worker_count {
        let worker_dir = output_dir.join(format!("worker-{i}"));
        tokio::fs::create_dir_all(&worker_dir)
            .await
            .map_err(|e| OpsError::io(&worker_dir, e))?;
        let db_path = worker_dir.join("state.db");
        let db = Database::new(&db_path).await?;
        let store = Store::new(db);

        if !periodicals.is_empty() {
            store.periodicals.upsert_periodicals(&periodicals).await?;
        }

        worker_dbs.push((db_path, store));
    }

    let mut facet_counts = vec![0usize; worker_count];
    for (i, facet) in facets.iter().enumerate() {
        let worker_index = i % worker_count;
        worker_dbs[worker_index].1.facets.insert_raw(facet).await?;
        facet_counts[worker_index] += 1;
    }

    let config = MasterConfig {
        worker_count,
        workers: worker_dbs
            .iter()
            .zip(facet_counts)
            .map(|((db_path, _), facet_count)| WorkerEntry {
                db_path: db_path.clone(),
                facet_count,
            })
            .collect(),
    };

    let config_path = output_dir.join("master_config.json");
    let body = serde_json::to_vec_pretty(&config)?;
    tokio::fs::write(&config_path, body)
        .await
        .map_err(|e| OpsError::io(&config_path, e))?;

    info!(
        worker_count,
        facets = facets.len(),
        output_dir = %output_dir.display(),
        "split complete"
    );

    Ok(config)
}

/// Worker stores need periodicals too: `state` and `combined` facets resolve
/// their lccn set from `periodicals.state`, which would otherwise be empty
/// in a freshly-migrated worker database.
async fn collect_periodicals(
    master: &Store,
    facets: &[crate::store::facet::SearchFacet],
) -> Result<Vec<NewPeriodical>, OpsError> {
    let mut states: Vec<&str> = facets
        .iter()
        .filter_map(|f| match f.facet_type.as_str() {
            "state" => Some(f.facet_value.as_str()),
            "combined" => f.facet_value.split_once('|').map(|(state, _)| state),
            _ => None,
        })
        .collect();
    states.sort_unstable();
    states.dedup();

    let mut periodicals = Vec::new();
    for state in states {
        for p in master.periodicals.list_by_state(state).await? {
            periodicals.push(NewPeriodical {
                lccn: p.lccn,
                title: p.title,
                state: p.state,
                city: p.city,
                start_year: p.start_year.map(|y| y as i32),
                end_year: p.end_year.map(|y| y as i32),
                frequency: p.frequency,
                language: p.language,
                subject: p.subject,
                url: p.url,
            });
        }
    }
    Ok(periodicals)
}
