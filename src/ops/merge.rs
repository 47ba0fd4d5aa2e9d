//! `merge <dir>`: copies a worker store's finished facets and their pages
//! back into the master store.
//!
//! Worker stores are never mutated by a merge; an operator can merge the
//! same worker again later (e.g. mid-run, to checkpoint progress) and only
//! newly-completed facets and changed pages are re-applied, since every
//! write here is `INSERT OR REPLACE` keyed by natural identity.

use std::path::Path;

use tracing::{info, instrument};

use super::error::OpsError;
use crate::db::Database;
use crate::download::engine::date_bounds;
use crate::store::facet::SearchFacet;
use crate::store::Store;

#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub facets_merged: usize,
    pub pages_merged: usize,
}

/// Opens the worker store at `worker_db_path` and copies every `completed`
/// or `split_completed` facet, plus the full page set that facet resolves
/// to, into `master`.
#[instrument(skip(master), fields(worker_db_path = %worker_db_path.display()))]
pub async fn merge(master: &Store, worker_db_path: &Path) -> Result<MergeReport, OpsError> {
    let worker_db = Database::new(worker_db_path).await?;
    let worker = Store::new(worker_db);

    let finished = worker.facets.list_terminal().await?;
    let mut report = MergeReport::default();

    for facet in &finished {
        master.facets.upsert_raw(facet).await?;
        report.facets_merged += 1;

        let pages = pages_for_facet(&worker, facet).await?;
        if !pages.is_empty() {
            report.pages_merged += master.pages.upsert_raw_pages(&pages).await?;
        }
    }

    info!(
        facets_merged = report.facets_merged,
        pages_merged = report.pages_merged,
        "merge complete"
    );

    Ok(report)
}

async fn pages_for_facet(
    worker: &Store,
    facet: &SearchFacet,
) -> Result<Vec<crate::store::page::Page>, OpsError> {
    let pages = match facet.facet_type.as_str() {
        "date_range" => {
            let Some((d1, d2)) = date_bounds(&facet.facet_value) else {
                return Ok(Vec::new());
            };
            worker.pages.list_by_scope(Some((&d1, &d2)), None).await?
        }
        "state" => {
            let periodicals = worker.periodicals.list_by_state(&facet.facet_value).await?;
            let lccns: Vec<String> = periodicals.into_iter().map(|p| p.lccn).collect();
            worker.pages.list_by_scope(None, Some(&lccns)).await?
        }
        "combined" => {
            let Some((state, date_part)) = facet.facet_value.split_once('|') else {
                return Ok(Vec::new());
            };
            let Some((d1, d2)) = date_bounds(date_part) else {
                return Ok(Vec::new());
            };
            let periodicals = worker.periodicals.list_by_state(state).await?;
            let lccns: Vec<String> = periodicals.into_iter().map(|p| p.lccn).collect();
            worker.pages.list_by_scope(Some((&d1, &d2)), Some(&lccns)).await?
        }
        _ => Vec::new(),
    };
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::facet::{FacetStatus, FacetUpdate, NewFacet};
    use crate::store::page::NewPage;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_merge_copies_completed_facet_and_its_pages() {
        let worker_dir = tempdir().unwrap();
        let worker_db = Database::new(&worker_dir.path().join("worker.db")).await.unwrap();
        let worker = Store::new(worker_db);

        let facet_id = worker
            .facets
            .create_search_facet(&NewFacet {
                facet_type: "date_range".to_string(),
                facet_value: "1900/1900".to_string(),
                query: None,
                estimated_items: Some(1),
                priority: 5,
            })
            .await
            .unwrap();
        worker
            .facets
            .update_facet(
                facet_id,
                &FacetUpdate {
                    status: Some(FacetStatus::Completed),
                    delta_items_discovered: 1,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        worker
            .pages
            .store_pages(&[NewPage {
                item_id: "item-a".to_string(),
                lccn: "sn84038012".to_string(),
                title: None,
                date: "1900-06-01".to_string(),
                edition: 1,
                sequence: 1,
                page_url: "https://example/seq-1/".to_string(),
                pdf_url: Some("https://example/seq-1.pdf".to_string()),
                jp2_url: None,
                ocr_url: None,
                ocr_text: None,
                word_count: None,
            }])
            .await
            .unwrap();
        worker.pages.mark_page_downloaded("item-a").await.unwrap();

        let master_dir = tempdir().unwrap();
        let master_db = Database::new(&master_dir.path().join("master.db")).await.unwrap();
        let master = Store::new(master_db);

        let report = merge(&master, &worker_dir.path().join("worker.db")).await.unwrap();
        assert_eq!(report.facets_merged, 1);
        assert_eq!(report.pages_merged, 1);

        let page = master.pages.get("item-a").await.unwrap().unwrap();
        assert!(page.downloaded);
    }

    #[tokio::test]
    async fn test_merge_skips_non_terminal_facets() {
        let worker_dir = tempdir().unwrap();
        let worker_db = Database::new(&worker_dir.path().join("worker.db")).await.unwrap();
        let worker = Store::new(worker_db);

        worker
            .facets
            .create_search_facet(&NewFacet {
                facet_type: "date_range".to_string(),
                facet_value: "1900/1900".to_string(),
                query: None,
                estimated_items: None,
                priority: 5,
            })
            .await
            .unwrap();

        let master_dir = tempdir().unwrap();
        let master_db = Database::new(&master_dir.path().join("master.db")).await.unwrap();
        let master = Store::new(master_db);

        let report = merge(&master, &worker_dir.path().join("worker.db")).await.unwrap();
        assert_eq!(report.facets_merged, 0);
    }
}
