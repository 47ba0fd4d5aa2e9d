//! Facet-mode discovery: search-query-driven traversal,
//! used when batch mode's server-prepared bundles don't cover the desired
//! slice. Issues search queries, which means it triggers CAPTCHA far more
//! often than batch mode.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::error::DiscoveryError;
use super::item_id;
use crate::http_client::date_range;
use crate::http_client::{ArchiveClient, ClientError, SearchParams};
use crate::rate_gate::RateGate;
use crate::store::facet::{FacetStatus, FacetUpdate, SearchFacet};
use crate::store::page::NewPage;
use crate::store::queue::QueueType;
use crate::store::Store;

/// Default rows requested per search page for date_range/combined facets.
const DEFAULT_ROWS: u32 = 100;
/// Rows are capped lower for `state` facets to avoid upstream timeouts.
const STATE_ROWS_CAP: u32 = 50;
/// `state` facets restrict their query to this many LCCNs to bound result size.
const STATE_LCCN_LIMIT: usize = 5;
/// Priority bump applied by `split` to child facets relative to their parent.
pub const SPLIT_PRIORITY_BUMP: i64 = 1;

pub struct FacetDiscovery {
    client: Arc<ArchiveClient>,
    gate: Arc<RateGate>,
    store: Store,
}

/// Outcome of processing one facet to the point it stops making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetOutcome {
    Completed,
    CaptchaBlocked,
    NeedsSplitting,
    Error,
}

impl FacetDiscovery {
    #[must_use]
    pub fn new(client: Arc<ArchiveClient>, gate: Arc<RateGate>, store: Store) -> Self {
        Self { client, gate, store }
    }

    /// Self-audit performed on entry to `discovering`:
    /// a facet claiming `completed` with progress beyond page 1 and no
    /// terminal error is a CAPTCHA-interrupted false completion.
    #[must_use]
    pub fn self_audit(facet: &SearchFacet) -> Option<FacetUpdate> {
        let no_terminal_error = facet
            .error_message
            .as_deref()
            .map_or(true, str::is_empty);
        if facet.status == "completed" && facet.current_page > 1 && no_terminal_error {
            return Some(FacetUpdate {
                status: Some(FacetStatus::Discovering),
                current_page: Some(facet.current_page + 1),
                ..Default::default()
            });
        }
        None
    }

    /// Runs one facet to a stopping point: `completed`, `captcha_blocked`,
    /// `needs_splitting`, or `error`. `max_items`, if set, truncates the
    /// last page so the facet never over-collects.
    #[instrument(skip(self, max_items), fields(facet_id))]
    pub async fn run_facet(&self, facet_id: i64, max_items: Option<i64>) -> Result<FacetOutcome, DiscoveryError> {
        let mut facet = self.store.facets.get(facet_id).await?;

        if let Some(update) = Self::self_audit(&facet) {
            self.store.facets.update_facet(facet_id, &update).await?;
            facet = self.store.facets.get(facet_id).await?;
        }

        if facet.facet_type == "state" {
            let known = self.store.periodicals.list_by_state(&facet.facet_value).await?;
            if known.is_empty() {
                self.store
                    .facets
                    .update_facet(
                        facet_id,
                        &FacetUpdate {
                            status: Some(FacetStatus::Completed),
                            actual_items: Some(0),
                            ..Default::default()
                        },
                    )
                    .await?;
                return Ok(FacetOutcome::Completed);
            }
        }

        let mut seen = HashSet::new();
        let mut page = (facet.resume_from_page).max(1) as u32;

        loop {
            let known_periodicals = if facet.facet_type == "state" {
                self.store.periodicals.list_by_state(&facet.facet_value).await?
            } else {
                Vec::new()
            };

            let params = match build_search_params(&facet, page, &known_periodicals) {
                Ok(params) => params,
                Err(reason) => {
                    warn!(facet_id, %reason, "invalid facet value, marking error");
                    self.store
                        .facets
                        .update_facet(
                            facet_id,
                            &FacetUpdate {
                                status: Some(FacetStatus::Error),
                                error_message: Some(Some(reason)),
                                ..Default::default()
                            },
                        )
                        .await?;
                    return Ok(FacetOutcome::Error);
                }
            };
            let requested_rows = params.rows;

            match self.client.search_pages(&params).await {
                Ok(result) => {
                    let mut fresh = Vec::new();
                    for item in result.results {
                        let lccn = item.lccn.clone().unwrap_or_default();
                        let date = item.date.clone().unwrap_or_default();
                        let sequence = item.sequence.unwrap_or(0) as i64;
                        let candidate_id =
                            item_id::resolve(item.id.as_deref(), item.url.as_deref(), &lccn, &date, sequence);

                        if !seen.insert(candidate_id.clone()) {
                            continue;
                        }

                        fresh.push(NewPage {
                            item_id: candidate_id,
                            lccn,
                            title: item.title,
                            date,
                            edition: 1,
                            sequence,
                            page_url: item.url.clone().unwrap_or_default(),
                            pdf_url: item.url.as_ref().map(|u| format!("{u}.pdf")),
                            jp2_url: item.url.as_ref().map(|u| format!("{u}.jp2")),
                            ocr_url: item.url.as_ref().map(|u| format!("{u}/ocr.txt")),
                            ocr_text: None,
                            word_count: None,
                        });
                    }

                    if let Some(cap) = max_items {
                        let remaining = (cap - facet.items_discovered).max(0) as usize;
                        fresh.truncate(remaining);
                    }

                    let returned_count = fresh.len();
                    let stored = self.store.pages.store_pages(&fresh).await?;

                    self.store
                        .facets
                        .update_facet(
                            facet_id,
                            &FacetUpdate {
                                current_page: Some(page as i64),
                                last_batch_size: Some(requested_rows as i64),
                                delta_items_discovered: stored as i64,
                                actual_items: Some(result.total_items as i64),
                                ..Default::default()
                            },
                        )
                        .await?;

                    facet = self.store.facets.get(facet_id).await?;

                    let hit_cap = max_items.is_some_and(|cap| facet.items_discovered >= cap);
                    if returned_count < requested_rows as usize || hit_cap {
                        self.store
                            .facets
                            .update_facet(
                                facet_id,
                                &FacetUpdate {
                                    status: Some(FacetStatus::Completed),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        info!(facet_id, items = facet.items_discovered, "facet discovery completed");
                        return Ok(FacetOutcome::Completed);
                    }

                    page += 1;
                }
                Err(ClientError::Captcha { .. }) | Err(ClientError::CaptchaDetected { .. }) => {
                    self.store
                        .facets
                        .update_facet(
                            facet_id,
                            &FacetUpdate {
                                status: Some(FacetStatus::CaptchaBlocked),
                                ..Default::default()
                            },
                        )
                        .await?;
                    warn!(facet_id, "facet discovery captcha-blocked");
                    return Ok(FacetOutcome::CaptchaBlocked);
                }
                Err(other) if page > 1 => {
                    warn!(facet_id, error = %other, "facet discovery failed past page 1, needs splitting");
                    self.store
                        .facets
                        .update_facet(
                            facet_id,
                            &FacetUpdate {
                                status: Some(FacetStatus::NeedsSplitting),
                                error_message: Some(Some(other.to_string())),
                                ..Default::default()
                            },
                        )
                        .await?;
                    return Ok(FacetOutcome::NeedsSplitting);
                }
                Err(other) => {
                    self.store
                        .facets
                        .update_facet(
                            facet_id,
                            &FacetUpdate {
                                status: Some(FacetStatus::Error),
                                error_message: Some(Some(other.to_string())),
                                ..Default::default()
                            },
                        )
                        .await?;
                    return Err(DiscoveryError::from_client(other));
                }
            }
        }
    }

    /// Enqueues a `facet` [`crate::store::queue::QueueItem`] so the download
    /// engine will walk the facet's discovered pages.
    pub async fn enqueue_facet(&self, facet_id: i64, priority: i64) -> Result<i64, DiscoveryError> {
        let id = self
            .store
            .queue
            .enqueue(QueueType::Facet, &facet_id.to_string(), priority)
            .await?;
        Ok(id)
    }

    #[must_use]
    pub fn gate(&self) -> &Arc<RateGate> {
        &self.gate
    }
}

fn build_search_params(
    facet: &SearchFacet,
    page: u32,
    known_periodicals: &[crate::store::Periodical],
) -> Result<SearchParams, String> {
    let mut params = SearchParams::new(page, DEFAULT_ROWS);

    match facet.facet_type.as_str() {
        "date_range" => {
            let range = date_range::parse_facet_value(&facet.facet_value)
                .map_err(|e| format!("invalid date_range facet_value '{}': {e}", facet.facet_value))?;
            params.date_range = Some(range);
        }
        "state" => {
            params.rows = params.rows.min(STATE_ROWS_CAP);
            params.state = Some(facet.facet_value.clone());
            if !known_periodicals.is_empty() {
                let lccns: Vec<&str> = known_periodicals
                    .iter()
                    .take(STATE_LCCN_LIMIT)
                    .map(|p| p.lccn.as_str())
                    .collect();
                params.andtext = Some(format!("lccn:({})", lccns.join(" OR ")));
            }
        }
        "combined" => {
            params.rows = params.rows.min(STATE_ROWS_CAP);
            let (state, year_part) = facet
                .facet_value
                .split_once('|')
                .ok_or_else(|| format!("combined facet_value '{}' missing '|' separator", facet.facet_value))?;
            params.state = Some(state.to_string());
            let range = date_range::parse_facet_value(year_part)
                .map_err(|e| format!("invalid combined facet_value year part '{year_part}': {e}"))?;
            params.date_range = Some(range);
        }
        other => return Err(format!("unknown facet_type '{other}'")),
    }

    Ok(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateGateConfig;
    use crate::db::Database;
    use crate::shutdown::ShutdownSignal;
    use crate::store::facet::NewFacet;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn harness(server: &MockServer) -> FacetDiscovery {
        let db = Database::new_in_memory().await.unwrap();
        let store = Store::new(db);
        let cfg = RateGateConfig::default();
        let gate = Arc::new(RateGate::new(cfg.max_per_minute, Duration::from_secs(cfg.base_cooldown_secs)));
        let client = Arc::new(ArchiveClient::new(
            server.uri(),
            Arc::clone(&gate),
            Duration::from_secs(5),
            3,
            ShutdownSignal::new(),
        ));
        FacetDiscovery::new(client, gate, store)
    }

    #[tokio::test]
    async fn test_state_facet_with_no_known_periodicals_completes_immediately() {
        let server = MockServer::start().await;
        let discovery = harness(&server).await;

        let id = discovery
            .store
            .facets
            .create_search_facet(&NewFacet {
                facet_type: "state".to_string(),
                facet_value: "Wyoming".to_string(),
                query: None,
                estimated_items: None,
                priority: 5,
            })
            .await
            .unwrap();

        let outcome = discovery.run_facet(id, None).await.unwrap();
        assert_eq!(outcome, FacetOutcome::Completed);

        let facet = discovery.store.facets.get(id).await.unwrap();
        assert_eq!(facet.actual_items, Some(0));
    }

    #[tokio::test]
    async fn test_date_range_facet_completes_on_short_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/pages/results/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    {"id": "/lccn/sn1/1906-01-01/ed-1/seq-1/", "lccn": "sn1", "date": "1906-01-01", "sequence": 1}
                ],
                "totalItems": 1
            })))
            .mount(&server)
            .await;

        let discovery = harness(&server).await;
        let id = discovery
            .store
            .facets
            .create_search_facet(&NewFacet {
                facet_type: "date_range".to_string(),
                facet_value: "1906/1906".to_string(),
                query: None,
                estimated_items: Some(1),
                priority: 5,
            })
            .await
            .unwrap();

        let outcome = discovery.run_facet(id, None).await.unwrap();
        assert_eq!(outcome, FacetOutcome::Completed);

        let facet = discovery.store.facets.get(id).await.unwrap();
        assert_eq!(facet.items_discovered, 1);
    }

    #[tokio::test]
    async fn test_captcha_marks_facet_blocked_and_preserves_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/pages/results/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<div class=\"g-recaptcha\"></div>"))
            .mount(&server)
            .await;

        let discovery = harness(&server).await;
        let id = discovery
            .store
            .facets
            .create_search_facet(&NewFacet {
                facet_type: "date_range".to_string(),
                facet_value: "1906/1906".to_string(),
                query: None,
                estimated_items: None,
                priority: 5,
            })
            .await
            .unwrap();

        let outcome = discovery.run_facet(id, None).await.unwrap();
        assert_eq!(outcome, FacetOutcome::CaptchaBlocked);

        let facet = discovery.store.facets.get(id).await.unwrap();
        assert_eq!(facet.status, "captcha_blocked");
    }

    #[test]
    fn test_self_audit_reverts_false_completion() {
        let facet = SearchFacet {
            id: 1,
            facet_type: "date_range".to_string(),
            facet_value: "1906/1906".to_string(),
            query: None,
            estimated_items: None,
            actual_items: None,
            items_discovered: 300,
            items_downloaded: 0,
            current_page: 3,
            last_batch_size: 100,
            resume_from_page: 3,
            status: "completed".to_string(),
            priority: 5,
            error_message: None,
        };
        let update = FacetDiscovery::self_audit(&facet).expect("should revert");
        assert_eq!(update.current_page, Some(4));
    }

    #[test]
    fn test_self_audit_leaves_completed_with_error_alone() {
        let facet = SearchFacet {
            id: 1,
            facet_type: "date_range".to_string(),
            facet_value: "1906/1906".to_string(),
            query: None,
            estimated_items: None,
            actual_items: None,
            items_discovered: 300,
            items_downloaded: 0,
            current_page: 3,
            last_batch_size: 100,
            resume_from_page: 3,
            status: "completed".to_string(),
            priority: 5,
            error_message: Some("fatal".to_string()),
        };
        assert!(FacetDiscovery::self_audit(&facet).is_none());
    }
}
