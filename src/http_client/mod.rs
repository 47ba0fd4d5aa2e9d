//! Thin HTTP client over the archive's JSON API.
//!
//! Every operation goes through the [`RateGate`]; the client itself holds no
//! rate-limiting state. Transport errors are retried with a fixed backoff
//! sequence (5s, 20s, 45s; capped at 3 attempts). HTTP 429 gets its own,
//! much longer backoff (1h, 2h, 4h, bounded by `Config::max_retries`) since
//! it means the upstream itself asked us to slow down. A detected CAPTCHA
//! surfaces immediately without retrying.

pub mod date_range;
mod error;
pub mod types;

pub use date_range::DateRangeParam;
pub use error::ClientError;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{instrument, warn};

use crate::rate_gate::{RateGate, RateGateError, RequestOutcome};
use crate::shutdown::ShutdownSignal;
use types::{
    BatchDetail, BatchesPage, EstimateSize, IssueDetail, PeriodicalDetail, PeriodicalsPage,
    SearchPagesResult,
};

/// Backoff delays applied between transport-error retries, in order.
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(5), Duration::from_secs(20)];
const MAX_ATTEMPTS: u32 = 3;

/// Backoff delays applied between HTTP 429 retries, in order.
const RETRY_429_BACKOFF: [Duration; 3] = [
    Duration::from_secs(3600),
    Duration::from_secs(7200),
    Duration::from_secs(14400),
];

/// Resolution at which an otherwise-long sleep re-checks the shutdown flag.
const SLEEP_POLL_TICK: Duration = Duration::from_secs(1);

/// Sleeps for `duration`, checking `shutdown` every [`SLEEP_POLL_TICK`].
/// Returns `false` if the sleep was cut short by a shutdown signal.
async fn interruptible_sleep(duration: Duration, shutdown: &ShutdownSignal) -> bool {
    let mut waited = Duration::ZERO;
    while waited < duration {
        if shutdown.is_triggered() {
            return false;
        }
        let tick = SLEEP_POLL_TICK.min(duration - waited);
        tokio::time::sleep(tick).await;
        waited += tick;
    }
    !shutdown.is_triggered()
}

/// Parameters for `search_pages`.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub date_range: Option<DateRangeParam>,
    pub state: Option<String>,
    pub andtext: Option<String>,
    pub page: u32,
    pub rows: u32,
}

impl SearchParams {
    #[must_use]
    pub fn new(page: u32, rows: u32) -> Self {
        Self {
            date_range: None,
            state: None,
            andtext: None,
            page,
            rows,
        }
    }
}

pub struct ArchiveClient {
    http: Client,
    gate: Arc<RateGate>,
    base_url: String,
    metadata_timeout: Duration,
    max_retries: u32,
    shutdown: ShutdownSignal,
}

impl ArchiveClient {
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        gate: Arc<RateGate>,
        metadata_timeout: Duration,
        max_retries: u32,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            http: Client::builder()
                .timeout(metadata_timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            gate,
            base_url: base_url.into(),
            metadata_timeout,
            max_retries,
            shutdown,
        }
    }

    #[instrument(skip(self, path))]
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt = 0u32;
        let mut attempt_429 = 0u32;

        loop {
            attempt += 1;

            let user_agent = match self.gate.acquire().await {
                Ok(ua) => ua,
                Err(RateGateError::Cooldown { remaining }) => {
                    return Err(ClientError::Captcha {
                        cooldown_until: remaining,
                    });
                }
            };

            let response = self
                .http
                .get(&url)
                .header("User-Agent", user_agent)
                .timeout(self.metadata_timeout)
                .send()
                .await;

            let response = match response {
                Ok(resp) => resp,
                Err(source) => {
                    self.gate.report(RequestOutcome::TransportError).await;
                    if attempt < MAX_ATTEMPTS {
                        let delay = RETRY_BACKOFF[(attempt - 1) as usize];
                        warn!(%url, attempt, delay_ms = delay.as_millis(), "transport error, retrying");
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(ClientError::Transport { url, source });
                }
            };

            let status = response.status();

            if status.as_u16() == 404 {
                self.gate.report(RequestOutcome::HttpOther).await;
                return Err(ClientError::NotFound { url });
            }

            let headers = response.headers().clone();
            let body = match response.text().await {
                Ok(body) => body,
                Err(source) => {
                    self.gate.report(RequestOutcome::TransportError).await;
                    if attempt < MAX_ATTEMPTS {
                        tokio::time::sleep(RETRY_BACKOFF[(attempt - 1) as usize]).await;
                        continue;
                    }
                    return Err(ClientError::Transport { url, source });
                }
            };

            if crate::rate_gate::detect_captcha(status.as_u16(), &headers, &body) {
                self.gate.report(RequestOutcome::Captcha).await;
                return Err(ClientError::CaptchaDetected { url });
            }

            if status.as_u16() == 429 {
                self.gate.report(RequestOutcome::Http429).await;
                if attempt_429 < self.max_retries {
                    let delay = RETRY_429_BACKOFF[(attempt_429 as usize).min(RETRY_429_BACKOFF.len() - 1)];
                    attempt_429 += 1;
                    warn!(
                        %url,
                        attempt_429,
                        delay_secs = delay.as_secs(),
                        "HTTP 429, backing off before retry"
                    );
                    if interruptible_sleep(delay, &self.shutdown).await {
                        continue;
                    }
                }
                return Err(ClientError::HttpStatus {
                    url,
                    status: status.as_u16(),
                });
            }

            if !status.is_success() {
                self.gate.report(RequestOutcome::HttpOther).await;
                return Err(ClientError::HttpStatus {
                    url,
                    status: status.as_u16(),
                });
            }

            self.gate.report(RequestOutcome::Ok).await;

            return serde_json::from_str(&body).map_err(|source| ClientError::Parse { url, source });
        }
    }

    /// `newspapers.json?page=&rows=`.
    pub async fn list_periodicals(&self, page: u32, rows: u32) -> Result<PeriodicalsPage, ClientError> {
        let rows = rows.min(1000);
        self.get_json(&format!("/newspapers.json?page={page}&rows={rows}"))
            .await
    }

    /// Eagerly walks every page of `list_periodicals`. The sequence is finite
    /// (bounded by the upstream's `totalPages`), so materializing it is safe;
    /// each page request still passes through the rate gate.
    pub async fn iter_all_periodicals(&self) -> Result<Vec<types::PeriodicalSummary>, ClientError> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let result = self.list_periodicals(page, 1000).await?;
            let is_last = page >= result.total_pages;
            all.extend(result.newspapers);
            if is_last {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    /// `lccn/<lccn>.json`.
    pub async fn get_periodical(&self, lccn: &str) -> Result<PeriodicalDetail, ClientError> {
        self.get_json(&format!("/lccn/{lccn}.json")).await
    }

    /// `search/pages/results/?format=json&...`.
    pub async fn search_pages(&self, params: &SearchParams) -> Result<SearchPagesResult, ClientError> {
        let mut query = format!(
            "/search/pages/results/?format=json&page={}&rows={}",
            params.page, params.rows
        );

        if let Some(ref date_range) = params.date_range {
            let (date1, date2, filter_type) = date_range::resolve(date_range)?;
            query.push_str(&format!(
                "&date1={date1}&date2={date2}&dateFilterType={filter_type}"
            ));
        }

        if let Some(ref state) = params.state {
            query.push_str(&format!("&state={}", urlencode(state)));
        }

        if let Some(ref andtext) = params.andtext {
            query.push_str(&format!("&andtext={}", urlencode(andtext)));
        }

        self.get_json(&query).await
    }

    /// `batches.json?page=&rows=`.
    pub async fn list_batches(&self, page: u32, rows: u32) -> Result<BatchesPage, ClientError> {
        let rows = rows.min(1000);
        self.get_json(&format!("/batches.json?page={page}&rows={rows}"))
            .await
    }

    /// Eagerly walks every page of `list_batches` (see [`Self::iter_all_periodicals`]).
    pub async fn iter_all_batches(&self) -> Result<Vec<types::BatchSummary>, ClientError> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let result = self.list_batches(page, 1000).await?;
            let is_last = page >= result.total_pages;
            all.extend(result.batches);
            if is_last {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    /// `batches/<name>.json`.
    pub async fn get_batch(&self, name: &str) -> Result<BatchDetail, ClientError> {
        self.get_json(&format!("/batches/{name}.json")).await
    }

    /// Fetches an issue detail document by its (already fully-qualified,
    /// relative-to-base) path.
    pub async fn get_issue(&self, issue_path: &str) -> Result<IssueDetail, ClientError> {
        self.get_json(issue_path).await
    }

    /// Estimates the size of a date-range harvest using a cheap `rows=0`
    /// search query for the item count and a fixed per-page size heuristic
    /// (the archive exposes no dedicated size-estimation endpoint).
    pub async fn estimate_size(&self, y1: u16, y2: u16) -> Result<EstimateSize, ClientError> {
        const AVG_PAGE_SIZE_MB: f64 = 2.5;

        let mut params = SearchParams::new(1, 0);
        params.date_range = Some(DateRangeParam::YearRange(y1, y2));
        let result = self.search_pages(&params).await?;

        Ok(EstimateSize {
            total_pages: result.total_items,
            estimated_size_mb: result.total_items as f64 * AVG_PAGE_SIZE_MB,
        })
    }
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
