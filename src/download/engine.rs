//! Download engine: the consumer loop over `download_queue`.
//!
//! Uses a [`tokio::sync::Semaphore`]-bounded worker pool, but the unit of
//! concurrency here is a single binary file fetch rather than a whole queue
//! item: at most `per_page_concurrency` (default 6) page files are in
//! flight at once, shared across however many queue items a batch is
//! processing concurrently.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, info, instrument, warn};

use super::error::DownloadError;
use super::fetch::FileFetcher;
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use crate::config::{DownloadConfig, FileType};
use crate::shutdown::ShutdownSignal;
use crate::store::facet::SearchFacet;
use crate::store::page::Page;
use crate::store::queue::{QueueItem, QueueItemResult, QueueItemStatus};
use crate::store::{Store, StoreError};

const MIN_CONCURRENCY: usize = 1;
const MAX_CONCURRENCY: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid per-page concurrency {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}")]
    InvalidConcurrency { value: usize },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Statistics from one `run_batch` call.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    bytes_downloaded: AtomicUsize,
}

impl DownloadStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn bytes_downloaded(&self) -> usize {
        self.bytes_downloaded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.skipped() + self.failed()
    }

    fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }

    fn add_bytes(&self, bytes: u64) {
        self.bytes_downloaded.fetch_add(bytes as usize, Ordering::SeqCst);
    }
}

/// Per-file metadata sidecar written alongside each downloaded file.
#[derive(Debug, Serialize)]
struct PageMetadata<'a> {
    item_id: &'a str,
    lccn: &'a str,
    title: Option<&'a str>,
    date: &'a str,
    edition: i64,
    sequence: i64,
    page_url: &'a str,
    download_date: String,
    files: Vec<String>,
    file_types_requested: Vec<&'static str>,
}

pub struct DownloadEngine {
    store: Store,
    fetcher: Arc<FileFetcher>,
    file_semaphore: Arc<Semaphore>,
    retry_policy: RetryPolicy,
    download_root: PathBuf,
    file_types: Vec<FileType>,
    batch_size: usize,
    flush_every: usize,
}

impl DownloadEngine {
    /// Base delays for the per-file retry sequence (2s, 4s, 8s per spec).
    const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);
    const RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

    #[instrument(skip(store, config), fields(per_page_concurrency = config.per_page_concurrency))]
    pub fn new(store: Store, config: &DownloadConfig, file_timeout: Duration) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.per_page_concurrency) {
            return Err(EngineError::InvalidConcurrency {
                value: config.per_page_concurrency,
            });
        }

        let http = Client::builder()
            .timeout(file_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Ok(Self {
            store,
            fetcher: Arc::new(FileFetcher::new(http)),
            file_semaphore: Arc::new(Semaphore::new(config.per_page_concurrency)),
            retry_policy: RetryPolicy::new(3, Self::RETRY_BASE_DELAY, Self::RETRY_MAX_DELAY, 2.0),
            download_root: config.download_root.clone(),
            file_types: config.file_types.clone(),
            batch_size: config.batch_size,
            flush_every: config.flush_every.max(1),
        })
    }

    /// Pulls up to `batch_size` queued items, processes them concurrently
    /// (bounded at the file-fetch level by `per_page_concurrency`), and
    /// flushes results to the store every `flush_every` items or at batch
    /// end. Returns once the pulled batch drains or `shutdown` fires.
    #[instrument(skip(self, shutdown))]
    pub async fn run_batch(&self, shutdown: &ShutdownSignal) -> Result<DownloadStats, EngineError> {
        let stats = Arc::new(DownloadStats::new());
        let (tx, mut rx) = mpsc::channel::<QueueItemResult>(self.batch_size.max(1));
        let mut handles = Vec::with_capacity(self.batch_size);

        for _ in 0..self.batch_size {
            if shutdown.is_triggered() {
                break;
            }
            let Some(item) = self.store.queue.dequeue().await? else {
                break;
            };

            debug!(item_id = item.id, queue_type = %item.queue_type, reference_id = %item.reference_id, "dequeued item");

            let store = self.store.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&self.file_semaphore);
            let retry_policy = self.retry_policy.clone();
            let download_root = self.download_root.clone();
            let file_types = self.file_types.clone();
            let stats = Arc::clone(&stats);
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let result = process_item(
                    &store,
                    &item,
                    &download_root,
                    &file_types,
                    &fetcher,
                    &semaphore,
                    &retry_policy,
                    &stats,
                )
                .await;

                let queue_result = match result {
                    Ok(ItemOutcome::Completed) => QueueItemResult {
                        id: item.id,
                        status: QueueItemStatus::Completed,
                        progress_percent: 100.0,
                        error_message: None,
                    },
                    Ok(ItemOutcome::Skipped) => {
                        stats.increment_skipped();
                        QueueItemResult {
                            id: item.id,
                            status: QueueItemStatus::Completed,
                            progress_percent: 100.0,
                            error_message: None,
                        }
                    }
                    Err(message) => {
                        stats.increment_failed();
                        QueueItemResult {
                            id: item.id,
                            status: QueueItemStatus::Failed,
                            progress_percent: 0.0,
                            error_message: Some(message),
                        }
                    }
                };

                let _ = tx.send(queue_result).await;
            }));
        }

        drop(tx);

        let mut pending_flush = Vec::with_capacity(self.flush_every);
        while let Some(result) = rx.recv().await {
            if result.status == QueueItemStatus::Completed {
                stats.increment_completed();
            }
            pending_flush.push(result);
            if pending_flush.len() >= self.flush_every {
                self.store.queue.batch_update_queue(&pending_flush).await?;
                pending_flush.clear();
            }
        }

        if !pending_flush.is_empty() {
            self.store.queue.batch_update_queue(&pending_flush).await?;
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "download task panicked");
            }
        }

        info!(
            completed = stats.completed(),
            skipped = stats.skipped(),
            failed = stats.failed(),
            retried = stats.retried(),
            "batch complete"
        );

        match Arc::try_unwrap(stats) {
            Ok(stats) => Ok(stats),
            Err(shared) => {
                let copy = DownloadStats::new();
                copy.completed.store(shared.completed(), Ordering::SeqCst);
                copy.skipped.store(shared.skipped(), Ordering::SeqCst);
                copy.failed.store(shared.failed(), Ordering::SeqCst);
                copy.retried.store(shared.retried(), Ordering::SeqCst);
                copy.bytes_downloaded.store(shared.bytes_downloaded(), Ordering::SeqCst);
                Ok(copy)
            }
        }
    }
}

enum ItemOutcome {
    Completed,
    Skipped,
}

#[allow(clippy::too_many_arguments)]
async fn process_item(
    store: &Store,
    item: &QueueItem,
    download_root: &Path,
    file_types: &[FileType],
    fetcher: &Arc<FileFetcher>,
    semaphore: &Arc<Semaphore>,
    retry_policy: &RetryPolicy,
    stats: &DownloadStats,
) -> Result<ItemOutcome, String> {
    match item.queue_type.as_str() {
        "page" => {
            let page = store
                .pages
                .get(&item.reference_id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("page not found: {}", item.reference_id))?;

            let already_downloaded = page.downloaded;
            process_page(store, &page, download_root, file_types, fetcher, semaphore, retry_policy, stats)
                .await
                .map(|()| if already_downloaded { ItemOutcome::Skipped } else { ItemOutcome::Completed })
                .map_err(|e| e.to_string())
        }
        "periodical" => {
            let pages = store
                .pages
                .list_by_lccn(&item.reference_id)
                .await
                .map_err(|e| e.to_string())?
                .into_iter()
                .filter(|p| !p.downloaded)
                .collect::<Vec<_>>();

            process_page_set(store, &pages, download_root, file_types, fetcher, semaphore, retry_policy, stats).await
        }
        "facet" => {
            let facet_id: i64 = item
                .reference_id
                .parse()
                .map_err(|_| format!("malformed facet reference_id: {}", item.reference_id))?;
            let facet = store.facets.get(facet_id).await.map_err(|e| e.to_string())?;
            let pages = pages_for_facet(store, &facet).await.map_err(|e| e.to_string())?;

            process_page_set(store, &pages, download_root, file_types, fetcher, semaphore, retry_policy, stats).await
        }
        other => Err(format!("unknown queue_type: {other}")),
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_page_set(
    store: &Store,
    pages: &[Page],
    download_root: &Path,
    file_types: &[FileType],
    fetcher: &Arc<FileFetcher>,
    semaphore: &Arc<Semaphore>,
    retry_policy: &RetryPolicy,
    stats: &DownloadStats,
) -> Result<ItemOutcome, String> {
    if pages.is_empty() {
        return Ok(ItemOutcome::Skipped);
    }

    let mut any_succeeded = false;
    let mut last_error = None;

    for page in pages {
        match process_page(store, page, download_root, file_types, fetcher, semaphore, retry_policy, stats).await {
            Ok(_) => any_succeeded = true,
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    if any_succeeded {
        Ok(ItemOutcome::Completed)
    } else {
        Err(last_error.unwrap_or_else(|| "no pages succeeded".to_string()))
    }
}

/// Resolves the page set behind a `facet` queue item from the facet's own
/// discovery criteria, since pages carry no facet back-reference.
async fn pages_for_facet(store: &Store, facet: &SearchFacet) -> Result<Vec<Page>, StoreError> {
    match facet.facet_type.as_str() {
        "date_range" => {
            let (d1, d2) = date_bounds(&facet.facet_value)
                .ok_or_else(|| StoreError::InvalidFacetValue {
                    facet_type: facet.facet_type.clone(),
                    value: facet.facet_value.clone(),
                    reason: "could not parse date bounds".to_string(),
                })?;
            store.pages.list_undownloaded(Some((&d1, &d2)), None).await
        }
        "state" => {
            let periodicals = store.periodicals.list_by_state(&facet.facet_value).await?;
            let lccns: Vec<String> = periodicals.into_iter().map(|p| p.lccn).collect();
            store.pages.list_undownloaded(None, Some(&lccns)).await
        }
        "combined" => {
            let (state, date_part) = facet.facet_value.split_once('|').ok_or_else(|| StoreError::InvalidFacetValue {
                facet_type: facet.facet_type.clone(),
                value: facet.facet_value.clone(),
                reason: "expected '<state>|<range>'".to_string(),
            })?;
            let (d1, d2) = date_bounds(date_part).ok_or_else(|| StoreError::InvalidFacetValue {
                facet_type: facet.facet_type.clone(),
                value: facet.facet_value.clone(),
                reason: "could not parse date bounds".to_string(),
            })?;
            let periodicals = store.periodicals.list_by_state(state).await?;
            let lccns: Vec<String> = periodicals.into_iter().map(|p| p.lccn).collect();
            store.pages.list_undownloaded(Some((&d1, &d2)), Some(&lccns)).await
        }
        other => Err(StoreError::InvalidFacetValue {
            facet_type: other.to_string(),
            value: facet.facet_value.clone(),
            reason: "unsupported facet_type for download".to_string(),
        }),
    }
}

/// Parses a facet's `"YYYY/YYYY"` or `"YYYY-MM-DD/YYYY-MM-DD"` value into
/// ISO date bounds suitable for a `pages.date` range filter.
pub(crate) fn date_bounds(value: &str) -> Option<(String, String)> {
    use crate::http_client::date_range::{self, DateRangeParam};
    match date_range::parse_facet_value(value).ok()? {
        DateRangeParam::YearRange(y1, y2) | DateRangeParam::ExpandedYearRange(y1, y2) => {
            Some((format!("{y1}-01-01"), format!("{y2}-12-31")))
        }
        DateRangeParam::Exact(d1, d2) => Some((d1, d2)),
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_page(
    store: &Store,
    page: &Page,
    download_root: &Path,
    file_types: &[FileType],
    fetcher: &Arc<FileFetcher>,
    semaphore: &Arc<Semaphore>,
    retry_policy: &RetryPolicy,
    stats: &DownloadStats,
) -> Result<(), DownloadError> {
    if page.downloaded {
        return Ok(());
    }

    let (year, month) = split_date(&page.date);
    let page_dir = download_root.join(&page.lccn).join(year).join(month);
    tokio::fs::create_dir_all(&page_dir)
        .await
        .map_err(|e| DownloadError::io(page_dir.clone(), e))?;

    let stem = sanitize_item_id(&page.item_id);
    let mut files_written = Vec::new();
    let mut any_binary_downloaded = false;

    for (file_type, url) in binary_targets(page, file_types) {
        let dest = page_dir.join(format!("{stem}.{}", file_type.as_str()));

        if let Some(existing) = FileFetcher::skip_if_present(&dest).await {
            debug!(path = %dest.display(), bytes = existing, "file already present, skipping");
            files_written.push(dest);
            continue;
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DownloadError::io(dest.clone(), std::io::Error::other("semaphore closed")))?;

        let bytes = fetch_with_retry(fetcher, &url, &dest, retry_policy, stats).await?;
        drop(permit);

        stats.add_bytes(bytes);
        any_binary_downloaded = true;
        files_written.push(dest);
    }

    if file_types.contains(&FileType::Ocr) {
        if let Some(ocr_text) = page.ocr_text.as_deref() {
            let dest = page_dir.join(format!("{stem}_ocr.txt"));
            tokio::fs::write(&dest, ocr_text)
                .await
                .map_err(|e| DownloadError::io(dest.clone(), e))?;
            files_written.push(dest);
        }
    }

    if file_types.contains(&FileType::Metadata) {
        let dest = page_dir.join(format!("{stem}_metadata.json"));
        let metadata = PageMetadata {
            item_id: &page.item_id,
            lccn: &page.lccn,
            title: page.title.as_deref(),
            date: &page.date,
            edition: page.edition,
            sequence: page.sequence,
            page_url: &page.page_url,
            download_date: chrono::Utc::now().to_rfc3339(),
            files: files_written.iter().map(|p| p.display().to_string()).collect(),
            file_types_requested: file_types.iter().map(|ft| ft.as_str()).collect(),
        };
        let body = serde_json::to_vec_pretty(&metadata).unwrap_or_default();
        tokio::fs::write(&dest, body)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;
    }

    if any_binary_downloaded || !files_written.is_empty() {
        store
            .pages
            .mark_page_downloaded(&page.item_id)
            .await
            .map_err(|e| DownloadError::io(page_dir, std::io::Error::other(e.to_string())))?;
    }

    Ok(())
}

fn binary_targets(page: &Page, file_types: &[FileType]) -> Vec<(FileType, String)> {
    let mut targets = Vec::new();
    if file_types.contains(&FileType::Pdf) {
        if let Some(url) = &page.pdf_url {
            targets.push((FileType::Pdf, url.clone()));
        }
    }
    if file_types.contains(&FileType::Jp2) {
        if let Some(url) = &page.jp2_url {
            targets.push((FileType::Jp2, url.clone()));
        }
    }
    targets
}

async fn fetch_with_retry(
    fetcher: &FileFetcher,
    url: &str,
    dest: &Path,
    policy: &RetryPolicy,
    stats: &DownloadStats,
) -> Result<u64, DownloadError> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match fetcher.fetch(url, dest).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                let failure_type = classify_error(&e);
                match policy.should_retry(failure_type, attempt) {
                    RetryDecision::Retry { delay, attempt: next } => {
                        warn!(url, attempt = next, delay_ms = delay.as_millis(), error = %e, "retrying file fetch");
                        stats.increment_retried();
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { .. } => return Err(e),
                }
            }
        }
    }
}

fn split_date(date: &str) -> (&str, &str) {
    let year = date.get(0..4).unwrap_or("0000");
    let month = date.get(5..7).unwrap_or("00");
    (year, month)
}

/// Sanitizes an item_id for use as a path component: `/`, `\`, `:`
/// all become `_`.
fn sanitize_item_id(item_id: &str) -> String {
    item_id
        .trim_matches('/')
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            other => other,
        })
        .collect()
}
