//! Batch-mode discovery: walks batches -> issues ->
//! pages, preferred over facet mode because it reads server-prepared
//! bundles and rarely triggers CAPTCHA.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::error::DiscoveryError;
use super::item_id;
use crate::http_client::{types::BatchIssue, ArchiveClient, ClientError};
use crate::rate_gate::RateGate;
use crate::shutdown::ShutdownSignal;
use crate::store::page::NewPage;
use crate::store::session::{SessionStatus, SessionUpdate};
use crate::store::Store;

/// Priority given to pages discovered via batch mode.
const BATCH_PAGE_PRIORITY: i64 = 2;

/// Interval at which the engine polls the gate while `captcha_blocked`.
const CAPTCHA_POLL_INTERVAL: Duration = Duration::from_secs(300);
const CAPTCHA_POLL_TICK: Duration = Duration::from_secs(1);

pub struct BatchDiscovery {
    client: Arc<ArchiveClient>,
    gate: Arc<RateGate>,
    store: Store,
    shutdown: ShutdownSignal,
}

impl BatchDiscovery {
    #[must_use]
    pub fn new(client: Arc<ArchiveClient>, gate: Arc<RateGate>, store: Store, shutdown: ShutdownSignal) -> Self {
        Self {
            client,
            gate,
            store,
            shutdown,
        }
    }

    /// Runs (or resumes) a named discovery session to completion, or until
    /// cancelled / a non-recoverable error occurs.
    #[instrument(skip(self), fields(session_name))]
    pub async fn run(&self, session_name: &str, auto_enqueue: bool) -> Result<(), DiscoveryError> {
        let batches = self.client.iter_all_batches().await.map_err(DiscoveryError::from_client)?;

        let session = self
            .store
            .sessions
            .create_discovery_session(session_name, batches.len() as i64, auto_enqueue)
            .await?;

        let resume_batch_idx = session.current_batch_index as usize;
        let mut resume_issue_idx = session.current_issue_index as usize;

        for (batch_idx, batch_summary) in batches.iter().enumerate().skip(resume_batch_idx) {
            if self.shutdown.is_triggered() {
                return Err(DiscoveryError::Cancelled);
            }

            let starting_issue_idx = if batch_idx == resume_batch_idx { resume_issue_idx } else { 0 };

            self.store
                .sessions
                .update_discovery_session(
                    session.id,
                    &SessionUpdate {
                        current_batch_index: Some(batch_idx as i64),
                        current_batch_name: Some(Some(batch_summary.name.clone())),
                        current_issue_index: Some(starting_issue_idx as i64),
                        total_issues_in_batch: Some(0),
                        ..Default::default()
                    },
                )
                .await?;

            let detail = self
                .client
                .get_batch(&batch_summary.name)
                .await
                .map_err(DiscoveryError::from_client)?;

            self.store
                .sessions
                .update_discovery_session(
                    session.id,
                    &SessionUpdate {
                        total_issues_in_batch: Some(detail.issues.len() as i64),
                        ..Default::default()
                    },
                )
                .await?;

            info!(batch = %batch_summary.name, issues = detail.issues.len(), "discovering batch");

            self.walk_issues(session.id, &detail.issues, starting_issue_idx, auto_enqueue)
                .await?;

            resume_issue_idx = 0;
        }

        self.store
            .sessions
            .update_discovery_session(
                session.id,
                &SessionUpdate {
                    status: Some(SessionStatus::Completed),
                    ..Default::default()
                },
            )
            .await?;

        Ok(())
    }

    async fn walk_issues(
        &self,
        session_id: i64,
        issues: &[BatchIssue],
        start_at: usize,
        auto_enqueue: bool,
    ) -> Result<(), DiscoveryError> {
        let mut i = start_at;
        while i < issues.len() {
            if self.shutdown.is_triggered() {
                return Err(DiscoveryError::Cancelled);
            }

            let issue = &issues[i];

            let Some(parts) = item_id::parse_issue(&issue.url) else {
                warn!(url = %issue.url, "could not parse issue url, skipping");
                self.advance_issue(session_id, i + 1, 0, 0).await?;
                i += 1;
                continue;
            };

            if self
                .store
                .pages
                .count_issue_pages(&parts.lccn, &parts.date, parts.edition)
                .await?
                > 0
            {
                debug!(lccn = %parts.lccn, date = %parts.date, "fast path: issue already ingested");
                self.advance_issue(session_id, i + 1, 0, 0).await?;
                i += 1;
                continue;
            }

            match self.client.get_issue(&issue.url).await {
                Ok(issue_detail) => {
                    let title = issue_detail
                        .title
                        .as_ref()
                        .and_then(|t| t.name.clone())
                        .or_else(|| issue.title.as_ref().and_then(|t| t.name.clone()));

                    let pages: Vec<NewPage> = issue_detail
                        .pages
                        .iter()
                        .map(|page| {
                            let page_item_id =
                                item_id::resolve(None, Some(&page.url), &parts.lccn, &parts.date, page.sequence as i64);
                            NewPage {
                                item_id: page_item_id,
                                lccn: parts.lccn.clone(),
                                title: title.clone(),
                                date: parts.date.clone(),
                                edition: parts.edition,
                                sequence: page.sequence as i64,
                                page_url: page.url.clone(),
                                pdf_url: Some(format!("{}.pdf", page.url)),
                                jp2_url: Some(format!("{}.jp2", page.url)),
                                ocr_url: Some(format!("{}/ocr.txt", page.url)),
                                ocr_text: None,
                                word_count: None,
                            }
                        })
                        .collect();

                    let (stored, enqueued) = if auto_enqueue {
                        self.store.pages.store_pages_and_enqueue(&pages, BATCH_PAGE_PRIORITY).await?
                    } else {
                        let stored = self.store.pages.store_pages(&pages).await?;
                        (stored, 0)
                    };

                    self.advance_issue(session_id, i + 1, stored as i64, enqueued as i64)
                        .await?;
                    i += 1;
                }
                Err(ClientError::Captcha { .. }) | Err(ClientError::CaptchaDetected { .. }) => {
                    self.store
                        .sessions
                        .update_discovery_session(
                            session_id,
                            &SessionUpdate {
                                status: Some(SessionStatus::CaptchaBlocked),
                                ..Default::default()
                            },
                        )
                        .await?;

                    warn!("captcha detected during batch discovery, polling gate");
                    self.poll_until_unblocked().await?;

                    self.store
                        .sessions
                        .update_discovery_session(
                            session_id,
                            &SessionUpdate {
                                status: Some(SessionStatus::Active),
                                ..Default::default()
                            },
                        )
                        .await?;
                    // Retry the same issue; do not advance i.
                }
                Err(other) => return Err(DiscoveryError::from_client(other)),
            }
        }

        Ok(())
    }

    async fn advance_issue(
        &self,
        session_id: i64,
        next_issue_idx: usize,
        delta_discovered: i64,
        delta_enqueued: i64,
    ) -> Result<(), DiscoveryError> {
        self.store
            .sessions
            .update_discovery_session(
                session_id,
                &SessionUpdate {
                    current_issue_index: Some(next_issue_idx as i64),
                    delta_pages_discovered: delta_discovered,
                    delta_pages_enqueued: delta_enqueued,
                    ..Default::default()
                },
            )
            .await?;
        Ok(())
    }

    /// Interruptible wait for the gate to clear its cooldown, polled at
    /// one-second resolution so a shutdown signal lands promptly even
    /// though the conceptual poll interval is 5 minutes.
    async fn poll_until_unblocked(&self) -> Result<(), DiscoveryError> {
        loop {
            if !self.gate.is_blocked().await {
                return Ok(());
            }
            if self.shutdown.is_triggered() {
                return Err(DiscoveryError::Cancelled);
            }

            let mut waited = Duration::ZERO;
            while waited < CAPTCHA_POLL_INTERVAL {
                if self.shutdown.is_triggered() {
                    return Err(DiscoveryError::Cancelled);
                }
                tokio::time::sleep(CAPTCHA_POLL_TICK).await;
                waited += CAPTCHA_POLL_TICK;
                if !self.gate.is_blocked().await {
                    return Ok(());
                }
            }
        }
    }
}
