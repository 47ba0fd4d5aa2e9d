//! QueueItem entity: the download engine's unit of work.

use sqlx::FromRow;
use tracing::instrument;

use super::error::StoreError;
use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItemStatus {
    Queued,
    Active,
    Paused,
    Completed,
    Failed,
}

impl QueueItemStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueType {
    Page,
    Facet,
    Periodical,
}

impl QueueType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Facet => "facet",
            Self::Periodical => "periodical",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct QueueItem {
    pub id: i64,
    pub queue_type: String,
    pub reference_id: String,
    pub priority: i64,
    pub estimated_size_mb: Option<f64>,
    pub estimated_time_hours: Option<f64>,
    pub progress_percent: f64,
    pub error_message: Option<String>,
    pub status: String,
}

/// Returns `Ok(())` if at least one row was affected; otherwise a
/// [`StoreError::QueueItemNotFound`].
fn check_affected(id: i64, rows_affected: u64) -> Result<(), StoreError> {
    if rows_affected == 0 {
        Err(StoreError::QueueItemNotFound(id))
    } else {
        Ok(())
    }
}

/// One queue item's result, applied in a [`QueueStore::batch_update_queue`] call.
#[derive(Debug, Clone)]
pub struct QueueItemResult {
    pub id: i64,
    pub status: QueueItemStatus,
    pub progress_percent: f64,
    pub error_message: Option<String>,
}

#[derive(Clone)]
pub struct QueueStore {
    db: Database,
}

impl QueueStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Enqueues a `facet` or `periodical` work unit. Page enqueueing happens
    /// alongside page storage in [`crate::store::page::PageStore::store_pages_and_enqueue`].
    #[instrument(skip(self))]
    pub async fn enqueue(
        &self,
        queue_type: QueueType,
        reference_id: &str,
        priority: i64,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO download_queue (queue_type, reference_id, priority, status)
             VALUES (?, ?, ?, 'queued')",
        )
        .bind(queue_type.as_str())
        .bind(reference_id)
        .bind(priority)
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Atomically claims the highest-priority queued item, transitioning it
    /// to `active`. The partial unique index on `(queue_type, reference_id)
    /// WHERE status = 'active'` guarantees no reference is ever claimed twice
    /// concurrently.
    #[instrument(skip(self))]
    pub async fn dequeue(&self) -> Result<Option<QueueItem>, StoreError> {
        let item = sqlx::query_as::<_, QueueItem>(
            "UPDATE download_queue
             SET status = 'active', updated_at = datetime('now')
             WHERE id = (
                 SELECT id FROM download_queue
                 WHERE status = 'queued'
                 ORDER BY priority ASC, created_at ASC
                 LIMIT 1
             )
             RETURNING *",
        )
        .fetch_optional(self.db.pool())
        .await?;

        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<Option<QueueItem>, StoreError> {
        let item = sqlx::query_as::<_, QueueItem>("SELECT * FROM download_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn update_queue_item(
        &self,
        id: i64,
        status: QueueItemStatus,
        progress_percent: f64,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE download_queue
             SET status = ?, progress_percent = ?, error_message = ?, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(progress_percent)
        .bind(error_message)
        .bind(id)
        .execute(self.db.pool())
        .await?;

        check_affected(id, result.rows_affected())
    }

    /// Applies many item results as one transaction, used by the download
    /// engine's periodic flush (every N items or at batch end) so a crash
    /// mid-flush never leaves some of a batch's results committed and the
    /// rest lost.
    #[instrument(skip(self, results))]
    pub async fn batch_update_queue(&self, results: &[QueueItemResult]) -> Result<usize, StoreError> {
        let mut tx = self.db.pool().begin().await?;
        let mut count = 0usize;

        for result in results {
            let outcome = sqlx::query(
                "UPDATE download_queue
                 SET status = ?, progress_percent = ?, error_message = ?, updated_at = datetime('now')
                 WHERE id = ?",
            )
            .bind(result.status.as_str())
            .bind(result.progress_percent)
            .bind(&result.error_message)
            .bind(result.id)
            .execute(&mut *tx)
            .await?;

            count += outcome.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    pub async fn list_by_status(&self, status: QueueItemStatus) -> Result<Vec<QueueItem>, StoreError> {
        let items = sqlx::query_as::<_, QueueItem>(
            "SELECT * FROM download_queue WHERE status = ? ORDER BY priority ASC, created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(items)
    }

    /// Resets all `active` items back to `queued`. Called at startup for
    /// crash recovery.
    #[instrument(skip(self))]
    pub async fn reset_stuck_active(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE download_queue SET status = 'queued', updated_at = datetime('now') WHERE status = 'active'",
        )
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Resets all `failed` items back to `queued` and clears their error,
    /// so the next batch retries them from scratch.
    #[instrument(skip(self))]
    pub async fn resume_failed(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE download_queue SET status = 'queued', error_message = NULL, updated_at = datetime('now') WHERE status = 'failed'",
        )
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    pub async fn count_by_status(&self, status: QueueItemStatus) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM download_queue WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.0)
    }
}
