//! SearchFacet entity driving facet-mode discovery.

use sqlx::FromRow;
use tracing::instrument;

use super::error::StoreError;
use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacetStatus {
    Pending,
    Discovering,
    Completed,
    Error,
    CaptchaRetry,
    CaptchaBlocked,
    NeedsSplitting,
    SplitCompleted,
}

impl FacetStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Discovering => "discovering",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::CaptchaRetry => "captcha_retry",
            Self::CaptchaBlocked => "captcha_blocked",
            Self::NeedsSplitting => "needs_splitting",
            Self::SplitCompleted => "split_completed",
        }
    }
}

impl std::fmt::Display for FacetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct NewFacet {
    pub facet_type: String,
    pub facet_value: String,
    pub query: Option<String>,
    pub estimated_items: Option<i64>,
    pub priority: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct SearchFacet {
    pub id: i64,
    pub facet_type: String,
    pub facet_value: String,
    pub query: Option<String>,
    pub estimated_items: Option<i64>,
    pub actual_items: Option<i64>,
    pub items_discovered: i64,
    pub items_downloaded: i64,
    pub current_page: i64,
    pub last_batch_size: i64,
    pub resume_from_page: i64,
    pub status: String,
    pub priority: i64,
    pub error_message: Option<String>,
}

impl SearchFacet {
    /// A facet self-audit: a facet claiming `completed` with pending error
    /// text, or whose discovered count doesn't match its actual count, is
    /// lying about its own state and needs a human or a re-run to resolve.
    #[must_use]
    pub fn is_self_consistent(&self) -> bool {
        if self.status == "completed" {
            if self.error_message.as_deref().is_some_and(|m| !m.is_empty()) {
                return false;
            }
            if let Some(actual) = self.actual_items {
                if self.items_discovered < actual {
                    return false;
                }
            }
        }
        true
    }
}

/// Fields mutated by a facet discovery iteration.
#[derive(Debug, Clone, Default)]
pub struct FacetUpdate {
    pub status: Option<FacetStatus>,
    pub current_page: Option<i64>,
    pub last_batch_size: Option<i64>,
    pub delta_items_discovered: i64,
    pub actual_items: Option<i64>,
    pub error_message: Option<Option<String>>,
}

#[derive(Clone)]
pub struct FacetStore {
    db: Database,
}

impl FacetStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Idempotent on `(facet_type, facet_value, query)`: re-creating an
    /// existing facet just returns its id, it does not reset progress.
    #[instrument(skip(self))]
    pub async fn create_search_facet(&self, facet: &NewFacet) -> Result<i64, StoreError> {
        let existing: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM search_facets WHERE facet_type = ? AND facet_value = ? AND query IS ?",
        )
        .bind(&facet.facet_type)
        .bind(&facet.facet_value)
        .bind(&facet.query)
        .fetch_optional(self.db.pool())
        .await?;

        if let Some((id,)) = existing {
            return Ok(id);
        }

        let result = sqlx::query(
            "INSERT INTO search_facets (facet_type, facet_value, query, estimated_items, priority)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&facet.facet_type)
        .bind(&facet.facet_value)
        .bind(&facet.query)
        .bind(facet.estimated_items)
        .bind(facet.priority)
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<SearchFacet, StoreError> {
        sqlx::query_as::<_, SearchFacet>("SELECT * FROM search_facets WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or(StoreError::FacetNotFound(id))
    }

    /// Claims the next eligible facet for discovery: highest priority first,
    /// oldest first among ties, restricted to statuses a worker may act on.
    #[instrument(skip(self))]
    pub async fn claim_next(&self) -> Result<Option<SearchFacet>, StoreError> {
        let facet = sqlx::query_as::<_, SearchFacet>(
            "SELECT * FROM search_facets
             WHERE status IN ('pending', 'discovering', 'captcha_retry')
             ORDER BY priority ASC, created_at ASC
             LIMIT 1",
        )
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(ref facet) = facet {
            sqlx::query(
                "UPDATE search_facets SET status = 'discovering', updated_at = datetime('now') WHERE id = ?",
            )
            .bind(facet.id)
            .execute(self.db.pool())
            .await?;
        }

        Ok(facet)
    }

    /// Applies one discovery iteration's results atomically: page cursor
    /// advance, discovered-count delta, and status transition all land
    /// together so a crash mid-page never leaves the facet's `resume_from_page`
    /// out of sync with what was actually recorded.
    #[instrument(skip(self, update))]
    pub async fn update_facet(&self, id: i64, update: &FacetUpdate) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await?;

        let facet = sqlx::query_as::<_, SearchFacet>("SELECT * FROM search_facets WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::FacetNotFound(id))?;

        let new_status = update.status.map(FacetStatus::as_str).unwrap_or(&facet.status);
        let new_current_page = update.current_page.unwrap_or(facet.current_page);
        let new_last_batch = update.last_batch_size.unwrap_or(facet.last_batch_size);
        let new_discovered = facet.items_discovered + update.delta_items_discovered;
        let new_actual = update.actual_items.or(facet.actual_items);
        let new_error = match &update.error_message {
            Some(value) => value.clone(),
            None => facet.error_message.clone(),
        };

        sqlx::query(
            "UPDATE search_facets SET
                status = ?,
                current_page = ?,
                resume_from_page = ?,
                last_batch_size = ?,
                items_discovered = ?,
                actual_items = ?,
                error_message = ?,
                updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(new_status)
        .bind(new_current_page)
        .bind(new_current_page)
        .bind(new_last_batch)
        .bind(new_discovered)
        .bind(new_actual)
        .bind(&new_error)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn list_by_status(&self, status: FacetStatus) -> Result<Vec<SearchFacet>, StoreError> {
        let facets = sqlx::query_as::<_, SearchFacet>(
            "SELECT * FROM search_facets WHERE status = ? ORDER BY priority ASC, created_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(facets)
    }

    /// Facets eligible to be handed to a worker by `ops split`: anything not
    /// already in a terminal state.
    #[instrument(skip(self))]
    pub async fn list_not_terminal(&self) -> Result<Vec<SearchFacet>, StoreError> {
        let facets = sqlx::query_as::<_, SearchFacet>(
            "SELECT * FROM search_facets WHERE status NOT IN ('completed', 'split_completed')
             ORDER BY priority ASC, created_at ASC",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(facets)
    }

    /// Facets a worker has finished, eligible to be copied back by `ops merge`.
    #[instrument(skip(self))]
    pub async fn list_terminal(&self) -> Result<Vec<SearchFacet>, StoreError> {
        let facets = sqlx::query_as::<_, SearchFacet>(
            "SELECT * FROM search_facets WHERE status IN ('completed', 'split_completed')
             ORDER BY priority ASC, created_at ASC",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(facets)
    }

    /// Seeds a worker store with a facet carried over verbatim from the
    /// master (used by `ops split`). A no-op if the natural key already
    /// exists, since a worker store starts empty.
    #[instrument(skip(self, facet))]
    pub async fn insert_raw(&self, facet: &SearchFacet) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO search_facets
                (facet_type, facet_value, query, estimated_items, actual_items,
                 items_discovered, items_downloaded, current_page, last_batch_size,
                 resume_from_page, status, priority, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(facet_type, facet_value, query) DO NOTHING",
        )
        .bind(&facet.facet_type)
        .bind(&facet.facet_value)
        .bind(&facet.query)
        .bind(facet.estimated_items)
        .bind(facet.actual_items)
        .bind(facet.items_discovered)
        .bind(facet.items_downloaded)
        .bind(facet.current_page)
        .bind(facet.last_batch_size)
        .bind(facet.resume_from_page)
        .bind(&facet.status)
        .bind(facet.priority)
        .bind(&facet.error_message)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Copies a worker's finished facet back into the master (`ops merge`),
    /// replacing whatever the master has for the same natural key.
    #[instrument(skip(self, facet))]
    pub async fn upsert_raw(&self, facet: &SearchFacet) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO search_facets
                (facet_type, facet_value, query, estimated_items, actual_items,
                 items_discovered, items_downloaded, current_page, last_batch_size,
                 resume_from_page, status, priority, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(facet_type, facet_value, query) DO UPDATE SET
                estimated_items = excluded.estimated_items,
                actual_items = excluded.actual_items,
                items_discovered = excluded.items_discovered,
                items_downloaded = excluded.items_downloaded,
                current_page = excluded.current_page,
                last_batch_size = excluded.last_batch_size,
                resume_from_page = excluded.resume_from_page,
                status = excluded.status,
                error_message = excluded.error_message,
                updated_at = datetime('now')",
        )
        .bind(&facet.facet_type)
        .bind(&facet.facet_value)
        .bind(&facet.query)
        .bind(facet.estimated_items)
        .bind(facet.actual_items)
        .bind(facet.items_discovered)
        .bind(facet.items_downloaded)
        .bind(facet.current_page)
        .bind(facet.last_batch_size)
        .bind(facet.resume_from_page)
        .bind(&facet.status)
        .bind(facet.priority)
        .bind(&facet.error_message)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }
}
