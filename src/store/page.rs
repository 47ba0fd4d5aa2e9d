//! Page entity and its atomic store operations.

use sqlx::{FromRow, QueryBuilder, Sqlite};
use tracing::instrument;

use super::error::StoreError;
use crate::db::Database;

#[derive(Debug, Clone)]
pub struct NewPage {
    pub item_id: String,
    pub lccn: String,
    pub title: Option<String>,
    pub date: String,
    pub edition: i64,
    pub sequence: i64,
    pub page_url: String,
    pub pdf_url: Option<String>,
    pub jp2_url: Option<String>,
    pub ocr_url: Option<String>,
    pub ocr_text: Option<String>,
    pub word_count: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Page {
    pub item_id: String,
    pub lccn: String,
    pub title: Option<String>,
    pub date: String,
    pub edition: i64,
    pub sequence: i64,
    pub page_url: String,
    pub pdf_url: Option<String>,
    pub jp2_url: Option<String>,
    pub ocr_url: Option<String>,
    pub ocr_text: Option<String>,
    pub word_count: Option<i64>,
    pub downloaded: bool,
}

#[derive(Clone)]
pub struct PageStore {
    db: Database,
}

impl PageStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Idempotent by `item_id`. Returns the count of rows actually inserted
    /// (duplicates within the batch, or already on disk, don't count twice).
    #[instrument(skip(self, pages))]
    pub async fn store_pages(&self, pages: &[NewPage]) -> Result<usize, StoreError> {
        let mut tx = self.db.pool().begin().await?;
        let count = insert_pages(&mut tx, pages).await?;
        tx.commit().await?;
        Ok(count)
    }

    /// Atomically stores pages and enqueues a `page` [`crate::store::queue::QueueItem`]
    /// for every page newly inserted by this call. A page that exists without
    /// a queue entry would be undiscoverable by the download engine, so this
    /// must happen in one transaction.
    #[instrument(skip(self, pages))]
    pub async fn store_pages_and_enqueue(
        &self,
        pages: &[NewPage],
        priority: i64,
    ) -> Result<(usize, usize), StoreError> {
        let mut tx = self.db.pool().begin().await?;

        let mut stored = 0usize;
        let mut enqueued = 0usize;

        for page in pages {
            let result = insert_one_page(&mut tx, page).await?;
            if result {
                stored += 1;
                sqlx::query(
                    "INSERT INTO download_queue (queue_type, reference_id, priority, status)
                     VALUES ('page', ?, ?, 'queued')",
                )
                .bind(&page.item_id)
                .bind(priority)
                .execute(&mut *tx)
                .await?;
                enqueued += 1;
            }
        }

        tx.commit().await?;
        Ok((stored, enqueued))
    }

    #[instrument(skip(self))]
    pub async fn mark_page_downloaded(&self, item_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE pages SET downloaded = 1, updated_at = datetime('now') WHERE item_id = ?",
        )
        .bind(item_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Fast duplicate check used by batch discovery's fast path: if an
    /// issue's pages are already stored, skip re-fetching the issue.
    #[instrument(skip(self))]
    pub async fn count_issue_pages(&self, lccn: &str, date: &str, edition: i64) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM pages WHERE lccn = ? AND date = ? AND edition = ?",
        )
        .bind(lccn)
        .bind(date)
        .bind(edition)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.0)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, item_id: &str) -> Result<Option<Page>, StoreError> {
        let page = sqlx::query_as::<_, Page>("SELECT * FROM pages WHERE item_id = ?")
            .bind(item_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(page)
    }

    #[instrument(skip(self))]
    pub async fn list_by_lccn(&self, lccn: &str) -> Result<Vec<Page>, StoreError> {
        let pages = sqlx::query_as::<_, Page>("SELECT * FROM pages WHERE lccn = ? ORDER BY date, sequence")
            .bind(lccn)
            .fetch_all(self.db.pool())
            .await?;
        Ok(pages)
    }

    /// `count()` of total Pages in the store; used by crash/restart
    /// monotonicity checks.
    #[instrument(skip(self))]
    pub async fn count_all(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pages")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.0)
    }

    /// Resolves the page set behind a `facet` or `periodical` download-queue
    /// item: pages aren't linked to the facet that discovered them, so the
    /// download engine re-derives the set from the same `date`/`lccn`
    /// criteria the facet used.
    #[instrument(skip(self, lccns))]
    pub async fn list_undownloaded(
        &self,
        date_range: Option<(&str, &str)>,
        lccns: Option<&[String]>,
    ) -> Result<Vec<Page>, StoreError> {
        if lccns.is_some_and(<[String]>::is_empty) {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM pages WHERE downloaded = 0");

        if let Some((date1, date2)) = date_range {
            qb.push(" AND date >= ").push_bind(date1.to_string());
            qb.push(" AND date <= ").push_bind(date2.to_string());
        }

        if let Some(lccns) = lccns {
            qb.push(" AND lccn IN (");
            let mut separated = qb.separated(", ");
            for lccn in lccns {
                separated.push_bind(lccn.clone());
            }
            separated.push_unseparated(")");
        }

        qb.push(" ORDER BY date, sequence");

        let pages = qb.build_query_as::<Page>().fetch_all(self.db.pool()).await?;
        Ok(pages)
    }

    /// Same scoping as [`Self::list_undownloaded`] but without the
    /// `downloaded = 0` filter, used by `ops merge` to pull a facet's full
    /// page set — including already-downloaded pages — out of a worker store.
    #[instrument(skip(self, lccns))]
    pub async fn list_by_scope(
        &self,
        date_range: Option<(&str, &str)>,
        lccns: Option<&[String]>,
    ) -> Result<Vec<Page>, StoreError> {
        if lccns.is_some_and(<[String]>::is_empty) {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM pages WHERE 1 = 1");

        if let Some((date1, date2)) = date_range {
            qb.push(" AND date >= ").push_bind(date1.to_string());
            qb.push(" AND date <= ").push_bind(date2.to_string());
        }

        if let Some(lccns) = lccns {
            qb.push(" AND lccn IN (");
            let mut separated = qb.separated(", ");
            for lccn in lccns {
                separated.push_bind(lccn.clone());
            }
            separated.push_unseparated(")");
        }

        qb.push(" ORDER BY date, sequence");

        let pages = qb.build_query_as::<Page>().fetch_all(self.db.pool()).await?;
        Ok(pages)
    }

    /// Copies pages from a worker store back into the master (`ops merge`),
    /// overwriting the master's row for the same `item_id` — a worker's
    /// `downloaded` flag and OCR text are the authoritative, newer copy.
    #[instrument(skip(self, pages))]
    pub async fn upsert_raw_pages(&self, pages: &[Page]) -> Result<usize, StoreError> {
        let mut tx = self.db.pool().begin().await?;
        let mut count = 0usize;

        for page in pages {
            let result = sqlx::query(
                "INSERT INTO pages
                    (item_id, lccn, title, date, edition, sequence, page_url,
                     pdf_url, jp2_url, ocr_url, ocr_text, word_count, downloaded)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(item_id) DO UPDATE SET
                    title = excluded.title,
                    pdf_url = excluded.pdf_url,
                    jp2_url = excluded.jp2_url,
                    ocr_url = excluded.ocr_url,
                    ocr_text = excluded.ocr_text,
                    word_count = excluded.word_count,
                    downloaded = excluded.downloaded,
                    updated_at = datetime('now')",
            )
            .bind(&page.item_id)
            .bind(&page.lccn)
            .bind(&page.title)
            .bind(&page.date)
            .bind(page.edition)
            .bind(page.sequence)
            .bind(&page.page_url)
            .bind(&page.pdf_url)
            .bind(&page.jp2_url)
            .bind(&page.ocr_url)
            .bind(&page.ocr_text)
            .bind(page.word_count)
            .bind(page.downloaded)
            .execute(&mut *tx)
            .await?;
            count += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(count)
    }
}

async fn insert_pages(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    pages: &[NewPage],
) -> Result<usize, StoreError> {
    let mut count = 0usize;
    for page in pages {
        if insert_one_page(tx, page).await? {
            count += 1;
        }
    }
    Ok(count)
}

async fn insert_one_page(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    page: &NewPage,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "INSERT INTO pages (item_id, lccn, title, date, edition, sequence, page_url, pdf_url, jp2_url, ocr_url, ocr_text, word_count)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(item_id) DO NOTHING",
    )
    .bind(&page.item_id)
    .bind(&page.lccn)
    .bind(&page.title)
    .bind(&page.date)
    .bind(page.edition)
    .bind(page.sequence)
    .bind(&page.page_url)
    .bind(&page.pdf_url)
    .bind(&page.jp2_url)
    .bind(&page.ocr_url)
    .bind(&page.ocr_text)
    .bind(page.word_count)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(item_id: &str, sequence: i64) -> NewPage {
        NewPage {
            item_id: item_id.to_string(),
            lccn: "sn84038012".to_string(),
            title: Some("The Sun".to_string()),
            date: "1900-01-01".to_string(),
            edition: 1,
            sequence,
            page_url: format!("https://example/lccn/sn84038012/1900-01-01/ed-1/seq-{sequence}/"),
            pdf_url: Some("https://example/.../seq-1.pdf".to_string()),
            jp2_url: Some("https://example/.../seq-1.jp2".to_string()),
            ocr_url: None,
            ocr_text: None,
            word_count: None,
        }
    }

    #[tokio::test]
    async fn test_store_pages_duplicate_input_stores_once() {
        let db = Database::new_in_memory().await.unwrap();
        let store = PageStore::new(db);

        let page = sample("sn84038012/1900-01-01/ed-1/seq-1/", 1);
        let count = store.store_pages(&[page.clone(), page]).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_store_pages_and_enqueue_first_call_matches_second_call_idempotent() {
        let db = Database::new_in_memory().await.unwrap();
        let store = PageStore::new(db);

        let pages = vec![sample("item-a", 1), sample("item-b", 2)];
        let (stored, enqueued) = store.store_pages_and_enqueue(&pages, 2).await.unwrap();
        assert_eq!((stored, enqueued), (2, 2));

        let (stored2, enqueued2) = store.store_pages_and_enqueue(&pages, 2).await.unwrap();
        assert_eq!((stored2, enqueued2), (0, 0));
    }

    #[tokio::test]
    async fn test_mark_page_downloaded() {
        let db = Database::new_in_memory().await.unwrap();
        let store = PageStore::new(db);
        store.store_pages(&[sample("item-a", 1)]).await.unwrap();

        store.mark_page_downloaded("item-a").await.unwrap();
        let page = store.get("item-a").await.unwrap().unwrap();
        assert!(page.downloaded);
    }

    #[tokio::test]
    async fn test_count_issue_pages_fast_path() {
        let db = Database::new_in_memory().await.unwrap();
        let store = PageStore::new(db);
        assert_eq!(store.count_issue_pages("sn84038012", "1900-01-01", 1).await.unwrap(), 0);

        store.store_pages(&[sample("item-a", 1)]).await.unwrap();
        assert_eq!(store.count_issue_pages("sn84038012", "1900-01-01", 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_undownloaded_filters_by_date_range_and_lccn() {
        let db = Database::new_in_memory().await.unwrap();
        let store = PageStore::new(db);

        let mut in_range = sample("item-a", 1);
        in_range.date = "1900-02-01".to_string();
        let mut out_of_range = sample("item-b", 2);
        out_of_range.date = "1950-01-01".to_string();
        store.store_pages(&[in_range, out_of_range]).await.unwrap();

        let results = store
            .list_undownloaded(Some(("1900-01-01", "1900-12-31")), None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item_id, "item-a");

        let mut other_lccn = sample("item-c", 3);
        other_lccn.lccn = "sn90000001".to_string();
        store.store_pages(&[other_lccn]).await.unwrap();

        let filtered = store
            .list_undownloaded(None, Some(&["sn90000001".to_string()]))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].item_id, "item-c");

        let empty = store.list_undownloaded(None, Some(&[])).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_count_all_monotonic_after_resumed_store() {
        let db = Database::new_in_memory().await.unwrap();
        let store = PageStore::new(db);
        store.store_pages(&[sample("item-a", 1), sample("item-b", 2)]).await.unwrap();
        assert_eq!(store.count_all().await.unwrap(), 2);

        // Simulated restart re-ingesting the same + new pages: count only grows.
        store
            .store_pages(&[sample("item-a", 1), sample("item-c", 3)])
            .await
            .unwrap();
        assert_eq!(store.count_all().await.unwrap(), 3);
    }
}
