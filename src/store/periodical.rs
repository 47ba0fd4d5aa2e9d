//! Periodical entity and its atomic store operations.

use serde::Serialize;
use sqlx::FromRow;
use tracing::instrument;

use super::error::StoreError;
use crate::db::Database;

/// Input for [`PeriodicalStore::upsert_periodicals`].
#[derive(Debug, Clone, Serialize)]
pub struct NewPeriodical {
    pub lccn: String,
    pub title: String,
    pub state: Option<String>,
    pub city: Option<String>,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub frequency: Option<String>,
    pub language: Option<String>,
    pub subject: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Periodical {
    pub lccn: String,
    pub title: String,
    pub state: Option<String>,
    pub city: Option<String>,
    pub start_year: Option<i64>,
    pub end_year: Option<i64>,
    pub frequency: Option<String>,
    pub language: Option<String>,
    pub subject: Option<String>,
    pub url: Option<String>,
    pub total_issues: i64,
    pub issues_discovered: i64,
    pub issues_downloaded: i64,
    pub discovery_complete: bool,
    pub download_complete: bool,
}

#[derive(Clone)]
pub struct PeriodicalStore {
    db: Database,
}

impl PeriodicalStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Idempotent by lccn: identifying fields are refreshed on conflict, but
    /// discovery/download counters and completion flags are left untouched
    /// so a re-enumeration of the listing never rewinds progress.
    #[instrument(skip(self, items))]
    pub async fn upsert_periodicals(&self, items: &[NewPeriodical]) -> Result<usize, StoreError> {
        let mut tx = self.db.pool().begin().await?;
        let mut count = 0usize;

        for item in items {
            let raw_json = serde_json::to_string(item).unwrap_or_default();
            sqlx::query(
                "INSERT INTO newspapers (lccn, raw_json, fetched_at) VALUES (?, ?, datetime('now'))
                 ON CONFLICT(lccn) DO UPDATE SET raw_json = excluded.raw_json, fetched_at = excluded.fetched_at",
            )
            .bind(&item.lccn)
            .bind(&raw_json)
            .execute(&mut *tx)
            .await?;

            let result = sqlx::query(
                "INSERT INTO periodicals (lccn, title, state, city, start_year, end_year, frequency, language, subject, url)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(lccn) DO UPDATE SET
                    title = excluded.title,
                    state = excluded.state,
                    city = excluded.city,
                    start_year = excluded.start_year,
                    end_year = excluded.end_year,
                    frequency = excluded.frequency,
                    language = excluded.language,
                    subject = excluded.subject,
                    url = excluded.url,
                    updated_at = datetime('now')",
            )
            .bind(&item.lccn)
            .bind(&item.title)
            .bind(&item.state)
            .bind(&item.city)
            .bind(item.start_year)
            .bind(item.end_year)
            .bind(&item.frequency)
            .bind(&item.language)
            .bind(&item.subject)
            .bind(&item.url)
            .execute(&mut *tx)
            .await?;

            count += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, lccn: &str) -> Result<Option<Periodical>, StoreError> {
        let periodical = sqlx::query_as::<_, Periodical>("SELECT * FROM periodicals WHERE lccn = ?")
            .bind(lccn)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(periodical)
    }

    /// Caches a periodical's issue list (populated by `get_periodical`).
    #[instrument(skip(self, issues))]
    pub async fn store_issues(&self, lccn: &str, issues: &[(String, String)]) -> Result<usize, StoreError> {
        let mut tx = self.db.pool().begin().await?;
        let mut count = 0usize;
        for (date_issued, url) in issues {
            let result = sqlx::query(
                "INSERT OR REPLACE INTO periodical_issues (lccn, date_issued, url) VALUES (?, ?, ?)",
            )
            .bind(lccn)
            .bind(date_issued)
            .bind(url)
            .execute(&mut *tx)
            .await?;
            count += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(count)
    }

    #[instrument(skip(self))]
    pub async fn increment_issues_discovered(&self, lccn: &str, delta: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE periodicals SET issues_discovered = issues_discovered + ?, updated_at = datetime('now') WHERE lccn = ?",
        )
        .bind(delta)
        .bind(lccn)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Known periodicals for a state, used by facet-mode discovery to
    /// decide whether a `state` facet has anything to search and, if so,
    /// to restrict the query to a bounded set of LCCNs.
    #[instrument(skip(self))]
    pub async fn list_by_state(&self, state: &str) -> Result<Vec<Periodical>, StoreError> {
        let periodicals = sqlx::query_as::<_, Periodical>(
            "SELECT * FROM periodicals WHERE state = ? ORDER BY lccn",
        )
        .bind(state)
        .fetch_all(self.db.pool())
        .await?;
        Ok(periodicals)
    }
}
