//! DiscoverySession entity driving batch-mode discovery.

use sqlx::FromRow;
use tracing::instrument;

use super::error::StoreError;
use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    CaptchaBlocked,
    Completed,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::CaptchaBlocked => "captcha_blocked",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DiscoverySession {
    pub id: i64,
    pub session_name: String,
    pub total_batches: i64,
    pub current_batch_index: i64,
    pub current_batch_name: Option<String>,
    pub total_issues_in_batch: i64,
    pub current_issue_index: i64,
    pub total_pages_discovered: i64,
    pub total_pages_enqueued: i64,
    pub auto_enqueue: bool,
    pub status: String,
}

/// Fields mutated after processing one batch/issue step. `delta_*` fields
/// are additive so a crashed-and-resumed run can't double count, as long as
/// callers only apply each step's delta once.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub current_batch_index: Option<i64>,
    pub current_batch_name: Option<Option<String>>,
    pub total_issues_in_batch: Option<i64>,
    pub current_issue_index: Option<i64>,
    pub delta_pages_discovered: i64,
    pub delta_pages_enqueued: i64,
}

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Idempotent on `session_name`: resuming a named run returns the
    /// existing session rather than starting a fresh one at batch zero.
    #[instrument(skip(self))]
    pub async fn create_discovery_session(
        &self,
        session_name: &str,
        total_batches: i64,
        auto_enqueue: bool,
    ) -> Result<DiscoverySession, StoreError> {
        if let Some(existing) = self.get_by_name(session_name).await? {
            return Ok(existing);
        }

        sqlx::query(
            "INSERT INTO batch_discovery_sessions (session_name, total_batches, auto_enqueue)
             VALUES (?, ?, ?)",
        )
        .bind(session_name)
        .bind(total_batches)
        .bind(auto_enqueue)
        .execute(self.db.pool())
        .await?;

        self.get_by_name(session_name)
            .await?
            .ok_or_else(|| StoreError::SessionNotFound(session_name.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn get_by_name(&self, session_name: &str) -> Result<Option<DiscoverySession>, StoreError> {
        let session = sqlx::query_as::<_, DiscoverySession>(
            "SELECT * FROM batch_discovery_sessions WHERE session_name = ?",
        )
        .bind(session_name)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(session)
    }

    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<DiscoverySession, StoreError> {
        sqlx::query_as::<_, DiscoverySession>("SELECT * FROM batch_discovery_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| StoreError::SessionNotFound(id.to_string()))
    }

    /// Applies a discovery step atomically: position cursors and running
    /// totals move together, so a crash can resume from exactly where the
    /// last committed step left off.
    #[instrument(skip(self, update))]
    pub async fn update_discovery_session(
        &self,
        id: i64,
        update: &SessionUpdate,
    ) -> Result<(), StoreError> {
        let mut tx = self.db.pool().begin().await?;

        let session = sqlx::query_as::<_, DiscoverySession>(
            "SELECT * FROM batch_discovery_sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::SessionNotFound(id.to_string()))?;

        let new_status = update.status.map(SessionStatus::as_str).unwrap_or(&session.status);
        let new_batch_index = update.current_batch_index.unwrap_or(session.current_batch_index);
        let new_batch_name = match &update.current_batch_name {
            Some(value) => value.clone(),
            None => session.current_batch_name.clone(),
        };
        let new_issues_in_batch = update
            .total_issues_in_batch
            .unwrap_or(session.total_issues_in_batch);
        let new_issue_index = update.current_issue_index.unwrap_or(session.current_issue_index);
        let new_pages_discovered = session.total_pages_discovered + update.delta_pages_discovered;
        let new_pages_enqueued = session.total_pages_enqueued + update.delta_pages_enqueued;

        sqlx::query(
            "UPDATE batch_discovery_sessions SET
                status = ?,
                current_batch_index = ?,
                current_batch_name = ?,
                total_issues_in_batch = ?,
                current_issue_index = ?,
                total_pages_discovered = ?,
                total_pages_enqueued = ?,
                updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(new_status)
        .bind(new_batch_index)
        .bind(&new_batch_name)
        .bind(new_issues_in_batch)
        .bind(new_issue_index)
        .bind(new_pages_discovered)
        .bind(new_pages_enqueued)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_discovery_session_is_idempotent_by_name() {
        let db = Database::new_in_memory().await.unwrap();
        let store = SessionStore::new(db);

        let first = store.create_discovery_session("run-1", 100, true).await.unwrap();
        let second = store.create_discovery_session("run-1", 999, false).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.total_batches, 100);
    }

    #[tokio::test]
    async fn test_update_discovery_session_accumulates_deltas() {
        let db = Database::new_in_memory().await.unwrap();
        let store = SessionStore::new(db);
        let session = store.create_discovery_session("run-1", 100, true).await.unwrap();

        store
            .update_discovery_session(
                session.id,
                &SessionUpdate {
                    current_batch_index: Some(1),
                    current_batch_name: Some(Some("batch_001".to_string())),
                    delta_pages_discovered: 40,
                    delta_pages_enqueued: 40,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store
            .update_discovery_session(
                session.id,
                &SessionUpdate {
                    current_batch_index: Some(2),
                    delta_pages_discovered: 60,
                    delta_pages_enqueued: 55,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let updated = store.get(session.id).await.unwrap();
        assert_eq!(updated.current_batch_index, 2);
        assert_eq!(updated.total_pages_discovered, 100);
        assert_eq!(updated.total_pages_enqueued, 95);
        assert_eq!(updated.current_batch_name.as_deref(), Some("batch_001"));
    }

    #[tokio::test]
    async fn test_update_missing_session_errors() {
        let db = Database::new_in_memory().await.unwrap();
        let store = SessionStore::new(db);
        let result = store.update_discovery_session(999, &SessionUpdate::default()).await;
        assert!(matches!(result, Err(StoreError::SessionNotFound(_))));
    }
}
