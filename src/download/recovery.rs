//! Operator recovery operations.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::store::Store;

/// Files produced by [`RecoveryOps::cleanup_incomplete`].
const MIN_PDF_BYTES: u64 = 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
}

pub struct RecoveryOps {
    store: Store,
    download_root: PathBuf,
}

impl RecoveryOps {
    #[must_use]
    pub fn new(store: Store, download_root: PathBuf) -> Self {
        Self { store, download_root }
    }

    /// All `failed` items go back to `queued`, error cleared.
    #[instrument(skip(self))]
    pub async fn resume_failed(&self) -> Result<u64, crate::store::StoreError> {
        self.store.queue.resume_failed().await
    }

    /// All `active` items go back to `queued` (used after a crash).
    #[instrument(skip(self))]
    pub async fn reset_stuck_active(&self) -> Result<u64, crate::store::StoreError> {
        self.store.queue.reset_stuck_active().await
    }

    /// Walks `<download_root>/<lccn>/<YYYY>/<MM>/` and deletes zero-byte
    /// files and PDFs under 1 KiB — the signature of a fetch that was
    /// interrupted mid-stream before a restart.
    #[instrument(skip(self))]
    pub async fn cleanup_incomplete(&self) -> std::io::Result<CleanupReport> {
        let mut report = CleanupReport::default();
        if !self.download_root.exists() {
            return Ok(report);
        }

        for lccn_dir in list_dirs(&self.download_root).await? {
            for year_dir in list_dirs(&lccn_dir).await? {
                for month_dir in list_dirs(&year_dir).await? {
                    let mut entries = tokio::fs::read_dir(&month_dir).await?;
                    while let Some(entry) = entries.next_entry().await? {
                        let path = entry.path();
                        let Ok(metadata) = entry.metadata().await else {
                            continue;
                        };
                        if !metadata.is_file() {
                            continue;
                        }

                        let is_incomplete = metadata.len() == 0
                            || (path.extension().is_some_and(|ext| ext == "pdf")
                                && metadata.len() < MIN_PDF_BYTES);

                        if is_incomplete {
                            if let Err(e) = tokio::fs::remove_file(&path).await {
                                warn!(path = %path.display(), error = %e, "failed to remove incomplete file");
                                continue;
                            }
                            info!(path = %path.display(), bytes = metadata.len(), "removed incomplete file");
                            report.removed.push(path);
                        }
                    }
                }
            }
        }

        Ok(report)
    }
}

async fn list_dirs(parent: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut entries = tokio::fs::read_dir(parent).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::store::queue::{QueueItemStatus, QueueType};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_resume_failed_and_reset_stuck_active_delegate_to_queue() {
        let db = Database::new_in_memory().await.unwrap();
        let store = Store::new(db);

        let id = store.queue.enqueue(QueueType::Page, "item-a", 5).await.unwrap();
        store
            .queue
            .update_queue_item(id, QueueItemStatus::Failed, 0.0, Some("boom"))
            .await
            .unwrap();

        let ops = RecoveryOps::new(store.clone(), tempdir().unwrap().path().to_path_buf());
        assert_eq!(ops.resume_failed().await.unwrap(), 1);
        assert_eq!(
            store.queue.count_by_status(QueueItemStatus::Queued).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_cleanup_incomplete_removes_zero_byte_and_tiny_pdfs() {
        let db = Database::new_in_memory().await.unwrap();
        let store = Store::new(db);
        let root = tempdir().unwrap();

        let month_dir = root.path().join("sn84038012").join("1900").join("01");
        tokio::fs::create_dir_all(&month_dir).await.unwrap();

        tokio::fs::write(month_dir.join("seq-1.pdf"), []).await.unwrap();
        tokio::fs::write(month_dir.join("seq-2.pdf"), b"x").await.unwrap();
        tokio::fs::write(month_dir.join("seq-3.pdf"), vec![0u8; 2000]).await.unwrap();
        tokio::fs::write(month_dir.join("seq-4_ocr.txt"), []).await.unwrap();

        let ops = RecoveryOps::new(store, root.path().to_path_buf());
        let report = ops.cleanup_incomplete().await.unwrap();

        assert_eq!(report.removed.len(), 3);
        assert!(month_dir.join("seq-3.pdf").exists());
        assert!(!month_dir.join("seq-1.pdf").exists());
        assert!(!month_dir.join("seq-2.pdf").exists());
        assert!(!month_dir.join("seq-4_ocr.txt").exists());
    }
}
