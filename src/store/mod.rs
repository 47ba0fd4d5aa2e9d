//! Durable `SQLite`-backed state store.
//!
//! The store is split into one sub-module per entity family — periodicals,
//! pages, search facets, discovery sessions, and the download queue — each
//! owning its own atomic operations. [`Store`] wires them together behind a
//! single shared [`Database`] handle.
//!
//! # Example
//!
//! ```ignore
//! use chron_harvester_core::Database;
//! use chron_harvester_core::store::Store;
//!
//! let db = Database::new(std::path::Path::new("harvester.db")).await?;
//! let store = Store::new(db);
//! store.queue.reset_stuck_active().await?;
//! ```

pub mod error;
pub mod facet;
pub mod page;
pub mod periodical;
pub mod queue;
pub mod session;

pub use error::{StoreDbErrorKind, StoreError};
pub use facet::{FacetStatus, FacetStore, FacetUpdate, NewFacet, SearchFacet};
pub use page::{NewPage, Page, PageStore};
pub use periodical::{NewPeriodical, Periodical, PeriodicalStore};
pub use queue::{QueueItem, QueueItemResult, QueueItemStatus, QueueStore, QueueType};
pub use session::{DiscoverySession, SessionStatus, SessionStore, SessionUpdate};

use crate::db::Database;

/// Aggregates every entity store behind the harvester's single `SQLite`
/// connection pool.
#[derive(Clone)]
pub struct Store {
    pub periodicals: PeriodicalStore,
    pub pages: PageStore,
    pub facets: FacetStore,
    pub sessions: SessionStore,
    pub queue: QueueStore,
}

impl Store {
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            periodicals: PeriodicalStore::new(db.clone()),
            pages: PageStore::new(db.clone()),
            facets: FacetStore::new(db.clone()),
            sessions: SessionStore::new(db.clone()),
            queue: QueueStore::new(db),
        }
    }

    /// Startup crash recovery: any `download_queue` item left `active` from
    /// a previous run is returned to `queued` for reprocessing.
    pub async fn recover_on_startup(&self) -> Result<u64, StoreError> {
        self.queue.reset_stuck_active().await
    }
}
