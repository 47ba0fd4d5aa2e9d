//! Resolves `needs_splitting` facets into smaller sibling facets (spec
//! section 4.4.2, "Splitting").

use tracing::{info, instrument};

use super::error::DiscoveryError;
use super::facet::SPLIT_PRIORITY_BUMP;
use crate::http_client::date_range::{self, DateRangeParam};
use crate::store::facet::{FacetStatus, FacetUpdate, NewFacet};
use crate::store::Store;

/// Historical coverage bands used to split an overly broad `state` facet.
/// Six bands spanning the archive's full digitized range (1836-1963);
/// arbitrary but fixed, so splitting the same facet twice is deterministic.
const STATE_YEAR_BANDS: [(u16, u16); 6] = [
    (1836, 1850),
    (1851, 1870),
    (1871, 1890),
    (1891, 1910),
    (1911, 1930),
    (1931, 1963),
];

pub struct SplitOperation {
    store: Store,
}

impl SplitOperation {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Splits a `needs_splitting` facet and returns the new child facet ids.
    /// The parent transitions to `split_completed`.
    #[instrument(skip(self), fields(facet_id))]
    pub async fn split(&self, facet_id: i64) -> Result<Vec<i64>, DiscoveryError> {
        let facet = self.store.facets.get(facet_id).await?;

        if facet.status != "needs_splitting" {
            return Err(DiscoveryError::NotSplittable(facet_id));
        }

        let (child_type, child_values) = match facet.facet_type.as_str() {
            "date_range" => {
                let range = date_range::parse_facet_value(&facet.facet_value)
                    .map_err(|_| DiscoveryError::NotSplittable(facet_id))?;
                let (y1, y2) = match range {
                    DateRangeParam::YearRange(a, b) | DateRangeParam::ExpandedYearRange(a, b) => (a, b),
                    DateRangeParam::Exact(_, _) => return Err(DiscoveryError::NotSplittable(facet_id)),
                };
                let values = if y1 == y2 { quarters(y1) } else { years(y1, y2) };
                ("date_range", values)
            }
            "state" => {
                let values = STATE_YEAR_BANDS
                    .iter()
                    .map(|(a, b)| format!("{}|{a}/{b}", facet.facet_value))
                    .collect();
                ("combined", values)
            }
            _ => return Err(DiscoveryError::NotSplittable(facet_id)),
        };

        let new_priority = (facet.priority - SPLIT_PRIORITY_BUMP).max(1);
        let child_count = child_values.len().max(1) as i64;
        let child_estimate = facet.estimated_items.map(|estimate| estimate / child_count);

        let mut ids = Vec::with_capacity(child_values.len());
        for value in child_values {
            let id = self
                .store
                .facets
                .create_search_facet(&NewFacet {
                    facet_type: child_type.to_string(),
                    facet_value: value,
                    query: facet.query.clone(),
                    estimated_items: child_estimate,
                    priority: new_priority,
                })
                .await?;
            ids.push(id);
        }

        self.store
            .facets
            .update_facet(
                facet_id,
                &FacetUpdate {
                    status: Some(FacetStatus::SplitCompleted),
                    ..Default::default()
                },
            )
            .await?;

        info!(facet_id, children = ids.len(), "facet split completed");
        Ok(ids)
    }
}

fn quarters(year: u16) -> Vec<String> {
    vec![
        format!("{year}-01-01/{year}-03-31"),
        format!("{year}-04-01/{year}-06-30"),
        format!("{year}-07-01/{year}-09-30"),
        format!("{year}-10-01/{year}-12-31"),
    ]
}

fn years(start: u16, end: u16) -> Vec<String> {
    (start..=end).map(|y| format!("{y}/{y}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn store_with_facet(facet_type: &str, facet_value: &str, estimated_items: Option<i64>) -> (Store, i64) {
        let db = Database::new_in_memory().await.unwrap();
        let store = Store::new(db);
        let id = store
            .facets
            .create_search_facet(&NewFacet {
                facet_type: facet_type.to_string(),
                facet_value: facet_value.to_string(),
                query: None,
                estimated_items,
                priority: 5,
            })
            .await
            .unwrap();
        store
            .facets
            .update_facet(
                id,
                &FacetUpdate {
                    status: Some(FacetStatus::NeedsSplitting),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_single_year_splits_into_four_quarters() {
        let (store, id) = store_with_facet("date_range", "1900/1900", Some(4400)).await;
        let op = SplitOperation::new(store.clone());
        let children = op.split(id).await.unwrap();
        assert_eq!(children.len(), 4);

        for child_id in &children {
            let child = store.facets.get(*child_id).await.unwrap();
            assert_eq!(child.facet_type, "date_range");
            assert_eq!(child.priority, 4);
            assert_eq!(child.estimated_items, Some(1100));
        }

        let parent = store.facets.get(id).await.unwrap();
        assert_eq!(parent.status, "split_completed");
    }

    #[tokio::test]
    async fn test_multi_year_splits_one_facet_per_year() {
        let (store, id) = store_with_facet("date_range", "1900/1910", Some(1100)).await;
        let op = SplitOperation::new(store.clone());
        let children = op.split(id).await.unwrap();
        assert_eq!(children.len(), 11);

        let first = store.facets.get(children[0]).await.unwrap();
        assert_eq!(first.facet_value, "1900/1900");
        let last = store.facets.get(*children.last().unwrap()).await.unwrap();
        assert_eq!(last.facet_value, "1910/1910");
    }

    #[tokio::test]
    async fn test_state_splits_into_six_combined_bands() {
        let (store, id) = store_with_facet("state", "California", None).await;
        let op = SplitOperation::new(store.clone());
        let children = op.split(id).await.unwrap();
        assert_eq!(children.len(), 6);

        for child_id in &children {
            let child = store.facets.get(*child_id).await.unwrap();
            assert_eq!(child.facet_type, "combined");
            assert!(child.facet_value.starts_with("California|"));
        }
    }

    #[tokio::test]
    async fn test_split_rejects_non_splitting_facet() {
        let db = Database::new_in_memory().await.unwrap();
        let store = Store::new(db);
        let id = store
            .facets
            .create_search_facet(&NewFacet {
                facet_type: "date_range".to_string(),
                facet_value: "1900/1900".to_string(),
                query: None,
                estimated_items: None,
                priority: 5,
            })
            .await
            .unwrap();

        let op = SplitOperation::new(store);
        assert!(matches!(op.split(id).await, Err(DiscoveryError::NotSplittable(_))));
    }
}
