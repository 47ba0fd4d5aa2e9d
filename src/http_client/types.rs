//! Narrow typed records for the upstream archive's JSON responses.
//!
//! Each record holds only the fields the engine reads; everything else on
//! the wire is ignored. Missing required fields surface as a
//! [`super::ClientError::Parse`], never a silent default (per the
//! "dynamic duck-typed dicts" redesign guidance).

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PeriodicalSummary {
    pub lccn: String,
    pub title: String,
    pub state: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeriodicalsPage {
    pub newspapers: Vec<PeriodicalSummary>,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueRef {
    pub date_issued: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeriodicalDetail {
    pub lccn: String,
    pub name: Option<String>,
    pub start_year: Option<String>,
    pub end_year: Option<String>,
    #[serde(default)]
    pub issues: Vec<IssueRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchSummary {
    pub name: String,
    pub url: String,
    pub page_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchesPage {
    pub batches: Vec<BatchSummary>,
    #[serde(rename = "totalPages")]
    pub total_pages: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TitleRef {
    pub name: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchIssue {
    pub url: String,
    pub date_issued: Option<String>,
    pub title: Option<TitleRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchDetail {
    pub name: String,
    pub page_count: u64,
    #[serde(default)]
    pub issues: Vec<BatchIssue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssuePage {
    pub url: String,
    pub sequence: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueDetail {
    #[serde(default)]
    pub pages: Vec<IssuePage>,
    pub date_issued: Option<String>,
    pub title: Option<TitleRef>,
}

/// One result row from `search/pages/results`. Every field the upstream
/// omits is tolerated; [`crate::discovery::item_id`] applies a fallback
/// chain to derive one when `id` is absent.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResultItem {
    pub id: Option<String>,
    pub lccn: Option<String>,
    pub title: Option<String>,
    pub date: Option<String>,
    pub url: Option<String>,
    pub sequence: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchPagesResult {
    #[serde(default, alias = "items")]
    pub results: Vec<SearchResultItem>,
    #[serde(rename = "totalItems")]
    pub total_items: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EstimateSize {
    pub total_pages: u64,
    pub estimated_size_mb: f64,
}
