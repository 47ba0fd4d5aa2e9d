//! item_id construction via a three-step fallback chain: the API's own
//! `id` field, then the page's own `url` field, then a constructed
//! `lccn_date_seq`.

use regex::Regex;
use std::sync::OnceLock;

fn path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/lccn/([^/]+)/([^/]+)/ed-(\d+)/seq-(\d+)/?").expect("static regex is valid")
    })
}

fn issue_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"/lccn/([^/]+)/([^/]+)/ed-(\d+)").expect("static regex is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueParts {
    pub lccn: String,
    pub date: String,
    pub edition: i64,
}

/// Parses an issue-level `/lccn/<lccn>/<date>/ed-<edition>` path (no page
/// sequence), used by batch discovery's fast-path duplicate check.
#[must_use]
pub fn parse_issue(url_or_path: &str) -> Option<IssueParts> {
    let captures = issue_pattern().captures(url_or_path)?;
    Some(IssueParts {
        lccn: captures[1].to_string(),
        date: captures[2].to_string(),
        edition: captures[3].parse().ok()?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemIdParts {
    pub lccn: String,
    pub date: String,
    pub edition: i64,
    pub sequence: i64,
}

/// Parses a `/lccn/<lccn>/<date>/ed-<edition>/seq-<sequence>/` path out of a
/// URL or bare path string.
#[must_use]
pub fn parse(url_or_path: &str) -> Option<ItemIdParts> {
    let captures = path_pattern().captures(url_or_path)?;
    Some(ItemIdParts {
        lccn: captures[1].to_string(),
        date: captures[2].to_string(),
        edition: captures[3].parse().ok()?,
        sequence: captures[4].parse().ok()?,
    })
}

/// Canonical item_id for parts already known to be path-shaped: always ends
/// in a trailing slash, matching the upstream's own path convention.
#[must_use]
pub fn canonical(parts: &ItemIdParts) -> String {
    format!(
        "/lccn/{}/{}/ed-{}/seq-{}/",
        parts.lccn, parts.date, parts.edition, parts.sequence
    )
}

/// Resolves an item_id for a page entry returned by a search result, trying
/// in order: (1) the API's own `id` field, (2) the page's own `url` field,
/// (3) a last-resort `lccn_date_seq` construction from discrete fields.
#[must_use]
pub fn resolve(
    id_field: Option<&str>,
    url_field: Option<&str>,
    lccn: &str,
    date: &str,
    sequence: i64,
) -> String {
    if let Some(id) = id_field {
        if let Some(parts) = parse(id) {
            return canonical(&parts);
        }
    }

    if let Some(url) = url_field {
        if let Some(parts) = parse(url) {
            return canonical(&parts);
        }
    }

    format!("{lccn}_{date}_{sequence}")
}
