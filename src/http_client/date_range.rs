//! Date-range parameter formatting for `search_pages`.
//!
//! Year-only bounds are passed through to the upstream search endpoint
//! as-is with `dateFilterType=yearRange`. Specific calendar dates are
//! reformatted to `MM/DD/YYYY` with `dateFilterType=range`. A bare year
//! supplied where the caller wants precise date boundaries (rather than
//! the upstream's own year-range handling) is expanded to `01/01/YYYY`
//! for the lower bound and `12/31/YYYY` for the upper bound.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateRangeError {
    #[error("invalid date range facet value '{0}', expected '<start>/<end>'")]
    MalformedFacetValue(String),
    #[error("invalid calendar date '{0}', expected YYYY-MM-DD")]
    MalformedDate(String),
}

/// The three shapes a date bound can take when building `search_pages` params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateRangeParam {
    /// Both bounds are bare years; sent through unmodified with `yearRange`.
    YearRange(u16, u16),
    /// Both bounds are bare years but the caller wants exact calendar
    /// boundaries; expanded to Jan 1 / Dec 31 with `range`.
    ExpandedYearRange(u16, u16),
    /// Both bounds are `YYYY-MM-DD`; reformatted to `MM/DD/YYYY` with `range`.
    Exact(String, String),
}

/// Resolved `(date1, date2, dateFilterType)` query parameters.
pub fn resolve(param: &DateRangeParam) -> Result<(String, String, &'static str), DateRangeError> {
    match param {
        DateRangeParam::YearRange(y1, y2) => Ok((y1.to_string(), y2.to_string(), "yearRange")),
        DateRangeParam::ExpandedYearRange(y1, y2) => {
            Ok((format!("01/01/{y1}"), format!("12/31/{y2}"), "range"))
        }
        DateRangeParam::Exact(d1, d2) => {
            Ok((reformat_exact_date(d1)?, reformat_exact_date(d2)?, "range"))
        }
    }
}

/// Parses a `SearchFacet.facet_value` of shape `"<start>/<end>"` (e.g.
/// `"1906/1906"` or `"1900-01-01/1900-06-30"`) into a [`DateRangeParam`].
pub fn parse_facet_value(facet_value: &str) -> Result<DateRangeParam, DateRangeError> {
    let (start, end) = facet_value
        .split_once('/')
        .ok_or_else(|| DateRangeError::MalformedFacetValue(facet_value.to_string()))?;

    match (start.parse::<u16>(), end.parse::<u16>()) {
        (Ok(y1), Ok(y2)) => Ok(DateRangeParam::YearRange(y1, y2)),
        _ => Ok(DateRangeParam::Exact(start.to_string(), end.to_string())),
    }
}

fn reformat_exact_date(date: &str) -> Result<String, DateRangeError> {
    let parts: Vec<&str> = date.split('-').collect();
    let [year, month, day] = parts.as_slice() else {
        return Err(DateRangeError::MalformedDate(date.to_string()));
    };
    if year.len() != 4 || month.len() != 2 || day.len() != 2 {
        return Err(DateRangeError::MalformedDate(date.to_string()));
    }
    for part in [year, month, day] {
        if !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(DateRangeError::MalformedDate(date.to_string()));
        }
    }
    Ok(format!("{month}/{day}/{year}"))
}
