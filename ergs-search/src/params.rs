use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use ergs_core::time::parse_rfc3339;
use ergs_store::DateRange;

use crate::error::SearchError;

const DEFAULT_LIMIT: u32 = 30;
const DEFAULT_PAGE: u32 = 1;
const MIN_PAGE: u32 = 1;
const MAX_PAGE: u32 = 10_000;
const MIN_LIMIT: u32 = 1;
const MAX_LIMIT: u32 = 1_000;

/// Raw, unvalidated query parameters as they would arrive from a request.
/// `datasource` is repeatable.
#[derive(Debug, Clone, Default)]
pub struct RawSearchParams {
    pub q: Option<String>,
    pub datasource: Vec<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub since: Option<String>,
}

/// Parsed, validated search parameters: the input to [`crate::SearchService::search`].
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub datasource_filters: Vec<String>,
    pub page: u32,
    pub limit: u32,
    pub date_range: DateRange,
    pub since: Option<chrono::DateTime<Utc>>,
}

impl SearchParams {
    /// Parses raw parameters: clamping, silent filter-name validation, and
    /// the `since`-clears-`start_date` rule.
    pub fn parse(raw: RawSearchParams) -> Result<Self, SearchError> {
        let page = raw
            .page
            .as_deref()
            .and_then(|p| p.parse::<i64>().ok())
            .map(|p| p.clamp(MIN_PAGE as i64, MAX_PAGE as i64) as u32)
            .unwrap_or(DEFAULT_PAGE);

        let limit = raw
            .limit
            .as_deref()
            .and_then(|l| l.parse::<i64>().ok())
            .map(|l| l.clamp(MIN_LIMIT as i64, MAX_LIMIT as i64) as u32)
            .unwrap_or(DEFAULT_LIMIT);

        let datasource_filters = raw
            .datasource
            .into_iter()
            .filter(|name| is_valid_datasource_name(name))
            .collect();

        let since = raw
            .since
            .as_deref()
            .map(parse_rfc3339)
            .transpose()
            .map_err(|e| SearchError::InvalidSince(e.to_string()))?;

        let mut start_date = raw
            .start_date
            .as_deref()
            .map(parse_start_of_day)
            .transpose()
            .map_err(|e| SearchError::InvalidDate(e.to_string()))?;

        let end_date = raw
            .end_date
            .as_deref()
            .map(parse_end_of_day)
            .transpose()
            .map_err(|e| SearchError::InvalidDate(e.to_string()))?;

        if since.is_some() {
            start_date = None;
        }

        Ok(Self {
            query: raw.q.unwrap_or_default(),
            datasource_filters,
            page,
            limit,
            date_range: DateRange {
                start: since.or(start_date),
                end: end_date,
            },
            since,
        })
    }
}

fn is_valid_datasource_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

fn parse_start_of_day(raw: &str) -> Result<chrono::DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| e.to_string())?;
    Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

fn parse_end_of_day(raw: &str) -> Result<chrono::DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| e.to_string())?;
    let end_of_day = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).expect("valid time");
    Ok(Utc.from_utc_datetime(&date.and_time(end_of_day)))
}
