use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Parses an RFC3339 timestamp with (optional) sub-second precision.
pub fn parse_rfc3339(input: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(input).map(|dt| dt.with_timezone(&Utc))
}

/// Formats with full nanosecond precision and a trailing `Z`. Used for every
/// timestamp persisted at rest, so two blocks differing only below the
/// millisecond are never silently collapsed onto the same stored instant.
pub fn format_rfc3339(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Truncates to whole seconds, dropping any sub-second component.
///
/// Used *only* by the firehose `since` dedup path: all other comparisons use
/// full precision.
pub fn truncate_to_second(instant: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(instant.timestamp(), 0)
        .single()
        .expect("timestamp() always yields a valid instant")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn truncate_drops_subseconds() {
        let t = parse_rfc3339("2024-06-01T12:00:00.500Z").unwrap();
        let truncated = truncate_to_second(t);
        assert_eq!(format_rfc3339(truncated), "2024-06-01T12:00:00.000000000Z");
    }

    #[test]
    fn since_dedup_boundary_is_strict() {
        let since = parse_rfc3339("2024-06-01T12:00:00Z").unwrap();
        let same_second = since + Duration::milliseconds(500);
        let next_second = since + Duration::seconds(1);

        assert_eq!(
            truncate_to_second(same_second),
            truncate_to_second(since),
            "a block sharing the since second must not be re-delivered"
        );
        assert!(truncate_to_second(next_second) > truncate_to_second(since));
    }
}
