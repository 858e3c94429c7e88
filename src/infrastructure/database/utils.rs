//! Row-mapping helpers shared by the repositories.

use chrono::{DateTime, Utc};

use crate::domain::error::{DomainError, DomainResult};

/// Parse an RFC 3339 timestamp stored as text.
pub fn parse_datetime(s: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(format!("invalid timestamp {s:?}: {e}")))
}

/// Parse an optional RFC 3339 timestamp.
pub fn parse_datetime_opt(s: Option<&str>) -> DomainResult<Option<DateTime<Utc>>> {
    s.map(parse_datetime).transpose()
}

/// Render a timestamp for storage.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datetime_round_trip() {
        let now = Utc::now();
        let parsed = parse_datetime(&format_datetime(now)).unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_datetime("not-a-timestamp").is_err());
    }
}
