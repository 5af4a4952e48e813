use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Current time formatted as ISO-8601 UTC, e.g. `2025-01-02T03:04:05.678Z`.
///
/// Every timestamp persisted by this workspace goes through this function so
/// that on-disk records are directly comparable as strings.
pub fn now_iso8601() -> String {
    format_iso8601(OffsetDateTime::now_utc())
}

pub fn format_iso8601(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_iso8601_is_rfc3339() {
        let ts = now_iso8601();
        assert!(time::OffsetDateTime::parse(&ts, &Rfc3339).is_ok());
    }
}
