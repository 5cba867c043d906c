//! Wall-clock helpers.
//!
//! Everything persisted or compared across devices uses epoch milliseconds.
//! Functions taking an explicit `now_ms` exist next to the clock-reading
//! ones so lifecycle checks can be exercised deterministically.

/// Returns the current Unix timestamp in milliseconds.
pub fn now_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convert a timestamp in seconds to milliseconds, saturating on overflow.
pub fn secs_to_millis(secs: i64) -> i64 {
    secs.saturating_mul(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_timestamp_millis_is_reasonable() {
        let ts = now_timestamp_millis();
        // Between 2024-01-01 and 2100-01-01
        assert!(ts > 1704067200_000, "Timestamp {} is too old", ts);
        assert!(ts < 4102444800_000, "Timestamp {} is too far in future", ts);
    }

    #[test]
    fn test_secs_to_millis() {
        assert_eq!(secs_to_millis(1_700_000_000), 1_700_000_000_000);
        assert_eq!(secs_to_millis(i64::MAX), i64::MAX);
    }
}
