//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as fractional seconds since the Unix epoch
pub fn unix_timestamp() -> f64 {
    let now = now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_unix_timestamp_matches_now() {
        let ts = unix_timestamp();
        let secs = now().timestamp() as f64;
        assert!((secs - ts).abs() < 5.0);
    }
}
