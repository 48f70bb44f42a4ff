//! Relative timestamps for comment and reply headers.

use chrono::{DateTime, Utc};

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Formats `timestamp` relative to the current time.
pub fn format_date(timestamp: DateTime<Utc>) -> String {
    format_relative(timestamp, Utc::now())
}

/// "Just now", "{n}m ago", "{n}h ago", "{n}d ago", then "Jan 5, 2025".
///
/// Timestamps in the future (clock skew between client and store) read as "Just now".
pub fn format_relative(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(timestamp).num_seconds();
    match elapsed {
        s if s < MINUTE => "Just now".to_string(),
        s if s < HOUR => format!("{}m ago", s / MINUTE),
        s if s < DAY => format!("{}h ago", s / HOUR),
        s if s < WEEK => format!("{}d ago", s / DAY),
        _ => timestamp.format("%b %-d, %Y").to_string(),
    }
}
