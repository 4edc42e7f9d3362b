//! Human-readable "last seen" strings

use chrono::DateTime;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Absolute format used once a sighting is a week old (UTC)
pub const ABSOLUTE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

fn plural(value: i64, unit: &str) -> String {
    if value == 1 {
        format!("{value} {unit} ago")
    } else {
        format!("{value} {unit}s ago")
    }
}

/// Describe how long ago `timestamp` was, relative to `now` (both epoch seconds)
///
/// Tiers: seconds, minutes, hours, days, then an absolute UTC date.
/// Timestamps in the future read as "0 seconds ago".
pub fn humanize_since(timestamp: i64, now: i64) -> String {
    let elapsed = now.saturating_sub(timestamp).max(0);

    match elapsed {
        e if e < MINUTE => plural(e, "second"),
        e if e < HOUR => plural(e / MINUTE, "minute"),
        e if e < DAY => plural(e / HOUR, "hour"),
        e if e < WEEK => plural(e / DAY, "day"),
        _ => DateTime::from_timestamp(timestamp, 0)
            .map(|dt| dt.format(ABSOLUTE_FORMAT).to_string())
            .unwrap_or_else(|| timestamp.to_string()),
    }
}
