//! Exchange-local time helpers (IST, UTC+05:30, no DST)

use chrono::{DateTime, Duration, FixedOffset, Offset, Timelike, Utc};

const IST_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

pub fn ist() -> FixedOffset {
    FixedOffset::east_opt(IST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub fn now_ist() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&ist())
}

/// Round to the nearest half minute (:00 or :30); exactly :15 / :45 round up.
pub fn rounded_half_minute(ts: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let truncated = ts
        .with_nanosecond(0)
        .and_then(|t| t.with_second(0))
        .unwrap_or(ts);
    let secs = ts.second() as i64;
    let rounded = ((secs + 15) / 30) * 30;
    truncated + Duration::seconds(rounded)
}

/// Cycle stamp used in snapshot file names, e.g. `20250102_093015`
pub fn cycle_stamp(ts: DateTime<FixedOffset>) -> String {
    ts.format("%Y%m%d_%H%M%S").to_string()
}
