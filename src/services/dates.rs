//! Semantic date formatting for search and browse rows.

use chrono::{DateTime, Datelike, Duration, Utc};

/// Formats a timestamp as `"YYYY-MM-DD (bucket)"` relative to `now`.
///
/// Buckets, checked in order: `today`, `yesterday`, `this week`,
/// `last week`, `this month`, `older`. Weeks are ISO weeks.
#[must_use]
pub fn format_semantic_date(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let date = at.date_naive();
    let today = now.date_naive();

    let bucket = if date >= today {
        "today"
    } else if date == today - Duration::days(1) {
        "yesterday"
    } else if date.iso_week() == today.iso_week() {
        "this week"
    } else if date.iso_week() == (today - Duration::days(7)).iso_week() {
        "last week"
    } else if date.year() == today.year() && date.month() == today.month() {
        "this month"
    } else {
        "older"
    };

    format!("{} ({bucket})", date.format("%Y-%m-%d"))
}
