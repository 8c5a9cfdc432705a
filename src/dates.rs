//! Timestamp rendering for CLI output.
//!
//! The service reports times as Unix epoch seconds; tables show them in the
//! local timezone, chat lists additionally as "2h ago" style offsets.

use chrono::{DateTime, Local, TimeZone};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats epoch seconds in the machine's local timezone.
pub fn format_local_timestamp(epoch_seconds: i64) -> String {
    format_timestamp_in(epoch_seconds, &Local)
}

pub fn format_timestamp_in<Tz>(epoch_seconds: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    match DateTime::from_timestamp(epoch_seconds, 0) {
        Some(utc) => utc.with_timezone(tz).format(TIMESTAMP_FORMAT).to_string(),
        None => epoch_seconds.to_string(),
    }
}

/// Short human offset between `timestamp` and `now`, e.g. "5m ago" or "in 2d".
pub fn format_relative_date(timestamp: i64, now: i64) -> String {
    if now <= 0 || timestamp <= 0 {
        return "-".to_string();
    }
    let (delta, future) = if timestamp > now {
        (timestamp - now, true)
    } else {
        (now - timestamp, false)
    };
    if delta < 10 {
        return "now".to_string();
    }
    if delta < 60 {
        return format_relative_unit(delta, "s", future);
    }
    let minutes = delta / 60;
    if minutes < 60 {
        return format_relative_unit(minutes, "m", future);
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format_relative_unit(hours, "h", future);
    }
    let days = hours / 24;
    if days < 7 {
        return format_relative_unit(days, "d", future);
    }
    let weeks = days / 7;
    if weeks < 4 {
        return format_relative_unit(weeks, "w", future);
    }
    let months = days / 30;
    if months < 12 {
        return format_relative_unit(months, "mo", future);
    }
    format_relative_unit(days / 365, "y", future)
}

fn format_relative_unit(value: i64, unit: &str, future: bool) -> String {
    if future {
        format!("in {value}{unit}")
    } else {
        format!("{value}{unit} ago")
    }
}

pub fn now_epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}
