/// Utility functions for timestamp and date formatting
use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

const DISPLAY_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[day].[month].[year] - [hour]:[minute]:[second]");
const DATE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");
const HOUR_MINUTE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]");

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    dt.format(DISPLAY_FORMAT).unwrap_or_else(|_| dt.to_string())
}

/// RFC 3339 timestamp used in log records
pub fn format_rfc3339(dt: &OffsetDateTime) -> String {
    dt.format(&Rfc3339).unwrap_or_else(|_| dt.to_string())
}

/// Calendar date as YYYY-MM-DD
pub fn format_date(date: Date) -> String {
    date.format(DATE_FORMAT)
        .unwrap_or_else(|_| date.to_string())
}

pub fn parse_date(s: &str) -> Option<Date> {
    Date::parse(s, DATE_FORMAT).ok()
}

/// Time of day as HH:MM
pub fn format_hour_minute(t: Time) -> String {
    t.format(HOUR_MINUTE_FORMAT)
        .unwrap_or_else(|_| t.to_string())
}

pub fn parse_hour_minute(s: &str) -> Option<Time> {
    Time::parse(s.trim(), HOUR_MINUTE_FORMAT).ok()
}

/// Render an optional reading, using `N/A` for missing values
pub fn display_or_na<T: std::fmt::Display>(value: Option<T>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", decimals, v),
        None => "N/A".to_string(),
    }
}
