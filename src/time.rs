// Absolute time helpers
// Fractional-second arithmetic on UTC instants and event identifiers

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Shift an instant by a (possibly negative, possibly fractional) number of seconds.
/// Saturates at the representable range.
pub fn add_seconds(instant: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    let delta = Duration::nanoseconds((seconds * 1e9).round() as i64);
    instant.checked_add_signed(delta).unwrap_or(if seconds > 0.0 {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

/// Signed difference `later - earlier` in seconds
pub fn seconds_between(later: DateTime<Utc>, earlier: DateTime<Utc>) -> f64 {
    let diff = later - earlier;
    match diff.num_nanoseconds() {
        Some(ns) => ns as f64 * 1e-9,
        // Beyond ~292 years the nanosecond count overflows
        None => diff.num_milliseconds() as f64 * 1e-3,
    }
}

/// Build an instant from the calendar fields a trace header carries
/// (year, day of year, hour, minute, second, millisecond)
pub fn from_day_of_year(
    year: i32,
    day_of_year: u32,
    hour: u32,
    minute: u32,
    second: u32,
    millisecond: u32,
) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_yo_opt(year, day_of_year)?;
    let time = date.and_hms_milli_opt(hour, minute, second, millisecond)?;
    Some(time.and_utc())
}

/// Build an instant from a calendar date and a fractional second-of-minute
pub fn from_calendar(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    seconds: f64,
) -> Option<DateTime<Utc>> {
    if !(0.0..61.0).contains(&seconds) {
        return None;
    }
    let whole = seconds.floor();
    let base: NaiveDateTime = NaiveDate::from_ymd_opt(year, month, day)?
        .and_hms_opt(hour, minute, whole as u32)?;
    Some(add_seconds(base.and_utc(), seconds - whole))
}

/// Fractional second-of-minute of an instant (microsecond resolution)
pub fn second_of_minute(instant: DateTime<Utc>) -> f64 {
    instant.second() as f64 + (instant.nanosecond() / 1_000) as f64 * 1e-6
}

/// Event identifier: the origin instant truncated to whole seconds, `YYYYMMDDhhmmss`
pub fn event_id(origin: DateTime<Utc>) -> String {
    format!(
        "{:04}{:02}{:02}{:02}{:02}{:02}",
        origin.year(),
        origin.month(),
        origin.day(),
        origin.hour(),
        origin.minute(),
        origin.second()
    )
}

/// Instant named by an event identifier, `None` unless it is `YYYYMMDDhhmmss`
pub fn parse_event_id(event_id: &str) -> Option<DateTime<Utc>> {
    if event_id.len() != 14 || !event_id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(event_id, "%Y%m%d%H%M%S")
        .ok()
        .map(|t| t.and_utc())
}
