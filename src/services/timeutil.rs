//! Wall-clock time conversions
//!
//! Pickup windows and published ETAs travel as `HH:MM` strings; the solver
//! and schedule walk work in minutes since midnight.

/// Parse a strict `HH:MM` string into minutes since midnight.
/// Returns `None` for anything else (`8:00`, `24:00`, `08:61`, ...).
pub fn parse_time_str(time_str: &str) -> Option<i64> {
    let bytes = time_str.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return None;
    }
    let hours: i64 = time_str[..2].parse().ok()?;
    let minutes: i64 = time_str[3..].parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Render minutes since midnight as `HH:MM`, wrapping at 24 h.
pub fn minutes_to_time_str(minutes: i64) -> String {
    let wrapped = minutes.rem_euclid(1440);
    format!("{:02}:{:02}", wrapped / 60, wrapped % 60)
}

/// Add minutes to an `HH:MM` string, wrapping at 24 h.
pub fn add_minutes_to_time(time_str: &str, minutes: i64) -> Option<String> {
    Some(minutes_to_time_str(parse_time_str(time_str)? + minutes))
}
