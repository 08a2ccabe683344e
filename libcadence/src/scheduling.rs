//! Parsing of human-readable publication times

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::error::{CadenceError, Result};

const ABSOLUTE_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Parse a schedule string into a point in time.
///
/// Accepted, in order of precedence:
/// - `now`
/// - RFC 3339: `2025-11-20T15:00:00Z`
/// - `YYYY-MM-DD HH:MM`, read as UTC
/// - Relative durations: `30m`, `2h`, `1day 3h`
/// - Natural language: `tomorrow 3pm`, `next monday 10am`, `in 1 hour`
///
/// A time in the past is accepted; such a post is due on the next scan.
pub fn parse_schedule(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CadenceError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if input.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(input, ABSOLUTE_FORMAT) {
        return Ok(naive.and_utc());
    }

    if let Some(duration) = parse_duration(input) {
        return Ok(now + duration);
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(|e| {
        CadenceError::InvalidInput(format!("Could not parse schedule '{}': {}", input, e))
    })
}

fn parse_duration(input: &str) -> Option<Duration> {
    let std_duration = humantime::parse_duration(input).ok()?;
    Duration::try_seconds(std_duration.as_secs() as i64)
}

/// Parse a schedule string relative to the current time, as unix seconds
pub fn parse_schedule_timestamp(input: &str) -> Result<i64> {
    Ok(parse_schedule(input, Utc::now())?.timestamp())
}
