//! Cron expression parsing and run-time computation.

use std::time::Duration;

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    cron::Schedule,
};

use crate::{Error, Result};

const WEEKDAYS: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Parse a five-field `minute hour day month weekday` expression.
///
/// Weekdays use the usual crontab numbering (Sunday is 0 or 7) and names.
/// Descriptors such as `@hourly` are passed through unchanged.
pub fn parse_schedule(spec: &str) -> Result<Schedule> {
    let spec = spec.trim();
    if spec.starts_with('@') {
        return Ok(spec.parse::<Schedule>()?);
    }
    let fields: Vec<&str> = spec.split_whitespace().collect();
    let [minute, hour, day, month, weekday] = fields[..] else {
        return Err(Error::invalid_spec(
            spec,
            format!("expected 5 fields, found {}", fields.len()),
        ));
    };
    let weekday = weekday_field(weekday)
        .ok_or_else(|| Error::invalid_spec(spec, format!("invalid weekday field '{weekday}'")))?;
    // The `cron` crate wants seconds and year as well, and counts weekdays
    // from Sunday = 1.
    format!("0 {minute} {hour} {day} {month} {weekday} *")
        .parse::<Schedule>()
        .map_err(|e| Error::invalid_spec(spec, e.to_string()))
}

/// Crontab weekday token to 0 (Sunday) ..= 6, keeping a literal 7.
fn weekday_number(token: &str) -> Option<usize> {
    if let Ok(n) = token.parse::<usize>() {
        return (n <= 7).then_some(n);
    }
    WEEKDAYS.iter().position(|d| d.eq_ignore_ascii_case(token))
}

/// Rewrite a crontab weekday field as an explicit list in the `cron`
/// crate's numbering. `None` when the field is malformed.
fn weekday_field(field: &str) -> Option<String> {
    if field == "*" {
        return Some(field.to_string());
    }
    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
            None => (item, 1),
        };
        let (first, last) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((first, last)) => (weekday_number(first)?, weekday_number(last)?),
            // `n/step` runs from n to the end of the week.
            None if step > 1 => (weekday_number(range)?, 6),
            None => {
                let day = weekday_number(range)?;
                (day, day)
            },
        };
        if first > last {
            return None;
        }
        for day in (first..=last).step_by(step) {
            days[day % 7] = true;
        }
    }
    let list: Vec<String> = (0..7)
        .filter(|&day| days[day])
        .map(|day| (day + 1).to_string())
        .collect();
    (!list.is_empty()).then(|| list.join(","))
}

/// Next run strictly after `after`, evaluated in `tz`.
pub fn next_run(schedule: &Schedule, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&tz))
        .next()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Reject schedules that fire more often than `min_interval`.
///
/// Consecutive runs over the next 24 hours are compared; a schedule with
/// fewer than two runs in that window always passes.
pub fn validate_cron_interval(spec: &str, min_interval: Duration) -> Result<()> {
    validate_interval_from(spec, min_interval, Utc::now())
}

fn validate_interval_from(spec: &str, min_interval: Duration, start: DateTime<Utc>) -> Result<()> {
    let schedule = parse_schedule(spec)?;
    let end = start + chrono::Duration::hours(24);
    let mut runs = schedule.after(&start).take_while(|t| *t <= end);
    let Some(mut prev) = runs.next() else {
        return Ok(());
    };
    for next in runs {
        let interval = (next - prev).to_std().unwrap_or_default();
        if interval < min_interval {
            return Err(Error::IntervalTooShort {
                interval,
                min: min_interval,
            });
        }
        prev = next;
    }
    Ok(())
}
