use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use cron::Schedule as CronExpr;
use rand::Rng;

use crate::error::{CronError, Result};
use crate::types::Schedule;

/// Parse a thread starter message's schedule line into a [`Schedule`].
///
/// Accepts either a bare 5-field cron expression or `every <N><unit>`
/// (`s`/`m`/`h`/`d`, e.g. `every 30m`).
pub fn parse(raw: &str) -> Result<Schedule> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix("every ").or_else(|| raw.strip_prefix("Every ")) {
        let secs = parse_duration_secs(rest.trim())?;
        return Ok(Schedule::Every { every_secs: secs });
    }

    // Validate eagerly so a malformed thread is rejected at sync time rather
    // than silently never firing.
    CronExpr::from_str(&to_six_field(raw))
        .map_err(|e| CronError::InvalidSchedule(format!("{raw}: {e}")))?;
    Ok(Schedule::Cron {
        expression: raw.to_string(),
    })
}

fn parse_duration_secs(spec: &str) -> Result<u64> {
    let spec = spec.trim();
    let split_at = spec.find(|c: char| !c.is_ascii_digit()).unwrap_or(spec.len());
    let (digits, unit) = spec.split_at(split_at);
    let n: u64 = digits
        .parse()
        .map_err(|_| CronError::InvalidSchedule(format!("bad duration: {spec}")))?;
    let mult = match unit.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86400,
        other => return Err(CronError::InvalidSchedule(format!("unknown duration unit: {other}"))),
    };
    Ok(n * mult)
}

/// The `cron` crate requires a leading seconds field; the chat-facing syntax
/// is the familiar 5-field form, so prepend `0`.
fn to_six_field(expr: &str) -> String {
    let fields = expr.split_whitespace().count();
    if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

/// Compute the next fire time strictly after `from`, with a uniform jitter
/// in `[0, jitter_secs]` added to smooth thundering herds (spec.md §4.8).
pub fn next_fire_with_jitter(schedule: &Schedule, from: DateTime<Utc>, jitter_secs: u64) -> Option<DateTime<Utc>> {
    let base = next_fire(schedule, from)?;
    if jitter_secs == 0 {
        return Some(base);
    }
    let jitter = rand::thread_rng().gen_range(0..=jitter_secs);
    Some(base + Duration::seconds(jitter as i64))
}

fn next_fire(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Every { every_secs } => Some(from + Duration::seconds(*every_secs as i64)),
        Schedule::Cron { expression } => {
            let expr = CronExpr::from_str(&to_six_field(expression)).ok()?;
            expr.after(&from).next()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_duration() {
        let s = parse("every 30m").unwrap();
        match s {
            Schedule::Every { every_secs } => assert_eq!(every_secs, 1800),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_cron_expression() {
        let s = parse("0 9 * * mon-fri").unwrap();
        assert!(matches!(s, Schedule::Cron { .. }));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("not a schedule at all").is_err());
    }

    #[test]
    fn jitter_never_fires_early() {
        let now = Utc::now();
        let sched = Schedule::Every { every_secs: 60 };
        let next = next_fire_with_jitter(&sched, now, 30).unwrap();
        assert!(next >= now + Duration::seconds(60));
        assert!(next <= now + Duration::seconds(90));
    }

    #[test]
    fn daily_cron_fires_in_future() {
        let now = Utc::now();
        let sched = parse("0 0 * * *").unwrap();
        let next = next_fire(&sched, now).unwrap();
        assert!(next > now);
    }
}
