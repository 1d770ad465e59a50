//! Five-field cron expression parsing and next/previous-match evaluation.
//!
//! Deliberately hand-rolled instead of wrapping the `cron` crate: the
//! required semantics — day-of-month AND day-of-week (not classical
//! cron's union), Sunday=0, minute-granularity forward search bounded at
//! four years, and the `@alias` set — are explicit correctness
//! requirements (see design doc §9), not incidental parsing details.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use std::collections::BTreeSet;

const SEARCH_HORIZON_MINUTES: i64 = 4 * 365 * 24 * 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum CronParseError {
    #[error("cron field {field}: {reason}")]
    Field { field: &'static str, reason: String },
    #[error("cron expression must have exactly 5 fields, got {0}")]
    FieldCount(usize),
    #[error("no match for cron expression within the search horizon")]
    NoMatchWithinHorizon,
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: BTreeSet<u32>,
    hour: BTreeSet<u32>,
    day_of_month: BTreeSet<u32>,
    month: BTreeSet<u32>,
    day_of_week: BTreeSet<u32>,
}

impl CronSchedule {
    /// Parse a 5-field expression (`minute hour dom month dow`) or one of
    /// the `@alias` shorthands.
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let expr = expr.trim();
        if let Some(alias) = expr.strip_prefix('@') {
            return Self::parse_alias(alias);
        }

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CronParseError::FieldCount(fields.len()));
        }

        Ok(CronSchedule {
            minute: parse_field(fields[0], "minute", 0, 59, &[])?,
            hour: parse_field(fields[1], "hour", 0, 23, &[])?,
            day_of_month: parse_field(fields[2], "day_of_month", 1, 31, &[])?,
            month: parse_field(fields[3], "month", 1, 12, &MONTH_NAMES)?,
            day_of_week: parse_field(fields[4], "day_of_week", 0, 6, &WEEKDAY_NAMES)?,
        })
    }

    fn parse_alias(alias: &str) -> Result<Self, CronParseError> {
        let expr = match alias.to_ascii_lowercase().as_str() {
            "yearly" | "annually" => "0 0 1 1 *",
            "monthly" => "0 0 1 * *",
            "weekly" => "0 0 * * 0",
            "daily" | "midnight" => "0 0 * * *",
            "hourly" => "0 * * * *",
            other => {
                return Err(CronParseError::Field {
                    field: "alias",
                    reason: format!("unknown alias @{other}"),
                })
            }
        };
        // Reparse the canonical expansion through the normal path (cannot
        // recurse into alias parsing again since it has no leading '@').
        let fields: Vec<&str> = expr.split_whitespace().collect();
        Ok(CronSchedule {
            minute: parse_field(fields[0], "minute", 0, 59, &[]).unwrap(),
            hour: parse_field(fields[1], "hour", 0, 23, &[]).unwrap(),
            day_of_month: parse_field(fields[2], "day_of_month", 1, 31, &[]).unwrap(),
            month: parse_field(fields[3], "month", 1, 12, &MONTH_NAMES).unwrap(),
            day_of_week: parse_field(fields[4], "day_of_week", 0, 6, &WEEKDAY_NAMES).unwrap(),
        })
    }

    fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minute.contains(&dt.minute())
            && self.hour.contains(&dt.hour())
            && self.day_of_month.contains(&dt.day())
            && self.month.contains(&dt.month())
            && self.day_of_week.contains(&weekday_sunday_zero(dt))
    }

    /// First instant strictly after (or equal to, if `from` is already
    /// minute-aligned and the caller wants inclusive behavior) `from`,
    /// rounded up to the next whole minute first, per §4.A.
    pub fn next_after(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, CronParseError> {
        let mut candidate = round_up_to_minute(from);
        for _ in 0..SEARCH_HORIZON_MINUTES {
            if self.matches(&candidate) {
                return Ok(candidate);
            }
            candidate += Duration::minutes(1);
        }
        Err(CronParseError::NoMatchWithinHorizon)
    }

    /// Last instant at or before `from` that matches. Used by the
    /// round-trip testable property in §8; walks backward one minute at a
    /// time with the same horizon bound.
    pub fn prev_before_or_at(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, CronParseError> {
        let mut candidate = round_down_to_minute(from);
        for _ in 0..SEARCH_HORIZON_MINUTES {
            if self.matches(&candidate) {
                return Ok(candidate);
            }
            candidate -= Duration::minutes(1);
        }
        Err(CronParseError::NoMatchWithinHorizon)
    }
}

fn round_up_to_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
    if dt.second() == 0 && dt.nanosecond() == 0 {
        dt
    } else {
        (dt + Duration::minutes(1))
            .date_naive()
            .and_hms_opt(
                (dt + Duration::minutes(1)).hour(),
                (dt + Duration::minutes(1)).minute(),
                0,
            )
            .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
            .unwrap_or(dt)
    }
}

fn round_down_to_minute(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(dt.hour(), dt.minute(), 0)
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(dt)
}

fn weekday_sunday_zero(dt: &DateTime<Utc>) -> u32 {
    // chrono's `Weekday::num_days_from_sunday` already gives Sunday=0.
    dt.weekday().num_days_from_sunday()
}

const MONTH_NAMES: [(&str, u32); 12] = [
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("may", 5),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

const WEEKDAY_NAMES: [(&str, u32); 7] = [
    ("sun", 0),
    ("mon", 1),
    ("tue", 2),
    ("wed", 3),
    ("thu", 4),
    ("fri", 5),
    ("sat", 6),
];

fn resolve_alias(token: &str, names: &[(&str, u32)]) -> Option<u32> {
    let lower = token.to_ascii_lowercase();
    names
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, value)| *value)
}

fn parse_field(
    field: &str,
    field_name: &'static str,
    min: u32,
    max: u32,
    names: &[(&str, u32)],
) -> Result<BTreeSet<u32>, CronParseError> {
    let mut values = BTreeSet::new();

    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(CronParseError::Field {
                field: field_name,
                reason: "empty list entry".to_string(),
            });
        }

        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: i64 = s.parse().map_err(|_| CronParseError::Field {
                    field: field_name,
                    reason: format!("invalid step '{s}'"),
                })?;
                if step <= 0 {
                    return Err(CronParseError::Field {
                        field: field_name,
                        reason: format!("step must be > 0, got {step}"),
                    });
                }
                (r, step as u32)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range_part == "*" {
            (min, max)
        } else if let Some((a, b)) = range_part.split_once('-') {
            let lo = parse_value(a, field_name, min, max, names)?;
            let hi = parse_value(b, field_name, min, max, names)?;
            if lo > hi {
                return Err(CronParseError::Field {
                    field: field_name,
                    reason: format!("range start {lo} greater than end {hi}"),
                });
            }
            (lo, hi)
        } else {
            let v = parse_value(range_part, field_name, min, max, names)?;
            (v, v)
        };

        let mut v = lo;
        while v <= hi {
            values.insert(v);
            v += step;
        }
    }

    if values.is_empty() {
        return Err(CronParseError::Field {
            field: field_name,
            reason: "no values matched".to_string(),
        });
    }

    Ok(values)
}

fn parse_value(
    token: &str,
    field_name: &'static str,
    min: u32,
    max: u32,
    names: &[(&str, u32)],
) -> Result<u32, CronParseError> {
    if let Some(v) = resolve_alias(token, names) {
        return Ok(v);
    }
    let v: u32 = token.parse().map_err(|_| CronParseError::Field {
        field: field_name,
        reason: format!("'{token}' is not a number"),
    })?;
    if v < min || v > max {
        return Err(CronParseError::Field {
            field: field_name,
            reason: format!("{v} out of range {min}-{max}"),
        });
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn every_15_minutes() {
        let s = CronSchedule::parse("*/15 * * * *").unwrap();
        let next = s.next_after(dt(2024, 1, 1, 0, 1)).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn weekday_business_hours_skips_weekend() {
        // Saturday 2024-01-06 09:00 UTC -> next match is Monday 2024-01-08 09:00Z
        let s = CronSchedule::parse("0 9-17 * * 1-5").unwrap();
        let next = s.next_after(dt(2024, 1, 6, 9, 0)).unwrap();
        assert_eq!(next, dt(2024, 1, 8, 9, 0));
    }

    #[test]
    fn daily_alias_is_midnight_utc() {
        let s = CronSchedule::parse("@daily").unwrap();
        let next = s.next_after(dt(2024, 1, 1, 12, 30)).unwrap();
        assert_eq!(next, dt(2024, 1, 2, 0, 0));
    }

    #[test]
    fn invalid_minute_names_the_field() {
        let err = CronSchedule::parse("60 * * * *").unwrap_err();
        match err {
            CronParseError::Field { field, .. } => assert_eq!(field, "minute"),
            other => panic!("expected Field error, got {other:?}"),
        }
    }

    #[test]
    fn zero_step_is_rejected() {
        let err = CronSchedule::parse("*/0 * * * *").unwrap_err();
        assert!(matches!(err, CronParseError::Field { field: "minute", .. }));
    }

    #[test]
    fn round_trip_property() {
        let s = CronSchedule::parse("0 9 * * 1-5").unwrap();
        let t = dt(2024, 3, 4, 15, 0);
        let next = s.next_after(t).unwrap();
        let just_before = next - Duration::minutes(1);
        let next2 = s.next_after(just_before).unwrap();
        assert_eq!(next, next2);
    }

    #[test]
    fn day_of_month_and_day_of_week_intersect() {
        // The 1st of January 2024 is a Monday. Requiring day 2 AND Monday
        // should skip to the next Monday that also falls on day 2 of a
        // month (classical cron would instead match on *either* condition).
        let s = CronSchedule::parse("0 0 2 * 1").unwrap();
        let next = s.next_after(dt(2024, 1, 1, 0, 0)).unwrap();
        assert_eq!(next.day(), 2);
        assert_eq!(next.weekday().num_days_from_monday(), 0);
    }

    #[test]
    fn month_and_weekday_aliases() {
        let s = CronSchedule::parse("0 0 * jan mon").unwrap();
        let next = s.next_after(dt(2023, 12, 30, 0, 0)).unwrap();
        assert_eq!(next.month(), 1);
        assert_eq!(next.weekday().num_days_from_monday(), 0);
    }
}
