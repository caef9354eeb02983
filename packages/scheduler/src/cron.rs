//! Five-field cron expressions (minute hour day-of-month month day-of-week)
//! with timezone-aware next-fire computation.
//!
//! Grammar per POSIX crontab: lists (`1,15`), ranges (`1-5`), steps
//! (`*/10`, `10-40/5`), three-letter month and weekday names, and `7` as an
//! alias for Sunday. When both day-of-month and day-of-week are restricted
//! they combine with OR, matching classic cron. A field combines with AND
//! otherwise.
//!
//! `next_after` evaluates the expression in an IANA timezone: local times
//! that do not exist (DST spring-forward gap) are skipped, and ambiguous
//! local times (fall-back) resolve to the earliest instant that is still
//! strictly after the reference point.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, LocalResult, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::SchedulerError;

/// How many days ahead `next_after` searches before concluding the
/// expression has no reachable fire. Nine years covers the longest gap
/// between consecutive Feb 29ths around a skipped century leap year.
const SEARCH_HORIZON_DAYS: u32 = 366 * 9;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DOW_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
    source: String,
}

impl CronExpr {
    /// Parse a five-field expression, e.g. `"*/5 * * * *"`.
    pub fn parse(expr: &str) -> Result<Self, SchedulerError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "expected 5 cron fields, got {} in {:?}",
                fields.len(),
                expr
            )));
        }

        let minutes = parse_field(fields[0], 0, 59, &[]).map_err(|e| bad(expr, "minute", e))?;
        let hours = parse_field(fields[1], 0, 23, &[]).map_err(|e| bad(expr, "hour", e))?;
        let days_of_month =
            parse_field(fields[2], 1, 31, &[]).map_err(|e| bad(expr, "day-of-month", e))?;
        let months =
            parse_field(fields[3], 1, 12, &MONTH_NAMES).map_err(|e| bad(expr, "month", e))?;
        let mut days_of_week =
            parse_field(fields[4], 0, 7, &DOW_NAMES).map_err(|e| bad(expr, "day-of-week", e))?;

        // 7 is Sunday; fold it onto bit 0.
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            // Classic cron: the day fields count as unrestricted when they
            // start with `*`, step or not.
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
            source: expr.to_string(),
        })
    }

    /// The smallest instant strictly greater than `after` matching this
    /// expression in `tz`, or `None` if no fire exists within the search
    /// horizon.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&tz);
        let mut date = local.date_naive();
        let mut from_minute = local.hour() * 60 + local.minute() + 1;
        if from_minute >= 24 * 60 {
            date = date.succ_opt()?;
            from_minute = 0;
        }

        for _ in 0..SEARCH_HORIZON_DAYS {
            if self.months & (1 << date.month()) != 0 && self.day_matches(date) {
                if let Some(t) = self.first_instant_on(date, from_minute, after, tz) {
                    return Some(t);
                }
            }
            date = date.succ_opt()?;
            from_minute = 0;
        }
        None
    }

    /// Earliest matching instant on `date` at local minute-of-day
    /// `>= from_minute` that is strictly after `after`.
    fn first_instant_on(
        &self,
        date: NaiveDate,
        from_minute: u32,
        after: DateTime<Utc>,
        tz: Tz,
    ) -> Option<DateTime<Utc>> {
        for hour in 0..24u32 {
            if self.hours & (1 << hour) == 0 {
                continue;
            }
            for minute in 0..60u32 {
                if self.minutes & (1 << minute) == 0 || hour * 60 + minute < from_minute {
                    continue;
                }
                let candidate = match tz.with_ymd_and_hms(
                    date.year(),
                    date.month(),
                    date.day(),
                    hour,
                    minute,
                    0,
                ) {
                    LocalResult::Single(t) => t.with_timezone(&Utc),
                    // Fall-back repeat: take the earlier instant unless it
                    // is not strictly after the reference point.
                    LocalResult::Ambiguous(a, b) => {
                        let a = a.with_timezone(&Utc);
                        if a > after {
                            a
                        } else {
                            b.with_timezone(&Utc)
                        }
                    }
                    // Spring-forward gap: this wall time never happens.
                    LocalResult::None => continue,
                };
                if candidate > after {
                    return Some(candidate);
                }
            }
        }
        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom_ok = self.days_of_month & (1 << date.day()) != 0;
        let dow_ok = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        if self.dom_restricted && self.dow_restricted {
            dom_ok || dow_ok
        } else {
            dom_ok && dow_ok
        }
    }
}

impl FromStr for CronExpr {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn bad(expr: &str, field: &str, detail: String) -> SchedulerError {
    SchedulerError::InvalidSchedule(format!("{} field in {:?}: {}", field, expr, detail))
}

/// Parse one field into a bitmask over `min..=max`.
fn parse_field(text: &str, min: u32, max: u32, names: &[&str]) -> Result<u64, String> {
    let mut mask: u64 = 0;
    for term in text.split(',') {
        if term.is_empty() {
            return Err("empty list entry".to_string());
        }
        let (base, step) = match term.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("bad step in {:?}", term))?;
                if step == 0 {
                    return Err(format!("zero step in {:?}", term));
                }
                (base, step)
            }
            None => (term, 1),
        };

        let (lo, hi) = if base == "*" {
            (min, max)
        } else if let Some((a, b)) = base.split_once('-') {
            (parse_value(a, min, max, names)?, parse_value(b, min, max, names)?)
        } else {
            let v = parse_value(base, min, max, names)?;
            // `5/15` means `5-max/15`, as GNU and Vixie cron accept.
            if term.contains('/') {
                (v, max)
            } else {
                (v, v)
            }
        };

        if lo > hi {
            return Err(format!("range start after end in {:?}", term));
        }

        let mut v = lo;
        while v <= hi {
            mask |= 1 << v;
            v += step;
        }
    }
    Ok(mask)
}

fn parse_value(text: &str, min: u32, max: u32, names: &[&str]) -> Result<u32, String> {
    if !names.is_empty() {
        let lower = text.to_ascii_lowercase();
        if let Some(idx) = names.iter().position(|n| *n == lower) {
            // Name tables start at the field's origin (JAN = 1, SUN = 0).
            return Ok(idx as u32 + min);
        }
    }
    let v: u32 = text
        .parse()
        .map_err(|_| format!("bad value {:?}", text))?;
    if v < min || v > max {
        return Err(format!("value {} outside {}..={}", v, min, max));
    }
    Ok(v)
}
