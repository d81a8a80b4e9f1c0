//! Continuous reconcile schedules
//!
//! A deploy item's provider configuration may carry
//!
//! ```yaml
//! continuousReconcile:
//!   cron: "*/15 * * * *"   # or a descriptor such as @daily
//! # or
//!   every: 1h30m
//! ```
//!
//! Exactly one of `cron` and `every` may be set. An empty specification
//! disables continuous reconciliation.

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use strata_core::{Error, Result};

/// Provider configuration key of the schedule
pub const CONTINUOUS_RECONCILE_KEY: &str = "continuousReconcile";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContinuousReconcileSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every: Option<String>,
}

impl ContinuousReconcileSpec {
    pub fn is_empty(&self) -> bool {
        is_blank(&self.cron) && is_blank(&self.every)
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

/// A recurrence computing the next reconcile time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Cron(CronSchedule),
    /// Fixed interval in whole seconds
    Every(Duration),
}

impl Schedule {
    /// Next activation strictly after `last`.
    ///
    /// `None` only for a cron expression that never fires after `last`.
    pub fn next(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Cron(cron) => cron.next_after(last),
            Self::Every(interval) => {
                let step = TimeDelta::from_std(*interval).ok()?;
                last.checked_add_signed(step)
            }
        }
    }
}

/// Build the schedule of a specification; `None` for an empty one
pub fn schedule(spec: &ContinuousReconcileSpec) -> Result<Option<Schedule>> {
    match (is_blank(&spec.cron), is_blank(&spec.every)) {
        (true, true) => Ok(None),
        (false, false) => Err(Error::invalid_schedule(
            "only one of cron and every may be specified",
        )),
        (false, true) => {
            let expr = spec.cron.as_deref().unwrap_or_default();
            Ok(Some(CronSchedule::parse(expr)?))
        }
        (true, false) => {
            let expr = spec.every.as_deref().unwrap_or_default();
            let interval = parse_duration(expr)?;
            let interval = Duration::from_secs(interval.as_secs());
            if interval < Duration::from_secs(1) {
                return Err(Error::invalid_schedule(format!(
                    "interval {:?} must be at least one second",
                    expr
                )));
            }
            Ok(Some(Schedule::Every(interval)))
        }
    }
}

/// Next reconcile time from a provider configuration.
///
/// Returns `None` when the configuration has no continuous reconcile
/// specification.
pub fn next_reconcile(configuration: &Value, last: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    let Some(raw) = configuration.get(CONTINUOUS_RECONCILE_KEY) else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    let spec: ContinuousReconcileSpec =
        serde_json::from_value(raw.clone()).map_err(|e| Error::invalid_schedule(e.to_string()))?;
    Ok(schedule(&spec)?.and_then(|s| s.next(last)))
}

/// Parse a duration such as `1h30m`, `90s` or `1.5h`
pub fn parse_duration(input: &str) -> Result<Duration> {
    let invalid = |message: &str| Error::invalid_schedule(format!("invalid duration {:?}: {}", input, message));

    let s = input.trim();
    if s.is_empty() {
        return Err(invalid("empty"));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(invalid("expected a number"));
        }
        let value: f64 = rest[..number_end]
            .parse()
            .map_err(|_| invalid("malformed number"))?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(invalid("missing unit")),
            _ => return Err(invalid("unknown unit")),
        };
        rest = &rest[unit_end..];
        nanos += value * scale;
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(invalid("out of range"));
    }
    Ok(Duration::from_nanos(nanos as u64))
}

/// Five-field cron expression (minute hour day-of-month month day-of-week)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    /// Neither day field is `*`: a day matches if either field matches
    either_day: bool,
}

struct Field {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: Field = Field {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
};
const HOUR: Field = Field {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
};
const DAY_OF_MONTH: Field = Field {
    name: "day of month",
    min: 1,
    max: 31,
    names: &[],
};
const MONTH: Field = Field {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ],
};
// 7 is accepted as an alias for Sunday
const DAY_OF_WEEK: Field = Field {
    name: "day of week",
    min: 0,
    max: 7,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
};

/// Longest stretch searched for a match; covers leap day schedules
const SEARCH_LIMIT_DAYS: i64 = 366 * 5;

impl CronSchedule {
    /// Parse a five-field expression or a descriptor.
    ///
    /// `@every <duration>` yields an interval schedule.
    pub fn parse(expr: &str) -> Result<Schedule> {
        let expr = expr.trim();
        if let Some(interval) = expr.strip_prefix("@every ") {
            return schedule(&ContinuousReconcileSpec {
                cron: None,
                every: Some(interval.to_string()),
            })?
            .ok_or_else(|| Error::invalid_schedule("empty @every interval"));
        }

        let expanded = match expr {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other if other.starts_with('@') => {
                return Err(Error::invalid_schedule(format!("unknown descriptor {}", other)))
            }
            other => other,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(Error::invalid_schedule(format!(
                "expected 5 fields in {:?}, found {}",
                expr,
                fields.len()
            )));
        };

        let mut days_of_week = parse_field(dow, &DAY_OF_WEEK)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        let cron = Self {
            minutes: parse_field(minute, &MINUTE)?,
            hours: parse_field(hour, &HOUR)?,
            days_of_month: parse_field(dom, &DAY_OF_MONTH)?,
            months: parse_field(month, &MONTH)?,
            days_of_week,
            either_day: !is_wildcard(dom) && !is_wildcard(dow),
        };
        cron.check_reachable(expr)?;
        Ok(Schedule::Cron(cron))
    }

    /// Reject day-of-month/month combinations that never occur, such as `30 2`
    fn check_reachable(&self, expr: &str) -> Result<()> {
        if self.either_day || self.days_of_week != all_bits(&DAY_OF_WEEK) & !(1 << 7) {
            return Ok(());
        }
        const DAYS_IN_MONTH: [u32; 12] = [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
        let reachable = (1..=12u32).any(|m| {
            has_bit(self.months, m) && (1..=DAYS_IN_MONTH[m as usize - 1]).any(|d| has_bit(self.days_of_month, d))
        });
        if reachable {
            Ok(())
        } else {
            Err(Error::invalid_schedule(format!("{:?} never fires", expr)))
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = has_bit(self.days_of_month, date.day());
        let dow = has_bit(self.days_of_week, date.weekday().num_days_from_sunday());
        if self.either_day {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First matching minute strictly after `last`
    pub fn next_after(&self, last: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = last
            .with_second(0)?
            .with_nanosecond(0)?
            .checked_add_signed(TimeDelta::minutes(1))?;
        let limit = start
            .checked_add_signed(TimeDelta::days(SEARCH_LIMIT_DAYS))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let mut t = start;

        while t < limit {
            if !has_bit(self.months, t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = NaiveDate::from_ymd_opt(year, month, 1)?
                    .and_hms_opt(0, 0, 0)?
                    .and_utc();
                continue;
            }
            if !self.day_matches(t.date_naive()) {
                t = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !has_bit(self.hours, t.hour()) {
                t = t.with_minute(0)?.checked_add_signed(TimeDelta::hours(1))?;
                continue;
            }
            if !has_bit(self.minutes, t.minute()) {
                t = t.checked_add_signed(TimeDelta::minutes(1))?;
                continue;
            }
            return Some(t);
        }
        None
    }
}

fn is_wildcard(expr: &str) -> bool {
    expr.starts_with('*') || expr.starts_with('?')
}

fn has_bit(bits: u64, n: u32) -> bool {
    bits & (1u64 << n) != 0
}

fn all_bits(field: &Field) -> u64 {
    (field.min..=field.max).fold(0, |acc, n| acc | (1u64 << n))
}

fn parse_field(expr: &str, field: &Field) -> Result<u64> {
    let invalid = |message: String| {
        Error::invalid_schedule(format!("{} field {:?}: {}", field.name, expr, message))
    };

    let mut bits = 0u64;
    for item in expr.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| invalid(format!("invalid step {:?}", step)))?;
                if step == 0 {
                    return Err(invalid("step must be positive".to_string()));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (lo, hi) = if range == "*" || range == "?" {
            (field.min, field.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (value(a, field).map_err(&invalid)?, value(b, field).map_err(&invalid)?)
        } else {
            let v = value(range, field).map_err(&invalid)?;
            if step.is_some() {
                (v, field.max)
            } else {
                (v, v)
            }
        };

        if lo > hi {
            return Err(invalid(format!("range {}-{} is reversed", lo, hi)));
        }
        for n in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            bits |= 1u64 << n;
        }
    }
    Ok(bits)
}

fn value(token: &str, field: &Field) -> std::result::Result<u32, String> {
    let lower = token.to_ascii_lowercase();
    let n = match field.names.iter().position(|name| *name == lower) {
        Some(i) => i as u32 + if field.min == 1 { 1 } else { 0 },
        None => token
            .parse::<u32>()
            .map_err(|_| format!("invalid value {:?}", token))?,
    };
    if n < field.min || n > field.max {
        return Err(format!("{} out of range {}-{}", n, field.min, field.max));
    }
    Ok(n)
}
