//! Continuous reconcile schedule preview

use anyhow::{bail, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use strata_deployers::continuous::{schedule, ContinuousReconcileSpec, Schedule};

use crate::cli::{ScheduleCommands, ScheduleNextArgs};
use crate::output;

pub fn run(cmd: ScheduleCommands) -> Result<()> {
    match cmd {
        ScheduleCommands::Next(args) => next(args),
    }
}

fn next(args: ScheduleNextArgs) -> Result<()> {
    let spec = ContinuousReconcileSpec {
        cron: args.cron,
        every: args.every,
    };
    let Some(schedule) = schedule(&spec)? else {
        bail!("Either --cron or --every must be a non-empty schedule");
    };

    let after = args.after.unwrap_or_else(Utc::now);
    let times = activations(&schedule, after, args.count);
    if times.len() < args.count {
        output::warning(&format!(
            "Schedule fires only {} more time(s) after {}",
            times.len(),
            after.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    for time in times {
        println!("{}", time.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    Ok(())
}

/// Up to `count` activations strictly after `after`
fn activations(schedule: &Schedule, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    let mut times = Vec::with_capacity(count);
    let mut last = after;
    while times.len() < count {
        let Some(next) = schedule.next(last) else {
            break;
        };
        times.push(next);
        last = next;
    }
    times
}
