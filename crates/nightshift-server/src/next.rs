//! `nightshift next`: preview a crontab expression.

use anyhow::Context;
use chrono::{Local, NaiveDateTime};
use nightshift_scheduler::CrontabSchedule;

const FROM_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Canonical form of `expression` plus its next `count` occurrences after
/// `from`.
pub fn preview(
    expression: &str,
    from: NaiveDateTime,
    count: usize,
) -> anyhow::Result<(CrontabSchedule, Vec<NaiveDateTime>)> {
    let schedule = CrontabSchedule::parse(expression)?;
    let occurrences = schedule
        .next_occurrences(from, CrontabSchedule::default_end())
        .take(count)
        .collect();
    Ok((schedule, occurrences))
}

pub fn run(expression: &str, count: usize, from: Option<&str>, json: bool) -> anyhow::Result<()> {
    let from = match from {
        Some(text) => NaiveDateTime::parse_from_str(text, FROM_FORMAT)
            .with_context(|| format!("--from must look like \"YYYY-MM-DD HH:MM\", got {text:?}"))?,
        None => Local::now().naive_local(),
    };
    let (schedule, occurrences) = preview(expression, from, count)?;

    if json {
        let report = serde_json::json!({
            "expression": schedule.to_string(),
            "from": from,
            "occurrences": occurrences,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("expression: {schedule}");
    if occurrences.is_empty() {
        println!("(no occurrences)");
    }
    for at in occurrences {
        println!("{}", at.format("%Y-%m-%d %H:%M (%a)"));
    }
    Ok(())
}
