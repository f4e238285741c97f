use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::db::Database;
use crate::models::User;
use crate::reports::{self, DateRange, Summary};
use crate::sla;

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_bound(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}'. Use YYYY-MM-DD or RFC 3339", value))?;
    Ok(date.and_hms_opt(0, 0, 0).context("Invalid date")?.and_utc())
}

fn print_text(summary: &Summary) {
    println!("SLA report ({})", summary.generated_at.format("%Y-%m-%d %H:%M UTC"));
    println!("Tickets: {} total, {} open", summary.total, summary.open);
    println!("Overdue: {}", summary.overdue);
    println!("Awaiting first response past target: {}", summary.response_breached);
    if let Some(secs) = summary.avg_resolution_secs {
        println!("Average resolution: {}", sla::format_duration(Duration::seconds(secs)));
    }

    println!("\nBy status:");
    for (status, count) in &summary.by_status {
        println!("  {:12} {}", status.to_string(), count);
    }

    println!("\nBy priority:");
    for (priority, count) in &summary.by_priority {
        println!("  {:12} {}", priority.label(), count);
    }

    println!("\nCompliance:");
    for row in &summary.compliance {
        let rate = row
            .rate
            .map(|r| format!("{:.1}%", r))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "  {:12} {:>4} tickets {:>4} resolved {:>4} within target  {}  ({})",
            row.priority.label(),
            row.total,
            row.resolved,
            row.resolved_within,
            rate,
            row.sla_name.as_deref().unwrap_or("no SLA")
        );
    }
}

pub fn run(
    db: &Database,
    actor: &User,
    since: Option<&str>,
    until: Option<&str>,
    json: bool,
    now: DateTime<Utc>,
) -> Result<Summary> {
    let range = DateRange {
        since: since.map(parse_bound).transpose()?,
        until: until.map(parse_bound).transpose()?,
    };
    let summary = reports::summary(db, actor, range, now)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_text(&summary);
    }
    Ok(summary)
}
