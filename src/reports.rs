//! Aggregate SLA figures for managers.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::{self, Capability};
use crate::db::{Database, TicketFilter};
use crate::lifecycle;
use crate::models::{Priority, Status, Ticket, User};
use crate::sla;

/// Half-open creation window `[since, until)`. Open ends are unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateRange {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since.map_or(true, |s| at >= s) && self.until.map_or(true, |u| at < u)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Compliance {
    pub priority: Priority,
    pub sla_name: Option<String>,
    pub total: usize,
    pub resolved: usize,
    pub resolved_within: usize,
    /// Percentage of all tickets resolved within target; `None` with no tickets.
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub by_status: Vec<(Status, usize)>,
    pub by_priority: Vec<(Priority, usize)>,
    pub open: usize,
    pub overdue: usize,
    pub response_breached: usize,
    pub compliance: Vec<Compliance>,
    pub avg_resolution_secs: Option<i64>,
}

pub fn summary(db: &Database, viewer: &User, range: DateRange, now: DateTime<Utc>) -> Result<Summary> {
    auth::authorize(viewer, Capability::ViewReports)?;
    let tickets: Vec<Ticket> = db
        .list_tickets(&TicketFilter::default())?
        .into_iter()
        .filter(|t| range.contains(t.created_at))
        .collect();
    let slas = lifecycle::sla_index(db)?;

    let by_status = Status::ALL
        .iter()
        .map(|s| (*s, tickets.iter().filter(|t| t.status == *s).count()))
        .collect();
    let by_priority = Priority::ALL
        .iter()
        .map(|p| (*p, tickets.iter().filter(|t| t.priority == *p).count()))
        .collect();

    let mut overdue = 0;
    let mut response_breached = 0;
    for ticket in &tickets {
        if let Some(sla) = lifecycle::sla_of(&slas, ticket) {
            if sla::is_overdue(ticket, sla, now) {
                overdue += 1;
            }
            if sla::response_breached(ticket, sla, now) {
                response_breached += 1;
            }
        }
    }

    let compliance = Priority::ALL
        .iter()
        .map(|priority| {
            let group: Vec<&Ticket> = tickets.iter().filter(|t| t.priority == *priority).collect();
            let resolved = group.iter().filter(|t| t.resolved_at.is_some()).count();
            let resolved_within = group
                .iter()
                .filter(|t| {
                    lifecycle::sla_of(&slas, t)
                        .and_then(|s| sla::resolved_within(t, s))
                        .unwrap_or(false)
                })
                .count();
            let rate = if group.is_empty() {
                None
            } else {
                Some(resolved_within as f64 * 100.0 / group.len() as f64)
            };
            Compliance {
                priority: *priority,
                sla_name: db.active_sla(*priority).ok().flatten().map(|s| s.name),
                total: group.len(),
                resolved,
                resolved_within,
                rate,
            }
        })
        .collect();

    let durations: Vec<i64> = tickets
        .iter()
        .filter_map(sla::time_to_resolution)
        .map(|d| d.num_seconds())
        .collect();
    let avg_resolution_secs = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<i64>() / durations.len() as i64)
    };

    Ok(Summary {
        generated_at: now,
        total: tickets.len(),
        by_status,
        by_priority,
        open: tickets.iter().filter(|t| !t.status.is_terminal()).count(),
        overdue,
        response_breached,
        compliance,
        avg_resolution_secs,
    })
}
