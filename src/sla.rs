//! SLA lookup and the time projections derived from it.
//!
//! Nothing here is persisted: overdue state and elapsed times are computed
//! from the ticket's stored timestamps each time they are read.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::Database;
use crate::error::DeskError;
use crate::models::{NewSla, Priority, Sla, Ticket};
use crate::validate::Checker;

/// Longest target an SLA may set: five years.
pub const MAX_HOURS: u32 = 5 * 365 * 24;

/// The active SLA for `priority`. A missing definition is a configuration
/// error, never defaulted.
pub fn resolve(db: &Database, priority: Priority) -> Result<Sla> {
    match db.active_sla(priority)? {
        Some(sla) => Ok(sla),
        None => {
            tracing::error!(%priority, "no active SLA configured");
            Err(DeskError::MissingSla(priority).into())
        }
    }
}

/// The SLA a ticket is measured against: the one attached at creation, or
/// the active one for its priority if the attached row has gone away.
pub fn for_ticket(db: &Database, ticket: &Ticket) -> Result<Sla> {
    if let Some(id) = ticket.sla_id {
        if let Some(sla) = db.get_sla(id)? {
            return Ok(sla);
        }
    }
    resolve(db, ticket.priority)
}

/// Response and resolution hours must be positive, at most [`MAX_HOURS`],
/// and the response target must not come after the resolution target.
pub fn check_hours(check: &mut Checker, sla: &NewSla) {
    for (field, hours) in [
        ("response_time_hours", sla.response_time_hours),
        ("resolution_time_hours", sla.resolution_time_hours),
    ] {
        if hours == 0 {
            check.fail(field, "must be positive");
        } else if hours > MAX_HOURS {
            check.fail(field, format!("must be at most {} hours", MAX_HOURS));
        }
    }
    if sla.response_time_hours > sla.resolution_time_hours {
        check.fail("response_time_hours", "must not exceed the resolution time");
    }
}

// Saturates instead of overflowing for rows written before hours were capped.
fn deadline(start: DateTime<Utc>, hours: u32) -> DateTime<Utc> {
    start
        .checked_add_signed(Duration::hours(i64::from(hours)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn response_due(ticket: &Ticket, sla: &Sla) -> DateTime<Utc> {
    deadline(ticket.created_at, sla.response_time_hours)
}

pub fn resolution_due(ticket: &Ticket, sla: &Sla) -> DateTime<Utc> {
    deadline(ticket.created_at, sla.resolution_time_hours)
}

/// True from the resolution deadline onwards while the ticket is unresolved
/// and still being worked.
pub fn is_overdue(ticket: &Ticket, sla: &Sla, now: DateTime<Utc>) -> bool {
    if ticket.resolved_at.is_some() || ticket.status.is_terminal() {
        return false;
    }
    now >= resolution_due(ticket, sla)
}

/// True from the response deadline onwards while no staff member has replied.
pub fn response_breached(ticket: &Ticket, sla: &Sla, now: DateTime<Utc>) -> bool {
    if ticket.first_response_at.is_some() || ticket.status.is_terminal() {
        return false;
    }
    now >= response_due(ticket, sla)
}

pub fn time_to_first_response(ticket: &Ticket) -> Option<Duration> {
    ticket.first_response_at.map(|at| at - ticket.created_at)
}

pub fn time_to_resolution(ticket: &Ticket) -> Option<Duration> {
    ticket.resolved_at.map(|at| at - ticket.created_at)
}

/// Whether a resolved ticket met its resolution target. `None` while open.
pub fn resolved_within(ticket: &Ticket, sla: &Sla) -> Option<bool> {
    time_to_resolution(ticket)
        .map(|elapsed| elapsed <= Duration::hours(i64::from(sla.resolution_time_hours)))
}

/// Everything the SLA says about a ticket at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct SlaStatus {
    pub sla_name: String,
    pub response_due: DateTime<Utc>,
    pub resolution_due: DateTime<Utc>,
    pub time_to_first_response_secs: Option<i64>,
    pub time_to_resolution_secs: Option<i64>,
    pub response_breached: bool,
    pub overdue: bool,
}

pub fn project(ticket: &Ticket, sla: &Sla, now: DateTime<Utc>) -> SlaStatus {
    SlaStatus {
        sla_name: sla.name.clone(),
        response_due: response_due(ticket, sla),
        resolution_due: resolution_due(ticket, sla),
        time_to_first_response_secs: time_to_first_response(ticket).map(|d| d.num_seconds()),
        time_to_resolution_secs: time_to_resolution(ticket).map(|d| d.num_seconds()),
        response_breached: response_breached(ticket, sla, now),
        overdue: is_overdue(ticket, sla, now),
    }
}

/// Render a duration as `1d 4h 30m` for terminal output.
pub fn format_duration(d: Duration) -> String {
    let total_minutes = d.num_minutes().max(0);
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes % (24 * 60)) / 60;
    let minutes = total_minutes % 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}
