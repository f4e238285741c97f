use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::lifecycle::{self, UpdateOutcome};
use crate::models::{Status, User};

fn transition(
    db: &Database,
    actor: &User,
    key: &str,
    status: Status,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<UpdateOutcome> {
    let ticket = lifecycle::find_ticket(db, key)?;
    let outcome = lifecycle::set_status(db, actor, &ticket, status, notes.map(str::to_string), now)?;
    println!("{} is now {}", outcome.ticket.ticket_id, outcome.ticket.status);
    Ok(outcome)
}

pub fn resolve(db: &Database, actor: &User, key: &str, notes: Option<&str>, now: DateTime<Utc>) -> Result<UpdateOutcome> {
    transition(db, actor, key, Status::Resolved, notes, now)
}

pub fn close(db: &Database, actor: &User, key: &str, notes: Option<&str>, now: DateTime<Utc>) -> Result<UpdateOutcome> {
    transition(db, actor, key, Status::Closed, notes, now)
}

pub fn cancel(db: &Database, actor: &User, key: &str, notes: Option<&str>, now: DateTime<Utc>) -> Result<UpdateOutcome> {
    transition(db, actor, key, Status::Cancelled, notes, now)
}

pub fn reopen(db: &Database, actor: &User, key: &str, now: DateTime<Utc>) -> Result<UpdateOutcome> {
    let ticket = lifecycle::find_ticket(db, key)?;
    let outcome = lifecycle::reopen(db, actor, &ticket, now)?;
    println!("Reopened {}", outcome.ticket.ticket_id);
    Ok(outcome)
}
