//! Ticket creation, updates and removal.
//!
//! Every mutation checks the actor's capabilities and validates its input
//! before anything is written. History is appended after the ticket row has
//! been committed.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::auth::{self, Capability};
use crate::db::{Database, TicketFilter};
use crate::error::DeskError;
use crate::history::{self, FieldChange};
use crate::models::{HistoryAction, Priority, Sla, Source, Status, Ticket, User};
use crate::sla;
use crate::ticket_id::{self, TicketId};
use crate::validate::{Checker, NAME_MAX_CHARS, TITLE_MAX_CHARS};

#[derive(Debug, Clone, Default)]
pub struct NewTicket {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub source: Source,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub assigned_to: Option<i64>,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub estimated_hours: Option<f64>,
}

/// A partial update. `None` leaves a field as it is; for nullable
/// references `Some(None)` clears the field.
#[derive(Debug, Clone, Default)]
pub struct TicketChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub assigned_to: Option<Option<i64>>,
    pub category_id: Option<Option<i64>>,
    pub subcategory_id: Option<Option<i64>>,
    pub resolution_notes: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub estimated_hours: Option<Option<f64>>,
}

#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub ticket: Ticket,
    pub changes: Vec<FieldChange>,
    /// History records that could not be written.
    pub lost_history: usize,
}

#[derive(Debug, Clone)]
pub struct AttachmentMeta {
    pub filename: String,
    pub file_size: u64,
    pub content_type: String,
}

/// Look a ticket up by any accepted identifier form.
pub fn find_ticket(db: &Database, key: &str) -> Result<Ticket> {
    let id = TicketId::parse_lenient(key).map_err(|e| {
        DeskError::Validation(vec![crate::error::FieldError::new("ticket", e.to_string())])
    })?;
    db.get_ticket_by_key(id)?
        .ok_or_else(|| DeskError::NotFound(format!("Ticket {}", id)).into())
}

fn check_text_fields(
    check: &mut Checker,
    title: &str,
    description: &str,
    contact_name: &str,
    contact_email: &str,
    estimated_hours: Option<f64>,
) {
    check.required("title", title);
    check.max_chars("title", title.trim(), TITLE_MAX_CHARS);
    check.required("description", description);
    check.max_chars("contact_name", contact_name, NAME_MAX_CHARS);
    check.email("contact_email", contact_email.trim());
    if let Some(hours) = estimated_hours {
        if !hours.is_finite() || hours < 0.0 {
            check.fail("estimated_hours", "must be a non-negative number");
        }
    }
}

/// Category and subcategory must exist, be active and belong together.
/// A subcategory given without a category brings its own category along.
fn check_classification(
    db: &Database,
    check: &mut Checker,
    category_id: &mut Option<i64>,
    subcategory_id: Option<i64>,
) -> Result<()> {
    if let Some(id) = *category_id {
        match db.get_category(id)? {
            Some(c) if c.is_active => {}
            Some(_) => check.fail("category", "is inactive"),
            None => check.fail("category", format!("#{} does not exist", id)),
        }
    }
    if let Some(id) = subcategory_id {
        match db.get_subcategory(id)? {
            Some(sub) if !sub.is_active => check.fail("subcategory", "is inactive"),
            Some(sub) => match *category_id {
                None => *category_id = Some(sub.category_id),
                Some(cat) if cat != sub.category_id => {
                    check.fail("subcategory", "does not belong to the selected category")
                }
                Some(_) => {}
            },
            None => check.fail("subcategory", format!("#{} does not exist", id)),
        }
    }
    Ok(())
}

fn check_assignee(db: &Database, check: &mut Checker, assignee: Option<i64>) -> Result<()> {
    if let Some(id) = assignee {
        match db.get_user(id)? {
            Some(u) if u.is_active => {}
            Some(u) => check.fail("assigned_to", format!("'{}' is not an active user", u.username)),
            None => check.fail("assigned_to", format!("user #{} does not exist", id)),
        }
    }
    Ok(())
}

/// Validate, attach the SLA, allocate an identifier and store a new ticket.
pub fn create_ticket(
    db: &Database,
    actor: &User,
    input: &NewTicket,
    now: DateTime<Utc>,
) -> Result<Ticket> {
    auth::authorize(actor, Capability::CreateTicket)?;
    if input.assigned_to.is_some() {
        auth::authorize(actor, Capability::AssignTicket)?;
    }

    let mut category_id = input.category_id;
    let mut check = Checker::new();
    check_text_fields(
        &mut check,
        &input.title,
        &input.description,
        &input.contact_name,
        &input.contact_email,
        input.estimated_hours,
    );
    check_classification(db, &mut check, &mut category_id, input.subcategory_id)?;
    check_assignee(db, &mut check, input.assigned_to)?;
    check.finish()?;

    let sla = sla::resolve(db, input.priority)?;
    let key = ticket_id::allocate(db)?;

    let mut ticket = Ticket {
        id: 0,
        ticket_id: key,
        title: input.title.trim().to_string(),
        description: input.description.trim().to_string(),
        status: Status::Open,
        priority: input.priority,
        source: input.source,
        category_id,
        subcategory_id: input.subcategory_id,
        sla_id: Some(sla.id),
        created_by: actor.id,
        assigned_to: input.assigned_to,
        created_at: now,
        updated_at: now,
        first_response_at: None,
        resolved_at: None,
        closed_at: None,
        resolution_notes: String::new(),
        contact_name: input.contact_name.trim().to_string(),
        contact_email: input.contact_email.trim().to_string(),
        contact_phone: input.contact_phone.trim().to_string(),
        estimated_hours: input.estimated_hours,
    };
    ticket.id = db.insert_ticket(&ticket).map_err(|e| {
        tracing::warn!(ticket = %key, "ticket insert failed; identifier is burned");
        e
    })?;
    tracing::info!(ticket = %key, priority = %ticket.priority, sla = %sla.name, "ticket created");

    history::record_event(
        db,
        ticket.id,
        Some(actor.id),
        HistoryAction::Created,
        format!("Ticket created by {}", actor.display_name()),
        now,
    );

    Ok(ticket)
}

/// Apply a partial update, keeping status timestamps and the SLA in step,
/// and record one history entry per changed field.
pub fn update_ticket(
    db: &Database,
    actor: &User,
    ticket: &Ticket,
    changes: &TicketChanges,
    now: DateTime<Utc>,
) -> Result<UpdateOutcome> {
    auth::authorize(actor, Capability::UpdateTicket)?;
    if let Some(assignee) = changes.assigned_to {
        if assignee != ticket.assigned_to {
            auth::authorize(actor, Capability::AssignTicket)?;
        }
    }

    let mut next = ticket.clone();
    if let Some(title) = &changes.title {
        next.title = title.trim().to_string();
    }
    if let Some(description) = &changes.description {
        next.description = description.trim().to_string();
    }
    if let Some(priority) = changes.priority {
        next.priority = priority;
    }
    if let Some(assignee) = changes.assigned_to {
        next.assigned_to = assignee;
    }
    if let Some(category) = changes.category_id {
        next.category_id = category;
        // A new category invalidates the old subcategory unless one is given.
        if changes.subcategory_id.is_none() && category != ticket.category_id {
            next.subcategory_id = None;
        }
    }
    if let Some(subcategory) = changes.subcategory_id {
        next.subcategory_id = subcategory;
    }
    if let Some(notes) = &changes.resolution_notes {
        next.resolution_notes = notes.trim().to_string();
    }
    if let Some(name) = &changes.contact_name {
        next.contact_name = name.trim().to_string();
    }
    if let Some(email) = &changes.contact_email {
        next.contact_email = email.trim().to_string();
    }
    if let Some(phone) = &changes.contact_phone {
        next.contact_phone = phone.trim().to_string();
    }
    if let Some(hours) = changes.estimated_hours {
        next.estimated_hours = hours;
    }

    let mut check = Checker::new();
    check_text_fields(
        &mut check,
        &next.title,
        &next.description,
        &next.contact_name,
        &next.contact_email,
        next.estimated_hours,
    );
    if next.category_id != ticket.category_id || next.subcategory_id != ticket.subcategory_id {
        let mut category_id = next.category_id;
        check_classification(db, &mut check, &mut category_id, next.subcategory_id)?;
        next.category_id = category_id;
    }
    if next.assigned_to != ticket.assigned_to {
        check_assignee(db, &mut check, next.assigned_to)?;
    }
    check.finish()?;

    if let Some(status) = changes.status {
        apply_status(&mut next, status, now);
    }
    if next.priority != ticket.priority {
        next.sla_id = Some(sla::resolve(db, next.priority)?.id);
    }

    let mut field_changes = history::diff(ticket, &next);
    let other_columns_changed = next.contact_name != ticket.contact_name
        || next.contact_email != ticket.contact_email
        || next.contact_phone != ticket.contact_phone
        || next.estimated_hours != ticket.estimated_hours;
    if field_changes.is_empty() && !other_columns_changed {
        return Ok(UpdateOutcome {
            ticket: ticket.clone(),
            changes: Vec::new(),
            lost_history: 0,
        });
    }

    next.updated_at = now;
    if !db.save_ticket(&next)? {
        return Err(DeskError::NotFound(format!("Ticket {}", ticket.ticket_id)).into());
    }
    tracing::info!(
        ticket = %next.ticket_id,
        fields = field_changes.len(),
        by = %actor.username,
        "ticket updated"
    );

    history::humanize(db, &mut field_changes);
    let lost_history = history::record_changes(db, next.id, Some(actor.id), &field_changes, now);

    let stored = db
        .get_ticket(next.id)?
        .context("Ticket vanished after update")?;
    Ok(UpdateOutcome {
        ticket: stored,
        changes: field_changes,
        lost_history,
    })
}

/// Status side effects: resolving and closing stamp their time once,
/// reopening clears both stamps.
fn apply_status(ticket: &mut Ticket, status: Status, now: DateTime<Utc>) {
    let was_terminal = ticket.status.is_terminal();
    ticket.status = status;
    match status {
        Status::Resolved => {
            ticket.resolved_at.get_or_insert(now);
        }
        Status::Closed => {
            ticket.closed_at.get_or_insert(now);
        }
        Status::Cancelled => {}
        Status::Open | Status::InProgress | Status::Pending => {
            if was_terminal {
                ticket.resolved_at = None;
                ticket.closed_at = None;
            }
        }
    }
}

/// Move a ticket to `status`, optionally recording resolution notes.
pub fn set_status(
    db: &Database,
    actor: &User,
    ticket: &Ticket,
    status: Status,
    resolution_notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<UpdateOutcome> {
    if ticket.status == status {
        return Err(DeskError::Conflict(format!(
            "Ticket {} is already {}",
            ticket.ticket_id, status
        ))
        .into());
    }
    update_ticket(
        db,
        actor,
        ticket,
        &TicketChanges {
            status: Some(status),
            resolution_notes,
            ..Default::default()
        },
        now,
    )
}

/// Put a resolved, closed or cancelled ticket back in the open queue.
pub fn reopen(db: &Database, actor: &User, ticket: &Ticket, now: DateTime<Utc>) -> Result<UpdateOutcome> {
    if !ticket.status.is_terminal() {
        return Err(DeskError::Conflict(format!(
            "Ticket {} is {} and cannot be reopened",
            ticket.ticket_id, ticket.status
        ))
        .into());
    }
    set_status(db, actor, ticket, Status::Open, None, now)
}

pub fn delete_ticket(db: &Database, actor: &User, ticket: &Ticket) -> Result<()> {
    auth::authorize(actor, Capability::DeleteTicket)?;
    if !db.delete_ticket(ticket.id)? {
        return Err(DeskError::NotFound(format!("Ticket {}", ticket.ticket_id)).into());
    }
    tracing::info!(ticket = %ticket.ticket_id, by = %actor.username, "ticket deleted");
    Ok(())
}

/// Record an attachment's metadata. The file body is stored elsewhere.
pub fn add_attachment(
    db: &Database,
    actor: &User,
    ticket: &Ticket,
    meta: &AttachmentMeta,
    now: DateTime<Utc>,
) -> Result<i64> {
    auth::authorize(actor, Capability::UpdateTicket)?;
    let mut check = Checker::new();
    check.required("filename", &meta.filename);
    check.max_chars("filename", &meta.filename, TITLE_MAX_CHARS);
    check.finish()?;

    let content_type = if meta.content_type.trim().is_empty() {
        "application/octet-stream"
    } else {
        meta.content_type.trim()
    };
    let id = db.add_attachment(
        ticket.id,
        meta.filename.trim(),
        meta.file_size,
        content_type,
        actor.id,
        now,
    )?;
    history::record_event(
        db,
        ticket.id,
        Some(actor.id),
        HistoryAction::AttachmentAdded,
        format!("Attachment added: {}", meta.filename.trim()),
        now,
    );
    Ok(id)
}

/// SLA definitions by row id, for projecting many tickets at once.
pub fn sla_index(db: &Database) -> Result<HashMap<i64, Sla>> {
    Ok(db
        .list_slas(true)?
        .into_iter()
        .map(|s| (s.id, s))
        .collect())
}

/// The SLA a ticket is measured against, from a prefetched index.
pub fn sla_of<'a>(index: &'a HashMap<i64, Sla>, ticket: &Ticket) -> Option<&'a Sla> {
    ticket
        .sla_id
        .and_then(|id| index.get(&id))
        .or_else(|| {
            index
                .values()
                .find(|s| s.is_active && s.priority == ticket.priority)
        })
}

pub fn list_tickets(
    db: &Database,
    viewer: &User,
    filter: &TicketFilter,
    overdue_only: bool,
    now: DateTime<Utc>,
) -> Result<Vec<Ticket>> {
    auth::authorize(viewer, Capability::ViewTickets)?;
    let tickets = db.list_tickets(filter)?;
    if !overdue_only {
        return Ok(tickets);
    }
    let slas = sla_index(db)?;
    Ok(tickets
        .into_iter()
        .filter(|t| sla_of(&slas, t).is_some_and(|s| sla::is_overdue(t, s, now)))
        .collect())
}
