//! Audit trail for ticket mutations.
//!
//! Records are written after the mutation they describe has committed. A
//! failed write is logged and counted, never propagated, so the audit trail
//! can lag a mutation but can never undo one.

use chrono::{DateTime, Utc};

use crate::db::{Database, NewHistory};
use crate::models::{HistoryAction, Status, Ticket};

/// One tracked field whose value differs between two ticket snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub action: HistoryAction,
    pub old_value: String,
    pub new_value: String,
}

impl FieldChange {
    pub fn describe(&self) -> String {
        let shown = |v: &str| if v.is_empty() { "(none)".to_string() } else { v.to_string() };
        format!(
            "{}: {} → {}",
            field_label(self.field),
            shown(&self.old_value),
            shown(&self.new_value)
        )
    }
}

fn field_label(field: &str) -> String {
    let mut label = field.replace('_', " ");
    if let Some(first) = label.get(0..1) {
        let upper = first.to_uppercase();
        label.replace_range(0..1, &upper);
    }
    label
}

fn status_action(old: Status, new: Status) -> HistoryAction {
    match new {
        Status::Resolved => HistoryAction::Resolved,
        Status::Closed => HistoryAction::Closed,
        _ if old.is_terminal() && !new.is_terminal() => HistoryAction::Reopened,
        _ => HistoryAction::StatusChanged,
    }
}

fn opt_id(id: Option<i64>) -> String {
    id.map(|v| v.to_string()).unwrap_or_default()
}

/// Compare the tracked fields of two snapshots of the same ticket.
///
/// Reference fields carry raw ids; [`humanize`] swaps them for names.
pub fn diff(old: &Ticket, new: &Ticket) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    let mut push = |field, action, old_value: String, new_value: String| {
        if old_value != new_value {
            changes.push(FieldChange {
                field,
                action,
                old_value,
                new_value,
            });
        }
    };

    push("title", HistoryAction::Updated, old.title.clone(), new.title.clone());
    push(
        "description",
        HistoryAction::Updated,
        old.description.clone(),
        new.description.clone(),
    );
    push(
        "status",
        status_action(old.status, new.status),
        old.status.to_string(),
        new.status.to_string(),
    );
    push(
        "priority",
        HistoryAction::PriorityChanged,
        old.priority.to_string(),
        new.priority.to_string(),
    );
    push(
        "assigned_to",
        HistoryAction::Assigned,
        opt_id(old.assigned_to),
        opt_id(new.assigned_to),
    );
    push(
        "category",
        HistoryAction::Updated,
        opt_id(old.category_id),
        opt_id(new.category_id),
    );
    push(
        "subcategory",
        HistoryAction::Updated,
        opt_id(old.subcategory_id),
        opt_id(new.subcategory_id),
    );
    push(
        "resolution_notes",
        HistoryAction::Updated,
        old.resolution_notes.clone(),
        new.resolution_notes.clone(),
    );

    changes
}

/// Replace reference ids with usernames and category names.
pub fn humanize(db: &Database, changes: &mut [FieldChange]) {
    for change in changes.iter_mut() {
        let lookup = |raw: &str| -> String {
            let Ok(id) = raw.parse::<i64>() else {
                return raw.to_string();
            };
            let name = match change.field {
                "assigned_to" => db.get_user(id).ok().flatten().map(|u| u.username),
                "category" => db.get_category(id).ok().flatten().map(|c| c.name),
                "subcategory" => db.get_subcategory(id).ok().flatten().map(|s| s.name),
                _ => None,
            };
            name.unwrap_or_else(|| raw.to_string())
        };
        let old_value = lookup(&change.old_value);
        let new_value = lookup(&change.new_value);
        change.old_value = old_value;
        change.new_value = new_value;
    }
}

/// Append one record per change. Returns how many records could not be
/// written.
pub fn record_changes(
    db: &Database,
    ticket_id: i64,
    actor_id: Option<i64>,
    changes: &[FieldChange],
    at: DateTime<Utc>,
) -> usize {
    let mut lost = 0;
    for change in changes {
        let entry = NewHistory {
            ticket_id,
            action: change.action,
            field: Some(change.field.to_string()),
            old_value: change.old_value.clone(),
            new_value: change.new_value.clone(),
            description: change.describe(),
            actor_id,
            created_at: at,
        };
        if !append(db, &entry) {
            lost += 1;
        }
    }
    lost
}

/// Append a record that is not tied to a single field (creation, comments,
/// attachments). Returns false if the write failed.
pub fn record_event(
    db: &Database,
    ticket_id: i64,
    actor_id: Option<i64>,
    action: HistoryAction,
    description: String,
    at: DateTime<Utc>,
) -> bool {
    append(
        db,
        &NewHistory {
            ticket_id,
            action,
            field: None,
            old_value: String::new(),
            new_value: String::new(),
            description,
            actor_id,
            created_at: at,
        },
    )
}

fn append(db: &Database, entry: &NewHistory) -> bool {
    match db.append_history(entry) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(
                ticket = entry.ticket_id,
                action = %entry.action,
                error = %e,
                "failed to record ticket history"
            );
            false
        }
    }
}
