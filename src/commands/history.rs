use anyhow::Result;

use crate::auth::{self, Capability};
use crate::commands::{format_time, username_of};
use crate::db::Database;
use crate::lifecycle;
use crate::models::{HistoryEntry, User};

pub fn run(db: &Database, actor: &User, key: &str) -> Result<Vec<HistoryEntry>> {
    auth::authorize(actor, Capability::ViewTickets)?;
    let ticket = lifecycle::find_ticket(db, key)?;
    let entries = db.get_history(ticket.id)?;

    if entries.is_empty() {
        println!("No history for {}", ticket.ticket_id);
        return Ok(entries);
    }

    println!("History for {}:", ticket.ticket_id);
    for entry in &entries {
        let who = match entry.actor_id {
            Some(_) => username_of(db, entry.actor_id)?,
            None => "system".to_string(),
        };
        println!(
            "  [{}] {:16} {:<12} {}",
            format_time(entry.created_at),
            entry.action,
            who,
            entry.description
        );
    }
    Ok(entries)
}

/// Recent activity by one user across all tickets.
pub fn by_user(db: &Database, actor: &User, username: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
    auth::authorize(actor, Capability::ViewTickets)?;
    let user = super::find_user(db, username)?;
    let entries = db.get_history_by_actor(user.id, limit)?;
    if entries.is_empty() {
        println!("No activity by {}", user.username);
    }
    for entry in &entries {
        let key = db
            .get_ticket(entry.ticket_id)?
            .map(|t| t.ticket_id.to_string())
            .unwrap_or_default();
        println!(
            "  [{}] {} {:16} {}",
            format_time(entry.created_at),
            key,
            entry.action,
            entry.description
        );
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HistoryAction, Priority};
    use crate::responder;
    use crate::testing::{seed_default_slas, staff_user, ticket_fixture};
    use chrono::Utc;
    use tempfile::tempdir;

    #[test]
    fn test_history_in_write_order() {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        seed_default_slas(&db);
        let admin = staff_user(&db, "admin");
        let ticket = ticket_fixture(&db, &admin, "Audit me", Priority::P3);
        responder::add_comment(&db, &admin, &ticket, "Looking", false, Utc::now()).unwrap();
        lifecycle::set_status(&db, &admin, &ticket, crate::models::Status::Resolved, None, Utc::now()).unwrap();

        let entries = run(&db, &admin, "1").unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![HistoryAction::Created, HistoryAction::CommentAdded, HistoryAction::Resolved]
        );

        let recent = by_user(&db, &admin, "admin", 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, HistoryAction::Resolved);
    }
}
