use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::commands::{find_category, find_subcategory_id, find_user};
use crate::db::Database;
use crate::lifecycle::{self, TicketChanges, UpdateOutcome};
use crate::models::{Priority, Status, User};

/// Values that clear an optional reference instead of naming one.
const NONE_WORDS: [&str; 3] = ["none", "-", ""];

fn is_none_word(value: &str) -> bool {
    NONE_WORDS.contains(&value.trim().to_ascii_lowercase().as_str())
}

#[derive(Debug, Default)]
pub struct UpdateArgs<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub status: Option<&'a str>,
    pub priority: Option<&'a str>,
    pub category: Option<&'a str>,
    pub subcategory: Option<&'a str>,
    pub notes: Option<&'a str>,
    pub contact_name: Option<&'a str>,
    pub contact_email: Option<&'a str>,
    pub contact_phone: Option<&'a str>,
    pub estimated_hours: Option<f64>,
}

impl UpdateArgs<'_> {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.subcategory.is_none()
            && self.notes.is_none()
            && self.contact_name.is_none()
            && self.contact_email.is_none()
            && self.contact_phone.is_none()
            && self.estimated_hours.is_none()
    }
}

pub fn build(db: &Database, args: &UpdateArgs<'_>) -> Result<TicketChanges> {
    let category = match args.category {
        Some(name) if is_none_word(name) => Some(None),
        Some(name) => Some(Some(find_category(db, name)?)),
        None => None,
    };
    let subcategory_id = match args.subcategory {
        Some(name) if is_none_word(name) => Some(None),
        Some(name) => {
            let scope = category.as_ref().and_then(|c| c.as_ref());
            Some(Some(find_subcategory_id(db, scope, name)?))
        }
        None => None,
    };

    Ok(TicketChanges {
        title: args.title.map(str::to_string),
        description: args.description.map(str::to_string),
        status: args.status.map(str::parse::<Status>).transpose()?,
        priority: args.priority.map(str::parse::<Priority>).transpose()?,
        assigned_to: None,
        category_id: category.map(|c| c.map(|c| c.id)),
        subcategory_id,
        resolution_notes: args.notes.map(str::to_string),
        contact_name: args.contact_name.map(str::to_string),
        contact_email: args.contact_email.map(str::to_string),
        contact_phone: args.contact_phone.map(str::to_string),
        estimated_hours: args.estimated_hours.map(Some),
    })
}

fn report(outcome: &UpdateOutcome) {
    if outcome.changes.is_empty() {
        println!("No changes to {}", outcome.ticket.ticket_id);
        return;
    }
    println!("Updated {}", outcome.ticket.ticket_id);
    for change in &outcome.changes {
        println!("  {}", change.describe());
    }
    if outcome.lost_history > 0 {
        eprintln!(
            "Warning: {} history record(s) could not be written",
            outcome.lost_history
        );
    }
}

pub fn run(
    db: &Database,
    actor: &User,
    key: &str,
    args: &UpdateArgs<'_>,
    now: DateTime<Utc>,
) -> Result<UpdateOutcome> {
    if args.is_empty() {
        bail!("Nothing to update. Use --title, --description, --status, --priority, --category or another field flag");
    }
    let ticket = lifecycle::find_ticket(db, key)?;
    let changes = build(db, args)?;
    let outcome = lifecycle::update_ticket(db, actor, &ticket, &changes, now)?;
    report(&outcome);
    Ok(outcome)
}

/// Assign to `assignee`, or unassign with `none`.
pub fn assign(db: &Database, actor: &User, key: &str, assignee: &str, now: DateTime<Utc>) -> Result<UpdateOutcome> {
    let ticket = lifecycle::find_ticket(db, key)?;
    let target = if is_none_word(assignee) {
        None
    } else {
        Some(find_user(db, assignee)?.id)
    };
    let outcome = lifecycle::update_ticket(
        db,
        actor,
        &ticket,
        &TicketChanges {
            assigned_to: Some(target),
            ..Default::default()
        },
        now,
    )?;
    report(&outcome);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{self, DeskError};
    use crate::models::{HistoryAction, Role};
    use crate::testing::{member_user, role_user, seed_default_slas, staff_user, ticket_fixture};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        seed_default_slas(&db);
        (db, dir)
    }

    // ==================== Unit Tests ====================

    #[test]
    fn test_update_title_and_priority() {
        let (db, _dir) = setup_test_db();
        let admin = staff_user(&db, "admin");
        let ticket = ticket_fixture(&db, &admin, "Original title", Priority::P3);

        let outcome = run(
            &db,
            &admin,
            &ticket.ticket_id.to_string(),
            &UpdateArgs {
                title: Some("New title"),
                priority: Some("p2"),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(outcome.ticket.title, "New title");
        assert_eq!(outcome.ticket.priority, Priority::P2);
        assert_eq!(outcome.changes.len(), 2);
    }

    #[test]
    fn test_update_nothing_fails() {
        let (db, _dir) = setup_test_db();
        let admin = staff_user(&db, "admin");
        let ticket = ticket_fixture(&db, &admin, "Test", Priority::P3);
        assert!(run(&db, &admin, &ticket.ticket_id.to_string(), &UpdateArgs::default(), Utc::now()).is_err());
    }

    #[test]
    fn test_update_invalid_status() {
        let (db, _dir) = setup_test_db();
        let admin = staff_user(&db, "admin");
        let ticket = ticket_fixture(&db, &admin, "Test", Priority::P3);
        let err = run(
            &db,
            &admin,
            "1",
            &UpdateArgs {
                status: Some("done"),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid status"));
        assert_eq!(db.get_ticket(ticket.id).unwrap().unwrap().status, Status::Open);
    }

    #[test]
    fn test_update_clears_category() {
        let (db, _dir) = setup_test_db();
        let admin = staff_user(&db, "admin");
        db.create_category("Cooling", "", "#0000FF").unwrap();
        let ticket = ticket_fixture(&db, &admin, "Test", Priority::P3);

        run(
            &db,
            &admin,
            "1",
            &UpdateArgs {
                category: Some("cooling"),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert!(db.get_ticket(ticket.id).unwrap().unwrap().category_id.is_some());

        run(
            &db,
            &admin,
            "1",
            &UpdateArgs {
                category: Some("none"),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert!(db.get_ticket(ticket.id).unwrap().unwrap().category_id.is_none());
    }

    #[test]
    fn test_assign_and_unassign() {
        let (db, _dir) = setup_test_db();
        let engineer = role_user(&db, "eng", Role::Engineer);
        let tech = member_user(&db, "tech");
        let ticket = ticket_fixture(&db, &tech, "Assign me", Priority::P3);

        assign(&db, &engineer, "1", "tech", Utc::now()).unwrap();
        assert_eq!(db.get_ticket(ticket.id).unwrap().unwrap().assigned_to, Some(tech.id));
        assign(&db, &engineer, "1", "none", Utc::now()).unwrap();
        assert_eq!(db.get_ticket(ticket.id).unwrap().unwrap().assigned_to, None);

        let assigned: Vec<_> = db
            .get_history(ticket.id)
            .unwrap()
            .into_iter()
            .filter(|h| h.action == HistoryAction::Assigned)
            .collect();
        assert_eq!(assigned.len(), 2);
        assert_eq!(assigned[1].old_value, "tech");
    }

    #[test]
    fn test_technician_cannot_assign() {
        let (db, _dir) = setup_test_db();
        let tech = member_user(&db, "tech");
        ticket_fixture(&db, &tech, "Assign me", Priority::P3);
        let err = assign(&db, &tech, "1", "tech", Utc::now()).unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::Forbidden(_))));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_update_title_roundtrip(title in "[a-zA-Z0-9][a-zA-Z0-9 ]{0,60}[a-zA-Z0-9]") {
            let (db, _dir) = setup_test_db();
            let admin = staff_user(&db, "admin");
            let ticket = ticket_fixture(&db, &admin, "Original", Priority::P3);
            run(&db, &admin, "1", &UpdateArgs { title: Some(&title), ..Default::default() }, Utc::now()).unwrap();
            let stored = db.get_ticket(ticket.id).unwrap().unwrap();
            prop_assert_eq!(stored.title, title);
        }
    }
}
