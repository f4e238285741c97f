use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::commands::{find_category, find_user, parse_status_filter, truncate, username_of};
use crate::db::{Database, TicketFilter};
use crate::lifecycle;
use crate::models::{Priority, Ticket, User};
use crate::sla;

#[derive(Debug, Default)]
pub struct ListArgs<'a> {
    pub status: &'a str,
    pub priority: Option<&'a str>,
    pub assignee: Option<&'a str>,
    pub mine: bool,
    pub category: Option<&'a str>,
    pub search: Option<&'a str>,
    pub overdue: bool,
}

pub fn filter(db: &Database, actor: &User, args: &ListArgs<'_>) -> Result<TicketFilter> {
    let assigned_to = if args.mine {
        Some(actor.id)
    } else {
        args.assignee.map(|name| find_user(db, name)).transpose()?.map(|u| u.id)
    };
    Ok(TicketFilter {
        statuses: parse_status_filter(args.status)?,
        priority: args.priority.map(str::parse::<Priority>).transpose()?,
        assigned_to,
        created_by: None,
        category_id: args.category.map(|name| find_category(db, name)).transpose()?.map(|c| c.id),
        search: args.search.map(str::to_string).filter(|s| !s.trim().is_empty()),
    })
}

pub fn run(db: &Database, actor: &User, args: &ListArgs<'_>, now: DateTime<Utc>) -> Result<Vec<Ticket>> {
    let filter = filter(db, actor, args)?;
    let tickets = lifecycle::list_tickets(db, actor, &filter, args.overdue, now)?;

    if tickets.is_empty() {
        println!("No tickets found.");
        return Ok(tickets);
    }

    let slas = lifecycle::sla_index(db)?;
    for ticket in &tickets {
        let flag = match lifecycle::sla_of(&slas, ticket) {
            Some(s) if sla::is_overdue(ticket, s, now) => "OVERDUE",
            Some(s) if sla::response_breached(ticket, s, now) => "NO-RESP",
            _ => "",
        };
        println!(
            "{} {:13} {:<40} {:3} {:14} {:8} {}",
            ticket.ticket_id,
            format!("[{}]", ticket.status),
            truncate(&ticket.title, 40),
            ticket.priority.as_str().to_uppercase(),
            truncate(&username_of(db, ticket.assigned_to)?, 14),
            flag,
            ticket.created_at.format("%Y-%m-%d")
        );
    }

    Ok(tickets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{create_ticket, set_status, NewTicket};
    use crate::models::Status;
    use crate::testing::{member_user, seed_default_slas, staff_user};
    use chrono::Duration;
    use tempfile::tempdir;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        seed_default_slas(&db);
        (db, dir)
    }

    fn create(db: &Database, user: &User, title: &str, priority: Priority, assignee: Option<i64>) -> Ticket {
        create_ticket(
            db,
            user,
            &NewTicket {
                title: title.to_string(),
                description: "Listed".to_string(),
                priority,
                assigned_to: assignee,
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_default_lists_active_only() {
        let (db, _dir) = setup_test_db();
        let admin = staff_user(&db, "admin");
        let done = create(&db, &admin, "Done", Priority::P3, None);
        create(&db, &admin, "Todo", Priority::P3, None);
        set_status(&db, &admin, &done, Status::Resolved, None, Utc::now()).unwrap();

        let active = run(
            &db,
            &admin,
            &ListArgs {
                status: "active",
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "Todo");

        let all = run(
            &db,
            &admin,
            &ListArgs {
                status: "all",
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_mine_and_assignee_filters() {
        let (db, _dir) = setup_test_db();
        let admin = staff_user(&db, "admin");
        let tech = member_user(&db, "tech");
        create(&db, &admin, "For tech", Priority::P3, Some(tech.id));
        create(&db, &admin, "Unassigned", Priority::P3, None);

        let mine = run(
            &db,
            &tech,
            &ListArgs {
                status: "all",
                mine: true,
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(mine.len(), 1);

        let by_name = run(
            &db,
            &admin,
            &ListArgs {
                status: "all",
                assignee: Some("tech"),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
        assert_eq!(by_name[0].title, "For tech");
    }

    #[test]
    fn test_overdue_flag() {
        let (db, _dir) = setup_test_db();
        let admin = staff_user(&db, "admin");
        create(&db, &admin, "Hot", Priority::P1, None);
        create(&db, &admin, "Cold", Priority::P4, None);

        let later = Utc::now() + Duration::hours(5);
        let overdue = run(
            &db,
            &admin,
            &ListArgs {
                status: "all",
                overdue: true,
                ..Default::default()
            },
            later,
        )
        .unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].title, "Hot");
    }

    #[test]
    fn test_bad_status_filter() {
        let (db, _dir) = setup_test_db();
        let admin = staff_user(&db, "admin");
        let result = run(
            &db,
            &admin,
            &ListArgs {
                status: "archived",
                ..Default::default()
            },
            Utc::now(),
        );
        assert!(result.is_err());
    }
}
