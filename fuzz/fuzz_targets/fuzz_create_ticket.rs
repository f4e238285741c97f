#![no_main]

//! Creates tickets from arbitrary text and renders them back.
//!
//! Catches panics in validation, identifier allocation and the text
//! helpers used by `list`, `show` and `export` (truncation and formatting
//! of multi-byte input in particular).

use arbitrary::Arbitrary;
use chrono::Utc;
use libfuzzer_sys::fuzz_target;
use tempfile::tempdir;

use ticketdesk::commands::truncate;
use ticketdesk::db::{Database, TicketFilter};
use ticketdesk::lifecycle::{self, NewTicket, TicketChanges};
use ticketdesk::models::{NewSla, NewUser, Priority, Role};
use ticketdesk::ticket_id::TicketId;

#[derive(Arbitrary, Debug)]
struct CreateInput {
    title: String,
    description: String,
    contact_email: String,
    priority: u8,
    new_title: Option<String>,
    lookup: String,
    count: u8,
}

fuzz_target!(|input: CreateInput| {
    let dir = match tempdir() {
        Ok(d) => d,
        Err(_) => return,
    };
    let db = match Database::open(&dir.path().join("tickets.db")) {
        Ok(d) => d,
        Err(_) => return,
    };
    let now = Utc::now();

    for (i, priority) in Priority::ALL.iter().enumerate() {
        let hours = i as u32 + 1;
        let sla = NewSla {
            name: format!("SLA {}", priority),
            description: String::new(),
            priority: *priority,
            response_time_hours: hours,
            resolution_time_hours: hours * 4,
        };
        if db.replace_sla(&sla).is_err() {
            return;
        }
    }
    let actor = match db
        .create_user(
            &NewUser {
                username: "fuzz".to_string(),
                email: "fuzz@example.com".to_string(),
                role: Role::Admin,
                is_active: true,
                is_staff: true,
                ..Default::default()
            },
            now,
        )
        .ok()
        .and_then(|id| db.get_user(id).ok().flatten())
    {
        Some(u) => u,
        None => return,
    };

    let priority = Priority::ALL[input.priority as usize % Priority::ALL.len()];
    let count = (input.count % 8).max(1);
    for i in 0..count {
        let new = NewTicket {
            title: if i == 0 {
                input.title.clone()
            } else {
                format!("{} #{}", input.title, i)
            },
            description: input.description.clone(),
            priority,
            contact_email: input.contact_email.clone(),
            ..Default::default()
        };
        let Ok(ticket) = lifecycle::create_ticket(&db, &actor, &new, now) else {
            continue;
        };

        assert!(ticket.ticket_id.to_string().starts_with("RX-UG-INC-"));
        let _ = truncate(&ticket.title, 40);
        let _ = truncate(&ticket.title, 3);

        if let Some(title) = &input.new_title {
            let changes = TicketChanges {
                title: Some(title.clone()),
                ..Default::default()
            };
            let _ = lifecycle::update_ticket(&db, &actor, &ticket, &changes, now);
        }
    }

    let _ = TicketId::parse_lenient(&input.lookup);
    let _ = lifecycle::find_ticket(&db, &input.lookup);
    let _ = db.list_tickets(&TicketFilter {
        search: Some(input.lookup.clone()),
        ..Default::default()
    });
});
