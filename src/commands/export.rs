use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};

use crate::auth::{self, Capability};
use crate::commands::username_of;
use crate::db::{Database, TicketFilter};
use crate::models::{Status, Ticket, User};

pub const FORMAT_VERSION: i32 = 1;

#[derive(Serialize)]
pub struct ExportedTicket {
    pub ticket_id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub source: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub sla: Option<String>,
    pub created_by: String,
    pub assigned_to: Option<String>,
    pub resolution_notes: String,
    pub comments: Vec<ExportedComment>,
    pub history: Vec<ExportedHistory>,
    pub created_at: String,
    pub updated_at: String,
    pub first_response_at: Option<String>,
    pub resolved_at: Option<String>,
    pub closed_at: Option<String>,
}

#[derive(Serialize)]
pub struct ExportedComment {
    pub author: String,
    pub content: String,
    pub internal: bool,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ExportedHistory {
    pub action: String,
    pub description: String,
    pub actor: Option<String>,
    pub created_at: String,
}

#[derive(Serialize)]
pub struct ExportData {
    pub version: i32,
    pub exported_at: String,
    pub tickets: Vec<ExportedTicket>,
}

fn export_ticket(db: &Database, ticket: &Ticket) -> Result<ExportedTicket> {
    let category = match ticket.category_id {
        Some(id) => db.get_category(id)?.map(|c| c.name),
        None => None,
    };
    let subcategory = match ticket.subcategory_id {
        Some(id) => db.get_subcategory(id)?.map(|s| s.name),
        None => None,
    };
    let sla = match ticket.sla_id {
        Some(id) => db.get_sla(id)?.map(|s| s.name),
        None => None,
    };

    let mut comments = Vec::new();
    for c in db.get_comments(ticket.id)? {
        comments.push(ExportedComment {
            author: username_of(db, Some(c.author_id))?,
            content: c.content,
            internal: c.is_internal,
            created_at: c.created_at.to_rfc3339(),
        });
    }

    let mut history = Vec::new();
    for h in db.get_history(ticket.id)? {
        let actor = match h.actor_id {
            Some(id) => Some(username_of(db, Some(id))?),
            None => None,
        };
        history.push(ExportedHistory {
            action: h.action.to_string(),
            description: h.description,
            actor,
            created_at: h.created_at.to_rfc3339(),
        });
    }

    Ok(ExportedTicket {
        ticket_id: ticket.ticket_id.to_string(),
        title: ticket.title.clone(),
        description: ticket.description.clone(),
        status: ticket.status.to_string(),
        priority: ticket.priority.to_string(),
        source: ticket.source.to_string(),
        category,
        subcategory,
        sla,
        created_by: username_of(db, Some(ticket.created_by))?,
        assigned_to: match ticket.assigned_to {
            Some(id) => Some(username_of(db, Some(id))?),
            None => None,
        },
        resolution_notes: ticket.resolution_notes.clone(),
        comments,
        history,
        created_at: ticket.created_at.to_rfc3339(),
        updated_at: ticket.updated_at.to_rfc3339(),
        first_response_at: ticket.first_response_at.map(|dt| dt.to_rfc3339()),
        resolved_at: ticket.resolved_at.map(|dt| dt.to_rfc3339()),
        closed_at: ticket.closed_at.map(|dt| dt.to_rfc3339()),
    })
}

fn all_tickets(db: &Database, actor: &User) -> Result<Vec<Ticket>> {
    auth::authorize(actor, Capability::ViewReports)?;
    db.list_tickets(&TicketFilter::default())
}

fn emit(content: &str, count: usize, output_path: Option<&str>) -> Result<()> {
    match output_path {
        Some(path) => {
            fs::write(path, content).context("Failed to write export file")?;
            eprintln!("Exported {} tickets to {}", count, path);
        }
        None => {
            let mut stdout = io::stdout().lock();
            writeln!(stdout, "{}", content)?;
        }
    }
    Ok(())
}

pub fn run_json(db: &Database, actor: &User, output_path: Option<&str>, now: DateTime<Utc>) -> Result<()> {
    let tickets = all_tickets(db, actor)?;
    let exported: Vec<ExportedTicket> = tickets
        .iter()
        .map(|t| export_ticket(db, t))
        .collect::<Result<Vec<_>>>()?;

    let data = ExportData {
        version: FORMAT_VERSION,
        exported_at: now.to_rfc3339(),
        tickets: exported,
    };
    let json = serde_json::to_string_pretty(&data)?;
    emit(&json, data.tickets.len(), output_path)
}

pub fn run_markdown(db: &Database, actor: &User, output_path: Option<&str>, now: DateTime<Utc>) -> Result<()> {
    let tickets = all_tickets(db, actor)?;
    let mut md = String::new();

    md.push_str("# Ticket Export\n\n");
    md.push_str(&format!("Exported: {}\n\n", now.format("%Y-%m-%d %H:%M:%S UTC")));

    for status in Status::ALL {
        let group: Vec<&Ticket> = tickets.iter().filter(|t| t.status == *status).collect();
        if group.is_empty() {
            continue;
        }
        md.push_str(&format!("## {} ({})\n\n", status, group.len()));
        for ticket in group {
            write_ticket_md(&mut md, db, ticket)?;
        }
    }

    emit(&md, tickets.len(), output_path)
}

fn write_ticket_md(md: &mut String, db: &Database, ticket: &Ticket) -> Result<()> {
    let checkbox = if ticket.status.is_terminal() { "[x]" } else { "[ ]" };
    md.push_str(&format!("### {} {}: {}\n\n", checkbox, ticket.ticket_id, ticket.title));
    md.push_str(&format!("- **Priority:** {}\n", ticket.priority.label()));
    md.push_str(&format!("- **Assignee:** {}\n", username_of(db, ticket.assigned_to)?));
    md.push_str(&format!("- **Created:** {}\n", ticket.created_at.format("%Y-%m-%d")));
    if let Some(at) = ticket.resolved_at {
        md.push_str(&format!("- **Resolved:** {}\n", at.format("%Y-%m-%d %H:%M")));
    }

    if !ticket.description.is_empty() {
        md.push_str(&format!("\n{}\n", ticket.description));
    }

    let comments = db.get_comments(ticket.id)?;
    if !comments.is_empty() {
        md.push_str("\n**Comments:**\n");
        for comment in comments {
            let tag = if comment.is_internal { " (internal)" } else { "" };
            md.push_str(&format!(
                "- [{}] {}{}: {}\n",
                comment.created_at.format("%Y-%m-%d %H:%M"),
                username_of(db, Some(comment.author_id))?,
                tag,
                comment.content
            ));
        }
    }

    md.push_str("\n---\n\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{self, DeskError};
    use crate::lifecycle::set_status;
    use crate::models::{Priority, Role};
    use crate::responder;
    use crate::testing::{member_user, role_user, seed_default_slas, ticket_fixture};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        seed_default_slas(&db);
        (db, dir)
    }

    #[test]
    fn test_export_ticket_with_comments_and_history() {
        let (db, _dir) = setup_test_db();
        let manager = role_user(&db, "mgr", Role::Manager);
        let ticket = ticket_fixture(&db, &manager, "Chiller fault", Priority::P2);
        responder::add_comment(&db, &manager, &ticket, "Looking", false, Utc::now()).unwrap();

        let exported = export_ticket(&db, &ticket).unwrap();
        assert_eq!(exported.ticket_id, "RX-UG-INC-000001");
        assert_eq!(exported.priority, "p2");
        assert_eq!(exported.sla.as_deref(), Some("High Priority SLA"));
        assert_eq!(exported.comments.len(), 1);
        assert!(!exported.history.is_empty());
        assert_eq!(exported.created_by, "mgr");
    }

    #[test]
    fn test_run_json_to_file() {
        let (db, dir) = setup_test_db();
        let manager = role_user(&db, "mgr", Role::Manager);
        ticket_fixture(&db, &manager, "One", Priority::P1);
        ticket_fixture(&db, &manager, "Two", Priority::P4);

        let output_path = dir.path().join("export.json");
        run_json(&db, &manager, Some(output_path.to_str().unwrap()), Utc::now()).unwrap();
        let data: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output_path).unwrap()).unwrap();
        assert_eq!(data["version"], FORMAT_VERSION);
        assert_eq!(data["tickets"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_run_markdown_groups_by_status() {
        let (db, dir) = setup_test_db();
        let manager = role_user(&db, "mgr", Role::Manager);
        ticket_fixture(&db, &manager, "Still open", Priority::P3);
        let done = ticket_fixture(&db, &manager, "Done", Priority::P3);
        set_status(&db, &manager, &done, Status::Resolved, None, Utc::now()).unwrap();

        let output_path = dir.path().join("export.md");
        run_markdown(&db, &manager, Some(output_path.to_str().unwrap()), Utc::now()).unwrap();
        let content = fs::read_to_string(&output_path).unwrap();
        assert!(content.contains("# Ticket Export"));
        assert!(content.contains("## open (1)"));
        assert!(content.contains("## resolved (1)"));
        assert!(content.contains("[x] RX-UG-INC-000002"));
    }

    #[test]
    fn test_export_requires_reports_capability() {
        let (db, dir) = setup_test_db();
        let tech = member_user(&db, "tech");
        let output_path = dir.path().join("export.json");
        let err = run_json(&db, &tech, Some(output_path.to_str().unwrap()), Utc::now()).unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::Forbidden(_))));
        assert!(!output_path.exists());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_json_is_valid(title in "[a-zA-Z0-9][a-zA-Z0-9 ]{0,30}") {
            let (db, dir) = setup_test_db();
            let manager = role_user(&db, "mgr", Role::Manager);
            ticket_fixture(&db, &manager, &title, Priority::P3);
            let output_path = dir.path().join("export.json");
            run_json(&db, &manager, Some(output_path.to_str().unwrap()), Utc::now()).unwrap();
            let content = fs::read_to_string(&output_path).unwrap();
            let data: serde_json::Value = serde_json::from_str(&content).unwrap();
            prop_assert_eq!(data["tickets"][0]["title"].as_str(), Some(title.trim()));
        }
    }
}
