use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::auth::{self, Capability};
use crate::commands::{format_time, username_of};
use crate::db::Database;
use crate::lifecycle;
use crate::models::User;
use crate::responder;
use crate::sla;

pub fn run(db: &Database, actor: &User, key: &str, now: DateTime<Utc>) -> Result<()> {
    auth::authorize(actor, Capability::ViewTickets)?;
    let ticket = lifecycle::find_ticket(db, key)?;

    println!("{}: {}", ticket.ticket_id, ticket.title);
    println!("Status:    {}", ticket.status);
    println!("Priority:  {}", ticket.priority.label());
    println!("Source:    {}", ticket.source);
    if let Some(id) = ticket.category_id {
        if let Some(category) = db.get_category(id)? {
            let sub = match ticket.subcategory_id {
                Some(sid) => db.get_subcategory(sid)?.map(|s| format!(" / {}", s.name)),
                None => None,
            };
            println!("Category:  {}{}", category.name, sub.unwrap_or_default());
        }
    }
    println!("Reporter:  {}", username_of(db, Some(ticket.created_by))?);
    println!("Assignee:  {}", username_of(db, ticket.assigned_to)?);
    println!("Created:   {}", format_time(ticket.created_at));
    println!("Updated:   {}", format_time(ticket.updated_at));
    if let Some(at) = ticket.resolved_at {
        println!("Resolved:  {}", format_time(at));
    }
    if let Some(at) = ticket.closed_at {
        println!("Closed:    {}", format_time(at));
    }
    if let Some(hours) = ticket.estimated_hours {
        println!("Estimate:  {:.1}h", hours);
    }
    if !ticket.contact_name.is_empty() || !ticket.contact_email.is_empty() || !ticket.contact_phone.is_empty() {
        let contact: Vec<&str> = [
            ticket.contact_name.as_str(),
            ticket.contact_email.as_str(),
            ticket.contact_phone.as_str(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
        println!("Contact:   {}", contact.join(", "));
    }

    // SLA
    match sla::for_ticket(db, &ticket) {
        Ok(s) => {
            let status = sla::project(&ticket, &s, now);
            println!("\nSLA: {}", status.sla_name);
            let response = match sla::time_to_first_response(&ticket) {
                Some(d) => format!("responded after {}", sla::format_duration(d)),
                None if status.response_breached => "BREACHED, no response yet".to_string(),
                None => "awaiting first response".to_string(),
            };
            println!("  Response due:   {} ({})", format_time(status.response_due), response);
            let resolution = match sla::time_to_resolution(&ticket) {
                Some(d) => format!("resolved after {}", sla::format_duration(d)),
                None if status.overdue => "OVERDUE".to_string(),
                None => format!(
                    "{} left",
                    sla::format_duration(status.resolution_due - now)
                ),
            };
            println!("  Resolution due: {} ({})", format_time(status.resolution_due), resolution);
        }
        Err(e) => println!("\nSLA: {}", e),
    }

    if !ticket.description.is_empty() {
        println!("\nDescription:");
        for line in ticket.description.lines() {
            println!("  {}", line);
        }
    }

    if !ticket.resolution_notes.is_empty() {
        println!("\nResolution notes:");
        for line in ticket.resolution_notes.lines() {
            println!("  {}", line);
        }
    }

    let attachments = db.get_attachments(ticket.id)?;
    if !attachments.is_empty() {
        println!("\nAttachments:");
        for att in attachments {
            println!("  {} ({}, {})", att.filename, att.size_human(), att.content_type);
        }
    }

    let comments = responder::visible_comments(db, actor, &ticket)?;
    if !comments.is_empty() {
        println!("\nComments:");
        for comment in comments {
            let tag = if comment.is_internal { " [internal]" } else { "" };
            println!(
                "  [{}] {}{}: {}",
                format_time(comment.created_at),
                username_of(db, Some(comment.author_id))?,
                tag,
                comment.content
            );
        }
    }

    Ok(())
}
