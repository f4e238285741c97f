use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::commands::{find_category, find_subcategory_id, find_user};
use crate::db::Database;
use crate::lifecycle::{self, NewTicket};
use crate::models::{Ticket, User};
use crate::sla;

/// Command-line form of a new ticket; names are resolved to ids here.
#[derive(Debug, Default)]
pub struct CreateArgs<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub priority: &'a str,
    pub source: &'a str,
    pub category: Option<&'a str>,
    pub subcategory: Option<&'a str>,
    pub assignee: Option<&'a str>,
    pub contact_name: Option<&'a str>,
    pub contact_email: Option<&'a str>,
    pub contact_phone: Option<&'a str>,
    pub estimated_hours: Option<f64>,
}

pub fn build(db: &Database, args: &CreateArgs<'_>) -> Result<NewTicket> {
    let category = args.category.map(|name| find_category(db, name)).transpose()?;
    let subcategory_id = args
        .subcategory
        .map(|name| find_subcategory_id(db, category.as_ref(), name))
        .transpose()?;
    let assigned_to = args.assignee.map(|name| find_user(db, name)).transpose()?;

    Ok(NewTicket {
        title: args.title.to_string(),
        description: args.description.to_string(),
        priority: args.priority.parse()?,
        source: args.source.parse()?,
        category_id: category.map(|c| c.id),
        subcategory_id,
        assigned_to: assigned_to.map(|u| u.id),
        contact_name: args.contact_name.unwrap_or_default().to_string(),
        contact_email: args.contact_email.unwrap_or_default().to_string(),
        contact_phone: args.contact_phone.unwrap_or_default().to_string(),
        estimated_hours: args.estimated_hours,
    })
}

pub fn run(db: &Database, actor: &User, args: &CreateArgs<'_>, now: DateTime<Utc>) -> Result<Ticket> {
    let input = build(db, args)?;
    let ticket = lifecycle::create_ticket(db, actor, &input, now)?;
    let sla = sla::for_ticket(db, &ticket)?;

    println!("Created ticket {}", ticket.ticket_id);
    println!(
        "  {} | {} | respond by {} | resolve by {}",
        ticket.priority.label(),
        sla.name,
        super::format_time(sla::response_due(&ticket, &sla)),
        super::format_time(sla::resolution_due(&ticket, &sla))
    );
    Ok(ticket)
}
