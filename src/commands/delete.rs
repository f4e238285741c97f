use anyhow::Result;
use std::io::{self, Write};

use crate::db::Database;
use crate::lifecycle;
use crate::models::User;

/// Returns false when the user declined the confirmation prompt.
pub fn run(db: &Database, actor: &User, key: &str, force: bool) -> Result<bool> {
    let ticket = lifecycle::find_ticket(db, key)?;

    if !force {
        print!("Delete ticket {} \"{}\"? [y/N] ", ticket.ticket_id, ticket.title);
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Cancelled.");
            return Ok(false);
        }
    }

    lifecycle::delete_ticket(db, actor, &ticket)?;
    println!("Deleted ticket {}", ticket.ticket_id);
    Ok(true)
}
