use anyhow::Result;

use crate::auth::{self, Capability};
use crate::db::Database;
use crate::models::{NewSla, Sla, User};
use crate::validate::Checker;

pub fn list(db: &Database, actor: &User, include_inactive: bool) -> Result<Vec<Sla>> {
    auth::authorize(actor, Capability::ViewTickets)?;
    let slas = db.list_slas(include_inactive)?;
    if slas.is_empty() {
        println!("No SLAs configured. Run 'ticketdesk init' or 'ticketdesk sla set'.");
        return Ok(slas);
    }
    for sla in &slas {
        let state = if sla.is_active { "" } else { " (inactive)" };
        println!(
            "{:3} {:<28} respond {:>3}h  resolve {:>3}h{}",
            sla.priority.as_str().to_uppercase(),
            sla.name,
            sla.response_time_hours,
            sla.resolution_time_hours,
            state
        );
    }
    Ok(slas)
}

/// Install `sla` as the active definition for its priority. Tickets keep the
/// SLA they were created with, so a name already in use is a conflict.
pub fn set(db: &Database, actor: &User, sla: &NewSla) -> Result<i64> {
    auth::authorize(actor, Capability::ManageSla)?;
    let mut check = Checker::new();
    check.required("name", &sla.name);
    crate::sla::check_hours(&mut check, sla);
    check.finish()?;

    let id = db.replace_sla(sla)?;
    tracing::info!(priority = %sla.priority, name = %sla.name, by = %actor.username, "SLA replaced");
    println!(
        "{} now uses '{}' ({}h / {}h)",
        sla.priority.label(),
        sla.name,
        sla.response_time_hours,
        sla.resolution_time_hours
    );
    Ok(id)
}
