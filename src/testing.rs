//! Shared fixtures for unit tests.

use std::sync::OnceLock;

use chrono::Utc;

use crate::auth;
use crate::db::Database;
use crate::lifecycle::{self, NewTicket};
use crate::models::{NewSla, NewUser, Priority, Role, Ticket, User};

pub const PASSWORD: &str = "fixture-password";

// Argon2 is slow in debug builds; hash once per test binary.
fn password_hash() -> String {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| auth::hash_password(PASSWORD).unwrap())
        .clone()
}

pub fn seed_default_slas(db: &Database) {
    for (name, priority, response, resolution) in [
        ("Critical Priority SLA", Priority::P1, 1, 4),
        ("High Priority SLA", Priority::P2, 2, 8),
        ("Medium Priority SLA", Priority::P3, 4, 24),
        ("Low Priority SLA", Priority::P4, 8, 72),
    ] {
        db.replace_sla(&NewSla {
            name: name.to_string(),
            description: String::new(),
            priority,
            response_time_hours: response,
            resolution_time_hours: resolution,
        })
        .unwrap();
    }
}

fn user_with(db: &Database, name: &str, role: Role, is_staff: bool) -> User {
    let id = db
        .create_user(
            &NewUser {
                username: name.to_string(),
                email: format!("{}@example.com", name),
                role,
                is_active: true,
                is_staff,
                password_hash: Some(password_hash()),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap();
    db.get_user(id).unwrap().unwrap()
}

/// Active staff administrator.
pub fn staff_user(db: &Database, name: &str) -> User {
    user_with(db, name, Role::Admin, true)
}

/// Active non-staff technician.
pub fn member_user(db: &Database, name: &str) -> User {
    user_with(db, name, Role::Technician, false)
}

pub fn role_user(db: &Database, name: &str, role: Role) -> User {
    user_with(db, name, role, false)
}

pub fn ticket_fixture(db: &Database, creator: &User, title: &str, priority: Priority) -> Ticket {
    lifecycle::create_ticket(
        db,
        creator,
        &NewTicket {
            title: title.to_string(),
            description: "Fixture ticket".to_string(),
            priority,
            ..Default::default()
        },
        Utc::now(),
    )
    .unwrap()
}
