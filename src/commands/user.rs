use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::auth::{self, Capability, Registration};
use crate::db::Database;
use crate::models::{Role, User};
use crate::notify::Notifier;

pub fn register(
    db: &Database,
    form: &Registration,
    notifier: &dyn Notifier,
    sender: &str,
    now: DateTime<Utc>,
) -> Result<User> {
    let user = auth::register(db, form, notifier, sender, now)?;
    println!(
        "Registered '{}'. The account stays inactive until a staff member approves it.",
        user.username
    );
    Ok(user)
}

pub fn approve(db: &Database, actor: &User, username: &str, notifier: &dyn Notifier, sender: &str) -> Result<User> {
    let user = auth::set_active(db, actor, username, true, notifier, sender)?;
    println!("Activated '{}'", user.username);
    Ok(user)
}

pub fn deactivate(db: &Database, actor: &User, username: &str, notifier: &dyn Notifier, sender: &str) -> Result<User> {
    let user = auth::set_active(db, actor, username, false, notifier, sender)?;
    println!("Deactivated '{}'", user.username);
    Ok(user)
}

pub fn role(db: &Database, actor: &User, username: &str, role: &str, staff: bool) -> Result<User> {
    let role: Role = role.parse()?;
    let user = auth::set_role(db, actor, username, role, staff)?;
    let flag = if user.is_staff { " (staff)" } else { "" };
    println!("'{}' is now {}{}", user.username, user.role.label(), flag);
    Ok(user)
}

pub fn list(db: &Database, actor: &User, pending: bool) -> Result<Vec<User>> {
    auth::authorize(actor, Capability::ManageUsers)?;
    let users = db.list_users(pending)?;
    if users.is_empty() {
        println!("{}", if pending { "No pending accounts." } else { "No users." });
        return Ok(users);
    }
    for user in &users {
        let state = if user.is_active { "active" } else { "pending" };
        let staff = if user.is_staff { "staff" } else { "" };
        println!(
            "{:<20} {:<28} {:<20} {:8} {}",
            user.username,
            user.email,
            user.role.label(),
            state,
            staff
        );
    }
    Ok(users)
}

pub fn login(db: &Database, username: &str, password: &str) -> Result<User> {
    let user = auth::login(db, username, password)?;
    println!("Credentials accepted for {} ({})", user.display_name(), user.role.label());
    Ok(user)
}

pub fn passwd(db: &Database, actor: &User, old: &str, new: &str, confirm: &str) -> Result<()> {
    auth::change_password(db, actor, old, new, confirm)?;
    println!("Password changed for '{}'", actor.username);
    Ok(())
}

/// Link or provision an account from a provider profile stored as JSON.
pub fn link(
    db: &Database,
    provider: &str,
    profile_path: &Path,
    notifier: &dyn Notifier,
    sender: &str,
    now: DateTime<Utc>,
) -> Result<User> {
    let raw = fs::read_to_string(profile_path)
        .with_context(|| format!("Failed to read profile {}", profile_path.display()))?;
    let extra: Value = serde_json::from_str(&raw).context("Profile is not valid JSON")?;
    let (user, created) = auth::provision_external(db, provider, &extra, notifier, sender, now)?;
    if created {
        println!("Created pending account '{}' for {}", user.username, user.email);
    } else {
        println!("Linked {} to existing account '{}'", provider, user.username);
    }
    Ok(user)
}
