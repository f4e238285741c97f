pub mod attach;
pub mod category;
pub mod comment;
pub mod create;
pub mod delete;
pub mod export;
pub mod history;
pub mod init;
pub mod list;
pub mod report;
pub mod show;
pub mod sla;
pub mod status;
pub mod update;
pub mod user;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::error::DeskError;
use crate::models::{Category, Status, User};

pub fn find_user(db: &Database, username: &str) -> Result<User> {
    db.get_user_by_username(username.trim())?
        .ok_or_else(|| DeskError::NotFound(format!("User '{}'", username.trim())).into())
}

pub fn find_category(db: &Database, name: &str) -> Result<Category> {
    db.get_category_by_name(name.trim())?
        .ok_or_else(|| DeskError::NotFound(format!("Category '{}'", name.trim())).into())
}

/// Resolve a subcategory by name, within `category` when one is given.
pub fn find_subcategory_id(db: &Database, category: Option<&Category>, name: &str) -> Result<i64> {
    let candidates = match category {
        Some(c) => vec![c.clone()],
        None => db.list_categories()?,
    };
    let mut found = Vec::new();
    for cat in &candidates {
        if let Some(sub) = db.get_subcategory_by_name(cat.id, name.trim())? {
            found.push(sub);
        }
    }
    match found.len() {
        0 => Err(DeskError::NotFound(format!("Subcategory '{}'", name.trim())).into()),
        1 => Ok(found[0].id),
        _ => Err(DeskError::Conflict(format!(
            "Subcategory '{}' exists in several categories; pass --category",
            name.trim()
        ))
        .into()),
    }
}

/// `all` means no filter; `active` means every non-terminal status.
pub fn parse_status_filter(value: &str) -> Result<Vec<Status>> {
    match value.trim().to_ascii_lowercase().as_str() {
        "all" => Ok(Vec::new()),
        "active" => Ok(Status::ALL
            .iter()
            .copied()
            .filter(|s| !s.is_terminal())
            .collect()),
        other => Ok(vec![other.parse()?]),
    }
}

pub fn username_of(db: &Database, id: Option<i64>) -> Result<String> {
    Ok(match id {
        Some(id) => db
            .get_user(id)?
            .map(|u| u.username)
            .unwrap_or_else(|| format!("user #{}", id)),
        None => "(unassigned)".to_string(),
    })
}

pub fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

pub fn truncate(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_chars - 3).collect();
        format!("{}...", truncated)
    }
}
