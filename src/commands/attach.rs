use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::Path;

use crate::db::Database;
use crate::lifecycle::{self, AttachmentMeta};
use crate::models::User;

fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Record a local file's name, size and type against a ticket.
pub fn run(
    db: &Database,
    actor: &User,
    key: &str,
    path: &Path,
    content_type: Option<&str>,
    now: DateTime<Utc>,
) -> Result<i64> {
    let ticket = lifecycle::find_ticket(db, key)?;
    let metadata = fs::metadata(path).with_context(|| format!("Cannot read {}", path.display()))?;
    if !metadata.is_file() {
        anyhow::bail!("{} is not a file", path.display());
    }
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let meta = AttachmentMeta {
        filename,
        file_size: metadata.len(),
        content_type: content_type
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(path).to_string()),
    };
    let id = lifecycle::add_attachment(db, actor, &ticket, &meta, now)?;
    println!("Attached {} to {}", meta.filename, ticket.ticket_id);
    Ok(id)
}
