use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ticket_id::TicketId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind} '{value}'. Must be one of: {expected}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
    expected: String,
}

/// Text-backed enums share parsing, display and SQLite conversions.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                        expected: $name::ALL
                            .iter()
                            .map(|v| v.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    }),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: ParseEnumError| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    P1,
    P2,
    P3,
    P4,
}

text_enum!(Priority, "priority", { P1 => "p1", P2 => "p2", P3 => "p3", P4 => "p4" });

impl Priority {
    pub fn label(&self) -> &'static str {
        match self {
            Priority::P1 => "P1 - Critical",
            Priority::P2 => "P2 - High",
            Priority::P3 => "P3 - Medium",
            Priority::P4 => "P4 - Low",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::P3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Open,
    InProgress,
    Pending,
    Resolved,
    Closed,
    Cancelled,
}

text_enum!(Status, "status", {
    Open => "open",
    InProgress => "in_progress",
    Pending => "pending",
    Resolved => "resolved",
    Closed => "closed",
    Cancelled => "cancelled",
});

impl Status {
    /// Work on the ticket has stopped; SLA clocks no longer run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Resolved | Status::Closed | Status::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Web,
    Email,
    Phone,
    WalkIn,
    System,
}

text_enum!(Source, "source", {
    Web => "web",
    Email => "email",
    Phone => "phone",
    WalkIn => "walk_in",
    System => "system",
});

impl Default for Source {
    fn default() -> Self {
        Source::Web
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Technician,
    Engineer,
    Manager,
    Bms,
    Admin,
}

text_enum!(Role, "role", {
    Technician => "technician",
    Engineer => "engineer",
    Manager => "manager",
    Bms => "bms",
    Admin => "admin",
});

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::Technician => "Facilities Technician",
            Role::Engineer => "Facilities Engineer",
            Role::Manager => "Facilities Manager",
            Role::Bms => "BMS/Control Centre Staff",
            Role::Admin => "System Administrator",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Technician
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Updated,
    Assigned,
    StatusChanged,
    PriorityChanged,
    CommentAdded,
    AttachmentAdded,
    Resolved,
    Closed,
    Reopened,
}

text_enum!(HistoryAction, "history action", {
    Created => "created",
    Updated => "updated",
    Assigned => "assigned",
    StatusChanged => "status_changed",
    PriorityChanged => "priority_changed",
    CommentAdded => "comment_added",
    AttachmentAdded => "attachment_added",
    Resolved => "resolved",
    Closed => "closed",
    Reopened => "reopened",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department: String,
    pub phone: String,
    pub role: Role,
    pub is_active: bool,
    pub is_staff: bool,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

/// Column values for a user row that does not exist yet.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department: String,
    pub phone: String,
    pub role: Role,
    pub is_active: bool,
    pub is_staff: bool,
    pub password_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub color: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subcategory {
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    pub description: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sla {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub priority: Priority,
    pub response_time_hours: u32,
    pub resolution_time_hours: u32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub ticket_id: TicketId,
    pub title: String,
    pub description: String,
    pub status: Status,
    pub priority: Priority,
    pub source: Source,
    pub category_id: Option<i64>,
    pub subcategory_id: Option<i64>,
    pub sla_id: Option<i64>,
    pub created_by: i64,
    pub assigned_to: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub resolution_notes: String,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub estimated_hours: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub ticket_id: i64,
    pub author_id: i64,
    pub content: String,
    pub is_internal: bool,
    pub author_is_staff: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub ticket_id: i64,
    pub filename: String,
    pub file_size: u64,
    pub content_type: String,
    pub uploaded_by: i64,
    pub uploaded_at: DateTime<Utc>,
}

impl Attachment {
    pub fn size_human(&self) -> String {
        let mut size = self.file_size as f64;
        for unit in ["B", "KB", "MB", "GB"] {
            if size < 1024.0 {
                return format!("{:.1} {}", size, unit);
            }
            size /= 1024.0;
        }
        format!("{:.1} TB", size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSla {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub priority: Priority,
    pub response_time_hours: u32,
    pub resolution_time_hours: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub ticket_id: i64,
    pub action: HistoryAction,
    pub field: Option<String>,
    pub old_value: String,
    pub new_value: String,
    pub description: String,
    pub actor_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}
