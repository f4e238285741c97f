use std::fmt;

use thiserror::Error;

use crate::models::Priority;

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        FieldError {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Error categories callers may need to tell apart.
///
/// Engine functions return `anyhow::Result`; these values travel inside the
/// `anyhow::Error` and can be recovered with `downcast_ref::<DeskError>()`.
#[derive(Debug, Error)]
pub enum DeskError {
    #[error("No active SLA configured for priority {0}")]
    MissingSla(Priority),

    #[error("Validation failed: {}", join_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Account '{0}' is inactive or pending approval")]
    Inactive(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Could not allocate a ticket identifier: {0}")]
    Allocation(String),
}

impl DeskError {
    /// Field-level detail for validation failures, empty otherwise.
    pub fn fields(&self) -> &[FieldError] {
        match self {
            DeskError::Validation(fields) => fields,
            _ => &[],
        }
    }
}

fn join_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Recover the [`DeskError`] category from an engine error, if it has one.
pub fn kind(err: &anyhow::Error) -> Option<&DeskError> {
    err.downcast_ref::<DeskError>()
}
