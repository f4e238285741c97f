//! Sequential ticket identifiers of the form `RX-UG-INC-000001`.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::db::Database;
use crate::error::DeskError;

pub const PREFIX: &str = "RX-UG-INC-";
const DIGITS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TicketId(i64);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid ticket identifier '{0}'")]
pub struct ParseTicketIdError(String);

impl TicketId {
    pub fn from_sequence(sequence: i64) -> Self {
        TicketId(sequence)
    }

    pub fn sequence(&self) -> i64 {
        self.0
    }

    /// Accepts `RX-UG-INC-000042`, `000042`, `42` or `#42`.
    pub fn parse_lenient(input: &str) -> Result<Self, ParseTicketIdError> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix(PREFIX)
            .or_else(|| trimmed.strip_prefix('#'))
            .unwrap_or(trimmed);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseTicketIdError(input.to_string()));
        }
        match digits.parse::<i64>() {
            Ok(n) if n > 0 => Ok(TicketId(n)),
            _ => Err(ParseTicketIdError(input.to_string())),
        }
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:0width$}", PREFIX, self.0, width = DIGITS)
    }
}

impl FromStr for TicketId {
    type Err = ParseTicketIdError;

    /// Strict form: prefix plus at least six digits.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| ParseTicketIdError(s.to_string()))?;
        if digits.len() < DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseTicketIdError(s.to_string()));
        }
        digits
            .parse::<i64>()
            .map(TicketId)
            .map_err(|_| ParseTicketIdError(s.to_string()))
    }
}

impl Serialize for TicketId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TicketId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl ToSql for TicketId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for TicketId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: ParseTicketIdError| FromSqlError::Other(Box::new(e)))
    }
}

/// Advance the persisted counter and return the identifier for a new ticket.
///
/// The counter is committed before the ticket row exists, so a failed
/// creation burns its number instead of handing it out again.
pub fn allocate(db: &Database) -> Result<TicketId> {
    match db.next_ticket_sequence() {
        Ok(sequence) => {
            let id = TicketId::from_sequence(sequence);
            tracing::debug!(ticket_id = %id, "allocated ticket identifier");
            Ok(id)
        }
        Err(e) => {
            tracing::error!(error = %e, "ticket sequence could not be advanced");
            Err(DeskError::Allocation(e.to_string()).into())
        }
    }
}
