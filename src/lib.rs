//! Ticket lifecycle and SLA engine for data-centre operations desks.

pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod reports;
pub mod responder;
pub mod sla;
pub mod ticket_id;
pub mod validate;

#[cfg(test)]
mod testing;
