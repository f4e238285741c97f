//! Outgoing account notifications.
//!
//! Delivery is someone else's job; this crate only captures messages
//! (in memory or as files in an outbox) or logs them.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

pub trait Notifier {
    fn send(&self, message: &Message) -> Result<()>;
}

/// Send and swallow failures: a notification must never fail the account
/// operation that triggered it.
pub fn send_quietly(notifier: &dyn Notifier, message: &Message) {
    if message.to.is_empty() {
        tracing::debug!(subject = %message.subject, "notification has no recipients");
        return;
    }
    if let Err(e) = notifier.send(message) {
        tracing::warn!(subject = %message.subject, error = %e, "failed to send notification");
    }
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct Mailbox {
    messages: RefCell<Vec<Message>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }
}

impl Notifier for Mailbox {
    fn send(&self, message: &Message) -> Result<()> {
        self.messages.borrow_mut().push(message.clone());
        Ok(())
    }
}

/// Writes each message as a JSON file in a directory.
#[derive(Debug, Clone)]
pub struct Outbox {
    dir: PathBuf,
}

impl Outbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Outbox { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Messages currently in the outbox, oldest first.
    pub fn read_all(&self) -> Result<Vec<Message>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .context("Failed to read outbox")?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        paths
            .iter()
            .map(|p| {
                let raw = fs::read_to_string(p)
                    .with_context(|| format!("Failed to read {}", p.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Malformed outbox message {}", p.display()))
            })
            .collect()
    }
}

impl Notifier for Outbox {
    fn send(&self, message: &Message) -> Result<()> {
        fs::create_dir_all(&self.dir).context("Failed to create outbox directory")?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        // Zero-padded sequence keeps file names in send order.
        let mut n = fs::read_dir(&self.dir)?.count() + 1;
        let mut path = self.dir.join(format!("{:06}-{}.json", n, stamp));
        while path.exists() {
            n += 1;
            path = self.dir.join(format!("{:06}-{}.json", n, stamp));
        }
        let json = serde_json::to_string_pretty(message)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), subject = %message.subject, "captured notification");
        Ok(())
    }
}

/// Logs messages and drops them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, message: &Message) -> Result<()> {
        tracing::info!(
            to = %message.to.join(", "),
            subject = %message.subject,
            "notification"
        );
        Ok(())
    }
}
