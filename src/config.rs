//! `.ticketdesk/config.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::{NewSla, Priority};
use crate::notify::{LogNotifier, Notifier, Outbox};
use crate::validate::Checker;

pub const CONFIG_FILE: &str = "config.toml";
pub const OUTBOX_DIR: &str = "outbox";

/// Written by `init`. Must stay equal to `Config::default()`.
pub const TEMPLATE: &str = include_str!("../resources/config.toml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub notifications: NotificationConfig,
    #[serde(rename = "sla")]
    pub slas: Vec<NewSla>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub file: String,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyMode {
    Outbox,
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub mode: NotifyMode,
    pub from: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            file: "tickets.db".to_string(),
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "warn".to_string(),
            json: false,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        NotificationConfig {
            mode: NotifyMode::Outbox,
            from: "noreply@ticketdesk.local".to_string(),
        }
    }
}

fn sla(name: &str, description: &str, priority: Priority, response: u32, resolution: u32) -> NewSla {
    NewSla {
        name: name.to_string(),
        description: description.to_string(),
        priority,
        response_time_hours: response,
        resolution_time_hours: resolution,
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            notifications: NotificationConfig::default(),
            slas: vec![
                sla(
                    "Critical Priority SLA",
                    "Service down or data-centre safety at risk",
                    Priority::P1,
                    1,
                    4,
                ),
                sla(
                    "High Priority SLA",
                    "Major degradation with no workaround",
                    Priority::P2,
                    2,
                    8,
                ),
                sla(
                    "Medium Priority SLA",
                    "Partial impact or workaround available",
                    Priority::P3,
                    4,
                    24,
                ),
                sla("Low Priority SLA", "Minor issue or request", Priority::P4, 8, 72),
            ],
        }
    }
}

impl Config {
    /// Read `config.toml` from the data directory. A missing file means
    /// defaults; a malformed one is an error.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Config::default());
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("Invalid config {}", path.display()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        for sla in &self.slas {
            let mut check = Checker::new();
            check.required("name", &sla.name);
            crate::sla::check_hours(&mut check, sla);
            check
                .finish()
                .with_context(|| format!("Invalid [[sla]] entry '{}'", sla.name))?;
        }
        for priority in Priority::ALL {
            if self.slas.iter().filter(|s| s.priority == *priority).count() > 1 {
                anyhow::bail!("More than one [[sla]] entry for priority {}", priority);
            }
        }
        Ok(())
    }

    pub fn database_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.database.file)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }

    pub fn notifier(&self, dir: &Path) -> Box<dyn Notifier> {
        match self.notifications.mode {
            NotifyMode::Outbox => Box::new(Outbox::new(dir.join(OUTBOX_DIR))),
            NotifyMode::Log => Box::new(LogNotifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_template_matches_defaults() {
        let parsed: Config = toml::from_str(TEMPLATE).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        assert_eq!(Config::load(dir.path()).unwrap(), Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[logging]\njson = true\n\n[notifications]\nmode = \"log\"\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert!(config.logging.json);
        assert_eq!(config.logging.filter, "warn");
        assert_eq!(config.notifications.mode, NotifyMode::Log);
        assert_eq!(config.busy_timeout(), Duration::from_millis(5000));
        assert_eq!(config.slas.len(), 4);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[database\nfile = 3").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn test_duplicate_sla_priority_rejected() {
        let dir = tempdir().unwrap();
        let raw = r#"
[[sla]]
name = "A"
priority = "p1"
response_time_hours = 1
resolution_time_hours = 4

[[sla]]
name = "B"
priority = "p1"
response_time_hours = 2
resolution_time_hours = 6
"#;
        fs::write(dir.path().join(CONFIG_FILE), raw).unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(err.to_string().contains("p1"));
    }

    #[test]
    fn test_zero_hours_rejected() {
        let dir = tempdir().unwrap();
        let raw = "[[sla]]\nname = \"Zero\"\npriority = \"p2\"\nresponse_time_hours = 0\nresolution_time_hours = 4\n";
        fs::write(dir.path().join(CONFIG_FILE), raw).unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn test_oversized_hours_rejected() {
        let dir = tempdir().unwrap();
        let raw = format!(
            "[[sla]]\nname = \"Forever\"\npriority = \"p4\"\nresponse_time_hours = 8\nresolution_time_hours = {}\n",
            u32::MAX
        );
        fs::write(dir.path().join(CONFIG_FILE), raw).unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("resolution_time_hours"));
    }
}
