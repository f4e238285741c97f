use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::Path;

use crate::auth;
use crate::config::{Config, CONFIG_FILE, TEMPLATE};
use crate::db::Database;

pub const DATA_DIR: &str = ".ticketdesk";

/// First administrator to create, if the database has no accounts yet.
pub struct AdminSeed<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

pub fn run(path: &Path, force: bool, admin: Option<AdminSeed<'_>>) -> Result<()> {
    let data_dir = path.join(DATA_DIR);
    let config_path = data_dir.join(CONFIG_FILE);

    if data_dir.exists() && !force && admin.is_none() {
        println!("Already initialized at {}", path.display());
        println!("Use --force to reinstall the SLA definitions from config.toml.");
        return Ok(());
    }

    fs::create_dir_all(&data_dir).context("Failed to create .ticketdesk directory")?;
    if !config_path.exists() {
        fs::write(&config_path, TEMPLATE).context("Failed to write config.toml")?;
        println!("Created {}", config_path.display());
    }

    let config = Config::load(&data_dir)?;
    let db = Database::open_with_timeout(&config.database_path(&data_dir), config.busy_timeout())?;

    let mut installed = 0;
    for sla in &config.slas {
        let current = db.active_sla(sla.priority)?.map(|s| s.id);
        if force || current.is_none() {
            let id = db
                .replace_sla(sla)
                .with_context(|| format!("Failed to install SLA '{}'", sla.name))?;
            if current != Some(id) {
                installed += 1;
            }
        }
    }
    if installed > 0 {
        println!("Installed {} SLA definition(s)", installed);
    }

    if let Some(seed) = admin {
        match auth::bootstrap_admin(&db, seed.username, seed.email, seed.password, Utc::now())? {
            Some(user) => println!("Created administrator '{}'", user.username),
            None => println!("Accounts already exist; no administrator created."),
        }
    }

    println!("Initialized ticketdesk at {}", data_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use tempfile::tempdir;

    fn open(path: &Path) -> Database {
        let data_dir = path.join(DATA_DIR);
        let config = Config::load(&data_dir).unwrap();
        Database::open(&config.database_path(&data_dir)).unwrap()
    }

    #[test]
    fn test_init_creates_config_db_and_slas() {
        let dir = tempdir().unwrap();
        run(dir.path(), false, None).unwrap();

        assert!(dir.path().join(DATA_DIR).join(CONFIG_FILE).exists());
        let db = open(dir.path());
        for priority in Priority::ALL {
            assert!(db.active_sla(*priority).unwrap().is_some());
        }
        assert_eq!(
            db.active_sla(Priority::P1).unwrap().unwrap().resolution_time_hours,
            4
        );
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let dir = tempdir().unwrap();
        run(dir.path(), false, None).unwrap();
        run(dir.path(), false, None).unwrap();
        assert_eq!(open(dir.path()).list_slas(true).unwrap().len(), 4);
    }

    #[test]
    fn test_force_installs_renamed_slas() {
        let dir = tempdir().unwrap();
        run(dir.path(), false, None).unwrap();
        let old = open(dir.path()).active_sla(Priority::P1).unwrap().unwrap();

        let config_path = dir.path().join(DATA_DIR).join(CONFIG_FILE);
        let edited = fs::read_to_string(&config_path)
            .unwrap()
            .replace("\"Critical Priority SLA\"", "\"Critical Priority SLA v2\"")
            .replace("resolution_time_hours = 4\n", "resolution_time_hours = 6\n");
        fs::write(&config_path, edited).unwrap();

        run(dir.path(), true, None).unwrap();
        let db = open(dir.path());
        let active = db.active_sla(Priority::P1).unwrap().unwrap();
        assert_eq!(active.resolution_time_hours, 6);
        assert_ne!(active.id, old.id);
        let retired = db.get_sla(old.id).unwrap().unwrap();
        assert!(!retired.is_active);
        assert_eq!(retired.resolution_time_hours, 4);
        assert_eq!(db.list_slas(true).unwrap().len(), 5);
    }

    #[test]
    fn test_force_with_unchanged_config_keeps_rows() {
        let dir = tempdir().unwrap();
        run(dir.path(), false, None).unwrap();
        run(dir.path(), true, None).unwrap();
        assert_eq!(open(dir.path()).list_slas(true).unwrap().len(), 4);
    }

    #[test]
    fn test_force_rejects_edited_hours_under_same_name() {
        let dir = tempdir().unwrap();
        run(dir.path(), false, None).unwrap();

        let config_path = dir.path().join(DATA_DIR).join(CONFIG_FILE);
        let edited = fs::read_to_string(&config_path)
            .unwrap()
            .replace("resolution_time_hours = 4\n", "resolution_time_hours = 6\n");
        fs::write(&config_path, edited).unwrap();

        let err = run(dir.path(), true, None).unwrap_err();
        assert!(matches!(
            crate::error::kind(&err),
            Some(crate::error::DeskError::Conflict(_))
        ));
        assert_eq!(
            open(dir.path()).active_sla(Priority::P1).unwrap().unwrap().resolution_time_hours,
            4
        );
    }

    #[test]
    fn test_init_with_admin() {
        let dir = tempdir().unwrap();
        run(
            dir.path(),
            false,
            Some(AdminSeed {
                username: "root",
                email: "root@example.com",
                password: "long enough",
            }),
        )
        .unwrap();
        let db = open(dir.path());
        let admin = db.get_user_by_username("root").unwrap().unwrap();
        assert!(admin.is_staff && admin.is_active);
    }
}
