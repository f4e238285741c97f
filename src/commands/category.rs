use anyhow::Result;

use crate::auth::{self, Capability};
use crate::commands::find_category;
use crate::db::Database;
use crate::error::DeskError;
use crate::models::{Category, User};
use crate::validate::{Checker, NAME_MAX_CHARS};

pub const DEFAULT_COLOR: &str = "#3B82F6";

pub fn add(db: &Database, actor: &User, name: &str, description: &str, color: Option<&str>) -> Result<i64> {
    auth::authorize(actor, Capability::ManageReference)?;
    let name = name.trim();
    let color = color.unwrap_or(DEFAULT_COLOR);

    let mut check = Checker::new();
    check.required("name", name);
    check.max_chars("name", name, NAME_MAX_CHARS);
    check.hex_color("color", color);
    check.finish()?;
    if db.get_category_by_name(name)?.is_some() {
        return Err(DeskError::Conflict(format!("Category '{}' already exists", name)).into());
    }

    let id = db.create_category(name, description.trim(), color)?;
    println!("Created category '{}'", name);
    Ok(id)
}

pub fn add_subcategory(
    db: &Database,
    actor: &User,
    category: &str,
    name: &str,
    description: &str,
) -> Result<i64> {
    auth::authorize(actor, Capability::ManageReference)?;
    let parent = find_category(db, category)?;
    let name = name.trim();

    let mut check = Checker::new();
    check.required("name", name);
    check.max_chars("name", name, NAME_MAX_CHARS);
    check.finish()?;
    if db.get_subcategory_by_name(parent.id, name)?.is_some() {
        return Err(DeskError::Conflict(format!(
            "Subcategory '{}' already exists under '{}'",
            name, parent.name
        ))
        .into());
    }

    let id = db.create_subcategory(parent.id, name, description.trim())?;
    println!("Created subcategory '{} / {}'", parent.name, name);
    Ok(id)
}

pub fn list(db: &Database, actor: &User) -> Result<Vec<Category>> {
    auth::authorize(actor, Capability::ViewTickets)?;
    let categories = db.list_categories()?;
    if categories.is_empty() {
        println!("No categories.");
    }
    for category in &categories {
        let state = if category.is_active { "" } else { " (inactive)" };
        println!("{} {}{}", category.color, category.name, state);
        for sub in db.list_subcategories(category.id)? {
            println!("        - {}", sub.name);
        }
    }
    Ok(categories)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error;
    use crate::models::Role;
    use crate::testing::{member_user, role_user};
    use tempfile::tempdir;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn test_add_and_list() {
        let (db, _dir) = setup_test_db();
        let manager = role_user(&db, "mgr", Role::Manager);
        add(&db, &manager, "Power", "Electrical", None).unwrap();
        add_subcategory(&db, &manager, "power", "UPS", "").unwrap();

        let categories = list(&db, &manager).unwrap();
        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].color, DEFAULT_COLOR);
        assert_eq!(db.list_subcategories(categories[0].id).unwrap().len(), 1);
    }

    #[test]
    fn test_duplicates_conflict() {
        let (db, _dir) = setup_test_db();
        let manager = role_user(&db, "mgr", Role::Manager);
        add(&db, &manager, "Power", "", None).unwrap();
        let err = add(&db, &manager, "POWER", "", None).unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::Conflict(_))));

        add_subcategory(&db, &manager, "Power", "UPS", "").unwrap();
        assert!(add_subcategory(&db, &manager, "Power", "ups", "").is_err());
    }

    #[test]
    fn test_bad_color_and_permissions() {
        let (db, _dir) = setup_test_db();
        let manager = role_user(&db, "mgr", Role::Manager);
        let err = add(&db, &manager, "Cooling", "", Some("blue")).unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::Validation(_))));

        let tech = member_user(&db, "tech");
        let err = add(&db, &tech, "Cooling", "", None).unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::Forbidden(_))));
    }
}
