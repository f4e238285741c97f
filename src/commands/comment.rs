use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::lifecycle;
use crate::models::User;
use crate::responder::{self, CommentOutcome};

pub fn run(
    db: &Database,
    actor: &User,
    key: &str,
    text: &str,
    internal: bool,
    now: DateTime<Utc>,
) -> Result<CommentOutcome> {
    let ticket = lifecycle::find_ticket(db, key)?;
    let outcome = responder::add_comment(db, actor, &ticket, text, internal, now)?;
    let kind = if internal { "internal note" } else { "comment" };
    println!("Added {} to {}", kind, ticket.ticket_id);
    if outcome.first_response {
        println!("First response recorded at {}", super::format_time(now));
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use crate::testing::{member_user, seed_default_slas, staff_user, ticket_fixture};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();
        seed_default_slas(&db);
        (db, dir)
    }

    #[test]
    fn test_comment_by_key() {
        let (db, _dir) = setup_test_db();
        let staff = staff_user(&db, "admin");
        let tech = member_user(&db, "tech");
        let ticket = ticket_fixture(&db, &tech, "Hot aisle", Priority::P2);

        let outcome = run(&db, &tech, "#1", "Still hot", false, Utc::now()).unwrap();
        assert!(!outcome.first_response);
        let outcome = run(&db, &staff, "RX-UG-INC-000001", "Checking CRAC", false, Utc::now()).unwrap();
        assert!(outcome.first_response);
        assert_eq!(db.get_comments(ticket.id).unwrap().len(), 2);
    }

    #[test]
    fn test_comment_unknown_ticket() {
        let (db, _dir) = setup_test_db();
        let staff = staff_user(&db, "admin");
        assert!(run(&db, &staff, "5", "Hello", false, Utc::now()).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_comment_content_stored(text in "[a-zA-Z0-9][a-zA-Z0-9 .,!?]{0,80}") {
            let (db, _dir) = setup_test_db();
            let staff = staff_user(&db, "admin");
            let ticket = ticket_fixture(&db, &staff, "Prop", Priority::P3);
            run(&db, &staff, "1", &text, false, Utc::now()).unwrap();
            let comments = db.get_comments(ticket.id).unwrap();
            prop_assert_eq!(&comments[0].content, text.trim());
        }
    }
}
