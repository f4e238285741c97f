//! Comments and the first-response clock.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::auth::{self, Capability};
use crate::db::Database;
use crate::history;
use crate::models::{Comment, HistoryAction, Ticket, User};
use crate::validate::Checker;

#[derive(Debug, Clone)]
pub struct CommentOutcome {
    pub comment: Comment,
    /// This comment started the ticket's first-response clock.
    pub first_response: bool,
}

/// Store a comment. The first comment by a staff member stamps the ticket's
/// `first_response_at`; later ones never move it.
pub fn add_comment(
    db: &Database,
    author: &User,
    ticket: &Ticket,
    content: &str,
    is_internal: bool,
    now: DateTime<Utc>,
) -> Result<CommentOutcome> {
    auth::authorize(author, Capability::Comment)?;
    let mut check = Checker::new();
    check.required("content", content);
    check.finish()?;

    let (comment_id, first_response) = db.add_comment(
        ticket.id,
        author.id,
        content.trim(),
        is_internal,
        author.is_staff,
        now,
    )?;
    if first_response {
        tracing::info!(ticket = %ticket.ticket_id, by = %author.username, "first response recorded");
    }

    let kind = if is_internal { "Internal note" } else { "Comment" };
    history::record_event(
        db,
        ticket.id,
        Some(author.id),
        HistoryAction::CommentAdded,
        format!("{} added by {}", kind, author.display_name()),
        now,
    );

    let comment = db
        .get_comments(ticket.id)?
        .into_iter()
        .find(|c| c.id == comment_id)
        .context("Comment vanished after insert")?;
    Ok(CommentOutcome {
        comment,
        first_response,
    })
}

/// Comments the viewer may read. Internal notes are for staff only.
pub fn visible_comments(db: &Database, viewer: &User, ticket: &Ticket) -> Result<Vec<Comment>> {
    auth::authorize(viewer, Capability::ViewTickets)?;
    let comments = db.get_comments(ticket.id)?;
    if viewer.is_staff {
        return Ok(comments);
    }
    Ok(comments.into_iter().filter(|c| !c.is_internal).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{self, DeskError};
    use crate::models::Priority;
    use crate::testing::{member_user, seed_default_slas, staff_user, ticket_fixture};
    use chrono::Duration;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        seed_default_slas(&db);
        (db, dir)
    }

    #[test]
    fn test_first_staff_comment_sets_response_once() {
        let (db, _dir) = setup_test_db();
        let staff = staff_user(&db, "admin");
        let ticket = ticket_fixture(&db, &staff, "Fire panel fault", Priority::P1);
        let t1 = ticket.created_at + Duration::minutes(5);
        let t2 = ticket.created_at + Duration::minutes(50);

        let first = add_comment(&db, &staff, &ticket, "Acknowledged", false, t1).unwrap();
        let second = add_comment(&db, &staff, &ticket, "Contractor called", false, t2).unwrap();
        assert!(first.first_response);
        assert!(!second.first_response);

        let stored = db.get_ticket(ticket.id).unwrap().unwrap();
        assert_eq!(stored.first_response_at, Some(t1));
    }

    #[test]
    fn test_non_staff_comment_does_not_count() {
        let (db, _dir) = setup_test_db();
        let tech = member_user(&db, "tech");
        let staff = staff_user(&db, "admin");
        let ticket = ticket_fixture(&db, &tech, "Lights out", Priority::P3);
        let t1 = ticket.created_at + Duration::minutes(5);

        let outcome = add_comment(&db, &tech, &ticket, "Any update?", false, t1).unwrap();
        assert!(!outcome.first_response);
        assert!(!outcome.comment.author_is_staff);
        assert!(db.get_ticket(ticket.id).unwrap().unwrap().first_response_at.is_none());

        let t2 = t1 + Duration::minutes(10);
        assert!(add_comment(&db, &staff, &ticket, "On the way", false, t2).unwrap().first_response);
        assert_eq!(db.get_ticket(ticket.id).unwrap().unwrap().first_response_at, Some(t2));
    }

    #[test]
    fn test_internal_staff_note_counts_as_response() {
        let (db, _dir) = setup_test_db();
        let staff = staff_user(&db, "admin");
        let ticket = ticket_fixture(&db, &staff, "Leak", Priority::P2);
        let outcome = add_comment(&db, &staff, &ticket, "Checking drawings", true, Utc::now()).unwrap();
        assert!(outcome.first_response);
    }

    #[test]
    fn test_empty_comment_rejected() {
        let (db, _dir) = setup_test_db();
        let staff = staff_user(&db, "admin");
        let ticket = ticket_fixture(&db, &staff, "Leak", Priority::P2);
        let err = add_comment(&db, &staff, &ticket, "  \n ", false, Utc::now()).unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::Validation(_))));
        assert!(db.get_comments(ticket.id).unwrap().is_empty());
        assert!(db.get_ticket(ticket.id).unwrap().unwrap().first_response_at.is_none());
    }

    #[test]
    fn test_internal_comments_hidden_from_non_staff() {
        let (db, _dir) = setup_test_db();
        let staff = staff_user(&db, "admin");
        let tech = member_user(&db, "tech");
        let ticket = ticket_fixture(&db, &tech, "Noise", Priority::P4);
        add_comment(&db, &staff, &ticket, "Public reply", false, Utc::now()).unwrap();
        add_comment(&db, &staff, &ticket, "Vendor is slow", true, Utc::now()).unwrap();

        assert_eq!(visible_comments(&db, &staff, &ticket).unwrap().len(), 2);
        let seen = visible_comments(&db, &tech, &ticket).unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].content, "Public reply");
    }

    #[test]
    fn test_comment_writes_history() {
        let (db, _dir) = setup_test_db();
        let staff = staff_user(&db, "admin");
        let ticket = ticket_fixture(&db, &staff, "Leak", Priority::P2);
        add_comment(&db, &staff, &ticket, "Noted", true, Utc::now()).unwrap();
        let last = db.get_history(ticket.id).unwrap().pop().unwrap();
        assert_eq!(last.action, HistoryAction::CommentAdded);
        assert_eq!(last.description, "Internal note added by admin");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_first_response_is_earliest_staff_comment(offsets in prop::collection::vec(1i64..500, 1..6)) {
            let (db, _dir) = setup_test_db();
            let staff = staff_user(&db, "admin");
            let ticket = ticket_fixture(&db, &staff, "Prop", Priority::P3);

            let mut at = ticket.created_at;
            let mut first = None;
            for minutes in offsets {
                at += Duration::minutes(minutes);
                first.get_or_insert(at);
                add_comment(&db, &staff, &ticket, "update", false, at).unwrap();
            }
            let stored = db.get_ticket(ticket.id).unwrap().unwrap();
            prop_assert_eq!(stored.first_response_at, first);
        }
    }
}
