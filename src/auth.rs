//! Roles, capabilities and account lifecycle.

use anyhow::{anyhow, Context, Result};
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::db::Database;
use crate::error::DeskError;
use crate::models::{NewUser, Role, User};
use crate::notify::{self, Message, Notifier};
use crate::validate::{self, Checker, NAME_MAX_CHARS, PASSWORD_MIN_CHARS};

/// Operations that need a permission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ViewTickets,
    CreateTicket,
    UpdateTicket,
    Comment,
    AssignTicket,
    DeleteTicket,
    ViewReports,
    ManageReference,
    ManageSla,
    ManageUsers,
}

impl Capability {
    /// Staff-only capabilities also require the `is_staff` flag.
    pub fn staff_only(&self) -> bool {
        matches!(self, Capability::ManageUsers)
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Capability::ViewTickets => "view tickets",
            Capability::CreateTicket => "create tickets",
            Capability::UpdateTicket => "update tickets",
            Capability::Comment => "comment on tickets",
            Capability::AssignTicket => "assign tickets",
            Capability::DeleteTicket => "delete tickets",
            Capability::ViewReports => "view reports",
            Capability::ManageReference => "manage categories",
            Capability::ManageSla => "manage SLAs",
            Capability::ManageUsers => "manage user accounts",
        }
    }
}

impl Role {
    pub fn allows(&self, capability: Capability) -> bool {
        use Capability::*;
        match capability {
            ViewTickets | CreateTicket | UpdateTicket | Comment | ManageUsers => true,
            AssignTicket => matches!(self, Role::Engineer | Role::Manager | Role::Bms | Role::Admin),
            DeleteTicket | ViewReports | ManageReference => matches!(self, Role::Manager | Role::Admin),
            ManageSla => matches!(self, Role::Admin),
        }
    }
}

/// Reject inactive users and users whose role or staff flag does not grant
/// `capability`.
pub fn authorize(user: &User, capability: Capability) -> Result<(), DeskError> {
    if !user.is_active {
        return Err(DeskError::Inactive(user.username.clone()));
    }
    if capability.staff_only() && !user.is_staff {
        return Err(DeskError::Forbidden(format!(
            "only staff may {}",
            capability.describe()
        )));
    }
    if !user.role.allows(capability) {
        return Err(DeskError::Forbidden(format!(
            "role '{}' may not {}",
            user.role,
            capability.describe()
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash is malformed");
            false
        }
    }
}

/// Self-service signup form.
#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department: String,
    pub password: String,
    pub password_confirm: String,
    pub reason: String,
}

fn check_password(check: &mut Checker, field: &'static str, password: &str, confirm: &str) {
    if password.chars().count() < PASSWORD_MIN_CHARS {
        check.fail(
            field,
            format!("must be at least {} characters", PASSWORD_MIN_CHARS),
        );
    }
    if password != confirm {
        check.fail("password_confirm", "passwords do not match");
    }
}

fn check_username(check: &mut Checker, username: &str) {
    check.required("username", username);
    check.max_chars("username", username, 150);
    if username
        .chars()
        .any(|c| !(c.is_alphanumeric() || matches!(c, '.' | '@' | '+' | '-' | '_')))
    {
        check.fail("username", "may only contain letters, digits and . @ + - _");
    }
}

/// Create an inactive technician account and ask staff to approve it.
pub fn register(
    db: &Database,
    form: &Registration,
    notifier: &dyn Notifier,
    sender: &str,
    now: DateTime<Utc>,
) -> Result<User> {
    let username = form.username.trim();
    let email = form.email.trim();

    let mut check = Checker::new();
    check_username(&mut check, username);
    check.required("email", email);
    check.email("email", email);
    check.max_chars("first_name", &form.first_name, NAME_MAX_CHARS);
    check.max_chars("last_name", &form.last_name, NAME_MAX_CHARS);
    check_password(&mut check, "password", &form.password, &form.password_confirm);
    if !username.is_empty() && db.get_user_by_username(username)?.is_some() {
        check.fail("username", "is already taken");
    }
    if validate::looks_like_email(email) && db.get_user_by_email(email)?.is_some() {
        check.fail("email", "is already registered");
    }
    check.finish()?;

    let id = db.create_user(
        &NewUser {
            username: username.to_string(),
            email: email.to_string(),
            first_name: form.first_name.trim().to_string(),
            last_name: form.last_name.trim().to_string(),
            department: form.department.trim().to_string(),
            role: Role::Technician,
            is_active: false,
            is_staff: false,
            password_hash: Some(hash_password(&form.password)?),
            ..Default::default()
        },
        now,
    )?;
    let user = db
        .get_user(id)?
        .context("User vanished after insert")?;
    tracing::info!(username = %user.username, "account registered, pending approval");

    let department = if form.department.trim().is_empty() {
        "Not specified"
    } else {
        form.department.trim()
    };
    let reason = if form.reason.trim().is_empty() {
        "Not specified"
    } else {
        form.reason.trim()
    };
    notify::send_quietly(
        notifier,
        &Message {
            from: sender.to_string(),
            to: db.staff_emails()?,
            subject: format!("New Account Request - {}", user.display_name()),
            body: format!(
                "A new user has requested access:\n\nName: {}\nUsername: {}\nEmail: {}\nDepartment: {}\nReason: {}\n\nApprove with: ticketdesk user approve {}\n",
                user.display_name(),
                user.username,
                user.email,
                department,
                reason,
                user.username
            ),
        },
    );

    Ok(user)
}

/// Profile fields an identity provider hands back after sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl ExternalProfile {
    /// Map a provider's raw profile payload onto the fields we keep.
    pub fn from_provider(provider: &str, extra: &Value) -> Result<Self, DeskError> {
        let field = |key: &str| -> String {
            extra
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        match provider.to_ascii_lowercase().as_str() {
            "google" => Ok(ExternalProfile {
                first_name: field("given_name"),
                last_name: field("family_name"),
                email: field("email"),
            }),
            "microsoft" => {
                let mail = field("mail");
                Ok(ExternalProfile {
                    first_name: field("givenName"),
                    last_name: field("surname"),
                    email: if mail.is_empty() {
                        field("userPrincipalName")
                    } else {
                        mail
                    },
                })
            }
            other => Err(DeskError::Validation(vec![crate::error::FieldError::new(
                "provider",
                format!("unsupported identity provider '{}'", other),
            )])),
        }
    }
}

/// Link an external sign-in to an existing account with the same email, or
/// create a new inactive account without a usable password.
///
/// Returns the account and whether it was newly created.
pub fn provision_external(
    db: &Database,
    provider: &str,
    extra: &Value,
    notifier: &dyn Notifier,
    sender: &str,
    now: DateTime<Utc>,
) -> Result<(User, bool)> {
    let profile = ExternalProfile::from_provider(provider, extra)?;

    let mut check = Checker::new();
    check.required("email", &profile.email);
    check.email("email", &profile.email);
    check.finish()?;

    if let Some(existing) = db.get_user_by_email(&profile.email)? {
        tracing::info!(username = %existing.username, provider, "linked external sign-in");
        return Ok((existing, false));
    }

    let base = profile
        .email
        .split('@')
        .next()
        .unwrap_or("user")
        .to_string();
    let mut username = base.clone();
    let mut n = 1;
    while db.get_user_by_username(&username)?.is_some() {
        n += 1;
        username = format!("{}{}", base, n);
    }

    let id = db.create_user(
        &NewUser {
            username,
            email: profile.email.clone(),
            first_name: profile.first_name,
            last_name: profile.last_name,
            role: Role::Technician,
            is_active: false,
            is_staff: false,
            password_hash: None,
            ..Default::default()
        },
        now,
    )?;
    let user = db
        .get_user(id)?
        .context("User vanished after insert")?;
    tracing::info!(username = %user.username, provider, "external account created, pending approval");

    let provider_name = title_case(provider);
    notify::send_quietly(
        notifier,
        &Message {
            from: sender.to_string(),
            to: db.staff_emails()?,
            subject: format!(
                "New {} Account Request - {}",
                provider_name,
                user.display_name()
            ),
            body: format!(
                "A new user has requested access via {}:\n\nName: {}\nEmail: {}\n\nApprove with: ticketdesk user approve {}\n",
                provider_name,
                user.display_name(),
                user.email,
                user.username
            ),
        },
    );

    Ok((user, true))
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Check credentials. Inactive accounts never log in, whatever the password.
pub fn login(db: &Database, username: &str, password: &str) -> Result<User> {
    let user = match db.get_user_by_username(username.trim())? {
        Some(u) => u,
        None => return Err(DeskError::InvalidCredentials.into()),
    };
    let password_ok = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(password, hash));

    if !user.is_active {
        tracing::info!(username = %user.username, "login refused for inactive account");
        return Err(DeskError::Inactive(user.username).into());
    }
    if !password_ok {
        return Err(DeskError::InvalidCredentials.into());
    }
    Ok(user)
}

/// Look up the acting user for a request and make sure they may act at all.
pub fn acting_user(db: &Database, username: &str) -> Result<User> {
    let user = db
        .get_user_by_username(username.trim())?
        .ok_or_else(|| DeskError::NotFound(format!("User '{}'", username.trim())))?;
    if !user.is_active {
        return Err(DeskError::Inactive(user.username).into());
    }
    Ok(user)
}

/// Approve or suspend an account. Staff only; the account owner is told.
pub fn set_active(
    db: &Database,
    actor: &User,
    username: &str,
    active: bool,
    notifier: &dyn Notifier,
    sender: &str,
) -> Result<User> {
    authorize(actor, Capability::ManageUsers)?;
    let target = db
        .get_user_by_username(username)?
        .ok_or_else(|| DeskError::NotFound(format!("User '{}'", username)))?;
    if target.id == actor.id && !active {
        return Err(DeskError::Conflict("You cannot deactivate your own account".to_string()).into());
    }

    db.set_user_active(target.id, active)?;
    let state = if active { "activated" } else { "deactivated" };
    tracing::info!(username = %target.username, by = %actor.username, state, "account status changed");

    if !target.email.is_empty() {
        notify::send_quietly(
            notifier,
            &Message {
                from: sender.to_string(),
                to: vec![target.email.clone()],
                subject: format!("Your account has been {}", state),
                body: format!(
                    "Hello {},\n\nYour account '{}' has been {} by {}.\n",
                    target.display_name(),
                    target.username,
                    state,
                    actor.display_name()
                ),
            },
        );
    }

    db.get_user(target.id)?
        .ok_or_else(|| DeskError::NotFound(format!("User '{}'", username)).into())
}

pub fn set_role(db: &Database, actor: &User, username: &str, role: Role, is_staff: bool) -> Result<User> {
    authorize(actor, Capability::ManageUsers)?;
    let target = db
        .get_user_by_username(username)?
        .ok_or_else(|| DeskError::NotFound(format!("User '{}'", username)))?;
    db.set_user_role(target.id, role, is_staff)?;
    tracing::info!(username = %target.username, %role, is_staff, by = %actor.username, "role changed");
    db.get_user(target.id)?
        .ok_or_else(|| DeskError::NotFound(format!("User '{}'", username)).into())
}

pub fn change_password(
    db: &Database,
    user: &User,
    old_password: &str,
    new_password: &str,
    confirm: &str,
) -> Result<()> {
    let mut check = Checker::new();
    let old_ok = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(old_password, hash));
    if !old_ok {
        check.fail("old_password", "is incorrect");
    }
    check_password(&mut check, "new_password", new_password, confirm);
    check.finish()?;

    db.set_password_hash(user.id, Some(&hash_password(new_password)?))?;
    tracing::info!(username = %user.username, "password changed");
    Ok(())
}

/// Create the first administrator. Does nothing if any account exists.
pub fn bootstrap_admin(
    db: &Database,
    username: &str,
    email: &str,
    password: &str,
    now: DateTime<Utc>,
) -> Result<Option<User>> {
    if db.count_users()? > 0 {
        return Ok(None);
    }
    let mut check = Checker::new();
    check_username(&mut check, username.trim());
    check.email("email", email.trim());
    check_password(&mut check, "password", password, password);
    check.finish()?;

    let id = db.create_user(
        &NewUser {
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            role: Role::Admin,
            is_active: true,
            is_staff: true,
            password_hash: Some(hash_password(password)?),
            ..Default::default()
        },
        now,
    )?;
    Ok(db.get_user(id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error;
    use crate::notify::Mailbox;
    use crate::testing::{member_user, staff_user};
    use proptest::prelude::*;
    use serde_json::json;
    use tempfile::tempdir;

    const SENDER: &str = "noreply@example.com";

    fn setup_test_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(&db_path).unwrap();
        (db, dir)
    }

    fn registration(username: &str) -> Registration {
        Registration {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            department: "Facilities".to_string(),
            password: "correct horse".to_string(),
            password_confirm: "correct horse".to_string(),
            reason: String::new(),
        }
    }

    #[test]
    fn test_role_capabilities() {
        assert!(Role::Technician.allows(Capability::CreateTicket));
        assert!(!Role::Technician.allows(Capability::AssignTicket));
        assert!(Role::Bms.allows(Capability::AssignTicket));
        assert!(!Role::Engineer.allows(Capability::DeleteTicket));
        assert!(Role::Manager.allows(Capability::DeleteTicket));
        assert!(!Role::Manager.allows(Capability::ManageSla));
        assert!(Role::Admin.allows(Capability::ManageSla));
    }

    #[test]
    fn test_authorize_requires_staff_for_user_management() {
        let (db, _dir) = setup_test_db();
        let tech = member_user(&db, "tech");
        let err = authorize(&tech, Capability::ManageUsers).unwrap_err();
        assert!(matches!(err, DeskError::Forbidden(_)));
        let admin = staff_user(&db, "admin");
        assert!(authorize(&admin, Capability::ManageUsers).is_ok());
    }

    #[test]
    fn test_authorize_rejects_inactive() {
        let (db, _dir) = setup_test_db();
        let mut admin = staff_user(&db, "admin");
        admin.is_active = false;
        assert!(matches!(
            authorize(&admin, Capability::ViewTickets),
            Err(DeskError::Inactive(_))
        ));
    }

    #[test]
    fn test_register_creates_inactive_and_notifies_staff() {
        let (db, _dir) = setup_test_db();
        staff_user(&db, "admin");
        let mailbox = Mailbox::new();

        let user = register(&db, &registration("jdoe"), &mailbox, SENDER, Utc::now()).unwrap();
        assert!(!user.is_active);
        assert!(!user.is_staff);
        assert_eq!(user.role, Role::Technician);

        let sent = mailbox.messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, vec!["admin@example.com".to_string()]);
        assert_eq!(sent[0].subject, "New Account Request - Jane Doe");
        assert!(sent[0].body.contains("Department: Facilities"));
        assert!(sent[0].body.contains("Reason: Not specified"));
    }

    #[test]
    fn test_register_password_mismatch_writes_nothing() {
        let (db, _dir) = setup_test_db();
        let mut form = registration("jdoe");
        form.password_confirm = "something else".to_string();
        let err = register(&db, &form, &Mailbox::new(), SENDER, Utc::now()).unwrap_err();
        let fields: Vec<_> = error::kind(&err).unwrap().fields().iter().map(|f| f.field).collect();
        assert_eq!(fields, vec!["password_confirm"]);
        assert_eq!(db.count_users().unwrap(), 0);
    }

    #[test]
    fn test_register_duplicate_username_and_email() {
        let (db, _dir) = setup_test_db();
        register(&db, &registration("jdoe"), &Mailbox::new(), SENDER, Utc::now()).unwrap();
        let err = register(&db, &registration("jdoe"), &Mailbox::new(), SENDER, Utc::now()).unwrap_err();
        let fields: Vec<_> = error::kind(&err).unwrap().fields().iter().map(|f| f.field).collect();
        assert_eq!(fields, vec!["username", "email"]);
    }

    #[test]
    fn test_inactive_login_fails_even_with_correct_password() {
        let (db, _dir) = setup_test_db();
        register(&db, &registration("jdoe"), &Mailbox::new(), SENDER, Utc::now()).unwrap();

        let err = login(&db, "jdoe", "correct horse").unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::Inactive(_))));
        let err = login(&db, "jdoe", "wrong").unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::Inactive(_))));
    }

    #[test]
    fn test_login_after_approval() {
        let (db, _dir) = setup_test_db();
        let admin = staff_user(&db, "admin");
        let mailbox = Mailbox::new();
        register(&db, &registration("jdoe"), &mailbox, SENDER, Utc::now()).unwrap();
        set_active(&db, &admin, "jdoe", true, &mailbox, SENDER).unwrap();

        assert_eq!(login(&db, "jdoe", "correct horse").unwrap().username, "jdoe");
        let err = login(&db, "jdoe", "wrong password").unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::InvalidCredentials)));
        let err = login(&db, "ghost", "whatever").unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::InvalidCredentials)));

        let last = mailbox.messages().pop().unwrap();
        assert_eq!(last.to, vec!["jdoe@example.com".to_string()]);
        assert_eq!(last.subject, "Your account has been activated");
    }

    #[test]
    fn test_non_staff_cannot_approve() {
        let (db, _dir) = setup_test_db();
        let tech = member_user(&db, "tech");
        register(&db, &registration("jdoe"), &Mailbox::new(), SENDER, Utc::now()).unwrap();
        let err = set_active(&db, &tech, "jdoe", true, &Mailbox::new(), SENDER).unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::Forbidden(_))));
        assert!(!db.get_user_by_username("jdoe").unwrap().unwrap().is_active);
    }

    #[test]
    fn test_cannot_deactivate_self() {
        let (db, _dir) = setup_test_db();
        let admin = staff_user(&db, "admin");
        let err = set_active(&db, &admin, "admin", false, &Mailbox::new(), SENDER).unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::Conflict(_))));
    }

    #[test]
    fn test_external_google_profile() {
        let profile = ExternalProfile::from_provider(
            "google",
            &json!({"given_name": "Ada", "family_name": "Lovelace", "email": "ada@example.com"}),
        )
        .unwrap();
        assert_eq!(profile.first_name, "Ada");
        assert_eq!(profile.last_name, "Lovelace");
        assert_eq!(profile.email, "ada@example.com");
    }

    #[test]
    fn test_external_microsoft_falls_back_to_principal_name() {
        let profile = ExternalProfile::from_provider(
            "Microsoft",
            &json!({"givenName": "Alan", "surname": "Turing", "mail": null, "userPrincipalName": "alan@corp.example.com"}),
        )
        .unwrap();
        assert_eq!(profile.email, "alan@corp.example.com");
    }

    #[test]
    fn test_external_unknown_provider() {
        assert!(ExternalProfile::from_provider("myspace", &json!({})).is_err());
    }

    #[test]
    fn test_provision_external_creates_inactive_then_links() {
        let (db, _dir) = setup_test_db();
        staff_user(&db, "admin");
        let mailbox = Mailbox::new();
        let extra = json!({"given_name": "Ada", "family_name": "Lovelace", "email": "ada@example.com"});

        let (user, created) =
            provision_external(&db, "google", &extra, &mailbox, SENDER, Utc::now()).unwrap();
        assert!(created);
        assert!(!user.is_active);
        assert!(user.password_hash.is_none());
        assert_eq!(user.username, "ada");
        assert_eq!(mailbox.messages()[0].subject, "New Google Account Request - Ada Lovelace");

        let (again, created) =
            provision_external(&db, "google", &extra, &mailbox, SENDER, Utc::now()).unwrap();
        assert!(!created);
        assert_eq!(again.id, user.id);

        // No password: login is impossible even once approved.
        let err = login(&db, "ada", "").unwrap_err();
        assert!(error::kind(&err).is_some());
    }

    #[test]
    fn test_provision_external_avoids_username_clash() {
        let (db, _dir) = setup_test_db();
        member_user(&db, "ada");
        let extra = json!({"email": "ada@elsewhere.example.com"});
        let (user, _) =
            provision_external(&db, "google", &extra, &Mailbox::new(), SENDER, Utc::now()).unwrap();
        assert_eq!(user.username, "ada2");
    }

    #[test]
    fn test_change_password() {
        let (db, _dir) = setup_test_db();
        let admin = staff_user(&db, "admin");
        let err = change_password(&db, &admin, "wrong", "new password", "new password").unwrap_err();
        assert!(matches!(error::kind(&err), Some(DeskError::Validation(_))));

        change_password(&db, &admin, crate::testing::PASSWORD, "new password", "new password").unwrap();
        assert!(login(&db, "admin", "new password").is_ok());
    }

    #[test]
    fn test_bootstrap_admin_only_once() {
        let (db, _dir) = setup_test_db();
        let admin = bootstrap_admin(&db, "root", "root@example.com", "longenough", Utc::now())
            .unwrap()
            .unwrap();
        assert!(admin.is_active && admin.is_staff);
        assert_eq!(admin.role, Role::Admin);
        assert!(bootstrap_admin(&db, "other", "", "longenough", Utc::now())
            .unwrap()
            .is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(4))]

        #[test]
        fn prop_inactive_never_logs_in(password in "[a-zA-Z0-9]{8,20}", attempt in "[a-zA-Z0-9]{0,20}") {
            let (db, _dir) = setup_test_db();
            let mut form = registration("someone");
            form.password = password.clone();
            form.password_confirm = password.clone();
            register(&db, &form, &Mailbox::new(), SENDER, Utc::now()).unwrap();

            prop_assert!(login(&db, "someone", &password).is_err());
            prop_assert!(login(&db, "someone", &attempt).is_err());
        }
    }
}
