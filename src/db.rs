use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

use crate::error::DeskError;
use crate::models::{
    Attachment, Category, Comment, HistoryAction, HistoryEntry, NewSla, NewUser, Priority, Role,
    Sla, Status, Subcategory, Ticket, User,
};
use crate::ticket_id::TicketId;

const SCHEMA_VERSION: i32 = 1;

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, department, phone, role, is_active, is_staff, password_hash, created_at";

const TICKET_COLUMNS: &str = "t.id, t.ticket_id, t.title, t.description, t.status, t.priority, t.source, t.category_id, t.subcategory_id, t.sla_id, t.created_by, t.assigned_to, t.created_at, t.updated_at, t.first_response_at, t.resolved_at, t.closed_at, t.resolution_notes, t.contact_name, t.contact_email, t.contact_phone, t.estimated_hours";

const SLA_COLUMNS: &str =
    "id, name, description, priority, response_time_hours, resolution_time_hours, is_active";

/// Narrowing options for ticket listings. Empty fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub statuses: Vec<Status>,
    pub priority: Option<Priority>,
    pub assigned_to: Option<i64>,
    pub created_by: Option<i64>,
    pub category_id: Option<i64>,
    pub search: Option<String>,
}

/// A history row before it is written.
#[derive(Debug, Clone)]
pub struct NewHistory {
    pub ticket_id: i64,
    pub action: HistoryAction,
    pub field: Option<String>,
    pub old_value: String,
    pub new_value: String,
    pub description: String,
    pub actor_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open database")?;
        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .query_row(
                "SELECT COALESCE(MAX(user_version), 0) FROM pragma_user_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if version < SCHEMA_VERSION {
            self.conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    email TEXT NOT NULL DEFAULT '',
                    first_name TEXT NOT NULL DEFAULT '',
                    last_name TEXT NOT NULL DEFAULT '',
                    department TEXT NOT NULL DEFAULT '',
                    phone TEXT NOT NULL DEFAULT '',
                    role TEXT NOT NULL DEFAULT 'technician',
                    is_active INTEGER NOT NULL DEFAULT 0,
                    is_staff INTEGER NOT NULL DEFAULT 0,
                    password_hash TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS categories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT NOT NULL DEFAULT '',
                    color TEXT NOT NULL DEFAULT '#3B82F6',
                    is_active INTEGER NOT NULL DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS subcategories (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    category_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    is_active INTEGER NOT NULL DEFAULT 1,
                    UNIQUE (category_id, name),
                    FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE CASCADE
                );

                CREATE TABLE IF NOT EXISTS slas (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT NOT NULL DEFAULT '',
                    priority TEXT NOT NULL,
                    response_time_hours INTEGER NOT NULL CHECK (response_time_hours > 0),
                    resolution_time_hours INTEGER NOT NULL CHECK (resolution_time_hours > 0),
                    is_active INTEGER NOT NULL DEFAULT 1
                );

                -- At most one active SLA per priority
                CREATE UNIQUE INDEX IF NOT EXISTS idx_slas_active_priority
                    ON slas(priority) WHERE is_active = 1;

                -- Ticket identifier counter
                CREATE TABLE IF NOT EXISTS ticket_sequence (
                    name TEXT PRIMARY KEY,
                    value INTEGER NOT NULL
                );
                INSERT OR IGNORE INTO ticket_sequence (name, value) VALUES ('ticket', 0);

                CREATE TABLE IF NOT EXISTS tickets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id TEXT NOT NULL UNIQUE,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'open',
                    priority TEXT NOT NULL DEFAULT 'p3',
                    source TEXT NOT NULL DEFAULT 'web',
                    category_id INTEGER,
                    subcategory_id INTEGER,
                    sla_id INTEGER,
                    created_by INTEGER NOT NULL,
                    assigned_to INTEGER,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    first_response_at TEXT,
                    resolved_at TEXT,
                    closed_at TEXT,
                    resolution_notes TEXT NOT NULL DEFAULT '',
                    contact_name TEXT NOT NULL DEFAULT '',
                    contact_email TEXT NOT NULL DEFAULT '',
                    contact_phone TEXT NOT NULL DEFAULT '',
                    estimated_hours REAL,
                    FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL,
                    FOREIGN KEY (subcategory_id) REFERENCES subcategories(id) ON DELETE SET NULL,
                    FOREIGN KEY (sla_id) REFERENCES slas(id) ON DELETE SET NULL,
                    FOREIGN KEY (created_by) REFERENCES users(id),
                    FOREIGN KEY (assigned_to) REFERENCES users(id) ON DELETE SET NULL
                );

                CREATE TABLE IF NOT EXISTS comments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    author_id INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    is_internal INTEGER NOT NULL DEFAULT 0,
                    author_is_staff INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE,
                    FOREIGN KEY (author_id) REFERENCES users(id)
                );

                CREATE TABLE IF NOT EXISTS attachments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    filename TEXT NOT NULL,
                    file_size INTEGER NOT NULL,
                    content_type TEXT NOT NULL,
                    uploaded_by INTEGER NOT NULL,
                    uploaded_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE,
                    FOREIGN KEY (uploaded_by) REFERENCES users(id)
                );

                -- Append-only audit trail
                CREATE TABLE IF NOT EXISTS ticket_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticket_id INTEGER NOT NULL,
                    action TEXT NOT NULL,
                    field TEXT,
                    old_value TEXT NOT NULL DEFAULT '',
                    new_value TEXT NOT NULL DEFAULT '',
                    description TEXT NOT NULL DEFAULT '',
                    actor_id INTEGER,
                    created_at TEXT NOT NULL,
                    FOREIGN KEY (ticket_id) REFERENCES tickets(id) ON DELETE CASCADE,
                    FOREIGN KEY (actor_id) REFERENCES users(id) ON DELETE SET NULL
                );

                CREATE INDEX IF NOT EXISTS idx_tickets_status_priority ON tickets(status, priority);
                CREATE INDEX IF NOT EXISTS idx_tickets_assignee_status ON tickets(assigned_to, status);
                CREATE INDEX IF NOT EXISTS idx_tickets_created ON tickets(created_at);
                CREATE INDEX IF NOT EXISTS idx_comments_ticket ON comments(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_attachments_ticket ON attachments(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_history_ticket ON ticket_history(ticket_id);
                CREATE INDEX IF NOT EXISTS idx_history_actor ON ticket_history(actor_id);
                "#,
            )?;

            self.conn
                .execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;
        }

        self.conn.execute("PRAGMA foreign_keys = ON", [])?;

        Ok(())
    }

    /// Start a transaction that takes the write lock up front.
    fn immediate(&self) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin transaction")
    }

    // Users
    pub fn create_user(&self, user: &NewUser, now: DateTime<Utc>) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO users (username, email, first_name, last_name, department, phone, role, is_active, is_staff, password_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                user.username,
                user.email,
                user.first_name,
                user.last_name,
                user.department,
                user.phone,
                user.role,
                user.is_active,
                user.is_staff,
                user.password_hash,
                now.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
        Ok(self.conn.query_row(&sql, [id], user_from_row).optional()?)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS);
        Ok(self.conn.query_row(&sql, [username], user_from_row).optional()?)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!(
            "SELECT {} FROM users WHERE email <> '' AND lower(email) = lower(?1) ORDER BY id LIMIT 1",
            USER_COLUMNS
        );
        Ok(self.conn.query_row(&sql, [email], user_from_row).optional()?)
    }

    pub fn list_users(&self, pending_only: bool) -> Result<Vec<User>> {
        let sql = if pending_only {
            format!("SELECT {} FROM users WHERE is_active = 0 ORDER BY id", USER_COLUMNS)
        } else {
            format!("SELECT {} FROM users ORDER BY id", USER_COLUMNS)
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let users = stmt
            .query_map([], user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub fn count_users(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
    }

    /// Addresses of active staff accounts, for approval requests.
    pub fn staff_emails(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT email FROM users WHERE is_staff = 1 AND is_active = 1 AND email <> '' ORDER BY id",
        )?;
        let emails = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(emails)
    }

    pub fn set_user_active(&self, id: i64, active: bool) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active, id],
        )?;
        Ok(rows > 0)
    }

    pub fn set_user_role(&self, id: i64, role: Role, is_staff: bool) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE users SET role = ?1, is_staff = ?2 WHERE id = ?3",
            params![role, is_staff, id],
        )?;
        Ok(rows > 0)
    }

    pub fn set_password_hash(&self, id: i64, hash: Option<&str>) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            params![hash, id],
        )?;
        Ok(rows > 0)
    }

    // Categories
    pub fn create_category(&self, name: &str, description: &str, color: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO categories (name, description, color) VALUES (?1, ?2, ?3)",
            params![name, description, color],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, description, color, is_active FROM categories WHERE id = ?1",
                [id],
                category_from_row,
            )
            .optional()?)
    }

    pub fn get_category_by_name(&self, name: &str) -> Result<Option<Category>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, description, color, is_active FROM categories WHERE lower(name) = lower(?1)",
                [name],
                category_from_row,
            )
            .optional()?)
    }

    pub fn list_categories(&self) -> Result<Vec<Category>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, color, is_active FROM categories ORDER BY name",
        )?;
        let categories = stmt
            .query_map([], category_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    pub fn create_subcategory(&self, category_id: i64, name: &str, description: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO subcategories (category_id, name, description) VALUES (?1, ?2, ?3)",
            params![category_id, name, description],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_subcategory(&self, id: i64) -> Result<Option<Subcategory>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, category_id, name, description, is_active FROM subcategories WHERE id = ?1",
                [id],
                subcategory_from_row,
            )
            .optional()?)
    }

    pub fn get_subcategory_by_name(&self, category_id: i64, name: &str) -> Result<Option<Subcategory>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, category_id, name, description, is_active FROM subcategories WHERE category_id = ?1 AND lower(name) = lower(?2)",
                params![category_id, name],
                subcategory_from_row,
            )
            .optional()?)
    }

    pub fn list_subcategories(&self, category_id: i64) -> Result<Vec<Subcategory>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, category_id, name, description, is_active FROM subcategories WHERE category_id = ?1 ORDER BY name",
        )?;
        let subs = stmt
            .query_map([category_id], subcategory_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(subs)
    }

    // SLAs

    /// Make `sla` the active definition for its priority.
    ///
    /// The previously active row for that priority is deactivated and a new
    /// row is inserted in the same transaction. Rows are never rewritten, so
    /// tickets keep the targets they were created with. Installing the active
    /// row again unchanged returns its id. Any other reuse of a name is a
    /// `DeskError::Conflict`.
    pub fn replace_sla(&self, sla: &NewSla) -> Result<i64> {
        let tx = self.immediate()?;

        let sql = format!("SELECT {} FROM slas WHERE name = ?1", SLA_COLUMNS);
        if let Some(row) = tx.query_row(&sql, [&sla.name], sla_from_row).optional()? {
            let unchanged = row.is_active
                && row.priority == sla.priority
                && row.description == sla.description
                && row.response_time_hours == sla.response_time_hours
                && row.resolution_time_hours == sla.resolution_time_hours;
            if unchanged {
                return Ok(row.id);
            }
            return Err(DeskError::Conflict(format!(
                "SLA name '{}' is already in use; choose a new name",
                sla.name
            ))
            .into());
        }

        tx.execute(
            "UPDATE slas SET is_active = 0 WHERE priority = ?1 AND is_active = 1",
            [sla.priority],
        )?;
        tx.execute(
            "INSERT INTO slas (name, description, priority, response_time_hours, resolution_time_hours, is_active) VALUES (?1, ?2, ?3, ?4, ?5, 1)",
            params![
                sla.name,
                sla.description,
                sla.priority,
                sla.response_time_hours,
                sla.resolution_time_hours
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.commit()?;
        Ok(id)
    }

    pub fn active_sla(&self, priority: Priority) -> Result<Option<Sla>> {
        let sql = format!(
            "SELECT {} FROM slas WHERE priority = ?1 AND is_active = 1",
            SLA_COLUMNS
        );
        Ok(self.conn.query_row(&sql, [priority], sla_from_row).optional()?)
    }

    pub fn get_sla(&self, id: i64) -> Result<Option<Sla>> {
        let sql = format!("SELECT {} FROM slas WHERE id = ?1", SLA_COLUMNS);
        Ok(self.conn.query_row(&sql, [id], sla_from_row).optional()?)
    }

    pub fn list_slas(&self, include_inactive: bool) -> Result<Vec<Sla>> {
        let sql = if include_inactive {
            format!("SELECT {} FROM slas ORDER BY priority, is_active DESC, id", SLA_COLUMNS)
        } else {
            format!("SELECT {} FROM slas WHERE is_active = 1 ORDER BY priority", SLA_COLUMNS)
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let slas = stmt
            .query_map([], sla_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(slas)
    }

    // Ticket sequence

    /// Increment the ticket counter and return its new value.
    ///
    /// Runs in its own IMMEDIATE transaction so concurrent connections
    /// serialise on the write lock and the value is durable before use.
    pub fn next_ticket_sequence(&self) -> Result<i64> {
        let tx = self.immediate()?;
        let rows = tx.execute(
            "UPDATE ticket_sequence SET value = value + 1 WHERE name = 'ticket'",
            [],
        )?;
        if rows != 1 {
            anyhow::bail!("Ticket sequence row is missing");
        }
        let value: i64 = tx.query_row(
            "SELECT value FROM ticket_sequence WHERE name = 'ticket'",
            [],
            |row| row.get(0),
        )?;
        tx.commit().context("Failed to commit ticket sequence")?;
        Ok(value)
    }

    // Tickets
    pub fn insert_ticket(&self, ticket: &Ticket) -> Result<i64> {
        let tx = self.immediate()?;
        tx.execute(
            "INSERT INTO tickets (ticket_id, title, description, status, priority, source, category_id, subcategory_id, sla_id, created_by, assigned_to, created_at, updated_at, first_response_at, resolved_at, closed_at, resolution_notes, contact_name, contact_email, contact_phone, estimated_hours) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
            params![
                ticket.ticket_id,
                ticket.title,
                ticket.description,
                ticket.status,
                ticket.priority,
                ticket.source,
                ticket.category_id,
                ticket.subcategory_id,
                ticket.sla_id,
                ticket.created_by,
                ticket.assigned_to,
                ticket.created_at.to_rfc3339(),
                ticket.updated_at.to_rfc3339(),
                ticket.first_response_at.map(|dt| dt.to_rfc3339()),
                ticket.resolved_at.map(|dt| dt.to_rfc3339()),
                ticket.closed_at.map(|dt| dt.to_rfc3339()),
                ticket.resolution_notes,
                ticket.contact_name,
                ticket.contact_email,
                ticket.contact_phone,
                ticket.estimated_hours,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    pub fn get_ticket(&self, id: i64) -> Result<Option<Ticket>> {
        let sql = format!("SELECT {} FROM tickets t WHERE t.id = ?1", TICKET_COLUMNS);
        Ok(self.conn.query_row(&sql, [id], ticket_from_row).optional()?)
    }

    pub fn get_ticket_by_key(&self, key: TicketId) -> Result<Option<Ticket>> {
        let sql = format!("SELECT {} FROM tickets t WHERE t.ticket_id = ?1", TICKET_COLUMNS);
        Ok(self.conn.query_row(&sql, [key], ticket_from_row).optional()?)
    }

    pub fn list_tickets(&self, filter: &TicketFilter) -> Result<Vec<Ticket>> {
        let mut sql = format!("SELECT {} FROM tickets t", TICKET_COLUMNS);
        let mut conditions = Vec::new();
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.statuses.is_empty() {
            let placeholders: Vec<&str> = filter.statuses.iter().map(|_| "?").collect();
            conditions.push(format!("t.status IN ({})", placeholders.join(", ")));
            for status in &filter.statuses {
                params_vec.push(Box::new(*status));
            }
        }

        if let Some(priority) = filter.priority {
            conditions.push("t.priority = ?".to_string());
            params_vec.push(Box::new(priority));
        }

        if let Some(assignee) = filter.assigned_to {
            conditions.push("t.assigned_to = ?".to_string());
            params_vec.push(Box::new(assignee));
        }

        if let Some(creator) = filter.created_by {
            conditions.push("t.created_by = ?".to_string());
            params_vec.push(Box::new(creator));
        }

        if let Some(category) = filter.category_id {
            conditions.push("t.category_id = ?".to_string());
            params_vec.push(Box::new(category));
        }

        if let Some(search) = &filter.search {
            let pattern = format!("%{}%", escape_like(search));
            conditions.push(
                "(t.title LIKE ? ESCAPE '\\' OR t.description LIKE ? ESCAPE '\\' OR t.ticket_id LIKE ? ESCAPE '\\')"
                    .to_string(),
            );
            for _ in 0..3 {
                params_vec.push(Box::new(pattern.clone()));
            }
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        sql.push_str(" ORDER BY t.created_at DESC, t.id DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

        let tickets = stmt
            .query_map(params_refs.as_slice(), ticket_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(tickets)
    }

    /// Write the mutable columns of `ticket` back to its row.
    ///
    /// `first_response_at` is owned by [`Database::add_comment`] and is left
    /// alone here.
    pub fn save_ticket(&self, ticket: &Ticket) -> Result<bool> {
        let tx = self.immediate()?;
        let rows = tx.execute(
            "UPDATE tickets SET title = ?1, description = ?2, status = ?3, priority = ?4, source = ?5, category_id = ?6, subcategory_id = ?7, sla_id = ?8, assigned_to = ?9, updated_at = ?10, resolved_at = ?11, closed_at = ?12, resolution_notes = ?13, contact_name = ?14, contact_email = ?15, contact_phone = ?16, estimated_hours = ?17 WHERE id = ?18",
            params![
                ticket.title,
                ticket.description,
                ticket.status,
                ticket.priority,
                ticket.source,
                ticket.category_id,
                ticket.subcategory_id,
                ticket.sla_id,
                ticket.assigned_to,
                ticket.updated_at.to_rfc3339(),
                ticket.resolved_at.map(|dt| dt.to_rfc3339()),
                ticket.closed_at.map(|dt| dt.to_rfc3339()),
                ticket.resolution_notes,
                ticket.contact_name,
                ticket.contact_email,
                ticket.contact_phone,
                ticket.estimated_hours,
                ticket.id,
            ],
        )?;
        tx.commit()?;
        Ok(rows > 0)
    }

    pub fn delete_ticket(&self, id: i64) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM tickets WHERE id = ?1", [id])?;
        Ok(rows > 0)
    }

    // Comments

    /// Insert a comment and, for staff authors, stamp the ticket's first
    /// response if it has none yet. Returns the comment id and whether the
    /// first response was set by this call.
    pub fn add_comment(
        &self,
        ticket_id: i64,
        author_id: i64,
        content: &str,
        is_internal: bool,
        author_is_staff: bool,
        at: DateTime<Utc>,
    ) -> Result<(i64, bool)> {
        let tx = self.immediate()?;
        let at = at.to_rfc3339();
        tx.execute(
            "INSERT INTO comments (ticket_id, author_id, content, is_internal, author_is_staff, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![ticket_id, author_id, content, is_internal, author_is_staff, at],
        )?;
        let comment_id = tx.last_insert_rowid();

        let responded = if author_is_staff {
            tx.execute(
                "UPDATE tickets SET first_response_at = ?1 WHERE id = ?2 AND first_response_at IS NULL",
                params![at, ticket_id],
            )? > 0
        } else {
            false
        };

        tx.commit()?;
        Ok((comment_id, responded))
    }

    pub fn get_comments(&self, ticket_id: i64) -> Result<Vec<Comment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, author_id, content, is_internal, author_is_staff, created_at FROM comments WHERE ticket_id = ?1 ORDER BY created_at, id",
        )?;
        let comments = stmt
            .query_map([ticket_id], |row| {
                Ok(Comment {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    author_id: row.get(2)?,
                    content: row.get(3)?,
                    is_internal: row.get(4)?,
                    author_is_staff: row.get(5)?,
                    created_at: parse_datetime(row.get::<_, String>(6)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(comments)
    }

    // Attachments
    pub fn add_attachment(
        &self,
        ticket_id: i64,
        filename: &str,
        file_size: u64,
        content_type: &str,
        uploaded_by: i64,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO attachments (ticket_id, filename, file_size, content_type, uploaded_by, uploaded_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ticket_id,
                filename,
                file_size as i64,
                content_type,
                uploaded_by,
                at.to_rfc3339()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_attachments(&self, ticket_id: i64) -> Result<Vec<Attachment>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, filename, file_size, content_type, uploaded_by, uploaded_at FROM attachments WHERE ticket_id = ?1 ORDER BY id",
        )?;
        let attachments = stmt
            .query_map([ticket_id], |row| {
                Ok(Attachment {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    filename: row.get(2)?,
                    file_size: row.get::<_, i64>(3)?.max(0) as u64,
                    content_type: row.get(4)?,
                    uploaded_by: row.get(5)?,
                    uploaded_at: parse_datetime(row.get::<_, String>(6)?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(attachments)
    }

    // History
    pub fn append_history(&self, entry: &NewHistory) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO ticket_history (ticket_id, action, field, old_value, new_value, description, actor_id, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.ticket_id,
                entry.action,
                entry.field,
                entry.old_value,
                entry.new_value,
                entry.description,
                entry.actor_id,
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// History for one ticket in the order it was written.
    pub fn get_history(&self, ticket_id: i64) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, action, field, old_value, new_value, description, actor_id, created_at FROM ticket_history WHERE ticket_id = ?1 ORDER BY id",
        )?;
        let entries = stmt
            .query_map([ticket_id], history_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Most recent history written by one user, newest first.
    pub fn get_history_by_actor(&self, actor_id: i64, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, ticket_id, action, field, old_value, new_value, description, actor_id, created_at FROM ticket_history WHERE actor_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![actor_id, limit as i64], history_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        department: row.get(5)?,
        phone: row.get(6)?,
        role: row.get(7)?,
        is_active: row.get(8)?,
        is_staff: row.get(9)?,
        password_hash: row.get(10)?,
        created_at: parse_datetime(row.get::<_, String>(11)?),
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        color: row.get(3)?,
        is_active: row.get(4)?,
    })
}

fn subcategory_from_row(row: &Row<'_>) -> rusqlite::Result<Subcategory> {
    Ok(Subcategory {
        id: row.get(0)?,
        category_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get(4)?,
    })
}

fn sla_from_row(row: &Row<'_>) -> rusqlite::Result<Sla> {
    Ok(Sla {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        priority: row.get(3)?,
        response_time_hours: row.get(4)?,
        resolution_time_hours: row.get(5)?,
        is_active: row.get(6)?,
    })
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        source: row.get(6)?,
        category_id: row.get(7)?,
        subcategory_id: row.get(8)?,
        sla_id: row.get(9)?,
        created_by: row.get(10)?,
        assigned_to: row.get(11)?,
        created_at: parse_datetime(row.get::<_, String>(12)?),
        updated_at: parse_datetime(row.get::<_, String>(13)?),
        first_response_at: row.get::<_, Option<String>>(14)?.map(parse_datetime),
        resolved_at: row.get::<_, Option<String>>(15)?.map(parse_datetime),
        closed_at: row.get::<_, Option<String>>(16)?.map(parse_datetime),
        resolution_notes: row.get(17)?,
        contact_name: row.get(18)?,
        contact_email: row.get(19)?,
        contact_phone: row.get(20)?,
        estimated_hours: row.get(21)?,
    })
}

fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryEntry> {
    Ok(HistoryEntry {
        id: row.get(0)?,
        ticket_id: row.get(1)?,
        action: row.get(2)?,
        field: row.get(3)?,
        old_value: row.get(4)?,
        new_value: row.get(5)?,
        description: row.get(6)?,
        actor_id: row.get(7)?,
        created_at: parse_datetime(row.get::<_, String>(8)?),
    })
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
