use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::env;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ticketdesk::auth::{self, Registration};
use ticketdesk::commands;
use ticketdesk::commands::create::CreateArgs;
use ticketdesk::commands::init::{AdminSeed, DATA_DIR};
use ticketdesk::commands::list::ListArgs;
use ticketdesk::commands::update::UpdateArgs;
use ticketdesk::config::{Config, LoggingConfig};
use ticketdesk::db::Database;
use ticketdesk::models::{NewSla, User};
use ticketdesk::notify::Notifier;

const LOG_ENV: &str = "TICKETDESK_LOG";

#[derive(Parser)]
#[command(name = "ticketdesk")]
#[command(about = "Incident tickets with SLA tracking and a full audit trail")]
#[command(version)]
struct Cli {
    /// Username to act as
    #[arg(long = "as", global = true, env = "TICKETDESK_USER")]
    acting_as: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize ticketdesk in the current directory
    Init {
        /// Reinstall SLA definitions from config.toml
        #[arg(long)]
        force: bool,
        /// Create the first administrator with this username
        #[arg(long)]
        admin: Option<String>,
        /// Administrator email
        #[arg(long, requires = "admin")]
        email: Option<String>,
        /// Administrator password
        #[arg(long, env = "TICKETDESK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create a new ticket
    Create {
        /// Ticket title
        title: String,
        /// What is wrong
        #[arg(short, long)]
        description: String,
        /// Priority (p1, p2, p3, p4)
        #[arg(short, long, default_value = "p3")]
        priority: String,
        /// Where the report came from (web, email, phone, walk_in, system)
        #[arg(long, default_value = "web")]
        source: String,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(long)]
        subcategory: Option<String>,
        /// Assign to this username
        #[arg(short, long)]
        assignee: Option<String>,
        #[arg(long)]
        contact_name: Option<String>,
        #[arg(long)]
        contact_email: Option<String>,
        #[arg(long)]
        contact_phone: Option<String>,
        /// Estimated effort in hours
        #[arg(long)]
        estimate: Option<f64>,
    },

    /// List tickets
    List {
        /// Filter by status (active, all, or a single status)
        #[arg(short, long, default_value = "active")]
        status: String,
        #[arg(short, long)]
        priority: Option<String>,
        #[arg(short, long)]
        assignee: Option<String>,
        /// Only tickets assigned to me
        #[arg(long, conflicts_with = "assignee")]
        mine: bool,
        #[arg(short, long)]
        category: Option<String>,
        /// Match title or description
        #[arg(long)]
        search: Option<String>,
        /// Only tickets past their resolution target
        #[arg(long)]
        overdue: bool,
    },

    /// Show ticket details
    Show {
        /// Ticket identifier (RX-UG-INC-000001 or 1)
        ticket: String,
    },

    /// Update ticket fields
    Update {
        ticket: String,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long)]
        priority: Option<String>,
        /// Category name, or "none" to clear
        #[arg(short, long)]
        category: Option<String>,
        /// Subcategory name, or "none" to clear
        #[arg(long)]
        subcategory: Option<String>,
        /// Resolution notes
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        contact_name: Option<String>,
        #[arg(long)]
        contact_email: Option<String>,
        #[arg(long)]
        contact_phone: Option<String>,
        #[arg(long)]
        estimate: Option<f64>,
    },

    /// Assign a ticket, or unassign with "none"
    Assign { ticket: String, assignee: String },

    /// Mark a ticket resolved
    Resolve {
        ticket: String,
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Close a ticket
    Close {
        ticket: String,
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Cancel a ticket
    Cancel {
        ticket: String,
        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Reopen a resolved, closed or cancelled ticket
    Reopen { ticket: String },

    /// Delete a ticket
    Delete {
        ticket: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Add a comment to a ticket
    Comment {
        ticket: String,
        text: String,
        /// Only visible to staff
        #[arg(long)]
        internal: bool,
    },

    /// Record a file attachment
    Attach {
        ticket: String,
        path: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Show the audit trail of a ticket or a user
    History {
        #[arg(required_unless_present = "user")]
        ticket: Option<String>,
        /// Show actions by this username instead
        #[arg(long, conflicts_with = "ticket")]
        user: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// SLA definitions
    Sla {
        #[command(subcommand)]
        action: SlaCommands,
    },

    /// Ticket categories
    Category {
        #[command(subcommand)]
        action: CategoryCommands,
    },

    /// Ticket subcategories
    Subcategory {
        #[command(subcommand)]
        action: SubcategoryCommands,
    },

    /// Account management
    User {
        #[command(subcommand)]
        action: UserCommands,
    },

    /// SLA compliance report
    Report {
        /// Only tickets created on or after this date
        #[arg(long)]
        since: Option<String>,
        /// Only tickets created before this date
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Export all tickets
    Export {
        /// Output format (json, markdown)
        #[arg(short, long, default_value = "json")]
        format: String,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
enum SlaCommands {
    /// List SLA definitions
    List {
        /// Include superseded definitions
        #[arg(long)]
        all: bool,
    },
    /// Replace the active SLA for a priority
    Set {
        priority: String,
        name: String,
        /// Hours until first response is due
        #[arg(long)]
        response: u32,
        /// Hours until resolution is due
        #[arg(long)]
        resolution: u32,
        #[arg(short, long, default_value = "")]
        description: String,
    },
}

#[derive(Subcommand)]
enum CategoryCommands {
    /// Add a category
    Add {
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
        /// Hex colour such as #3B82F6
        #[arg(long)]
        color: Option<String>,
    },
    /// List categories and their subcategories
    List,
}

#[derive(Subcommand)]
enum SubcategoryCommands {
    /// Add a subcategory under a category
    Add {
        category: String,
        name: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Request an account (inactive until approved)
    Register {
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long, default_value = "")]
        department: String,
        /// Why access is needed
        #[arg(long, default_value = "")]
        reason: String,
        #[arg(long, env = "TICKETDESK_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        confirm: String,
    },
    /// Activate a pending account
    Approve { username: String },
    /// Deactivate an account
    Deactivate { username: String },
    /// Change a user's role
    Role {
        username: String,
        role: String,
        /// Grant staff rights
        #[arg(long)]
        staff: bool,
    },
    /// List accounts
    List {
        /// Only accounts awaiting approval
        #[arg(long)]
        pending: bool,
    },
    /// Check a username and password
    Login {
        username: String,
        #[arg(long, env = "TICKETDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Change the acting user's password
    Passwd {
        #[arg(long)]
        old: String,
        #[arg(long = "new")]
        new_password: String,
        #[arg(long)]
        confirm: String,
    },
    /// Link or provision an account from a provider profile (JSON file)
    Link { provider: String, profile: PathBuf },
}

fn find_ticketdesk_dir() -> Result<PathBuf> {
    if let Ok(dir) = env::var("TICKETDESK_DIR") {
        let dir = PathBuf::from(dir);
        if dir.is_dir() {
            return Ok(dir);
        }
        bail!("TICKETDESK_DIR points to {}, which is not a directory", dir.display());
    }

    let mut current = env::current_dir()?;
    loop {
        let candidate = current.join(DATA_DIR);
        if candidate.is_dir() {
            return Ok(candidate);
        }

        if !current.pop() {
            bail!("Not a ticketdesk directory (or any parent). Run 'ticketdesk init' first.");
        }
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(fmt::layer().json().with_writer(io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(io::stderr)).init();
    }
}

/// An opened `.ticketdesk` directory.
struct Desk {
    dir: PathBuf,
    config: Config,
    db: Database,
}

impl Desk {
    fn open(dir: PathBuf, config: Config) -> Result<Self> {
        let db = Database::open_with_timeout(&config.database_path(&dir), config.busy_timeout())
            .context("Failed to open database")?;
        Ok(Desk { dir, config, db })
    }

    fn actor(&self, acting_as: Option<&str>) -> Result<User> {
        match acting_as {
            Some(name) => auth::acting_user(&self.db, name),
            None => bail!("No acting user. Pass --as <username> or set TICKETDESK_USER."),
        }
    }

    fn notifier(&self) -> Box<dyn Notifier> {
        self.config.notifier(&self.dir)
    }

    fn sender(&self) -> &str {
        &self.config.notifications.from
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let now = Utc::now();

    if let Commands::Init {
        force,
        admin,
        email,
        password,
    } = &cli.command
    {
        init_tracing(&LoggingConfig::default());
        let seed = match (admin, password) {
            (Some(username), Some(password)) => Some(AdminSeed {
                username,
                email: email.as_deref().unwrap_or_default(),
                password,
            }),
            (Some(_), None) => bail!("--admin needs --password (or TICKETDESK_PASSWORD)"),
            (None, _) => None,
        };
        let cwd = env::current_dir()?;
        return commands::init::run(&cwd, *force, seed);
    }

    let dir = find_ticketdesk_dir()?;
    let config = Config::load(&dir)?;
    init_tracing(&config.logging);
    let desk = Desk::open(dir, config)?;
    let db = &desk.db;
    let acting_as = cli.acting_as.as_deref();

    match cli.command {
        // Handled before the directory lookup.
        Commands::Init { .. } => Ok(()),

        Commands::Create {
            title,
            description,
            priority,
            source,
            category,
            subcategory,
            assignee,
            contact_name,
            contact_email,
            contact_phone,
            estimate,
        } => {
            let actor = desk.actor(acting_as)?;
            let args = CreateArgs {
                title: &title,
                description: &description,
                priority: &priority,
                source: &source,
                category: category.as_deref(),
                subcategory: subcategory.as_deref(),
                assignee: assignee.as_deref(),
                contact_name: contact_name.as_deref(),
                contact_email: contact_email.as_deref(),
                contact_phone: contact_phone.as_deref(),
                estimated_hours: estimate,
            };
            commands::create::run(db, &actor, &args, now).map(|_| ())
        }

        Commands::List {
            status,
            priority,
            assignee,
            mine,
            category,
            search,
            overdue,
        } => {
            let actor = desk.actor(acting_as)?;
            let args = ListArgs {
                status: &status,
                priority: priority.as_deref(),
                assignee: assignee.as_deref(),
                mine,
                category: category.as_deref(),
                search: search.as_deref(),
                overdue,
            };
            commands::list::run(db, &actor, &args, now).map(|_| ())
        }

        Commands::Show { ticket } => {
            let actor = desk.actor(acting_as)?;
            commands::show::run(db, &actor, &ticket, now)
        }

        Commands::Update {
            ticket,
            title,
            description,
            status,
            priority,
            category,
            subcategory,
            notes,
            contact_name,
            contact_email,
            contact_phone,
            estimate,
        } => {
            let actor = desk.actor(acting_as)?;
            let args = UpdateArgs {
                title: title.as_deref(),
                description: description.as_deref(),
                status: status.as_deref(),
                priority: priority.as_deref(),
                category: category.as_deref(),
                subcategory: subcategory.as_deref(),
                notes: notes.as_deref(),
                contact_name: contact_name.as_deref(),
                contact_email: contact_email.as_deref(),
                contact_phone: contact_phone.as_deref(),
                estimated_hours: estimate,
            };
            commands::update::run(db, &actor, &ticket, &args, now).map(|_| ())
        }

        Commands::Assign { ticket, assignee } => {
            let actor = desk.actor(acting_as)?;
            commands::update::assign(db, &actor, &ticket, &assignee, now).map(|_| ())
        }

        Commands::Resolve { ticket, notes } => {
            let actor = desk.actor(acting_as)?;
            commands::status::resolve(db, &actor, &ticket, notes.as_deref(), now).map(|_| ())
        }

        Commands::Close { ticket, notes } => {
            let actor = desk.actor(acting_as)?;
            commands::status::close(db, &actor, &ticket, notes.as_deref(), now).map(|_| ())
        }

        Commands::Cancel { ticket, notes } => {
            let actor = desk.actor(acting_as)?;
            commands::status::cancel(db, &actor, &ticket, notes.as_deref(), now).map(|_| ())
        }

        Commands::Reopen { ticket } => {
            let actor = desk.actor(acting_as)?;
            commands::status::reopen(db, &actor, &ticket, now).map(|_| ())
        }

        Commands::Delete { ticket, force } => {
            let actor = desk.actor(acting_as)?;
            commands::delete::run(db, &actor, &ticket, force).map(|_| ())
        }

        Commands::Comment {
            ticket,
            text,
            internal,
        } => {
            let actor = desk.actor(acting_as)?;
            commands::comment::run(db, &actor, &ticket, &text, internal, now).map(|_| ())
        }

        Commands::Attach {
            ticket,
            path,
            content_type,
        } => {
            let actor = desk.actor(acting_as)?;
            commands::attach::run(db, &actor, &ticket, &path, content_type.as_deref(), now).map(|_| ())
        }

        Commands::History {
            ticket,
            user,
            limit,
        } => {
            let actor = desk.actor(acting_as)?;
            match (ticket, user) {
                (_, Some(username)) => commands::history::by_user(db, &actor, &username, limit).map(|_| ()),
                (Some(ticket), None) => commands::history::run(db, &actor, &ticket).map(|_| ()),
                (None, None) => bail!("Give a ticket or --user"),
            }
        }

        Commands::Sla { action } => {
            let actor = desk.actor(acting_as)?;
            match action {
                SlaCommands::List { all } => commands::sla::list(db, &actor, all).map(|_| ()),
                SlaCommands::Set {
                    priority,
                    name,
                    response,
                    resolution,
                    description,
                } => {
                    let sla = NewSla {
                        name,
                        description,
                        priority: priority.parse()?,
                        response_time_hours: response,
                        resolution_time_hours: resolution,
                    };
                    commands::sla::set(db, &actor, &sla).map(|_| ())
                }
            }
        }

        Commands::Category { action } => {
            let actor = desk.actor(acting_as)?;
            match action {
                CategoryCommands::Add {
                    name,
                    description,
                    color,
                } => commands::category::add(db, &actor, &name, &description, color.as_deref()).map(|_| ()),
                CategoryCommands::List => commands::category::list(db, &actor).map(|_| ()),
            }
        }

        Commands::Subcategory { action } => {
            let actor = desk.actor(acting_as)?;
            match action {
                SubcategoryCommands::Add {
                    category,
                    name,
                    description,
                } => commands::category::add_subcategory(db, &actor, &category, &name, &description).map(|_| ()),
            }
        }

        Commands::User { action } => {
            let notifier = desk.notifier();
            match action {
                UserCommands::Register {
                    username,
                    email,
                    first_name,
                    last_name,
                    department,
                    reason,
                    password,
                    confirm,
                } => {
                    let form = Registration {
                        username,
                        email,
                        first_name,
                        last_name,
                        department,
                        password,
                        password_confirm: confirm,
                        reason,
                    };
                    commands::user::register(db, &form, notifier.as_ref(), desk.sender(), now).map(|_| ())
                }
                UserCommands::Approve { username } => {
                    let actor = desk.actor(acting_as)?;
                    commands::user::approve(db, &actor, &username, notifier.as_ref(), desk.sender()).map(|_| ())
                }
                UserCommands::Deactivate { username } => {
                    let actor = desk.actor(acting_as)?;
                    commands::user::deactivate(db, &actor, &username, notifier.as_ref(), desk.sender()).map(|_| ())
                }
                UserCommands::Role { username, role, staff } => {
                    let actor = desk.actor(acting_as)?;
                    commands::user::role(db, &actor, &username, &role, staff).map(|_| ())
                }
                UserCommands::List { pending } => {
                    let actor = desk.actor(acting_as)?;
                    commands::user::list(db, &actor, pending).map(|_| ())
                }
                UserCommands::Login { username, password } => {
                    commands::user::login(db, &username, &password).map(|_| ())
                }
                UserCommands::Passwd {
                    old,
                    new_password,
                    confirm,
                } => {
                    let actor = desk.actor(acting_as)?;
                    commands::user::passwd(db, &actor, &old, &new_password, &confirm)
                }
                UserCommands::Link { provider, profile } => {
                    commands::user::link(db, &provider, &profile, notifier.as_ref(), desk.sender(), now).map(|_| ())
                }
            }
        }

        Commands::Report { since, until, json } => {
            let actor = desk.actor(acting_as)?;
            commands::report::run(db, &actor, since.as_deref(), until.as_deref(), json, now).map(|_| ())
        }

        Commands::Export { format, output } => {
            let actor = desk.actor(acting_as)?;
            match format.as_str() {
                "json" => commands::export::run_json(db, &actor, output.as_deref(), now),
                "markdown" | "md" => commands::export::run_markdown(db, &actor, output.as_deref(), now),
                _ => bail!("Unknown format '{}'. Use 'json' or 'markdown'", format),
            }
        }
    }
}
