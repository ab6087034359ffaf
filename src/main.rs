//! # Scriptorium CLI (`scriptorium`)
//!
//! Administers a Scriptorium library from the command line and starts the
//! HTTP server that the public site and admin panel talk to.
//!
//! ## Usage
//!
//! ```bash
//! scriptorium --config ./config/scriptorium.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scriptorium init` | Create the SQLite schema and migrate legacy fields |
//! | `scriptorium serve` | Start the JSON HTTP server |
//! | `scriptorium search "<query>"` | Search the catalog |
//! | `scriptorium get <id>` | Show one manuscript |
//! | `scriptorium import <file.xlsx>` | Bulk import manuscripts from a spreadsheet |
//! | `scriptorium stats` | Dashboard counts |
//! | `scriptorium draft <action>` | Work on the saved manuscript form draft |
//! | `scriptorium hash-password <pw>` | Hash a password for `[[auth.admins]]` |
//!
//! ## Examples
//!
//! ```bash
//! scriptorium init --config ./config/scriptorium.toml
//! scriptorium import ./katalog.xlsx
//! scriptorium search "babad" --page 2
//! scriptorium draft set judul "Serat Centhini"
//! scriptorium draft submit
//! scriptorium serve
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use scriptorium::config::{self, BackendKind};
use scriptorium::{auth, bulk_import, drafts, get, logging, migrate, search, server, stats};

/// Scriptorium CLI: catalog, blog, and guestbook administration for a
/// manuscript library.
///
/// All commands except `hash-password` read a TOML configuration file given
/// by `--config`. See `config/scriptorium.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "scriptorium",
    about = "Scriptorium: catalog, blog, and guestbook service for a manuscript library",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scriptorium.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite tables and indexes, then rewrites legacy
    /// `is_approved` fields on comments and guestbook entries. Safe to run
    /// more than once.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Search the manuscript catalog.
    ///
    /// Matches the query case-insensitively against title, author,
    /// inventory code, and description.
    Search {
        /// Text to look for. An empty query lists the whole catalog.
        query: String,

        /// Page number, starting at 1.
        #[arg(long, default_value = "1")]
        page: u32,
    },

    /// Show every field of one manuscript.
    Get {
        /// Manuscript ID.
        id: String,
    },

    /// Import manuscripts from the first worksheet of an xlsx file.
    ///
    /// Row 1 holds column headers. Rows are inserted one at a time in sheet
    /// order; invalid rows are reported as errors and the rest still import.
    Import {
        /// Path to the `.xlsx` file.
        file: PathBuf,
    },

    /// Show catalog, blog, and guestbook counts.
    Stats,

    /// Manage the saved manuscript form draft.
    Draft {
        #[command(subcommand)]
        action: DraftAction,
    },

    /// Print an argon2 hash of a password for an `[[auth.admins]]` entry.
    HashPassword {
        /// Plain-text password.
        password: String,
    },
}

/// Draft subcommands.
#[derive(Subcommand)]
enum DraftAction {
    /// Set one form field, saving the draft.
    Set {
        /// Column name (for example `judul` or `kategori`).
        field: String,

        /// New value. Lists are comma-separated.
        value: String,

        /// Start or continue a draft that edits this existing manuscript.
        #[arg(long)]
        id: Option<String>,
    },

    /// Print the saved draft.
    Show,

    /// Save the draft as a manuscript and discard it.
    Submit,

    /// Discard the draft.
    Cancel,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::HashPassword { password } = &cli.command {
        println!("{}", auth::hash_password(password)?);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Init => match cfg.backend.kind {
            BackendKind::Sqlite => {
                migrate::run_migrations(&cfg).await?;
                println!("Database initialized successfully.");
            }
            BackendKind::Rest => {
                println!("The rest backend manages its own schema; nothing to initialize.");
            }
            BackendKind::Memory => {
                println!("The memory backend has no schema; nothing to initialize.");
            }
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Search { query, page } => {
            search::run_search(&cfg, &query, page).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Import { file } => {
            bulk_import::run_import(&cfg, &file).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Draft { action } => match action {
            DraftAction::Set { field, value, id } => {
                drafts::run_draft_set(&cfg, &field, &value, id.as_deref()).await?;
            }
            DraftAction::Show => drafts::run_draft_show(&cfg)?,
            DraftAction::Submit => drafts::run_draft_submit(&cfg).await?,
            DraftAction::Cancel => drafts::run_draft_cancel(&cfg)?,
        },
        Commands::HashPassword { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
