//! FitSync CLI
//!
//! Command-line client for inspecting and editing workout plans through
//! the sync engine.
//!
//! # Commands
//!
//! - `list` - List workouts with their freshness
//! - `show` - Show one workout and its version state
//! - `history` - Show the version history of a workout
//! - `rename` - Change a workout's title
//! - `complete` - Mark a workout completed
//! - `delete` - Delete a workout

mod commands;

use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// FitSync workout plan client.
#[derive(Parser)]
#[command(name = "fitsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the API
    #[arg(global = true, long, env = "FITSYNC_BASE_URL")]
    base_url: Option<String>,

    /// Bearer token
    #[arg(global = true, long, env = "FITSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Request timeout in seconds
    #[arg(global = true, long, default_value = "30")]
    timeout_secs: u64,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List workouts with their freshness
    List {
        /// Page to fetch
        #[arg(long, default_value = "1")]
        page: u32,

        /// Workouts per page
        #[arg(long, default_value = "20")]
        per_page: u32,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show one workout and its version state
    Show {
        /// Workout id
        id: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the version history of a workout
    History {
        /// Workout id
        id: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Change a workout's title
    Rename {
        /// Workout id
        id: String,

        /// New title
        title: String,
    },

    /// Mark a workout completed
    Complete {
        /// Workout id
        id: String,
    },

    /// Delete a workout
    Delete {
        /// Workout id
        id: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("FitSync CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let base_url = cli
        .base_url
        .ok_or("API base URL required (--base-url or FITSYNC_BASE_URL)")?;
    let store = commands::connect(
        &base_url,
        cli.token,
        Duration::from_secs(cli.timeout_secs.max(1)),
    )?;

    match cli.command {
        Commands::List {
            page,
            per_page,
            format,
        } => commands::list::run(&store, page, per_page, &format).await?,
        Commands::Show { id, format } => commands::show::run(&store, &id, &format).await?,
        Commands::History { id, format } => commands::history::run(&store, &id, &format).await?,
        Commands::Rename { id, title } => commands::edit::rename(&store, &id, &title).await?,
        Commands::Complete { id } => commands::edit::complete(&store, &id).await?,
        Commands::Delete { id } => commands::edit::delete(&store, &id).await?,
        Commands::Version => {}
    }

    Ok(())
}
