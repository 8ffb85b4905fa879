//! Jotter CLI
//!
//! Command-line interface for Jotter - offline-first notes.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jotter_core::{Config, Store};

mod commands;
mod editor;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "jotter")]
#[command(about = "Jotter - offline-first notes")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log debug output to stderr (or the configured log file)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Show or clear pending mutations
    Queue {
        #[command(subcommand)]
        command: Option<QueueCommands>,
    },
    /// Replay pending mutations against the API now
    Sync,
    /// Show notes, queue and sync status
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Keep syncing in the background until interrupted
    Daemon,
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Create a new note
    #[command(alias = "add")]
    New {
        /// Note title
        #[arg(short = 'T', long)]
        title: String,
        /// Note content (opens editor if not provided)
        #[arg(short, long)]
        content: Option<String>,
    },
    /// Edit a note
    Edit {
        /// Note ID (full ID or prefix)
        id: String,
        /// New title
        #[arg(short = 'T', long)]
        title: Option<String>,
        /// New content (opens editor if neither flag is given)
        #[arg(short, long)]
        content: Option<String>,
    },
    /// List notes
    #[command(alias = "ls")]
    List {
        /// Only notes with changes not yet synced
        #[arg(long)]
        unsynced: bool,
    },
    /// Show a note
    Show {
        /// Note ID (full ID or prefix)
        id: String,
    },
    /// Delete a note
    #[command(alias = "rm")]
    Delete {
        /// Note ID (full ID or prefix)
        id: String,
    },
}

#[derive(Subcommand, Clone)]
enum QueueCommands {
    /// List pending mutations
    #[command(alias = "ls")]
    List,
    /// Discard all pending mutations
    Clear,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (see `jotter config show`)
        key: String,
        /// Configuration value ("none" clears optional keys)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config_file.as_ref();

    // Config commands work even when the data directory is unusable
    if let Commands::Config { command } = &cli.command {
        return match command.clone() {
            Some(ConfigCommands::Show) | None => commands::config::show(config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key, value, config_path, &output)
            }
        };
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    let is_daemon = matches!(cli.command, Commands::Daemon);
    init_logging(&config, log_level(cli.verbose, is_daemon));

    let store = Store::open_with_config(config)?;

    let is_write = matches!(
        &cli.command,
        Commands::Note {
            command: NoteCommands::New { .. } | NoteCommands::Edit { .. } | NoteCommands::Delete { .. }
        }
    );

    let result = match cli.command {
        Commands::Note { command } => handle_note_command(command, &store, &output),
        Commands::Queue { command } => match command {
            Some(QueueCommands::List) | None => commands::queue::list(&store, &output),
            Some(QueueCommands::Clear) => commands::queue::clear(&store, &output),
        },
        Commands::Sync => commands::sync::sync(&store, &output).await,
        Commands::Status => commands::status::show(&store, &output),
        Commands::Daemon => commands::daemon::run(&store, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    };

    // Push local edits right away when the API is reachable
    if is_write && result.is_ok() {
        commands::sync::auto_sync(&store, &output).await;
    }

    result
}

fn handle_note_command(command: NoteCommands, store: &Store, output: &Output) -> Result<()> {
    match command {
        NoteCommands::New { title, content } => commands::note::create(store, title, content, output),
        NoteCommands::Edit { id, title, content } => {
            commands::note::edit(store, id, title, content, output)
        }
        NoteCommands::List { unsynced } => commands::note::list(store, unsynced, output),
        NoteCommands::Show { id } => commands::note::show(store, id, output),
        NoteCommands::Delete { id } => commands::note::delete(store, id, output),
    }
}

fn log_level(verbose: bool, is_daemon: bool) -> &'static str {
    if verbose {
        "debug"
    } else if is_daemon {
        "info"
    } else {
        "warn"
    }
}

/// Initialize logging
///
/// RUST_LOG takes precedence over the level picked from the flags.
/// Logs go to `log_file` when configured, stderr otherwise.
fn init_logging(config: &Config, level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jotter_core={},jotter_cli={}", level, level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    if let Some(ref log_path) = config.log_file {
        match OpenOptions::new().create(true).append(true).open(log_path) {
            Ok(file) => {
                let _ = builder.with_ansi(false).with_writer(Mutex::new(file)).try_init();
                return;
            }
            Err(e) => {
                eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            }
        }
    }

    let _ = builder.with_writer(std::io::stderr).try_init();
}
