//! mailsync: keep a mailcow server in step with a school directory.
//!
//! # Usage
//!
//! ```text
//! mailsync [--config <file>] run
//! mailsync [--config <file>] sync [--dry-run] [--json]
//! mailsync [--config <file>] render [--dry-run] [--diff] [--restart]
//! mailsync [--config <file>] config [--json]
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::{config::ConfigArgs, render::RenderArgs, run::RunArgs, sync::SyncArgs};
use mailsync_core::SyncConfig;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "mailsync",
    version,
    about = "Sync directory users and groups into a mailcow server",
    long_about = None,
)]
struct Cli {
    /// YAML config file; `MAILSYNC_*` environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Wait for the mail stack, refresh config files, then sync forever.
    Run(RunArgs),

    /// Run a single sync cycle.
    Sync(SyncArgs),

    /// Render the dovecot and SOGo config files.
    Render(RenderArgs),

    /// Validate and print the effective configuration, secrets redacted.
    Config(ConfigArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn load_config(path: Option<&std::path::Path>) -> Result<SyncConfig> {
    SyncConfig::load(path).context("invalid configuration")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Run(args) => args.run(config),
        Commands::Sync(args) => args.run(config),
        Commands::Render(args) => args.run(config),
        Commands::Config(args) => args.run(config),
    }
}
