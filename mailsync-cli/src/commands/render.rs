//! `mailsync render` — render the mail server config files.

use anyhow::{Context, Result};
use clap::Args;

use mailsync_core::SyncConfig;
use mailsync_mailcow::DockerApi;
use mailsync_renderer::{pipeline, WriteResult};

/// Arguments for `mailsync render`.
#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Show what would be written without writing any files.
    #[arg(long)]
    pub dry_run: bool,

    /// Print a unified diff against the files on disk instead of writing.
    #[arg(long, conflicts_with = "dry_run")]
    pub diff: bool,

    /// Restart sogo and dovecot through the docker api when a file changed.
    #[arg(long, conflicts_with_all = ["dry_run", "diff"])]
    pub restart: bool,
}

impl RenderArgs {
    pub fn run(self, config: SyncConfig) -> Result<()> {
        if self.diff {
            return print_diff(&config);
        }

        let report = if self.restart {
            let docker = DockerApi::from_settings(&config.mailcow)
                .context("failed to set up docker api client")?;
            mailsync_daemon::apply_templates(&config, Some(&docker), false)
                .context("render failed")?
        } else {
            pipeline::run(&config, self.dry_run).context("render failed")?
        };

        print_results(&report.writes, self.dry_run);
        Ok(())
    }
}

fn print_diff(config: &SyncConfig) -> Result<()> {
    let diffs = pipeline::diff(config).context("diff failed")?;
    if diffs.is_empty() {
        println!("No differences in {}.", config.templates.output_dir.display());
        return Ok(());
    }
    for diff in diffs {
        print!("{}", diff.unified_diff);
        if !diff.unified_diff.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}

fn print_results(writes: &[WriteResult], dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let changed = writes.iter().filter(|w| w.changed()).count();
    println!(
        "{prefix}✓ config rendered ({} written, {} unchanged)",
        changed,
        writes.len() - changed
    );

    for w in writes {
        match w {
            WriteResult::Written {
                path,
                backup: Some(backup),
            } => println!("  ✎  {} (backup: {})", path.display(), backup.display()),
            WriteResult::Written { path, backup: None } => println!("  ✎  {}", path.display()),
            WriteResult::WouldWrite { path } => println!("  ~  {}", path.display()),
            WriteResult::Unchanged { path } => println!("  ·  {}", path.display()),
        }
    }
}
