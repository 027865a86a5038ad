//! `mailsync run` — the long-running daemon.

use anyhow::{Context, Result};
use clap::Args;

use mailsync_core::SyncConfig;

/// Arguments for `mailsync run`.
#[derive(Args, Debug)]
pub struct RunArgs {}

impl RunArgs {
    pub fn run(self, config: SyncConfig) -> Result<()> {
        mailsync_daemon::start_blocking(config).context("daemon exited with an error")
    }
}
