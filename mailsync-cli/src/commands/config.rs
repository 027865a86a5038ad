//! `mailsync config` — print the effective configuration.

use anyhow::{Context, Result};
use clap::Args;

use mailsync_core::SyncConfig;

/// Arguments for `mailsync config`.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Emit JSON instead of YAML.
    #[arg(long)]
    pub json: bool,
}

impl ConfigArgs {
    pub fn run(self, config: SyncConfig) -> Result<()> {
        let redacted = config.redacted();
        let rendered = if self.json {
            serde_json::to_string_pretty(&redacted).context("failed to serialize config JSON")?
        } else {
            serde_yaml::to_string(&redacted).context("failed to serialize config YAML")?
        };
        println!("{}", rendered.trim_end());
        Ok(())
    }
}
