//! Wires the directory and backend adapters into one reconciliation cycle.

use mailsync_core::config::LdapSettings;
use mailsync_core::SyncConfig;
use mailsync_directory::LdapDirectory;
use mailsync_mailcow::MailcowClient;
use mailsync_reconcile::{cycle, CycleReport, DesiredSettings};

use crate::error::DaemonError;

/// Everything a cycle needs that outlives a single cycle.
///
/// The directory connection does not: a fresh [`LdapDirectory`] is bound for
/// every cycle and unbound when it ends.
pub struct CycleRunner {
    settings: DesiredSettings,
    ldap: LdapSettings,
    client: MailcowClient,
}

impl CycleRunner {
    pub fn new(config: &SyncConfig) -> Result<Self, DaemonError> {
        Ok(Self {
            settings: DesiredSettings::from_config(config),
            ldap: config.ldap.clone(),
            client: MailcowClient::new(&config.mailcow)?,
        })
    }

    /// Run one blocking cycle. Never fails; the outcome is in the report.
    pub fn run_cycle(&self, dry_run: bool) -> CycleReport {
        let mut directory = LdapDirectory::new(self.ldap.clone());
        cycle::run(
            &self.settings,
            &mut directory,
            &self.client,
            &self.client,
            dry_run,
        )
    }
}
