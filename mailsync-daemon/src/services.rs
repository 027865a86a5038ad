//! Container-facing startup steps: waiting for the stack and refreshing the
//! rendered config files.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mailsync_core::SyncConfig;
use mailsync_mailcow::DockerApi;
use mailsync_renderer::{pipeline, RenderReport};

use crate::error::DaemonError;

/// Services that must be up before the first cycle.
pub const STARTUP_SERVICES: &[&str] = &[
    "nginx-mailcow",
    "dockerapi-mailcow",
    "php-fpm-mailcow",
    "sogo-mailcow",
    "dovecot-mailcow",
];

/// Services that read the rendered config files, in restart order.
pub const RESTART_SERVICES: &[&str] = &["sogo-mailcow", "dovecot-mailcow"];

pub const CONTAINER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Block until every startup service runs or `stop` is raised.
pub fn wait_for_stack(docker: &DockerApi, stop: Arc<AtomicBool>) -> Result<(), DaemonError> {
    docker.wait_for_containers(STARTUP_SERVICES, CONTAINER_POLL_INTERVAL, || {
        stop.load(Ordering::SeqCst)
    })?;
    Ok(())
}

/// Render the config files and, when anything changed, restart the services
/// that read them. Without a docker client, or in a dry run, nothing is
/// restarted.
pub fn apply_templates(
    config: &SyncConfig,
    docker: Option<&DockerApi>,
    dry_run: bool,
) -> Result<RenderReport, DaemonError> {
    tracing::info!("applying config templates");
    let report = pipeline::run(config, dry_run)?;

    if !report.changed() {
        tracing::info!("config files up to date");
        return Ok(report);
    }
    if dry_run {
        return Ok(report);
    }

    match docker {
        Some(docker) => {
            for service in RESTART_SERVICES {
                let action = docker.restart_container(service)?;
                tracing::info!(service = *service, ?action, "service restarted");
            }
        }
        None => tracing::warn!("config files changed but no docker api is available to restart services"),
    }
    Ok(report)
}
