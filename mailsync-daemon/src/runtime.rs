use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use mailsync_core::config::{CycleSettings, LogFormat, MutationErrorPolicy};
use mailsync_core::SyncConfig;
use mailsync_mailcow::DockerApi;
use mailsync_reconcile::CycleReport;

use crate::error::{io_err, join_err, DaemonError};
use crate::runner::CycleRunner;
use crate::services;

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(config: SyncConfig) -> Result<(), DaemonError> {
    init_tracing(config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run the daemon: wait for the stack, refresh config files, then sync until
/// SIGINT or SIGTERM.
pub async fn run(config: SyncConfig) -> Result<(), DaemonError> {
    log_effective_config(&config);

    let (shutdown_tx, _) = broadcast::channel::<()>(4);

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move { signal_task(shutdown, shutdown_rx).await })
    };

    let result = serve(config, shutdown_tx.subscribe()).await;
    let _ = shutdown_tx.send(());

    handle_join("signal_handler", signal_handle.await)?;
    result
}

async fn serve(
    config: SyncConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let docker = Arc::new(DockerApi::from_settings(&config.mailcow)?);
    let runner = Arc::new(CycleRunner::new(&config)?);

    let stop = Arc::new(AtomicBool::new(false));
    let mut wait = {
        let docker = docker.clone();
        let stop = stop.clone();
        tokio::task::spawn_blocking(move || services::wait_for_stack(&docker, stop))
    };
    tokio::select! {
        _ = shutdown_rx.recv() => {
            stop.store(true, Ordering::SeqCst);
            let _ = wait.await;
            tracing::info!("shutdown requested while waiting for containers");
            return Ok(());
        }
        joined = &mut wait => joined.map_err(|e| join_err("container_wait", e))??,
    }

    {
        let config = config.clone();
        let docker = docker.clone();
        tokio::task::spawn_blocking(move || {
            services::apply_templates(&config, Some(&docker), false)
        })
        .await
        .map_err(|e| join_err("apply_templates", e))??;
    }

    sync_loop(runner, config.cycle.clone(), shutdown_rx).await
}

async fn sync_loop(
    runner: Arc<CycleRunner>,
    cycle: CycleSettings,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut retried = false;
    loop {
        tracing::info!("starting sync");
        let task_runner = runner.clone();
        let report = tokio::task::spawn_blocking(move || task_runner.run_cycle(false))
            .await
            .map_err(|e| join_err("sync_cycle", e))?;
        log_report(&report);

        let delay = next_delay(&report, &cycle, retried);
        retried = delay.is_zero();
        if delay.is_zero() {
            tracing::warn!("retrying cycle immediately");
        } else {
            tracing::info!(seconds = delay.as_secs(), "sleeping until next cycle");
        }
        if !sleep_or_shutdown(delay, &mut shutdown_rx).await {
            break;
        }
    }
    tracing::info!("sync loop stopped");
    Ok(())
}

/// Pause before the next cycle.
///
/// A failure during the apply phase retries once without pausing when the
/// policy asks for it; every other failure waits the retry interval.
pub fn next_delay(report: &CycleReport, cycle: &CycleSettings, retried_already: bool) -> Duration {
    if report.succeeded() {
        return cycle.sync_interval();
    }
    if report.failed_during_apply
        && cycle.on_mutation_error == MutationErrorPolicy::ImmediateRetry
        && !retried_already
    {
        return Duration::ZERO;
    }
    cycle.retry_interval()
}

/// Sleep for `delay`; returns `false` when shutdown was requested first.
pub async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_rx.recv() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn signal_task(
    shutdown: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    tokio::select! {
        _ = shutdown_rx.recv() => Ok(()),
        signal = wait_for_signal() => {
            signal?;
            let _ = shutdown.send(());
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<(), DaemonError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).map_err(|e| DaemonError::Signal(e.to_string()))?;
    tokio::select! {
        ctrl_c = tokio::signal::ctrl_c() => {
            ctrl_c.map_err(|e| DaemonError::Signal(e.to_string()))?;
            tracing::info!("received ctrl-c, shutting down");
        }
        _ = terminate.recv() => tracing::info!("received SIGTERM, shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<(), DaemonError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| DaemonError::Signal(e.to_string()))?;
    tracing::info!("received ctrl-c, shutting down");
    Ok(())
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(join_err(task, err)),
    }
}

fn log_effective_config(config: &SyncConfig) {
    match serde_json::to_string(&config.redacted()) {
        Ok(json) => tracing::info!(config = %json, "effective configuration"),
        Err(err) => tracing::warn!(error = %err, "could not serialize configuration"),
    }
}

// Counts only; the plan itself may carry generated passwords.
fn log_report(report: &CycleReport) {
    let counts = serde_json::to_string(&report.counts).unwrap_or_default();
    let duration_ms = (report.finished_at - report.started_at).num_milliseconds();
    if report.succeeded() {
        tracing::info!(
            applied = report.applied,
            counts = %counts,
            duration_ms,
            "sync finished successfully"
        );
    } else {
        tracing::error!(
            applied = report.applied,
            failed_during_apply = report.failed_during_apply,
            error = report.error.as_deref().unwrap_or("unknown error"),
            counts = %counts,
            "sync failed"
        );
    }
}

/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use mailsync_core::config::ListDelivery;
    use mailsync_reconcile::{CyclePhase, Plan};
    use tokio_test::{assert_pending, assert_ready};

    use super::*;

    fn cycle(policy: MutationErrorPolicy) -> CycleSettings {
        CycleSettings {
            sync_interval_secs: 300,
            retry_interval_secs: 30,
            domain_quota: 1024,
            enable_gal: true,
            list_delivery: ListDelivery::Filter,
            on_mutation_error: policy,
        }
    }

    fn report(phase: CyclePhase, failed_during_apply: bool) -> CycleReport {
        let now = Utc::now();
        CycleReport {
            phase,
            dry_run: false,
            counts: BTreeMap::new(),
            applied: 0,
            started_at: now,
            finished_at: now,
            error: (phase == CyclePhase::Failed).then(|| "boom".to_string()),
            failed_during_apply,
            plan: Plan::default(),
        }
    }

    #[test]
    fn success_waits_sync_interval() {
        let delay = next_delay(
            &report(CyclePhase::Done, false),
            &cycle(MutationErrorPolicy::ImmediateRetry),
            false,
        );
        assert_eq!(delay, Duration::from_secs(300));
    }

    #[test]
    fn fetch_failure_waits_retry_interval() {
        let delay = next_delay(
            &report(CyclePhase::Failed, false),
            &cycle(MutationErrorPolicy::ImmediateRetry),
            false,
        );
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn apply_failure_retries_once_immediately() {
        let settings = cycle(MutationErrorPolicy::ImmediateRetry);
        let failed = report(CyclePhase::Failed, true);
        assert_eq!(next_delay(&failed, &settings, false), Duration::ZERO);
        assert_eq!(next_delay(&failed, &settings, true), Duration::from_secs(30));
    }

    #[test]
    fn next_cycle_policy_never_retries_immediately() {
        let delay = next_delay(
            &report(CyclePhase::Failed, true),
            &cycle(MutationErrorPolicy::NextCycle),
            false,
        );
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn sleep_runs_to_completion_without_shutdown() {
        let (_tx, mut rx) = broadcast::channel::<()>(1);
        assert!(sleep_or_shutdown(Duration::from_secs(300), &mut rx).await);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn shutdown_interrupts_sleep() {
        let (tx, mut rx) = broadcast::channel::<()>(1);
        let mut sleep = tokio_test::task::spawn(sleep_or_shutdown(Duration::from_secs(300), &mut rx));
        assert_pending!(sleep.poll());

        tx.send(()).expect("send");
        assert!(sleep.is_woken());
        assert!(!assert_ready!(sleep.poll()));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn shutdown_received_mid_cycle_wins_over_zero_delay() {
        let (tx, mut rx) = broadcast::channel::<()>(1);
        tx.send(()).expect("send");
        assert!(!sleep_or_shutdown(Duration::ZERO, &mut rx).await);
    }
}
