//! krakenhashes coordinator daemon: loads configuration, opens the store,
//! and runs the scheduler, stale-task/agent sweeps, retention purge, and
//! potfile batch worker as independent interval loops until shutdown.

use anyhow::{Context, Result};
use khs_core::config::Config;
use khs_core::store::Store;
use khs_daemon::job_update::JobUpdateService;
use khs_daemon::scheduler::JobScheduler;
use khs_daemon::{agent_lifecycle, agent_messages, cleanup, potfile, retention};
use khs_protocol::event_bus::EventBus;
use khs_protocol::messages::AgentMessage;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    khs_telemetry::logging::init_logging("khs-daemon", "info");

    let config = Config::load().context("failed to load configuration")?;
    let store_path = expand_home(&config.store.path);
    info!(path = %store_path.display(), "opening store");
    let store = Store::open(&store_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to open store: {e}"))?;
    let event_bus = EventBus::new();

    info!("running startup reconciliation");
    match cleanup::startup_reconciliation(&store).await {
        Ok(report) => info!(
            failed_tasks = report.failed_tasks,
            demoted_jobs = report.demoted_jobs,
            "startup reconciliation complete"
        ),
        Err(e) => error!(error = %e, "startup reconciliation failed"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let job_update = JobUpdateService::new();

    // No wire transport is wired in yet; this channel is where a real
    // listener would hand decoded agent messages to the consumer loop
    // below. Nothing feeds it today, so the sender is held here only to
    // keep the channel open until a transport exists.
    let (agent_msg_tx, agent_msg_rx) = flume::unbounded::<AgentMessage>();
    let _agent_msg_tx = agent_msg_tx;

    let scheduler_handle = tokio::spawn(run_scheduler_loop(
        store.clone(),
        config.system.clone(),
        shutdown_rx.clone(),
    ));
    let agent_message_handle = tokio::spawn(run_agent_message_loop(
        store.clone(),
        event_bus.clone(),
        agent_msg_rx,
        shutdown_rx.clone(),
    ));
    let stale_sweep_handle = tokio::spawn(run_stale_sweep_loop(
        store.clone(),
        config.system.clone(),
        shutdown_rx.clone(),
    ));
    let cleanup_handle = tokio::spawn(run_cleanup_loop(
        store.clone(),
        config.system.clone(),
        expand_home(&config.paths.rule_chunk_root),
        shutdown_rx.clone(),
    ));
    let retention_handle = tokio::spawn(run_retention_loop(
        store.clone(),
        config.system.clone(),
        shutdown_rx.clone(),
    ));
    let potfile_handle = tokio::spawn(run_potfile_loop(
        store.clone(),
        job_update,
        config.system.clone(),
        config.paths.potfile_wordlist_id,
        expand_home(&config.paths.potfile_path),
        shutdown_rx.clone(),
    ));

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let _ = tokio::join!(
        scheduler_handle,
        agent_message_handle,
        stale_sweep_handle,
        cleanup_handle,
        retention_handle,
        potfile_handle
    );
    info!("khs-daemon exited cleanly");
    Ok(())
}

async fn run_agent_message_loop(
    store: Store,
    events: EventBus,
    agent_msg_rx: flume::Receiver<AgentMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            msg = agent_msg_rx.recv_async() => {
                match msg {
                    Ok(msg) => {
                        if let Err(e) = agent_messages::handle_agent_message(&store, &events, msg).await {
                            error!(error = %e, "agent message handling failed");
                        }
                    }
                    Err(_) => {
                        // All senders dropped (no transport wired in); nothing more will arrive.
                        return;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("agent message loop shutting down");
                    return;
                }
            }
        }
    }
}

async fn run_scheduler_loop(
    store: Store,
    config: khs_core::config::SystemConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let scheduler = JobScheduler::new();
    let mut tick = tokio::time::interval(Duration::from_secs(config.scheduler_tick_seconds));
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                match scheduler.tick(&store, &config).await {
                    Ok(decisions) if !decisions.is_empty() => {
                        info!(count = decisions.len(), "scheduler dispatch decisions made");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "scheduler tick failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scheduler loop shutting down");
                    return;
                }
            }
        }
    }
}

async fn run_stale_sweep_loop(
    store: Store,
    config: khs_core::config::SystemConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(config.stale_sweep_interval_seconds));
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let task_cutoff = chrono::Utc::now()
                    - chrono::Duration::minutes(config.task_heartbeat_timeout_minutes as i64);
                if let Err(e) = cleanup::sweep_stale_tasks(&store, task_cutoff, config.max_chunk_retry_attempts).await {
                    error!(error = %e, "stale task sweep failed");
                }

                let heartbeat_cutoff = chrono::Utc::now()
                    - chrono::Duration::minutes(config.task_heartbeat_timeout_minutes as i64);
                let grace_cutoff = chrono::Utc::now()
                    - chrono::Duration::minutes(
                        (config.task_heartbeat_timeout_minutes + config.reconnect_grace_minutes) as i64,
                    );
                match agent_lifecycle::sweep_stale_agents(&store, heartbeat_cutoff, grace_cutoff).await {
                    Ok(report) if report.moved_to_reconnect_pending > 0 || report.released_after_grace_expired > 0 => {
                        warn!(
                            moved = report.moved_to_reconnect_pending,
                            released = report.released_after_grace_expired,
                            "agent sweep made changes"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "agent sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("stale sweep loop shutting down");
                    return;
                }
            }
        }
    }
}

async fn run_retention_loop(
    store: Store,
    config: khs_core::config::SystemConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(
        config.retention_sweep_interval_hours * 3600,
    ));
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                match retention::run_retention_sweep(&store, config.default_data_retention_months).await {
                    Ok(report) if report.purged > 0 => info!(purged = report.purged, "retention sweep purged hashlists"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "retention sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("retention loop shutting down");
                    return;
                }
            }
        }
    }
}

async fn run_potfile_loop(
    store: Store,
    job_update: JobUpdateService,
    config: khs_core::config::SystemConfig,
    potfile_wordlist_id: i64,
    potfile_path: PathBuf,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(config.potfile_batch_interval_seconds));
    tick.tick().await;
    let mut last_line_count: Option<i64> = None;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                match potfile::run_potfile_batch(&store, &potfile_path, config.potfile_max_batch_size).await {
                    Ok(Some(report)) => {
                        info!(
                            appended = report.appended,
                            duplicates = report.duplicates_skipped,
                            line_count = report.metadata.line_count,
                            "potfile batch flushed"
                        );
                        let new_line_count = report.metadata.line_count as i64;
                        if let Some(old_line_count) = last_line_count {
                            if new_line_count != old_line_count {
                                if let Err(e) = apply_potfile_growth(
                                    &store,
                                    &job_update,
                                    potfile_wordlist_id,
                                    old_line_count,
                                    new_line_count,
                                ).await {
                                    error!(error = %e, "failed to propagate potfile growth to dependent jobs");
                                }
                            }
                        }
                        last_line_count = Some(new_line_count);
                    }
                    Ok(None) => {}
                    Err(e) => error!(error = %e, "potfile batch failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("potfile loop shutting down");
                    return;
                }
            }
        }
    }
}

/// Finds every non-terminal job that references the potfile as a wordlist
/// and recomputes its keyspace for the new line count.
async fn apply_potfile_growth(
    store: &Store,
    job_update: &JobUpdateService,
    potfile_wordlist_id: i64,
    old_line_count: i64,
    new_line_count: i64,
) -> Result<(), khs_daemon::DaemonError> {
    use khs_core::types::JobExecutionStatus;

    let mut affected = Vec::new();
    for status in [JobExecutionStatus::Pending, JobExecutionStatus::Running] {
        affected.extend(
            store
                .jobs
                .list_by_status(status)
                .await?
                .into_iter()
                .filter(|job| job.wordlist_ids.contains(&potfile_wordlist_id)),
        );
    }

    if affected.is_empty() {
        return Ok(());
    }

    job_update
        .apply_wordlist_change(store, affected, old_line_count, new_line_count)
        .await
}

async fn run_cleanup_loop(
    store: Store,
    config: khs_core::config::SystemConfig,
    rule_chunk_root: PathBuf,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(config.stale_sweep_interval_seconds));
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                match cleanup::sweep_rule_chunk_directories(&store, &rule_chunk_root).await {
                    Ok(removed) if removed > 0 => info!(removed, "reclaimed rule chunk directories for terminal jobs"),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "rule chunk directory sweep failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("cleanup loop shutting down");
                    return;
                }
            }
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
