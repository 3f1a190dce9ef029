//! Cleanup & startup reconciliation: a periodic-sweep pattern
//! that queries the store directly for stale state rather than relying on
//! an in-memory registry of what's in flight.

use crate::error::DaemonError;
use chrono::{DateTime, Utc};
use khs_core::rule_split;
use khs_core::store::Store;
use khs_core::types::{AgentStatus, JobExecutionStatus, JobTaskStatus};
use std::path::Path;
use tracing::warn;
use uuid::Uuid;

/// Terminal job statuses whose rule-chunk directories are reclaimable.
const TERMINAL_JOB_STATUSES: [JobExecutionStatus; 3] = [
    JobExecutionStatus::Completed,
    JobExecutionStatus::Failed,
    JobExecutionStatus::Cancelled,
];

/// Outcome of the one-time startup reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconciliationReport {
    pub failed_tasks: usize,
    pub demoted_jobs: usize,
}

/// On service start, tasks left `assigned`/`running` by a previous process
/// have no live owner; fail them outright. Jobs left `running` are demoted
/// to `pending` so the scheduler re-dispatches them.
pub async fn startup_reconciliation(store: &Store) -> Result<ReconciliationReport, DaemonError> {
    let orphaned_tasks = store.tasks.list_active().await?;
    for task in &orphaned_tasks {
        store.tasks.record_failure(task.id, "coordinator restarted").await?;
        store.tasks.transition_status(task.id, JobTaskStatus::Failed).await?;
    }

    let running_jobs = store.jobs.list_by_status(JobExecutionStatus::Running).await?;
    for job in &running_jobs {
        store
            .jobs
            .transition_status(job.id, JobExecutionStatus::Pending)
            .await?;
    }

    Ok(ReconciliationReport {
        failed_tasks: orphaned_tasks.len(),
        demoted_jobs: running_jobs.len(),
    })
}

/// Outcome of one periodic stale-task sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StaleSweepReport {
    pub reset_for_retry: usize,
    pub terminally_failed: usize,
}

/// Tasks not updated since `cutoff` either reset for retry (keyspace
/// reservation intact) or terminally fail, bumping job/agent
/// consecutive-failure counters. Three consecutive failures fail the job
/// or move the agent to `error`.
pub async fn sweep_stale_tasks(
    store: &Store,
    cutoff: DateTime<Utc>,
    max_chunk_retry_attempts: u32,
) -> Result<StaleSweepReport, DaemonError> {
    let stale = store.tasks.list_stale(cutoff).await?;
    let mut report = StaleSweepReport::default();

    for task in &stale {
        if task.retry_count < max_chunk_retry_attempts {
            store.tasks.release_to_pending(task.id).await?;
            report.reset_for_retry += 1;
            continue;
        }

        store.tasks.transition_status(task.id, JobTaskStatus::Failed).await?;
        let job_failures = store
            .jobs
            .record_failure(task.job_id, "task exceeded max retry attempts")
            .await?;
        if job_failures >= 3 {
            store
                .jobs
                .transition_status(task.job_id, JobExecutionStatus::Failed)
                .await?;
        }

        if let Some(agent_id) = task.agent_id {
            let agent_failures = store.agents.record_failure(agent_id).await?;
            if agent_failures >= 3 {
                store.agents.set_status(agent_id, AgentStatus::Error).await?;
                warn!(agent_id, "agent moved to error after repeated task failures");
            }
        }
        report.terminally_failed += 1;
    }

    Ok(report)
}

/// Removes a job's rule-chunk directory once every one of its tasks has
/// reached a terminal state; a no-op (returns `false`) while any task is
/// still active.
pub async fn cleanup_job_rule_chunks(
    store: &Store,
    rule_chunk_root: &Path,
    job_id: Uuid,
) -> Result<bool, DaemonError> {
    let tasks = store.tasks.list_by_job(job_id).await?;
    if !tasks.iter().all(|t| t.status.is_terminal()) {
        return Ok(false);
    }
    let dir = rule_split::job_dir(rule_chunk_root, job_id);
    rule_split::cleanup_job_directory(&dir)?;
    Ok(true)
}

/// Runs `cleanup_job_rule_chunks` over every terminal job, reclaiming the
/// rule-chunk directories of jobs whose tasks have all settled. Idempotent:
/// a job whose directory was already removed on a prior pass is a no-op.
pub async fn sweep_rule_chunk_directories(
    store: &Store,
    rule_chunk_root: &Path,
) -> Result<usize, DaemonError> {
    let mut removed = 0;
    for status in TERMINAL_JOB_STATUSES {
        for job in store.jobs.list_by_status(status).await? {
            if cleanup_job_rule_chunks(store, rule_chunk_root, job.id).await? {
                removed += 1;
            }
        }
    }
    Ok(removed)
}
