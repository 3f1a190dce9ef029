//! Hashlist Completion Handler. Triggered either by the
//! authoritative "all hashes cracked" signal from a task's cracking binary,
//! or by the periodic check finding `cracked = total` for a hashlist.
//! Idempotent: jobs already terminal are excluded by
//! `list_non_terminal_by_hashlist`, so a repeat call is a no-op.

use crate::error::DaemonError;
use khs_core::store::Store;
use khs_core::types::{JobExecutionStatus, JobTaskStatus};
use khs_protocol::event_bus::{DomainEvent, EventBus};
use uuid::Uuid;

/// An agent that needs a stop command for a task this handler cancelled.
#[derive(Debug, Clone, PartialEq)]
pub struct StopCommand {
    pub agent_id: i64,
    pub task_id: Uuid,
}

/// Runs the completion actions for a hashlist that just became (or was
/// found to be) fully cracked, without re-reading the cracked-count from
/// the store — the caller's signal is trusted as-is.
pub async fn complete_hashlist(
    store: &Store,
    events: &EventBus,
    hashlist_id: i64,
) -> Result<Vec<StopCommand>, DaemonError> {
    let jobs = store.jobs.list_non_terminal_by_hashlist(hashlist_id).await?;
    let mut stop_commands = Vec::new();

    for job in jobs {
        let tasks = store.tasks.list_by_job(job.id).await?;
        if tasks.is_empty() {
            store.jobs.delete(job.id).await?;
            continue;
        }

        for task in &tasks {
            if task.status.is_active() {
                if let Some(agent_id) = task.agent_id {
                    stop_commands.push(StopCommand { agent_id, task_id: task.id });
                }
                store.tasks.transition_status(task.id, JobTaskStatus::Cancelled).await?;
            }
        }

        let full_progress = job.effective_keyspace.or(job.total_keyspace).unwrap_or(0);
        store.jobs.set_processed_keyspace(job.id, full_progress).await?;
        store
            .jobs
            .transition_status(job.id, JobExecutionStatus::Completed)
            .await?;
        events.publish(DomainEvent::JobCompleted { job_id: job.id });
    }

    events.publish(DomainEvent::HashlistFullyCracked { hashlist_id });
    Ok(stop_commands)
}
