//! Agent message consumer: turns the subset of `AgentMessage` that carries
//! task/job state (`TaskStatus`, `JobProgress`) into store writes and the
//! downstream reactions those writes require — progress rollup, crack
//! processing, and hashlist completion. Other variants (heartbeats,
//! benchmark/hardware reports, file-sync) are handled by their own
//! components and are ignored here.

use crate::error::DaemonError;
use crate::{hashlist_completion, progress};
use khs_core::store::Store;
use khs_core::types::JobTaskStatus;
use khs_protocol::event_bus::EventBus;
use khs_protocol::messages::AgentMessage;
use tracing::warn;

/// Maps the wire status string to the task state machine, or `None` for an
/// unrecognized value — the caller logs and drops the message rather than
/// failing the whole consumer loop over one bad report.
fn parse_task_status(status: &str) -> Option<JobTaskStatus> {
    match status {
        "pending" => Some(JobTaskStatus::Pending),
        "assigned" => Some(JobTaskStatus::Assigned),
        "running" => Some(JobTaskStatus::Running),
        "completed" => Some(JobTaskStatus::Completed),
        "failed" => Some(JobTaskStatus::Failed),
        "cancelled" => Some(JobTaskStatus::Cancelled),
        "reconnect_pending" => Some(JobTaskStatus::ReconnectPending),
        _ => None,
    }
}

/// Applies one agent-reported message against the store, publishing
/// whatever domain events fall out of it.
pub async fn handle_agent_message(
    store: &Store,
    events: &EventBus,
    msg: AgentMessage,
) -> Result<(), DaemonError> {
    match msg {
        AgentMessage::TaskStatus { task_id, status, error_message } => {
            let Some(new_status) = parse_task_status(&status) else {
                warn!(task_id = %task_id, status, "unrecognized task status, dropping");
                return Ok(());
            };

            if let Some(message) = &error_message {
                store.tasks.record_failure(task_id, message).await?;
            }
            store.tasks.transition_status(task_id, new_status).await?;

            let task = store.tasks.get(task_id).await?;
            progress::recompute_job(store, task.job_id).await?;

            if new_status == JobTaskStatus::Completed {
                let job = store.jobs.get(task.job_id).await?;
                let hashlist = store.hashlists.get(job.hashlist_id).await?;
                if hashlist.is_fully_cracked() {
                    hashlist_completion::complete_hashlist(store, events, hashlist.id).await?;
                }
            }
        }

        AgentMessage::JobProgress {
            task_id,
            keyspace_processed,
            effective_keyspace_processed,
            crack_count,
            cracks,
        } => {
            store
                .tasks
                .record_progress(task_id, keyspace_processed, effective_keyspace_processed, crack_count)
                .await?;

            let task = store.tasks.get(task_id).await?;
            progress::recompute_job(store, task.job_id).await?;

            let mut newly_cracked_hashlists = Vec::new();
            for crack in cracks {
                let ids = progress::record_crack(store, &crack.hash_value, crack.hash_type, &crack.plaintext).await?;
                newly_cracked_hashlists.extend(ids);
            }
            for hashlist_id in newly_cracked_hashlists {
                hashlist_completion::complete_hashlist(store, events, hashlist_id).await?;
            }
        }

        _ => {}
    }

    Ok(())
}
