//! Agent Lifecycle Manager: tracks agent connectivity purely
//! from store state — no in-memory registry of "who is connected" — and
//! drives the heartbeat-timeout -> reconnect-grace -> release-to-pending
//! sequence.

use crate::error::DaemonError;
use chrono::{DateTime, Utc};
use khs_core::store::Store;
use khs_core::types::JobTaskStatus;
use tracing::info;

/// Records a heartbeat from an agent, resetting its consecutive-failure
/// counter and marking it `active`.
pub async fn record_heartbeat(store: &Store, agent_id: i64) -> Result<(), DaemonError> {
    store.agents.record_heartbeat(agent_id).await?;
    Ok(())
}

/// Outcome of one stale-agent sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgentSweepReport {
    pub moved_to_reconnect_pending: usize,
    pub released_after_grace_expired: usize,
}

/// Agents whose heartbeat predates `heartbeat_cutoff` have their active
/// tasks moved to `reconnect_pending` so dispatch logic leaves them alone
/// during the grace window; agents whose tasks are *already*
/// `reconnect_pending` and predate `grace_cutoff` (the longer of the two
/// windows) have those tasks released back to `pending` for re-dispatch
///.
pub async fn sweep_stale_agents(
    store: &Store,
    heartbeat_cutoff: DateTime<Utc>,
    grace_cutoff: DateTime<Utc>,
) -> Result<AgentSweepReport, DaemonError> {
    let mut report = AgentSweepReport::default();

    let newly_stale = store.agents.list_stale(heartbeat_cutoff).await?;
    for agent in &newly_stale {
        let held = store.tasks.list_by_agent(agent.id).await?;
        for task in held.iter().filter(|t| t.status.is_active()) {
            store.tasks.transition_status(task.id, JobTaskStatus::ReconnectPending).await?;
            report.moved_to_reconnect_pending += 1;
        }
        info!(agent_id = agent.id, "agent heartbeat stale, tasks held for reconnect grace");
    }

    let grace_expired = store.agents.list_stale(grace_cutoff).await?;
    for agent in &grace_expired {
        let held = store.tasks.list_by_agent(agent.id).await?;
        for task in held.iter().filter(|t| t.status == JobTaskStatus::ReconnectPending) {
            store.tasks.release_to_pending(task.id).await?;
            report.released_after_grace_expired += 1;
        }
    }

    Ok(report)
}
