//! Job Scheduler main loop: each tick picks dispatchable jobs,
//! pairs them with eligible agents, and either requests a benchmark or
//! reserves a chunk and assigns a task.

use crate::benchmark_cache::{self, BenchmarkLookup};
use crate::chunking;
use crate::error::DaemonError;
use dashmap::DashMap;
use khs_core::config::SystemConfig;
use khs_core::store::Store;
use khs_core::types::{
    Agent, AgentStatus, AgentSyncStatus, CurrentAssignment, JobExecution, JobExecutionStatus,
    JobTask, JobTaskStatus,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What the scheduler decided to do for one `(job, agent)` pair this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchDecision {
    BenchmarkRequested { agent_id: i64, attack_mode: khs_core::types::AttackMode, hash_type: i32 },
    TaskAssigned { task_id: Uuid, agent_id: i64, job_id: Uuid },
    NoCapacityRemaining,
}

/// True once a job has no more keyspace left to dispatch.
fn job_needs_dispatch(job: &JobExecution) -> bool {
    match job.scheduling_keyspace() {
        Some(total) => job.dispatched_keyspace < total,
        None => true, // keyspace not yet known (M>1 awaiting first benchmark) — still a candidate
    }
}

fn job_has_agent_capacity(active_agents_on_job: usize, max_agents: u32) -> bool {
    max_agents == 0 || (active_agents_on_job as u32) < max_agents
}

fn agent_has_capacity(active_tasks_on_agent: usize, max_concurrent_jobs_per_agent: u32) -> bool {
    (active_tasks_on_agent as u32) < max_concurrent_jobs_per_agent
}

/// Keeps an advisory, reconciled-at-use record of what each agent is
/// currently assigned, without it ever being treated as authoritative.
#[derive(Clone)]
pub struct JobScheduler {
    busy: Arc<DashMap<i64, CurrentAssignment>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self { busy: Arc::new(DashMap::new()) }
    }

    pub fn busy_hint(&self, agent_id: i64) -> Option<CurrentAssignment> {
        self.busy.get(&agent_id).map(|r| r.clone())
    }

    /// Runs one scheduling tick: for every dispatchable job, pair it with
    /// eligible agents up to the job's `max_agents` limit, and for each
    /// pair either request a benchmark or dispatch a task.
    pub async fn tick(&self, store: &Store, config: &SystemConfig) -> Result<Vec<DispatchDecision>, DaemonError> {
        let jobs = store.jobs.list_dispatchable().await?;
        let agents = store.agents.list_enabled().await?;
        let mut decisions = Vec::new();

        for job in jobs {
            if !job_needs_dispatch(&job) {
                continue;
            }

            let job_tasks = store.tasks.list_by_job(job.id).await?;
            let mut active_agents_on_job: usize =
                job_tasks.iter().filter(|t| t.status.is_active()).count();

            for agent in &agents {
                if !job_has_agent_capacity(active_agents_on_job, job.max_agents) {
                    break;
                }
                if !agent_eligible(agent, config) {
                    continue;
                }

                let mut agent_tasks = store.tasks.list_by_agent(agent.id).await?;
                self.reconcile_busy_hint(agent.id, &agent_tasks);

                let mut active_on_agent =
                    agent_tasks.iter().filter(|t| t.status.is_active()).count();
                if !agent_has_capacity(active_on_agent, config.max_concurrent_jobs_per_agent) {
                    if config.job_interruption_enabled
                        && job.allow_high_priority_override
                        && self.preempt_lower_priority(store, &job, &agent_tasks).await?
                    {
                        agent_tasks = store.tasks.list_by_agent(agent.id).await?;
                        active_on_agent = agent_tasks.iter().filter(|t| t.status.is_active()).count();
                    }
                    if !agent_has_capacity(active_on_agent, config.max_concurrent_jobs_per_agent) {
                        continue;
                    }
                }

                let decision = self.dispatch_pair(store, config, &job, agent).await?;
                if let DispatchDecision::TaskAssigned { .. } = &decision {
                    active_agents_on_job += 1;
                    if job.status == JobExecutionStatus::Pending {
                        store.jobs.transition_status(job.id, JobExecutionStatus::Running).await?;
                    }
                }
                decisions.push(decision);
            }
        }

        Ok(decisions)
    }

    /// Dispatch logic for a single `(job, agent)` pair.
    async fn dispatch_pair(
        &self,
        store: &Store,
        config: &SystemConfig,
        job: &JobExecution,
        agent: &Agent,
    ) -> Result<DispatchDecision, DaemonError> {
        let lookup: BenchmarkLookup = benchmark_cache::lookup(
            store,
            agent.id,
            job.attack_mode,
            job.hash_type,
            config.benchmark_cache_duration_hours,
        )
        .await?;

        if lookup.should_request_benchmark && !lookup.is_fresh {
            if lookup.speed_hashes_per_second.is_none() {
                return Ok(DispatchDecision::BenchmarkRequested {
                    agent_id: agent.id,
                    attack_mode: job.attack_mode,
                    hash_type: job.hash_type,
                });
            }
        }

        let Some(speed) = lookup.speed_hashes_per_second else {
            return Ok(DispatchDecision::BenchmarkRequested {
                agent_id: agent.id,
                attack_mode: job.attack_mode,
                hash_type: job.hash_type,
            });
        };

        let Some(chunk) = chunking::reserve_chunk(
            store,
            job.id,
            speed,
            job.chunk_duration_seconds,
            config.chunk_fluctuation_percentage,
        )
        .await?
        else {
            return Ok(DispatchDecision::NoCapacityRemaining);
        };

        let now = chrono::Utc::now();
        let task = JobTask {
            id: Uuid::new_v4(),
            job_id: job.id,
            agent_id: Some(agent.id),
            status: JobTaskStatus::Assigned,
            keyspace_start: chunk.start,
            keyspace_end: chunk.end,
            keyspace_processed: 0,
            effective_keyspace_start: None,
            effective_keyspace_end: None,
            effective_keyspace_processed: None,
            benchmark_speed: Some(speed),
            chunk_duration_seconds: Some(job.chunk_duration_seconds),
            retry_count: 0,
            last_progress_at: None,
            rule_start_index: None,
            rule_end_index: None,
            rule_chunk_path: None,
            is_rule_split_task: job.uses_rule_splitting,
            crack_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        store.tasks.create(task.clone()).await?;

        self.busy.insert(
            agent.id,
            CurrentAssignment { task_id: task.id, job_id: job.id, since: now },
        );

        info!(job_id = %job.id, agent_id = agent.id, task_id = %task.id, "task dispatched");
        Ok(DispatchDecision::TaskAssigned { task_id: task.id, agent_id: agent.id, job_id: job.id })
    }

    /// Drops the busy hint for an agent once its task is no longer active
    /// (completion, failure, cancellation, or reconnect-pending demotion).
    pub fn clear_busy_hint(&self, agent_id: i64) {
        self.busy.remove(&agent_id);
    }

    /// Drops the busy hint if it no longer matches an active task the agent
    /// actually holds — the hint is advisory, the store's task list is
    /// authoritative.
    fn reconcile_busy_hint(&self, agent_id: i64, agent_tasks: &[JobTask]) {
        if let Some(hint) = self.busy_hint(agent_id) {
            let still_active = agent_tasks
                .iter()
                .any(|t| t.id == hint.task_id && t.status.is_active());
            if !still_active {
                self.clear_busy_hint(agent_id);
            }
        }
    }

    /// Demotes the agent's active tasks belonging to lower-priority jobs
    /// back to `pending` (keyspace reservation untouched) so `job` can claim
    /// the agent this tick. Returns `true` if anything was freed.
    async fn preempt_lower_priority(
        &self,
        store: &Store,
        job: &JobExecution,
        agent_tasks: &[JobTask],
    ) -> Result<bool, DaemonError> {
        let mut freed = false;
        for task in agent_tasks.iter().filter(|t| t.status.is_active()) {
            let running_job = store.jobs.get(task.job_id).await?;
            if running_job.id == job.id || running_job.priority >= job.priority {
                continue;
            }

            store.tasks.release_to_pending(task.id).await?;
            if running_job.status == JobExecutionStatus::Running {
                store
                    .jobs
                    .transition_status(running_job.id, JobExecutionStatus::Interrupted)
                    .await?;
            }
            if let Some(agent_id) = task.agent_id {
                self.clear_busy_hint(agent_id);
            }
            warn!(
                preempted_job_id = %running_job.id,
                preempting_job_id = %job.id,
                task_id = %task.id,
                "higher-priority job preempted lower-priority task"
            );
            freed = true;
        }
        Ok(freed)
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Eligibility checks that don't need a store round-trip: active, file-sync
/// complete, enabled, scheduling turned on (both globally and per-agent),
/// has at least one enabled compute device. Per-agent schedule windows
/// are not modeled; an agent with `scheduling_enabled` is treated as
/// always within its window.
fn agent_eligible(agent: &Agent, config: &SystemConfig) -> bool {
    agent.status == AgentStatus::Active
        && agent.sync_status == AgentSyncStatus::Synced
        && agent.is_enabled
        && agent.enabled_device_count > 0
        && (!config.agent_scheduling_enabled || agent.scheduling_enabled)
}
