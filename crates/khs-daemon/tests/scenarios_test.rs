//! End-to-end scenarios wiring the scheduler, chunking, rule-split,
//! progress, agent lifecycle, and hashlist-completion modules together
//! against a shared in-memory store.

use khs_core::config::SystemConfig;
use khs_core::rule_split;
use khs_core::store::Store;
use khs_core::types::{
    Agent, AgentBenchmark, AgentStatus, AgentSyncStatus, AttackMode, Hashlist, JobExecution,
    JobExecutionStatus, JobTask, JobTaskStatus,
};
use khs_daemon::agent_lifecycle;
use khs_daemon::hashlist_completion::complete_hashlist;
use khs_daemon::progress;
use khs_daemon::scheduler::{DispatchDecision, JobScheduler};
use khs_protocol::event_bus::EventBus;
use uuid::Uuid;

async fn store_with_hashlist(total: i64, cracked: i64) -> (Store, i64) {
    let store = Store::open_in_memory().await.unwrap();
    let id = store
        .hashlists
        .create(Hashlist {
            id: 0,
            client_id: None,
            name: "hl".into(),
            hash_type: 0,
            total,
            cracked,
            created_at: chrono::Utc::now(),
            file_path: "/tmp/hl.txt".into(),
            retention_months: None,
        })
        .await
        .unwrap();
    (store, id)
}

fn sample_job(hashlist_id: i64, base_keyspace: i64, multiplication_factor: i64, max_agents: u32) -> JobExecution {
    let effective = base_keyspace.saturating_mul(multiplication_factor);
    JobExecution {
        id: Uuid::new_v4(),
        name: "job".into(),
        hashlist_id,
        attack_mode: AttackMode::Straight,
        wordlist_ids: vec![1],
        rule_ids: vec![],
        mask: None,
        hash_type: 0,
        binary_version: "6.2.6".into(),
        priority: 0,
        chunk_duration_seconds: 1200,
        max_agents,
        allow_high_priority_override: false,
        additional_args: None,
        status: JobExecutionStatus::Pending,
        processed_keyspace: 0,
        dispatched_keyspace: 0,
        total_keyspace: None,
        base_keyspace: Some(base_keyspace),
        multiplication_factor: Some(multiplication_factor),
        effective_keyspace: Some(effective),
        is_accurate_keyspace: true,
        uses_rule_splitting: false,
        rule_split_count: None,
        consecutive_failures: 0,
        error_message: None,
        created_by: Uuid::new_v4(),
        created_at: chrono::Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

fn enabled_agent(id: i64) -> Agent {
    Agent {
        id,
        name: format!("rig-{id}"),
        api_key: "key".into(),
        status: AgentStatus::Active,
        is_enabled: true,
        sync_status: AgentSyncStatus::Synced,
        scheduling_enabled: true,
        last_heartbeat: Some(chrono::Utc::now()),
        last_seen: Some(chrono::Utc::now()),
        hardware: None,
        os_info: None,
        consecutive_failures: 0,
        enabled_device_count: 1,
    }
}

async fn register_and_benchmark(store: &Store, name: &str, speed: f64) -> i64 {
    let id = store.agents.register(name, "key").await.unwrap();
    store.agents.record_heartbeat(id).await.unwrap();
    store
        .benchmarks
        .upsert(AgentBenchmark {
            agent_id: id,
            attack_mode: AttackMode::Straight,
            hash_type: 0,
            hashes_per_second: speed,
            measured_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
    id
}

/// Scenario 1: straight attack, 1M-line wordlist, no rules, one agent at
/// 1000 H/s, 1200s chunk duration -- the first chunk absorbs the whole
/// keyspace as its "tail", and the job completes once the agent reports
/// full progress.
#[tokio::test]
async fn scenario_1_straight_attack_single_chunk_absorbs_whole_job() {
    let (store, hashlist_id) = store_with_hashlist(0, 0).await;
    let job = sample_job(hashlist_id, 1_000_000, 1, 0);
    store.jobs.create(job.clone()).await.unwrap();
    let agent_id = register_and_benchmark(&store, "rig-1", 1000.0).await;

    let config = SystemConfig::default();
    let scheduler = JobScheduler::new();
    let decisions = scheduler.tick(&store, &config).await.unwrap();

    assert_eq!(decisions.len(), 1);
    let DispatchDecision::TaskAssigned { task_id, .. } = decisions[0] else {
        panic!("expected a task assignment, got {:?}", decisions[0]);
    };
    let task = store.tasks.get(task_id).await.unwrap();
    assert_eq!((task.keyspace_start, task.keyspace_end), (0, 1_000_000));

    store.tasks.record_progress(task_id, 1_000_000, None, 0).await.unwrap();
    store.tasks.transition_status(task_id, JobTaskStatus::Completed).await.unwrap();
    let processed = progress::recompute_job(&store, job.id).await.unwrap();
    assert_eq!(processed, 1_000_000);

    store.jobs.transition_status(job.id, JobExecutionStatus::Running).await.ok();
    store.jobs.transition_status(job.id, JobExecutionStatus::Completed).await.unwrap();
    let finished = store.jobs.get(job.id).await.unwrap();
    assert_eq!(finished.progress_percent(), Some(100.0));
}

/// Scenario 2: a rule-heavy straight attack crosses the split threshold
/// and produces a capped, plausible split count.
#[tokio::test]
async fn scenario_2_rule_heavy_job_activates_splitting_within_cap() {
    let base_keyspace = 1_000_000;
    let rule_count = 100_000;
    let benchmark = 1.0e9;

    let active = rule_split::should_split(true, base_keyspace, rule_count, 100, 1200, 2.0, Some(benchmark));
    assert!(active, "a job this rule-heavy should trip the split threshold");

    let splits = rule_split::split_count(base_keyspace, rule_count, 1200, Some(benchmark), 1000);
    assert!(splits >= 1 && splits <= 1000, "split count must stay within the configured cap");
}

/// Scenario 3: a combination attack's effective keyspace stays unknown
/// until the first benchmark reports progress against it.
#[tokio::test]
async fn scenario_3_combination_attack_keyspace_unknown_until_first_benchmark() {
    let (store, hashlist_id) = store_with_hashlist(0, 0).await;
    let mut job = sample_job(hashlist_id, 10_000, 100, 0);
    job.effective_keyspace = None;
    job.is_accurate_keyspace = false;
    store.jobs.create(job.clone()).await.unwrap();

    let fetched = store.jobs.get(job.id).await.unwrap();
    assert_eq!(fetched.base_keyspace, Some(10_000));
    assert_eq!(fetched.multiplication_factor, Some(100));
    assert_eq!(fetched.effective_keyspace, None);
    assert_eq!(fetched.progress_percent(), None);

    store.jobs.record_keyspace_calculation(job.id, 10_000, 100, Some(1_000_000)).await.unwrap();
    let refreshed = store.jobs.get(job.id).await.unwrap();
    assert_eq!(refreshed.effective_keyspace, Some(1_000_000));
}

/// Scenario 4: with `max_agents = 2` and three idle eligible agents, only
/// two get dispatched; the third stays idle.
#[tokio::test]
async fn scenario_4_max_agents_limits_concurrent_dispatch() {
    let (store, hashlist_id) = store_with_hashlist(0, 0).await;
    let job = sample_job(hashlist_id, 10_000_000, 1, 2);
    store.jobs.create(job.clone()).await.unwrap();

    let mut agent_ids = Vec::new();
    for name in ["rig-1", "rig-2", "rig-3"] {
        agent_ids.push(register_and_benchmark(&store, name, 1000.0).await);
    }

    let config = SystemConfig::default();
    let scheduler = JobScheduler::new();
    let decisions = scheduler.tick(&store, &config).await.unwrap();

    let assigned: Vec<i64> = decisions
        .iter()
        .filter_map(|d| match d {
            DispatchDecision::TaskAssigned { agent_id, .. } => Some(*agent_id),
            _ => None,
        })
        .collect();
    assert_eq!(assigned.len(), 2, "max_agents=2 caps dispatch to two agents this tick");
    assert!(assigned.iter().all(|id| agent_ids.contains(id)));
}

/// Scenario 5: an agent disconnects mid-task; the task moves to
/// `reconnect_pending` preserving its processed progress; on grace
/// expiry it is released back to `pending` still holding that progress,
/// so a fresh agent resumes from 500,000, not from zero.
#[tokio::test]
async fn scenario_5_disconnect_then_grace_expiry_resumes_from_last_progress() {
    let (store, hashlist_id) = store_with_hashlist(0, 0).await;
    let job = sample_job(hashlist_id, 1_000_000, 1, 0);
    store.jobs.create(job.clone()).await.unwrap();

    let agent_id = store.agents.register("rig-1", "key").await.unwrap();
    store.agents.record_heartbeat(agent_id).await.unwrap();

    let now = chrono::Utc::now();
    let task = JobTask {
        id: Uuid::new_v4(),
        job_id: job.id,
        agent_id: Some(agent_id),
        status: JobTaskStatus::Running,
        keyspace_start: 0,
        keyspace_end: 1_000_000,
        keyspace_processed: 500_000,
        effective_keyspace_start: None,
        effective_keyspace_end: None,
        effective_keyspace_processed: None,
        benchmark_speed: Some(1000.0),
        chunk_duration_seconds: Some(1200),
        retry_count: 0,
        last_progress_at: Some(now),
        rule_start_index: None,
        rule_end_index: None,
        rule_chunk_path: None,
        is_rule_split_task: false,
        crack_count: 0,
        error_message: None,
        created_at: now,
        updated_at: now,
    };
    store.tasks.create(task.clone()).await.unwrap();

    // Agent goes silent: its heartbeat predates the cutoff, its task moves
    // to reconnect_pending.
    let heartbeat_cutoff = chrono::Utc::now() + chrono::Duration::seconds(1);
    let grace_cutoff = chrono::Utc::now() - chrono::Duration::hours(1);
    let report = agent_lifecycle::sweep_stale_agents(&store, heartbeat_cutoff, grace_cutoff)
        .await
        .unwrap();
    assert_eq!(report.moved_to_reconnect_pending, 1);
    let reconnecting = store.tasks.get(task.id).await.unwrap();
    assert_eq!(reconnecting.status, JobTaskStatus::ReconnectPending);
    assert_eq!(reconnecting.keyspace_processed, 500_000);

    // Grace window expires before the agent returns: the task releases to
    // pending, keeping its progress, so the next pickup resumes at 500,000.
    let heartbeat_cutoff = chrono::Utc::now() + chrono::Duration::seconds(1);
    let grace_cutoff = chrono::Utc::now() + chrono::Duration::seconds(1);
    let report = agent_lifecycle::sweep_stale_agents(&store, heartbeat_cutoff, grace_cutoff)
        .await
        .unwrap();
    assert_eq!(report.released_after_grace_expired, 1);
    let released = store.tasks.get(task.id).await.unwrap();
    assert_eq!(released.status, JobTaskStatus::Pending);
    assert_eq!(released.agent_id, None);
    assert_eq!(released.keyspace_processed, 500_000, "resumed progress must not reset to zero");
}

/// Scenario 6: a ten-hash hashlist reaches full crack while two tasks are
/// still running -- both get stop commands, both tasks cancel, and the
/// job completes at 100%.
#[tokio::test]
async fn scenario_6_hashlist_fully_cracked_stops_all_running_agents() {
    let (store, hashlist_id) = store_with_hashlist(10, 10).await;
    let mut job = sample_job(hashlist_id, 1000, 1, 0);
    job.status = JobExecutionStatus::Running;
    store.jobs.create(job.clone()).await.unwrap();

    let first_agent = enabled_agent(1);
    let second_agent = enabled_agent(2);
    let mut task_ids = Vec::new();
    for agent in [&first_agent, &second_agent] {
        let now = chrono::Utc::now();
        let task = JobTask {
            id: Uuid::new_v4(),
            job_id: job.id,
            agent_id: Some(agent.id),
            status: JobTaskStatus::Running,
            keyspace_start: 0,
            keyspace_end: 500,
            keyspace_processed: 100,
            effective_keyspace_start: None,
            effective_keyspace_end: None,
            effective_keyspace_processed: None,
            benchmark_speed: None,
            chunk_duration_seconds: Some(1200),
            retry_count: 0,
            last_progress_at: None,
            rule_start_index: None,
            rule_end_index: None,
            rule_chunk_path: None,
            is_rule_split_task: false,
            crack_count: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        store.tasks.create(task.clone()).await.unwrap();
        task_ids.push(task.id);
    }

    let events = EventBus::new();
    let stop_commands = complete_hashlist(&store, &events, hashlist_id).await.unwrap();

    assert_eq!(stop_commands.len(), 2);
    for task_id in &task_ids {
        let task = store.tasks.get(*task_id).await.unwrap();
        assert_eq!(task.status, JobTaskStatus::Cancelled);
    }
    let finished = store.jobs.get(job.id).await.unwrap();
    assert_eq!(finished.status, JobExecutionStatus::Completed);
    assert_eq!(finished.progress_percent(), Some(100.0));
}
