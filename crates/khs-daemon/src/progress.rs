//! Progress Aggregator: rolls per-task progress reports up
//! into the job's `processed_keyspace`/`progress_percent`, and processes
//! crack events independently of progress (hash marked cracked, hashlist
//! cracked-count bumped, plaintext staged for the potfile).

use crate::error::DaemonError;
use khs_core::store::Store;
use khs_core::types::{JobExecution, JobTask};
use uuid::Uuid;

/// `Σ` over a job's tasks across three cases: rule-splitting,
/// multiplication factor without splitting, and the plain case.
pub fn aggregate_processed(job: &JobExecution, tasks: &[JobTask]) -> i64 {
    if job.uses_rule_splitting {
        tasks
            .iter()
            .map(|t| t.effective_keyspace_processed.unwrap_or_else(|| {
                let rules_in_chunk = match (t.rule_start_index, t.rule_end_index) {
                    (Some(s), Some(e)) => (e - s).max(0),
                    _ => 1,
                };
                t.keyspace_processed * rules_in_chunk
            }))
            .sum()
    } else if job.multiplication_factor.unwrap_or(1) > 1 {
        let factor = job.multiplication_factor.unwrap_or(1);
        tasks
            .iter()
            .map(|t| t.effective_keyspace_processed.unwrap_or(t.keyspace_processed * factor))
            .sum()
    } else {
        tasks.iter().map(|t| t.keyspace_processed).sum()
    }
}

/// Percent complete, unreported (`None`) until `effective_keyspace` is known
///.
pub fn progress_percent(total_processed: i64, effective_keyspace: Option<i64>) -> Option<f64> {
    let k_e = effective_keyspace?;
    if k_e <= 0 {
        return None;
    }
    Some((100.0 * total_processed as f64 / k_e as f64).clamp(0.0, 100.0))
}

/// Recomputes and persists `processed_keyspace` for one job from its
/// current tasks.
pub async fn recompute_job(store: &Store, job_id: Uuid) -> Result<i64, DaemonError> {
    let job = store.jobs.get(job_id).await?;
    let tasks = store.tasks.list_by_job(job_id).await?;
    let total = aggregate_processed(&job, &tasks);
    store.jobs.set_processed_keyspace(job_id, total).await?;
    Ok(total)
}

/// Applies a crack event: marks the hash cracked, stages its plaintext for
/// the potfile, and returns the ids of hashlists that became fully cracked
/// as a result. Progress updates and crack events are
/// processed independently, so this never touches `processed_keyspace`.
pub async fn record_crack(
    store: &Store,
    hash_value: &str,
    hash_type: i32,
    plaintext: &str,
) -> Result<Vec<i64>, DaemonError> {
    let newly_cracked = store.hashlists.mark_cracked(hash_value, hash_type, plaintext).await?;
    store.potfile.stage(plaintext, hash_value).await?;
    Ok(newly_cracked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use khs_core::types::{AttackMode, Hash, Hashlist, JobExecutionStatus, JobTaskStatus};

    fn base_job(uses_rule_splitting: bool, multiplication_factor: Option<i64>, effective_keyspace: Option<i64>) -> JobExecution {
        JobExecution {
            id: Uuid::new_v4(),
            name: "job".into(),
            hashlist_id: 1,
            attack_mode: AttackMode::Straight,
            wordlist_ids: vec![1],
            rule_ids: vec![],
            mask: None,
            hash_type: 0,
            binary_version: "6.2.6".into(),
            priority: 0,
            chunk_duration_seconds: 1200,
            max_agents: 0,
            allow_high_priority_override: false,
            additional_args: None,
            status: JobExecutionStatus::Running,
            processed_keyspace: 0,
            dispatched_keyspace: 0,
            total_keyspace: None,
            base_keyspace: effective_keyspace,
            multiplication_factor,
            effective_keyspace,
            is_accurate_keyspace: effective_keyspace.is_some(),
            uses_rule_splitting,
            rule_split_count: None,
            consecutive_failures: 0,
            error_message: None,
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn base_task(job_id: Uuid, keyspace_processed: i64, effective_keyspace_processed: Option<i64>) -> JobTask {
        JobTask {
            id: Uuid::new_v4(),
            job_id,
            agent_id: Some(1),
            status: JobTaskStatus::Running,
            keyspace_start: 0,
            keyspace_end: 1000,
            keyspace_processed,
            effective_keyspace_start: None,
            effective_keyspace_end: None,
            effective_keyspace_processed,
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
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn aggregate_processed_plain_case_sums_keyspace_processed() {
        let job = base_job(false, Some(1), Some(2000));
        let tasks = vec![base_task(job.id, 300, None), base_task(job.id, 200, None)];
        assert_eq!(aggregate_processed(&job, &tasks), 500);
    }

    #[test]
    fn aggregate_processed_multiplied_prefers_effective_field() {
        let job = base_job(false, Some(100), Some(100_000));
        let tasks = vec![base_task(job.id, 10, Some(900))];
        assert_eq!(aggregate_processed(&job, &tasks), 900);
    }

    #[test]
    fn aggregate_processed_multiplied_falls_back_to_product() {
        let job = base_job(false, Some(100), Some(100_000));
        let tasks = vec![base_task(job.id, 10, None)];
        assert_eq!(aggregate_processed(&job, &tasks), 1000);
    }

    #[test]
    fn aggregate_processed_rule_split_uses_effective_field() {
        let job = base_job(true, Some(500), Some(500_000));
        let tasks = vec![base_task(job.id, 10, Some(4_000))];
        assert_eq!(aggregate_processed(&job, &tasks), 4_000);
    }

    #[test]
    fn progress_percent_unreported_without_effective_keyspace() {
        assert_eq!(progress_percent(500, None), None);
    }

    #[test]
    fn progress_percent_clamps_to_100() {
        assert_eq!(progress_percent(2000, Some(1000)), Some(100.0));
    }

    async fn store_with_hashlist() -> (Store, i64) {
        let store = Store::open_in_memory().await.unwrap();
        let id = store
            .hashlists
            .create(Hashlist {
                id: 0,
                client_id: None,
                name: "hl".into(),
                hash_type: 0,
                total: 0,
                cracked: 0,
                created_at: Utc::now(),
                file_path: "/tmp/hl.txt".into(),
                retention_months: None,
            })
            .await
            .unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn recompute_job_persists_aggregated_total() {
        let (store, hashlist_id) = store_with_hashlist().await;
        let mut job = base_job(false, Some(1), Some(2000));
        job.hashlist_id = hashlist_id;
        store.jobs.create(job.clone()).await.unwrap();

        let mut task = base_task(job.id, 750, None);
        task.keyspace_end = 1000;
        store.tasks.create(task).await.unwrap();

        let total = recompute_job(&store, job.id).await.unwrap();
        assert_eq!(total, 750);
        let fetched = store.jobs.get(job.id).await.unwrap();
        assert_eq!(fetched.processed_keyspace, 750);
    }

    #[tokio::test]
    async fn record_crack_stages_potfile_and_reports_full_crack() {
        let (store, hashlist_id) = store_with_hashlist().await;
        store
            .hashlists
            .insert_hash(
                hashlist_id,
                Hash {
                    id: Uuid::new_v4(),
                    hash_type: 0,
                    hash_value: "aaa".into(),
                    username: None,
                    is_cracked: false,
                    plaintext: None,
                },
            )
            .await
            .unwrap();

        let fully_cracked = record_crack(&store, "aaa", 0, "hunter2").await.unwrap();
        assert_eq!(fully_cracked, vec![hashlist_id]);

        let batch = store.potfile.next_batch(10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].password, "hunter2");
    }
}
