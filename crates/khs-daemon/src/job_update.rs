//! Job Update Service: reacts to a wordlist or rule file's
//! line/rule count changing by finding every non-terminal job referencing
//! it and recomputing `multiplication_factor`/`effective_keyspace`.
//!
//! Each job update takes a per-job lock so a wordlist edit and a
//! concurrent dispatch never race on the same job's keyspace fields; the
//! service also exposes a coarse "system updating" flag the scheduler
//! polls to back off briefly rather than dispatch against stale numbers.

use crate::error::DaemonError;
use dashmap::DashMap;
use khs_core::store::Store;
use khs_core::types::JobExecution;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Result of recomputing a job's keyspace after a referenced wordlist or
/// rule file's size changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeOutcome {
    /// New `effective_keyspace`, replacing the old one.
    Updated(i64),
    /// The already-dispatched rule range already covers the new rule
    /// count; no further work remains for this job.
    EffectivelyComplete,
}

/// No tasks dispatched yet: the job hasn't started consuming keyspace, so
/// the new count simply recomputes `K_e = K_b * M` directly.
pub fn recompute_without_tasks(new_base_keyspace: i64, multiplication_factor: i64) -> i64 {
    new_base_keyspace * multiplication_factor
}

/// Wordlist line count changed by `delta = new - old` on a rule-splitting
/// job that already has dispatched tasks. Words already combined with
/// rules up to `rule_end_max` can't retroactively include the new lines,
/// so that slice of the delta is lost work, not gained.
pub fn recompute_wordlist_growth_with_tasks(
    new_word_count: i64,
    multiplication_factor: i64,
    delta: i64,
    rule_end_max: i64,
) -> i64 {
    new_word_count * multiplication_factor - delta * rule_end_max
}

/// Rule file's rule count changed on a job with no dispatched tasks yet:
/// plain product recompute.
pub fn recompute_rule_growth_without_tasks(base_keyspace: i64, new_rule_count: i64) -> i64 {
    base_keyspace * new_rule_count
}

/// Rule file's rule count changed on a job that already dispatched rule
/// chunks up to `rule_end_max`. If the new total no longer exceeds what's
/// already been dispatched, the job has nothing left to do; otherwise the
/// new total becomes the target and future chunks resume from
/// `rule_end_max`.
pub fn recompute_rule_growth_with_tasks(
    base_keyspace: i64,
    new_rule_count: i64,
    rule_end_max: i64,
) -> RecomputeOutcome {
    if new_rule_count <= rule_end_max {
        RecomputeOutcome::EffectivelyComplete
    } else {
        RecomputeOutcome::Updated(base_keyspace * new_rule_count)
    }
}

/// The highest rule-chunk end index dispatched so far across a job's
/// tasks, or `0` if none have been assigned a rule chunk yet.
fn rule_end_max(tasks: &[khs_core::types::JobTask]) -> i64 {
    tasks.iter().filter_map(|t| t.rule_end_index).max().unwrap_or(0)
}

/// Serializes keyspace recomputation per job and exposes a coarse
/// "updating" flag the scheduler can poll before dispatching.
#[derive(Clone)]
pub struct JobUpdateService {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    updating: Arc<AtomicBool>,
}

impl JobUpdateService {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            updating: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True while any job update is in flight; the scheduler treats this
    /// as a signal to briefly defer new dispatch decisions.
    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    fn lock_for(&self, job_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.entry(job_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Applies a wordlist line-count change to every non-terminal job that
    /// references `wordlist_id`.
    pub async fn apply_wordlist_change(
        &self,
        store: &Store,
        jobs: Vec<JobExecution>,
        old_line_count: i64,
        new_line_count: i64,
    ) -> Result<(), DaemonError> {
        let delta = new_line_count - old_line_count;
        for job in jobs {
            let lock = self.lock_for(job.id);
            let _guard = lock.lock().await;
            self.updating.store(true, Ordering::Release);

            let tasks = store.tasks.list_by_job(job.id).await?;
            let multiplication_factor = job.multiplication_factor.unwrap_or(1);

            let new_effective = if tasks.is_empty() {
                recompute_without_tasks(new_line_count, multiplication_factor)
            } else {
                recompute_wordlist_growth_with_tasks(
                    new_line_count,
                    multiplication_factor,
                    delta,
                    rule_end_max(&tasks),
                )
            };

            store
                .jobs
                .record_keyspace_calculation(
                    job.id,
                    new_line_count,
                    multiplication_factor,
                    Some(new_effective),
                )
                .await?;
            self.updating.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Applies a rule file's rule-count change to every non-terminal job
    /// that references it.
    pub async fn apply_rule_change(
        &self,
        store: &Store,
        jobs: Vec<JobExecution>,
        new_rule_count: i64,
    ) -> Result<(), DaemonError> {
        for job in jobs {
            let lock = self.lock_for(job.id);
            let _guard = lock.lock().await;
            self.updating.store(true, Ordering::Release);

            let tasks = store.tasks.list_by_job(job.id).await?;
            let base = job.base_keyspace.unwrap_or(0);

            let outcome = if tasks.is_empty() {
                RecomputeOutcome::Updated(recompute_rule_growth_without_tasks(base, new_rule_count))
            } else {
                recompute_rule_growth_with_tasks(base, new_rule_count, rule_end_max(&tasks))
            };

            if let RecomputeOutcome::Updated(new_effective) = outcome {
                store
                    .jobs
                    .record_keyspace_calculation(job.id, base, new_rule_count, Some(new_effective))
                    .await?;
            }
            self.updating.store(false, Ordering::Release);
        }
        Ok(())
    }
}

impl Default for JobUpdateService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use khs_core::types::{AttackMode, Hashlist, JobExecutionStatus, JobTask, JobTaskStatus};

    #[test]
    fn recompute_without_tasks_is_plain_product() {
        assert_eq!(recompute_without_tasks(2000, 3), 6000);
    }

    #[test]
    fn wordlist_growth_subtracts_missed_work_for_dispatched_rules() {
        // 100 new words, factor 5, but 40 rules already dispatched can't
        // retroactively combine with words added after dispatch.
        let delta = 100;
        let result = recompute_wordlist_growth_with_tasks(1100, 5, delta, 40);
        assert_eq!(result, 1100 * 5 - 100 * 40);
    }

    #[test]
    fn rule_growth_without_tasks_is_plain_product() {
        assert_eq!(recompute_rule_growth_without_tasks(1000, 50), 50_000);
    }

    #[test]
    fn rule_growth_with_tasks_completes_when_new_count_already_covered() {
        let outcome = recompute_rule_growth_with_tasks(1000, 40, 40);
        assert_eq!(outcome, RecomputeOutcome::EffectivelyComplete);
    }

    #[test]
    fn rule_growth_with_tasks_updates_when_new_count_exceeds_dispatched() {
        let outcome = recompute_rule_growth_with_tasks(1000, 60, 40);
        assert_eq!(outcome, RecomputeOutcome::Updated(60_000));
    }

    async fn store_with_job(with_rule_chunk: bool) -> (Store, JobExecution) {
        let store = Store::open_in_memory().await.unwrap();
        let hashlist_id = store
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

        let job = JobExecution {
            id: Uuid::new_v4(),
            name: "job".into(),
            hashlist_id,
            attack_mode: AttackMode::Straight,
            wordlist_ids: vec![1],
            rule_ids: vec![1],
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
            base_keyspace: Some(1000),
            multiplication_factor: Some(5),
            effective_keyspace: Some(5000),
            is_accurate_keyspace: true,
            uses_rule_splitting: true,
            rule_split_count: Some(2),
            consecutive_failures: 0,
            error_message: None,
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        store.jobs.create(job.clone()).await.unwrap();

        if with_rule_chunk {
            let task = JobTask {
                id: Uuid::new_v4(),
                job_id: job.id,
                agent_id: None,
                status: JobTaskStatus::Running,
                keyspace_start: 0,
                keyspace_end: 2500,
                keyspace_processed: 0,
                effective_keyspace_start: None,
                effective_keyspace_end: None,
                effective_keyspace_processed: None,
                benchmark_speed: None,
                chunk_duration_seconds: Some(1200),
                retry_count: 0,
                last_progress_at: None,
                rule_start_index: Some(0),
                rule_end_index: Some(2),
                rule_chunk_path: Some("/tmp/chunk0.rule".into()),
                is_rule_split_task: true,
                crack_count: 0,
                error_message: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            store.tasks.create(task).await.unwrap();
        }

        (store, job)
    }

    #[tokio::test]
    async fn apply_wordlist_change_without_tasks_recomputes_directly() {
        let (store, job) = store_with_job(false).await;
        let service = JobUpdateService::new();

        service.apply_wordlist_change(&store, vec![job.clone()], 1000, 1200).await.unwrap();

        let fetched = store.jobs.get(job.id).await.unwrap();
        assert_eq!(fetched.base_keyspace, Some(1200));
        assert_eq!(fetched.effective_keyspace, Some(6000));
        assert!(!service.is_updating());
    }

    #[tokio::test]
    async fn apply_wordlist_change_with_tasks_subtracts_missed_work() {
        let (store, job) = store_with_job(true).await;
        let service = JobUpdateService::new();

        // +200 words, rules already dispatched up through index 2.
        service.apply_wordlist_change(&store, vec![job.clone()], 1000, 1200).await.unwrap();

        let fetched = store.jobs.get(job.id).await.unwrap();
        assert_eq!(fetched.effective_keyspace, Some(1200 * 5 - 200 * 2));
    }

    #[tokio::test]
    async fn apply_rule_change_with_tasks_leaves_job_untouched_when_already_covered() {
        let (store, job) = store_with_job(true).await;
        let service = JobUpdateService::new();

        service.apply_rule_change(&store, vec![job.clone()], 2).await.unwrap();

        let fetched = store.jobs.get(job.id).await.unwrap();
        // unchanged: rule_end_max (2) >= new_rule_count (2)
        assert_eq!(fetched.effective_keyspace, Some(5000));
    }
}
