//! `job_tasks` repository.

use super::jobs::parse_rfc3339;
use super::{enum_from_sql, enum_to_sql};
use crate::errors::StoreError;
use crate::types::{JobTask, JobTaskStatus};
use chrono::Utc;
use rusqlite::{params, Row};
use tokio_rusqlite::Connection;
use tracing::instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct TaskRepository {
    conn: Connection,
}

impl TaskRepository {
    pub(super) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    #[instrument(skip(self, task))]
    pub async fn create(&self, task: JobTask) -> Result<(), StoreError> {
        let status_sql = enum_to_sql(&task.status)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO job_tasks (
                        id, job_id, agent_id, status, keyspace_start, keyspace_end,
                        keyspace_processed, effective_keyspace_start, effective_keyspace_end,
                        effective_keyspace_processed, benchmark_speed, chunk_duration_seconds,
                        retry_count, last_progress_at, rule_start_index, rule_end_index,
                        rule_chunk_path, is_rule_split_task, crack_count, error_message,
                        created_at, updated_at
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,
                              ?20,?21,?22)",
                    params![
                        task.id.to_string(),
                        task.job_id.to_string(),
                        task.agent_id,
                        status_sql,
                        task.keyspace_start,
                        task.keyspace_end,
                        task.keyspace_processed,
                        task.effective_keyspace_start,
                        task.effective_keyspace_end,
                        task.effective_keyspace_processed,
                        task.benchmark_speed,
                        task.chunk_duration_seconds.map(|s| s as i64),
                        task.retry_count,
                        task.last_progress_at.map(|t| t.to_rfc3339()),
                        task.rule_start_index,
                        task.rule_end_index,
                        task.rule_chunk_path,
                        task.is_rule_split_task,
                        task.crack_count,
                        task.error_message,
                        task.created_at.to_rfc3339(),
                        task.updated_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await?
    }

    pub async fn get(&self, id: Uuid) -> Result<JobTask, StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT * FROM job_tasks WHERE id = ?1",
                    params![id],
                    row_to_task,
                )
            })
            .await?
    }

    pub async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<JobTask>, StoreError> {
        let job_id = job_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM job_tasks WHERE job_id = ?1 ORDER BY keyspace_start ASC",
                )?;
                let rows = stmt
                    .query_map(params![job_id], row_to_task)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    /// Tasks active (assigned/running) whose `last_progress_at` predates
    /// `cutoff` — candidates for the stale-task sweep.
    pub async fn list_stale(&self, cutoff: chrono::DateTime<Utc>) -> Result<Vec<JobTask>, StoreError> {
        let cutoff = cutoff.to_rfc3339();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM job_tasks
                     WHERE status IN ('assigned', 'running')
                       AND (last_progress_at IS NULL OR last_progress_at < ?1)",
                )?;
                let rows = stmt
                    .query_map(params![cutoff], row_to_task)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    /// Tasks an agent currently holds in an active state — used by the
    /// agent lifecycle manager to transition an agent's work on disconnect
    ///.
    pub async fn list_by_agent(&self, agent_id: i64) -> Result<Vec<JobTask>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM job_tasks
                     WHERE agent_id = ?1 AND status IN ('assigned', 'running', 'reconnect_pending')",
                )?;
                let rows = stmt
                    .query_map(params![agent_id], row_to_task)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    /// Every task left in `assigned`/`running` — used for startup
    /// reconciliation, where the coordinator process itself (not an agent)
    /// is the task's owner and a restart means none of them are still
    /// being worked.
    pub async fn list_active(&self) -> Result<Vec<JobTask>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT * FROM job_tasks WHERE status IN ('assigned', 'running')")?;
                let rows = stmt
                    .query_map([], row_to_task)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    /// Resets a task to `pending` with no owning agent while leaving its
    /// keyspace reservation intact, so re-dispatch resumes from the same
    /// slice.
    pub async fn release_to_pending(&self, id: Uuid) -> Result<(), StoreError> {
        let id = id.to_string();
        let status_sql = enum_to_sql(&JobTaskStatus::Pending)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE job_tasks SET agent_id = NULL, status = ?1, updated_at = ?2
                     WHERE id = ?3",
                    params![status_sql, now, id],
                )?;
                Ok(())
            })
            .await?
    }

    pub async fn assign(&self, id: Uuid, agent_id: i64) -> Result<(), StoreError> {
        let id = id.to_string();
        let status_sql = enum_to_sql(&JobTaskStatus::Assigned)?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE job_tasks SET agent_id = ?1, status = ?2, updated_at = ?3
                     WHERE id = ?4",
                    params![agent_id, status_sql, now, id],
                )?;
                Ok(())
            })
            .await?
    }

    #[instrument(skip(self))]
    pub async fn transition_status(&self, id: Uuid, to: JobTaskStatus) -> Result<(), StoreError> {
        let id = id.to_string();
        let to_sql = enum_to_sql(&to)?;
        self.conn
            .call(move |conn| {
                let current: String = conn.query_row(
                    "SELECT status FROM job_tasks WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                let current: JobTaskStatus = enum_from_sql(&current)
                    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                if current.is_terminal() {
                    return Err(tokio_rusqlite::Error::Other(Box::new(StoreError::Constraint(
                        format!("task already terminal ({current:?}), cannot move to {to:?}"),
                    ))));
                }
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    "UPDATE job_tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![to_sql, now, id],
                )?;
                Ok(())
            })
            .await?
    }

    /// Applies a progress update from an agent heartbeat: bumps
    /// `keyspace_processed`/`effective_keyspace_processed` to the reported
    /// absolute values and refreshes `last_progress_at`.
    pub async fn record_progress(
        &self,
        id: Uuid,
        keyspace_processed: i64,
        effective_keyspace_processed: Option<i64>,
        crack_count: u32,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE job_tasks SET keyspace_processed = ?1,
                     effective_keyspace_processed = ?2, crack_count = ?3,
                     last_progress_at = ?4, updated_at = ?4 WHERE id = ?5",
                    params![keyspace_processed, effective_keyspace_processed, crack_count, now, id],
                )?;
                Ok(())
            })
            .await?
    }

    pub async fn record_failure(&self, id: Uuid, message: &str) -> Result<u32, StoreError> {
        let id = id.to_string();
        let message = message.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE job_tasks SET retry_count = retry_count + 1,
                     error_message = ?1, updated_at = ?2 WHERE id = ?3",
                    params![message, now, id],
                )?;
                let count: u32 = conn.query_row(
                    "SELECT retry_count FROM job_tasks WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?
    }

    pub async fn set_rule_chunk(
        &self,
        id: Uuid,
        start_index: i64,
        end_index: i64,
        chunk_path: &str,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let chunk_path = chunk_path.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE job_tasks SET rule_start_index = ?1, rule_end_index = ?2,
                     rule_chunk_path = ?3, is_rule_split_task = 1 WHERE id = ?4",
                    params![start_index, end_index, chunk_path, id],
                )?;
                Ok(())
            })
            .await?
    }
}

fn row_to_task(row: &Row) -> rusqlite::Result<JobTask> {
    let id: String = row.get("id")?;
    let job_id: String = row.get("job_id")?;
    let status_sql: String = row.get("status")?;
    let last_progress_at: Option<String> = row.get("last_progress_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let to_err = |e: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };
    let bad_uuid = |col: &'static str| {
        rusqlite::Error::InvalidColumnType(0, col.into(), rusqlite::types::Type::Text)
    };

    Ok(JobTask {
        id: id.parse().map_err(|_| bad_uuid("id"))?,
        job_id: job_id.parse().map_err(|_| bad_uuid("job_id"))?,
        agent_id: row.get("agent_id")?,
        status: enum_from_sql::<JobTaskStatus>(&status_sql).map_err(to_err)?,
        keyspace_start: row.get("keyspace_start")?,
        keyspace_end: row.get("keyspace_end")?,
        keyspace_processed: row.get("keyspace_processed")?,
        effective_keyspace_start: row.get("effective_keyspace_start")?,
        effective_keyspace_end: row.get("effective_keyspace_end")?,
        effective_keyspace_processed: row.get("effective_keyspace_processed")?,
        benchmark_speed: row.get("benchmark_speed")?,
        chunk_duration_seconds: row
            .get::<_, Option<i64>>("chunk_duration_seconds")?
            .map(|s| s as u64),
        retry_count: row.get("retry_count")?,
        last_progress_at: last_progress_at.map(|s| parse_rfc3339(&s)).transpose()?,
        rule_start_index: row.get("rule_start_index")?,
        rule_end_index: row.get("rule_end_index")?,
        rule_chunk_path: row.get("rule_chunk_path")?,
        is_rule_split_task: row.get("is_rule_split_task")?,
        crack_count: row.get("crack_count")?,
        error_message: row.get("error_message")?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
    })
}
