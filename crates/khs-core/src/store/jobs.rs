//! `job_executions` repository.

use super::{enum_from_sql, enum_to_sql};
use crate::errors::StoreError;
use crate::types::{AttackMode, JobExecution, JobExecutionStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use tokio_rusqlite::Connection;
use tracing::instrument;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobRepository {
    conn: Connection,
}

impl JobRepository {
    pub(super) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    #[cfg(test)]
    pub(crate) fn connection_for_test(&self) -> Connection {
        self.conn.clone()
    }

    #[instrument(skip(self, job))]
    pub async fn create(&self, job: JobExecution) -> Result<(), StoreError> {
        let attack_mode_sql = enum_to_sql(&job.attack_mode)?;
        let status_sql = enum_to_sql(&job.status)?;
        let wordlist_ids = serde_json::to_string(&job.wordlist_ids)?;
        let rule_ids = serde_json::to_string(&job.rule_ids)?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO job_executions (
                        id, name, hashlist_id, attack_mode, wordlist_ids, rule_ids, mask,
                        hash_type, binary_version, priority, chunk_duration_seconds, max_agents,
                        allow_high_priority_override, additional_args, status,
                        processed_keyspace, dispatched_keyspace, total_keyspace, base_keyspace,
                        multiplication_factor, effective_keyspace, is_accurate_keyspace,
                        uses_rule_splitting, rule_split_count, consecutive_failures,
                        error_message, created_by, created_at, started_at, completed_at
                    ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,
                              ?20,?21,?22,?23,?24,?25,?26,?27,?28,?29,?30)",
                    params![
                        job.id.to_string(),
                        job.name,
                        job.hashlist_id,
                        attack_mode_sql,
                        wordlist_ids,
                        rule_ids,
                        job.mask,
                        job.hash_type,
                        job.binary_version,
                        job.priority,
                        job.chunk_duration_seconds as i64,
                        job.max_agents,
                        job.allow_high_priority_override,
                        job.additional_args,
                        status_sql,
                        job.processed_keyspace,
                        job.dispatched_keyspace,
                        job.total_keyspace,
                        job.base_keyspace,
                        job.multiplication_factor,
                        job.effective_keyspace,
                        job.is_accurate_keyspace,
                        job.uses_rule_splitting,
                        job.rule_split_count,
                        job.consecutive_failures,
                        job.error_message,
                        job.created_by.to_string(),
                        job.created_at.to_rfc3339(),
                        job.started_at.map(|t| t.to_rfc3339()),
                        job.completed_at.map(|t| t.to_rfc3339()),
                    ],
                )?;
                Ok(())
            })
            .await?
    }

    pub async fn get(&self, id: Uuid) -> Result<JobExecution, StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let job = conn.query_row(
                    "SELECT * FROM job_executions WHERE id = ?1",
                    params![id],
                    row_to_job,
                )?;
                Ok(job)
            })
            .await?
    }

    pub async fn list_by_status(
        &self,
        status: JobExecutionStatus,
    ) -> Result<Vec<JobExecution>, StoreError> {
        let status_sql = enum_to_sql(&status)?;
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM job_executions WHERE status = ?1
                     ORDER BY priority DESC, created_at ASC",
                )?;
                let rows = stmt
                    .query_map(params![status_sql], row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    /// Pending jobs in dispatch order: highest `priority` first, ties broken
    /// oldest-first.
    pub async fn list_dispatchable(&self) -> Result<Vec<JobExecution>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM job_executions
                     WHERE status IN ('pending', 'running')
                     ORDER BY priority DESC, created_at ASC",
                )?;
                let rows = stmt
                    .query_map([], row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    /// Non-terminal jobs targeting a hashlist — the completion handler's
    /// query for "every job still working this hashlist".
    pub async fn list_non_terminal_by_hashlist(
        &self,
        hashlist_id: i64,
    ) -> Result<Vec<JobExecution>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM job_executions
                     WHERE hashlist_id = ?1
                       AND status NOT IN ('completed', 'failed', 'cancelled')",
                )?;
                let rows = stmt
                    .query_map(params![hashlist_id], row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    /// Deletes a job outright — used for the §4.7 "zero tasks" case, where
    /// a job never started before its hashlist was fully cracked.
    pub async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM job_executions WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?
    }

    /// Validates the transition against [`JobExecutionStatus::can_transition_to`]
    /// before writing, so an illegal transition never reaches the row.
    #[instrument(skip(self))]
    pub async fn transition_status(
        &self,
        id: Uuid,
        to: JobExecutionStatus,
    ) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let to_sql = enum_to_sql(&to)?;
        self.conn
            .call(move |conn| {
                let current: String = conn.query_row(
                    "SELECT status FROM job_executions WHERE id = ?1",
                    params![id_str],
                    |row| row.get(0),
                )?;
                let current: JobExecutionStatus = enum_from_sql(&current)
                    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                if !current.can_transition_to(&to) {
                    return Err(tokio_rusqlite::Error::Other(Box::new(
                        StoreError::Constraint(format!(
                            "illegal job transition {current:?} -> {to:?}"
                        )),
                    )));
                }

                let now = Utc::now().to_rfc3339();
                if to == JobExecutionStatus::Running {
                    conn.execute(
                        "UPDATE job_executions SET status = ?1,
                         started_at = COALESCE(started_at, ?2) WHERE id = ?3",
                        params![to_sql, now, id_str],
                    )?;
                } else if to.is_terminal() {
                    conn.execute(
                        "UPDATE job_executions SET status = ?1, completed_at = ?2 WHERE id = ?3",
                        params![to_sql, now, id_str],
                    )?;
                } else {
                    conn.execute(
                        "UPDATE job_executions SET status = ?1 WHERE id = ?2",
                        params![to_sql, id_str],
                    )?;
                }
                Ok(())
            })
            .await?
    }

    /// Atomically reserves the next `len` keyspace units within the job's
    /// scheduling keyspace, advancing `dispatched_keyspace`.
    /// Returns `None` once the job has no remaining keyspace to dispatch.
    #[instrument(skip(self))]
    pub async fn reserve_keyspace(
        &self,
        id: Uuid,
        len: i64,
    ) -> Result<Option<(i64, i64)>, StoreError> {
        let id_str = id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let (dispatched, scheduling_keyspace): (i64, Option<i64>) = tx.query_row(
                    "SELECT dispatched_keyspace,
                            COALESCE(effective_keyspace, base_keyspace * COALESCE(multiplication_factor, 1))
                     FROM job_executions WHERE id = ?1",
                    params![id_str],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;

                let Some(total) = scheduling_keyspace else {
                    return Ok(None);
                };
                if dispatched >= total {
                    return Ok(None);
                }

                let start = dispatched;
                let end = (dispatched + len).min(total);
                tx.execute(
                    "UPDATE job_executions SET dispatched_keyspace = ?1 WHERE id = ?2",
                    params![end, id_str],
                )?;
                tx.commit()?;
                Ok(Some((start, end)))
            })
            .await?
    }

    pub async fn record_keyspace_calculation(
        &self,
        id: Uuid,
        base_keyspace: i64,
        multiplication_factor: i64,
        effective_keyspace: Option<i64>,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE job_executions SET base_keyspace = ?1, multiplication_factor = ?2,
                     effective_keyspace = ?3, is_accurate_keyspace = ?4 WHERE id = ?5",
                    params![
                        base_keyspace,
                        multiplication_factor,
                        effective_keyspace,
                        effective_keyspace.is_some(),
                        id
                    ],
                )?;
                Ok(())
            })
            .await?
    }

    pub async fn increment_processed_keyspace(&self, id: Uuid, delta: i64) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE job_executions SET processed_keyspace = processed_keyspace + ?1
                     WHERE id = ?2",
                    params![delta, id],
                )?;
                Ok(())
            })
            .await?
    }

    /// Overwrites `processed_keyspace` with an absolute value, used by the
    /// progress aggregator's recompute-from-tasks pass rather
    /// than the delta-based [`increment_processed_keyspace`].
    pub async fn set_processed_keyspace(&self, id: Uuid, value: i64) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE job_executions SET processed_keyspace = ?1 WHERE id = ?2",
                    params![value, id],
                )?;
                Ok(())
            })
            .await?
    }

    pub async fn record_failure(&self, id: Uuid, message: &str) -> Result<u32, StoreError> {
        let id = id.to_string();
        let message = message.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE job_executions SET consecutive_failures = consecutive_failures + 1,
                     error_message = ?1 WHERE id = ?2",
                    params![message, id],
                )?;
                let count: u32 = conn.query_row(
                    "SELECT consecutive_failures FROM job_executions WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?
    }

    pub async fn clear_failures(&self, id: Uuid) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE job_executions SET consecutive_failures = 0, error_message = NULL
                     WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await?
    }
}

fn row_to_job(row: &Row) -> rusqlite::Result<JobExecution> {
    let id: String = row.get("id")?;
    let created_by: String = row.get("created_by")?;
    let attack_mode_sql: String = row.get("attack_mode")?;
    let status_sql: String = row.get("status")?;
    let wordlist_ids: String = row.get("wordlist_ids")?;
    let rule_ids: String = row.get("rule_ids")?;
    let created_at: String = row.get("created_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;

    let to_err = |e: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };

    Ok(JobExecution {
        id: id.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text)
        })?,
        name: row.get("name")?,
        hashlist_id: row.get("hashlist_id")?,
        attack_mode: enum_from_sql::<AttackMode>(&attack_mode_sql).map_err(to_err)?,
        wordlist_ids: serde_json::from_str(&wordlist_ids).map_err(|e| to_err(e.into()))?,
        rule_ids: serde_json::from_str(&rule_ids).map_err(|e| to_err(e.into()))?,
        mask: row.get("mask")?,
        hash_type: row.get("hash_type")?,
        binary_version: row.get("binary_version")?,
        priority: row.get("priority")?,
        chunk_duration_seconds: row.get::<_, i64>("chunk_duration_seconds")? as u64,
        max_agents: row.get("max_agents")?,
        allow_high_priority_override: row.get("allow_high_priority_override")?,
        additional_args: row.get("additional_args")?,
        status: enum_from_sql::<JobExecutionStatus>(&status_sql).map_err(to_err)?,
        processed_keyspace: row.get("processed_keyspace")?,
        dispatched_keyspace: row.get("dispatched_keyspace")?,
        total_keyspace: row.get("total_keyspace")?,
        base_keyspace: row.get("base_keyspace")?,
        multiplication_factor: row.get("multiplication_factor")?,
        effective_keyspace: row.get("effective_keyspace")?,
        is_accurate_keyspace: row.get("is_accurate_keyspace")?,
        uses_rule_splitting: row.get("uses_rule_splitting")?,
        rule_split_count: row.get("rule_split_count")?,
        consecutive_failures: row.get("consecutive_failures")?,
        error_message: row.get("error_message")?,
        created_by: created_by.parse().map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "created_by".into(), rusqlite::types::Type::Text)
        })?,
        created_at: parse_rfc3339(&created_at)?,
        started_at: started_at.map(|s| parse_rfc3339(&s)).transpose()?,
        completed_at: completed_at.map(|s| parse_rfc3339(&s)).transpose()?,
    })
}

pub(super) fn parse_rfc3339(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| {
            rusqlite::Error::InvalidColumnType(0, "timestamp".into(), rusqlite::types::Type::Text)
        })
}
