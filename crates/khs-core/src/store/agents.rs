//! `agents` repository.

use super::jobs::parse_rfc3339;
use super::{enum_from_sql, enum_to_sql};
use crate::errors::StoreError;
use crate::types::{Agent, AgentStatus, AgentSyncStatus};
use chrono::Utc;
use rusqlite::{params, Row};
use tokio_rusqlite::Connection;

#[derive(Clone)]
pub struct AgentRepository {
    conn: Connection,
}

impl AgentRepository {
    pub(super) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn register(&self, name: &str, api_key: &str) -> Result<i64, StoreError> {
        let name = name.to_string();
        let api_key = api_key.to_string();
        let status_sql = enum_to_sql(&AgentStatus::Pending)?;
        let sync_sql = enum_to_sql(&AgentSyncStatus::NotSynced)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO agents (name, api_key, status, sync_status)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![name, api_key, status_sql, sync_sql],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?
    }

    pub async fn get(&self, id: i64) -> Result<Agent, StoreError> {
        self.conn
            .call(move |conn| {
                conn.query_row("SELECT * FROM agents WHERE id = ?1", params![id], row_to_agent)
            })
            .await?
    }

    pub async fn list_enabled(&self) -> Result<Vec<Agent>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT * FROM agents WHERE is_enabled = 1 AND scheduling_enabled = 1")?;
                let rows = stmt
                    .query_map([], row_to_agent)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    pub async fn record_heartbeat(&self, id: i64) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let status_sql = enum_to_sql(&AgentStatus::Active)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE agents SET last_heartbeat = ?1, last_seen = ?1, status = ?2,
                     consecutive_failures = 0 WHERE id = ?3",
                    params![now, status_sql, id],
                )?;
                Ok(())
            })
            .await?
    }

    /// Agents whose `last_heartbeat` predates `cutoff` and are still marked
    /// active — candidates for the stale/reconnect-grace transition
    ///.
    pub async fn list_stale(&self, cutoff: chrono::DateTime<Utc>) -> Result<Vec<Agent>, StoreError> {
        let cutoff = cutoff.to_rfc3339();
        let active_sql = enum_to_sql(&AgentStatus::Active)?;
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM agents
                     WHERE status = ?1
                       AND (last_heartbeat IS NULL OR last_heartbeat < ?2)",
                )?;
                let rows = stmt
                    .query_map(params![active_sql, cutoff], row_to_agent)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    pub async fn set_status(&self, id: i64, status: AgentStatus) -> Result<(), StoreError> {
        let status_sql = enum_to_sql(&status)?;
        self.conn
            .call(move |conn| {
                conn.execute("UPDATE agents SET status = ?1 WHERE id = ?2", params![status_sql, id])?;
                Ok(())
            })
            .await?
    }

    /// Set by the file-sync transport once an agent's wordlists/rules are
    /// confirmed in place. The scheduler never dispatches to an agent whose
    /// `sync_status` isn't `Synced`.
    pub async fn set_sync_status(&self, id: i64, status: AgentSyncStatus) -> Result<(), StoreError> {
        let status_sql = enum_to_sql(&status)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE agents SET sync_status = ?1 WHERE id = ?2",
                    params![status_sql, id],
                )?;
                Ok(())
            })
            .await?
    }

    pub async fn record_failure(&self, id: i64) -> Result<u32, StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE agents SET consecutive_failures = consecutive_failures + 1 WHERE id = ?1",
                    params![id],
                )?;
                let count: u32 = conn.query_row(
                    "SELECT consecutive_failures FROM agents WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?
    }
}

fn row_to_agent(row: &Row) -> rusqlite::Result<Agent> {
    let status_sql: String = row.get("status")?;
    let sync_sql: String = row.get("sync_status")?;
    let last_heartbeat: Option<String> = row.get("last_heartbeat")?;
    let last_seen: Option<String> = row.get("last_seen")?;

    let to_err = |e: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };

    Ok(Agent {
        id: row.get("id")?,
        name: row.get("name")?,
        api_key: row.get("api_key")?,
        status: enum_from_sql::<AgentStatus>(&status_sql).map_err(to_err)?,
        is_enabled: row.get("is_enabled")?,
        sync_status: enum_from_sql::<AgentSyncStatus>(&sync_sql).map_err(to_err)?,
        scheduling_enabled: row.get("scheduling_enabled")?,
        last_heartbeat: last_heartbeat.map(|s| parse_rfc3339(&s)).transpose()?,
        last_seen: last_seen.map(|s| parse_rfc3339(&s)).transpose()?,
        hardware: row.get("hardware")?,
        os_info: row.get("os_info")?,
        consecutive_failures: row.get("consecutive_failures")?,
        enabled_device_count: row.get("enabled_device_count")?,
    })
}
