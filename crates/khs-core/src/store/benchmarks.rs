//! `agent_benchmarks` repository — the Benchmark Cache's persistent
//! backing store.

use super::jobs::parse_rfc3339;
use super::{enum_from_sql, enum_to_sql};
use crate::errors::StoreError;
use crate::types::{AgentBenchmark, AttackMode};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

#[derive(Clone)]
pub struct BenchmarkRepository {
    conn: Connection,
}

impl BenchmarkRepository {
    pub(super) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn upsert(&self, benchmark: AgentBenchmark) -> Result<(), StoreError> {
        let attack_mode_sql = enum_to_sql(&benchmark.attack_mode)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO agent_benchmarks (agent_id, attack_mode, hash_type,
                        hashes_per_second, measured_at)
                     VALUES (?1,?2,?3,?4,?5)
                     ON CONFLICT(agent_id, attack_mode, hash_type) DO UPDATE SET
                        hashes_per_second = excluded.hashes_per_second,
                        measured_at = excluded.measured_at",
                    params![
                        benchmark.agent_id,
                        attack_mode_sql,
                        benchmark.hash_type,
                        benchmark.hashes_per_second,
                        benchmark.measured_at.to_rfc3339(),
                    ],
                )?;
                Ok(())
            })
            .await?
    }

    /// Exact `(agent, attack_mode, hash_type)` lookup, the cache's primary
    /// hit path.
    pub async fn get(
        &self,
        agent_id: i64,
        attack_mode: AttackMode,
        hash_type: i32,
    ) -> Result<Option<AgentBenchmark>, StoreError> {
        let attack_mode_sql = enum_to_sql(&attack_mode)?;
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT * FROM agent_benchmarks
                     WHERE agent_id = ?1 AND attack_mode = ?2 AND hash_type = ?3",
                    params![agent_id, attack_mode_sql, hash_type],
                    row_to_benchmark,
                )
                .optional()
            })
            .await?
    }

    /// Every benchmark recorded for the agent, used when no exact
    /// `(attack_mode, hash_type)` hit exists and a sibling-mode estimate
    /// must be derived.
    pub async fn list_for_agent(&self, agent_id: i64) -> Result<Vec<AgentBenchmark>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT * FROM agent_benchmarks WHERE agent_id = ?1")?;
                let rows = stmt
                    .query_map(params![agent_id], row_to_benchmark)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    pub async fn is_stale(&self, measured_at: DateTime<Utc>, max_age_hours: u64) -> bool {
        let age = Utc::now() - measured_at;
        age > chrono::Duration::hours(max_age_hours as i64)
    }
}

fn row_to_benchmark(row: &Row) -> rusqlite::Result<AgentBenchmark> {
    let attack_mode_sql: String = row.get("attack_mode")?;
    let measured_at: String = row.get("measured_at")?;
    let to_err = |e: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    };
    Ok(AgentBenchmark {
        agent_id: row.get("agent_id")?,
        attack_mode: enum_from_sql::<AttackMode>(&attack_mode_sql).map_err(to_err)?,
        hash_type: row.get("hash_type")?,
        hashes_per_second: row.get("hashes_per_second")?,
        measured_at: parse_rfc3339(&measured_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn sample(agent_id: i64) -> AgentBenchmark {
        AgentBenchmark {
            agent_id,
            attack_mode: AttackMode::Straight,
            hash_type: 0,
            hashes_per_second: 1.0e9,
            measured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_then_get_returns_latest() {
        let store = Store::open_in_memory().await.unwrap();
        let agent_id = store.agents.register("rig-1", "key").await.unwrap();

        store.benchmarks.upsert(sample(agent_id)).await.unwrap();
        let mut second = sample(agent_id);
        second.hashes_per_second = 2.0e9;
        store.benchmarks.upsert(second).await.unwrap();

        let fetched = store
            .benchmarks
            .get(agent_id, AttackMode::Straight, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.hashes_per_second, 2.0e9);
    }

    #[tokio::test]
    async fn get_returns_none_for_unmeasured_combination() {
        let store = Store::open_in_memory().await.unwrap();
        let agent_id = store.agents.register("rig-1", "key").await.unwrap();
        let result = store
            .benchmarks
            .get(agent_id, AttackMode::BruteForce, 1000)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn is_stale_respects_max_age() {
        let store = Store::open_in_memory().await.unwrap();
        let old = Utc::now() - chrono::Duration::hours(200);
        assert!(store.benchmarks.is_stale(old, 168).await);
        assert!(!store.benchmarks.is_stale(Utc::now(), 168).await);
    }
}
