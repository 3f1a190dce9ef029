//! Async SQLite-backed persistence layer. One repository struct per
//! aggregate, all sharing a single [`tokio_rusqlite::Connection`] handed
//! out from one `Store`.

pub mod agents;
pub mod benchmarks;
pub mod hashlists;
pub mod jobs;
pub mod potfile;
pub mod tasks;

use std::path::Path;
use tokio_rusqlite::Connection;

pub use agents::AgentRepository;
pub use benchmarks::BenchmarkRepository;
pub use hashlists::HashlistRepository;
pub use jobs::JobRepository;
pub use potfile::PotfileRepository;
pub use tasks::TaskRepository;

/// Owns the database connection and hands out one repository per aggregate.
#[derive(Clone)]
pub struct Store {
    pub jobs: JobRepository,
    pub tasks: TaskRepository,
    pub hashlists: HashlistRepository,
    pub agents: AgentRepository,
    pub benchmarks: BenchmarkRepository,
    pub potfile: PotfileRepository,
}

impl Store {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, tokio_rusqlite::Error> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::from_connection(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, tokio_rusqlite::Error> {
        let conn = Connection::open_in_memory().await?;
        Self::from_connection(conn).await
    }

    async fn from_connection(conn: Connection) -> Result<Self, tokio_rusqlite::Error> {
        init_schema(&conn).await?;
        Ok(Self {
            jobs: JobRepository::new(conn.clone()),
            tasks: TaskRepository::new(conn.clone()),
            hashlists: HashlistRepository::new(conn.clone()),
            agents: AgentRepository::new(conn.clone()),
            benchmarks: BenchmarkRepository::new(conn.clone()),
            potfile: PotfileRepository::new(conn),
        })
    }
}

/// Round-trips a `#[serde(rename_all = "snake_case")]` enum through its
/// quoted JSON form so it can sit in a plain TEXT column (teacher's
/// `enum_to_sql`/`enum_from_sql` pattern).
pub(crate) fn enum_to_sql<T: serde::Serialize>(value: &T) -> Result<String, crate::errors::StoreError> {
    let json = serde_json::to_string(value)?;
    Ok(json.trim_matches('"').to_string())
}

pub(crate) fn enum_from_sql<T: serde::de::DeserializeOwned>(
    text: &str,
) -> Result<T, crate::errors::StoreError> {
    Ok(serde_json::from_str(&format!("\"{text}\""))?)
}

async fn init_schema(conn: &Connection) -> Result<(), tokio_rusqlite::Error> {
    conn.call(|conn| {
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS clients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                retention_months INTEGER
            );

            CREATE TABLE IF NOT EXISTS hashlists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                client_id INTEGER REFERENCES clients(id) ON DELETE SET NULL,
                name TEXT NOT NULL,
                hash_type INTEGER NOT NULL,
                total INTEGER NOT NULL DEFAULT 0,
                cracked INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                file_path TEXT NOT NULL,
                retention_months INTEGER
            );

            CREATE TABLE IF NOT EXISTS hashes (
                id TEXT PRIMARY KEY,
                hash_type INTEGER NOT NULL,
                hash_value TEXT NOT NULL,
                username TEXT,
                is_cracked INTEGER NOT NULL DEFAULT 0,
                plaintext TEXT
            );

            CREATE TABLE IF NOT EXISTS hashlist_hashes (
                hashlist_id INTEGER NOT NULL REFERENCES hashlists(id) ON DELETE CASCADE,
                hash_id TEXT NOT NULL REFERENCES hashes(id) ON DELETE CASCADE,
                PRIMARY KEY (hashlist_id, hash_id)
            );

            CREATE TABLE IF NOT EXISTS job_executions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                hashlist_id INTEGER NOT NULL REFERENCES hashlists(id),
                attack_mode INTEGER NOT NULL,
                wordlist_ids TEXT NOT NULL,
                rule_ids TEXT NOT NULL,
                mask TEXT,
                hash_type INTEGER NOT NULL,
                binary_version TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                chunk_duration_seconds INTEGER NOT NULL,
                max_agents INTEGER NOT NULL DEFAULT 0,
                allow_high_priority_override INTEGER NOT NULL DEFAULT 0,
                additional_args TEXT,
                status TEXT NOT NULL,
                processed_keyspace INTEGER NOT NULL DEFAULT 0,
                dispatched_keyspace INTEGER NOT NULL DEFAULT 0,
                total_keyspace INTEGER,
                base_keyspace INTEGER,
                multiplication_factor INTEGER,
                effective_keyspace INTEGER,
                is_accurate_keyspace INTEGER NOT NULL DEFAULT 0,
                uses_rule_splitting INTEGER NOT NULL DEFAULT 0,
                rule_split_count INTEGER,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_status ON job_executions(status);
            CREATE INDEX IF NOT EXISTS idx_jobs_hashlist ON job_executions(hashlist_id);

            CREATE TABLE IF NOT EXISTS job_tasks (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES job_executions(id) ON DELETE CASCADE,
                agent_id INTEGER,
                status TEXT NOT NULL,
                keyspace_start INTEGER NOT NULL,
                keyspace_end INTEGER NOT NULL,
                keyspace_processed INTEGER NOT NULL DEFAULT 0,
                effective_keyspace_start INTEGER,
                effective_keyspace_end INTEGER,
                effective_keyspace_processed INTEGER,
                benchmark_speed REAL,
                chunk_duration_seconds INTEGER,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_progress_at TEXT,
                rule_start_index INTEGER,
                rule_end_index INTEGER,
                rule_chunk_path TEXT,
                is_rule_split_task INTEGER NOT NULL DEFAULT 0,
                crack_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_job ON job_tasks(job_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_status ON job_tasks(status);
            CREATE INDEX IF NOT EXISTS idx_tasks_agent ON job_tasks(agent_id);

            CREATE TABLE IF NOT EXISTS agents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                api_key TEXT NOT NULL,
                status TEXT NOT NULL,
                is_enabled INTEGER NOT NULL DEFAULT 1,
                sync_status TEXT NOT NULL DEFAULT 'not_synced',
                scheduling_enabled INTEGER NOT NULL DEFAULT 1,
                last_heartbeat TEXT,
                last_seen TEXT,
                hardware TEXT,
                os_info TEXT,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                enabled_device_count INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS agent_benchmarks (
                agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
                attack_mode INTEGER NOT NULL,
                hash_type INTEGER NOT NULL,
                hashes_per_second REAL NOT NULL,
                measured_at TEXT NOT NULL,
                PRIMARY KEY (agent_id, attack_mode, hash_type)
            );

            CREATE TABLE IF NOT EXISTS potfile_staging (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                password TEXT NOT NULL,
                hash_value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_potfile_staging_processed
                ON potfile_staging(processed);
            ",
        )?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_in_memory_and_initializes_schema_idempotently() {
        let store = Store::open_in_memory().await.unwrap();
        // Re-running schema init against the live connection must not fail.
        init_schema(&store.jobs.connection_for_test()).await.unwrap();
    }
}
