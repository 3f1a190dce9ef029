//! `potfile_staging` repository.

use super::jobs::parse_rfc3339;
use crate::errors::StoreError;
use crate::types::PotfileStagingEntry;
use rusqlite::{params, Row};
use tokio_rusqlite::Connection;

#[derive(Clone)]
pub struct PotfileRepository {
    conn: Connection,
}

impl PotfileRepository {
    pub(super) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn stage(&self, password: &str, hash_value: &str) -> Result<i64, StoreError> {
        let password = password.to_string();
        let hash_value = hash_value.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO potfile_staging (password, hash_value, created_at, processed)
                     VALUES (?1, ?2, ?3, 0)",
                    params![password, hash_value, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?
    }

    /// Up to `limit` unprocessed entries, oldest first — the potfile
    /// service's batch unit.
    pub async fn next_batch(&self, limit: u32) -> Result<Vec<PotfileStagingEntry>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT * FROM potfile_staging WHERE processed = 0
                     ORDER BY created_at ASC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], row_to_entry)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    pub async fn mark_processed(&self, ids: Vec<i64>) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                for id in &ids {
                    tx.execute(
                        "UPDATE potfile_staging SET processed = 1 WHERE id = ?1",
                        params![id],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?
    }
}

fn row_to_entry(row: &Row) -> rusqlite::Result<PotfileStagingEntry> {
    let created_at: String = row.get("created_at")?;
    Ok(PotfileStagingEntry {
        id: row.get("id")?,
        password: row.get("password")?,
        hash_value: row.get("hash_value")?,
        created_at: parse_rfc3339(&created_at)?,
        processed: row.get("processed")?,
    })
}
