//! `hashlists`/`hashes` repository.

use super::jobs::parse_rfc3339;
use crate::errors::StoreError;
use crate::types::{Hash, Hashlist};
use rusqlite::{params, Row};
use tokio_rusqlite::Connection;
use uuid::Uuid;

#[derive(Clone)]
pub struct HashlistRepository {
    conn: Connection,
}

impl HashlistRepository {
    pub(super) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, hashlist: Hashlist) -> Result<i64, StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO hashlists (client_id, name, hash_type, total, cracked,
                        created_at, file_path, retention_months)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                    params![
                        hashlist.client_id,
                        hashlist.name,
                        hashlist.hash_type,
                        hashlist.total,
                        hashlist.cracked,
                        hashlist.created_at.to_rfc3339(),
                        hashlist.file_path,
                        hashlist.retention_months,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?
    }

    pub async fn get(&self, id: i64) -> Result<Hashlist, StoreError> {
        self.conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT * FROM hashlists WHERE id = ?1",
                    params![id],
                    row_to_hashlist,
                )
            })
            .await?
    }

    pub async fn insert_hash(&self, hashlist_id: i64, hash: Hash) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO hashes (id, hash_type, hash_value, username, is_cracked, plaintext)
                     VALUES (?1,?2,?3,?4,?5,?6)
                     ON CONFLICT(id) DO NOTHING",
                    params![
                        hash.id.to_string(),
                        hash.hash_type,
                        hash.hash_value,
                        hash.username,
                        hash.is_cracked,
                        hash.plaintext,
                    ],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO hashlist_hashes (hashlist_id, hash_id) VALUES (?1, ?2)",
                    params![hashlist_id, hash.id.to_string()],
                )?;
                tx.execute(
                    "UPDATE hashlists SET total = total + 1 WHERE id = ?1",
                    params![hashlist_id],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?
    }

    /// Marks a hash cracked and bumps every hashlist it belongs to; returns
    /// the ids of hashlists that became fully cracked.
    pub async fn mark_cracked(
        &self,
        hash_value: &str,
        hash_type: i32,
        plaintext: &str,
    ) -> Result<Vec<i64>, StoreError> {
        let hash_value = hash_value.to_string();
        let plaintext = plaintext.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let updated = tx.execute(
                    "UPDATE hashes SET is_cracked = 1, plaintext = ?1
                     WHERE hash_value = ?2 AND hash_type = ?3 AND is_cracked = 0",
                    params![plaintext, hash_value, hash_type],
                )?;
                if updated == 0 {
                    tx.commit()?;
                    return Ok(Vec::new());
                }

                let hash_id: String = tx.query_row(
                    "SELECT id FROM hashes WHERE hash_value = ?1 AND hash_type = ?2",
                    params![hash_value, hash_type],
                    |row| row.get(0),
                )?;

                let mut stmt = tx.prepare(
                    "SELECT hashlist_id FROM hashlist_hashes WHERE hash_id = ?1",
                )?;
                let hashlist_ids: Vec<i64> = stmt
                    .query_map(params![hash_id], |row| row.get(0))?
                    .collect::<rusqlite::Result<_>>()?;
                drop(stmt);

                let mut now_fully_cracked = Vec::new();
                for hashlist_id in &hashlist_ids {
                    tx.execute(
                        "UPDATE hashlists SET cracked = cracked + 1 WHERE id = ?1",
                        params![hashlist_id],
                    )?;
                    let (total, cracked): (i64, i64) = tx.query_row(
                        "SELECT total, cracked FROM hashlists WHERE id = ?1",
                        params![hashlist_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?;
                    if total > 0 && cracked >= total {
                        now_fully_cracked.push(*hashlist_id);
                    }
                }
                tx.commit()?;
                Ok(now_fully_cracked)
            })
            .await?
    }

    pub async fn list_retention_eligible(
        &self,
        default_retention_months: u32,
    ) -> Result<Vec<Hashlist>, StoreError> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT h.* FROM hashlists h
                     LEFT JOIN clients c ON c.id = h.client_id
                     WHERE h.cracked >= h.total AND h.total > 0
                       AND COALESCE(h.retention_months, c.retention_months, ?1) > 0
                       AND datetime(h.created_at,
                           '+' || COALESCE(h.retention_months, c.retention_months, ?1) || ' months')
                           < datetime('now')",
                )?;
                let rows = stmt
                    .query_map(params![default_retention_months], row_to_hashlist)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?
    }

    /// Deletes a hashlist and garbage-collects any hash row left with no
    /// remaining hashlist membership, as one atomic transaction: junction
    /// rows, the hashlist row, then orphaned hashes. `VACUUM ANALYZE` runs
    /// afterward, outside the transaction (SQLite refuses `VACUUM` while
    /// one is open), to reclaim the freed pages immediately rather than
    /// waiting on auto-vacuum.
    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM hashlist_hashes WHERE hashlist_id = ?1",
                    params![id],
                )?;
                tx.execute("DELETE FROM hashlists WHERE id = ?1", params![id])?;
                tx.execute(
                    "DELETE FROM hashes WHERE id NOT IN (SELECT hash_id FROM hashlist_hashes)",
                    [],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "VACUUM; ANALYZE hashlists; ANALYZE hashes; ANALYZE hashlist_hashes;",
                )?;
                Ok(())
            })
            .await?
    }
}

fn row_to_hashlist(row: &Row) -> rusqlite::Result<Hashlist> {
    let created_at: String = row.get("created_at")?;
    Ok(Hashlist {
        id: row.get("id")?,
        client_id: row.get("client_id")?,
        name: row.get("name")?,
        hash_type: row.get("hash_type")?,
        total: row.get("total")?,
        cracked: row.get("cracked")?,
        created_at: parse_rfc3339(&created_at)?,
        file_path: row.get("file_path")?,
        retention_months: row.get("retention_months")?,
    })
}
