//! Retention purge: periodically deletes hashlists past their
//! (client-specific or default) retention window, secure-overwriting the
//! backing file before unlinking it.

use crate::error::DaemonError;
use khs_core::store::Store;
use rand::RngCore;
use tracing::info;

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionReport {
    pub purged: usize,
}

/// Finds every hashlist whose retention window has elapsed and purges it:
/// the store row, its junction rows, and any hash left orphaned as a
/// result (`HashlistRepository::delete`), then the backing file,
/// overwritten with random bytes the length of the file before unlinking.
pub async fn run_retention_sweep(
    store: &Store,
    default_retention_months: u32,
) -> Result<RetentionReport, DaemonError> {
    let eligible = store.hashlists.list_retention_eligible(default_retention_months).await?;
    let mut purged = 0;

    for hashlist in eligible {
        secure_overwrite_and_unlink(&hashlist.file_path).await?;
        store.hashlists.delete(hashlist.id).await?;
        info!(hashlist_id = hashlist.id, "hashlist purged under retention policy");
        purged += 1;
    }

    Ok(RetentionReport { purged })
}

/// Overwrites the file at `path` with random bytes of its own length before
/// unlinking it, so the purged plaintext is not trivially recoverable from
/// disk. A missing file is not an error: the store row is the source of
/// truth, and a repeat sweep (or a file already cleaned up some other way)
/// should not block the row's deletion.
async fn secure_overwrite_and_unlink(path: &str) -> Result<(), DaemonError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut random_bytes = vec![0u8; metadata.len() as usize];
    rand::thread_rng().fill_bytes(&mut random_bytes);
    tokio::fs::write(path, &random_bytes).await?;
    tokio::fs::remove_file(path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use khs_core::types::Hashlist;

    #[tokio::test]
    async fn run_retention_sweep_purges_expired_hashlist_and_its_file() {
        let store = Store::open_in_memory().await.unwrap();
        let path = std::env::temp_dir().join(format!("khs-retention-test-{}.txt", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, b"hunter2\npassword1\n").await.unwrap();

        let id = store
            .hashlists
            .create(Hashlist {
                id: 0,
                client_id: None,
                name: "expired".into(),
                hash_type: 0,
                total: 1,
                cracked: 1,
                created_at: Utc::now() - chrono::Duration::days(400),
                file_path: path.to_string_lossy().to_string(),
                retention_months: Some(1),
            })
            .await
            .unwrap();

        let report = run_retention_sweep(&store, 0).await.unwrap();
        assert_eq!(report.purged, 1);
        assert!(store.hashlists.get(id).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn run_retention_sweep_skips_fresh_hashlist() {
        let store = Store::open_in_memory().await.unwrap();
        let id = store
            .hashlists
            .create(Hashlist {
                id: 0,
                client_id: None,
                name: "fresh".into(),
                hash_type: 0,
                total: 1,
                cracked: 1,
                created_at: Utc::now(),
                file_path: "/tmp/does-not-matter.txt".into(),
                retention_months: Some(12),
            })
            .await
            .unwrap();

        let report = run_retention_sweep(&store, 0).await.unwrap();
        assert_eq!(report.purged, 0);
        assert!(store.hashlists.get(id).await.is_ok());
    }

    #[tokio::test]
    async fn run_retention_sweep_never_expires_when_retention_is_zero() {
        let store = Store::open_in_memory().await.unwrap();
        store
            .hashlists
            .create(Hashlist {
                id: 0,
                client_id: None,
                name: "forever".into(),
                hash_type: 0,
                total: 1,
                cracked: 1,
                created_at: Utc::now() - chrono::Duration::days(10_000),
                file_path: "/tmp/does-not-matter.txt".into(),
                retention_months: Some(0),
            })
            .await
            .unwrap();

        let report = run_retention_sweep(&store, 0).await.unwrap();
        assert_eq!(report.purged, 0);
    }
}
