//! Potfile Service: periodically drains
//! staged cracks into the on-disk potfile, deduplicating against what's
//! already there, and reports the file's new MD5/size/line-count so the
//! job update service can react to wordlist growth.

use crate::error::DaemonError;
use khs_core::store::Store;
use md5::{Digest, Md5};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Metadata the sync interface hands to agents fetching the potfile
///.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotfileMetadata {
    pub md5: String,
    pub size_bytes: u64,
    pub line_count: u64,
}

/// Outcome of one batch flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PotfileBatchReport {
    pub appended: usize,
    pub duplicates_skipped: usize,
    pub metadata: PotfileMetadata,
}

/// Reads the existing potfile's lines into a dedup set. A missing file is
/// treated as empty — the first flush creates it with its mandated empty
/// first line.
fn existing_lines(contents: &str) -> HashSet<&str> {
    contents.lines().collect()
}

/// Drains up to `max_batch_size` unprocessed staged cracks, appends the
/// ones not already present verbatim in the potfile, and returns refreshed
/// file metadata. Entries are marked processed regardless of whether they
/// turned out to be duplicates — a password already in the potfile needs
/// no further action.
pub async fn run_potfile_batch(
    store: &Store,
    potfile_path: &Path,
    max_batch_size: u32,
) -> Result<Option<PotfileBatchReport>, DaemonError> {
    let batch = store.potfile.next_batch(max_batch_size).await?;
    if batch.is_empty() {
        return Ok(None);
    }

    let mut contents = match tokio::fs::read_to_string(potfile_path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::from("\n"),
        Err(e) => return Err(e.into()),
    };

    let existing = existing_lines(&contents);
    let mut to_append = Vec::new();
    let mut duplicates_skipped = 0;
    for entry in &batch {
        let line = format!("{}:{}", entry.hash_value, entry.password);
        if existing.contains(line.as_str()) {
            duplicates_skipped += 1;
        } else {
            to_append.push(line);
        }
    }
    drop(existing);

    let appended = to_append.len();
    for line in &to_append {
        contents.push_str(line);
        contents.push('\n');
    }

    if appended > 0 {
        tokio::fs::write(potfile_path, &contents).await?;
    }

    store.potfile.mark_processed(batch.iter().map(|e| e.id).collect()).await?;

    let mut hasher = Md5::new();
    hasher.update(contents.as_bytes());
    let md5 = hex::encode(hasher.finalize());
    let metadata = PotfileMetadata {
        md5,
        size_bytes: contents.len() as u64,
        line_count: contents.lines().count() as u64,
    };

    info!(appended, duplicates_skipped, "potfile batch flushed");
    Ok(Some(PotfileBatchReport { appended, duplicates_skipped, metadata }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use khs_core::store::Store;

    #[tokio::test]
    async fn first_batch_creates_file_with_empty_first_line() {
        let store = Store::open_in_memory().await.unwrap();
        store.potfile.stage("hunter2", "aaa").await.unwrap();

        let path = std::env::temp_dir().join(format!("khs-potfile-test-{}.pot", uuid::Uuid::new_v4()));
        let report = run_potfile_batch(&store, &path, 100).await.unwrap().unwrap();

        assert_eq!(report.appended, 1);
        assert_eq!(report.duplicates_skipped, 0);
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.starts_with('\n'));
        assert!(contents.contains("aaa:hunter2"));
        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn duplicate_cracks_are_marked_processed_without_duplicating_lines() {
        let store = Store::open_in_memory().await.unwrap();
        let path = std::env::temp_dir().join(format!("khs-potfile-test-{}.pot", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, "\naaa:hunter2\n").await.unwrap();

        store.potfile.stage("hunter2", "aaa").await.unwrap();
        let report = run_potfile_batch(&store, &path, 100).await.unwrap().unwrap();

        assert_eq!(report.appended, 0);
        assert_eq!(report.duplicates_skipped, 1);
        assert!(store.potfile.next_batch(10).await.unwrap().is_empty());
        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let store = Store::open_in_memory().await.unwrap();
        let path = std::env::temp_dir().join(format!("khs-potfile-test-{}.pot", uuid::Uuid::new_v4()));
        let report = run_potfile_batch(&store, &path, 100).await.unwrap();
        assert!(report.is_none());
    }
}
