//! Rule Split Manager.
//!
//! When a rule-heavy straight (or association) attack would produce chunks
//! longer than the target duration, the rule file is partitioned into `N`
//! near-equal sub-files so each task's chunk stays bounded in duration.

use crate::types::RuleChunk;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Conservative speed assumed when no agent benchmark exists yet, used only
/// to estimate whether splitting is warranted.
const CONSERVATIVE_ESTIMATE_HASHES_PER_SECOND: f64 = 3.0e8;

#[derive(Debug, Error)]
pub enum RuleSplitError {
    #[error("io error reading rule file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("io error writing chunk {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("io error creating job directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decide whether rule splitting should activate for this job.
#[allow(clippy::too_many_arguments)]
pub fn should_split(
    rule_split_enabled: bool,
    base_keyspace: i64,
    multiplication_factor: i64,
    rule_split_min_rules: i64,
    chunk_duration_seconds: u64,
    threshold: f64,
    benchmark_hashes_per_second: Option<f64>,
) -> bool {
    if !rule_split_enabled || multiplication_factor < rule_split_min_rules {
        return false;
    }

    let speed = benchmark_hashes_per_second.unwrap_or(CONSERVATIVE_ESTIMATE_HASHES_PER_SECOND);
    let total_candidates = (base_keyspace as f64) * (multiplication_factor as f64);
    let estimated_seconds = total_candidates / speed;

    estimated_seconds > (chunk_duration_seconds as f64) * threshold
}

/// Number of sub-files to split a rule file into, capped at
/// `rule_split_max_chunks`.
pub fn split_count(
    base_keyspace: i64,
    multiplication_factor: i64,
    chunk_duration_seconds: u64,
    benchmark_hashes_per_second: Option<f64>,
    max_chunks: i64,
) -> i64 {
    let speed = benchmark_hashes_per_second.unwrap_or(CONSERVATIVE_ESTIMATE_HASHES_PER_SECOND);
    let total_candidates = (base_keyspace as f64) * (multiplication_factor as f64);
    let estimated_seconds = total_candidates / speed;
    let raw = (estimated_seconds / chunk_duration_seconds as f64).ceil() as i64;
    raw.clamp(1, max_chunks)
}

/// Reads a rule file preserving comments/blanks (so rule indices remain
/// stable), and partitions it into `chunk_count` near-equal chunk files
/// under `<job_dir>/chunk_<k>.rule`.
pub fn split_rule_file(
    source_path: &Path,
    job_dir: &Path,
    chunk_count: i64,
) -> Result<Vec<RuleChunk>, RuleSplitError> {
    let text = std::fs::read_to_string(source_path).map_err(|source| RuleSplitError::Read {
        path: source_path.to_path_buf(),
        source,
    })?;
    let lines: Vec<&str> = text.lines().collect();
    let total_lines = lines.len() as i64;
    let chunk_count = chunk_count.max(1).min(total_lines.max(1));

    std::fs::create_dir_all(job_dir).map_err(|source| RuleSplitError::CreateDir {
        path: job_dir.to_path_buf(),
        source,
    })?;

    let base_size = total_lines / chunk_count;
    let remainder = total_lines % chunk_count;

    let mut chunks = Vec::with_capacity(chunk_count as usize);
    let mut cursor: i64 = 0;
    for k in 0..chunk_count {
        // Distribute the remainder across the first `remainder` chunks so
        // sizes stay within one line of each other.
        let size = base_size + if k < remainder { 1 } else { 0 };
        let start = cursor;
        let end = start + size;

        let chunk_path = job_dir.join(format!("chunk_{k}.rule"));
        let body = lines[start as usize..end as usize].join("\n");
        std::fs::write(&chunk_path, format!("{body}\n")).map_err(|source| {
            RuleSplitError::Write {
                path: chunk_path.clone(),
                source,
            }
        })?;

        let rule_count = body
            .lines()
            .filter(|l| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with('#')
            })
            .count() as i64;

        chunks.push(RuleChunk {
            path: chunk_path,
            start_index: start,
            end_index: end,
            rule_count,
        });

        cursor = end;
    }

    debug!(
        chunks = chunks.len(),
        total_lines, "rule file split complete"
    );

    Ok(chunks)
}

/// Removes the entire `<tempdir>/job_<uuid>/` directory. Idempotent:
/// a missing directory is not an error — cleanup runs on every job
/// terminal transition, possibly more than once.
pub fn cleanup_job_directory(job_dir: &Path) -> Result<(), RuleSplitError> {
    match std::fs::remove_dir_all(job_dir) {
        Ok(()) => {
            info!(job_dir = %job_dir.display(), "rule chunk directory removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RuleSplitError::Write {
            path: job_dir.to_path_buf(),
            source,
        }),
    }
}

/// Canonical per-job directory for rule chunks.
pub fn job_dir(root: &Path, job_id: uuid::Uuid) -> PathBuf {
    root.join(format!("job_{job_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp_rule_file(lines: &[&str]) -> tempfile_like::TempFile {
        tempfile_like::TempFile::new(lines.join("\n"))
    }

    // A tiny local stand-in for `tempfile` so this crate doesn't need an
    // extra dev-dependency just for two tests.
    mod tempfile_like {
        use std::fs::File;
        use std::io::Write;
        use std::path::PathBuf;

        pub struct TempFile {
            pub path: PathBuf,
        }

        impl TempFile {
            pub fn new(contents: String) -> Self {
                let path = std::env::temp_dir().join(format!(
                    "khs-rule-split-test-{}.rule",
                    uuid::Uuid::new_v4()
                ));
                let mut f = File::create(&path).unwrap();
                f.write_all(contents.as_bytes()).unwrap();
                Self { path }
            }
        }

        impl Drop for TempFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn should_split_activates_for_large_rule_multiplication() {
        let active = should_split(true, 1_000_000, 100_000, 100, 1200, 2.0, Some(1.0e9));
        assert!(active);
    }

    #[test]
    fn should_split_respects_disabled_flag() {
        let active = should_split(false, 1_000_000, 1_000_000, 100, 1200, 2.0, Some(1.0e9));
        assert!(!active);
    }

    #[test]
    fn should_split_respects_min_rules_floor() {
        let active = should_split(true, 1_000_000, 10, 100, 1200, 2.0, None);
        assert!(!active);
    }

    #[test]
    fn split_count_caps_at_max_chunks() {
        let n = split_count(1_000_000, 100_000, 1200, Some(1.0e9), 1000);
        assert!(n <= 1000);
        assert!(n >= 1);
    }

    #[test]
    fn split_rule_file_preserves_all_lines_across_chunks() {
        let lines = vec!["M", "sa", "# comment", "", "l", "u"];
        let file = write_temp_rule_file(&lines);
        let job_dir = std::env::temp_dir().join(format!("khs-test-job-{}", uuid::Uuid::new_v4()));

        let chunks = split_rule_file(&file.path, &job_dir, 3).unwrap();
        assert_eq!(chunks.len(), 3);

        let mut recombined = Vec::new();
        for chunk in &chunks {
            let text = std::fs::read_to_string(&chunk.path).unwrap();
            recombined.extend(text.lines().map(|l| l.to_string()));
        }
        assert_eq!(recombined, lines);

        cleanup_job_directory(&job_dir).unwrap();
        assert!(!job_dir.exists());
    }

    #[test]
    fn cleanup_is_idempotent_on_missing_dir() {
        let job_dir = std::env::temp_dir().join(format!("khs-never-{}", uuid::Uuid::new_v4()));
        assert!(cleanup_job_directory(&job_dir).is_ok());
        assert!(cleanup_job_directory(&job_dir).is_ok());
    }

    #[test]
    fn job_dir_is_namespaced_by_uuid() {
        let id = uuid::Uuid::new_v4();
        let dir = job_dir(Path::new("/tmp/rules"), id);
        assert_eq!(dir, PathBuf::from(format!("/tmp/rules/job_{id}")));
    }
}
