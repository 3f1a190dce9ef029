//! Chunking Service: turns a benchmark speed and a chunk
//! duration into the next `[start, end)` keyspace slice for a task,
//! reserved atomically against the job's `dispatched_keyspace` column via
//! `khs-core::store::jobs::JobRepository::reserve_keyspace`.

use crate::error::DaemonError;
use khs_core::store::Store;
use uuid::Uuid;

/// A reserved keyspace slice ready to become a task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReservedChunk {
    pub start: i64,
    pub end: i64,
    pub estimated_duration_seconds: f64,
}

/// Desired chunk length in keyspace units: `speed × chunk_duration`, clamped
/// so the tail of the job is absorbed into this chunk rather than left as a
/// dangling sliver.
///
/// `remaining` and the returned length are expressed in the job's
/// scheduling keyspace units; `reserve_keyspace` performs the final clamp
/// to the job's total, so this only needs to decide whether to take the
/// tail early.
pub fn chunk_length(remaining: i64, speed_hashes_per_second: f64, chunk_duration_seconds: u64, fluctuation_percentage: f64) -> i64 {
    if remaining <= 0 || speed_hashes_per_second <= 0.0 {
        return 0;
    }
    let size = (speed_hashes_per_second * chunk_duration_seconds as f64).max(1.0);
    if size as i64 >= remaining {
        return remaining;
    }
    let tail = remaining as f64 - size;
    if tail <= size * (fluctuation_percentage / 100.0) {
        remaining
    } else {
        size.floor() as i64
    }
}

/// Reserves the next chunk for `job_id` at the given agent speed, returning
/// `None` once the job has nothing left to dispatch.
pub async fn reserve_chunk(
    store: &Store,
    job_id: Uuid,
    speed_hashes_per_second: f64,
    chunk_duration_seconds: u64,
    fluctuation_percentage: f64,
) -> Result<Option<ReservedChunk>, DaemonError> {
    let job = store.jobs.get(job_id).await?;
    let Some(scheduling_keyspace) = job.scheduling_keyspace() else {
        return Ok(None);
    };
    let remaining = scheduling_keyspace - job.dispatched_keyspace;
    let len = chunk_length(
        remaining,
        speed_hashes_per_second,
        chunk_duration_seconds,
        fluctuation_percentage,
    );
    if len <= 0 {
        return Ok(None);
    }

    let Some((start, end)) = store.jobs.reserve_keyspace(job_id, len).await? else {
        return Ok(None);
    };

    Ok(Some(ReservedChunk {
        start,
        end,
        estimated_duration_seconds: (end - start) as f64 / speed_hashes_per_second,
    }))
}

/// Effective (rule-multiplied) range for one rule-split task: the base
/// keyspace range carved by the scheduler, scaled by the number of rules
/// in the chunk assigned to it.
pub fn rule_split_effective_range(base_start: i64, base_end: i64, rules_in_chunk: i64) -> (i64, i64) {
    let base_range = base_end - base_start;
    (0, base_range * rules_in_chunk.max(0))
}
