//! Benchmark Cache: the scheduler's only source of "how fast is
//! this agent at this attack" answers, backed by `khs-core::store`'s
//! `agent_benchmarks` table.

use crate::error::DaemonError;
use khs_core::store::Store;
use khs_core::types::{attack_mode_modifier, AttackMode};

/// Result of a cache lookup for one `(agent, attack_mode, hash_type)` key.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkLookup {
    /// Best speed estimate to use for chunking right now, if any.
    pub speed_hashes_per_second: Option<f64>,
    /// `true` only for an exact, non-stale hit.
    pub is_fresh: bool,
    /// The scheduler should ask the agent to re-benchmark regardless of
    /// whether an estimate was available, so the cache stays warm.
    pub should_request_benchmark: bool,
}

/// Looks up the benchmark cache, falling back to a sibling-mode estimate
/// when no exact fresh measurement exists.
pub async fn lookup(
    store: &Store,
    agent_id: i64,
    attack_mode: AttackMode,
    hash_type: i32,
    max_age_hours: u64,
) -> Result<BenchmarkLookup, DaemonError> {
    if let Some(hit) = store.benchmarks.get(agent_id, attack_mode, hash_type).await? {
        if !store.benchmarks.is_stale(hit.measured_at, max_age_hours).await {
            return Ok(BenchmarkLookup {
                speed_hashes_per_second: Some(hit.hashes_per_second),
                is_fresh: true,
                should_request_benchmark: false,
            });
        }
    }

    let siblings = store.benchmarks.list_for_agent(agent_id).await?;
    let estimate = estimate_from_siblings(&siblings, attack_mode);

    Ok(BenchmarkLookup {
        speed_hashes_per_second: estimate,
        is_fresh: false,
        should_request_benchmark: true,
    })
}

/// Mean of the agent's other recorded speeds, scaled by the target mode's
/// modifier (straight 1.2, combo 1.0, brute 0.8, hybrid 0.6, default 0.5).
fn estimate_from_siblings(
    siblings: &[khs_core::types::AgentBenchmark],
    target_mode: AttackMode,
) -> Option<f64> {
    if siblings.is_empty() {
        return None;
    }
    let mean = siblings.iter().map(|b| b.hashes_per_second).sum::<f64>() / siblings.len() as f64;
    Some(mean * attack_mode_modifier(target_mode))
}
