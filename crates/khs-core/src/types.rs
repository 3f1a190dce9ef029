//! Domain types for the scheduling engine.
//!
//! Status enums are closed and carry an explicit `can_transition_to` guard
//! so transition bugs are caught at the call site instead of silently
//! accepted by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Attack mode
// ---------------------------------------------------------------------------

/// Numeric selector for the cracking algorithm, mirroring hashcat's `-a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackMode {
    Straight = 0,
    Combination = 1,
    BruteForce = 3,
    HybridWordlistMask = 6,
    HybridMaskWordlist = 7,
    Association = 9,
}

impl AttackMode {
    pub fn as_hashcat_arg(self) -> &'static str {
        match self {
            AttackMode::Straight => "0",
            AttackMode::Combination => "1",
            AttackMode::BruteForce => "3",
            AttackMode::HybridWordlistMask => "6",
            AttackMode::HybridMaskWordlist => "7",
            AttackMode::Association => "9",
        }
    }

    /// Association (mode 9) is rejected at job creation time.
    pub fn supported_at_creation(self) -> bool {
        !matches!(self, AttackMode::Association)
    }
}

// ---------------------------------------------------------------------------
// JobExecution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobExecutionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Interrupted,
}

impl JobExecutionStatus {
    /// The job status DAG: pending -> running -> {completed, failed, paused,
    /// interrupted, cancelled}; paused/interrupted can resume to running;
    /// cancellation is reachable from any non-terminal state.
    pub fn can_transition_to(&self, target: &JobExecutionStatus) -> bool {
        use JobExecutionStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Paused)
                | (Running, Interrupted)
                | (Running, Cancelled)
                // Startup reconciliation demotes an orphaned running job back
                // to pending so the scheduler re-dispatches it.
                | (Running, Pending)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Interrupted, Running)
                | (Interrupted, Cancelled)
                // The hashlist completion handler force-completes a job from
                // any non-terminal state once its hashlist is fully cracked
                // — it does not wait for the job to resume first.
                | (Pending, Completed)
                | (Paused, Completed)
                | (Interrupted, Completed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobExecutionStatus::Completed
                | JobExecutionStatus::Failed
                | JobExecutionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub name: String,
    pub hashlist_id: i64,
    pub attack_mode: AttackMode,
    pub wordlist_ids: Vec<i64>,
    pub rule_ids: Vec<i64>,
    pub mask: Option<String>,
    pub hash_type: i32,
    pub binary_version: String,
    pub priority: i32,
    pub chunk_duration_seconds: u64,
    pub max_agents: u32,
    pub allow_high_priority_override: bool,
    pub additional_args: Option<String>,

    pub status: JobExecutionStatus,
    pub processed_keyspace: i64,
    pub dispatched_keyspace: i64,
    pub total_keyspace: Option<i64>,
    pub base_keyspace: Option<i64>,
    pub multiplication_factor: Option<i64>,
    pub effective_keyspace: Option<i64>,
    pub is_accurate_keyspace: bool,
    pub uses_rule_splitting: bool,
    pub rule_split_count: Option<u32>,
    pub consecutive_failures: u32,
    pub error_message: Option<String>,

    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobExecution {
    /// Percent complete, or `None` while `effective_keyspace` is unset
    ///.
    pub fn progress_percent(&self) -> Option<f64> {
        let effective = self.effective_keyspace?;
        if effective <= 0 {
            return None;
        }
        let pct = 100.0 * (self.processed_keyspace as f64) / (effective as f64);
        Some(pct.clamp(0.0, 100.0))
    }

    /// Provisional sizing keyspace used by the scheduler before the first
    /// benchmark makes `effective_keyspace` authoritative.
    pub fn scheduling_keyspace(&self) -> Option<i64> {
        self.effective_keyspace.or_else(|| {
            let base = self.base_keyspace?;
            let factor = self.multiplication_factor.unwrap_or(1);
            Some(base.saturating_mul(factor))
        })
    }
}

// ---------------------------------------------------------------------------
// JobTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTaskStatus {
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
    ReconnectPending,
}

impl JobTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobTaskStatus::Completed | JobTaskStatus::Failed | JobTaskStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobTaskStatus::Assigned | JobTaskStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTask {
    pub id: Uuid,
    pub job_id: Uuid,
    pub agent_id: Option<i64>,
    pub status: JobTaskStatus,

    pub keyspace_start: i64,
    pub keyspace_end: i64,
    pub keyspace_processed: i64,

    pub effective_keyspace_start: Option<i64>,
    pub effective_keyspace_end: Option<i64>,
    pub effective_keyspace_processed: Option<i64>,

    pub benchmark_speed: Option<f64>,
    pub chunk_duration_seconds: Option<u64>,
    pub retry_count: u32,
    pub last_progress_at: Option<DateTime<Utc>>,

    pub rule_start_index: Option<i64>,
    pub rule_end_index: Option<i64>,
    pub rule_chunk_path: Option<String>,
    pub is_rule_split_task: bool,

    pub crack_count: u32,
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobTask {
    /// `effective_keyspace_processed`, falling back to `keyspace_processed`
    /// for legacy tasks without the effective field.
    pub fn effective_processed_or_base(&self) -> i64 {
        self.effective_keyspace_processed
            .unwrap_or(self.keyspace_processed)
    }

    pub fn base_range_len(&self) -> i64 {
        self.keyspace_end - self.keyspace_start
    }
}

// ---------------------------------------------------------------------------
// PresetJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetJob {
    pub id: Uuid,
    pub name: String,
    pub wordlist_ids: Vec<i64>,
    pub rule_ids: Vec<i64>,
    pub attack_mode: AttackMode,
    pub mask: Option<String>,
    pub priority: i32,
    pub chunk_duration_seconds: u64,
    pub binary_version: String,
    pub cached_keyspace: Option<i64>,
}

// ---------------------------------------------------------------------------
// Hashlist / Hash
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hashlist {
    pub id: i64,
    pub client_id: Option<i64>,
    pub name: String,
    pub hash_type: i32,
    pub total: i64,
    pub cracked: i64,
    pub created_at: DateTime<Utc>,
    pub file_path: String,
    /// `None` => inherit the client/default retention policy.
    pub retention_months: Option<u32>,
}

impl Hashlist {
    pub fn is_fully_cracked(&self) -> bool {
        self.total > 0 && self.cracked >= self.total
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hash {
    pub id: Uuid,
    pub hash_type: i32,
    pub hash_value: String,
    pub username: Option<String>,
    pub is_cracked: bool,
    pub plaintext: Option<String>,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Active,
    Inactive,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub api_key: String,
    pub status: AgentStatus,
    pub is_enabled: bool,
    pub sync_status: AgentSyncStatus,
    pub scheduling_enabled: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub hardware: Option<String>,
    pub os_info: Option<String>,
    pub consecutive_failures: u32,
    pub enabled_device_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentSyncStatus {
    NotSynced,
    Syncing,
    Synced,
}

/// The advisory "busy" bag, modeled explicitly instead of a loose
/// boolean+id metadata map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentAssignment {
    pub task_id: Uuid,
    pub job_id: Uuid,
    pub since: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// AgentBenchmark
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentBenchmark {
    pub agent_id: i64,
    pub attack_mode: AttackMode,
    pub hash_type: i32,
    pub hashes_per_second: f64,
    pub measured_at: DateTime<Utc>,
}

/// Per-mode multiplier applied when estimating a benchmark from a sibling
/// attack mode.
pub fn attack_mode_modifier(mode: AttackMode) -> f64 {
    match mode {
        AttackMode::Straight => 1.2,
        AttackMode::Combination => 1.0,
        AttackMode::BruteForce => 0.8,
        AttackMode::HybridWordlistMask | AttackMode::HybridMaskWordlist => 0.6,
        AttackMode::Association => 0.5,
    }
}

// ---------------------------------------------------------------------------
// Potfile staging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PotfileStagingEntry {
    pub id: i64,
    pub password: String,
    pub hash_value: String,
    pub created_at: DateTime<Utc>,
    pub processed: bool,
}

// ---------------------------------------------------------------------------
// RuleChunk (transient)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RuleChunk {
    pub path: std::path::PathBuf,
    pub start_index: i64,
    pub end_index: i64,
    pub rule_count: i64,
}

// ---------------------------------------------------------------------------
// ClientRetentionSetting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRetentionSetting {
    pub client_id: i64,
    /// `None` => inherit the system default; `Some(0)` => keep forever.
    pub retention_months: Option<u32>,
}
