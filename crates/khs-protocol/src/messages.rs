//! Agent <-> coordinator message schema. Wire transport is out of
//! scope; this module only defines the payload shapes carried over it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages an agent sends to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
#[allow(clippy::large_enum_variant)]
pub enum AgentMessage {
    Heartbeat {
        agent_id: i64,
        timestamp: DateTime<Utc>,
    },
    TaskStatus {
        task_id: Uuid,
        status: String,
        error_message: Option<String>,
    },
    JobProgress {
        task_id: Uuid,
        keyspace_processed: i64,
        effective_keyspace_processed: Option<i64>,
        crack_count: u32,
        #[serde(default)]
        cracks: Vec<CrackedHash>,
    },
    BenchmarkResult {
        attack_mode: u32,
        hash_type: i32,
        hashes_per_second: f64,
    },
    HardwareInfo {
        agent_id: i64,
        devices: Vec<DeviceInfo>,
        os_info: String,
    },
    DeviceDetection {
        agent_id: i64,
        devices: Vec<DeviceInfo>,
    },
    DeviceUpdate {
        agent_id: i64,
        device_id: u32,
        enabled: bool,
    },
    FileSyncResponse {
        request_id: Uuid,
        available: bool,
        checksum: Option<String>,
    },
    FileSyncStatus {
        request_id: Uuid,
        bytes_transferred: u64,
        total_bytes: u64,
    },
    CurrentTaskStatus {
        agent_id: i64,
        task_id: Option<Uuid>,
    },
    AgentShutdown {
        agent_id: i64,
        reason: String,
    },
}

/// Messages the coordinator sends to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
#[serde(rename_all = "snake_case")]
pub enum CoordinatorMessage {
    TaskAssignment {
        task_id: Uuid,
        job_id: Uuid,
        keyspace_start: i64,
        keyspace_end: i64,
        rule_chunk_path: Option<String>,
    },
    JobStop {
        job_id: Uuid,
    },
    BenchmarkRequest {
        attack_mode: u32,
        hash_type: i32,
    },
    FileSyncRequest {
        request_id: Uuid,
        file_name: String,
        expected_checksum: String,
    },
    FileSyncCommand {
        request_id: Uuid,
        chunk_index: u32,
        data: Vec<u8>,
    },
    ForceCleanup {
        task_id: Uuid,
    },
    BufferAck {
        request_id: Uuid,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: u32,
    pub name: String,
    pub enabled: bool,
}

/// One recovered plaintext carried inside a `JobProgress` report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrackedHash {
    pub hash_value: String,
    pub hash_type: i32,
    pub plaintext: String,
}
