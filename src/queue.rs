//! Durable retry queue for failed remote operations.
//!
//! Every remote push that fails turns into a [`QueueItem`] persisted under a
//! per-user key. Items carry exactly the fields needed to replay the
//! operation, a retry count, and a backoff timestamp. An item leaves the
//! queue only by succeeding or by exhausting its retries.

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::BACKOFF_CAP_SECS;
use crate::remote::TaskDto;

/// Snapshot for replaying a remote create.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskPayload {
    pub task: TaskDto,
}

/// Snapshot for replaying a remote update.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskPayload {
    /// Remote id at enqueue time; absent when the task was never created
    /// remotely, in which case the replay falls back to a create.
    pub remote_id: Option<String>,
    pub task: TaskDto,
}

/// Identifiers for replaying a remote delete.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteTaskPayload {
    pub task_id: String,
    /// Absent when the task never existed remotely; the drain drops such
    /// items without a remote call.
    pub remote_id: Option<String>,
}

/// One pending remote operation with its replay payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "op", content = "payload", rename_all = "lowercase")]
pub enum QueueOp {
    Create(CreateTaskPayload),
    Update(UpdateTaskPayload),
    Delete(DeleteTaskPayload),
}

/// Queue entry as persisted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub task_id: String,
    #[serde(flatten)]
    pub op: QueueOp,
    #[serde(default)]
    pub retries: u32,
    pub max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Epoch millis before which this item must not be attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<i64>,
}

impl QueueItem {
    pub fn new(task_id: impl Into<String>, op: QueueOp, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            op,
            retries: 0,
            max_retries,
            last_error: None,
            next_retry_at: None,
        }
    }

    /// Whether this item must be skipped until its backoff deadline passes.
    pub fn in_backoff(&self, now_ms: i64) -> bool {
        matches!(self.next_retry_at, Some(at) if at > now_ms)
    }
}

/// Persisted queue blob, one per user.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncQueue {
    pub items: Vec<QueueItem>,
    /// Epoch millis of the last drain, 0 when never drained.
    pub last_sync_at: i64,
    /// Items delivered successfully, accumulated across drains.
    pub success_count: u64,
    /// Items dropped after exhausting retries, accumulated across drains.
    pub fail_count: u64,
}

/// Ephemeral sync summary published to subscribers after every pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncStatus {
    pub syncing: bool,
    pub queue_length: usize,
    pub succeeded_count: u64,
    pub failed_count: u64,
    pub pending_count: usize,
    pub last_error: Option<String>,
}

/// Backoff delay in seconds before the next attempt of an item that has
/// failed `retries` times: `min(2^retries + jitter, 3600)` with jitter drawn
/// uniformly from [0, 1).
pub fn backoff_delay_secs(retries: u32) -> f64 {
    let jitter: f64 = rand::thread_rng().gen();
    (2f64.powi(retries.min(63) as i32) + jitter).min(BACKOFF_CAP_SECS)
}
