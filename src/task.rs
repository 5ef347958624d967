//! Task data model.
//!
//! Tasks are persisted as a JSON array per user; field names stay camelCase
//! so blobs written by earlier app versions keep parsing.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Synchronization state of a task relative to the remote backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// A remote push is outstanding (queued or about to be attempted).
    Pending,
    /// The remote backend has acknowledged the latest local state.
    Synced,
    /// All retries were exhausted; the task will not be pushed again
    /// automatically.
    Failed,
}

/// A user's to-do item.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Stable local identifier, assigned at creation and never reused.
    pub id: String,
    /// Owner; immutable after creation.
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_photo_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub done: bool,
    /// RFC 3339; immutable after creation.
    pub created_at: String,
    /// RFC 3339; advanced on every local mutation.
    pub updated_at: String,
    /// Soft-delete flag. Deleted tasks stay in storage so a later remote
    /// delete still has the remote id available.
    #[serde(default)]
    pub deleted: bool,
    /// Set once the remote backend acknowledges creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(
        default,
        rename = "syncStatus",
        skip_serializing_if = "Option::is_none"
    )]
    pub sync_state: Option<SyncState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_error: Option<String>,
    /// Sparse manual list position; absent values sort last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
}

impl Task {
    /// Sort key for manual ordering: absent order sorts after everything.
    pub fn sort_key(&self) -> f64 {
        self.order.unwrap_or(f64::INFINITY)
    }

    /// Parsed `updated_at`, or the UNIX epoch when unparseable.
    pub fn updated_at_instant(&self) -> DateTime<Utc> {
        parse_timestamp(&self.updated_at).unwrap_or_default()
    }
}

/// Fields accepted when creating a task.
#[derive(Clone, Debug, Default)]
pub struct TaskInput {
    /// Caller-assigned id; a fresh UUID is generated when absent.
    pub id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub photo_url: Option<String>,
    pub local_photo_path: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub done: Option<bool>,
    pub order: Option<f64>,
}

impl TaskInput {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Fields accepted when updating a task. Identity fields (`id`, `user_id`,
/// `created_at`) are deliberately absent so a patch can never alter them.
#[derive(Clone, Debug, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub photo_url: Option<String>,
    pub local_photo_path: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub done: Option<bool>,
    pub order: Option<f64>,
}

/// Current time as an RFC 3339 string with millisecond precision.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 timestamp into an instant.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
