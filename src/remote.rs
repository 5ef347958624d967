//! Remote backend abstraction.
//!
//! This module defines the interface the sync engine talks to, along with
//! the wire snapshot type and error handling. The actual HTTP client lives
//! outside the core; anything that implements [`RemoteBackend`] can serve as
//! the remote side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::task::{SyncState, Task};

/// Common error type for remote operations.
///
/// The core treats every variant the same way ("operation failed, retry
/// later"), but keeping them distinct makes diagnostics readable.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Remote error: {0}")]
    Other(String),
}

/// Task snapshot exchanged with the remote backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDto {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub done: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

impl From<&Task> for TaskDto {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            user_id: task.user_id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            // Local photo paths are device-specific and never leave the device.
            photo_url: task.photo_url.clone(),
            latitude: task.latitude,
            longitude: task.longitude,
            accuracy: task.accuracy,
            done: task.done,
            created_at: task.created_at.clone(),
            updated_at: task.updated_at.clone(),
            remote_id: task.remote_id.clone(),
            deleted: task.deleted,
        }
    }
}

impl TaskDto {
    /// Materializes a remote snapshot as a fresh local task marked synced.
    pub fn into_local_task(self, user_id: &str) -> Task {
        Task {
            id: self.id,
            user_id: user_id.to_string(),
            title: self.title,
            description: self.description,
            photo_url: self.photo_url,
            local_photo_path: None,
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            done: self.done,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted: false,
            remote_id: self.remote_id,
            sync_state: Some(SyncState::Synced),
            last_sync_error: None,
            order: None,
        }
    }
}

/// Remote backend trait the sync engine drives.
///
/// Implementations must surface failures as errors, never as silent nulls;
/// any error is treated as "failed, retry later".
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Fetches all tasks for a user.
    async fn list_tasks(&self, user_id: &str) -> Result<Vec<TaskDto>, RemoteError>;

    /// Creates a task; the returned snapshot carries the assigned remote id.
    async fn create_task(&self, user_id: &str, task: &TaskDto) -> Result<TaskDto, RemoteError>;

    /// Updates the task identified by `remote_id`.
    async fn update_task(
        &self,
        user_id: &str,
        remote_id: &str,
        task: &TaskDto,
    ) -> Result<TaskDto, RemoteError>;

    /// Deletes the task identified by `remote_id`.
    async fn delete_task(&self, user_id: &str, remote_id: &str) -> Result<(), RemoteError>;
}
