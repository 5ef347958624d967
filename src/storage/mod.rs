//! Local persistence layer.
//!
//! [`LocalStore`] is the adapter between the core and the platform's
//! key-value store. It encrypts on write whenever a session key is present,
//! detects encryption envelopes on read and falls back to the raw stored
//! string when decryption is not possible, so data written before encryption
//! was enabled keeps loading. Task and queue blobs are namespaced per user.

pub mod provider;

use std::sync::Arc;

use log::warn;

use crate::constants::{
    LEGACY_TASKS_KEY, STORAGE_KEY_VERSION, SYNC_QUEUE_KEY_PREFIX, TASKS_KEY_PREFIX,
};
use crate::crypto;
use crate::error::{Error, Result};
use crate::keystore::KeyStore;
use crate::queue::SyncQueue;
use crate::task::Task;

pub use provider::{MemoryProvider, PersistenceProvider};

/// Storage key for a user's task blob.
pub fn tasks_key(user_id: &str) -> String {
    format!("{TASKS_KEY_PREFIX}{user_id}{STORAGE_KEY_VERSION}")
}

/// Storage key for a user's retry queue blob.
pub fn queue_key(user_id: &str) -> String {
    format!("{SYNC_QUEUE_KEY_PREFIX}{user_id}{STORAGE_KEY_VERSION}")
}

/// Encrypting persistence adapter over a platform key-value provider.
pub struct LocalStore {
    provider: Arc<dyn PersistenceProvider>,
    keystore: Arc<KeyStore>,
}

impl LocalStore {
    pub fn new(provider: Arc<dyn PersistenceProvider>, keystore: Arc<KeyStore>) -> Self {
        Self { provider, keystore }
    }

    pub fn keystore(&self) -> &Arc<KeyStore> {
        &self.keystore
    }

    /// Stores a string, encrypting it when a session key is present.
    pub async fn write(&self, key: &str, value: &str) -> Result<()> {
        let stored = match self.keystore.key() {
            Some(session_key) => {
                let envelope = crypto::encrypt(value, &session_key)?;
                serde_json::to_string(&envelope)
                    .map_err(|e| Error::Storage(format!("envelope serialization failed: {e}")))?
            }
            None => value.to_string(),
        };
        self.provider.set(key, &stored).await
    }

    /// Reads a string, transparently decrypting envelopes.
    ///
    /// Always returns *something* when a value is stored: the decrypted
    /// plaintext when possible, the raw stored string otherwise. Callers
    /// degrade to their empty default when the result fails to parse.
    pub async fn read(&self, key: &str) -> Result<Option<String>> {
        let Some(stored) = self.provider.get(key).await? else {
            return Ok(None);
        };
        match self.keystore.maybe_decrypt(&stored) {
            Some(plaintext) => Ok(Some(plaintext)),
            None => Ok(Some(stored)),
        }
    }

    /// Removes a stored value.
    pub async fn remove(&self, key: &str) -> Result<()> {
        self.provider.remove(key).await
    }

    /// Reads the full on-disk task set for a user, soft-deleted rows
    /// included. Missing or unparseable data degrades to an empty set.
    pub async fn read_all_tasks(&self, user_id: &str) -> Vec<Task> {
        let value = match self.read(&tasks_key(user_id)).await {
            Ok(Some(value)) => Some(value),
            // Pre-multi-user versions stored a single unscoped blob.
            Ok(None) => self.read(LEGACY_TASKS_KEY).await.unwrap_or_default(),
            Err(e) => {
                warn!("task blob read failed for user {user_id}: {e}");
                None
            }
        };
        let Some(value) = value else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<Task>>(&value) {
            Ok(tasks) => tasks,
            Err(_) => {
                warn!("task blob for user {user_id} is unreadable, starting empty");
                Vec::new()
            }
        }
    }

    /// Writes the full on-disk task set for a user. Failures propagate.
    pub async fn write_all_tasks(&self, user_id: &str, tasks: &[Task]) -> Result<()> {
        let json = serde_json::to_string(tasks)
            .map_err(|e| Error::Storage(format!("task serialization failed: {e}")))?;
        self.write(&tasks_key(user_id), &json).await
    }

    /// Reads the retry queue for a user, degrading to an empty queue.
    pub async fn read_queue(&self, user_id: &str) -> SyncQueue {
        let value = match self.read(&queue_key(user_id)).await {
            Ok(Some(value)) => value,
            Ok(None) => return SyncQueue::default(),
            Err(e) => {
                warn!("queue read failed for user {user_id}: {e}");
                return SyncQueue::default();
            }
        };
        serde_json::from_str(&value).unwrap_or_default()
    }

    /// Writes the retry queue for a user. Failures propagate.
    pub async fn write_queue(&self, user_id: &str, queue: &SyncQueue) -> Result<()> {
        let json = serde_json::to_string(queue)
            .map_err(|e| Error::Storage(format!("queue serialization failed: {e}")))?;
        self.write(&queue_key(user_id), &json).await
    }
}
