//! Synchronization service: the data layer callers talk to.
//!
//! [`SyncService`] wires the task repository, the local store and the remote
//! backend together. Every mutation persists locally first and then tries an
//! immediate remote push; push failures are converted into retry queue
//! entries and never surface to the mutating caller. [`SyncService::sync_now`]
//! runs a full pass (drain the retry queue with exponential backoff, pull
//! the remote task list, merge last-write-wins), guarded so at most one pass
//! runs at a time. Synchronization problems are visible only through the
//! status stream.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};

use crate::config::Config;
use crate::error::Result;
use crate::queue::{
    backoff_delay_secs, CreateTaskPayload, DeleteTaskPayload, QueueItem, QueueOp, SyncStatus,
    UpdateTaskPayload,
};
use crate::remote::{RemoteBackend, RemoteError, TaskDto};
use crate::repository::TaskRepository;
use crate::session::Session;
use crate::storage::LocalStore;
use crate::task::{Task, TaskInput, TaskPatch};

/// Service that keeps local task state and the remote backend converging.
pub struct SyncService {
    repo: Arc<TaskRepository>,
    store: Arc<LocalStore>,
    backend: Arc<dyn RemoteBackend>,
    max_retries: u32,
    kdf_iterations: u32,
    sync_in_progress: Mutex<bool>,
    syncing_tx: watch::Sender<bool>,
    status_tx: watch::Sender<SyncStatus>,
}

impl SyncService {
    pub fn new(store: Arc<LocalStore>, backend: Arc<dyn RemoteBackend>, config: &Config) -> Self {
        let (syncing_tx, _) = watch::channel(false);
        let (status_tx, _) = watch::channel(SyncStatus::default());
        Self {
            repo: Arc::new(TaskRepository::new(store.clone())),
            store,
            backend,
            max_retries: config.sync.max_retries,
            kdf_iterations: config.crypto.kdf_iterations,
            sync_in_progress: Mutex::new(false),
            syncing_tx,
            status_tx,
        }
    }

    /// The underlying repository, mostly useful to subscribe or inspect.
    pub fn repository(&self) -> &Arc<TaskRepository> {
        &self.repo
    }

    /// Stream of the current sorted, filtered task list.
    pub fn subscribe_tasks(&self) -> watch::Receiver<Vec<Task>> {
        self.repo.subscribe()
    }

    /// Stream of the syncing flag.
    pub fn subscribe_syncing(&self) -> watch::Receiver<bool> {
        self.syncing_tx.subscribe()
    }

    /// Stream of the sync status summary, republished after every pass.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Installs a fresh session. When the session carries an identity token
    /// the encryption key is derived from it, so subsequent writes are
    /// encrypted.
    pub fn on_login(&self, session: Session) -> Result<()> {
        if let Some(token) = session.id_token() {
            self.store
                .keystore()
                .set_from_token(token, self.kdf_iterations)?;
        }
        info!("session opened for user {}", session.user_id());
        self.repo.set_session(session);
        Ok(())
    }

    /// Drops the session, the in-memory task view and the encryption key.
    /// Called by whatever owns the session lifecycle.
    pub async fn on_logout(&self) {
        self.repo.on_logout().await;
        self.store.keystore().clear();
        info!("session closed");
    }

    /// Creates a task locally and fires a remote create. The returned task
    /// reflects local state; the remote outcome is reported through the
    /// task's sync state, never as an error here.
    pub async fn add_task(&self, input: TaskInput) -> Result<Task> {
        let task = self.repo.add(input).await?;
        self.push_create(&task).await;
        Ok(task)
    }

    /// Patches a task locally and fires a remote update (or create, when
    /// the task was never pushed successfully).
    pub async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let task = self.repo.update(id, patch).await?;
        self.push_update(&task).await;
        Ok(task)
    }

    /// Soft-deletes a task locally and fires a remote delete. Unknown ids
    /// are a no-op.
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        if let Some(task) = self.repo.delete(id).await? {
            self.push_delete(&task).await;
        }
        Ok(())
    }

    /// Flips the done flag. Unknown ids are a no-op.
    pub async fn toggle_done(&self, id: &str) -> Result<Option<Task>> {
        self.repo.ensure_loaded().await?;
        let Some(task) = self.repo.get_task_by_id(id) else {
            return Ok(None);
        };
        let patch = TaskPatch {
            done: Some(!task.done),
            ..TaskPatch::default()
        };
        self.update_task(id, patch).await.map(Some)
    }

    /// Moves a task one position up in the manual ordering. Local-only.
    pub async fn move_up(&self, id: &str) -> Result<()> {
        self.repo.move_up(id).await
    }

    /// Moves a task one position down in the manual ordering. Local-only.
    pub async fn move_down(&self, id: &str) -> Result<()> {
        self.repo.move_down(id).await
    }

    /// Runs one sync pass. Returns immediately with the current status when
    /// a pass is already running; at most one pass runs per process. A
    /// pass's own failure is reflected in the returned status, never thrown.
    pub async fn sync_now(&self) -> SyncStatus {
        {
            let mut guard = self.sync_in_progress.lock().await;
            if *guard {
                debug!("sync already in progress, skipping");
                return self.status_tx.borrow().clone();
            }
            *guard = true;
        }
        self.syncing_tx.send_replace(true);

        let status = match self.perform_sync().await {
            Ok(status) => status,
            Err(e) => {
                error!("sync pass failed: {e}");
                let mut status = self.status_tx.borrow().clone();
                status.syncing = false;
                status.last_error = Some(e.to_string());
                status
            }
        };
        self.status_tx.send_replace(status.clone());

        self.syncing_tx.send_replace(false);
        *self.sync_in_progress.lock().await = false;
        status
    }

    /// Pulls the remote task list and imports tasks not yet known locally,
    /// without overwriting anything. The confirmation callback receives the
    /// remote task count and can abort the import by returning `false`.
    /// Unlike [`sync_now`](Self::sync_now), failures propagate to the
    /// caller: an import is an explicit user action, not a background pass.
    pub async fn import_from_server<F, Fut>(&self, confirm: F) -> Result<usize>
    where
        F: FnOnce(usize) -> Fut,
        Fut: Future<Output = bool>,
    {
        self.repo.ensure_loaded().await?;
        let user_id = self.repo.current_user()?;

        let remote = self.backend.list_tasks(&user_id).await?;
        if remote.is_empty() {
            return Ok(0);
        }
        if !confirm(remote.len()).await {
            info!("import of {} remote tasks declined", remote.len());
            return Ok(0);
        }
        self.repo.import_remote(remote).await
    }

    /// Internal sync pass: drain, pull, merge, recompute status.
    async fn perform_sync(&self) -> Result<SyncStatus> {
        self.repo.ensure_loaded().await?;
        let user_id = self.repo.current_user()?;
        info!("starting sync pass for user {user_id}");

        self.drain_queue(&user_id).await?;

        // Pull failures must not abort the pass; they only show up in the
        // status summary.
        let pull_error = match self.backend.list_tasks(&user_id).await {
            Ok(remote) => {
                debug!("fetched {} remote tasks", remote.len());
                self.repo.merge_remote(remote).await?;
                None
            }
            Err(e) => {
                warn!("remote pull failed: {e}");
                Some(e.to_string())
            }
        };

        let queue = self.store.read_queue(&user_id).await;
        Ok(SyncStatus {
            syncing: false,
            queue_length: queue.items.len(),
            succeeded_count: queue.success_count,
            failed_count: queue.fail_count,
            pending_count: queue.items.len(),
            last_error: pull_error,
        })
    }

    /// Replays queued operations against the remote backend. Items in
    /// backoff are skipped and revisited on the next pass; an item leaves
    /// the queue only by succeeding or by exhausting its retries.
    async fn drain_queue(&self, user_id: &str) -> Result<()> {
        let mut queue = self.store.read_queue(user_id).await;
        let now_ms = Utc::now().timestamp_millis();
        let mut remaining = Vec::with_capacity(queue.items.len());
        let mut succeeded = 0u64;
        let mut failed = 0u64;

        for mut item in std::mem::take(&mut queue.items) {
            if item.in_backoff(now_ms) {
                remaining.push(item);
                continue;
            }

            match self.replay(user_id, &item).await {
                Ok(remote_id) => {
                    succeeded += 1;
                    if let Err(e) = self.repo.mark_synced(&item.task_id, remote_id).await {
                        warn!("failed to record sync result for {}: {e}", item.task_id);
                    }
                }
                Err(e) => {
                    item.retries += 1;
                    item.last_error = Some(e.to_string());
                    if item.retries >= item.max_retries {
                        // Terminal: dropped from the queue, never retried
                        // automatically again.
                        failed += 1;
                        error!(
                            "queue item {} failed permanently after {} attempts: {e}",
                            item.id, item.retries
                        );
                        if let Err(e) = self
                            .repo
                            .mark_sync_state(
                                &item.task_id,
                                crate::task::SyncState::Failed,
                                item.last_error.clone(),
                            )
                            .await
                        {
                            warn!("failed to record failure for {}: {e}", item.task_id);
                        }
                    } else {
                        let delay = backoff_delay_secs(item.retries);
                        item.next_retry_at = Some(now_ms + (delay * 1000.0) as i64);
                        debug!(
                            "queue item {} failed (attempt {}), retrying in {delay:.1}s",
                            item.id, item.retries
                        );
                        remaining.push(item);
                    }
                }
            }
        }

        queue.items = remaining;
        queue.last_sync_at = now_ms;
        queue.success_count += succeeded;
        queue.fail_count += failed;
        self.store.write_queue(user_id, &queue).await?;

        if succeeded > 0 || failed > 0 {
            info!("queue drained: {succeeded} delivered, {failed} dropped");
        }
        Ok(())
    }

    /// Replays one queue item. Returns the remote id to record, if a new
    /// one was assigned.
    async fn replay(
        &self,
        user_id: &str,
        item: &QueueItem,
    ) -> std::result::Result<Option<String>, RemoteError> {
        match &item.op {
            QueueOp::Create(payload) => {
                let remote = self.backend.create_task(user_id, &payload.task).await?;
                Ok(remote.remote_id)
            }
            QueueOp::Update(payload) => {
                // A queued create earlier in this drain may have assigned a
                // remote id after this snapshot was taken; the live task is
                // authoritative. Replaying as a create without that check
                // would duplicate the remote copy.
                let remote_id = match payload.remote_id.clone() {
                    Some(remote_id) => Some(remote_id),
                    None => self.stored_remote_id(user_id, &item.task_id).await,
                };
                match remote_id {
                    Some(remote_id) => {
                        self.backend
                            .update_task(user_id, &remote_id, &payload.task)
                            .await?;
                        Ok(Some(remote_id))
                    }
                    // Never created remotely; the update becomes a create.
                    None => {
                        let remote = self.backend.create_task(user_id, &payload.task).await?;
                        Ok(remote.remote_id)
                    }
                }
            }
            QueueOp::Delete(payload) => match &payload.remote_id {
                Some(remote_id) => {
                    self.backend.delete_task(user_id, remote_id).await?;
                    Ok(None)
                }
                // The remote copy never existed; nothing to delete.
                None => Ok(None),
            },
        }
    }

    /// Current remote id of a task as stored, if any.
    async fn stored_remote_id(&self, user_id: &str, task_id: &str) -> Option<String> {
        self.store
            .read_all_tasks(user_id)
            .await
            .into_iter()
            .find(|t| t.id == task_id)
            .and_then(|t| t.remote_id)
    }

    async fn push_create(&self, task: &Task) {
        let user_id = task.user_id.clone();
        match self.backend.create_task(&user_id, &TaskDto::from(task)).await {
            Ok(remote) => {
                if let Err(e) = self.repo.mark_synced(&task.id, remote.remote_id).await {
                    warn!("failed to record created task {}: {e}", task.id);
                }
            }
            Err(e) => {
                debug!("remote create for {} failed, queuing: {e}", task.id);
                self.enqueue(
                    task,
                    QueueOp::Create(CreateTaskPayload {
                        task: TaskDto::from(task),
                    }),
                    Some(e.to_string()),
                )
                .await;
            }
        }
    }

    async fn push_update(&self, task: &Task) {
        let user_id = task.user_id.clone();
        let result = match &task.remote_id {
            Some(remote_id) => self
                .backend
                .update_task(&user_id, remote_id, &TaskDto::from(task))
                .await
                .map(|_| task.remote_id.clone()),
            // No acknowledged remote copy yet, push a create instead.
            None => self
                .backend
                .create_task(&user_id, &TaskDto::from(task))
                .await
                .map(|remote| remote.remote_id),
        };
        match result {
            Ok(remote_id) => {
                if let Err(e) = self.repo.mark_synced(&task.id, remote_id).await {
                    warn!("failed to record updated task {}: {e}", task.id);
                }
            }
            Err(e) => {
                debug!("remote update for {} failed, queuing: {e}", task.id);
                self.enqueue(
                    task,
                    QueueOp::Update(UpdateTaskPayload {
                        remote_id: task.remote_id.clone(),
                        task: TaskDto::from(task),
                    }),
                    Some(e.to_string()),
                )
                .await;
            }
        }
    }

    async fn push_delete(&self, task: &Task) {
        let Some(remote_id) = &task.remote_id else {
            // Never created remotely. Record the delete anyway so the
            // offline flow stays observable; the drain drops it without a
            // remote call.
            self.enqueue(
                task,
                QueueOp::Delete(DeleteTaskPayload {
                    task_id: task.id.clone(),
                    remote_id: None,
                }),
                None,
            )
            .await;
            return;
        };
        match self.backend.delete_task(&task.user_id, remote_id).await {
            Ok(()) => {
                if let Err(e) = self.repo.mark_synced(&task.id, None).await {
                    warn!("failed to record deleted task {}: {e}", task.id);
                }
            }
            Err(e) => {
                debug!("remote delete for {} failed, queuing: {e}", task.id);
                self.enqueue(
                    task,
                    QueueOp::Delete(DeleteTaskPayload {
                        task_id: task.id.clone(),
                        remote_id: Some(remote_id.clone()),
                    }),
                    Some(e.to_string()),
                )
                .await;
            }
        }
    }

    /// Appends a queue item and marks the task pending. Storage failures
    /// here are logged, not propagated: the local mutation already
    /// succeeded from the caller's point of view.
    async fn enqueue(&self, task: &Task, op: QueueOp, last_error: Option<String>) {
        let op_name = match &op {
            QueueOp::Create(_) => "create",
            QueueOp::Update(_) => "update",
            QueueOp::Delete(_) => "delete",
        };
        let mut queue = self.store.read_queue(&task.user_id).await;
        let mut item = QueueItem::new(task.id.clone(), op, self.max_retries);
        item.last_error = last_error.clone();
        queue.items.push(item);
        if let Err(e) = self.store.write_queue(&task.user_id, &queue).await {
            error!("failed to persist queue item for {}: {e}", task.id);
        } else {
            info!("enqueued {op_name} for task {}", task.id);
        }
        if let Err(e) = self
            .repo
            .mark_sync_state(&task.id, crate::task::SyncState::Pending, last_error)
            .await
        {
            warn!("failed to mark task {} pending: {e}", task.id);
        }
    }
}
