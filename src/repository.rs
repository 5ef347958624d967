//! Task repository: canonical per-user task collection.
//!
//! The repository owns the persisted task blob for the active user and the
//! in-memory view published to subscribers. All mutations persist the full
//! on-disk set (soft-deleted rows included) and republish the filtered,
//! sorted view. Remote concerns live in [`crate::sync`]; this layer is
//! local-only apart from [`merge_remote`](TaskRepository::merge_remote),
//! which folds a pulled remote snapshot into local state.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use log::{debug, info};
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::remote::TaskDto;
use crate::session::Session;
use crate::storage::LocalStore;
use crate::task::{now_iso, SyncState, Task, TaskInput, TaskPatch};

pub struct TaskRepository {
    store: Arc<LocalStore>,
    session: Mutex<Option<Session>>,
    loaded_for: tokio::sync::Mutex<Option<String>>,
    tasks_tx: watch::Sender<Vec<Task>>,
}

impl TaskRepository {
    pub fn new(store: Arc<LocalStore>) -> Self {
        let (tasks_tx, _) = watch::channel(Vec::new());
        Self {
            store,
            session: Mutex::new(None),
            loaded_for: tokio::sync::Mutex::new(None),
            tasks_tx,
        }
    }

    /// Subscribes to the published task view. Receivers always observe the
    /// latest published state.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Task>> {
        self.tasks_tx.subscribe()
    }

    /// Installs the session for a freshly authenticated user. A different
    /// user id invalidates the loaded view on the next operation.
    pub fn set_session(&self, session: Session) {
        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(session);
        }
    }

    /// Clears the session and the in-memory view. Storage is untouched.
    pub async fn on_logout(&self) {
        if let Ok(mut guard) = self.session.lock() {
            *guard = None;
        }
        *self.loaded_for.lock().await = None;
        self.tasks_tx.send_replace(Vec::new());
    }

    /// Active user id, or an authentication error when logged out.
    pub fn current_user(&self) -> Result<String> {
        self.session
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| s.user_id().to_string()))
            .ok_or_else(|| Error::Authentication("no active session".into()))
    }

    /// Loads the active user's tasks from storage unless already loaded for
    /// that user. Idempotent; call before every operation.
    pub async fn ensure_loaded(&self) -> Result<()> {
        let user_id = self.current_user()?;
        let mut loaded = self.loaded_for.lock().await;
        if loaded.as_deref() == Some(user_id.as_str()) {
            return Ok(());
        }
        let all = self.store.read_all_tasks(&user_id).await;
        debug!("loaded {} stored tasks for user {user_id}", all.len());
        self.publish(&all, &user_id);
        *loaded = Some(user_id);
        Ok(())
    }

    /// Latest published task, by id.
    pub fn get_task_by_id(&self, id: &str) -> Option<Task> {
        self.tasks_tx.borrow().iter().find(|t| t.id == id).cloned()
    }

    /// Creates a task and persists it. Validation failures reject before
    /// anything is written.
    pub async fn add(&self, input: TaskInput) -> Result<Task> {
        self.ensure_loaded().await?;
        let user_id = self.current_user()?;

        if input.title.trim().is_empty() {
            return Err(Error::Validation("task title must not be empty".into()));
        }

        let now = now_iso();
        let task = Task {
            id: input.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            user_id: user_id.clone(),
            title: input.title,
            description: input.description.unwrap_or_default(),
            photo_url: input.photo_url,
            local_photo_path: input.local_photo_path,
            latitude: input.latitude,
            longitude: input.longitude,
            accuracy: input.accuracy,
            done: input.done.unwrap_or(false),
            created_at: now.clone(),
            updated_at: now,
            deleted: false,
            remote_id: None,
            sync_state: None,
            last_sync_error: None,
            order: input.order,
        };

        let mut all = self.store.read_all_tasks(&user_id).await;
        all.push(task.clone());
        self.store.write_all_tasks(&user_id, &all).await?;
        self.publish(&all, &user_id);
        info!("added task {} for user {user_id}", task.id);
        Ok(task)
    }

    /// Applies a patch to an existing task, bumping `updated_at` and marking
    /// the task pending. The patch type cannot carry identity fields.
    pub async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        self.ensure_loaded().await?;
        let user_id = self.current_user()?;

        let mut all = self.store.read_all_tasks(&user_id).await;
        let task = all
            .iter_mut()
            .find(|t| t.id == id && t.user_id == user_id)
            .ok_or_else(|| Error::NotFound(format!("task {id}")))?;

        if let Some(title) = patch.title {
            if title.trim().is_empty() {
                return Err(Error::Validation("task title must not be empty".into()));
            }
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(photo_url) = patch.photo_url {
            task.photo_url = Some(photo_url);
        }
        if let Some(local_photo_path) = patch.local_photo_path {
            task.local_photo_path = Some(local_photo_path);
        }
        if let Some(latitude) = patch.latitude {
            task.latitude = Some(latitude);
        }
        if let Some(longitude) = patch.longitude {
            task.longitude = Some(longitude);
        }
        if let Some(accuracy) = patch.accuracy {
            task.accuracy = Some(accuracy);
        }
        if let Some(done) = patch.done {
            task.done = done;
        }
        if let Some(order) = patch.order {
            task.order = Some(order);
        }
        task.updated_at = now_iso();
        task.sync_state = Some(SyncState::Pending);
        task.last_sync_error = None;
        let updated = task.clone();

        self.store.write_all_tasks(&user_id, &all).await?;
        self.publish(&all, &user_id);
        Ok(updated)
    }

    /// Soft-deletes a task: the row stays in storage (a later remote delete
    /// still needs the remote id) but leaves every published view. Unknown
    /// ids are a no-op.
    pub async fn delete(&self, id: &str) -> Result<Option<Task>> {
        self.ensure_loaded().await?;
        let user_id = self.current_user()?;

        let mut all = self.store.read_all_tasks(&user_id).await;
        let Some(task) = all.iter_mut().find(|t| t.id == id && t.user_id == user_id) else {
            return Ok(None);
        };
        task.deleted = true;
        task.updated_at = now_iso();
        task.sync_state = Some(SyncState::Pending);
        let deleted = task.clone();

        self.store.write_all_tasks(&user_id, &all).await?;
        self.publish(&all, &user_id);
        info!("soft-deleted task {id} for user {user_id}");
        Ok(Some(deleted))
    }

    /// Swaps order values with the previous task in the sorted view.
    /// No-op when the task is already first or not found.
    pub async fn move_up(&self, id: &str) -> Result<()> {
        self.swap_order(id, -1).await
    }

    /// Swaps order values with the next task in the sorted view.
    /// No-op when the task is already last or not found.
    pub async fn move_down(&self, id: &str) -> Result<()> {
        self.swap_order(id, 1).await
    }

    async fn swap_order(&self, id: &str, direction: i64) -> Result<()> {
        self.ensure_loaded().await?;
        let user_id = self.current_user()?;

        let mut all = self.store.read_all_tasks(&user_id).await;
        let visible: Vec<Task> = all
            .iter()
            .filter(|t| t.user_id == user_id && !t.deleted)
            .cloned()
            .collect();
        let sorted = sort_tasks(visible);

        let Some(idx) = sorted.iter().position(|t| t.id == id) else {
            return Ok(());
        };
        let neighbor_idx = idx as i64 + direction;
        if neighbor_idx < 0 || neighbor_idx as usize >= sorted.len() {
            return Ok(());
        }
        let neighbor_idx = neighbor_idx as usize;

        // Positional swap of the two order values; positions double as
        // defaults for tasks that never had an explicit order.
        let own_order = sorted[idx].order.unwrap_or(idx as f64);
        let neighbor_order = sorted[neighbor_idx].order.unwrap_or(neighbor_idx as f64);
        let neighbor_id = sorted[neighbor_idx].id.clone();

        for task in all.iter_mut() {
            if task.id == id {
                task.order = Some(neighbor_order);
            } else if task.id == neighbor_id {
                task.order = Some(own_order);
            }
        }

        self.store.write_all_tasks(&user_id, &all).await?;
        self.publish(&all, &user_id);
        Ok(())
    }

    /// Records the remote acknowledgement of a push: stores the remote id
    /// when newly assigned and flips the task to synced.
    pub async fn mark_synced(&self, id: &str, remote_id: Option<String>) -> Result<()> {
        let user_id = self.current_user()?;
        let mut all = self.store.read_all_tasks(&user_id).await;
        let Some(task) = all.iter_mut().find(|t| t.id == id && t.user_id == user_id) else {
            return Ok(());
        };
        if remote_id.is_some() {
            task.remote_id = remote_id;
        }
        task.sync_state = Some(SyncState::Synced);
        task.last_sync_error = None;

        self.store.write_all_tasks(&user_id, &all).await?;
        self.publish(&all, &user_id);
        Ok(())
    }

    /// Records a push failure state (pending while queued, failed when
    /// retries are exhausted) without touching `updated_at`.
    pub async fn mark_sync_state(
        &self,
        id: &str,
        state: SyncState,
        error: Option<String>,
    ) -> Result<()> {
        let user_id = self.current_user()?;
        let mut all = self.store.read_all_tasks(&user_id).await;
        let Some(task) = all.iter_mut().find(|t| t.id == id && t.user_id == user_id) else {
            return Ok(());
        };
        task.sync_state = Some(state);
        task.last_sync_error = error;

        self.store.write_all_tasks(&user_id, &all).await?;
        self.publish(&all, &user_id);
        Ok(())
    }

    /// Folds a pulled remote snapshot into local state, last write wins.
    ///
    /// Remote tasks with an unknown remote id are inserted as new local
    /// tasks marked synced. For matching remote ids the strictly newer
    /// `updated_at` wins; local wins ties. Local tasks without a remote id
    /// are never touched; their own outbound create protects them.
    /// Returns the number of local mutations; re-running against an
    /// unchanged remote set is a no-op.
    pub async fn merge_remote(&self, remote: Vec<TaskDto>) -> Result<usize> {
        self.ensure_loaded().await?;
        let user_id = self.current_user()?;

        let mut all = self.store.read_all_tasks(&user_id).await;
        let mut changed = 0usize;

        for dto in remote {
            let Some(remote_id) = dto.remote_id.clone() else {
                debug!("skipping remote task {} with no remote id", dto.id);
                continue;
            };
            let local = all
                .iter_mut()
                .find(|t| t.user_id == user_id && t.remote_id.as_deref() == Some(&remote_id));

            match local {
                None => {
                    all.push(dto.into_local_task(&user_id));
                    changed += 1;
                }
                Some(task) => {
                    let local_time = task.updated_at_instant();
                    let remote_time = crate::task::parse_timestamp(&dto.updated_at)
                        .unwrap_or_default();
                    // Local wins ties; only a strictly newer remote overwrites.
                    if remote_time > local_time {
                        task.title = dto.title;
                        task.description = dto.description;
                        task.photo_url = dto.photo_url;
                        task.latitude = dto.latitude;
                        task.longitude = dto.longitude;
                        task.accuracy = dto.accuracy;
                        task.done = dto.done;
                        task.updated_at = dto.updated_at;
                        task.deleted = false;
                        task.sync_state = Some(SyncState::Synced);
                        task.last_sync_error = None;
                        changed += 1;
                    }
                }
            }
        }

        if changed > 0 {
            self.store.write_all_tasks(&user_id, &all).await?;
            self.publish(&all, &user_id);
            info!("merged remote state: {changed} local mutations");
        }
        Ok(changed)
    }

    /// Inserts remote tasks not yet known locally, marked synced. Unlike
    /// [`merge_remote`](Self::merge_remote) this never overwrites existing
    /// local state; deleted remote tasks are skipped. Returns the number of
    /// tasks inserted.
    pub async fn import_remote(&self, remote: Vec<TaskDto>) -> Result<usize> {
        self.ensure_loaded().await?;
        let user_id = self.current_user()?;

        let mut all = self.store.read_all_tasks(&user_id).await;
        let mut added = 0usize;

        for dto in remote {
            if dto.deleted {
                continue;
            }
            let known = dto.remote_id.as_deref().is_some_and(|remote_id| {
                all.iter()
                    .any(|t| t.user_id == user_id && t.remote_id.as_deref() == Some(remote_id))
            });
            if !known {
                all.push(dto.into_local_task(&user_id));
                added += 1;
            }
        }

        if added > 0 {
            self.store.write_all_tasks(&user_id, &all).await?;
            self.publish(&all, &user_id);
            info!("imported {added} remote tasks for user {user_id}");
        }
        Ok(added)
    }

    fn publish(&self, all: &[Task], user_id: &str) {
        let visible: Vec<Task> = all
            .iter()
            .filter(|t| t.user_id == user_id && !t.deleted)
            .cloned()
            .collect();
        self.tasks_tx.send_replace(sort_tasks(visible));
    }
}

/// Stable sort by manual order; tasks without an order keep their insertion
/// order behind all ordered tasks.
fn sort_tasks(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|a, b| {
        a.sort_key()
            .partial_cmp(&b.sort_key())
            .unwrap_or(Ordering::Equal)
    });
    tasks
}
