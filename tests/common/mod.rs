//! Shared test fixtures: a scriptable in-memory remote backend and a
//! fully wired service.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use taskstash::config::Config;
use taskstash::keystore::KeyStore;
use taskstash::remote::{RemoteBackend, RemoteError, TaskDto};
use taskstash::storage::{LocalStore, MemoryProvider};
use taskstash::sync::SyncService;
use taskstash::Session;

pub const USER: &str = "user-1";

#[derive(Default)]
struct MockState {
    tasks: Vec<TaskDto>,
    next_id: u64,
    offline: bool,
    fail_remaining: u32,
    list_calls: u32,
    create_calls: u32,
    update_calls: u32,
    delete_calls: u32,
}

/// In-memory remote backend with scriptable failures.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// When offline, every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Fails the next `n` calls, then recovers.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().fail_remaining = n;
    }

    pub fn remote_tasks(&self) -> Vec<TaskDto> {
        self.state.lock().unwrap().tasks.clone()
    }

    /// Plants a task on the remote side, as if created from another device.
    pub fn seed_remote(&self, mut dto: TaskDto) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let remote_id = format!("r{}", state.next_id);
        dto.remote_id = Some(remote_id.clone());
        state.tasks.push(dto);
        remote_id
    }

    pub fn create_calls(&self) -> u32 {
        self.state.lock().unwrap().create_calls
    }

    pub fn update_calls(&self) -> u32 {
        self.state.lock().unwrap().update_calls
    }

    pub fn delete_calls(&self) -> u32 {
        self.state.lock().unwrap().delete_calls
    }

    fn check_available(state: &mut MockState) -> Result<(), RemoteError> {
        if state.offline {
            return Err(RemoteError::Network("simulated outage".into()));
        }
        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            return Err(RemoteError::Network("simulated transient failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    async fn list_tasks(&self, user_id: &str) -> Result<Vec<TaskDto>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        Self::check_available(&mut state)?;
        Ok(state
            .tasks
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_task(&self, _user_id: &str, task: &TaskDto) -> Result<TaskDto, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        Self::check_available(&mut state)?;
        state.next_id += 1;
        let mut stored = task.clone();
        stored.remote_id = Some(format!("r{}", state.next_id));
        state.tasks.push(stored.clone());
        Ok(stored)
    }

    async fn update_task(
        &self,
        _user_id: &str,
        remote_id: &str,
        task: &TaskDto,
    ) -> Result<TaskDto, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.update_calls += 1;
        Self::check_available(&mut state)?;
        let stored = state
            .tasks
            .iter_mut()
            .find(|t| t.remote_id.as_deref() == Some(remote_id))
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))?;
        let mut updated = task.clone();
        updated.remote_id = Some(remote_id.to_string());
        *stored = updated.clone();
        Ok(updated)
    }

    async fn delete_task(&self, _user_id: &str, remote_id: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.delete_calls += 1;
        Self::check_available(&mut state)?;
        state
            .tasks
            .retain(|t| t.remote_id.as_deref() != Some(remote_id));
        Ok(())
    }
}

pub struct TestBed {
    pub backend: Arc<MockBackend>,
    pub store: Arc<LocalStore>,
    pub service: SyncService,
}

/// Wires a service over in-memory storage with a logged-in session.
pub fn bed_with_config(config: Config) -> TestBed {
    let backend = Arc::new(MockBackend::new());
    let store = Arc::new(LocalStore::new(
        Arc::new(MemoryProvider::new()),
        Arc::new(KeyStore::new()),
    ));
    let service = SyncService::new(store.clone(), backend.clone(), &config);
    service
        .on_login(Session::new(USER))
        .expect("login should succeed");
    TestBed {
        backend,
        store,
        service,
    }
}

pub fn bed() -> TestBed {
    bed_with_config(Config::default())
}

/// Clears backoff deadlines so the next drain retries immediately.
pub async fn clear_backoff(store: &LocalStore, user_id: &str) {
    let mut queue = store.read_queue(user_id).await;
    for item in &mut queue.items {
        item.next_retry_at = None;
    }
    store
        .write_queue(user_id, &queue)
        .await
        .expect("queue write should succeed");
}
