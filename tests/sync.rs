mod common;

use common::{bed, bed_with_config, clear_backoff, USER};

use taskstash::config::Config;
use taskstash::queue::QueueOp;
use taskstash::remote::TaskDto;
use taskstash::{Error, SyncState, TaskInput, TaskPatch};

fn remote_seed(title: &str, updated_at: &str) -> TaskDto {
    TaskDto {
        id: format!("remote-{title}"),
        user_id: USER.to_string(),
        title: title.to_string(),
        description: String::new(),
        photo_url: None,
        latitude: None,
        longitude: None,
        accuracy: None,
        done: false,
        created_at: "2024-01-01T00:00:00Z".to_string(),
        updated_at: updated_at.to_string(),
        remote_id: None,
        deleted: false,
    }
}

#[tokio::test]
async fn online_add_pushes_immediately_and_marks_synced() {
    let bed = bed();
    let task = bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();

    let stored = bed.store.read_all_tasks(USER).await;
    assert_eq!(stored[0].sync_state, Some(SyncState::Synced));
    assert!(stored[0].remote_id.is_some());

    let remote = bed.backend.remote_tasks();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].id, task.id);
    assert!(bed.store.read_queue(USER).await.items.is_empty());
}

#[tokio::test]
async fn offline_add_queues_a_create_and_marks_pending() {
    let bed = bed();
    bed.backend.set_offline(true);

    let task = bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();

    // The local write succeeded even though the push did not.
    let stored = bed.store.read_all_tasks(USER).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].sync_state, Some(SyncState::Pending));
    assert!(stored[0].remote_id.is_none());

    let queue = bed.store.read_queue(USER).await;
    assert_eq!(queue.items.len(), 1);
    assert_eq!(queue.items[0].task_id, task.id);
    assert!(matches!(queue.items[0].op, QueueOp::Create(_)));
    // The failure that put the item here is recorded from the start.
    assert!(queue.items[0].last_error.is_some());
    assert!(bed.backend.remote_tasks().is_empty());
}

#[tokio::test]
async fn queued_update_after_queued_create_does_not_duplicate_remote() {
    let bed = bed();
    bed.backend.set_offline(true);
    let task = bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();
    bed.service
        .update_task(
            &task.id,
            TaskPatch {
                done: Some(true),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(bed.store.read_queue(USER).await.items.len(), 2);

    bed.backend.set_offline(false);
    let status = bed.service.sync_now().await;

    // The create replay assigns the remote id; the update replay must pick
    // it up instead of creating a second remote copy.
    assert_eq!(status.queue_length, 0);
    let remote = bed.backend.remote_tasks();
    assert_eq!(remote.len(), 1);
    assert!(remote[0].done);
    assert_eq!(bed.backend.update_calls(), 1);

    let stored = bed.store.read_all_tasks(USER).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].sync_state, Some(SyncState::Synced));
}

#[tokio::test]
async fn sync_after_recovery_drains_the_queue() {
    let bed = bed();
    bed.backend.set_offline(true);
    let task = bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();

    bed.backend.set_offline(false);
    let status = bed.service.sync_now().await;

    assert_eq!(status.queue_length, 0);
    assert_eq!(status.succeeded_count, 1);
    assert_eq!(status.failed_count, 0);
    assert!(status.last_error.is_none());

    let stored = bed.store.read_all_tasks(USER).await;
    assert_eq!(stored[0].sync_state, Some(SyncState::Synced));
    assert!(stored[0].remote_id.is_some());
    assert_eq!(bed.backend.remote_tasks().len(), 1);
    assert_eq!(bed.backend.remote_tasks()[0].id, task.id);
}

#[tokio::test]
async fn transient_failures_retry_until_delivery_without_duplicates() {
    let bed = bed();
    // Initial push plus the first replay fail, the second replay succeeds.
    bed.backend.fail_next(2);
    bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();

    bed.service.sync_now().await;
    assert_eq!(bed.store.read_queue(USER).await.items.len(), 1);

    clear_backoff(&bed.store, USER).await;
    let status = bed.service.sync_now().await;

    assert_eq!(status.queue_length, 0);
    assert_eq!(bed.backend.create_calls(), 3);
    assert_eq!(bed.backend.remote_tasks().len(), 1);
    assert_eq!(
        bed.store.read_all_tasks(USER).await[0].sync_state,
        Some(SyncState::Synced)
    );
}

#[tokio::test]
async fn exhausted_retries_drop_the_item_and_mark_the_task_failed() {
    let mut config = Config::default();
    config.sync.max_retries = 2;
    let bed = bed_with_config(config);

    bed.backend.set_offline(true);
    bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();

    bed.service.sync_now().await;
    clear_backoff(&bed.store, USER).await;
    let status = bed.service.sync_now().await;

    assert_eq!(status.queue_length, 0);
    assert_eq!(status.failed_count, 1);

    let stored = bed.store.read_all_tasks(USER).await;
    assert_eq!(stored[0].sync_state, Some(SyncState::Failed));
    assert!(stored[0].last_sync_error.is_some());
    assert!(bed.backend.remote_tasks().is_empty());
}

#[tokio::test]
async fn items_in_backoff_are_skipped_not_retried() {
    let bed = bed();
    bed.backend.set_offline(true);
    bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();

    bed.backend.set_offline(false);
    // One failed replay puts the item into backoff.
    bed.backend.fail_next(1);
    bed.service.sync_now().await;
    let retries_after_first = bed.store.read_queue(USER).await.items[0].retries;

    // The deadline is seconds away, far longer than this test runs.
    bed.service.sync_now().await;
    let queue = bed.store.read_queue(USER).await;
    assert_eq!(queue.items.len(), 1);
    assert_eq!(queue.items[0].retries, retries_after_first);
}

#[tokio::test]
async fn deleting_a_never_pushed_task_never_calls_the_remote() {
    let bed = bed();
    bed.backend.set_offline(true);
    let task = bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();
    bed.service.delete_task(&task.id).await.unwrap();

    let queue = bed.store.read_queue(USER).await;
    let delete_item = queue
        .items
        .iter()
        .find(|i| matches!(i.op, QueueOp::Delete(_)))
        .expect("delete should be queued");
    match &delete_item.op {
        QueueOp::Delete(payload) => assert!(payload.remote_id.is_none()),
        _ => unreachable!(),
    }

    bed.backend.set_offline(false);
    clear_backoff(&bed.store, USER).await;
    bed.service.sync_now().await;

    assert!(bed.store.read_queue(USER).await.items.is_empty());
    assert_eq!(bed.backend.delete_calls(), 0);
}

#[tokio::test]
async fn deleting_a_synced_task_deletes_remotely() {
    let bed = bed();
    let task = bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();
    assert_eq!(bed.backend.remote_tasks().len(), 1);

    bed.service.delete_task(&task.id).await.unwrap();

    assert_eq!(bed.backend.delete_calls(), 1);
    assert!(bed.backend.remote_tasks().is_empty());
    assert!(bed.store.read_queue(USER).await.items.is_empty());
    // The row survives as a soft-deleted tombstone.
    let stored = bed.store.read_all_tasks(USER).await;
    assert_eq!(stored.len(), 1);
    assert!(stored[0].deleted);
}

#[tokio::test]
async fn updating_a_never_pushed_task_falls_back_to_create() {
    let bed = bed();
    bed.backend.set_offline(true);
    let task = bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();

    bed.backend.set_offline(false);
    bed.service
        .update_task(
            &task.id,
            TaskPatch {
                done: Some(true),
                ..TaskPatch::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(bed.backend.update_calls(), 0);
    assert_eq!(bed.backend.create_calls(), 2);
    let stored = bed.store.read_all_tasks(USER).await;
    assert_eq!(stored[0].sync_state, Some(SyncState::Synced));
    assert!(stored[0].remote_id.is_some());
}

#[tokio::test]
async fn toggle_done_routes_through_the_remote_update() {
    let bed = bed();
    let task = bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();

    let toggled = bed.service.toggle_done(&task.id).await.unwrap().unwrap();
    assert!(toggled.done);
    assert_eq!(bed.backend.update_calls(), 1);

    // Unknown ids are a no-op.
    assert!(bed.service.toggle_done("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn sync_pulls_tasks_created_on_another_device() {
    let bed = bed();
    bed.backend
        .seed_remote(remote_seed("from elsewhere", "2024-06-01T10:00:00Z"));

    let status = bed.service.sync_now().await;
    assert!(status.last_error.is_none());

    let view = bed.service.subscribe_tasks().borrow().clone();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].title, "from elsewhere");
    assert_eq!(view[0].sync_state, Some(SyncState::Synced));
}

#[tokio::test]
async fn repeated_sync_against_an_unchanged_remote_is_stable() {
    let bed = bed();
    bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();

    bed.service.sync_now().await;
    bed.service.sync_now().await;

    assert_eq!(bed.backend.remote_tasks().len(), 1);
    assert_eq!(bed.store.read_all_tasks(USER).await.len(), 1);
    assert_eq!(bed.service.subscribe_tasks().borrow().len(), 1);
}

#[tokio::test]
async fn pull_failure_surfaces_in_status_without_aborting() {
    let bed = bed();
    bed.backend.set_offline(true);

    let status = bed.service.sync_now().await;
    assert!(!status.syncing);
    assert!(status.last_error.is_some());
    assert!(!*bed.service.subscribe_syncing().borrow());
}

#[tokio::test]
async fn status_stream_reflects_the_last_pass() {
    let bed = bed();
    bed.backend.set_offline(true);
    bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();
    bed.backend.set_offline(false);

    bed.service.sync_now().await;

    let status = bed.service.subscribe_status().borrow().clone();
    assert!(!status.syncing);
    assert_eq!(status.queue_length, 0);
    assert_eq!(status.succeeded_count, 1);
    assert_eq!(status.pending_count, 0);
}

#[tokio::test]
async fn import_inserts_unknown_remote_tasks_without_overwriting() {
    let bed = bed();
    let local = bed.service.add_task(TaskInput::titled("mine")).await.unwrap();
    bed.backend
        .seed_remote(remote_seed("elsewhere", "2024-06-01T10:00:00Z"));
    let mut gone = remote_seed("gone", "2024-06-01T10:00:00Z");
    gone.deleted = true;
    bed.backend.seed_remote(gone);

    let imported = bed
        .service
        .import_from_server(|_| async { true })
        .await
        .unwrap();

    // The deleted remote task is skipped, the local task untouched.
    assert_eq!(imported, 1);
    let view = bed.service.subscribe_tasks().borrow().clone();
    assert_eq!(view.len(), 2);
    let kept = view.iter().find(|t| t.id == local.id).unwrap();
    assert_eq!(kept.title, "mine");

    // A second import finds nothing new.
    let again = bed
        .service
        .import_from_server(|_| async { true })
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn import_respects_the_confirmation_callback() {
    let bed = bed();
    bed.backend
        .seed_remote(remote_seed("elsewhere", "2024-06-01T10:00:00Z"));

    let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen_in_callback = seen.clone();
    let imported = bed
        .service
        .import_from_server(move |count| async move {
            seen_in_callback.store(count, std::sync::atomic::Ordering::SeqCst);
            false
        })
        .await
        .unwrap();

    assert_eq!(imported, 0);
    assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert!(bed.service.subscribe_tasks().borrow().is_empty());
}

#[tokio::test]
async fn import_propagates_remote_failures() {
    let bed = bed();
    bed.backend.set_offline(true);

    let result = bed.service.import_from_server(|_| async { true }).await;
    assert!(matches!(result, Err(Error::Remote(_))));
}

#[tokio::test]
async fn logout_clears_the_published_view_but_not_storage() {
    let bed = bed();
    bed.service.add_task(TaskInput::titled("Buy milk")).await.unwrap();

    bed.service.on_logout().await;
    assert!(bed.service.subscribe_tasks().borrow().is_empty());
    assert_eq!(bed.store.read_all_tasks(USER).await.len(), 1);

    // Mutations without a session are rejected.
    assert!(bed.service.add_task(TaskInput::titled("nope")).await.is_err());
}
