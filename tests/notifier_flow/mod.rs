//! End-to-end change notification against the in-memory collaborator
use std::sync::Arc;
use std::time::Duration;

use d_notify::ChangeSource;
use d_notify::ChangeType;
use d_notify::Error;
use d_notify::MemStorage;
use d_notify::StorageCollaborator;
use d_notify::WatchOptions;
use serde_json::json;

use crate::common::enable_logger;
use crate::common::settle;
use crate::common::start;
use crate::common::Events;

#[tokio::test(start_paused = true)]
async fn test_unchanged_orders_produce_a_single_created() {
    let _log = enable_logger();
    let storage = Arc::new(MemStorage::new());
    storage.write("orders", json!({"status": "new"})).await.unwrap();
    let notifier = start(&storage);
    let events = Events::default();

    let _sub = notifier
        .subscribe_fn("orders", events.listener(), WatchOptions::default())
        .unwrap();
    settle(Duration::from_millis(350)).await;

    assert!(storage.read_count() >= 3);
    assert_eq!(events.types(), vec![ChangeType::Created]);
}

#[tokio::test(start_paused = true)]
async fn test_changes_by_another_writer_reach_watchers() {
    let storage = Arc::new(MemStorage::new());
    let notifier = start(&storage);
    let events = Events::default();
    let _sub = notifier
        .subscribe_fn("cart", events.listener(), WatchOptions::default())
        .unwrap();
    settle(Duration::from_millis(10)).await;

    // another process sharing the same storage
    storage.write("cart", json!({"items": 1})).await.unwrap();
    settle(Duration::from_millis(100)).await;
    storage.write("cart", json!({"items": 2})).await.unwrap();
    settle(Duration::from_millis(100)).await;
    storage.delete("cart").await.unwrap();
    settle(Duration::from_millis(100)).await;

    assert_eq!(
        events.types(),
        vec![ChangeType::Created, ChangeType::Updated, ChangeType::Deleted]
    );
    let updated = &events.all()[1];
    assert_eq!(updated.previous_value, Some(json!({"items": 1})));
    assert_eq!(updated.value, Some(json!({"items": 2})));
    assert!(events.all().iter().all(|e| e.source == ChangeSource::Poll));
}

#[tokio::test(start_paused = true)]
async fn test_push_capable_storage_notifies_between_ticks() {
    let storage = Arc::new(MemStorage::with_push());
    let notifier = start(&storage);
    let events = Events::default();
    let _sub = notifier
        .subscribe_fn("k", events.listener(), WatchOptions::default())
        .unwrap();
    settle(Duration::from_millis(10)).await;

    storage.write("k", json!("pushed")).await.unwrap();
    settle(Duration::from_millis(1)).await;

    let all = events.all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].source, ChangeSource::Push);
    assert_eq!(all[0].value, Some(json!("pushed")));
}

#[tokio::test(start_paused = true)]
async fn test_watch_lifecycle_follows_subscriptions() {
    let storage = Arc::new(MemStorage::new());
    let notifier = start(&storage);
    let events = Events::default();

    let a = notifier
        .subscribe_fn("a", events.listener(), WatchOptions::default())
        .unwrap();
    let b = notifier
        .subscribe_fn("b", events.listener(), WatchOptions::default())
        .unwrap();
    settle(Duration::from_millis(10)).await;
    assert_eq!(notifier.status().watched_key_count, 2);

    drop(a);
    assert_eq!(notifier.status().watched_key_count, 1);
    assert!(notifier.status().polling);

    b.unsubscribe();
    let status = notifier.status();
    assert_eq!(status.watched_key_count, 0);
    assert!(!status.polling);

    let reads = storage.read_count();
    settle(Duration::from_secs(1)).await;
    assert_eq!(storage.read_count(), reads);
}

#[tokio::test(start_paused = true)]
async fn test_polling_interval_is_validated_and_applied() {
    let storage = Arc::new(MemStorage::new());
    let notifier = start(&storage);
    let events = Events::default();
    let _sub = notifier
        .subscribe_fn("k", events.listener(), WatchOptions::default())
        .unwrap();
    settle(Duration::from_millis(10)).await;

    assert!(matches!(notifier.set_polling_interval(50), Err(Error::Validation(_))));
    assert_eq!(notifier.status().polling_interval_ms, 100);

    // the restarted loop ticks right away
    notifier.set_polling_interval(1_000).unwrap();
    settle(Duration::from_millis(10)).await;
    let reads = storage.read_count();
    settle(Duration::from_millis(500)).await;
    assert_eq!(storage.read_count(), reads);
    settle(Duration::from_millis(600)).await;
    assert_eq!(storage.read_count(), reads + 1);
}

#[tokio::test(start_paused = true)]
async fn test_debounced_listener_sees_only_latest_change() {
    let storage = Arc::new(MemStorage::new());
    let notifier = start(&storage);
    let events = Events::default();
    let _sub = notifier
        .subscribe_fn(
            "k",
            events.listener(),
            WatchOptions::default().with_debounce(Duration::from_millis(200)),
        )
        .unwrap();

    for n in 1..=3 {
        notifier.write("k", json!(n)).await.unwrap();
        settle(Duration::from_millis(20)).await;
    }
    assert_eq!(events.len(), 0);

    settle(Duration::from_millis(300)).await;
    let all = events.all();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].value, Some(json!(3)));
}

#[tokio::test(start_paused = true)]
async fn test_filtered_listener_only_sees_deletes() {
    let storage = Arc::new(MemStorage::new());
    let notifier = start(&storage);
    let events = Events::default();
    let _sub = notifier
        .subscribe_fn(
            "k",
            events.listener(),
            WatchOptions::default().with_filter(|e| e.change_type == ChangeType::Deleted),
        )
        .unwrap();

    notifier.write("k", json!(1)).await.unwrap();
    notifier.write("k", json!(2)).await.unwrap();
    notifier.delete("k").await.unwrap();

    assert_eq!(events.types(), vec![ChangeType::Deleted]);
}

#[tokio::test(start_paused = true)]
async fn test_destroy_ends_everything() {
    let storage = Arc::new(MemStorage::with_push());
    let notifier = start(&storage);
    let events = Events::default();
    let _sub = notifier
        .subscribe_fn("k", events.listener(), WatchOptions::default())
        .unwrap();
    settle(Duration::from_millis(10)).await;
    assert_eq!(storage.push_channel_count(), 1);

    notifier.destroy();
    notifier.destroy();
    settle(Duration::from_millis(10)).await;

    assert_eq!(storage.push_channel_count(), 0);
    assert!(matches!(notifier.read("k").await, Err(Error::Shutdown)));

    storage.write("k", json!(1)).await.unwrap();
    settle(Duration::from_millis(500)).await;
    assert_eq!(events.len(), 0);
}
