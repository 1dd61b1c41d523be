//! Debounced write-back with a paused clock

use std::time::Duration;

use serde_json::{json, Value};
use zukit_store::prelude::*;
use zukit_store::testing::{
    advance_time, object, pause_time, resume_time, MockTransport, RecordingMiddleware,
};
use zukit_store::{assert_emitted, assert_not_emitted, count_emitted};

fn setup(mock: &MockTransport) -> StoreHandle {
    let context = StoreContext::new(RestConfig::default());
    context
        .register(
            StoreConfig::options("s").with_debounce(Duration::from_millis(500)),
            mock.clone(),
        )
        .unwrap()
}

async fn applied(store: &StoreHandle, key: &str) {
    let mut rx = store.watch();
    let partition = store.partition().to_string();
    let key = key.to_string();
    let _ = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|cache| cache.get(&partition, &key).is_some()),
    )
    .await
    .expect("write never applied");
}

#[tokio::test(start_paused = true)]
async fn test_queued_writes_coalesce_into_one_post() {
    let mock = MockTransport::new();
    let store = setup(&mock);

    store.queue_update(object(json!({ "a": 1 }))).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    store.queue_update(object(json!({ "b": 2, "a": 3 }))).unwrap();
    assert_eq!(store.pending_len(), 2);

    // the second write restarted the window
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(mock.post_count(), 0);
    assert_eq!(store.peek(&ValueRequest::new("a")), Resolved::Pending);

    tokio::time::sleep(Duration::from_millis(200)).await;
    applied(&store, "a").await;

    assert_eq!(mock.post_count(), 1);
    assert_eq!(mock.posts()[0]["values"], json!({ "a": 3, "b": 2 }));
    assert_eq!(store.get_option("a", Value::Null), json!(3));
    assert_eq!(store.get_option("b", Value::Null), json!(2));
    assert_eq!(store.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_queued_writes_fire_hooks() {
    let mock = MockTransport::new();
    let store = setup(&mock);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    store.on_update("mode", move |key, value| {
        let _ = tx.send((key.to_string(), value.clone()));
    });

    store.queue_update(object(json!({ "mode": "dark" }))).unwrap();

    let fired = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap();
    assert_eq!(fired, Some(("mode".to_string(), json!("dark"))));
}

#[tokio::test(start_paused = true)]
async fn test_flush_posts_now() {
    let mock = MockTransport::new();
    let store = setup(&mock);

    store.queue_update(object(json!({ "a": 1 }))).unwrap();
    let confirmed = store.flush().await.unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(store.get_option("a", Value::Null), json!(1));

    // the debounced flush finds nothing left to send
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(mock.post_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_nested_queued_write_folds_into_parent() {
    let mock = MockTransport::new();
    let store = setup(&mock);

    store
        .queue_update(object(json!({ "colors": { "primary": "red" } })))
        .unwrap();
    store
        .queue_update(object(json!({ "colors.accent": "blue" })))
        .unwrap();
    assert_eq!(store.pending_len(), 1);

    applied(&store, "colors").await;
    assert_eq!(
        mock.posts()[0]["values"],
        json!({ "colors": { "primary": "red", "accent": "blue" } })
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_flush_leaves_cache_alone() {
    let mock = MockTransport::new().failing_posts();
    let store = setup(&mock);
    let before = store.snapshot();

    store.queue_update(object(json!({ "a": 1 }))).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(mock.post_count(), 1);
    assert_eq!(store.pending_len(), 0);
    assert_eq!(store.snapshot().to_json(), before.to_json());
}

#[tokio::test(start_paused = true)]
async fn test_flush_goes_through_the_reducer() {
    let mock = MockTransport::new();
    let recorder = RecordingMiddleware::new();
    let context = StoreContext::new(RestConfig::default());
    let store = context
        .register_with(
            StoreConfig::options("s").with_debounce(Duration::from_millis(500)),
            mock.clone(),
            recorder.clone(),
        )
        .unwrap();

    store.queue_update(object(json!({ "a": 1 }))).unwrap();
    assert!(store.flush_scheduled());
    assert_eq!(store.in_flight(), 1);

    applied(&store, "a").await;

    let actions = recorder.actions();
    assert_eq!(count_emitted!(actions, StoreAction::FlushQueued), 1);
    assert_emitted!(actions, StoreAction::UpdateValues { values } if values == &object(json!({ "a": 1 })));
    assert_not_emitted!(actions, StoreAction::UpdateValues { values } if values.is_empty());
    assert!(!store.flush_scheduled());
    assert_eq!(store.in_flight(), 0);
}

#[tokio::test]
async fn test_debounce_window_under_manual_clock() {
    pause_time();
    let mock = MockTransport::new();
    let store = setup(&mock);

    store.queue_update(object(json!({ "a": 1 }))).unwrap();
    // let the debounce task start its timer
    tokio::task::yield_now().await;
    advance_time(Duration::from_millis(499)).await;
    tokio::task::yield_now().await;
    assert_eq!(mock.post_count(), 0);
    assert!(store.flush_scheduled());

    advance_time(Duration::from_millis(1)).await;
    applied(&store, "a").await;
    assert_eq!(mock.post_count(), 1);
    assert_eq!(store.get_option("a", Value::Null), json!(1));
    resume_time();
}
