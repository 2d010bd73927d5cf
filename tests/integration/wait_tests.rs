use std::time::{Duration, Instant};

use hcom::filter::Filter;
use hcom::wait::{WaitCoordinator, Waited};
use hcom::GlobalConfig;

use super::test_helpers::{register, send, test_store};

fn fast_config() -> GlobalConfig {
    GlobalConfig::from_toml_str("poll_interval_ms = 25\nipc_name = \"hcom-test-no-daemon\"")
        .expect("config")
}

#[tokio::test]
async fn wait_times_out_at_roughly_the_deadline() {
    let (_dir, store) = test_store().await;
    let config = fast_config();
    let coordinator = WaitCoordinator::new(&store, &config);

    let mut filter = Filter::new();
    filter.push("type", "=message").expect("push");

    let started = Instant::now();
    let outcome = coordinator
        .wait(&filter, Duration::from_secs(2))
        .await
        .expect("wait");
    let elapsed = started.elapsed();

    assert_eq!(outcome, Waited::TimedOut);
    assert!(elapsed >= Duration::from_millis(1800), "not immediate: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "not hung: {elapsed:?}");
}

#[tokio::test]
async fn wait_returns_promptly_when_another_process_appends() {
    let (_dir, store) = test_store().await;
    let config = fast_config();

    register(&store, "nova", None).await;

    let writer_store = store.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        send(&writer_store, "nova", "wake up").await
    });

    let coordinator = WaitCoordinator::new(&store, &config);
    let mut filter = Filter::new();
    filter.push("type", "=message").expect("push");

    let started = Instant::now();
    let outcome = coordinator
        .wait(&filter, Duration::from_secs(10))
        .await
        .expect("wait");
    let elapsed = started.elapsed();

    let expected_id = writer.await.expect("writer task");
    match outcome {
        Waited::Matched(event) => assert_eq!(event.id, expected_id),
        Waited::TimedOut => panic!("wait should have matched"),
    }
    assert!(elapsed < Duration::from_secs(5), "woke promptly: {elapsed:?}");
}

#[tokio::test]
async fn wait_only_matches_the_filter() {
    let (_dir, store) = test_store().await;
    let config = fast_config();

    register(&store, "nova", None).await;
    register(&store, "veki", None).await;

    let writer_store = store.clone();
    let writer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        send(&writer_store, "veki", "not from nova").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        send(&writer_store, "nova", "from nova").await
    });

    let coordinator = WaitCoordinator::new(&store, &config);
    let mut filter = Filter::new();
    filter
        .push("type", "=message")
        .expect("push")
        .push("agent", "=nova")
        .expect("push");

    let outcome = coordinator
        .wait(&filter, Duration::from_secs(10))
        .await
        .expect("wait");
    let expected_id = writer.await.expect("writer task");

    match outcome {
        Waited::Matched(event) => {
            assert_eq!(event.id, expected_id);
            assert_eq!(event.instance, "nova");
        }
        Waited::TimedOut => panic!("wait should have matched"),
    }
}

#[tokio::test]
async fn events_already_in_the_log_do_not_satisfy_a_new_wait() {
    let (_dir, store) = test_store().await;
    let config = fast_config();

    register(&store, "nova", None).await;
    send(&store, "nova", "old news").await;

    let coordinator = WaitCoordinator::new(&store, &config);
    let mut filter = Filter::new();
    filter.push("type", "=message").expect("push");

    let outcome = coordinator
        .wait(&filter, Duration::from_millis(400))
        .await
        .expect("wait");
    assert_eq!(outcome, Waited::TimedOut, "wait starts at the current head");
}

#[tokio::test]
async fn invalid_filter_is_rejected_before_blocking() {
    let (_dir, store) = test_store().await;
    let config = fast_config();
    let coordinator = WaitCoordinator::new(&store, &config);

    let mut filter = Filter::new();
    filter.raw("droptable = 1");

    let started = Instant::now();
    assert!(coordinator
        .wait(&filter, Duration::from_secs(5))
        .await
        .is_err());
    assert!(started.elapsed() < Duration::from_millis(500));
}
