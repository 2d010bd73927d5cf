use chrono::Utc;
use hcom::config::StalenessConfig;
use hcom::daemon::{resolve_targets, DeliveryEngine};
use hcom::models::StatusVal;
use hcom::registry::InstanceRegistry;

use super::test_helpers::{register, send, set_status, stop, test_store};

#[tokio::test]
async fn broadcast_reaches_every_live_instance_except_the_sender() {
    let (_dir, store) = test_store().await;

    register(&store, "nova", None).await;
    register(&store, "veki", None).await;
    register(&store, "luna", None).await;
    register(&store, "gone", None).await;
    stop(&store, "gone").await;

    let id = send(&store, "nova", "hello everyone").await;
    let event = store.get(id).await.expect("get").expect("exists");

    let registry = InstanceRegistry::new(store.clone()).snapshot().await.expect("registry");
    let mut engine = DeliveryEngine::new(store.clone());
    let outcome = engine.on_message(&event, &registry).await.expect("route");

    // All registered instances are listening; delivery is immediate.
    assert_eq!(outcome.delivered, vec!["luna", "veki"]);
    assert!(outcome.queued.is_empty());

    let msg = store
        .get(id)
        .await
        .expect("get")
        .expect("exists")
        .as_message()
        .cloned()
        .expect("message");
    let mut delivered = msg.delivered_to.clone();
    delivered.sort();
    assert_eq!(delivered, vec!["luna", "veki"], "never the sender, never the stopped");
}

#[tokio::test]
async fn mentions_reach_only_matched_instances() {
    let (_dir, store) = test_store().await;

    register(&store, "luna", Some("team")).await; // displays as team-luna
    register(&store, "lunatic", None).await;
    register(&store, "luna_reviewer_1", None).await;

    let id = send(&store, "nova", "@luna please review").await;
    let event = store.get(id).await.expect("get").expect("exists");
    let msg = event.as_message().expect("message");

    let registry = InstanceRegistry::new(store.clone()).snapshot().await.expect("registry");
    let targets = resolve_targets(msg, &registry);
    assert_eq!(targets, vec!["luna"]);
}

#[tokio::test]
async fn unknown_mention_is_appended_but_delivered_to_nobody() {
    let (_dir, store) = test_store().await;

    register(&store, "nova", None).await;

    let id = send(&store, "nova", "@nobody are you there").await;
    let event = store.get(id).await.expect("get").expect("still appended");
    let msg = event.as_message().expect("message");

    let registry = InstanceRegistry::new(store.clone()).snapshot().await.expect("registry");
    let targets = resolve_targets(msg, &registry);
    assert!(targets.is_empty(), "callers detect this from the empty result");
}

#[tokio::test]
async fn active_targets_queue_until_their_next_tool_boundary() {
    let (_dir, store) = test_store().await;

    register(&store, "nova", None).await;
    register(&store, "veki", None).await;
    set_status(&store, "veki", StatusVal::Active, "tool:Bash", None).await;

    let id = send(&store, "nova", "@veki heads up").await;
    let event = store.get(id).await.expect("get").expect("exists");

    let registry = InstanceRegistry::new(store.clone()).snapshot().await.expect("registry");
    let mut engine = DeliveryEngine::new(store.clone());
    let outcome = engine.on_message(&event, &registry).await.expect("route");
    assert!(outcome.delivered.is_empty());
    assert_eq!(outcome.queued, vec!["veki"]);
    assert_eq!(engine.pending_for("veki"), 1);

    // Mid-turn: nothing lands yet.
    let msg = store
        .get(id)
        .await
        .expect("get")
        .expect("exists")
        .as_message()
        .cloned()
        .expect("message");
    assert!(msg.delivered_to.is_empty());

    // The next status report is a safe point; the queue flushes.
    let flushed = engine
        .on_status("veki", StatusVal::Active)
        .await
        .expect("flush");
    assert_eq!(flushed, vec![id]);
    let msg = store
        .get(id)
        .await
        .expect("get")
        .expect("exists")
        .as_message()
        .cloned()
        .expect("message");
    assert_eq!(msg.delivered_to, vec!["veki"]);
}

#[tokio::test]
async fn blocked_targets_stay_queued_until_unblocked() {
    let (_dir, store) = test_store().await;

    register(&store, "nova", None).await;
    register(&store, "veki", None).await;
    set_status(&store, "veki", StatusVal::Blocked, "gate:approval", None).await;

    let id = send(&store, "nova", "@veki still there?").await;
    let event = store.get(id).await.expect("get").expect("exists");

    let registry = InstanceRegistry::new(store.clone()).snapshot().await.expect("registry");
    let mut engine = DeliveryEngine::new(store.clone());
    let outcome = engine.on_message(&event, &registry).await.expect("route");
    assert_eq!(outcome.queued, vec!["veki"]);

    // Still blocked: the queue holds.
    let flushed = engine
        .on_status("veki", StatusVal::Blocked)
        .await
        .expect("no flush");
    assert!(flushed.is_empty());
    assert_eq!(engine.pending_for("veki"), 1);

    // Unblocked: delivery happens.
    let flushed = engine
        .on_status("veki", StatusVal::Listening)
        .await
        .expect("flush");
    assert_eq!(flushed, vec![id]);
}

#[tokio::test]
async fn redelivery_never_duplicates_delivered_to() {
    let (_dir, store) = test_store().await;

    register(&store, "nova", None).await;
    register(&store, "veki", None).await;

    let id = send(&store, "nova", "hello").await;
    let event = store.get(id).await.expect("get").expect("exists");

    let registry = InstanceRegistry::new(store.clone()).snapshot().await.expect("registry");
    let mut engine = DeliveryEngine::new(store.clone());
    engine.on_message(&event, &registry).await.expect("route");
    // A second routing pass (daemon restart replay) is harmless.
    engine.on_message(&event, &registry).await.expect("route again");

    let msg = store
        .get(id)
        .await
        .expect("get")
        .expect("exists")
        .as_message()
        .cloned()
        .expect("message");
    assert_eq!(msg.delivered_to, vec!["veki"], "exactly once in the set");
}

#[tokio::test]
async fn stopping_an_instance_drops_its_queue() {
    let (_dir, store) = test_store().await;

    register(&store, "nova", None).await;
    register(&store, "veki", None).await;
    set_status(&store, "veki", StatusVal::Active, "tool:Bash", None).await;

    let id = send(&store, "nova", "@veki one last thing").await;
    let event = store.get(id).await.expect("get").expect("exists");

    let registry = InstanceRegistry::new(store.clone()).snapshot().await.expect("registry");
    let mut engine = DeliveryEngine::new(store.clone());
    engine.on_message(&event, &registry).await.expect("route");
    assert_eq!(engine.pending_for("veki"), 1);

    engine.on_stopped("veki");
    assert_eq!(engine.pending_for("veki"), 0);
}

#[tokio::test]
async fn stale_listeners_are_still_broadcast_targets() {
    let (_dir, store) = test_store().await;

    register(&store, "nova", None).await;
    register(&store, "veki", None).await;

    // The projected view may show veki inactive, but it remains live (not
    // stopped) and therefore a delivery target.
    let registry = InstanceRegistry::new(store.clone())
        .snapshot_projected(Utc::now(), &StalenessConfig::default())
        .await
        .expect("registry");

    let id = send(&store, "nova", "hello").await;
    let event = store.get(id).await.expect("get").expect("exists");
    let msg = event.as_message().expect("message");
    let targets = resolve_targets(msg, &registry);
    assert_eq!(targets, vec!["veki"]);
}
