use hcom::models::{Bundle, BundleRefs, EventRange};
use hcom::persistence::BundleRepo;
use hcom::AppError;

use super::test_helpers::{register, send, test_store};

fn bundle_with_events(title: &str, ranges: Vec<EventRange>, extends: Option<String>) -> Bundle {
    Bundle::new(
        title.into(),
        String::new(),
        BundleRefs {
            events: ranges,
            files: vec!["src/auth.py".into()],
            transcript: Vec::new(),
        },
        extends,
        "nova".into(),
    )
}

#[tokio::test]
async fn bundles_round_trip() {
    let (_dir, store) = test_store().await;
    let repo = BundleRepo::new(store.db().clone());

    let bundle = bundle_with_events("auth work", vec![EventRange { start: 1, end: 5 }], None);
    repo.create(&bundle).await.expect("create");

    let loaded = repo
        .get_by_id(&bundle.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(loaded, bundle);
    assert_eq!(repo.list().await.expect("list").len(), 1);
}

#[tokio::test]
async fn resolve_collects_existing_events_in_range() {
    let (_dir, store) = test_store().await;
    let repo = BundleRepo::new(store.db().clone());

    register(&store, "nova", None).await;
    let first = send(&store, "nova", "one").await;
    let second = send(&store, "nova", "two").await;
    send(&store, "nova", "outside the range").await;

    let bundle = bundle_with_events(
        "window",
        vec![EventRange {
            start: first,
            end: second,
        }],
        None,
    );
    repo.create(&bundle).await.expect("create");

    let events = repo.resolve_events(&store, &bundle.id).await.expect("resolve");
    let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first, second]);
}

#[tokio::test]
async fn dangling_event_ranges_resolve_to_empty() {
    let (_dir, store) = test_store().await;
    let repo = BundleRepo::new(store.db().clone());

    let bundle = bundle_with_events("ghost", vec![EventRange { start: 100, end: 200 }], None);
    repo.create(&bundle).await.expect("create");

    let events = repo.resolve_events(&store, &bundle.id).await.expect("resolve");
    assert!(events.is_empty(), "dangling refs yield empty, never an error");
}

#[tokio::test]
async fn resolve_walks_the_extends_chain() {
    let (_dir, store) = test_store().await;
    let repo = BundleRepo::new(store.db().clone());

    register(&store, "nova", None).await;
    let base_event = send(&store, "nova", "base work").await;
    let child_event = send(&store, "nova", "follow-up").await;

    let parent = bundle_with_events(
        "base",
        vec![EventRange {
            start: base_event,
            end: base_event,
        }],
        None,
    );
    repo.create(&parent).await.expect("create parent");

    let child = bundle_with_events(
        "follow-up",
        vec![EventRange {
            start: child_event,
            end: child_event,
        }],
        Some(parent.id.clone()),
    );
    repo.create(&child).await.expect("create child");

    let events = repo.resolve_events(&store, &child.id).await.expect("resolve");
    let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![base_event, child_event]);
}

#[tokio::test]
async fn dangling_extends_stops_the_walk_quietly() {
    let (_dir, store) = test_store().await;
    let repo = BundleRepo::new(store.db().clone());

    register(&store, "nova", None).await;
    let event = send(&store, "nova", "work").await;

    let bundle = bundle_with_events(
        "orphan",
        vec![EventRange { start: event, end: event }],
        Some("bndl-archived-away".into()),
    );
    repo.create(&bundle).await.expect("create");

    let events = repo.resolve_events(&store, &bundle.id).await.expect("resolve");
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn resolving_a_missing_bundle_is_not_found() {
    let (_dir, store) = test_store().await;
    let repo = BundleRepo::new(store.db().clone());

    let err = repo.resolve_events(&store, "bndl-missing").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
