use hcom::filter::Filter;
use hcom::persistence::Order;
use hcom::AppError;

use super::test_helpers::{send, test_store};

#[tokio::test]
async fn reset_empties_the_live_log_and_keeps_it_queryable_in_slot_one() {
    let (_dir, store) = test_store().await;

    send(&store, "nova", "before reset one").await;
    send(&store, "nova", "before reset two").await;

    store.archive().await.expect("archive");

    let live = store
        .query(&Filter::new(), None, Order::Ascending)
        .await
        .expect("query live");
    assert!(live.is_empty(), "live log is reset");

    // Prior contents unchanged and fully queryable from slot 1, with the
    // identical filter grammar.
    let mut filter = Filter::new();
    filter.push("text", "before reset").expect("push");
    let archived = store
        .query_archive(1, &filter, None, Order::Ascending)
        .await
        .expect("query archive");
    assert_eq!(archived.len(), 2);
}

#[tokio::test]
async fn ids_keep_increasing_after_a_reset() {
    let (_dir, store) = test_store().await;

    let before = send(&store, "nova", "old").await;
    store.archive().await.expect("archive");
    let after = send(&store, "nova", "new").await;

    assert!(after > before, "ids are never reused after archive");
}

#[tokio::test]
async fn most_recent_archive_is_slot_one() {
    let (_dir, store) = test_store().await;

    send(&store, "nova", "first generation").await;
    store.archive().await.expect("first archive");
    send(&store, "nova", "second generation").await;
    store.archive().await.expect("second archive");

    let mut filter = Filter::new();
    filter.push("type", "=message").expect("push");

    let newest = store
        .query_archive(1, &filter, None, Order::Ascending)
        .await
        .expect("slot 1");
    let oldest = store
        .query_archive(2, &filter, None, Order::Ascending)
        .await
        .expect("slot 2");

    let text_of = |events: &[hcom::models::Event]| {
        events[0]
            .as_message()
            .map(|m| m.text.clone())
            .expect("message")
    };
    assert_eq!(text_of(&newest), "second generation");
    assert_eq!(text_of(&oldest), "first generation");
}

#[tokio::test]
async fn missing_archive_slot_is_not_found() {
    let (_dir, store) = test_store().await;
    let err = store
        .query_archive(1, &Filter::new(), None, Order::Ascending)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
