use anyhow::Result;
use serde_json::{json, Map};

use rathdown::{ChangeKind, Field, Filter, Query};

#[path = "util.rs"]
mod util;

#[tokio::test]
async fn merge_set_touches_only_the_named_fields() -> Result<()> {
    let store = util::memory_store().await;
    store
        .set(
            "models",
            "M1",
            &json!({ "id": "M1", "name": "Chair", "type": "seating" }),
        )
        .await?;

    let mut fields = Map::new();
    fields.insert("name".into(), json!("Armchair"));
    let merged = store.merge_set("models", "M1", fields).await?;
    assert_eq!(merged.get("name"), Some(&json!("Armchair")));
    assert_eq!(merged.get("type"), Some(&json!("seating")));

    let doc = store.get("models", "M1").await?.expect("doc present");
    assert_eq!(doc.data.get("name"), Some(&json!("Armchair")));
    assert_eq!(doc.data.get("type"), Some(&json!("seating")));
    Ok(())
}

#[tokio::test]
async fn merge_set_creates_the_document_when_absent() -> Result<()> {
    let store = util::memory_store().await;
    let mut fields = Map::new();
    fields.insert("id".into(), json!("M1"));
    fields.insert("name".into(), json!("Chair"));
    let merged = store.merge_set("models", "M1", fields).await?;
    assert_eq!(merged.get("name"), Some(&json!("Chair")));
    assert!(store.get("models", "M1").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn batch_commit_applies_every_op() -> Result<()> {
    let store = util::memory_store().await;
    store
        .set("items", "doomed", &json!({ "id": "doomed" }))
        .await?;

    let mut batch = store.batch();
    batch.set("items", "I1", json!({ "id": "I1", "listId": "L1" }));
    batch.set("models", "M1", json!({ "id": "M1", "name": "Chair" }));
    batch.delete("items", "doomed");
    assert_eq!(batch.len(), 3);
    store.commit_batch(batch).await?;

    assert!(store.get("items", "I1").await?.is_some());
    assert!(store.get("models", "M1").await?.is_some());
    assert!(store.get("items", "doomed").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn id_in_is_exact_membership() -> Result<()> {
    let store = util::memory_store().await;
    for id in ["A", "B", "C", "D"] {
        store
            .set("items", id, &json!({ "id": id, "createdDate": 1 }))
            .await?;
    }

    let mut query = Query::new("items", Field::Id);
    query
        .filters
        .push(Filter::IdIn(vec!["B".into(), "D".into(), "missing".into()]));
    let docs = store.query(&query).await?;
    let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["B", "D"]);

    let mut query = Query::new("items", Field::Id);
    query.filters.push(Filter::IdIn(Vec::new()));
    assert!(store.query(&query).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn collections_are_isolated_namespaces() -> Result<()> {
    let store = util::memory_store().await;
    store.set("models", "X", &json!({ "id": "X" })).await?;
    store
        .set("pull_lists/L1/rooms", "X", &json!({ "id": "X", "roomName": "Den" }))
        .await?;

    let doc = store.get("models", "X").await?.expect("model doc");
    assert!(doc.data.get("roomName").is_none());
    store.delete("models", "X").await?;
    assert!(store.get("pull_lists/L1/rooms", "X").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn watch_delivers_updates_and_deletes() -> Result<()> {
    let store = util::memory_store().await;
    let mut sub = store.watch("models", "M1");

    store
        .set("models", "M1", &json!({ "id": "M1", "name": "Chair" }))
        .await?;
    let change = sub.recv().await.expect("update delivered");
    assert_eq!(change.kind, ChangeKind::Updated);
    assert_eq!(change.collection, "models");
    assert_eq!(change.id, "M1");
    assert_eq!(
        change.data.as_ref().and_then(|d| d.get("name")),
        Some(&json!("Chair"))
    );

    store.delete("models", "M1").await?;
    let change = sub.recv().await.expect("delete delivered");
    assert_eq!(change.kind, ChangeKind::Deleted);
    assert!(change.data.is_none());
    Ok(())
}

#[tokio::test]
async fn watch_is_scoped_to_one_document() -> Result<()> {
    let store = util::memory_store().await;
    let mut sub = store.watch("models", "M1");

    store.set("models", "M2", &json!({ "id": "M2" })).await?;
    store.set("models", "M1", &json!({ "id": "M1" })).await?;

    // Only the watched document's change arrives.
    let change = sub.recv().await.expect("change delivered");
    assert_eq!(change.id, "M1");
    sub.cancel();
    Ok(())
}

#[tokio::test]
async fn cancelled_subscriptions_stop_and_are_reaped() -> Result<()> {
    let store = util::memory_store().await;
    let sub = store.watch("models", "M1");
    assert_eq!(store.watch_count(), 1);

    sub.cancel();
    // The next write finds no live receivers and drops the watcher entry.
    store.set("models", "M1", &json!({ "id": "M1" })).await?;
    assert_eq!(store.watch_count(), 0);

    // A fresh subscription starts clean: no replay of the missed change,
    // and deliveries resume.
    let mut sub = store.watch("models", "M1");
    store
        .set("models", "M1", &json!({ "id": "M1", "name": "Chair" }))
        .await?;
    let change = sub.recv().await.expect("delivery resumes");
    assert_eq!(change.kind, ChangeKind::Updated);
    assert_eq!(
        change.data.as_ref().and_then(|d| d.get("name")),
        Some(&json!("Chair"))
    );
    Ok(())
}

#[tokio::test]
async fn batch_writes_notify_watchers_after_commit() -> Result<()> {
    let store = util::memory_store().await;
    let mut sub = store.watch("items", "I1");

    let mut batch = store.batch();
    batch.set("items", "I1", json!({ "id": "I1" }));
    batch.delete("items", "I1");
    store.commit_batch(batch).await?;

    let first = sub.recv().await.expect("set notification");
    assert_eq!(first.kind, ChangeKind::Updated);
    let second = sub.recv().await.expect("delete notification");
    assert_eq!(second.kind, ChangeKind::Deleted);
    Ok(())
}
