//! Integration tests against a real Postgres.
//!
//! Requirements: a reachable database in DRIFTNET_TEST_DATABASE_URL.
//! Tests are skipped (not failed) when the variable is missing.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use driftnet_common::{FilterTerm, IngestedItem, Search};
use driftnet_store::{migrate, CommitOutcome, NackOutcome, PgStore};

async fn test_store() -> Option<PgStore> {
    let Ok(url) = std::env::var("DRIFTNET_TEST_DATABASE_URL") else {
        eprintln!("Skipping: DRIFTNET_TEST_DATABASE_URL not set");
        return None;
    };
    let store = PgStore::connect(&url).await.expect("connect");
    migrate(store.pool()).await.expect("migrate");
    Some(store)
}

fn item(search_id: Uuid, upstream_id: &str) -> IngestedItem {
    IngestedItem {
        search_id,
        upstream_id: upstream_id.to_string(),
        payload: json!({"id_str": upstream_id, "text": "obama"}),
        received_at: Utc::now(),
    }
}

#[tokio::test]
async fn search_roundtrip_and_active_listing() {
    let Some(store) = test_store().await else { return };

    let mut search = Search::new(
        Uuid::new_v4(),
        "obama watch",
        vec![FilterTerm::keyword("obama")],
    );
    search.active = true;
    store.create_search(&search).await.unwrap();

    let loaded = store.get_search(search.id).await.unwrap().unwrap();
    assert_eq!(loaded.title, "obama watch");
    assert_eq!(loaded.current_terms(), &[FilterTerm::keyword("obama")]);

    let active = store.get_active_searches().await.unwrap();
    assert!(active.iter().any(|s| s.id == search.id));

    store
        .push_search_query(
            search.id,
            vec![FilterTerm::keyword("obama"), FilterTerm::keyword("biden")],
        )
        .await
        .unwrap();
    let edited = store.get_search(search.id).await.unwrap().unwrap();
    assert_eq!(edited.queries.len(), 2, "prior generation retained");
    assert_eq!(edited.current_terms().len(), 2);

    store.delete_search(search.id).await.unwrap();
    assert!(store.get_search(search.id).await.unwrap().is_none());
}

#[tokio::test]
async fn commit_is_idempotent_per_pair() {
    let Some(store) = test_store().await else { return };
    let search_id = Uuid::new_v4();
    let other_search = Uuid::new_v4();

    assert!(!store.is_committed(search_id, "777").await.unwrap());
    assert_eq!(
        store.commit_item(&item(search_id, "777")).await.unwrap(),
        CommitOutcome::Committed
    );
    assert_eq!(
        store.commit_item(&item(search_id, "777")).await.unwrap(),
        CommitOutcome::Duplicate
    );
    assert!(store.is_committed(search_id, "777").await.unwrap());

    // Same upstream item under a different search is a separate commit.
    assert_eq!(
        store.commit_item(&item(other_search, "777")).await.unwrap(),
        CommitOutcome::Committed
    );
    assert_eq!(store.item_count(search_id).await.unwrap(), 1);
}

#[tokio::test]
async fn queue_claim_ack_and_dead_letter_flow() {
    let Some(store) = test_store().await else { return };
    let store = store.with_max_item_attempts(2);
    let search_id = Uuid::new_v4();

    store.enqueue(&item(search_id, "1")).await.unwrap();
    store.enqueue(&item(search_id, "2")).await.unwrap();
    assert_eq!(store.queue_depth_for_search(search_id).await.unwrap(), 2);

    let batch = store.dequeue_batch(10).await.unwrap();
    let mine: Vec<_> = batch
        .iter()
        .filter(|q| q.item.search_id == search_id)
        .collect();
    assert_eq!(mine.len(), 2);

    // Claimed rows are invisible to a second claimer.
    let again = store.dequeue_batch(10).await.unwrap();
    assert!(!again.iter().any(|q| q.item.search_id == search_id));

    store.ack(mine[0].queue_id).await.unwrap();

    // First nack requeues, second promotes to dead letter.
    assert_eq!(
        store.nack(mine[1].queue_id, "write failed").await.unwrap(),
        NackOutcome::Requeued { attempts: 1 }
    );
    let retry = store.dequeue_batch(10).await.unwrap();
    let row = retry
        .iter()
        .find(|q| q.item.search_id == search_id)
        .expect("requeued row claimable again");
    assert_eq!(
        store.nack(row.queue_id, "write failed").await.unwrap(),
        NackOutcome::DeadLettered
    );

    let stats = store.queue_stats(search_id).await.unwrap();
    assert_eq!(stats.depth, 0);
    assert_eq!(stats.dead_letters, 1);
}

#[tokio::test]
async fn backfill_import_skips_already_committed() {
    let Some(store) = test_store().await else { return };
    let search_id = Uuid::new_v4();

    let statuses = vec![
        json!({"id_str": "10", "text": "obama"}),
        json!({"id_str": "11", "text": "obama"}),
        json!({"no_id": true}),
    ];
    assert_eq!(store.import_page(search_id, &statuses).await.unwrap(), 2);
    // Re-import is a no-op thanks to pair idempotence.
    assert_eq!(store.import_page(search_id, &statuses).await.unwrap(), 0);
}
