//! PgTaskStore against a real database. Skipped unless `DATABASE_URL` is set.

use std::time::Duration;

use chorus_core::domain::{JobId, NewTask, TaskStatus, TaskType, Transition};
use chorus_core::impls::{PgTaskStore, PoolConfig, create_pool};
use chorus_core::ports::{StoreError, TaskStore};

async fn store() -> Option<PgTaskStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping");
        return None;
    };
    let config = PoolConfig {
        max_connections: 5,
        ..PoolConfig::default()
    };
    let pool = create_pool(&url, &config).await.unwrap();
    let store = PgTaskStore::new(pool);
    store.migrate().await.unwrap();
    Some(store)
}

/// Each test claims from its own task type so parallel runs do not interfere.
fn isolated_type() -> TaskType {
    TaskType::new(format!("chorus.test.{}.v1", ulid::Ulid::new()))
}

fn new_task(task_type: &TaskType, sequence: i32) -> NewTask {
    NewTask {
        job_id: JobId::generate(),
        task_type: task_type.clone(),
        sequence,
        input: serde_json::json!({ "n": sequence }),
    }
}

#[tokio::test]
async fn claim_complete_round() {
    let Some(store) = store().await else { return };
    let tt = isolated_type();
    let first = store.enqueue(new_task(&tt, 0)).await.unwrap();
    let second = store.enqueue(new_task(&tt, 1)).await.unwrap();

    let claimed = store.claim_next("w1", &tt, 1).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, first);
    assert_eq!(claimed[0].status, TaskStatus::Processing);
    assert_eq!(claimed[0].worker_id.as_deref(), Some("w1"));

    let t = store
        .mark_complete(first, serde_json::json!({ "ok": true }))
        .await
        .unwrap();
    assert_eq!(t, Transition::Applied);
    let again = store
        .mark_complete(first, serde_json::json!({ "ok": false }))
        .await
        .unwrap();
    assert_eq!(again, Transition::Unchanged);

    let err = store.mark_failed(first, "late").await.unwrap_err();
    assert!(matches!(err, StoreError::TerminalConflict(_)));

    let record = store.get(first).await.unwrap().unwrap();
    assert_eq!(record.result, Some(serde_json::json!({ "ok": true })));

    let rest = store.claim_next("w2", &tt, 5).await.unwrap();
    assert_eq!(rest.iter().map(|t| t.id).collect::<Vec<_>>(), vec![second]);
}

#[tokio::test]
async fn concurrent_claims_never_overlap() {
    let Some(store) = store().await else { return };
    let store = std::sync::Arc::new(store);
    let tt = isolated_type();
    for i in 0..20 {
        store.enqueue(new_task(&tt, i)).await.unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..4 {
        let store = store.clone();
        let tt = tt.clone();
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                let batch = store.claim_next(&format!("w{w}"), &tt, 1).await.unwrap();
                if batch.is_empty() {
                    break mine;
                }
                mine.extend(batch.into_iter().map(|t| t.id));
            }
        }));
    }

    let mut all = Vec::new();
    for h in handles {
        all.extend(h.await.unwrap());
    }
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(total, 20);
    assert_eq!(all.len(), 20);
}

#[tokio::test]
async fn reclaim_and_lease_renewal() {
    let Some(store) = store().await else { return };
    let tt = isolated_type();
    let id = store.enqueue(new_task(&tt, 0)).await.unwrap();
    store.claim_next("w1", &tt, 1).await.unwrap();

    assert!(store.renew_lease(id, "w1").await.unwrap());
    assert!(!store.renew_lease(id, "intruder").await.unwrap());

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert!(store.reclaim_stale(Duration::from_secs(1)).await.unwrap() >= 1);

    let record = store.get(id).await.unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.worker_id, None);
    assert!(!store.renew_lease(id, "w1").await.unwrap());
}
