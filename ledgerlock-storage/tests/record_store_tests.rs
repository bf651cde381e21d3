use ledgerlock_storage::{DocumentStore, MemoryStore, Record, RecordStore, RecordUpdate};
use serde_json::json;

fn fields(v: serde_json::Value) -> Record {
    v.as_object().cloned().unwrap()
}

async fn seed_expenses(store: &dyn RecordStore, count: usize) {
    let updates = (0..count)
        .map(|i| {
            RecordUpdate::new(
                format!("users/u1/expenses/e{i:03}"),
                fields(json!({"amount": i, "description": format!("item {i}")})),
            )
        })
        .collect();
    store.batch_write(updates).await.unwrap();
}

async fn paginates_to_completion(store: &dyn RecordStore) {
    seed_expenses(store, 120).await;

    let mut cursor: Option<String> = None;
    let mut seen = Vec::new();
    loop {
        let page = store
            .list("users/u1/expenses", cursor.as_deref(), 50)
            .await
            .unwrap();
        if page.is_empty() {
            break;
        }
        cursor = Some(page.last().unwrap().id.clone());
        seen.extend(page.into_iter().map(|r| r.id));
    }

    assert_eq!(seen.len(), 120);
    let mut sorted = seen.clone();
    sorted.sort();
    assert_eq!(seen, sorted, "ids must arrive in order");
}

async fn merge_preserves_other_fields(store: &dyn RecordStore) {
    store
        .batch_write(vec![RecordUpdate::new(
            "users/u1/budgets/b1",
            fields(json!({"amount": 500, "month": "2024-06"})),
        )])
        .await
        .unwrap();
    store
        .batch_write(vec![RecordUpdate::new(
            "users/u1/budgets/b1",
            fields(json!({"amount": 600})),
        )])
        .await
        .unwrap();

    let record = store.get("users/u1/budgets/b1").await.unwrap().unwrap();
    assert_eq!(record["amount"], json!(600));
    assert_eq!(record["month"], json!("2024-06"));
}

async fn missing_record_is_none(store: &dyn RecordStore) {
    assert!(store.get("users/u1/expenses/nope").await.unwrap().is_none());
}

#[tokio::test]
async fn memory_store_pagination() {
    paginates_to_completion(&MemoryStore::new()).await;
}

#[tokio::test]
async fn memory_store_merge() {
    merge_preserves_other_fields(&MemoryStore::new()).await;
}

#[tokio::test]
async fn memory_store_missing() {
    missing_record_is_none(&MemoryStore::new()).await;
}

#[tokio::test]
async fn document_store_pagination() {
    paginates_to_completion(&DocumentStore::open_in_memory().unwrap()).await;
}

#[tokio::test]
async fn document_store_merge() {
    merge_preserves_other_fields(&DocumentStore::open_in_memory().unwrap()).await;
}

#[tokio::test]
async fn document_store_missing() {
    missing_record_is_none(&DocumentStore::open_in_memory().unwrap()).await;
}

#[tokio::test]
async fn document_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("records.db");

    {
        let store = DocumentStore::open(&db_path).unwrap();
        store
            .batch_write(vec![RecordUpdate::new(
                "users/u1/incomes/i1",
                fields(json!({"amount": 1200, "description": "Salary"})),
            )])
            .await
            .unwrap();
    }

    let store = DocumentStore::open(&db_path).unwrap();
    let record = store.get("users/u1/incomes/i1").await.unwrap().unwrap();
    assert_eq!(record["description"], json!("Salary"));
}

#[tokio::test]
async fn document_store_batch_is_atomic() {
    let store = DocumentStore::open_in_memory().unwrap();
    let result = store
        .batch_write(vec![
            RecordUpdate::new("users/u1/expenses/e1", fields(json!({"amount": 1}))),
            RecordUpdate::new("bad-path-without-collection", fields(json!({"amount": 2}))),
        ])
        .await;

    assert!(result.is_err());
    assert!(store.get("users/u1/expenses/e1").await.unwrap().is_none());
}

#[tokio::test]
async fn subcollections_do_not_leak_into_parent_listing() {
    let store = DocumentStore::open_in_memory().unwrap();
    store
        .batch_write(vec![
            RecordUpdate::new(
                "users/u1/loans/l1",
                fields(json!({"lender": "bank", "initialAmount": 1000})),
            ),
            RecordUpdate::new(
                "users/u1/loans/l1/repayments/r1",
                fields(json!({"amount": 50})),
            ),
        ])
        .await
        .unwrap();

    let loans = store.list("users/u1/loans", None, 10).await.unwrap();
    assert_eq!(loans.len(), 1);
    let repayments = store
        .list("users/u1/loans/l1/repayments", None, 10)
        .await
        .unwrap();
    assert_eq!(repayments.len(), 1);
}
