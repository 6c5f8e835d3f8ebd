use std::time::Duration;

use taxreg_contracts::{CustomerDraft, DEFAULT_BRANCH_CODE};
use taxreg_store::{CustomerStore, StoreError};

fn test_db_url() -> Option<String> {
    std::env::var("TAXREG_TEST_DB_URL")
        .ok()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn schema_db_url(base: &str, schema: &str) -> String {
    let separator = if base.contains('?') { "&" } else { "?" };
    format!("{base}{separator}options=-csearch_path%3D{schema}")
}

/// Connect a store scoped to a freshly created schema so tests never see
/// each other's rows.
async fn fresh_store() -> Option<CustomerStore> {
    let db_url = test_db_url()?;
    let schema = format!("taxreg_test_{}", ulid::Ulid::new());

    let admin = sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&db_url)
        .await
        .expect("DB connect should succeed");

    let create_schema = format!("CREATE SCHEMA {}", schema);
    sqlx::query(&create_schema)
        .execute(&admin)
        .await
        .expect("create schema should succeed");
    admin.close().await;

    let store = CustomerStore::connect_and_migrate(
        &schema_db_url(&db_url, &schema),
        2,
        Duration::from_secs(2),
    )
    .await
    .expect("store connect + migrate should succeed");

    Some(store)
}

fn draft(tax_id: &str) -> CustomerDraft {
    CustomerDraft {
        id: 0,
        name: "Acme Trading Co., Ltd.".to_string(),
        tax_id: tax_id.to_string(),
        branch_code: String::new(),
        address: "99 Example Road, Bangkok 10110".to_string(),
        phone_number: String::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn migrations_are_idempotent() {
    let Some(store) = fresh_store().await else {
        eprintln!("skipping DB test; set TAXREG_TEST_DB_URL to enable");
        return;
    };

    store
        .migrate()
        .await
        .expect("re-running migrations should be a no-op");
    store.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_materializes_record_with_defaults() {
    let Some(store) = fresh_store().await else {
        eprintln!("skipping DB test; set TAXREG_TEST_DB_URL to enable");
        return;
    };

    let created = store
        .create(&draft("1234567890123"))
        .await
        .expect("create should succeed");

    assert!(created.id > 0);
    assert_eq!(created.name, "Acme Trading Co., Ltd.");
    assert_eq!(created.tax_id, "1234567890123");
    assert_eq!(created.branch_code, DEFAULT_BRANCH_CODE);
    assert_eq!(created.phone_number, None);
    assert_eq!(created.created_at, created.updated_at);

    let fetched = store
        .get(created.id)
        .await
        .expect("get should succeed")
        .expect("record should exist");
    assert_eq!(fetched, created);

    store.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_tax_id_is_a_conflict_not_a_fault() {
    let Some(store) = fresh_store().await else {
        eprintln!("skipping DB test; set TAXREG_TEST_DB_URL to enable");
        return;
    };

    store
        .create(&draft("1111111111111"))
        .await
        .expect("first create should succeed");

    let err = store
        .create(&draft("1111111111111"))
        .await
        .expect_err("second create should fail");
    assert!(matches!(err, StoreError::DuplicateTaxId), "got {err:?}");
    assert!(!err.is_unavailable());

    store.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_replaces_fields_and_advances_updated_at() {
    let Some(store) = fresh_store().await else {
        eprintln!("skipping DB test; set TAXREG_TEST_DB_URL to enable");
        return;
    };

    let created = store
        .create(&draft("2222222222222"))
        .await
        .expect("create should succeed");

    let updated = store
        .update(&CustomerDraft {
            id: created.id,
            name: "Acme Holdings Co., Ltd.".to_string(),
            tax_id: "2222222222222".to_string(),
            branch_code: "00002".to_string(),
            address: "1 New Road, Chiang Mai 50000".to_string(),
            phone_number: "021234567".to_string(),
        })
        .await
        .expect("update should succeed");

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.name, "Acme Holdings Co., Ltd.");
    assert_eq!(updated.branch_code, "00002");
    assert_eq!(updated.address, "1 New Road, Chiang Mai 50000");
    assert_eq!(updated.phone_number.as_deref(), Some("021234567"));
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at > created.updated_at);

    store.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_of_missing_id_is_not_found() {
    let Some(store) = fresh_store().await else {
        eprintln!("skipping DB test; set TAXREG_TEST_DB_URL to enable");
        return;
    };

    let mut missing = draft("3333333333333");
    missing.id = 999_999;

    let err = store
        .update(&missing)
        .await
        .expect_err("update of missing id should fail");
    assert!(matches!(err, StoreError::NotFound), "got {err:?}");

    store.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_colliding_with_other_record_is_a_conflict() {
    let Some(store) = fresh_store().await else {
        eprintln!("skipping DB test; set TAXREG_TEST_DB_URL to enable");
        return;
    };

    store
        .create(&draft("4444444444444"))
        .await
        .expect("first create should succeed");
    let second = store
        .create(&draft("5555555555555"))
        .await
        .expect("second create should succeed");

    let mut collision = draft("4444444444444");
    collision.id = second.id;

    let err = store
        .update(&collision)
        .await
        .expect_err("colliding update should fail");
    assert!(matches!(err, StoreError::DuplicateTaxId), "got {err:?}");

    // Re-submitting a record's own tax id is not a collision.
    let mut own = draft("5555555555555");
    own.id = second.id;
    store
        .update(&own)
        .await
        .expect("self-update should succeed");

    store.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn search_matches_tax_id_and_phone_number() {
    let Some(store) = fresh_store().await else {
        eprintln!("skipping DB test; set TAXREG_TEST_DB_URL to enable");
        return;
    };

    let mut with_phone = draft("6666666666666");
    with_phone.phone_number = "0812345678".to_string();
    let created = store
        .create(&with_phone)
        .await
        .expect("create should succeed");

    let by_tax_id = store
        .search("6666666666666")
        .await
        .expect("search should succeed")
        .expect("tax id should match");
    assert_eq!(by_tax_id.id, created.id);

    let by_phone = store
        .search("0812345678")
        .await
        .expect("search should succeed")
        .expect("phone should match");
    assert_eq!(by_phone.id, created.id);

    let miss = store
        .search("9999999999999")
        .await
        .expect("search should succeed");
    assert!(miss.is_none());

    store.close().await;
}
