//! PostgreSQL integration tests
//!
//! These tests start a shared PostgreSQL container and are ignored by
//! default because they need a Docker daemon. Run with:
//!
//! ```bash
//! cargo test -p ledger-store --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use common::{BookingId, Purpose, ReservationId, TxHash, WalletAddress, Wei};
use ledger_store::{
    ClaimOutcome, EventEnvelope, LedgerStore, NewClaim, PostgresStore, ProcessedKey, RelayCursor,
    RelayStore, ReservationStore, StateRecord, StoreError, TransactionQuery, TransactionStatus,
    Version,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_ledger_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE ledger_transactions, reservation_events, reservations, booking_links, \
         relay_cursors, relay_processed_events",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool)
}

fn payment_claim(reservation_id: ReservationId) -> NewClaim {
    NewClaim::new(
        reservation_id,
        Purpose::Payment,
        WalletAddress::new("0x1111111111111111111111111111111111111111"),
        WalletAddress::new("0x2222222222222222222222222222222222222222"),
        Wei::new(1_050_000_000_000_000_000),
    )
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn claim_round_trips_exact_amount() {
    let store = get_test_store().await;
    let reservation_id = ReservationId::new();

    let outcome = store.try_claim(payment_claim(reservation_id)).await.unwrap();
    let ClaimOutcome::Claimed(row) = outcome else {
        panic!("expected a fresh claim");
    };

    let loaded = store.get(row.id).await.unwrap();
    assert_eq!(loaded.amount, Wei::new(1_050_000_000_000_000_000));
    assert_eq!(loaded.status, TransactionStatus::Processing);
    assert_eq!(loaded.purpose, Purpose::Payment);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn concurrent_claims_have_exactly_one_winner() {
    let store = get_test_store().await;
    let reservation_id = ReservationId::new();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.try_claim(payment_claim(reservation_id)).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_claimed() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(store.history(reservation_id).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn failed_row_releases_the_claim() {
    let store = get_test_store().await;
    let reservation_id = ReservationId::new();

    let first = store.try_claim(payment_claim(reservation_id)).await.unwrap();
    store
        .mark_failed(first.record().id, "insufficient balance")
        .await
        .unwrap();

    let second = store.try_claim(payment_claim(reservation_id)).await.unwrap();
    assert!(second.is_claimed());
    assert_eq!(store.history(reservation_id).await.unwrap().len(), 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn submit_and_confirm_lifecycle() {
    let store = get_test_store().await;
    let row = store
        .try_claim(payment_claim(ReservationId::new()))
        .await
        .unwrap()
        .record()
        .clone();

    let hash = TxHash::new("0xabc123");
    let submitted = store.mark_submitted(row.id, hash.clone()).await.unwrap();
    assert!(submitted.applied);

    let confirmed = store
        .mark_confirmed(row.id, 42, Wei::new(21_000))
        .await
        .unwrap();
    assert!(confirmed.applied);
    assert_eq!(confirmed.record.block_number, Some(42));

    let again = store.mark_confirmed(row.id, 43, Wei::ZERO).await.unwrap();
    assert!(!again.applied);

    let by_hash = store.find_by_hash(&hash).await.unwrap().unwrap();
    assert_eq!(by_hash.id, row.id);

    let failed = store.mark_failed(row.id, "late").await;
    assert!(matches!(
        failed,
        Err(StoreError::InvalidStatusTransition { .. })
    ));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn duplicate_hash_is_rejected() {
    let store = get_test_store().await;
    let a = store
        .try_claim(payment_claim(ReservationId::new()))
        .await
        .unwrap();
    let b = store
        .try_claim(payment_claim(ReservationId::new()))
        .await
        .unwrap();

    store
        .mark_submitted(a.record().id, TxHash::new("0xdup"))
        .await
        .unwrap();
    let result = store
        .mark_submitted(b.record().id, TxHash::new("0xdup"))
        .await;
    assert!(matches!(result, Err(StoreError::DuplicateTransactionHash(_))));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn query_filters_stale_submitted_rows() {
    let store = get_test_store().await;
    let row = store
        .try_claim(payment_claim(ReservationId::new()))
        .await
        .unwrap()
        .record()
        .clone();
    store
        .mark_submitted(row.id, TxHash::new("0xstale"))
        .await
        .unwrap();

    let future = chrono::Utc::now() + chrono::Duration::seconds(60);
    let stale = store
        .query(
            TransactionQuery::processing()
                .submitted(true)
                .updated_before(future),
        )
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);

    let unsubmitted = store
        .query(TransactionQuery::processing().submitted(false))
        .await
        .unwrap();
    assert!(unsubmitted.is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn save_state_is_compare_and_set() {
    let store = get_test_store().await;
    let id = ReservationId::new();
    let record = |v: i64, status: &str| {
        StateRecord::from_state(id, Version::new(v), status, &serde_json::json!({"v": v})).unwrap()
    };
    let entry = |v: i64| {
        EventEnvelope::record(id, Version::new(v), "Test", &serde_json::json!({})).unwrap()
    };

    store
        .save_state(record(1, "PENDING"), Version::initial(), vec![entry(1)])
        .await
        .unwrap();

    let conflict = store
        .save_state(record(2, "CONFIRMED"), Version::initial(), vec![entry(2)])
        .await;
    assert!(matches!(conflict, Err(StoreError::ConcurrencyConflict { .. })));

    store
        .save_state(record(2, "CONFIRMED"), Version::first(), vec![entry(2)])
        .await
        .unwrap();

    let loaded = store.load_state(id).await.unwrap().unwrap();
    assert_eq!(loaded.version, Version::new(2));
    assert_eq!(loaded.status, "CONFIRMED");
    assert_eq!(store.history_for(id).await.unwrap().len(), 2);
    assert_eq!(
        store.list_states(Some("CONFIRMED")).await.unwrap().len(),
        1
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn relay_bookkeeping() {
    let store = get_test_store().await;
    let reservation_id = ReservationId::new();

    store
        .link_booking(BookingId::new(1), reservation_id)
        .await
        .unwrap();
    assert_eq!(
        store.booking_for_reservation(reservation_id).await.unwrap(),
        Some(BookingId::new(1))
    );

    let key = ProcessedKey::new("BookingCreated", TxHash::new("0xaa"), 0);
    assert!(
        store
            .record_processed("escrow", key.clone(), RelayCursor::new(10, 0))
            .await
            .unwrap()
    );
    assert!(
        !store
            .record_processed("escrow", key.clone(), RelayCursor::new(9, 3))
            .await
            .unwrap()
    );
    assert!(store.is_processed(&key).await.unwrap());
    assert_eq!(
        store.load_cursor("escrow").await.unwrap(),
        Some(RelayCursor::new(10, 0))
    );
}
