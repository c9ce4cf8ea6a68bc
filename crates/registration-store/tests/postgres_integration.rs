//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p registration-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use registration_store::{
    Capacity, CapacityOracle, CapacityRegistry, EventId, PostgresCapacityOracle,
    PostgresRegistrationStore, PostgresWaitlistQueue, Registration, RegistrationStore, RsvpStatus,
    SeatClaim, StoreError, UserId, WaitlistEntry, WaitlistQueue, timestamp_now,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
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
            registration_store::run_migrations(&temp_pool).await.unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

struct Stores {
    registrations: PostgresRegistrationStore,
    waitlist: PostgresWaitlistQueue,
    capacities: PostgresCapacityOracle,
}

/// Fresh stores sharing one pool, with cleared tables
async fn get_test_stores() -> Stores {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE registrations, waitlist, events")
        .execute(&pool)
        .await
        .unwrap();

    Stores {
        registrations: PostgresRegistrationStore::new(pool.clone()),
        waitlist: PostgresWaitlistQueue::new(pool.clone()),
        capacities: PostgresCapacityOracle::new(pool),
    }
}

fn going(event_id: EventId) -> Registration {
    Registration::new(
        event_id,
        UserId::new(),
        "test",
        serde_json::json!({"utm_campaign": "spring"}),
    )
}

#[tokio::test]
#[serial]
async fn create_and_get_registration() {
    let stores = get_test_stores().await;
    let reg = going(EventId::new());

    stores.registrations.create(&reg).await.unwrap();

    let found = stores
        .registrations
        .get(reg.event_id, reg.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.status, RsvpStatus::Going);
    assert_eq!(found.source, "test");
    assert_eq!(found.utm["utm_campaign"], "spring");
    // Timestamps survive the round trip, so the record compares equal.
    assert_eq!(found, reg);
}

#[tokio::test]
#[serial]
async fn duplicate_registration_is_a_conflict() {
    let stores = get_test_stores().await;
    let reg = going(EventId::new());
    stores.registrations.create(&reg).await.unwrap();

    let mut dup = going(reg.event_id);
    dup.user_id = reg.user_id;
    let result = stores.registrations.create(&dup).await;

    assert!(matches!(result, Err(StoreError::Conflict { .. })));
}

#[tokio::test]
#[serial]
async fn update_count_list_and_delete() {
    let stores = get_test_stores().await;
    let event_id = EventId::new();
    let first = going(event_id);
    let second = going(event_id);
    stores.registrations.create(&first).await.unwrap();
    stores.registrations.create(&second).await.unwrap();

    let at = timestamp_now();
    let stale = stores
        .registrations
        .update_status(event_id, first.user_id, RsvpStatus::Waitlist, RsvpStatus::Maybe, at)
        .await
        .unwrap();
    assert!(!stale);
    let applied = stores
        .registrations
        .update_status(event_id, first.user_id, RsvpStatus::Going, RsvpStatus::Maybe, at)
        .await
        .unwrap();
    assert!(applied);
    let row = stores
        .registrations
        .get(event_id, first.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.updated_at, at);

    let going_count = stores
        .registrations
        .count_by_status(event_id, RsvpStatus::Going)
        .await
        .unwrap();
    assert_eq!(going_count, 1);

    let maybes = stores
        .registrations
        .list_by_status(event_id, &[RsvpStatus::Maybe])
        .await
        .unwrap();
    assert_eq!(maybes.len(), 1);
    assert_eq!(maybes[0].user_id, first.user_id);

    assert!(
        stores
            .registrations
            .delete(event_id, first.user_id)
            .await
            .unwrap()
    );
    assert!(
        !stores
            .registrations
            .delete(event_id, first.user_id)
            .await
            .unwrap()
    );
}

#[tokio::test]
#[serial]
async fn create_within_capacity_refuses_when_full() {
    let stores = get_test_stores().await;
    let event_id = EventId::new();
    let capacity = Capacity::Limited(1);

    let admitted = stores
        .registrations
        .create_within_capacity(&going(event_id), capacity)
        .await
        .unwrap();
    assert!(admitted);

    let refused = stores
        .registrations
        .create_within_capacity(&going(event_id), capacity)
        .await
        .unwrap();
    assert!(!refused);

    let count = stores
        .registrations
        .count_by_status(event_id, RsvpStatus::Going)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn concurrent_admissions_never_exceed_capacity() {
    let stores = get_test_stores().await;
    let event_id = EventId::new();
    let capacity = Capacity::Limited(3);

    let attempts = (0..12).map(|_| {
        let store = stores.registrations.clone();
        let reg = going(event_id);
        tokio::spawn(async move { store.create_within_capacity(&reg, capacity).await })
    });
    let results = futures_util::future::join_all(attempts).await;

    let admitted = results
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|admitted| *admitted)
        .count();
    assert_eq!(admitted, 3);

    let count = stores
        .registrations
        .count_by_status(event_id, RsvpStatus::Going)
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
#[serial]
async fn claim_seat_respects_status_and_capacity() {
    let stores = get_test_stores().await;
    let event_id = EventId::new();
    let holder = going(event_id);
    let waiting = going(event_id).with_status(RsvpStatus::Waitlist);
    stores.registrations.create(&holder).await.unwrap();
    stores.registrations.create(&waiting).await.unwrap();

    let full = stores
        .registrations
        .claim_seat(
            event_id,
            waiting.user_id,
            RsvpStatus::Waitlist,
            Capacity::Limited(1),
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(full, SeatClaim::Full);

    let missing = stores
        .registrations
        .claim_seat(
            event_id,
            UserId::new(),
            RsvpStatus::Waitlist,
            Capacity::Limited(5),
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(missing, SeatClaim::Missing);

    let claimed = stores
        .registrations
        .claim_seat(
            event_id,
            waiting.user_id,
            RsvpStatus::Waitlist,
            Capacity::Limited(2),
            Utc::now(),
        )
        .await
        .unwrap();
    assert_eq!(claimed, SeatClaim::Claimed);
}

#[tokio::test]
#[serial]
async fn waitlist_orders_by_time_then_insertion() {
    let stores = get_test_stores().await;
    let event_id = EventId::new();
    let at = timestamp_now();

    let mut later = WaitlistEntry::new(event_id, UserId::new());
    later.created_at = at + Duration::seconds(1);
    let mut tie_a = WaitlistEntry::new(event_id, UserId::new());
    tie_a.created_at = at;
    let mut tie_b = WaitlistEntry::new(event_id, UserId::new());
    tie_b.created_at = at;

    stores.waitlist.enqueue(&later).await.unwrap();
    stores.waitlist.enqueue(&tie_a).await.unwrap();
    stores.waitlist.enqueue(&tie_b).await.unwrap();

    let position = stores
        .waitlist
        .position(event_id, tie_b.user_id)
        .await
        .unwrap();
    assert_eq!(position, Some(2));
    let position = stores
        .waitlist
        .position(event_id, UserId::new())
        .await
        .unwrap();
    assert_eq!(position, None);

    let order: Vec<_> = stores
        .waitlist
        .list(event_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(order, vec![tie_a.id, tie_b.id, later.id]);

    let head = stores.waitlist.oldest(event_id).await.unwrap().unwrap();
    assert_eq!(head.id, tie_a.id);
}

#[tokio::test]
#[serial]
async fn waitlist_remove_and_duplicates() {
    let stores = get_test_stores().await;
    let entry = WaitlistEntry::new(EventId::new(), UserId::new());
    stores.waitlist.enqueue(&entry).await.unwrap();

    let dup = WaitlistEntry::new(entry.event_id, entry.user_id);
    assert!(matches!(
        stores.waitlist.enqueue(&dup).await,
        Err(StoreError::Conflict { .. })
    ));

    let position = stores
        .waitlist
        .position(entry.event_id, entry.user_id)
        .await
        .unwrap();
    assert_eq!(position, Some(1));
    assert_eq!(stores.waitlist.count(entry.event_id).await.unwrap(), 1);

    assert!(stores.waitlist.remove(entry.id).await.unwrap());
    assert!(!stores.waitlist.remove(entry.id).await.unwrap());
    assert_eq!(stores.waitlist.oldest(entry.event_id).await.unwrap(), None);
}

#[tokio::test]
#[serial]
async fn capacity_oracle_reads_events_table() {
    let stores = get_test_stores().await;
    let event_id = EventId::new();

    assert!(matches!(
        stores.capacities.capacity(event_id).await,
        Err(StoreError::EventNotFound(_))
    ));

    stores.capacities.set_capacity(event_id, 25).await.unwrap();
    assert_eq!(
        stores.capacities.capacity(event_id).await.unwrap(),
        Capacity::Limited(25)
    );

    stores.capacities.set_capacity(event_id, -1).await.unwrap();
    assert_eq!(
        stores.capacities.capacity(event_id).await.unwrap(),
        Capacity::Unlimited
    );
}
