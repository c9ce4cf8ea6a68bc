use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Capacity, EventId, Registration, RegistrationId, Result, RsvpStatus, StoreError, UserId,
    WaitlistEntry, WaitlistEntryId,
    store::{CapacityOracle, CapacityRegistry, RegistrationStore, SeatClaim, WaitlistQueue},
};

/// Runs the database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Serializes capacity-sensitive writes for one event within a transaction.
///
/// The lock is released on commit or rollback.
async fn lock_event(tx: &mut Transaction<'_, Postgres>, event_id: EventId) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(event_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn count_going(tx: &mut Transaction<'_, Postgres>, event_id: EventId) -> Result<u64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM registrations WHERE event_id = $1 AND status = 'going'",
    )
    .bind(event_id.as_uuid())
    .fetch_one(&mut **tx)
    .await?;
    Ok(count.max(0) as u64)
}

fn parse_status(raw: &str) -> Result<RsvpStatus> {
    raw.parse::<RsvpStatus>()
        .map_err(|e| StoreError::InvalidRecord(e.to_string()))
}

/// PostgreSQL-backed registration store.
#[derive(Clone)]
pub struct PostgresRegistrationStore {
    pool: PgPool,
}

impl PostgresRegistrationStore {
    /// Creates a new PostgreSQL registration store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_registration(row: PgRow) -> Result<Registration> {
        let status: String = row.try_get("status")?;

        Ok(Registration {
            id: RegistrationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            status: parse_status(&status)?,
            source: row.try_get("source")?,
            utm: row.try_get("utm")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        registration: &Registration,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO registrations (id, event_id, user_id, status, source, utm, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(registration.id.as_uuid())
        .bind(registration.event_id.as_uuid())
        .bind(registration.user_id.as_uuid())
        .bind(registration.status.as_str())
        .bind(&registration.source)
        .bind(&registration.utm)
        .bind(registration.created_at)
        .bind(registration.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_registration_event_user")
            {
                return StoreError::Conflict {
                    event_id: registration.event_id,
                    user_id: registration.user_id,
                };
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for PostgresRegistrationStore {
    async fn create(&self, registration: &Registration) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert(&mut tx, registration).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_within_capacity(
        &self,
        registration: &Registration,
        capacity: Capacity,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        if let Capacity::Limited(_) = capacity {
            lock_event(&mut tx, registration.event_id).await?;
            let going = count_going(&mut tx, registration.event_id).await?;
            if !capacity.has_room(going) {
                tracing::debug!(event_id = %registration.event_id, going, "event full");
                return Ok(false);
            }
        }

        Self::insert(&mut tx, registration).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get(&self, event_id: EventId, user_id: UserId) -> Result<Option<Registration>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, event_id, user_id, status, source, utm, created_at, updated_at
            FROM registrations
            WHERE event_id = $1 AND user_id = $2
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_registration).transpose()
    }

    async fn update_status(
        &self,
        event_id: EventId,
        user_id: UserId,
        from: RsvpStatus,
        to: RsvpStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Same lock as admissions so going-count reads see a settled row.
        if from == RsvpStatus::Going || to == RsvpStatus::Going {
            lock_event(&mut tx, event_id).await?;
        }

        let result = sqlx::query(
            r#"
            UPDATE registrations
            SET status = $4, updated_at = $5
            WHERE event_id = $1 AND user_id = $2 AND status = $3
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim_seat(
        &self,
        event_id: EventId,
        user_id: UserId,
        from: RsvpStatus,
        capacity: Capacity,
        at: DateTime<Utc>,
    ) -> Result<SeatClaim> {
        let mut tx = self.pool.begin().await?;

        if let Capacity::Limited(_) = capacity {
            lock_event(&mut tx, event_id).await?;
        }

        let current: Option<String> = sqlx::query_scalar(
            "SELECT status FROM registrations WHERE event_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        match current.as_deref().map(parse_status).transpose()? {
            Some(status) if status == from => {}
            _ => return Ok(SeatClaim::Missing),
        }

        if let Capacity::Limited(_) = capacity {
            let going = count_going(&mut tx, event_id).await?;
            if !capacity.has_room(going) {
                return Ok(SeatClaim::Full);
            }
        }

        sqlx::query(
            r#"
            UPDATE registrations
            SET status = 'going', updated_at = $3
            WHERE event_id = $1 AND user_id = $2
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .bind(at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SeatClaim::Claimed)
    }

    async fn delete(&self, event_id: EventId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM registrations WHERE event_id = $1 AND user_id = $2")
            .bind(event_id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, event_id: EventId, status: RsvpStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM registrations WHERE event_id = $1 AND status = $2",
        )
        .bind(event_id.as_uuid())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn list_by_status(
        &self,
        event_id: EventId,
        statuses: &[RsvpStatus],
    ) -> Result<Vec<Registration>> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();

        let rows = sqlx::query(
            r#"
            SELECT id, event_id, user_id, status, source, utm, created_at, updated_at
            FROM registrations
            WHERE event_id = $1 AND status = ANY($2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(statuses)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_registration).collect()
    }
}

/// PostgreSQL-backed waitlist queue.
#[derive(Clone)]
pub struct PostgresWaitlistQueue {
    pool: PgPool,
}

impl PostgresWaitlistQueue {
    /// Creates a new PostgreSQL waitlist queue.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: PgRow) -> Result<WaitlistEntry> {
        Ok(WaitlistEntry {
            id: WaitlistEntryId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl WaitlistQueue for PostgresWaitlistQueue {
    async fn enqueue(&self, entry: &WaitlistEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO waitlist (id, event_id, user_id, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(entry.event_id.as_uuid())
        .bind(entry.user_id.as_uuid())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_waitlist_event_user")
            {
                return StoreError::Conflict {
                    event_id: entry.event_id,
                    user_id: entry.user_id,
                };
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }

    async fn oldest(&self, event_id: EventId) -> Result<Option<WaitlistEntry>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT id, event_id, user_id, created_at
            FROM waitlist
            WHERE event_id = $1
            ORDER BY created_at ASC, seq ASC
            LIMIT 1
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_entry).transpose()
    }

    async fn position(&self, event_id: EventId, user_id: UserId) -> Result<Option<u64>> {
        let position: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM waitlist ahead
            JOIN waitlist own ON own.event_id = ahead.event_id
            WHERE own.event_id = $1 AND own.user_id = $2
              AND (ahead.created_at, ahead.seq) <= (own.created_at, own.seq)
            GROUP BY own.id
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(position.map(|p| p.max(0) as u64))
    }

    async fn remove(&self, entry_id: WaitlistEntryId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM waitlist WHERE id = $1")
            .bind(entry_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_for_user(&self, event_id: EventId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM waitlist WHERE event_id = $1 AND user_id = $2")
            .bind(event_id.as_uuid())
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, event_id: EventId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM waitlist WHERE event_id = $1")
            .bind(event_id.as_uuid())
            .fetch_one(&self.pool)
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn list(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_id, user_id, created_at
            FROM waitlist
            WHERE event_id = $1
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_entry).collect()
    }
}

/// Capacity oracle backed by the `events` table.
#[derive(Clone)]
pub struct PostgresCapacityOracle {
    pool: PgPool,
}

impl PostgresCapacityOracle {
    /// Creates a new PostgreSQL capacity oracle.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CapacityOracle for PostgresCapacityOracle {
    async fn capacity(&self, event_id: EventId) -> Result<Capacity> {
        let raw: Option<i32> = sqlx::query_scalar("SELECT capacity FROM events WHERE id = $1")
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        raw.map(|raw| Capacity::from_raw(i64::from(raw)))
            .ok_or(StoreError::EventNotFound(event_id))
    }
}

#[async_trait]
impl CapacityRegistry for PostgresCapacityOracle {
    async fn set_capacity(&self, event_id: EventId, raw: i64) -> Result<()> {
        let raw = raw.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;

        sqlx::query(
            r#"
            INSERT INTO events (id, capacity)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET
                capacity = EXCLUDED.capacity,
                updated_at = NOW()
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(raw)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
