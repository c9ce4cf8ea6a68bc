use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Capacity, EventId, Registration, Result, RsvpStatus, UserId, WaitlistEntry, WaitlistEntryId,
};

/// Outcome of an attempt to move an existing registration into `going`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatClaim {
    /// The registration is now `going`.
    Claimed,
    /// The event has no free seat; nothing changed.
    Full,
    /// The registration is gone or no longer has the expected status.
    Missing,
}

/// Durable table of per-user event registrations.
///
/// Rows are keyed by (event, user); implementations must reject a second
/// row for the same pair with `StoreError::Conflict`.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Inserts a new registration.
    async fn create(&self, registration: &Registration) -> Result<()>;

    /// Inserts `registration` only if the event's `going` count is below
    /// `capacity`. The count check and the insert are atomic with respect to
    /// other admissions for the same event.
    ///
    /// Returns false (and writes nothing) when the event is full.
    async fn create_within_capacity(
        &self,
        registration: &Registration,
        capacity: Capacity,
    ) -> Result<bool>;

    /// Looks up the registration for (event, user).
    async fn get(&self, event_id: EventId, user_id: UserId) -> Result<Option<Registration>>;

    /// Moves the registration from `from` to `to` and stamps `updated_at`.
    ///
    /// Returns false (and writes nothing) when the row is gone or its status
    /// is no longer `from`. Capacity is not checked; use `claim_seat` for
    /// that.
    async fn update_status(
        &self,
        event_id: EventId,
        user_id: UserId,
        from: RsvpStatus,
        to: RsvpStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Atomically moves the registration from `from` to `going` if a seat is
    /// free under `capacity`.
    async fn claim_seat(
        &self,
        event_id: EventId,
        user_id: UserId,
        from: RsvpStatus,
        capacity: Capacity,
        at: DateTime<Utc>,
    ) -> Result<SeatClaim>;

    /// Deletes the registration. Returns false if there was none.
    async fn delete(&self, event_id: EventId, user_id: UserId) -> Result<bool>;

    /// Counts the event's registrations with the given status.
    async fn count_by_status(&self, event_id: EventId, status: RsvpStatus) -> Result<u64>;

    /// Lists the event's registrations having any of `statuses`, newest first.
    async fn list_by_status(
        &self,
        event_id: EventId,
        statuses: &[RsvpStatus],
    ) -> Result<Vec<Registration>>;
}

/// Durable FIFO of users waiting for a seat, per event.
#[async_trait]
pub trait WaitlistQueue: Send + Sync {
    /// Appends an entry. A user may be queued at most once per event.
    async fn enqueue(&self, entry: &WaitlistEntry) -> Result<()>;

    /// Returns the head of the event's queue without removing it.
    ///
    /// Order is `created_at`, ties broken by insertion order.
    async fn oldest(&self, event_id: EventId) -> Result<Option<WaitlistEntry>>;

    /// Returns the user's 1-based place in the event's queue, if queued.
    async fn position(&self, event_id: EventId, user_id: UserId) -> Result<Option<u64>>;

    /// Removes an entry by id. Returns false if it was already gone.
    async fn remove(&self, entry_id: WaitlistEntryId) -> Result<bool>;

    /// Removes the user's entry for the event. Returns false if none existed.
    async fn remove_for_user(&self, event_id: EventId, user_id: UserId) -> Result<bool>;

    /// Number of users queued for the event.
    async fn count(&self, event_id: EventId) -> Result<u64>;

    /// All entries for the event in queue order.
    async fn list(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>>;
}

/// Read-only source of an event's capacity.
#[async_trait]
pub trait CapacityOracle: Send + Sync {
    /// Returns the event's capacity, or `StoreError::EventNotFound`.
    async fn capacity(&self, event_id: EventId) -> Result<Capacity>;
}

/// Write side of event capacities, used for wiring and operator tooling.
#[async_trait]
pub trait CapacityRegistry: CapacityOracle {
    /// Creates or replaces the event's capacity (raw value, `<= 0` = unlimited).
    async fn set_capacity(&self, event_id: EventId, raw: i64) -> Result<()>;
}
