use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    Capacity, EventId, Registration, Result, RsvpStatus, StoreError, UserId, WaitlistEntry,
    WaitlistEntryId,
    store::{CapacityOracle, CapacityRegistry, RegistrationStore, SeatClaim, WaitlistQueue},
};

type RegistrationKey = (EventId, UserId);

fn going_count(rows: &HashMap<RegistrationKey, Registration>, event_id: EventId) -> u64 {
    rows.values()
        .filter(|r| r.event_id == event_id && r.status == RsvpStatus::Going)
        .count() as u64
}

/// In-memory registration store for testing and single-node runs.
///
/// Every mutation takes the single write lock, so capacity checks and the
/// writes they guard are atomic.
#[derive(Clone, Default)]
pub struct InMemoryRegistrationStore {
    rows: Arc<RwLock<HashMap<RegistrationKey, Registration>>>,
}

impl InMemoryRegistrationStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of registrations across all events.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Returns true if no registrations are stored.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn create(&self, registration: &Registration) -> Result<()> {
        let mut rows = self.rows.write().await;
        let key = (registration.event_id, registration.user_id);
        if rows.contains_key(&key) {
            return Err(StoreError::Conflict {
                event_id: registration.event_id,
                user_id: registration.user_id,
            });
        }
        rows.insert(key, registration.clone());
        Ok(())
    }

    async fn create_within_capacity(
        &self,
        registration: &Registration,
        capacity: Capacity,
    ) -> Result<bool> {
        let mut rows = self.rows.write().await;
        let key = (registration.event_id, registration.user_id);
        if rows.contains_key(&key) {
            return Err(StoreError::Conflict {
                event_id: registration.event_id,
                user_id: registration.user_id,
            });
        }
        if !capacity.has_room(going_count(&rows, registration.event_id)) {
            return Ok(false);
        }
        rows.insert(key, registration.clone());
        Ok(true)
    }

    async fn get(&self, event_id: EventId, user_id: UserId) -> Result<Option<Registration>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&(event_id, user_id)).cloned())
    }

    async fn update_status(
        &self,
        event_id: EventId,
        user_id: UserId,
        from: RsvpStatus,
        to: RsvpStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&(event_id, user_id)) {
            Some(row) if row.status == from => {
                row.status = to;
                row.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_seat(
        &self,
        event_id: EventId,
        user_id: UserId,
        from: RsvpStatus,
        capacity: Capacity,
        at: DateTime<Utc>,
    ) -> Result<SeatClaim> {
        let mut rows = self.rows.write().await;
        match rows.get(&(event_id, user_id)) {
            Some(row) if row.status == from => {}
            _ => return Ok(SeatClaim::Missing),
        }
        if !capacity.has_room(going_count(&rows, event_id)) {
            return Ok(SeatClaim::Full);
        }
        if let Some(row) = rows.get_mut(&(event_id, user_id)) {
            row.status = RsvpStatus::Going;
            row.updated_at = at;
        }
        Ok(SeatClaim::Claimed)
    }

    async fn delete(&self, event_id: EventId, user_id: UserId) -> Result<bool> {
        let mut rows = self.rows.write().await;
        Ok(rows.remove(&(event_id, user_id)).is_some())
    }

    async fn count_by_status(&self, event_id: EventId, status: RsvpStatus) -> Result<u64> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|r| r.event_id == event_id && r.status == status)
            .count() as u64)
    }

    async fn list_by_status(
        &self,
        event_id: EventId,
        statuses: &[RsvpStatus],
    ) -> Result<Vec<Registration>> {
        let rows = self.rows.read().await;
        let mut found: Vec<_> = rows
            .values()
            .filter(|r| r.event_id == event_id && statuses.contains(&r.status))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}

/// In-memory waitlist queue.
///
/// Entries are kept in insertion order, which breaks `created_at` ties.
#[derive(Clone, Default)]
pub struct InMemoryWaitlistQueue {
    entries: Arc<RwLock<Vec<WaitlistEntry>>>,
}

impl InMemoryWaitlistQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    fn ordered_for(entries: &[WaitlistEntry], event_id: EventId) -> Vec<WaitlistEntry> {
        let mut found: Vec<_> = entries
            .iter()
            .filter(|e| e.event_id == event_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        found.sort_by_key(|e| e.created_at);
        found
    }
}

#[async_trait]
impl WaitlistQueue for InMemoryWaitlistQueue {
    async fn enqueue(&self, entry: &WaitlistEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries
            .iter()
            .any(|e| e.event_id == entry.event_id && e.user_id == entry.user_id)
        {
            return Err(StoreError::Conflict {
                event_id: entry.event_id,
                user_id: entry.user_id,
            });
        }
        entries.push(entry.clone());
        Ok(())
    }

    async fn oldest(&self, event_id: EventId) -> Result<Option<WaitlistEntry>> {
        let entries = self.entries.read().await;
        Ok(Self::ordered_for(&entries, event_id).into_iter().next())
    }

    async fn position(&self, event_id: EventId, user_id: UserId) -> Result<Option<u64>> {
        let entries = self.entries.read().await;
        Ok(Self::ordered_for(&entries, event_id)
            .iter()
            .position(|e| e.user_id == user_id)
            .map(|index| index as u64 + 1))
    }

    async fn remove(&self, entry_id: WaitlistEntryId) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != entry_id);
        Ok(entries.len() != before)
    }

    async fn remove_for_user(&self, event_id: EventId, user_id: UserId) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| !(e.event_id == event_id && e.user_id == user_id));
        Ok(entries.len() != before)
    }

    async fn count(&self, event_id: EventId) -> Result<u64> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|e| e.event_id == event_id).count() as u64)
    }

    async fn list(&self, event_id: EventId) -> Result<Vec<WaitlistEntry>> {
        let entries = self.entries.read().await;
        Ok(Self::ordered_for(&entries, event_id))
    }
}

/// In-memory event capacity table.
#[derive(Clone, Default)]
pub struct InMemoryCapacityOracle {
    capacities: Arc<RwLock<HashMap<EventId, i64>>>,
}

impl InMemoryCapacityOracle {
    /// Creates a new oracle that knows no events.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CapacityOracle for InMemoryCapacityOracle {
    async fn capacity(&self, event_id: EventId) -> Result<Capacity> {
        let capacities = self.capacities.read().await;
        capacities
            .get(&event_id)
            .copied()
            .map(Capacity::from_raw)
            .ok_or(StoreError::EventNotFound(event_id))
    }
}

#[async_trait]
impl CapacityRegistry for InMemoryCapacityOracle {
    async fn set_capacity(&self, event_id: EventId, raw: i64) -> Result<()> {
        self.capacities.write().await.insert(event_id, raw);
        Ok(())
    }
}
