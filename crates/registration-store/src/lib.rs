//! Storage for event registrations, waitlists and capacities.
//!
//! Each store is a trait with an in-memory implementation for tests and
//! single-node runs, and a PostgreSQL implementation.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use common::{EventId, RegistrationId, UserId, WaitlistEntryId};
pub use error::{Result, StoreError};
pub use memory::{InMemoryCapacityOracle, InMemoryRegistrationStore, InMemoryWaitlistQueue};
pub use postgres::{
    PostgresCapacityOracle, PostgresRegistrationStore, PostgresWaitlistQueue, run_migrations,
};
pub use record::{
    Capacity, ParseStatusError, Registration, RsvpStatus, WaitlistEntry, timestamp_now,
};
pub use store::{CapacityOracle, CapacityRegistry, RegistrationStore, SeatClaim, WaitlistQueue};
