use thiserror::Error;

use crate::{EventId, UserId};

/// Errors that can occur when interacting with the registration stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row for this (event, user) pair already exists.
    #[error("Conflict: user {user_id} already has a record for event {event_id}")]
    Conflict { event_id: EventId, user_id: UserId },

    /// The capacity oracle has no such event.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// A stored row could not be decoded into a record.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
