//! Domain error types.

use common::{EventId, UserId};
use registration_store::{Registration, StoreError};
use thiserror::Error;

/// Errors that can occur during registration operations.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The user already has a registration for this event.
    ///
    /// Carries the current registration so retrying callers get its state.
    #[error("User {} already registered for event {}", .0.user_id, .0.event_id)]
    AlreadyRegistered(Box<Registration>),

    /// No registration exists for this (event, user) pair.
    #[error("Registration not found for user {user_id} on event {event_id}")]
    RegistrationNotFound { event_id: EventId, user_id: UserId },

    /// The event does not exist.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// The event has no free seat for an RSVP into `going`.
    #[error("Event capacity reached: {0}")]
    CapacityReached(EventId),

    /// The registration kept changing while an RSVP update was applied.
    #[error("Registration for user {user_id} on event {event_id} changed concurrently")]
    ConcurrentUpdate { event_id: EventId, user_id: UserId },

    /// A storage error, passed through as-is.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EventNotFound(event_id) => RegistrationError::EventNotFound(event_id),
            other => RegistrationError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_not_found_maps_to_domain_kind() {
        let event_id = EventId::new();
        let err = RegistrationError::from(StoreError::EventNotFound(event_id));
        assert!(matches!(err, RegistrationError::EventNotFound(id) if id == event_id));
    }

    #[test]
    fn other_store_errors_pass_through() {
        let err = RegistrationError::from(StoreError::InvalidRecord("bad".to_string()));
        assert!(matches!(err, RegistrationError::Store(StoreError::InvalidRecord(_))));
        assert_eq!(err.to_string(), "Invalid record: bad");
    }
}
