//! Shared identifier types for the event registration backend.

mod ids;

pub use ids::{EventId, RegistrationId, UserId, WaitlistEntryId};
