use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EventId, RegistrationId, UserId, WaitlistEntryId};

/// Current time truncated to microseconds, the precision Postgres keeps.
///
/// Records stamped with this compare equal after a database round trip.
pub fn timestamp_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A user's RSVP status for one event.
///
/// Status transitions:
/// ```text
/// (none) ──register, room──────► Going
/// (none) ──register, full──────► Waitlist
/// Going ──rsvp──► NotGoing | Maybe | Waitlist      (frees a seat)
/// NotGoing | Maybe | Waitlist ──rsvp──► Going
/// Waitlist ──promotion──► Going
/// any ──cancel──► (deleted)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsvpStatus {
    Going,
    NotGoing,
    Maybe,
    Waitlist,
}

impl RsvpStatus {
    /// All statuses, in display order.
    pub const ALL: [RsvpStatus; 4] = [
        RsvpStatus::Going,
        RsvpStatus::NotGoing,
        RsvpStatus::Maybe,
        RsvpStatus::Waitlist,
    ];

    /// Returns the wire/storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RsvpStatus::Going => "going",
            RsvpStatus::NotGoing => "not_going",
            RsvpStatus::Maybe => "maybe",
            RsvpStatus::Waitlist => "waitlist",
        }
    }

    /// Returns true if this status occupies a capacity slot.
    pub fn holds_seat(&self) -> bool {
        matches!(self, RsvpStatus::Going)
    }
}

impl std::fmt::Display for RsvpStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown RSVP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown RSVP status: {0}")]
pub struct ParseStatusError(pub String);

impl std::str::FromStr for RsvpStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "going" => Ok(RsvpStatus::Going),
            "not_going" => Ok(RsvpStatus::NotGoing),
            "maybe" => Ok(RsvpStatus::Maybe),
            "waitlist" => Ok(RsvpStatus::Waitlist),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Maximum number of `going` registrations an event accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capacity {
    Unlimited,
    Limited(u32),
}

impl Capacity {
    /// Interprets a raw capacity column. Zero or negative means unlimited.
    pub fn from_raw(raw: i64) -> Self {
        if raw <= 0 {
            Capacity::Unlimited
        } else {
            Capacity::Limited(u32::try_from(raw).unwrap_or(u32::MAX))
        }
    }

    /// Returns the limit, or None when unlimited.
    pub fn limit(&self) -> Option<u32> {
        match self {
            Capacity::Unlimited => None,
            Capacity::Limited(limit) => Some(*limit),
        }
    }

    /// Returns true if one more `going` registration fits.
    pub fn has_room(&self, going: u64) -> bool {
        match self {
            Capacity::Unlimited => true,
            Capacity::Limited(limit) => going < u64::from(*limit),
        }
    }

    /// Returns the number of free seats, or None when unlimited.
    pub fn remaining(&self, going: u64) -> Option<u64> {
        self.limit()
            .map(|limit| u64::from(limit).saturating_sub(going))
    }
}

/// One user's relationship to one event.
///
/// At most one registration exists per (event, user) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub id: RegistrationId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub status: RsvpStatus,
    /// Free-text attribution tag (e.g. "bot", "landing").
    pub source: String,
    /// Opaque UTM metadata, stored and returned untouched.
    pub utm: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    /// Creates a new `going` registration.
    pub fn new(
        event_id: EventId,
        user_id: UserId,
        source: impl Into<String>,
        utm: serde_json::Value,
    ) -> Self {
        let now = timestamp_now();
        Self {
            id: RegistrationId::new(),
            event_id,
            user_id,
            status: RsvpStatus::Going,
            source: source.into(),
            utm,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the registration with a different initial status.
    pub fn with_status(mut self, status: RsvpStatus) -> Self {
        self.status = status;
        self
    }
}

/// A user queued for a seat on one event.
///
/// Queue order is `created_at`, ties broken by insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: WaitlistEntryId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl WaitlistEntry {
    /// Creates a new entry stamped with the current time.
    pub fn new(event_id: EventId, user_id: UserId) -> Self {
        Self {
            id: WaitlistEntryId::new(),
            event_id,
            user_id,
            created_at: timestamp_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_wire_names() {
        for status in RsvpStatus::ALL {
            assert_eq!(status.as_str().parse::<RsvpStatus>(), Ok(status));
        }
        assert_eq!(
            "attending".parse::<RsvpStatus>(),
            Err(ParseStatusError("attending".to_string()))
        );
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&RsvpStatus::NotGoing).unwrap();
        assert_eq!(json, "\"not_going\"");
    }

    #[test]
    fn only_going_holds_a_seat() {
        assert!(RsvpStatus::Going.holds_seat());
        assert!(!RsvpStatus::Maybe.holds_seat());
        assert!(!RsvpStatus::Waitlist.holds_seat());
    }

    #[test]
    fn non_positive_capacity_is_unlimited() {
        assert_eq!(Capacity::from_raw(0), Capacity::Unlimited);
        assert_eq!(Capacity::from_raw(-5), Capacity::Unlimited);
        assert_eq!(Capacity::from_raw(3), Capacity::Limited(3));
    }

    #[test]
    fn capacity_room_and_remaining() {
        let cap = Capacity::Limited(2);
        assert!(cap.has_room(1));
        assert!(!cap.has_room(2));
        assert!(!cap.has_room(3));
        assert_eq!(cap.remaining(1), Some(1));
        assert_eq!(cap.remaining(5), Some(0));

        assert!(Capacity::Unlimited.has_room(u64::MAX));
        assert_eq!(Capacity::Unlimited.remaining(10), None);
    }

    #[test]
    fn new_records_use_microsecond_timestamps() {
        let reg = Registration::new(
            EventId::new(),
            UserId::new(),
            "bot",
            serde_json::Value::Null,
        );
        let entry = WaitlistEntry::new(reg.event_id, reg.user_id);

        assert_eq!(reg.created_at, reg.updated_at);
        assert_eq!(reg.created_at.timestamp_subsec_nanos() % 1_000, 0);
        assert_eq!(entry.created_at.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn registration_json_field_names() {
        let reg = Registration::new(
            EventId::new(),
            UserId::new(),
            "landing",
            serde_json::json!({"utm_source": "tg"}),
        );
        let json = serde_json::to_value(&reg).unwrap();
        for field in [
            "id",
            "event_id",
            "user_id",
            "status",
            "source",
            "utm",
            "created_at",
            "updated_at",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
        assert_eq!(json["status"], "going");
        assert_eq!(json["utm"]["utm_source"], "tg");
    }
}
