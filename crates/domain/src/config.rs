//! Engine policy configuration.

use serde::{Deserialize, Serialize};

/// How many waitlisted users one promotion trigger may move to `going`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionPolicy {
    /// At most one promotion per trigger.
    #[default]
    Single,
    /// Keep promoting while seats are free and the queue is non-empty.
    DrainWhileRoom,
}

impl std::str::FromStr for PromotionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(PromotionPolicy::Single),
            "drain" | "drain_while_room" => Ok(PromotionPolicy::DrainWhileRoom),
            other => Err(format!("unknown promotion policy: {other}")),
        }
    }
}

/// Behavior switches for `RegistrationService`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub promotion_policy: PromotionPolicy,
    /// When true, an RSVP into `going` needs a free seat.
    pub rsvp_capacity_check: bool,
    /// Bound of the promotion request channel.
    pub promotion_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            promotion_policy: PromotionPolicy::Single,
            rsvp_capacity_check: true,
            promotion_queue_capacity: 1024,
        }
    }
}
