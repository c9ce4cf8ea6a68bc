//! Event registration engine: capacity, RSVP and waitlist handling.

mod promotion;
mod service;

pub use promotion::{
    PromotionHandle, PromotionOutcome, PromotionQueue, PromotionReason, PromotionRequest,
    PromotionWorker, WaitlistPromoter,
};
pub use service::{EventSummary, RegistrationService};
