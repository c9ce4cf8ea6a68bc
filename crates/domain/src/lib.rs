//! Domain layer for the event registration backend.
//!
//! This crate provides the registration engine:
//! - `RegistrationService` for register, RSVP update and cancellation
//! - capacity enforcement and FIFO waitlisting
//! - a background promotion worker fed by message passing

pub mod config;
pub mod error;
pub mod registration;

pub use config::{EngineConfig, PromotionPolicy};
pub use error::RegistrationError;
pub use registration::{
    EventSummary, PromotionHandle, PromotionOutcome, PromotionQueue, PromotionReason,
    PromotionRequest, PromotionWorker, RegistrationService, WaitlistPromoter,
};
