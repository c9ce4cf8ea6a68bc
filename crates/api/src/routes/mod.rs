//! HTTP route handlers.

pub mod events;
pub mod health;
pub mod metrics;
pub mod registrations;

use std::fmt::Display;
use std::str::FromStr;

use crate::error::ApiError;

fn parse_id<T>(raw: &str, what: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {what}: {e}")))
}
