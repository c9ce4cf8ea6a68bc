//! Registration, RSVP and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{EventId, UserId};
use registration_store::{Registration, RsvpStatus};
use serde::Deserialize;

use super::parse_id;
use crate::error::ApiError;
use crate::{AppState, Backend};

// -- Request types --

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub user_id: String,
    pub source: Option<String>,
    pub utm: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct RsvpRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Comma-separated statuses, e.g. `going,maybe`.
    pub status: Option<String>,
}

// -- Handlers --

/// POST /events/{event_id}/registrations — register a user for an event.
#[tracing::instrument(skip(state, req))]
pub async fn register<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(event_id): Path<String>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let event_id: EventId = parse_id(&event_id, "event_id")?;
    let user_id: UserId = parse_id(&req.user_id, "user_id")?;

    let registration = state
        .service
        .register(
            event_id,
            user_id,
            req.source.unwrap_or_default(),
            req.utm.unwrap_or(serde_json::Value::Null),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(registration)))
}

/// GET /events/{event_id}/registrations — list registrations, optionally by status.
#[tracing::instrument(skip(state))]
pub async fn list<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(event_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Registration>>, ApiError> {
    let event_id: EventId = parse_id(&event_id, "event_id")?;
    let statuses = match query.status.as_deref() {
        Some(raw) => parse_statuses(raw)?,
        None => Vec::new(),
    };

    let registrations = state
        .service
        .list_registrations(event_id, &statuses)
        .await?;
    Ok(Json(registrations))
}

/// GET /events/{event_id}/registrations/{user_id} — load one registration.
#[tracing::instrument(skip(state))]
pub async fn get<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path((event_id, user_id)): Path<(String, String)>,
) -> Result<Json<Registration>, ApiError> {
    let event_id: EventId = parse_id(&event_id, "event_id")?;
    let user_id: UserId = parse_id(&user_id, "user_id")?;

    let registration = state.service.get_registration(event_id, user_id).await?;
    Ok(Json(registration))
}

/// PUT /events/{event_id}/registrations/{user_id}/rsvp — change RSVP status.
#[tracing::instrument(skip(state, req))]
pub async fn update_rsvp<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path((event_id, user_id)): Path<(String, String)>,
    Json(req): Json<RsvpRequest>,
) -> Result<Json<Registration>, ApiError> {
    let event_id: EventId = parse_id(&event_id, "event_id")?;
    let user_id: UserId = parse_id(&user_id, "user_id")?;
    let status: RsvpStatus = req
        .status
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("{e}")))?;

    let registration = state
        .service
        .update_rsvp(event_id, user_id, status)
        .await?;
    Ok(Json(registration))
}

/// DELETE /events/{event_id}/registrations/{user_id} — cancel a registration.
#[tracing::instrument(skip(state))]
pub async fn cancel<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path((event_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let event_id: EventId = parse_id(&event_id, "event_id")?;
    let user_id: UserId = parse_id(&user_id, "user_id")?;

    state.service.cancel(event_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn parse_statuses(raw: &str) -> Result<Vec<RsvpStatus>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<RsvpStatus>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statuses() {
        let statuses = parse_statuses("going, maybe,").unwrap();
        assert_eq!(statuses, vec![RsvpStatus::Going, RsvpStatus::Maybe]);
    }

    #[test]
    fn test_parse_statuses_rejects_unknown() {
        assert!(matches!(
            parse_statuses("going,attending"),
            Err(ApiError::BadRequest(_))
        ));
    }
}
