//! Per-event capacity, summary and waitlist endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{EventId, UserId};
use domain::EventSummary;
use registration_store::{Capacity, CapacityRegistry, WaitlistEntry};
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::error::ApiError;
use crate::{AppState, Backend};

#[derive(Deserialize)]
pub struct CapacityRequest {
    /// Seat limit; zero or negative means unlimited.
    pub capacity: i64,
}

#[derive(Serialize)]
pub struct CapacityResponse {
    pub event_id: EventId,
    /// None when unlimited.
    pub capacity: Option<u32>,
}

#[derive(Serialize)]
pub struct PromoteResponse {
    pub promoted: Vec<UserId>,
    pub stale_removed: u32,
    pub requeued: u32,
}

/// PUT /events/{event_id}/capacity — set an event's seat limit.
#[tracing::instrument(skip(state, req))]
pub async fn set_capacity<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(event_id): Path<String>,
    Json(req): Json<CapacityRequest>,
) -> Result<Json<CapacityResponse>, ApiError> {
    let event_id: EventId = parse_id(&event_id, "event_id")?;

    state.capacities.set_capacity(event_id, req.capacity).await?;
    tracing::info!(capacity = req.capacity, "event capacity set");

    Ok(Json(CapacityResponse {
        event_id,
        capacity: Capacity::from_raw(req.capacity).limit(),
    }))
}

/// GET /events/{event_id}/summary — counts per status and remaining seats.
#[tracing::instrument(skip(state))]
pub async fn summary<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(event_id): Path<String>,
) -> Result<Json<EventSummary>, ApiError> {
    let event_id: EventId = parse_id(&event_id, "event_id")?;
    Ok(Json(state.service.summary(event_id).await?))
}

/// GET /events/{event_id}/waitlist — queued entries, head first.
#[tracing::instrument(skip(state))]
pub async fn waitlist<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<WaitlistEntry>>, ApiError> {
    let event_id: EventId = parse_id(&event_id, "event_id")?;
    Ok(Json(state.service.waitlist(event_id).await?))
}

/// POST /events/{event_id}/waitlist/promote — run a promotion pass now.
#[tracing::instrument(skip(state))]
pub async fn promote<B: Backend>(
    State(state): State<Arc<AppState<B>>>,
    Path(event_id): Path<String>,
) -> Result<Json<PromoteResponse>, ApiError> {
    let event_id: EventId = parse_id(&event_id, "event_id")?;
    let outcome = state.service.reconcile(event_id).await?;

    Ok(Json(PromoteResponse {
        promoted: outcome.promoted,
        stale_removed: outcome.stale_removed,
        requeued: outcome.requeued,
    }))
}
