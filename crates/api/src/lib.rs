//! HTTP API server with observability for the event registration backend.
//!
//! Provides REST endpoints for registrations, RSVPs and waitlists,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use domain::{EngineConfig, PromotionHandle, RegistrationService};
use metrics_exporter_prometheus::PrometheusHandle;
use registration_store::{
    CapacityRegistry, InMemoryCapacityOracle, InMemoryRegistrationStore, InMemoryWaitlistQueue,
    PostgresCapacityOracle, PostgresRegistrationStore, PostgresWaitlistQueue, RegistrationStore,
    WaitlistQueue,
};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// A storage backend: the three store types the engine runs on.
pub trait Backend: Send + Sync + 'static {
    type Registrations: RegistrationStore + Clone + 'static;
    type Waitlist: WaitlistQueue + Clone + 'static;
    type Capacities: CapacityRegistry + Clone + 'static;
}

/// Process-local stores.
pub struct InMemoryBackend;

impl Backend for InMemoryBackend {
    type Registrations = InMemoryRegistrationStore;
    type Waitlist = InMemoryWaitlistQueue;
    type Capacities = InMemoryCapacityOracle;
}

/// PostgreSQL-backed stores sharing one pool.
pub struct PostgresBackend;

impl Backend for PostgresBackend {
    type Registrations = PostgresRegistrationStore;
    type Waitlist = PostgresWaitlistQueue;
    type Capacities = PostgresCapacityOracle;
}

/// The registration engine over a backend's stores.
pub type Service<B> = RegistrationService<
    <B as Backend>::Registrations,
    <B as Backend>::Waitlist,
    <B as Backend>::Capacities,
>;

/// Shared application state accessible from all handlers.
pub struct AppState<B: Backend> {
    pub service: Service<B>,
    pub capacities: B::Capacities,
}

impl<B: Backend> AppState<B> {
    /// Builds the state and starts the promotion worker.
    pub fn new(
        registrations: B::Registrations,
        waitlist: B::Waitlist,
        capacities: B::Capacities,
        config: EngineConfig,
    ) -> (Arc<Self>, PromotionHandle) {
        let (service, handle) =
            RegistrationService::new(registrations, waitlist, capacities.clone(), config);
        (
            Arc::new(Self {
                service,
                capacities,
            }),
            handle,
        )
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<B: Backend>(state: Arc<AppState<B>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/events/{event_id}/capacity",
            put(routes::events::set_capacity::<B>),
        )
        .route("/events/{event_id}/summary", get(routes::events::summary::<B>))
        .route("/events/{event_id}/waitlist", get(routes::events::waitlist::<B>))
        .route(
            "/events/{event_id}/waitlist/promote",
            post(routes::events::promote::<B>),
        )
        .route(
            "/events/{event_id}/registrations",
            post(routes::registrations::register::<B>).get(routes::registrations::list::<B>),
        )
        .route(
            "/events/{event_id}/registrations/{user_id}",
            get(routes::registrations::get::<B>).delete(routes::registrations::cancel::<B>),
        )
        .route(
            "/events/{event_id}/registrations/{user_id}/rsvp",
            put(routes::registrations::update_rsvp::<B>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over fresh in-memory stores.
pub fn create_in_memory_state(
    config: EngineConfig,
) -> (Arc<AppState<InMemoryBackend>>, PromotionHandle) {
    AppState::new(
        InMemoryRegistrationStore::new(),
        InMemoryWaitlistQueue::new(),
        InMemoryCapacityOracle::new(),
        config,
    )
}

/// Creates application state over PostgreSQL stores.
///
/// Migrations must already have been applied to the pool's database.
pub fn create_postgres_state(
    pool: PgPool,
    config: EngineConfig,
) -> (Arc<AppState<PostgresBackend>>, PromotionHandle) {
    AppState::new(
        PostgresRegistrationStore::new(pool.clone()),
        PostgresWaitlistQueue::new(pool.clone()),
        PostgresCapacityOracle::new(pool),
        config,
    )
}
