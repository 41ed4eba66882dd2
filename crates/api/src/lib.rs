//! HTTP intake and process wiring for the order saga orchestrator.
//!
//! Serves `POST /orders` to start sagas, plus health and Prometheus metrics
//! endpoints. [`runtime`] wires the broker topology, the workers and the
//! orchestrator loop that the binary runs next to the server.

pub mod config;
pub mod error;
pub mod routes;
pub mod runtime;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use message_bus::Publisher;
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{Intake, SagaLocks};
use saga_store::SagaStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, P>(state: Arc<AppState<S, P>>, metrics_handle: PrometheusHandle) -> Router
where
    S: SagaStore + 'static,
    P: Publisher + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/healthz", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<S, P>))
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

/// Creates the application state around a store and a publisher.
///
/// `locks` must be the orchestrator's when one runs in the same process.
pub fn create_state<S, P>(store: S, publisher: P, locks: SagaLocks) -> Arc<AppState<S, P>>
where
    S: SagaStore,
    P: Publisher,
{
    Arc::new(AppState {
        intake: Intake::new(store, publisher).with_locks(locks),
    })
}
