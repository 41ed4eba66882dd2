//! Order intake endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use message_bus::Publisher;
use protocol::OrderRequest;
use saga::Intake;
use saga_store::SagaStore;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S, P> {
    pub intake: Intake<S, P>,
}

// -- Request types --

/// Missing fields decode to empty values so that intake validation, not the
/// JSON extractor, reports them.
#[derive(Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub amount: f64,
}

impl From<CreateOrderRequest> for OrderRequest {
    fn from(req: CreateOrderRequest) -> Self {
        OrderRequest::new(req.order_id, req.user_id, req.amount)
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct SagaStartedResponse {
    pub saga_id: String,
    pub status: &'static str,
}

// -- Handlers --

/// POST /orders: validate the order and start its saga.
#[tracing::instrument(skip(state, body))]
pub async fn create<S, P>(
    State(state): State<Arc<AppState<S, P>>>,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SagaStartedResponse>), ApiError>
where
    S: SagaStore + 'static,
    P: Publisher + 'static,
{
    let Json(req) = body.map_err(|e| {
        metrics::counter!("orders_rejected_total").increment(1);
        ApiError::BadRequest(format!("invalid JSON: {}", e.body_text()))
    })?;

    let saga_id = state.intake.start(req.into()).await.inspect_err(|e| {
        if matches!(e, saga::SagaError::Validation(_)) {
            metrics::counter!("orders_rejected_total").increment(1);
        }
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SagaStartedResponse {
            saga_id: saga_id.to_string(),
            status: "STARTED",
        }),
    ))
}
