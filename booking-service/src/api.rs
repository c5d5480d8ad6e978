use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ErrorKind, ReservationError};
use crate::handlers::BookingHandler;
use crate::metrics::MetricsSnapshot;
use crate::request::{BookingRequest, PublishEventRequest};
use crate::store::InventoryStore;

pub struct AppState<S: InventoryStore> {
    pub handler: Arc<BookingHandler<S>>,
}

impl<S: InventoryStore> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingResponse {
    pub success: bool,
    pub data: Booking,
    /// Milliseconds spent acquiring the section lock.
    pub lock_acquisition_time: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBookingsQuery {
    pub event_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub status: Option<BookingStatus>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: ErrorKind,
    pub retryable: bool,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn create_router<S: InventoryStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/bookings", post(create_booking::<S>).get(list_bookings::<S>))
        .route("/api/events", post(create_event::<S>))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::<S>))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::ResourceNotFound | ErrorKind::SectionNotFound => StatusCode::NOT_FOUND,
        ErrorKind::InsufficientCapacity | ErrorKind::TransactionAborted => StatusCode::CONFLICT,
        ErrorKind::LockTimeout
        | ErrorKind::CoordinatorUnavailable
        | ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn error_response(err: ReservationError) -> ApiError {
    let kind = err.kind();
    (
        status_for(kind),
        Json(ErrorResponse {
            error: err.to_string(),
            kind,
            retryable: err.is_retryable(),
        }),
    )
}

/// Body and query strings that do not deserialize are validation errors too.
fn malformed(body_text: String) -> ApiError {
    error_response(ReservationError::Validation(body_text))
}

pub async fn create_booking<S: InventoryStore>(
    State(state): State<AppState<S>>,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateBookingResponse>), ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        state.handler.metrics().record_rejected();
        tracing::warn!("Booking rejected: {}", rejection.body_text());
        malformed(rejection.body_text())
    })?;
    let outcome = state
        .handler
        .create_reservation(&request)
        .await
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse {
            success: true,
            data: outcome.booking,
            lock_acquisition_time: u64::try_from(outcome.lock_acquisition_time.as_millis())
                .unwrap_or(u64::MAX),
        }),
    ))
}

pub async fn list_bookings<S: InventoryStore>(
    State(state): State<AppState<S>>,
    query: Result<Query<ListBookingsQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Page<Booking>>>, ApiError> {
    let Query(query) = query.map_err(|rejection| malformed(rejection.body_text()))?;
    let filter = BookingFilter {
        event_id: query.event_id,
        user_id: query.user_id,
        status: query.status,
    };
    let page = state
        .handler
        .list_reservations(&filter, query.page, query.limit)
        .await
        .map_err(|e| {
            tracing::error!("Get bookings failed: {}", e);
            error_response(e)
        })?;

    Ok(Json(ApiResponse {
        success: true,
        data: page,
    }))
}

pub async fn create_event<S: InventoryStore>(
    State(state): State<AppState<S>>,
    payload: Result<Json<PublishEventRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Event>>), ApiError> {
    let Json(request) = payload.map_err(|rejection| malformed(rejection.body_text()))?;
    let event = state
        .handler
        .publish_event(request)
        .await
        .map_err(|e| {
            tracing::error!("Event creation failed: {}", e);
            error_response(e)
        })?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse {
            success: true,
            data: event,
        }),
    ))
}

pub async fn metrics<S: InventoryStore>(State(state): State<AppState<S>>) -> Json<MetricsSnapshot> {
    Json(state.handler.metrics().snapshot())
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now(),
    })
}
