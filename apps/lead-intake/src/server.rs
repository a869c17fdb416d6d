use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::{
    config::Config,
    counter::LeadCounterSnapshot,
    persistence::PersistenceError,
    pipeline::{LeadPipeline, SubmitError},
    routes,
    shutdown::Shutdown,
    types::{RawLeadSubmission, StorageTier, StoredLead},
    validation::ValidationError,
};

#[derive(Clone)]
pub struct AppState {
    config: Config,
    pipeline: LeadPipeline,
    shutdown: Shutdown,
    relay_driver: &'static str,
    started_at: chrono::DateTime<Utc>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Config,
        pipeline: LeadPipeline,
        shutdown: Shutdown,
        relay_driver: &'static str,
    ) -> Self {
        Self {
            config,
            pipeline,
            shutdown,
            relay_driver,
            started_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn pipeline(&self) -> &LeadPipeline {
        &self.pipeline
    }

    #[must_use]
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: String,
    build_sha: String,
    uptime_seconds: i64,
    relay_driver: &'static str,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    draining: bool,
    contractors: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitLeadResponse {
    accepted: bool,
    id: String,
    storage_tier: StorageTier,
}

#[derive(Debug, Serialize)]
struct LeadResponse {
    lead: StoredLead,
}

pub fn build_router(state: AppState) -> Router {
    let router = Router::<AppState>::new();
    let router = add_health_routes(router);
    add_lead_routes(router)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

fn add_health_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route(routes::ROUTE_HEALTHZ, get(health))
        .route(routes::ROUTE_READYZ, get(readiness))
}

fn add_lead_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route(routes::ROUTE_API_LEAD, post(submit_lead))
        .route(routes::ROUTE_API_LEADS_STATS, get(lead_stats))
        .route(routes::ROUTE_API_LEAD_BY_ID, get(get_lead))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds();
    Json(HealthResponse {
        status: "ok",
        service: state.config.service_name,
        build_sha: state.config.build_sha,
        uptime_seconds,
        relay_driver: state.relay_driver,
    })
}

async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let draining = state.shutdown.is_triggered();
    let status = if draining {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(ReadinessResponse {
            status: if draining { "draining" } else { "ready" },
            draining,
            contractors: state.pipeline.directory().len(),
        }),
    )
}

async fn submit_lead(
    State(state): State<AppState>,
    payload: Result<Json<RawLeadSubmission>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitLeadResponse>), ApiError> {
    let Json(raw) = payload.map_err(|rejection| ApiError::InvalidRequest(rejection.body_text()))?;
    let receipt = state.pipeline.submit(raw).await.map_err(ApiError::from_submit)?;
    Ok((
        StatusCode::CREATED,
        Json(SubmitLeadResponse {
            accepted: true,
            id: receipt.id,
            storage_tier: receipt.storage_tier,
        }),
    ))
}

async fn get_lead(
    State(state): State<AppState>,
    Path(lead_id): Path<String>,
) -> Result<Json<LeadResponse>, ApiError> {
    let lead = state
        .pipeline
        .get(lead_id.trim())
        .await
        .map_err(|error| ApiError::Internal(error.to_string()))?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(LeadResponse { lead }))
}

async fn lead_stats(State(state): State<AppState>) -> Json<LeadCounterSnapshot> {
    Json(state.pipeline.stats().await)
}

#[derive(Debug)]
enum ApiError {
    Validation(ValidationError),
    InvalidRequest(String),
    Unavailable(String),
    NotFound,
    Internal(String),
}

impl ApiError {
    fn from_submit(error: SubmitError) -> Self {
        match error {
            SubmitError::Validation(error) => Self::Validation(error),
            SubmitError::Persistence(error @ PersistenceError::BothTiersFailed { .. }) => {
                Self::Unavailable(error.to_string())
            }
            SubmitError::Persistence(error) => Self::Internal(error.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Validation(error) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "accepted": false,
                    "error": error.to_string(),
                    "missingFields": error.missing_fields,
                    "invalidFields": error.invalid_fields,
                })),
            )
                .into_response(),
            Self::InvalidRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "accepted": false,
                    "error": "invalid_request",
                    "message": message,
                    "missingFields": [],
                    "invalidFields": [],
                })),
            )
                .into_response(),
            Self::Unavailable(message) => {
                tracing::error!(reason = %message, "lead intake unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({
                        "accepted": false,
                        "error": "storage_unavailable",
                    })),
                )
                    .into_response()
            }
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({
                    "error": "not_found",
                })),
            )
                .into_response(),
            Self::Internal(message) => {
                tracing::error!(reason = %message, "lead intake internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "error": "internal",
                    })),
                )
                    .into_response()
            }
        }
    }
}
