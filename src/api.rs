use crate::constants::DATE_FORMAT;
use crate::worker::{today, AdWorker, WorkerError};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<AdWorker>,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{context}")]
    Internal {
        context: &'static str,
        #[source]
        source: WorkerError,
    },
}

impl AppError {
    fn internal(context: &'static str) -> impl FnOnce(WorkerError) -> AppError {
        move |source| match source {
            WorkerError::AlreadyRunning(_) => AppError::Conflict(source.to_string()),
            source => AppError::Internal { context, source },
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::Internal { context, source } => {
                error!(error = %source, "{}", context);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": context, "detail": source.to_string() }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/advertiser/adgroups", get(get_adgroups))
        .route("/api/advertiser/metrics", get(get_stored_metrics))
        .route("/api/advertiser/real-time-metrics", post(real_time_metrics))
        .route("/api/advertiser/send-notification", post(send_notification))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct AdvertiserQuery {
    pub advertiser_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AdvertiserIdRequest {
    pub advertiser_id: String,
}

#[derive(Debug, Deserialize)]
pub struct MetricsRequest {
    pub advertiser_id: String,
    #[serde(default)]
    pub adgroup_ids: Option<Vec<String>>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

fn advertiser_id(raw: &str) -> Result<&str, AppError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(AppError::BadRequest("advertiser_id is required".to_string()));
    }
    Ok(id)
}

fn parse_date(field: &str, raw: Option<&str>, default: NaiveDate) -> Result<NaiveDate, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(value) => NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|_| {
            AppError::BadRequest(format!("{} must be formatted as YYYY-MM-DD", field))
        }),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn get_adgroups(
    State(state): State<AppState>,
    Query(query): Query<AdvertiserQuery>,
) -> Result<impl IntoResponse, AppError> {
    let advertiser_id = advertiser_id(&query.advertiser_id)?;
    let ad_groups = state
        .worker
        .refresh_ad_groups(advertiser_id)
        .await
        .map_err(AppError::internal("Error fetching ad groups"))?;
    Ok(Json(ad_groups))
}

async fn get_stored_metrics(
    State(state): State<AppState>,
    Query(query): Query<AdvertiserQuery>,
) -> Result<impl IntoResponse, AppError> {
    let advertiser_id = advertiser_id(&query.advertiser_id)?;
    let metrics = state
        .worker
        .latest_metrics(advertiser_id)
        .await
        .map_err(AppError::internal("Error loading stored metrics"))?;
    Ok(Json(json!({
        "status": "success",
        "count": metrics.len(),
        "data": metrics,
    })))
}

async fn real_time_metrics(
    State(state): State<AppState>,
    payload: Result<Json<MetricsRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    let advertiser_id = advertiser_id(&request.advertiser_id)?;
    let today = today();
    let start_date = parse_date("start_date", request.start_date.as_deref(), today)?;
    let end_date = parse_date("end_date", request.end_date.as_deref(), today)?;
    if start_date > end_date {
        return Err(AppError::BadRequest(
            "start_date must not be after end_date".to_string(),
        ));
    }

    let metrics = state
        .worker
        .real_time_metrics(advertiser_id, request.adgroup_ids, start_date, end_date)
        .await
        .map_err(AppError::internal("Error fetching metrics"))?;

    let body = match metrics {
        None => json!({
            "status": "success",
            "data": [],
            "message": "No enabled ad groups found",
        }),
        Some(metrics) => json!({
            "status": "success",
            "count": metrics.len(),
            "data": metrics,
        }),
    };
    Ok(Json(body))
}

async fn send_notification(
    State(state): State<AppState>,
    payload: Result<Json<AdvertiserIdRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(request) = payload?;
    let advertiser_id = advertiser_id(&request.advertiser_id)?;
    let today = today();

    let report = state
        .worker
        .run_cycle(advertiser_id, today, today)
        .await
        .map_err(AppError::internal("Error sending notification"))?;

    Ok(Json(json!({
        "status": "success",
        "message": format!("Notification process triggered for advertiser {}", advertiser_id),
        "report": report,
    })))
}
