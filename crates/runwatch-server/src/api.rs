pub mod definitions;
pub mod history;
pub mod instances;
pub mod pagination;
pub mod regions;

use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use runwatch_alert::AlertError;
use serde::Serialize;
use serde_json::Value;

/// Response envelope shared by every endpoint.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 0 on success.
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

#[derive(Serialize)]
pub struct PaginatedData<T>
where
    T: Serialize,
{
    pub items: Vec<T>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

pub fn success_paginated_response<T>(
    status: StatusCode,
    trace_id: &str,
    items: Vec<T>,
    total: u64,
    limit: usize,
    offset: usize,
) -> Response
where
    T: Serialize,
{
    success_response(
        status,
        trace_id,
        PaginatedData {
            items,
            total,
            limit,
            offset,
        },
    )
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "precondition_failed" => 1006,
        "internal_error" => 1500,
        "storage_error" => 1501,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

/// Maps a core error onto its HTTP status and envelope code.
pub fn alert_error_response(trace_id: &str, err: AlertError) -> Response {
    match err {
        AlertError::Validation(msg) => {
            error_response(StatusCode::BAD_REQUEST, trace_id, "bad_request", &msg)
        }
        AlertError::Precondition(msg) => error_response(
            StatusCode::CONFLICT,
            trace_id,
            "precondition_failed",
            &msg,
        ),
        e @ AlertError::NotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, trace_id, "not_found", &e.to_string())
        }
        AlertError::Persistence(e) => {
            tracing::error!(trace_id, error = %e, "Alert store operation failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    live_alerts: u64,
    poller_enabled: bool,
    storage_status: String,
}

async fn health(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let (live_alerts, storage_status) = match state.core.store.count_alerts() {
        Ok(count) => (count, "ok"),
        Err(e) => {
            tracing::error!(error = %e, "Health check could not read the alert store");
            (0, "error")
        }
    };
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: (Utc::now() - state.start_time).num_seconds(),
            live_alerts,
            poller_enabled: state.config.poller.enabled,
            storage_status: storage_status.to_string(),
        },
    )
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health))
        .merge(definitions::routes())
        .merge(regions::routes())
        .merge(instances::routes())
        .merge(history::routes())
}
