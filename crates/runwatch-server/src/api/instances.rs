use crate::api::{alert_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{post, put};
use axum::{Json, Router};
use runwatch_alert::{InstanceStateChange, Materialized, SkipReason, Transition};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MaterializedResponse {
    scheduled: Vec<String>,
    unchanged: usize,
    already_delivered: usize,
    skipped: Option<&'static str>,
}

impl From<Materialized> for MaterializedResponse {
    fn from(m: Materialized) -> Self {
        Self {
            scheduled: m.written,
            unchanged: m.unchanged,
            already_delivered: m.already_delivered,
            skipped: m.skipped.map(|reason| match reason {
                SkipReason::RegionDisabled => "region_disabled",
                SkipReason::NoDeliveryToken => "no_delivery_token",
                SkipReason::NoDefinitions => "no_definitions",
            }),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase", tag = "transition")]
enum TransitionResponse {
    Materialized(MaterializedResponse),
    Cancelled { cancelled: usize },
}

async fn instance_state_changed(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(change): Json<InstanceStateChange>,
) -> Response {
    match state.core.client.on_instance_state_changed(change) {
        Ok(Transition::Materialized(report)) => success_response(
            StatusCode::OK,
            &trace_id,
            TransitionResponse::Materialized(report.into()),
        ),
        Ok(Transition::Cancelled(records)) => success_response(
            StatusCode::OK,
            &trace_id,
            TransitionResponse::Cancelled {
                cancelled: records.len(),
            },
        ),
        Err(e) => alert_error_response(&trace_id, e),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeliveryTokenRequest {
    pub token: String,
}

async fn register_device_token(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<DeliveryTokenRequest>,
) -> Response {
    match state.core.client.register_delivery_token(&req.token) {
        Ok(report) => success_response(
            StatusCode::OK,
            &trace_id,
            MaterializedResponse::from(report),
        ),
        Err(e) => alert_error_response(&trace_id, e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/instances/state", post(instance_state_changed))
        .route("/v1/device-token", put(register_device_token))
}
