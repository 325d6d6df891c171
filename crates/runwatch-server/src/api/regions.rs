use crate::api::{alert_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, put};
use axum::{Json, Router};
use runwatch_alert::RegionChange;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SetRegionEnabledRequest {
    pub enabled: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegionSwitchResponse {
    region: String,
    enabled: bool,
    /// Alert ids created or refreshed by enabling.
    scheduled: Vec<String>,
    cancelled: usize,
}

async fn set_region_enabled(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(region): Path<String>,
    Json(req): Json<SetRegionEnabledRequest>,
) -> Response {
    let body = match state.core.client.set_region_enabled(&region, req.enabled) {
        Ok(RegionChange::Enabled(report)) => RegionSwitchResponse {
            region,
            enabled: true,
            scheduled: report.written,
            cancelled: 0,
        },
        Ok(RegionChange::Disabled(cancelled)) => RegionSwitchResponse {
            region,
            enabled: false,
            scheduled: Vec::new(),
            cancelled: cancelled.len(),
        },
        Err(e) => return alert_error_response(&trace_id, e),
    };
    success_response(StatusCode::OK, &trace_id, body)
}

async fn region_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(region): Path<String>,
) -> Response {
    match state.core.client.get_alerts_for_region(&region) {
        Ok(overview) => success_response(StatusCode::OK, &trace_id, overview),
        Err(e) => alert_error_response(&trace_id, e),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/regions/{region}/enabled", put(set_region_enabled))
        .route("/v1/regions/{region}/alerts", get(region_alerts))
}
