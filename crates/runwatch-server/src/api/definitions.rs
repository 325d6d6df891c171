use crate::api::{alert_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use runwatch_alert::{AlertError, Detached};
use runwatch_common::types::{threshold_minutes, AlertDefinition, DefinitionUpdate, HistoryRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDefinitionRequest {
    #[serde(default)]
    pub hours: i64,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub regions: BTreeSet<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Threshold changes are given as `hours`/`minutes`; a missing half counts as 0.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDefinitionRequest {
    pub enabled: Option<bool>,
    pub hours: Option<i64>,
    pub minutes: Option<i64>,
    pub regions: Option<BTreeSet<String>>,
}

impl TryFrom<UpdateDefinitionRequest> for DefinitionUpdate {
    type Error = AlertError;

    fn try_from(req: UpdateDefinitionRequest) -> Result<Self, AlertError> {
        let threshold = match (req.hours, req.minutes) {
            (None, None) => None,
            (h, m) => Some(threshold_from(h.unwrap_or(0), m.unwrap_or(0))?),
        };
        Ok(DefinitionUpdate {
            enabled: req.enabled,
            threshold_minutes: threshold,
            regions: req.regions,
        })
    }
}

/// `minutes` must stay below an hour; range limits on the total are applied
/// by the definition service.
fn threshold_from(hours: i64, minutes: i64) -> Result<i64, AlertError> {
    if !(0..60).contains(&minutes) {
        return Err(AlertError::Validation(format!(
            "minutes must be within 0..60, got {minutes}"
        )));
    }
    threshold_minutes(hours, minutes).map_err(AlertError::Validation)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CancelledResponse {
    cancelled: Vec<HistoryRecord>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetachResponse {
    /// `removed` or `narrowed`.
    outcome: &'static str,
    definition: Option<AlertDefinition>,
    cancelled: Vec<HistoryRecord>,
}

async fn list_definitions(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    match state.core.definitions.list() {
        Ok(defs) => success_response(StatusCode::OK, &trace_id, defs),
        Err(e) => alert_error_response(&trace_id, e),
    }
}

async fn create_definition(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(req): Json<CreateDefinitionRequest>,
) -> Response {
    let threshold = match threshold_from(req.hours, req.minutes) {
        Ok(threshold) => threshold,
        Err(e) => return alert_error_response(&trace_id, e),
    };
    match state.core.definitions.add(threshold, req.regions, req.enabled) {
        Ok(def) => success_response(StatusCode::CREATED, &trace_id, def),
        Err(e) => alert_error_response(&trace_id, e),
    }
}

async fn update_definition(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateDefinitionRequest>,
) -> Response {
    let update = match DefinitionUpdate::try_from(req) {
        Ok(update) => update,
        Err(e) => return alert_error_response(&trace_id, e),
    };
    match state.core.definitions.update(&id, update) {
        Ok(def) => success_response(StatusCode::OK, &trace_id, def),
        Err(e) => alert_error_response(&trace_id, e),
    }
}

async fn delete_definition(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.core.definitions.remove(&id) {
        Ok(cancelled) => success_response(StatusCode::OK, &trace_id, CancelledResponse { cancelled }),
        Err(e) => alert_error_response(&trace_id, e),
    }
}

async fn detach_region(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path((id, region)): Path<(String, String)>,
) -> Response {
    let body = match state.core.definitions.detach_region(&id, &region) {
        Ok(Detached::Removed { cancelled }) => DetachResponse {
            outcome: "removed",
            definition: None,
            cancelled,
        },
        Ok(Detached::Narrowed {
            definition,
            cancelled,
        }) => DetachResponse {
            outcome: "narrowed",
            definition: Some(definition),
            cancelled,
        },
        Err(e) => return alert_error_response(&trace_id, e),
    };
    success_response(StatusCode::OK, &trace_id, body)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/definitions", get(list_definitions).post(create_definition))
        .route(
            "/v1/definitions/{id}",
            patch(update_definition).delete(delete_definition),
        )
        .route("/v1/definitions/{id}/detach/{region}", post(detach_region))
}
