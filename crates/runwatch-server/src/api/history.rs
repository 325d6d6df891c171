use crate::api::pagination::deserialize_optional_u64;
use crate::api::pagination::PaginationParams;
use crate::api::{error_response, success_paginated_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use runwatch_common::region::validate_region;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    pub limit: Option<u64>,
    #[serde(default, deserialize_with = "deserialize_optional_u64")]
    pub offset: Option<u64>,
}

async fn list_history(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let region = query.region.as_deref().filter(|r| !r.is_empty());
    if let Some(region) = region {
        if let Err(msg) = validate_region(region) {
            return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &msg);
        }
    }
    let page = PaginationParams {
        limit: query.limit,
        offset: query.offset,
    };
    let store = &state.core.store;
    let result = store
        .count_history(region)
        .and_then(|total| Ok((total, store.list_history(region, page.limit(), page.offset())?)));
    match result {
        Ok((total, items)) => success_paginated_response(
            StatusCode::OK,
            &trace_id,
            items,
            total,
            page.limit(),
            page.offset(),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list alert history");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "storage_error",
                "Database error",
            )
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/history", get(list_history))
}
