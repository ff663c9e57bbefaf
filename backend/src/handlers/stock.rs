//! Stock, location and serial number HTTP handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;

use crate::middleware::{check_permission, Actor};
use crate::store::Store;
use crate::AppState;

/// Stock item with unallocated quantity, allocations and history
pub async fn get_stock_item<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(stock_item_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "view") {
        return e.into_response();
    }

    match state.builds.stock_detail(stock_item_id).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// A location and everything below it
pub async fn location_children<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(location_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "view") {
        return e.into_response();
    }

    match state.builds.location_subtree(location_id).await {
        Ok(locations) => {
            (StatusCode::OK, Json(serde_json::json!({ "locations": locations }))).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Next free serial number for a part
pub async fn next_serial_number<S: Store>(
    State(state): State<AppState<S>>,
    Extension(actor): Extension<Actor>,
    Path(part_id): Path<Uuid>,
) -> impl IntoResponse {
    if let Err(e) = check_permission(&actor, "build", "view") {
        return e.into_response();
    }

    match state.builds.next_serial_number(part_id).await {
        Ok(next) => (StatusCode::OK, Json(next)).into_response(),
        Err(e) => e.into_response(),
    }
}
